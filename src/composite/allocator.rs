//! Interface and endpoint number allocation
//!
//! Both allocators are running counters created fresh for every
//! composition pass. Numbers only ever grow within a pass, so two
//! functions can never be handed the same interface or endpoint.

use crate::error::{AppError, Result};

/// Endpoint allocator - hands out logical endpoint numbers 1..=max
#[derive(Debug, Clone)]
pub struct EndpointAllocator {
    max_endpoints: u8,
    /// Last number handed out, 0 before the first allocation (EP0 is control)
    current: u8,
}

impl EndpointAllocator {
    pub fn new(max_endpoints: u8) -> Self {
        Self {
            max_endpoints,
            current: 0,
        }
    }

    /// Advance to the next logical endpoint number
    pub fn allocate(&mut self) -> Result<u8> {
        if self.current >= self.max_endpoints {
            return Err(AppError::Capacity(format!(
                "Not enough endpoints: all {} logical endpoints in use",
                self.max_endpoints
            )));
        }
        self.current += 1;
        Ok(self.current)
    }

    /// Number most recently handed out
    pub fn current(&self) -> u8 {
        self.current
    }
}

/// Interface allocator - hands out contiguous interface numbers from 0
#[derive(Debug, Clone, Default)]
pub struct InterfaceAllocator {
    /// Next number to hand out
    next: u8,
}

impl InterfaceAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&mut self) -> Result<u8> {
        let n = self.next;
        self.next = n.checked_add(1).ok_or_else(|| {
            AppError::Capacity("Interface numbers exhausted (255 in use)".to_string())
        })?;
        Ok(n)
    }

    /// Number the next allocation would return (`intf_index`)
    pub fn peek(&self) -> u8 {
        self.next
    }

    /// Interfaces allocated so far in this pass
    pub fn count(&self) -> u8 {
        self.next
    }
}
