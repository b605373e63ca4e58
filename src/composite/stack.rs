//! Underlying USB device stack interface
//!
//! The compositor never talks to a device controller directly. Once a
//! descriptor set is final it is handed to a [`UsbDeviceStack`], followed by
//! one `add_interface` per assigned interface and one `add_endpoint` per
//! assigned endpoint, and finally `initialize()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{AppError, Result};

/// An interface owned by one function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceHandle {
    pub function: String,
    pub number: u8,
}

/// An endpoint owned by one function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointHandle {
    pub function: String,
    /// `bEndpointAddress`, direction bit included
    pub address: u8,
}

impl EndpointHandle {
    pub fn is_in(&self) -> bool {
        self.address & 0x80 != 0
    }
}

/// Device-stack operations the lifecycle controller drives
pub trait UsbDeviceStack: Send {
    /// Hand over the composed descriptor buffer
    fn register_descriptor(&mut self, descriptor: Bytes) -> Result<()>;

    fn add_interface(&mut self, interface: InterfaceHandle) -> Result<()>;

    fn add_endpoint(&mut self, endpoint: EndpointHandle) -> Result<()>;

    /// Present the device to the host
    fn initialize(&mut self) -> Result<()>;

    /// Tear the device down; must be safe to call when not initialized
    fn deinitialize(&mut self) -> Result<()>;
}

/// One recorded stack call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackCall {
    RegisterDescriptor(Bytes),
    AddInterface(InterfaceHandle),
    AddEndpoint(EndpointHandle),
    Initialize,
    Deinitialize,
}

/// In-memory stack that records every call
///
/// Clones share the same log, so a test can keep one handle while the
/// service owns the other.
#[derive(Debug, Clone, Default)]
pub struct MemoryStack {
    calls: Arc<Mutex<Vec<StackCall>>>,
    initialized: Arc<AtomicBool>,
    fail_initialize: Arc<AtomicBool>,
}

impl MemoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<StackCall> {
        self.calls.lock().clone()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Make the next `initialize()` calls fail
    pub fn set_fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::Release);
    }

    /// Last descriptor buffer handed over
    pub fn descriptor(&self) -> Option<Bytes> {
        self.calls.lock().iter().rev().find_map(|c| match c {
            StackCall::RegisterDescriptor(b) => Some(b.clone()),
            _ => None,
        })
    }

    /// Interfaces added since the last `register_descriptor`
    pub fn interfaces(&self) -> Vec<InterfaceHandle> {
        let calls = self.calls.lock();
        let start = calls
            .iter()
            .rposition(|c| matches!(c, StackCall::RegisterDescriptor(_)))
            .unwrap_or(0);
        calls[start..]
            .iter()
            .filter_map(|c| match c {
                StackCall::AddInterface(i) => Some(i.clone()),
                _ => None,
            })
            .collect()
    }

    /// Endpoints added since the last `register_descriptor`
    pub fn endpoints(&self) -> Vec<EndpointHandle> {
        let calls = self.calls.lock();
        let start = calls
            .iter()
            .rposition(|c| matches!(c, StackCall::RegisterDescriptor(_)))
            .unwrap_or(0);
        calls[start..]
            .iter()
            .filter_map(|c| match c {
                StackCall::AddEndpoint(e) => Some(e.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StackCall) {
        self.calls.lock().push(call);
    }
}

impl UsbDeviceStack for MemoryStack {
    fn register_descriptor(&mut self, descriptor: Bytes) -> Result<()> {
        self.record(StackCall::RegisterDescriptor(descriptor));
        Ok(())
    }

    fn add_interface(&mut self, interface: InterfaceHandle) -> Result<()> {
        self.record(StackCall::AddInterface(interface));
        Ok(())
    }

    fn add_endpoint(&mut self, endpoint: EndpointHandle) -> Result<()> {
        self.record(StackCall::AddEndpoint(endpoint));
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        if self.fail_initialize.load(Ordering::Acquire) {
            return Err(AppError::Internal("device controller refused to start".to_string()));
        }
        self.record(StackCall::Initialize);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn deinitialize(&mut self) -> Result<()> {
        self.record(StackCall::Deinitialize);
        self.initialized.store(false, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_stack_records_calls() {
        let handle = MemoryStack::new();
        let mut stack: Box<dyn UsbDeviceStack> = Box::new(handle.clone());

        stack
            .register_descriptor(Bytes::from_static(&[0x12, 0x01]))
            .unwrap();
        stack
            .add_interface(InterfaceHandle {
                function: "msc".to_string(),
                number: 0,
            })
            .unwrap();
        stack
            .add_endpoint(EndpointHandle {
                function: "msc".to_string(),
                address: 0x81,
            })
            .unwrap();
        stack.initialize().unwrap();

        assert!(handle.is_initialized());
        assert_eq!(handle.calls().len(), 4);
        assert_eq!(handle.interfaces()[0].number, 0);
        assert!(handle.endpoints()[0].is_in());
        assert_eq!(handle.descriptor().unwrap().as_ref(), &[0x12, 0x01]);

        stack.deinitialize().unwrap();
        assert!(!handle.is_initialized());
    }

    #[test]
    fn test_initialize_failure() {
        let handle = MemoryStack::new();
        handle.set_fail_initialize(true);
        let mut stack = handle.clone();
        assert!(stack.initialize().is_err());
        assert!(!handle.is_initialized());
    }
}
