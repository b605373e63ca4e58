//! Function registry - fixed-capacity table of function slots

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info};

use super::descriptor::ParsedFragment;
use super::function::{CompositeFunction, FunctionInfo};
use crate::error::{AppError, Result};

/// Default number of registry slots
pub const MAX_COMPOSITE_DEV: usize = 8;
/// Interfaces a single function may own
pub const MAX_FUNC_INTF_NUM: usize = 4;
/// Endpoints a single function may own
pub const MAX_FUNC_EP_NUM: usize = 3;
/// Longest accepted function name
pub const MAX_FUNC_NAME_LEN: usize = 16;

/// One registered function
#[derive(Clone)]
pub struct FunctionSlot {
    name: String,
    dev_class: u8,
    fragment: ParsedFragment,
    handler: Arc<dyn CompositeFunction>,
    /// The owning module holds a registration
    active: bool,
    /// Contributes to the current composite descriptor
    loaded: bool,
    intf: heapless::Vec<u8, MAX_FUNC_INTF_NUM>,
    ep: heapless::Vec<u8, MAX_FUNC_EP_NUM>,
}

impl FunctionSlot {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dev_class(&self) -> u8 {
        self.dev_class
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Number of interfaces declared by the function's configuration
    pub fn num_interfaces(&self) -> u8 {
        self.fragment.num_interfaces
    }

    /// Interface/endpoint bytes as registered, before renumbering
    pub fn fragment(&self) -> &Bytes {
        &self.fragment.class_block
    }

    pub fn is_stub(&self) -> bool {
        self.fragment.is_stub()
    }

    pub fn handler(&self) -> &Arc<dyn CompositeFunction> {
        &self.handler
    }

    /// Interface numbers assigned by the last composition
    pub fn interfaces(&self) -> &[u8] {
        &self.intf
    }

    /// Endpoint addresses assigned by the last composition
    pub fn endpoints(&self) -> &[u8] {
        &self.ep
    }

    pub(crate) fn set_loaded(&mut self, loaded: bool) {
        self.loaded = loaded;
    }

    pub(crate) fn clear_assignment(&mut self) {
        self.intf.clear();
        self.ep.clear();
    }

    pub(crate) fn record_interface(&mut self, number: u8) -> Result<()> {
        self.intf.push(number).map_err(|_| {
            AppError::Capacity(format!(
                "{} owns more than {} interfaces",
                self.name, MAX_FUNC_INTF_NUM
            ))
        })
    }

    pub(crate) fn record_endpoint(&mut self, address: u8) -> Result<()> {
        self.ep.push(address).map_err(|_| {
            AppError::Capacity(format!(
                "{} owns more than {} endpoints",
                self.name, MAX_FUNC_EP_NUM
            ))
        })
    }

    fn info(&self, slot: usize) -> FunctionInfo {
        FunctionInfo {
            slot,
            name: self.name.clone(),
            dev_class: self.dev_class,
            active: self.active,
            loaded: self.loaded,
            interfaces: self.intf.to_vec(),
            endpoints: self.ep.to_vec(),
        }
    }
}

impl fmt::Debug for FunctionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionSlot")
            .field("name", &self.name)
            .field("dev_class", &self.dev_class)
            .field("fragment_len", &self.fragment.class_block.len())
            .field("active", &self.active)
            .field("loaded", &self.loaded)
            .field("intf", &self.intf)
            .field("ep", &self.ep)
            .finish()
    }
}

/// Fixed-capacity function table
///
/// Slots stay allocated after release so a function that comes back keeps
/// its position in composition order.
#[derive(Clone, Debug)]
pub struct FunctionRegistry {
    slots: Vec<Option<FunctionSlot>>,
}

impl FunctionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.as_ref().is_some_and(|s| s.name == name))
    }

    /// Register (or refresh) a function
    ///
    /// Returns the slot index. Nothing is modified on error.
    pub fn register(
        &mut self,
        name: &str,
        dev_class: u8,
        fragment: ParsedFragment,
        handler: Arc<dyn CompositeFunction>,
    ) -> Result<usize> {
        if name.is_empty() || name.len() > MAX_FUNC_NAME_LEN {
            return Err(AppError::Range(format!(
                "function name must be 1..={} bytes: {:?}",
                MAX_FUNC_NAME_LEN, name
            )));
        }
        if fragment.num_interfaces as usize > MAX_FUNC_INTF_NUM {
            return Err(AppError::Capacity(format!(
                "{} declares {} interfaces, at most {} supported",
                name, fragment.num_interfaces, MAX_FUNC_INTF_NUM
            )));
        }

        let index = match self.find(name) {
            Some(index) => {
                if self.slots[index].as_ref().is_some_and(|s| s.loaded) {
                    return Err(AppError::Duplicate(name.to_string()));
                }
                debug!("Refreshing registration of {} in slot {}", name, index);
                index
            }
            None => self
                .slots
                .iter()
                .position(|s| s.is_none())
                .ok_or_else(|| {
                    AppError::Capacity(format!(
                        "no free slot for {}: all {} slots in use",
                        name,
                        self.slots.len()
                    ))
                })?,
        };

        self.slots[index] = Some(FunctionSlot {
            name: name.to_string(),
            dev_class,
            fragment,
            handler,
            active: true,
            loaded: false,
            intf: heapless::Vec::new(),
            ep: heapless::Vec::new(),
        });
        info!("Registered function {} in slot {}", name, index);
        Ok(index)
    }

    /// Return a function to "registered but inactive"
    ///
    /// Returns whether the function was active before the call.
    pub fn release(&mut self, name: &str) -> Result<bool> {
        let index = self
            .find(name)
            .ok_or_else(|| AppError::NotFound(format!("function {}", name)))?;
        let Some(slot) = self.slots[index].as_mut() else {
            return Ok(false);
        };

        let was_active = slot.active;
        slot.active = false;
        slot.loaded = false;
        slot.clear_assignment();
        if was_active {
            info!("Released function {} from slot {}", name, index);
        }
        Ok(was_active)
    }

    pub fn slot(&self, index: usize) -> Option<&FunctionSlot> {
        self.slots.get(index).and_then(|s| s.as_ref())
    }

    pub fn get(&self, name: &str) -> Option<&FunctionSlot> {
        self.find(name).and_then(|i| self.slot(i))
    }

    /// Occupied slots in slot order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &FunctionSlot)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut FunctionSlot)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|s| (i, s)))
    }

    /// Loaded functions in slot order
    pub fn loaded(&self) -> impl Iterator<Item = (usize, &FunctionSlot)> {
        self.iter().filter(|(_, s)| s.loaded)
    }

    /// Number of loaded functions (`dev_num`)
    pub fn loaded_count(&self) -> usize {
        self.loaded().count()
    }

    /// Drop every assignment and loaded flag before a fresh composition
    pub(crate) fn reset_assignments(&mut self) {
        for (_, slot) in self.iter_mut() {
            slot.loaded = false;
            slot.clear_assignment();
        }
    }

    pub fn snapshot(&self) -> Vec<FunctionInfo> {
        self.iter().map(|(i, s)| s.info(i)).collect()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new(MAX_COMPOSITE_DEV)
    }
}
