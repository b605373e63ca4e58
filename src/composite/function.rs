//! Composite function capability trait

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// USB bus events forwarded to every loaded function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsbEvent {
    Reset,
    Connected,
    Disconnected,
    Suspend,
    Resume,
    Configured,
}

/// A USB function module that can take part in a composite device
///
/// Implemented by class drivers (mass storage, audio, HID, ...). The
/// registry keeps an `Arc<dyn CompositeFunction>` per slot.
pub trait CompositeFunction: Send + Sync {
    /// Called once the composite device is about to be initialized, with the
    /// final endpoint addresses of this function in descriptor order.
    fn init(&self, endpoints: &[u8]) -> Result<()>;

    /// Bus event notification
    fn on_event(&self, _event: UsbEvent) {}

    /// Whether the function's backing resource is available yet
    ///
    /// The lifecycle controller will not present the device while a loaded
    /// function reports `false`; the detection task retries later.
    fn is_ready(&self) -> bool {
        true
    }
}

/// Function metadata, as shown by the admin listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    /// Registry slot
    pub slot: usize,
    /// Function name (e.g., "msc", "uac")
    pub name: String,
    /// USB class code
    pub dev_class: u8,
    /// Module holds a registration
    pub active: bool,
    /// Contributing to the current composite descriptor
    pub loaded: bool,
    /// Assigned interface numbers
    pub interfaces: Vec<u8>,
    /// Assigned endpoint addresses
    pub endpoints: Vec<u8>,
}
