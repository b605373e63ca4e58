//! Compositor event types

use serde::{Deserialize, Serialize};

/// Compositor event, serialized as
///
/// ```json
/// {
///   "event": "device.loaded",
///   "data": { "functions": 2, "interfaces": 3, "total_length": 225 }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum CompositeEvent {
    /// A function module registered (or refreshed) its slot
    #[serde(rename = "function.registered")]
    FunctionRegistered { name: String, slot: usize },

    /// A function module released its slot
    #[serde(rename = "function.released")]
    FunctionReleased { name: String },

    /// An enumeration table became active
    #[serde(rename = "preset.selected")]
    PresetSelected {
        index: usize,
        name: String,
        functions: Vec<String>,
    },

    /// The composite descriptor was handed to the USB stack
    #[serde(rename = "device.loaded")]
    DeviceLoaded {
        functions: usize,
        interfaces: u8,
        total_length: u16,
    },

    /// The USB stack was torn down
    #[serde(rename = "device.unloaded")]
    DeviceUnloaded { functions: usize },

    /// A recomposition failed and the previous device was restored
    #[serde(rename = "composition.failed")]
    CompositionFailed {
        operation: String,
        code: String,
        message: String,
    },
}

impl CompositeEvent {
    /// Get the event name (for filtering/routing)
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::FunctionRegistered { .. } => "function.registered",
            Self::FunctionReleased { .. } => "function.released",
            Self::PresetSelected { .. } => "preset.selected",
            Self::DeviceLoaded { .. } => "device.loaded",
            Self::DeviceUnloaded { .. } => "device.unloaded",
            Self::CompositionFailed { .. } => "composition.failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialization_shape() {
        let event = CompositeEvent::DeviceLoaded {
            functions: 2,
            interfaces: 3,
            total_length: 225,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "device.loaded");
        assert_eq!(json["data"]["interfaces"], 3);
        assert_eq!(event.event_name(), "device.loaded");
    }

    #[test]
    fn test_failure_carries_code() {
        let event = CompositeEvent::CompositionFailed {
            operation: "select_table".to_string(),
            code: "capacity".to_string(),
            message: "Capacity exceeded: endpoints".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "composition.failed");
        assert_eq!(json["data"]["code"], "capacity");
    }
}
