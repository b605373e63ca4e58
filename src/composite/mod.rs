//! USB composite-device compositor
//!
//! Function modules register their standalone descriptor sets; the
//! compositor merges every participating function into one device with
//! renumbered interfaces and endpoints and hands it to a USB stack.
//!
//! Architecture:
//! ```text
//!   function modules ──register/release──▶ CompositeService
//!                                              │  (one mutex)
//!                        ┌─────────────────────┼─────────────────┐
//!                        ▼                     ▼                 ▼
//!                FunctionRegistry       PresetSelector     UsbDeviceStack
//!                        └──────▶ compose() ◀──┘                 ▲
//!                                    │                           │
//!                                    └── CompositeDescriptorSet ─┘
//! ```

pub mod allocator;
pub mod compositor;
pub mod demo;
pub mod descriptor;
pub mod function;
pub mod gadget_fs;
pub mod preset;
pub mod registry;
pub mod service;
pub mod stack;
pub mod templates;

pub use allocator::{EndpointAllocator, InterfaceAllocator};
pub use compositor::{compose, CompositeDescriptorSet, FunctionDesc};
pub use descriptor::{parse_fragment, DescriptorCursor, ParsedFragment};
pub use function::{CompositeFunction, FunctionInfo, UsbEvent};
pub use gadget_fs::FileStack;
pub use preset::{Preset, PresetSelector, PRESETS};
pub use registry::{FunctionRegistry, FunctionSlot};
pub use service::{CompositeService, CompositeStatus, CompositorContext, LifecycleState};
pub use stack::{EndpointHandle, InterfaceHandle, MemoryStack, UsbDeviceStack};
