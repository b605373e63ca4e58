//! Configuration schema and file-backed store

mod schema;
mod store;

pub use schema::{AppConfig, CompositorConfig, DeviceConfig, StackConfig};
pub use store::ConfigStore;
