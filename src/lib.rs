//! usb-composite - USB composite-device descriptor compositor
//!
//! Lets independently written USB function modules register at runtime
//! and merges them into a single device/configuration descriptor set with
//! collision-free interface numbers and endpoint addresses.

pub mod composite;
pub mod config;
pub mod error;
pub mod events;
pub mod utils;

pub use error::{AppError, Result};
