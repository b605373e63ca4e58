use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Host-visible device identity
    pub device: DeviceConfig,
    /// Compositor limits and lifecycle tuning
    pub compositor: CompositorConfig,
    /// Output settings for the file-backed USB stack
    pub stack: StackConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            compositor: CompositorConfig::default(),
            stack: StackConfig::default(),
        }
    }
}

/// USB device descriptor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// Base USB Product ID (bumped by one for multi-function builds)
    pub product_id: u16,
    /// bcdDevice
    pub device_version: u16,
    /// Manufacturer string
    pub manufacturer: String,
    /// Product string
    pub product: String,
    /// Serial number string
    pub serial_number: String,
    /// bMaxPower in milliamps
    pub max_power_ma: u16,
    /// Append the device-qualifier descriptor (high-speed capable controller)
    pub high_speed: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: 0x33c3,
            product_id: 0x0e01,
            device_version: 0x0200,
            manufacturer: "UsbComposite".to_string(),
            product: "UsbComposite USB Device".to_string(),
            serial_number: "2024123456".to_string(),
            max_power_ma: 100,
            high_speed: true,
        }
    }
}

/// Compositor limits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompositorConfig {
    /// Number of registry slots
    pub max_functions: usize,
    /// Highest logical endpoint number the controller offers
    pub max_endpoints: u8,
    /// Size of the composite output buffer
    pub max_descriptor_len: usize,
    /// Detection task poll interval
    pub detection_interval_ms: u64,
    /// Enumeration table selected at startup (0 = none, every function participates)
    pub default_table: usize,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            max_functions: 8,
            max_endpoints: 15,
            max_descriptor_len: 1024,
            detection_interval_ms: 400,
            default_table: 0,
        }
    }
}

/// File-backed stack configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StackConfig {
    /// Directory the descriptor blob and manifest are published into
    pub output_dir: String,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            output_dir: "/run/usb-composite".to_string(),
        }
    }
}

impl AppConfig {
    /// Reject values the compositor cannot honor
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::AppError;

        if self.compositor.max_functions == 0 {
            return Err(AppError::Config(
                "compositor.max_functions must be at least 1".to_string(),
            ));
        }
        if self.compositor.max_endpoints == 0 || self.compositor.max_endpoints > 15 {
            return Err(AppError::Config(format!(
                "compositor.max_endpoints must be within 1..=15, got {}",
                self.compositor.max_endpoints
            )));
        }
        if self.compositor.max_descriptor_len < 64 {
            return Err(AppError::Config(format!(
                "compositor.max_descriptor_len too small: {}",
                self.compositor.max_descriptor_len
            )));
        }
        if self.compositor.detection_interval_ms == 0 {
            return Err(AppError::Config(
                "compositor.detection_interval_ms must be non-zero".to_string(),
            ));
        }
        for (field, value) in [
            ("manufacturer", &self.device.manufacturer),
            ("product", &self.device.product),
            ("serial_number", &self.device.serial_number),
        ] {
            // bLength is one byte: 2 header bytes + 2 bytes per UTF-16 unit
            if 2 + value.encode_utf16().count() * 2 > u8::MAX as usize {
                return Err(AppError::Config(format!("device.{} is too long", field)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [device]
            vendor_id = 0x1234

            [compositor]
            default_table = 2
            "#,
        )
        .unwrap();
        assert_eq!(config.device.vendor_id, 0x1234);
        assert_eq!(config.device.product_id, 0x0e01);
        assert_eq!(config.compositor.default_table, 2);
        assert_eq!(config.compositor.detection_interval_ms, 400);
    }

    #[test]
    fn test_validate_rejects_bad_endpoints() {
        let mut config = AppConfig::default();
        config.compositor.max_endpoints = 16;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_long_strings() {
        let mut config = AppConfig::default();
        config.device.product = "x".repeat(200);
        assert!(config.validate().is_err());
    }
}
