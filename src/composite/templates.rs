//! Fixed descriptor templates shared by every composite build
//!
//! Device and configuration headers are patched during composition; the
//! string table and qualifier are appended verbatim.

use super::descriptor::{
    CONFIG_DESC_LEN, DESC_TYPE_CONFIGURATION, DESC_TYPE_DEVICE, DESC_TYPE_DEVICE_QUALIFIER,
    DESC_TYPE_OTHER_SPEED, DESC_TYPE_STRING,
};
use crate::config::DeviceConfig;

/// USB spec version (USB 2.0)
pub const USB_BCD_USB: u16 = 0x0200;

/// English (United States)
pub const LANGID_EN_US: u16 = 0x0409;

pub const EP0_MAX_PACKET_SIZE: u8 = 0x40;

/// bmAttributes: reserved bit set, bus powered
pub const CONFIG_ATTR_BUS_POWERED: u8 = 0x80;

pub const STRING_INDEX_MANUFACTURER: u8 = 1;
pub const STRING_INDEX_PRODUCT: u8 = 2;
pub const STRING_INDEX_SERIAL: u8 = 3;

/// Device descriptor template
///
/// Class/subclass/protocol stay 0: each interface declares its own class.
pub fn device_descriptor(device: &DeviceConfig) -> [u8; 18] {
    let bcd_usb = USB_BCD_USB.to_le_bytes();
    let vid = device.vendor_id.to_le_bytes();
    let pid = device.product_id.to_le_bytes();
    let bcd_device = device.device_version.to_le_bytes();
    [
        18,
        DESC_TYPE_DEVICE,
        bcd_usb[0],
        bcd_usb[1],
        0x00, // bDeviceClass
        0x00, // bDeviceSubClass
        0x00, // bDeviceProtocol
        EP0_MAX_PACKET_SIZE,
        vid[0],
        vid[1],
        pid[0],
        pid[1],
        bcd_device[0],
        bcd_device[1],
        STRING_INDEX_MANUFACTURER,
        STRING_INDEX_PRODUCT,
        STRING_INDEX_SERIAL,
        0x01, // bNumConfigurations
    ]
}

/// bMaxPower is expressed in 2 mA units
fn max_power_units(max_power_ma: u16) -> u8 {
    (max_power_ma / 2).min(u8::MAX as u16) as u8
}

/// Configuration descriptor header template
///
/// `wTotalLength` and `bNumInterfaces` are placeholders until composition
/// patches them.
pub fn config_descriptor(device: &DeviceConfig) -> [u8; CONFIG_DESC_LEN] {
    let total = (CONFIG_DESC_LEN as u16).to_le_bytes();
    [
        CONFIG_DESC_LEN as u8,
        DESC_TYPE_CONFIGURATION,
        total[0],
        total[1],
        0x00, // bNumInterfaces
        0x01, // bConfigurationValue
        0x00, // iConfiguration
        CONFIG_ATTR_BUS_POWERED,
        max_power_units(device.max_power_ma),
    ]
}

/// Encode a string descriptor (UTF-16LE)
pub fn string_descriptor(value: &str) -> Vec<u8> {
    let units: Vec<u16> = value.encode_utf16().collect();
    let len = (2 + units.len() * 2).min(u8::MAX as usize & !1);
    let mut desc = Vec::with_capacity(len);
    desc.push(len as u8);
    desc.push(DESC_TYPE_STRING);
    for unit in units.iter().take((len - 2) / 2) {
        desc.extend_from_slice(&unit.to_le_bytes());
    }
    desc
}

/// String table in fixed order: language ID, manufacturer, product, serial
pub fn string_table(device: &DeviceConfig) -> Vec<u8> {
    let lang = LANGID_EN_US.to_le_bytes();
    let mut table = vec![4, DESC_TYPE_STRING, lang[0], lang[1]];
    table.extend(string_descriptor(&device.manufacturer));
    table.extend(string_descriptor(&device.product));
    table.extend(string_descriptor(&device.serial_number));
    table
}

/// Device qualifier descriptor for high-speed capable builds
pub fn qualifier_descriptor() -> [u8; 10] {
    let bcd_usb = USB_BCD_USB.to_le_bytes();
    [
        10,
        DESC_TYPE_DEVICE_QUALIFIER,
        bcd_usb[0],
        bcd_usb[1],
        0x00,
        0x00,
        0x00,
        EP0_MAX_PACKET_SIZE,
        0x01, // bNumConfigurations
        0x00, // bReserved
    ]
}

/// Other-speed configuration descriptor, only appended for single-function builds
pub fn other_speed_descriptor(device: &DeviceConfig) -> [u8; CONFIG_DESC_LEN] {
    let total = (CONFIG_DESC_LEN as u16).to_le_bytes();
    [
        CONFIG_DESC_LEN as u8,
        DESC_TYPE_OTHER_SPEED,
        total[0],
        total[1],
        0x01,
        0x01,
        0x00,
        CONFIG_ATTR_BUS_POWERED,
        max_power_units(device.max_power_ma),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::descriptor::{DescriptorCursor, DeviceView};

    #[test]
    fn test_device_template_ids() {
        let device = DeviceConfig::default();
        let desc = device_descriptor(&device);
        let view = DeviceView::new(&desc[..]).unwrap();
        assert_eq!(view.vendor_id(), device.vendor_id);
        assert_eq!(view.product_id(), device.product_id);
    }

    #[test]
    fn test_string_descriptor_utf16() {
        let desc = string_descriptor("Ab");
        assert_eq!(desc, vec![6, DESC_TYPE_STRING, b'A', 0, b'b', 0]);
    }

    #[test]
    fn test_string_table_order() {
        let mut device = DeviceConfig::default();
        device.manufacturer = "M".to_string();
        device.product = "P".to_string();
        device.serial_number = "S".to_string();
        let table = string_table(&device);
        let records = DescriptorCursor::collect_all(&table).unwrap();
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].bytes, &[4, DESC_TYPE_STRING, 0x09, 0x04]);
        assert_eq!(records[1].bytes[2], b'M');
        assert_eq!(records[2].bytes[2], b'P');
        assert_eq!(records[3].bytes[2], b'S');
    }

    #[test]
    fn test_max_power_units() {
        let mut device = DeviceConfig::default();
        device.max_power_ma = 500;
        assert_eq!(config_descriptor(&device)[8], 250);
        device.max_power_ma = 1000;
        assert_eq!(config_descriptor(&device)[8], 255);
    }
}
