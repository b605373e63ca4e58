//! Demo function modules
//!
//! Each module carries the standalone descriptor set it would present as a
//! single-function device. The CLI and tests register these to exercise
//! composition without real class drivers behind them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::descriptor::{
    CLASS_AUDIO, CLASS_CDC, CLASS_HID, CLASS_MASS_STORAGE, CLASS_VENDOR, CLASS_VIDEO,
};
use super::function::{CompositeFunction, UsbEvent};
use crate::error::Result;

/// Mass storage, bulk-only: 1 interface, bulk OUT/IN pair
#[rustfmt::skip]
pub const MSC_DESCRIPTOR: &[u8] = &[
    0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0xc3, 0x33, 0x10, 0x0e, 0x00, 0x01, 0x01, 0x02, 0x03, 0x01,
    0x09, 0x02, 0x20, 0x00, 0x01, 0x01, 0x00, 0x80, 0x32,
    0x09, 0x04, 0x00, 0x00, 0x02, 0x08, 0x06, 0x50, 0x04,
    0x07, 0x05, 0x01, 0x02, 0x00, 0x02, 0x00,
    0x07, 0x05, 0x81, 0x02, 0x00, 0x02, 0x00,
];

/// USB audio 1.0 speaker: control interface plus streaming interface with
/// an isochronous OUT endpoint on alternate setting 1
#[rustfmt::skip]
pub const UAC_DESCRIPTOR: &[u8] = &[
    0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0xc3, 0x33, 0x11, 0x0e, 0x00, 0x01, 0x01, 0x02, 0x03, 0x01,
    0x09, 0x02, 0x64, 0x00, 0x02, 0x01, 0x00, 0x80, 0x32,
    // audio control
    0x09, 0x04, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00,
    0x09, 0x24, 0x01, 0x00, 0x01, 0x1e, 0x00, 0x01, 0x01,
    0x0c, 0x24, 0x02, 0x01, 0x01, 0x01, 0x00, 0x02, 0x03, 0x00, 0x00, 0x00,
    0x09, 0x24, 0x03, 0x02, 0x01, 0x03, 0x00, 0x01, 0x00,
    // audio streaming, zero bandwidth
    0x09, 0x04, 0x01, 0x00, 0x00, 0x01, 0x02, 0x00, 0x00,
    // audio streaming, operational
    0x09, 0x04, 0x01, 0x01, 0x01, 0x01, 0x02, 0x00, 0x00,
    0x07, 0x24, 0x01, 0x01, 0x01, 0x01, 0x00,
    0x0b, 0x24, 0x02, 0x01, 0x02, 0x02, 0x10, 0x01, 0x80, 0xbb, 0x00,
    0x09, 0x05, 0x03, 0x09, 0xc0, 0x00, 0x01, 0x00, 0x00,
    0x07, 0x25, 0x01, 0x00, 0x00, 0x00, 0x00,
];

/// HID touch panel: 1 interface, interrupt IN
#[rustfmt::skip]
pub const TOUCH_DESCRIPTOR: &[u8] = &[
    0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0xc3, 0x33, 0x12, 0x0e, 0x00, 0x01, 0x01, 0x02, 0x03, 0x01,
    0x09, 0x02, 0x22, 0x00, 0x01, 0x01, 0x00, 0x80, 0x32,
    0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x00, 0x00, 0x00,
    0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3c, 0x00,
    0x07, 0x05, 0x81, 0x03, 0x08, 0x00, 0x0a,
];

/// USB video camera: IAD, video control with header/terminals, video
/// streaming with one MJPEG format and an isochronous IN endpoint
#[rustfmt::skip]
pub const UVC_DESCRIPTOR: &[u8] = &[
    0x12, 0x01, 0x00, 0x02, 0xef, 0x02, 0x01, 0x40, 0xc3, 0x33, 0x13, 0x0e, 0x00, 0x01, 0x01, 0x02, 0x03, 0x01,
    0x09, 0x02, 0x92, 0x00, 0x02, 0x01, 0x00, 0x80, 0x32,
    0x08, 0x0b, 0x00, 0x02, 0x0e, 0x03, 0x00, 0x00,
    // video control
    0x09, 0x04, 0x00, 0x00, 0x00, 0x0e, 0x01, 0x00, 0x00,
    0x0d, 0x24, 0x01, 0x00, 0x01, 0x28, 0x00, 0x80, 0x8d, 0x5b, 0x00, 0x01, 0x01,
    0x12, 0x24, 0x02, 0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x00, 0x00,
    0x09, 0x24, 0x03, 0x02, 0x01, 0x01, 0x00, 0x01, 0x00,
    // video streaming, zero bandwidth
    0x09, 0x04, 0x01, 0x00, 0x00, 0x0e, 0x02, 0x00, 0x00,
    0x0e, 0x24, 0x01, 0x01, 0x37, 0x00, 0x81, 0x00, 0x02, 0x00, 0x00, 0x00, 0x01, 0x00,
    0x0b, 0x24, 0x06, 0x01, 0x01, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00,
    0x1e, 0x24, 0x07, 0x01, 0x00, 0x80, 0x02, 0xe0, 0x01, 0x00, 0x00, 0x77, 0x01, 0x00, 0x00, 0xca, 0x08,
    0x00, 0x60, 0x09, 0x00, 0x15, 0x16, 0x05, 0x00, 0x01, 0x15, 0x16, 0x05, 0x00,
    // video streaming, operational
    0x09, 0x04, 0x01, 0x01, 0x01, 0x0e, 0x02, 0x00, 0x00,
    0x07, 0x05, 0x81, 0x05, 0x00, 0x04, 0x01,
];

/// Vendor-specific display link: 1 interface, bulk OUT/IN pair
#[rustfmt::skip]
pub const VENDOR_DESCRIPTOR: &[u8] = &[
    0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, 0x40, 0xc3, 0x33, 0x14, 0x0e, 0x00, 0x01, 0x01, 0x02, 0x03, 0x01,
    0x09, 0x02, 0x20, 0x00, 0x01, 0x01, 0x00, 0x80, 0x32,
    0x09, 0x04, 0x00, 0x00, 0x02, 0xff, 0x00, 0x00, 0x00,
    0x07, 0x05, 0x01, 0x02, 0x00, 0x02, 0x00,
    0x07, 0x05, 0x81, 0x02, 0x00, 0x02, 0x00,
];

/// CDC-ACM serial port: IAD, communication interface with notification
/// endpoint, data interface with bulk pair
#[rustfmt::skip]
pub const CDC_ACM_DESCRIPTOR: &[u8] = &[
    0x12, 0x01, 0x00, 0x02, 0xef, 0x02, 0x01, 0x40, 0xc3, 0x33, 0x15, 0x0e, 0x00, 0x01, 0x01, 0x02, 0x03, 0x01,
    0x09, 0x02, 0x4b, 0x00, 0x02, 0x01, 0x00, 0x80, 0x32,
    0x08, 0x0b, 0x00, 0x02, 0x02, 0x02, 0x01, 0x00,
    0x09, 0x04, 0x00, 0x00, 0x01, 0x02, 0x02, 0x01, 0x00,
    0x05, 0x24, 0x00, 0x10, 0x01,
    0x05, 0x24, 0x01, 0x00, 0x01,
    0x04, 0x24, 0x02, 0x02,
    0x05, 0x24, 0x06, 0x00, 0x01,
    0x07, 0x05, 0x83, 0x03, 0x08, 0x00, 0x10,
    0x09, 0x04, 0x01, 0x00, 0x02, 0x0a, 0x00, 0x00, 0x00,
    0x07, 0x05, 0x02, 0x02, 0x00, 0x02, 0x00,
    0x07, 0x05, 0x82, 0x02, 0x00, 0x02, 0x00,
];

/// A demo module definition
#[derive(Debug, Clone, Copy)]
pub struct DemoModule {
    pub name: &'static str,
    pub dev_class: u8,
    pub descriptor: &'static [u8],
}

impl DemoModule {
    pub fn blob(&self) -> Bytes {
        Bytes::from_static(self.descriptor)
    }
}

pub const DEMO_MODULES: &[DemoModule] = &[
    DemoModule {
        name: "disp",
        dev_class: CLASS_VENDOR,
        descriptor: VENDOR_DESCRIPTOR,
    },
    DemoModule {
        name: "msc",
        dev_class: CLASS_MASS_STORAGE,
        descriptor: MSC_DESCRIPTOR,
    },
    DemoModule {
        name: "uac",
        dev_class: CLASS_AUDIO,
        descriptor: UAC_DESCRIPTOR,
    },
    DemoModule {
        name: "touch",
        dev_class: CLASS_HID,
        descriptor: TOUCH_DESCRIPTOR,
    },
    DemoModule {
        name: "uvc",
        dev_class: CLASS_VIDEO,
        descriptor: UVC_DESCRIPTOR,
    },
    DemoModule {
        name: "cdc_acm",
        dev_class: CLASS_CDC,
        descriptor: CDC_ACM_DESCRIPTOR,
    },
];

pub fn lookup(name: &str) -> Option<&'static DemoModule> {
    DEMO_MODULES.iter().find(|m| m.name == name)
}

/// Function handler that stores its endpoints and logs bus events
#[derive(Debug)]
pub struct DemoFunction {
    name: String,
    endpoints: Mutex<Vec<u8>>,
    events: Mutex<Vec<UsbEvent>>,
    ready: AtomicBool,
}

impl DemoFunction {
    pub fn new(name: &str) -> Arc<Self> {
        Self::with_ready(name, true)
    }

    /// A function whose backing resource may not be available yet
    pub fn with_ready(name: &str, ready: bool) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            endpoints: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            ready: AtomicBool::new(ready),
        })
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Endpoints handed over by the last `init`
    pub fn endpoints(&self) -> Vec<u8> {
        self.endpoints.lock().clone()
    }

    pub fn events(&self) -> Vec<UsbEvent> {
        self.events.lock().clone()
    }
}

impl CompositeFunction for DemoFunction {
    fn init(&self, endpoints: &[u8]) -> Result<()> {
        info!("{}: endpoints {:02x?}", self.name, endpoints);
        *self.endpoints.lock() = endpoints.to_vec();
        Ok(())
    }

    fn on_event(&self, event: UsbEvent) {
        debug!("{}: bus event {:?}", self.name, event);
        self.events.lock().push(event);
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}
