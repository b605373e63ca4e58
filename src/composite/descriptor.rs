//! Zero-copy USB descriptor walking
//!
//! A descriptor blob is a flat sequence of `[bLength, bDescriptorType, ..]`
//! records. `DescriptorCursor` walks it without copying and the typed views
//! below give named access to the handful of fields composition reads or
//! patches. Views wrap any `AsRef<[u8]>`, and gain setters when the buffer
//! is `AsMut<[u8]>`.

use bytes::Bytes;

use crate::error::{AppError, Result};

pub const DESC_TYPE_DEVICE: u8 = 0x01;
pub const DESC_TYPE_CONFIGURATION: u8 = 0x02;
pub const DESC_TYPE_STRING: u8 = 0x03;
pub const DESC_TYPE_INTERFACE: u8 = 0x04;
pub const DESC_TYPE_ENDPOINT: u8 = 0x05;
pub const DESC_TYPE_DEVICE_QUALIFIER: u8 = 0x06;
pub const DESC_TYPE_OTHER_SPEED: u8 = 0x07;
pub const DESC_TYPE_INTERFACE_ASSOCIATION: u8 = 0x0b;
pub const DESC_TYPE_CS_INTERFACE: u8 = 0x24;

pub const DEVICE_DESC_LEN: usize = 18;
pub const CONFIG_DESC_LEN: usize = 9;
pub const INTERFACE_DESC_LEN: usize = 9;
pub const ENDPOINT_DESC_LEN: usize = 7;
pub const IAD_LEN: usize = 8;

pub const CLASS_AUDIO: u8 = 0x01;
pub const CLASS_CDC: u8 = 0x02;
pub const CLASS_HID: u8 = 0x03;
pub const CLASS_MASS_STORAGE: u8 = 0x08;
pub const CLASS_VIDEO: u8 = 0x0e;
pub const CLASS_VENDOR: u8 = 0xff;

pub const VIDEO_SC_VIDEOCONTROL: u8 = 0x01;
pub const VIDEO_VC_HEADER: u8 = 0x01;

/// One descriptor found by the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDescriptor<'a> {
    /// Offset of `bLength` within the walked buffer
    pub offset: usize,
    /// `bDescriptorType`
    pub kind: u8,
    /// The whole descriptor, `bLength` bytes
    pub bytes: &'a [u8],
}

impl RawDescriptor<'_> {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte range of this descriptor within the walked buffer
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.bytes.len()
    }
}

/// Iterator over `(type, bytes)` records of a descriptor blob
///
/// Yields `Err(AppError::Range)` once and then stops if a record has a
/// `bLength` below 2 or runs past the end of the buffer. A zero `bLength`
/// at a record boundary is treated as trailing padding and ends the walk.
pub struct DescriptorCursor<'a> {
    buf: &'a [u8],
    pos: usize,
    failed: bool,
}

impl<'a> DescriptorCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            pos: 0,
            failed: false,
        }
    }

    /// First descriptor of the given type
    pub fn find(buf: &'a [u8], kind: u8) -> Result<Option<RawDescriptor<'a>>> {
        for desc in Self::new(buf) {
            let desc = desc?;
            if desc.kind == kind {
                return Ok(Some(desc));
            }
        }
        Ok(None)
    }

    /// Collect every record, failing on the first malformed one
    pub fn collect_all(buf: &'a [u8]) -> Result<Vec<RawDescriptor<'a>>> {
        Self::new(buf).collect()
    }
}

impl<'a> Iterator for DescriptorCursor<'a> {
    type Item = Result<RawDescriptor<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.pos >= self.buf.len() {
            return None;
        }

        let offset = self.pos;
        let len = self.buf[offset] as usize;
        if len == 0 {
            self.pos = self.buf.len();
            return None;
        }
        if len < 2 || offset + len > self.buf.len() {
            self.failed = true;
            return Some(Err(AppError::Range(format!(
                "descriptor at offset {} has bLength {} but only {} bytes remain",
                offset,
                len,
                self.buf.len() - offset
            ))));
        }

        self.pos += len;
        Some(Ok(RawDescriptor {
            offset,
            kind: self.buf[offset + 1],
            bytes: &self.buf[offset..offset + len],
        }))
    }
}

fn check_len(bytes: &[u8], kind: u8, min: usize, what: &str) -> Result<()> {
    if bytes.len() < min || bytes[0] as usize != bytes.len() || bytes[1] != kind {
        return Err(AppError::Range(format!(
            "malformed {} descriptor ({} bytes, type {:#04x})",
            what,
            bytes.len(),
            bytes.get(1).copied().unwrap_or(0)
        )));
    }
    Ok(())
}

macro_rules! descriptor_view {
    ($(#[$meta:meta])* $name:ident, $kind:expr, $min:expr, $what:expr) => {
        $(#[$meta])*
        #[derive(Debug)]
        pub struct $name<B>(B);

        impl<B: AsRef<[u8]>> $name<B> {
            /// Wrap a single descriptor, validating its header
            pub fn new(bytes: B) -> Result<Self> {
                check_len(bytes.as_ref(), $kind, $min, $what)?;
                Ok(Self(bytes))
            }

            pub fn as_bytes(&self) -> &[u8] {
                self.0.as_ref()
            }
        }
    };
}

descriptor_view!(
    /// Device descriptor (18 bytes)
    DeviceView,
    DESC_TYPE_DEVICE,
    DEVICE_DESC_LEN,
    "device"
);

impl<B: AsRef<[u8]>> DeviceView<B> {
    pub fn vendor_id(&self) -> u16 {
        let b = self.0.as_ref();
        u16::from_le_bytes([b[8], b[9]])
    }

    pub fn product_id(&self) -> u16 {
        let b = self.0.as_ref();
        u16::from_le_bytes([b[10], b[11]])
    }
}

impl<B: AsMut<[u8]>> DeviceView<B> {
    pub fn set_vendor_id(&mut self, vid: u16) {
        self.0.as_mut()[8..10].copy_from_slice(&vid.to_le_bytes());
    }

    pub fn set_product_id(&mut self, pid: u16) {
        self.0.as_mut()[10..12].copy_from_slice(&pid.to_le_bytes());
    }
}

descriptor_view!(
    /// Configuration descriptor header (9 bytes)
    ConfigView,
    DESC_TYPE_CONFIGURATION,
    CONFIG_DESC_LEN,
    "configuration"
);

impl<B: AsRef<[u8]>> ConfigView<B> {
    pub fn total_length(&self) -> u16 {
        let b = self.0.as_ref();
        u16::from_le_bytes([b[2], b[3]])
    }

    pub fn num_interfaces(&self) -> u8 {
        self.0.as_ref()[4]
    }
}

impl<B: AsMut<[u8]>> ConfigView<B> {
    pub fn set_total_length(&mut self, len: u16) {
        self.0.as_mut()[2..4].copy_from_slice(&len.to_le_bytes());
    }

    pub fn set_num_interfaces(&mut self, n: u8) {
        self.0.as_mut()[4] = n;
    }
}

descriptor_view!(
    /// Interface descriptor (9 bytes)
    InterfaceView,
    DESC_TYPE_INTERFACE,
    INTERFACE_DESC_LEN,
    "interface"
);

impl<B: AsRef<[u8]>> InterfaceView<B> {
    pub fn number(&self) -> u8 {
        self.0.as_ref()[2]
    }

    pub fn alternate_setting(&self) -> u8 {
        self.0.as_ref()[3]
    }

    pub fn num_endpoints(&self) -> u8 {
        self.0.as_ref()[4]
    }

    pub fn class(&self) -> u8 {
        self.0.as_ref()[5]
    }

    pub fn subclass(&self) -> u8 {
        self.0.as_ref()[6]
    }

    pub fn string_index(&self) -> u8 {
        self.0.as_ref()[8]
    }
}

impl<B: AsMut<[u8]>> InterfaceView<B> {
    pub fn set_number(&mut self, n: u8) {
        self.0.as_mut()[2] = n;
    }

    pub fn set_string_index(&mut self, idx: u8) {
        self.0.as_mut()[8] = idx;
    }
}

descriptor_view!(
    /// Endpoint descriptor (7 bytes, 9 for audio endpoints)
    EndpointView,
    DESC_TYPE_ENDPOINT,
    ENDPOINT_DESC_LEN,
    "endpoint"
);

impl<B: AsRef<[u8]>> EndpointView<B> {
    pub fn address(&self) -> u8 {
        self.0.as_ref()[2]
    }

    /// Endpoint number without the direction bit
    pub fn logical_number(&self) -> u8 {
        self.address() & 0x0f
    }
}

impl<B: AsMut<[u8]>> EndpointView<B> {
    pub fn set_address(&mut self, addr: u8) {
        self.0.as_mut()[2] = addr;
    }
}

descriptor_view!(
    /// Interface Association Descriptor (8 bytes)
    IadView,
    DESC_TYPE_INTERFACE_ASSOCIATION,
    IAD_LEN,
    "interface association"
);

impl<B: AsRef<[u8]>> IadView<B> {
    pub fn first_interface(&self) -> u8 {
        self.0.as_ref()[2]
    }

    pub fn interface_count(&self) -> u8 {
        self.0.as_ref()[3]
    }
}

impl<B: AsMut<[u8]>> IadView<B> {
    pub fn set_first_interface(&mut self, n: u8) {
        self.0.as_mut()[2] = n;
    }
}

descriptor_view!(
    /// Class-specific interface descriptor (`CS_INTERFACE`)
    ClassSpecificView,
    DESC_TYPE_CS_INTERFACE,
    3,
    "class-specific interface"
);

impl<B: AsRef<[u8]>> ClassSpecificView<B> {
    pub fn subtype(&self) -> u8 {
        self.0.as_ref()[2]
    }

    pub fn last_byte(&self) -> u8 {
        let b = self.0.as_ref();
        b[b.len() - 1]
    }
}

impl<B: AsMut<[u8]>> ClassSpecificView<B> {
    pub fn set_last_byte(&mut self, value: u8) {
        let b = self.0.as_mut();
        let last = b.len() - 1;
        b[last] = value;
    }
}

/// The part of a function module's standalone descriptor set that the
/// compositor splices into the composite configuration
#[derive(Debug, Clone)]
pub struct ParsedFragment {
    /// Interface, class-specific and endpoint descriptors following the
    /// function's own configuration header
    pub class_block: Bytes,
    /// `bNumInterfaces` of the function's configuration
    pub num_interfaces: u8,
    /// `bInterfaceClass` of the first interface, 0 for stubs
    pub interface_class: u8,
}

impl ParsedFragment {
    /// Registration without descriptor bytes
    pub fn stub() -> Self {
        Self {
            class_block: Bytes::new(),
            num_interfaces: 0,
            interface_class: 0,
        }
    }

    pub fn is_stub(&self) -> bool {
        self.num_interfaces == 0 || self.class_block.is_empty()
    }
}

/// Split a function's standalone descriptor blob into its class block
///
/// The blob must carry a configuration descriptor; the class block is
/// everything after that header up to its `wTotalLength`. The returned
/// `Bytes` is a slice of `blob`, nothing is copied.
pub fn parse_fragment(function: &str, blob: &Bytes) -> Result<ParsedFragment> {
    let parse_err = |reason: &str| AppError::FragmentParse {
        function: function.to_string(),
        reason: reason.to_string(),
    };

    let config = DescriptorCursor::find(blob, DESC_TYPE_CONFIGURATION)?
        .ok_or_else(|| parse_err("no configuration descriptor"))?;
    let header = ConfigView::new(config.bytes)?;

    let start = config.offset + CONFIG_DESC_LEN;
    let end = config.offset + header.total_length() as usize;
    if end < start || end > blob.len() {
        return Err(AppError::Range(format!(
            "{}: wTotalLength {} exceeds the {} byte blob",
            function,
            header.total_length(),
            blob.len() - config.offset
        )));
    }

    if header.num_interfaces() == 0 {
        return Ok(ParsedFragment::stub());
    }

    let class_block = blob.slice(start..end);
    let interface = DescriptorCursor::find(&class_block, DESC_TYPE_INTERFACE)?
        .ok_or_else(|| parse_err("no interface descriptor"))?;
    let interface_class = InterfaceView::new(interface.bytes)?.class();

    Ok(ParsedFragment {
        interface_class,
        num_interfaces: header.num_interfaces(),
        class_block,
    })
}
