//! Descriptor compositor
//!
//! Builds one device/configuration descriptor set out of every
//! participating function's fragment. Each pass starts from scratch:
//! interface and endpoint numbers are re-allocated in registry slot order,
//! so composing the same registry state twice yields identical bytes.
//!
//! Output layout:
//! ```text
//! device (18) | config header (9) | function blocks... | strings | [qualifier [other-speed]]
//! ```

use std::ops::Range;

use bytes::Bytes;
use tracing::{debug, warn};

use super::allocator::{EndpointAllocator, InterfaceAllocator};
use super::descriptor::{
    ClassSpecificView, ConfigView, DescriptorCursor, DeviceView, EndpointView, IadView,
    InterfaceView, CLASS_VIDEO, CONFIG_DESC_LEN, DESC_TYPE_CS_INTERFACE, DESC_TYPE_ENDPOINT,
    DESC_TYPE_INTERFACE, DESC_TYPE_INTERFACE_ASSOCIATION, DEVICE_DESC_LEN, VIDEO_SC_VIDEOCONTROL,
    VIDEO_VC_HEADER,
};
use super::preset::PresetSelector;
use super::registry::{FunctionRegistry, FunctionSlot};
use super::templates;
use crate::config::AppConfig;
use crate::error::{AppError, Result};

/// Location of one function's renumbered block inside the composite buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionDesc {
    pub slot: usize,
    pub name: String,
    pub range: Range<usize>,
}

/// The assembled descriptor set handed to the USB stack
#[derive(Debug, Clone)]
pub struct CompositeDescriptorSet {
    bytes: Bytes,
    functions: Vec<FunctionDesc>,
    strings: Range<usize>,
    qualifier: Option<Range<usize>>,
    function_count: usize,
    num_interfaces: u8,
    total_length: u16,
}

impl CompositeDescriptorSet {
    /// The whole buffer
    pub fn as_bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn device_desc(&self) -> &[u8] {
        &self.bytes[..DEVICE_DESC_LEN]
    }

    pub fn config_desc(&self) -> &[u8] {
        &self.bytes[DEVICE_DESC_LEN..DEVICE_DESC_LEN + CONFIG_DESC_LEN]
    }

    /// Renumbered function blocks in composition order
    pub fn function_descs(&self) -> &[FunctionDesc] {
        &self.functions
    }

    /// Renumbered block of the function in `slot`, `None` for unused slots
    pub fn function_desc(&self, slot: usize) -> Option<&[u8]> {
        self.functions
            .iter()
            .find(|f| f.slot == slot)
            .map(|f| &self.bytes[f.range.clone()])
    }

    pub fn string_descs(&self) -> &[u8] {
        &self.bytes[self.strings.clone()]
    }

    pub fn qualifier_desc(&self) -> Option<&[u8]> {
        self.qualifier.clone().map(|r| &self.bytes[r])
    }

    /// Functions that took part in this composition, stubs included
    pub fn function_count(&self) -> usize {
        self.function_count
    }

    pub fn num_interfaces(&self) -> u8 {
        self.num_interfaces
    }

    pub fn total_length(&self) -> u16 {
        self.total_length
    }
}

/// Compose the descriptor set for the current registry and table
///
/// Marks participating slots as loaded and records their interface and
/// endpoint assignments. On error every assignment is cleared again.
pub fn compose(
    registry: &mut FunctionRegistry,
    selector: &PresetSelector,
    config: &AppConfig,
) -> Result<CompositeDescriptorSet> {
    let result = compose_inner(registry, selector, config);
    if result.is_err() {
        registry.reset_assignments();
    }
    result
}

fn compose_inner(
    registry: &mut FunctionRegistry,
    selector: &PresetSelector,
    config: &AppConfig,
) -> Result<CompositeDescriptorSet> {
    let device = &config.device;
    let mut intf_alloc = InterfaceAllocator::new();
    let mut ep_alloc = EndpointAllocator::new(config.compositor.max_endpoints);

    registry.reset_assignments();
    for (_, slot) in registry.iter_mut() {
        if slot.is_active() && selector.admits(slot.name()) {
            slot.set_loaded(true);
        }
    }
    let dev_num = registry.loaded_count();

    let strings = templates::string_table(device);
    let mut tail = Vec::new();
    if device.high_speed {
        tail.extend_from_slice(&templates::qualifier_descriptor());
        if dev_num <= 1 {
            tail.extend_from_slice(&templates::other_speed_descriptor(device));
        }
    }

    let fragments_len: usize = registry
        .loaded()
        .filter(|(_, s)| !s.is_stub())
        .map(|(_, s)| s.fragment().len())
        .sum();
    let total_length = CONFIG_DESC_LEN + fragments_len + strings.len() + tail.len();
    let total_length = u16::try_from(total_length).map_err(|_| {
        AppError::Range(format!("wTotalLength {} does not fit in 16 bits", total_length))
    })?;
    let buffer_len = DEVICE_DESC_LEN + total_length as usize;
    if buffer_len > config.compositor.max_descriptor_len {
        return Err(AppError::Capacity(format!(
            "composite descriptor needs {} bytes, buffer holds {}",
            buffer_len, config.compositor.max_descriptor_len
        )));
    }

    let mut out = Vec::with_capacity(buffer_len);

    // 1. device descriptor
    let mut dev = templates::device_descriptor(device);
    {
        let mut view = DeviceView::new(&mut dev[..])?;
        view.set_vendor_id(device.vendor_id);
        if dev_num > 1 && device.product_id < u16::MAX {
            view.set_product_id(device.product_id + 1);
        } else {
            view.set_product_id(device.product_id);
        }
    }
    out.extend_from_slice(&dev);

    // 2. configuration header, patched once the interface count is known
    out.extend_from_slice(&templates::config_descriptor(device));

    // 3. per-function interface/endpoint blocks
    let mut functions = Vec::new();
    for (index, slot) in registry.iter_mut() {
        if !slot.is_loaded() || slot.is_stub() {
            continue;
        }
        let start = out.len();
        out.extend_from_slice(slot.fragment());
        let first_intf = intf_alloc.peek();
        patch_function(&mut out[start..], slot, &mut intf_alloc, &mut ep_alloc)?;

        let assigned = intf_alloc.peek() - first_intf;
        if assigned != slot.num_interfaces() {
            warn!(
                "{} declares {} interfaces but its fragment holds {}",
                slot.name(),
                slot.num_interfaces(),
                assigned
            );
        }
        debug!(
            "Composed {}: interfaces {:?}, endpoints {:02x?}",
            slot.name(),
            slot.interfaces(),
            slot.endpoints()
        );
        functions.push(FunctionDesc {
            slot: index,
            name: slot.name().to_string(),
            range: start..out.len(),
        });
    }

    let num_interfaces = intf_alloc.count();
    {
        let mut cfg = ConfigView::new(&mut out[DEVICE_DESC_LEN..DEVICE_DESC_LEN + CONFIG_DESC_LEN])?;
        cfg.set_num_interfaces(num_interfaces);
        cfg.set_total_length(total_length);
    }

    // 4. string table, once
    let strings_start = out.len();
    out.extend_from_slice(&strings);
    let strings_range = strings_start..out.len();

    // 5. qualifier (high-speed builds)
    let qualifier = if tail.is_empty() {
        None
    } else {
        let start = out.len();
        out.extend_from_slice(&tail);
        Some(start..out.len())
    };

    debug_assert_eq!(out.len(), buffer_len);

    Ok(CompositeDescriptorSet {
        bytes: Bytes::from(out),
        functions,
        strings: strings_range,
        qualifier,
        function_count: dev_num,
        num_interfaces,
        total_length,
    })
}

/// Renumber one function block in place
fn patch_function(
    block: &mut [u8],
    slot: &mut FunctionSlot,
    intf_alloc: &mut InterfaceAllocator,
    ep_alloc: &mut EndpointAllocator,
) -> Result<()> {
    let records: Vec<(u8, Range<usize>)> = DescriptorCursor::collect_all(block)?
        .into_iter()
        .map(|d| (d.kind, d.range()))
        .collect();

    let mut last_intf: Option<u8> = None;
    // Logical number of the previous endpoint; None at function start so
    // the first endpoint always gets a fresh number.
    let mut last_logical: Option<u8> = None;
    let mut vc_header_pending = false;

    for (kind, range) in records {
        let desc = &mut block[range];
        match kind {
            DESC_TYPE_INTERFACE_ASSOCIATION => {
                IadView::new(desc)?.set_first_interface(intf_alloc.peek());
            }
            DESC_TYPE_INTERFACE => {
                let mut intf = InterfaceView::new(desc)?;
                let number = match (intf.alternate_setting(), last_intf) {
                    (0, _) | (_, None) => {
                        let n = intf_alloc.allocate()?;
                        slot.record_interface(n)?;
                        n
                    }
                    (_, Some(n)) => n,
                };
                intf.set_number(number);
                intf.set_string_index(0);
                last_intf = Some(number);
                vc_header_pending = intf.class() == CLASS_VIDEO
                    && intf.subclass() == VIDEO_SC_VIDEOCONTROL
                    && intf.alternate_setting() == 0;
            }
            DESC_TYPE_CS_INTERFACE if vc_header_pending => {
                vc_header_pending = false;
                let mut header = ClassSpecificView::new(desc)?;
                if header.subtype() == VIDEO_VC_HEADER {
                    // baInterfaceNr: the VideoStreaming interface that follows
                    header.set_last_byte(intf_alloc.peek());
                }
            }
            DESC_TYPE_ENDPOINT if last_intf.is_some() => {
                let mut ep = EndpointView::new(desc)?;
                let logical = ep.logical_number();
                if last_logical != Some(logical) {
                    ep_alloc.allocate()?;
                }
                last_logical = Some(logical);

                let address = (ep.address() & 0xf0) | ep_alloc.current();
                ep.set_address(address);
                if !slot.endpoints().contains(&address) {
                    slot.record_endpoint(address)?;
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::demo;
    use crate::composite::descriptor::{parse_fragment, DESC_TYPE_CONFIGURATION};
    use crate::composite::function::CompositeFunction;
    use std::collections::HashSet;
    use std::sync::Arc;

    struct Noop;

    impl CompositeFunction for Noop {
        fn init(&self, _endpoints: &[u8]) -> Result<()> {
            Ok(())
        }
    }

    fn register(registry: &mut FunctionRegistry, name: &str, blob: &'static [u8]) {
        let blob = Bytes::from_static(blob);
        let parsed = parse_fragment(name, &blob).unwrap();
        let class = parsed.interface_class;
        registry.register(name, class, parsed, Arc::new(Noop)).unwrap();
    }

    fn interfaces_of(set: &CompositeDescriptorSet) -> Vec<(u8, u8)> {
        let mut out = Vec::new();
        for f in set.function_descs() {
            for d in DescriptorCursor::new(&set.as_bytes()[f.range.clone()]) {
                let d = d.unwrap();
                if d.kind == DESC_TYPE_INTERFACE {
                    let v = InterfaceView::new(d.bytes).unwrap();
                    out.push((v.number(), v.alternate_setting()));
                }
            }
        }
        out
    }

    #[test]
    fn test_msc_then_uac() {
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);
        register(&mut registry, "uac", demo::UAC_DESCRIPTOR);
        let config = AppConfig::default();

        let set = compose(&mut registry, &PresetSelector::new(), &config).unwrap();
        assert_eq!(set.num_interfaces(), 3);
        assert_eq!(set.function_count(), 2);
        assert_eq!(registry.get("msc").unwrap().interfaces(), &[0]);
        assert_eq!(registry.get("uac").unwrap().interfaces(), &[1, 2]);

        // msc's IN/OUT pair shares logical endpoint 1, uac gets 2
        assert_eq!(registry.get("msc").unwrap().endpoints(), &[0x01, 0x81]);
        assert_eq!(registry.get("uac").unwrap().endpoints(), &[0x02]);

        // alternate setting 1 of the streaming interface reuses number 2
        assert_eq!(interfaces_of(&set), vec![(0, 0), (1, 0), (2, 0), (2, 1)]);

        let cfg = ConfigView::new(set.config_desc()).unwrap();
        assert_eq!(cfg.num_interfaces(), 3);
        assert_eq!(set.config_desc()[1], DESC_TYPE_CONFIGURATION);
    }

    #[test]
    fn test_total_length_accounts_for_every_part() {
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);
        register(&mut registry, "uvc", demo::UVC_DESCRIPTOR);
        register(&mut registry, "cdc_acm", demo::CDC_ACM_DESCRIPTOR);
        let config = AppConfig::default();

        let set = compose(&mut registry, &PresetSelector::new(), &config).unwrap();
        let functions: usize = set.function_descs().iter().map(|f| f.range.len()).sum();
        let expected = CONFIG_DESC_LEN
            + functions
            + set.string_descs().len()
            + set.qualifier_desc().map_or(0, |q| q.len());
        assert_eq!(ConfigView::new(set.config_desc()).unwrap().total_length() as usize, expected);
        assert_eq!(set.len(), DEVICE_DESC_LEN + expected);
    }

    #[test]
    fn test_interfaces_contiguous_and_endpoints_disjoint() {
        let mut registry = FunctionRegistry::default();
        for (name, blob) in [
            ("disp", demo::VENDOR_DESCRIPTOR),
            ("msc", demo::MSC_DESCRIPTOR),
            ("uac", demo::UAC_DESCRIPTOR),
            ("touch", demo::TOUCH_DESCRIPTOR),
            ("cdc_acm", demo::CDC_ACM_DESCRIPTOR),
        ] {
            register(&mut registry, name, blob);
        }
        let set = compose(&mut registry, &PresetSelector::new(), &AppConfig::default()).unwrap();

        let mut numbers: Vec<u8> = registry
            .loaded()
            .flat_map(|(_, s)| s.interfaces().to_vec())
            .collect();
        numbers.sort();
        let expected: Vec<u8> = (0..set.num_interfaces()).collect();
        assert_eq!(numbers, expected);

        let mut seen = HashSet::new();
        for (_, slot) in registry.loaded() {
            let logical: HashSet<u8> = slot.endpoints().iter().map(|a| a & 0x0f).collect();
            for n in logical {
                assert!(n != 0);
                assert!(seen.insert(n), "logical endpoint {} reused", n);
            }
        }
    }

    #[test]
    fn test_compose_is_idempotent() {
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "uvc", demo::UVC_DESCRIPTOR);
        register(&mut registry, "uac", demo::UAC_DESCRIPTOR);
        let config = AppConfig::default();
        let selector = PresetSelector::new();

        let first = compose(&mut registry, &selector, &config).unwrap();
        let second = compose(&mut registry, &selector, &config).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn test_vc_header_points_at_streaming_interface() {
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);
        register(&mut registry, "uvc", demo::UVC_DESCRIPTOR);

        let set = compose(&mut registry, &PresetSelector::new(), &AppConfig::default()).unwrap();
        let uvc = set.function_desc(1).unwrap();
        let records = DescriptorCursor::collect_all(uvc).unwrap();

        let iad = records
            .iter()
            .find(|d| d.kind == DESC_TYPE_INTERFACE_ASSOCIATION)
            .unwrap();
        assert_eq!(IadView::new(iad.bytes).unwrap().first_interface(), 1);

        let header = records
            .iter()
            .find(|d| d.kind == DESC_TYPE_CS_INTERFACE)
            .unwrap();
        let header = ClassSpecificView::new(header.bytes).unwrap();
        assert_eq!(header.subtype(), VIDEO_VC_HEADER);
        assert_eq!(header.last_byte(), 2);
        assert_eq!(registry.get("uvc").unwrap().interfaces(), &[1, 2]);
    }

    #[test]
    fn test_interface_strings_cleared() {
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);
        let set = compose(&mut registry, &PresetSelector::new(), &AppConfig::default()).unwrap();
        for d in DescriptorCursor::new(set.function_desc(0).unwrap()) {
            let d = d.unwrap();
            if d.kind == DESC_TYPE_INTERFACE {
                assert_eq!(InterfaceView::new(d.bytes).unwrap().string_index(), 0);
            }
        }
    }

    #[test]
    fn test_product_id_bumped_for_multiple_functions() {
        let config = AppConfig::default();
        let selector = PresetSelector::new();

        let mut registry = FunctionRegistry::default();
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);
        let single = compose(&mut registry, &selector, &config).unwrap();
        assert_eq!(
            DeviceView::new(single.device_desc()).unwrap().product_id(),
            config.device.product_id
        );
        // single-function high-speed build carries qualifier + other-speed
        assert_eq!(single.qualifier_desc().unwrap().len(), 19);

        register(&mut registry, "uac", demo::UAC_DESCRIPTOR);
        let multi = compose(&mut registry, &selector, &config).unwrap();
        assert_eq!(
            DeviceView::new(multi.device_desc()).unwrap().product_id(),
            config.device.product_id + 1
        );
        assert_eq!(multi.qualifier_desc().unwrap().len(), 10);
    }

    #[test]
    fn test_product_id_at_max_not_bumped() {
        let mut config = AppConfig::default();
        config.device.product_id = u16::MAX;
        config.device.high_speed = false;
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);
        register(&mut registry, "uac", demo::UAC_DESCRIPTOR);

        let set = compose(&mut registry, &PresetSelector::new(), &config).unwrap();
        assert_eq!(DeviceView::new(set.device_desc()).unwrap().product_id(), u16::MAX);
        assert!(set.qualifier_desc().is_none());
    }

    #[test]
    fn test_preset_excludes_non_members() {
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "touch", demo::TOUCH_DESCRIPTOR);
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);
        let mut selector = PresetSelector::new();
        selector.select(3).unwrap();

        let set = compose(&mut registry, &selector, &AppConfig::default()).unwrap();
        assert_eq!(set.function_count(), 1);
        assert!(!registry.get("touch").unwrap().is_loaded());
        assert!(registry.get("touch").unwrap().interfaces().is_empty());
        assert_eq!(registry.get("msc").unwrap().interfaces(), &[0]);
        assert!(set.function_desc(0).is_none());
    }

    #[test]
    fn test_stub_contributes_nothing() {
        let mut registry = FunctionRegistry::default();
        registry
            .register("stub", 0, crate::composite::descriptor::ParsedFragment::stub(), Arc::new(Noop))
            .unwrap();
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);

        let set = compose(&mut registry, &PresetSelector::new(), &AppConfig::default()).unwrap();
        assert_eq!(set.function_count(), 2);
        assert_eq!(set.function_descs().len(), 1);
        assert_eq!(set.num_interfaces(), 1);
        assert!(registry.get("stub").unwrap().is_loaded());
    }

    #[test]
    fn test_endpoint_exhaustion_clears_assignments() {
        let mut config = AppConfig::default();
        config.compositor.max_endpoints = 2;
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "msc", demo::MSC_DESCRIPTOR);
        register(&mut registry, "cdc_acm", demo::CDC_ACM_DESCRIPTOR);

        let result = compose(&mut registry, &PresetSelector::new(), &config);
        assert!(matches!(result, Err(AppError::Capacity(_))));
        assert_eq!(registry.loaded_count(), 0);
        assert!(registry.get("msc").unwrap().endpoints().is_empty());
    }

    #[test]
    fn test_buffer_limit() {
        let mut config = AppConfig::default();
        config.compositor.max_descriptor_len = 128;
        let mut registry = FunctionRegistry::default();
        register(&mut registry, "uvc", demo::UVC_DESCRIPTOR);

        assert!(matches!(
            compose(&mut registry, &PresetSelector::new(), &config),
            Err(AppError::Capacity(_))
        ));
    }
}
