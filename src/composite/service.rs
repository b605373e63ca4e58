//! Composite lifecycle controller
//!
//! Owns the registry, the enumeration-table selector and the USB stack
//! behind one `tokio::sync::Mutex`. Every public operation runs its whole
//! transition inside that lock, so composition always observes a
//! consistent registry.
//!
//! ```text
//!   Empty ──compose──▶ Composing ──rendezvous──▶ Loaded
//!     ▲                    │                       │
//!     └──── not ready ─────┘      register/release │
//!     ▲                                            ▼
//!     └──────────────────────────────────────── Unloading
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::compositor::{self, CompositeDescriptorSet};
use super::descriptor::{parse_fragment, ParsedFragment};
use super::function::{CompositeFunction, FunctionInfo, UsbEvent};
use super::preset::PresetSelector;
use super::registry::FunctionRegistry;
use super::stack::{EndpointHandle, InterfaceHandle, UsbDeviceStack};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::events::{CompositeEvent, EventBus};
use crate::utils::LogThrottler;

/// Lifecycle state of the composite device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No device presented
    Empty,
    /// Building a descriptor set
    Composing,
    /// The stack is initialized with a valid descriptor buffer
    Loaded,
    /// Tearing the previous device down
    Unloading,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Empty => "empty",
            Self::Composing => "composing",
            Self::Loaded => "loaded",
            Self::Unloading => "unloading",
        };
        f.write_str(s)
    }
}

/// Snapshot returned by [`CompositeService::status`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompositeStatus {
    pub state: LifecycleState,
    /// Functions taking part in the last composition
    pub dev_num: usize,
    /// Function count the active table expects, 0 when unbounded
    pub max_dev_num: usize,
    /// Active table, 0 when none
    pub table_index: usize,
    pub is_finished: bool,
    /// Held down by `force_stop`
    pub suspended: bool,
    pub num_interfaces: u8,
    pub total_length: u16,
}

/// State guarded by the lifecycle mutex
pub struct CompositorContext {
    registry: FunctionRegistry,
    selector: PresetSelector,
    state: LifecycleState,
    suspended: bool,
    descriptor: Option<CompositeDescriptorSet>,
    stack: Box<dyn UsbDeviceStack>,
    config: Arc<AppConfig>,
}

impl CompositorContext {
    pub fn new(config: Arc<AppConfig>, stack: Box<dyn UsbDeviceStack>) -> Result<Self> {
        config.validate()?;
        let mut selector = PresetSelector::new();
        if config.compositor.default_table != 0 {
            selector.select(config.compositor.default_table)?;
        }
        Ok(Self {
            registry: FunctionRegistry::new(config.compositor.max_functions),
            selector,
            state: LifecycleState::Empty,
            suspended: false,
            descriptor: None,
            stack,
            config,
        })
    }

    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    fn status(&self) -> CompositeStatus {
        let (num_interfaces, total_length) = self
            .descriptor
            .as_ref()
            .map_or((0, 0), |d| (d.num_interfaces(), d.total_length()));
        CompositeStatus {
            state: self.state,
            dev_num: self.registry.loaded_count(),
            max_dev_num: self.selector.expected_count(),
            table_index: self.selector.current_index(),
            is_finished: self.state == LifecycleState::Loaded,
            suspended: self.suspended,
            num_interfaces,
            total_length,
        }
    }

    /// Loaded → Unloading → Empty; no-op in any other state
    fn unload(&mut self, events: &EventBus) {
        if self.state != LifecycleState::Loaded {
            return;
        }
        self.state = LifecycleState::Unloading;
        if let Err(e) = self.stack.deinitialize() {
            warn!("USB stack deinitialize failed: {}", e);
        }
        self.descriptor = None;
        self.state = LifecycleState::Empty;

        let functions = self.registry.loaded_count();
        info!("Composite device unloaded ({} functions)", functions);
        events.publish(CompositeEvent::DeviceUnloaded { functions });
    }

    /// Compose and, if the rendezvous holds (or `force`), present the device
    ///
    /// Returns whether the device is loaded afterwards.
    fn try_load(&mut self, force: bool, events: &EventBus) -> Result<bool> {
        if self.state == LifecycleState::Loaded {
            return Ok(true);
        }
        if self.suspended && !force {
            debug!("Composite device held down, skipping load");
            return Ok(false);
        }

        self.state = LifecycleState::Composing;
        let set = match compositor::compose(&mut self.registry, &self.selector, &self.config) {
            Ok(set) => set,
            Err(e) => {
                self.state = LifecycleState::Empty;
                return Err(e);
            }
        };

        let dev_num = set.function_count();
        let max_dev_num = self.selector.expected_count();
        if dev_num == 0 {
            self.state = LifecycleState::Empty;
            if force {
                return Err(AppError::NotReady("no active functions to present".to_string()));
            }
            return Ok(false);
        }
        if !force {
            if max_dev_num != 0 && dev_num != max_dev_num {
                debug!("Rendezvous pending: {}/{} functions", dev_num, max_dev_num);
                self.state = LifecycleState::Empty;
                return Ok(false);
            }
            if let Some((_, slot)) = self.registry.loaded().find(|(_, s)| !s.handler().is_ready()) {
                debug!("Rendezvous pending: {} not ready", slot.name());
                self.state = LifecycleState::Empty;
                return Ok(false);
            }
        }

        if let Err(e) = self.present(&set) {
            if let Err(e) = self.stack.deinitialize() {
                warn!("USB stack cleanup failed: {}", e);
            }
            self.state = LifecycleState::Empty;
            return Err(e);
        }

        info!(
            "Composite device loaded: {} functions, {} interfaces, wTotalLength {}",
            dev_num,
            set.num_interfaces(),
            set.total_length()
        );
        events.publish(CompositeEvent::DeviceLoaded {
            functions: dev_num,
            interfaces: set.num_interfaces(),
            total_length: set.total_length(),
        });
        self.descriptor = Some(set);
        self.state = LifecycleState::Loaded;
        Ok(true)
    }

    /// Tear the device down and compose the changed registry or table
    ///
    /// On failure `previous` and `selector` are put back, the previous set is
    /// presented again and the composition error is returned.
    fn recompose(
        &mut self,
        operation: &str,
        previous: FunctionRegistry,
        selector: PresetSelector,
        events: &EventBus,
    ) -> Result<()> {
        self.unload(events);
        let err = match self.try_load(false, events) {
            Ok(_) => return Ok(()),
            Err(e) => e,
        };

        warn!("Composition after {} failed, rolling back: {}", operation, err);
        events.publish(CompositeEvent::CompositionFailed {
            operation: operation.to_string(),
            code: err.code().to_string(),
            message: err.to_string(),
        });
        self.registry = previous;
        self.selector = selector;
        if let Err(e) = self.try_load(false, events) {
            warn!("Failed to restore previous composite device: {}", e);
        }
        Err(err)
    }

    /// Hand the set to the stack and wire every loaded function
    fn present(&mut self, set: &CompositeDescriptorSet) -> Result<()> {
        self.stack.register_descriptor(set.as_bytes().clone())?;

        for (_, slot) in self.registry.loaded() {
            for &number in slot.interfaces() {
                self.stack.add_interface(InterfaceHandle {
                    function: slot.name().to_string(),
                    number,
                })?;
            }
            for &address in slot.endpoints() {
                self.stack.add_endpoint(EndpointHandle {
                    function: slot.name().to_string(),
                    address,
                })?;
            }
            if let Err(e) = slot.handler().init(slot.endpoints()) {
                warn!("{} init failed: {}", slot.name(), e);
            }
        }

        self.stack.initialize()
    }
}

/// Shared handle to the lifecycle controller
pub struct CompositeService {
    ctx: Mutex<CompositorContext>,
    events: Arc<EventBus>,
    detection_interval: Duration,
    detection: parking_lot::Mutex<Option<Detection>>,
}

/// A running detection task and the token that stops it
struct Detection {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl CompositeService {
    pub fn new(
        config: Arc<AppConfig>,
        stack: Box<dyn UsbDeviceStack>,
        events: Arc<EventBus>,
    ) -> Result<Arc<Self>> {
        let detection_interval = Duration::from_millis(config.compositor.detection_interval_ms);
        let ctx = CompositorContext::new(config, stack)?;
        Ok(Arc::new(Self {
            ctx: Mutex::new(ctx),
            events,
            detection_interval,
            detection: parking_lot::Mutex::new(None),
        }))
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Register a function module
    ///
    /// `descriptor` is the module's standalone descriptor set; `None`
    /// registers a stub. The previous device is torn down and the set
    /// recomposed. If composition fails the registration is rolled back and
    /// the previous set is restored.
    pub async fn register(
        &self,
        name: &str,
        dev_class: u8,
        descriptor: Option<Bytes>,
        handler: Arc<dyn CompositeFunction>,
    ) -> Result<usize> {
        let fragment = match descriptor {
            Some(blob) => parse_fragment(name, &blob)?,
            None => ParsedFragment::stub(),
        };

        let mut ctx = self.ctx.lock().await;
        let previous = ctx.registry.clone();
        let selector = ctx.selector.clone();
        let slot = ctx.registry.register(name, dev_class, fragment, handler)?;
        ctx.recompose("register", previous, selector, &self.events)?;

        self.events.publish(CompositeEvent::FunctionRegistered {
            name: name.to_string(),
            slot,
        });
        Ok(slot)
    }

    /// Release a function; releasing an inactive one is a no-op
    ///
    /// If the remaining functions fail to compose, the function stays
    /// registered and the previous set is restored.
    pub async fn release(&self, name: &str) -> Result<()> {
        let mut ctx = self.ctx.lock().await;
        let previous = ctx.registry.clone();
        let selector = ctx.selector.clone();
        if !ctx.registry.release(name)? {
            return Ok(());
        }
        ctx.recompose("release", previous, selector, &self.events)?;

        self.events.publish(CompositeEvent::FunctionReleased {
            name: name.to_string(),
        });
        Ok(())
    }

    /// Activate an enumeration table, returning its function count
    ///
    /// If the table's functions fail to compose, the previous table stays
    /// active and its device is presented again.
    pub async fn select_table(&self, index: usize) -> Result<usize> {
        let mut ctx = self.ctx.lock().await;
        let previous = ctx.registry.clone();
        let selector = ctx.selector.clone();
        let count = ctx.selector.select(index)?;
        ctx.recompose("select_table", previous, selector, &self.events)?;

        if let Some(preset) = ctx.selector.current() {
            self.events.publish(CompositeEvent::PresetSelected {
                index: ctx.selector.current_index(),
                name: preset.name.to_string(),
                functions: preset.functions.iter().map(|f| f.to_string()).collect(),
            });
        }
        Ok(count)
    }

    /// Present the device now, ignoring the rendezvous
    pub async fn force_start(&self) -> Result<()> {
        let mut ctx = self.ctx.lock().await;
        ctx.suspended = false;
        ctx.try_load(true, &self.events).map(|_| ())
    }

    /// Withdraw the device and keep it down until `force_start`
    pub async fn force_stop(&self) -> Result<()> {
        let mut ctx = self.ctx.lock().await;
        ctx.suspended = true;
        ctx.unload(&self.events);
        Ok(())
    }

    /// Forward a bus event to every loaded function
    pub async fn dispatch_event(&self, event: UsbEvent) -> Result<()> {
        let ctx = self.ctx.lock().await;
        if ctx.state != LifecycleState::Loaded {
            return Err(AppError::NotReady(format!(
                "cannot dispatch {:?} while {}",
                event, ctx.state
            )));
        }
        for (_, slot) in ctx.registry.loaded() {
            slot.handler().on_event(event);
        }
        Ok(())
    }

    /// The descriptor set currently presented
    pub async fn descriptor(&self) -> Result<CompositeDescriptorSet> {
        let ctx = self.ctx.lock().await;
        ctx.descriptor
            .clone()
            .ok_or_else(|| AppError::NotReady(format!("composite device is {}", ctx.state)))
    }

    pub async fn status(&self) -> CompositeStatus {
        self.ctx.lock().await.status()
    }

    pub async fn functions(&self) -> Vec<FunctionInfo> {
        self.ctx.lock().await.registry.snapshot()
    }

    /// One detection pass: retry loading while not loaded
    pub async fn poll(&self) -> Result<bool> {
        let mut ctx = self.ctx.lock().await;
        ctx.try_load(false, &self.events)
    }

    /// Start the background detection task
    ///
    /// Calling this again while a task is running is a no-op. Each task
    /// gets its own token, so detection can be restarted after `shutdown`.
    pub fn spawn_detection(self: &Arc<Self>) {
        let mut guard = self.detection.lock();
        if guard.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return;
        }

        let service = Arc::clone(self);
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let period = self.detection_interval;
        info!("Starting detection task ({} ms)", period.as_millis());

        let handle = tokio::spawn(async move {
            let throttler = LogThrottler::with_secs(5);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                match service.poll().await {
                    Ok(true) => {
                        throttler.clear("rendezvous");
                        throttler.clear("suspended");
                    }
                    Ok(false) => {
                        let status = service.status().await;
                        if status.suspended {
                            crate::info_throttled!(
                                throttler,
                                "suspended",
                                "Composite device held down until force_start"
                            );
                            continue;
                        }
                        crate::info_throttled!(
                            throttler,
                            "rendezvous",
                            "Waiting for functions: {}/{} present",
                            status.dev_num,
                            status.max_dev_num
                        );
                    }
                    Err(e) => {
                        crate::warn_throttled!(throttler, "load_error", "Composite load failed: {}", e);
                    }
                }
            }
            debug!("Detection task stopped");
        });
        *guard = Some(Detection { cancel, handle });
    }

    /// Stop detection and withdraw the device
    pub async fn shutdown(&self) {
        let detection = self.detection.lock().take();
        if let Some(Detection { cancel, handle }) = detection {
            cancel.cancel();
            if let Err(e) = handle.await {
                warn!("Detection task ended abnormally: {}", e);
            }
        }
        let mut ctx = self.ctx.lock().await;
        ctx.unload(&self.events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::demo::{self, DemoFunction};
    use crate::composite::stack::{MemoryStack, StackCall};

    fn service_with(config: AppConfig) -> (Arc<CompositeService>, MemoryStack) {
        let stack = MemoryStack::new();
        let service = CompositeService::new(
            Arc::new(config),
            Box::new(stack.clone()),
            Arc::new(EventBus::new()),
        )
        .unwrap();
        (service, stack)
    }

    async fn register_demo(service: &CompositeService, name: &str) -> Result<usize> {
        let module = demo::lookup(name).unwrap();
        service
            .register(name, module.dev_class, Some(module.blob()), DemoFunction::new(name))
            .await
    }

    #[tokio::test]
    async fn test_unbounded_loads_on_first_function() {
        let (service, stack) = service_with(AppConfig::default());
        register_demo(&service, "msc").await.unwrap();

        let status = service.status().await;
        assert_eq!(status.state, LifecycleState::Loaded);
        assert_eq!(status.max_dev_num, 0);
        assert!(stack.is_initialized());
    }

    #[tokio::test]
    async fn test_register_unloads_before_recompose() {
        let (service, stack) = service_with(AppConfig::default());
        register_demo(&service, "msc").await.unwrap();
        stack.clear();

        register_demo(&service, "uac").await.unwrap();
        let calls = stack.calls();
        assert_eq!(calls[0], StackCall::Deinitialize);
        assert!(matches!(calls[1], StackCall::RegisterDescriptor(_)));
        assert_eq!(calls.last(), Some(&StackCall::Initialize));
    }

    #[tokio::test]
    async fn test_rendezvous_waits_for_table() {
        let (service, stack) = service_with(AppConfig::default());
        service.select_table(2).await.unwrap();

        register_demo(&service, "uac").await.unwrap();
        assert_eq!(service.status().await.state, LifecycleState::Empty);
        assert!(!stack.is_initialized());

        register_demo(&service, "msc").await.unwrap();
        let status = service.status().await;
        assert_eq!(status.state, LifecycleState::Loaded);
        assert_eq!(status.dev_num, 2);
        assert_eq!(status.max_dev_num, 2);
    }

    #[tokio::test]
    async fn test_not_ready_function_blocks_load() {
        let (service, _stack) = service_with(AppConfig::default());
        let msc = DemoFunction::with_ready("msc", false);
        service
            .register("msc", 0x08, Some(demo::lookup("msc").unwrap().blob()), msc.clone())
            .await
            .unwrap();
        assert!(!service.poll().await.unwrap());

        msc.set_ready(true);
        assert!(service.poll().await.unwrap());
        assert_eq!(msc.endpoints(), vec![0x01, 0x81]);
    }

    #[tokio::test]
    async fn test_duplicate_leaves_device_loaded() {
        let (service, stack) = service_with(AppConfig::default());
        register_demo(&service, "msc").await.unwrap();
        let before = service.functions().await;
        stack.clear();

        assert!(matches!(
            register_demo(&service, "msc").await,
            Err(AppError::Duplicate(_))
        ));
        assert_eq!(service.functions().await, before);
        assert!(stack.calls().is_empty());
        assert_eq!(service.status().await.state, LifecycleState::Loaded);
    }

    #[tokio::test]
    async fn test_failed_composition_rolls_back() {
        let mut config = AppConfig::default();
        config.compositor.max_endpoints = 2;
        let (service, stack) = service_with(config);
        register_demo(&service, "msc").await.unwrap();

        assert!(matches!(
            register_demo(&service, "cdc_acm").await,
            Err(AppError::Capacity(_))
        ));
        assert!(service.functions().await.iter().all(|f| f.name != "cdc_acm"));
        assert_eq!(service.status().await.state, LifecycleState::Loaded);
        assert!(stack.is_initialized());
        assert_eq!(stack.interfaces().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_release_keeps_function() {
        let (service, stack) = service_with(AppConfig::default());
        register_demo(&service, "msc").await.unwrap();
        register_demo(&service, "uac").await.unwrap();

        stack.set_fail_initialize(true);
        assert!(service.release("uac").await.is_err());
        let functions = service.functions().await;
        assert!(functions.iter().any(|f| f.name == "uac" && f.active));

        stack.set_fail_initialize(false);
        assert!(service.poll().await.unwrap());
        assert_eq!(service.status().await.dev_num, 2);
    }

    #[tokio::test]
    async fn test_table_switch_failure_restores_device() {
        let mut config = AppConfig::default();
        config.compositor.max_endpoints = 2;
        let (service, stack) = service_with(config);
        service.select_table(3).await.unwrap();
        register_demo(&service, "msc").await.unwrap();
        register_demo(&service, "cdc_acm").await.unwrap();
        assert_eq!(service.status().await.state, LifecycleState::Loaded);

        assert!(matches!(
            service.select_table(5).await,
            Err(AppError::Capacity(_))
        ));
        let status = service.status().await;
        assert_eq!(status.table_index, 3);
        assert_eq!(status.state, LifecycleState::Loaded);
        assert_eq!(status.dev_num, 1);
        assert!(stack.is_initialized());
    }

    #[tokio::test]
    async fn test_force_stop_holds_device_down() {
        let (service, stack) = service_with(AppConfig::default());
        register_demo(&service, "msc").await.unwrap();

        service.force_stop().await.unwrap();
        assert!(!stack.is_initialized());
        register_demo(&service, "uac").await.unwrap();
        assert!(!service.poll().await.unwrap());
        assert!(service.status().await.suspended);

        service.force_start().await.unwrap();
        assert_eq!(service.status().await.state, LifecycleState::Loaded);
        assert!(stack.is_initialized());
    }

    #[tokio::test]
    async fn test_force_start_ignores_rendezvous() {
        let (service, _stack) = service_with(AppConfig::default());
        service.select_table(1).await.unwrap();
        register_demo(&service, "msc").await.unwrap();
        assert_eq!(service.status().await.state, LifecycleState::Empty);

        service.force_start().await.unwrap();
        assert_eq!(service.status().await.state, LifecycleState::Loaded);
    }

    #[tokio::test]
    async fn test_force_start_without_functions() {
        let (service, _stack) = service_with(AppConfig::default());
        assert!(matches!(
            service.force_start().await,
            Err(AppError::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_and_descriptor_require_loaded() {
        let (service, _stack) = service_with(AppConfig::default());
        assert!(matches!(
            service.dispatch_event(UsbEvent::Reset).await,
            Err(AppError::NotReady(_))
        ));
        assert!(matches!(service.descriptor().await, Err(AppError::NotReady(_))));

        let msc = DemoFunction::new("msc");
        service
            .register("msc", 0x08, Some(demo::lookup("msc").unwrap().blob()), msc.clone())
            .await
            .unwrap();
        service.dispatch_event(UsbEvent::Configured).await.unwrap();
        assert_eq!(msc.events(), vec![UsbEvent::Configured]);
        assert_eq!(service.descriptor().await.unwrap().num_interfaces(), 1);
    }

    #[tokio::test]
    async fn test_init_failure_is_not_fatal() {
        struct Failing;
        impl CompositeFunction for Failing {
            fn init(&self, _endpoints: &[u8]) -> Result<()> {
                Err(AppError::Internal("backing store missing".to_string()))
            }
        }

        let (service, _stack) = service_with(AppConfig::default());
        service
            .register("msc", 0x08, Some(demo::lookup("msc").unwrap().blob()), Arc::new(Failing))
            .await
            .unwrap();
        assert_eq!(service.status().await.state, LifecycleState::Loaded);
    }

    #[tokio::test]
    async fn test_stack_failure_leaves_empty() {
        let (service, stack) = service_with(AppConfig::default());
        stack.set_fail_initialize(true);
        assert!(register_demo(&service, "msc").await.is_err());
        assert_eq!(service.status().await.state, LifecycleState::Empty);
        assert!(service.functions().await.is_empty());

        stack.set_fail_initialize(false);
        register_demo(&service, "msc").await.unwrap();
        assert_eq!(service.status().await.state, LifecycleState::Loaded);
    }

    #[tokio::test]
    async fn test_default_table_from_config() {
        let mut config = AppConfig::default();
        config.compositor.default_table = 3;
        let (service, _stack) = service_with(config);
        let status = service.status().await;
        assert_eq!(status.table_index, 3);
        assert_eq!(status.max_dev_num, 1);
    }

    #[tokio::test]
    async fn test_detection_restarts_after_shutdown() {
        let mut config = AppConfig::default();
        config.compositor.detection_interval_ms = 10;
        let (service, _stack) = service_with(config);

        service.spawn_detection();
        service.shutdown().await;
        service.spawn_detection();

        let msc = DemoFunction::with_ready("msc", false);
        service
            .register("msc", 0x08, Some(demo::lookup("msc").unwrap().blob()), msc.clone())
            .await
            .unwrap();
        msc.set_ready(true);

        let mut loaded = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if service.status().await.state == LifecycleState::Loaded {
                loaded = true;
                break;
            }
        }
        assert!(loaded);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_detection_respects_force_stop() {
        let mut config = AppConfig::default();
        config.compositor.detection_interval_ms = 10;
        let (service, stack) = service_with(config);

        service.force_stop().await.unwrap();
        service.spawn_detection();
        register_demo(&service, "msc").await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        let status = service.status().await;
        assert!(status.suspended);
        assert_eq!(status.state, LifecycleState::Empty);
        assert!(!stack.is_initialized());

        service.force_start().await.unwrap();
        assert_eq!(service.status().await.state, LifecycleState::Loaded);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn test_release_unknown() {
        let (service, _stack) = service_with(AppConfig::default());
        assert!(matches!(
            service.release("nope").await,
            Err(AppError::NotFound(_))
        ));
    }
}
