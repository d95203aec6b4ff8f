//! The stateful façade driving page/element/event transfer.
use crate::correlator::{Correlator, CorrelatorError};
use crate::link::{Link, LinkError, LinkEvent};
use crate::wire::{format_action_stream, parse_action_stream, unwrap_lua, wrap_lua};
use packet_codec::{Descriptor, Instruction};
use shared::element::{element_type_for_module, module_type_from_hwcfg};
use shared::model::{Action, EventConfig, Firmware, ModuleConfig, ModuleInfo, PageConfig, Position};
use shared::{Filter, GridError};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_retry::strategy::FixedInterval;
use tokio_retry::RetryIf;

const PROTOCOL_VERSION: (u16, u16, u16) = (1, 0, 0);

const FETCH_TIMEOUT_MS: u64 = 5_000;
const SEND_TIMEOUT_MS: u64 = 10_000;
const PAGEACTIVE_TIMEOUT_MS: u64 = 1_500;
const PAGESTORE_TIMEOUT_MS: u64 = 10_000;
const NVMERASE_TIMEOUT_MS: u64 = 15_000;

const MODULE_DISCOVERY_POLL_MS: u64 = 100;
const MODULE_DISCOVERY_TAIL_MS: u64 = 500;
const EDITOR_HEARTBEAT_INTERVAL_MS: u64 = 300;
const EVENT_PACING_MS: u64 = 30;

/// Device-resident `ACTIONSTRING` byte budget.
const CONFIG_LENGTH: usize = 1024;

impl From<LinkError> for GridError {
    fn from(err: LinkError) -> Self {
        match err {
            LinkError::Connection(msg) => GridError::Connection(msg),
            LinkError::WriteFailed(msg) => GridError::Write(msg),
            LinkError::Timeout => GridError::Timeout("link".to_string()),
            LinkError::Cancelled => GridError::Cancelled,
        }
    }
}

impl From<CorrelatorError> for GridError {
    fn from(err: CorrelatorError) -> Self {
        match err {
            CorrelatorError::Timeout => GridError::Timeout("correlator".to_string()),
            CorrelatorError::Cancelled => GridError::Cancelled,
        }
    }
}

/// Retries `action` up to `retries` additional times, but only when it fails
/// with `GridError::Timeout` — every other error surfaces immediately. Uses a
/// zero-delay `FixedInterval` so the retry *count* is exact; no backoff is
/// required between attempts.
async fn retry_on_timeout<F, Fut, T>(retries: usize, action: F) -> Result<T, GridError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, GridError>>,
{
    let strategy = FixedInterval::from_millis(0).take(retries);
    RetryIf::spawn(strategy, action, |err: &GridError| {
        matches!(err, GridError::Timeout(_))
    })
    .await
}

/// Progress callback invoked with `(completed, total)` during
/// `fetch_module_config`.
pub type ProgressFn<'a> = dyn FnMut(usize, usize) + Send + 'a;

/// The engine's stateful façade over one open [`Link`].
pub struct Device {
    link: Arc<Link>,
    correlator: Correlator,
    modules: Arc<RwLock<HashMap<Position, ModuleInfo>>>,
    active_page: Arc<RwLock<HashMap<Position, u8>>>,
    page_change_disabled: Arc<AtomicBool>,
    closing: Arc<AtomicBool>,
    heartbeat_task: JoinHandle<()>,
    debug_task: JoinHandle<()>,
    editor_heartbeat_task: Option<JoinHandle<()>>,
}

impl Device {
    /// Opens `path` and begins discovering the module inventory from
    /// HEARTBEAT traffic.
    pub async fn open(path: &str) -> Result<Self, GridError> {
        let link = Arc::new(Link::open(path).await?);
        Ok(Self::new(link))
    }

    fn new(link: Arc<Link>) -> Self {
        let correlator = Correlator::attach(&link);
        let modules: Arc<RwLock<HashMap<Position, ModuleInfo>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let active_page: Arc<RwLock<HashMap<Position, u8>>> = Arc::new(RwLock::new(HashMap::new()));
        let page_change_disabled = Arc::new(AtomicBool::new(false));
        let closing = Arc::new(AtomicBool::new(false));

        let mut heartbeats = correlator.subscribe_heartbeats();
        let inventory = modules.clone();
        let heartbeat_task = tokio::spawn(async move {
            while let Ok(message) = heartbeats.recv().await {
                if let Some(info) = module_info_from_heartbeat(&message) {
                    inventory.write().await.insert(info.position, info);
                }
            }
        });

        let mut link_events = link.subscribe();
        let latch = page_change_disabled.clone();
        let debug_task = tokio::spawn(async move {
            while let Ok(event) = link_events.recv().await {
                if let LinkEvent::Message(message) = event
                    && message.class == "DEBUGTEXT"
                    && let Some(text) = message.param("TEXT").and_then(|v| v.as_str())
                    && text.contains("page change is disabled")
                {
                    latch.store(true, Ordering::SeqCst);
                }
            }
        });

        Self {
            link,
            correlator,
            modules,
            active_page,
            page_change_disabled,
            closing,
            heartbeat_task,
            debug_task,
            editor_heartbeat_task: None,
        }
    }

    /// Starts the periodic editor-heartbeat ping: every 300 ms,
    /// sends an EDITOR HEARTBEAT EXECUTE so the device keeps the host in its
    /// active-editor set. Failures are swallowed and logged at `debug!`.
    pub fn start_editor_heartbeat(&mut self) {
        if self.editor_heartbeat_task.is_some() {
            return;
        }
        let link = self.link.clone();
        let closing = self.closing.clone();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(EDITOR_HEARTBEAT_INTERVAL_MS));
            loop {
                interval.tick().await;
                if closing.load(Ordering::SeqCst) {
                    break;
                }
                let descriptor = Descriptor::new(
                    Position::BROADCAST.dx,
                    Position::BROADCAST.dy,
                    "EDITORHEARTBEAT",
                    Instruction::Execute,
                )
                .with_param("type", 255i64);
                if let Err(err) = link.write(&packet_codec::encode_packet(&descriptor)).await {
                    log::debug!("editor heartbeat failed: {err}");
                }
            }
        });
        self.editor_heartbeat_task = Some(task);
    }

    async fn send(&self, descriptor: &Descriptor) -> Result<(), GridError> {
        let bytes = packet_codec::encode_packet(descriptor);
        self.link.write(&bytes).await.map_err(GridError::from)
    }

    /// Snapshot of the discovered module inventory.
    pub async fn modules(&self) -> Vec<ModuleInfo> {
        self.modules.read().await.values().cloned().collect()
    }

    /// Polls the inventory every 100 ms up to `timeout_ms`; once non-empty,
    /// waits up to 500 ms more (capped by the remaining budget) to let late
    /// heartbeats arrive. Never fails; may return empty.
    pub async fn wait_for_modules(&self, timeout_ms: u64) -> Vec<ModuleInfo> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        loop {
            if !self.modules.read().await.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                return self.modules().await;
            }
            tokio::time::sleep(Duration::from_millis(MODULE_DISCOVERY_POLL_MS)).await;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let tail = Duration::from_millis(MODULE_DISCOVERY_TAIL_MS).min(remaining);
        tokio::time::sleep(tail).await;
        self.modules().await
    }

    /// Fetches one event's action list.
    /// Timeout 5s, retried once. Returns `(actions, failed)`: `failed=true`
    /// on a missing/non-string `ACTIONSTRING` or exhausted retries — this
    /// two-valued return lets `fetch_module_config` tell "genuinely empty
    /// binding" from "communication glitch".
    pub async fn fetch_event_config(
        &self,
        position: Position,
        page: u8,
        element: u8,
        event_type: u8,
    ) -> (Vec<Action>, bool) {
        match self
            .fetch_event_config_inner(position, page, element, event_type)
            .await
        {
            Ok(actions) => (actions, false),
            Err(_) => (Vec::new(), true),
        }
    }

    async fn fetch_event_config_inner(
        &self,
        position: Position,
        page: u8,
        element: u8,
        event_type: u8,
    ) -> Result<Vec<Action>, GridError> {
        retry_on_timeout(1, || async {
            let descriptor = Descriptor::new(position.dx, position.dy, "CONFIG", Instruction::Fetch)
                .with_param("VERSIONMAJOR", PROTOCOL_VERSION.0 as i64)
                .with_param("VERSIONMINOR", PROTOCOL_VERSION.1 as i64)
                .with_param("VERSIONPATCH", PROTOCOL_VERSION.2 as i64)
                .with_param("PAGENUMBER", page as i64)
                .with_param("ELEMENTNUMBER", element as i64)
                .with_param("EVENTTYPE", event_type as i64)
                .with_param("ACTIONLENGTH", 0i64);
            self.send(&descriptor).await?;

            let filter = Filter::new()
                .class("CONFIG")
                .instruction(Instruction::Report)
                .param("PAGENUMBER", page as i64)
                .param("ELEMENTNUMBER", element as i64)
                .param("EVENTTYPE", event_type as i64);
            let message = self
                .correlator
                .wait_for(filter, FETCH_TIMEOUT_MS)
                .await?;

            let raw = message
                .param("ACTIONSTRING")
                .and_then(|v| v.as_str())
                .ok_or_else(|| GridError::protocol("missing or non-string ACTIONSTRING"))?;
            let unwrapped = unwrap_lua(raw)?;
            parse_action_stream(unwrapped)
        })
        .await
    }

    /// Fetches a module's full configuration across the filtered page set
    ///. Aborts with `ProtocolUnstable` once
    /// failed fetches exceed `max(5, floor(0.1 * total))`.
    pub async fn fetch_module_config(
        &self,
        module: &ModuleInfo,
        include_pages: Option<&BTreeSet<u8>>,
        exclude_pages: Option<&BTreeSet<u8>>,
        mut progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<ModuleConfig, GridError> {
        let pages = shared::pagelist::resolve_page_filter(include_pages, exclude_pages)?;
        let element_type = element_type_for_module(&module.type_name);
        let events = element_type.supported_events();
        let total = pages.len() * module.element_count * events.len();
        let threshold = (total as f64 * 0.1).floor().max(5.0) as usize;

        let mut failed_count = 0usize;
        let mut completed = 0usize;
        let mut page_configs = Vec::new();
        for &page in &pages {
            let mut event_configs = Vec::new();
            for element in 0..module.element_count as u8 {
                for &event_type in events {
                    let (actions, failed) = self
                        .fetch_event_config(module.position, page, element, event_type.code())
                        .await;
                    if failed {
                        failed_count += 1;
                        if failed_count > threshold {
                            return Err(GridError::ProtocolUnstable(format!(
                                "{failed_count} fetch failures exceeded threshold {threshold}"
                            )));
                        }
                    }
                    completed += 1;
                    if let Some(progress) = progress.as_mut() {
                        progress(completed, total);
                    }
                    event_configs.push(EventConfig {
                        element,
                        event_type: event_type.code(),
                        actions,
                    });
                }
            }
            page_configs.push(PageConfig {
                page,
                events: event_configs,
            });
        }

        Ok(ModuleConfig {
            module: module.clone(),
            pages: page_configs,
        })
    }

    /// Sends one event's action list. Validates
    /// the wrapped `ACTIONSTRING`'s UTF-8 byte length against
    /// `CONFIG_LENGTH`. Timeout 10s, retried up to twice.
    pub async fn send_event_config(
        &self,
        position: Position,
        page: u8,
        event: &EventConfig,
        transpiler: &dyn crate::script::ScriptTranspiler,
    ) -> Result<(), GridError> {
        let wire = format_action_stream(&event.actions, transpiler);
        let wrapped = wrap_lua(&wire);
        if wrapped.len() > CONFIG_LENGTH {
            return Err(GridError::protocol(format!(
                "ACTIONSTRING {} bytes exceeds CONFIG_LENGTH {CONFIG_LENGTH}",
                wrapped.len()
            )));
        }

        retry_on_timeout(2, || async {
            let descriptor = Descriptor::new(position.dx, position.dy, "CONFIG", Instruction::Execute)
                .with_param("VERSIONMAJOR", PROTOCOL_VERSION.0 as i64)
                .with_param("VERSIONMINOR", PROTOCOL_VERSION.1 as i64)
                .with_param("VERSIONPATCH", PROTOCOL_VERSION.2 as i64)
                .with_param("PAGENUMBER", page as i64)
                .with_param("ELEMENTNUMBER", event.element as i64)
                .with_param("EVENTTYPE", event.event_type as i64)
                .with_param("ACTIONSTRING", wrapped.clone())
                .with_param("ACTIONLENGTH", wrapped.len() as i64);
            self.send(&descriptor).await?;

            let filter = Filter::new()
                .class("CONFIG")
                .instruction(Instruction::Acknowledge)
                .param("PAGENUMBER", page as i64)
                .param("ELEMENTNUMBER", event.element as i64)
                .param("EVENTTYPE", event.event_type as i64);
            self.correlator.wait_for(filter, SEND_TIMEOUT_MS).await?;
            Ok(())
        })
        .await
    }

    /// Pushes a full module configuration.
    /// Uses `target.position` rather than `config.module.position` as the
    /// addressing `(dx,dy)` when supplied, enabling push-by-position-match.
    /// Page switches are fully confirmed before any EXECUTE for that page is
    /// issued; a 30 ms pacing delay separates successive EXECUTEs.
    pub async fn send_module_config(
        &self,
        config: &ModuleConfig,
        target: Option<&ModuleInfo>,
        transpiler: &dyn crate::script::ScriptTranspiler,
    ) -> Result<(), GridError> {
        let addressing = target.unwrap_or(&config.module);
        let position = addressing.position;

        for page in &config.pages {
            let current = self.active_page.read().await.get(&position).copied();
            if current != Some(page.page) {
                let confirmed = self.change_page(page.page, Some(addressing)).await?;
                if !confirmed {
                    return Err(GridError::protocol(format!(
                        "page switch to {} was not confirmed",
                        page.page
                    )));
                }
                self.active_page.write().await.insert(position, page.page);
            }

            for (index, event) in page.events.iter().enumerate() {
                self.send_event_config(position, page.page, event, transpiler)
                    .await?;
                if index + 1 < page.events.len() {
                    tokio::time::sleep(Duration::from_millis(EVENT_PACING_MS)).await;
                }
            }
        }
        Ok(())
    }

    /// Switches the active page: two rounds, each
    /// broadcasting first and then, if `module` is given, addressing it
    /// directly. If the page-change-disabled latch is set and `n > 0`,
    /// attempts `store_to_flash` first and clears the latch only on success.
    /// Returns whether any attempt confirmed; the caller decides fatality.
    pub async fn change_page(&self, n: u8, module: Option<&ModuleInfo>) -> Result<bool, GridError> {
        if self.page_change_disabled.load(Ordering::SeqCst) && n > 0 && self.store_to_flash().await.is_ok() {
            self.page_change_disabled.store(false, Ordering::SeqCst);
        }

        for _round in 0..2 {
            let mut addresses = vec![Position::BROADCAST];
            if let Some(module) = module {
                addresses.push(module.position);
            }
            for position in addresses {
                let descriptor =
                    Descriptor::new(position.dx, position.dy, "PAGEACTIVE", Instruction::Execute)
                        .with_param("PAGENUMBER", n as i64);
                if self.send(&descriptor).await.is_err() {
                    continue;
                }
                let filter = Filter::new()
                    .class("PAGEACTIVE")
                    .instruction(Instruction::Report)
                    .param("PAGENUMBER", n as i64);
                if self
                    .correlator
                    .wait_for(filter, PAGEACTIVE_TIMEOUT_MS)
                    .await
                    .is_ok()
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Stores the active configuration to flash.
    /// Timeout 10s, one retry. Clears the page-change-disabled latch on
    /// success.
    pub async fn store_to_flash(&self) -> Result<(), GridError> {
        retry_on_timeout(1, || async {
            let descriptor = Descriptor::new(
                Position::BROADCAST.dx,
                Position::BROADCAST.dy,
                "PAGESTORE",
                Instruction::Execute,
            );
            self.send(&descriptor).await?;
            let filter = Filter::new()
                .class("PAGESTORE")
                .instruction(Instruction::Acknowledge);
            self.correlator.wait_for(filter, PAGESTORE_TIMEOUT_MS).await?;
            Ok(())
        })
        .await?;
        self.page_change_disabled.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Erases device non-volatile memory. Timeout
    /// 15s, no retry.
    pub async fn erase_nvm(&self) -> Result<(), GridError> {
        let descriptor = Descriptor::new(
            Position::BROADCAST.dx,
            Position::BROADCAST.dy,
            "NVMERASE",
            Instruction::Execute,
        );
        self.send(&descriptor).await?;
        let filter = Filter::new()
            .class("NVMERASE")
            .instruction(Instruction::Acknowledge);
        self.correlator.wait_for(filter, NVMERASE_TIMEOUT_MS).await?;
        Ok(())
    }

    /// Closes the device: sets the closing gate, stops the editor-heartbeat
    /// task, detaches listeners, cancels every pending waiter with
    /// `Cancelled`, and releases the serial port. Shutdown never
    /// fails.
    pub async fn close(&mut self) {
        self.closing.store(true, Ordering::SeqCst);
        if let Some(task) = self.editor_heartbeat_task.take() {
            task.abort();
        }
        self.heartbeat_task.abort();
        self.debug_task.abort();
        self.correlator.cancel_all_waiters().await;
        self.correlator.shutdown();
        self.link.close().await;
    }
}

/// Builds a `ModuleInfo` from a HEARTBEAT. An invalid heartbeat (non-numeric
/// HWCFG) is dropped silently.
fn module_info_from_heartbeat(message: &packet_codec::DecodedMessage) -> Option<ModuleInfo> {
    if message.class != "HEARTBEAT" {
        return None;
    }
    let hwcfg = message.param("HWCFG").and_then(|v| v.as_f64())? as u8;
    let type_name = module_type_from_hwcfg(hwcfg);
    let firmware = Firmware {
        major: message
            .param("VMAJOR")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as u16,
        minor: message
            .param("VMINOR")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as u16,
        patch: message
            .param("VPATCH")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0) as u16,
    };
    Some(ModuleInfo {
        position: Position::new(message.sx, message.sy),
        element_count: element_count_for_type(&type_name),
        type_name,
        type_id: hwcfg,
        firmware,
    })
}

/// Element counts are not carried on the wire; modules publish their count
/// in their type name's numeric suffix (`BU16` -> 16). Unknown types (and
/// the "Unknown(raw)" fallback) have no known count.
fn element_count_for_type(type_name: &str) -> usize {
    type_name
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use packet_codec::ParamValue;
    use std::collections::BTreeMap;
    use std::sync::atomic::AtomicUsize;

    /// Property 7: a fetch that times out once then succeeds resolves
    /// successfully; one that times out twice (i.e. exhausts a
    /// single-retry budget) surfaces `Timeout`.
    #[tokio::test]
    async fn retry_on_timeout_honors_the_retry_budget() {
        let attempts = AtomicUsize::new(0);
        let result = retry_on_timeout(1, || {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(GridError::Timeout("fetch".to_string()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);

        let attempts = AtomicUsize::new(0);
        let result: Result<(), GridError> = retry_on_timeout(1, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(GridError::Timeout("fetch".to_string())) }
        })
        .await;
        assert!(matches!(result, Err(GridError::Timeout(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 2, "one retry means two total attempts");
    }

    /// Non-timeout errors surface immediately without consuming the retry
    /// budget.
    #[tokio::test]
    async fn retry_on_timeout_does_not_retry_other_errors() {
        let attempts = AtomicUsize::new(0);
        let result: Result<(), GridError> = retry_on_timeout(2, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async move { Err(GridError::protocol("bad params")) }
        })
        .await;
        assert!(matches!(result, Err(GridError::Protocol(_))));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    fn heartbeat(sx: i8, sy: i8, hwcfg: &str) -> packet_codec::DecodedMessage {
        let mut params = BTreeMap::new();
        params.insert("HWCFG".to_string(), ParamValue::String(hwcfg.to_string()));
        params.insert("VMAJOR".to_string(), ParamValue::String("1".to_string()));
        params.insert("VMINOR".to_string(), ParamValue::String("2".to_string()));
        params.insert("VPATCH".to_string(), ParamValue::String("3".to_string()));
        packet_codec::DecodedMessage {
            sx,
            sy,
            class: "HEARTBEAT".to_string(),
            instruction: Instruction::Report,
            params,
        }
    }

    #[test]
    fn heartbeat_yields_module_info() {
        let info = module_info_from_heartbeat(&heartbeat(0, 0, "1")).unwrap();
        assert_eq!(info.type_name, "BU16");
        assert_eq!(info.firmware, Firmware { major: 1, minor: 2, patch: 3 });
        assert_eq!(info.element_count, 16);
    }

    #[test]
    fn invalid_heartbeat_is_dropped() {
        let mut message = heartbeat(0, 0, "1");
        message.params.remove("HWCFG");
        assert!(module_info_from_heartbeat(&message).is_none());
    }

    #[test]
    fn non_heartbeat_message_is_ignored() {
        let mut message = heartbeat(0, 0, "1");
        message.class = "DEBUGTEXT".to_string();
        assert!(module_info_from_heartbeat(&message).is_none());
    }

    /// S2: two distinct HEARTBEATs populate an inventory keyed by position
    /// with exactly two entries, carrying the expected type names and
    /// firmware tuples.
    #[test]
    fn two_heartbeats_yield_two_distinct_inventory_entries() {
        let mut second = heartbeat(1, 0, "0");
        second.params.insert("VMAJOR".to_string(), ParamValue::String("2".to_string()));
        second.params.insert("VMINOR".to_string(), ParamValue::String("0".to_string()));
        second.params.insert("VPATCH".to_string(), ParamValue::String("5".to_string()));

        let mut modules: HashMap<Position, ModuleInfo> = HashMap::new();
        for message in [heartbeat(0, 0, "1"), second] {
            let info = module_info_from_heartbeat(&message).unwrap();
            modules.insert(info.position, info);
        }

        assert_eq!(modules.len(), 2);
        let bu16 = &modules[&Position::new(0, 0)];
        assert_eq!(bu16.type_name, "BU16");
        assert_eq!(bu16.firmware, Firmware { major: 1, minor: 2, patch: 3 });
        let po16 = &modules[&Position::new(1, 0)];
        assert_eq!(po16.type_name, "PO16");
        assert_eq!(po16.firmware, Firmware { major: 2, minor: 0, patch: 5 });
    }
}
