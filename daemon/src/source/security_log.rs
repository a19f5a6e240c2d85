/// Process start/exit notifications from the Windows Security event log.
///
/// Subscribes to future 4688 ("A new process has been created") and 4689
/// ("A process has exited") records. Each record is rendered with
/// `EvtRenderEventValues`: a system render context yields the event id and a
/// user render context yields the `EventData` values, read by position:
///
/// | event | pid field | image path field |
/// |-------|-----------|------------------|
/// | 4688  | 4 `NewProcessId` | 5 `NewProcessName` |
/// | 4689  | 5 `ProcessId`    | 6 `ProcessName`    |
///
/// Reading the Security log requires an elevated process and the
/// "Audit Process Creation / Termination" policies to be enabled.
use std::sync::Arc;
use tracing::{debug, info};

use super::{EventSource, Subscription};
use crate::channel::EventSender;
use crate::error::SourceError;
use crate::event::{
    ProcessEvent, ProcessEventKind, ProcessFilter, PROCESS_START_EVENT_ID, PROCESS_STOP_EVENT_ID,
};
use crate::live_config::LiveConfig;

pub const CHANNEL: &str = "Security";

/// XPath filter handed to `EvtSubscribe`. Name matching happens after
/// rendering because the query language has no substring test.
pub fn query() -> String {
    format!("*[System[(EventID={PROCESS_START_EVENT_ID} or EventID={PROCESS_STOP_EVENT_ID})]]")
}

/// One `EventData` value as rendered by `EvtRenderEventValues`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(windows), allow(dead_code))]
pub enum FieldValue {
    /// Null, an array, or a type this source never reads (SIDs, GUIDs).
    Other,
    Text(String),
    Unsigned(u64),
}

/// Event id and positional `EventData` values of one rendered record.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(not(windows), allow(dead_code))]
pub struct RawRecord {
    pub event_id: u32,
    pub fields: Vec<FieldValue>,
}

/// Turns a record into a [`ProcessEvent`] for the watched process.
///
/// Returns `None` for records about other processes and for records too short
/// for their layout. Unknown event ids pass through as
/// [`ProcessEventKind::Unsupported`] so the tracker can report them.
pub fn to_process_event(record: &RawRecord, filter: &ProcessFilter) -> Option<ProcessEvent> {
    let kind = ProcessEventKind::from_event_id(record.event_id);
    let (pid_at, name_at) = match kind {
        ProcessEventKind::Started => (4, 5),
        ProcessEventKind::Stopped => (5, 6),
        ProcessEventKind::Unsupported(_) => {
            return Some(ProcessEvent {
                kind,
                process_id: 0,
                process_name: String::new(),
            })
        }
    };

    let (Some(raw_pid), Some(name)) = (record.fields.get(pid_at), record.fields.get(name_at)) else {
        debug!(
            event_id = record.event_id,
            fields = record.fields.len(),
            "discarding short security record"
        );
        return None;
    };
    let FieldValue::Text(name) = name else {
        debug!(event_id = record.event_id, "discarding record without an image name");
        return None;
    };
    if !filter.matches(name) {
        return None;
    }
    let Some(process_id) = pid(raw_pid) else {
        debug!(event_id = record.event_id, raw_pid = ?raw_pid, "discarding record with bad pid");
        return None;
    };

    Some(ProcessEvent {
        kind,
        process_id,
        process_name: name.clone(),
    })
}

fn pid(value: &FieldValue) -> Option<u32> {
    match value {
        FieldValue::Unsigned(n) => u32::try_from(*n).ok(),
        FieldValue::Text(raw) => parse_pid(raw),
        FieldValue::Other => None,
    }
}

/// Parses a pid written as text ("0x1a2c"), or plain decimal.
fn parse_pid(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

/// Pushes the event for one rendered record, if it concerns the watched
/// process. Returns `true` when an event was queued.
#[cfg_attr(not(windows), allow(dead_code))]
fn deliver(record: &RawRecord, sink: &EventSender, live: &LiveConfig) -> bool {
    let settings = live.snapshot();
    let filter = ProcessFilter::new(&settings.process_monitor.process_name);
    match to_process_event(record, &filter) {
        Some(event) => sink.push(event),
        None => false,
    }
}

pub struct SecurityLogSource {
    live: Arc<LiveConfig>,
}

impl SecurityLogSource {
    pub fn new(live: Arc<LiveConfig>) -> Self {
        Self { live }
    }
}

impl EventSource for SecurityLogSource {
    fn subscribe(&mut self, sink: EventSender) -> Result<Subscription, SourceError> {
        let handle = imp::subscribe(sink, Arc::clone(&self.live))?;
        info!(channel = CHANNEL, query = %query(), "subscribed to security event log");
        Ok(Subscription::new(move || handle.close()))
    }
}

// ── Windows implementation ────────────────────────────────────────────────────

#[cfg(windows)]
mod imp {
    use std::ffi::c_void;
    use std::sync::Arc;
    use tracing::{debug, warn};

    use windows::core::HSTRING;
    use windows::Win32::Foundation::{ERROR_INSUFFICIENT_BUFFER, HANDLE};
    use windows::Win32::System::EventLog::{
        EvtClose, EvtCreateRenderContext, EvtRender, EvtRenderContextSystem,
        EvtRenderContextUser, EvtRenderEventValues, EvtSubscribe, EvtSubscribeActionDeliver,
        EvtSubscribeActionError, EvtSubscribeToFutureEvents, EvtSystemEventID, EvtVarTypeByte,
        EvtVarTypeHexInt32, EvtVarTypeHexInt64, EvtVarTypeSizeT, EvtVarTypeString,
        EvtVarTypeUInt16, EvtVarTypeUInt32, EvtVarTypeUInt64, EVT_HANDLE,
        EVT_SUBSCRIBE_NOTIFY_ACTION, EVT_VARIANT, EVT_VARIANT_TYPE_ARRAY, EVT_VARIANT_TYPE_MASK,
    };

    use super::{FieldValue, RawRecord};
    use crate::channel::EventSender;
    use crate::error::SourceError;
    use crate::live_config::LiveConfig;

    /// Owned by the subscription; borrowed by every callback invocation.
    struct CallbackContext {
        sink: EventSender,
        live: Arc<LiveConfig>,
        /// Renders `System` properties; indexed by `EVT_SYSTEM_PROPERTY_ID`.
        system: EVT_HANDLE,
        /// Renders `EventData` values in template order.
        user: EVT_HANDLE,
    }

    impl Drop for CallbackContext {
        fn drop(&mut self) {
            unsafe {
                let _ = EvtClose(self.system);
                let _ = EvtClose(self.user);
            }
        }
    }

    pub struct Handle {
        subscription: EVT_HANDLE,
        context: *mut CallbackContext,
    }

    // The context is only freed in `close`, after the subscription handle (and
    // with it every pending callback) is gone.
    unsafe impl Send for Handle {}

    impl Handle {
        pub fn close(self) {
            unsafe {
                let _ = EvtClose(self.subscription);
                drop(Box::from_raw(self.context));
            }
        }
    }

    fn subscribe_error(e: windows::core::Error) -> SourceError {
        SourceError::Subscribe {
            code: e.code().0,
            message: e.message().to_string(),
        }
    }

    pub fn subscribe(sink: EventSender, live: Arc<LiveConfig>) -> Result<Handle, SourceError> {
        let system = unsafe { EvtCreateRenderContext(None, EvtRenderContextSystem.0 as u32) }
            .map_err(subscribe_error)?;
        let user = match unsafe { EvtCreateRenderContext(None, EvtRenderContextUser.0 as u32) } {
            Ok(user) => user,
            Err(e) => {
                unsafe {
                    let _ = EvtClose(system);
                }
                return Err(subscribe_error(e));
            }
        };

        let context = Box::into_raw(Box::new(CallbackContext {
            sink,
            live,
            system,
            user,
        }));
        let channel = HSTRING::from(super::CHANNEL);
        let query = HSTRING::from(super::query());

        let result = unsafe {
            EvtSubscribe(
                EVT_HANDLE::default(),
                HANDLE::default(),
                &channel,
                &query,
                EVT_HANDLE::default(),
                Some(context as *const c_void),
                Some(callback),
                EvtSubscribeToFutureEvents.0 as u32,
            )
        };

        match result {
            Ok(subscription) => Ok(Handle {
                subscription,
                context,
            }),
            Err(e) => {
                unsafe { drop(Box::from_raw(context)) };
                Err(subscribe_error(e))
            }
        }
    }

    /// Runs on a Windows thread-pool thread for every delivered record.
    unsafe extern "system" fn callback(
        action: EVT_SUBSCRIBE_NOTIFY_ACTION,
        context: *const c_void,
        event: EVT_HANDLE,
    ) -> u32 {
        let ctx = &*(context as *const CallbackContext);
        if action == EvtSubscribeActionError {
            // On error the "event" handle carries the Win32 error code.
            warn!(code = event.0 as u32, "security log subscription reported an error");
        } else if action == EvtSubscribeActionDeliver {
            match read_record(ctx, event) {
                Some(record) => {
                    super::deliver(&record, &ctx.sink, &ctx.live);
                }
                None => debug!("failed to render security record"),
            }
        }
        0
    }

    unsafe fn read_record(ctx: &CallbackContext, event: EVT_HANDLE) -> Option<RawRecord> {
        let system = render_values(ctx.system, event)?;
        let event_id = match system.get(EvtSystemEventID.0 as usize)? {
            FieldValue::Unsigned(id) => u32::try_from(*id).ok()?,
            _ => return None,
        };
        let fields = render_values(ctx.user, event)?;
        Some(RawRecord { event_id, fields })
    }

    unsafe fn render_values(context: EVT_HANDLE, event: EVT_HANDLE) -> Option<Vec<FieldValue>> {
        let flags = EvtRenderEventValues.0 as u32;
        let mut used = 0u32;
        let mut count = 0u32;

        // First call only sizes the buffer.
        if let Err(e) = EvtRender(context, event, flags, 0, None, &mut used, &mut count) {
            if e.code() != ERROR_INSUFFICIENT_BUFFER.to_hresult() {
                return None;
            }
        }

        // u64 storage keeps the EVT_VARIANT array aligned; strings follow it.
        let mut buffer = vec![0u64; (used as usize).div_ceil(8)];
        EvtRender(
            context,
            event,
            flags,
            (buffer.len() * 8) as u32,
            Some(buffer.as_mut_ptr() as *mut c_void),
            &mut used,
            &mut count,
        )
        .ok()?;

        let values =
            std::slice::from_raw_parts(buffer.as_ptr() as *const EVT_VARIANT, count as usize);
        Some(values.iter().map(|v| field_value(v)).collect())
    }

    unsafe fn field_value(v: &EVT_VARIANT) -> FieldValue {
        if v.Type & EVT_VARIANT_TYPE_ARRAY as u32 != 0 {
            return FieldValue::Other;
        }
        let ty = v.Type & EVT_VARIANT_TYPE_MASK as u32;
        let value = &v.Anonymous;
        match ty {
            t if t == EvtVarTypeString.0 as u32 => {
                if value.StringVal.is_null() {
                    FieldValue::Other
                } else {
                    value.StringVal.to_string().map_or(FieldValue::Other, FieldValue::Text)
                }
            }
            t if t == EvtVarTypeByte.0 as u32 => FieldValue::Unsigned(u64::from(value.ByteVal)),
            t if t == EvtVarTypeUInt16.0 as u32 => FieldValue::Unsigned(u64::from(value.UInt16Val)),
            t if t == EvtVarTypeUInt32.0 as u32 || t == EvtVarTypeHexInt32.0 as u32 => {
                FieldValue::Unsigned(u64::from(value.UInt32Val))
            }
            t if t == EvtVarTypeUInt64.0 as u32 || t == EvtVarTypeHexInt64.0 as u32 => {
                FieldValue::Unsigned(value.UInt64Val)
            }
            t if t == EvtVarTypeSizeT.0 as u32 => FieldValue::Unsigned(value.SizeTVal as u64),
            _ => FieldValue::Other,
        }
    }
}

#[cfg(not(windows))]
mod imp {
    use std::sync::Arc;

    use crate::channel::EventSender;
    use crate::error::SourceError;
    use crate::live_config::LiveConfig;

    pub struct Handle;

    impl Handle {
        pub fn close(self) {}
    }

    pub fn subscribe(_sink: EventSender, _live: Arc<LiveConfig>) -> Result<Handle, SourceError> {
        Err(SourceError::Unsupported("the Windows Security event log"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{event_channel, Next};
    use crate::test_support::app_settings;
    use tokio::sync::watch;

    fn text(value: &str) -> FieldValue {
        FieldValue::Text(value.to_string())
    }

    /// A 4688 record laid out the way the Security log template orders it.
    fn start_record(image: &str) -> RawRecord {
        RawRecord {
            event_id: 4688,
            fields: vec![
                FieldValue::Other, // SubjectUserSid
                text("HOST$"),
                text("WORKGROUP"),
                FieldValue::Unsigned(0x3e7),
                FieldValue::Unsigned(0x1a2c), // NewProcessId
                text(image),                  // NewProcessName
                text("%%1936"),
                FieldValue::Unsigned(0x2f0),
                FieldValue::Other,
            ],
        }
    }

    fn stop_record(image: &str) -> RawRecord {
        RawRecord {
            event_id: 4689,
            fields: vec![
                FieldValue::Other,
                text("user"),
                text("HOST"),
                FieldValue::Unsigned(0x5a1b2),
                FieldValue::Unsigned(0), // Status
                FieldValue::Unsigned(0x1a2c),
                text(image),
            ],
        }
    }

    #[test]
    fn query_selects_start_and_exit_events() {
        assert_eq!(query(), "*[System[(EventID=4688 or EventID=4689)]]");
    }

    #[test]
    fn start_record_maps_to_started_event() {
        let event = to_process_event(&start_record(r"C:\Games\Game.exe"), &ProcessFilter::new("game.exe"));
        assert_eq!(event, Some(ProcessEvent::started(0x1a2c, r"C:\Games\Game.exe")));
    }

    #[test]
    fn stop_record_uses_its_own_layout() {
        let event = to_process_event(&stop_record(r"C:\Games\Game.exe"), &ProcessFilter::new("game.exe"));
        assert_eq!(event, Some(ProcessEvent::stopped(0x1a2c, r"C:\Games\Game.exe")));
    }

    #[test]
    fn pid_rendered_as_text_is_accepted() {
        let mut record = start_record("game.exe");
        record.fields[4] = text("0x1A2C");
        let event = to_process_event(&record, &ProcessFilter::new("game.exe")).unwrap();
        assert_eq!(event.process_id, 0x1a2c);
    }

    #[test]
    fn records_with_unusable_values_are_discarded() {
        let filter = ProcessFilter::new("game.exe");

        let mut no_name = start_record("game.exe");
        no_name.fields[5] = FieldValue::Other;
        assert_eq!(to_process_event(&no_name, &filter), None);

        let mut wide_pid = start_record("game.exe");
        wide_pid.fields[4] = FieldValue::Unsigned(u64::from(u32::MAX) + 1);
        assert_eq!(to_process_event(&wide_pid, &filter), None);
    }

    #[test]
    fn other_processes_are_filtered_out() {
        let record = start_record(r"C:\Games\Game.exe");
        assert_eq!(to_process_event(&record, &ProcessFilter::new("notepad.exe")), None);
    }

    #[test]
    fn short_records_are_discarded() {
        let record = RawRecord {
            event_id: 4689,
            fields: vec![text("S-1-5-18"); 6],
        };
        assert_eq!(to_process_event(&record, &ProcessFilter::new("game.exe")), None);
    }

    #[test]
    fn unknown_event_ids_pass_through_as_unsupported() {
        let record = RawRecord {
            event_id: 4624,
            fields: Vec::new(),
        };
        let event = to_process_event(&record, &ProcessFilter::new("game.exe")).unwrap();
        assert_eq!(event.kind, ProcessEventKind::Unsupported(4624));
    }

    #[test]
    fn pid_accepts_hex_and_decimal() {
        assert_eq!(parse_pid("0x1A2C"), Some(0x1a2c));
        assert_eq!(parse_pid(" 6700 "), Some(6700));
        assert_eq!(parse_pid("0xZZ"), None);
        assert_eq!(parse_pid(""), None);
    }

    #[tokio::test]
    async fn deliver_pushes_matching_records_only() {
        let live = LiveConfig::new(app_settings("game.exe"));
        let (tx, mut rx) = event_channel();

        assert!(deliver(&start_record(r"C:\Games\Game.exe"), &tx, &live));
        assert!(!deliver(&start_record(r"C:\Windows\notepad.exe"), &tx, &live));

        let (_stop_tx, mut stop) = watch::channel(false);
        assert_eq!(
            rx.next(&mut stop).await,
            Next::Event(ProcessEvent::started(0x1a2c, r"C:\Games\Game.exe"))
        );
        assert!(rx.drain().is_empty());
    }

    #[cfg(not(windows))]
    #[test]
    fn subscribe_is_unsupported_off_windows() {
        let live = Arc::new(LiveConfig::new(app_settings("game.exe")));
        let (tx, _rx) = event_channel();
        let result = SecurityLogSource::new(live).subscribe(tx);
        assert!(matches!(result, Err(SourceError::Unsupported(_))));
    }
}
