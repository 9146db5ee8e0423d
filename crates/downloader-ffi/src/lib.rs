use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use downloader_core::channel::{MethodChannel, encode_event, encode_reply};
use downloader_core::config::DownloaderConfig;
use downloader_core::logging::init_tracing;
use downloader_core::models::{CoreError, CoreErrorKind, TaskId, TransferSessionId};
use downloader_core::orchestration::{TaskEvent, TransferScheduler};
use downloader_core::persistence::{SqliteTaskRepository, TaskStore};
use downloader_core::registry::TaskRegistry;
use downloader_core::sqlite::SqliteRowStore;
use downloader_core::transfer::{
    TransferBackend, TransferEvent, TransferEventSink, TransferRequest, TransferResult,
    transfer_error_for,
};
use lazy_static::lazy_static;
use serde::Serialize;
use tokio::sync::broadcast;

/// Size of the buffer handed to the transfer callback for the session id
/// (or the failure reason).
const REPLY_BUFFER_LEN: usize = 512;

/// Executes one transfer command.
///
/// `command_json` is a NUL-terminated JSON object tagged by `"command"`
/// (`start`, `resume`, `pause`, `cancel`). The callee writes a NUL-terminated
/// string of at most `reply_len` bytes into `reply`: the native session id
/// for `start`/`resume` on success, or a failure reason when returning false.
/// The callback must not call back into `dl_call`.
pub type TransferCallback =
    extern "C" fn(command_json: *const c_char, reply: *mut c_char, reply_len: usize) -> bool;

/// Receives every task event as a NUL-terminated JSON object. The pointer is
/// only valid for the duration of the call. Runs on a dedicated delivery
/// thread, so it may call `dl_call`.
pub type EventCallback = extern "C" fn(event_json: *const c_char);

struct DownloaderState {
    channel: MethodChannel,
    runtime: tokio::runtime::Runtime,
}

lazy_static! {
    static ref STATE: Mutex<Option<DownloaderState>> = Mutex::new(None);
    // Separate from STATE: transfer callbacks fired during `dl_init` may
    // report events while STATE is still locked.
    static ref SINK: Mutex<Option<TransferEventSink>> = Mutex::new(None);
    static ref EVENT_CALLBACK: Mutex<Option<EventCallback>> = Mutex::new(None);
}

#[derive(Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum TransferCommand<'a> {
    Start { request: &'a TransferRequest },
    Resume { request: &'a TransferRequest },
    Pause { session: &'a TransferSessionId },
    Cancel { session: &'a TransferSessionId },
}

impl TransferCommand<'_> {
    fn name(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start",
            Self::Resume { .. } => "resume",
            Self::Pause { .. } => "pause",
            Self::Cancel { .. } => "cancel",
        }
    }
}

/// Forwards transfer commands to the host's native download layer.
struct HostTransferBackend {
    callback: TransferCallback,
}

impl HostTransferBackend {
    fn send(
        &self,
        task_id: Option<TaskId>,
        command: &TransferCommand<'_>,
    ) -> TransferResult<String> {
        let json = serde_json::to_string(command).map_err(|error| {
            transfer_error_for(task_id, format!("failed to encode transfer command: {error}"))
        })?;
        let json = CString::new(json).map_err(|_| {
            transfer_error_for(task_id, "transfer command contains an interior NUL byte")
        })?;

        let mut reply = vec![0 as c_char; REPLY_BUFFER_LEN];
        let accepted = (self.callback)(json.as_ptr(), reply.as_mut_ptr(), reply.len());
        // Guarantee termination even if the host filled the whole buffer.
        if let Some(last) = reply.last_mut() {
            *last = 0;
        }
        let reply = unsafe { CStr::from_ptr(reply.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        if accepted {
            Ok(reply)
        } else if reply.is_empty() {
            Err(transfer_error_for(
                task_id,
                format!("native layer rejected '{}'", command.name()),
            ))
        } else {
            Err(transfer_error_for(task_id, reply))
        }
    }

    fn open_session(
        &self,
        request: &TransferRequest,
        command: TransferCommand<'_>,
    ) -> TransferResult<TransferSessionId> {
        let session = self.send(Some(request.task_id), &command)?;
        if session.trim().is_empty() {
            return Err(transfer_error_for(
                Some(request.task_id),
                format!("native layer returned no session for '{}'", command.name()),
            ));
        }
        Ok(TransferSessionId::new(session))
    }
}

impl TransferBackend for HostTransferBackend {
    fn start(&self, request: &TransferRequest) -> TransferResult<TransferSessionId> {
        self.open_session(request, TransferCommand::Start { request })
    }

    fn resume(&self, request: &TransferRequest) -> TransferResult<TransferSessionId> {
        self.open_session(request, TransferCommand::Resume { request })
    }

    // The scheduler attributes control errors to the task it acted on.
    fn pause(&self, session: &TransferSessionId) -> TransferResult<()> {
        self.send(None, &TransferCommand::Pause { session })
            .map(|_| ())
    }

    fn cancel(&self, session: &TransferSessionId) -> TransferResult<()> {
        self.send(None, &TransferCommand::Cancel { session })
            .map(|_| ())
    }
}

fn on_runtime_thread() -> bool {
    tokio::runtime::Handle::try_current().is_ok()
}

unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

fn into_c_string(value: String) -> *mut c_char {
    match CString::new(value) {
        Ok(c) => c.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Initialize the downloader: open (and migrate) the task database under
/// `app_data_dir`, repair interrupted transfers and start admitting queued
/// tasks.
///
/// Returns true if the downloader is ready, including when it was already
/// initialized.
///
/// # Safety
///
/// `app_data_dir` must be a valid, non-null pointer to a NUL-terminated UTF-8
/// C string. `config_json` must be null or such a string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dl_init(
    app_data_dir: *const c_char,
    config_json: *const c_char,
    transfer_callback: TransferCallback,
) -> bool {
    if on_runtime_thread() {
        tracing::error!("dl_init called from a downloader runtime thread");
        return false;
    }
    let mut guard = STATE.lock().unwrap_or_else(PoisonError::into_inner);
    if guard.is_some() {
        return true;
    }

    let Some(app_data_dir) = (unsafe { read_str(app_data_dir) }) else {
        return false;
    };
    let raw_config = if config_json.is_null() {
        ""
    } else {
        match unsafe { read_str(config_json) } {
            Some(raw) => raw,
            None => return false,
        }
    };

    init_tracing();

    let config = match DownloaderConfig::from_json(raw_config) {
        Ok(config) => config.with_env_overrides(),
        Err(error) => {
            tracing::error!(message = %error.message, "invalid downloader config");
            return false;
        }
    };
    if let Err(error) = config.validate() {
        tracing::error!(message = %error.message, "invalid downloader config");
        return false;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(error = %error, "failed to create tokio runtime");
            return false;
        }
    };

    let database_path = config.database_path(&PathBuf::from(app_data_dir));
    let opened = SqliteRowStore::open_with_busy_timeout(database_path.clone(), config.busy_timeout());
    let store = match opened {
        Ok(store) => Arc::new(store),
        Err(error) => {
            tracing::error!(
                path = %database_path.display(),
                kind = ?error.kind,
                message = %error.message,
                "failed to open task database"
            );
            return false;
        }
    };
    let repository = SqliteTaskRepository::new(store);
    if let Err(error) = repository.ensure_schema() {
        tracing::error!(kind = ?error.kind, message = %error.message, "failed to migrate task database");
        return false;
    }

    let backend = Arc::new(HostTransferBackend {
        callback: transfer_callback,
    });
    let scheduler = match TransferScheduler::new(
        Arc::new(repository),
        TaskRegistry::new(),
        backend,
        config.scheduler_options(),
    ) {
        Ok(scheduler) => Arc::new(scheduler),
        Err(error) => {
            tracing::error!(message = %error.message, "failed to create transfer scheduler");
            return false;
        }
    };

    // Subscribe before reconciling so the host sees the repair events.
    let events = scheduler.subscribe();
    let (sink, receiver) = TransferEventSink::channel();
    if let Err(error) = std::thread::Builder::new()
        .name("downloader-events".to_string())
        .spawn(move || deliver_events(events))
    {
        tracing::error!(error = %error, "failed to start event delivery thread");
        return false;
    }
    {
        let _enter = runtime.enter();
        scheduler.spawn_event_loop(receiver);
    }
    *SINK.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);

    if let Err(error) = runtime.block_on(scheduler.reconcile()) {
        tracing::error!(kind = ?error.kind, message = %error.message, "startup reconciliation failed");
        *SINK.lock().unwrap_or_else(PoisonError::into_inner) = None;
        return false;
    }

    *guard = Some(DownloaderState {
        channel: MethodChannel::new(scheduler),
        runtime,
    });
    true
}

/// Hands task events to the host callback outside the tokio runtime.
fn deliver_events(mut events: broadcast::Receiver<TaskEvent>) {
    loop {
        match events.blocking_recv() {
            Ok(event) => {
                let callback = *EVENT_CALLBACK
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                let Some(callback) = callback else {
                    continue;
                };
                let Some(json) = encode_event(&event).and_then(|json| CString::new(json).ok())
                else {
                    continue;
                };
                callback(json.as_ptr());
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "host event callback lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

/// Run one method call (`{"method": ..., "args": ...}`) and return the JSON
/// reply. Returns null only if the downloader is not initialized.
///
/// # Safety
///
/// `request_json` must be a valid, non-null pointer to a NUL-terminated UTF-8
/// C string.
///
/// Called from inside a transfer callback it cannot block on the runtime
/// that issued the command and replies with an `internal` error instead.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dl_call(request_json: *const c_char) -> *mut c_char {
    if on_runtime_thread() {
        return into_c_string(encode_reply(Err(CoreError::new(
            CoreErrorKind::Internal,
            "dl_call cannot run on a downloader runtime thread",
        ))));
    }
    let (channel, handle) = {
        let guard = STATE.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(state) = guard.as_ref() else {
            return std::ptr::null_mut();
        };
        (state.channel.clone(), state.runtime.handle().clone())
    };

    let Some(request) = (unsafe { read_str(request_json) }) else {
        return into_c_string(encode_reply(Err(CoreError::new(
            CoreErrorKind::InvalidInput,
            "request is not a UTF-8 string",
        ))));
    };
    into_c_string(handle.block_on(channel.handle_json(request)))
}

/// Report a native transfer callback (`{"type": "progress", "session": ..,
/// "percent": ..}` and friends). Safe to call from any thread, including from
/// inside a transfer callback.
///
/// # Safety
///
/// `event_json` must be a valid, non-null pointer to a NUL-terminated UTF-8
/// C string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dl_report_transfer_event(event_json: *const c_char) -> bool {
    let Some(raw) = (unsafe { read_str(event_json) }) else {
        return false;
    };
    let event: TransferEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(error) => {
            tracing::warn!(error = %error, "ignored malformed transfer event");
            return false;
        }
    };

    let guard = SINK.lock().unwrap_or_else(PoisonError::into_inner);
    match guard.as_ref() {
        Some(sink) => sink.report(event),
        None => false,
    }
}

/// Register (or with null, clear) the callback that receives task events.
#[unsafe(no_mangle)]
pub extern "C" fn dl_register_event_callback(callback: Option<EventCallback>) {
    *EVENT_CALLBACK
        .lock()
        .unwrap_or_else(PoisonError::into_inner) = callback;
}

/// Free a string previously returned by a `dl_*` function.
///
/// # Safety
///
/// `s` must be a pointer previously returned by a `dl_*` function, or null.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn dl_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    unsafe {
        let _ = CString::from_raw(s);
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::{CStr, CString};
    use std::os::raw::c_char;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

    use downloader_core::models::{TaskHeaders, TaskId, TransferSessionId};
    use downloader_core::transfer::{TransferBackend, TransferRequest};
    use serde_json::{Value, json};

    use super::{
        HostTransferBackend, TransferCommand, dl_call, dl_free_string, dl_init,
        dl_register_event_callback, dl_report_transfer_event,
    };

    static ISSUED_SESSIONS: AtomicU64 = AtomicU64::new(0);
    static TRANSFER_CALLBACK_REPLIES: Mutex<Vec<String>> = Mutex::new(Vec::new());
    static DELIVERED_EVENTS: Mutex<Vec<(String, String)>> = Mutex::new(Vec::new());

    fn call(request: &str) -> String {
        let request = CString::new(request).expect("request has no NUL");
        let reply = unsafe { dl_call(request.as_ptr()) };
        assert!(!reply.is_null(), "downloader is initialized");
        let text = unsafe { CStr::from_ptr(reply) }
            .to_string_lossy()
            .into_owned();
        unsafe { dl_free_string(reply) };
        text
    }

    extern "C" fn host_transfer(
        command: *const c_char,
        reply: *mut c_char,
        reply_len: usize,
    ) -> bool {
        TRANSFER_CALLBACK_REPLIES
            .lock()
            .expect("replies lock")
            .push(call(r#"{"method":"loadTasks","args":{}}"#));

        let command = unsafe { CStr::from_ptr(command) }.to_string_lossy();
        if command.contains(r#""command":"start""#) || command.contains(r#""command":"resume""#) {
            let session = format!(
                "host-session-{}\0",
                ISSUED_SESSIONS.fetch_add(1, Ordering::SeqCst) + 1
            );
            assert!(session.len() <= reply_len);
            unsafe {
                std::ptr::copy_nonoverlapping(session.as_ptr().cast(), reply, session.len());
            }
        }
        true
    }

    extern "C" fn host_event(event_json: *const c_char) {
        let event = unsafe { CStr::from_ptr(event_json) }
            .to_string_lossy()
            .into_owned();
        let tasks = call(r#"{"method":"loadTasks","args":{}}"#);
        DELIVERED_EVENTS
            .lock()
            .expect("events lock")
            .push((event, tasks));
    }

    // The only test touching the process-wide bridge state.
    #[test]
    fn host_callbacks_can_reenter_the_bridge() {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before unix epoch")
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("downloader-ffi-{nanos}"));
        let dir_arg = CString::new(dir.to_string_lossy().into_owned()).expect("dir path");
        let config = CString::new(r#"{"concurrency_limit": 1, "progress_step": 0}"#)
            .expect("config json");

        assert!(unsafe { dl_init(dir_arg.as_ptr(), config.as_ptr(), host_transfer) });
        assert!(unsafe { dl_init(dir_arg.as_ptr(), std::ptr::null(), host_transfer) });
        dl_register_event_callback(Some(host_event));

        let reply: Value = serde_json::from_str(&call(
            r#"{"method":"enqueue","args":{"url":"https://example.com/a.bin","saved_dir":"/tmp","file_name":"a.bin"}}"#,
        ))
        .expect("enqueue reply is json");
        assert_eq!(reply["ok"]["status"], "RUNNING");
        let session = reply["ok"]["native_session_id"]
            .as_str()
            .expect("running task has a session")
            .to_string();

        let from_transfer_callback = TRANSFER_CALLBACK_REPLIES
            .lock()
            .expect("replies lock")
            .clone();
        assert!(!from_transfer_callback.is_empty());
        for reply in &from_transfer_callback {
            let reply: Value = serde_json::from_str(reply).expect("reply is json");
            assert_eq!(reply["error"]["kind"], "internal");
        }

        let malformed = CString::new(r#"{"type":"teleport"}"#).expect("event json");
        assert!(!unsafe { dl_report_transfer_event(malformed.as_ptr()) });
        let complete = CString::new(json!({"type": "complete", "session": session}).to_string())
            .expect("event json");
        assert!(unsafe { dl_report_transfer_event(complete.as_ptr()) });

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let delivered = DELIVERED_EVENTS.lock().expect("events lock").clone();
            if let Some((_, tasks)) = delivered
                .iter()
                .find(|(event, _)| event.contains(r#""status":"COMPLETE""#))
            {
                let tasks: Value = serde_json::from_str(tasks).expect("tasks reply is json");
                assert_eq!(tasks["ok"][0]["status"], "COMPLETE");
                break;
            }
            assert!(Instant::now() < deadline, "completion never reached the host");
            std::thread::sleep(Duration::from_millis(10));
        }

        dl_register_event_callback(None);
        let _ = std::fs::remove_dir_all(&dir);
    }

    extern "C" fn accept_with_session(
        _command: *const std::os::raw::c_char,
        reply: *mut std::os::raw::c_char,
        reply_len: usize,
    ) -> bool {
        let session = b"host-7\0";
        assert!(reply_len >= session.len());
        unsafe {
            std::ptr::copy_nonoverlapping(session.as_ptr().cast(), reply, session.len());
        }
        true
    }

    extern "C" fn reject_with_reason(
        _command: *const std::os::raw::c_char,
        reply: *mut std::os::raw::c_char,
        _reply_len: usize,
    ) -> bool {
        let reason = b"no network\0";
        unsafe {
            std::ptr::copy_nonoverlapping(reason.as_ptr().cast(), reply, reason.len());
        }
        false
    }

    fn request() -> TransferRequest {
        TransferRequest {
            task_id: TaskId(7),
            url: "https://example.com/a".to_string(),
            saved_dir: "/tmp".to_string(),
            filename: Some("a".to_string()),
            headers: TaskHeaders::new(),
            allow_cellular: true,
            save_in_public_storage: false,
            requires_storage_access: false,
            show_notification: false,
            resume: false,
        }
    }

    #[test]
    fn start_returns_session_written_by_host() {
        let backend = HostTransferBackend {
            callback: accept_with_session,
        };
        let session = backend.start(&request()).expect("start accepted");
        assert_eq!(session, TransferSessionId::new("host-7"));
        assert!(backend.cancel(&session).is_ok());
    }

    #[test]
    fn rejection_carries_host_reason() {
        let backend = HostTransferBackend {
            callback: reject_with_reason,
        };
        let error = backend.start(&request()).expect_err("start rejected");
        assert_eq!(error.task, Some(TaskId(7)));
        assert_eq!(error.message, "no network");
    }

    #[test]
    fn commands_encode_with_command_tag() {
        let session = TransferSessionId::new("s-1");
        let encoded = serde_json::to_value(TransferCommand::Pause { session: &session })
            .expect("encode");
        assert_eq!(encoded, serde_json::json!({"command": "pause", "session": "s-1"}));

        let request = request();
        let encoded =
            serde_json::to_value(TransferCommand::Start { request: &request }).expect("encode");
        assert_eq!(encoded["command"], "start");
        assert_eq!(encoded["request"]["task_id"], 7);
        assert_eq!(encoded["request"]["resume"], false);
    }
}
