// C ABI for the audiofile player
//
// Sessions are addressed by NUL-terminated audio id strings. Status codes:
// 0 success, -1 error, -2 unknown or released audio id. Events are delivered
// on the control thread through the callback passed to `audiofile_init`.

use audiofile_core::{
    AudioError, Endpoint, HostCallback, MediaSource, Result, SessionEvent, SessionOptions,
    SessionState,
};
use audiofile_engine_desktop::DesktopEngineFactory;
use audiofile_session::{PlayerService, ServiceConfig};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::{Arc, Once};

pub const EVENT_LOADED: i32 = 0;
pub const EVENT_LOAD_FAILED: i32 = 1;
pub const EVENT_POSITION: i32 = 2;
pub const EVENT_COMPLETION: i32 = 3;
pub const EVENT_SEEK_COMPLETE: i32 = 4;

const CODE_OK: i32 = 0;
const CODE_ERROR: i32 = -1;
const CODE_NOT_FOUND: i32 = -2;

/// Host event callback: `(kind, audio_id, value)`. `value` carries the
/// duration for Loaded and the position for Position, 0 otherwise.
pub type AudioFileEventCallback = extern "C" fn(kind: i32, audio_id: *const c_char, value: f64);

static SERVICE: Lazy<Mutex<Option<Arc<PlayerService>>>> = Lazy::new(|| Mutex::new(None));
static INIT_LOGGER: Once = Once::new();

fn init_logging() {
    INIT_LOGGER.call_once(|| {
        #[cfg(target_os = "android")]
        {
            android_logger::init_once(
                android_logger::Config::default()
                    .with_max_level(log::LevelFilter::Debug)
                    .with_tag("AudioFilePlayer"),
            );
        }

        #[cfg(not(target_os = "android"))]
        {
            let _ = env_logger::builder()
                .is_test(false)
                .filter_level(log::LevelFilter::Info)
                .try_init();
        }
    });
}

/// Forwards session events to a C function pointer
struct CEventBridge {
    callback: AudioFileEventCallback,
}

impl HostCallback for CEventBridge {
    fn on_event(&self, event: SessionEvent) {
        let (kind, value) = event_code(&event);
        match CString::new(event.audio_id()) {
            Ok(audio_id) => (self.callback)(kind, audio_id.as_ptr(), value),
            Err(_) => log::error!("audio id contains NUL, event {:?} dropped", event),
        }
    }
}

fn event_code(event: &SessionEvent) -> (i32, f64) {
    match event {
        SessionEvent::Loaded {
            duration_seconds, ..
        } => (EVENT_LOADED, *duration_seconds),
        SessionEvent::LoadFailed { .. } => (EVENT_LOAD_FAILED, 0.0),
        SessionEvent::Position {
            position_seconds, ..
        } => (EVENT_POSITION, *position_seconds),
        SessionEvent::Completion { .. } => (EVENT_COMPLETION, 0.0),
        SessionEvent::SeekComplete { .. } => (EVENT_SEEK_COMPLETE, 0.0),
    }
}

fn state_code(state: SessionState) -> i32 {
    match state {
        SessionState::Loading => 0,
        SessionState::Ready => 1,
        SessionState::Playing => 2,
        SessionState::Paused => 3,
        SessionState::Failed => 4,
        SessionState::Released => 5,
    }
}

fn to_code(result: Result<()>) -> i32 {
    match result {
        Ok(()) => CODE_OK,
        Err(err) if err.is_not_found() => {
            log::warn!("FFI error: {}", err);
            CODE_NOT_FOUND
        }
        Err(err) => {
            log::error!("FFI error: {}", err);
            CODE_ERROR
        }
    }
}

/// Borrow a C string argument.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn c_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(AudioError::InvalidArgument(format!("{} is null", what)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| AudioError::InvalidArgument(format!("{} is not valid UTF-8", what)))
}

/// Run `f` against the running service without holding the global lock, so
/// event callbacks on the control thread never wait on it.
fn with_service<R>(f: impl FnOnce(&PlayerService) -> Result<R>) -> Result<R> {
    let service = SERVICE
        .lock()
        .clone()
        .ok_or_else(|| AudioError::InvalidState("audiofile_init has not been called".to_string()))?;
    f(&service)
}

fn with_id(audio_id: *const c_char, f: impl FnOnce(&PlayerService, &str) -> Result<()>) -> i32 {
    let result = unsafe { c_str(audio_id, "audio id") }
        .and_then(|id| with_service(|service| f(service, id)));
    to_code(result)
}

/// Start the control thread (once) and install `callback`, replacing any
/// previously registered one. Pass null to stop receiving events.
#[no_mangle]
pub extern "C" fn audiofile_init(callback: Option<AudioFileEventCallback>) -> i32 {
    init_logging();

    let service = {
        let mut slot = SERVICE.lock();
        if slot.is_none() {
            let factory = Box::new(DesktopEngineFactory::new());
            match PlayerService::start(factory, ServiceConfig::default()) {
                Ok(service) => *slot = Some(Arc::new(service)),
                Err(err) => return to_code(Err(err)),
            }
        }
        slot.clone()
    };

    if let Some(service) = service {
        service.clear_callbacks();
        if let Some(callback) = callback {
            service.add_callback(Arc::new(CEventBridge { callback }));
        }
    }
    log::info!("audiofile player initialized");
    CODE_OK
}

/// Load a local file. Returns the duration in seconds if already known, 0 while
/// it is still decoding (the Loaded event carries it), or -1 on failure.
#[no_mangle]
pub extern "C" fn audiofile_load_file(
    audio_id: *const c_char,
    path: *const c_char,
    looping: bool,
    play_in_background: bool,
) -> f64 {
    let args = unsafe {
        c_str(audio_id, "audio id").and_then(|id| c_str(path, "path").map(|path| (id, path)))
    };
    let result = args.and_then(|(id, path)| {
        let source = MediaSource::File(PathBuf::from(path));
        let options = SessionOptions::new(looping, play_in_background);
        with_service(|service| service.load_local(id, source, options))
    });
    duration_or_error(result)
}

/// Load an in-memory audio file image. The bytes are copied.
#[no_mangle]
pub extern "C" fn audiofile_load_bytes(
    audio_id: *const c_char,
    data: *const u8,
    len: usize,
    looping: bool,
    play_in_background: bool,
) -> f64 {
    if data.is_null() || len == 0 {
        log::error!("FFI error: empty audio buffer");
        return -1.0;
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) }.to_vec();
    let result = unsafe { c_str(audio_id, "audio id") }.and_then(|id| {
        let options = SessionOptions::new(looping, play_in_background);
        with_service(|service| service.load_local(id, MediaSource::Bytes(bytes), options))
    });
    duration_or_error(result)
}

fn duration_or_error(result: Result<Option<f64>>) -> f64 {
    match result {
        Ok(Some(duration)) => duration,
        // Still decoding; the duration arrives with the Loaded event
        Ok(None) => 0.0,
        Err(err) => {
            log::error!("FFI error: {}", err);
            -1.0
        }
    }
}

/// Start loading a remote URL; completion arrives as Loaded or LoadFailed.
#[no_mangle]
pub extern "C" fn audiofile_load_url(
    audio_id: *const c_char,
    url: *const c_char,
    looping: bool,
    play_in_background: bool,
) -> i32 {
    let url = match unsafe { c_str(url, "url") } {
        Ok(url) => url,
        Err(err) => return to_code(Err(err)),
    };
    with_id(audio_id, |service, id| {
        service.load_remote(id, url, SessionOptions::new(looping, play_in_background))
    })
}

/// Negative `endpoint_seconds` plays to the end.
#[no_mangle]
pub extern "C" fn audiofile_play(
    audio_id: *const c_char,
    from_start: bool,
    endpoint_seconds: f64,
) -> i32 {
    let endpoint = Endpoint::from_seconds(endpoint_seconds);
    with_id(audio_id, |service, id| service.play(id, from_start, endpoint))
}

#[no_mangle]
pub extern "C" fn audiofile_pause(audio_id: *const c_char) -> i32 {
    with_id(audio_id, |service, id| service.pause(id))
}

#[no_mangle]
pub extern "C" fn audiofile_seek(audio_id: *const c_char, position_seconds: f64) -> i32 {
    with_id(audio_id, |service, id| service.seek(id, position_seconds))
}

#[no_mangle]
pub extern "C" fn audiofile_set_volume(audio_id: *const c_char, volume: f32) -> i32 {
    with_id(audio_id, |service, id| service.set_volume(id, volume))
}

#[no_mangle]
pub extern "C" fn audiofile_release(audio_id: *const c_char) -> i32 {
    with_id(audio_id, |service, id| service.release(id))
}

/// Session state: 0 loading, 1 ready, 2 playing, 3 paused, 4 failed,
/// -2 unknown id, -1 other errors.
#[no_mangle]
pub extern "C" fn audiofile_get_state(audio_id: *const c_char) -> i32 {
    let result = unsafe { c_str(audio_id, "audio id") }
        .and_then(|id| with_service(|service| service.session_snapshot(id)));
    match result {
        Ok(snapshot) => state_code(snapshot.state),
        Err(err) => to_code(Err(err)),
    }
}

/// Release every session and stop the control thread.
#[no_mangle]
pub extern "C" fn audiofile_shutdown() -> i32 {
    let Some(service) = SERVICE.lock().take() else {
        return CODE_OK;
    };
    match Arc::try_unwrap(service) {
        Ok(mut service) => to_code(service.shutdown()),
        // Another caller still holds it; the last drop shuts it down
        Err(_) => CODE_OK,
    }
}
