// C-compatible FFI bindings for Swift/iOS integration.
//
// Safety requirements:
// - All pointers must be non-null unless documented otherwise
// - All handles must be created by this module and not fabricated
// - String parameters must be valid UTF-8 (Swift strings are always valid)
// - Caller must call the corresponding _destroy function for each _create
// - Strings returned by this module must be freed with keybed_string_free

use std::ffi::{CStr, CString, c_char};
use std::sync::mpsc::{self, Receiver};

use crate::bridge::{ControllerHandle, InstrumentHandle, InstrumentReadback, KeyEvent, create_bridge};
use crate::bus::{self, WavFileLoader};
use crate::clock::ManualClock;
use crate::instrument::{Instrument, InstrumentConfig};
use crate::key::Key;
use crate::patch::PatchKind;
use crate::remote::ChannelSink;
use crate::state::KnobId;

use log::{LevelFilter, error, info, warn};
use oslog::OsLogger;

// Logger subsystem identifier
const LOG_SUBSYSTEM: &str = "com.keybed.engine";

// ═══════════════════════════════════════════════════════════════════════════
// Logger Initialization
// ═══════════════════════════════════════════════════════════════════════════

/// Initialize the oslog logger.
///
/// This should be called once at application startup before using any other
/// FFI functions. It sets up unified logging that will appear in Console.app
/// and Xcode's debug console.
#[unsafe(no_mangle)]
pub extern "C" fn keybed_init_logger() {
    OsLogger::new(LOG_SUBSYSTEM)
        .level_filter(LevelFilter::Debug)
        .init()
        .ok();
}

// ═══════════════════════════════════════════════════════════════════════════
// Opaque Handle Types
// ═══════════════════════════════════════════════════════════════════════════

/// Opaque handle to the ControllerHandle (UI-side).
pub struct KeybedController {
    inner: ControllerHandle,
    /// Encoded messages for the peer, produced by play/stop.
    outgoing: Receiver<String>,
}

/// Opaque handle to the InstrumentHandle (instrument thread).
pub struct KeybedInstrument {
    inner: InstrumentHandle<ManualClock>,
}

// ═══════════════════════════════════════════════════════════════════════════
// FFI Result Types
// ═══════════════════════════════════════════════════════════════════════════

pub const PATCH_SUBTRACTIVE: u32 = 0;
pub const PATCH_PIANO: u32 = 1;
pub const PATCH_ORGAN: u32 = 2;

/// Configuration for creating a controller/instrument pair.
#[repr(C)]
pub struct KeybedConfig {
    /// One of the PATCH_* constants.
    pub patch: u32,
    pub output_gain: f32,
    /// 0 is dry, 1 fully through the effect.
    pub effect_mix: f32,
}

impl Default for KeybedConfig {
    fn default() -> Self {
        Self {
            patch: PATCH_SUBTRACTIVE,
            output_gain: bus::DEFAULT_OUTPUT_GAIN,
            effect_mix: 0.0,
        }
    }
}

impl From<&KeybedConfig> for InstrumentConfig {
    fn from(c: &KeybedConfig) -> Self {
        let patch = match c.patch {
            PATCH_PIANO => PatchKind::Piano,
            PATCH_ORGAN => PatchKind::Organ,
            _ => PatchKind::Subtractive,
        };
        InstrumentConfig {
            patch,
            output_gain: c.output_gain,
            effect_mix: c.effect_mix,
            ..Default::default()
        }
    }
}

/// Readback data from the instrument (for UI display).
#[repr(C)]
pub struct KeybedReadback {
    pub active_voices: u32,
    pub releasing_voices: u32,
    pub time: f64,
    pub failed_commands: u64,
}

impl From<InstrumentReadback> for KeybedReadback {
    fn from(r: InstrumentReadback) -> Self {
        Self {
            active_voices: r.active_voices as u32,
            releasing_voices: r.releasing_voices as u32,
            time: r.time,
            failed_commands: r.failed_commands,
        }
    }
}

pub const KEY_EVENT_NONE: u8 = 0;
pub const KEY_EVENT_PRESSED: u8 = 1;
pub const KEY_EVENT_RELEASED: u8 = 2;

/// A key state change. `position` is the key's 1-based piano position.
#[repr(C)]
pub struct KeybedKeyEvent {
    pub kind: u8,
    pub position: i32,
}

impl From<Option<KeyEvent>> for KeybedKeyEvent {
    fn from(event: Option<KeyEvent>) -> Self {
        match event {
            Some(KeyEvent::Pressed(key)) => Self {
                kind: KEY_EVENT_PRESSED,
                position: key.position(),
            },
            Some(KeyEvent::Released(key)) => Self {
                kind: KEY_EVENT_RELEASED,
                position: key.position(),
            },
            None => Self {
                kind: KEY_EVENT_NONE,
                position: 0,
            },
        }
    }
}

/// Read a C string argument. NULL and invalid UTF-8 give `None`.
unsafe fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s).to_str().ok() }
}

unsafe fn key_arg(s: *const c_char) -> Option<Key> {
    let name = unsafe { str_arg(s) }?;
    match name.parse() {
        Ok(key) => Some(key),
        Err(e) => {
            warn!("Ignoring key {:?}: {}", name, e);
            None
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Creation
// ═══════════════════════════════════════════════════════════════════════════

/// Get the default configuration values.
#[unsafe(no_mangle)]
pub extern "C" fn keybed_default_config() -> KeybedConfig {
    KeybedConfig::default()
}

/// Create a controller and instrument pair.
///
/// Returns a controller handle. The instrument handle is returned via
/// `out_instrument`. Both handles must be destroyed with their respective
/// destroy functions. Returns NULL on failure.
///
/// # Safety
/// - `config` must be a valid pointer to a KeybedConfig struct or NULL
/// - `out_instrument` must be a valid pointer to store the instrument handle
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_create(
    config: *const KeybedConfig,
    out_instrument: *mut *mut KeybedInstrument,
) -> *mut KeybedController {
    if out_instrument.is_null() {
        error!("controller_create called without out_instrument");
        return std::ptr::null_mut();
    }

    // Use provided config or defaults
    let config: InstrumentConfig = if config.is_null() {
        (&KeybedConfig::default()).into()
    } else {
        unsafe { (&*config).into() }
    };

    let mut instrument = match Instrument::new(config, ManualClock::new(0.0)) {
        Ok(instrument) => instrument,
        Err(e) => {
            error!("Failed to create instrument: {}", e);
            return std::ptr::null_mut();
        }
    };
    let (tx, outgoing) = mpsc::channel();
    instrument.set_outbox(Box::new(ChannelSink::new(tx)));

    let (controller, handle) = create_bridge(instrument);
    info!("Created instrument ({})", handle.instrument().patch());

    unsafe {
        *out_instrument = Box::into_raw(Box::new(KeybedInstrument { inner: handle }));
    }
    Box::into_raw(Box::new(KeybedController {
        inner: controller,
        outgoing,
    }))
}

/// Destroy a controller handle.
///
/// # Safety
/// `controller` must be a valid pointer returned by `controller_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_destroy(controller: *mut KeybedController) {
    if !controller.is_null() {
        unsafe { drop(Box::from_raw(controller)) };
    }
}

/// Destroy an instrument handle.
///
/// # Safety
/// `instrument` must be a valid pointer returned via `controller_create`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn instrument_destroy(instrument: *mut KeybedInstrument) {
    if !instrument.is_null() {
        unsafe { drop(Box::from_raw(instrument)) };
    }
}

/// Free a string returned by this module.
///
/// # Safety
/// `s` must have been returned by this module, or be NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn keybed_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe { drop(CString::from_raw(s)) };
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Controller - Keys
// ═══════════════════════════════════════════════════════════════════════════

/// Sound a key locally. `key` is a name such as "C-4" or "F#3".
///
/// # Safety
/// `controller` must be valid. `key` must be a null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_press(controller: *mut KeybedController, key: *const c_char) {
    if controller.is_null() {
        return;
    }
    if let Some(key) = unsafe { key_arg(key) } {
        unsafe { (*controller).inner.press(key) };
    }
}

/// # Safety
/// `controller` must be valid. `key` must be a null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_release(controller: *mut KeybedController, key: *const c_char) {
    if controller.is_null() {
        return;
    }
    if let Some(key) = unsafe { key_arg(key) } {
        unsafe { (*controller).inner.release(key) };
    }
}

/// Sound a key and report it to the peer.
///
/// # Safety
/// `controller` must be valid. `key` must be a null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_play(controller: *mut KeybedController, key: *const c_char) {
    if controller.is_null() {
        return;
    }
    if let Some(key) = unsafe { key_arg(key) } {
        unsafe { (*controller).inner.play(key) };
    }
}

/// # Safety
/// `controller` must be valid. `key` must be a null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_stop(controller: *mut KeybedController, key: *const c_char) {
    if controller.is_null() {
        return;
    }
    if let Some(key) = unsafe { key_arg(key) } {
        unsafe { (*controller).inner.stop(key) };
    }
}

/// Forward a message received from the peer.
///
/// # Safety
/// `controller` must be valid. `message` must be a null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_handle_message(
    controller: *mut KeybedController,
    message: *const c_char,
) {
    if controller.is_null() {
        return;
    }
    if let Some(message) = unsafe { str_arg(message) } {
        unsafe { (*controller).inner.remote(message) };
    }
}

/// Next message to send to the peer, or NULL if none is pending.
///
/// The returned string must be freed with `keybed_string_free`.
///
/// # Safety
/// `controller` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_next_message(controller: *mut KeybedController) -> *mut c_char {
    if controller.is_null() {
        return std::ptr::null_mut();
    }
    match unsafe { (*controller).outgoing.try_recv() } {
        Ok(message) => CString::new(message)
            .map(CString::into_raw)
            .unwrap_or(std::ptr::null_mut()),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Next key event. `kind` is KEY_EVENT_NONE when nothing is pending.
///
/// # Safety
/// `controller` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_next_event(controller: *const KeybedController) -> KeybedKeyEvent {
    if controller.is_null() {
        return KeybedKeyEvent::from(None);
    }
    unsafe { (*controller).inner.try_event().into() }
}

// ═══════════════════════════════════════════════════════════════════════════
// Controller - Knobs
// ═══════════════════════════════════════════════════════════════════════════

/// Set a knob by name (e.g. "lpf.cutoff"). Returns false for an unknown knob.
///
/// # Safety
/// `controller` must be valid. `name` must be a null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_set_knob(
    controller: *mut KeybedController,
    name: *const c_char,
    value: f32,
) -> bool {
    if controller.is_null() {
        return false;
    }
    let Some(name) = (unsafe { str_arg(name) }) else {
        return false;
    };
    match name.parse::<KnobId>() {
        Ok(id) => {
            unsafe { (*controller).inner.set_knob(id, value) };
            true
        }
        Err(e) => {
            warn!("{}", e);
            false
        }
    }
}

/// Current (optimistic) value of a knob, or NaN for an unknown knob.
///
/// # Safety
/// `controller` must be valid. `name` must be a null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_get_knob(
    controller: *const KeybedController,
    name: *const c_char,
) -> f32 {
    if controller.is_null() {
        return f32::NAN;
    }
    match unsafe { str_arg(name) }.and_then(|n| n.parse::<KnobId>().ok()) {
        Some(id) => unsafe { (*controller).inner.knobs().get(id) },
        None => f32::NAN,
    }
}

/// # Safety
/// `controller` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_set_output_gain(controller: *mut KeybedController, gain: f32) {
    if controller.is_null() {
        return;
    }
    unsafe { (*controller).inner.set_output_gain(gain) };
}

/// # Safety
/// `controller` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_set_effect_mix(controller: *mut KeybedController, mix: f32) {
    if controller.is_null() {
        return;
    }
    unsafe { (*controller).inner.set_effect_mix(mix) };
}

/// Get the current instrument readback state.
///
/// # Safety
/// `controller` must be valid or NULL.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn controller_get_readback(controller: *const KeybedController) -> KeybedReadback {
    if controller.is_null() {
        return InstrumentReadback::default().into();
    }
    unsafe { (*controller).inner.readback().into() }
}

// ═══════════════════════════════════════════════════════════════════════════
// Instrument Handle Functions (for the instrument thread)
// ═══════════════════════════════════════════════════════════════════════════

/// Advance the instrument clock, in seconds.
///
/// # Safety
/// `instrument` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn instrument_set_time(instrument: *mut KeybedInstrument, seconds: f64) {
    if instrument.is_null() {
        return;
    }
    unsafe { (*instrument).inner.instrument().clock().set(seconds) };
}

/// Process all pending commands from the controller and free finished voices.
///
/// Returns the number of commands applied.
///
/// # Safety
/// Must be called from the thread that owns the instrument. `instrument` must be valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn instrument_process_commands(instrument: *mut KeybedInstrument) -> u32 {
    if instrument.is_null() {
        return 0;
    }
    unsafe { (*instrument).inner.process_commands() as u32 }
}

/// Load a WAV impulse response into the effect stage in the background.
///
/// # Safety
/// `instrument` must be valid. `path` must be a null-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn instrument_load_impulse(
    instrument: *mut KeybedInstrument,
    path: *const c_char,
) -> bool {
    if instrument.is_null() {
        return false;
    }
    let Some(path) = (unsafe { str_arg(path) }) else {
        return false;
    };
    // Detached: the effect switches on whenever decoding finishes.
    let _ = unsafe { (*instrument).inner.instrument().load_impulse(WavFileLoader::new(path)) };
    true
}
