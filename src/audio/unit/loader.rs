//! Shared-library unit loader
//!
//! Opens a unit module, validates its exported header and resolves the
//! callback table. A `UnitModule` is only ever returned fully valid: a missing
//! mandatory symbol or a bad header drops the library before returning.

use std::ffi::{c_void, CStr};
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use libloading::Library;
use parking_lot::Mutex;

use super::sys::{self, *};
use super::{AudioUnit, Capabilities, ParamDescriptor, ParamDisplay, RuntimeConfig, UnitInfo};
use crate::error::{InitStatus, LoadError, UnitError};

/// Resolved callback table
struct Callbacks {
    init: UnitInitFn,
    render: UnitRenderFn,
    teardown: Option<UnitTeardownFn>,
    set_param_value: Option<UnitSetParamValueFn>,
    get_param_value: Option<UnitGetParamValueFn>,
    get_param_str_value: Option<UnitGetParamStrValueFn>,
    load_preset: Option<UnitLoadPresetFn>,
    get_preset_name: Option<UnitGetPresetNameFn>,
    set_tempo: Option<UnitSetTempoFn>,
    note_on: Option<UnitNoteOnFn>,
    note_off: Option<UnitNoteOffFn>,
    all_note_off: Option<UnitAllNoteOffFn>,
}

struct UnitLibrary {
    callbacks: Callbacks,
    info: UnitInfo,
    /// Descriptor passed to `unit_init`; kept alive for as long as the unit may
    /// hold on to it
    runtime_desc: Mutex<Option<Box<UnitRuntimeDesc>>>,
    initialized: AtomicBool,
    path: Option<PathBuf>,
    /// Declared last so the library is unloaded after everything above
    source: Box<dyn SymbolSource>,
}

impl Drop for UnitLibrary {
    fn drop(&mut self) {
        log::info!("Unloading unit: {}", self.info.name);

        if self.initialized.swap(false, Ordering::AcqRel) {
            if let Some(teardown) = self.callbacks.teardown {
                unsafe { teardown() };
            }
        }
    }
}

/// A loaded unit module.
///
/// Clones share the same library; the module is torn down and unloaded when
/// the last clone drops. The engine moves one clone into the audio callback
/// and keeps another for control-side queries (display strings, preset names).
#[derive(Clone)]
pub struct UnitModule {
    inner: Arc<UnitLibrary>,
}

fn symbol_name(symbol: &'static [u8]) -> &'static str {
    let trimmed = symbol.strip_suffix(b"\0").unwrap_or(symbol);
    std::str::from_utf8(trimmed).unwrap_or("<invalid symbol>")
}

/// Reinterpret a resolved symbol address as a callback of type `F`.
///
/// # Safety
/// `F` must be a function pointer type matching the ABI of `name`.
unsafe fn resolve<F: Copy>(source: &dyn SymbolSource, name: &'static [u8]) -> Option<F> {
    debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*const c_void>());
    source
        .lookup(name)
        .map(|address| std::mem::transmute_copy::<*const c_void, F>(&address))
}

unsafe fn required<F: Copy>(source: &dyn SymbolSource, name: &'static [u8]) -> Result<F, LoadError> {
    resolve(source, name).ok_or(LoadError::MissingSymbol(symbol_name(name)))
}

/// Copy a fixed-size, possibly unterminated C string field
fn fixed_c_string(raw: &[c_char]) -> String {
    let bytes: Vec<u8> = raw
        .iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).trim_end().to_string()
}

fn parse_header(header: &UnitHeader) -> Result<UnitInfo, LoadError> {
    let header_size = header.header_size;
    if header_size as usize != std::mem::size_of::<UnitHeader>() {
        return Err(LoadError::MalformedHeader(format!(
            "header size {} does not match expected {}",
            header_size,
            std::mem::size_of::<UnitHeader>()
        )));
    }

    let api = header.api;
    if !sys::api_is_compatible(api) {
        return Err(LoadError::IncompatibleApi {
            found: api,
            expected: UNIT_API_VERSION,
        });
    }

    let num_params = header.num_params as usize;
    if num_params > UNIT_MAX_PARAM_COUNT {
        return Err(LoadError::MalformedHeader(format!(
            "{} parameters exceeds the maximum of {}",
            num_params, UNIT_MAX_PARAM_COUNT
        )));
    }

    let params = header.params;
    let params = params[..num_params]
        .iter()
        .map(|param| {
            let name = param.name;
            ParamDescriptor {
                name: fixed_c_string(&name),
                min: param.min,
                max: param.max,
                center: param.center,
                default: param.init,
                display: ParamDisplay::from_raw(param.param_type),
                fraction: param.frac_bits & 0x0F,
                fraction_decimal: param.frac_bits & 0x10 != 0,
            }
        })
        .collect();

    let name = header.name;
    let target = header.target;
    if target & UNIT_TARGET_PLATFORM_MASK != UNIT_TARGET_PLATFORM {
        log::warn!(
            "Unit targets platform {:#06x}, host expects {:#06x}",
            target & UNIT_TARGET_PLATFORM_MASK,
            UNIT_TARGET_PLATFORM
        );
    }

    Ok(UnitInfo {
        name: fixed_c_string(&name),
        vendor_id: header.dev_id,
        unit_id: header.unit_id,
        api_version: api,
        version: header.version,
        target,
        params,
        preset_count: header.num_presets,
    })
}

/// Copy a string returned by a unit callback. Null yields `None`.
///
/// # Safety
/// `ptr` must be null or point at a NUL-terminated string valid for the call.
unsafe fn owned_c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(CStr::from_ptr(ptr).to_string_lossy().into_owned())
}

impl UnitModule {
    /// Load a unit from a shared library on disk
    pub fn open(path: &Path) -> Result<Self, LoadError> {
        log::info!("Loading unit from: {:?}", path);

        let library = unsafe {
            Library::new(path).map_err(|e| LoadError::Open {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?
        };

        Self::from_source(Box::new(library), Some(path.to_path_buf()))
    }

    /// Resolve a unit from any symbol source. On error the source is dropped.
    pub fn from_source(
        source: Box<dyn SymbolSource>,
        path: Option<PathBuf>,
    ) -> Result<Self, LoadError> {
        let header_ptr = source
            .lookup(SYM_HEADER)
            .ok_or(LoadError::MissingSymbol(symbol_name(SYM_HEADER)))?
            as *const UnitHeader;
        // Safety: the exported header is a static of the packed ABI layout
        let header = unsafe { ptr::read_unaligned(header_ptr) };
        let info = parse_header(&header)?;

        // Safety: each symbol is cast to the signature the ABI declares for it
        let callbacks = unsafe {
            Callbacks {
                init: required(source.as_ref(), SYM_INIT)?,
                render: required(source.as_ref(), SYM_RENDER)?,
                teardown: resolve(source.as_ref(), SYM_TEARDOWN),
                set_param_value: resolve(source.as_ref(), SYM_SET_PARAM_VALUE),
                get_param_value: resolve(source.as_ref(), SYM_GET_PARAM_VALUE),
                get_param_str_value: resolve(source.as_ref(), SYM_GET_PARAM_STR_VALUE),
                load_preset: resolve(source.as_ref(), SYM_LOAD_PRESET),
                get_preset_name: resolve(source.as_ref(), SYM_GET_PRESET_NAME),
                set_tempo: resolve(source.as_ref(), SYM_SET_TEMPO),
                note_on: resolve(source.as_ref(), SYM_NOTE_ON),
                note_off: resolve(source.as_ref(), SYM_NOTE_OFF),
                all_note_off: resolve(source.as_ref(), SYM_ALL_NOTE_OFF),
            }
        };

        log::info!(
            "Loaded unit: {} (vendor {:#010x}, id {:#010x}, {} params, {} presets)",
            info.name,
            info.vendor_id,
            info.unit_id,
            info.params.len(),
            info.preset_count
        );

        Ok(Self {
            inner: Arc::new(UnitLibrary {
                callbacks,
                info,
                runtime_desc: Mutex::new(None),
                initialized: AtomicBool::new(false),
                path,
                source,
            }),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.inner.path.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::Acquire)
    }

    /// Look up an arbitrary exported symbol (diagnostics)
    pub fn has_symbol(&self, name: &[u8]) -> bool {
        self.inner.source.lookup(name).is_some()
    }
}

impl AudioUnit for UnitModule {
    fn info(&self) -> &UnitInfo {
        &self.inner.info
    }

    fn initialize(&mut self, runtime: &RuntimeConfig) -> Result<(), UnitError> {
        let desc = Box::new(runtime.to_desc(self.inner.info.target));
        let mut slot = self.inner.runtime_desc.lock();
        let desc_ptr: *const UnitRuntimeDesc = &**slot.insert(desc);

        let status = unsafe { (self.inner.callbacks.init)(desc_ptr) };
        if status != 0 {
            let status = InitStatus::from_code(status);
            log::error!("Unit {} failed to initialize: {}", self.inner.info.name, status);
            return Err(UnitError::InitFailed(status));
        }

        self.inner.initialized.store(true, Ordering::Release);
        log::info!(
            "Initialized unit {} at {} Hz, {} frames, {} in / {} out",
            self.inner.info.name,
            runtime.sample_rate,
            runtime.frames_per_period,
            runtime.input_channels,
            runtime.output_channels
        );
        Ok(())
    }

    #[inline]
    fn render(&mut self, input: &[f32], output: &mut [f32], frames: u32) {
        unsafe { (self.inner.callbacks.render)(input.as_ptr(), output.as_mut_ptr(), frames) };
    }

    fn capabilities(&self) -> Capabilities {
        let cb = &self.inner.callbacks;
        Capabilities {
            set_parameter: cb.set_param_value.is_some(),
            get_parameter: cb.get_param_value.is_some(),
            parameter_display: cb.get_param_str_value.is_some(),
            notes: cb.note_on.is_some() && cb.note_off.is_some(),
            all_notes_off: cb.all_note_off.is_some(),
            presets: cb.load_preset.is_some(),
            preset_names: cb.get_preset_name.is_some(),
            tempo: cb.set_tempo.is_some(),
        }
    }

    fn set_parameter(&mut self, id: u8, value: i32) {
        if let Some(set) = self.inner.callbacks.set_param_value {
            unsafe { set(id, value) };
        }
    }

    fn parameter(&self, id: u8) -> Option<i32> {
        self.inner.callbacks.get_param_value.map(|get| unsafe { get(id) })
    }

    fn parameter_display(&self, id: u8, value: i32) -> Option<String> {
        let get = self.inner.callbacks.get_param_str_value?;
        unsafe { owned_c_str(get(id, value)) }
    }

    fn note_on(&mut self, note: u8, velocity: u8) {
        if let Some(note_on) = self.inner.callbacks.note_on {
            unsafe { note_on(note, velocity) };
        }
    }

    fn note_off(&mut self, note: u8) {
        if let Some(note_off) = self.inner.callbacks.note_off {
            unsafe { note_off(note) };
        }
    }

    fn all_notes_off(&mut self) {
        if let Some(all_off) = self.inner.callbacks.all_note_off {
            unsafe { all_off() };
        }
    }

    fn load_preset(&mut self, index: u8) {
        if let Some(load) = self.inner.callbacks.load_preset {
            unsafe { load(index) };
        }
    }

    fn preset_name(&self, index: u8) -> Option<String> {
        let get = self.inner.callbacks.get_preset_name?;
        unsafe { owned_c_str(get(index)) }
    }

    fn set_tempo(&mut self, tempo: u32) {
        if let Some(set) = self.inner.callbacks.set_tempo {
            unsafe { set(tempo) };
        }
    }
}
