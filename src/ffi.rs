//! FFI bindings for HeartSync Core
//!
//! C-compatible functions so the mobile client can call the aggregation
//! core directly. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using
//! `hs_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::NaiveDate;

use crate::config::AggregatorConfig;
use crate::error::AggregateError;
use crate::pipeline::{resolve_all, summarize_json, SummaryProcessor};
use crate::record::Record;

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// A NULL config pointer selects the default configuration
unsafe fn config_from_ptr(
    config_json: *const c_char,
) -> Result<AggregatorConfig, AggregateError> {
    if config_json.is_null() {
        return Ok(AggregatorConfig::default());
    }
    match cstr_to_string(config_json) {
        Some(json) => AggregatorConfig::from_json(&json),
        None => Err(AggregateError::InvalidConfig("config is not valid UTF-8".to_string())),
    }
}

fn string_result(result: Result<String, AggregateError>) -> *mut c_char {
    match result {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Fold a JSON array of records and return the fold result as JSON
/// (`{"accepted": n, "summary": {...}}`).
///
/// # Safety
/// - `records_json` must be a valid null-terminated C string.
/// - `config_json` must be a valid null-terminated C string or NULL for the
///   default configuration.
/// - Returns a newly allocated string that must be freed with `hs_free_string`.
/// - Returns NULL on error; call `hs_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hs_summarize_json(
    records_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let records = match cstr_to_string(records_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid records string pointer");
            return ptr::null_mut();
        }
    };

    string_result(config_from_ptr(config_json).and_then(|config| {
        let result = summarize_json(&records, &config)?;
        Ok(serde_json::to_string(&result)?)
    }))
}

/// Resolve every configured metric in one record. Returns a JSON object
/// mapping metric name to value or `null`.
///
/// # Safety
/// - `record_json` must be a valid null-terminated C string.
/// - `config_json` must be a valid null-terminated C string or NULL.
/// - Returns a newly allocated string that must be freed with `hs_free_string`.
/// - Returns NULL on error; call `hs_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hs_resolve_json(
    record_json: *const c_char,
    config_json: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let record = match cstr_to_string(record_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid record string pointer");
            return ptr::null_mut();
        }
    };

    string_result(config_from_ptr(config_json).and_then(|config| {
        let record = Record::from_json(&record)?;
        Ok(serde_json::to_string(&resolve_all(&record, &config))?)
    }))
}

// ============================================================================
// Stateful Processor API
// ============================================================================

/// Opaque handle to a SummaryProcessor
pub struct SummaryProcessorHandle {
    processor: SummaryProcessor,
}

/// Create a processor.
///
/// # Safety
/// - `config_json` must be a valid null-terminated C string or NULL.
/// - Must be freed with `hs_processor_free`.
/// - Returns NULL on error; call `hs_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hs_processor_new(
    config_json: *const c_char,
) -> *mut SummaryProcessorHandle {
    clear_last_error();

    match config_from_ptr(config_json) {
        Ok(config) => {
            let handle = Box::new(SummaryProcessorHandle {
                processor: SummaryProcessor::new(config),
            });
            Box::into_raw(handle)
        }
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a processor.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `hs_processor_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn hs_processor_free(processor: *mut SummaryProcessorHandle) {
    if !processor.is_null() {
        drop(Box::from_raw(processor));
    }
}

/// Ingest one record given as a JSON object.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `hs_processor_new`.
/// - `record_json` must be a valid null-terminated C string.
/// - Returns 1 if the record was accepted, 0 if the event filter rejected
///   it, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn hs_processor_ingest(
    processor: *mut SummaryProcessorHandle,
    record_json: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }

    let handle = &mut *processor;

    let json = match cstr_to_string(record_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid record string pointer");
            return -1;
        }
    };

    match handle.processor.ingest_json(&json) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Ingest a JSON array of records.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `hs_processor_new`.
/// - `records_json` must be a valid null-terminated C string.
/// - Returns the number of accepted records, or -1 on error.
#[no_mangle]
pub unsafe extern "C" fn hs_processor_ingest_batch(
    processor: *mut SummaryProcessorHandle,
    records_json: *const c_char,
) -> i64 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }

    let handle = &mut *processor;

    let json = match cstr_to_string(records_json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid records string pointer");
            return -1;
        }
    };

    match handle.processor.ingest_batch_json(&json) {
        Ok(accepted) => i64::try_from(accepted).unwrap_or(i64::MAX),
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

/// Tag snapshots with a day (`YYYY-MM-DD`), or clear it with NULL.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `hs_processor_new`.
/// - `day` must be a valid null-terminated C string or NULL.
/// - Returns 0 on success, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn hs_processor_set_day(
    processor: *mut SummaryProcessorHandle,
    day: *const c_char,
) -> i32 {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return -1;
    }

    let handle = &mut *processor;

    if day.is_null() {
        handle.processor.set_day(None);
        return 0;
    }

    let parsed = cstr_to_string(day)
        .and_then(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok());
    match parsed {
        Some(date) => {
            handle.processor.set_day(Some(date));
            0
        }
        None => {
            set_last_error("Invalid day, expected YYYY-MM-DD");
            -1
        }
    }
}

/// Current day summary as JSON.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `hs_processor_new`.
/// - Returns a newly allocated string that must be freed with `hs_free_string`.
/// - Returns NULL on error; call `hs_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn hs_processor_snapshot(
    processor: *const SummaryProcessorHandle,
) -> *mut c_char {
    clear_last_error();

    if processor.is_null() {
        set_last_error("Null processor pointer");
        return ptr::null_mut();
    }

    let handle = &*processor;
    string_result(handle.processor.snapshot_json())
}

/// Discard all samples and start a new pass.
///
/// # Safety
/// - `processor` must be a valid pointer returned by `hs_processor_new`.
#[no_mangle]
pub unsafe extern "C" fn hs_processor_reset(processor: *mut SummaryProcessorHandle) {
    if !processor.is_null() {
        (*processor).processor.reset();
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by HeartSync functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a HeartSync function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn hs_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next HeartSync call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn hs_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn hs_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}
