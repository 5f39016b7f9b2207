//! Semi-structured biometric records
//!
//! This module defines the schema-less record shape produced by the sensor
//! and backend pipeline, plus helpers for reading records from JSON arrays
//! and newline-delimited JSON.

mod codec;
mod value;

pub use codec::*;
pub use value::*;
