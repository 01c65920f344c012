//! On-disk chain storage and export.

#[cfg(feature = "csv")]
pub mod csv;

pub mod json;
