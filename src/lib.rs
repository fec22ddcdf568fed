//! # pzip Core Library
//!
//! This crate provides the core functionality for the `pzip` and `punzip`
//! command-line applications: a parallel ZIP archiver and extractor that
//! emits standards-compliant archives while compressing (or decompressing)
//! entries on all available cores.
//!
//! ## Key Modules
//!
//! - [`archive`]: The two-stage archiver pipeline — parallel compressors
//!   feeding a single sequential archive writer.
//! - [`extract`]: The inverse pipeline — parallel per-entry extraction into
//!   an output tree.
//! - [`pool`]: The generic bounded worker pool both pipelines run on.
//! - [`staging`]: The file-backed staging buffer that bounds per-entry
//!   memory.
//! - [`zipfmt`]: The ZIP container contract — headers, extra fields, stream
//!   writer and central-directory reader.

pub mod archive;
pub mod cancel;
pub mod cli;
pub mod error;
pub mod extract;
pub mod pool;
pub mod staging;
pub mod zipfmt;

pub use error::ArchiverError;

// Cross-platform filesystem helpers.
pub mod fsx;
