//! This crate provides a query engine over gridded numerical weather prediction output. Given a
//! model run, a range of valid times, a list of physical parameters and a geographic point, it
//! finds the dataset files of the run that cover the request, reads only the variables it needs
//! and returns one interpolated value, or an explicit no-data marker, per parameter and valid
//! time.
//!
//! Dataset files are laid out below a data root in one directory per model run. Each file is a
//! JSON manifest describing regular latitude/longitude axes and a time axis, next to a binary
//! payload holding one `[time, latitude, longitude]` array per variable. Variables may be stored
//! with any supported numeric type and byte order, compressed and byte shuffled.
//!
//! openwx is built on top of a number of open source components.
//!
//! * [Tokio](tokio), the most popular asynchronous Rust runtime.
//! * [Serde](serde) performs (de)serialisation of manifests, requests and results.
//! * [ndarray] provides [NumPy](https://numpy.org)-like n-dimensional arrays used in numerical
//!   computation.
//! * [clap] parses the command line.

pub mod accessor;
pub mod app;
pub mod app_state;
pub mod array;
pub mod axis;
pub mod cli;
pub mod compression;
pub mod engine;
pub mod error;
pub mod filter_pipeline;
pub mod filters;
pub mod index;
pub mod interpolation;
pub mod manifest;
pub mod metrics;
pub mod models;
pub mod parameters;
pub mod resource_manager;
pub mod result;
#[cfg(test)]
pub mod test_utils;
pub mod tracing;
pub mod types;
