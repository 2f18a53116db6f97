//! Scheduled recording of live audio streams.
//!
//! A planning of programs (stream, start, duration, timezone) is turned into
//! timed triggers. Each broadcast day of a program becomes one recording,
//! captured by an external encoder into fixed-length chunks and described by a
//! JSON manifest next to them. The manifest is what outlives the process.

pub mod app;
pub mod capture;
pub mod cli;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod global;
pub mod manifest;
pub mod planning;
pub mod program;
pub mod scheduler;

pub use engine::{CaptureEngine, OneShotRequest};
pub use error::{EngineError, EngineResult};
