//! dynrest Common Types and Utilities
//!
//! Endpoint model, configuration and error handling shared by the engine,
//! auth and REST crates.

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod types;

pub use config::DynrestConfig;
pub use error::{Error, Result};
