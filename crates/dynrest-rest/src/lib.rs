//! dynrest REST Front End
//!
//! Serves every declared endpoint under the API root:
//! - Per-request registry load and first-match routing
//! - Bearer token checks for protected endpoints
//! - Query string and JSON body binding
//! - One response envelope for rows and errors

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod handlers;
pub mod server;

pub use handlers::AppState;
pub use server::RestServer;
