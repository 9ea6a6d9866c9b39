//! dynrest Endpoint Engine
//!
//! Turns declared endpoints into executed SQL:
//! - URL template compilation and first-match route resolution
//! - Placeholder extraction straight out of SQL text
//! - Type and constraint validation of bound values
//! - Query and procedure execution over two SQL dialects
//! - Bounded connection pooling
//! - A MySQL driver for the session dialect

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod bind;
pub mod connection;
pub mod datefmt;
pub mod dialect;
pub mod executor;
pub mod memory;
pub mod mysql;
pub mod placeholder;
pub mod pool;
pub mod registry;
pub mod route;
pub mod validate;

pub use bind::{BindSet, BoundParam, Row, SqlValue};
pub use connection::{connector_for, Connector, SqlConnection, Statement};
pub use dialect::{dialect_for, Dialect};
pub use executor::{ExecutionShape, Executor};
pub use memory::MemoryConnector;
pub use mysql::MySqlConnector;
pub use pool::{ConnectionPool, PooledConnection};
pub use registry::{EndpointRegistry, FileSpecStore, InMemorySpecStore, RouteMatch, SpecStore};
pub use route::RouteMatcher;
pub use validate::{BindSource, ParameterMap};
