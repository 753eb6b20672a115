//! Language server for YARA rule files.
//!
//! The crate is split along two seams. The protocol engine (`transport`,
//! `rpc`, `session`, `server`) speaks length-prefixed JSON-RPC over TCP and
//! drives one isolated session per connection. The feature layer (`symbols`,
//! `schema`, `features`, `diagnostics`, `compiler`) is pure text analysis:
//! plain functions over document text and cursor positions, with the external
//! `yarac` compiler behind a trait for diagnostics.

pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod features;
pub mod rpc;
pub mod schema;
pub mod server;
pub mod session;
pub mod symbols;
pub mod transport;
