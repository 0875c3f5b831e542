//! Wiring shared by the `docqa` binary: component construction and the
//! HTTP server.

pub mod runtime;
pub mod server;
