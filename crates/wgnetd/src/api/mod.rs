//! Docker network plugin protocol over HTTP.

pub mod method;
pub mod server;
pub mod types;
