//! Concrete checks bundled with the engine.

mod http;
mod tcp;

pub use http::{DEFAULT_MAX_READ_BYTES, HttpProbe};
pub use tcp::TcpProbe;
