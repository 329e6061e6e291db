pub mod clock;
pub mod config;
pub mod error;
pub mod framer;
pub mod mock;
pub mod model;
pub mod protocol;
pub mod session;

pub use config::{Endpoint, LinkConfig};
pub use error::{Error, ErrorKind, Result};
pub use session::{Session, SessionState};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
