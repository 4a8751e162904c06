mod buffer;
mod config;
mod error;
mod frame;
mod keepalive;
mod ping;
mod reader;
mod registry;
mod scheduler;
mod session;
mod stream;
mod transport;
mod writer;

pub use config::Config;
pub use error::{Error, Result};
pub use registry::Role;
pub use session::{Session, SessionState};
pub use stream::Stream;
pub use transport::{HalfDuplex, Transport, WriterControl};
