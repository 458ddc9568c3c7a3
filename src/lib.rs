mod client;
mod connection;
mod error;
mod library;

pub use client::{Client, ClientBuilder, ClientOptions, ProtocolVersion};
pub use connection::BrokerAck;
pub use error::{Error, Result};
pub use library::{is_initialized, version, CleanupReport, Library, LibraryOptions, Version};
