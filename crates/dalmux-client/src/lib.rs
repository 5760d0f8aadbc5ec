//! Dalmux client transports
//!
//! Two `EntityConnection` implementations that forward every call to a
//! dalmux gateway:
//!
//! - [`RemoteEntityConnection`] keeps one socket open for the whole session
//! - [`HttpEntityConnection`] posts one request per call and pins a server
//!   side connection only while a transaction is open
//!
//! Both behave like a local connection, including the error kinds they
//! return; failures reaching the server surface as `Error::Transport`.

pub mod config;
pub mod http;
mod proxy;
pub mod remote;

pub use config::{HttpClientConfig, RemoteClientConfig};
pub use http::{HttpChannel, HttpEntityConnection};
pub use proxy::{Channel, ProxyConnection};
pub use remote::{RemoteChannel, RemoteEntityConnection};
