//! Dalmux Gateway
//!
//! Serves entity connections to remote and HTTP clients. Both transports
//! share one [`EntityServer`]: login proxies, per-user connection pools and
//! the session registry.
//!
//! # Architecture
//!
//! ```text
//! RemoteEntityConnection ──socket──► RemoteServer ─┐
//!                                                  ├─► EntityServer ─► LocalEntityConnection ─► pool
//! HttpEntityConnection ────HTTP────► HttpServer ───┘      (login, sessions, reaper)
//! ```

pub mod config;
pub mod dispatch;
mod gateway;
pub mod http;
pub mod logging;
pub mod login;
pub mod remote;
pub mod server;

pub use config::{HttpConfig, LoginUser, RemoteConfig, ServerConfig, SessionConfig};
pub use dispatch::dispatch;
pub use gateway::Gateway;
pub use http::HttpServer;
pub use login::{password_digest, LoginProxy, StaticLoginProxy};
pub use remote::RemoteServer;
pub use server::{EntityServer, ServerStatistics, Session, SessionInfo};
