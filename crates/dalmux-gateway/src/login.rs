//! Login proxies
//!
//! Every session attempt runs through a chain of [`LoginProxy`]
//! collaborators before the server creates a session. Shared proxies run for
//! every client; client-type proxies only for their client type. Each proxy
//! may reject the client or return it adjusted, for example connected to the
//! database as another user.

use std::collections::HashMap;

use async_trait::async_trait;
use dalmux_core::{Error, RemoteClient, Result};
use sha2::{Digest, Sha256};
use tracing::debug;
use zeroize::Zeroizing;

use crate::config::LoginUser;

#[async_trait]
pub trait LoginProxy: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Accept the client, possibly adjusted, or fail with an authentication error
    async fn validate(&self, client: RemoteClient) -> Result<RemoteClient>;

    /// Called after the client's session ended
    async fn logout(&self, _client: &RemoteClient) {}
}

/// Hex SHA-256 digest of a password
pub fn password_digest(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    hex::encode(digest)
}

/// Accepts users listed with a password digest; everyone else is rejected.
pub struct StaticLoginProxy {
    users: HashMap<String, Zeroizing<String>>,
}

impl StaticLoginProxy {
    pub fn new(users: &[LoginUser]) -> Self {
        let users = users
            .iter()
            .map(|u| {
                (
                    u.username.clone(),
                    Zeroizing::new(u.password_sha256.to_ascii_lowercase()),
                )
            })
            .collect();
        Self { users }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl LoginProxy for StaticLoginProxy {
    fn name(&self) -> &str {
        "static"
    }

    async fn validate(&self, client: RemoteClient) -> Result<RemoteClient> {
        let user = client.user();
        let expected = self.users.get(user.username()).ok_or_else(|| {
            Error::Authentication(format!("unknown user '{}'", user.username()))
        })?;

        let digest = Zeroizing::new(password_digest(user.password()));
        if digest.as_str() != expected.as_str() {
            return Err(Error::Authentication(format!(
                "wrong password for user '{}'",
                user.username()
            )));
        }
        debug!("[Login] {} accepted by static proxy", client);
        Ok(client)
    }
}
