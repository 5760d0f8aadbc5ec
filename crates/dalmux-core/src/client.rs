//! Client identity: users, connection requests and authenticated remote clients

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Version of the dalmux framework, carried in every connection request
pub const FRAMEWORK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Database or application user. The password is wiped from memory on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct User {
    username: String,
    password: Zeroizing<String>,
}

impl User {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    /// Parse `username:password`
    pub fn parse(text: &str) -> Result<Self> {
        match text.split_once(':') {
            Some((username, password)) if !username.is_empty() => {
                Ok(Self::new(username, password))
            }
            _ => Err(Error::Configuration(
                "user must be given as username:password".to_string(),
            )),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl PartialEq for User {
    fn eq(&self, other: &Self) -> bool {
        self.username == other.username && *self.password == *other.password
    }
}

impl Eq for User {}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.username)
    }
}

/// What a client sends to open a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub user: User,
    pub client_id: Uuid,
    pub client_type: String,
    pub client_version: Option<String>,
    pub framework_version: String,
    pub domain: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, String>,
}

impl ConnectionRequest {
    /// A request with a fresh client id
    pub fn new(user: User, client_type: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            user,
            client_id: Uuid::new_v4(),
            client_type: client_type.into(),
            client_version: None,
            framework_version: FRAMEWORK_VERSION.to_string(),
            domain: domain.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_client_id(mut self, client_id: Uuid) -> Self {
        self.client_id = client_id;
        self
    }

    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = Some(version.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// A client that passed login validation, as seen by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteClient {
    request: ConnectionRequest,
    /// The user the server connects to the database as
    database_user: User,
    client_host: Option<String>,
    connected_at: DateTime<Utc>,
}

impl RemoteClient {
    /// A client connecting to the database as the requesting user
    pub fn new(request: ConnectionRequest) -> Self {
        let database_user = request.user.clone();
        Self {
            request,
            database_user,
            client_host: None,
            connected_at: Utc::now(),
        }
    }

    /// Connect to the database as a different user than the one logging in
    pub fn with_database_user(mut self, user: User) -> Self {
        self.database_user = user;
        self
    }

    pub fn with_client_host(mut self, host: impl Into<String>) -> Self {
        self.client_host = Some(host.into());
        self
    }

    pub fn request(&self) -> &ConnectionRequest {
        &self.request
    }

    pub fn client_id(&self) -> Uuid {
        self.request.client_id
    }

    pub fn client_type(&self) -> &str {
        &self.request.client_type
    }

    pub fn user(&self) -> &User {
        &self.request.user
    }

    pub fn database_user(&self) -> &User {
        &self.database_user
    }

    pub fn client_host(&self) -> Option<&str> {
        self.client_host.as_deref()
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }
}

impl fmt::Display for RemoteClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} [{}]",
            self.request.user.username(),
            self.request.client_type,
            self.request.client_id
        )
    }
}
