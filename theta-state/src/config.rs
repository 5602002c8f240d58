use std::{fmt::Debug, time::Duration};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::PersistenceError;

pub const DEFAULT_ADDRESS: &str = "mem://localhost";
pub const DEFAULT_USERNAME: &str = "admin";
pub const DEFAULT_PASSWORD: &str = "password";
pub const DEFAULT_BUCKET_NAME: &str = "states";

/// User name and password for the document store.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

/// Where and as whom to connect.
#[derive(Debug, Clone)]
pub struct ConnectionParams {
    pub address: Url,
    pub credentials: Credentials,
}

/// Options of a state storage provider, as loaded by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageOptions {
    /// Store address. `mem://` for an in-process store, `file:///dir` for a local directory.
    pub address: String,
    pub username: String,
    pub password: String,
    /// Bucket documents are saved in, qualified by the provider name if there is one.
    pub bucket_name: String,
    /// Pretty-print stored documents.
    pub indent_json: bool,
    /// Deadline for a single store operation.
    pub operation_timeout_ms: Option<u64>,
}

// Implementations

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl ConnectionParams {
    pub fn new(address: Url, credentials: Credentials) -> Self {
        Self {
            address,
            credentials,
        }
    }

    /// Check everything that can be checked without touching the network.
    pub fn validate(&self) -> Result<(), PersistenceError> {
        if self.credentials.username.trim().is_empty() {
            return Err(PersistenceError::Configuration(
                "username can not be empty".into(),
            ));
        }
        if self.credentials.password.is_empty() {
            return Err(PersistenceError::Configuration(
                "password can not be empty".into(),
            ));
        }

        match self.address.scheme() {
            "mem" => Ok(()),
            #[cfg(feature = "local_fs")]
            "file" => self
                .address
                .to_file_path()
                .map(|_| ())
                .map_err(|_| {
                    PersistenceError::Configuration(format!(
                        "{} is not a local directory",
                        self.address
                    ))
                }),
            // todo Support couchbase:// once a network bucket exists
            scheme => Err(PersistenceError::Configuration(format!(
                "unsupported store scheme {scheme:?}"
            ))),
        }
    }
}

impl StorageOptions {
    /// Options pointing at the platform data directory for this application.
    #[cfg(feature = "local_fs")]
    pub fn local_default() -> Result<Self, PersistenceError> {
        let dirs = directories::ProjectDirs::from("com", "theta", "theta-state").ok_or_else(
            || PersistenceError::Configuration("no home directory on this platform".into()),
        )?;

        let address = Url::from_directory_path(dirs.data_dir()).map_err(|_| {
            PersistenceError::Configuration(format!(
                "{} is not an absolute path",
                dirs.data_dir().display()
            ))
        })?;

        Ok(Self {
            address: address.into(),
            ..Self::default()
        })
    }

    /// Bucket for the provider registered under `provider_name`.
    ///
    /// Named providers get `"{name}_{bucket_name}"` so several of them can share
    /// one physical store without colliding.
    pub fn bucket_for(&self, provider_name: Option<&str>) -> String {
        match provider_name.map(str::trim) {
            Some(name) if !name.is_empty() => format!("{name}_{}", self.bucket_name),
            _ => self.bucket_name.clone(),
        }
    }

    pub fn connection_params(&self) -> Result<ConnectionParams, PersistenceError> {
        let address = Url::parse(&self.address).map_err(|e| {
            PersistenceError::Configuration(format!("invalid address {:?}: {e}", self.address))
        })?;

        let params = ConnectionParams::new(
            address,
            Credentials::new(self.username.clone(), self.password.clone()),
        );
        params.validate()?;

        Ok(params)
    }

    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_ms.map(Duration::from_millis)
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.into(),
            username: DEFAULT_USERNAME.into(),
            password: DEFAULT_PASSWORD.into(),
            bucket_name: DEFAULT_BUCKET_NAME.into(),
            indent_json: false,
            operation_timeout_ms: None,
        }
    }
}
