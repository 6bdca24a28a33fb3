//! The remote directory (HTTP) client contract (§6.3).

use async_trait::async_trait;
use thiserror::Error;

use super::types::{DirChannel, Property};

/// Failure talking to the remote directory.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Network/transport failure; retryable by the caller.
    #[error("directory transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The directory rejected the request outright (e.g. 4xx); not
    /// retried by backoff, surfaced as a permanent failure.
    #[error("directory rejected request: {0}")]
    Permanent(String),
}

impl DirectoryError {
    /// True for failures that are worth retrying with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DirectoryError::Transport(_))
    }
}

/// Operations the directory processor needs from the remote service.
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Fetch the full set of property names currently defined.
    async fn get_all_properties(&self) -> Result<Vec<String>, DirectoryError>;

    /// Create or update a property definition, owned by `owner`.
    async fn set_property(&self, name: &str, owner: &str) -> Result<(), DirectoryError>;

    /// Bulk upsert of channels (create or replace their property lists).
    async fn set_channels(&self, channels: Vec<DirChannel>) -> Result<(), DirectoryError>;

    /// Set `property` to a single value across many channels at once; used
    /// by the startup `clean` sweep to flip `pvStatus` in bulk.
    async fn update_property(
        &self,
        property: Property,
        channel_names: &[String],
    ) -> Result<(), DirectoryError>;

    /// `findByArgs`: `args` is a list of `(key, value)` filters. The
    /// directory processor encodes a `~size` limit and `~name` alternation
    /// (`a|b|c`) as entries in `args`, per the wire contract of the real
    /// service.
    async fn find_by_args(&self, args: &[(String, String)]) -> Result<Vec<DirChannel>, DirectoryError>;
}

/// `reqwest`-backed [`DirectoryClient`] speaking a small JSON REST contract.
pub struct HttpDirectoryClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpDirectoryClient {
    /// `base_url` should not have a trailing slash.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[derive(serde::Serialize, serde::Deserialize)]
struct WireProperty {
    name: String,
    owner: String,
    value: String,
}

#[derive(serde::Serialize, serde::Deserialize)]
struct WireChannel {
    name: String,
    owner: String,
    properties: Vec<WireProperty>,
}

impl From<&DirChannel> for WireChannel {
    fn from(c: &DirChannel) -> Self {
        WireChannel {
            name: c.name.clone(),
            owner: c.owner.clone(),
            properties: c
                .properties
                .iter()
                .map(|p| WireProperty {
                    name: p.name.clone(),
                    owner: p.owner.clone(),
                    value: p.value.clone(),
                })
                .collect(),
        }
    }
}

impl From<WireChannel> for DirChannel {
    fn from(c: WireChannel) -> Self {
        DirChannel {
            name: c.name,
            owner: c.owner,
            properties: c
                .properties
                .into_iter()
                .map(|p| Property {
                    name: p.name,
                    owner: p.owner,
                    value: p.value,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn get_all_properties(&self) -> Result<Vec<String>, DirectoryError> {
        let resp = self
            .http
            .get(format!("{}/properties", self.base_url))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<Vec<String>>().await?)
    }

    async fn set_property(&self, name: &str, owner: &str) -> Result<(), DirectoryError> {
        self.http
            .put(format!("{}/properties/{name}", self.base_url))
            .json(&WireProperty {
                name: name.to_string(),
                owner: owner.to_string(),
                value: String::new(),
            })
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn set_channels(&self, channels: Vec<DirChannel>) -> Result<(), DirectoryError> {
        let wire: Vec<WireChannel> = channels.iter().map(WireChannel::from).collect();
        self.http
            .put(format!("{}/channels", self.base_url))
            .json(&wire)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn update_property(
        &self,
        property: Property,
        channel_names: &[String],
    ) -> Result<(), DirectoryError> {
        self.http
            .post(format!("{}/properties/{}/channels", self.base_url, property.name))
            .json(&(property.value, channel_names))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn find_by_args(&self, args: &[(String, String)]) -> Result<Vec<DirChannel>, DirectoryError> {
        let resp = self
            .http
            .get(format!("{}/channels", self.base_url))
            .query(args)
            .send()
            .await?
            .error_for_status()?;
        let wire: Vec<WireChannel> = resp.json().await?;
        Ok(wire.into_iter().map(DirChannel::from).collect())
    }
}
