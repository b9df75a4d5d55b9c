// src/services/backend.rs

//! Remote retrieval backend.
//!
//! The upload coordinator only sees [`RetrievalBackend`]; [`HttpBackend`] is
//! the REST implementation used in production.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::{Document, UploadConfig};
use crate::utils::http::error_for_status;

/// Operations the upload coordinator needs from a retrieval backend.
///
/// Errors must carry their retry classification (see [`AppError::kind`]).
#[async_trait]
pub trait RetrievalBackend: Send + Sync {
    /// Find the collection called `name`, creating it if needed. Returns its id.
    async fn ensure_collection(&self, name: &str) -> Result<String>;

    /// Store a document as a remote object. Returns the object id.
    async fn upload_object(&self, document: &Document) -> Result<String>;

    /// Make an uploaded object searchable in a collection.
    ///
    /// Fails with [`AppError::CollectionNotFound`] if the collection is gone.
    async fn attach_object(&self, collection_id: &str, object_id: &str) -> Result<()>;

    async fn delete_collection(&self, collection_id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct CollectionInfo {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct CollectionList {
    #[serde(default)]
    collections: Vec<CollectionInfo>,
}

#[derive(Debug, Deserialize)]
struct Created {
    id: String,
}

#[derive(Debug, Serialize)]
struct CreateCollection<'a> {
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct AttachObject<'a> {
    object_id: &'a str,
}

/// JSON-over-HTTP backend authenticated with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpBackend {
    /// Build from configuration, reading the API key from the environment.
    pub fn from_config(config: &UploadConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(AppError::config("upload.base_url is not set"));
        }
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AppError::config(format!(
                "environment variable {} is not set",
                config.api_key_env
            ))
        })?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::new(client, &config.base_url, api_key))
    }

    pub fn new(client: Client, base_url: &str, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.api_key)
    }
}

#[async_trait]
impl RetrievalBackend for HttpBackend {
    async fn ensure_collection(&self, name: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url("collections"))
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        let list: CollectionList = error_for_status(response).await?.json().await?;
        if let Some(existing) = list.collections.into_iter().find(|c| c.name == name) {
            log::debug!("Using existing collection {} ({})", existing.name, existing.id);
            return Ok(existing.id);
        }

        let response = self
            .client
            .post(self.url("collections"))
            .header(AUTHORIZATION, self.bearer())
            .json(&CreateCollection { name })
            .send()
            .await?;
        let created: Created = error_for_status(response).await?.json().await?;
        log::info!("Created collection {name} ({})", created.id);
        Ok(created.id)
    }

    async fn upload_object(&self, document: &Document) -> Result<String> {
        // Header values must be ASCII; names are percent-encoded.
        let display_name: String =
            url::form_urlencoded::byte_serialize(document.name.as_bytes()).collect();
        let response = self
            .client
            .post(self.url("objects"))
            .header(AUTHORIZATION, self.bearer())
            .header(CONTENT_TYPE, document.mime_type)
            .header("X-Display-Name", display_name)
            .body(document.content.clone())
            .send()
            .await?;
        let created: Created = error_for_status(response).await?.json().await?;
        Ok(created.id)
    }

    async fn attach_object(&self, collection_id: &str, object_id: &str) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("collections/{collection_id}/objects")))
            .header(AUTHORIZATION, self.bearer())
            .json(&AttachObject { object_id })
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(AppError::CollectionNotFound(collection_id.to_string()));
        }
        error_for_status(response).await?;
        Ok(())
    }

    async fn delete_collection(&self, collection_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(self.url(&format!("collections/{collection_id}")))
            .header(AUTHORIZATION, self.bearer())
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            log::warn!("Collection {collection_id} was already gone");
            return Ok(());
        }
        error_for_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let backend = HttpBackend::new(Client::new(), "https://api.example/v1/", "key");
        assert_eq!(backend.url("objects"), "https://api.example/v1/objects");
        assert_eq!(backend.bearer(), "Bearer key");
    }

    #[test]
    fn test_missing_base_url_is_config_error() {
        let err = HttpBackend::from_config(&UploadConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
