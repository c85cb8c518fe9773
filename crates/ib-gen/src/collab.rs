//! External collaborators: the image-generation service, the identity
//! provider, and the per-user credential store.
//!
//! All three are async traits so hosts can back them with HTTP clients,
//! browser storage, or test doubles.

use async_trait::async_trait;
use ib_core::{AspectRatio, EncodedImage, Resolution};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// Human-readable failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    pub message: String,
}

impl ServiceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub email: Option<String>,
}

/// An API key. The secret never shows up in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiCredential {
    secret: String,
}

impl ApiCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiCredential(***)")
    }
}

/// One generation call. The service returns a single image per call;
/// batches are fanned out by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    pub reference_images: Vec<EncodedImage>,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    pub model: String,
}

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(
        &self,
        credential: &ApiCredential,
        request: &GenerationRequest,
    ) -> Result<EncodedImage, ServiceError>;
}

#[async_trait]
pub trait Identity: Send + Sync {
    /// The signed-in user, or `None` when unauthenticated.
    async fn current_user(&self) -> Option<User>;
}

/// Per-user credentials keyed by (user id, service name).
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, user_id: &str, service: &str) -> Result<Option<ApiCredential>, ServiceError>;

    async fn set(
        &self,
        user_id: &str,
        service: &str,
        credential: ApiCredential,
    ) -> Result<(), ServiceError>;

    async fn delete(&self, user_id: &str, service: &str) -> Result<(), ServiceError>;

    /// Check that the stored credential is usable.
    async fn test(&self, user_id: &str, service: &str) -> Result<bool, ServiceError>;
}

/// Process-local credential store. `test` only checks that a non-blank
/// key is present.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: RwLock<HashMap<(String, String), ApiCredential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, user_id: &str, service: &str) -> Result<Option<ApiCredential>, ServiceError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(&(user_id.to_string(), service.to_string()))
            .cloned())
    }

    async fn set(
        &self,
        user_id: &str,
        service: &str,
        credential: ApiCredential,
    ) -> Result<(), ServiceError> {
        self.entries
            .write()
            .await
            .insert((user_id.to_string(), service.to_string()), credential);
        Ok(())
    }

    async fn delete(&self, user_id: &str, service: &str) -> Result<(), ServiceError> {
        self.entries
            .write()
            .await
            .remove(&(user_id.to_string(), service.to_string()));
        Ok(())
    }

    async fn test(&self, user_id: &str, service: &str) -> Result<bool, ServiceError> {
        Ok(self
            .get(user_id, service)
            .await?
            .is_some_and(|c| !c.secret().trim().is_empty()))
    }
}
