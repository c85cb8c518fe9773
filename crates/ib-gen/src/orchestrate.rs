//! Generation orchestrator: validate → enter loading → fan out → record.
//!
//! The engine is shared as `Arc<Mutex<CanvasEngine>>` and the lock is only
//! held for short board reads and writes, never across a network call, so
//! the canvas stays interactive while a generation is in flight.
//!
//! Each trigger gets a fresh [`RequestId`] from the board. Results are
//! recorded with that id, and the board drops any result whose id is no
//! longer the node's active one. Triggering twice therefore lets only the
//! later cycle land, whichever response arrives last.

use crate::collab::{
    ApiCredential, CredentialStore, GenerationRequest, Identity, ImageGenerator, ServiceError, User,
};
use crate::compile::{self, CompileError, CompiledPrompt};
use futures::future::try_join_all;
use ib_core::{NodeId, RequestId};
use ib_editor::CanvasEngine;
use ib_render::bake::{ImageCompositor, MarkerStyle};
use ib_render::RasterCompositor;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Credential-store service name for the image API.
pub const DEFAULT_SERVICE: &str = "gemini";

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("sign in to generate images")]
    NotAuthenticated,

    #[error("no API key saved for {service}")]
    MissingCredential { service: String },

    #[error("could not read credentials: {0}")]
    CredentialStore(#[source] ServiceError),

    #[error("generation failed: {0}")]
    Service(#[source] ServiceError),

    #[error("image preparation stopped unexpectedly: {0}")]
    Worker(String),
}

impl GenerationError {
    /// Validation errors block the trigger before the node enters loading.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Compile(CompileError::EmptyPrompt | CompileError::NotAGenerator(_))
                | Self::NotAuthenticated
                | Self::MissingCredential { .. }
                | Self::CredentialStore(_)
        )
    }
}

/// What happened to a generation cycle that got past validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationReport {
    pub request: RequestId,
    /// `false` when a newer cycle had started and this result was dropped.
    pub applied: bool,
    pub images: usize,
}

pub struct Orchestrator<C = RasterCompositor> {
    engine: Arc<Mutex<CanvasEngine>>,
    generator: Arc<dyn ImageGenerator>,
    identity: Arc<dyn Identity>,
    credentials: Arc<dyn CredentialStore>,
    compositor: C,
    style: MarkerStyle,
    service: String,
}

impl Orchestrator<RasterCompositor> {
    pub fn new(
        engine: Arc<Mutex<CanvasEngine>>,
        generator: Arc<dyn ImageGenerator>,
        identity: Arc<dyn Identity>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            engine,
            generator,
            identity,
            credentials,
            compositor: RasterCompositor,
            style: MarkerStyle::default(),
            service: DEFAULT_SERVICE.to_string(),
        }
    }
}

impl<C> Orchestrator<C>
where
    C: ImageCompositor + Clone + Send + 'static,
{
    pub fn with_compositor<D>(self, compositor: D) -> Orchestrator<D>
    where
        D: ImageCompositor + Clone + Send + 'static,
    {
        Orchestrator {
            engine: self.engine,
            generator: self.generator,
            identity: self.identity,
            credentials: self.credentials,
            compositor,
            style: self.style,
            service: self.service,
        }
    }

    pub fn with_marker_style(mut self, style: MarkerStyle) -> Self {
        self.style = style;
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn engine(&self) -> &Arc<Mutex<CanvasEngine>> {
        &self.engine
    }

    /// Run one generation cycle for `target`.
    ///
    /// Validation failures return an error and leave the node untouched.
    /// Everything after that is recorded on the node (status, results or
    /// error message) as long as this cycle is still the active one.
    pub async fn generate(&self, target: NodeId) -> Result<GenerationReport, GenerationError> {
        // ── Validate ──
        let (plan, config) = {
            let engine = self.engine.lock().await;
            let plan = compile::resolve(&engine.board, target)?;
            let config = engine
                .board
                .get(target)
                .and_then(|n| n.as_generator())
                .map(|g| g.config.clone().normalized())
                .ok_or(CompileError::NotAGenerator(target))?;
            (plan, config)
        };
        let user = self.require_user().await?;
        let credential = self
            .credentials
            .get(&user.id, &self.service)
            .await
            .map_err(GenerationError::CredentialStore)?
            .ok_or_else(|| GenerationError::MissingCredential {
                service: self.service.clone(),
            })?;

        // ── Loading ──
        let request_id = self
            .engine
            .lock()
            .await
            .board
            .begin_generation(target)
            .ok_or(CompileError::NotAGenerator(target))?;
        log::debug!(
            "{target}: {request_id} requesting {} image(s) from {}",
            config.image_count,
            config.model
        );

        let compiled = match self.bake(plan).await {
            Ok(compiled) => compiled,
            Err(err) => {
                self.record(target, request_id, Err(err.to_string())).await;
                return Err(err);
            }
        };

        // ── Fan out ──
        let request = GenerationRequest {
            reference_images: compiled.reference_images(),
            prompt: compiled.prompt,
            aspect_ratio: config.aspect_ratio,
            resolution: config.resolution,
            model: config.model,
        };
        let calls =
            (0..config.image_count).map(|_| self.generator.generate(&credential, &request));
        let outcome = try_join_all(calls).await;

        // ── Record ──
        match outcome {
            Ok(images) => {
                let count = images.len();
                let applied = self.record(target, request_id, Ok(images)).await;
                Ok(GenerationReport {
                    request: request_id,
                    applied,
                    images: count,
                })
            }
            Err(err) => {
                let applied = self.record(target, request_id, Err(err.message.clone())).await;
                if applied {
                    Err(GenerationError::Service(err))
                } else {
                    log::debug!(
                        "{target}: stale {request_id} failed after being superseded: {err}"
                    );
                    Ok(GenerationReport {
                        request: request_id,
                        applied: false,
                        images: 0,
                    })
                }
            }
        }
    }

    /// Ask the credential store whether the signed-in user's key works.
    pub async fn test_credential(&self) -> Result<bool, GenerationError> {
        let user = self.require_user().await?;
        self.credentials
            .test(&user.id, &self.service)
            .await
            .map_err(GenerationError::CredentialStore)
    }

    pub async fn save_credential(&self, credential: ApiCredential) -> Result<(), GenerationError> {
        let user = self.require_user().await?;
        self.credentials
            .set(&user.id, &self.service, credential)
            .await
            .map_err(GenerationError::CredentialStore)
    }

    pub async fn delete_credential(&self) -> Result<(), GenerationError> {
        let user = self.require_user().await?;
        self.credentials
            .delete(&user.id, &self.service)
            .await
            .map_err(GenerationError::CredentialStore)
    }

    async fn require_user(&self) -> Result<User, GenerationError> {
        self.identity
            .current_user()
            .await
            .ok_or(GenerationError::NotAuthenticated)
    }

    /// Marker baking is CPU-bound; keep it off the async workers.
    async fn bake(&self, plan: compile::PromptPlan) -> Result<CompiledPrompt, GenerationError> {
        let compositor = self.compositor.clone();
        let style = self.style.clone();
        tokio::task::spawn_blocking(move || plan.bake(&compositor, &style))
            .await
            .map_err(|err| GenerationError::Worker(err.to_string()))?
            .map_err(GenerationError::from)
    }

    async fn record(
        &self,
        target: NodeId,
        request: RequestId,
        outcome: ib_core::GenerationOutcome,
    ) -> bool {
        self.engine
            .lock()
            .await
            .board
            .finish_generation(target, request, outcome)
    }
}
