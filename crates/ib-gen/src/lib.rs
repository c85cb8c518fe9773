//! Generation pipeline: prompt compilation, collaborator interfaces, the
//! per-node generation orchestrator, and download naming.

pub mod collab;
pub mod compile;
pub mod export;
pub mod orchestrate;

pub use collab::{
    ApiCredential, CredentialStore, GenerationRequest, Identity, ImageGenerator,
    MemoryCredentialStore, ServiceError, User,
};
pub use compile::{CompileError, CompiledPrompt, ReferenceImage, compile};
pub use export::download_file_name;
pub use orchestrate::{GenerationError, GenerationReport, Orchestrator};
