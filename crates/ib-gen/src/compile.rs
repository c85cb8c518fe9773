//! Prompt compilation: layered prompt text plus the reference images wired
//! into a generator.
//!
//! Compilation runs in two phases so the board is only borrowed briefly:
//!
//! 1. [`resolve`] reads the board and copies out everything needed: the
//!    joined layer text and the ordered source images with their markers.
//! 2. [`PromptPlan::bake`] burns markers into annotated images and writes
//!    the correspondence notes. This is the CPU-heavy part and needs no
//!    board access.
//!
//! The generation service only sees prose about image order, so the notes,
//! the reference list, and the images all follow one ordering: ascending
//! source display id.

use ib_core::{Annotation, Board, EncodedImage, GeneratorData, NodeId};
use ib_render::bake::{BakeError, ImageCompositor, MarkerStyle, bake_annotations};

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("{0} is not a generator node")]
    NotAGenerator(NodeId),

    #[error("the prompt is empty")]
    EmptyPrompt,

    #[error("could not add markers to [图{display_id}]: {source}")]
    Bake {
        display_id: u32,
        #[source]
        source: BakeError,
    },
}

/// One upstream image, as copied off the board.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub node: NodeId,
    pub display_id: u32,
    pub image: EncodedImage,
    /// Markers to bake in. Always empty for generator outputs.
    pub annotations: Vec<Annotation>,
}

/// Everything a compile needs, detached from the board.
#[derive(Debug, Clone)]
pub struct PromptPlan {
    pub text: String,
    pub sources: Vec<SourceImage>,
}

/// A reference image as sent to the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceImage {
    pub node: NodeId,
    pub display_id: u32,
    pub image: EncodedImage,
    pub baked: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompiledPrompt {
    /// Layer text followed by the reference-image block, if any.
    pub prompt: String,
    pub references: Vec<ReferenceImage>,
    /// One note per reference, same order.
    pub notes: Vec<String>,
}

impl CompiledPrompt {
    pub fn reference_images(&self) -> Vec<EncodedImage> {
        self.references.iter().map(|r| r.image.clone()).collect()
    }
}

/// Enabled layers with non-blank text, joined by newlines, falling back to
/// the legacy single prompt.
pub fn prompt_text(data: &GeneratorData) -> Option<String> {
    let parts: Vec<&str> = data
        .layers
        .iter()
        .filter(|l| l.enabled && !l.prompt.trim().is_empty())
        .map(|l| l.prompt.as_str())
        .collect();
    if !parts.is_empty() {
        return Some(parts.join("\n"));
    }
    data.legacy_prompt
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .map(str::to_string)
}

/// Read the prompt and the connected source images of `target`.
///
/// Sources without an image (empty image source, generator with no result
/// yet) are skipped.
pub fn resolve(board: &Board, target: NodeId) -> Result<PromptPlan, CompileError> {
    let data = board
        .get(target)
        .and_then(|n| n.as_generator())
        .ok_or(CompileError::NotAGenerator(target))?;
    let text = prompt_text(data).ok_or(CompileError::EmptyPrompt)?;

    let sources = board
        .incoming(target)
        .into_iter()
        .filter_map(|node| {
            let image = node.output_image()?.clone();
            let annotations = node
                .as_image_source()
                .map(|s| s.annotations.clone())
                .unwrap_or_default();
            Some(SourceImage {
                node: node.id,
                display_id: node.display_id,
                image,
                annotations,
            })
        })
        .collect();

    Ok(PromptPlan { text, sources })
}

impl PromptPlan {
    /// Bake markers and assemble the final prompt.
    pub fn bake<C: ImageCompositor>(
        self,
        compositor: &C,
        style: &MarkerStyle,
    ) -> Result<CompiledPrompt, CompileError> {
        let mut references = Vec::with_capacity(self.sources.len());
        let mut notes = Vec::with_capacity(self.sources.len());

        for (i, source) in self.sources.into_iter().enumerate() {
            let n = i + 1;
            let baked = !source.annotations.is_empty();
            let image = if baked {
                bake_annotations(compositor, &source.image, &source.annotations, style).map_err(
                    |source_err| CompileError::Bake {
                        display_id: source.display_id,
                        source: source_err,
                    },
                )?
            } else {
                source.image
            };
            notes.push(if baked {
                format!(
                    "Image {n} corresponds to [图{}] (annotation markers baked in)",
                    source.display_id
                )
            } else {
                format!("Image {n} corresponds to [图{}]", source.display_id)
            });
            references.push(ReferenceImage {
                node: source.node,
                display_id: source.display_id,
                image,
                baked,
            });
        }

        let prompt = if notes.is_empty() {
            self.text
        } else {
            format!("{}\n\n(Reference images: {})", self.text, notes.join("; "))
        };
        log::debug!(
            "compiled prompt with {} reference image(s)",
            references.len()
        );
        Ok(CompiledPrompt {
            prompt,
            references,
            notes,
        })
    }
}

/// Resolve and bake in one go.
pub fn compile<C: ImageCompositor>(
    board: &Board,
    target: NodeId,
    compositor: &C,
    style: &MarkerStyle,
) -> Result<CompiledPrompt, CompileError> {
    resolve(board, target)?.bake(compositor, style)
}
