//! Integration tests: generation orchestrator (ib-gen ↔ ib-editor ↔ ib-core).
//!
//! The image service is a scripted double: each call pops the next step,
//! which can answer immediately, fail, or wait on a gate the test opens.

use async_trait::async_trait;
use ib_core::{EncodedImage, GenerationConfig, GenerationStatus, LayerPatch, NodeId, Point};
use ib_editor::{Applied, BoardMutation, CanvasEngine};
use ib_gen::collab::{
    ApiCredential, CredentialStore, GenerationRequest, Identity, ImageGenerator,
    MemoryCredentialStore, ServiceError, User,
};
use ib_gen::compile::CompileError;
use ib_gen::{GenerationError, Orchestrator};
use ib_render::{ImageCompositor, RasterCompositor};
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, oneshot};

// ─── Test doubles ───────────────────────────────────────────────────────

enum Step {
    Image(u8),
    Fail(&'static str),
    /// Wait for the gate, then answer with the image.
    Gated(oneshot::Receiver<()>, u8),
}

#[derive(Default)]
struct ScriptedGenerator {
    script: std::sync::Mutex<VecDeque<Step>>,
    requests: std::sync::Mutex<Vec<GenerationRequest>>,
    gate_reached: Notify,
}

impl ScriptedGenerator {
    fn new(steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: std::sync::Mutex::new(steps.into()),
            ..Default::default()
        })
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn fake_image(tag: u8) -> EncodedImage {
    EncodedImage::png(vec![tag])
}

#[async_trait]
impl ImageGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        credential: &ApiCredential,
        request: &GenerationRequest,
    ) -> Result<EncodedImage, ServiceError> {
        assert_eq!(credential.secret(), "test-key");
        self.requests.lock().unwrap().push(request.clone());
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Image(tag)) => Ok(fake_image(tag)),
            Some(Step::Fail(message)) => Err(ServiceError::new(message)),
            Some(Step::Gated(gate, tag)) => {
                self.gate_reached.notify_one();
                gate.await.map_err(|_| ServiceError::new("gate dropped"))?;
                Ok(fake_image(tag))
            }
            None => Err(ServiceError::new("unexpected call")),
        }
    }
}

struct StaticIdentity(Option<User>);

#[async_trait]
impl Identity for StaticIdentity {
    async fn current_user(&self) -> Option<User> {
        self.0.clone()
    }
}

fn signed_in() -> Arc<StaticIdentity> {
    Arc::new(StaticIdentity(Some(User {
        id: "user-1".into(),
        email: Some("artist@example.com".into()),
    })))
}

async fn store_with_key() -> Arc<MemoryCredentialStore> {
    let store = MemoryCredentialStore::new();
    store
        .set("user-1", "gemini", ApiCredential::new("test-key"))
        .await
        .unwrap();
    Arc::new(store)
}

// ─── Board helpers ──────────────────────────────────────────────────────

fn png(width: u32, height: u32) -> EncodedImage {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([40, 80, 120, 255]));
    RasterCompositor.encode(img).unwrap()
}

fn add_node(engine: &mut CanvasEngine, mutation: BoardMutation) -> NodeId {
    match engine.apply(mutation) {
        Applied::NodeAdded(id) => id,
        other => panic!("expected node, got {other:?}"),
    }
}

fn add_generator(engine: &mut CanvasEngine, prompt: &str) -> NodeId {
    let id = add_node(
        engine,
        BoardMutation::AddGeneratorNode {
            position: Point::new(600.0, 0.0),
        },
    );
    let layer = engine.board.get(id).unwrap().as_generator().unwrap().layers[0].id;
    engine.apply(BoardMutation::UpdateLayer {
        id,
        layer,
        patch: LayerPatch {
            prompt: Some(prompt.into()),
            ..Default::default()
        },
    });
    id
}

fn add_image(engine: &mut CanvasEngine, image: EncodedImage) -> NodeId {
    let id = add_node(
        engine,
        BoardMutation::AddImageNode {
            position: Point::ZERO,
        },
    );
    engine.apply(BoardMutation::SetImage {
        id,
        image: Some(image),
    });
    id
}

fn set_count(engine: &mut CanvasEngine, id: NodeId, image_count: u8) {
    engine.apply(BoardMutation::SetGenerationConfig {
        id,
        config: GenerationConfig {
            image_count,
            ..Default::default()
        },
    });
}

async fn orchestrator(
    engine: CanvasEngine,
    generator: Arc<ScriptedGenerator>,
) -> Orchestrator {
    Orchestrator::new(
        Arc::new(Mutex::new(engine)),
        generator,
        signed_in(),
        store_with_key().await,
    )
}

async fn status_of(orch: &Orchestrator, id: NodeId) -> GenerationStatus {
    let engine = orch.engine().lock().await;
    engine.board.get(id).unwrap().as_generator().unwrap().status
}

// ─── End to end ─────────────────────────────────────────────────────────

#[tokio::test]
async fn annotated_image_flows_into_the_request() {
    let mut engine = CanvasEngine::default();
    let img = add_image(&mut engine, png(200, 100));
    engine.apply(BoardMutation::AddAnnotation {
        id: img,
        x: 30.0,
        y: 40.0,
    });
    let generator = add_generator(&mut engine, "enhance [图1 标1]");
    assert!(
        engine
            .apply(BoardMutation::Connect {
                source: img,
                target: generator,
            })
            .changed()
    );
    assert_eq!(engine.board.get(img).unwrap().display_id, 1);
    assert_eq!(engine.board.get(generator).unwrap().display_id, 2);

    let service = ScriptedGenerator::new(vec![Step::Image(7)]);
    let orch = orchestrator(engine, service.clone()).await;
    let report = orch.generate(generator).await.unwrap();
    assert!(report.applied);
    assert_eq!(report.images, 1);

    let requests = service.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.prompt.contains("enhance [图1 标1]"));
    assert!(
        request
            .prompt
            .contains("Image 1 corresponds to [图1] (annotation markers baked in)"),
        "prompt was: {}",
        request.prompt
    );
    assert_eq!(request.reference_images.len(), 1);
    assert_eq!(request.model, "gemini-2.5-flash-image");

    let engine = orch.engine().lock().await;
    let data = engine.board.get(generator).unwrap().as_generator().unwrap();
    assert_eq!(data.status, GenerationStatus::Success);
    assert_eq!(data.generated_image(), Some(&fake_image(7)));
    assert_eq!(data.selected_index, 0);
}

#[tokio::test]
async fn references_follow_display_ids_not_wiring_order() {
    let mut engine = CanvasEngine::default();
    let images = [png(10, 10), png(20, 10), png(30, 10)];
    let ids: Vec<NodeId> = images
        .iter()
        .map(|img| add_image(&mut engine, img.clone()))
        .collect();
    let generator = add_generator(&mut engine, "collage");
    for &source in ids.iter().rev() {
        engine.apply(BoardMutation::Connect {
            source,
            target: generator,
        });
    }

    let service = ScriptedGenerator::new(vec![Step::Image(1)]);
    let orch = orchestrator(engine, service.clone()).await;
    orch.generate(generator).await.unwrap();

    let request = &service.requests()[0];
    assert_eq!(request.reference_images, images.to_vec());
    assert!(request.prompt.ends_with(
        "(Reference images: Image 1 corresponds to [图1]; \
         Image 2 corresponds to [图2]; Image 3 corresponds to [图3])"
    ));
}

#[tokio::test]
async fn batch_fans_out_and_keeps_response_order() {
    let mut engine = CanvasEngine::default();
    let generator = add_generator(&mut engine, "three cats");
    set_count(&mut engine, generator, 3);

    let service = ScriptedGenerator::new(vec![Step::Image(1), Step::Image(2), Step::Image(3)]);
    let orch = orchestrator(engine, service.clone()).await;
    let report = orch.generate(generator).await.unwrap();
    assert_eq!(report.images, 3);
    assert_eq!(service.requests().len(), 3);

    let engine = orch.engine().lock().await;
    let data = engine.board.get(generator).unwrap().as_generator().unwrap();
    let tags: Vec<u8> = data.images.iter().map(|i| i.bytes[0]).collect();
    assert_eq!(tags, vec![1, 2, 3]);
}

#[tokio::test]
async fn out_of_range_image_count_is_clamped() {
    let mut engine = CanvasEngine::default();
    let generator = add_generator(&mut engine, "one please");
    // Boards edited outside the engine can carry a count of zero.
    engine
        .board
        .get_mut(generator)
        .and_then(|n| n.as_generator_mut())
        .unwrap()
        .config
        .image_count = 0;

    let service = ScriptedGenerator::new(vec![Step::Image(5)]);
    let orch = orchestrator(engine, service.clone()).await;
    let report = orch.generate(generator).await.unwrap();
    assert_eq!(report.images, 1);
    assert_eq!(service.requests().len(), 1);
}

// ─── Failures ───────────────────────────────────────────────────────────

#[tokio::test]
async fn one_failed_call_fails_the_whole_batch() {
    let mut engine = CanvasEngine::default();
    let generator = add_generator(&mut engine, "three cats");
    set_count(&mut engine, generator, 3);

    let service = ScriptedGenerator::new(vec![
        Step::Image(1),
        Step::Fail("quota exceeded"),
        Step::Image(3),
    ]);
    let orch = orchestrator(engine, service).await;
    let err = orch.generate(generator).await.unwrap_err();
    assert!(matches!(err, GenerationError::Service(_)));
    assert!(!err.is_validation());

    let engine = orch.engine().lock().await;
    let data = engine.board.get(generator).unwrap().as_generator().unwrap();
    assert_eq!(data.status, GenerationStatus::Error);
    assert!(data.images.is_empty());
    assert_eq!(data.error.as_deref(), Some("quota exceeded"));
    assert_eq!(data.config.image_count, 3);
}

#[tokio::test]
async fn retry_after_error_succeeds() {
    let mut engine = CanvasEngine::default();
    let generator = add_generator(&mut engine, "retry me");
    let service = ScriptedGenerator::new(vec![Step::Fail("timeout"), Step::Image(9)]);
    let orch = orchestrator(engine, service).await;

    assert!(orch.generate(generator).await.is_err());
    assert_eq!(status_of(&orch, generator).await, GenerationStatus::Error);

    orch.generate(generator).await.unwrap();
    assert_eq!(status_of(&orch, generator).await, GenerationStatus::Success);
}

#[tokio::test]
async fn bake_failure_marks_node_without_calling_the_service() {
    let mut engine = CanvasEngine::default();
    let img = add_image(&mut engine, EncodedImage::png(b"not an image".to_vec()));
    engine.apply(BoardMutation::AddAnnotation {
        id: img,
        x: 5.0,
        y: 5.0,
    });
    let generator = add_generator(&mut engine, "x");
    engine.apply(BoardMutation::Connect {
        source: img,
        target: generator,
    });

    let service = ScriptedGenerator::new(vec![Step::Image(1)]);
    let orch = orchestrator(engine, service.clone()).await;
    let err = orch.generate(generator).await.unwrap_err();
    assert!(matches!(
        err,
        GenerationError::Compile(CompileError::Bake { display_id: 1, .. })
    ));
    assert!(service.requests().is_empty());
    assert_eq!(status_of(&orch, generator).await, GenerationStatus::Error);
}

#[tokio::test]
async fn failures_stay_on_their_own_node() {
    let mut engine = CanvasEngine::default();
    let failing = add_generator(&mut engine, "a");
    let bystander = add_generator(&mut engine, "b");
    let service = ScriptedGenerator::new(vec![Step::Fail("boom")]);
    let orch = orchestrator(engine, service).await;

    assert!(orch.generate(failing).await.is_err());
    assert_eq!(status_of(&orch, failing).await, GenerationStatus::Error);
    assert_eq!(status_of(&orch, bystander).await, GenerationStatus::Idle);
}

// ─── Validation ─────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_prompt_is_rejected_before_loading() {
    let mut engine = CanvasEngine::default();
    let generator = add_generator(&mut engine, "   ");
    let service = ScriptedGenerator::new(vec![]);
    let orch = orchestrator(engine, service.clone()).await;

    let err = orch.generate(generator).await.unwrap_err();
    assert!(matches!(err, GenerationError::Compile(CompileError::EmptyPrompt)));
    assert!(err.is_validation());
    assert_eq!(status_of(&orch, generator).await, GenerationStatus::Idle);
    assert!(service.requests().is_empty());
}

#[tokio::test]
async fn signed_out_user_is_rejected() {
    let mut engine = CanvasEngine::default();
    let generator = add_generator(&mut engine, "hello");
    let orch = Orchestrator::new(
        Arc::new(Mutex::new(engine)),
        ScriptedGenerator::new(vec![]),
        Arc::new(StaticIdentity(None)),
        store_with_key().await,
    );
    let err = orch.generate(generator).await.unwrap_err();
    assert!(matches!(err, GenerationError::NotAuthenticated));
    assert_eq!(status_of(&orch, generator).await, GenerationStatus::Idle);
}

#[tokio::test]
async fn missing_credential_is_rejected() {
    let mut engine = CanvasEngine::default();
    let generator = add_generator(&mut engine, "hello");
    let orch = Orchestrator::new(
        Arc::new(Mutex::new(engine)),
        ScriptedGenerator::new(vec![]),
        signed_in(),
        Arc::new(MemoryCredentialStore::new()),
    );
    let err = orch.generate(generator).await.unwrap_err();
    assert!(matches!(err, GenerationError::MissingCredential { .. }));
    assert_eq!(status_of(&orch, generator).await, GenerationStatus::Idle);

    // Saving a key through the orchestrator unblocks it.
    orch.save_credential(ApiCredential::new("test-key"))
        .await
        .unwrap();
    assert!(orch.test_credential().await.unwrap());
    orch.delete_credential().await.unwrap();
    assert!(!orch.test_credential().await.unwrap());
}

// ─── Overlapping triggers ───────────────────────────────────────────────

#[tokio::test]
async fn late_response_from_an_earlier_trigger_is_ignored() {
    let mut engine = CanvasEngine::default();
    let generator = add_generator(&mut engine, "race");
    let (release_first, gate) = oneshot::channel();
    let service = ScriptedGenerator::new(vec![Step::Gated(gate, 1), Step::Image(2)]);
    let orch = orchestrator(engine, service.clone()).await;

    let first = orch.generate(generator);
    let second = async {
        service.gate_reached.notified().await;
        let report = orch.generate(generator).await;
        // The earlier call answers only after the later one has landed.
        release_first.send(()).unwrap();
        report
    };
    let (first, second) = tokio::join!(first, second);

    let first = first.unwrap();
    let second = second.unwrap();
    assert!(first.request < second.request);
    assert!(!first.applied);
    assert!(second.applied);

    let engine = orch.engine().lock().await;
    let data = engine.board.get(generator).unwrap().as_generator().unwrap();
    assert_eq!(data.status, GenerationStatus::Success);
    assert_eq!(data.images.to_vec(), vec![fake_image(2)]);
}
