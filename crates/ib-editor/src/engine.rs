//! Canvas engine: the single owner of board, view, selection, and history.
//!
//! Every board edit, whether it comes from a pointer gesture, a shortcut, or
//! a panel control in the host, is a [`BoardMutation`] applied through
//! [`CanvasEngine::apply`]. That keeps one serialized update path and
//! gives undo/redo a single place to record from.

use crate::commands::CommandStack;
use crate::drag::{DragContext, DragMachine, EditorAction};
use crate::input::InputEvent;
use crate::shortcuts::{ShortcutAction, ShortcutMap};
use ib_core::{
    Board, ConnectionId, EncodedImage, GenerationConfig, LayerId, LayerPatch, NodeId, ViewState,
};
use ib_render::hit::HitTolerance;
use ib_render::route::ConnectionRoute;
use kurbo::{Point, Size};
use serde::{Deserialize, Serialize};

/// Tunables for the interaction layer. Every field has a default, so a
/// partial JSON object is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub hit: HitTolerance,
    pub undo_depth: usize,
    /// Zoom factor applied per wheel notch or zoom shortcut.
    pub zoom_step: f64,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            hit: HitTolerance::default(),
            undo_depth: 100,
            zoom_step: 1.1,
        }
    }
}

impl EditorConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// A structural edit to the board.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardMutation {
    AddImageNode {
        position: Point,
    },
    AddGeneratorNode {
        position: Point,
    },
    RemoveNode {
        id: NodeId,
    },
    MoveNode {
        id: NodeId,
        position: Point,
    },
    SetNodeHeight {
        id: NodeId,
        height: f64,
    },
    Connect {
        source: NodeId,
        target: NodeId,
    },
    RemoveConnection {
        id: ConnectionId,
    },
    SetImage {
        id: NodeId,
        image: Option<EncodedImage>,
    },
    SetAnnotating {
        id: NodeId,
        annotating: bool,
    },
    /// `x`/`y` are percentages of the image size.
    AddAnnotation {
        id: NodeId,
        x: f64,
        y: f64,
    },
    RemoveAnnotation {
        id: NodeId,
        annotation: u32,
    },
    ClearAnnotations {
        id: NodeId,
    },
    AddLayer {
        id: NodeId,
    },
    RemoveLayer {
        id: NodeId,
        layer: LayerId,
    },
    UpdateLayer {
        id: NodeId,
        layer: LayerId,
        patch: LayerPatch,
    },
    SetLegacyPrompt {
        id: NodeId,
        prompt: Option<String>,
    },
    SetTitle {
        id: NodeId,
        title: String,
    },
    SetGenerationConfig {
        id: NodeId,
        config: GenerationConfig,
    },
    SelectResult {
        id: NodeId,
        index: usize,
    },
}

impl BoardMutation {
    /// Human-readable label used for undo history.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::AddImageNode { .. } => "Add image",
            Self::AddGeneratorNode { .. } => "Add generator",
            Self::RemoveNode { .. } => "Delete node",
            Self::MoveNode { .. } => "Move node",
            Self::SetNodeHeight { .. } => "Resize node",
            Self::Connect { .. } => "Connect",
            Self::RemoveConnection { .. } => "Delete connection",
            Self::SetImage { .. } => "Set image",
            Self::SetAnnotating { .. } => "Toggle annotation mode",
            Self::AddAnnotation { .. } => "Add marker",
            Self::RemoveAnnotation { .. } => "Delete marker",
            Self::ClearAnnotations { .. } => "Clear markers",
            Self::AddLayer { .. } => "Add layer",
            Self::RemoveLayer { .. } => "Delete layer",
            Self::UpdateLayer { .. } => "Edit layer",
            Self::SetLegacyPrompt { .. } => "Edit prompt",
            Self::SetTitle { .. } => "Rename",
            Self::SetGenerationConfig { .. } => "Change settings",
            Self::SelectResult { .. } => "Select result",
        }
    }

    /// Height changes come from layout measurement, not the user.
    fn is_undoable(&self) -> bool {
        !matches!(self, Self::SetNodeHeight { .. })
    }
}

/// Result of applying a [`BoardMutation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The board refused the edit (unknown id, duplicate, last layer, ...).
    Rejected,
    Done,
    NodeAdded(NodeId),
    Connected(ConnectionId),
    AnnotationAdded(u32),
    LayerAdded(LayerId),
}

impl Applied {
    pub fn changed(self) -> bool {
        !matches!(self, Self::Rejected)
    }
}

/// Currently selected node and/or connection. Selecting one kind clears
/// the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Selection {
    pub node: Option<NodeId>,
    pub connection: Option<ConnectionId>,
}

pub struct CanvasEngine {
    pub board: Board,
    pub view: ViewState,
    pub selection: Selection,
    /// Canvas container size in screen pixels, for zooming about the center.
    pub viewport: Size,
    config: EditorConfig,
    drag: DragMachine,
    history: CommandStack,
}

impl Default for CanvasEngine {
    fn default() -> Self {
        Self::new(EditorConfig::default())
    }
}

impl CanvasEngine {
    pub fn new(config: EditorConfig) -> Self {
        Self::with_board(Board::new(), config)
    }

    pub fn with_board(board: Board, config: EditorConfig) -> Self {
        Self {
            board,
            view: ViewState::default(),
            selection: Selection::default(),
            viewport: Size::ZERO,
            history: CommandStack::new(config.undo_depth),
            config,
            drag: DragMachine::new(),
        }
    }

    pub fn config(&self) -> &EditorConfig {
        &self.config
    }

    pub fn drag(&self) -> &DragMachine {
        &self.drag
    }

    /// Place the canvas container on screen.
    pub fn set_viewport(&mut self, origin: Point, size: Size) {
        self.view.origin = origin;
        self.viewport = size;
    }

    // ─── Board edits ─────────────────────────────────────────────────────

    pub fn apply(&mut self, mutation: BoardMutation) -> Applied {
        log::trace!("apply {mutation:?}");
        if !mutation.is_undoable() {
            return apply_to_board(&mut self.board, mutation).unwrap_or(Applied::Rejected);
        }
        let description = mutation.describe();
        let applied = self
            .history
            .execute(&mut self.board, description, |board| {
                apply_to_board(board, mutation)
            })
            .unwrap_or(Applied::Rejected);
        self.prune_selection();
        applied
    }

    pub fn undo(&mut self) -> Option<String> {
        if !self.drag.is_idle() {
            return None;
        }
        let desc = self.history.undo(&mut self.board);
        self.prune_selection();
        desc
    }

    pub fn redo(&mut self) -> Option<String> {
        if !self.drag.is_idle() {
            return None;
        }
        let desc = self.history.redo(&mut self.board);
        self.prune_selection();
        desc
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Remove the selected connection, or else the selected node.
    pub fn delete_selection(&mut self) -> bool {
        let mutation = match self.selection {
            Selection {
                connection: Some(id),
                ..
            } => BoardMutation::RemoveConnection { id },
            Selection { node: Some(id), .. } => BoardMutation::RemoveNode { id },
            _ => return false,
        };
        self.apply(mutation).changed()
    }

    // ─── Selection ───────────────────────────────────────────────────────

    pub fn select_node(&mut self, id: NodeId) {
        self.selection = Selection {
            node: Some(id),
            connection: None,
        };
    }

    pub fn select_connection(&mut self, id: ConnectionId) {
        self.selection = Selection {
            node: None,
            connection: Some(id),
        };
    }

    pub fn clear_selection(&mut self) {
        self.selection = Selection::default();
    }

    fn prune_selection(&mut self) {
        if self.selection.node.is_some_and(|id| self.board.get(id).is_none()) {
            self.selection.node = None;
        }
        if self
            .selection
            .connection
            .is_some_and(|id| self.board.connection(id).is_none())
        {
            self.selection.connection = None;
        }
    }

    // ─── Input ───────────────────────────────────────────────────────────

    /// Feed one host event through the engine. Returns `true` when the
    /// canvas needs a redraw.
    pub fn handle_input(&mut self, event: &InputEvent) -> bool {
        match event {
            InputEvent::PointerDown { x, y } => {
                let cx = DragContext {
                    board: &self.board,
                    view: &self.view,
                    tolerance: &self.config.hit,
                };
                let actions = self.drag.pointer_down(Point::new(*x, *y), cx);
                if self.drag.is_dragging_node() {
                    self.history.begin_batch(&self.board, "Move node");
                }
                self.run_actions(actions)
            }
            InputEvent::PointerMove { x, y } => {
                let actions = self.drag.pointer_move(Point::new(*x, *y), &self.view);
                self.run_actions(actions)
            }
            InputEvent::PointerUp { x, y } => {
                let cx = DragContext {
                    board: &self.board,
                    view: &self.view,
                    tolerance: &self.config.hit,
                };
                let actions = self.drag.pointer_up(Point::new(*x, *y), cx);
                let changed = self.run_actions(actions);
                self.history.end_batch(&self.board);
                changed
            }
            InputEvent::Wheel { x, y, delta_y } => {
                if *delta_y == 0.0 {
                    return false;
                }
                let factor = if *delta_y < 0.0 {
                    self.config.zoom_step
                } else {
                    1.0 / self.config.zoom_step
                };
                self.view.zoom_at(Point::new(*x, *y), factor);
                true
            }
            InputEvent::Key { key, modifiers } => {
                match ShortcutMap::resolve(
                    key,
                    modifiers.ctrl,
                    modifiers.shift,
                    modifiers.alt,
                    modifiers.meta,
                ) {
                    Some(action) => self.run_shortcut(action),
                    None => false,
                }
            }
        }
    }

    /// Flush coalesced drag moves. The host calls this once per animation
    /// frame.
    pub fn on_frame(&mut self) -> bool {
        let was_connecting = self.drag.rubber_band(&self.board).is_some();
        let actions = self.drag.on_frame();
        self.run_actions(actions) || was_connecting
    }

    pub fn run_shortcut(&mut self, action: ShortcutAction) -> bool {
        log::debug!("shortcut {action:?}");
        match action {
            ShortcutAction::Undo => self.undo().is_some(),
            ShortcutAction::Redo => self.redo().is_some(),
            ShortcutAction::Delete => self.drag.is_idle() && self.delete_selection(),
            ShortcutAction::ZoomIn => self.zoom_about_center(self.config.zoom_step),
            ShortcutAction::ZoomOut => self.zoom_about_center(1.0 / self.config.zoom_step),
            ShortcutAction::ResetView => {
                self.view.reset();
                true
            }
            ShortcutAction::Cancel => {
                if self.drag.is_idle() {
                    let had = self.selection != Selection::default();
                    self.clear_selection();
                    had
                } else {
                    let actions = self.drag.cancel();
                    self.run_actions(actions);
                    self.history.end_batch(&self.board);
                    true
                }
            }
        }
    }

    fn zoom_about_center(&mut self, factor: f64) -> bool {
        let center = self.view.origin + self.viewport.to_vec2() / 2.0;
        self.view.zoom_at(center, factor);
        true
    }

    fn run_actions(&mut self, actions: Vec<EditorAction>) -> bool {
        let mut changed = false;
        for action in actions {
            changed |= match action {
                EditorAction::PanBy(delta) => {
                    self.view.pan_by(delta);
                    true
                }
                EditorAction::SelectNode(id) => {
                    self.select_node(id);
                    true
                }
                EditorAction::SelectConnection(id) => {
                    self.select_connection(id);
                    true
                }
                EditorAction::ClearSelection => {
                    self.clear_selection();
                    true
                }
                EditorAction::Mutate(mutation) => self.apply(mutation).changed(),
            };
        }
        changed
    }

    /// Routes for every connection, in creation order, for drawing.
    pub fn connection_routes(&self) -> Vec<(ConnectionId, ConnectionRoute)> {
        self.board
            .connections()
            .into_iter()
            .filter_map(|c| {
                let source = self.board.get(c.source)?;
                let target = self.board.get(c.target)?;
                Some((c.id, ConnectionRoute::between(source, target)))
            })
            .collect()
    }
}

/// Dispatch one mutation to the board.
fn apply_to_board(board: &mut Board, mutation: BoardMutation) -> Option<Applied> {
    let done = |ok: bool| ok.then_some(Applied::Done);
    match mutation {
        BoardMutation::AddImageNode { position } => {
            Some(Applied::NodeAdded(board.add_image_node(position)))
        }
        BoardMutation::AddGeneratorNode { position } => {
            Some(Applied::NodeAdded(board.add_generator_node(position)))
        }
        BoardMutation::RemoveNode { id } => board.remove_node(id).map(|_| Applied::Done),
        BoardMutation::MoveNode { id, position } => {
            let unchanged = board.get(id).is_some_and(|n| n.position == position);
            done(!unchanged && board.move_node(id, position))
        }
        BoardMutation::SetNodeHeight { id, height } => done(board.set_node_height(id, height)),
        BoardMutation::Connect { source, target } => {
            board.connect(source, target).map(Applied::Connected)
        }
        BoardMutation::RemoveConnection { id } => {
            board.remove_connection(id).map(|_| Applied::Done)
        }
        BoardMutation::SetImage { id, image } => done(board.set_image(id, image)),
        BoardMutation::SetAnnotating { id, annotating } => {
            done(board.set_annotating(id, annotating))
        }
        BoardMutation::AddAnnotation { id, x, y } => {
            board.add_annotation(id, x, y).map(Applied::AnnotationAdded)
        }
        BoardMutation::RemoveAnnotation { id, annotation } => {
            done(board.remove_annotation(id, annotation))
        }
        BoardMutation::ClearAnnotations { id } => done(board.clear_annotations(id)),
        BoardMutation::AddLayer { id } => board.add_layer(id).map(Applied::LayerAdded),
        BoardMutation::RemoveLayer { id, layer } => done(board.remove_layer(id, layer)),
        BoardMutation::UpdateLayer { id, layer, patch } => {
            done(board.update_layer(id, layer, patch))
        }
        BoardMutation::SetLegacyPrompt { id, prompt } => {
            done(board.set_legacy_prompt(id, prompt))
        }
        BoardMutation::SetTitle { id, title } => done(board.set_title(id, title)),
        BoardMutation::SetGenerationConfig { id, config } => {
            done(board.set_generation_config(id, config))
        }
        BoardMutation::SelectResult { id, index } => done(board.select_result(id, index)),
    }
}
