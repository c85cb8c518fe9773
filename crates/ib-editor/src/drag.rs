//! Drag state machine for canvas pointer interaction.
//!
//! One mode is active at a time. A pointer-down only starts a gesture from
//! `Idle`; the gesture ends on pointer-up (or `cancel`).
//!
//! | Pointer-down on | Mode                 | Pointer-move                         |
//! |-----------------|----------------------|--------------------------------------|
//! | background      | `Panning`            | pan by the screen delta, immediately |
//! | node body       | `DraggingNode`       | pending position, flushed per frame  |
//! | output anchor   | `DraggingConnection` | pending endpoint, flushed per frame  |
//! | connection      | stays `Idle`         | —                                    |
//!
//! The machine never touches the board. It emits [`EditorAction`]s that the
//! [`CanvasEngine`](crate::engine::CanvasEngine) applies.

use crate::engine::BoardMutation;
use ib_core::{Board, ConnectionId, NodeId, ViewState};
use ib_render::hit::{self, Hit, HitTolerance};
use ib_render::route::{ConnectionRoute, output_anchor};
use kurbo::{Point, Vec2};

/// Side effects requested by the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum EditorAction {
    PanBy(Vec2),
    SelectNode(NodeId),
    SelectConnection(ConnectionId),
    ClearSelection,
    Mutate(BoardMutation),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    Panning {
        /// Screen point of the last applied pan step.
        last: Point,
    },
    DraggingNode {
        id: NodeId,
        start_world: Point,
        start_screen: Point,
        /// Latest computed position not yet flushed by `on_frame`.
        pending: Option<Point>,
    },
    DraggingConnection {
        source: NodeId,
        /// Rubber-band endpoint in world space, as of the last frame.
        cursor: Point,
        pending: Option<Point>,
    },
}

/// What the machine needs to know about the canvas for one event.
#[derive(Clone, Copy)]
pub struct DragContext<'a> {
    pub board: &'a Board,
    pub view: &'a ViewState,
    pub tolerance: &'a HitTolerance,
}

#[derive(Debug, Default)]
pub struct DragMachine {
    state: DragState,
}

impl DragMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DragState {
        &self.state
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, DragState::Idle)
    }

    pub fn is_dragging_node(&self) -> bool {
        matches!(self.state, DragState::DraggingNode { .. })
    }

    pub fn pointer_down(&mut self, screen: Point, cx: DragContext<'_>) -> Vec<EditorAction> {
        if !self.is_idle() {
            log::trace!("pointer-down ignored while {:?}", self.state);
            return Vec::new();
        }
        let world = cx.view.screen_to_world(screen);
        match hit::hit_test(cx.board, world, cx.tolerance) {
            Hit::OutputAnchor(source) => {
                self.state = DragState::DraggingConnection {
                    source,
                    cursor: world,
                    pending: None,
                };
                Vec::new()
            }
            Hit::Node(id) => {
                let Some(node) = cx.board.get(id) else {
                    return Vec::new();
                };
                self.state = DragState::DraggingNode {
                    id,
                    start_world: node.position,
                    start_screen: screen,
                    pending: None,
                };
                vec![EditorAction::SelectNode(id)]
            }
            Hit::Connection(id) => vec![EditorAction::SelectConnection(id)],
            Hit::Background => {
                self.state = DragState::Panning { last: screen };
                vec![EditorAction::ClearSelection]
            }
        }
    }

    pub fn pointer_move(&mut self, screen: Point, view: &ViewState) -> Vec<EditorAction> {
        match &mut self.state {
            DragState::Idle => Vec::new(),
            DragState::Panning { last } => {
                let delta = screen - *last;
                *last = screen;
                if delta == Vec2::ZERO {
                    Vec::new()
                } else {
                    vec![EditorAction::PanBy(delta)]
                }
            }
            DragState::DraggingNode {
                start_world,
                start_screen,
                pending,
                ..
            } => {
                *pending =
                    Some(*start_world + view.screen_delta_to_world(screen - *start_screen));
                Vec::new()
            }
            DragState::DraggingConnection { pending, .. } => {
                *pending = Some(view.screen_to_world(screen));
                Vec::new()
            }
        }
    }

    /// Flush coalesced pointer-moves. Call once per animation frame.
    pub fn on_frame(&mut self) -> Vec<EditorAction> {
        match &mut self.state {
            DragState::DraggingNode { id, pending, .. } => match pending.take() {
                Some(position) => vec![EditorAction::Mutate(BoardMutation::MoveNode {
                    id: *id,
                    position,
                })],
                None => Vec::new(),
            },
            DragState::DraggingConnection {
                cursor, pending, ..
            } => {
                if let Some(p) = pending.take() {
                    *cursor = p;
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    pub fn pointer_up(&mut self, screen: Point, cx: DragContext<'_>) -> Vec<EditorAction> {
        let mut actions = self.on_frame();
        match std::mem::take(&mut self.state) {
            DragState::DraggingConnection { source, .. } => {
                let world = cx.view.screen_to_world(screen);
                match hit::drop_target(cx.board, world, cx.tolerance.drop_margin) {
                    Some(target) if target != source => {
                        actions.push(EditorAction::Mutate(BoardMutation::Connect {
                            source,
                            target,
                        }));
                    }
                    Some(_) => log::debug!("connection dropped back onto its source {source}"),
                    None => log::trace!("connection from {source} dropped on nothing"),
                }
            }
            DragState::Idle | DragState::Panning { .. } | DragState::DraggingNode { .. } => {}
        }
        actions
    }

    /// Abort the current gesture. A dragged node goes back to where it
    /// started; a connection drag is discarded.
    pub fn cancel(&mut self) -> Vec<EditorAction> {
        match std::mem::take(&mut self.state) {
            DragState::DraggingNode {
                id, start_world, ..
            } => vec![EditorAction::Mutate(BoardMutation::MoveNode {
                id,
                position: start_world,
            })],
            _ => Vec::new(),
        }
    }

    /// The wire being dragged out, for drawing.
    pub fn rubber_band(&self, board: &Board) -> Option<ConnectionRoute> {
        match self.state {
            DragState::DraggingConnection { source, cursor, .. } => {
                let node = board.get(source)?;
                Some(ConnectionRoute::new(output_anchor(node), cursor))
            }
            _ => None,
        }
    }
}
