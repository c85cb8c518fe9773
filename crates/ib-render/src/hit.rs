//! Hit testing: world point → anchor / node / connection lookup.
//!
//! Nodes are checked front-to-back (highest display id first, since later
//! nodes are painted on top).

use crate::route::{ConnectionRoute, HIT_STROKE_WIDTH, output_anchor};
use ib_core::{Board, ConnectionId, NodeId};
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Pick distances, all in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitTolerance {
    /// Radius around an output anchor that starts a connection drag.
    pub anchor_radius: f64,
    /// Width of the invisible selection band along connections.
    pub connection_stroke: f64,
    /// How far left of a generator's edge a connection may be dropped.
    pub drop_margin: f64,
}

impl Default for HitTolerance {
    fn default() -> Self {
        Self {
            anchor_radius: 12.0,
            connection_stroke: HIT_STROKE_WIDTH,
            drop_margin: 40.0,
        }
    }
}

/// What a pointer landed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hit {
    OutputAnchor(NodeId),
    Node(NodeId),
    Connection(ConnectionId),
    Background,
}

/// Classify a world point. Anchors win over node bodies, node bodies over
/// connections.
pub fn hit_test(board: &Board, p: Point, tol: &HitTolerance) -> Hit {
    if let Some(id) = hit_test_output_anchor(board, p, tol.anchor_radius) {
        return Hit::OutputAnchor(id);
    }
    if let Some(id) = hit_test_node(board, p) {
        return Hit::Node(id);
    }
    if let Some(id) = hit_test_connection(board, p, tol.connection_stroke) {
        return Hit::Connection(id);
    }
    Hit::Background
}

/// Find the topmost node whose body contains `p`.
pub fn hit_test_node(board: &Board, p: Point) -> Option<NodeId> {
    board
        .nodes()
        .into_iter()
        .rev()
        .find(|n| n.bounds().contains(p))
        .map(|n| n.id)
}

/// Find the topmost node whose output anchor is within `radius` of `p`.
pub fn hit_test_output_anchor(board: &Board, p: Point, radius: f64) -> Option<NodeId> {
    board
        .nodes()
        .into_iter()
        .rev()
        .find(|n| (output_anchor(n) - p).hypot() <= radius)
        .map(|n| n.id)
}

/// Find the most recently created connection whose hit band contains `p`.
pub fn hit_test_connection(board: &Board, p: Point, stroke_width: f64) -> Option<ConnectionId> {
    board.connections().into_iter().rev().find_map(|c| {
        let source = board.get(c.source)?;
        let target = board.get(c.target)?;
        ConnectionRoute::between(source, target)
            .hit(p, stroke_width)
            .then_some(c.id)
    })
}

/// Find the generator a dragged connection is released over.
///
/// Each generator's bounds are extended by `margin` on the input (left)
/// side so users can drop onto the input anchor without hitting the body
/// exactly. Self-drops are not filtered here.
pub fn drop_target(board: &Board, p: Point, margin: f64) -> Option<NodeId> {
    board
        .nodes()
        .into_iter()
        .rev()
        .filter(|n| n.is_generator())
        .find(|n| {
            let mut region = n.bounds();
            region.x0 -= margin;
            region.contains(p)
        })
        .map(|n| n.id)
}
