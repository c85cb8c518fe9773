//! The board: canonical store of nodes and connections.
//!
//! Nodes live in a `StableDiGraph` whose edges are the connections, so
//! removing a node drops every connection that touches it. All identity
//! allocation (node ids, display ids, layer ids, connection ids, request
//! ids) goes through the board's counters.

use crate::error::BoardError;
use crate::id::{ConnectionId, LayerId, NodeId, RequestId};
use crate::model::*;
use kurbo::{Point, Size};
use petgraph::Direction;
use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableDiGraph;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Monotonic id counters. Never rewound, not even by undo.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Counters {
    node: u64,
    display: u32,
    connection: u64,
    layer: u64,
    request: u64,
}

impl Counters {
    fn max(self, other: Counters) -> Counters {
        Counters {
            node: self.node.max(other.node),
            display: self.display.max(other.display),
            connection: self.connection.max(other.connection),
            layer: self.layer.max(other.layer),
            request: self.request.max(other.request),
        }
    }
}

/// Partial update for a prompt layer. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerPatch {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub enabled: Option<bool>,
}

/// Outcome of a generation cycle as delivered to the board.
pub type GenerationOutcome = Result<Vec<EncodedImage>, String>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Board {
    /// Nodes with connections as directed edges (source → target).
    pub graph: StableDiGraph<Node, Connection>,

    /// Index from NodeId → NodeIndex for fast lookup.
    #[serde(skip)]
    id_index: HashMap<NodeId, NodeIndex>,

    counters: Counters,

    /// Requests started but not yet finished, including those of removed
    /// nodes.
    #[serde(skip)]
    pending: HashSet<RequestId>,
}

impl Board {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Nodes ───────────────────────────────────────────────────────────

    pub fn add_image_node(&mut self, position: Point) -> NodeId {
        let size = Size::new(IMAGE_NODE_WIDTH, MIN_NODE_HEIGHT);
        self.insert_node(position, size, NodeKind::ImageSource(ImageSourceData::default()))
    }

    pub fn add_generator_node(&mut self, position: Point) -> NodeId {
        let layer = self.next_layer_id();
        let size = Size::new(GENERATOR_NODE_WIDTH, MIN_NODE_HEIGHT);
        self.insert_node(position, size, NodeKind::Generator(GeneratorData::new(layer)))
    }

    fn insert_node(&mut self, position: Point, size: Size, kind: NodeKind) -> NodeId {
        self.counters.node += 1;
        self.counters.display += 1;
        let id = NodeId::numbered(self.counters.node);
        let node = Node {
            id,
            display_id: self.counters.display,
            position,
            size,
            kind,
        };
        log::debug!("add {} node {id} (#{})", node.kind.label(), node.display_id);
        let idx = self.graph.add_node(node);
        self.id_index.insert(id, idx);
        id
    }

    /// Remove a node and every connection where it is source or target.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let idx = self.id_index.remove(&id)?;
        let dropped = self.graph.edges_directed(idx, Direction::Incoming).count()
            + self.graph.edges_directed(idx, Direction::Outgoing).count();
        log::debug!("remove node {id}, cascading {dropped} connection(s)");
        self.graph.remove_node(idx)
    }

    pub fn index_of(&self, id: NodeId) -> Option<NodeIndex> {
        self.id_index.get(&id).copied()
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.index_of(id).and_then(|idx| self.graph.node_weight(idx))
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let idx = self.index_of(id)?;
        self.graph.node_weight_mut(idx)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// All nodes in creation order (ascending display id).
    /// The last node is drawn on top.
    pub fn nodes(&self) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self.graph.node_weights().collect();
        nodes.sort_by_key(|n| n.display_id);
        nodes
    }

    pub fn move_node(&mut self, id: NodeId, position: Point) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.position = position;
                true
            }
            None => false,
        }
    }

    /// Record the measured content height. Width stays as created.
    pub fn set_node_height(&mut self, id: NodeId, height: f64) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.size.height = height.max(MIN_NODE_HEIGHT);
                true
            }
            None => false,
        }
    }

    // ─── Connections ─────────────────────────────────────────────────────

    /// Wire `source`'s output into `target`'s input.
    ///
    /// Returns `None` without touching the board when either endpoint is
    /// missing, the target is not a generator, or the pair already exists.
    pub fn connect(&mut self, source: NodeId, target: NodeId) -> Option<ConnectionId> {
        let s = self.index_of(source)?;
        let t = self.index_of(target)?;
        if !self.graph[t].is_generator() {
            log::debug!("reject connection {source} → {target}: target is not a generator");
            return None;
        }
        if self.graph.find_edge(s, t).is_some() {
            log::debug!("reject duplicate connection {source} → {target}");
            return None;
        }
        self.counters.connection += 1;
        let id = ConnectionId(self.counters.connection);
        self.graph.add_edge(
            s,
            t,
            Connection {
                id,
                source,
                target,
            },
        );
        log::debug!("connect {source} → {target} as {id}");
        Some(id)
    }

    pub fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let edge = self.edge_index(id)?;
        self.graph.remove_edge(edge)
    }

    fn edge_index(&self, id: ConnectionId) -> Option<EdgeIndex> {
        self.graph
            .edge_indices()
            .find(|&e| self.graph.edge_weight(e).is_some_and(|c| c.id == id))
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.edge_index(id).and_then(|e| self.graph.edge_weight(e))
    }

    /// All connections in creation order.
    pub fn connections(&self) -> Vec<&Connection> {
        let mut conns: Vec<&Connection> = self.graph.edge_weights().collect();
        conns.sort_by_key(|c| c.id);
        conns
    }

    pub fn connection_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Source nodes feeding `target`, ordered by ascending display id
    /// regardless of the order the connections were made.
    pub fn incoming(&self, target: NodeId) -> Vec<&Node> {
        let Some(t) = self.index_of(target) else {
            return Vec::new();
        };
        let mut sources: Vec<&Node> = self
            .graph
            .edges_directed(t, Direction::Incoming)
            .map(|e| &self.graph[e.source()])
            .collect();
        sources.sort_by_key(|n| n.display_id);
        sources
    }

    // ─── Image sources ───────────────────────────────────────────────────

    pub fn set_image(&mut self, id: NodeId, image: Option<EncodedImage>) -> bool {
        match self.image_source_mut(id) {
            Some(data) => {
                data.image = image;
                true
            }
            None => false,
        }
    }

    pub fn set_annotating(&mut self, id: NodeId, annotating: bool) -> bool {
        match self.image_source_mut(id) {
            Some(data) => {
                data.annotating = annotating;
                true
            }
            None => false,
        }
    }

    /// Add a marker at (x%, y%). Coordinates are clamped to 0..=100.
    /// Returns the new annotation id; ids are never reissued.
    pub fn add_annotation(&mut self, id: NodeId, x: f64, y: f64) -> Option<u32> {
        let data = self.image_source_mut(id)?;
        let ann_id = data.next_annotation_id;
        data.next_annotation_id += 1;
        data.annotations.push(Annotation {
            id: ann_id,
            x: x.clamp(0.0, 100.0),
            y: y.clamp(0.0, 100.0),
        });
        Some(ann_id)
    }

    pub fn remove_annotation(&mut self, id: NodeId, annotation: u32) -> bool {
        let Some(data) = self.image_source_mut(id) else {
            return false;
        };
        let before = data.annotations.len();
        data.annotations.retain(|a| a.id != annotation);
        data.annotations.len() != before
    }

    /// Remove all markers. The id counter keeps counting.
    pub fn clear_annotations(&mut self, id: NodeId) -> bool {
        match self.image_source_mut(id) {
            Some(data) => {
                data.annotations.clear();
                true
            }
            None => false,
        }
    }

    fn image_source_mut(&mut self, id: NodeId) -> Option<&mut ImageSourceData> {
        self.get_mut(id).and_then(Node::as_image_source_mut)
    }

    // ─── Generators ──────────────────────────────────────────────────────

    fn next_layer_id(&mut self) -> LayerId {
        self.counters.layer += 1;
        LayerId(self.counters.layer)
    }

    fn generator_mut(&mut self, id: NodeId) -> Option<&mut GeneratorData> {
        self.get_mut(id).and_then(Node::as_generator_mut)
    }

    pub fn add_layer(&mut self, id: NodeId) -> Option<LayerId> {
        // Check the kind before burning a layer id.
        self.get(id)?.as_generator()?;
        let layer_id = self.next_layer_id();
        let data = self.generator_mut(id)?;
        let name = format!("Layer {}", data.layers.len() + 1);
        data.layers.push(Layer {
            id: layer_id,
            name,
            prompt: String::new(),
            enabled: true,
        });
        Some(layer_id)
    }

    /// Delete a layer. Deleting the only remaining layer is a no-op.
    pub fn remove_layer(&mut self, id: NodeId, layer: LayerId) -> bool {
        let Some(data) = self.generator_mut(id) else {
            return false;
        };
        if data.layers.len() <= 1 {
            return false;
        }
        let before = data.layers.len();
        data.layers.retain(|l| l.id != layer);
        data.layers.len() != before
    }

    pub fn update_layer(&mut self, id: NodeId, layer: LayerId, patch: LayerPatch) -> bool {
        let Some(l) = self.generator_mut(id).and_then(|d| d.layer_mut(layer)) else {
            return false;
        };
        if let Some(name) = patch.name {
            l.name = name;
        }
        if let Some(prompt) = patch.prompt {
            l.prompt = prompt;
        }
        if let Some(enabled) = patch.enabled {
            l.enabled = enabled;
        }
        true
    }

    pub fn rename_layer(&mut self, id: NodeId, layer: LayerId, name: String) -> bool {
        let patch = LayerPatch {
            name: Some(name),
            ..Default::default()
        };
        self.update_layer(id, layer, patch)
    }

    pub fn set_layer_prompt(&mut self, id: NodeId, layer: LayerId, prompt: String) -> bool {
        let patch = LayerPatch {
            prompt: Some(prompt),
            ..Default::default()
        };
        self.update_layer(id, layer, patch)
    }

    pub fn set_layer_enabled(&mut self, id: NodeId, layer: LayerId, enabled: bool) -> bool {
        let patch = LayerPatch {
            enabled: Some(enabled),
            ..Default::default()
        };
        self.update_layer(id, layer, patch)
    }

    pub fn set_legacy_prompt(&mut self, id: NodeId, prompt: Option<String>) -> bool {
        match self.generator_mut(id) {
            Some(data) => {
                data.legacy_prompt = prompt;
                true
            }
            None => false,
        }
    }

    pub fn set_title(&mut self, id: NodeId, title: String) -> bool {
        match self.generator_mut(id) {
            Some(data) => {
                data.title = title;
                true
            }
            None => false,
        }
    }

    pub fn set_generation_config(&mut self, id: NodeId, config: GenerationConfig) -> bool {
        match self.generator_mut(id) {
            Some(data) => {
                data.config = config.normalized();
                true
            }
            None => false,
        }
    }

    /// Point the node's output at another image of the last batch.
    pub fn select_result(&mut self, id: NodeId, index: usize) -> bool {
        match self.generator_mut(id) {
            Some(data) if index < data.images.len() => {
                data.selected_index = index;
                true
            }
            _ => false,
        }
    }

    // ─── Generation lifecycle ────────────────────────────────────────────

    /// Enter `Loading` with a fresh request id. Re-entrant from any status;
    /// the previous cycle's id is superseded.
    pub fn begin_generation(&mut self, id: NodeId) -> Option<RequestId> {
        self.get(id)?.as_generator()?;
        self.counters.request += 1;
        let request = RequestId(self.counters.request);
        let data = self.generator_mut(id)?;
        data.status = GenerationStatus::Loading;
        data.error = None;
        data.active_request = Some(request);
        self.pending.insert(request);
        log::debug!("{id}: generation {request} started");
        Some(request)
    }

    /// Apply the result of a generation cycle.
    ///
    /// Returns `false` (and changes nothing) if `request` is no longer the
    /// node's active cycle, or the node is gone.
    pub fn finish_generation(
        &mut self,
        id: NodeId,
        request: RequestId,
        outcome: GenerationOutcome,
    ) -> bool {
        self.pending.remove(&request);
        let Some(data) = self.generator_mut(id) else {
            log::debug!("{id}: generation {request} finished for a removed node");
            return false;
        };
        if data.active_request != Some(request) {
            log::debug!("{id}: dropping stale response for {request}");
            return false;
        }
        data.active_request = None;
        match outcome {
            Ok(images) => {
                data.images = images.into_iter().collect();
                data.selected_index = 0;
                data.status = GenerationStatus::Success;
                data.error = None;
            }
            Err(message) => {
                log::warn!("{id}: generation {request} failed: {message}");
                data.images.clear();
                data.selected_index = 0;
                data.status = GenerationStatus::Error;
                data.error = Some(message);
            }
        }
        true
    }

    // ─── Persistence ─────────────────────────────────────────────────────

    /// Encode the board as MessagePack. Image payloads are written as
    /// binary blobs.
    pub fn to_msgpack(&self) -> Result<Vec<u8>, BoardError> {
        Ok(rmp_serde::to_vec_named(self)?)
    }

    /// Load a board written by [`Board::to_msgpack`].
    ///
    /// Generation cycles do not survive a reload: a generator saved while
    /// loading comes back `Idle`.
    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, BoardError> {
        let mut board: Board = rmp_serde::from_slice(bytes)?;
        board.rebuild_index();
        board.normalize();
        Ok(board)
    }

    // ─── Undo snapshots ──────────────────────────────────────────────────

    /// Replace the board's content with an earlier copy of itself.
    ///
    /// Counters never move backwards (annotation counters included).
    /// Generators present on both boards keep their current status and
    /// results. A generator the snapshot brings back stays `Loading` only
    /// while its request is still outstanding.
    pub fn restore(&mut self, snapshot: &Board) {
        let mut restored = snapshot.clone();
        restored.counters = restored.counters.max(self.counters);
        restored.pending = std::mem::take(&mut self.pending);
        for node in restored.graph.node_weights_mut() {
            let Some(current) = self.get(node.id) else {
                continue;
            };
            match (&mut node.kind, &current.kind) {
                (NodeKind::Generator(data), NodeKind::Generator(current)) => {
                    data.images = current.images.clone();
                    data.selected_index = current.selected_index;
                    data.status = current.status;
                    data.error = current.error.clone();
                    data.active_request = current.active_request;
                }
                (NodeKind::ImageSource(data), NodeKind::ImageSource(current)) => {
                    data.next_annotation_id =
                        data.next_annotation_id.max(current.next_annotation_id);
                }
                _ => {}
            }
        }
        restored.normalize();
        *self = restored;
    }

    /// Clamp generator configs and settle generators whose cycle can no
    /// longer finish.
    fn normalize(&mut self) {
        let pending = &self.pending;
        for node in self.graph.node_weights_mut() {
            let id = node.id;
            let NodeKind::Generator(data) = &mut node.kind else {
                continue;
            };
            data.config = std::mem::take(&mut data.config).normalized();
            let outstanding = data.active_request.is_some_and(|r| pending.contains(&r));
            if data.status == GenerationStatus::Loading && !outstanding {
                log::debug!("{id}: no outstanding request, back to idle");
                data.status = GenerationStatus::Idle;
                data.active_request = None;
            }
        }
    }

    /// Rebuild the id index (after deserialization).
    pub fn rebuild_index(&mut self) {
        self.id_index.clear();
        for idx in self.graph.node_indices() {
            let id = self.graph[idx].id;
            self.id_index.insert(id, idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pt(x: f64, y: f64) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn display_ids_are_sequential_and_never_reused() {
        let mut board = Board::new();
        let a = board.add_image_node(pt(0.0, 0.0));
        let b = board.add_generator_node(pt(400.0, 0.0));
        assert_eq!(board.get(a).unwrap().display_id, 1);
        assert_eq!(board.get(b).unwrap().display_id, 2);

        board.remove_node(b);
        let c = board.add_image_node(pt(0.0, 200.0));
        assert_eq!(board.get(c).unwrap().display_id, 3);
        assert_ne!(b, c);
    }

    #[test]
    fn duplicate_connection_is_rejected() {
        let mut board = Board::new();
        let img = board.add_image_node(pt(0.0, 0.0));
        let generator = board.add_generator_node(pt(400.0, 0.0));

        assert!(board.connect(img, generator).is_some());
        assert_eq!(board.connect(img, generator), None);
        assert_eq!(board.connection_count(), 1);
    }

    #[test]
    fn connection_into_image_source_is_rejected() {
        let mut board = Board::new();
        let a = board.add_image_node(pt(0.0, 0.0));
        let b = board.add_image_node(pt(400.0, 0.0));
        assert_eq!(board.connect(a, b), None);
        assert_eq!(board.connection_count(), 0);
    }

    #[test]
    fn generator_output_can_feed_another_generator() {
        let mut board = Board::new();
        let g1 = board.add_generator_node(pt(0.0, 0.0));
        let g2 = board.add_generator_node(pt(500.0, 0.0));
        assert!(board.connect(g1, g2).is_some());
    }

    #[test]
    fn removing_node_cascades_only_its_connections() {
        let mut board = Board::new();
        let a = board.add_image_node(pt(0.0, 0.0));
        let b = board.add_image_node(pt(0.0, 200.0));
        let g1 = board.add_generator_node(pt(400.0, 0.0));
        let g2 = board.add_generator_node(pt(800.0, 0.0));
        board.connect(a, g1).unwrap();
        let keep = board.connect(b, g2).unwrap();
        board.connect(g1, g2).unwrap();

        board.remove_node(g1);

        let remaining: Vec<ConnectionId> = board.connections().iter().map(|c| c.id).collect();
        assert_eq!(remaining, vec![keep]);
        assert!(board.get(a).is_some());
    }

    #[test]
    fn incoming_sorted_by_display_id() {
        let mut board = Board::new();
        let a = board.add_image_node(pt(0.0, 0.0));
        let b = board.add_image_node(pt(0.0, 200.0));
        let c = board.add_image_node(pt(0.0, 400.0));
        let generator = board.add_generator_node(pt(400.0, 0.0));
        board.connect(c, generator);
        board.connect(a, generator);
        board.connect(b, generator);

        let order: Vec<u32> = board.incoming(generator).iter().map(|n| n.display_id).collect();
        assert_eq!(order, vec![1, 2, 3]);
    }

    #[test]
    fn annotation_ids_are_not_reused() {
        let mut board = Board::new();
        let img = board.add_image_node(pt(0.0, 0.0));
        assert_eq!(board.add_annotation(img, 10.0, 10.0), Some(1));
        assert_eq!(board.add_annotation(img, 20.0, 20.0), Some(2));
        assert_eq!(board.add_annotation(img, 30.0, 30.0), Some(3));
        assert!(board.remove_annotation(img, 2));
        assert_eq!(board.add_annotation(img, 40.0, 40.0), Some(4));

        board.clear_annotations(img);
        assert_eq!(board.add_annotation(img, 50.0, 50.0), Some(5));
    }

    #[test]
    fn annotation_coordinates_are_clamped() {
        let mut board = Board::new();
        let img = board.add_image_node(pt(0.0, 0.0));
        board.add_annotation(img, -5.0, 140.0);
        let ann = board.get(img).unwrap().as_image_source().unwrap().annotations[0];
        assert_eq!((ann.x, ann.y), (0.0, 100.0));
    }

    #[test]
    fn last_layer_cannot_be_removed() {
        let mut board = Board::new();
        let generator = board.add_generator_node(pt(0.0, 0.0));
        let only = board.get(generator).unwrap().as_generator().unwrap().layers[0].id;
        assert!(!board.remove_layer(generator, only));
        assert_eq!(board.get(generator).unwrap().as_generator().unwrap().layers.len(), 1);

        let second = board.add_layer(generator).unwrap();
        assert!(board.remove_layer(generator, only));
        let layers = &board.get(generator).unwrap().as_generator().unwrap().layers;
        assert_eq!(layers.len(), 1);
        assert_eq!(layers[0].id, second);
    }

    #[test]
    fn new_layers_are_numbered_by_count() {
        let mut board = Board::new();
        let generator = board.add_generator_node(pt(0.0, 0.0));
        board.add_layer(generator);
        board.add_layer(generator);
        let names: Vec<String> = board.get(generator).unwrap().as_generator().unwrap().layers
            .iter()
            .map(|l| l.name.clone())
            .collect();
        assert_eq!(names, vec!["Layer 1", "Layer 2", "Layer 3"]);
    }

    #[test]
    fn layer_edits_touch_one_field() {
        let mut board = Board::new();
        let generator = board.add_generator_node(pt(0.0, 0.0));
        let layer = board.get(generator).unwrap().as_generator().unwrap().layers[0].id;
        assert!(board.set_layer_prompt(generator, layer, "a cat".into()));
        assert!(board.rename_layer(generator, layer, "Subject".into()));
        assert!(board.set_layer_enabled(generator, layer, false));
        assert!(!board.set_layer_enabled(generator, LayerId(999), true));

        let l = &board.get(generator).unwrap().as_generator().unwrap().layers[0];
        assert_eq!(
            (l.name.as_str(), l.prompt.as_str(), l.enabled),
            ("Subject", "a cat", false)
        );
    }

    #[test]
    fn stale_generation_result_is_ignored() {
        let mut board = Board::new();
        let generator = board.add_generator_node(pt(0.0, 0.0));
        let first = board.begin_generation(generator).unwrap();
        let second = board.begin_generation(generator).unwrap();

        assert!(board.finish_generation(generator, second, Ok(vec![EncodedImage::png(vec![2])])));
        assert!(!board.finish_generation(generator, first, Ok(vec![EncodedImage::png(vec![1])])));

        let data = board.get(generator).unwrap().as_generator().unwrap();
        assert_eq!(data.status, GenerationStatus::Success);
        assert_eq!(data.images[0].bytes, vec![2]);
    }

    #[test]
    fn failed_generation_clears_results_but_keeps_config() {
        let mut board = Board::new();
        let generator = board.add_generator_node(pt(0.0, 0.0));
        let config = GenerationConfig {
            image_count: 3,
            ..Default::default()
        };
        board.set_generation_config(generator, config.clone());
        let req = board.begin_generation(generator).unwrap();
        board.finish_generation(generator, req, Ok(vec![EncodedImage::png(vec![1])]));

        let req = board.begin_generation(generator).unwrap();
        board.finish_generation(generator, req, Err("quota exceeded".into()));

        let data = board.get(generator).unwrap().as_generator().unwrap();
        assert_eq!(data.status, GenerationStatus::Error);
        assert!(data.images.is_empty());
        assert_eq!(data.error.as_deref(), Some("quota exceeded"));
        assert_eq!(data.config, config);
    }

    #[test]
    fn msgpack_roundtrip_rebuilds_index() {
        let mut board = Board::new();
        let img = board.add_image_node(pt(10.0, 20.0));
        let generator = board.add_generator_node(pt(400.0, 0.0));
        board.connect(img, generator);

        let bytes = board.to_msgpack().unwrap();
        let restored = Board::from_msgpack(&bytes).unwrap();
        assert_eq!(restored.get(img).unwrap().position, pt(10.0, 20.0));
        assert_eq!(restored.incoming(generator).len(), 1);
    }

    #[test]
    fn msgpack_writes_image_payload_as_binary() {
        let mut board = Board::new();
        let img = board.add_image_node(pt(0.0, 0.0));
        board.set_image(img, Some(EncodedImage::png(vec![0xFF; 10_000])));

        let bytes = board.to_msgpack().unwrap();
        assert!(bytes.len() < 11_000, "encoded board is {} bytes", bytes.len());
        let restored = Board::from_msgpack(&bytes).unwrap();
        let data = restored.get(img).unwrap().as_image_source().unwrap();
        assert_eq!(data.image.as_ref().unwrap().bytes.len(), 10_000);
    }

    #[test]
    fn reload_settles_loading_generators_and_clamps_config() {
        let mut board = Board::new();
        let generator = board.add_generator_node(pt(0.0, 0.0));
        board.begin_generation(generator).unwrap();
        board
            .get_mut(generator)
            .and_then(Node::as_generator_mut)
            .unwrap()
            .config
            .image_count = 0;

        let restored = Board::from_msgpack(&board.to_msgpack().unwrap()).unwrap();
        let data = restored.get(generator).unwrap().as_generator().unwrap();
        assert_eq!(data.status, GenerationStatus::Idle);
        assert_eq!(data.active_request, None);
        assert_eq!(data.config.image_count, 1);
    }

    #[test]
    fn snapshots_share_image_payloads() {
        let mut board = Board::new();
        let img = board.add_image_node(pt(0.0, 0.0));
        board.set_image(img, Some(EncodedImage::png(vec![7; 1 << 20])));

        let snapshot = board.clone();
        let ptr = |b: &Board| {
            let data = b.get(img).unwrap().as_image_source().unwrap();
            data.image.as_ref().unwrap().bytes.as_ptr()
        };
        assert_eq!(ptr(&snapshot), ptr(&board));
    }

    #[test]
    fn restore_never_rewinds_counters() {
        let mut board = Board::new();
        board.add_image_node(pt(0.0, 0.0));
        let before = board.clone();
        let b = board.add_image_node(pt(0.0, 200.0));
        assert_eq!(board.get(b).unwrap().display_id, 2);

        board.restore(&before);
        assert!(board.get(b).is_none());
        let c = board.add_image_node(pt(0.0, 200.0));
        assert_eq!(board.get(c).unwrap().display_id, 3);
    }

    #[test]
    fn restore_never_rewinds_annotation_ids() {
        let mut board = Board::new();
        let img = board.add_image_node(pt(0.0, 0.0));
        let before = board.clone();
        assert_eq!(board.add_annotation(img, 10.0, 10.0), Some(1));

        board.restore(&before);
        let data = board.get(img).unwrap().as_image_source().unwrap();
        assert!(data.annotations.is_empty());
        assert_eq!(board.add_annotation(img, 10.0, 10.0), Some(2));
    }

    #[test]
    fn restored_generator_still_receives_its_outstanding_result() {
        let mut board = Board::new();
        let generator = board.add_generator_node(pt(0.0, 0.0));
        let req = board.begin_generation(generator).unwrap();
        let before = board.clone();
        board.remove_node(generator);

        board.restore(&before);
        assert!(board.finish_generation(generator, req, Ok(vec![EncodedImage::png(vec![1])])));
        let data = board.get(generator).unwrap().as_generator().unwrap();
        assert_eq!(data.status, GenerationStatus::Success);
    }

    #[test]
    fn restored_generator_whose_result_was_dropped_goes_idle() {
        let mut board = Board::new();
        let generator = board.add_generator_node(pt(0.0, 0.0));
        let req = board.begin_generation(generator).unwrap();
        let before = board.clone();
        board.remove_node(generator);
        assert!(!board.finish_generation(generator, req, Ok(vec![EncodedImage::png(vec![1])])));

        board.restore(&before);
        let data = board.get(generator).unwrap().as_generator().unwrap();
        assert_eq!(data.status, GenerationStatus::Idle);
        assert_eq!(data.active_request, None);
    }
}
