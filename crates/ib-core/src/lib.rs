pub mod board;
pub mod error;
pub mod id;
pub mod model;
pub mod view;

pub use board::{Board, GenerationOutcome, LayerPatch};
pub use error::BoardError;
pub use id::{ConnectionId, LayerId, NodeId, RequestId};
pub use model::*;
pub use view::ViewState;

// Re-export geometry types so downstream crates share one definition.
pub use kurbo::{Point, Rect, Size, Vec2};
