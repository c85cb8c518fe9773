pub mod commands;
pub mod drag;
pub mod engine;
pub mod input;
pub mod shortcuts;

pub use commands::CommandStack;
pub use drag::{DragMachine, DragState, EditorAction};
pub use engine::{Applied, BoardMutation, CanvasEngine, EditorConfig, Selection};
pub use input::{InputEvent, Modifiers};
pub use shortcuts::{ShortcutAction, ShortcutMap};
