//! Undo/Redo command stack.
//!
//! Every undoable edit is recorded as a pair of board states (before and
//! after). Image payloads are reference-counted, so a recorded state costs
//! the board's structure and text, never a copy of its pictures. Drag
//! gestures use **batching**: the state is captured when the gesture
//! starts and again when it ends, so a whole node drag undoes in a single
//! step no matter how many frames it spanned.
//!
//! Restoring goes through [`Board::restore`], which keeps id counters and
//! generation results as they are now. Undo therefore never reissues an id
//! and never rewinds a generator's output.

use ib_core::Board;

#[derive(Debug, Clone)]
pub struct Command {
    before: Board,
    after: Board,
    pub description: String,
}

/// Manages undo/redo stacks with batch grouping for drag gestures.
pub struct CommandStack {
    undo_stack: Vec<Command>,
    redo_stack: Vec<Command>,
    max_depth: usize,
    /// Batch nesting depth (0 = not batching).
    batch_depth: usize,
    batch_snapshot: Option<Board>,
    batch_description: String,
    /// Whether any edit landed during the current batch.
    batch_dirty: bool,
}

impl CommandStack {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            max_depth,
            batch_depth: 0,
            batch_snapshot: None,
            batch_description: String::new(),
            batch_dirty: false,
        }
    }

    pub fn is_batching(&self) -> bool {
        self.batch_depth > 0
    }

    /// Start a batch group. Edits until the matching `end_batch()` are
    /// applied live but recorded as one undo step.
    pub fn begin_batch(&mut self, board: &Board, description: &str) {
        if self.batch_depth == 0 {
            self.batch_snapshot = Some(board.clone());
            self.batch_description = description.to_string();
            self.batch_dirty = false;
        }
        self.batch_depth += 1;
    }

    /// End a batch group. When the outermost batch closes and something
    /// changed, one command is pushed.
    pub fn end_batch(&mut self, board: &Board) {
        if self.batch_depth == 0 {
            return;
        }
        self.batch_depth -= 1;
        if self.batch_depth > 0 {
            return;
        }
        let before = self.batch_snapshot.take();
        if self.batch_dirty
            && let Some(before) = before
        {
            let description = std::mem::take(&mut self.batch_description);
            self.push(before, board.clone(), description);
        }
        self.batch_dirty = false;
    }

    /// Apply `edit` to the board and record it.
    ///
    /// `edit` reports whether it changed anything; rejected edits are not
    /// recorded. Inside a batch the edit is applied live and folded into
    /// the batch.
    pub fn execute<T>(
        &mut self,
        board: &mut Board,
        description: &str,
        edit: impl FnOnce(&mut Board) -> Option<T>,
    ) -> Option<T> {
        if self.is_batching() {
            let result = edit(board);
            self.batch_dirty |= result.is_some();
            return result;
        }

        let before = board.clone();
        let result = edit(board)?;
        self.push(before, board.clone(), description.to_string());
        Some(result)
    }

    fn push(&mut self, before: Board, after: Board, description: String) {
        log::trace!("record undo step: {description}");
        self.undo_stack.push(Command {
            before,
            after,
            description,
        });
        if self.undo_stack.len() > self.max_depth {
            self.undo_stack.remove(0);
        }
        self.redo_stack.clear();
    }

    /// Undo the last command. Returns its description.
    pub fn undo(&mut self, board: &mut Board) -> Option<String> {
        let cmd = self.undo_stack.pop()?;
        board.restore(&cmd.before);
        let desc = cmd.description.clone();
        self.redo_stack.push(cmd);
        Some(desc)
    }

    pub fn redo(&mut self, board: &mut Board) -> Option<String> {
        let cmd = self.redo_stack.pop()?;
        board.restore(&cmd.after);
        let desc = cmd.description.clone();
        self.undo_stack.push(cmd);
        Some(desc)
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }
}
