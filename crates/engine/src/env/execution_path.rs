//! Position tracking used to correlate events across call depth.

use serde::{Deserialize, Serialize};

use crate::error::StackError;

/// Current position plus one saved position per enclosing call level.
///
/// Rendered as dot-separated indices, outermost first, e.g. `0.2.1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPath {
    parents: Vec<u64>,
    position: u64,
}

impl ExecutionPath {
    /// Enter a nested executable; the nested level starts at index 0.
    pub fn down(&mut self) {
        self.parents.push(self.position);
        self.position = 0;
    }

    /// Return to the enclosing level, restoring its saved index.
    pub fn up(&mut self) -> Result<(), StackError> {
        self.position = self.parents.pop().ok_or(StackError::EmptyExecutionPath)?;
        Ok(())
    }

    /// Advance to the next sibling at the current level.
    pub fn forward(&mut self) {
        self.position += 1;
    }

    pub fn depth(&self) -> usize {
        self.parents.len()
    }

    pub fn current_path(&self) -> String {
        self.parents
            .iter()
            .chain(std::iter::once(&self.position))
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_nested_positions() {
        let mut path = ExecutionPath::default();
        assert_eq!(path.current_path(), "0");

        path.forward();
        path.down();
        path.forward();
        path.forward();
        assert_eq!(path.current_path(), "1.2");
        assert_eq!(path.depth(), 1);

        path.up().expect("up");
        assert_eq!(path.current_path(), "1");
        assert_eq!(path.up(), Err(StackError::EmptyExecutionPath));
    }
}
