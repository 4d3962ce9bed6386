//! Submitted command history with up/down navigation

use std::collections::VecDeque;

pub const HISTORY_CAPACITY: usize = 50;

/// Most recent command first. `index` points at the entry currently
/// recalled into the input, `None` while the user is typing fresh input.
#[derive(Debug, Default)]
pub struct CommandHistory {
    entries: VecDeque<String>,
    index: Option<usize>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a submitted command and reset navigation.
    pub fn push(&mut self, command: &str) {
        self.entries.push_front(command.to_string());
        self.entries.truncate(HISTORY_CAPACITY);
        self.index = None;
    }

    /// Step toward older entries. Stays on the oldest once reached;
    /// `None` only when the history is empty.
    pub fn up(&mut self) -> Option<&str> {
        if self.entries.is_empty() {
            return None;
        }
        let next = match self.index {
            None => 0,
            Some(i) => (i + 1).min(self.entries.len() - 1),
        };
        self.index = Some(next);
        self.entries.get(next).map(String::as_str)
    }

    /// Step toward newer entries. Moving past the newest clears the input.
    pub fn down(&mut self) -> &str {
        match self.index {
            Some(i) if i > 0 => {
                self.index = Some(i - 1);
                &self.entries[i - 1]
            }
            _ => {
                self.index = None;
                ""
            }
        }
    }

    /// Entry currently recalled, if any.
    pub fn selected(&self) -> Option<&str> {
        self.index.and_then(|i| self.entries.get(i)).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_navigation() {
        let mut history = CommandHistory::new();
        assert_eq!(history.up(), None);
        assert_eq!(history.down(), "");

        history.push("list");
        history.push("say hi");
        history.push("time set day");

        assert_eq!(history.up(), Some("time set day"));
        assert_eq!(history.up(), Some("say hi"));
        assert_eq!(history.up(), Some("list"));
        // Oldest is sticky
        assert_eq!(history.up(), Some("list"));
        assert_eq!(history.selected(), Some("list"));

        assert_eq!(history.down(), "say hi");
        assert_eq!(history.down(), "time set day");
        assert_eq!(history.down(), "");
        assert_eq!(history.selected(), None);
    }

    #[test]
    fn test_push_resets_index() {
        let mut history = CommandHistory::new();
        history.push("a");
        history.push("b");
        history.up();
        history.up();

        history.push("c");
        assert_eq!(history.selected(), None);
        assert_eq!(history.up(), Some("c"));
    }

    #[test]
    fn test_capacity() {
        let mut history = CommandHistory::new();
        for i in 0..(HISTORY_CAPACITY + 5) {
            history.push(&format!("cmd {}", i));
        }

        assert_eq!(history.len(), HISTORY_CAPACITY);
        assert_eq!(history.entries().next(), Some("cmd 54"));
        assert_eq!(history.entries().last(), Some("cmd 5"));
    }
}
