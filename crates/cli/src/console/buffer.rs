//! Bounded console output

use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::OnceLock;

/// Lines kept on screen; older lines are dropped first.
pub const CONSOLE_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsoleLine {
    /// Monotonic position, never reused after eviction
    pub seq: u64,
    pub text: String,
    pub at: DateTime<Utc>,
}

fn ansi_pattern() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").expect("static pattern"))
}

/// Remove terminal color sequences.
pub fn strip_ansi(text: &str) -> String {
    ansi_pattern().replace_all(text, "").into_owned()
}

#[derive(Debug)]
pub struct OutputBuffer {
    lines: VecDeque<ConsoleLine>,
    capacity: usize,
    next_seq: u64,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::with_capacity(CONSOLE_CAPACITY)
    }
}

impl OutputBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_seq: 0,
        }
    }

    /// Append a line, stripped of color codes. Returns its sequence number.
    pub fn push(&mut self, text: &str) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;

        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(ConsoleLine {
            seq,
            text: strip_ansi(text),
            at: Utc::now(),
        });
        seq
    }

    pub fn lines(&self) -> Vec<ConsoleLine> {
        self.lines.iter().cloned().collect()
    }

    /// Retained lines with `seq >= from`.
    pub fn since(&self, from: u64) -> Vec<ConsoleLine> {
        self.lines.iter().filter(|l| l.seq >= from).cloned().collect()
    }

    /// Sequence number the next push will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
