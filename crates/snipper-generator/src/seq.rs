use crate::Generator;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates shorts from a process-local counter rendered in base 36:
/// `0`, `1`, ..., `z`, `10`, ...
///
/// Counters restart on every process start, so this generator only suits
/// backends that start empty.
#[derive(Debug, Default)]
pub struct SeqGenerator {
    counter: AtomicU64,
}

impl SeqGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a generator whose first short encodes `offset`.
    pub fn with_offset(offset: u64) -> Self {
        Self {
            counter: AtomicU64::new(offset),
        }
    }
}

impl Generator for SeqGenerator {
    fn generate(&self) -> String {
        to_base36(self.counter.fetch_add(1, Ordering::Relaxed))
    }
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

    if value == 0 {
        return "0".to_string();
    }

    let mut buf = Vec::new();
    while value > 0 {
        buf.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    buf.reverse();
    buf.into_iter().map(char::from).collect()
}
