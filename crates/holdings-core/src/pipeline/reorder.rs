use std::collections::BTreeMap;

/// Releases values strictly in sequence order, whatever order they arrive in.
#[derive(Debug)]
pub struct Reorder<T> {
    next: u64,
    pending: BTreeMap<u64, T>,
}

impl<T> Default for Reorder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Reorder<T> {
    pub fn new() -> Self {
        Self {
            next: 0,
            pending: BTreeMap::new(),
        }
    }

    /// Buffer `value` under `seq`. Returns false if that sequence number was
    /// already released or is already waiting.
    pub fn push(&mut self, seq: u64, value: T) -> bool {
        if seq < self.next || self.pending.contains_key(&seq) {
            return false;
        }
        self.pending.insert(seq, value);
        true
    }

    /// The next value in sequence, if it has arrived.
    pub fn pop_ready(&mut self) -> Option<T> {
        let value = self.pending.remove(&self.next)?;
        self.next += 1;
        Some(value)
    }

    /// Every value that is ready, in order.
    pub fn drain_ready(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.pop_ready())
    }

    pub fn next_seq(&self) -> u64 {
        self.next
    }

    /// Values held back waiting for a gap to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
