//! Encoder-side history: a fixed-size cyclic record of recently emitted
//! header fingerprints, consulted to decide whether a repeated header is
//! worth promoting into the dynamic table.
//!
//! A cyclic buffer of hashes is queried before the current header's hash
//! is added, so "seen before" means "still present in the window".

const HISTORY_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct History {
    nameval: Vec<u32>,
    name: Vec<u32>,
    nameval_pos: usize,
    name_pos: usize,
}

impl History {
    pub fn new() -> Self {
        History {
            nameval: Vec::with_capacity(HISTORY_CAPACITY),
            name: Vec::with_capacity(HISTORY_CAPACITY),
            nameval_pos: 0,
            name_pos: 0,
        }
    }

    /// True if this exact (name, value) hash is still in the window, i.e.
    /// this is at least the second time it has been seen.
    pub fn seen_nameval(&self, hash: u32) -> bool {
        self.nameval.contains(&hash)
    }

    /// True if a header with this name hash is still in the window.
    pub fn seen_name(&self, hash: u32) -> bool {
        self.name.contains(&hash)
    }

    /// Records one header field's fingerprints. Call after consulting
    /// `seen_nameval`/`seen_name` for the same field.
    pub fn add(&mut self, name_hash: u32, nameval_hash: u32) {
        push_cyclic(&mut self.nameval, &mut self.nameval_pos, nameval_hash);
        push_cyclic(&mut self.name, &mut self.name_pos, name_hash);
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

fn push_cyclic(buf: &mut Vec<u32>, pos: &mut usize, value: u32) {
    if buf.len() < HISTORY_CAPACITY {
        buf.push(value);
    } else {
        buf[*pos] = value;
    }
    *pos = (*pos + 1) % HISTORY_CAPACITY;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn not_seen_until_added() {
        let mut h = History::new();
        assert!(!h.seen_nameval(42));
        h.add(1, 42);
        assert!(h.seen_nameval(42));
        assert!(h.seen_name(1));
    }

    #[test]
    fn evicts_oldest_past_capacity() {
        let mut h = History::new();
        h.add(0, 0xdead);
        for i in 0..HISTORY_CAPACITY {
            h.add(0, i as u32);
        }
        assert!(!h.seen_nameval(0xdead));
    }
}
