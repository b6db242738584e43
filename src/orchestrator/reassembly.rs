//! Ordered reassembly of chunk payloads that complete out of order.

use std::collections::BTreeMap;

use bytes::Bytes;

/// Buffers chunk payloads by index and releases them in index order
///
/// The low-water mark is the lowest index not yet released. Every
/// [`push`](Self::push) returns the payloads that became contiguous with the
/// already released prefix, so a writer can flush them immediately.
#[derive(Debug)]
pub struct Reassembler {
    next_index: u32,
    last_index: u32,
    pending: BTreeMap<u32, Bytes>,
    buffered_bytes: u64,
}

impl Reassembler {
    /// Expect chunks `1..=chunk_count`
    pub fn new(chunk_count: u32) -> Self {
        Self {
            next_index: 1,
            last_index: chunk_count,
            pending: BTreeMap::new(),
            buffered_bytes: 0,
        }
    }

    /// Accept the payload of chunk `index` and return every payload now ready
    /// for output, in index order
    ///
    /// Duplicates and indexes outside `1..=chunk_count` are ignored.
    pub fn push(&mut self, index: u32, data: Bytes) -> Vec<Bytes> {
        if index < self.next_index || index > self.last_index || self.pending.contains_key(&index) {
            tracing::warn!(chunk = index, "ignoring unexpected chunk payload");
            return Vec::new();
        }
        self.buffered_bytes += data.len() as u64;
        self.pending.insert(index, data);

        let mut ready = Vec::new();
        while let Some(data) = self.pending.remove(&self.next_index) {
            self.buffered_bytes -= data.len() as u64;
            ready.push(data);
            self.next_index += 1;
        }
        ready
    }

    /// Lowest chunk index not yet released
    pub fn low_water_mark(&self) -> u32 {
        self.next_index
    }

    /// Whether every expected chunk has been released
    pub fn is_complete(&self) -> bool {
        self.next_index > self.last_index
    }

    /// Bytes held back waiting for an earlier chunk
    pub fn buffered_bytes(&self) -> u64 {
        self.buffered_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn in_order_chunks_flow_straight_through() {
        let mut r = Reassembler::new(3);
        assert_eq!(r.push(1, b("a")), vec![b("a")]);
        assert_eq!(r.push(2, b("b")), vec![b("b")]);
        assert_eq!(r.push(3, b("c")), vec![b("c")]);
        assert!(r.is_complete());
    }

    #[test]
    fn reverse_order_is_held_until_prefix_arrives() {
        let mut r = Reassembler::new(4);

        assert!(r.push(4, b("dd")).is_empty());
        assert!(r.push(3, b("cc")).is_empty());
        assert!(r.push(2, b("bb")).is_empty());
        assert_eq!(r.buffered_bytes(), 6);
        assert_eq!(r.low_water_mark(), 1);

        let ready = r.push(1, b("aa"));

        assert_eq!(ready, vec![b("aa"), b("bb"), b("cc"), b("dd")]);
        assert!(r.is_complete());
        assert_eq!(r.buffered_bytes(), 0);
    }

    #[test]
    fn partial_prefix_advances_low_water_mark() {
        let mut r = Reassembler::new(5);
        assert!(r.push(2, b("2")).is_empty());
        assert_eq!(r.push(1, b("1")), vec![b("1"), b("2")]);
        assert_eq!(r.low_water_mark(), 3);

        assert!(r.push(5, b("5")).is_empty());
        assert_eq!(r.push(3, b("3")), vec![b("3")]);
        assert!(!r.is_complete());
        assert_eq!(r.push(4, b("4")), vec![b("4"), b("5")]);
        assert!(r.is_complete());
    }

    #[test]
    fn duplicates_and_out_of_range_are_ignored() {
        let mut r = Reassembler::new(2);
        assert!(r.push(2, b("x")).is_empty());
        assert!(r.push(2, b("y")).is_empty());
        assert!(r.push(3, b("z")).is_empty());
        assert!(r.push(0, b("z")).is_empty());

        assert_eq!(r.push(1, b("w")), vec![b("w"), b("x")]);
        assert!(r.push(1, b("again")).is_empty());
    }
}
