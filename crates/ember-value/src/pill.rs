//! Pill: the binary envelope used for serialized values and raw I/O.
//!
//! A Pill is a growable byte buffer with a read cursor. Writers append at
//! the end; readers consume from the cursor. The same type backs codec
//! output, socket/subprocess payloads, and the script-visible `pile`
//! buffer object.

/// Length-prefixed mutable byte buffer with a read cursor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Pill {
    data: Vec<u8>,
    offset: usize,
}

impl Pill {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, offset: 0 }
    }

    /// Total bytes stored, including already-consumed ones.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Bytes left between the read cursor and the end.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Unconsumed contents.
    pub fn contents(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    /// The whole buffer regardless of the cursor.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn add(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn add_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn add_u32(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    pub fn add_f64(&mut self, v: f64) {
        self.data.extend_from_slice(&v.to_le_bytes());
    }

    /// Overwrite `bytes` starting at an absolute position. The range must
    /// already exist; used to backfill headers after the payload is known.
    pub fn patch(&mut self, at: usize, bytes: &[u8]) {
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Advance the cursor without looking at the bytes.
    pub fn skip(&mut self, count: usize) -> bool {
        if self.remaining() < count {
            return false;
        }
        self.offset += count;
        true
    }

    /// Consume exactly `count` bytes, or `None` if the buffer is short.
    pub fn take(&mut self, count: usize) -> Option<&[u8]> {
        if self.remaining() < count {
            return None;
        }
        let start = self.offset;
        self.offset += count;
        Some(&self.data[start..self.offset])
    }

    pub fn take_u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    pub fn take_u32(&mut self) -> Option<u32> {
        self.take(4).map(|b| u32::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn take_f64(&mut self) -> Option<f64> {
        self.take(8).map(|b| f64::from_le_bytes(b.try_into().unwrap()))
    }

    /// Consume up to `count` bytes (all remaining when `count` is zero).
    pub fn read(&mut self, count: usize) -> Vec<u8> {
        let count = if count == 0 || count > self.remaining() {
            self.remaining()
        } else {
            count
        };
        let out = self.contents()[..count].to_vec();
        self.offset += count;
        out
    }

    /// Offset of `needle` within the unconsumed contents, if present.
    pub fn find(&self, needle: &[u8]) -> Option<usize> {
        if needle.is_empty() {
            return Some(0);
        }
        self.contents()
            .windows(needle.len())
            .position(|w| w == needle)
    }

    pub fn rewind(&mut self) {
        self.offset = 0;
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.offset = 0;
    }
}

impl From<Vec<u8>> for Pill {
    fn from(data: Vec<u8>) -> Self {
        Self::from_vec(data)
    }
}

impl From<&[u8]> for Pill {
    fn from(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_consumes_in_order() {
        let mut pill = Pill::new();
        pill.add_u32(7);
        pill.add(b"abc");
        assert_eq!(pill.take_u32(), Some(7));
        assert_eq!(pill.take(3), Some(&b"abc"[..]));
        assert_eq!(pill.take_u8(), None);
    }

    #[test]
    fn short_take_leaves_cursor_alone() {
        let mut pill = Pill::from_vec(vec![1, 2]);
        assert!(pill.take_u32().is_none());
        assert_eq!(pill.remaining(), 2);
    }

    #[test]
    fn read_zero_drains() {
        let mut pill = Pill::from_vec(b"hello".to_vec());
        assert_eq!(pill.read(0), b"hello");
        assert!(pill.is_empty());
    }

    #[test]
    fn find_searches_unconsumed_only() {
        let mut pill = Pill::from_vec(b"xxneedle".to_vec());
        assert_eq!(pill.find(b"needle"), Some(2));
        pill.skip(3);
        assert_eq!(pill.find(b"needle"), None);
        assert_eq!(pill.find(b"eedle"), Some(0));
    }
}
