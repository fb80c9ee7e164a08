/// A flat byte buffer with a fill pointer. Reducing the buffer by `n`
/// bytes moves `[n..fill)` down to `[0..fill-n)`; growth only happens
/// when a codec needs more output space, doubles the capacity, and is
/// capped by `max`.
///
/// Expressed as a flat `Vec<u8>` with manual shifting rather than a ring
/// buffer, since callers need a single contiguous filled slice to hand
/// to transports and codecs.
#[derive(Debug)]
pub struct Buffer {
    data: Vec<u8>,
    fill: usize,
    max: usize,
}

impl Buffer {
    pub fn new(initial_size: usize, max: usize) -> Buffer {
        Buffer { data: vec![0; initial_size], fill: 0, max: max.max(initial_size) }
    }

    #[inline]
    pub fn fill(&self) -> usize {
        self.fill
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn max(&self) -> usize {
        self.max
    }

    #[inline]
    pub fn free_capacity(&self) -> usize {
        self.data.len() - self.fill
    }

    /// The occupied prefix of the buffer.
    #[inline]
    pub fn filled_slice(&self) -> &[u8] {
        &self.data[..self.fill]
    }

    /// The free tail, for transports to recv/decode into directly.
    #[inline]
    pub fn free_slice(&mut self) -> &mut [u8] {
        &mut self.data[self.fill..]
    }

    /// Marks `n` additional bytes (already written into [`Buffer::free_slice`])
    /// as filled.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.fill + n <= self.data.len());
        self.fill = (self.fill + n).min(self.data.len());
    }

    /// Appends `bytes`, growing the buffer (doubling, capped at `max`) if
    /// there isn't enough free capacity.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        while self.free_capacity() < bytes.len() {
            if !self.grow() {
                return false;
            }
        }
        let start = self.fill;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        self.fill += bytes.len();
        true
    }

    /// Doubles the buffer's capacity, capped by `max`. Returns `false` if
    /// already at the cap.
    pub fn grow(&mut self) -> bool {
        if self.data.len() >= self.max {
            return false;
        }
        let new_size = (self.data.len() * 2).min(self.max).max(self.data.len() + 1);
        self.data.resize(new_size, 0);
        true
    }

    /// Shifts `[n..fill)` down to `[0..fill-n)`, reducing `fill` by `n`.
    pub fn reduce(&mut self, n: usize) {
        let n = n.min(self.fill);
        if n == 0 {
            return;
        }
        self.data.copy_within(n..self.fill, 0);
        self.fill -= n;
    }

    pub fn clear(&mut self) {
        self.fill = 0;
    }

    pub fn is_full(&self) -> bool {
        self.free_capacity() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reduce_shifts_remaining_bytes_down() {
        let mut buf = Buffer::new(16, 64);
        buf.append(b"hello world!");
        let before_fill = buf.fill();
        buf.reduce(6);
        assert_eq!(buf.fill(), before_fill - 6);
        assert_eq!(buf.filled_slice(), b"world!");
    }

    #[test]
    fn append_grows_when_out_of_space_and_caps_at_max() {
        let mut buf = Buffer::new(4, 8);
        assert!(buf.append(b"12345678"));
        assert_eq!(buf.size(), 8);
        assert!(!buf.append(b"x"));
    }

    #[test]
    fn commit_advances_fill_within_bounds() {
        let mut buf = Buffer::new(8, 8);
        buf.free_slice()[..3].copy_from_slice(b"abc");
        buf.commit(3);
        assert_eq!(buf.fill(), 3);
        assert_eq!(buf.filled_slice(), b"abc");
    }
}
