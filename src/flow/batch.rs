//! Packet batches.

/// An ordered batch of packets.
///
/// The flow table consumes a batch and re-segments it into per-flow
/// sub-batches; packet order within each sub-batch is preserved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketBatch<P> {
    packets: Vec<P>,
}

impl<P> PacketBatch<P> {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self {
            packets: Vec::new(),
        }
    }

    /// Create an empty batch with room for `capacity` packets.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            packets: Vec::with_capacity(capacity),
        }
    }

    /// Append a packet.
    pub fn push(&mut self, packet: P) {
        self.packets.push(packet);
    }

    /// Number of packets.
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// First packet of the batch.
    pub fn first(&self) -> Option<&P> {
        self.packets.first()
    }

    /// Iterate over packets.
    pub fn iter(&self) -> std::slice::Iter<'_, P> {
        self.packets.iter()
    }

    /// Move all packets of `other` to the end of this batch.
    pub fn append(&mut self, other: &mut PacketBatch<P>) {
        self.packets.append(&mut other.packets);
    }

    /// Take the packets out, leaving the batch empty.
    pub fn take(&mut self) -> PacketBatch<P> {
        PacketBatch {
            packets: std::mem::take(&mut self.packets),
        }
    }

    /// Unwrap into the underlying vector.
    pub fn into_vec(self) -> Vec<P> {
        self.packets
    }
}

impl<P> Default for PacketBatch<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> From<Vec<P>> for PacketBatch<P> {
    fn from(packets: Vec<P>) -> Self {
        Self { packets }
    }
}

impl<P> FromIterator<P> for PacketBatch<P> {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self {
            packets: iter.into_iter().collect(),
        }
    }
}

impl<P> IntoIterator for PacketBatch<P> {
    type Item = P;
    type IntoIter = std::vec::IntoIter<P>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.into_iter()
    }
}

impl<'a, P> IntoIterator for &'a PacketBatch<P> {
    type Item = &'a P;
    type IntoIter = std::slice::Iter<'a, P>;

    fn into_iter(self) -> Self::IntoIter {
        self.packets.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_take() {
        let mut batch = PacketBatch::with_capacity(4);
        batch.push(1);
        batch.push(2);

        let taken = batch.take();
        assert!(batch.is_empty());
        assert_eq!(taken.into_vec(), vec![1, 2]);
    }

    #[test]
    fn test_append_preserves_order() {
        let mut a: PacketBatch<u8> = vec![1, 2].into();
        let mut b: PacketBatch<u8> = (3..5).collect();

        a.append(&mut b);
        assert!(b.is_empty());
        assert_eq!(a.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4]);
        assert_eq!(a.first(), Some(&1));
    }
}
