//! Collective channel between ranks.

use byteorder::{ByteOrder, LittleEndian};

use crate::util::Result;

/// Broadcast/barrier primitives over fixed-size byte payloads.
///
/// Every rank must issue the same collectives in the same order. A rank
/// that fails to take part surfaces as [`Error::Protocol`] on the others.
///
/// [`Error::Protocol`]: crate::util::Error::Protocol
pub trait Communicator {
    /// Index of this rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of ranks.
    fn size(&self) -> usize;

    /// Send `buf` from `root` to every rank. On `root` the buffer is read,
    /// elsewhere it is overwritten. Lengths must agree across ranks.
    fn broadcast_bytes(&self, buf: &mut [u8], root: usize) -> Result<()>;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) -> Result<()>;

    fn broadcast_f32(&self, value: &mut f32, root: usize) -> Result<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_f32(&mut buf, *value);
        self.broadcast_bytes(&mut buf, root)?;
        *value = LittleEndian::read_f32(&buf);
        Ok(())
    }

    fn broadcast_size(&self, value: &mut u64, root: usize) -> Result<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, *value);
        self.broadcast_bytes(&mut buf, root)?;
        *value = LittleEndian::read_u64(&buf);
        Ok(())
    }

    /// Every rank publishes `values[rank]`; afterwards all ranks hold the
    /// full vector. Ends with a barrier.
    fn all_broadcast_f32(&self, values: &mut [f32]) -> Result<()> {
        for (root, v) in values.iter_mut().enumerate() {
            self.broadcast_f32(v, root)?;
        }
        self.barrier()
    }

    /// [`all_broadcast_f32`](Self::all_broadcast_f32) for size values.
    fn all_broadcast_size(&self, values: &mut [u64]) -> Result<()> {
        for (root, v) in values.iter_mut().enumerate() {
            self.broadcast_size(v, root)?;
        }
        self.barrier()
    }
}
