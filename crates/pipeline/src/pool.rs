//! Buffer Pool: Bookkeeping for the decoder's input buffers.
//!
//! A fixed set of buffers is registered on the decoder input port for the
//! lifetime of a session. Each buffer is either **released** (owned by the
//! engine, free to be filled) or **in flight** (acquired for filling and
//! then owned by the hardware until it hands the buffer back). Never both,
//! never neither.
//!
//! An in-flight buffer is identified by a [`BufferId`] assigned at
//! acquisition; the hardware echoes it back on return. Identities are
//! reused once the buffer they named is released.
//!
//! The pool holds no lock of its own. It lives inside the engine's single
//! [`Monitor`](crate::monitor::Monitor), and blocking acquisition / drain
//! are built on top of it there.

use ip_common::{BufferFlags, BufferHandle, BufferHeader, BufferId, PoolError};

/// Snapshot of the pool's occupancy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of buffers owned by the pool.
    pub count: usize,
    /// Buffers available for filling.
    pub released: usize,
    /// Buffers acquired and not yet returned.
    pub in_flight: usize,
    /// Total acquisitions since the pool was created.
    pub total_acquired: u64,
    /// Total returns since the pool was created.
    pub total_returned: u64,
}

/// A buffer moved to in-flight, ready to be filled by the engine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FillSlot {
    /// Identity carried through submission and echoed back on return.
    pub id: BufferId,
    /// Index of the backing memory region.
    pub slot: usize,
    pub handle: BufferHandle,
    pub capacity: usize,
}

/// What a successful return changed, so the caller knows whom to wake.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Returned {
    /// The released set went from empty to non-empty.
    pub first_released: bool,
    /// No buffers remain in flight.
    pub drained: bool,
}

impl Returned {
    pub fn should_wake(self) -> bool {
        self.first_released || self.drained
    }
}

pub struct BufferPool {
    /// Per-slot header; index is the memory region slot.
    headers: Vec<BufferHeader>,
    /// Slots free for filling.
    released: Vec<usize>,
    /// Identity -> slot for buffers in flight.
    in_flight: Vec<Option<usize>>,
    total_acquired: u64,
    total_returned: u64,
}

impl BufferPool {
    /// Create a pool over registered buffers, all initially released.
    ///
    /// `handles[i]` must be the registration of memory region `i`.
    ///
    /// # Panics
    ///
    /// Panics if `handles` is empty.
    pub fn new(handles: &[BufferHandle], alloc_len: usize) -> Self {
        assert!(!handles.is_empty(), "pool needs at least one buffer");
        let headers = handles
            .iter()
            .enumerate()
            .map(|(slot, &handle)| BufferHeader {
                handle,
                id: BufferId(slot),
                alloc_len,
                offset: 0,
                filled_len: 0,
                flags: BufferFlags::NONE,
            })
            .collect::<Vec<_>>();
        Self {
            released: (0..headers.len()).collect(),
            in_flight: vec![None; headers.len()],
            headers,
            total_acquired: 0,
            total_returned: 0,
        }
    }

    /// Number of buffers owned by the pool. Constant for its lifetime.
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn released_count(&self) -> usize {
        self.released.len()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.iter().filter(|s| s.is_some()).count()
    }

    pub fn has_released(&self) -> bool {
        !self.released.is_empty()
    }

    pub fn is_drained(&self) -> bool {
        self.in_flight.iter().all(Option::is_none)
    }

    /// Move one released buffer to in flight, assigning it the lowest free
    /// identity. Returns `None` when every buffer is in flight.
    pub fn try_acquire(&mut self) -> Option<FillSlot> {
        let slot = self.released.pop()?;
        let id = self
            .in_flight
            .iter()
            .position(Option::is_none)
            .expect("a released buffer implies a free identity");
        self.in_flight[id] = Some(slot);
        self.total_acquired += 1;

        self.headers[slot].id = BufferId(id);
        debug_assert!(self.invariant_holds());
        let header = &self.headers[slot];
        Some(FillSlot {
            id: BufferId(id),
            slot,
            handle: header.handle,
            capacity: header.alloc_len,
        })
    }

    /// Record the metadata of an in-flight buffer about to be submitted and
    /// return the header to hand to the hardware.
    pub fn stamp(
        &mut self,
        id: BufferId,
        filled_len: usize,
        flags: BufferFlags,
    ) -> Result<BufferHeader, PoolError> {
        let slot = self.slot_of(id)?;
        let header = &mut self.headers[slot];
        header.offset = 0;
        header.filled_len = filled_len;
        header.flags = flags;
        Ok(*header)
    }

    /// Take back a buffer the hardware has finished with: clear its
    /// metadata and move it to released.
    ///
    /// Constant time apart from the identity lookup; never blocks.
    pub fn return_buffer(&mut self, id: BufferId) -> Result<Returned, PoolError> {
        let slot = self.slot_of(id)?;
        self.in_flight[id.0] = None;
        self.headers[slot].clear();
        self.released.push(slot);
        self.total_returned += 1;
        debug_assert!(self.invariant_holds());
        Ok(Returned {
            first_released: self.released.len() == 1,
            drained: self.is_drained(),
        })
    }

    /// Current header of a region slot.
    pub fn header(&self, slot: usize) -> Option<&BufferHeader> {
        self.headers.get(slot)
    }

    /// Registration handles, in region order.
    pub fn handles(&self) -> impl Iterator<Item = BufferHandle> + '_ {
        self.headers.iter().map(|h| h.handle)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            count: self.len(),
            released: self.released_count(),
            in_flight: self.in_flight_count(),
            total_acquired: self.total_acquired,
            total_returned: self.total_returned,
        }
    }

    /// Every buffer is in exactly one of {released, in flight}.
    pub fn invariant_holds(&self) -> bool {
        let mut seen = vec![0u8; self.headers.len()];
        for &slot in &self.released {
            seen[slot] += 1;
        }
        for slot in self.in_flight.iter().flatten() {
            seen[*slot] += 1;
        }
        seen.iter().all(|&n| n == 1)
    }

    // ── internal helpers ──────────────────────────────────────────

    fn slot_of(&self, id: BufferId) -> Result<usize, PoolError> {
        match self.in_flight.get(id.0) {
            None => Err(PoolError::OutOfRange {
                id,
                count: self.headers.len(),
            }),
            Some(None) => Err(PoolError::NotInFlight(id)),
            Some(Some(slot)) => Ok(*slot),
        }
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("count", &self.len())
            .field("released", &self.released_count())
            .field("in_flight", &self.in_flight_count())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> BufferPool {
        let handles: Vec<_> = (0..n as u64).map(|i| BufferHandle(100 + i)).collect();
        BufferPool::new(&handles, 4096)
    }

    // ── Construction ─────────────────────────────────────────────

    #[test]
    fn new_pool_is_fully_released() {
        let p = pool(3);
        assert_eq!(p.len(), 3);
        assert_eq!(p.released_count(), 3);
        assert_eq!(p.in_flight_count(), 0);
        assert!(p.is_drained());
        assert!(p.invariant_holds());
    }

    #[test]
    #[should_panic(expected = "pool needs at least one buffer")]
    fn empty_pool_panics() {
        let _ = BufferPool::new(&[], 4096);
    }

    // ── Acquire ──────────────────────────────────────────────────

    #[test]
    fn acquire_moves_buffer_in_flight() {
        let mut p = pool(2);
        let slot = p.try_acquire().unwrap();
        assert_eq!(slot.id, BufferId(0));
        assert_eq!(slot.capacity, 4096);
        assert_eq!(p.released_count(), 1);
        assert_eq!(p.in_flight_count(), 1);
        assert!(!p.is_drained());
    }

    #[test]
    fn acquired_slot_mirrors_its_header() {
        let mut p = pool(3);
        let _ = p.try_acquire().unwrap();
        let slot = p.try_acquire().unwrap();
        let header = p.header(slot.slot).unwrap();
        assert_eq!(header.id, slot.id);
        assert_eq!(header.handle, slot.handle);
        assert_eq!(slot.handle, p.handles().nth(slot.slot).unwrap());
        assert_eq!(slot.capacity, header.alloc_len);
    }

    #[test]
    fn acquire_exhausts_pool() {
        let mut p = pool(2);
        assert!(p.try_acquire().is_some());
        assert!(p.try_acquire().is_some());
        assert!(p.try_acquire().is_none());
        assert!(!p.has_released());
        assert_eq!(p.released_count() + p.in_flight_count(), 2);
    }

    #[test]
    fn identities_are_distinct_while_in_flight() {
        let mut p = pool(3);
        let a = p.try_acquire().unwrap();
        let b = p.try_acquire().unwrap();
        let c = p.try_acquire().unwrap();
        assert_ne!(a.id, b.id);
        assert_ne!(b.id, c.id);
        assert_ne!(a.slot, b.slot);
        assert_ne!(a.handle, c.handle);
    }

    #[test]
    fn identity_is_reassigned_after_return() {
        let mut p = pool(2);
        let a = p.try_acquire().unwrap();
        let b = p.try_acquire().unwrap();
        p.return_buffer(a.id).unwrap();

        let c = p.try_acquire().unwrap();
        assert_eq!(c.id, a.id, "lowest free identity is reused");
        assert_eq!(c.slot, a.slot);
        assert_ne!(c.id, b.id);
    }

    // ── Return ───────────────────────────────────────────────────

    #[test]
    fn return_clears_metadata() {
        let mut p = pool(1);
        let s = p.try_acquire().unwrap();
        let header = p.stamp(s.id, 1234, BufferFlags::END_OF_STREAM).unwrap();
        assert_eq!(header.filled_len, 1234);
        assert_eq!(header.handle, s.handle);

        p.return_buffer(s.id).unwrap();
        let h = p.header(s.slot).unwrap();
        assert_eq!(h.filled_len, 0);
        assert_eq!(h.offset, 0);
        assert!(h.flags.is_empty());
    }

    #[test]
    fn return_reports_wake_conditions() {
        let mut p = pool(2);
        let a = p.try_acquire().unwrap();
        let b = p.try_acquire().unwrap();

        let first = p.return_buffer(a.id).unwrap();
        assert!(first.first_released);
        assert!(!first.drained);

        let second = p.return_buffer(b.id).unwrap();
        assert!(!second.first_released);
        assert!(second.drained);
        assert!(second.should_wake());
    }

    #[test]
    fn double_return_is_rejected() {
        let mut p = pool(2);
        let s = p.try_acquire().unwrap();
        p.return_buffer(s.id).unwrap();
        assert_eq!(p.return_buffer(s.id), Err(PoolError::NotInFlight(s.id)));
        assert!(p.invariant_holds());
        assert_eq!(p.released_count(), 2);
    }

    #[test]
    fn return_of_never_acquired_identity_is_rejected() {
        let mut p = pool(2);
        assert_eq!(
            p.return_buffer(BufferId(1)),
            Err(PoolError::NotInFlight(BufferId(1)))
        );
    }

    #[test]
    fn return_out_of_range_is_rejected() {
        let mut p = pool(2);
        assert_eq!(
            p.return_buffer(BufferId(7)),
            Err(PoolError::OutOfRange {
                id: BufferId(7),
                count: 2
            })
        );
    }

    #[test]
    fn stamp_requires_in_flight() {
        let mut p = pool(1);
        assert_eq!(
            p.stamp(BufferId(0), 10, BufferFlags::NONE),
            Err(PoolError::NotInFlight(BufferId(0)))
        );
    }

    // ── Invariant ────────────────────────────────────────────────

    #[test]
    fn invariant_holds_through_mixed_cycles() {
        let mut p = pool(3);
        let mut live = Vec::new();
        for round in 0..20 {
            if round % 3 == 2 || !p.has_released() {
                let id = live.remove(0);
                p.return_buffer(id).unwrap();
            } else {
                live.push(p.try_acquire().unwrap().id);
            }
            assert!(p.invariant_holds());
            assert_eq!(p.released_count() + p.in_flight_count(), 3);
        }
    }

    // ── Stats ────────────────────────────────────────────────────

    #[test]
    fn stats_track_totals() {
        let mut p = pool(2);
        let a = p.try_acquire().unwrap();
        p.return_buffer(a.id).unwrap();
        let _ = p.try_acquire().unwrap();

        assert_eq!(
            p.stats(),
            PoolStats {
                count: 2,
                released: 1,
                in_flight: 1,
                total_acquired: 2,
                total_returned: 1,
            }
        );
    }

    #[test]
    fn handles_in_region_order() {
        let p = pool(3);
        let handles: Vec<_> = p.handles().collect();
        assert_eq!(handles, vec![BufferHandle(100), BufferHandle(101), BufferHandle(102)]);
    }

    #[test]
    fn debug_format() {
        let p = pool(4);
        let dbg = format!("{p:?}");
        assert!(dbg.contains("BufferPool"));
        assert!(dbg.contains("count: 4"));
    }
}
