/// Fixed capacity append buffer with an atomic live count
///
/// The host counterpart of an append/consume structured buffer: concurrent writers
/// reserve slots with a single atomic add. Reservations beyond the capacity are
/// dropped but still counted, so the overflow can be reported with the size that
/// would have been required.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;

use crate::error::{AppendList, TerrainError, TerrainResult};

pub struct AppendBuffer<T> {
    list: AppendList,
    slots: Box<[OnceLock<T>]>,
    count: AtomicU32,
}

impl<T: Copy> AppendBuffer<T> {
    pub fn new(list: AppendList, capacity: u32) -> Self {
        Self {
            list,
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            count: AtomicU32::new(0),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Append one item; false when the buffer is full
    pub fn append(&self, item: T) -> bool {
        self.append_all(&[item])
    }

    /// Reserve contiguous slots for all items; false (and nothing written) when full
    pub fn append_all(&self, items: &[T]) -> bool {
        let n = items.len() as u32;
        let start = self.count.fetch_add(n, Ordering::AcqRel);
        if start + n > self.capacity() {
            return false;
        }
        for (slot, item) in self.slots[start as usize..(start + n) as usize]
            .iter()
            .zip(items)
        {
            // Each slot is reserved by exactly one writer per frame
            let _ = slot.set(*item);
        }
        true
    }

    /// Entries appended, clamped to the capacity
    pub fn len(&self) -> u32 {
        self.requested().min(self.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.requested() == 0
    }

    /// Entries requested, including those dropped on overflow
    pub fn requested(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    pub fn overflowed(&self) -> bool {
        self.requested() > self.capacity()
    }

    pub fn check(&self) -> TerrainResult<()> {
        if self.overflowed() {
            return Err(TerrainError::CapacityOverflow {
                list: self.list,
                capacity: self.capacity(),
                required: self.requested(),
            });
        }
        Ok(())
    }

    /// Stored entries in slot order
    pub fn to_vec(&self) -> Vec<T> {
        self.slots[..self.len() as usize]
            .iter()
            .filter_map(|slot| slot.get().copied())
            .collect()
    }

    pub fn reset(&mut self) {
        *self.count.get_mut() = 0;
        for slot in self.slots.iter_mut() {
            slot.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn parallel_appends_land_in_distinct_slots() {
        let buffer = AppendBuffer::new(AppendList::FinalNodes, 1000);
        (0..1000u32).into_par_iter().for_each(|i| {
            assert!(buffer.append(i));
        });
        let mut items = buffer.to_vec();
        items.sort_unstable();
        assert_eq!(items, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn overflow_is_counted_not_written() {
        let buffer = AppendBuffer::new(AppendList::CandidateNodes, 6);
        assert!(buffer.append_all(&[1, 2, 3, 4]));
        assert!(!buffer.append_all(&[5, 6, 7, 8]));
        assert_eq!(buffer.len(), 6);
        assert_eq!(buffer.requested(), 8);
        assert_eq!(buffer.to_vec(), vec![1, 2, 3, 4]);
        assert!(matches!(
            buffer.check(),
            Err(TerrainError::CapacityOverflow {
                list: AppendList::CandidateNodes,
                capacity: 6,
                required: 8
            })
        ));
    }

    #[test]
    fn reset_clears_entries() {
        let mut buffer = AppendBuffer::new(AppendList::Patches, 4);
        buffer.append_all(&[1, 2, 3]);
        buffer.reset();
        assert!(buffer.is_empty());
        assert!(buffer.append(9));
        assert_eq!(buffer.to_vec(), vec![9]);
    }
}
