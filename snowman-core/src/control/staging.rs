//! The native staging buffer: one reusable allocation in the detector's
//! address space, sized to the most recent block.

use tracing::debug;

use crate::detector::{EngineMemory, NativePtr};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Allocation {
    ptr: NativePtr,
    size: usize,
}

/// At most one allocation exists at a time. It is replaced only when the
/// requested byte length changes, and released explicitly on teardown.
#[derive(Debug, Default)]
pub struct StagingBuffer {
    current: Option<Allocation>,
    allocations: u64,
    releases: u64,
}

impl StagingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return an allocation of exactly `size` bytes, reusing the current one
    /// when it already has that size.
    ///
    /// On resize the old allocation is released before the new one is made.
    /// If that allocation fails the buffer is left empty.
    pub fn acquire<M>(&mut self, memory: &mut M, size: usize) -> Result<NativePtr>
    where
        M: EngineMemory + ?Sized,
    {
        if let Some(current) = self.current {
            if current.size == size {
                return Ok(current.ptr);
            }
        }

        self.release(memory);

        let ptr = memory.malloc(size)?;
        self.allocations += 1;
        self.current = Some(Allocation { ptr, size });
        debug!(%ptr, size, "staging buffer allocated");
        Ok(ptr)
    }

    /// Free the current allocation, if any.
    pub fn release<M: EngineMemory + ?Sized>(&mut self, memory: &mut M) {
        if let Some(current) = self.current.take() {
            memory.free(current.ptr);
            self.releases += 1;
            debug!(ptr = %current.ptr, size = current.size, "staging buffer freed");
        }
    }

    pub fn ptr(&self) -> Option<NativePtr> {
        self.current.map(|a| a.ptr)
    }

    /// Size in bytes of the current allocation.
    pub fn size(&self) -> Option<usize> {
        self.current.map(|a| a.size)
    }

    pub fn is_allocated(&self) -> bool {
        self.current.is_some()
    }

    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    pub fn releases(&self) -> u64 {
        self.releases
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::LinearMemory;
    use crate::error::SnowmanError;

    #[test]
    fn same_size_reuses_allocation() {
        let mut mem = LinearMemory::new();
        let mut staging = StagingBuffer::new();

        let a = staging.acquire(&mut mem, 256).unwrap();
        let b = staging.acquire(&mut mem, 256).unwrap();

        assert_eq!(a, b);
        assert_eq!(staging.allocations(), 1);
        assert_eq!(staging.releases(), 0);
        assert_eq!(mem.stats().allocations, 1);
    }

    #[test]
    fn resize_releases_once_then_allocates_once() {
        let mut mem = LinearMemory::new();
        let mut staging = StagingBuffer::new();

        staging.acquire(&mut mem, 256).unwrap();
        staging.acquire(&mut mem, 512).unwrap();

        assert_eq!(staging.allocations(), 2);
        assert_eq!(staging.releases(), 1);
        assert_eq!(staging.size(), Some(512));
        assert_eq!(mem.live_allocations(), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let mut mem = LinearMemory::new();
        let mut staging = StagingBuffer::new();
        staging.acquire(&mut mem, 64).unwrap();

        staging.release(&mut mem);
        staging.release(&mut mem);

        assert!(!staging.is_allocated());
        assert_eq!(staging.releases(), 1);
        assert_eq!(mem.live_allocations(), 0);
    }

    #[test]
    fn failed_resize_leaves_buffer_empty() {
        let mut mem = LinearMemory::with_limit(1024);
        let mut staging = StagingBuffer::new();
        staging.acquire(&mut mem, 256).unwrap();

        let err = staging.acquire(&mut mem, 4096).unwrap_err();
        assert!(matches!(err, SnowmanError::AllocationFailure { size: 4096 }));
        assert!(!staging.is_allocated());
        assert_eq!(mem.live_allocations(), 0);
    }
}
