//! `LinearMemory`: a growable byte arena modelling a detector's address space.
//!
//! Addresses are 32-bit offsets; offset `0` is never handed out so it can
//! serve as null. Freed regions go to a first-fit free list. Growth past the
//! configured limit is an allocation failure, never a panic.

use std::collections::BTreeMap;

use tracing::warn;

use super::{EngineMemory, NativePtr};
use crate::error::{Result, SnowmanError};

/// Default heap limit: 16 MiB.
pub const DEFAULT_MEMORY_LIMIT: usize = 16 * 1024 * 1024;

const ALIGN: usize = 8;

#[derive(Debug, Clone, Copy)]
struct Region {
    /// Bytes requested by the caller.
    size: usize,
    /// Bytes reserved (aligned).
    capacity: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub allocations: u64,
    pub frees: u64,
    pub bytes_in_use: usize,
}

#[derive(Debug)]
pub struct LinearMemory {
    bytes: Vec<u8>,
    limit: usize,
    live: BTreeMap<u32, Region>,
    free_list: Vec<(u32, usize)>,
    stats: MemoryStats,
}

impl LinearMemory {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MEMORY_LIMIT)
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            // Reserve the null page.
            bytes: vec![0; ALIGN],
            limit,
            live: BTreeMap::new(),
            free_list: Vec::new(),
            stats: MemoryStats::default(),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    /// Number of live allocations.
    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn read_i16(&self, ptr: NativePtr, len: usize) -> Result<impl Iterator<Item = i16> + '_> {
        let src = self.region(ptr, len * 2)?;
        Ok(src
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]])))
    }

    pub fn read_i32(&self, ptr: NativePtr, len: usize) -> Result<impl Iterator<Item = i32> + '_> {
        let src = self.region(ptr, len * 4)?;
        Ok(src
            .chunks_exact(4)
            .map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    }

    pub fn read_f32(&self, ptr: NativePtr, len: usize) -> Result<impl Iterator<Item = f32> + '_> {
        let src = self.region(ptr, len * 4)?;
        Ok(src
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
    }

    /// Locate the live allocation holding `[ptr, ptr + len)`.
    fn bounds(&self, ptr: NativePtr, len: usize) -> Result<(usize, usize)> {
        let out_of_bounds = || SnowmanError::OutOfBounds { ptr: ptr.0, len };
        let (&start, region) = self
            .live
            .range(..=ptr.0)
            .next_back()
            .ok_or_else(out_of_bounds)?;
        let offset = (ptr.0 - start) as usize;
        if offset + len > region.size {
            return Err(out_of_bounds());
        }
        let begin = ptr.0 as usize;
        Ok((begin, begin + len))
    }

    fn region(&self, ptr: NativePtr, len: usize) -> Result<&[u8]> {
        let (begin, end) = self.bounds(ptr, len)?;
        Ok(&self.bytes[begin..end])
    }

    fn region_mut(&mut self, ptr: NativePtr, len: usize) -> Result<&mut [u8]> {
        let (begin, end) = self.bounds(ptr, len)?;
        Ok(&mut self.bytes[begin..end])
    }
}

impl Default for LinearMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMemory for LinearMemory {
    fn malloc(&mut self, size: usize) -> Result<NativePtr> {
        let capacity = size.max(1).div_ceil(ALIGN) * ALIGN;

        let offset = if let Some(idx) = self
            .free_list
            .iter()
            .position(|&(_, cap)| cap >= capacity)
        {
            let (offset, reserved) = self.free_list.swap_remove(idx);
            self.live.insert(
                offset,
                Region {
                    size,
                    capacity: reserved,
                },
            );
            offset
        } else {
            let start = self.bytes.len();
            let end = start + capacity;
            if end > self.limit || end > u32::MAX as usize {
                return Err(SnowmanError::AllocationFailure { size });
            }
            self.bytes.resize(end, 0);
            self.live.insert(start as u32, Region { size, capacity });
            start as u32
        };

        self.stats.allocations += 1;
        self.stats.bytes_in_use += size;
        Ok(NativePtr(offset))
    }

    fn free(&mut self, ptr: NativePtr) {
        match self.live.remove(&ptr.0) {
            Some(region) => {
                self.free_list.push((ptr.0, region.capacity));
                self.stats.frees += 1;
                self.stats.bytes_in_use -= region.size;
            }
            None => warn!(%ptr, "free of unknown pointer ignored"),
        }
    }

    fn write_i16(&mut self, ptr: NativePtr, data: &[i16]) -> Result<()> {
        let dst = self.region_mut(ptr, data.len() * 2)?;
        for (out, v) in dst.chunks_exact_mut(2).zip(data) {
            out.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    fn write_i32(&mut self, ptr: NativePtr, data: &[i32]) -> Result<()> {
        let dst = self.region_mut(ptr, data.len() * 4)?;
        for (out, v) in dst.chunks_exact_mut(4).zip(data) {
            out.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }

    fn write_f32(&mut self, ptr: NativePtr, data: &[f32]) -> Result<()> {
        let dst = self.region_mut(ptr, data.len() * 4)?;
        for (out, v) in dst.chunks_exact_mut(4).zip(data) {
            out.copy_from_slice(&v.to_le_bytes());
        }
        Ok(())
    }
}
