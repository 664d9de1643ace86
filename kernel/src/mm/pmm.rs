//! Physical memory manager
//!
//! Bitmap allocator over the managed frame range with a free-list stack
//! in front, so the common single-frame allocation is a pop. Multi-frame
//! and aligned requests (huge pages, DMA buffers) fall back to a bitmap
//! scan. `BELOW_4G` constrains results to 32-bit addressable frames for
//! devices without 64-bit DMA.

use alloc::vec::Vec;

use crate::error::{Result, Status};
use crate::mm::{FRAME_SIZE, HUGE_PAGE_SIZE};
use crate::sync::spinlock::SpinLock;

/// Index of a physical frame (`phys = index * FRAME_SIZE`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FrameNumber(u64);

impl FrameNumber {
    pub const fn new(index: u64) -> Self {
        Self(index)
    }

    pub const fn from_base(phys: u64) -> Self {
        Self(phys / FRAME_SIZE as u64)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn base(&self) -> u64 {
        self.0 * FRAME_SIZE as u64
    }
}

/// A run of physically contiguous frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameRange {
    pub start: FrameNumber,
    pub count: usize,
}

impl FrameRange {
    pub const fn base(&self) -> u64 {
        self.start.base()
    }

    pub const fn size(&self) -> usize {
        self.count * FRAME_SIZE
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AllocFlags: u32 {
        /// Result must be entirely below 4 GiB.
        const BELOW_4G = 1 << 0;
    }
}

struct FrameAllocator {
    /// One bit per managed frame; set = allocated.
    bitmap: Vec<u64>,
    base_frame: u64,
    nframes: usize,
    /// Stack of recently freed single frames.
    freelist: Vec<u64>,
    free_count: usize,
}

impl FrameAllocator {
    const fn empty() -> Self {
        Self {
            bitmap: Vec::new(),
            base_frame: 0,
            nframes: 0,
            freelist: Vec::new(),
            free_count: 0,
        }
    }

    fn idx(&self, frame: u64) -> Option<usize> {
        frame
            .checked_sub(self.base_frame)
            .map(|i| i as usize)
            .filter(|&i| i < self.nframes)
    }

    fn is_set(&self, i: usize) -> bool {
        self.bitmap[i / 64] & (1u64 << (i % 64)) != 0
    }

    fn set(&mut self, i: usize) {
        self.bitmap[i / 64] |= 1u64 << (i % 64);
    }

    fn clear_bit(&mut self, i: usize) {
        self.bitmap[i / 64] &= !(1u64 << (i % 64));
    }

    fn fits_constraint(&self, frame: u64, count: usize, flags: AllocFlags) -> bool {
        if flags.contains(AllocFlags::BELOW_4G) {
            let end = (frame + count as u64) * FRAME_SIZE as u64;
            if end > u32::MAX as u64 + 1 {
                return false;
            }
        }
        true
    }

    fn allocate(
        &mut self,
        count: usize,
        align_frames: usize,
        flags: AllocFlags,
    ) -> Result<FrameRange> {
        if count == 0 || align_frames == 0 || !align_frames.is_power_of_two() {
            return Err(Status::InvalidArgument);
        }
        if self.nframes == 0 {
            return Err(Status::InvalidInitPhase);
        }
        if count > self.free_count {
            return Err(Status::OutOfMemory);
        }

        // Fast path: one naturally aligned frame off the free stack.
        if count == 1 && align_frames == 1 {
            while let Some(frame) = self.freelist.pop() {
                let Some(i) = self.idx(frame) else { continue };
                if self.is_set(i) || !self.fits_constraint(frame, 1, flags) {
                    continue;
                }
                self.set(i);
                self.free_count -= 1;
                return Ok(FrameRange {
                    start: FrameNumber::new(frame),
                    count: 1,
                });
            }
        }

        // Bitmap scan for an aligned run.
        let align = align_frames as u64;
        let mut frame = self.base_frame.next_multiple_of(align);
        while let Some(start_idx) = self.idx(frame) {
            if start_idx + count > self.nframes {
                break;
            }
            let run_free = (start_idx..start_idx + count).all(|i| !self.is_set(i));
            if run_free && self.fits_constraint(frame, count, flags) {
                for i in start_idx..start_idx + count {
                    self.set(i);
                }
                self.free_count -= count;
                return Ok(FrameRange {
                    start: FrameNumber::new(frame),
                    count,
                });
            }
            frame += align;
        }
        Err(Status::OutOfMemory)
    }

    fn free(&mut self, start: FrameNumber, count: usize) -> Result<()> {
        for n in 0..count {
            let frame = start.as_u64() + n as u64;
            let i = self.idx(frame).ok_or(Status::InvalidArgument)?;
            if !self.is_set(i) {
                return Err(Status::InvalidArgument);
            }
            self.clear_bit(i);
            self.free_count += 1;
            if self.freelist.len() < 1024 {
                self.freelist.push(frame);
            }
        }
        Ok(())
    }
}

static ALLOCATOR: SpinLock<FrameAllocator> = SpinLock::new(FrameAllocator::empty());

/// Hand the PMM its managed range. Called once during memory bring-up.
pub fn init(base_phys: u64, nframes: usize) {
    let mut pmm = ALLOCATOR.lock();
    pmm.base_frame = base_phys / FRAME_SIZE as u64;
    pmm.nframes = nframes;
    pmm.bitmap = alloc::vec![0u64; nframes.div_ceil(64)];
    pmm.freelist = Vec::with_capacity(1024);
    pmm.free_count = nframes;
}

/// Allocate `count` contiguous frames at the given frame alignment.
pub fn allocate_pages(count: usize, align_frames: usize, flags: AllocFlags) -> Result<FrameRange> {
    ALLOCATOR.lock().allocate(count, align_frames, flags)
}

/// Allocation constrained below 4 GiB, for 32-bit DMA devices.
pub fn allocate_pages_32(count: usize, align_frames: usize) -> Result<FrameRange> {
    ALLOCATOR
        .lock()
        .allocate(count, align_frames, AllocFlags::BELOW_4G)
}

/// Allocate one naturally aligned huge page's worth of frames.
pub fn allocate_huge_page() -> Result<FrameRange> {
    let frames = HUGE_PAGE_SIZE / FRAME_SIZE;
    allocate_pages(frames, frames, AllocFlags::empty())
}

pub fn free_pages(start: FrameNumber, count: usize) -> Result<()> {
    ALLOCATOR.lock().free(start, count)
}

/// Frames currently unallocated.
pub fn free_frames() -> usize {
    ALLOCATOR.lock().free_count
}
