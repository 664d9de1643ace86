//! Per-vnode page cache
//!
//! Caches file contents in physical frames that can be handed straight to
//! the VMM for file mappings. Each cached frame tracks dirtiness and the
//! private COW copies split off it; the cache also keeps weak links to
//! every mapped region so write-back and truncation can find live
//! mappings. Population goes through the vnode's driver: a dry-op IRP
//! probe for readiness, then a synchronous read.

use alloc::{
    collections::BTreeMap,
    sync::{Arc, Weak},
    vec::Vec,
};

use crate::driver::irp::{self, Irp};
use crate::error::{Result, Status};
use crate::mm::page::MappedRegion;
use crate::mm::pmm::{self, AllocFlags, FrameNumber};
use crate::mm::FRAME_SIZE;

struct CacheFrame {
    phys: u64,
    dirty: bool,
    /// Private COW copies of this frame: (context id, vaddr). While any
    /// exist the master stays write-protected in every mapping.
    copies: Vec<(u64, usize)>,
}

struct CacheInner {
    /// Page-aligned file offset → cached frame.
    frames: BTreeMap<u64, CacheFrame>,
    regions: Vec<Weak<MappedRegion>>,
}

pub struct PageCache {
    vnode: spin::RwLock<Weak<super::vnode::Vnode>>,
    inner: spin::Mutex<CacheInner>,
}

impl PageCache {
    pub fn new() -> Arc<PageCache> {
        Arc::new(PageCache {
            vnode: spin::RwLock::new(Weak::new()),
            inner: spin::Mutex::new(CacheInner {
                frames: BTreeMap::new(),
                regions: Vec::new(),
            }),
        })
    }

    pub(super) fn attach(&self, vn: &Arc<super::vnode::Vnode>) {
        *self.vnode.write() = Arc::downgrade(vn);
    }

    fn vnode(&self) -> Result<Arc<super::vnode::Vnode>> {
        self.vnode.read().upgrade().ok_or(Status::InvalidOperation)
    }

    /// Physical frame caching `off` (page aligned), populating on miss.
    pub fn frame_or_fill(&self, off: u64) -> Result<u64> {
        let off = off & !(FRAME_SIZE as u64 - 1);
        if let Some(frame) = self.inner.lock().frames.get(&off) {
            return Ok(frame.phys);
        }
        let phys = self.fill(off)?;
        Ok(phys)
    }

    /// Read the backing file into a fresh frame. Short reads (EOF inside
    /// the page) leave the tail zeroed.
    fn fill(&self, off: u64) -> Result<u64> {
        let vn = self.vnode()?;
        let ops = vn.ops()?;
        let blk_size = ops.get_blk_size(vn.desc)?.max(1);

        // Readiness probe; drivers that queue (e.g. removable media) get
        // their chance to fault the request before we commit a frame.
        let probe = Irp::new_dry(
            Some(vn.clone()),
            vn.desc,
            off / blk_size as u64,
            FRAME_SIZE / blk_size,
        );
        irp::run(&*ops, &probe)?;

        let range = pmm::allocate_pages(1, 1, AllocFlags::empty())?;
        let mut buf = alloc::vec![0u8; FRAME_SIZE];
        let file_size = vn.size();
        if off < file_size {
            let want = ((file_size - off) as usize).min(FRAME_SIZE);
            let blk_off = off / blk_size as u64;
            match ops.read_sync(vn.desc, &mut buf[..want], blk_off) {
                Ok(_) => {}
                Err(e) => {
                    let _ = pmm::free_pages(range.start, 1);
                    return Err(e);
                }
            }
        }
        crate::mm::write_phys(range.base(), &buf);

        let mut inner = self.inner.lock();
        match inner.frames.get(&off) {
            Some(existing) => {
                // Raced with another filler; keep theirs.
                let phys = existing.phys;
                drop(inner);
                let _ = pmm::free_pages(range.start, 1);
                Ok(phys)
            }
            None => {
                inner.frames.insert(
                    off,
                    CacheFrame {
                        phys: range.base(),
                        dirty: false,
                        copies: Vec::new(),
                    },
                );
                Ok(range.base())
            }
        }
    }

    pub fn mark_dirty(&self, off: u64) {
        let off = off & !(FRAME_SIZE as u64 - 1);
        if let Some(frame) = self.inner.lock().frames.get_mut(&off) {
            frame.dirty = true;
        }
    }

    /// Register a private COW copy of the frame at `off`.
    pub fn register_copy(&self, off: u64, ctx_id: u64, vaddr: usize) {
        let off = off & !(FRAME_SIZE as u64 - 1);
        if let Some(frame) = self.inner.lock().frames.get_mut(&off) {
            frame.copies.push((ctx_id, vaddr));
        }
    }

    /// Drop a COW copy registration; when the last one goes the master
    /// frame may be mapped writable again.
    pub fn unregister_copy(&self, off: u64, vaddr: usize) -> usize {
        let off = off & !(FRAME_SIZE as u64 - 1);
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get_mut(&off) {
            frame.copies.retain(|&(_, v)| v != vaddr);
            frame.copies.len()
        } else {
            0
        }
    }

    pub fn link_region(&self, region: &Arc<MappedRegion>) {
        self.inner.lock().regions.push(Arc::downgrade(region));
    }

    pub fn unlink_region(&self, region: &Arc<MappedRegion>) {
        self.inner
            .lock()
            .regions
            .retain(|w| w.upgrade().map(|r| !Arc::ptr_eq(&r, region)).unwrap_or(false));
    }

    /// Cached read: copy out of (populating) frames.
    pub fn read(&self, off: u64, buf: &mut [u8]) -> Result<usize> {
        let vn = self.vnode()?;
        let size = vn.size();
        if off >= size {
            return Ok(0);
        }
        let len = buf.len().min((size - off) as usize);
        let mut done = 0;
        while done < len {
            let pos = off + done as u64;
            let page_off = pos & !(FRAME_SIZE as u64 - 1);
            let in_page = (pos - page_off) as usize;
            let chunk = (FRAME_SIZE - in_page).min(len - done);
            let phys = self.frame_or_fill(page_off)?;
            crate::mm::read_phys(phys + in_page as u64, &mut buf[done..done + chunk]);
            done += chunk;
        }
        Ok(done)
    }

    /// Cached write: populate, modify in place, mark dirty. The caller
    /// extends the vnode size beforehand if the write grows the file.
    pub fn write(&self, off: u64, data: &[u8]) -> Result<usize> {
        let mut done = 0;
        while done < data.len() {
            let pos = off + done as u64;
            let page_off = pos & !(FRAME_SIZE as u64 - 1);
            let in_page = (pos - page_off) as usize;
            let chunk = (FRAME_SIZE - in_page).min(data.len() - done);
            let phys = self.frame_or_fill(page_off)?;
            crate::mm::write_phys(phys + in_page as u64, &data[done..done + chunk]);
            self.mark_dirty(page_off);
            done += chunk;
        }
        Ok(done)
    }

    /// Write dirty frames back through the driver.
    pub fn flush(&self) -> Result<()> {
        let vn = self.vnode()?;
        let ops = vn.ops()?;
        let blk_size = ops.get_blk_size(vn.desc)?.max(1);
        let size = vn.size();
        let dirty: Vec<(u64, u64)> = self
            .inner
            .lock()
            .frames
            .iter()
            .filter(|(_, f)| f.dirty)
            .map(|(&off, f)| (off, f.phys))
            .collect();
        for (off, phys) in dirty {
            if off >= size {
                continue;
            }
            let want = ((size - off) as usize).min(FRAME_SIZE);
            let mut buf = alloc::vec![0u8; want];
            crate::mm::read_phys(phys, &mut buf);
            ops.write_sync(vn.desc, &buf, off / blk_size as u64)?;
            if let Some(frame) = self.inner.lock().frames.get_mut(&off) {
                frame.dirty = false;
            }
        }
        Ok(())
    }

    /// Drop every cached frame (unmount). Dirty pages must be flushed
    /// first.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        for (_, frame) in core::mem::take(&mut inner.frames) {
            let _ = pmm::free_pages(FrameNumber::from_base(frame.phys), 1);
        }
    }

    /// Bytes of a frame at `off` read directly (test and COW support).
    pub fn peek(&self, off: u64, buf: &mut [u8]) -> Result<()> {
        let phys = self.frame_or_fill(off & !(FRAME_SIZE as u64 - 1))?;
        crate::mm::read_phys(phys + (off % FRAME_SIZE as u64), buf);
        Ok(())
    }
}
