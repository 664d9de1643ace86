//! Cross-address-space copies
//!
//! The syscall layer never dereferences user pointers directly: it maps
//! the user's view page by page through the target context's page tree
//! (faulting pages in as needed) and copies through the physical direct
//! map. Strings use the classic two-pass measure-then-copy with a hard
//! cap.

use alloc::{string::String, sync::Arc, vec::Vec};

use super::context::MmContext;
use super::fault::{self, FaultReason};
use super::page::Protection;
use super::{FRAME_SIZE, USER_SPACE_LIMIT};
use crate::error::{Result, Status};

/// Longest string a syscall will copy in.
pub const USER_STRING_MAX: usize = 4096;

/// One physically contiguous piece of a mapped user view.
pub struct UserChunk {
    pub phys: u64,
    pub len: usize,
}

/// A validated, faulted-in view of user memory.
pub struct UserView {
    pub chunks: Vec<UserChunk>,
    pub len: usize,
}

fn check_user_range(uaddr: usize, len: usize) -> Result<()> {
    let end = uaddr.checked_add(len).ok_or(Status::InvalidArgument)?;
    if uaddr == 0 || end > USER_SPACE_LIMIT {
        return Err(Status::InvalidArgument);
    }
    Ok(())
}

/// Resolve the physical address backing one user byte, faulting the page
/// in if needed.
fn resolve_page(ctx: &Arc<MmContext>, addr: usize, write: bool) -> Result<u64> {
    for attempt in 0..2 {
        {
            let mut inner = ctx.lock();
            if let Some(desc) = inner.find_mut(addr) {
                if desc.is_present() && (!write || desc.prot.contains(Protection::RW)) {
                    let offset = (addr - desc.vaddr) as u64;
                    return Ok(desc.phys + offset);
                }
            }
        }
        if attempt == 0 {
            let mut reason = FaultReason::USER | FaultReason::READ;
            if write {
                reason |= FaultReason::WRITE;
            }
            fault::fault(ctx, addr, reason)?;
        }
    }
    Err(Status::PageFault)
}

/// Map `len` bytes of user memory at `uaddr` into a kernel-usable view.
pub fn map_view_of_user_memory(
    ctx: &Arc<MmContext>,
    uaddr: usize,
    len: usize,
    write: bool,
) -> Result<UserView> {
    check_user_range(uaddr, len)?;
    let mut chunks = Vec::new();
    let mut addr = uaddr;
    let end = uaddr + len;
    while addr < end {
        let phys = resolve_page(ctx, addr, write)?;
        let page_rem = FRAME_SIZE - (addr % FRAME_SIZE);
        let chunk = page_rem.min(end - addr);
        chunks.push(UserChunk { phys, len: chunk });
        addr += chunk;
    }
    Ok(UserView { chunks, len })
}

pub fn copy_from_user(ctx: &Arc<MmContext>, uaddr: usize, buf: &mut [u8]) -> Result<()> {
    let view = map_view_of_user_memory(ctx, uaddr, buf.len(), false)?;
    let mut off = 0;
    for chunk in &view.chunks {
        super::read_phys(chunk.phys, &mut buf[off..off + chunk.len]);
        off += chunk.len;
    }
    Ok(())
}

pub fn copy_to_user(ctx: &Arc<MmContext>, uaddr: usize, data: &[u8]) -> Result<()> {
    let view = map_view_of_user_memory(ctx, uaddr, data.len(), true)?;
    let mut off = 0;
    for chunk in &view.chunks {
        super::write_phys(chunk.phys, &data[off..off + chunk.len]);
        off += chunk.len;
    }
    Ok(())
}

/// Two-pass string copy: measure the NUL-terminated length (capped), then
/// copy and validate UTF-8.
pub fn copy_string_from_user(ctx: &Arc<MmContext>, uaddr: usize, cap: usize) -> Result<String> {
    let cap = cap.min(USER_STRING_MAX);
    let mut len = 0;
    'measure: while len < cap {
        let probe = uaddr.checked_add(len).ok_or(Status::InvalidArgument)?;
        check_user_range(probe, 1)?;
        let phys = resolve_page(ctx, probe, false)?;
        let page_rem = FRAME_SIZE - (probe % FRAME_SIZE);
        let span = page_rem.min(cap - len);
        let mut piece = alloc::vec![0u8; span];
        super::read_phys(phys, &mut piece);
        match piece.iter().position(|&b| b == 0) {
            Some(n) => {
                len += n;
                break 'measure;
            }
            None => len += span,
        }
    }

    let mut buf = alloc::vec![0u8; len];
    copy_from_user(ctx, uaddr, &mut buf)?;
    String::from_utf8(buf).map_err(|_| Status::InvalidArgument)
}
