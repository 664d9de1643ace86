//! Memory manager tests (host arena)

#![cfg(test)]

use alloc::sync::Arc;

use super::context::{verify_invariants, MmContext};
use super::fault::{self, FaultReason};
use super::page::{PageState, Protection};
use super::vmm::{self, VmaFlags};
use super::FRAME_SIZE;
use crate::error::Status;

fn fresh_ctx() -> Arc<MmContext> {
    crate::test_support::init();
    MmContext::new(1).expect("address space")
}

fn kernel_ctx() -> Arc<MmContext> {
    crate::test_support::init();
    MmContext::new(0).expect("kernel-side address space")
}

mod pmm_tests {
    use super::*;
    use crate::mm::pmm;

    #[test]
    fn single_frame_alloc_and_free() {
        crate::test_support::init();
        let before = pmm::free_frames();
        let range = pmm::allocate_pages(1, 1, pmm::AllocFlags::empty()).unwrap();
        assert_eq!(range.count, 1);
        assert_eq!(pmm::free_frames(), before - 1);
        pmm::free_pages(range.start, 1).unwrap();
        assert_eq!(pmm::free_frames(), before);
    }

    #[test]
    fn aligned_run_is_aligned() {
        crate::test_support::init();
        let range = pmm::allocate_pages(4, 4, pmm::AllocFlags::empty()).unwrap();
        assert_eq!(range.start.as_u64() % 4, 0);
        pmm::free_pages(range.start, 4).unwrap();
    }

    #[test]
    fn below_4g_constraint_holds() {
        crate::test_support::init();
        let range = pmm::allocate_pages_32(1, 1).unwrap();
        assert!(range.base() + FRAME_SIZE as u64 <= u32::MAX as u64 + 1);
        pmm::free_pages(range.start, 1).unwrap();
    }

    #[test]
    fn double_free_is_rejected() {
        crate::test_support::init();
        let range = pmm::allocate_pages(1, 1, pmm::AllocFlags::empty()).unwrap();
        pmm::free_pages(range.start, 1).unwrap();
        assert!(pmm::free_pages(range.start, 1).is_err());
    }
}

mod vmm_tests {
    use super::*;

    #[test]
    fn alloc_write_read_free_realloc_reuses_address() {
        let ctx = fresh_ctx();
        let base = vmm::alloc(
            &ctx,
            None,
            0x4000,
            Protection::RW | Protection::EXEC,
            VmaFlags::empty(),
            None,
        )
        .unwrap();

        // Write through the translation the tree records.
        let phys = {
            let inner = ctx.lock();
            inner.find(base).unwrap().phys
        };
        super::super::write_phys(phys, &[1, 2, 3, 4]);
        let mut readback = [0u8; 4];
        super::super::read_phys(phys, &mut readback);
        assert_eq!(readback, [1, 2, 3, 4]);

        vmm::free(&ctx, base, 0x4000).unwrap();
        assert_eq!(ctx.stats().committed, 0);

        let again = vmm::alloc(
            &ctx,
            None,
            0x4000,
            Protection::RW,
            VmaFlags::empty(),
            None,
        )
        .unwrap();
        assert_eq!(again, base);
        vmm::free(&ctx, again, 0x4000).unwrap();
    }

    #[test]
    fn alloc_free_restores_tree_and_stats() {
        let ctx = fresh_ctx();
        let before = ctx.stats();
        let base = vmm::alloc(&ctx, None, 3 * FRAME_SIZE, Protection::RW, VmaFlags::empty(), None)
            .unwrap();
        verify_invariants(&ctx).unwrap();
        assert_eq!(ctx.stats().committed, 3 * FRAME_SIZE);
        vmm::free(&ctx, base, 3 * FRAME_SIZE).unwrap();
        assert_eq!(ctx.stats(), before);
        verify_invariants(&ctx).unwrap();
    }

    #[test]
    fn descriptors_never_overlap() {
        let ctx = fresh_ctx();
        let a = vmm::alloc(&ctx, None, 2 * FRAME_SIZE, Protection::RW, VmaFlags::empty(), None)
            .unwrap();
        let b = vmm::alloc(&ctx, None, 4 * FRAME_SIZE, Protection::RW, VmaFlags::empty(), None)
            .unwrap();
        vmm::protect(&ctx, a, FRAME_SIZE, Protection::empty(), Some(false)).unwrap();
        verify_invariants(&ctx).unwrap();
        vmm::free(&ctx, a, 2 * FRAME_SIZE).unwrap();
        vmm::free(&ctx, b, 4 * FRAME_SIZE).unwrap();
        verify_invariants(&ctx).unwrap();
    }

    #[test]
    fn explicit_hint_collision_is_in_use() {
        let ctx = fresh_ctx();
        let base = vmm::alloc(&ctx, None, FRAME_SIZE, Protection::RW, VmaFlags::empty(), None)
            .unwrap();
        assert_eq!(
            vmm::alloc(&ctx, Some(base), FRAME_SIZE, Protection::RW, VmaFlags::empty(), None),
            Err(Status::InUse)
        );
        // With HINT the allocator relocates instead.
        let moved = vmm::alloc(
            &ctx,
            Some(base),
            FRAME_SIZE,
            Protection::RW,
            VmaFlags::HINT,
            None,
        )
        .unwrap();
        assert_ne!(moved, base);
        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
        vmm::free(&ctx, moved, FRAME_SIZE).unwrap();
    }

    #[test]
    fn guard_page_faults_and_frees_with_region() {
        let ctx = fresh_ctx();
        let base = vmm::alloc(
            &ctx,
            None,
            2 * FRAME_SIZE,
            Protection::RW,
            VmaFlags::GUARD_PAGE,
            None,
        )
        .unwrap();
        let guard_addr = base - FRAME_SIZE;
        assert_eq!(
            fault::fault(&ctx, guard_addr, FaultReason::WRITE),
            Err(Status::AccessDenied)
        );
        assert_eq!(
            fault::fault(&ctx, guard_addr, FaultReason::READ),
            Err(Status::AccessDenied)
        );

        // Freeing the usable base sweeps the guard too.
        vmm::free(&ctx, base, 2 * FRAME_SIZE).unwrap();
        assert_eq!(ctx.stats().committed, 0);
        assert!(ctx.lock().find(guard_addr).is_none());
    }

    #[test]
    fn thirty_two_bit_window() {
        let ctx = kernel_ctx();
        let base = vmm::alloc(
            &ctx,
            None,
            FRAME_SIZE,
            Protection::RW,
            VmaFlags::THIRTY_TWO_BIT,
            None,
        )
        .unwrap();
        assert!(base >= super::super::DMA32_BASE && base < super::super::DMA32_LIMIT);
        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
    }

    #[test]
    fn reserve_commits_no_frames() {
        let ctx = fresh_ctx();
        let frames_before = crate::mm::pmm::free_frames();
        let base =
            vmm::query_and_reserve_free_range(&ctx, 4 * FRAME_SIZE, VmaFlags::empty()).unwrap();
        assert_eq!(crate::mm::pmm::free_frames(), frames_before);
        {
            let inner = ctx.lock();
            let desc = inner.find(base).unwrap();
            assert!(desc.state.contains(PageState::RESERVED));
            assert!(!desc.is_present());
        }
        vmm::free(&ctx, base, 4 * FRAME_SIZE).unwrap();
    }

    #[test]
    fn protect_to_read_only_then_write_fault_denied() {
        let ctx = fresh_ctx();
        let base = vmm::alloc(&ctx, None, FRAME_SIZE, Protection::RW, VmaFlags::empty(), None)
            .unwrap();
        vmm::protect(&ctx, base, FRAME_SIZE, Protection::empty(), None).unwrap();
        assert_eq!(
            fault::fault(&ctx, base, FaultReason::WRITE | FaultReason::PRESENT),
            Err(Status::AccessDenied)
        );
        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
    }

    #[test]
    fn unmapped_fault_is_page_fault() {
        let ctx = fresh_ctx();
        assert_eq!(
            fault::fault(&ctx, 0x5000_0000, FaultReason::READ),
            Err(Status::PageFault)
        );
    }
}

mod swap_tests {
    use super::*;
    use crate::mm::swap;

    #[test]
    fn page_out_and_fault_back_in() {
        let ctx = fresh_ctx();
        let base = vmm::alloc(&ctx, None, FRAME_SIZE, Protection::RW, VmaFlags::empty(), None)
            .unwrap();
        let phys = ctx.lock().find(base).unwrap().phys;
        super::super::write_phys(phys, &[0xAB; 16]);

        swap::page_out(&ctx, base).unwrap();
        {
            let inner = ctx.lock();
            let desc = inner.find(base).unwrap();
            assert!(desc.state.contains(PageState::PAGED_OUT));
            assert!(desc.state.contains(PageState::SWAP_PHYS));
            assert!(!desc.is_present());
        }
        assert_eq!(ctx.stats().paged, FRAME_SIZE);

        fault::fault(&ctx, base, FaultReason::READ).unwrap();
        let desc_phys = {
            let inner = ctx.lock();
            let desc = inner.find(base).unwrap();
            assert!(!desc.state.contains(PageState::PAGED_OUT));
            assert!(desc.is_present());
            desc.phys
        };
        let mut readback = [0u8; 16];
        super::super::read_phys(desc_phys, &mut readback);
        assert_eq!(readback, [0xAB; 16]);
        assert_eq!(ctx.stats().paged, 0);
        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
    }

    #[test]
    fn non_paged_memory_refuses_eviction() {
        let ctx = kernel_ctx();
        let base = vmm::alloc(
            &ctx,
            None,
            FRAME_SIZE,
            Protection::RW,
            VmaFlags::NON_PAGED,
            None,
        )
        .unwrap();
        assert_eq!(swap::page_out(&ctx, base), Err(Status::InvalidOperation));
        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
    }
}

mod usercopy_tests {
    use super::*;
    use crate::mm::usercopy;

    #[test]
    fn round_trip_through_user_view() {
        let ctx = fresh_ctx();
        let base = vmm::alloc(
            &ctx,
            None,
            2 * FRAME_SIZE,
            Protection::RW | Protection::USER,
            VmaFlags::empty(),
            None,
        )
        .unwrap();
        let message = b"cross-space copy";
        usercopy::copy_to_user(&ctx, base + 100, message).unwrap();
        let mut readback = [0u8; 16];
        usercopy::copy_from_user(&ctx, base + 100, &mut readback).unwrap();
        assert_eq!(&readback, message);
        vmm::free(&ctx, base, 2 * FRAME_SIZE).unwrap();
    }

    #[test]
    fn string_copy_stops_at_nul_and_cap() {
        let ctx = fresh_ctx();
        let base = vmm::alloc(
            &ctx,
            None,
            FRAME_SIZE,
            Protection::RW | Protection::USER,
            VmaFlags::empty(),
            None,
        )
        .unwrap();
        usercopy::copy_to_user(&ctx, base, b"hello\0junk").unwrap();
        let s = usercopy::copy_string_from_user(&ctx, base, 256).unwrap();
        assert_eq!(s, "hello");
        vmm::free(&ctx, base, FRAME_SIZE).unwrap();
    }

    #[test]
    fn null_pointer_is_rejected() {
        let ctx = fresh_ctx();
        let mut buf = [0u8; 4];
        assert!(usercopy::copy_from_user(&ctx, 0, &mut buf).is_err());
    }
}
