//! Thread context switching
//!
//! A context is the callee-saved register set plus stack pointer, entry
//! state and page-table root. `switch_to` saves into the outgoing context
//! and restores the incoming one atomically with respect to the local
//! CPU.

/// Saved execution state of a thread.
#[derive(Debug, Clone)]
#[repr(C)]
pub struct ThreadContext {
    pub rsp: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    /// Page-table root to install on switch-in.
    pub cr3: u64,
    pub user: bool,
}

impl ThreadContext {
    pub const fn empty() -> Self {
        Self {
            rsp: 0,
            rbp: 0,
            rbx: 0,
            r12: 0,
            r13: 0,
            r14: 0,
            r15: 0,
            rip: 0,
            rflags: 0x202, // IF set
            cr3: 0,
            user: false,
        }
    }
}

/// Prepare a context so that switching to it enters `entry(arg)` on the
/// given stack. `stack_base` is the lowest address; the stack grows down
/// from `stack_base + stack_size`, 16-byte aligned with a poisoned return
/// slot so a returning entry function faults loudly instead of wandering.
pub fn setup_thread_context(
    ctx: &mut ThreadContext,
    entry: usize,
    arg: usize,
    user: bool,
    stack_base: usize,
    stack_size: usize,
    page_table_root: u64,
) {
    let top = (stack_base + stack_size) & !0xF;
    ctx.rsp = top as u64;
    ctx.rip = entry as u64;
    // Entry argument convention: first switch-in pops into rdi via the
    // trampoline; staged in rbx until then.
    ctx.rbx = arg as u64;
    ctx.rbp = 0;
    ctx.cr3 = page_table_root;
    ctx.user = user;
    ctx.rflags = 0x202;
}

/// Switch from `prev` to `next`.
///
/// # Safety
///
/// Both pointers must reference valid contexts; `prev` must belong to the
/// thread currently executing on this CPU. Returns when `prev` is next
/// scheduled.
#[cfg(target_os = "none")]
pub unsafe fn switch_to(prev: *mut ThreadContext, next: *const ThreadContext) {
    // SAFETY: caller contract; the asm saves callee-saved state into
    // `prev` and restores `next`, loading its CR3 when it differs.
    unsafe {
        let next_cr3 = (*next).cr3;
        let cur_cr3 = x86_64::registers::control::Cr3::read()
            .0
            .start_address()
            .as_u64();
        if next_cr3 != 0 && next_cr3 != cur_cr3 {
            use x86_64::registers::control::Cr3;
            use x86_64::structures::paging::PhysFrame;
            use x86_64::PhysAddr;
            let (_, flags) = Cr3::read();
            Cr3::write(
                PhysFrame::from_start_address(PhysAddr::new(next_cr3)).unwrap_or_else(|_| {
                    panic!("misaligned page-table root {:#x}", next_cr3)
                }),
                flags,
            );
        }
        core::arch::asm!(
            "lea rax, [rip + 2f]",
            "mov [rdi + 0x38], rax", // prev.rip
            "mov [rdi + 0x00], rsp",
            "mov [rdi + 0x08], rbp",
            "mov [rdi + 0x10], rbx",
            "mov [rdi + 0x18], r12",
            "mov [rdi + 0x20], r13",
            "mov [rdi + 0x28], r14",
            "mov [rdi + 0x30], r15",
            "mov rsp, [rsi + 0x00]",
            "mov rbp, [rsi + 0x08]",
            "mov rbx, [rsi + 0x10]",
            "mov r12, [rsi + 0x18]",
            "mov r13, [rsi + 0x20]",
            "mov r14, [rsi + 0x28]",
            "mov r15, [rsi + 0x30]",
            "mov rdi, rbx", // entry argument for first switch-in
            "jmp [rsi + 0x38]",
            "2:",
            in("rdi") prev,
            in("rsi") next,
            clobber_abi("sysv64"),
        );
    }
}

/// Host builds only move scheduler bookkeeping, never register state.
///
/// # Safety
///
/// No-op.
#[cfg(not(target_os = "none"))]
pub unsafe fn switch_to(_prev: *mut ThreadContext, _next: *const ThreadContext) {}
