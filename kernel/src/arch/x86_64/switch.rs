//! Context switch - bare-metal x86_64
//!
//! Kernel-to-kernel switches save only the callee-saved registers, the stack
//! pointer, a resume address and RFLAGS; everything else is already spilled
//! by the System V calling convention. A context built for user mode is
//! entered through `iretq` with the full register file.
//!
//! Offsets must match `CpuContext` (checked below at compile time):
//! rbx 8, rdi 40, rbp 48, rsp 56, r12..r15 96..120, rip 128, rflags 136,
//! cs 144, ss 152.

use core::mem::offset_of;

use super::context::CpuContext;

core::arch::global_asm!(
    ".global exo_context_switch",
    "exo_context_switch:",
    // rdi = prev, rsi = next
    "mov [rdi + 8], rbx",
    "mov [rdi + 48], rbp",
    "mov [rdi + 96], r12",
    "mov [rdi + 104], r13",
    "mov [rdi + 112], r14",
    "mov [rdi + 120], r15",
    "lea rax, [rip + 2f]",
    "mov [rdi + 128], rax",
    "mov [rdi + 56], rsp",
    "pushfq",
    "pop qword ptr [rdi + 136]",
    "mov rdi, rsi",
    ".global exo_context_restore",
    "exo_context_restore:",
    // rdi = next
    "test qword ptr [rdi + 144], 3",
    "jnz 3f",
    "mov rbx, [rdi + 8]",
    "mov rbp, [rdi + 48]",
    "mov r12, [rdi + 96]",
    "mov r13, [rdi + 104]",
    "mov r14, [rdi + 112]",
    "mov r15, [rdi + 120]",
    "mov rsp, [rdi + 56]",
    "push qword ptr [rdi + 136]",
    "popfq",
    "mov rax, [rdi + 128]",
    "mov rdi, [rdi + 40]",
    "jmp rax",
    "2:",
    "ret",
    // user mode: build an iretq frame from the saved context
    "3:",
    "push qword ptr [rdi + 152]",
    "push qword ptr [rdi + 56]",
    "push qword ptr [rdi + 136]",
    "push qword ptr [rdi + 144]",
    "push qword ptr [rdi + 128]",
    "mov rax, [rdi + 0]",
    "mov rbx, [rdi + 8]",
    "mov rcx, [rdi + 16]",
    "mov rdx, [rdi + 24]",
    "mov rsi, [rdi + 32]",
    "mov rbp, [rdi + 48]",
    "mov r8, [rdi + 64]",
    "mov r9, [rdi + 72]",
    "mov r10, [rdi + 80]",
    "mov r11, [rdi + 88]",
    "mov r12, [rdi + 96]",
    "mov r13, [rdi + 104]",
    "mov r14, [rdi + 112]",
    "mov r15, [rdi + 120]",
    "mov rdi, [rdi + 40]",
    "swapgs",
    "iretq",
);

extern "C" {
    fn exo_context_switch(prev: *mut CpuContext, next: *const CpuContext);
    fn exo_context_restore(next: *const CpuContext) -> !;
}

const _: () = {
    assert!(offset_of!(CpuContext, rbx) == 8 && offset_of!(CpuContext, rdi) == 40);
    assert!(offset_of!(CpuContext, rbp) == 48 && offset_of!(CpuContext, rsp) == 56);
    assert!(offset_of!(CpuContext, r12) == 96 && offset_of!(CpuContext, rip) == 128);
    assert!(offset_of!(CpuContext, rflags) == 136 && offset_of!(CpuContext, cs) == 144);
    assert!(offset_of!(CpuContext, ss) == 152);
};

/// Save callee-saved state into `prev` and resume `next`
///
/// # Safety
/// Both contexts must stay valid until `prev` is resumed; interrupts must be
/// disabled by the caller and no spinlock may be held.
#[inline(always)]
pub unsafe fn switch(prev: *mut CpuContext, next: *const CpuContext) {
    exo_context_switch(prev, next);
}

/// Resume `next` without saving anything
///
/// # Safety
/// `next` must be a valid context (fresh or previously saved).
#[inline(always)]
pub unsafe fn restore(next: *const CpuContext) -> ! {
    exo_context_restore(next)
}
