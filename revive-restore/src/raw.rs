//! Syscall instructions, one per argument count.
//!
//! Always inlined: the blob cannot call out of its own body, not even into
//! a syscall wrapper.

use core::arch::asm;

use syscalls::Sysno;

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn syscall6(
    nr: Sysno,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
    a6: usize,
) -> usize {
    let ret: usize;
    asm!(
        "syscall",
        inlateout("rax") nr as usize => ret,
        in("rdi") a1,
        in("rsi") a2,
        in("rdx") a3,
        in("r10") a4,
        in("r8") a5,
        in("r9") a6,
        out("rcx") _,
        out("r11") _,
        options(nostack)
    );
    ret
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn syscall3(nr: Sysno, a1: usize, a2: usize, a3: usize) -> usize {
    let ret: usize;
    asm!(
        "syscall",
        inlateout("rax") nr as usize => ret,
        in("rdi") a1,
        in("rsi") a2,
        in("rdx") a3,
        out("rcx") _,
        out("r11") _,
        options(nostack)
    );
    ret
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub unsafe fn syscall6(
    nr: Sysno,
    a1: usize,
    a2: usize,
    a3: usize,
    a4: usize,
    a5: usize,
    a6: usize,
) -> usize {
    let ret: usize;
    asm!(
        "svc 0",
        in("x8") nr as usize,
        inlateout("x0") a1 => ret,
        in("x1") a2,
        in("x2") a3,
        in("x3") a4,
        in("x4") a5,
        in("x5") a6,
        options(nostack)
    );
    ret
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub unsafe fn syscall3(nr: Sysno, a1: usize, a2: usize, a3: usize) -> usize {
    let ret: usize;
    asm!(
        "svc 0",
        in("x8") nr as usize,
        inlateout("x0") a1 => ret,
        in("x1") a2,
        in("x2") a3,
        options(nostack)
    );
    ret
}

#[inline(always)]
pub unsafe fn syscall4(nr: Sysno, a1: usize, a2: usize, a3: usize, a4: usize) -> usize {
    syscall6(nr, a1, a2, a3, a4, 0, 0)
}

#[inline(always)]
pub unsafe fn syscall2(nr: Sysno, a1: usize, a2: usize) -> usize {
    syscall3(nr, a1, a2, 0)
}

#[inline(always)]
pub unsafe fn syscall1(nr: Sysno, a1: usize) -> usize {
    syscall3(nr, a1, 0, 0)
}
