//! Run-time self discovery.
//!
//! The blob is copied to an address nobody knows at build time, so it finds
//! its pieces with PC-relative address loads. The end of the body is the
//! linker's `__stop_revive_blob`: the distance to it is fixed at link time,
//! so the load still lands on the end of a copy.

use core::arch::asm;

pub trait Locate {
    /// Address of the Argument Block.
    fn args_block(&self) -> *mut u8;

    /// Address just past the blob body. The blob is `[restorer, self_end)`.
    fn self_end(&self) -> usize;
}

/// Locates the blob from the instruction pointer.
pub struct Rip;

impl Locate for Rip {
    #[inline(always)]
    fn args_block(&self) -> *mut u8 {
        args_block_addr() as *mut u8
    }

    #[inline(always)]
    fn self_end(&self) -> usize {
        self_end_addr()
    }
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn args_block_addr() -> usize {
    let addr: usize;
    unsafe {
        asm!(
            "lea {0}, [rip + revive_restore_args]",
            out(reg) addr,
            options(nomem, nostack, preserves_flags),
        );
    }
    addr
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn args_block_addr() -> usize {
    let addr: usize;
    unsafe {
        asm!(
            "adr {0}, revive_restore_args",
            out(reg) addr,
            options(nomem, nostack, preserves_flags),
        );
    }
    addr
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
fn self_end_addr() -> usize {
    let addr: usize;
    unsafe {
        asm!(
            ".hidden __stop_revive_blob",
            "lea {0}, [rip + __stop_revive_blob]",
            out(reg) addr,
            options(nomem, nostack, preserves_flags),
        );
    }
    addr
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
fn self_end_addr() -> usize {
    let addr: usize;
    unsafe {
        asm!(
            ".hidden __stop_revive_blob",
            "adr {0}, __stop_revive_blob",
            out(reg) addr,
            options(nomem, nostack, preserves_flags),
        );
    }
    addr
}
