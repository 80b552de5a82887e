//! Position independent restore blob.
//!
//! The invoker copies the code of [`restorer`] somewhere that survives the
//! teardown, fills in the Argument Block and calls it with `RESTORE_CORE`.
//! From then on the blob owns the process: it rebuilds the memory layout of
//! the checkpoint and jumps into the restored program, or parks.
//!
//! Nothing in here may touch global data, allocate or call out of the
//! blob, so every helper is `#[inline(always)]` and the kernel is reached
//! through raw syscalls only. [`restorer`] is alone in the `revive_blob`
//! section, and the linker's end of that section is the end of the body.
#![cfg_attr(not(test), no_std)]

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
compile_error!("the restore blob supports x86_64 and aarch64 only");

#[macro_use]
mod diag;
#[macro_use]
mod args;

pub mod engine;
pub mod failure;
pub mod locate;
mod raw;
pub mod sys;
pub mod trampoline;

#[cfg(test)]
mod fake;

use core::ops::Range;

use revive_common::abi::ARGS_SIZE;

use crate::{
    locate::{Locate, Rip},
    sys::{Kernel, Linux},
};

pub use revive_common::abi::{GET_ARG_OFFSET, GET_SELF_LEN, PR_ARG_STRING, RESTORE_CORE};

/// Entry point of the blob.
///
/// # Safety
/// With `RESTORE_CORE` the Argument Block must be filled in and the calling
/// process must be ready to lose its whole address space.
#[no_mangle]
#[inline(never)]
#[link_section = "revive_blob"]
#[allow(named_asm_labels)]
pub unsafe extern "C" fn restorer(cmd: i64) -> i64 {
    reserve_args_block!();
    dispatch(&mut Linux, &Rip, cmd)
}

/// Runs one opcode against `kernel`, with the blob's pieces found by
/// `locate`. Unknown opcodes return -1 and do nothing else.
///
/// # Safety
/// See [`restorer`].
#[inline(always)]
pub unsafe fn dispatch<K: Kernel, L: Locate>(kernel: &mut K, locate: &L, cmd: i64) -> i64 {
    // compare chain, not a match: a dense match lowers to a jump table
    // in .rodata, which a copy of the body cannot reach
    if cmd == PR_ARG_STRING {
        diag::write_cstr(kernel, locate.args_block(), ARGS_SIZE);
        0
    } else if cmd == GET_ARG_OFFSET {
        locate.args_block() as i64
    } else if cmd == GET_SELF_LEN {
        locate.self_end() as i64
    } else if cmd == RESTORE_CORE {
        let args = args::restore_core_args(locate);
        match engine::restore_core(kernel, args) {
            Ok(()) => trampoline::enter_restored_context(kernel, args),
            Err(err) => failure::park(kernel, args, err),
        }
    } else {
        -1
    }
}

extern "C" {
    static __start_revive_blob: u8;
    static __stop_revive_blob: u8;
}

/// Where the linker placed the `revive_blob` section in this process.
/// A copy of the blob is exactly these bytes.
pub fn linked_section() -> Range<usize> {
    unsafe {
        let start = core::ptr::addr_of!(__start_revive_blob) as usize;
        let stop = core::ptr::addr_of!(__stop_revive_blob) as usize;
        start..stop
    }
}
