//! The Argument Block: `ARGS_SIZE` bytes reserved inside the blob's own
//! code, filled in by the invoker before it jumps in.

use revive_common::abi::{RestoreCoreArgs, PATH_LEN};

use crate::locate::Locate;

/// Emits the reserved region in place, jumping over it. Must appear exactly
/// once, in the entry point.
#[cfg(target_arch = "x86_64")]
macro_rules! reserve_args_block {
    () => {
        core::arch::asm!(
            "jmp 2f",
            ".balign 8",
            ".globl revive_restore_args",
            ".hidden revive_restore_args",
            "revive_restore_args:",
            ".skip {size}, 0",
            "2:",
            size = const ::revive_common::abi::ARGS_SIZE,
            options(nomem, nostack, preserves_flags),
        )
    };
}

#[cfg(target_arch = "aarch64")]
macro_rules! reserve_args_block {
    () => {
        core::arch::asm!(
            "b 2f",
            ".balign 8",
            ".globl revive_restore_args",
            ".hidden revive_restore_args",
            "revive_restore_args:",
            ".skip {size}, 0",
            "2:",
            size = const ::revive_common::abi::ARGS_SIZE,
            options(nomem, nostack, preserves_flags),
        )
    };
}

/// View of the block as `RESTORE_CORE` arguments.
///
/// # Safety
/// The block must hold a `RestoreCoreArgs` written by the invoker and stay
/// untouched for the returned lifetime.
#[inline(always)]
pub unsafe fn restore_core_args<'a, L: Locate>(locate: &L) -> &'a RestoreCoreArgs {
    &*(locate.args_block() as *const RestoreCoreArgs)
}

#[inline(always)]
fn has_nul(path: &[u8; PATH_LEN]) -> bool {
    let mut i = 0;
    while i < PATH_LEN {
        if path[i] == 0 {
            return true;
        }
        i += 1;
    }
    false
}

/// Both paths must be NUL terminated inside their fields.
#[inline(always)]
pub fn paths_terminated(args: &RestoreCoreArgs) -> bool {
    has_nul(&args.core_path) && has_nul(&args.self_vmas_path)
}
