//! Where a failed restore ends up.
//!
//! By the time anything can fail the old address space is usually gone, so
//! there is nothing to return to. The process either sleeps forever, leaving
//! it for a debugger to attach, or exits with the code the invoker chose.

use revive_common::abi::{FailureMode, RestoreCoreArgs};

use crate::{diag, engine::RestoreError, sys::Kernel};

pub const FREEZE_SECS: u64 = 5;

/// Reports `err` and stops the process the way `args` asks for.
#[inline(always)]
pub fn park<K: Kernel>(kernel: &mut K, args: &RestoreCoreArgs, err: RestoreError) -> ! {
    mark!(kernel);
    diag::write_hex(kernel, err.code());
    diag::write_hex(kernel, err.detail());

    match args.failure_mode() {
        FailureMode::Exit(code) => kernel.exit(code),
        FailureMode::Freeze => freeze(kernel),
    }
}

#[inline(always)]
pub fn freeze<K: Kernel>(kernel: &mut K) -> ! {
    loop {
        kernel.sleep(FREEZE_SECS);
    }
}
