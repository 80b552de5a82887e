use revive_common::abi::RestoreCoreArgs;

use crate::{diag, engine::RestoreError, failure::park, sys::Kernel};

/// Hands the CPU to the restored program through rt_sigreturn.
///
/// # Safety
/// The address space must already match the image and `args.sigframe` (or
/// the current stack when it is 0) must hold a frame the kernel accepts.
#[inline(always)]
pub unsafe fn enter_restored_context<K: Kernel>(kernel: &mut K, args: &RestoreCoreArgs) -> ! {
    let frame = args.sigframe;
    mark!(kernel);
    diag::write_hex(kernel, frame);

    let ret = kernel.rt_sigreturn(frame);
    park(kernel, args, RestoreError::SigreturnFailure(ret))
}
