//! Diagnostics on stdout, built on the raw write primitive only.
//!
//! Output is best effort: write errors are dropped since nobody is left to
//! report them to.

use crate::sys::{Kernel, STDOUT};

/// Writes the current source line as a hex marker.
macro_rules! mark {
    ($kernel:expr) => {
        $crate::diag::write_hex($kernel, line!() as u64)
    };
}

#[inline(always)]
pub fn write_char<K: Kernel>(kernel: &mut K, c: u8) {
    let _ = kernel.write(STDOUT, &[c]);
}

#[inline(always)]
pub fn write_str<K: Kernel>(kernel: &mut K, s: &[u8]) {
    let _ = kernel.write(STDOUT, s);
}

/// Writes the NUL terminated string at `ptr`, scanning at most `max` bytes.
///
/// # Safety
/// `ptr` must be readable for `max` bytes.
#[inline(always)]
pub unsafe fn write_cstr<K: Kernel>(kernel: &mut K, ptr: *const u8, max: usize) {
    let mut len = 0;
    while len < max && *ptr.add(len) != 0 {
        len += 1;
    }
    write_str(kernel, core::slice::from_raw_parts(ptr, len));
}

/// [`write_cstr`] plus a newline.
///
/// # Safety
/// As for [`write_cstr`].
#[inline(always)]
pub unsafe fn write_cstr_line<K: Kernel>(kernel: &mut K, ptr: *const u8, max: usize) {
    write_cstr(kernel, ptr, max);
    write_char(kernel, b'\n');
}

#[inline(always)]
const fn nibble(n: u8) -> u8 {
    if n < 10 {
        b'0' + n
    } else {
        b'a' + n - 10
    }
}

/// Writes `num` as 16 hex digits, most significant first, plus a newline.
///
/// One write per digit: a buffer built on the stack tends to be filled
/// from a vector constant, which lives outside the blob.
#[inline(always)]
pub fn write_hex<K: Kernel>(kernel: &mut K, num: u64) {
    let mut shift = 64;
    while shift > 0 {
        shift -= 4;
        write_char(kernel, nibble(((num >> shift) & 0x0f) as u8));
    }
    write_char(kernel, b'\n');
}
