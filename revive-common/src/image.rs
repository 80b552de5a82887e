//! On-disk layout of checkpoint images and self-snapshots.
//!
//! A checkpoint image is laid out as:
//!
//! ```text
//! | CORE_MAGIC: u32 | CoreEntry | VmaEntry ... | sentinel VmaEntry (start == 0) |
//! | addr: u64 | page: [u8; PAGE_SIZE] | ... | 0u64 |
//! ```
//!
//! A self-snapshot is a bare run of [`VmaEntry`] records with no header and
//! no terminator. Integers are native endian: images are consumed on the
//! machine that produced them.

use core::mem::size_of;

pub const CORE_MAGIC: u32 = 0x5446_4352;

/// File position of the [`CoreEntry`], right after the magic.
pub const MAGIC_OFFSET: u64 = size_of::<u32>() as u64;

/// File position of the first target [`VmaEntry`].
pub const VMAS_OFFSET: u64 = MAGIC_OFFSET + size_of::<CoreEntry>() as u64;

pub const PAGE_SIZE: usize = 4096;

pub const PROT_NONE: u32 = 0x0;
pub const PROT_READ: u32 = 0x1;
pub const PROT_WRITE: u32 = 0x2;
pub const PROT_EXEC: u32 = 0x4;

pub const MAP_SHARED: u32 = 0x01;
pub const MAP_PRIVATE: u32 = 0x02;
pub const MAP_FIXED: u32 = 0x10;
pub const MAP_ANONYMOUS: u32 = 0x20;

// VmaEntry::status bits
pub const VMA_AREA_REGULAR: u32 = 1 << 0;
pub const VMA_AREA_STACK: u32 = 1 << 1;
pub const VMA_AREA_VSYSCALL: u32 = 1 << 2;
pub const VMA_AREA_VDSO: u32 = 1 << 3;
pub const VMA_FORCE_READ: u32 = 1 << 4;
pub const VMA_AREA_HEAP: u32 = 1 << 5;
pub const VMA_FILE_PRIVATE: u32 = 1 << 6;
pub const VMA_FILE_SHARED: u32 = 1 << 7;
pub const VMA_ANON_SHARED: u32 = 1 << 8;
pub const VMA_ANON_PRIVATE: u32 = 1 << 9;

/// A record stored verbatim in an image file.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]`, contain no padding bytes and be valid
/// for every bit pattern.
pub unsafe trait Record: Copy + Sized {
    const SIZE: usize = size_of::<Self>();

    fn as_bytes(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self as *const Self as *const u8, Self::SIZE) }
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        Some(unsafe { (bytes.as_ptr() as *const Self).read_unaligned() })
    }
}

/// General purpose registers in `user_regs_struct` order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct UserRegs {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub bp: u64,
    pub bx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub ax: u64,
    pub cx: u64,
    pub dx: u64,
    pub si: u64,
    pub di: u64,
    pub orig_ax: u64,
    pub ip: u64,
    pub cs: u64,
    pub flags: u64,
    pub sp: u64,
    pub ss: u64,
    pub fs_base: u64,
    pub gs_base: u64,
    pub ds: u64,
    pub es: u64,
    pub fs: u64,
    pub gs: u64,
}

/// Saved task state at the head of a checkpoint image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct CoreEntry {
    pub version: u32,
    pub arch: u32,
    pub task_state: u32,
    pub exit_code: u32,
    pub personality: u32,
    pub flags: u32,
    /// Task name, NUL padded.
    pub comm: [u8; 16],
    pub blk_sigset: u64,
    pub gpregs: UserRegs,
    pub task_size: u64,
}

impl CoreEntry {
    pub fn comm(&self) -> &[u8] {
        let len = self.comm.iter().position(|b| *b == 0).unwrap_or(self.comm.len());
        &self.comm[..len]
    }
}

/// One memory region, either to tear down or to recreate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct VmaEntry {
    pub start: u64,
    pub end: u64,
    pub pgoff: u64,
    pub fd: i64,
    pub prot: u32,
    pub flags: u32,
    pub status: u32,
    pub pad: u32,
}

impl VmaEntry {
    /// Terminates the target sequence of a checkpoint image.
    pub const SENTINEL: VmaEntry = VmaEntry {
        start: 0,
        end: 0,
        pgoff: 0,
        fd: -1,
        prot: 0,
        flags: 0,
        status: 0,
        pad: 0,
    };

    pub const fn new(start: u64, end: u64, prot: u32, flags: u32, status: u32) -> Self {
        Self {
            start,
            end,
            pgoff: 0,
            fd: -1,
            prot,
            flags,
            status,
            pad: 0,
        }
    }

    #[inline(always)]
    pub const fn len(&self) -> u64 {
        self.end.wrapping_sub(self.start)
    }

    #[inline(always)]
    pub const fn is_sentinel(&self) -> bool {
        self.start == 0
    }

    #[inline(always)]
    pub const fn is_regular(&self) -> bool {
        self.status & VMA_AREA_REGULAR != 0
    }

    #[inline(always)]
    pub const fn is_writable(&self) -> bool {
        self.prot & PROT_WRITE != 0
    }
}

unsafe impl Record for UserRegs {}
unsafe impl Record for CoreEntry {}
unsafe impl Record for VmaEntry {}
unsafe impl Record for u64 {}

const _: () = assert!(size_of::<UserRegs>() == 27 * 8);
const _: () = assert!(size_of::<CoreEntry>() == 272);
const _: () = assert!(size_of::<VmaEntry>() == 48);
