//! Direct system calls, nothing buffered and nothing allocated.
//!
//! The engine only talks to the kernel through [`Kernel`] so the exact same
//! code can be driven by an in-memory kernel in tests. [`Linux`] is the real
//! thing and every method inlines down to a single `syscall` instruction,
//! with no call leaving the blob body.

use core::{arch::asm, mem::MaybeUninit, ptr::addr_of_mut};

use syscalls::Sysno;

use crate::raw;

pub type Fd = i32;

pub const STDOUT: Fd = 1;

pub const O_RDONLY: i32 = 0;
pub const SEEK_SET: i32 = 0;
pub const AT_FDCWD: i32 = -100;

/// Error number decoded from a raw syscall return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl Errno {
    pub const ENOENT: Errno = Errno(2);
    pub const EBADF: Errno = Errno(9);
    pub const ENOMEM: Errno = Errno(12);
    pub const EFAULT: Errno = Errno(14);
    pub const EINVAL: Errno = Errno(22);
    pub const ENAMETOOLONG: Errno = Errno(36);

    /// Values in `[-4095, -1]` are errors, everything else is a result.
    #[inline(always)]
    pub fn from_ret(ret: usize) -> Result<usize, Errno> {
        let signed = ret as isize;
        if (-4095..0).contains(&signed) {
            Err(Errno(-signed as i32))
        } else {
            Ok(ret)
        }
    }
}

pub trait Kernel {
    /// # Safety
    /// `path` must point at a NUL terminated string.
    unsafe fn open(&mut self, path: *const u8, flags: i32) -> Result<Fd, Errno>;

    /// # Safety
    /// `buf` must be valid for `count` bytes of writes.
    unsafe fn read(&mut self, fd: Fd, buf: *mut u8, count: usize) -> Result<usize, Errno>;

    /// Reads straight into the address space being restored.
    ///
    /// # Safety
    /// `addr` must be mapped writable for `count` bytes and must not alias
    /// anything the caller still uses.
    unsafe fn read_at(&mut self, fd: Fd, addr: u64, count: usize) -> Result<usize, Errno>;

    fn lseek(&mut self, fd: Fd, offset: u64, whence: i32) -> Result<u64, Errno>;

    fn close(&mut self, fd: Fd) -> Result<(), Errno>;

    fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, Errno>;

    /// # Safety
    /// With `MAP_FIXED` this replaces whatever was mapped at `addr`.
    unsafe fn mmap(
        &mut self,
        addr: u64,
        len: u64,
        prot: u32,
        flags: u32,
        fd: i64,
        offset: u64,
    ) -> Result<u64, Errno>;

    /// # Safety
    /// Nothing in `[addr, addr + len)` may be referenced afterwards.
    unsafe fn munmap(&mut self, addr: u64, len: u64) -> Result<(), Errno>;

    /// # Safety
    /// Dropping write access faults any later store to the range.
    unsafe fn mprotect(&mut self, addr: u64, len: u64, prot: u32) -> Result<(), Errno>;

    fn sleep(&mut self, secs: u64);

    fn exit(&mut self, code: i32) -> !;

    /// Installs the register set stored in the signal frame at `frame`, or on
    /// the current stack when `frame` is 0. Only comes back if the kernel
    /// refused the frame, with the raw syscall result.
    ///
    /// # Safety
    /// On success execution continues wherever the frame says.
    unsafe fn rt_sigreturn(&mut self, frame: u64) -> usize;
}

#[repr(C)]
#[allow(dead_code)]
struct Timespec {
    tv_sec: i64,
    tv_nsec: i64,
}

pub struct Linux;

impl Kernel for Linux {
    #[inline(always)]
    unsafe fn open(&mut self, path: *const u8, flags: i32) -> Result<Fd, Errno> {
        let ret = raw::syscall4(
            Sysno::openat,
            AT_FDCWD as isize as usize,
            path as usize,
            flags as usize,
            0,
        );
        Errno::from_ret(ret).map(|fd| fd as Fd)
    }

    #[inline(always)]
    unsafe fn read(&mut self, fd: Fd, buf: *mut u8, count: usize) -> Result<usize, Errno> {
        let ret = raw::syscall3(Sysno::read, fd as usize, buf as usize, count);
        Errno::from_ret(ret)
    }

    #[inline(always)]
    unsafe fn read_at(&mut self, fd: Fd, addr: u64, count: usize) -> Result<usize, Errno> {
        self.read(fd, addr as *mut u8, count)
    }

    #[inline(always)]
    fn lseek(&mut self, fd: Fd, offset: u64, whence: i32) -> Result<u64, Errno> {
        let ret = unsafe {
            raw::syscall3(Sysno::lseek, fd as usize, offset as usize, whence as usize)
        };
        Errno::from_ret(ret).map(|pos| pos as u64)
    }

    #[inline(always)]
    fn close(&mut self, fd: Fd) -> Result<(), Errno> {
        let ret = unsafe { raw::syscall1(Sysno::close, fd as usize) };
        Errno::from_ret(ret).map(|_| ())
    }

    #[inline(always)]
    fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, Errno> {
        let ret = unsafe {
            raw::syscall3(Sysno::write, fd as usize, buf.as_ptr() as usize, buf.len())
        };
        Errno::from_ret(ret)
    }

    #[inline(always)]
    unsafe fn mmap(
        &mut self,
        addr: u64,
        len: u64,
        prot: u32,
        flags: u32,
        fd: i64,
        offset: u64,
    ) -> Result<u64, Errno> {
        let ret = raw::syscall6(
            Sysno::mmap,
            addr as usize,
            len as usize,
            prot as usize,
            flags as usize,
            fd as isize as usize,
            offset as usize,
        );
        Errno::from_ret(ret).map(|addr| addr as u64)
    }

    #[inline(always)]
    unsafe fn munmap(&mut self, addr: u64, len: u64) -> Result<(), Errno> {
        let ret = raw::syscall2(Sysno::munmap, addr as usize, len as usize);
        Errno::from_ret(ret).map(|_| ())
    }

    #[inline(always)]
    unsafe fn mprotect(&mut self, addr: u64, len: u64, prot: u32) -> Result<(), Errno> {
        let ret = raw::syscall3(Sysno::mprotect, addr as usize, len as usize, prot as usize);
        Errno::from_ret(ret).map(|_| ())
    }

    #[inline(always)]
    fn sleep(&mut self, secs: u64) {
        let mut req = MaybeUninit::<Timespec>::uninit();
        let mut rem = MaybeUninit::<Timespec>::uninit();
        // volatile, or the two stores fold into a constant pool load
        unsafe {
            let ptr = req.as_mut_ptr();
            addr_of_mut!((*ptr).tv_sec).write_volatile(secs as i64);
            addr_of_mut!((*ptr).tv_nsec).write_volatile(0);
            raw::syscall2(
                Sysno::nanosleep,
                req.as_ptr() as usize,
                rem.as_mut_ptr() as usize,
            );
        }
    }

    #[inline(always)]
    fn exit(&mut self, code: i32) -> ! {
        unsafe {
            raw::syscall1(Sysno::exit_group, code as usize);
        }
        loop {
            core::hint::spin_loop();
        }
    }

    #[cfg(target_arch = "x86_64")]
    #[inline(always)]
    unsafe fn rt_sigreturn(&mut self, frame: u64) -> usize {
        let ret: usize;
        if frame == 0 {
            asm!(
                "syscall",
                inlateout("rax") Sysno::rt_sigreturn as usize => ret,
                out("rcx") _,
                out("r11") _,
            );
        } else {
            // rt_sigreturn reads the frame at rsp
            asm!(
                "mov {saved}, rsp",
                "mov rsp, {frame}",
                "syscall",
                "mov rsp, {saved}",
                frame = in(reg) frame,
                saved = out(reg) _,
                inlateout("rax") Sysno::rt_sigreturn as usize => ret,
                out("rcx") _,
                out("r11") _,
            );
        }
        ret
    }

    #[cfg(target_arch = "aarch64")]
    #[inline(always)]
    unsafe fn rt_sigreturn(&mut self, frame: u64) -> usize {
        let ret: usize;
        if frame == 0 {
            asm!(
                "svc 0",
                in("x8") Sysno::rt_sigreturn as usize,
                lateout("x0") ret,
            );
        } else {
            asm!(
                "mov {saved}, sp",
                "mov sp, {frame}",
                "svc 0",
                "mov sp, {saved}",
                frame = in(reg) frame,
                saved = out(reg) _,
                in("x8") Sysno::rt_sigreturn as usize,
                lateout("x0") ret,
            );
        }
        ret
    }
}
