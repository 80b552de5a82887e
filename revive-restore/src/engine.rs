//! Replaces the current address space with the one in a checkpoint image.
//!
//! Runs in strictly sequential phases over two files:
//!
//! 1. read the `CoreEntry` at `MAGIC_OFFSET`
//! 2. unmap every regular vma listed in the self-snapshot
//! 3. map every regular target vma, writable, at its exact address
//! 4. load page contents straight into place
//! 5. drop write access from the vmas that never had it
//!
//! Once phase 2 has started there is no way back, so every error is final.
//! This function only reports it; the dispatcher decides how to die.

use core::{mem::MaybeUninit, ptr::addr_of};

use revive_common::{
    abi::{RestoreCoreArgs, PATH_LEN},
    image::{
        CoreEntry, Record, VmaEntry, MAGIC_OFFSET, MAP_ANONYMOUS, MAP_FIXED, PAGE_SIZE,
        PROT_WRITE, VMAS_OFFSET,
    },
};

use crate::{
    args::paths_terminated,
    diag,
    sys::{Errno, Fd, Kernel, O_RDONLY, SEEK_SET},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum Phase {
    Header = 1,
    Teardown = 2,
    Recreate = 3,
    Pages = 4,
    Protect = 5,
}

/// The discriminant is the code written to the diagnostic stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u64)]
pub enum RestoreError {
    OpenFailure(Errno) = 1,
    ReadFailure(Phase, Errno) = 2,
    /// A fixed-size record came back with only this many bytes.
    ShortRead(Phase, usize) = 3,
    MapFailure { start: u64, got: Result<u64, Errno> } = 4,
    UnmapFailure { start: u64, errno: Errno } = 5,
    ProtectFailure { start: u64, errno: Errno } = 6,
    /// rt_sigreturn came back with this raw result.
    SigreturnFailure(usize) = 7,
}

impl RestoreError {
    /// Stable number for the diagnostic stream.
    #[inline(always)]
    pub fn code(&self) -> u64 {
        // read straight from the tag, a match here becomes a lookup table
        // in .rodata
        unsafe { *(self as *const Self as *const u64) }
    }

    /// Second diagnostic word: the errno, short length or bad address.
    #[inline(always)]
    pub fn detail(&self) -> u64 {
        match *self {
            Self::OpenFailure(errno)
            | Self::ReadFailure(_, errno)
            | Self::UnmapFailure { errno, .. }
            | Self::ProtectFailure { errno, .. }
            | Self::MapFailure { got: Err(errno), .. } => errno.0 as u64,
            Self::MapFailure { got: Ok(addr), .. } => addr,
            Self::ShortRead(_, len) => len as u64,
            Self::SigreturnFailure(ret) => ret as u64,
        }
    }
}

/// Fills `rec` with one record. `Ok(false)` is a clean end of file.
#[inline(always)]
fn read_into<K: Kernel, R: Record>(
    kernel: &mut K,
    fd: Fd,
    rec: &mut MaybeUninit<R>,
    phase: Phase,
) -> Result<bool, RestoreError> {
    let len = unsafe { kernel.read(fd, rec.as_mut_ptr() as *mut u8, R::SIZE) }
        .map_err(|errno| RestoreError::ReadFailure(phase, errno))?;

    match len {
        0 => Ok(false),
        len if len == R::SIZE => Ok(true),
        len => Err(RestoreError::ShortRead(phase, len)),
    }
}

/// Reads one small record by value. `Ok(None)` is a clean end of file.
#[inline(always)]
fn read_record<K: Kernel, R: Record>(
    kernel: &mut K,
    fd: Fd,
    phase: Phase,
) -> Result<Option<R>, RestoreError> {
    let mut rec = MaybeUninit::<R>::uninit();
    if read_into(kernel, fd, &mut rec, phase)? {
        Ok(Some(unsafe { rec.assume_init() }))
    } else {
        Ok(None)
    }
}

/// Next target vma, `None` at the sentinel or end of file.
#[inline(always)]
fn next_target<K: Kernel>(
    kernel: &mut K,
    fd: Fd,
    phase: Phase,
) -> Result<Option<VmaEntry>, RestoreError> {
    Ok(read_record::<K, VmaEntry>(kernel, fd, phase)?.filter(|vma| !vma.is_sentinel()))
}

#[inline(always)]
fn seek<K: Kernel>(kernel: &mut K, fd: Fd, pos: u64, phase: Phase) -> Result<(), RestoreError> {
    kernel
        .lseek(fd, pos, SEEK_SET)
        .map(|_| ())
        .map_err(|errno| RestoreError::ReadFailure(phase, errno))
}

/// Reads the `CoreEntry` in place and returns the saved instruction
/// pointer. The entry is never moved as a whole.
#[inline(always)]
fn read_header<K: Kernel>(kernel: &mut K, fd: Fd) -> Result<u64, RestoreError> {
    seek(kernel, fd, MAGIC_OFFSET, Phase::Header)?;

    let mut core = MaybeUninit::<CoreEntry>::uninit();
    if !read_into(kernel, fd, &mut core, Phase::Header)? {
        return Err(RestoreError::ShortRead(Phase::Header, 0));
    }
    Ok(unsafe { addr_of!((*core.as_ptr()).gpregs.ip).read() })
}

#[inline(always)]
fn teardown<K: Kernel>(kernel: &mut K, fd: Fd) -> Result<(), RestoreError> {
    // the snapshot has no magic, records start at 0
    seek(kernel, fd, 0, Phase::Teardown)?;

    while let Some(vma) = read_record::<K, VmaEntry>(kernel, fd, Phase::Teardown)? {
        if !vma.is_regular() {
            continue;
        }

        mark!(kernel);
        diag::write_hex(kernel, vma.start);
        unsafe { kernel.munmap(vma.start, vma.len()) }.map_err(|errno| {
            RestoreError::UnmapFailure {
                start: vma.start,
                errno,
            }
        })?;
    }

    Ok(())
}

#[inline(always)]
fn recreate<K: Kernel>(kernel: &mut K, fd: Fd) -> Result<(), RestoreError> {
    seek(kernel, fd, VMAS_OFFSET, Phase::Recreate)?;

    while let Some(vma) = next_target(kernel, fd, Phase::Recreate)? {
        if !vma.is_regular() {
            continue;
        }

        mark!(kernel);
        diag::write_hex(kernel, vma.start);

        // writable for now, the page contents still have to go in.
        // Backing files are never reopened here.
        let got = unsafe {
            kernel.mmap(
                vma.start,
                vma.len(),
                vma.prot | PROT_WRITE,
                vma.flags | MAP_ANONYMOUS | MAP_FIXED,
                -1,
                0,
            )
        };
        if got != Ok(vma.start) {
            if let Ok(addr) = got {
                diag::write_hex(kernel, addr);
            }
            return Err(RestoreError::MapFailure {
                start: vma.start,
                got,
            });
        }
    }

    Ok(())
}

#[inline(always)]
fn load_pages<K: Kernel>(kernel: &mut K, fd: Fd) -> Result<(), RestoreError> {
    // the page stream follows the vma sentinel, no seek
    while let Some(addr) = read_record::<K, u64>(kernel, fd, Phase::Pages)? {
        mark!(kernel);
        diag::write_hex(kernel, addr);
        if addr == 0 {
            break;
        }

        let len = unsafe { kernel.read_at(fd, addr, PAGE_SIZE) }
            .map_err(|errno| RestoreError::ReadFailure(Phase::Pages, errno))?;
        if len != PAGE_SIZE {
            diag::write_hex(kernel, len as u64);
            return Err(RestoreError::ShortRead(Phase::Pages, len));
        }
    }

    Ok(())
}

#[inline(always)]
fn fixup_protections<K: Kernel>(kernel: &mut K, fd: Fd) -> Result<(), RestoreError> {
    seek(kernel, fd, VMAS_OFFSET, Phase::Protect)?;

    while let Some(vma) = next_target(kernel, fd, Phase::Protect)? {
        if !vma.is_regular() || vma.is_writable() {
            continue;
        }

        mark!(kernel);
        diag::write_hex(kernel, vma.start);
        unsafe { kernel.mprotect(vma.start, vma.len(), vma.prot) }.map_err(|errno| {
            RestoreError::ProtectFailure {
                start: vma.start,
                errno,
            }
        })?;
    }

    Ok(())
}

#[inline(always)]
fn open<K: Kernel>(kernel: &mut K, path: &[u8; PATH_LEN]) -> Result<Fd, RestoreError> {
    unsafe { kernel.open(path.as_ptr(), O_RDONLY) }.map_err(RestoreError::OpenFailure)
}

/// Restores the memory layout described by `args`. On `Ok` the address
/// space matches the image and only the register state is left to install.
#[inline(always)]
pub fn restore_core<K: Kernel>(kernel: &mut K, args: &RestoreCoreArgs) -> Result<(), RestoreError> {
    if !paths_terminated(args) {
        return Err(RestoreError::OpenFailure(Errno::ENAMETOOLONG));
    }

    unsafe {
        diag::write_cstr_line(kernel, args.core_path.as_ptr(), PATH_LEN);
        diag::write_cstr_line(kernel, args.self_vmas_path.as_ptr(), PATH_LEN);
    }

    let core_fd = open(kernel, &args.core_path)?;
    let ip = read_header(kernel, core_fd)?;
    diag::write_hex(kernel, ip);

    let self_fd = open(kernel, &args.self_vmas_path)?;
    mark!(kernel);
    teardown(kernel, self_fd)?;
    // read-only, a failed close loses nothing
    let _ = kernel.close(self_fd);

    recreate(kernel, core_fd)?;
    load_pages(kernel, core_fd)?;
    fixup_protections(kernel, core_fd)?;
    // read-only, a failed close loses nothing
    let _ = kernel.close(core_fd);

    mark!(kernel);
    Ok(())
}
