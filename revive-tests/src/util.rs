use std::{
    env,
    ffi::CStr,
    fs::{self, File},
    io::Write,
    mem,
    num::NonZeroUsize,
    os::fd::{AsRawFd, FromRawFd, RawFd},
    path::PathBuf,
    process, slice,
    sync::atomic::{AtomicUsize, Ordering},
};

use revive_common::{
    abi::{RestoreCoreArgs, ARGS_SIZE},
    codec::{save_self_snapshot, ImageWriter},
    image::{VmaEntry, PAGE_SIZE},
    libc,
    nix::{
        sys::{
            memfd::{memfd_create, MemFdCreateFlag},
            mman::{mmap, munmap, MapFlags, ProtFlags},
            wait::{waitpid, WaitStatus},
        },
        unistd::{fork, ForkResult},
    },
};
use revive_restore::{restorer, GET_ARG_OFFSET, GET_SELF_LEN};

/// Files for one restore, removed again on drop.
pub struct Fixture {
    pub core: PathBuf,
    pub self_vmas: PathBuf,
}

impl Fixture {
    pub fn new(image: &ImageWriter, self_vmas: &[VmaEntry]) -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        let dir = env::temp_dir();

        let fixture = Self {
            core: dir.join(format!("revive-{}-{id}-core.img", process::id())),
            self_vmas: dir.join(format!("revive-{}-{id}-self.img", process::id())),
        };
        image.save(&fixture.core).unwrap();
        save_self_snapshot(&fixture.self_vmas, self_vmas).unwrap();
        fixture
    }

    pub fn args(&self) -> RestoreCoreArgs {
        RestoreCoreArgs::new(&self.core, &self.self_vmas).unwrap()
    }

    pub fn truncate_core(&self, by: usize) {
        let bytes = fs::read(&self.core).unwrap();
        fs::write(&self.core, &bytes[..bytes.len() - by]).unwrap();
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        for path in [&self.core, &self.self_vmas] {
            let _ = fs::remove_file(path);
        }
    }
}

/// A private anonymous mapping owned by the test process.
pub struct Region {
    pub addr: u64,
    pub pages: usize,
}

impl Region {
    pub fn map(pages: usize) -> Self {
        let addr = unsafe {
            mmap(
                None,
                (pages * PAGE_SIZE).try_into().unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_PRIVATE | MapFlags::MAP_ANONYMOUS,
                -1,
                0,
            )
            .expect("failed to map test region")
        };
        Self {
            addr: addr as u64,
            pages,
        }
    }

    pub fn end(&self) -> u64 {
        self.addr + (self.pages * PAGE_SIZE) as u64
    }

    pub fn page(&self, n: usize) -> u64 {
        self.addr + (n * PAGE_SIZE) as u64
    }
}

impl Drop for Region {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr as *mut _, self.pages * PAGE_SIZE);
        }
    }
}

/// Runs `f` in a forked child and returns its exit code. `f` returns the
/// code to exit with and must not allocate: other test threads may have
/// held the allocator lock at fork time.
pub fn in_child(f: impl FnOnce() -> i32) -> i32 {
    match unsafe { fork() }.expect("failed to fork") {
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid failed") {
            WaitStatus::Exited(_, code) => code,
            other => panic!("child ended with {other:?}"),
        },
        ForkResult::Child => {
            let code = f();
            unsafe { libc::_exit(code) }
        }
    }
}

/// Whether every page of `[addr, addr + len)` is mapped. mincore fails
/// with ENOMEM on any hole.
pub fn is_mapped(addr: u64, len: usize) -> bool {
    let mut vec = [0u8; 16];
    assert!(len.div_ceil(PAGE_SIZE) <= vec.len());
    unsafe { libc::mincore(addr as *mut _, len, vec.as_mut_ptr()) == 0 }
}

/// Whether the kernel may store to `addr`. Reads one byte from `zero_fd`
/// (an open `/dev/zero`) into it, so a writable `addr` gets zeroed.
pub fn accepts_writes(zero_fd: RawFd, addr: u64) -> bool {
    unsafe { libc::read(zero_fd, addr as *mut _, 1) == 1 }
}

/// The blob linked into this binary, copied out to a fresh executable
/// mapping with `block` in its Argument Block.
pub struct RelocatedBlob {
    pub base: usize,
    pub len: usize,
    pub args_offset: usize,
}

impl RelocatedBlob {
    pub fn new(block: &[u8; ARGS_SIZE]) -> Self {
        let entry = restorer as usize;
        let len = unsafe { restorer(GET_SELF_LEN) } as usize - entry;
        let args_offset = unsafe { restorer(GET_ARG_OFFSET) } as usize - entry;

        let mut bytes = unsafe { slice::from_raw_parts(entry as *const u8, len) }.to_vec();
        bytes[args_offset..args_offset + ARGS_SIZE].copy_from_slice(block);

        // mapped from a file so the kernel syncs the instruction cache
        let name = CStr::from_bytes_with_nul(b"revive-blob\0").unwrap();
        let fd = memfd_create(name, MemFdCreateFlag::MFD_CLOEXEC).expect("memfd_create failed");
        let mut file = unsafe { File::from_raw_fd(fd) };
        file.write_all(&bytes).unwrap();

        let base = unsafe {
            mmap(
                None,
                NonZeroUsize::new(len).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_EXEC,
                MapFlags::MAP_PRIVATE,
                file.as_raw_fd(),
                0,
            )
            .expect("failed to map blob copy")
        };
        Self {
            base: base as usize,
            len,
            args_offset,
        }
    }

    /// Enters the copy, never the linked original.
    ///
    /// # Safety
    /// As for `restorer`.
    pub unsafe fn call(&self, cmd: i64) -> i64 {
        let entry: unsafe extern "C" fn(i64) -> i64 = mem::transmute(self.base);
        entry(cmd)
    }
}

impl Drop for RelocatedBlob {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.base as *mut _, self.len);
        }
    }
}
