//! In-memory kernel for driving the restore engine in tests.
//!
//! Memory is tracked per page. Diverging calls unwind with a typed payload
//! so a test can see how the blob went down, see [`outcome`].

use std::{
    collections::{BTreeMap, HashMap},
    ffi::CStr,
    panic::{self, AssertUnwindSafe},
};

use revive_common::image::{PAGE_SIZE, PROT_WRITE};

use crate::sys::{Errno, Fd, Kernel, SEEK_SET, STDOUT};

const PAGE: u64 = PAGE_SIZE as u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Munmap {
        addr: u64,
        len: u64,
    },
    Mmap {
        addr: u64,
        len: u64,
        prot: u32,
        flags: u32,
        fd: i64,
        offset: u64,
    },
    Mprotect {
        addr: u64,
        len: u64,
        prot: u32,
    },
}

/// How a diverging call left the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Went to sleep, the first of an endless run.
    Parked { secs: u64 },
    Exited(i32),
    /// rt_sigreturn accepted the frame at this address.
    Resumed(u64),
}

struct FakePage {
    prot: u32,
    data: Box<[u8]>,
}

struct OpenFile {
    path: String,
    pos: usize,
}

pub struct FakeKernel {
    files: HashMap<String, Vec<u8>>,
    fds: BTreeMap<Fd, OpenFile>,
    next_fd: Fd,
    pages: BTreeMap<u64, FakePage>,
    misplaced: Option<(u64, u64)>,
    refused_protect: Option<u64>,
    sigreturn_ret: Option<usize>,
    pub events: Vec<Event>,
    pub stdout: Vec<u8>,
}

impl Default for FakeKernel {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeKernel {
    pub fn new() -> Self {
        Self {
            files: HashMap::new(),
            fds: BTreeMap::new(),
            next_fd: 3,
            pages: BTreeMap::new(),
            misplaced: None,
            refused_protect: None,
            sigreturn_ret: None,
            events: vec![],
            stdout: vec![],
        }
    }

    pub fn with_file(mut self, path: &str, data: Vec<u8>) -> Self {
        self.files.insert(path.to_owned(), data);
        self
    }

    /// Maps zeroed pages over `[start, end)` without logging an event.
    pub fn with_mapping(mut self, start: u64, end: u64, prot: u32) -> Self {
        self.map_pages(start, end - start, prot);
        self
    }

    /// The next mmap at `addr` lands at `instead`.
    pub fn misplace_mmap(&mut self, addr: u64, instead: u64) {
        self.misplaced = Some((addr, instead));
    }

    pub fn refuse_mprotect(&mut self, addr: u64) {
        self.refused_protect = Some(addr);
    }

    /// Makes rt_sigreturn come back with `ret` instead of resuming.
    pub fn reject_sigreturn(&mut self, ret: usize) {
        self.sigreturn_ret = Some(ret);
    }

    pub fn open_fds(&self) -> Vec<Fd> {
        self.fds.keys().copied().collect()
    }

    /// Mapped ranges as `(start, end, prot)`, adjacent pages with equal
    /// protection merged.
    pub fn regions(&self) -> Vec<(u64, u64, u32)> {
        let mut out: Vec<(u64, u64, u32)> = vec![];
        for (addr, page) in &self.pages {
            match out.last_mut() {
                Some((_, end, prot)) if *end == *addr && *prot == page.prot => *end += PAGE,
                _ => out.push((*addr, addr + PAGE, page.prot)),
            }
        }
        out
    }

    pub fn bytes(&self, addr: u64, len: usize) -> Vec<u8> {
        (0..len as u64)
            .map(|i| {
                let at = addr + i;
                let page = &self.pages[&(at - at % PAGE)];
                page.data[(at % PAGE) as usize]
            })
            .collect()
    }

    fn map_pages(&mut self, addr: u64, len: u64, prot: u32) {
        for page in (addr..addr + len).step_by(PAGE_SIZE) {
            self.pages.insert(
                page,
                FakePage {
                    prot,
                    data: vec![0; PAGE_SIZE].into(),
                },
            );
        }
    }

    fn page_range(addr: u64, len: u64) -> Result<impl Iterator<Item = u64>, Errno> {
        if addr % PAGE != 0 || len == 0 {
            return Err(Errno::EINVAL);
        }
        let end = (addr + len + PAGE - 1) / PAGE * PAGE;
        Ok((addr..end).step_by(PAGE_SIZE))
    }

    fn file(&mut self, fd: Fd) -> Result<(&[u8], &mut usize), Errno> {
        let open = self.fds.get_mut(&fd).ok_or(Errno::EBADF)?;
        Ok((&self.files[&open.path], &mut open.pos))
    }
}

/// Runs `f`, which is expected to diverge through the fake kernel.
pub fn outcome(f: impl FnOnce()) -> Outcome {
    let payload = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => panic!("call returned instead of diverging"),
        Err(payload) => payload,
    };
    match payload.downcast::<Outcome>() {
        Ok(outcome) => *outcome,
        Err(other) => panic::resume_unwind(other),
    }
}

impl Kernel for FakeKernel {
    unsafe fn open(&mut self, path: *const u8, _flags: i32) -> Result<Fd, Errno> {
        let path = CStr::from_ptr(path.cast()).to_string_lossy().into_owned();
        if !self.files.contains_key(&path) {
            return Err(Errno::ENOENT);
        }

        let fd = self.next_fd;
        self.next_fd += 1;
        self.fds.insert(fd, OpenFile { path, pos: 0 });
        Ok(fd)
    }

    unsafe fn read(&mut self, fd: Fd, buf: *mut u8, count: usize) -> Result<usize, Errno> {
        let (data, pos) = self.file(fd)?;
        let len = count.min(data.len().saturating_sub(*pos));
        if len == 0 {
            return Ok(0);
        }
        core::ptr::copy_nonoverlapping(data[*pos..].as_ptr(), buf, len);
        *pos += len;
        Ok(len)
    }

    unsafe fn read_at(&mut self, fd: Fd, addr: u64, count: usize) -> Result<usize, Errno> {
        let first = addr - addr % PAGE;
        let writable = Self::page_range(first, addr + count as u64 - first)?.all(|page| {
            self.pages
                .get(&page)
                .map_or(false, |p| p.prot & PROT_WRITE != 0)
        });
        if !writable {
            return Err(Errno::EFAULT);
        }

        let (data, pos) = self.file(fd)?;
        let len = count.min(data.len().saturating_sub(*pos));
        if len == 0 {
            return Ok(0);
        }
        let chunk = data[*pos..*pos + len].to_vec();
        *pos += len;

        for (i, byte) in chunk.into_iter().enumerate() {
            let at = addr + i as u64;
            if let Some(page) = self.pages.get_mut(&(at - at % PAGE)) {
                page.data[(at % PAGE) as usize] = byte;
            }
        }
        Ok(len)
    }

    fn lseek(&mut self, fd: Fd, offset: u64, whence: i32) -> Result<u64, Errno> {
        if whence != SEEK_SET {
            return Err(Errno::EINVAL);
        }
        let (_, pos) = self.file(fd)?;
        *pos = offset as usize;
        Ok(offset)
    }

    fn close(&mut self, fd: Fd) -> Result<(), Errno> {
        self.fds.remove(&fd).map(|_| ()).ok_or(Errno::EBADF)
    }

    fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize, Errno> {
        if fd != STDOUT {
            return Err(Errno::EBADF);
        }
        self.stdout.extend_from_slice(buf);
        Ok(buf.len())
    }

    unsafe fn mmap(
        &mut self,
        addr: u64,
        len: u64,
        prot: u32,
        flags: u32,
        fd: i64,
        offset: u64,
    ) -> Result<u64, Errno> {
        self.events.push(Event::Mmap {
            addr,
            len,
            prot,
            flags,
            fd,
            offset,
        });
        Self::page_range(addr, len)?;

        let at = match self.misplaced {
            Some((from, to)) if from == addr => {
                self.misplaced = None;
                to
            }
            _ => addr,
        };
        self.map_pages(at, len, prot);
        Ok(at)
    }

    unsafe fn munmap(&mut self, addr: u64, len: u64) -> Result<(), Errno> {
        self.events.push(Event::Munmap { addr, len });
        for page in Self::page_range(addr, len)? {
            self.pages.remove(&page);
        }
        Ok(())
    }

    unsafe fn mprotect(&mut self, addr: u64, len: u64, prot: u32) -> Result<(), Errno> {
        self.events.push(Event::Mprotect { addr, len, prot });
        if self.refused_protect == Some(addr) {
            return Err(Errno::ENOMEM);
        }

        let range: Vec<u64> = Self::page_range(addr, len)?.collect();
        if !range.iter().all(|page| self.pages.contains_key(page)) {
            return Err(Errno::ENOMEM);
        }
        for page in range {
            if let Some(page) = self.pages.get_mut(&page) {
                page.prot = prot;
            }
        }
        Ok(())
    }

    fn sleep(&mut self, secs: u64) {
        panic::panic_any(Outcome::Parked { secs });
    }

    fn exit(&mut self, code: i32) -> ! {
        panic::panic_any(Outcome::Exited(code));
    }

    unsafe fn rt_sigreturn(&mut self, frame: u64) -> usize {
        match self.sigreturn_ret {
            Some(ret) => ret,
            None => panic::panic_any(Outcome::Resumed(frame)),
        }
    }
}

#[cfg(test)]
mod tests {
    use revive_common::image::PROT_READ;

    use super::*;

    #[test]
    fn regions_merge_equal_neighbours() {
        let kernel = FakeKernel::new()
            .with_mapping(0x1000, 0x3000, PROT_READ)
            .with_mapping(0x3000, 0x4000, PROT_READ | PROT_WRITE)
            .with_mapping(0x8000, 0x9000, PROT_READ);

        assert_eq!(
            kernel.regions(),
            vec![
                (0x1000, 0x3000, PROT_READ),
                (0x3000, 0x4000, PROT_READ | PROT_WRITE),
                (0x8000, 0x9000, PROT_READ),
            ]
        );
    }

    #[test]
    fn reads_advance_and_stop_at_eof() {
        let mut kernel = FakeKernel::new().with_file("/f", vec![1, 2, 3]);
        let fd = unsafe { kernel.open(b"/f\0".as_ptr(), 0) }.unwrap();
        let mut buf = [0u8; 2];

        assert_eq!(unsafe { kernel.read(fd, buf.as_mut_ptr(), 2) }, Ok(2));
        assert_eq!(buf, [1, 2]);
        assert_eq!(unsafe { kernel.read(fd, buf.as_mut_ptr(), 2) }, Ok(1));
        assert_eq!(unsafe { kernel.read(fd, buf.as_mut_ptr(), 2) }, Ok(0));
        assert_eq!(kernel.close(fd), Ok(()));
        assert_eq!(kernel.close(fd), Err(Errno::EBADF));
    }

    #[test]
    fn read_at_needs_writable_memory() {
        let mut kernel = FakeKernel::new()
            .with_file("/f", vec![7; 16])
            .with_mapping(0x1000, 0x2000, PROT_READ);
        let fd = unsafe { kernel.open(b"/f\0".as_ptr(), 0) }.unwrap();

        assert_eq!(unsafe { kernel.read_at(fd, 0x1000, 16) }, Err(Errno::EFAULT));
    }

    #[test]
    fn diverging_calls_are_observable() {
        let mut kernel = FakeKernel::new();

        assert_eq!(outcome(|| kernel.exit(3)), Outcome::Exited(3));
        assert_eq!(outcome(|| kernel.sleep(5)), Outcome::Parked { secs: 5 });
    }
}
