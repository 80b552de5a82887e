use std::{
    fs,
    io::Write,
    path::Path,
};

use anyhow::{bail, ensure, Context, Result};

use crate::image::{CoreEntry, Record, VmaEntry, CORE_MAGIC, PAGE_SIZE};
use crate::tracing::{debug, trace};

/// Builds a checkpoint image in the layout the restore blob consumes.
pub struct ImageWriter {
    core: CoreEntry,
    vmas: Vec<VmaEntry>,
    pages: Vec<PageRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRecord {
    pub addr: u64,
    pub data: Box<[u8]>,
}

impl ImageWriter {
    pub fn new(core: CoreEntry) -> Self {
        Self {
            core,
            vmas: vec![],
            pages: vec![],
        }
    }

    pub fn vma(mut self, vma: VmaEntry) -> Self {
        assert!(!vma.is_sentinel(), "a target vma cannot start at 0");
        self.vmas.push(vma);
        self
    }

    pub fn page(mut self, addr: u64, data: &[u8]) -> Result<Self> {
        ensure!(addr != 0, "page address 0 is the stream terminator");
        ensure!(
            data.len() == PAGE_SIZE,
            "page at {addr:#x} holds {} bytes, expected {PAGE_SIZE}",
            data.len()
        );

        self.pages.push(PageRecord {
            addr,
            data: data.into(),
        });
        Ok(self)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            4 + CoreEntry::SIZE
                + VmaEntry::SIZE * (self.vmas.len() + 1)
                + (8 + PAGE_SIZE) * self.pages.len()
                + 8,
        );

        buf.extend_from_slice(&CORE_MAGIC.to_ne_bytes());
        buf.extend_from_slice(self.core.as_bytes());
        for vma in &self.vmas {
            buf.extend_from_slice(vma.as_bytes());
        }
        buf.extend_from_slice(VmaEntry::SENTINEL.as_bytes());
        for page in &self.pages {
            buf.extend_from_slice(&page.addr.to_ne_bytes());
            buf.extend_from_slice(&page.data);
        }
        buf.extend_from_slice(&0u64.to_ne_bytes());

        buf
    }

    pub fn write_to(&self, mut out: impl Write) -> Result<()> {
        out.write_all(&self.to_bytes())
            .context("failed to write checkpoint image")
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!(
            "wrote image {} ({} vmas, {} pages)",
            path.display(),
            self.vmas.len(),
            self.pages.len()
        );
        Ok(())
    }
}

pub fn encode_self_snapshot(vmas: &[VmaEntry]) -> Vec<u8> {
    vmas.iter().flat_map(|v| v.as_bytes().iter().copied()).collect()
}

pub fn save_self_snapshot(path: impl AsRef<Path>, vmas: &[VmaEntry]) -> Result<()> {
    let path = path.as_ref();
    fs::write(path, encode_self_snapshot(vmas))
        .with_context(|| format!("failed to write {}", path.display()))
}

/// A parsed and validated checkpoint image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub core: CoreEntry,
    pub vmas: Vec<VmaEntry>,
    pub pages: Vec<PageRecord>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let out = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(out)
    }

    fn record<R: Record>(&mut self) -> Option<R> {
        self.take(R::SIZE).and_then(R::from_bytes)
    }
}

impl Image {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let buf = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&buf).with_context(|| format!("invalid checkpoint image {}", path.display()))
    }

    pub fn parse(buf: &[u8]) -> Result<Self> {
        let mut cur = Cursor { buf, pos: 0 };

        let magic = cur
            .take(4)
            .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .context("image too short for magic")?;
        if magic != CORE_MAGIC {
            bail!("bad magic {magic:#010x}, expected {CORE_MAGIC:#010x}");
        }

        let core = cur
            .record::<CoreEntry>()
            .context("image truncated inside the core entry")?;

        let mut vmas = vec![];
        loop {
            let at = cur.pos;
            let vma = match cur.record::<VmaEntry>() {
                Some(vma) => vma,
                None if cur.remaining() == 0 => bail!("missing vma sentinel"),
                None => bail!("vma record at offset {at} truncated"),
            };
            if vma.is_sentinel() {
                break;
            }
            if vma.end <= vma.start {
                bail!(
                    "vma at offset {at} has an empty range {:#x}-{:#x}",
                    vma.start,
                    vma.end
                );
            }
            trace!("vma {:#x}-{:#x} status {:#x}", vma.start, vma.end, vma.status);
            vmas.push(vma);
        }

        let mut pages = vec![];
        loop {
            let at = cur.pos;
            let addr = match cur.record::<u64>() {
                Some(addr) => addr,
                None if cur.remaining() == 0 => bail!("missing page stream terminator"),
                None => bail!("page address at offset {at} truncated"),
            };
            if addr == 0 {
                break;
            }
            let data = cur
                .take(PAGE_SIZE)
                .with_context(|| format!("page {addr:#x} at offset {at} truncated"))?;
            pages.push(PageRecord {
                addr,
                data: data.into(),
            });
        }

        if cur.remaining() != 0 {
            debug!("{} trailing bytes after page terminator", cur.remaining());
        }

        Ok(Self { core, vmas, pages })
    }

    pub fn regular_vmas(&self) -> impl Iterator<Item = &VmaEntry> {
        self.vmas.iter().filter(|v| v.is_regular())
    }

    /// Returns the page records whose address no regular vma covers.
    pub fn orphan_pages(&self) -> impl Iterator<Item = &PageRecord> {
        self.pages.iter().filter(|p| {
            // a page running past the top of the address space fits nowhere
            let Some(end) = p.addr.checked_add(PAGE_SIZE as u64) else {
                return true;
            };
            !self
                .regular_vmas()
                .any(|v| p.addr >= v.start && end <= v.end)
        })
    }
}

pub fn parse_self_snapshot(buf: &[u8]) -> Result<Vec<VmaEntry>> {
    if buf.len() % VmaEntry::SIZE != 0 {
        bail!(
            "self snapshot is {} bytes, not a whole number of {}-byte records",
            buf.len(),
            VmaEntry::SIZE
        );
    }

    Ok(buf
        .chunks_exact(VmaEntry::SIZE)
        .filter_map(VmaEntry::from_bytes)
        .collect())
}

pub fn open_self_snapshot(path: impl AsRef<Path>) -> Result<Vec<VmaEntry>> {
    let path = path.as_ref();
    let buf = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_self_snapshot(&buf).with_context(|| format!("invalid self snapshot {}", path.display()))
}
