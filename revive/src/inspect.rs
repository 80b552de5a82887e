//! Human and JSON views of checkpoint images and self-snapshots.

use std::path::Path;

use revive_common::{
    anyhow::Result,
    codec::{open_self_snapshot, Image},
    image::{VmaEntry, PROT_EXEC, PROT_READ, PROT_WRITE},
    serde::Serialize,
    serde_json,
    tracing::{info, warn},
};

#[derive(Debug, Serialize)]
#[serde(crate = "revive_common::serde")]
pub struct VmaSummary {
    pub start: String,
    pub end: String,
    pub prot: String,
    pub flags: u32,
    pub status: u32,
    pub regular: bool,
}

impl From<&VmaEntry> for VmaSummary {
    fn from(vma: &VmaEntry) -> Self {
        Self {
            start: format!("{:#x}", vma.start),
            end: format!("{:#x}", vma.end),
            prot: prot_string(vma.prot),
            flags: vma.flags,
            status: vma.status,
            regular: vma.is_regular(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(crate = "revive_common::serde")]
pub struct ImageSummary {
    pub comm: String,
    pub ip: String,
    pub sp: String,
    pub vmas: Vec<VmaSummary>,
    pub pages: usize,
    pub orphan_pages: Vec<String>,
}

impl From<&Image> for ImageSummary {
    fn from(image: &Image) -> Self {
        Self {
            comm: String::from_utf8_lossy(image.core.comm()).into_owned(),
            ip: format!("{:#x}", image.core.gpregs.ip),
            sp: format!("{:#x}", image.core.gpregs.sp),
            vmas: image.vmas.iter().map(VmaSummary::from).collect(),
            pages: image.pages.len(),
            orphan_pages: image
                .orphan_pages()
                .map(|p| format!("{:#x}", p.addr))
                .collect(),
        }
    }
}

pub fn prot_string(prot: u32) -> String {
    [(PROT_READ, 'r'), (PROT_WRITE, 'w'), (PROT_EXEC, 'x')]
        .iter()
        .map(|(bit, c)| if prot & bit != 0 { *c } else { '-' })
        .collect()
}

fn print_vmas(vmas: &[VmaSummary]) {
    for vma in vmas {
        println!(
            "{:>18}-{:<18} {} flags={:#x} status={:#x}{}",
            vma.start,
            vma.end,
            vma.prot,
            vma.flags,
            vma.status,
            if vma.regular { "" } else { " (kept)" }
        );
    }
}

pub fn inspect(path: &Path, json: bool) -> Result<()> {
    let image = Image::open(path)?;
    let summary = ImageSummary::from(&image);
    info!(
        "image {} holds {} vmas and {} pages",
        path.display(),
        summary.vmas.len(),
        summary.pages
    );
    for addr in &summary.orphan_pages {
        warn!("page {addr} is not covered by any regular vma, restoring it would fault");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("comm  {}", summary.comm);
    println!("ip    {}", summary.ip);
    println!("sp    {}", summary.sp);
    println!("pages {}", summary.pages);
    print_vmas(&summary.vmas);
    Ok(())
}

pub fn snapshot(path: &Path, json: bool) -> Result<()> {
    let vmas = open_self_snapshot(path)?;
    let summary: Vec<_> = vmas.iter().map(VmaSummary::from).collect();
    info!(
        "self snapshot {} lists {} vmas, {} to unmap",
        path.display(),
        summary.len(),
        summary.iter().filter(|v| v.regular).count()
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_vmas(&summary);
    }
    Ok(())
}
