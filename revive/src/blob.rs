use std::{fs, path::Path};

use revive_common::{
    abi::{RestoreCoreArgs, ARGS_SIZE},
    anyhow::{ensure, Context, Result},
    tracing::{debug, info},
};
use revive_restore::{linked_section, restorer, GET_ARG_OFFSET, GET_SELF_LEN};

/// Where the blob linked into this binary sits, as the blob reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobLayout {
    pub entry: usize,
    pub args_block: usize,
    pub end: usize,
}

impl BlobLayout {
    pub fn locate() -> Result<Self> {
        let entry = restorer as usize;
        // neither opcode touches anything outside the blob
        let args_block = unsafe { restorer(GET_ARG_OFFSET) } as usize;
        let end = unsafe { restorer(GET_SELF_LEN) } as usize;
        let section = linked_section();
        debug!("blob entry {entry:#x} args {args_block:#x} end {end:#x} section {section:#x?}");

        ensure!(
            entry == section.start && end == section.end,
            "blob does not span its section: entry {entry:#x}, end {end:#x}, section {section:#x?}"
        );
        ensure!(
            entry < args_block && args_block + ARGS_SIZE <= end,
            "blob layout is not contiguous: entry {entry:#x}, args {args_block:#x}, end {end:#x}"
        );
        Ok(Self {
            entry,
            args_block,
            end,
        })
    }

    pub fn len(&self) -> usize {
        self.end - self.entry
    }

    pub fn args_offset(&self) -> usize {
        self.args_block - self.entry
    }

    pub fn bytes(&self) -> &'static [u8] {
        unsafe { std::slice::from_raw_parts(self.entry as *const u8, self.len()) }
    }
}

pub fn report(output: Option<&Path>) -> Result<()> {
    let layout = BlobLayout::locate()?;
    println!("entry       {:#x}", layout.entry);
    println!("args offset {:#x}", layout.args_offset());
    println!("length      {:#x}", layout.len());

    if let Some(path) = output {
        fs::write(path, layout.bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("wrote {} blob bytes to {}", layout.len(), path.display());
    }
    Ok(())
}

pub fn write_args(
    core: &Path,
    self_vmas: &Path,
    sigframe: Option<u64>,
    exit_on_failure: Option<i32>,
    output: &Path,
) -> Result<()> {
    let mut args = RestoreCoreArgs::new(core, self_vmas)?;
    if let Some(addr) = sigframe {
        args = args.with_sigframe(addr);
    }
    if let Some(code) = exit_on_failure {
        args = args.exit_on_failure(code);
    }

    fs::write(output, args.to_block())
        .with_context(|| format!("failed to write {}", output.display()))?;
    info!("wrote {args:?} to {}", output.display());
    Ok(())
}
