//! Calling contract of the restore blob.
//!
//! The blob is entered with a single opcode. Everything else it needs is
//! written by the invoker into the Argument Block, a reserved `ARGS_SIZE`
//! byte region inside the blob whose address `GET_ARG_OFFSET` reports.

use core::mem::size_of;

use crate::image::Record;

pub const ARGS_SIZE: usize = 512;

/// Room for one path, NUL terminator included.
pub const PATH_LEN: usize = 240;

pub const PR_ARG_STRING: i64 = 1;
pub const GET_ARG_OFFSET: i64 = 2;
pub const GET_SELF_LEN: i64 = 3;
pub const RESTORE_CORE: i64 = 4;

/// Park the process forever when a restore fails.
pub const FAILURE_FREEZE: u32 = 0;
/// Exit with `RestoreCoreArgs::exit_code` when a restore fails.
pub const FAILURE_EXIT: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Freeze,
    Exit(i32),
}

/// Argument Block contents for `RESTORE_CORE`.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct RestoreCoreArgs {
    pub core_path: [u8; PATH_LEN],
    pub self_vmas_path: [u8; PATH_LEN],
    /// Address of the prepared signal frame, or 0 to sigreturn on the
    /// current stack.
    pub sigframe: u64,
    pub on_failure: u32,
    pub exit_code: u32,
}

unsafe impl Record for RestoreCoreArgs {}

const _: () = assert!(size_of::<RestoreCoreArgs>() <= ARGS_SIZE);

impl RestoreCoreArgs {
    #[inline(always)]
    pub fn failure_mode(&self) -> FailureMode {
        match self.on_failure {
            FAILURE_EXIT => FailureMode::Exit(self.exit_code as i32),
            _ => FailureMode::Freeze,
        }
    }
}

/// Bytes of `buf` up to, not including, the first NUL. Host side only, the
/// blob scans for the NUL itself.
pub fn c_str(buf: &[u8]) -> &[u8] {
    let len = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    &buf[..len]
}

#[cfg(feature = "std")]
mod encode {
    use std::{os::unix::ffi::OsStrExt, path::Path};

    use anyhow::{bail, Result};

    use super::*;

    fn encode_path(path: &Path) -> Result<[u8; PATH_LEN]> {
        let bytes = path.as_os_str().as_bytes();
        if bytes.contains(&0) {
            bail!("path {} contains a NUL byte", path.display());
        }
        if bytes.len() >= PATH_LEN {
            bail!(
                "path {} is {} bytes, at most {} fit in the argument block",
                path.display(),
                bytes.len(),
                PATH_LEN - 1
            );
        }

        let mut buf = [0u8; PATH_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(buf)
    }

    impl RestoreCoreArgs {
        pub fn new(core_path: &Path, self_vmas_path: &Path) -> Result<Self> {
            Ok(Self {
                core_path: encode_path(core_path)?,
                self_vmas_path: encode_path(self_vmas_path)?,
                sigframe: 0,
                on_failure: FAILURE_FREEZE,
                exit_code: 0,
            })
        }

        pub fn with_sigframe(mut self, addr: u64) -> Self {
            self.sigframe = addr;
            self
        }

        pub fn exit_on_failure(mut self, code: i32) -> Self {
            self.on_failure = FAILURE_EXIT;
            self.exit_code = code as u32;
            self
        }

        /// The full Argument Block, ready to be copied into the blob.
        pub fn to_block(&self) -> [u8; ARGS_SIZE] {
            let mut block = [0u8; ARGS_SIZE];
            block[..Self::SIZE].copy_from_slice(self.as_bytes());
            block
        }
    }

    impl std::fmt::Debug for RestoreCoreArgs {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("RestoreCoreArgs")
                .field("core_path", &String::from_utf8_lossy(c_str(&self.core_path)))
                .field(
                    "self_vmas_path",
                    &String::from_utf8_lossy(c_str(&self.self_vmas_path)),
                )
                .field("sigframe", &format_args!("{:#x}", self.sigframe))
                .field("on_failure", &self.failure_mode())
                .finish()
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use std::path::Path;

    use super::*;

    #[test]
    fn block_layout() {
        let args = RestoreCoreArgs::new(Path::new("/img/core"), Path::new("/img/self"))
            .unwrap()
            .with_sigframe(0x7ffd_0000)
            .exit_on_failure(17);
        let block = args.to_block();

        assert_eq!(c_str(&block[..PATH_LEN]), b"/img/core");
        assert_eq!(c_str(&block[PATH_LEN..2 * PATH_LEN]), b"/img/self");
        assert_eq!(
            &block[2 * PATH_LEN..2 * PATH_LEN + 8],
            &0x7ffd_0000u64.to_ne_bytes()
        );
        assert!(block[RestoreCoreArgs::SIZE..].iter().all(|b| *b == 0));

        let back = RestoreCoreArgs::from_bytes(&block).unwrap();
        assert_eq!(back.failure_mode(), FailureMode::Exit(17));
    }

    #[test]
    fn default_failure_mode_freezes() {
        let args = RestoreCoreArgs::new(Path::new("a"), Path::new("b")).unwrap();
        assert_eq!(args.failure_mode(), FailureMode::Freeze);
    }

    #[test]
    fn rejects_long_paths() {
        let long = "x".repeat(PATH_LEN);
        assert!(RestoreCoreArgs::new(Path::new(&long), Path::new("b")).is_err());

        let fits = "x".repeat(PATH_LEN - 1);
        assert!(RestoreCoreArgs::new(Path::new(&fits), Path::new("b")).is_ok());
    }
}
