//! Formats and ABI shared between the restore blob and the tools around it.
//!
//! Without the `std` feature only the record layouts and the blob ABI are
//! available, which is what the freestanding blob links against.

#![cfg_attr(not(feature = "std"), no_std)]

pub mod abi;
pub mod image;

#[cfg(feature = "std")]
pub mod codec;
#[cfg(feature = "std")]
pub mod tracing;

#[cfg(feature = "std")]
pub use {anyhow, libc, nix, serde, serde_json};
