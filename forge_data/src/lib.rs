//! Reflected render-data schema and the packaged serialization format.
//!
//! The schema layer describes every serializable render type with static
//! descriptors; the package builder and reader traverse those descriptors
//! generically, so adding a type means adding a descriptor and the backing
//! struct, never touching the writer.

pub mod builder;
pub mod codec;
pub mod pools;
pub mod reader;
pub mod schema;
pub mod writer;

pub use builder::{PackageBuilder, SourceWriter, StringResolver};
pub use reader::{Package, PackageResolver};

/// Four-character code, little-endian.
pub const fn fourcc(code: [u8; 4]) -> u32 {
    u32::from_le_bytes(code)
}

/// Identifier back-patched into offset 0 of every completed package.
pub const PACKAGE_IDENTIFIER: u32 = fourcc(*b"FPKG");

/// Version of the package container format.
pub const PACKAGE_VERSION: u32 = 1;
