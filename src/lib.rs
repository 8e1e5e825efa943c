//! Decoders for three game data formats:
//!
//! - **PKG** ([`pkg`]): nested folder archive with raw and chunk-compressed
//!   payloads.
//! - **DAT** ([`dat`]): XOR-keystream encrypted, CRC-checked, zlib-compressed
//!   name/value tree.
//! - **GI** ([`gi`]): layered RLE image composited into one RGBA canvas.
//!
//! Every decoder takes a single `Read + Seek` source and returns either a
//! fully loaded structure or an error; nothing partial is exposed.

pub mod io_stream;
pub mod codec;
pub mod crypto;
pub mod pkg;
pub mod dat;
pub mod gi;
pub mod tga;
pub mod dump;
pub mod archive;

pub use archive::{Decoded, ExtractOptions, FileKind};
pub use dat::{CipherHeader, CipherTree, CipherTreeNode, NodeValue};
pub use gi::{Layer, LayeredImage};
pub use io_stream::ByteSource;
pub use pkg::{ArchiveEntry, Folder, PkgArchive};
