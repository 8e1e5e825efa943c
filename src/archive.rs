//! High-level entry point: pick a decoder by file extension, decode, and
//! extract.
//!
//! ```no_run
//! use pkgdat::archive::{self, Decoded, ExtractOptions};
//!
//! match archive::open("data.pkg")? {
//!     Decoded::Pkg(pkg) => {
//!         archive::extract_all(&pkg, "out", &ExtractOptions::default())?;
//!     }
//!     Decoded::Dat(tree) => println!("{:?}", tree.get("config/title")),
//!     Decoded::Gi(img) => println!("{}x{}", img.width, img.height),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Write};
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};

use crate::dat::{CipherTree, DatError};
use crate::dump::Dump;
use crate::gi::{GiError, LayeredImage};
use crate::io_stream::ByteSource;
use crate::pkg::{EntryType, PkgArchive, PkgError};
use crate::tga::{write_tga, TgaError};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),
    #[error("PKG: {0}")]
    Pkg(#[from] PkgError),
    #[error("DAT: {0}")]
    Dat(#[from] DatError),
    #[error("GI: {0}")]
    Gi(#[from] GiError),
    #[error("TGA: {0}")]
    Tga(#[from] TgaError),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsafe entry name: {0:?}")]
    UnsafeName(String),
    #[error("Refusing to overwrite {0}")]
    Exists(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── FileKind ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Pkg,
    Dat,
    Gi,
}

impl FileKind {
    /// Detect by extension, case-insensitively.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let ext = path.as_ref()
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "pkg" => Ok(FileKind::Pkg),
            "dat" => Ok(FileKind::Dat),
            "gi"  => Ok(FileKind::Gi),
            _     => Err(Error::UnsupportedExtension(ext)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FileKind::Pkg => "pkg",
            FileKind::Dat => "dat",
            FileKind::Gi  => "gi",
        }
    }
}

// ── Decoded ──────────────────────────────────────────────────────────────────

/// A fully decoded file of any supported kind.
#[derive(Debug, Clone)]
pub enum Decoded {
    Pkg(PkgArchive),
    Dat(CipherTree),
    Gi(LayeredImage),
}

impl Decoded {
    pub fn kind(&self) -> FileKind {
        match self {
            Decoded::Pkg(_) => FileKind::Pkg,
            Decoded::Dat(_) => FileKind::Dat,
            Decoded::Gi(_)  => FileKind::Gi,
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, Error> {
        Ok(match self {
            Decoded::Pkg(p) => p.to_json()?,
            Decoded::Dat(d) => d.to_json()?,
            Decoded::Gi(g)  => g.to_json()?,
        })
    }
}

/// Decode `src` as `kind`.
pub fn decode<S: ByteSource + ?Sized>(kind: FileKind, src: &mut S) -> Result<Decoded, Error> {
    Ok(match kind {
        FileKind::Pkg => Decoded::Pkg(PkgArchive::decode(src)?),
        FileKind::Dat => Decoded::Dat(CipherTree::decode(src)?),
        FileKind::Gi  => Decoded::Gi(LayeredImage::decode(src)?),
    })
}

/// Open `path`, detect its kind from the extension and decode it.
pub fn open<P: AsRef<Path>>(path: P) -> Result<Decoded, Error> {
    let path = path.as_ref();
    let kind = FileKind::from_path(path)?;
    debug!(path = %path.display(), kind = kind.name(), "decoding");
    let mut src = BufReader::new(File::open(path)?);
    decode(kind, &mut src)
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// Configuration for [`extract_all`].
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Replace files that already exist under the destination.
    pub overwrite: bool,
}

/// Write every live entry of `pkg` under `dest`, named by display name.
///
/// Files written before a failure stay on disk.
pub fn extract_all<P: AsRef<Path>>(pkg: &PkgArchive, dest: P, opts: &ExtractOptions) -> Result<usize, Error> {
    let dest = dest.as_ref();
    fs::create_dir_all(dest)?;
    let mut written = 0usize;
    for (rel, item) in pkg.root.walk() {
        check_relative(&rel)?;
        let target = dest.join(&rel);
        if item.entry.entry_type == EntryType::Folder {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = if opts.overwrite {
            File::create(&target)?
        } else {
            OpenOptions::new().write(true).create_new(true).open(&target).map_err(|e| {
                if e.kind() == io::ErrorKind::AlreadyExists { Error::Exists(target.clone()) } else { e.into() }
            })?
        };
        file.write_all(item.payload.as_deref().unwrap_or(&[]))?;
        written += 1;
    }
    info!(files = written, dest = %dest.display(), "extracted");
    Ok(written)
}

/// Entry names come from the archive; only plain relative components are
/// allowed through.
fn check_relative(rel: &Path) -> Result<(), Error> {
    let ok = rel.components().all(|c| matches!(c, Component::Normal(_)));
    if ok && rel.components().next().is_some() {
        Ok(())
    } else {
        Err(Error::UnsafeName(rel.display().to_string()))
    }
}

/// Write a decoded image's canvas as TGA.
pub fn write_image<P: AsRef<Path>>(img: &LayeredImage, path: P) -> Result<(), Error> {
    let file = io::BufWriter::new(File::create(path)?);
    write_tga(file, img.width, img.height, img.pixels())?;
    Ok(())
}
