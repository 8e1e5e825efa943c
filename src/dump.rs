//! Compact JSON views of decoded files.
//!
//! - PKG: the folder tree with normalized record fields; payloads appear
//!   only as `payload_len`.
//! - DAT: the node tree alone, blocks as objects in stream order.
//! - GI: header, layer bounds and payload sizes; no pixels.

use serde::Serialize;

use crate::dat::CipherTree;
use crate::gi::LayeredImage;
use crate::pkg::PkgArchive;

pub trait Dump {
    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error>;
}

impl Dump for PkgArchive {
    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Dump for CipherTree {
    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.root)
    }
}

impl Dump for LayeredImage {
    fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        #[derive(Serialize)]
        struct View<'a> {
            width:  u32,
            height: u32,
            header: &'a crate::gi::GiHeader,
            layers: &'a [crate::gi::Layer],
        }
        serde_json::to_vec(&View {
            width:  self.width,
            height: self.height,
            header: &self.header,
            layers: &self.layers,
        })
    }
}
