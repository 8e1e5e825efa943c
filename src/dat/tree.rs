//! Node stream of a decompressed DAT body.
//!
//! ```text
//! node  = tag (1: 1 = leaf, 2 = block) | name (UTF-16LE, NUL-terminated) | body
//! leaf  = value (UTF-16LE, NUL-terminated)
//! block = [sorted (1)] | count (4) | ([order (4) | order (4)] | node) * count
//! ```
//!
//! The `sorted` byte exists only in dialects with [`Dialect::has_sort_flag`];
//! the two order fields exist only when `sorted` is non-zero and are
//! discarded.  The root is a block body with no tag and no name.

use byteorder::{LittleEndian, ReadBytesExt};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::io::{Cursor, Read};

use super::DatError;
use crate::crypto::Dialect;
use crate::io_stream::ByteSource;

pub const TAG_LEAF: u8 = 1;
pub const TAG_BLOCK: u8 = 2;
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeValue {
    Leaf(String),
    Block(Vec<CipherTreeNode>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherTreeNode {
    pub name:  String,
    pub value: NodeValue,
}

impl CipherTreeNode {
    /// First direct child named `name`.
    pub fn child(&self, name: &str) -> Option<&CipherTreeNode> {
        match &self.value {
            NodeValue::Block(children) => children.iter().find(|c| c.name == name),
            NodeValue::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&str> {
        match &self.value {
            NodeValue::Leaf(s) => Some(s),
            NodeValue::Block(_) => None,
        }
    }
}

// Blocks become JSON objects in stream order (duplicate names are emitted
// as-is), leaves become strings.
impl Serialize for NodeValue {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        match self {
            NodeValue::Leaf(v) => s.serialize_str(v),
            NodeValue::Block(children) => {
                let mut map = s.serialize_map(Some(children.len()))?;
                for c in children {
                    map.serialize_entry(&c.name, &c.value)?;
                }
                map.end()
            }
        }
    }
}

impl Serialize for CipherTreeNode {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        self.value.serialize(s)
    }
}

/// Parse the unnamed root block of `content` under `dialect`.
pub fn parse_root(content: &[u8], dialect: Dialect) -> Result<CipherTreeNode, DatError> {
    let mut cur = Cursor::new(content);
    let children = parse_block(&mut cur, dialect, 0)?;
    Ok(CipherTreeNode { name: String::new(), value: NodeValue::Block(children) })
}

fn parse_node(cur: &mut Cursor<&[u8]>, dialect: Dialect, depth: usize) -> Result<CipherTreeNode, DatError> {
    let at = cur.position();
    let tag = cur.read_u8()?;
    let name = read_string(cur)?;
    let value = match tag {
        TAG_LEAF => NodeValue::Leaf(read_string(cur)?),
        TAG_BLOCK => NodeValue::Block(parse_block(cur, dialect, depth + 1)?),
        tag => return Err(DatError::UnknownNodeTag { tag, offset: at }),
    };
    Ok(CipherTreeNode { name, value })
}

fn parse_block(cur: &mut Cursor<&[u8]>, dialect: Dialect, depth: usize) -> Result<Vec<CipherTreeNode>, DatError> {
    if depth > MAX_DEPTH {
        return Err(DatError::TooDeep);
    }
    let sorted = dialect.has_sort_flag() && cur.read_u8()? != 0;
    let count = cur.read_u32::<LittleEndian>()?;

    // A node is at least 3 bytes, which bounds an honest count.
    let remaining = cur.get_ref().len().saturating_sub(cur.position() as usize);
    let mut children = Vec::with_capacity((count as usize).min(remaining / 3));
    for _ in 0..count {
        if sorted {
            let mut order = [0u8; 8];
            cur.read_exact(&mut order)?;
        }
        children.push(parse_node(cur, dialect, depth)?);
    }
    Ok(children)
}

fn read_string(cur: &mut Cursor<&[u8]>) -> Result<String, DatError> {
    let at = cur.position();
    let units = cur.read_utf16z_units()?;
    String::from_utf16(&units).map_err(|_| DatError::InvalidString { offset: at })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utf16z(s: &str) -> Vec<u8> {
        let mut out = Vec::new();
        for u in s.encode_utf16() {
            out.extend_from_slice(&u.to_le_bytes());
        }
        out.extend_from_slice(&[0, 0]);
        out
    }

    fn leaf(name: &str, value: &str) -> Vec<u8> {
        let mut out = vec![TAG_LEAF];
        out.extend(utf16z(name));
        out.extend(utf16z(value));
        out
    }

    #[test]
    fn unflagged_dialect_nested_blocks() {
        // root: { "cfg": { "w": "640", "h": "480" }, "title": "Hi" }
        let mut c = 2u32.to_le_bytes().to_vec();
        c.push(TAG_BLOCK);
        c.extend(utf16z("cfg"));
        c.extend(2u32.to_le_bytes());
        c.extend(leaf("w", "640"));
        c.extend(leaf("h", "480"));
        c.extend(leaf("title", "Hi"));

        let root = parse_root(&c, Dialect::Rev1).unwrap();
        let cfg = root.child("cfg").unwrap();
        assert_eq!(cfg.child("h").unwrap().as_leaf(), Some("480"));
        assert_eq!(root.child("title").unwrap().as_leaf(), Some("Hi"));
        assert_eq!(
            serde_json::to_string(&root).unwrap(),
            r#"{"cfg":{"w":"640","h":"480"},"title":"Hi"}"#
        );
    }

    #[test]
    fn sorted_block_skips_order_fields() {
        let mut c = vec![1u8];
        c.extend(1u32.to_le_bytes());
        c.extend([0xAA; 8]);
        c.extend(leaf("k", "v"));
        let root = parse_root(&c, Dialect::Rev3).unwrap();
        assert_eq!(root.child("k").unwrap().as_leaf(), Some("v"));
    }

    #[test]
    fn unsorted_flagged_block_has_no_order_fields() {
        let mut c = vec![0u8];
        c.extend(1u32.to_le_bytes());
        c.extend(leaf("k", "v"));
        let root = parse_root(&c, Dialect::Rev4).unwrap();
        assert_eq!(root.child("k").unwrap().as_leaf(), Some("v"));
    }

    #[test]
    fn unknown_tag() {
        let mut c = 1u32.to_le_bytes().to_vec();
        c.push(9);
        c.extend(utf16z("x"));
        assert!(matches!(
            parse_root(&c, Dialect::Rev2),
            Err(DatError::UnknownNodeTag { tag: 9, offset: 4 })
        ));
    }

    #[test]
    fn nesting_past_limit_is_too_deep() {
        // root holds one unnamed block, which holds one unnamed block, ...
        let mut c = 1u32.to_le_bytes().to_vec();
        for _ in 0..MAX_DEPTH + 8 {
            c.push(TAG_BLOCK);
            c.extend([0, 0]);
            c.extend(1u32.to_le_bytes());
        }
        assert!(matches!(parse_root(&c, Dialect::Rev1), Err(DatError::TooDeep)));
    }

    #[test]
    fn nesting_at_limit_parses() {
        let mut c = 1u32.to_le_bytes().to_vec();
        for _ in 0..MAX_DEPTH - 1 {
            c.push(TAG_BLOCK);
            c.extend([0, 0]);
            c.extend(1u32.to_le_bytes());
        }
        c.push(TAG_BLOCK);
        c.extend([0, 0]);
        c.extend(0u32.to_le_bytes());
        assert!(parse_root(&c, Dialect::Rev1).is_ok());
    }

    #[test]
    fn lone_surrogate_name_is_invalid_string() {
        let mut c = 1u32.to_le_bytes().to_vec();
        c.push(TAG_LEAF);
        c.extend([0x00, 0xD8, 0, 0]);
        c.extend(utf16z("v"));
        assert!(matches!(
            parse_root(&c, Dialect::Rev1),
            Err(DatError::InvalidString { offset: 5 })
        ));
    }

    #[test]
    fn oversized_count_hits_eof() {
        let c = u32::MAX.to_le_bytes().to_vec();
        assert!(matches!(parse_root(&c, Dialect::Rev1), Err(DatError::Io(_))));
    }

    #[test]
    fn duplicate_names_keep_stream_order() {
        let mut c = 2u32.to_le_bytes().to_vec();
        c.extend(leaf("a", "1"));
        c.extend(leaf("a", "2"));
        let root = parse_root(&c, Dialect::Rev1).unwrap();
        assert_eq!(serde_json::to_string(&root).unwrap(), r#"{"a":"1","a":"2"}"#);
        assert_eq!(root.child("a").unwrap().as_leaf(), Some("1"));
    }
}
