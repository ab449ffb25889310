//! Immutable node-store segment (nodes.bin)

use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use crate::error::{GeocodeError, Result};
use crate::storage::string_table::StringTable;
use crate::storage::AddressNode;

/// Magic number for format validation
pub const MAGIC: [u8; 4] = *b"ANDB"; // Address Node DataBase

/// Format version
pub const FORMAT_VERSION: u16 = 1;

/// Header size on disk (22 bytes, no padding)
pub const HEADER_SIZE_ON_DISK: usize = 4 + 2 + 8 + 8;

/// Fixed record size: name/name_index/note offsets (3 x u32),
/// x/y (2 x f64), level (i8), priority (u8), parent/sibling ids (2 x u32).
pub const RECORD_SIZE: usize = 12 + 16 + 2 + 8;

/// Segment header
#[derive(Debug, Clone, Copy)]
pub struct SegmentHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub node_count: u64,
    pub string_table_offset: u64,
}

impl SegmentHeader {
    pub fn new(node_count: u64, string_table_offset: u64) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            node_count,
            string_table_offset,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(GeocodeError::InvalidFormat(format!(
                "Bad magic number: {:?}",
                self.magic
            )));
        }
        let version = self.version;
        if version != FORMAT_VERSION {
            return Err(GeocodeError::InvalidFormat(format!(
                "Unsupported format version: {}",
                version
            )));
        }
        Ok(())
    }
}

/// Immutable, memory-mapped arena of fixed-size address-node records.
///
/// The record at arena position `i` is the node with id `i`; lookups are
/// O(1) and all reads take `&self`, so one open segment can be shared by
/// any number of reader threads.
pub struct NodesSegment {
    mmap: Mmap,
    node_count: usize,
    records_offset: usize,
    string_table: StringTable,
}

impl NodesSegment {
    /// Open an existing segment.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_SIZE_ON_DISK {
            return Err(GeocodeError::InvalidFormat("File too small".into()));
        }

        // Manually parse the header (22 bytes on disk)
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&mmap[0..4]);
        let version = u16::from_le_bytes([mmap[4], mmap[5]]);
        let node_count = u64::from_le_bytes(mmap[6..14].try_into().unwrap());
        let string_table_offset = u64::from_le_bytes(mmap[14..22].try_into().unwrap());

        let header = SegmentHeader {
            magic,
            version,
            node_count,
            string_table_offset,
        };
        header.validate()?;

        let node_count = header.node_count as usize;
        let records_offset = HEADER_SIZE_ON_DISK;
        let records_end = records_offset + node_count * RECORD_SIZE;

        let st_offset = header.string_table_offset as usize;
        if st_offset < records_end || st_offset > mmap.len() {
            return Err(GeocodeError::InvalidFormat(
                "String table offset out of range".into(),
            ));
        }

        let string_table = StringTable::load_from_slice(&mmap[st_offset..])?;

        tracing::info!("Opened node store {:?}: {} nodes", path, node_count);

        Ok(Self {
            mmap,
            node_count,
            records_offset,
            string_table,
        })
    }

    pub fn count(&self) -> usize {
        self.node_count
    }

    // Helpers: read scalars from potentially unaligned record bytes
    fn read_u32_at(&self, offset: usize) -> u32 {
        let bytes: [u8; 4] = self.mmap[offset..offset + 4].try_into().unwrap();
        u32::from_le_bytes(bytes)
    }

    fn read_f64_at(&self, offset: usize) -> f64 {
        let bytes: [u8; 8] = self.mmap[offset..offset + 8].try_into().unwrap();
        f64::from_le_bytes(bytes)
    }

    fn string_at(&self, offset: u32) -> Result<&str> {
        self.string_table.get(offset).ok_or_else(|| {
            GeocodeError::InvalidFormat(format!("Dangling string offset {}", offset))
        })
    }

    /// Get the node with the given id.
    pub fn get(&self, id: u32) -> Result<AddressNode> {
        if id as usize >= self.node_count {
            return Err(GeocodeError::NodeNotFound(id));
        }

        let base = self.records_offset + id as usize * RECORD_SIZE;
        let name_offset = self.read_u32_at(base);
        let name_index_offset = self.read_u32_at(base + 4);
        let note_offset = self.read_u32_at(base + 8);
        let x = self.read_f64_at(base + 12);
        let y = self.read_f64_at(base + 20);
        let level = self.mmap[base + 28] as i8;
        let priority = self.mmap[base + 29];
        let parent_id = self.read_u32_at(base + 30);
        let sibling_id = self.read_u32_at(base + 34);

        Ok(AddressNode {
            id,
            name: self.string_at(name_offset)?.to_string(),
            name_index: self.string_at(name_index_offset)?.to_string(),
            x,
            y,
            level,
            priority,
            note: self.string_at(note_offset)?.to_string(),
            parent_id,
            sibling_id,
        })
    }

    /// Get the node with the given id, or None for an unknown id.
    pub fn try_get(&self, id: u32) -> Option<AddressNode> {
        match self.get(id) {
            Ok(node) => Some(node),
            Err(GeocodeError::NodeNotFound(_)) => None,
            // Corrupt records abort the walk at the caller
            Err(_) => None,
        }
    }

    /// Get the root node.
    pub fn root(&self) -> Result<AddressNode> {
        self.get(AddressNode::ROOT_NODE_ID)
    }

    /// The parent of a node; None for the root.
    pub fn parent_of(&self, node: &AddressNode) -> Result<Option<AddressNode>> {
        if node.id == AddressNode::ROOT_NODE_ID {
            return Ok(None);
        }
        Ok(Some(self.get(node.parent_id)?))
    }

    /// Iterate the children of a node by walking the sibling chain.
    ///
    /// The first child sits at `parent.id + 1` (depth-first build layout);
    /// each child's `sibling_id` leads to the next one.
    pub fn iter_children<'a>(
        &'a self,
        parent: &AddressNode,
    ) -> impl Iterator<Item = AddressNode> + 'a {
        let parent_id = parent.id;
        let end = parent.sibling_id;
        let mut pos = parent_id + 1;

        std::iter::from_fn(move || {
            while pos < end {
                match self.try_get(pos) {
                    Some(node) if node.parent_id == parent_id => {
                        pos = node.sibling_id;
                        return Some(node);
                    }
                    _ => return None,
                }
            }
            None
        })
    }

    /// Names of the ancestors of a node, root-first, including the node.
    pub fn fullname(&self, node: &AddressNode) -> Result<Vec<String>> {
        let mut names = vec![node.name.clone()];
        let mut cur = node.clone();
        // The parent chain terminates at the root in at most 8 steps
        for _ in 0..10 {
            match self.parent_of(&cur)? {
                Some(parent) => {
                    if parent.id == AddressNode::ROOT_NODE_ID {
                        break;
                    }
                    names.push(parent.name.clone());
                    cur = parent;
                }
                None => break,
            }
        }
        names.reverse();
        names.retain(|n| n != AddressNode::NONAME);
        Ok(names)
    }
}
