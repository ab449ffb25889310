//! Offline dataset construction
//!
//! Builds the dataset directory (node store, trie index, note index,
//! metadata) from address records. Ids are assigned depth-first so that a
//! node's children occupy the id range right after it; `sibling_id` then
//! marks the end of each subtree and the store needs no child arrays.

use std::collections::BTreeMap;
use std::path::Path;

use crate::address::AddressLevel;
use crate::error::Result;
use crate::itaiji::Converter;
use crate::storage::{AddressNode, DatasetMetadata, SegmentWriter};
use crate::trie::TrieIndex;

/// One element of an address path handed to the builder.
#[derive(Debug, Clone)]
pub struct AddressEntry {
    pub name: String,
    pub level: i8,
    pub x: f64,
    pub y: f64,
    pub note: String,
}

impl AddressEntry {
    pub fn new(name: &str, level: i8, x: f64, y: f64) -> Self {
        Self {
            name: name.to_string(),
            level,
            x,
            y,
            note: String::new(),
        }
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = note.to_string();
        self
    }
}

struct BuildNode {
    name: String,
    name_index: String,
    x: f64,
    y: f64,
    level: i8,
    priority: u8,
    note: String,
    children: Vec<BuildNode>,
}

/// Builds a dataset directory from address records.
pub struct TreeBuilder {
    converter: Converter,
    roots: Vec<BuildNode>,
    metadata: DatasetMetadata,
}

impl Default for TreeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self {
            converter: Converter::new(),
            roots: Vec::new(),
            metadata: DatasetMetadata::default(),
        }
    }

    pub fn set_metadata(&mut self, metadata: DatasetMetadata) {
        self.metadata = metadata;
    }

    /// Register one address as its root-to-leaf element path.
    ///
    /// Missing intermediate elements are created; existing ones keep the
    /// values they were first registered with. Sibling order is insertion
    /// order.
    pub fn add_address(&mut self, elements: &[AddressEntry], priority: u8) {
        let converter = &self.converter;
        let mut children = &mut self.roots;

        for entry in elements {
            let cur = children;
            let idx = match cur.iter().position(|c| c.name == entry.name) {
                Some(idx) => idx,
                None => {
                    cur.push(BuildNode {
                        name: entry.name.clone(),
                        name_index: converter.standardize(&entry.name, false),
                        x: entry.x,
                        y: entry.y,
                        level: entry.level,
                        priority,
                        note: entry.note.clone(),
                        children: Vec::new(),
                    });
                    cur.len() - 1
                }
            };
            children = &mut cur[idx].children;
        }
    }

    /// Write every dataset file into the directory.
    pub fn write(self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;

        // Depth-first flattening; record position is the node id
        let mut nodes: Vec<AddressNode> = vec![AddressNode::root(0)];
        for root in &self.roots {
            Self::flatten(root, AddressNode::ROOT_NODE_ID, &mut nodes);
        }
        let count = nodes.len() as u32;
        nodes[0].sibling_id = count;

        let writer = SegmentWriter::new(dir);
        writer.write_nodes(&nodes)?;
        writer.write_metadata(&self.metadata)?;

        // Trie keys: for every node down to the aza level, register the
        // concatenated standardized path from each ancestor start, so
        // queries may omit leading elements ("多摩市落合" without 東京都).
        let mut words: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        let mut notes: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        let mut path: Vec<(String, u32)> = Vec::new();

        for node in &nodes[1..] {
            while let Some(&(_, last_id)) = path.last() {
                if nodes[last_id as usize].sibling_id <= node.id {
                    path.pop();
                } else {
                    break;
                }
            }
            path.push((node.name_index.clone(), node.id));

            if node.level <= AddressLevel::AZA && node.name != AddressNode::NONAME {
                for start in 0..path.len() {
                    // Unnamed placeholders contribute no notation
                    let key: String = path[start..]
                        .iter()
                        .filter(|(n, _)| n != AddressNode::NONAME)
                        .map(|(n, _)| n.as_str())
                        .collect();
                    if key.is_empty() {
                        continue;
                    }
                    for variant in self.converter.standardized_candidates(&key) {
                        words.entry(variant).or_default().push(node.id);
                    }
                }
            }

            if node.level <= AddressLevel::AZA {
                for (k, v) in node.notes() {
                    // Cross-references are followed, not searched
                    if k == "ref" || k == "geoshape_city_id" || k.is_empty() {
                        continue;
                    }
                    notes.entry(format!("{}:{}", k, v)).or_default().push(node.id);
                }
            }
        }

        TrieIndex::build(
            &words,
            &dir.join("address.trie"),
            &dir.join("trie_nodes.bin"),
        )?;
        TrieIndex::build(
            &notes,
            &dir.join("note.trie"),
            &dir.join("note_nodes.bin"),
        )?;

        tracing::info!(
            "Built dataset at {:?}: {} nodes, {} notations",
            dir,
            count,
            words.len()
        );
        Ok(())
    }

    fn flatten(node: &BuildNode, parent_id: u32, out: &mut Vec<AddressNode>) {
        let id = out.len() as u32;
        out.push(AddressNode {
            id,
            name: node.name.clone(),
            name_index: node.name_index.clone(),
            x: node.x,
            y: node.y,
            level: node.level,
            priority: node.priority,
            note: node.note.clone(),
            parent_id,
            sibling_id: 0, // patched below
        });
        for child in &node.children {
            Self::flatten(child, id, out);
        }
        out[id as usize].sibling_id = out.len() as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NodesSegment;
    use tempfile::TempDir;

    #[test]
    fn test_depth_first_layout() {
        let dir = TempDir::new().unwrap();
        let mut builder = TreeBuilder::new();
        builder.add_address(
            &[
                AddressEntry::new("東京都", AddressLevel::PREF, 139.69, 35.69),
                AddressEntry::new("新宿区", AddressLevel::CITY, 139.70, 35.69),
                AddressEntry::new("西新宿", AddressLevel::OAZA, 139.69, 35.69),
            ],
            1,
        );
        builder.add_address(
            &[
                AddressEntry::new("東京都", AddressLevel::PREF, 139.69, 35.69),
                AddressEntry::new("多摩市", AddressLevel::CITY, 139.44, 35.64),
            ],
            1,
        );
        builder.write(dir.path()).unwrap();

        let segment = NodesSegment::open(&dir.path().join("nodes.bin")).unwrap();
        assert_eq!(segment.count(), 5);

        let root = segment.root().unwrap();
        assert_eq!(root.sibling_id, 5);

        let pref = segment.get(1).unwrap();
        assert_eq!(pref.name, "東京都");
        assert_eq!(pref.sibling_id, 5);

        // 新宿区 subtree covers its oaza; 多摩市 follows it
        let city = segment.get(2).unwrap();
        assert_eq!(city.name, "新宿区");
        assert_eq!(city.sibling_id, 4);
        let tama = segment.get(4).unwrap();
        assert_eq!(tama.name, "多摩市");
        assert_eq!(tama.parent_id, 1);

        let children: Vec<_> = segment.iter_children(&pref).map(|n| n.name).collect();
        assert_eq!(children, vec!["新宿区", "多摩市"]);
    }

    #[test]
    fn test_trie_registration() {
        let dir = TempDir::new().unwrap();
        let mut builder = TreeBuilder::new();
        builder.add_address(
            &[
                AddressEntry::new("東京都", AddressLevel::PREF, 139.69, 35.69),
                AddressEntry::new("新宿区", AddressLevel::CITY, 139.70, 35.69)
                    .with_note("jisx0402:13104"),
                AddressEntry::new("西新宿", AddressLevel::OAZA, 139.69, 35.69),
            ],
            1,
        );
        builder.write(dir.path()).unwrap();

        let trie = TrieIndex::open(
            &dir.path().join("address.trie"),
            &dir.path().join("trie_nodes.bin"),
        )
        .unwrap();

        // Full and suffix notations are registered
        assert!(trie.get("東京都新宿区西新宿").is_some());
        assert!(trie.get("新宿区西新宿").is_some());
        assert!(trie.get("西新宿").is_some());
        assert_eq!(trie.get("新宿区").unwrap(), &[2u32]);

        let notes = TrieIndex::open(
            &dir.path().join("note.trie"),
            &dir.path().join("note_nodes.bin"),
        )
        .unwrap();
        assert_eq!(notes.get("jisx0402:13104").unwrap(), &[2u32]);
    }
}
