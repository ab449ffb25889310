//! Segment writer - dataset build output

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::storage::segment::SegmentHeader;
use crate::storage::string_table::StringTable;
use crate::storage::AddressNode;

/// Writer producing the node-store file of a dataset directory.
pub struct SegmentWriter {
    path: PathBuf,
}

impl SegmentWriter {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Write the node arena to nodes.bin.
    ///
    /// Records must be ordered by id (depth-first build order); the record
    /// position is the id. The string table is appended after the records
    /// and the header is patched with its offset afterwards.
    pub fn write_nodes(&self, nodes: &[AddressNode]) -> Result<()> {
        let nodes_path = self.path.join("nodes.bin");
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&nodes_path)?;

        let mut writer = BufWriter::new(file);

        let mut string_table = StringTable::new();

        // Header with a zero string-table offset; patched after the
        // records and table are written.
        let mut header = SegmentHeader::new(nodes.len() as u64, 0);
        self.write_header(&mut writer, &header)?;

        for node in nodes {
            let name_offset = string_table.intern(&node.name);
            let name_index_offset = string_table.intern(&node.name_index);
            let note_offset = string_table.intern(&node.note);

            writer.write_all(&name_offset.to_le_bytes())?;
            writer.write_all(&name_index_offset.to_le_bytes())?;
            writer.write_all(&note_offset.to_le_bytes())?;
            writer.write_all(&node.x.to_le_bytes())?;
            writer.write_all(&node.y.to_le_bytes())?;
            writer.write_all(&[node.level as u8])?;
            writer.write_all(&[node.priority])?;
            writer.write_all(&node.parent_id.to_le_bytes())?;
            writer.write_all(&node.sibling_id.to_le_bytes())?;
        }

        let string_table_offset = writer.stream_position()?;
        string_table.write_to(&mut writer)?;

        header.string_table_offset = string_table_offset;
        writer.seek(std::io::SeekFrom::Start(0))?;
        self.write_header(&mut writer, &header)?;

        writer.flush()?;

        tracing::info!(
            "Written {} nodes to {:?} with string table at offset {}",
            nodes.len(),
            nodes_path,
            string_table_offset
        );
        Ok(())
    }

    fn write_header<W: Write>(&self, writer: &mut W, header: &SegmentHeader) -> Result<()> {
        writer.write_all(&header.magic)?;
        writer.write_all(&header.version.to_le_bytes())?;
        writer.write_all(&header.node_count.to_le_bytes())?;
        writer.write_all(&header.string_table_offset.to_le_bytes())?;
        Ok(())
    }

    /// Write the dataset metadata (title, source url, version).
    pub fn write_metadata(&self, metadata: &DatasetMetadata) -> Result<()> {
        let meta_path = self.path.join("metadata.json");
        let file = File::create(meta_path)?;
        serde_json::to_writer_pretty(file, metadata)?;
        Ok(())
    }
}

/// Dataset metadata
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DatasetMetadata {
    pub title: String,
    pub url: String,
    pub version: String,
}

impl Default for DatasetMetadata {
    fn default() -> Self {
        Self {
            title: "address dataset".to_string(),
            url: String::new(),
            version: "(no version)".to_string(),
        }
    }
}

impl DatasetMetadata {
    /// Load metadata from a dataset directory, falling back to defaults
    /// when the file is absent.
    pub fn load(dir: &Path) -> Self {
        let meta_path = dir.join("metadata.json");
        match File::open(meta_path) {
            Ok(file) => serde_json::from_reader(file).unwrap_or_default(),
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::segment::NodesSegment;
    use tempfile::TempDir;

    fn node(
        id: u32,
        name: &str,
        name_index: &str,
        level: i8,
        parent_id: u32,
        sibling_id: u32,
    ) -> AddressNode {
        AddressNode {
            id,
            name: name.to_string(),
            name_index: name_index.to_string(),
            x: 139.0 + id as f64 * 0.01,
            y: 35.0 + id as f64 * 0.01,
            level,
            priority: 1,
            note: String::new(),
            parent_id,
            sibling_id,
        }
    }

    #[test]
    fn test_write_and_read_nodes() {
        let dir = TempDir::new().unwrap();
        let writer = SegmentWriter::new(dir.path());

        let nodes = vec![
            AddressNode::root(3),
            node(1, "東京都", "東京都", 1, 0, 3),
            node(2, "新宿区", "新宿区", 3, 1, 3),
        ];

        writer.write_nodes(&nodes).unwrap();

        let segment = NodesSegment::open(&dir.path().join("nodes.bin")).unwrap();

        assert_eq!(segment.count(), 3);
        let pref = segment.get(1).unwrap();
        assert_eq!(pref.name, "東京都");
        assert_eq!(pref.level, 1);
        assert_eq!(pref.sibling_id, 3);

        let city = segment.get(2).unwrap();
        assert_eq!(city.name, "新宿区");
        assert_eq!(city.parent_id, 1);

        // Unknown id surfaces as NodeNotFound
        assert!(segment.get(3).is_err());

        // Sibling-chain child iteration
        let root = segment.root().unwrap();
        let children: Vec<_> = segment.iter_children(&root).collect();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name, "東京都");

        let grandchildren: Vec<_> = segment.iter_children(&children[0]).collect();
        assert_eq!(grandchildren.len(), 1);
        assert_eq!(grandchildren[0].name, "新宿区");

        // Parent chain reaches the root
        assert_eq!(
            segment.fullname(&grandchildren[0]).unwrap(),
            vec!["東京都".to_string(), "新宿区".to_string()]
        );
    }

    #[test]
    fn test_metadata_roundtrip() {
        let dir = TempDir::new().unwrap();
        let writer = SegmentWriter::new(dir.path());
        let meta = DatasetMetadata {
            title: "test dataset".to_string(),
            url: "https://example.com/dataset".to_string(),
            version: "20260101".to_string(),
        };
        writer.write_metadata(&meta).unwrap();

        let loaded = DatasetMetadata::load(dir.path());
        assert_eq!(loaded.title, "test dataset");
        assert_eq!(loaded.version, "20260101");
    }
}
