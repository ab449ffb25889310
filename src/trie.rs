//! Compressed prefix index over standardized address notations
//!
//! Maps each registered notation to the ids of the nodes it leads to.
//! Some notations correspond to multiple nodes ("中央区中央" exists in
//! both 千葉市 and 相模原市), so keys map to postings lists rather than
//! single ids. The index is advisory: it seeds the matching engine with
//! candidate heads, which are then validated by descending the real tree.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use fst::raw::Output;
use fst::{Map, MapBuilder};
use memmap2::Mmap;

use crate::error::{GeocodeError, Result};

/// A registered prefix of a query, with the nodes it maps to.
#[derive(Debug, Clone)]
pub struct PrefixMatch {
    /// The matched prefix (standardized notation).
    pub key: String,
    /// Length of the prefix in chars.
    pub nchars: usize,
    /// Ids of the nodes registered under this notation.
    pub node_ids: Vec<u32>,
}

/// The on-disk trie: an fst map from notation bytes to postings indices,
/// plus the postings lists themselves.
pub struct TrieIndex {
    map: Map<Mmap>,
    postings: Vec<Vec<u32>>,
}

impl TrieIndex {
    /// Open an index from its two files.
    pub fn open(trie_path: &Path, postings_path: &Path) -> Result<Self> {
        let file = File::open(trie_path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let map = Map::new(mmap)?;

        let postings_file = File::open(postings_path)?;
        let postings: Vec<Vec<u32>> = bincode::deserialize_from(postings_file)?;

        if map.len() != postings.len() {
            return Err(GeocodeError::InvalidFormat(format!(
                "Trie/postings mismatch: {} keys, {} postings",
                map.len(),
                postings.len()
            )));
        }

        tracing::info!("Opened trie index {:?}: {} keys", trie_path, map.len());

        Ok(Self { map, postings })
    }

    /// Build the index files from notation -> node-id postings.
    pub fn build(
        words: &BTreeMap<String, Vec<u32>>,
        trie_path: &Path,
        postings_path: &Path,
    ) -> Result<()> {
        let writer = BufWriter::new(File::create(trie_path)?);
        let mut builder = MapBuilder::new(writer)?;
        let mut postings: Vec<Vec<u32>> = Vec::with_capacity(words.len());

        // BTreeMap iteration is sorted, as the fst builder requires
        for (word, node_ids) in words {
            builder.insert(word.as_bytes(), postings.len() as u64)?;
            let mut ids = node_ids.clone();
            ids.sort_unstable();
            ids.dedup();
            postings.push(ids);
        }
        builder.finish()?;

        let postings_file = BufWriter::new(File::create(postings_path)?);
        bincode::serialize_into(postings_file, &postings)?;

        tracing::info!("Written trie index {:?}: {} keys", trie_path, words.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// The postings of an exactly matching key.
    pub fn get(&self, key: &str) -> Option<&[u32]> {
        self.map
            .get(key.as_bytes())
            .map(|idx| self.postings[idx as usize].as_slice())
    }

    /// All registered prefixes of the query, shortest first.
    ///
    /// Walks the fst byte by byte; every final state passed on the way
    /// is a registered notation.
    pub fn common_prefixes(&self, query: &str) -> Vec<PrefixMatch> {
        let fst = self.map.as_fst();
        let mut node = fst.root();
        let mut out = Output::zero();
        let mut results = Vec::new();

        let bytes = query.as_bytes();
        for (i, &b) in bytes.iter().enumerate() {
            match node.find_input(b) {
                None => break,
                Some(idx) => {
                    let t = node.transition(idx);
                    out = out.cat(t.out);
                    node = fst.node(t.addr);
                    if node.is_final() {
                        let val = out.cat(node.final_output()).value() as usize;
                        let key = &query[..i + 1];
                        results.push(PrefixMatch {
                            key: key.to_string(),
                            nchars: key.chars().count(),
                            node_ids: self.postings[val].clone(),
                        });
                    }
                }
            }
        }

        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build_index(words: &[(&str, Vec<u32>)]) -> (TempDir, TrieIndex) {
        let dir = TempDir::new().unwrap();
        let trie_path = dir.path().join("address.trie");
        let postings_path = dir.path().join("trie_nodes.bin");

        let map: BTreeMap<String, Vec<u32>> = words
            .iter()
            .map(|(w, ids)| (w.to_string(), ids.clone()))
            .collect();
        TrieIndex::build(&map, &trie_path, &postings_path).unwrap();

        let index = TrieIndex::open(&trie_path, &postings_path).unwrap();
        (dir, index)
    }

    #[test]
    fn test_common_prefixes() {
        let (_dir, index) = build_index(&[
            ("東", vec![10]),
            ("東京都", vec![1]),
            ("東京都新宿区", vec![2]),
            ("新宿区", vec![2]),
        ]);

        let matches = index.common_prefixes("東京都新宿区西新宿2.丁目");
        let keys: Vec<&str> = matches.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["東", "東京都", "東京都新宿区"]);
        assert_eq!(matches[2].node_ids, vec![2]);
        assert_eq!(matches[1].nchars, 3);
    }

    #[test]
    fn test_exact_get() {
        let (_dir, index) = build_index(&[
            ("postcode:1600023", vec![5, 7]),
            ("jisx0402:13104", vec![2]),
        ]);

        assert_eq!(index.get("postcode:1600023"), Some(&[5u32, 7][..]));
        assert_eq!(index.get("postcode:9999999"), None);
    }

    #[test]
    fn test_no_match() {
        let (_dir, index) = build_index(&[("東京都", vec![1])]);
        assert!(index.common_prefixes("大阪府").is_empty());
    }
}
