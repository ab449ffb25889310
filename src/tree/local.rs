//! The address tree over a local dataset directory

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{GeocodeError, Result};
use crate::itaiji::Converter;
use crate::result::{MatchResult, NodeDetail, ReverseCandidate};
use crate::reverse::ReverseIndex;
use crate::search::Matcher;
use crate::storage::{AddressNode, DatasetMetadata, NodesSegment};
use crate::tree::{AddressTree, SearchConfig};
use crate::trie::TrieIndex;

/// Local provider: composes the node store, trie index and spatial index
/// of one dataset directory.
///
/// The store and tries are opened read-only and shared freely across
/// reader threads; the reverse index is built once, under a mutex, on the
/// first reverse call.
pub struct LocalTree {
    db_dir: PathBuf,
    store: NodesSegment,
    trie: TrieIndex,
    note_index: TrieIndex,
    converter: Converter,
    config: SearchConfig,
    metadata: DatasetMetadata,
    reverse_index: Mutex<Option<Arc<ReverseIndex>>>,
}

impl LocalTree {
    /// Open a dataset directory.
    pub fn open(db_dir: &Path) -> Result<Self> {
        if !db_dir.is_dir() {
            return Err(GeocodeError::Config(format!(
                "Directory '{}' does not exist",
                db_dir.display()
            )));
        }

        let store = NodesSegment::open(&db_dir.join("nodes.bin"))?;
        let trie = TrieIndex::open(
            &db_dir.join("address.trie"),
            &db_dir.join("trie_nodes.bin"),
        )?;
        let note_index = TrieIndex::open(
            &db_dir.join("note.trie"),
            &db_dir.join("note_nodes.bin"),
        )?;
        let metadata = DatasetMetadata::load(db_dir);

        tracing::info!(
            "Opened dataset at {:?}: {} nodes, version {}",
            db_dir,
            store.count(),
            metadata.version
        );

        Ok(Self {
            db_dir: db_dir.to_path_buf(),
            store,
            trie,
            note_index,
            converter: Converter::new(),
            config: SearchConfig::from_env(),
            metadata,
            reverse_index: Mutex::new(None),
        })
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &NodesSegment {
        &self.store
    }

    pub fn metadata(&self) -> &DatasetMetadata {
        &self.metadata
    }

    /// Check each target area against the dataset: a JIS code prefix or
    /// the name of a registered node. Reported before any search runs.
    fn validate_target_area(&self, areas: &[String]) -> Result<()> {
        for area in areas {
            if area.len() >= 2 && area.chars().take(2).all(|c| c.is_ascii_digit()) {
                continue;
            }

            let std = self.converter.standardize(area, false);
            let known = self
                .trie
                .get(&std)
                .map_or(false, |ids| {
                    ids.iter().any(|&id| {
                        self.store
                            .try_get(id)
                            .map_or(false, |node| node.name == *area)
                    })
                });
            if !known {
                return Err(GeocodeError::Config(format!(
                    "'{}' is not a valid value for target_area",
                    area
                )));
            }
        }
        Ok(())
    }

    /// Forward search with an explicit configuration (used by the server,
    /// which carries the configuration per request).
    pub fn search_node_with(
        &self,
        query: &str,
        config: &SearchConfig,
    ) -> Result<Vec<MatchResult>> {
        self.validate_target_area(&config.target_area)?;

        let mut matcher = Matcher::new(&self.store, &self.trie, &self.converter, config.clone());
        let mut candidates = matcher.search_by_trie(query)?;
        candidates.sort_by(|a, b| b.matched.chars().count().cmp(&a.matched.chars().count()));

        let mut memo: HashMap<String, String> = HashMap::new();
        let mut results: Vec<MatchResult> = Vec::new();
        for candidate in candidates {
            let matched = match memo.get(&candidate.matched) {
                Some(m) => m.clone(),
                None => {
                    let recovered =
                        self.recover_matched(query, &candidate.matched, &candidate.node.name);
                    memo.insert(candidate.matched.clone(), recovered.clone());
                    recovered
                }
            };
            results.push(MatchResult {
                node: candidate.node,
                matched,
            });
        }

        // Longest match first, then ascending priority; the sort is
        // stable so dataset insertion order breaks remaining ties.
        results.sort_by_key(|r| {
            -(r.matched.chars().count() as i64) * 100 + i64::from(r.node.priority)
        });

        Ok(results)
    }

    /// Recover the substring of the original query that corresponds to a
    /// matched standardized prefix.
    fn recover_matched(&self, query: &str, matched_std: &str, node_name: &str) -> String {
        let qchars: Vec<char> = query.chars().collect();
        let l_result = matched_std.chars().count();

        let mut pos = l_result.min(qchars.len()) as isize;
        let mut history = vec![pos];
        let mut recovered: Option<String> = None;

        loop {
            let substr: String = qchars[..pos as usize].iter().collect();
            let standardized = self.converter.standardize(&substr, true);
            let l_standardized = standardized.chars().count();

            if l_standardized == l_result {
                recovered = Some(substr);
                break;
            }

            if l_standardized <= l_result {
                pos += 1;
            } else {
                pos -= 1;
            }

            if pos < 0 || pos > qchars.len() as isize {
                break;
            }

            if history.contains(&pos) {
                tracing::warn!(
                    "Can't de-standardize matched '{}' in '{}'",
                    matched_std,
                    query
                );
                break;
            }
            history.push(pos);
        }

        let pos = pos.max(0) as usize;
        if pos < qchars.len() && !node_name.is_empty() {
            let last_name_char = node_name.chars().last();
            let extended: String = qchars[..pos + 1].iter().collect();
            if Some(qchars[pos]) == last_name_char
                && self.converter.standardize(&extended, true).chars().count() == l_result
            {
                // The last letter of the node name was dropped by
                // normalization but spelled in the query; include it.
                recovered = Some(extended);
            } else if qchars.len() >= 2 {
                let tail: String = qchars[qchars.len() - 2..].iter().collect();
                if tail == "通り" || tail == "通リ" {
                    recovered = Some(extended);
                }
            }
        }

        recovered.unwrap_or_else(|| matched_std.to_string())
    }

    fn reverse_index(&self) -> Result<Arc<ReverseIndex>> {
        // First build is serialized; concurrent callers block here and
        // observe the same build.
        let mut guard = match self.reverse_index.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(index) = guard.as_ref() {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(ReverseIndex::open_or_build(&self.db_dir, &self.store)?);
        *guard = Some(Arc::clone(&index));
        Ok(index)
    }
}

impl AddressTree for LocalTree {
    fn get_node_by_id(&self, node_id: u32) -> Result<AddressNode> {
        self.store.get(node_id)
    }

    fn count_records(&self) -> Result<usize> {
        Ok(self.store.count())
    }

    fn get_fullname(&self, node: &AddressNode) -> Result<Vec<String>> {
        self.store.fullname(node)
    }

    fn search_nodes_by_codes(&self, category: &str, value: &str) -> Result<Vec<AddressNode>> {
        let key = format!("{}:{}", category, value);
        let ids = match self.note_index.get(&key) {
            Some(ids) => ids.to_vec(),
            None => return Ok(Vec::new()),
        };
        ids.into_iter().map(|id| self.store.get(id)).collect()
    }

    fn search_node(&self, query: &str) -> Result<Vec<MatchResult>> {
        let config = self.config.clone();
        self.search_node_with(query, &config)
    }

    fn reverse(&self, x: f64, y: f64, level: Option<i8>) -> Result<Vec<ReverseCandidate>> {
        if let Some(level) = level {
            if !(1..=8).contains(&level) {
                return Err(GeocodeError::Config(format!(
                    "Invalid address level: {}",
                    level
                )));
            }
        }

        let index = self.reverse_index()?;
        let node_dists = index.nearest(&self.store, x, y, level)?;

        let mut results = Vec::with_capacity(node_dists.len());
        for entry in node_dists {
            let fullname = self.store.fullname(&entry.node)?;
            results.push(ReverseCandidate {
                candidate: NodeDetail::from_node(&entry.node, fullname),
                dist: entry.dist,
            });
        }
        Ok(results)
    }

    fn installed_dictionary_version(&self) -> Result<String> {
        Ok(self.metadata.version.clone())
    }

    fn get_config(&self) -> SearchConfig {
        self.config.clone()
    }

    fn set_config(&mut self, config: SearchConfig) -> Result<()> {
        self.validate_target_area(&config.target_area)?;
        self.config = config;
        Ok(())
    }
}
