//! Forward-matching engine
//!
//! A state machine over (remaining input, current tree position). The
//! trie index seeds prefecture-or-lower candidate heads; from each head
//! the engine descends the real tree, consuming the query with the
//! child-matching strategies and backtracking over notation variants.

pub mod strategy;

use std::collections::HashSet;

use crate::address::AddressLevel;
use crate::error::Result;
use crate::itaiji::Converter;
use crate::storage::{AddressNode, NodesSegment};
use crate::tree::{AzaSkip, SearchConfig};
use crate::trie::TrieIndex;

/// An intermediate parse result: the terminal node, the consumed
/// standardized text and the consumed char count (skipped optional parts
/// appear in `matched` but not in `nchars`).
#[derive(Debug, Clone)]
pub struct Partial {
    pub node: AddressNode,
    pub matched: String,
    pub nchars: usize,
}

impl Partial {
    fn at(node: &AddressNode) -> Self {
        Self {
            node: node.clone(),
            matched: String::new(),
            nchars: 0,
        }
    }
}

/// One finished candidate of `search_by_trie`.
#[derive(Debug, Clone)]
pub struct TrieSearchResult {
    pub node: AddressNode,
    /// Consumed prefix in standardized (numbers kept) form.
    pub matched: String,
    /// Consumed length used for the longest-match comparison.
    pub len: usize,
    /// Total chars of `matched`, including skipped optional parts.
    pub part: usize,
}

/// The matching engine. Borrows the dataset components and carries one
/// consistent configuration for the duration of a call.
pub struct Matcher<'a> {
    store: &'a NodesSegment,
    trie: &'a TrieIndex,
    converter: &'a Converter,
    config: SearchConfig,
    processed: HashSet<u32>,
}

impl<'a> Matcher<'a> {
    pub fn new(
        store: &'a NodesSegment,
        trie: &'a TrieIndex,
        converter: &'a Converter,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            trie,
            converter,
            config,
            processed: HashSet::new(),
        }
    }

    fn debug(&self, msg: impl Fn() -> String) {
        if self.config.debug {
            tracing::debug!("{}", msg());
        }
    }

    /// Check whether a node lies inside the named area (element name,
    /// standardized name, or 2/5-digit JIS code), walking the parent
    /// chain up from the node.
    fn is_inside(&self, node: &AddressNode, area: &str) -> Result<bool> {
        let is_code = !area.is_empty() && area.chars().all(|c| c.is_ascii_digit());
        let area_index = self.converter.standardize(area, false);

        let mut cur = node.clone();
        loop {
            if is_code {
                for value in cur.note_values("jisx0401") {
                    if area.len() == 2 && value == area {
                        return Ok(true);
                    }
                }
                for value in cur.note_values("jisx0402") {
                    if area.len() == 5 && value == area {
                        return Ok(true);
                    }
                }
            } else if cur.name == area || cur.name_index == area_index {
                return Ok(true);
            }

            match self.store.parent_of(&cur)? {
                Some(parent) if parent.id != AddressNode::ROOT_NODE_ID => cur = parent,
                _ => return Ok(false),
            }
        }
    }

    /// When a node lacks coordinates, borrow the representative point of
    /// the first coordinate-bearing child.
    fn with_borrowed_coordinates(&self, node: AddressNode) -> AddressNode {
        if node.has_valid_coordinates() {
            return node;
        }
        let mut node = node;
        for child in self.store.iter_children(&node) {
            if child.has_valid_coordinates() {
                node.x = child.x;
                node.y = child.y;
                break;
            }
        }
        node
    }

    /// Run the full trie-seeded search over a query string.
    pub fn search_by_trie(&mut self, query: &str) -> Result<Vec<TrieSearchResult>> {
        let index: Vec<char> = self.converter.standardize(query, true).chars().collect();
        let index_for_trie = self.converter.standardize(query, false);

        let mut prefixes = self.trie.common_prefixes(&index_for_trie);
        // Longest registered notation first
        prefixes.sort_by(|a, b| b.nchars.cmp(&a.nchars));
        self.debug(|| {
            format!(
                "trie prefixes for '{}': {:?}",
                index_for_trie,
                prefixes.iter().map(|p| p.key.as_str()).collect::<Vec<_>>()
            )
        });

        let mut results: Vec<TrieSearchResult> = Vec::new();
        let mut max_len = 0usize;
        let mut min_part: Option<usize> = None;
        let mut min_key_len = 0usize;
        let mut resolved_node_ids: HashSet<u32> = HashSet::new();

        for prefix in &prefixes {
            if prefix.nchars < min_key_len {
                continue;
            }

            let key_chars: Vec<char> = prefix.key.chars().collect();
            let offset = self.converter.match_len(&index, &key_chars, None);
            let key: String = index[..offset].iter().collect();
            let rest_index = &index[offset..];

            for &node_id in &prefix.node_ids {
                let node = self.store.get(node_id)?;
                let node = if self.config.require_coordinates {
                    self.with_borrowed_coordinates(node)
                } else {
                    node
                };

                if min_key_len == 0 && node.level <= AddressLevel::WARD {
                    // Once a ward-or-higher head is found, notations
                    // shorter than it cannot win; prune them.
                    min_key_len = prefix.nchars;
                }

                if self.processed.contains(&node_id) {
                    continue;
                }

                if !self.config.target_area.is_empty() {
                    let mut inside = false;
                    for area in &self.config.target_area.clone() {
                        if self.is_inside(&node, area)? {
                            inside = true;
                            break;
                        }
                    }
                    if !inside {
                        self.debug(|| {
                            format!("node {}({}) is not in the target area", node.name, node.id)
                        });
                        continue;
                    }
                }

                let mut results_by_node = self.search_recursive(&node, rest_index)?;
                self.processed.insert(node_id);

                // A city head that consumed nothing may hide its entries
                // under an unnamed oaza placeholder.
                if results_by_node
                    .first()
                    .map_or(false, |p| p.matched.is_empty())
                    && node.level == AddressLevel::CITY
                    && !rest_index
                        .first()
                        .map_or(false, |&c| c.to_string() == AddressNode::NONAME)
                {
                    let saved_skip = self.config.aza_skip;
                    for result in &results {
                        if result.matched.starts_with(&key) && result.matched.len() > key.len() {
                            // Other candidates already found; no aza
                            // omission under the placeholder
                            self.config.aza_skip = AzaSkip::Off;
                            break;
                        }
                    }

                    if let Some(noname_child) = self.store.try_get(node.id + 1) {
                        if noname_child.name == AddressNode::NONAME
                            && noname_child.parent_id == node.id
                            && !self.processed.contains(&noname_child.id)
                        {
                            self.processed.insert(noname_child.id);
                            for partial in self.search_recursive(&noname_child, rest_index)? {
                                if !partial.matched.is_empty() {
                                    results_by_node.push(partial);
                                }
                            }
                        }
                    }
                    self.config.aza_skip = saved_skip;
                }

                for partial in results_by_node {
                    let cand_node = if self.config.require_coordinates {
                        self.with_borrowed_coordinates(partial.node.clone())
                    } else {
                        partial.node.clone()
                    };

                    if !self.config.target_area.is_empty() {
                        let mut inside = false;
                        for area in &self.config.target_area.clone() {
                            if self.is_inside(&cand_node, area)? {
                                inside = true;
                                break;
                            }
                        }
                        if !inside {
                            continue;
                        }
                    }

                    if self.config.require_coordinates && !cand_node.has_valid_coordinates() {
                        self.debug(|| {
                            format!("node {}({}) has no coordinates", cand_node.name, cand_node.id)
                        });
                        continue;
                    }

                    let len = offset + partial.nchars;
                    let part = offset + partial.matched.chars().count();
                    let matched = format!("{}{}", key, partial.matched);
                    self.debug(|| format!("candidate: {} ({})", matched, len));

                    if self.config.best_only {
                        if len > max_len {
                            results.clear();
                            results.push(TrieSearchResult {
                                node: cand_node,
                                matched,
                                len,
                                part,
                            });
                            max_len = len;
                            min_part = Some(part);
                        } else if len == max_len
                            && !results.iter().any(|r| r.node.id == cand_node.id)
                            && min_part.map_or(true, |mp| part <= mp)
                        {
                            results.push(TrieSearchResult {
                                node: cand_node,
                                matched,
                                len,
                                part,
                            });
                            min_part = Some(part);
                        }
                    } else {
                        if resolved_node_ids.contains(&cand_node.id) {
                            continue;
                        }
                        // Ancestors of a resolved node are dominated
                        let mut cur = cand_node.clone();
                        while let Some(parent) = self.store.parent_of(&cur)? {
                            resolved_node_ids.insert(parent.id);
                            cur = parent;
                        }

                        if let Some(existing) =
                            results.iter_mut().find(|r| r.node.id == cand_node.id)
                        {
                            existing.matched = matched;
                            existing.len = len;
                            existing.part = part;
                        } else {
                            results.push(TrieSearchResult {
                                node: cand_node,
                                matched,
                                len,
                                part,
                            });
                        }
                        max_len = max_len.max(len);
                        min_part = Some(min_part.map_or(part, |mp| mp.min(part)));
                    }
                }
            }
        }

        Ok(results)
    }

    /// Recursive descent from a node over the remaining input.
    fn search_recursive(&mut self, node: &AddressNode, index: &[char]) -> Result<Vec<Partial>> {
        let index_str: String = index.iter().collect();
        let l_prefix = self.converter.check_optional_prefixes(&index_str);
        let optional_prefix: String = index[..l_prefix].iter().collect();
        let index = &index[l_prefix..];

        self.debug(|| {
            format!(
                "descend at '{}'({}) with '{}'",
                node.name,
                node.id,
                index.iter().collect::<String>()
            )
        });

        if index.is_empty() {
            // Matched up to the last character
            self.processed.insert(node.id);
            return Ok(vec![Partial::at(node)]);
        }

        if node.is_leaf() {
            let mut candidates = self.check_redirect(node, index)?;
            if candidates.is_empty() {
                candidates.push(Partial::at(node));
            }
            return Ok(candidates);
        }

        // Children whose notation can start the remaining input: compare
        // the leading number by value, or the first character otherwise.
        let number = crate::strnum::get_number(index, 0);
        let max_level = if optional_prefix.contains('字') {
            Some(AddressLevel::AZA)
        } else {
            None
        };

        let filtered_children: Vec<AddressNode> = self
            .store
            .iter_children(node)
            .filter(|child| {
                if let Some(max) = max_level {
                    if child.level > max {
                        return false;
                    }
                }
                if number.i > 0 {
                    child.name_index.starts_with(&format!("{}.", number.n))
                } else {
                    child.name_index.chars().next() == index.first().copied()
                }
            })
            .collect();

        if filtered_children.is_empty()
            && self.converter.extra_characters().contains(index[0])
        {
            // Drop a stray connector character and retry
            let sub = self.search_recursive(node, &index[1..])?;
            if sub.is_empty() {
                return Ok(Vec::new());
            }
            let mut candidates = Vec::new();
            for partial in sub {
                if partial.node.id == node.id {
                    candidates.push(partial);
                    continue;
                }
                candidates.push(Partial {
                    node: partial.node,
                    matched: format!("{}{}", index[0], partial.matched),
                    nchars: l_prefix + partial.nchars,
                });
            }
            candidates.push(Partial::at(node));
            return Ok(candidates);
        }

        let mut candidates: Vec<Partial> = Vec::new();
        for child in &filtered_children {
            if self.processed.contains(&child.id) {
                continue;
            }
            let new_candidates =
                self.candidates_from_child(child, index, &optional_prefix, l_prefix)?;
            if !new_candidates.is_empty() {
                candidates.extend(new_candidates);
                candidates.push(Partial::at(node));
            }
        }

        // Street-name (通り名) support in Kyoto City: the part of the
        // query before a matching child notation is a street name and is
        // skipped.
        if node.level == AddressLevel::WARD {
            let parent = self.store.parent_of(node)?;
            if parent.map_or(false, |p| p.name == "京都市") {
                let children: Vec<AddressNode> = self.store.iter_children(node).collect();
                for child in children {
                    let child_chars: Vec<char> = child.name_index.chars().collect();
                    let pos = match rfind(index, &child_chars) {
                        Some(pos) if pos > 0 => pos,
                        _ => continue,
                    };
                    let offset = pos + child_chars.len();
                    self.processed.insert(child.id);
                    let sub = self.search_recursive(&child, &index[offset..])?;
                    let mut added = false;
                    for partial in sub {
                        let head: String = index[..offset].iter().collect();
                        candidates.push(Partial {
                            nchars: l_prefix
                                + child_chars.len()
                                + partial.matched.chars().count(),
                            matched: format!(
                                "{}{}{}",
                                optional_prefix, head, partial.matched
                            ),
                            node: partial.node,
                        });
                        added = true;
                    }
                    if added {
                        candidates.push(Partial::at(node));
                    }
                }
            }
        }

        // Nodes with recorded address changes redirect to their target
        candidates.extend(self.check_redirect(node, index)?);

        // Re-search with the omissible aza-name skipped
        let consumed = candidates.first().map_or(0, |c| c.matched.chars().count());
        let unconsumed = index.len().saturating_sub(consumed);
        if candidates.is_empty() || unconsumed > 2 {
            if self.config.aza_skip != AzaSkip::Off && self.aza_skip_allowed(node) {
                let skip_positions = self.converter.optional_aza_len(index, 0);
                if let Some(&azalen) = skip_positions.first() {
                    self.debug(|| {
                        format!(
                            "skipping omissible aza chars '{}'",
                            index[..azalen].iter().collect::<String>()
                        )
                    });
                    let saved = self.config.aza_skip;
                    self.config.aza_skip = AzaSkip::Off;
                    let sub = self.search_recursive(node, &index[azalen..])?;
                    self.config.aza_skip = saved;

                    if sub.first().map_or(false, |p| !p.matched.is_empty()) {
                        let mut added = 0usize;
                        for partial in sub {
                            let is_chiban_name = partial.node.name_index.chars().count() == 1
                                && partial
                                    .node
                                    .name_index
                                    .chars()
                                    .next()
                                    .map_or(false, |c| self.converter.is_chiban_head(c));
                            if partial.node.level < AddressLevel::BLOCK && !is_chiban_name {
                                continue;
                            }
                            let skipped: String = index[..azalen].iter().collect();
                            candidates.push(Partial {
                                nchars: l_prefix + partial.nchars,
                                matched: format!(
                                    "{}{}{}",
                                    optional_prefix, skipped, partial.matched
                                ),
                                node: partial.node,
                            });
                            added += 1;
                        }
                        if added > 0 {
                            candidates.push(Partial::at(node));
                        }
                    }
                }
            }
        }

        if candidates.is_empty() {
            candidates.push(Partial::at(node));
        }
        Ok(candidates)
    }

    /// Parse results reachable through one child.
    fn candidates_from_child(
        &mut self,
        child: &AddressNode,
        index: &[char],
        optional_prefix: &str,
        l_prefix: usize,
    ) -> Result<Vec<Partial>> {
        let match_len = strategy::match_child(self.converter, child, index);
        if match_len == 0 {
            self.debug(|| format!("'{}' does not match", child.name));
            return Ok(Vec::new());
        }

        self.debug(|| format!("'{}' matched {} chars", child.name, match_len));
        let rest_index = &index[match_len..];
        let consumed: String = index[..match_len].iter().collect();

        let mut candidates = Vec::new();
        for partial in self.search_recursive(child, rest_index)? {
            candidates.push(Partial {
                nchars: l_prefix + match_len + partial.nchars,
                matched: format!("{}{}{}", optional_prefix, consumed, partial.matched),
                node: partial.node,
            });
        }
        Ok(candidates)
    }

    /// Structural guard against skipping an aza-name: never under a node
    /// outside the city..aza range, and never once a sibling (or the node
    /// itself) was already consumed for this query.
    fn aza_skip_allowed(&self, node: &AddressNode) -> bool {
        if node.level < AddressLevel::CITY || node.level > AddressLevel::AZA {
            return false;
        }
        for &id in &self.processed {
            if let Some(processed) = self.store.try_get(id) {
                if processed.parent_id == node.parent_id
                    && processed.name_index != node.name_index
                {
                    return false;
                }
                if processed.parent_id == node.id {
                    return false;
                }
            }
        }
        true
    }

    /// Follow `ref:` notes to renamed/relocated addresses.
    fn check_redirect(&mut self, node: &AddressNode, index: &[char]) -> Result<Vec<Partial>> {
        if !self.config.auto_redirect {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        for (key, value) in node.notes() {
            if key != "ref" {
                continue;
            }
            for reference in value.split('|') {
                self.debug(|| format!("redirect '{}' to '{}'", node.name, reference));
                self.processed.insert(node.id);

                let saved_redirect = self.config.auto_redirect;
                let saved_coords = self.config.require_coordinates;
                self.config.auto_redirect = false;
                self.config.require_coordinates = false;
                // The reference is resolved as a fresh query
                let outer_processed = std::mem::take(&mut self.processed);
                let redirect_results = self.search_by_trie(reference)?;
                self.processed = outer_processed;
                self.config.auto_redirect = saved_redirect;
                self.config.require_coordinates = saved_coords;

                for target in redirect_results {
                    if self.processed.contains(&target.node.id) {
                        continue;
                    }
                    for partial in self.search_recursive(&target.node.clone(), index)? {
                        if !partial.matched.is_empty() {
                            candidates.push(partial);
                        }
                    }
                }
            }
        }

        Ok(candidates)
    }
}

/// Last occurrence of `needle` in `haystack` (char positions).
fn rfind(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len())
        .rev()
        .find(|&i| &haystack[i..i + needle.len()] == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfind() {
        let hay: Vec<char> = "烏丸通上立売上る".chars().collect();
        let needle: Vec<char> = "上立売".chars().collect();
        assert_eq!(rfind(&hay, &needle), Some(3));

        let missing: Vec<char> = "下立売".chars().collect();
        assert_eq!(rfind(&hay, &missing), None);
    }
}
