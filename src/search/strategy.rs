//! Child-matching strategies
//!
//! Each strategy is a pure function from (child node, remaining input) to
//! the number of consumed chars, 0 meaning no match. The engine tries
//! them in a fixed order per level, which keeps the regional notation
//! quirks out of the descent state machine.

use crate::itaiji::Converter;
use crate::storage::AddressNode;

pub type ChildMatchFn = fn(&Converter, &AddressNode, &[char]) -> usize;

/// Strategies in priority order.
pub const CHILD_STRATEGIES: &[ChildMatchFn] =
    &[match_exact, match_trimmed_postfix, match_jo_elision];

/// Plain longest match of the child's standardized notation.
pub fn match_exact(conv: &Converter, child: &AddressNode, index: &[char]) -> usize {
    let pattern: Vec<char> = child.name_index.chars().collect();
    conv.match_len(index, &pattern, None)
}

/// Match with the level's optional postfix removed.
///
/// "2.番" may appear in a query as "2-"; the elided postfix then requires
/// an abbreviation mark (hyphen or counting ノ) or the end of input, and
/// the mark itself is absorbed into the match.
pub fn match_trimmed_postfix(conv: &Converter, child: &AddressNode, index: &[char]) -> usize {
    let pattern: Vec<char> = child.name_index.chars().collect();
    let l_postfix = conv.check_optional_postfixes(&child.name_index, child.level);
    if l_postfix == 0 || l_postfix >= pattern.len() {
        return 0;
    }

    let removed: String = pattern[pattern.len() - l_postfix..].iter().collect();
    let alt = &pattern[..pattern.len() - l_postfix];
    let mut match_len = conv.match_len(index, alt, Some(&removed));
    if match_len == 0 {
        return 0;
    }

    if conv.check_trailing_string(&index[match_len..], child.level) {
        return 0;
    }
    if match_len < index.len() && matches!(index[match_len], '-' | 'ノ') {
        match_len += 1;
    }
    match_len
}

/// Sapporo-style 条 elision: "北3条西1丁目" is commonly written "北3西1".
pub fn match_jo_elision(conv: &Converter, child: &AddressNode, index: &[char]) -> usize {
    if !child.name_index.ends_with(".条") {
        return 0;
    }
    let alt: Vec<char> = child
        .name_index
        .replacen('条', "", 1)
        .chars()
        .collect();
    conv.match_len(index, &alt, None)
}

/// Try every strategy in order, returning the first positive match.
pub fn match_child(conv: &Converter, child: &AddressNode, index: &[char]) -> usize {
    for strategy in CHILD_STRATEGIES {
        let len = strategy(conv, child, index);
        if len > 0 {
            return len;
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chars(s: &str) -> Vec<char> {
        s.chars().collect()
    }

    fn child(name: &str, name_index: &str, level: i8) -> AddressNode {
        AddressNode {
            id: 1,
            name: name.to_string(),
            name_index: name_index.to_string(),
            x: 139.0,
            y: 35.0,
            level,
            priority: 1,
            note: String::new(),
            parent_id: 0,
            sibling_id: 2,
        }
    }

    #[test]
    fn test_match_exact() {
        let conv = Converter::new();
        let chome = child("二丁目", "2.丁目", 6);
        assert_eq!(match_child(&conv, &chome, &chars("2丁目8番")), 3);
        assert_eq!(match_child(&conv, &chome, &chars("三丁目")), 0);
    }

    #[test]
    fn test_match_trimmed_postfix() {
        let conv = Converter::new();
        let chome = child("二丁目", "2.丁目", 6);
        // "2-8-1": 丁目 elided, the hyphen is absorbed
        assert_eq!(match_child(&conv, &chome, &chars("2-8-1")), 2);

        let block = child("8番", "8.番", 7);
        assert_eq!(match_child(&conv, &block, &chars("8-1")), 2);
        // Query spelling a different postfix is rejected
        assert_eq!(match_child(&conv, &block, &chars("9-1")), 0);
    }

    #[test]
    fn test_match_jo_elision() {
        let conv = Converter::new();
        let jo = child("北三条", "北3.条", 6);
        assert_eq!(match_child(&conv, &jo, &chars("北3条西1丁目")), 3);
        // 条 omitted entirely
        assert_eq!(match_child(&conv, &jo, &chars("北3西1")), 2);
    }
}
