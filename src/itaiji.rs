//! Address-notation normalizer
//!
//! Canonicalizes variant kanji, full-width/half-width forms, kana case and
//! numeral notations so that dataset keys and query strings compare
//! identically. The same converter is used when building the trie index
//! and when parsing a query; if the two ever diverge, longest-match
//! silently degrades.

use std::collections::HashMap;

use lazy_static::lazy_static;
use regex_lite::Regex;

use crate::strnum;

/// Variant kanji forms mapped to a single preferred form.
const ITAIJI_PAIRS: &[(char, char)] = &[
    ('龍', '竜'),
    ('瀧', '滝'),
    ('櫻', '桜'),
    ('來', '来'),
    ('德', '徳'),
    ('齋', '斎'),
    ('齊', '斉'),
    ('邊', '辺'),
    ('邉', '辺'),
    ('濱', '浜'),
    ('濵', '浜'),
    ('廣', '広'),
    ('澤', '沢'),
    ('眞', '真'),
    ('壽', '寿'),
    ('萬', '万'),
    ('嶋', '島'),
    ('嶌', '島'),
    ('國', '国'),
    ('圓', '円'),
    ('會', '会'),
    ('學', '学'),
    ('榮', '栄'),
    ('惠', '恵'),
    ('藏', '蔵'),
    ('驒', '騨'),
    ('鷗', '鴎'),
    ('顯', '顕'),
    ('巖', '巌'),
    ('彌', '弥'),
    ('檜', '桧'),
    ('槇', '槙'),
    ('舘', '館'),
    ('嶽', '岳'),
    ('淺', '浅'),
    ('黑', '黒'),
];

lazy_static! {
    static ref TRANS_ITAIJI: HashMap<char, char> = {
        let mut m = HashMap::new();
        for &(src, dst) in ITAIJI_PAIRS {
            m.insert(src, dst);
        }
        m
    };
}

/// Characters that may begin a chiban (lot-number) notation.
pub const CHIBAN_HEADS: &str = "甲乙丙丁戊己庚辛壬癸\
                                子丑寅卯辰巳午未申酉戌亥\
                                続新\
                                イロハニホヘトチリヌルヲワカヨタレソツネ";

/// Letters that are sometimes inserted into notations at will.
const OPTIONAL_LETTERS_IN_MIDDLE: &str = "ケヶガツッノ区町";

/// Strings that are sometimes inserted into notations at will.
const OPTIONAL_STRINGS_IN_MIDDLE: [&str; 3] = ["大字", "小字", "字"];

/// Characters that may be appended to the end of a notation at will.
const EXTRA_CHARACTERS: &str = "-ノ区町";

/// Max length of an aza-name which can be omitted from a query.
const MAX_SKIP_AZANAME: usize = 5;

/// Character-variant and numeral-notation converter.
///
/// Pure and deterministic; `standardize` is idempotent.
pub struct Converter {
    re_optional_prefixes: Regex,
    re_optional_middles: Regex,
    postfix_patterns: Vec<(i8, Regex)>,
    postfix_alternatives: Vec<(i8, Vec<&'static str>)>,
}

impl Default for Converter {
    fn default() -> Self {
        Self::new()
    }
}

impl Converter {
    pub fn new() -> Self {
        use crate::address::AddressLevel;

        let postfix_alternatives: Vec<(i8, Vec<&'static str>)> = vec![
            (AddressLevel::CITY, vec!["市", "区", "町", "村"]),
            (AddressLevel::WARD, vec!["区"]),
            (
                AddressLevel::OAZA,
                vec!["番丁", "番町", "丁目", "町", "条", "線", "丁", "区", "番", "号"],
            ),
            (
                AddressLevel::AZA,
                vec!["丁目", "町", "条", "線", "丁", "区", "番", "号"],
            ),
            (AddressLevel::BLOCK, vec!["番地", "番", "号", "地"]),
            (AddressLevel::BLD, vec!["番地", "号"]),
        ];
        let postfix_patterns = postfix_alternatives
            .iter()
            .map(|(lv, alts)| {
                let pattern = format!("({})$", alts.join("|"));
                (*lv, Regex::new(&pattern).unwrap())
            })
            .collect();

        Self {
            re_optional_prefixes: Regex::new(r"^(大字|小字|字)").unwrap(),
            re_optional_middles: Regex::new(r"^(大字|小字|字|[ケヶガツッノ区町])").unwrap(),
            postfix_patterns,
            postfix_alternatives,
        }
    }

    pub fn extra_characters(&self) -> &'static str {
        EXTRA_CHARACTERS
    }

    pub fn is_chiban_head(&self, c: char) -> bool {
        CHIBAN_HEADS.contains(c)
    }

    /// Length in chars of the optional prefix (大字/小字/字) of the notation.
    pub fn check_optional_prefixes(&self, notation: &str) -> usize {
        match self.re_optional_prefixes.find(notation) {
            Some(m) => m.as_str().chars().count(),
            None => 0,
        }
    }

    /// Length in chars of the optional postfix of a notation at the level.
    pub fn check_optional_postfixes(&self, notation: &str, level: i8) -> usize {
        for (lv, re) in &self.postfix_patterns {
            if *lv == level {
                if let Some(caps) = re.captures(notation) {
                    return caps.get(1).map_or(0, |m| m.as_str().chars().count());
                }
                return 0;
            }
        }
        0
    }

    /// Canonicalize a single character: itaiji, full-width to half-width,
    /// upper case, hiragana to katakana.
    fn fold_char(c: char) -> char {
        if let Some(&dst) = TRANS_ITAIJI.get(&c) {
            return dst;
        }
        let cp = c as u32;
        // Full-width ASCII block
        if (0xFF01..=0xFF5E).contains(&cp) {
            let half = char::from_u32(cp - 0xFF01 + 0x21).unwrap();
            return half.to_ascii_uppercase();
        }
        if c.is_ascii_lowercase() {
            return c.to_ascii_uppercase();
        }
        // Hiragana to katakana
        if (0x3041..=0x3096).contains(&cp) {
            return char::from_u32(cp + 0x60).unwrap();
        }
        c
    }

    /// Standardize an address notation.
    ///
    /// With `keep_numbers`, numeric characters are left in their original
    /// notation; otherwise each numeral run is folded to `"<n>."`.
    pub fn standardize(&self, notation: &str, keep_numbers: bool) -> String {
        if notation.is_empty() {
            return String::new();
        }

        let l_prefix = self.check_optional_prefixes(notation);
        let stripped: String = notation.chars().skip(l_prefix).collect();

        let folded: String = stripped.chars().map(Self::fold_char).collect();
        let folded = folded.replace("通リ", "通");

        let chars: Vec<char> = folded.chars().collect();
        let mut out = String::with_capacity(folded.len());
        let mut i = 0usize;

        while i < chars.len() {
            let c = chars[i];

            if strnum::is_hyphen(c) {
                out.push('-');
                i += 1;
                continue;
            }

            if !keep_numbers && strnum::numeric_char(c).is_some() {
                let span = strnum::get_number(&chars[i..], 0);
                if span.i > 0 {
                    out.push_str(&span.n.to_string());
                    out.push('.');
                    i += span.i;
                    if i < chars.len() && chars[i] == '.' {
                        i += 1;
                    }
                    continue;
                }
            }

            out.push(c);
            i += 1;
        }

        out
    }

    /// Length in chars of an optional middle string at `pos`, or 0.
    fn optional_str_len(&self, chars: &[char], pos: usize) -> usize {
        let window: String = chars[pos..chars.len().min(pos + 2)].iter().collect();
        match self.re_optional_middles.captures(&window) {
            Some(caps) => caps.get(1).map_or(0, |m| m.as_str().chars().count()),
            None => 0,
        }
    }

    /// Positions to which an omitted aza-name may extend, starting at `pos`.
    pub fn optional_aza_len(&self, chars: &[char], pos: usize) -> Vec<usize> {
        let mut candidates = Vec::new();
        if pos >= chars.len() || strnum::is_arabic_number(chars[pos]) {
            return candidates;
        }

        for i in 1..=MAX_SKIP_AZANAME {
            if pos + i >= chars.len() {
                break;
            }
            let c = chars[pos + i];
            if self.is_chiban_head(c) {
                candidates.push(pos + i);
            } else if strnum::is_arabic_number(c) {
                candidates.push(pos + i);
                break;
            }
        }

        candidates
    }

    /// Check whether an abbreviation mark stands at `pos` of the query.
    ///
    /// Returns 1 when an abbreviation exists, 0 at end of string, -1 on a
    /// mismatching continuation.
    fn is_abbreviated_postfix(&self, chars: &[char], pos: usize) -> i8 {
        if pos >= chars.len() {
            return 0;
        }
        let c = chars[pos];
        if strnum::is_hyphen(c) {
            return 1;
        }
        if c != 'ノ' || pos + 1 >= chars.len() {
            return 0;
        }
        let nc = chars[pos + 1];
        if self.is_chiban_head(nc) || strnum::numeric_char(nc).is_some() {
            return 1;
        }
        -1
    }

    /// The number of leading chars of `string` that match `pattern`.
    ///
    /// Both arguments must be standardized; `string` keeps its numbers,
    /// `pattern` carries the `"<n>."` form. `removed_postfix` is set when
    /// the pattern had an optional postfix stripped before matching, which
    /// requires an abbreviation mark (or end of input) at the match end.
    /// Returns 0 if the pattern does not match exactly.
    pub fn match_len(
        &self,
        string: &[char],
        pattern: &[char],
        removed_postfix: Option<&str>,
    ) -> usize {
        let mut nloops = 0u32;
        let mut checked_positions: Option<(usize, usize)> = None;
        let mut aza_positions: Vec<usize> = Vec::new();
        let mut pattern_pos = 0usize;
        let mut string_pos = 0usize;
        // Chars skipped as optional, pending a rewind on later mismatch
        let mut pending_slen = 0usize;
        let mut pending_plen = 0usize;
        let mut c = 'x';
        let mut s = 'x';

        while pattern_pos < pattern.len() {
            nloops += 1;
            if nloops > 256 {
                return 0;
            }
            if string_pos >= string.len() {
                return 0;
            }

            let pre_c = c;
            let pre_s = s;
            c = pattern[pattern_pos];
            s = string[string_pos];

            if !c.is_ascii_digit() {
                if c != s {
                    let pair_s: String = [pre_s, s].iter().collect();
                    if OPTIONAL_STRINGS_IN_MIDDLE.contains(&pair_s.as_str()) {
                        string_pos += 1;
                        pattern_pos = pattern_pos.saturating_sub(1);
                        pending_slen = 2;
                        continue;
                    }

                    let pair_c: String = [pre_c, c].iter().collect();
                    if OPTIONAL_STRINGS_IN_MIDDLE.contains(&pair_c.as_str()) {
                        string_pos = string_pos.saturating_sub(1);
                        pattern_pos += 1;
                        pending_plen = 2;
                        continue;
                    }

                    let slen = self.optional_str_len(string, string_pos);
                    if slen > 0 {
                        let skipped: String =
                            string[string_pos..string_pos + slen].iter().collect();
                        if OPTIONAL_STRINGS_IN_MIDDLE.contains(&skipped.as_str())
                            || (pending_slen == 0 && pending_plen == 0)
                        {
                            string_pos += slen;
                            pending_slen = slen;
                            continue;
                        }
                    }

                    let plen = self.optional_str_len(pattern, pattern_pos);
                    if plen > 0 {
                        let skipped: String =
                            pattern[pattern_pos..pattern_pos + plen].iter().collect();
                        if OPTIONAL_STRINGS_IN_MIDDLE.contains(&skipped.as_str())
                            || (pending_plen == 0 && removed_postfix.is_none())
                        {
                            pattern_pos += plen;
                            pending_plen = plen;
                            continue;
                        }
                    }

                    if pending_slen > 0
                        && pending_plen > 0
                        && checked_positions != Some((string_pos, pattern_pos))
                    {
                        checked_positions = Some((string_pos, pattern_pos));
                        string_pos = string_pos.saturating_sub(pending_slen);
                        pending_slen = 0;
                        continue;
                    }

                    if aza_positions.is_empty() {
                        aza_positions = self.optional_aza_len(string, string_pos);
                    }
                    if !aza_positions.is_empty() {
                        if aza_positions[0] <= string_pos {
                            aza_positions.remove(0);
                            continue;
                        }
                        string_pos = aza_positions.remove(0);
                        pending_slen = 0;
                        continue;
                    }

                    return 0;
                }

                pattern_pos += 1;
                string_pos += 1;
                pending_slen = 0;
                continue;
            }

            // The pattern holds a standardized number; check that the
            // numeric run of the query represents the same value.
            let period_pos = match pattern[pattern_pos..].iter().position(|&pc| pc == '.') {
                Some(p) => pattern_pos + p,
                None => return 0,
            };

            let slen = self.optional_str_len(string, string_pos);
            if slen > 0 {
                string_pos += slen;
                pending_slen = slen;
                continue;
            }

            let expected_str: String = pattern[pattern_pos..period_pos].iter().collect();
            let expected: u64 = match expected_str.parse() {
                Ok(v) => v,
                Err(_) => return 0,
            };
            let candidate = strnum::get_number(&string[string_pos..], expected);
            if candidate.n == expected && candidate.i > 0 {
                pattern_pos = period_pos + 1;
                string_pos += candidate.i;
                pending_slen = 0;
            } else {
                return 0;
            }
        }

        if removed_postfix.is_some() && self.is_abbreviated_postfix(string, string_pos) < 0 {
            return 0;
        }

        string_pos.saturating_sub(pending_slen)
    }

    /// Check whether the query continues with a postfix of the level
    /// right after an elided-postfix match.
    ///
    /// When it does, the query spelled out a different element name and
    /// the elided match must be rejected.
    pub fn check_trailing_string(&self, rest: &[char], level: i8) -> bool {
        if rest.is_empty() {
            return false;
        }
        let head: String = rest.iter().take(2).collect();
        for (lv, alts) in &self.postfix_alternatives {
            if *lv == level {
                return alts.iter().any(|alt| head.starts_with(alt));
            }
        }
        false
    }

    /// Enumerate notation variants with the optional middles removed.
    ///
    /// Used by the index builder to register alternative spellings of the
    /// same notation (e.g. with and without ヶ).
    pub fn standardized_candidates(&self, string: &str) -> Vec<String> {
        let mut out = Vec::new();
        self.candidates_from(string, 0, &mut out);
        out
    }

    fn candidates_from(&self, string: &str, from_pos: usize, out: &mut Vec<String>) {
        if !out.contains(&string.to_string()) {
            out.push(string.to_string());
        }
        let n_strings = OPTIONAL_STRINGS_IN_MIDDLE.len();
        let n_letters = OPTIONAL_LETTERS_IN_MIDDLE.chars().count();
        for pos in from_pos..n_strings + n_letters {
            let substr: String = if pos < n_strings {
                OPTIONAL_STRINGS_IN_MIDDLE[pos].to_string()
            } else {
                OPTIONAL_LETTERS_IN_MIDDLE
                    .chars()
                    .nth(pos - n_strings)
                    .unwrap()
                    .to_string()
            };
            if string.contains(&substr) {
                let removed = string.replace(&substr, "");
                self.candidates_from(&removed, pos + 1, out);
            }
        }
    }
}
