//! The address-tree facade
//!
//! One abstract operation surface with two interchangeable providers: a
//! local one composing the node store, trie index and spatial index, and
//! a remote one forwarding identical calls to a banchi server. The
//! provider is chosen once at construction; a facade instance stays bound
//! to it for its lifetime.

pub mod local;
pub mod remote;

use std::env;
use std::path::{Path, PathBuf};

use crate::error::{GeocodeError, Result};
use crate::result::{GeocodeResult, MatchResult, NodeDetail, ReverseCandidate};
use crate::storage::AddressNode;

pub use local::LocalTree;
pub use remote::RemoteTree;

/// How the level-6 aza element may be skipped when absent from a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum AzaSkip {
    /// Decide from the tree structure (default).
    Auto,
    /// Always allow skipping.
    On,
    /// Never skip.
    Off,
}

impl Default for AzaSkip {
    fn default() -> Self {
        AzaSkip::Auto
    }
}

impl AzaSkip {
    fn from_env(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "on" | "enable" | "true" | "yes" => AzaSkip::On,
            "off" | "disable" | "false" | "no" => AzaSkip::Off,
            _ => AzaSkip::Auto,
        }
    }
}

/// Per-call search configuration.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchConfig {
    /// Restrict results to these prefecture/city names or JIS codes.
    pub target_area: Vec<String>,
    /// Aza-omission policy.
    pub aza_skip: AzaSkip,
    /// Return only the longest match(es) instead of all partial matches.
    pub best_only: bool,
    /// Discard candidates without valid coordinates.
    pub require_coordinates: bool,
    /// Follow dataset cross-references for address-change aliases.
    pub auto_redirect: bool,
    /// Emit a diagnostic trace of the descent.
    pub debug: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            target_area: Vec::new(),
            aza_skip: AzaSkip::Auto,
            best_only: true,
            require_coordinates: true,
            auto_redirect: true,
            debug: false,
        }
    }
}

impl SearchConfig {
    /// Default configuration with `BANCHI_OPT_*` environment overrides.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(v) = env::var("BANCHI_OPT_AZA_SKIP") {
            config.aza_skip = AzaSkip::from_env(&v);
        }
        if let Ok(v) = env::var("BANCHI_OPT_BEST_ONLY") {
            config.best_only = env_bool(&v, config.best_only);
        }
        if let Ok(v) = env::var("BANCHI_OPT_TARGET_AREA") {
            config.target_area = v.split(',').filter(|s| !s.is_empty()).map(String::from).collect();
        }
        if let Ok(v) = env::var("BANCHI_OPT_REQUIRE_COORDINATES") {
            config.require_coordinates = env_bool(&v, config.require_coordinates);
        }
        if let Ok(v) = env::var("BANCHI_OPT_AUTO_REDIRECT") {
            config.auto_redirect = env_bool(&v, config.auto_redirect);
        }
        if env::var("BANCHI_DEBUG").is_ok() {
            config.debug = true;
        }
        config
    }
}

fn env_bool(value: &str, default: bool) -> bool {
    match value.to_ascii_lowercase().as_str() {
        "on" | "enable" | "true" | "yes" | "1" => true,
        "off" | "disable" | "false" | "no" | "0" => false,
        _ => default,
    }
}

/// Find the dataset directory.
///
/// Resolution order: the `BANCHI_DB_DIR` environment variable, then the
/// per-user default location. Returns None when no installed dataset is
/// found.
pub fn get_db_dir() -> Option<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    if let Ok(dir) = env::var("BANCHI_DB_DIR") {
        dirs.push(PathBuf::from(dir));
    }
    if let Ok(home) = env::var("HOME") {
        dirs.push(Path::new(&home).join(".banchi").join("db"));
    }

    dirs.into_iter().find(|dir| dir.join("nodes.bin").exists())
}

/// The uniform operation surface of the address tree.
///
/// All methods are synchronous and take `&self`; concurrency, if any, is
/// imposed by the embedding application.
pub trait AddressTree: Send + Sync {
    /// Full node payload by id.
    fn get_node_by_id(&self, node_id: u32) -> Result<AddressNode>;

    /// Number of records in the dataset.
    fn count_records(&self) -> Result<usize>;

    /// Names of the node's ancestors, root-first, including the node.
    fn get_fullname(&self, node: &AddressNode) -> Result<Vec<String>>;

    /// Nodes carrying the `category:value` note, e.g. ("postcode", "1600023").
    fn search_nodes_by_codes(&self, category: &str, value: &str) -> Result<Vec<AddressNode>>;

    /// Longest-match forward geocoding; results keep the matched
    /// substring of the original query, longest first.
    fn search_node(&self, query: &str) -> Result<Vec<MatchResult>>;

    /// Reverse geocoding: up to three candidates in ascending geodesic
    /// distance. `level` selects the result granularity (default 6).
    fn reverse(&self, x: f64, y: f64, level: Option<i8>) -> Result<Vec<ReverseCandidate>>;

    /// Version string of the installed dataset or remote server.
    fn installed_dictionary_version(&self) -> Result<String>;

    fn get_config(&self) -> SearchConfig;

    fn set_config(&mut self, config: SearchConfig) -> Result<()>;

    /// Forward geocoding with node details, in the shape most clients
    /// want: the matched substring and the candidate payloads.
    fn search(&self, query: &str) -> Result<GeocodeResult> {
        let results = self.search_node(query)?;
        let mut out = GeocodeResult::default();
        for result in results {
            if out.candidates.is_empty() {
                out.matched = result.matched.clone();
            } else if result.matched != out.matched {
                // Only the longest match group is reported
                break;
            }
            let fullname = self.get_fullname(&result.node)?;
            out.candidates
                .push(NodeDetail::from_node(&result.node, fullname));
        }
        Ok(out)
    }

    /// Nodes matching a 7-digit postal code.
    fn search_by_postcode(&self, code: &str) -> Result<Vec<AddressNode>> {
        let code = clean_numeric(code);
        if code.len() == 7 {
            return self.search_nodes_by_codes("postcode", &code);
        }
        Ok(Vec::new())
    }

    /// Nodes matching a JISX0401 prefecture code (2 digits) or a
    /// local-government code (6 digits).
    fn search_by_prefcode(&self, code: &str) -> Result<Vec<AddressNode>> {
        let code = clean_numeric(code);
        match code.len() {
            2 => self.search_nodes_by_codes("jisx0401", &code),
            6 => self.search_nodes_by_codes("jisx0401", &code[0..2]),
            _ => Ok(Vec::new()),
        }
    }

    /// Nodes matching a JISX0402 city code (5 digits) or a
    /// local-government code (6 digits).
    fn search_by_citycode(&self, code: &str) -> Result<Vec<AddressNode>> {
        let code = clean_numeric(code);
        match code.len() {
            5 => self.search_nodes_by_codes("jisx0402", &code),
            6 => self.search_nodes_by_codes("jisx0402", &code[0..5]),
            _ => Ok(Vec::new()),
        }
    }

    /// Nodes matching a machiaza-id of the address base registry.
    ///
    /// A 12-digit id is jisx0402 + aza_id, a 13-digit id lg-code + aza_id;
    /// both restrict the aza match to the city's id range. A bare 7-digit
    /// aza_id searches all municipalities.
    fn search_by_machiaza_id(&self, id: &str) -> Result<Vec<AddressNode>> {
        let id = clean_numeric(id);
        let (citycode, aza_id) = match id.len() {
            12 => (Some(id[0..5].to_string()), id[5..].to_string()),
            13 => (Some(id[0..6].to_string()), id[6..].to_string()),
            7 => (None, id),
            _ => return Ok(Vec::new()),
        };

        let candidates = self.search_nodes_by_codes("aza_id", &aza_id)?;
        let citynode = match citycode {
            None => return Ok(candidates),
            Some(code) => {
                let mut cities = self.search_by_citycode(&code)?;
                if cities.is_empty() {
                    return Ok(Vec::new());
                }
                cities.remove(0)
            }
        };

        Ok(candidates
            .into_iter()
            .filter(|n| n.id >= citynode.id && n.id < citynode.sibling_id)
            .collect())
    }
}

/// Fold full-width digits and strip all non-digit characters.
pub(crate) fn clean_numeric(code: &str) -> String {
    code.chars()
        .filter_map(|c| {
            if c.is_ascii_digit() {
                Some(c)
            } else {
                crate::strnum::numeric_char(c)
                    .filter(|&v| v < 10 && !crate::strnum::is_kansuji(c))
                    .map(|v| char::from_digit(v as u32, 10).unwrap())
            }
        })
        .collect()
}

/// Open a facade bound to one provider.
///
/// An explicit dataset directory wins; otherwise an explicit server
/// address; otherwise the `BANCHI_DB_DIR` / default dataset location and
/// finally the `BANCHI_SERVER` environment variable.
pub fn open(
    db_dir: Option<&Path>,
    server: Option<&str>,
) -> Result<Box<dyn AddressTree>> {
    if let Some(dir) = db_dir {
        return Ok(Box::new(LocalTree::open(dir)?));
    }
    if let Some(addr) = server {
        return Ok(Box::new(RemoteTree::new(addr)?));
    }
    if let Some(dir) = get_db_dir() {
        return Ok(Box::new(LocalTree::open(&dir)?));
    }
    if let Ok(addr) = env::var("BANCHI_SERVER") {
        return Ok(Box::new(RemoteTree::new(&addr)?));
    }

    Err(GeocodeError::Config(
        "Specify a dataset directory or a server address".to_string(),
    ))
}
