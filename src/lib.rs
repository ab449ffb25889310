//! banchi - Japanese address geocoder over a memory-mapped address-tree
//! store
//!
//! # Architecture
//!
//! - **Node store**: fixed-size record arena in nodes.bin, mmap-backed,
//!   children as sibling chains
//! - **Itaiji normalizer**: variant-kanji and numeral canonicalization
//!   shared by index build and query parsing
//! - **Trie index**: fst map from standardized notations to candidate
//!   node ids (address.trie / trie_nodes.bin)
//! - **Matching engine**: longest-match descent with backtracking over
//!   notation variants
//! - **Reverse index**: lazily built, persisted R-tree with Delaunay
//!   candidate selection (rtree.idx)
//! - **Facade**: one `AddressTree` surface with local and remote
//!   providers, selected once at construction
//!
//! # Usage example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use banchi::tree::{AddressTree, LocalTree};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let tree = LocalTree::open(Path::new("/opt/banchi/db"))?;
//!
//! for result in tree.search_node("新宿区西新宿2-8-1")? {
//!     println!("{} -> {}", result.matched, result.node.name);
//! }
//!
//! let candidates = tree.reverse(139.6917, 35.6896, None)?;
//! println!("nearest: {:?}", candidates.first());
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod builder;
pub mod error;
pub mod itaiji;
pub mod proto;
pub mod result;
pub mod reverse;
pub mod search;
pub mod storage;
pub mod strnum;
pub mod tree;
pub mod trie;

pub use address::AddressLevel;
pub use error::{GeocodeError, Result};
pub use result::{GeocodeResult, MatchResult, NodeDetail, ReverseCandidate};
pub use storage::AddressNode;
pub use tree::{open, AddressTree, AzaSkip, LocalTree, RemoteTree, SearchConfig};
