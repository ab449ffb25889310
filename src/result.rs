//! Public result types

use serde::{Deserialize, Serialize};

use crate::storage::AddressNode;

/// One forward-geocoding result: the longest consumed substring of the
/// query and the terminal node of that parse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub node: AddressNode,
    pub matched: String,
}

/// Node payload with the resolved ancestor names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetail {
    pub id: u32,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub level: i8,
    pub priority: u8,
    pub note: String,
    pub fullname: Vec<String>,
}

impl NodeDetail {
    pub fn from_node(node: &AddressNode, fullname: Vec<String>) -> Self {
        Self {
            id: node.id,
            name: node.name.clone(),
            x: node.x,
            y: node.y,
            level: node.level,
            priority: node.priority,
            note: node.note.clone(),
            fullname,
        }
    }
}

/// The result of `search`: the matched substring shared by the best
/// candidates, with their node payloads.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeocodeResult {
    pub matched: String,
    pub candidates: Vec<NodeDetail>,
}

/// One reverse-geocoding candidate with its geodesic distance in meters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReverseCandidate {
    pub candidate: NodeDetail,
    pub dist: f64,
}
