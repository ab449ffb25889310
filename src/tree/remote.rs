//! The address tree backed by a remote banchi server
//!
//! Serializes the same calls as the local provider over the MessagePack
//! protocol and deserializes identical result shapes. Any transport
//! failure (connect, timeout, short read, malformed response) is mapped
//! to the one distinguished `Transport` error kind so callers can treat
//! local and remote failures uniformly except for that class.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::{GeocodeError, Result};
use crate::proto::{self, error_kind, Request, Response};
use crate::result::{GeocodeResult, MatchResult, ReverseCandidate};
use crate::storage::AddressNode;
use crate::tree::{AddressTree, SearchConfig};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote provider bound to one server address.
pub struct RemoteTree {
    addr: String,
    timeout: Duration,
    config: SearchConfig,
}

impl RemoteTree {
    /// Bind to a server address ("host:port").
    pub fn new(addr: &str) -> Result<Self> {
        if addr.to_socket_addrs().map(|mut a| a.next()).ok().flatten().is_none() {
            return Err(GeocodeError::Config(format!(
                "Invalid server address: '{}'",
                addr
            )));
        }
        Ok(Self {
            addr: addr.to_string(),
            timeout: DEFAULT_TIMEOUT,
            config: SearchConfig::from_env(),
        })
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn transport(context: &str, e: impl std::fmt::Display) -> GeocodeError {
        GeocodeError::Transport(format!("{}: {}", context, e))
    }

    /// One request/response round trip with connect/read/write timeouts.
    fn call(&self, request: &Request) -> Result<Response> {
        let addr = self
            .addr
            .to_socket_addrs()
            .map_err(|e| Self::transport("resolve", e))?
            .next()
            .ok_or_else(|| GeocodeError::Transport(format!("no address for '{}'", self.addr)))?;

        let mut stream = TcpStream::connect_timeout(&addr, self.timeout)
            .map_err(|e| Self::transport("connect", e))?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| Self::transport("socket", e))?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|e| Self::transport("socket", e))?;

        let payload =
            rmp_serde::to_vec_named(request).map_err(|e| Self::transport("encode", e))?;
        proto::write_message(&mut stream, &payload)
            .map_err(|e| Self::transport("send", e))?;

        let response = proto::read_message(&mut stream)
            .map_err(|e| Self::transport("receive", e))?
            .ok_or_else(|| GeocodeError::Transport("connection closed by server".to_string()))?;

        rmp_serde::from_slice(&response).map_err(|e| Self::transport("malformed response", e))
    }

    /// Map a structured server error back to the local error taxonomy.
    fn map_error(kind: &str, error: String, id: Option<u32>) -> GeocodeError {
        match kind {
            error_kind::CONFIG => GeocodeError::Config(error),
            error_kind::NOT_FOUND => GeocodeError::NodeNotFound(id.unwrap_or(0)),
            error_kind::DATASET => GeocodeError::InvalidFormat(error),
            error_kind::INDEX => GeocodeError::IndexBuild(error),
            _ => GeocodeError::Transport(format!("server error: {}", error)),
        }
    }

    fn unexpected() -> GeocodeError {
        GeocodeError::Transport("unexpected response shape".to_string())
    }
}

impl AddressTree for RemoteTree {
    fn get_node_by_id(&self, node_id: u32) -> Result<AddressNode> {
        match self.call(&Request::GetNode { id: node_id })? {
            Response::Node { node } => Ok(node),
            Response::Error { kind, error } => Err(Self::map_error(&kind, error, Some(node_id))),
            _ => Err(Self::unexpected()),
        }
    }

    fn count_records(&self) -> Result<usize> {
        match self.call(&Request::NodeCount)? {
            Response::Count { count } => Ok(count as usize),
            Response::Error { kind, error } => Err(Self::map_error(&kind, error, None)),
            _ => Err(Self::unexpected()),
        }
    }

    fn get_fullname(&self, node: &AddressNode) -> Result<Vec<String>> {
        match self.call(&Request::GetFullname { id: node.id })? {
            Response::Fullname { fullname } => Ok(fullname),
            Response::Error { kind, error } => Err(Self::map_error(&kind, error, Some(node.id))),
            _ => Err(Self::unexpected()),
        }
    }

    fn search_nodes_by_codes(&self, category: &str, value: &str) -> Result<Vec<AddressNode>> {
        let request = Request::SearchByCodes {
            category: category.to_string(),
            value: value.to_string(),
        };
        match self.call(&request)? {
            Response::Nodes { nodes } => Ok(nodes),
            Response::Error { kind, error } => Err(Self::map_error(&kind, error, None)),
            _ => Err(Self::unexpected()),
        }
    }

    fn search_node(&self, query: &str) -> Result<Vec<MatchResult>> {
        let request = Request::SearchNode {
            query: query.to_string(),
            config: self.config.clone(),
        };
        match self.call(&request)? {
            Response::Matches { results } => Ok(results),
            Response::Error { kind, error } => Err(Self::map_error(&kind, error, None)),
            _ => Err(Self::unexpected()),
        }
    }

    fn search(&self, query: &str) -> Result<GeocodeResult> {
        // One round trip instead of the per-node fullname resolution of
        // the provided method.
        let request = Request::Search {
            query: query.to_string(),
            config: self.config.clone(),
        };
        match self.call(&request)? {
            Response::Geocode { result } => Ok(result),
            Response::Error { kind, error } => Err(Self::map_error(&kind, error, None)),
            _ => Err(Self::unexpected()),
        }
    }

    fn reverse(&self, x: f64, y: f64, level: Option<i8>) -> Result<Vec<ReverseCandidate>> {
        match self.call(&Request::Reverse { x, y, level })? {
            Response::ReverseResults { candidates } => Ok(candidates),
            Response::Error { kind, error } => Err(Self::map_error(&kind, error, None)),
            _ => Err(Self::unexpected()),
        }
    }

    fn installed_dictionary_version(&self) -> Result<String> {
        match self.call(&Request::DatasetInfo)? {
            Response::Metadata { metadata } => Ok(metadata.version),
            Response::Error { kind, error } => Err(Self::map_error(&kind, error, None)),
            _ => Err(Self::unexpected()),
        }
    }

    fn get_config(&self) -> SearchConfig {
        self.config.clone()
    }

    fn set_config(&mut self, config: SearchConfig) -> Result<()> {
        // Validated server-side on each request carrying it
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_address_rejected() {
        assert!(matches!(
            RemoteTree::new("not an address"),
            Err(GeocodeError::Config(_))
        ));
    }

    #[test]
    fn test_connection_refused_is_transport() {
        // Reserved port with nothing listening
        let tree = RemoteTree::new("127.0.0.1:9")
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        match tree.count_records() {
            Err(GeocodeError::Transport(_)) => {}
            other => panic!("expected a transport error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_error_mapping() {
        assert!(matches!(
            RemoteTree::map_error(error_kind::CONFIG, "bad".into(), None),
            GeocodeError::Config(_)
        ));
        assert!(matches!(
            RemoteTree::map_error(error_kind::NOT_FOUND, "missing".into(), Some(7)),
            GeocodeError::NodeNotFound(7)
        ));
        assert!(matches!(
            RemoteTree::map_error(error_kind::INTERNAL, "boom".into(), None),
            GeocodeError::Transport(_)
        ));
    }
}
