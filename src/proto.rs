//! Wire protocol of the banchi server
//!
//! Each request and response is framed as a 4-byte big-endian length
//! followed by a MessagePack payload. Every core operation maps to one
//! named command whose parameters mirror the local signatures; a response
//! is either a result payload or a structured error with a kind and a
//! message. The types live in the library because the remote provider is
//! an in-crate client of the same protocol.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};

use crate::result::{GeocodeResult, MatchResult, ReverseCandidate};
use crate::storage::{AddressNode, DatasetMetadata};
use crate::tree::SearchConfig;

/// Upper bound of one framed message.
pub const MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

/// Request from client
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase")]
pub enum Request {
    SearchNode {
        query: String,
        config: SearchConfig,
    },
    Search {
        query: String,
        config: SearchConfig,
    },
    Reverse {
        x: f64,
        y: f64,
        level: Option<i8>,
    },
    GetNode {
        id: u32,
    },
    GetFullname {
        id: u32,
    },
    SearchByCodes {
        category: String,
        value: String,
    },
    NodeCount,
    DatasetInfo,
    Ping,
    Shutdown,
}

/// Error kinds carried over the wire.
pub mod error_kind {
    pub const CONFIG: &str = "config";
    pub const NOT_FOUND: &str = "notFound";
    pub const DATASET: &str = "dataset";
    pub const INDEX: &str = "index";
    pub const INTERNAL: &str = "internal";
}

/// Response to client
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Error {
        kind: String,
        error: String,
    },
    Matches {
        results: Vec<MatchResult>,
    },
    Geocode {
        result: GeocodeResult,
    },
    ReverseResults {
        candidates: Vec<ReverseCandidate>,
    },
    Node {
        node: AddressNode,
    },
    Nodes {
        nodes: Vec<AddressNode>,
    },
    Fullname {
        fullname: Vec<String>,
    },
    Count {
        count: u64,
    },
    Metadata {
        metadata: DatasetMetadata,
    },
    Pong {
        pong: bool,
        version: String,
        dataset_version: String,
    },
    Ok {
        ok: bool,
    },
}

impl Response {
    pub fn error(kind: &str, error: impl Into<String>) -> Self {
        Response::Error {
            kind: kind.to_string(),
            error: error.into(),
        }
    }
}

/// Read one length-prefixed message; None on a clean end of stream.
pub fn read_message<R: Read>(stream: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("Message too large: {} bytes", len),
        ));
    }

    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;

    Ok(Some(buf))
}

/// Write one length-prefixed message.
pub fn write_message<W: Write>(stream: &mut W, data: &[u8]) -> std::io::Result<()> {
    let len = data.len() as u32;
    stream.write_all(&len.to_be_bytes())?;
    stream.write_all(data)?;
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_roundtrip() {
        let request = Request::SearchNode {
            query: "新宿区西新宿2-8-1".to_string(),
            config: SearchConfig::default(),
        };
        let bytes = rmp_serde::to_vec_named(&request).unwrap();
        let decoded: Request = rmp_serde::from_slice(&bytes).unwrap();
        match decoded {
            Request::SearchNode { query, config } => {
                assert_eq!(query, "新宿区西新宿2-8-1");
                assert!(config.best_only);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_response_roundtrip() {
        let response = Response::Count { count: 42 };
        let bytes = rmp_serde::to_vec_named(&response).unwrap();
        let decoded: Response = rmp_serde::from_slice(&bytes).unwrap();
        match decoded {
            Response::Count { count } => assert_eq!(count, 42),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_error_response_decodes_first() {
        let response = Response::error(error_kind::CONFIG, "bad target area");
        let bytes = rmp_serde::to_vec_named(&response).unwrap();
        let decoded: Response = rmp_serde::from_slice(&bytes).unwrap();
        match decoded {
            Response::Error { kind, error } => {
                assert_eq!(kind, "config");
                assert_eq!(error, "bad target area");
            }
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[test]
    fn test_framing_roundtrip() {
        let mut buf = Vec::new();
        write_message(&mut buf, b"hello").unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let msg = read_message(&mut cursor).unwrap().unwrap();
        assert_eq!(msg, b"hello");

        // Clean EOF yields None
        assert!(read_message(&mut cursor).unwrap().is_none());
    }
}
