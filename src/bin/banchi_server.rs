//! Banchi server - TCP server for the address tree
//!
//! Exposes the full operation set over a MessagePack protocol. Multiple
//! clients connect and share one read-only dataset.
//!
//! Usage:
//!   banchi-server <db-dir> [--listen <addr:port>]
//!
//! Protocol:
//!   Request:  [4-byte length BE] [MessagePack payload]
//!   Response: [4-byte length BE] [MessagePack payload]

use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Context;

use banchi::proto::{self, error_kind, Request, Response};
use banchi::result::{GeocodeResult, NodeDetail};
use banchi::error::GeocodeError;
use banchi::tree::{AddressTree, LocalTree, SearchConfig};

fn error_response(e: &GeocodeError) -> Response {
    let kind = match e {
        GeocodeError::Config(_) => error_kind::CONFIG,
        GeocodeError::NodeNotFound(_) => error_kind::NOT_FOUND,
        GeocodeError::InvalidFormat(_) => error_kind::DATASET,
        GeocodeError::IndexBuild(_) => error_kind::INDEX,
        _ => error_kind::INTERNAL,
    };
    Response::error(kind, e.to_string())
}

/// `search` with a per-request configuration.
fn geocode(tree: &LocalTree, query: &str, config: &SearchConfig) -> Result<GeocodeResult, GeocodeError> {
    let results = tree.search_node_with(query, config)?;
    let mut out = GeocodeResult::default();
    for result in results {
        if out.candidates.is_empty() {
            out.matched = result.matched.clone();
        } else if result.matched != out.matched {
            break;
        }
        let fullname = tree.get_fullname(&result.node)?;
        out.candidates
            .push(NodeDetail::from_node(&result.node, fullname));
    }
    Ok(out)
}

fn handle_request(tree: &LocalTree, request: Request) -> Response {
    match request {
        Request::SearchNode { query, config } => {
            match tree.search_node_with(&query, &config) {
                Ok(results) => Response::Matches { results },
                Err(e) => error_response(&e),
            }
        }
        Request::Search { query, config } => match geocode(tree, &query, &config) {
            Ok(result) => Response::Geocode { result },
            Err(e) => error_response(&e),
        },
        Request::Reverse { x, y, level } => match tree.reverse(x, y, level) {
            Ok(candidates) => Response::ReverseResults { candidates },
            Err(e) => error_response(&e),
        },
        Request::GetNode { id } => match tree.get_node_by_id(id) {
            Ok(node) => Response::Node { node },
            Err(e) => error_response(&e),
        },
        Request::GetFullname { id } => {
            match tree
                .get_node_by_id(id)
                .and_then(|node| tree.get_fullname(&node))
            {
                Ok(fullname) => Response::Fullname { fullname },
                Err(e) => error_response(&e),
            }
        }
        Request::SearchByCodes { category, value } => {
            match tree.search_nodes_by_codes(&category, &value) {
                Ok(nodes) => Response::Nodes { nodes },
                Err(e) => error_response(&e),
            }
        }
        Request::NodeCount => match tree.count_records() {
            Ok(count) => Response::Count {
                count: count as u64,
            },
            Err(e) => error_response(&e),
        },
        Request::DatasetInfo => Response::Metadata {
            metadata: tree.metadata().clone(),
        },
        Request::Ping => Response::Pong {
            pong: true,
            version: env!("CARGO_PKG_VERSION").to_string(),
            dataset_version: tree.metadata().version.clone(),
        },
        Request::Shutdown => {
            // Handled specially in the client loop
            Response::Ok { ok: true }
        }
    }
}

fn handle_client(mut stream: TcpStream, tree: Arc<LocalTree>, client_id: usize) {
    tracing::info!("Client {} connected", client_id);

    loop {
        let msg = match proto::read_message(&mut stream) {
            Ok(Some(msg)) => msg,
            Ok(None) => {
                tracing::info!("Client {} disconnected", client_id);
                break;
            }
            Err(e) => {
                tracing::warn!("Client {} read error: {}", client_id, e);
                break;
            }
        };

        let request: Request = match rmp_serde::from_slice(&msg) {
            Ok(req) => req,
            Err(e) => {
                let response =
                    Response::error(error_kind::INTERNAL, format!("Invalid request: {}", e));
                if let Ok(bytes) = rmp_serde::to_vec_named(&response) {
                    let _ = proto::write_message(&mut stream, &bytes);
                }
                continue;
            }
        };

        let is_shutdown = matches!(request, Request::Shutdown);

        let response = handle_request(&tree, request);

        let bytes = match rmp_serde::to_vec_named(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Serialize error: {}", e);
                continue;
            }
        };

        if let Err(e) = proto::write_message(&mut stream, &bytes) {
            tracing::warn!("Client {} write error: {}", client_id, e);
            break;
        }

        if is_shutdown {
            tracing::info!("Shutdown requested by client {}", client_id);
            std::process::exit(0);
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: banchi-server <db-dir> [--listen <addr:port>]");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  <db-dir>   Path to the dataset directory");
        eprintln!("  --listen   Listen address (default: 127.0.0.1:8610)");
        std::process::exit(1);
    }

    let db_dir = PathBuf::from(&args[1]);
    let listen_addr = args
        .iter()
        .position(|a| a == "--listen")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
        .unwrap_or("127.0.0.1:8610");

    tracing::info!("Opening dataset: {:?}", db_dir);
    let tree = LocalTree::open(&db_dir)
        .with_context(|| format!("failed to open dataset at {:?}", db_dir))?;
    let tree = Arc::new(tree);

    tracing::info!(
        "Dataset opened: {} nodes, version {}",
        tree.count_records().unwrap_or(0),
        tree.metadata().version
    );

    let listener =
        TcpListener::bind(listen_addr).with_context(|| format!("failed to bind {}", listen_addr))?;
    tracing::info!("Listening on {}", listen_addr);

    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("failed to register signal handlers")?;

    thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            tracing::info!("Received signal {}, exiting", sig);
            std::process::exit(0);
        }
    });

    let mut client_id = 0;
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                client_id += 1;
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    handle_client(stream, tree, client_id);
                });
            }
            Err(e) => {
                tracing::warn!("Accept error: {}", e);
            }
        }
    }

    Ok(())
}
