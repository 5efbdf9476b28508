use std::collections::HashMap;

use chat_common::EndPoint;
use clap::Parser;

/// CLI configuration for one cluster member: a handful of `clap`-derived
/// flags with sane defaults, no environment variables required.
#[derive(Parser, Debug, Clone)]
#[command(name = "chat-node")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Options {
    /// This node's id, unique within the cluster.
    #[arg(long)]
    pub id: u64,

    /// Address this node's gRPC server binds to.
    #[arg(long, default_value = "127.0.0.1:8080")]
    pub bind_address: String,

    /// Peer in `id=host:port` form. Repeat once per other voting member.
    #[arg(long = "peer", value_parser = parse_peer)]
    pub peers: Vec<(u64, EndPoint)>,

    /// Directory holding this node's log file, metadata file, and state
    /// machine snapshot. Removing it resets the node.
    #[arg(long, default_value = "./data")]
    pub data_directory: String,

    /// Lower bound of the randomized election timeout, in milliseconds.
    #[arg(long, default_value_t = 150)]
    pub election_timeout_min_ms: u64,

    /// Upper bound of the randomized election timeout, in milliseconds.
    #[arg(long, default_value_t = 300)]
    pub election_timeout_max_ms: u64,

    /// Heartbeat/replication period, in milliseconds. Should stay well
    /// under half of `election_timeout_min_ms`.
    #[arg(long, default_value_t = 50)]
    pub heartbeat_period_ms: u64,

    /// How long a client-visible `propose` waits for its command to commit
    /// and apply before returning `Timeout`.
    #[arg(long, default_value_t = 2000)]
    pub propose_timeout_ms: u64,
}

impl Options {
    pub fn peer_map(&self) -> HashMap<u64, EndPoint> {
        self.peers.iter().cloned().collect()
    }
}

fn parse_peer(raw: &str) -> Result<(u64, EndPoint), String> {
    let (id, addr) = raw
        .split_once('=')
        .ok_or_else(|| format!("'{raw}' is not an id=host:port pair"))?;

    let id: u64 = id
        .parse()
        .map_err(|_| format!("'{id}' is not a valid peer id"))?;

    let endpoint: EndPoint = addr.parse()?;

    Ok((id, endpoint))
}
