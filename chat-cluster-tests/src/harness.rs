//! In-process cluster harness: spawns several nodes that know about each
//! other via `tokio::spawn(chat_node::run(options))`, each against a random
//! port and a fresh temp directory, with `kill`/`restart` standing in for a
//! process crash and relaunch against the same on-disk log and metadata.

use std::sync::Mutex;
use std::time::Duration;

use chat_common::EndPoint;
use chat_grpc::chat_service_client::ChatServiceClient;
use chat_grpc::RegisterRequest;
use chat_node::Options;
use rand::Rng;
use temp_testdir::TempDir;
use tokio::task::JoinHandle;

/// One cluster member under test. Owns its temp data directory for the
/// whole test (so a `kill`+`restart` reopens the same log) and the handle
/// to its spawned `chat_node::run` task.
pub struct ClusterNode {
    pub id: u64,
    pub address: EndPoint,
    pub options: Options,
    _data_dir: TempDir,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClusterNode {
    /// Starts (or restarts, after a `kill`) this node's `chat_node::run`
    /// task. Safe to call again after `kill`: the options carry the same
    /// `data_directory`, so the restarted node replays its own log and
    /// metadata from disk exactly as a real process restart would.
    pub fn start(&self) {
        let options = self.options.clone();
        let handle = tokio::spawn(async move {
            if let Err(err) = chat_node::run(options).await {
                tracing::warn!(%err, "cluster node exited");
            }
        });

        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Simulates a crash: aborts the node's task without giving it a chance
    /// to flush anything beyond what its normal fsync-on-write already
    /// guaranteed.
    pub fn kill(&self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

fn random_port() -> u16 {
    rand::thread_rng().gen_range(20_000..60_000)
}

/// Spins up `size` cluster members wired to each other's addresses and
/// returns them already running. Callers still need a short sleep before
/// the first write: an election has to complete before any node can
/// propose.
pub async fn spawn_cluster(size: usize) -> Vec<ClusterNode> {
    let addresses: Vec<EndPoint> = (0..size).map(|_| EndPoint::new("127.0.0.1", random_port())).collect();

    let nodes: Vec<ClusterNode> = (0..size)
        .map(|i| {
            let id = i as u64 + 1;
            let peers = addresses
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(j, addr)| (j as u64 + 1, addr.clone()))
                .collect();

            let data_dir = TempDir::default();
            let data_directory = format!("{}", data_dir.display());

            let options = Options {
                id,
                bind_address: addresses[i].to_string(),
                peers,
                data_directory,
                election_timeout_min_ms: 150,
                election_timeout_max_ms: 300,
                heartbeat_period_ms: 30,
                propose_timeout_ms: 3_000,
            };

            ClusterNode {
                id,
                address: addresses[i].clone(),
                options,
                _data_dir: data_dir,
                handle: Mutex::new(None),
            }
        })
        .collect();

    for node in &nodes {
        node.start();
    }

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;

    nodes
}

pub fn addresses(nodes: &[ClusterNode]) -> Vec<EndPoint> {
    nodes.iter().map(|n| n.address.clone()).collect()
}

/// Finds the current leader by probing every node directly with a unique
/// throwaway `Register`, bypassing `ChatClient`'s own redirect-following so
/// the test can observe *which* node accepted the write rather than just
/// getting the result. Polls for up to `timeout` because right after
/// `spawn_cluster` the first election may still be in flight.
pub async fn find_leader(nodes: &[ClusterNode], timeout: Duration) -> Option<usize> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        for (i, node) in nodes.iter().enumerate() {
            let Ok(mut client) = ChatServiceClient::connect(format!("http://{}", node.address)).await else {
                continue;
            };

            let probe = format!("__leader_probe_{}", rand::thread_rng().gen::<u64>());
            let response = client
                .register(RegisterRequest {
                    username: probe,
                    password_hash: vec![],
                })
                .await;

            if let Ok(response) = response {
                if response.into_inner().success {
                    return Some(i);
                }
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return None;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
