mod apply;
mod command;
mod grpc;
mod node;
mod subscription;
mod transport;

pub mod options;

pub use node::Node;
pub use options::Options;

/// Boots one cluster member and blocks until its gRPC server stops. Exists
/// as a library entry point (rather than only living in `main`) so
/// integration tests can spawn several nodes in-process via
/// `tokio::spawn(chat_node::run(options))` against a fresh temp directory
/// and a random port.
pub async fn run(options: Options) -> eyre::Result<()> {
    let node = Node::bootstrap(options).await?;
    node::log_startup(&node);
    grpc::serve(node).await
}
