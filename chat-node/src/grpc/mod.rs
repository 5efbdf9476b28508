mod chat_service;
mod raft_service;

use std::sync::Arc;

use chat_grpc::chat_service_server::ChatServiceServer;
use chat_grpc::raft_service_server::RaftServiceServer;
use tonic::transport::Server;
use tracing::info;

use crate::node::Node;

pub async fn serve(node: Arc<Node>) -> eyre::Result<()> {
    let addr = node.bind_address.to_string().parse()?;

    let chat_service = ChatServiceServer::new(chat_service::ChatServiceImpl::new(node.clone()));
    let raft_service = RaftServiceServer::new(raft_service::RaftServiceImpl::new(node.clone()));

    info!(%addr, "chat node gRPC server listening");

    Server::builder()
        .add_service(chat_service)
        .add_service(raft_service)
        .serve(addr)
        .await?;

    Ok(())
}
