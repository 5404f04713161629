//! Serve an advertisement chain to indexers over HTTP
//!
//! Indexers pull a chain by fetching the signed head, then walking blocks back
//! through `PreviousID` links. This crate provides the two routes they use:
//!
//! - `GET /ipni/v1/ad/head`: the current head as DAG-JSON `{ head, topic, pubkey, sig }`
//! - `GET /ipni/v1/ad/{cid}`: raw block bytes
//!
//! # Example
//!
//! ```no_run
//! use naam_axum::{ChainServer, chain_router};
//! use naam_chain::{MemoryBlockStore, MemoryChainState};
//!
//! #[tokio::main]
//! async fn main() {
//!     let key = libp2p_identity::Keypair::generate_ed25519();
//!     let server = ChainServer::new(MemoryBlockStore::new(), MemoryChainState::new(), key);
//!     let app = chain_router(server);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:9999").await.unwrap();
//!     axum::serve(listener, app).await.unwrap();
//! }
//! ```

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use bytes::Bytes;
use cid::Cid as IpldCid;
use naam_chain::head::DEFAULT_TOPIC;
use naam_chain::storage::BlockStore;
use naam_chain::{ChainError, ChainStateStore, SignedHead, SigningKey};
use serde_json::json;
use smol_str::SmolStr;
use std::sync::Arc;

/// Path of the signed head
pub const HEAD_PATH: &str = "/ipni/v1/ad/head";

/// Path of a block, with `{cid}` as the capture
pub const BLOCK_PATH: &str = "/ipni/v1/ad/{cid}";

/// Chain storage and the key that signs its head
#[derive(Debug)]
pub struct ChainServer<S, C, K> {
    storage: S,
    state: C,
    key: K,
    topic: SmolStr,
}

impl<S, C, K> ChainServer<S, C, K> {
    /// Serve `storage` and `state`, signing heads with `key` on the default topic
    pub fn new(storage: S, state: C, key: K) -> Self {
        Self {
            storage,
            state,
            key,
            topic: DEFAULT_TOPIC.into(),
        }
    }

    /// Sign heads for a different ingest topic
    pub fn with_topic(mut self, topic: impl Into<SmolStr>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Topic heads are signed for
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Request failures, rendered as JSON `{ error, message }`
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum ServeError {
    /// Path segment is not a CID
    #[error("invalid CID `{0}`")]
    #[diagnostic(code(naam_axum::invalid_cid))]
    InvalidCid(String),

    /// Block is not in the store
    #[error("block {0} not found")]
    #[diagnostic(code(naam_axum::not_found))]
    NotFound(IpldCid),

    /// Storage or signing failed
    #[error("internal error")]
    #[diagnostic(code(naam_axum::internal))]
    Internal(#[source] ChainError),
}

impl ServeError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCid(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::InvalidCid(_) => "InvalidCid",
            Self::NotFound(_) => "NotFound",
            Self::Internal(_) => "InternalError",
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        if let Self::Internal(e) = &self {
            tracing::error!(error = %e, "chain request failed");
        }
        let body = json!({ "error": self.name(), "message": self.to_string() });
        (self.status(), axum::Json(body)).into_response()
    }
}

/// Router serving the head and blocks of one chain
pub fn chain_router<S, C, K>(server: ChainServer<S, C, K>) -> Router
where
    S: BlockStore + Send + Sync + 'static,
    C: ChainStateStore + Send + Sync + 'static,
    K: SigningKey + Send + Sync + 'static,
{
    Router::new()
        .route(HEAD_PATH, get(head::<S, C, K>))
        .route(BLOCK_PATH, get(block::<S, C, K>))
        .with_state(Arc::new(server))
}

async fn head<S, C, K>(State(server): State<Arc<ChainServer<S, C, K>>>) -> Result<Response, ServeError>
where
    S: BlockStore + Send + Sync + 'static,
    C: ChainStateStore + Send + Sync + 'static,
    K: SigningKey + Send + Sync + 'static,
{
    let Some(head) = server.state.head().await.map_err(ServeError::Internal)? else {
        return Ok(StatusCode::NO_CONTENT.into_response());
    };
    let signed = SignedHead::sign(head, server.topic.clone(), &server.key)
        .and_then(|signed| signed.to_dag_json())
        .map_err(ServeError::Internal)?;
    Ok((
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        signed,
    )
        .into_response())
}

async fn block<S, C, K>(
    State(server): State<Arc<ChainServer<S, C, K>>>,
    Path(cid): Path<String>,
) -> Result<Response, ServeError>
where
    S: BlockStore + Send + Sync + 'static,
    C: ChainStateStore + Send + Sync + 'static,
    K: SigningKey + Send + Sync + 'static,
{
    let cid: IpldCid = cid.parse().map_err(|_| ServeError::InvalidCid(cid))?;
    let bytes: Bytes = server
        .storage
        .get(&cid)
        .await
        .map_err(ServeError::Internal)?
        .ok_or(ServeError::NotFound(cid))?;
    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        )],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use libp2p_identity::Keypair;
    use naam_chain::{MemoryBlockStore, MemoryChainState};
    use tower::ServiceExt;

    async fn get_path(app: Router, path: &str) -> (StatusCode, Bytes) {
        let response = app
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, to_bytes(response.into_body(), usize::MAX).await.unwrap())
    }

    #[tokio::test]
    async fn test_head_of_empty_chain_is_no_content() {
        let app = chain_router(ChainServer::new(
            MemoryBlockStore::new(),
            MemoryChainState::new(),
            Keypair::generate_ed25519(),
        ));
        let (status, body) = get_path(app, HEAD_PATH).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_head_is_signed() {
        let store = MemoryBlockStore::new();
        let state = MemoryChainState::new();
        let key = Keypair::generate_ed25519();
        let peer = key.public().to_peer_id();
        let head = store.put(b"\xa0").await.unwrap();
        state
            .set_head_and_advance_height(Default::default(), head)
            .await
            .unwrap();

        let app = chain_router(ChainServer::new(store, state, key).with_topic("/test"));
        let (status, body) = get_path(app, HEAD_PATH).await;

        assert_eq!(status, StatusCode::OK);
        let signed = SignedHead::from_dag_json(&body).unwrap();
        assert_eq!(signed.head, head);
        assert_eq!(signed.topic, "/test");
        assert_eq!(signed.verify().unwrap(), peer);
    }

    #[tokio::test]
    async fn test_block_lookup() {
        let store = MemoryBlockStore::new();
        let cid = store.put(b"\xa0").await.unwrap();
        let missing = naam_chain::block::compute_cid(b"\x80").unwrap();
        let app = chain_router(ChainServer::new(
            store,
            MemoryChainState::new(),
            Keypair::generate_ed25519(),
        ));

        let (status, body) = get_path(app.clone(), &format!("/ipni/v1/ad/{cid}")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"\xa0");

        let (status, _) = get_path(app.clone(), &format!("/ipni/v1/ad/{missing}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = get_path(app, "/ipni/v1/ad/not-a-cid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "InvalidCid");
    }
}
