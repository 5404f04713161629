//! Head announcements to the indexer
//!
//! An announcement tells the indexer "this chain now has head H, fetch it from
//! these addresses". It is sent after the head is committed locally, so a
//! failed announcement never needs a republish, only another announcement.

use crate::error::AnnounceError;
use crate::http_client::HttpClient;
use base64::Engine;
use base64::prelude::BASE64_STANDARD;
use cid::Cid as IpldCid;
use libp2p_identity::PeerId;
use multiaddr::{Multiaddr, Protocol};
use url::Url;

/// Notifies an indexer of a new chain head
#[trait_variant::make(Send)]
pub trait Announcer {
    /// Announce `head`, fetchable at `addrs`
    async fn announce(&self, head: IpldCid, addrs: &[Multiaddr]) -> Result<(), AnnounceError>;
}

/// DAG-JSON style link: `{"/": "<cid>"}`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CidLink {
    /// CID string
    #[serde(rename = "/")]
    pub link: String,
}

/// Announce message body
///
/// Addresses are binary multiaddrs, base64 encoded, each ending in
/// `/p2p/<publisher peer id>`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct AnnounceMessage {
    /// New head
    #[serde(rename = "Cid")]
    pub cid: CidLink,
    /// Base64 binary multiaddrs
    #[serde(rename = "Addrs")]
    pub addrs: Vec<String>,
    /// Publisher peer id
    #[serde(rename = "OrigPeer", default, skip_serializing_if = "Option::is_none")]
    pub orig_peer: Option<String>,
}

impl AnnounceMessage {
    /// Build a message for `head` published by `peer`
    pub fn new(head: IpldCid, addrs: &[Multiaddr], peer: &PeerId) -> Self {
        let addrs = addrs
            .iter()
            .map(|addr| BASE64_STANDARD.encode(with_peer(addr, peer).to_vec()))
            .collect();
        Self {
            cid: CidLink {
                link: head.to_string(),
            },
            addrs,
            orig_peer: Some(peer.to_string()),
        }
    }

    /// Decode the announced addresses
    pub fn multiaddrs(&self) -> Result<Vec<Multiaddr>, String> {
        self.addrs
            .iter()
            .map(|encoded| {
                let bytes = BASE64_STANDARD.decode(encoded).map_err(|e| e.to_string())?;
                Multiaddr::try_from(bytes).map_err(|e| e.to_string())
            })
            .collect()
    }
}

/// Append `/p2p/<peer>` unless the address already names a peer
fn with_peer(addr: &Multiaddr, peer: &PeerId) -> Multiaddr {
    if addr.iter().any(|p| matches!(p, Protocol::P2p(_))) {
        addr.clone()
    } else {
        addr.clone().with(Protocol::P2p(*peer))
    }
}

/// Announcer that PUTs JSON messages to `{url}/announce`
#[derive(Debug, Clone)]
pub struct HttpAnnouncer<C> {
    client: C,
    endpoint: Url,
    peer: PeerId,
}

impl<C: HttpClient> HttpAnnouncer<C> {
    /// Create an announcer for the ingest API at `base`
    pub fn new(client: C, base: &Url, peer: PeerId) -> Self {
        let mut endpoint = base.clone();
        let path = format!("{}/announce", endpoint.path().trim_end_matches('/'));
        endpoint.set_path(&path);
        Self {
            client,
            endpoint,
            peer,
        }
    }

    /// Full announce URL
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

impl<C: HttpClient + Sync> Announcer for HttpAnnouncer<C> {
    async fn announce(&self, head: IpldCid, addrs: &[Multiaddr]) -> Result<(), AnnounceError> {
        let message = AnnounceMessage::new(head, addrs, &self.peer);
        let body = serde_json::to_vec(&message)?;

        let request = http::Request::builder()
            .method(http::Method::PUT)
            .uri(self.endpoint.as_str())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(body)
            .map_err(|e| AnnounceError::Transport(Box::new(e)))?;

        let response = self
            .client
            .send_http(request)
            .await
            .map_err(|e| AnnounceError::Transport(Box::new(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnnounceError::Status {
                status,
                body: String::from_utf8_lossy(response.body()).into_owned(),
            });
        }
        tracing::debug!(%head, endpoint = %self.endpoint, "head announced");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;
    use libp2p_identity::Keypair;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingClient {
        status: Option<StatusCode>,
        requests: Arc<Mutex<Vec<http::Request<Vec<u8>>>>>,
    }

    impl HttpClient for RecordingClient {
        type Error = std::io::Error;

        async fn send_http(
            &self,
            request: http::Request<Vec<u8>>,
        ) -> Result<http::Response<Vec<u8>>, Self::Error> {
            self.requests.lock().unwrap().push(request);
            Ok(http::Response::builder()
                .status(self.status.unwrap_or(StatusCode::NO_CONTENT))
                .body(b"nope".to_vec())
                .unwrap())
        }
    }

    fn head() -> IpldCid {
        naam_chain::block::compute_cid(b"head").unwrap()
    }

    #[test]
    fn test_message_appends_peer_to_addrs() {
        let peer = Keypair::generate_ed25519().public().to_peer_id();
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/9999/http".parse().unwrap();

        let msg = AnnounceMessage::new(head(), &[addr.clone()], &peer);

        assert_eq!(msg.cid.link, head().to_string());
        assert_eq!(msg.orig_peer, Some(peer.to_string()));
        assert_eq!(msg.multiaddrs().unwrap(), vec![addr.with(Protocol::P2p(peer))]);

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["Cid"]["/"], head().to_string());
    }

    #[test]
    fn test_message_keeps_existing_peer() {
        let peer = Keypair::generate_ed25519().public().to_peer_id();
        let addr: Multiaddr = format!("/ip4/127.0.0.1/tcp/9999/http/p2p/{peer}")
            .parse()
            .unwrap();

        let msg = AnnounceMessage::new(head(), &[addr.clone()], &peer);
        assert_eq!(msg.multiaddrs().unwrap(), vec![addr]);
    }

    #[test]
    fn test_endpoint_joins_announce_path() {
        let peer = Keypair::generate_ed25519().public().to_peer_id();
        for (base, expected) in [
            ("http://localhost:3001", "http://localhost:3001/announce"),
            ("http://localhost:3001/", "http://localhost:3001/announce"),
            ("https://indexer.example/ingest/", "https://indexer.example/ingest/announce"),
        ] {
            let announcer =
                HttpAnnouncer::new(RecordingClient::default(), &Url::parse(base).unwrap(), peer);
            assert_eq!(announcer.endpoint().as_str(), expected);
        }
    }

    #[tokio::test]
    async fn test_announce_puts_json() {
        let client = RecordingClient::default();
        let peer = Keypair::generate_ed25519().public().to_peer_id();
        let announcer = HttpAnnouncer::new(
            client.clone(),
            &Url::parse("http://localhost:3001").unwrap(),
            peer,
        );
        let addr: Multiaddr = "/ip4/127.0.0.1/tcp/9999/http".parse().unwrap();

        announcer.announce(head(), &[addr]).await.unwrap();

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method(), http::Method::PUT);
        assert_eq!(requests[0].uri(), "http://localhost:3001/announce");
        let msg: AnnounceMessage = serde_json::from_slice(requests[0].body()).unwrap();
        assert_eq!(msg.cid.link, head().to_string());
    }

    #[tokio::test]
    async fn test_rejected_announce_reports_status() {
        let client = RecordingClient {
            status: Some(StatusCode::BAD_REQUEST),
            ..Default::default()
        };
        let peer = Keypair::generate_ed25519().public().to_peer_id();
        let announcer =
            HttpAnnouncer::new(client, &Url::parse("http://localhost:3001").unwrap(), peer);

        let err = announcer.announce(head(), &[]).await.unwrap_err();
        assert!(matches!(
            err,
            AnnounceError::Status { status, .. } if status == StatusCode::BAD_REQUEST
        ));
    }
}
