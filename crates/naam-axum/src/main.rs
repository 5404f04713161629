use libp2p_identity::Keypair;
use miette::{IntoDiagnostic, Result, WrapErr};
use naam::PublisherOptions;
use naam_axum::{ChainServer, chain_router};
use naam_chain::{FileBlockStore, FileChainState};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const KEY_FILE: &str = "identity.key";
const CAR_FILE: &str = "chain.car";
const STATE_DIR: &str = "state";

/// Load the operator key from `dir`, creating one on first start
async fn load_or_create_key(dir: &Path) -> Result<Keypair> {
    let path = dir.join(KEY_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Keypair::from_protobuf_encoding(&bytes)
            .into_diagnostic()
            .wrap_err_with(|| format!("decoding key from {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            let key = Keypair::generate_ed25519();
            let encoded = key.to_protobuf_encoding().into_diagnostic()?;
            tokio::fs::write(&path, encoded)
                .await
                .into_diagnostic()
                .wrap_err_with(|| format!("writing key to {}", path.display()))?;
            tracing::info!(path = %path.display(), "generated operator key");
            Ok(key)
        }
        Err(e) => Err(e)
            .into_diagnostic()
            .wrap_err_with(|| format!("reading key from {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_env_filter(EnvFilter::from_env("NAAM_LOG"))
        .init();

    let data_dir = std::env::var_os("NAAM_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("naam-data"));
    let mut options = PublisherOptions::default();
    if let Ok(listen) = std::env::var("NAAM_LISTEN") {
        options.listen_addr = listen;
    }
    let config = options.validate()?;

    tokio::fs::create_dir_all(&data_dir).await.into_diagnostic()?;
    let key = load_or_create_key(&data_dir).await?;
    let storage = FileBlockStore::open(data_dir.join(CAR_FILE)).await?;
    let state = FileChainState::open(data_dir.join(STATE_DIR)).await?;

    tracing::info!(
        name = %naam::name_of(key.public().to_peer_id()),
        data_dir = %data_dir.display(),
        "serving chain"
    );

    let app = chain_router(ChainServer::new(storage, state, key))
        .layer(tower_http::trace::TraceLayer::new_for_http());
    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .into_diagnostic()?;
    tracing::info!(addr = %config.listen_addr, "listening");
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}
