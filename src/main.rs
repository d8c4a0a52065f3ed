mod api;
mod config;
mod judge;
mod memfs;
mod metadata;
mod problem;
mod revision;
mod sandbox;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::api::AppState;
use crate::judge::{Judge, JudgePool};
use crate::metadata::{MemoryMetadataStore, MetadataStore};
use crate::problem::storage::StorageClient;
use crate::revision::{DirRevisionStore, RevisionStore};
use crate::sandbox::SandboxClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("probuild=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config_path =
        std::env::var("PROBUILD_CONFIG").unwrap_or_else(|_| "probuild.toml".into());
    let conf = config::init_from_file(&config_path)?;
    info!("Loaded configuration from {config_path}");

    let pool = Arc::new(JudgePool::new());
    for (id, endpoint) in &conf.judges {
        let token = (!endpoint.token.is_empty()).then_some(endpoint.token.as_str());
        let client = SandboxClient::connect(&endpoint.host, token)
            .with_context(|| format!("failed to set up judge '{id}'"))?;
        let judge = Judge::new(id.clone(), Arc::new(client));
        judge.start();
        pool.register(judge);
        info!("Registered judge '{id}' at {}", endpoint.host);
    }
    if pool.is_empty() {
        warn!("No judges configured; builds will fail until one is added");
    }

    let storage = StorageClient::from_config(&conf.storage);
    let repo: Arc<dyn RevisionStore> = Arc::new(DirRevisionStore::new(&conf.repo_root));
    let metadata: Arc<dyn MetadataStore> = Arc::new(MemoryMetadataStore::new());
    info!("Reading problem snapshots from {}", conf.repo_root);

    let state = Arc::new(AppState {
        pool,
        repo,
        storage,
        metadata,
    });
    let app = api::router(state);

    let listener = TcpListener::bind(&conf.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", conf.listen_addr))?;
    info!("Listening on {}", conf.listen_addr);
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
