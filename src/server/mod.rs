//! HTTP surface
//!
//! Thin glue over the core: axum routes for auth, resource CRUD, and the
//! SSE update stream. Requests resolve a resource name, the registry
//! ensures its table, the store runs the operation, and the bus broadcasts.

mod routes;

pub use routes::{create_router, ApiError};

use crate::auth::{CredentialGate, TokenSigner};
use crate::bus::UpdateBus;
use crate::resources::Registry;
use crate::storage::{DocumentStore, SqliteBackend};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub store: DocumentStore,
    pub gate: Arc<CredentialGate>,
    pub bus: Arc<UpdateBus>,
}

impl AppState {
    /// Wire the core services around one storage backend
    pub fn new(backend: Arc<SqliteBackend>, token_secret: &[u8]) -> Self {
        let bus = Arc::new(UpdateBus::new());
        let registry = Registry::new(backend.clone());
        let store = DocumentStore::new(backend, bus.clone());
        let gate = Arc::new(CredentialGate::new(
            store.clone(),
            registry.clone(),
            TokenSigner::new(token_secret),
        ));

        Self {
            registry,
            store,
            gate,
            bus,
        }
    }
}

/// Run the HTTP server
pub async fn run_server(bind_addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "docbus server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
