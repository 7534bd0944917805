//! Docbus - schema-less JSON document store with live change notification
//!
//! Any named resource becomes an on-demand SQLite table of JSON documents,
//! exposed through generic CRUD operations behind a bearer-token gate, with
//! mutation events fanned out to SSE subscribers.

pub mod auth;
pub mod bus;
pub mod resources;
pub mod server;
pub mod storage;

pub use auth::{Claims, CredentialGate, TokenSigner};
pub use bus::{Action, ChangeEvent, UpdateBus};
pub use resources::{Registry, ResourceName};
pub use server::AppState;
pub use storage::{Document, DocumentStore, Patch, SqliteBackend};
