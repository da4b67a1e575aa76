//! Local S3-compatible object storage emulator.
//!
//! Buckets and objects live directly on the filesystem under a configured
//! data directory; requests are authenticated with AWS Signature V4 against
//! a single static credential.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

pub use routes::routes::create_router;
pub use state::AppState;
