//! Shared application state handed to every handler.

use crate::{
    config::AppConfig,
    services::{auth_service::SignatureVerifier, storage_service::ObjectStore},
};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AppState {
    pub store: ObjectStore,
    pub verifier: SignatureVerifier,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build the store and verifier from configuration. Touches no disk.
    pub fn new(config: AppConfig) -> Self {
        Self {
            store: ObjectStore::new(config.data_dir.clone()),
            verifier: SignatureVerifier::new(config.access_key.clone(), config.secret_key.clone()),
            config: Arc::new(config),
        }
    }
}
