//! Opening and saving the file-backed authority store.

use std::path::PathBuf;
use std::sync::Arc;

use aletheia_authority::{AuthorityConfig, PersistenceManager, backend::InMemory};

use crate::cli::StoreArgs;

/// An in-memory store loaded from, and saved back to, a JSON file.
pub struct Store {
    backend: Arc<InMemory>,
    path: PathBuf,
    pub manager: PersistenceManager,
}

impl Store {
    pub fn open(args: &StoreArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match &args.config {
            Some(path) => {
                tracing::info!("Loading configuration from {}", path.display());
                AuthorityConfig::from_json_file(path)?
            }
            None => AuthorityConfig::default(),
        };

        let backend = if args.store.exists() {
            tracing::info!("Loading store from {}", args.store.display());
            Arc::new(InMemory::load_from_file(&args.store)?)
        } else {
            tracing::info!("Starting with a fresh store at {}", args.store.display());
            Arc::new(InMemory::new())
        };

        let manager = PersistenceManager::new(backend.clone()).with_config(config)?;
        if let Some(passphrase) = &args.passphrase {
            manager.secrets().set_passphrase(passphrase.clone());
        }
        Ok(Self {
            backend,
            path: args.store.clone(),
            manager,
        })
    }

    /// Write the committed state back to the store file.
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        self.backend.save_to_file(&self.path)?;
        tracing::debug!("Saved store to {}", self.path.display());
        Ok(())
    }
}
