use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, instrument};

use crate::collection::{Collection, CollectionRef};
use crate::config::Config;
use crate::error::{FtsError, Result};
use crate::schema::CollectionSchema;

/// In-process registry of collections by name.
#[derive(Debug, Default)]
pub struct CollectionManager {
    config: Config,
    registry: DashMap<String, CollectionRef>,
}

impl CollectionManager {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: DashMap::new(),
        }
    }

    /// Create a collection. Creating an existing name with an identical
    /// schema returns the existing collection.
    #[instrument(skip(self, schema), fields(collection = name))]
    pub fn create(&self, name: &str, schema: &CollectionSchema) -> Result<CollectionRef> {
        if !is_valid_collection_name(name) {
            return Err(FtsError::InvalidCollectionName(format!(
                "'{name}': must be 1-255 chars, start with alphanumeric, \
                 and contain only alphanumeric, dash, underscore, or dot characters"
            )));
        }
        match self.registry.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                if existing.get().schema().declared() == schema {
                    Ok(Arc::clone(existing.get()))
                } else {
                    Err(FtsError::CollectionAlreadyExists(name.to_string()))
                }
            }
            Entry::Vacant(slot) => {
                let collection = Arc::new(Collection::new(name, schema, self.config.clone())?);
                slot.insert(Arc::clone(&collection));
                Ok(collection)
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<CollectionRef> {
        self.registry
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| FtsError::CollectionNotFound(name.to_string()))
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry.contains_key(name)
    }

    /// Remove a collection. Handles already held stay usable.
    #[instrument(skip(self), fields(collection = name))]
    pub fn drop(&self, name: &str) -> Result<()> {
        self.registry
            .remove(name)
            .ok_or_else(|| FtsError::CollectionNotFound(name.to_string()))?;
        info!(collection = name, "dropped collection");
        Ok(())
    }

    /// Collection names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

fn is_valid_collection_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    match bytes.first() {
        Some(first) if bytes.len() <= 255 && first.is_ascii_alphanumeric() => bytes
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.'),
        _ => false,
    }
}
