//
// Copyright 2025 Tabs Data Inc.
//

use crate::schema::{SchemaError, Validator};
use mb_objects::types::collection::Collection;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

/// Cache of compiled validators keyed by collection name and schema version.
///
/// The schema version is bumped on every schema swap, so a stale entry can never
/// be served: a lookup with a newer version recompiles and replaces it. This is
/// the only in-memory shadow of mutable database state.
#[derive(Default)]
pub struct ValidatorCache {
    inner: RwLock<HashMap<String, (i64, Arc<Validator>)>>,
}

impl ValidatorCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the validator for the collection, compiling it on miss or version change.
    pub fn get(
        &self,
        collection: &Collection,
        known_collections: &HashSet<String>,
    ) -> Result<Arc<Validator>, SchemaError> {
        {
            let cache = self.inner.read().unwrap();
            if let Some((version, validator)) = cache.get(collection.name())
                && *version == collection.schema_version()
            {
                return Ok(Arc::clone(validator));
            }
        }

        let validator = Arc::new(Validator::compile(
            collection.name(),
            collection.schema(),
            known_collections,
        )?);
        let mut cache = self.inner.write().unwrap();
        cache.insert(
            collection.name().clone(),
            (collection.schema_version(), Arc::clone(&validator)),
        );
        Ok(validator)
    }

    /// Drops the cached validator of a collection.
    pub fn invalidate(&self, collection_name: &str) {
        self.inner.write().unwrap().remove(collection_name);
    }
}
