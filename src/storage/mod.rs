// file: src/storage/mod.rs
// description: central data storage, dataset metadata, and attribute handling

pub mod attributes;
pub mod dataset;
pub mod dtype;
pub mod store;

pub use attributes::{AttrValue, AttributeSet, StaticAttr};
pub use dataset::{DatasetMeta, validate_tag};
pub use dtype::DType;
pub use store::DataStore;

use crate::error::{PipelineError, Result};
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared handle to the central data storage. Modules never receive this
/// directly; they reach storage through ports only.
pub type SharedStore = Arc<Mutex<DataStore>>;

pub fn shared(store: DataStore) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Acquire the storage lock, converting a poisoned lock into a storage
/// error instead of panicking inside a module.
pub(crate) fn lock(store: &SharedStore) -> Result<MutexGuard<'_, DataStore>> {
    store
        .lock()
        .map_err(|_| PipelineError::Storage("Storage lock poisoned".to_string()))
}
