//! Removal guard for catalog images.
//!
//! An image can be deleted only while no element holds it, whether
//! ACTIVE or CACHED.

use crate::catalog::image_info;
use crate::error::{InventoryError, Result};
use crate::events::{fire_all, ImageEvent, ImageEventData, ImageEventSink};
use crate::model::{ImageId, ImageInfo};
use crate::repository;
use crate::store::InventoryStore;
use std::sync::Arc;
use tracing::info;

pub struct ReferenceGuard {
    store: InventoryStore,
    sink: Arc<dyn ImageEventSink>,
}

impl ReferenceGuard {
    pub fn new(store: InventoryStore, sink: Arc<dyn ImageEventSink>) -> Self {
        Self { store, sink }
    }

    /// Number of elements holding the image
    pub fn count_references(&self, image_id: &ImageId) -> Result<usize> {
        self.store.read(|conn| {
            let (active, cached) = repository::count_bindings(conn, image_id)?;
            Ok(active + cached)
        })
    }

    /// Deletes the image and returns what was removed.
    pub fn remove_image(&self, image_id: &ImageId) -> Result<ImageInfo> {
        let removed = self.store.transaction(|tx| {
            let row = repository::fetch_image(tx, image_id)?;
            let (active, cached) = repository::count_bindings(tx, image_id)?;
            if active + cached > 0 {
                return Err(InventoryError::ImageInUse {
                    image_id: row.id,
                    role: row.role,
                    image_type: row.image_type,
                    image_name: row.image_name,
                    version: row.version,
                    state: row.state,
                    references: active + cached,
                });
            }
            let snapshot = image_info(tx, &row)?;
            repository::delete_image(tx, image_id)?;
            Ok(snapshot)
        })?;

        info!("Removed image {} ({})", removed.qualified_name(), removed.image_id);
        fire_all(
            self.sink.as_ref(),
            vec![ImageEvent::ImageRemoved(ImageEventData::from(&removed))],
        );
        Ok(removed)
    }
}
