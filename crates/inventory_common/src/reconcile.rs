//! Installed-image reconciliation
//!
//! Elements periodically report the images they hold. The reconciler folds
//! those reports into the element's bindings: known entries are kept, new
//! ones are bound to their catalog record and entries the element no
//! longer reports are dropped.
//!
//! Reported images the catalog does not know get a stub record: a
//! role-wide CANDIDATE image without organization or category. Stubs are
//! created in a savepoint, so a failed stub only skips that one entry.

use crate::directory::ElementDirectory;
use crate::error::{InventoryError, Result};
use crate::model::{
    BindingKey, ElementId, ElementName, ElementRef, ElementScope, ImageId, ImageName, ImageRef,
    ImageState, ImageType, InstallationState, InstalledImageBinding, PackageVersionInfo,
    PlatformId, RoleName,
};
use crate::registry;
use crate::repository::{self, ImageRow, Partition};
use crate::store::{nested, InventoryStore};
use crate::updates::{available_updates, AvailableUpdate};
use crate::version::Version;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts of what one report changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub retained: usize,
    pub added: usize,
    pub removed: usize,
    /// Entries that could not be resolved or stubbed
    pub skipped: usize,
}

/// One image installed on an element, with its update options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledImage {
    pub image_id: ImageId,
    pub organization: Option<String>,
    pub image_type: ImageType,
    pub image_name: ImageName,
    pub image_state: ImageState,
    pub role: RoleName,
    pub installation_state: InstallationState,
    pub version: Version,
    pub extension: Option<String>,
    pub build_date: Option<DateTime<Utc>>,
    pub deployed_at: DateTime<Utc>,
    pub checksums: BTreeMap<String, String>,
    pub packages: Vec<PackageVersionInfo>,
    pub available_updates: Vec<AvailableUpdate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementInstalledImages {
    pub element_id: ElementId,
    pub element_name: ElementName,
    pub role: RoleName,
    pub images: Vec<InstalledImage>,
}

pub struct InstalledImageReconciler {
    store: InventoryStore,
    directory: Arc<dyn ElementDirectory>,
}

impl InstalledImageReconciler {
    pub fn new(store: InventoryStore, directory: Arc<dyn ElementDirectory>) -> Self {
        Self { store, directory }
    }

    /// Replaces the element's bindings with `reported`.
    ///
    /// Entries already bound are kept, with their installation state
    /// refreshed. Bindings missing from the report are removed, ACTIVE ones
    /// included.
    pub fn replace_installed_images(
        &self,
        element: &ElementRef,
        reported: &[ImageRef],
    ) -> Result<ReconcileSummary> {
        let scope = self.directory.resolve(element)?;
        let summary = self.store.transaction(|tx| {
            let mut summary = ReconcileSummary::default();
            let mut bindings = repository::load_bindings(tx, &scope.element_id)?;
            let mut retained = BTreeSet::new();

            for image_ref in reported {
                let key = image_ref.key();
                let state = InstallationState::from_active(image_ref.active);

                if let Some(binding) = bindings.get_mut(&key) {
                    if binding.state != state {
                        repository::update_binding_state(
                            tx,
                            &scope.element_id,
                            &binding.image_id,
                            state,
                        )?;
                        binding.state = state;
                    }
                    if retained.insert(key) {
                        summary.retained += 1;
                    }
                    continue;
                }

                let Some(image) = resolve_or_stub(tx, &scope, &key)? else {
                    summary.skipped += 1;
                    continue;
                };
                let binding = bind(tx, &scope, &image, state)?;
                bindings.insert(key.clone(), binding);
                retained.insert(key);
                summary.added += 1;
            }

            for (key, binding) in &bindings {
                if !retained.contains(key) {
                    repository::delete_binding(tx, &scope.element_id, &binding.image_id)?;
                    summary.removed += 1;
                }
            }
            Ok(summary)
        })?;

        info!(
            "Reconciled {} images on {}: {} kept, {} added, {} removed, {} skipped",
            reported.len(),
            scope.element_name,
            summary.retained,
            summary.added,
            summary.removed,
            summary.skipped
        );
        Ok(summary)
    }

    /// Adds CACHED bindings. Entries already bound are left untouched.
    pub fn add_cached_images(&self, element: &ElementRef, images: &[ImageRef]) -> Result<usize> {
        if let Some(active) = images.iter().find(|image| image.active) {
            return Err(InventoryError::UnprocessableState(format!(
                "Image {} is reported as active; only cached images can be added",
                active
            )));
        }
        let scope = self.directory.resolve(element)?;
        let added = self.store.transaction(|tx| {
            let mut bindings = repository::load_bindings(tx, &scope.element_id)?;
            let mut added = 0;
            for image_ref in images {
                let key = image_ref.key();
                let Some(image) = resolve_or_stub(tx, &scope, &key)? else {
                    continue;
                };
                if bindings.contains_key(&key) {
                    debug!("{} already holds {}", scope.element_name, image_ref);
                    continue;
                }
                let binding = bind(tx, &scope, &image, InstallationState::Cached)?;
                bindings.insert(key, binding);
                added += 1;
            }
            Ok(added)
        })?;

        info!("Cached {} images on {}", added, scope.element_name);
        Ok(added)
    }

    /// Removes CACHED bindings. Entries not bound are ignored; an ACTIVE
    /// match aborts the whole call.
    pub fn remove_cached_images(&self, element: &ElementRef, images: &[ImageRef]) -> Result<usize> {
        let scope = self.directory.resolve(element)?;
        let removed = self.store.transaction(|tx| {
            let mut bindings = repository::load_bindings(tx, &scope.element_id)?;
            let mut removed = 0;
            for image_ref in images {
                let Some(binding) = bindings.remove(&image_ref.key()) else {
                    continue;
                };
                if binding.state.is_active() {
                    return Err(active_binding_conflict(&scope, image_ref));
                }
                repository::delete_binding(tx, &scope.element_id, &binding.image_id)?;
                removed += 1;
            }
            Ok(removed)
        })?;

        info!("Removed {} cached images from {}", removed, scope.element_name);
        Ok(removed)
    }

    /// Removes the element's binding to one image unless it is ACTIVE.
    /// Returns `false` when nothing was bound.
    pub fn remove_installed_image(
        &self,
        element: &ElementRef,
        image_type: &ImageType,
        image_name: &ImageName,
        version: &Version,
    ) -> Result<bool> {
        let image_ref = ImageRef {
            image_type: image_type.clone(),
            image_name: image_name.clone(),
            version: version.clone(),
            active: false,
        };
        let scope = self.directory.resolve(element)?;
        let removed = self.store.transaction(|tx| {
            let bindings = repository::load_bindings(tx, &scope.element_id)?;
            let Some(binding) = bindings.get(&image_ref.key()) else {
                return Ok(false);
            };
            if binding.state.is_active() {
                return Err(active_binding_conflict(&scope, &image_ref));
            }
            repository::delete_binding(tx, &scope.element_id, &binding.image_id)?;
            Ok(true)
        })?;

        if removed {
            info!("Uninstalled {} from {}", image_ref, scope.element_name);
        }
        Ok(removed)
    }

    /// Every image installed on the element, ordered by type, name and version
    pub fn installed_images(&self, element: &ElementRef) -> Result<ElementInstalledImages> {
        let scope = self.directory.resolve(element)?;
        let images = self.store.read(|conn| {
            repository::load_bindings(conn, &scope.element_id)?
                .into_values()
                .map(|binding| installed_image(conn, &scope, &binding))
                .collect::<Result<Vec<_>>>()
        })?;
        Ok(ElementInstalledImages {
            element_id: scope.element_id,
            element_name: scope.element_name,
            role: scope.role,
            images,
        })
    }

    pub fn installed_image(&self, element: &ElementRef, image_id: &ImageId) -> Result<InstalledImage> {
        let scope = self.directory.resolve(element)?;
        self.store.read(|conn| {
            let binding = repository::find_binding(conn, &scope.element_id, image_id)?
                .ok_or_else(|| {
                    InventoryError::NotFound(format!(
                        "Image {} on element {}",
                        image_id, scope.element_name
                    ))
                })?;
            installed_image(conn, &scope, &binding)
        })
    }
}

fn active_binding_conflict(scope: &ElementScope, image_ref: &ImageRef) -> InventoryError {
    InventoryError::Conflict(format!(
        "Image {} is active on {} and cannot be removed",
        image_ref, scope.element_name
    ))
}

fn bind(
    conn: &Connection,
    scope: &ElementScope,
    image: &ImageRow,
    state: InstallationState,
) -> Result<InstalledImageBinding> {
    let binding = InstalledImageBinding {
        element_id: scope.element_id.clone(),
        image_id: image.id.clone(),
        state,
        deployed_at: Utc::now(),
    };
    repository::insert_binding(conn, &binding)?;
    Ok(binding)
}

/// Finds the catalog record for a reported image: the element's own
/// partition first, then the role-wide one.
fn resolve_image(
    conn: &Connection,
    scope: &ElementScope,
    platform_id: &PlatformId,
    key: &BindingKey,
) -> Result<Option<ImageRow>> {
    if let Some(image) = repository::find_scoped_image(
        conn,
        platform_id,
        &scope.role,
        Partition::Element(&scope.element_id),
        key,
    )? {
        return Ok(Some(image));
    }
    repository::find_scoped_image(conn, platform_id, &scope.role, Partition::RoleWide, key)
}

fn resolve_or_stub(
    tx: &mut Transaction<'_>,
    scope: &ElementScope,
    key: &BindingKey,
) -> Result<Option<ImageRow>> {
    if let Some(platform_id) = registry::find_platform(tx, &scope.platform)? {
        if let Some(image) = resolve_image(tx, scope, &platform_id, key)? {
            return Ok(Some(image));
        }
    }

    warn!(
        "{} reports {}-{}-{} unknown to the inventory, creating stub",
        scope.element_name, key.image_type, key.image_name, key.version
    );
    let platform_id = registry::resolve_platform(tx, &scope.platform)?;
    let stub = ImageRow {
        id: ImageId::random(),
        modcount: 0,
        organization: None,
        category: None,
        image_type: key.image_type.clone(),
        image_name: key.image_name.clone(),
        state: ImageState::Candidate,
        role: scope.role.clone(),
        element_id: None,
        element_name: None,
        platform_id,
        platform: scope.platform.clone(),
        version: key.version.clone(),
        extension: None,
        build_id: None,
        build_date: None,
    };

    match nested(tx, |conn| {
        repository::insert_image(conn, &stub)?;
        repository::fetch_image(conn, &stub.id)
    }) {
        Ok(image) => Ok(Some(image)),
        Err(e) => {
            debug!(
                "Skipping {}-{}-{} on {}: {}",
                key.image_type, key.image_name, key.version, scope.element_name, e
            );
            Ok(None)
        }
    }
}

fn installed_image(
    conn: &Connection,
    scope: &ElementScope,
    binding: &InstalledImageBinding,
) -> Result<InstalledImage> {
    let image = repository::fetch_image(conn, &binding.image_id)?;
    let updates = available_updates(
        conn,
        &image.platform_id,
        &image.role,
        &scope.element_id,
        &image.image_type,
        &image.image_name,
        &image.version,
    )?;
    Ok(InstalledImage {
        organization: image.organization.clone(),
        image_type: image.image_type.clone(),
        image_name: image.image_name.clone(),
        image_state: image.state,
        role: image.role.clone(),
        installation_state: binding.state,
        version: image.version.clone(),
        extension: image.extension.clone(),
        build_date: image.build_date,
        deployed_at: binding.deployed_at,
        checksums: repository::load_checksums(conn, &image.id)?,
        packages: registry::load_packages(conn, &image.id)?,
        available_updates: updates,
        image_id: image.id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::model::PlatformRef;

    fn reconciler() -> InstalledImageReconciler {
        let mut directory = StaticDirectory::new();
        directory.add_element("e-1", "spine-01", "spine", PlatformRef::new("acme", "x1"));
        InstalledImageReconciler::new(InventoryStore::open_in_memory().unwrap(), Arc::new(directory))
    }

    fn element() -> ElementRef {
        ElementRef::Name(ElementName::new("spine-01"))
    }

    fn lxc(patch: u32, active: bool) -> ImageRef {
        ImageRef::new("LXC", "router-os", Version::new(1, 0, patch), active)
    }

    #[test]
    fn test_unknown_images_get_stubs() {
        let reconciler = reconciler();
        let summary = reconciler
            .replace_installed_images(&element(), &[lxc(0, true)])
            .unwrap();
        assert_eq!(summary.added, 1);

        let installed = reconciler.installed_images(&element()).unwrap();
        assert_eq!(installed.images.len(), 1);
        let image = &installed.images[0];
        assert_eq!(image.image_state, ImageState::Candidate);
        assert_eq!(image.installation_state, InstallationState::Active);
        assert!(image.organization.is_none());
    }

    #[test]
    fn test_duplicate_entries_in_one_report() {
        let reconciler = reconciler();
        let summary = reconciler
            .replace_installed_images(&element(), &[lxc(0, true), lxc(0, true)])
            .unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(reconciler.installed_images(&element()).unwrap().images.len(), 1);
    }

    #[test]
    fn test_add_cached_rejects_active_entries() {
        let reconciler = reconciler();
        let err = reconciler
            .add_cached_images(&element(), &[lxc(0, false), lxc(1, true)])
            .unwrap_err();
        assert!(matches!(err, InventoryError::UnprocessableState(_)));
        assert!(reconciler.installed_images(&element()).unwrap().images.is_empty());
    }

    #[test]
    fn test_installed_image_not_found() {
        let reconciler = reconciler();
        let err = reconciler
            .installed_image(&element(), &ImageId::new("nope"))
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }
}
