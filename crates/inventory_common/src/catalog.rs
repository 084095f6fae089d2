//! Image catalog service
//!
//! Stores submitted images, drives their lifecycle and answers update
//! queries for elements. Every mutation runs in one store transaction;
//! events are delivered to the sink only after the transaction commits.

use crate::directory::ElementDirectory;
use crate::error::{InventoryError, Result};
use crate::events::{fire_all, ImageEvent, ImageEventData, ImageEventSink};
use crate::guard::ReferenceGuard;
use crate::model::{
    ElementId, ElementName, ElementRef, ImageId, ImageInfo, ImageName, ImageState, ImageType,
};
use crate::registry;
use crate::repository::{self, ImageRow};
use crate::store::InventoryStore;
use crate::updates::{self, AvailableUpdate};
use crate::version::Version;
use rusqlite::Connection;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of a lifecycle change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Promotion {
    pub previous: ImageState,
    pub current: ImageState,
    /// Older siblings moved to SUPERSEDED
    pub superseded: usize,
    /// Newer siblings moved back to CANDIDATE
    pub restored: usize,
}

impl Promotion {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }
}

#[derive(Clone)]
pub struct ImageCatalog {
    store: InventoryStore,
    directory: Arc<dyn ElementDirectory>,
    sink: Arc<dyn ImageEventSink>,
}

impl ImageCatalog {
    pub fn new(
        store: InventoryStore,
        directory: Arc<dyn ElementDirectory>,
        sink: Arc<dyn ImageEventSink>,
    ) -> Self {
        Self {
            store,
            directory,
            sink,
        }
    }

    pub fn store(&self) -> &InventoryStore {
        &self.store
    }

    /// Creates the image, or updates the existing record with the same id.
    /// Returns `true` when a new record was created.
    ///
    /// New records must be submitted as NEW or CANDIDATE. On update the
    /// submitted state is ignored; lifecycle changes go through
    /// [`ImageCatalog::promote_image`].
    pub fn create_or_update_image(&self, submission: &ImageInfo) -> Result<bool> {
        if !self.directory.role_exists(&submission.role) {
            return Err(InventoryError::NotFound(format!("Role {}", submission.role)));
        }
        let element = self.element_of(submission)?;

        let (created, image) = self.store.transaction(|tx| {
            let platform_id = registry::resolve_platform(tx, &submission.platform)?;
            let existing = repository::find_image(tx, &submission.image_id)?;
            let created = existing.is_none();

            match existing {
                None => {
                    if !matches!(submission.image_state, ImageState::New | ImageState::Candidate) {
                        return Err(InventoryError::UnprocessableState(format!(
                            "Image {} must be created as NEW or CANDIDATE, not {}",
                            submission.qualified_name(),
                            submission.image_state
                        )));
                    }
                    let row = ImageRow {
                        id: submission.image_id.clone(),
                        modcount: 0,
                        organization: submission.organization.clone(),
                        category: submission.category.clone(),
                        image_type: submission.image_type.clone(),
                        image_name: submission.image_name.clone(),
                        state: submission.image_state,
                        role: submission.role.clone(),
                        element_id: element.as_ref().map(|(id, _)| id.clone()),
                        element_name: element.as_ref().map(|(_, name)| name.clone()),
                        platform_id,
                        platform: submission.platform.clone(),
                        version: submission.version.clone(),
                        extension: submission.extension.clone(),
                        build_id: submission.build_id.clone(),
                        build_date: submission.build_date,
                    };
                    repository::insert_image(tx, &row)?;
                }
                Some(current) => {
                    if current.state != submission.image_state {
                        debug!(
                            "Ignoring submitted state {} for {} (stays {})",
                            submission.image_state, submission.image_id, current.state
                        );
                    }
                    let row = ImageRow {
                        organization: submission.organization.clone(),
                        category: submission.category.clone(),
                        image_type: submission.image_type.clone(),
                        image_name: submission.image_name.clone(),
                        role: submission.role.clone(),
                        element_id: element.as_ref().map(|(id, _)| id.clone()),
                        element_name: element.as_ref().map(|(_, name)| name.clone()),
                        platform_id,
                        platform: submission.platform.clone(),
                        version: submission.version.clone(),
                        extension: submission.extension.clone(),
                        build_id: submission.build_id.clone(),
                        build_date: submission.build_date,
                        ..current
                    };
                    repository::update_image(tx, &row)?;
                }
            }

            repository::replace_checksums(tx, &submission.image_id, &submission.checksums)?;
            let package_ids = submission
                .packages
                .iter()
                .map(|package| registry::resolve_package(tx, package))
                .collect::<Result<Vec<_>>>()?;
            registry::link_packages(tx, &submission.image_id, &package_ids)?;
            let app_ids = submission
                .applications
                .iter()
                .map(|app| registry::resolve_application(tx, app))
                .collect::<Result<Vec<_>>>()?;
            registry::link_applications(tx, &submission.image_id, &app_ids)?;

            let row = repository::fetch_image(tx, &submission.image_id)?;
            Ok((created, image_info(tx, &row)?))
        })?;

        let data = ImageEventData::from(&image);
        let event = if created {
            info!("Added image {} ({})", image.qualified_name(), image.image_id);
            ImageEvent::ImageAdded(data)
        } else {
            info!("Stored image {} ({})", image.qualified_name(), image.image_id);
            ImageEvent::ImageStored(data)
        };
        fire_all(self.sink.as_ref(), vec![event]);
        Ok(created)
    }

    /// Stores `submission` under `image_id`. The ids must agree.
    pub fn store_image(&self, image_id: &ImageId, submission: &ImageInfo) -> Result<bool> {
        if &submission.image_id != image_id {
            return Err(InventoryError::Validation(format!(
                "Image id {} does not match submitted id {}",
                image_id, submission.image_id
            )));
        }
        self.create_or_update_image(submission)
    }

    pub fn get_image(&self, image_id: &ImageId) -> Result<ImageInfo> {
        self.store.read(|conn| {
            let row = repository::fetch_image(conn, image_id)?;
            image_info(conn, &row)
        })
    }

    /// Moves an image to `target`.
    ///
    /// Releasing an image supersedes every older, non-revoked sibling in its
    /// partition and moves newer superseded siblings back to CANDIDATE. The
    /// scans and the state change commit together. Requesting the current
    /// state is a no-op.
    pub fn promote_image(&self, image_id: &ImageId, target: ImageState) -> Result<Promotion> {
        let outcome = self.store.transaction(|tx| {
            let row = repository::fetch_image(tx, image_id)?;
            let previous = row.state;
            if previous == target {
                return Ok((
                    Promotion {
                        previous,
                        current: target,
                        superseded: 0,
                        restored: 0,
                    },
                    None,
                ));
            }
            if target == ImageState::Superseded || previous == ImageState::Revoked {
                return Err(InventoryError::InvalidStateTransition {
                    from: previous,
                    to: target,
                });
            }

            let (superseded, restored) = if target == ImageState::Release {
                (
                    repository::supersede_older(tx, &row)?,
                    repository::restore_newer(tx, &row)?,
                )
            } else {
                (0, 0)
            };
            repository::update_state(tx, &row, target)?;

            let promoted = repository::fetch_image(tx, image_id)?;
            let image = image_info(tx, &promoted)?;
            Ok((
                Promotion {
                    previous,
                    current: target,
                    superseded,
                    restored,
                },
                Some(image),
            ))
        })?;

        let (promotion, image) = outcome;
        match image {
            Some(image) => {
                info!(
                    "Image {} {} -> {} (superseded {}, restored {})",
                    image.qualified_name(),
                    promotion.previous,
                    promotion.current,
                    promotion.superseded,
                    promotion.restored
                );
                fire_all(
                    self.sink.as_ref(),
                    vec![ImageEvent::ImageStateChanged {
                        image: ImageEventData::from(&image),
                        previous_state: promotion.previous,
                    }],
                );
            }
            None => debug!("Image {} already {}", image_id, target),
        }
        Ok(promotion)
    }

    /// Removes an image that no element references.
    pub fn remove_image(&self, image_id: &ImageId) -> Result<ImageInfo> {
        ReferenceGuard::new(self.store.clone(), self.sink.clone()).remove_image(image_id)
    }

    /// Newer non-revoked images `element` could move to, newest first.
    pub fn list_available_updates(
        &self,
        element: &ElementRef,
        image_type: &ImageType,
        image_name: &ImageName,
        installed: &Version,
    ) -> Result<Vec<AvailableUpdate>> {
        let scope = self.directory.resolve(element)?;
        self.store.read(|conn| {
            let Some(platform_id) = registry::find_platform(conn, &scope.platform)? else {
                return Ok(Vec::new());
            };
            updates::available_updates(
                conn,
                &platform_id,
                &scope.role,
                &scope.element_id,
                image_type,
                image_name,
                installed,
            )
        })
    }

    /// Resolves the element an image is scoped to, if any. The element must
    /// belong to the image's role.
    fn element_of(&self, submission: &ImageInfo) -> Result<Option<(ElementId, ElementName)>> {
        let element = match (&submission.element_id, &submission.element_name) {
            (Some(id), _) => ElementRef::Id(id.clone()),
            (None, Some(name)) => ElementRef::Name(name.clone()),
            (None, None) => return Ok(None),
        };
        let scope = self.directory.resolve(&element)?;
        if scope.role != submission.role {
            return Err(InventoryError::Validation(format!(
                "Element {} has role {}, not {}",
                scope.element_name, scope.role, submission.role
            )));
        }
        Ok(Some((scope.element_id, scope.element_name)))
    }
}

impl std::fmt::Debug for ImageCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageCatalog")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

/// Assembles the full record for a row, children included.
pub(crate) fn image_info(conn: &Connection, row: &ImageRow) -> Result<ImageInfo> {
    Ok(ImageInfo {
        image_id: row.id.clone(),
        organization: row.organization.clone(),
        category: row.category.clone(),
        image_type: row.image_type.clone(),
        image_name: row.image_name.clone(),
        image_state: row.state,
        role: row.role.clone(),
        element_id: row.element_id.clone(),
        element_name: row.element_name.clone(),
        platform: row.platform.clone(),
        version: row.version.clone(),
        extension: row.extension.clone(),
        build_id: row.build_id.clone(),
        build_date: row.build_date,
        checksums: repository::load_checksums(conn, &row.id)?,
        packages: registry::load_packages(conn, &row.id)?,
        applications: registry::load_applications(conn, &row.id)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::events::CollectingEventSink;
    use crate::model::{PackageVersionInfo, PlatformRef};

    fn catalog() -> (ImageCatalog, Arc<CollectingEventSink>) {
        let mut directory = StaticDirectory::new();
        directory
            .add_role("spine")
            .add_element("e-1", "spine-01", "spine", PlatformRef::new("acme", "x1"))
            .add_element("e-2", "leaf-01", "leaf", PlatformRef::new("acme", "x1"));
        let sink = Arc::new(CollectingEventSink::new());
        let catalog = ImageCatalog::new(
            InventoryStore::open_in_memory().unwrap(),
            Arc::new(directory),
            sink.clone(),
        );
        (catalog, sink)
    }

    fn image(version: Version) -> ImageInfo {
        ImageInfo::new(
            "LXC",
            "router-os",
            "spine",
            PlatformRef::new("acme", "x1"),
            version,
        )
        .with_state(ImageState::Candidate)
    }

    #[test]
    fn test_create_then_update() {
        let (catalog, sink) = catalog();
        let submission = image(Version::new(1, 0, 0)).with_checksum("sha256", "abc");
        assert!(catalog.create_or_update_image(&submission).unwrap());

        let mut changed = submission.clone().with_organization("acme-labs");
        changed.image_state = ImageState::Release;
        assert!(!catalog.create_or_update_image(&changed).unwrap());

        let stored = catalog.get_image(&submission.image_id).unwrap();
        assert_eq!(stored.organization.as_deref(), Some("acme-labs"));
        assert_eq!(stored.image_state, ImageState::Candidate);
        assert_eq!(stored.checksums.get("sha256").map(String::as_str), Some("abc"));

        let names: Vec<_> = sink.take().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["image_added", "image_stored"]);
    }

    #[test]
    fn test_packages_and_applications_are_linked() {
        let (catalog, _) = catalog();
        let mut submission = image(Version::new(1, 0, 0));
        submission.packages.push(PackageVersionInfo {
            organization: "acme".into(),
            package_name: "bgpd".into(),
            version: Version::new(4, 2, 0),
            build_date: None,
            checksums: [("sha256".to_string(), "beef".to_string())].into(),
        });
        submission.applications = vec!["routing".into(), "dhcp".into()];
        catalog.create_or_update_image(&submission).unwrap();

        let stored = catalog.get_image(&submission.image_id).unwrap();
        assert_eq!(stored.packages, submission.packages);
        assert_eq!(stored.applications, vec!["dhcp", "routing"]);

        // Resubmitting without them unlinks both
        submission.packages.clear();
        submission.applications.clear();
        catalog.create_or_update_image(&submission).unwrap();
        let stored = catalog.get_image(&submission.image_id).unwrap();
        assert!(stored.packages.is_empty());
        assert!(stored.applications.is_empty());
    }

    #[test]
    fn test_create_requires_initial_state() {
        let (catalog, sink) = catalog();
        let err = catalog
            .create_or_update_image(&image(Version::new(1, 0, 0)).with_state(ImageState::Release))
            .unwrap_err();
        assert_eq!(err.code(), 422);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_unknown_role_is_not_found() {
        let (catalog, _) = catalog();
        let mut submission = image(Version::new(1, 0, 0));
        submission.role = "border".into();
        let err = catalog.create_or_update_image(&submission).unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
    }

    #[test]
    fn test_element_must_belong_to_role() {
        let (catalog, _) = catalog();
        let submission = image(Version::new(1, 0, 0)).with_element("leaf-01");
        let err = catalog.create_or_update_image(&submission).unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
    }

    #[test]
    fn test_duplicate_version_in_scope_conflicts() {
        let (catalog, _) = catalog();
        catalog
            .create_or_update_image(&image(Version::new(1, 0, 0)))
            .unwrap();
        let err = catalog
            .create_or_update_image(&image(Version::new(1, 0, 0)))
            .unwrap_err();
        assert!(matches!(err, InventoryError::Conflict(_)));

        // Element-scoped copy lives in a separate partition
        catalog
            .create_or_update_image(&image(Version::new(1, 0, 0)).with_element("spine-01"))
            .unwrap();
    }

    #[test]
    fn test_store_image_rejects_id_mismatch() {
        let (catalog, _) = catalog();
        let err = catalog
            .store_image(&ImageId::new("other"), &image(Version::new(1, 0, 0)))
            .unwrap_err();
        assert!(matches!(err, InventoryError::Validation(_)));
    }

    #[test]
    fn test_promote_same_state_is_noop() {
        let (catalog, sink) = catalog();
        let submission = image(Version::new(1, 0, 0));
        catalog.create_or_update_image(&submission).unwrap();
        sink.take();

        let promotion = catalog
            .promote_image(&submission.image_id, ImageState::Candidate)
            .unwrap();
        assert!(!promotion.changed());
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_promote_rejects_superseded_target_and_revoked_source() {
        let (catalog, _) = catalog();
        let submission = image(Version::new(1, 0, 0));
        catalog.create_or_update_image(&submission).unwrap();

        let err = catalog
            .promote_image(&submission.image_id, ImageState::Superseded)
            .unwrap_err();
        assert!(matches!(err, InventoryError::InvalidStateTransition { .. }));

        catalog
            .promote_image(&submission.image_id, ImageState::Revoked)
            .unwrap();
        let err = catalog
            .promote_image(&submission.image_id, ImageState::Release)
            .unwrap_err();
        assert!(matches!(
            err,
            InventoryError::InvalidStateTransition {
                from: ImageState::Revoked,
                to: ImageState::Release
            }
        ));
    }

    #[test]
    fn test_promote_unknown_image() {
        let (catalog, _) = catalog();
        let err = catalog
            .promote_image(&ImageId::new("missing"), ImageState::Release)
            .unwrap_err();
        assert_eq!(err.code(), 404);
    }

    #[test]
    fn test_state_changed_event_carries_previous_state() {
        let (catalog, sink) = catalog();
        let submission = image(Version::new(1, 0, 0));
        catalog.create_or_update_image(&submission).unwrap();
        sink.take();

        catalog
            .promote_image(&submission.image_id, ImageState::Release)
            .unwrap();
        match sink.take().as_slice() {
            [ImageEvent::ImageStateChanged {
                image,
                previous_state,
            }] => {
                assert_eq!(*previous_state, ImageState::Candidate);
                assert_eq!(image.state, ImageState::Release);
            }
            other => panic!("unexpected events {:?}", other),
        }
    }
}
