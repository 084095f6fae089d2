//! Promotion scans and catalog removal against an on-disk store.

use inventory_common::{
    CollectingEventSink, ElementRef, ImageCatalog, ImageEvent, ImageId, ImageInfo, ImageRef,
    ImageState, InstalledImageReconciler, InventoryError, InventoryStore, PlatformRef,
    StaticDirectory, Version,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    catalog: ImageCatalog,
    reconciler: InstalledImageReconciler,
    sink: Arc<CollectingEventSink>,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = InventoryStore::open(&dir.path().join("inventory.db")).unwrap();
    let mut directory = StaticDirectory::new();
    directory
        .add_element("e-1", "spine-01", "spine", PlatformRef::new("acme", "x1"))
        .add_element("e-2", "spine-02", "spine", PlatformRef::new("acme", "x1"));
    let directory = Arc::new(directory);
    let sink = Arc::new(CollectingEventSink::new());
    Fixture {
        catalog: ImageCatalog::new(store.clone(), directory.clone(), sink.clone()),
        reconciler: InstalledImageReconciler::new(store, directory),
        sink,
        _dir: dir,
    }
}

fn publish(catalog: &ImageCatalog, version: &str, element: Option<&str>) -> ImageId {
    let mut info = ImageInfo::new(
        "LXC",
        "router-os",
        "spine",
        PlatformRef::new("acme", "x1"),
        version.parse().unwrap(),
    )
    .with_state(ImageState::Candidate);
    if let Some(element) = element {
        info = info.with_element(element);
    }
    catalog.create_or_update_image(&info).unwrap();
    info.image_id
}

fn state(catalog: &ImageCatalog, id: &ImageId) -> ImageState {
    catalog.get_image(id).unwrap().image_state
}

#[test]
fn release_supersedes_older_and_restores_newer() {
    let f = fixture();
    let v1 = publish(&f.catalog, "1.0.0", None);
    let v2_rc = publish(&f.catalog, "2.0.0-rc1", None);
    let v2 = publish(&f.catalog, "2.0.0", None);
    let v3 = publish(&f.catalog, "3.0.0", None);
    let revoked_old = publish(&f.catalog, "0.9.0", None);
    let revoked_new = publish(&f.catalog, "4.0.0", None);
    f.catalog.promote_image(&revoked_old, ImageState::Revoked).unwrap();
    f.catalog.promote_image(&revoked_new, ImageState::Revoked).unwrap();

    // Releasing the newest first marks everything older superseded
    let promotion = f.catalog.promote_image(&v3, ImageState::Release).unwrap();
    assert_eq!(promotion.superseded, 3);
    assert_eq!(state(&f.catalog, &v2), ImageState::Superseded);

    // Releasing 1.0.0 afterwards brings back the superseded 2.0.0 line
    let promotion = f.catalog.promote_image(&v1, ImageState::Release).unwrap();
    assert_eq!(promotion.superseded, 0);
    assert_eq!(promotion.restored, 2);
    assert_eq!(state(&f.catalog, &v2_rc), ImageState::Candidate);
    assert_eq!(state(&f.catalog, &v2), ImageState::Candidate);
    assert_eq!(state(&f.catalog, &v3), ImageState::Release);

    // Releasing 2.0.0 supersedes everything below it, released or not
    let promotion = f.catalog.promote_image(&v2, ImageState::Release).unwrap();
    assert_eq!(promotion.superseded, 2);
    assert_eq!(state(&f.catalog, &v1), ImageState::Superseded);
    assert_eq!(state(&f.catalog, &v2_rc), ImageState::Superseded);
    assert_eq!(state(&f.catalog, &v3), ImageState::Release);

    assert_eq!(state(&f.catalog, &revoked_old), ImageState::Revoked);
    assert_eq!(state(&f.catalog, &revoked_new), ImageState::Revoked);
}

#[test]
fn promotion_scans_stay_inside_their_partition() {
    let f = fixture();
    let role_wide_old = publish(&f.catalog, "1.0.0", None);
    let element_old = publish(&f.catalog, "1.0.0", Some("spine-01"));
    let other_element_old = publish(&f.catalog, "1.0.0", Some("spine-02"));
    let element_new = publish(&f.catalog, "2.0.0", Some("spine-01"));

    f.catalog
        .promote_image(&element_new, ImageState::Release)
        .unwrap();

    assert_eq!(state(&f.catalog, &element_old), ImageState::Superseded);
    assert_eq!(state(&f.catalog, &role_wide_old), ImageState::Candidate);
    assert_eq!(state(&f.catalog, &other_element_old), ImageState::Candidate);
}

#[test]
fn re_releasing_does_not_rescan() {
    let f = fixture();
    let v1 = publish(&f.catalog, "1.0.0", None);
    let v2 = publish(&f.catalog, "2.0.0", None);
    f.catalog.promote_image(&v2, ImageState::Release).unwrap();

    // A newer candidate published later is not touched by a repeated release
    let v0 = publish(&f.catalog, "0.5.0", None);
    f.sink.take();
    let promotion = f.catalog.promote_image(&v2, ImageState::Release).unwrap();
    assert!(!promotion.changed());
    assert_eq!(state(&f.catalog, &v0), ImageState::Candidate);
    assert_eq!(state(&f.catalog, &v1), ImageState::Superseded);
    assert!(f.sink.events().is_empty());
}

#[test]
fn remove_image_blocked_by_bindings() {
    let f = fixture();
    let id = publish(&f.catalog, "1.0.0", None);
    let element = ElementRef::Name("spine-01".into());
    f.reconciler
        .replace_installed_images(
            &element,
            &[ImageRef::new("LXC", "router-os", Version::new(1, 0, 0), true)],
        )
        .unwrap();
    f.sink.take();

    let err = f.catalog.remove_image(&id).unwrap_err();
    assert_eq!(err.code(), 409);
    match err {
        InventoryError::ImageInUse {
            references, state, ..
        } => {
            assert_eq!(references, 1);
            assert_eq!(state, ImageState::Candidate);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(f.catalog.get_image(&id).is_ok());
    assert_eq!(f.reconciler.installed_images(&element).unwrap().images.len(), 1);
    assert!(f.sink.events().is_empty());
}

#[test]
fn remove_unreferenced_image_returns_snapshot() {
    let f = fixture();
    let id = publish(&f.catalog, "1.0.0", None);
    f.sink.take();

    let removed = f.catalog.remove_image(&id).unwrap();
    assert_eq!(removed.image_id, id);
    assert!(matches!(
        f.catalog.get_image(&id),
        Err(InventoryError::NotFound(_))
    ));
    assert!(matches!(
        f.sink.take().as_slice(),
        [ImageEvent::ImageRemoved(data)] if data.image_id == id
    ));
}

#[test]
fn available_updates_cover_element_and_role_wide_images() {
    let f = fixture();
    publish(&f.catalog, "1.0.0", None);
    publish(&f.catalog, "1.1.0", None);
    publish(&f.catalog, "2.0.1", Some("spine-01"));
    publish(&f.catalog, "3.0.0", Some("spine-02"));
    let revoked = publish(&f.catalog, "1.0.5", None);
    f.catalog.promote_image(&revoked, ImageState::Revoked).unwrap();

    let updates = f
        .catalog
        .list_available_updates(
            &ElementRef::Name("spine-01".into()),
            &"LXC".into(),
            &"router-os".into(),
            &Version::new(1, 0, 0),
        )
        .unwrap();
    let versions: Vec<String> = updates.iter().map(|u| u.version.to_string()).collect();
    assert_eq!(versions, vec!["2.0.1", "1.1.0"]);
    assert_eq!(updates[0].update_type.as_str(), "PATCH");
    assert_eq!(updates[1].update_type.as_str(), "MINOR");
}
