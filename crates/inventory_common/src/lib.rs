//! Inventory Common - image catalog and installed-image tracking
//!
//! Elements of a role run images built for their platform. The catalog keeps
//! every published image with its lifecycle state; the reconciler tracks which
//! images each element holds and what it could update to.

pub mod catalog;
pub mod config;
pub mod directory;
pub mod error;
pub mod events;
pub mod guard;
pub mod model;
pub mod query;
pub mod reconcile;
pub mod store;
pub mod updates;
pub mod version;

mod registry;
mod repository;

pub use catalog::{ImageCatalog, Promotion};
pub use config::InventoryConfig;
pub use directory::{ElementDirectory, StaticDirectory};
pub use error::{ErrorKind, InventoryError, Result};
pub use events::{CollectingEventSink, ImageEvent, ImageEventData, ImageEventSink, TracingEventSink};
pub use guard::ReferenceGuard;
pub use model::*;
pub use query::ImageQuery;
pub use reconcile::{ElementInstalledImages, InstalledImage, InstalledImageReconciler, ReconcileSummary};
pub use store::InventoryStore;
pub use updates::{AvailableUpdate, UpdateType};
pub use version::Version;
