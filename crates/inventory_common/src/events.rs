//! Catalog notifications
//!
//! Services buffer events while a transaction is open and hand them to the
//! sink only after commit. Delivery is fire-and-forget.

use crate::model::{ImageId, ImageInfo, ImageName, ImageState, ImageType, RoleName};
use crate::version::Version;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

/// Image identity carried by every event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEventData {
    pub image_id: ImageId,
    pub organization: Option<String>,
    pub image_type: ImageType,
    pub image_name: ImageName,
    pub role: RoleName,
    pub version: Version,
    pub extension: Option<String>,
    pub state: ImageState,
    pub checksums: BTreeMap<String, String>,
}

impl From<&ImageInfo> for ImageEventData {
    fn from(image: &ImageInfo) -> Self {
        Self {
            image_id: image.image_id.clone(),
            organization: image.organization.clone(),
            image_type: image.image_type.clone(),
            image_name: image.image_name.clone(),
            role: image.role.clone(),
            version: image.version.clone(),
            extension: image.extension.clone(),
            state: image.image_state,
            checksums: image.checksums.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImageEvent {
    ImageAdded(ImageEventData),
    ImageStored(ImageEventData),
    ImageStateChanged {
        #[serde(flatten)]
        image: ImageEventData,
        previous_state: ImageState,
    },
    ImageRemoved(ImageEventData),
}

impl ImageEvent {
    pub fn image(&self) -> &ImageEventData {
        match self {
            ImageEvent::ImageAdded(image)
            | ImageEvent::ImageStored(image)
            | ImageEvent::ImageRemoved(image) => image,
            ImageEvent::ImageStateChanged { image, .. } => image,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ImageEvent::ImageAdded(_) => "image_added",
            ImageEvent::ImageStored(_) => "image_stored",
            ImageEvent::ImageStateChanged { .. } => "image_state_changed",
            ImageEvent::ImageRemoved(_) => "image_removed",
        }
    }
}

pub trait ImageEventSink: Send + Sync {
    fn fire(&self, event: ImageEvent);
}

/// Writes every event to the log
#[derive(Debug, Default)]
pub struct TracingEventSink;

impl ImageEventSink for TracingEventSink {
    fn fire(&self, event: ImageEvent) {
        let image = event.image();
        info!(
            event = event.name(),
            image_id = %image.image_id,
            state = %image.state,
            "{}/{}/{}-{}",
            image.role,
            image.image_type,
            image.image_name,
            image.version
        );
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: Mutex<Vec<ImageEvent>>,
}

impl CollectingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ImageEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn take(&self) -> Vec<ImageEvent> {
        std::mem::take(
            &mut *self
                .events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

impl ImageEventSink for CollectingEventSink {
    fn fire(&self, event: ImageEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}

pub(crate) fn fire_all(sink: &dyn ImageEventSink, events: Vec<ImageEvent>) {
    for event in events {
        sink.fire(event);
    }
}
