//! Inventory data model
//!
//! Identifiers, lifecycle enums and the records exchanged with callers.
//! Relationships between records are expressed as id fields only.

use crate::error::{InventoryError, Result};
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// Catalog record identifier (UUID)
    ImageId
);
string_id!(ElementId);
string_id!(ElementName);
string_id!(RoleName);
string_id!(PlatformId);
string_id!(
    /// Image name, e.g. "router-os"
    ImageName
);

impl ImageId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl PlatformId {
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Image type such as `LXC` or `ONIE`. Always upper case.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ImageType(String);

impl ImageType {
    pub fn new(value: impl AsRef<str>) -> Self {
        Self(value.as_ref().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ImageType {
    fn from(value: String) -> Self {
        ImageType::new(value)
    }
}

impl From<&str> for ImageType {
    fn from(value: &str) -> Self {
        ImageType::new(value)
    }
}

impl From<ImageType> for String {
    fn from(value: ImageType) -> Self {
        value.0
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ImageState {
    /// Freshly uploaded, not yet qualified
    New,
    /// Qualified for rollout
    Candidate,
    /// Released; older pending siblings are superseded
    Release,
    /// Obsoleted by a newer release
    Superseded,
    /// Withdrawn. Terminal.
    Revoked,
}

impl ImageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageState::New => "NEW",
            ImageState::Candidate => "CANDIDATE",
            ImageState::Release => "RELEASE",
            ImageState::Superseded => "SUPERSEDED",
            ImageState::Revoked => "REVOKED",
        }
    }
}

impl fmt::Display for ImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageState {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "NEW" => Ok(ImageState::New),
            "CANDIDATE" => Ok(ImageState::Candidate),
            "RELEASE" => Ok(ImageState::Release),
            "SUPERSEDED" => Ok(ImageState::Superseded),
            "REVOKED" => Ok(ImageState::Revoked),
            other => Err(InventoryError::Validation(format!(
                "Unknown image state '{}'",
                other
            ))),
        }
    }
}

/// Installation state of an image on an element
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstallationState {
    Active,
    Cached,
}

impl InstallationState {
    pub fn from_active(active: bool) -> Self {
        if active {
            InstallationState::Active
        } else {
            InstallationState::Cached
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstallationState::Active => "ACTIVE",
            InstallationState::Cached => "CACHED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, InstallationState::Active)
    }
}

impl fmt::Display for InstallationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallationState {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ACTIVE" => Ok(InstallationState::Active),
            "CACHED" => Ok(InstallationState::Cached),
            other => Err(InventoryError::Validation(format!(
                "Unknown installation state '{}'",
                other
            ))),
        }
    }
}

/// Hardware platform an image is built for
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlatformRef {
    pub vendor: String,
    pub model: String,
}

impl PlatformRef {
    pub fn new(vendor: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            vendor: vendor.into(),
            model: model.into(),
        }
    }
}

impl fmt::Display for PlatformRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.vendor, self.model)
    }
}

/// Element lookup key, by id or by name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementRef {
    Id(ElementId),
    Name(ElementName),
}

impl fmt::Display for ElementRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementRef::Id(id) => write!(f, "{}", id),
            ElementRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// Resolved element: the platform + role partition it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementScope {
    pub element_id: ElementId,
    pub element_name: ElementName,
    pub role: RoleName,
    pub platform: PlatformRef,
}

/// Package version bundled into an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersionInfo {
    pub organization: String,
    pub package_name: String,
    pub version: Version,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
}

/// Full catalog record, as submitted by uploaders and as returned by reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub image_id: ImageId,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    pub image_type: ImageType,
    pub image_name: ImageName,
    pub image_state: ImageState,
    pub role: RoleName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_id: Option<ElementId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_name: Option<ElementName>,
    pub platform: PlatformRef,
    pub version: Version,
    #[serde(default)]
    pub extension: Option<String>,
    #[serde(default)]
    pub build_id: Option<String>,
    #[serde(default)]
    pub build_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checksums: BTreeMap<String, String>,
    #[serde(default)]
    pub packages: Vec<PackageVersionInfo>,
    #[serde(default)]
    pub applications: Vec<String>,
}

impl ImageInfo {
    /// Minimal submission; builder-style setters fill the rest.
    pub fn new(
        image_type: impl Into<ImageType>,
        image_name: impl Into<String>,
        role: impl Into<String>,
        platform: PlatformRef,
        version: Version,
    ) -> Self {
        Self {
            image_id: ImageId::random(),
            organization: None,
            category: None,
            image_type: image_type.into(),
            image_name: ImageName::new(image_name),
            image_state: ImageState::New,
            role: RoleName::new(role),
            element_id: None,
            element_name: None,
            platform,
            version,
            extension: None,
            build_id: None,
            build_date: None,
            checksums: BTreeMap::new(),
            packages: Vec::new(),
            applications: Vec::new(),
        }
    }

    pub fn with_state(mut self, state: ImageState) -> Self {
        self.image_state = state;
        self
    }

    pub fn with_element(mut self, name: impl Into<String>) -> Self {
        self.element_name = Some(ElementName::new(name));
        self
    }

    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    pub fn with_checksum(mut self, algorithm: impl Into<String>, digest: impl Into<String>) -> Self {
        self.checksums.insert(algorithm.into(), digest.into());
        self
    }

    /// "role/type/name-version" label used in log lines
    pub fn qualified_name(&self) -> String {
        format!(
            "{}/{}/{}-{}",
            self.role, self.image_type, self.image_name, self.version
        )
    }
}

/// Image reported by an element agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub image_type: ImageType,
    pub image_name: ImageName,
    pub version: Version,
    #[serde(default)]
    pub active: bool,
}

impl ImageRef {
    pub fn new(
        image_type: impl Into<ImageType>,
        image_name: impl Into<String>,
        version: Version,
        active: bool,
    ) -> Self {
        Self {
            image_type: image_type.into(),
            image_name: ImageName::new(image_name),
            version,
            active,
        }
    }

    pub fn key(&self) -> BindingKey {
        BindingKey {
            image_type: self.image_type.clone(),
            image_name: self.image_name.clone(),
            version: self.version.clone(),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.image_type, self.image_name, self.version)
    }
}

/// Identity of an installed image on one element. Ordered by type, name, version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BindingKey {
    pub image_type: ImageType,
    pub image_name: ImageName,
    pub version: Version,
}

/// An image installed on an element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledImageBinding {
    pub element_id: ElementId,
    pub image_id: ImageId,
    pub state: InstallationState,
    pub deployed_at: DateTime<Utc>,
}

/// Search hit returned by catalog queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub image_id: ImageId,
    pub image_type: ImageType,
    pub image_name: ImageName,
    pub image_state: ImageState,
    pub version: Version,
    pub role: RoleName,
    pub element_name: Option<ElementName>,
    pub platform: PlatformRef,
    pub build_date: Option<DateTime<Utc>>,
}

/// (type, name) pair known for a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleImage {
    pub image_type: ImageType,
    pub image_name: ImageName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageStatistics {
    pub image: ImageInfo,
    pub active_count: usize,
    pub cached_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_state_round_trip_strings() {
        for state in [
            ImageState::New,
            ImageState::Candidate,
            ImageState::Release,
            ImageState::Superseded,
            ImageState::Revoked,
        ] {
            assert_eq!(state.as_str().parse::<ImageState>().unwrap(), state);
        }
        assert_eq!("release".parse::<ImageState>().unwrap(), ImageState::Release);
        assert!("GONE".parse::<ImageState>().is_err());
    }

    #[test]
    fn test_image_type_is_upper_case() {
        assert_eq!(ImageType::new("lxc").as_str(), "LXC");
        let parsed: ImageType = serde_json::from_str("\"onie\"").unwrap();
        assert_eq!(parsed, ImageType::new("ONIE"));
    }

    #[test]
    fn test_binding_key_order() {
        let a = ImageRef::new("LXC", "router-os", Version::new(1, 0, 0), true).key();
        let b = ImageRef::new("LXC", "router-os", Version::new(1, 0, 1), true).key();
        let c = ImageRef::new("ONIE", "boot", Version::new(0, 1, 0), true).key();
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_submission_json_defaults() {
        let json = r#"{
            "image_id": "img-1",
            "image_type": "lxc",
            "image_name": "router-os",
            "image_state": "CANDIDATE",
            "role": "spine",
            "platform": {"vendor": "acme", "model": "x1"},
            "version": {"major": 1, "minor": 2, "patch": 3}
        }"#;
        let info: ImageInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.image_type.as_str(), "LXC");
        assert_eq!(info.version, Version::new(1, 2, 3));
        assert!(info.checksums.is_empty());
        assert!(info.element_name.is_none());
    }
}
