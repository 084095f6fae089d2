//! Available updates for installed images.

use crate::error::Result;
use crate::model::{ElementId, ImageId, ImageName, ImageType, PlatformId, RoleName};
use crate::repository;
use crate::version::Version;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UpdateType {
    Major,
    Minor,
    Patch,
    Prerelease,
}

impl UpdateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateType::Major => "MAJOR",
            UpdateType::Minor => "MINOR",
            UpdateType::Patch => "PATCH",
            UpdateType::Prerelease => "PRERELEASE",
        }
    }

    /// Classifies `candidate` relative to `installed`.
    ///
    /// The three level checks run in a fixed order and each one that matches
    /// overwrites the previous result, so a later level wins: 1.0.0 -> 2.0.1
    /// is `Patch`, not `Major`.
    pub fn classify(installed: &Version, candidate: &Version) -> UpdateType {
        let mut update = UpdateType::Prerelease;
        if candidate.major > installed.major {
            update = UpdateType::Major;
        }
        if candidate.minor > installed.minor {
            update = UpdateType::Minor;
        }
        if candidate.patch > installed.patch {
            update = UpdateType::Patch;
        }
        update
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableUpdate {
    pub image_id: ImageId,
    pub version: Version,
    pub build_date: Option<DateTime<Utc>>,
    pub update_type: UpdateType,
}

/// Newer, non-revoked images an element could move to, newest first.
#[allow(clippy::too_many_arguments)]
pub(crate) fn available_updates(
    conn: &Connection,
    platform_id: &PlatformId,
    role: &RoleName,
    element_id: &ElementId,
    image_type: &ImageType,
    image_name: &ImageName,
    installed: &Version,
) -> Result<Vec<AvailableUpdate>> {
    let mut candidates = repository::find_updates(
        conn,
        platform_id,
        role,
        element_id,
        image_type,
        image_name,
        installed,
    )?;
    candidates.sort_by(|a, b| Version::compare(&b.version, &a.version));

    Ok(candidates
        .into_iter()
        .map(|image| AvailableUpdate {
            update_type: UpdateType::classify(installed, &image.version),
            image_id: image.id,
            version: image.version,
            build_date: image.build_date,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(installed: &str, candidate: &str) -> UpdateType {
        UpdateType::classify(&installed.parse().unwrap(), &candidate.parse().unwrap())
    }

    #[test]
    fn test_single_level_bumps() {
        assert_eq!(classify("1.2.3", "2.0.0"), UpdateType::Major);
        assert_eq!(classify("1.2.3", "1.3.0"), UpdateType::Minor);
        assert_eq!(classify("1.2.3", "1.2.4"), UpdateType::Patch);
    }

    #[test]
    fn test_release_of_prerelease() {
        assert_eq!(classify("1.2.3-rc1", "1.2.3"), UpdateType::Prerelease);
        assert_eq!(classify("1.2.3-rc1", "1.2.3-rc2"), UpdateType::Prerelease);
    }

    #[test]
    fn test_later_check_overwrites_earlier() {
        assert_eq!(classify("1.0.0", "2.0.1"), UpdateType::Patch);
        assert_eq!(classify("1.0.0", "2.1.0"), UpdateType::Minor);
        assert_eq!(classify("1.1.0", "1.2.1"), UpdateType::Patch);
    }

    #[test]
    fn test_lower_level_decrease_keeps_upper_result() {
        assert_eq!(classify("1.5.5", "2.0.0"), UpdateType::Major);
        assert_eq!(classify("1.2.9", "1.3.0"), UpdateType::Minor);
    }
}
