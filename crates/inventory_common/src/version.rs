//! Semantic versions of catalog images.
//!
//! `Version` carries the only ordering used anywhere in the catalog. The
//! set-based store updates get their comparison predicates from
//! [`version_predicate`], so SQL and in-memory comparisons always agree.
//!
//! Ordering: major, minor, patch numerically. On a tie, a release (no
//! pre-release label) sorts above every pre-release of the same triple, and
//! two pre-release labels compare byte-wise (SQLite BINARY collation).

use crate::error::{InventoryError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_prerelease"
    )]
    pub prerelease: Option<String>,
}

/// An empty label is a release, same as in [`Version::with_prerelease`].
fn deserialize_prerelease<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let label = Option::<String>::deserialize(deserializer)?;
    Ok(label.filter(|label| !label.is_empty()))
}

impl Version {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            prerelease: None,
        }
    }

    pub fn with_prerelease(mut self, label: impl Into<String>) -> Self {
        let label = label.into();
        self.prerelease = if label.is_empty() { None } else { Some(label) };
        self
    }

    pub fn is_release(&self) -> bool {
        self.prerelease.is_none()
    }

    /// Version comparison. Every other component goes through this.
    pub fn compare(a: &Version, b: &Version) -> Ordering {
        a.major
            .cmp(&b.major)
            .then(a.minor.cmp(&b.minor))
            .then(a.patch.cmp(&b.patch))
            .then_with(|| match (&a.prerelease, &b.prerelease) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(x), Some(y)) => x.as_bytes().cmp(y.as_bytes()),
            })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        Version::compare(self, other)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{}", pre)?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = InventoryError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (triple, prerelease) = match s.split_once('-') {
            Some((triple, pre)) => (triple, Some(pre)),
            None => (s, None),
        };

        let parts: Vec<&str> = triple.split('.').collect();
        if parts.len() != 3 {
            return Err(InventoryError::Validation(format!(
                "Invalid version '{}': expected major.minor.patch",
                s
            )));
        }

        let level = |p: &str| {
            p.parse::<u32>().map_err(|_| {
                InventoryError::Validation(format!("Invalid version '{}': bad level '{}'", s, p))
            })
        };

        let version = Version::new(level(parts[0])?, level(parts[1])?, level(parts[2])?);
        Ok(match prerelease {
            Some(pre) => version.with_prerelease(pre),
            None => version,
        })
    }
}

/// SQL predicate selecting rows whose version stands in `order` relative to the
/// bound `:major`, `:minor`, `:patch` and `:prerelease` parameters.
///
/// `Ordering::Less` selects strictly older rows, `Ordering::Greater` strictly
/// newer rows, `Ordering::Equal` the exact version.
pub(crate) fn version_predicate(order: Ordering, alias: &str) -> String {
    let c = |col: &str| {
        if alias.is_empty() {
            col.to_string()
        } else {
            format!("{}.{}", alias, col)
        }
    };
    let (major, minor, patch, pre) = (c("major"), c("minor"), c("patch"), c("prerelease"));

    match order {
        Ordering::Equal => format!(
            "({major} = :major AND {minor} = :minor AND {patch} = :patch \
             AND {pre} IS :prerelease)"
        ),
        Ordering::Less => format!(
            "({major} < :major \
             OR ({major} = :major AND {minor} < :minor) \
             OR ({major} = :major AND {minor} = :minor AND {patch} < :patch) \
             OR ({major} = :major AND {minor} = :minor AND {patch} = :patch \
                 AND {pre} IS NOT NULL AND (:prerelease IS NULL OR {pre} < :prerelease)))"
        ),
        Ordering::Greater => format!(
            "({major} > :major \
             OR ({major} = :major AND {minor} > :minor) \
             OR ({major} = :major AND {minor} = :minor AND {patch} > :patch) \
             OR ({major} = :major AND {minor} = :minor AND {patch} = :patch \
                 AND :prerelease IS NOT NULL AND ({pre} IS NULL OR {pre} > :prerelease)))"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::{named_params, Connection};

    fn v(s: &str) -> Version {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        assert_eq!(v("1.2.3"), Version::new(1, 2, 3));
        assert_eq!(v("1.2.3-rc1"), Version::new(1, 2, 3).with_prerelease("rc1"));
        assert_eq!(v("1.2.3-rc1").to_string(), "1.2.3-rc1");
        assert!("1.2".parse::<Version>().is_err());
        assert!("1.x.3".parse::<Version>().is_err());
    }

    #[test]
    fn test_empty_prerelease_deserializes_as_release() {
        let parsed: Version =
            serde_json::from_str(r#"{"major":1,"minor":0,"patch":0,"prerelease":""}"#).unwrap();
        assert_eq!(parsed, Version::new(1, 0, 0));
        assert!(parsed.is_release());

        let labelled: Version =
            serde_json::from_str(r#"{"major":1,"minor":0,"patch":0,"prerelease":"rc1"}"#).unwrap();
        assert_eq!(labelled, Version::new(1, 0, 0).with_prerelease("rc1"));

        let bare: Version = serde_json::from_str(r#"{"major":1,"minor":0,"patch":0}"#).unwrap();
        assert!(bare.is_release());
    }

    #[test]
    fn test_numeric_levels() {
        assert!(v("1.10.0") > v("1.9.0"));
        assert!(v("2.0.0") > v("1.99.99"));
        assert!(v("1.0.10") > v("1.0.9"));
    }

    #[test]
    fn test_release_beats_prerelease() {
        assert!(v("1.2.3") > v("1.2.3-rc1"));
        assert!(v("1.2.3") > v("1.2.3-zzz"));
        assert!(v("1.2.3-rc1") > v("1.2.2"));
        assert!(v("1.2.3-rc2") > v("1.2.3-rc1"));
    }

    #[test]
    fn test_strict_total_order() {
        let mut versions = vec![
            v("2.0.0"),
            v("1.2.3-rc2"),
            v("1.2.3"),
            v("0.9.9"),
            v("1.2.3-beta"),
            v("1.10.0"),
        ];
        versions.sort();
        let rendered: Vec<String> = versions.iter().map(|v| v.to_string()).collect();
        assert_eq!(
            rendered,
            vec!["0.9.9", "1.2.3-beta", "1.2.3-rc2", "1.2.3", "1.10.0", "2.0.0"]
        );

        for a in &versions {
            for b in &versions {
                let ab = Version::compare(a, b);
                assert_eq!(ab, Version::compare(b, a).reverse());
                assert_eq!(ab == Ordering::Equal, a == b);
            }
        }
    }

    #[test]
    fn test_sql_predicate_agrees_with_compare() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE v (major INTEGER, minor INTEGER, patch INTEGER, prerelease TEXT)",
        )
        .unwrap();
        let all = [
            "1.0.0", "1.2.3-alpha", "1.2.3-rc1", "1.2.3", "1.2.4", "1.3.0", "2.0.0-rc1", "2.0.0",
        ];
        for s in all {
            let x = v(s);
            conn.execute(
                "INSERT INTO v VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![x.major, x.minor, x.patch, x.prerelease],
            )
            .unwrap();
        }

        for pivot in all.iter().map(|s| v(s)) {
            for order in [Ordering::Less, Ordering::Equal, Ordering::Greater] {
                let sql = format!(
                    "SELECT COUNT(*) FROM v WHERE {}",
                    version_predicate(order, "")
                );
                let count: usize = conn
                    .query_row(
                        &sql,
                        named_params! {
                            ":major": pivot.major,
                            ":minor": pivot.minor,
                            ":patch": pivot.patch,
                            ":prerelease": pivot.prerelease,
                        },
                        |row| row.get(0),
                    )
                    .unwrap();
                let expected = all.iter().filter(|s| v(s).cmp(&pivot) == order).count();
                assert_eq!(count, expected, "pivot {} order {:?}", pivot, order);
            }
        }
    }
}
