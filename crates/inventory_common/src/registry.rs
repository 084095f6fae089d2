//! Platform, package-version and application registry
//!
//! Resolve-or-create lookups for the records an image submission references.
//! All functions run inside the caller's transaction.

use crate::error::{is_unique_violation, InventoryError, Result};
use crate::model::{ImageId, PackageVersionInfo, PlatformId, PlatformRef};
use crate::store::nested;
use crate::version::Version;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use std::collections::BTreeMap;
use tracing::debug;

pub(crate) fn find_platform(conn: &Connection, platform: &PlatformRef) -> Result<Option<PlatformId>> {
    Ok(conn
        .query_row(
            "SELECT id FROM platform WHERE vendor = ?1 AND model = ?2",
            params![platform.vendor, platform.model],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(PlatformId::new))
}

/// Looks up the platform, creating it in a savepoint when missing. A
/// concurrent insert of the same platform is resolved by reading it back.
pub(crate) fn resolve_platform(tx: &mut Transaction<'_>, platform: &PlatformRef) -> Result<PlatformId> {
    if let Some(id) = find_platform(tx, platform)? {
        return Ok(id);
    }

    let id = PlatformId::random();
    let created = nested(tx, |conn| {
        conn.execute(
            "INSERT INTO platform (id, vendor, model) VALUES (?1, ?2, ?3)",
            params![id.as_str(), platform.vendor, platform.model],
        )?;
        Ok(())
    });

    match created {
        Ok(()) => {
            debug!("Registered platform {} as {}", platform, id);
            Ok(id)
        }
        Err(InventoryError::Store(e)) if is_unique_violation(&e) => {
            find_platform(tx, platform)?.ok_or(InventoryError::Store(e))
        }
        Err(e) => Err(e),
    }
}

/// Resolves or creates a package version and refreshes its build metadata.
pub(crate) fn resolve_package(conn: &Connection, info: &PackageVersionInfo) -> Result<i64> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM package_version WHERE org = ?1 AND name = ?2 \
             AND major = ?3 AND minor = ?4 AND patch = ?5 AND prerelease IS ?6",
            params![
                info.organization,
                info.package_name,
                info.version.major,
                info.version.minor,
                info.version.patch,
                info.version.prerelease,
            ],
            |row| row.get(0),
        )
        .optional()?;

    let id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE package_version SET build_date = ?2 WHERE id = ?1",
                params![id, info.build_date],
            )?;
            id
        }
        None => {
            conn.execute(
                "INSERT INTO package_version (org, name, major, minor, patch, prerelease, build_date) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    info.organization,
                    info.package_name,
                    info.version.major,
                    info.version.minor,
                    info.version.patch,
                    info.version.prerelease,
                    info.build_date,
                ],
            )?;
            conn.last_insert_rowid()
        }
    };

    conn.execute(
        "DELETE FROM package_version_checksum WHERE package_version_id = ?1",
        params![id],
    )?;
    for (algorithm, digest) in &info.checksums {
        conn.execute(
            "INSERT INTO package_version_checksum (package_version_id, algorithm, digest) \
             VALUES (?1, ?2, ?3)",
            params![id, algorithm, digest],
        )?;
    }
    Ok(id)
}

pub(crate) fn resolve_application(conn: &Connection, name: &str) -> Result<i64> {
    conn.execute(
        "INSERT OR IGNORE INTO application (name) VALUES (?1)",
        params![name],
    )?;
    Ok(conn.query_row(
        "SELECT id FROM application WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?)
}

pub(crate) fn link_packages(conn: &Connection, image_id: &ImageId, package_ids: &[i64]) -> Result<()> {
    conn.execute("DELETE FROM image_package WHERE image_id = ?1", params![image_id])?;
    for id in package_ids {
        conn.execute(
            "INSERT OR IGNORE INTO image_package (image_id, package_version_id) VALUES (?1, ?2)",
            params![image_id, id],
        )?;
    }
    Ok(())
}

pub(crate) fn link_applications(conn: &Connection, image_id: &ImageId, app_ids: &[i64]) -> Result<()> {
    conn.execute("DELETE FROM image_application WHERE image_id = ?1", params![image_id])?;
    for id in app_ids {
        conn.execute(
            "INSERT OR IGNORE INTO image_application (image_id, application_id) VALUES (?1, ?2)",
            params![image_id, id],
        )?;
    }
    Ok(())
}

pub(crate) fn load_packages(conn: &Connection, image_id: &ImageId) -> Result<Vec<PackageVersionInfo>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT pv.id, pv.org, pv.name, pv.major, pv.minor, pv.patch, pv.prerelease, pv.build_date
        FROM image_package ip JOIN package_version pv ON pv.id = ip.package_version_id
        WHERE ip.image_id = ?1
        ORDER BY pv.org, pv.name
        "#,
    )?;
    let rows = stmt.query_map(params![image_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            PackageVersionInfo {
                organization: row.get(1)?,
                package_name: row.get(2)?,
                version: Version {
                    major: row.get(3)?,
                    minor: row.get(4)?,
                    patch: row.get(5)?,
                    prerelease: row.get(6)?,
                },
                build_date: row.get(7)?,
                checksums: BTreeMap::new(),
            },
        ))
    })?;

    let mut packages = Vec::new();
    for row in rows {
        let (id, mut info) = row?;
        let mut checksums = conn.prepare(
            "SELECT algorithm, digest FROM package_version_checksum WHERE package_version_id = ?1",
        )?;
        let digests = checksums.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for digest in digests {
            let (algorithm, value) = digest?;
            info.checksums.insert(algorithm, value);
        }
        packages.push(info);
    }
    Ok(packages)
}

pub(crate) fn load_applications(conn: &Connection, image_id: &ImageId) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT a.name FROM image_application ia JOIN application a ON a.id = ia.application_id \
         WHERE ia.image_id = ?1 ORDER BY a.name",
    )?;
    let rows = stmt.query_map(params![image_id], |row| row.get::<_, String>(0))?;
    let mut apps = Vec::new();
    for row in rows {
        apps.push(row?);
    }
    Ok(apps)
}
