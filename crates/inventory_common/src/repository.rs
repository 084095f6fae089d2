//! Row-level access to catalog records and installed-image bindings.
//!
//! Functions here take a plain `&Connection` so they run equally inside a
//! transaction or a savepoint. Bulk state changes are single conditional
//! `UPDATE` statements.

use crate::error::{InventoryError, Result};
use crate::model::{
    BindingKey, ElementId, ElementName, ImageId, ImageName, ImageState, ImageType,
    InstallationState, InstalledImageBinding, PlatformId, PlatformRef, RoleName,
};
use crate::version::{version_predicate, Version};
use chrono::{DateTime, Utc};
use rusqlite::types::{ToSqlOutput, Type};
use rusqlite::{named_params, params, Connection, OptionalExtension, Row, ToSql};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

const IMAGE_COLUMNS: &str = "i.id, i.modcount, i.org, i.category, i.type, i.name, i.state, \
     i.role, i.element_id, i.element_name, i.platform_id, p.vendor, p.model, \
     i.major, i.minor, i.patch, i.prerelease, i.ext, i.build_id, i.build_date";

const IMAGE_FROM: &str = "FROM image i JOIN platform p ON p.id = i.platform_id";

/// Persisted catalog record without its child collections
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ImageRow {
    pub id: ImageId,
    pub modcount: i64,
    pub organization: Option<String>,
    pub category: Option<String>,
    pub image_type: ImageType,
    pub image_name: ImageName,
    pub state: ImageState,
    pub role: RoleName,
    pub element_id: Option<ElementId>,
    pub element_name: Option<ElementName>,
    pub platform_id: PlatformId,
    pub platform: PlatformRef,
    pub version: Version,
    pub extension: Option<String>,
    pub build_id: Option<String>,
    pub build_date: Option<DateTime<Utc>>,
}

impl ImageRow {
    pub fn partition(&self) -> Partition<'_> {
        match &self.element_id {
            Some(element) => Partition::Element(element),
            None => Partition::RoleWide,
        }
    }
}

/// The two disjoint version-uniqueness partitions within a (platform, role)
#[derive(Debug, Clone, Copy)]
pub(crate) enum Partition<'a> {
    /// Images bound to one specific element
    Element(&'a ElementId),
    /// Images for every element of the role
    RoleWide,
}

impl<'a> Partition<'a> {
    fn clause(&self, alias: &str) -> String {
        let col = if alias.is_empty() {
            "element_id".to_string()
        } else {
            format!("{}.element_id", alias)
        };
        match self {
            Partition::Element(_) => format!("{} = :element", col),
            Partition::RoleWide => format!("{} IS NULL", col),
        }
    }

    fn element(self) -> Option<&'a ElementId> {
        match self {
            Partition::Element(element) => Some(element),
            Partition::RoleWide => None,
        }
    }
}

macro_rules! text_to_sql {
    ($($name:ty),*) => {
        $(
            impl ToSql for $name {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    self.as_str().to_sql()
                }
            }
        )*
    };
}

text_to_sql!(ImageId, ElementId, ElementName, PlatformId, RoleName, ImageType, ImageName);

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = InventoryError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn image_from_row(row: &Row<'_>) -> rusqlite::Result<ImageRow> {
    let prerelease: Option<String> = row.get(16)?;
    Ok(ImageRow {
        id: ImageId::new(row.get::<_, String>(0)?),
        modcount: row.get(1)?,
        organization: row.get(2)?,
        category: row.get(3)?,
        image_type: ImageType::new(row.get::<_, String>(4)?),
        image_name: ImageName::new(row.get::<_, String>(5)?),
        state: parse_col(row, 6)?,
        role: RoleName::new(row.get::<_, String>(7)?),
        element_id: row.get::<_, Option<String>>(8)?.map(ElementId::new),
        element_name: row.get::<_, Option<String>>(9)?.map(ElementName::new),
        platform_id: PlatformId::new(row.get::<_, String>(10)?),
        platform: PlatformRef::new(row.get::<_, String>(11)?, row.get::<_, String>(12)?),
        version: Version {
            major: row.get(13)?,
            minor: row.get(14)?,
            patch: row.get(15)?,
            prerelease,
        },
        extension: row.get(17)?,
        build_id: row.get(18)?,
        build_date: row.get(19)?,
    })
}

pub(crate) fn find_image(conn: &Connection, id: &ImageId) -> Result<Option<ImageRow>> {
    let sql = format!("SELECT {} {} WHERE i.id = ?1", IMAGE_COLUMNS, IMAGE_FROM);
    Ok(conn.query_row(&sql, params![id], image_from_row).optional()?)
}

pub(crate) fn fetch_image(conn: &Connection, id: &ImageId) -> Result<ImageRow> {
    find_image(conn, id)?.ok_or_else(|| InventoryError::NotFound(format!("Image {}", id)))
}

/// Exact (type, name, version) lookup inside one partition.
pub(crate) fn find_scoped_image(
    conn: &Connection,
    platform_id: &PlatformId,
    role: &RoleName,
    partition: Partition<'_>,
    key: &BindingKey,
) -> Result<Option<ImageRow>> {
    let sql = format!(
        "SELECT {} {} WHERE i.platform_id = :platform AND i.role = :role AND {} \
         AND i.type = :type AND i.name = :name AND {}",
        IMAGE_COLUMNS,
        IMAGE_FROM,
        partition.clause("i"),
        version_predicate(Ordering::Equal, "i"),
    );
    let mut params: Vec<(&str, &dyn ToSql)> = vec![
        (":platform", platform_id as &dyn ToSql),
        (":role", role as &dyn ToSql),
        (":type", &key.image_type as &dyn ToSql),
        (":name", &key.image_name as &dyn ToSql),
        (":major", &key.version.major as &dyn ToSql),
        (":minor", &key.version.minor as &dyn ToSql),
        (":patch", &key.version.patch as &dyn ToSql),
        (":prerelease", &key.version.prerelease as &dyn ToSql),
    ];
    if let Some(element) = partition.element() {
        params.push((":element", element as &dyn ToSql));
    }
    Ok(conn
        .query_row(&sql, params.as_slice(), image_from_row)
        .optional()?)
}

pub(crate) fn insert_image(conn: &Connection, image: &ImageRow) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO image (id, modcount, org, category, type, name, state, role, element_id,
                           element_name, platform_id, major, minor, patch, prerelease, ext,
                           build_id, build_date)
        VALUES (?1, 0, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        "#,
        params![
            image.id,
            image.organization,
            image.category,
            image.image_type.as_str(),
            image.image_name.as_str(),
            image.state.as_str(),
            image.role.as_str(),
            image.element_id,
            image.element_name,
            image.platform_id,
            image.version.major,
            image.version.minor,
            image.version.patch,
            image.version.prerelease,
            image.extension,
            image.build_id,
            image.build_date,
        ],
    )
    .map_err(|e| {
        InventoryError::from_store(e, || {
            format!(
                "Image {}-{}-{} already exists in scope {} {}",
                image.image_type, image.image_name, image.version, image.role, image.platform
            )
        })
    })?;
    Ok(())
}

/// Rewrites the mutable fields of `image`, conditional on the modcount read earlier.
pub(crate) fn update_image(conn: &Connection, image: &ImageRow) -> Result<()> {
    let updated = conn
        .execute(
            r#"
            UPDATE image SET
                modcount = modcount + 1,
                org = ?2, category = ?3, type = ?4, name = ?5, role = ?6,
                element_id = ?7, element_name = ?8, platform_id = ?9,
                major = ?10, minor = ?11, patch = ?12, prerelease = ?13,
                ext = ?14, build_id = ?15, build_date = ?16
            WHERE id = ?1 AND modcount = ?17
            "#,
            params![
                image.id,
                image.organization,
                image.category,
                image.image_type.as_str(),
                image.image_name.as_str(),
                image.role.as_str(),
                image.element_id,
                image.element_name,
                image.platform_id,
                image.version.major,
                image.version.minor,
                image.version.patch,
                image.version.prerelease,
                image.extension,
                image.build_id,
                image.build_date,
                image.modcount,
            ],
        )
        .map_err(|e| {
            InventoryError::from_store(e, || {
                format!(
                    "Image {}-{}-{} already exists in scope {} {}",
                    image.image_type, image.image_name, image.version, image.role, image.platform
                )
            })
        })?;
    ensure_updated(updated, &image.id)
}

pub(crate) fn update_state(conn: &Connection, image: &ImageRow, state: ImageState) -> Result<()> {
    let updated = conn.execute(
        "UPDATE image SET state = ?2, modcount = modcount + 1 WHERE id = ?1 AND modcount = ?3",
        params![image.id, state.as_str(), image.modcount],
    )?;
    ensure_updated(updated, &image.id)
}

fn ensure_updated(updated: usize, id: &ImageId) -> Result<()> {
    if updated == 0 {
        return Err(InventoryError::Conflict(format!(
            "Image {} was modified concurrently",
            id
        )));
    }
    Ok(())
}

/// Set-based scan over the siblings of `image`: same platform, role,
/// partition, type and name; never the image itself, never REVOKED rows.
fn update_siblings(
    conn: &Connection,
    image: &ImageRow,
    order: Ordering,
    only_state: Option<ImageState>,
    new_state: ImageState,
) -> Result<usize> {
    let partition = image.partition();
    let mut sql = format!(
        "UPDATE image SET state = :new_state, modcount = modcount + 1 \
         WHERE platform_id = :platform AND role = :role AND {} \
         AND type = :type AND name = :name AND id <> :id \
         AND state <> 'REVOKED' AND {}",
        partition.clause(""),
        version_predicate(order, ""),
    );
    let new_state = new_state.as_str();
    let only_state = only_state.map(|s| s.as_str());
    if only_state.is_some() {
        sql.push_str(" AND state = :only_state");
    }

    let mut params: Vec<(&str, &dyn ToSql)> = vec![
        (":new_state", &new_state as &dyn ToSql),
        (":platform", &image.platform_id as &dyn ToSql),
        (":role", &image.role as &dyn ToSql),
        (":type", &image.image_type as &dyn ToSql),
        (":name", &image.image_name as &dyn ToSql),
        (":id", &image.id as &dyn ToSql),
        (":major", &image.version.major as &dyn ToSql),
        (":minor", &image.version.minor as &dyn ToSql),
        (":patch", &image.version.patch as &dyn ToSql),
        (":prerelease", &image.version.prerelease as &dyn ToSql),
    ];
    if let Some(only) = &only_state {
        params.push((":only_state", only as &dyn ToSql));
    }
    if let Some(element) = partition.element() {
        params.push((":element", element as &dyn ToSql));
    }
    Ok(conn.execute(&sql, params.as_slice())?)
}

/// Marks every older, non-revoked sibling SUPERSEDED.
pub(crate) fn supersede_older(conn: &Connection, image: &ImageRow) -> Result<usize> {
    update_siblings(conn, image, Ordering::Less, None, ImageState::Superseded)
}

/// Moves every newer SUPERSEDED sibling back to CANDIDATE.
pub(crate) fn restore_newer(conn: &Connection, image: &ImageRow) -> Result<usize> {
    update_siblings(
        conn,
        image,
        Ordering::Greater,
        Some(ImageState::Superseded),
        ImageState::Candidate,
    )
}

pub(crate) fn delete_image(conn: &Connection, id: &ImageId) -> Result<()> {
    conn.execute("DELETE FROM image WHERE id = ?1", params![id])?;
    Ok(())
}

/// Non-revoked images newer than `version` for one element: its own
/// partition plus the role-wide one.
pub(crate) fn find_updates(
    conn: &Connection,
    platform_id: &PlatformId,
    role: &RoleName,
    element_id: &ElementId,
    image_type: &ImageType,
    image_name: &ImageName,
    version: &Version,
) -> Result<Vec<ImageRow>> {
    let sql = format!(
        "SELECT {} {} WHERE i.platform_id = :platform AND i.role = :role \
         AND (i.element_id IS NULL OR i.element_id = :element) \
         AND i.type = :type AND i.name = :name AND i.state <> 'REVOKED' AND {}",
        IMAGE_COLUMNS,
        IMAGE_FROM,
        version_predicate(Ordering::Greater, "i"),
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(
        named_params! {
            ":platform": platform_id,
            ":role": role.as_str(),
            ":element": element_id,
            ":type": image_type.as_str(),
            ":name": image_name.as_str(),
            ":major": version.major,
            ":minor": version.minor,
            ":patch": version.patch,
            ":prerelease": version.prerelease,
        },
        image_from_row,
    )?;

    let mut updates = Vec::new();
    for row in rows {
        updates.push(row?);
    }
    Ok(updates)
}

pub(crate) fn query_images(
    conn: &Connection,
    filter_sql: &str,
    params: &[&dyn ToSql],
) -> Result<Vec<ImageRow>> {
    let sql = format!("SELECT {} {} {}", IMAGE_COLUMNS, IMAGE_FROM, filter_sql);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params, image_from_row)?;
    let mut images = Vec::new();
    for row in rows {
        images.push(row?);
    }
    Ok(images)
}

pub(crate) fn load_checksums(conn: &Connection, id: &ImageId) -> Result<BTreeMap<String, String>> {
    let mut stmt = conn.prepare("SELECT algorithm, digest FROM image_checksum WHERE image_id = ?1")?;
    let rows = stmt.query_map(params![id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    let mut checksums = BTreeMap::new();
    for row in rows {
        let (algorithm, digest) = row?;
        checksums.insert(algorithm, digest);
    }
    Ok(checksums)
}

pub(crate) fn replace_checksums(
    conn: &Connection,
    id: &ImageId,
    checksums: &BTreeMap<String, String>,
) -> Result<()> {
    conn.execute("DELETE FROM image_checksum WHERE image_id = ?1", params![id])?;
    let mut stmt =
        conn.prepare("INSERT INTO image_checksum (image_id, algorithm, digest) VALUES (?1, ?2, ?3)")?;
    for (algorithm, digest) in checksums {
        stmt.execute(params![id, algorithm, digest])?;
    }
    Ok(())
}

// --- installed-image bindings ---

fn binding_from_row(row: &Row<'_>) -> rusqlite::Result<(BindingKey, InstalledImageBinding)> {
    let key = BindingKey {
        image_type: ImageType::new(row.get::<_, String>(4)?),
        image_name: ImageName::new(row.get::<_, String>(5)?),
        version: Version {
            major: row.get(6)?,
            minor: row.get(7)?,
            patch: row.get(8)?,
            prerelease: row.get(9)?,
        },
    };
    let binding = InstalledImageBinding {
        element_id: ElementId::new(row.get::<_, String>(0)?),
        image_id: ImageId::new(row.get::<_, String>(1)?),
        state: parse_col(row, 2)?,
        deployed_at: row.get(3)?,
    };
    Ok((key, binding))
}

/// All bindings of an element keyed by (type, name, version)
pub(crate) fn load_bindings(
    conn: &Connection,
    element_id: &ElementId,
) -> Result<BTreeMap<BindingKey, InstalledImageBinding>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT ei.element_id, ei.image_id, ei.state, ei.deployed_at,
               i.type, i.name, i.major, i.minor, i.patch, i.prerelease
        FROM element_image ei JOIN image i ON i.id = ei.image_id
        WHERE ei.element_id = ?1
        "#,
    )?;
    let rows = stmt.query_map(params![element_id], binding_from_row)?;
    let mut bindings = BTreeMap::new();
    for row in rows {
        let (key, binding) = row?;
        bindings.insert(key, binding);
    }
    Ok(bindings)
}

pub(crate) fn find_binding(
    conn: &Connection,
    element_id: &ElementId,
    image_id: &ImageId,
) -> Result<Option<InstalledImageBinding>> {
    Ok(conn
        .query_row(
            r#"
            SELECT ei.element_id, ei.image_id, ei.state, ei.deployed_at,
                   i.type, i.name, i.major, i.minor, i.patch, i.prerelease
            FROM element_image ei JOIN image i ON i.id = ei.image_id
            WHERE ei.element_id = ?1 AND ei.image_id = ?2
            "#,
            params![element_id, image_id],
            binding_from_row,
        )
        .optional()?
        .map(|(_, binding)| binding))
}

pub(crate) fn insert_binding(conn: &Connection, binding: &InstalledImageBinding) -> Result<()> {
    conn.execute(
        "INSERT INTO element_image (element_id, image_id, state, deployed_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            binding.element_id,
            binding.image_id,
            binding.state.as_str(),
            binding.deployed_at
        ],
    )
    .map_err(|e| {
        InventoryError::from_store(e, || {
            format!(
                "Element {} already holds image {}",
                binding.element_id, binding.image_id
            )
        })
    })?;
    Ok(())
}

pub(crate) fn update_binding_state(
    conn: &Connection,
    element_id: &ElementId,
    image_id: &ImageId,
    state: InstallationState,
) -> Result<()> {
    conn.execute(
        "UPDATE element_image SET state = ?3 WHERE element_id = ?1 AND image_id = ?2",
        params![element_id, image_id, state.as_str()],
    )?;
    Ok(())
}

pub(crate) fn delete_binding(
    conn: &Connection,
    element_id: &ElementId,
    image_id: &ImageId,
) -> Result<()> {
    conn.execute(
        "DELETE FROM element_image WHERE element_id = ?1 AND image_id = ?2",
        params![element_id, image_id],
    )?;
    Ok(())
}

/// Bindings referencing an image, across all elements, per installation state
pub(crate) fn count_bindings(conn: &Connection, image_id: &ImageId) -> Result<(usize, usize)> {
    let mut stmt =
        conn.prepare("SELECT state, COUNT(*) FROM element_image WHERE image_id = ?1 GROUP BY state")?;
    let rows = stmt.query_map(params![image_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let (mut active, mut cached) = (0, 0);
    for row in rows {
        let (state, count) = row?;
        match state.parse::<InstallationState>()? {
            InstallationState::Active => active += count as usize,
            InstallationState::Cached => cached += count as usize,
        }
    }
    Ok((active, cached))
}
