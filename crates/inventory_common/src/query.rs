//! Catalog search
//!
//! Read-only lookups over catalog images. Filters are assembled into a
//! single SQL statement. Results are ordered by role, element, vendor, name
//! and model, newest version first.

use crate::catalog::{image_info, ImageCatalog};
use crate::error::Result;
use crate::model::{
    ImageId, ImageName, ImageReference, ImageState, ImageStatistics, ImageType, PlatformRef,
    RoleImage, RoleName,
};
use crate::repository::{self, ImageRow};
use crate::version::Version;
use rusqlite::{params, ToSql};

/// Filter for [`ImageCatalog::find_images`]
#[derive(Debug, Clone, Default)]
pub struct ImageQuery {
    /// Substring matched against image name, role, element name, vendor and model
    pub pattern: Option<String>,
    pub role: Option<RoleName>,
    pub image_type: Option<ImageType>,
    pub image_name: Option<ImageName>,
    pub states: Option<Vec<ImageState>>,
    pub version: Option<Version>,
    pub limit: Option<usize>,
}

impl ImageQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn role(mut self, role: &str) -> Self {
        self.role = Some(RoleName::new(role));
        self
    }

    pub fn image_type(mut self, image_type: &str) -> Self {
        self.image_type = Some(ImageType::new(image_type));
        self
    }

    pub fn image_name(mut self, name: &str) -> Self {
        self.image_name = Some(ImageName::new(name));
        self
    }

    pub fn state(mut self, state: ImageState) -> Self {
        self.states.get_or_insert_with(Vec::new).push(state);
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn build_sql(&self) -> (String, Vec<Box<dyn ToSql>>) {
        let mut sql = String::from("WHERE 1=1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(ref pattern) = self.pattern {
            sql.push_str(
                " AND (i.name LIKE ? OR i.role LIKE ? OR i.element_name LIKE ? \
                 OR p.vendor LIKE ? OR p.model LIKE ?)",
            );
            let like = format!("%{}%", pattern);
            for _ in 0..5 {
                params_vec.push(Box::new(like.clone()));
            }
        }

        if let Some(ref role) = self.role {
            sql.push_str(" AND i.role = ?");
            params_vec.push(Box::new(role.as_str().to_string()));
        }

        if let Some(ref image_type) = self.image_type {
            sql.push_str(" AND i.type = ?");
            params_vec.push(Box::new(image_type.as_str().to_string()));
        }

        if let Some(ref name) = self.image_name {
            sql.push_str(" AND i.name = ?");
            params_vec.push(Box::new(name.as_str().to_string()));
        }

        if let Some(ref states) = self.states {
            let placeholders: Vec<&str> = states.iter().map(|_| "?").collect();
            sql.push_str(&format!(" AND i.state IN ({})", placeholders.join(",")));
            for s in states {
                params_vec.push(Box::new(s.as_str().to_string()));
            }
        }

        if let Some(ref version) = self.version {
            sql.push_str(" AND i.major = ? AND i.minor = ? AND i.patch = ? AND i.prerelease IS ?");
            params_vec.push(Box::new(version.major));
            params_vec.push(Box::new(version.minor));
            params_vec.push(Box::new(version.patch));
            params_vec.push(Box::new(version.prerelease.clone()));
        }

        (sql, params_vec)
    }
}

fn reference(row: ImageRow) -> ImageReference {
    ImageReference {
        image_id: row.id,
        image_type: row.image_type,
        image_name: row.image_name,
        image_state: row.state,
        version: row.version,
        role: row.role,
        element_name: row.element_name,
        platform: row.platform,
        build_date: row.build_date,
    }
}

impl ImageCatalog {
    /// Images matching `query`, newest version first within each family.
    pub fn find_images(&self, query: &ImageQuery) -> Result<Vec<ImageReference>> {
        let (sql, params_vec) = query.build_sql();
        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|p| p.as_ref()).collect();

        let mut rows = self
            .store()
            .read(|conn| repository::query_images(conn, &sql, &params_refs))?;
        // Prerelease ordering is not expressible in ORDER BY.
        rows.sort_by(|a, b| {
            (&a.role, &a.element_name, &a.platform.vendor, &a.image_name, &a.platform.model)
                .cmp(&(&b.role, &b.element_name, &b.platform.vendor, &b.image_name, &b.platform.model))
                .then_with(|| a.image_type.cmp(&b.image_type))
                .then_with(|| Version::compare(&b.version, &a.version))
        });
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows.into_iter().map(reference).collect())
    }

    /// Distinct (type, name) pairs stored for `role`
    pub fn role_images(&self, role: &RoleName) -> Result<Vec<RoleImage>> {
        self.store().read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT type, name FROM image WHERE role = ?1 ORDER BY name, type",
            )?;
            let rows = stmt.query_map(params![role.as_str()], |row| {
                Ok(RoleImage {
                    image_type: ImageType::new(row.get::<_, String>(0)?),
                    image_name: ImageName::new(row.get::<_, String>(1)?),
                })
            })?;
            let mut images = Vec::new();
            for row in rows {
                images.push(row?);
            }
            Ok(images)
        })
    }

    /// Role-wide images currently released for `role` on `platform`
    pub fn release_images(&self, role: &RoleName, platform: &PlatformRef) -> Result<Vec<ImageReference>> {
        let rows = self.store().read(|conn| {
            repository::query_images(
                conn,
                "WHERE i.role = ?1 AND p.vendor = ?2 AND p.model = ?3 \
                 AND i.element_id IS NULL AND i.state = 'RELEASE' ORDER BY i.type, i.name",
                &[
                    &role.as_str() as &dyn ToSql,
                    &platform.vendor as &dyn ToSql,
                    &platform.model as &dyn ToSql,
                ],
            )
        })?;
        Ok(rows.into_iter().map(reference).collect())
    }

    /// The image together with how many elements hold it
    pub fn image_statistics(&self, image_id: &ImageId) -> Result<ImageStatistics> {
        self.store().read(|conn| {
            let row = repository::fetch_image(conn, image_id)?;
            let (active_count, cached_count) = repository::count_bindings(conn, image_id)?;
            Ok(ImageStatistics {
                image: image_info(conn, &row)?,
                active_count,
                cached_count,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::StaticDirectory;
    use crate::events::CollectingEventSink;
    use crate::model::ImageInfo;
    use crate::store::InventoryStore;
    use std::sync::Arc;

    fn catalog() -> ImageCatalog {
        let mut directory = StaticDirectory::new();
        directory.add_role("spine").add_role("leaf");
        ImageCatalog::new(
            InventoryStore::open_in_memory().unwrap(),
            Arc::new(directory),
            Arc::new(CollectingEventSink::new()),
        )
    }

    fn publish(catalog: &ImageCatalog, role: &str, name: &str, version: Version) -> ImageId {
        let info = ImageInfo::new("LXC", name, role, PlatformRef::new("acme", "x1"), version)
            .with_state(ImageState::Candidate);
        catalog.create_or_update_image(&info).unwrap();
        info.image_id
    }

    #[test]
    fn test_find_by_pattern_and_state() {
        let catalog = catalog();
        publish(&catalog, "spine", "router-os", Version::new(1, 0, 0));
        let newer = publish(&catalog, "spine", "router-os", Version::new(1, 1, 0));
        publish(&catalog, "leaf", "switch-os", Version::new(2, 0, 0));
        catalog.promote_image(&newer, ImageState::Release).unwrap();

        let hits = catalog.find_images(&ImageQuery::new().pattern("router")).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].version, Version::new(1, 1, 0));

        let released = catalog
            .find_images(&ImageQuery::new().state(ImageState::Release))
            .unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].image_id, newer);

        let by_version = catalog
            .find_images(&ImageQuery::new().version(Version::new(2, 0, 0)))
            .unwrap();
        assert_eq!(by_version[0].role, RoleName::new("leaf"));
    }

    #[test]
    fn test_limit() {
        let catalog = catalog();
        for patch in 0..4 {
            publish(&catalog, "spine", "router-os", Version::new(1, 0, patch));
        }
        let hits = catalog.find_images(&ImageQuery::new().limit(2)).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].version, Version::new(1, 0, 3));
    }

    #[test]
    fn test_role_images_are_distinct() {
        let catalog = catalog();
        publish(&catalog, "spine", "router-os", Version::new(1, 0, 0));
        publish(&catalog, "spine", "router-os", Version::new(1, 0, 1));
        publish(&catalog, "spine", "agent", Version::new(0, 1, 0));

        let images = catalog.role_images(&RoleName::new("spine")).unwrap();
        let names: Vec<_> = images.iter().map(|i| i.image_name.as_str()).collect();
        assert_eq!(names, vec!["agent", "router-os"]);
    }

    #[test]
    fn test_release_images_and_statistics() {
        let catalog = catalog();
        let id = publish(&catalog, "spine", "router-os", Version::new(1, 0, 0));
        catalog.promote_image(&id, ImageState::Release).unwrap();

        let released = catalog
            .release_images(&RoleName::new("spine"), &PlatformRef::new("acme", "x1"))
            .unwrap();
        assert_eq!(released.len(), 1);

        let stats = catalog.image_statistics(&id).unwrap();
        assert_eq!(stats.image.image_state, ImageState::Release);
        assert_eq!((stats.active_count, stats.cached_count), (0, 0));
    }
}
