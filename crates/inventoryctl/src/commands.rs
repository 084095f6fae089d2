//! Command execution

use crate::output;
use crate::Commands;
use anyhow::{Context as _, Result};
use inventory_common::{
    ElementId, ElementName, ElementRef, ImageCatalog, ImageId, ImageInfo, ImageName, ImageQuery,
    ImageRef, ImageType, InstalledImageReconciler, InventoryConfig, InventoryStore, PlatformRef,
    RoleName, StaticDirectory, TracingEventSink,
};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub struct Context {
    pub catalog: ImageCatalog,
    pub reconciler: InstalledImageReconciler,
    pub json: bool,
}

impl Context {
    pub fn open(config: &InventoryConfig, database: Option<PathBuf>, json: bool) -> Result<Self> {
        let path = database.unwrap_or_else(|| config.database_path());
        let store = InventoryStore::open(&path)
            .with_context(|| format!("opening inventory database {}", path.display()))?;
        let directory = Arc::new(StaticDirectory::from_config(config));
        debug!("Directory holds {} elements", directory.len());

        Ok(Self {
            catalog: ImageCatalog::new(store.clone(), directory.clone(), Arc::new(TracingEventSink)),
            reconciler: InstalledImageReconciler::new(store, directory),
            json,
        })
    }
}

fn element_ref(value: &str) -> ElementRef {
    match value.strip_prefix("id:") {
        Some(id) => ElementRef::Id(ElementId::new(id)),
        None => ElementRef::Name(ElementName::new(value)),
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub fn run(ctx: &Context, command: Commands) -> Result<()> {
    match command {
        Commands::Store { file } => {
            let submission: ImageInfo = read_json(&file)?;
            let created = ctx.catalog.create_or_update_image(&submission)?;
            let verb = if created { "Created" } else { "Updated" };
            output::display_result(
                ctx.json,
                &serde_json::json!({ "image_id": submission.image_id, "created": created }),
                &format!("{} {} ({})", verb, submission.qualified_name(), submission.image_id),
            )
        }

        Commands::Show { id } => {
            let stats = ctx.catalog.image_statistics(&ImageId::new(id))?;
            if ctx.json {
                return output::print_json(&stats);
            }
            output::display_image(&stats.image);
            output::display_binding_counts(stats.active_count, stats.cached_count);
            Ok(())
        }

        Commands::Promote { id, state } => {
            let promotion = ctx.catalog.promote_image(&ImageId::new(id.as_str()), state)?;
            if ctx.json {
                return output::print_json(&serde_json::json!({
                    "image_id": id,
                    "previous": promotion.previous,
                    "current": promotion.current,
                    "superseded": promotion.superseded,
                    "restored": promotion.restored,
                }));
            }
            output::display_promotion(&id, &promotion);
            Ok(())
        }

        Commands::Remove { id } => {
            let removed = ctx.catalog.remove_image(&ImageId::new(id))?;
            output::display_result(
                ctx.json,
                &removed,
                &format!("Removed {} ({})", removed.qualified_name(), removed.image_id),
            )
        }

        Commands::Find {
            pattern,
            role,
            image_type,
            name,
            state,
            version,
            limit,
        } => {
            let query = ImageQuery {
                pattern,
                role: role.map(RoleName::new),
                image_type: image_type.map(ImageType::new),
                image_name: name.map(ImageName::new),
                states: if state.is_empty() { None } else { Some(state) },
                version,
                limit,
            };
            let images = ctx.catalog.find_images(&query)?;
            if ctx.json {
                return output::print_json(&images);
            }
            output::display_references(&images);
            Ok(())
        }

        Commands::Roles { role } => {
            let images = ctx.catalog.role_images(&RoleName::new(role))?;
            if ctx.json {
                return output::print_json(&images);
            }
            for image in &images {
                println!("{:<8} {}", image.image_type, image.image_name);
            }
            Ok(())
        }

        Commands::Releases {
            role,
            vendor,
            model,
        } => {
            let images = ctx
                .catalog
                .release_images(&RoleName::new(role), &PlatformRef::new(vendor, model))?;
            if ctx.json {
                return output::print_json(&images);
            }
            output::display_references(&images);
            Ok(())
        }

        Commands::Updates {
            element,
            image_type,
            name,
            version,
        } => {
            let updates = ctx.catalog.list_available_updates(
                &element_ref(&element),
                &ImageType::new(image_type),
                &ImageName::new(name),
                &version,
            )?;
            if ctx.json {
                return output::print_json(&updates);
            }
            output::display_updates(&updates);
            Ok(())
        }

        Commands::Installed { element, image } => {
            let element = element_ref(&element);
            if let Some(image_id) = image {
                let installed = ctx
                    .reconciler
                    .installed_image(&element, &ImageId::new(image_id))?;
                if ctx.json {
                    return output::print_json(&installed);
                }
                output::display_installed_image(&installed);
                return Ok(());
            }
            let installed = ctx.reconciler.installed_images(&element)?;
            if ctx.json {
                return output::print_json(&installed);
            }
            output::display_installed(&installed);
            Ok(())
        }

        Commands::Report { element, file } => {
            let reported: Vec<ImageRef> = read_json(&file)?;
            let summary = ctx
                .reconciler
                .replace_installed_images(&element_ref(&element), &reported)?;
            output::display_result(
                ctx.json,
                &summary,
                &format!(
                    "{} kept, {} added, {} removed, {} skipped",
                    summary.retained, summary.added, summary.removed, summary.skipped
                ),
            )
        }

        Commands::CacheAdd { element, file } => {
            let images: Vec<ImageRef> = read_json(&file)?;
            let added = ctx
                .reconciler
                .add_cached_images(&element_ref(&element), &images)?;
            output::display_result(
                ctx.json,
                &serde_json::json!({ "added": added }),
                &format!("Cached {} images", added),
            )
        }

        Commands::CacheRemove { element, file } => {
            let images: Vec<ImageRef> = read_json(&file)?;
            let removed = ctx
                .reconciler
                .remove_cached_images(&element_ref(&element), &images)?;
            output::display_result(
                ctx.json,
                &serde_json::json!({ "removed": removed }),
                &format!("Removed {} cached images", removed),
            )
        }

        Commands::Uninstall {
            element,
            image_type,
            name,
            version,
        } => {
            let removed = ctx.reconciler.remove_installed_image(
                &element_ref(&element),
                &ImageType::new(&image_type),
                &ImageName::new(name.as_str()),
                &version,
            )?;
            let message = if removed {
                format!("Uninstalled {}-{}-{}", image_type, name, version)
            } else {
                format!("{}-{}-{} is not installed", image_type, name, version)
            };
            output::display_result(ctx.json, &serde_json::json!({ "removed": removed }), &message)
        }
    }
}
