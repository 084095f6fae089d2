//! Terminal output

use anyhow::Result;
use inventory_common::{
    AvailableUpdate, ElementInstalledImages, ImageInfo, ImageReference, ImageState,
    InstalledImage, InventoryError, Promotion,
};
use owo_colors::OwoColorize;
use serde::Serialize;

const SEPARATOR: &str = "------------------------------------------------------------";

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// JSON in `--json` mode, a one-line confirmation otherwise
pub fn display_result<T: Serialize + ?Sized>(json: bool, value: &T, message: &str) -> Result<()> {
    if json {
        return print_json(value);
    }
    println!("[OK] {}", message.green());
    Ok(())
}

pub fn display_error(err: &anyhow::Error) {
    let code = err
        .downcast_ref::<InventoryError>()
        .map(|e| format!(" ({})", e.code()))
        .unwrap_or_default();
    eprintln!("[ERROR]{} {}", code, format!("{:#}", err).red());
}

fn state_label(state: ImageState) -> String {
    match state {
        ImageState::New => state.as_str().cyan().to_string(),
        ImageState::Candidate => state.as_str().yellow().to_string(),
        ImageState::Release => state.as_str().green().bold().to_string(),
        ImageState::Superseded => state.as_str().dimmed().to_string(),
        ImageState::Revoked => state.as_str().red().to_string(),
    }
}

fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<14} {}", label.dimmed(), value);
}

pub fn display_image(image: &ImageInfo) {
    println!("{}", image.qualified_name().bold());
    println!("{}", SEPARATOR.dimmed());
    field("id", &image.image_id);
    field("state", state_label(image.image_state));
    field("platform", &image.platform);
    if let Some(element) = &image.element_name {
        field("element", element);
    }
    if let Some(org) = &image.organization {
        field("organization", org);
    }
    if let Some(category) = &image.category {
        field("category", category);
    }
    if let Some(ext) = &image.extension {
        field("extension", ext);
    }
    if let Some(build) = &image.build_id {
        field("build", build);
    }
    if let Some(date) = image.build_date {
        field("built", date.format("%Y-%m-%d %H:%M"));
    }
    for (algorithm, digest) in &image.checksums {
        field(algorithm, digest);
    }
    for package in &image.packages {
        field(
            "package",
            format!(
                "{}/{} {}",
                package.organization, package.package_name, package.version
            ),
        );
    }
    if !image.applications.is_empty() {
        field("applications", image.applications.join(", "));
    }
}

pub fn display_binding_counts(active: usize, cached: usize) {
    field("active on", active);
    field("cached on", cached);
}

pub fn display_promotion(id: &str, promotion: &Promotion) {
    if !promotion.changed() {
        println!("[INFO] {} is already {}", id, state_label(promotion.current));
        return;
    }
    println!(
        "[OK] {} {} -> {}",
        id,
        state_label(promotion.previous),
        state_label(promotion.current)
    );
    if promotion.superseded > 0 || promotion.restored > 0 {
        println!(
            "     {} superseded, {} restored to CANDIDATE",
            promotion.superseded, promotion.restored
        );
    }
}

pub fn display_references(images: &[ImageReference]) {
    if images.is_empty() {
        println!("{}", "No images".dimmed());
        return;
    }
    for image in images {
        let scope = image
            .element_name
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "*".to_string());
        println!(
            "{:<10} {:<12} {:<8} {:<20} {:<14} {:<16} {}",
            image.role,
            scope,
            image.image_type,
            image.image_name,
            image.version.to_string(),
            image.platform,
            state_label(image.image_state)
        );
    }
}

pub fn display_updates(updates: &[AvailableUpdate]) {
    if updates.is_empty() {
        println!("{}", "Up to date".green());
        return;
    }
    for update in updates {
        let built = update
            .build_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();
        println!(
            "{:<14} {:<10} {:<10} {}",
            update.version.to_string().bold(),
            update.update_type.as_str().yellow(),
            built,
            update.image_id.dimmed()
        );
    }
}

pub fn display_installed_image(image: &InstalledImage) {
    let marker = if image.installation_state.is_active() {
        "*".green().to_string()
    } else {
        " ".to_string()
    };
    println!(
        "{} {:<8} {:<20} {:<14} {:<7} {}",
        marker,
        image.image_type,
        image.image_name,
        image.version.to_string(),
        image.installation_state,
        state_label(image.image_state)
    );
    for update in &image.available_updates {
        println!(
            "      -> {} ({})",
            update.version.to_string().cyan(),
            update.update_type
        );
    }
}

pub fn display_installed(installed: &ElementInstalledImages) {
    println!(
        "{} ({}, role {})",
        installed.element_name.bold(),
        installed.element_id,
        installed.role
    );
    println!("{}", SEPARATOR.dimmed());
    if installed.images.is_empty() {
        println!("{}", "No images installed".dimmed());
    }
    for image in &installed.images {
        display_installed_image(image);
    }
}
