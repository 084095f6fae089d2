//! Element, role and platform directory
//!
//! The catalog only needs to know which platform and role an element belongs
//! to, and whether a role exists. `StaticDirectory` serves both from the
//! configured element list.

use crate::config::{ElementEntry, InventoryConfig};
use crate::error::{InventoryError, Result};
use crate::model::{ElementId, ElementName, ElementRef, ElementScope, PlatformRef, RoleName};
use std::collections::{BTreeSet, HashMap};

pub trait ElementDirectory: Send + Sync {
    /// Resolve an element to its platform + role scope
    fn resolve(&self, element: &ElementRef) -> Result<ElementScope>;

    fn role_exists(&self, role: &RoleName) -> bool;
}

/// In-memory directory built from configuration
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    roles: BTreeSet<RoleName>,
    by_id: HashMap<ElementId, ElementScope>,
    by_name: HashMap<ElementName, ElementId>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &InventoryConfig) -> Self {
        let mut directory = Self::new();
        for role in &config.roles {
            directory.add_role(role.as_str());
        }
        for entry in &config.elements {
            directory.add_entry(entry);
        }
        directory
    }

    pub fn add_role(&mut self, role: &str) -> &mut Self {
        self.roles.insert(RoleName::new(role));
        self
    }

    /// Register an element. Its role is registered implicitly.
    pub fn add_element(
        &mut self,
        id: &str,
        name: &str,
        role: &str,
        platform: PlatformRef,
    ) -> &mut Self {
        let scope = ElementScope {
            element_id: ElementId::new(id),
            element_name: ElementName::new(name),
            role: RoleName::new(role),
            platform,
        };
        self.roles.insert(scope.role.clone());
        self.by_name
            .insert(scope.element_name.clone(), scope.element_id.clone());
        self.by_id.insert(scope.element_id.clone(), scope);
        self
    }

    fn add_entry(&mut self, entry: &ElementEntry) {
        self.add_element(
            &entry.id,
            &entry.name,
            &entry.role,
            PlatformRef::new(entry.vendor.as_str(), entry.model.as_str()),
        );
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl ElementDirectory for StaticDirectory {
    fn resolve(&self, element: &ElementRef) -> Result<ElementScope> {
        let id = match element {
            ElementRef::Id(id) => Some(id),
            ElementRef::Name(name) => self.by_name.get(name),
        };
        id.and_then(|id| self.by_id.get(id))
            .cloned()
            .ok_or_else(|| InventoryError::NotFound(format!("Element {}", element)))
    }

    fn role_exists(&self, role: &RoleName) -> bool {
        self.roles.contains(role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> StaticDirectory {
        let mut dir = StaticDirectory::new();
        dir.add_role("leaf")
            .add_element("e-1", "spine-01", "spine", PlatformRef::new("acme", "x1"));
        dir
    }

    #[test]
    fn test_resolve_by_id_and_name() {
        let dir = directory();
        let by_id = dir.resolve(&ElementRef::Id(ElementId::new("e-1"))).unwrap();
        let by_name = dir
            .resolve(&ElementRef::Name(ElementName::new("spine-01")))
            .unwrap();
        assert_eq!(by_id, by_name);
        assert_eq!(by_id.role, RoleName::new("spine"));
        assert_eq!(by_id.platform, PlatformRef::new("acme", "x1"));
    }

    #[test]
    fn test_unknown_element_is_not_found() {
        let err = directory()
            .resolve(&ElementRef::Name(ElementName::new("nope")))
            .unwrap_err();
        assert!(matches!(err, InventoryError::NotFound(_)));
    }

    #[test]
    fn test_roles() {
        let dir = directory();
        assert!(dir.role_exists(&RoleName::new("leaf")));
        assert!(dir.role_exists(&RoleName::new("spine")));
        assert!(!dir.role_exists(&RoleName::new("border")));
    }
}
