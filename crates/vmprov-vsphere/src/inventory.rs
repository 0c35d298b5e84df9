//! Name and path based lookup of inventory objects.
//!
//! # Fallback-to-first
//!
//! [`InventoryResolver::resolve`] treats an empty name as "any object of
//! this kind" and returns the first one the server enumerates. Callers use
//! this for optional placement parameters (datacenter, cluster, ...). When
//! several objects share a name the first in enumeration order wins; the
//! result is stable for a fixed inventory but is not otherwise meaningful.

use crate::client::ControlPlane;
use crate::error::{VsphereError, VsphereResult};
use crate::types::*;

/// Read-only resolver backed by a [`ControlPlane`].
pub struct InventoryResolver<'a> {
    client: &'a dyn ControlPlane,
}

impl<'a> InventoryResolver<'a> {
    pub fn new(client: &'a dyn ControlPlane) -> Self {
        Self { client }
    }

    /// Find an object of `kind` anywhere in the inventory by exact,
    /// case-sensitive name. An empty `name` returns the first object
    /// enumerated (see module docs).
    pub async fn resolve(&self, kind: InventoryKind, name: &str) -> VsphereResult<InventoryRef> {
        self.resolve_in(kind, name, None).await
    }

    /// Same as [`resolve`](Self::resolve) with `None` mapped to the
    /// fallback-to-first policy.
    pub async fn resolve_opt(
        &self,
        kind: InventoryKind,
        name: Option<&str>,
    ) -> VsphereResult<InventoryRef> {
        self.resolve_in(kind, name.unwrap_or_default(), None).await
    }

    /// Resolve below `scope` (e.g. datastores of a template, resource
    /// pools of a cluster).
    pub async fn resolve_in(
        &self,
        kind: InventoryKind,
        name: &str,
        scope: Option<&InventoryRef>,
    ) -> VsphereResult<InventoryRef> {
        let objects = self.client.enumerate(kind, scope).await?;
        let scope_desc = scope
            .map(|s| format!(" in {} '{}'", s.kind, s.name))
            .unwrap_or_default();

        if name.is_empty() {
            let first = objects.into_iter().next().ok_or_else(|| {
                VsphereError::not_found(format!("No {kind} found{scope_desc}"))
            })?;
            log::debug!("No {} name given, using first found: '{}'", kind, first.name);
            return Ok(first);
        }

        objects
            .into_iter()
            .find(|o| o.name == name)
            .ok_or_else(|| VsphereError::not_found(format!("{kind} '{name}' not found{scope_desc}")))
    }

    /// Resolve a full inventory path such as `"DC1/vm/Simulators/web01"`.
    pub async fn resolve_by_path(&self, path: &str) -> VsphereResult<InventoryRef> {
        let path = normalize_path(path);
        if path.is_empty() {
            return Err(VsphereError::not_found("Empty inventory path"));
        }

        let mut matches = self.client.resolve_path(&path).await?;
        match matches.len() {
            0 => Err(VsphereError::not_found(format!(
                "Nothing found at inventory path '{path}'"
            ))),
            1 => Ok(matches.remove(0)),
            n => Err(VsphereError::ambiguous_path(format!(
                "Inventory path '{path}' matches {n} objects"
            ))),
        }
    }
}

/// Trim surrounding slashes so "/DC1/vm/" and "DC1/vm" are the same path.
pub fn normalize_path(path: &str) -> String {
    path.trim().trim_matches('/').to_string()
}

/// Build `<datacenter>/vm[/<folder>]`. `folder` may itself be a nested
/// path such as `Team/Sims`.
pub fn folder_inventory_path(datacenter: &str, folder: Option<&str>) -> String {
    match folder.map(normalize_path).filter(|f| !f.is_empty()) {
        Some(folder) => format!("{datacenter}/vm/{folder}"),
        None => format!("{datacenter}/vm"),
    }
}

/// Path of the VM `name` inside the folder at `folder_path`.
pub fn vm_inventory_path(folder_path: &str, name: &str) -> String {
    format!("{}/{}", normalize_path(folder_path), name.trim())
}
