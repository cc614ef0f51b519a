//! Config module expansion.
use super::Manifest;
use crate::catalog::Catalog;
use crate::error::ExpansionError;

/// Derive a manifest with every referenced config module merged in.
///
/// Module restore and verify entries are appended after the manifest's own
/// and tagged with `fromModule`. Each id is expanded once, in first-seen
/// order, and recorded in `expandedModules`; ids already recorded there are
/// skipped, so expanding twice changes nothing.
///
/// # Errors
///
/// Returns [`ExpansionError::UnknownModule`] if an id is not in `catalog`.
pub fn expand(manifest: &Manifest, catalog: &Catalog) -> Result<Manifest, ExpansionError> {
    let mut expanded = manifest.clone();

    for id in &manifest.config_modules {
        if expanded.expanded_modules.contains(id) {
            continue;
        }
        let module = catalog
            .get(id)
            .ok_or_else(|| ExpansionError::UnknownModule {
                id: id.clone(),
                known: catalog.ids(),
            })?;

        expanded.restore.extend(module.restore.iter().map(|entry| {
            let mut entry = entry.clone();
            entry.from_module = Some(module.id.clone());
            entry.source_root = Some(module.dir.clone());
            entry
        }));
        expanded.verify.extend(module.verify.iter().map(|entry| {
            let mut entry = entry.clone();
            entry.from_module = Some(module.id.clone());
            entry
        }));
        expanded.expanded_modules.push(id.clone());
    }

    Ok(expanded)
}
