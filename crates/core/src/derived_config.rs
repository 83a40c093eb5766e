use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::dispatcher::{QueryService, ServiceError};
use crate::instances::{InstanceRef, InstanceRegistry, TableMetadata};
use crate::selection::{QueryMode, Selection};

pub const DEFAULT_DIALECT: &str = "sql";

/// Editor hints derived from the current selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedConfig {
    pub dialect: String,
    pub table_metadata: Option<TableMetadata>,
}

impl Default for DerivedConfig {
    fn default() -> Self {
        Self {
            dialect: DEFAULT_DIALECT.to_string(),
            table_metadata: None,
        }
    }
}

impl DerivedConfig {
    #[must_use]
    pub fn editor_mode(&self) -> &'static str {
        editor_mode(&self.dialect)
    }
}

#[must_use]
pub fn resolve(selection: &Selection, registry: &InstanceRegistry) -> DerivedConfig {
    DerivedConfig {
        dialect: resolve_dialect(selection, registry),
        table_metadata: resolve_table_metadata(selection, registry),
    }
}

#[must_use]
pub fn resolve_dialect(selection: &Selection, registry: &InstanceRegistry) -> String {
    match selection.mode() {
        QueryMode::Single => selection
            .instance()
            .and_then(|reference| registry.get(reference))
            .map_or_else(|| DEFAULT_DIALECT.to_string(), |i| i.dialect.clone()),
        QueryMode::Group => {
            let mut dialects = registry
                .members(selection.group_type())
                .map(|instance| instance.dialect.as_str());
            let Some(first) = dialects.next() else {
                return DEFAULT_DIALECT.to_string();
            };
            if dialects.all(|dialect| dialect == first) {
                first.to_string()
            } else {
                DEFAULT_DIALECT.to_string()
            }
        }
    }
}

#[must_use]
pub fn resolve_table_metadata(
    selection: &Selection,
    registry: &InstanceRegistry,
) -> Option<TableMetadata> {
    match selection.mode() {
        QueryMode::Single => selection
            .instance()
            .and_then(|reference| registry.get(reference))
            .and_then(|instance| instance.table_metadata.clone()),
        QueryMode::Group => {
            let mut merged: Option<TableMetadata> = None;
            for metadata in registry
                .members(selection.group_type())
                .filter_map(|instance| instance.table_metadata.as_ref())
            {
                let merged = merged.get_or_insert_with(TableMetadata::new);
                for (table, columns) in metadata {
                    let entry = merged.entry(table.clone()).or_default();
                    for column in columns {
                        if !entry.contains(column) {
                            entry.push(column.clone());
                        }
                    }
                }
            }
            merged
        }
    }
}

/// Editor highlighting mode for a dialect.
#[must_use]
pub fn editor_mode(dialect: &str) -> &'static str {
    match dialect {
        "postgresql" => "text/x-pgsql",
        "mysql" => "text/x-mysql",
        _ => "text/x-sql",
    }
}

/// Instances of the current selection that still lack table metadata.
#[must_use]
pub fn instances_missing_metadata(
    selection: &Selection,
    registry: &InstanceRegistry,
) -> Vec<InstanceRef> {
    match selection.mode() {
        QueryMode::Single => selection
            .instance()
            .and_then(|reference| registry.get(reference))
            .filter(|instance| instance.table_metadata.is_none())
            .map(|instance| vec![instance.reference()])
            .unwrap_or_default(),
        QueryMode::Group => registry
            .members(selection.group_type())
            .filter(|instance| instance.table_metadata.is_none())
            .map(|instance| instance.reference())
            .collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataFetch {
    pub instance: InstanceRef,
    pub outcome: Result<TableMetadata, ServiceError>,
}

/// Fetches metadata for every listed instance concurrently.
pub async fn fetch_missing_metadata<S>(service: &S, missing: &[InstanceRef]) -> Vec<MetadataFetch>
where
    S: QueryService + ?Sized,
{
    let fetches = missing.iter().map(|instance| async move {
        let outcome = service.fetch_table_metadata(instance).await;
        match &outcome {
            Ok(metadata) => debug!(
                instance_id = instance.id,
                group_type = %instance.group_type,
                tables = metadata.len(),
                "fetched table metadata"
            ),
            Err(error) => warn!(
                instance_id = instance.id,
                group_type = %instance.group_type,
                %error,
                "table metadata fetch failed"
            ),
        }
        MetadataFetch {
            instance: instance.clone(),
            outcome,
        }
    });
    join_all(fetches).await
}
