use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dispatcher::{QueryService, ServiceError};

pub type InstanceId = i64;

/// Table name to column names, as used for editor autocomplete.
pub type TableMetadata = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: InstanceId,
    pub group_type: String,
    pub title: String,
    pub dialect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_metadata: Option<TableMetadata>,
}

impl Instance {
    #[must_use]
    pub fn new(
        id: InstanceId,
        group_type: impl Into<String>,
        title: impl Into<String>,
        dialect: impl Into<String>,
    ) -> Self {
        Self {
            id,
            group_type: group_type.into(),
            title: title.into(),
            dialect: dialect.into(),
            table_metadata: None,
        }
    }

    #[must_use]
    pub fn reference(&self) -> InstanceRef {
        InstanceRef {
            id: self.id,
            group_type: self.group_type.clone(),
            title: self.title.clone(),
        }
    }

    #[must_use]
    pub fn is(&self, reference: &InstanceRef) -> bool {
        self.id == reference.id && self.group_type == reference.group_type
    }
}

/// Lightweight handle to an instance, held by the selection and the history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRef {
    pub id: InstanceId,
    pub group_type: String,
    pub title: String,
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}. {}", self.id, self.title)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InstanceRegistry {
    instances: Vec<Instance>,
}

impl InstanceRegistry {
    #[must_use]
    pub fn from_instances(mut instances: Vec<Instance>) -> Self {
        instances.sort_by(registry_order);
        Self { instances }
    }

    #[must_use]
    pub fn instances(&self) -> &[Instance] {
        &self.instances
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    #[must_use]
    pub fn first(&self) -> Option<&Instance> {
        self.instances.first()
    }

    #[must_use]
    pub fn get(&self, reference: &InstanceRef) -> Option<&Instance> {
        self.instances
            .iter()
            .find(|instance| instance.is(reference))
    }

    pub fn members<'a>(&'a self, group_type: &'a str) -> impl Iterator<Item = &'a Instance> + 'a {
        self.instances
            .iter()
            .filter(move |instance| instance.group_type == group_type)
    }

    #[must_use]
    pub fn contains_group_type(&self, group_type: &str) -> bool {
        self.members(group_type).next().is_some()
    }

    /// Distinct group types, in registry order.
    #[must_use]
    pub fn group_types(&self) -> Vec<String> {
        let mut group_types: Vec<String> = Vec::new();
        for instance in &self.instances {
            if !group_types.contains(&instance.group_type) {
                group_types.push(instance.group_type.clone());
            }
        }
        group_types
    }

    /// Returns a registry where `reference` carries `metadata`. Metadata that is
    /// already cached is never replaced.
    #[must_use]
    pub fn with_table_metadata(&self, reference: &InstanceRef, metadata: TableMetadata) -> Self {
        let mut metadata = Some(metadata);
        let instances = self
            .instances
            .iter()
            .map(|instance| {
                if instance.is(reference) && instance.table_metadata.is_none() {
                    Instance {
                        table_metadata: metadata.take(),
                        ..instance.clone()
                    }
                } else {
                    instance.clone()
                }
            })
            .collect();
        Self { instances }
    }
}

/// Display order: id, then title, then group type, ignoring case.
#[must_use]
pub fn registry_order(left: &Instance, right: &Instance) -> Ordering {
    left.id
        .cmp(&right.id)
        .then_with(|| left.title.to_lowercase().cmp(&right.title.to_lowercase()))
        .then_with(|| {
            left.group_type
                .to_lowercase()
                .cmp(&right.group_type.to_lowercase())
        })
}

pub async fn load_registry<S>(service: &S) -> Result<InstanceRegistry, ServiceError>
where
    S: QueryService + ?Sized,
{
    let instances = service.list_instances().await?;
    debug!(count = instances.len(), "loaded instance list");
    Ok(InstanceRegistry::from_instances(instances))
}

#[cfg(test)]
mod tests {
    use super::{Instance, InstanceRegistry, TableMetadata};

    fn sample_registry() -> InstanceRegistry {
        InstanceRegistry::from_instances(vec![
            Instance::new(2, "orders", "orders us", "mysql"),
            Instance::new(1, "users", "Users eu", "postgresql"),
            Instance::new(1, "orders", "orders eu", "mysql"),
        ])
    }

    #[test]
    fn instances_sort_by_id_then_title_then_group_type() {
        let registry = sample_registry();
        let order = registry
            .instances()
            .iter()
            .map(|instance| (instance.id, instance.title.as_str()))
            .collect::<Vec<_>>();

        assert_eq!(
            order,
            vec![(1, "orders eu"), (1, "Users eu"), (2, "orders us")]
        );
        assert_eq!(
            registry.group_types(),
            vec!["orders".to_string(), "users".to_string()]
        );
    }

    #[test]
    fn members_are_scoped_to_group_type() {
        let registry = sample_registry();
        let ids = registry.members("orders").map(|i| i.id).collect::<Vec<_>>();

        assert_eq!(ids, vec![1, 2]);
        assert!(!registry.contains_group_type("billing"));
    }

    #[test]
    fn with_table_metadata_returns_new_registry_and_keeps_cached_value() {
        let registry = sample_registry();
        let target = registry.instances()[0].reference();
        let first = TableMetadata::from([("orders".to_string(), vec!["id".to_string()])]);
        let second = TableMetadata::from([("other".to_string(), vec!["x".to_string()])]);

        let updated = registry.with_table_metadata(&target, first.clone());
        assert!(registry.instances()[0].table_metadata.is_none());
        assert_eq!(
            updated.get(&target).and_then(|i| i.table_metadata.clone()),
            Some(first.clone())
        );

        let unchanged = updated.with_table_metadata(&target, second);
        assert_eq!(
            unchanged.get(&target).and_then(|i| i.table_metadata.clone()),
            Some(first)
        );
    }

    #[test]
    fn lookup_uses_id_and_group_type() {
        let registry = sample_registry();
        let mut reference = registry.instances()[0].reference();
        reference.group_type = "users".to_string();

        let found = registry.get(&reference).expect("instance should resolve");
        assert_eq!(found.title, "Users eu");
    }
}
