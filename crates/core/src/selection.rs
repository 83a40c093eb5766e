use std::fmt;

use serde::{Deserialize, Serialize};

use crate::instances::{InstanceRef, InstanceRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Single,
    #[default]
    Group,
}

impl QueryMode {
    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Single => Self::Group,
            Self::Group => Self::Single,
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single => f.write_str("single"),
            Self::Group => f.write_str("group"),
        }
    }
}

/// What the next dispatch targets.
///
/// Invariant: `instance` is either absent or belongs to `group_type`. In group
/// mode the instance is kept for convenience but not used by dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Selection {
    mode: QueryMode,
    group_type: String,
    instance: Option<InstanceRef>,
}

impl Selection {
    #[must_use]
    pub fn new(mode: QueryMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    #[must_use]
    pub fn group_type(&self) -> &str {
        &self.group_type
    }

    #[must_use]
    pub fn instance(&self) -> Option<&InstanceRef> {
        self.instance.as_ref()
    }

    #[must_use]
    pub fn set_group_type(mut self, group_type: impl Into<String>) -> Self {
        self.group_type = group_type.into();
        if self
            .instance
            .as_ref()
            .is_some_and(|instance| instance.group_type != self.group_type)
        {
            self.instance = None;
        }
        self
    }

    #[must_use]
    pub fn set_instance(mut self, instance: InstanceRef) -> Self {
        self.group_type.clone_from(&instance.group_type);
        self.instance = Some(instance);
        self
    }

    #[must_use]
    pub fn set_mode(mut self, mode: QueryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Re-anchors the selection on a freshly loaded registry.
    #[must_use]
    pub fn reconcile(mut self, registry: &InstanceRegistry) -> Self {
        if let Some(current) = self.instance.take() {
            if let Some(instance) = registry.get(&current) {
                return self.set_instance(instance.reference());
            }
        }

        if !self.group_type.is_empty() && registry.contains_group_type(&self.group_type) {
            return self;
        }

        match registry.first() {
            Some(first) => self.set_instance(first.reference()),
            None => {
                self.group_type.clear();
                self
            }
        }
    }
}
