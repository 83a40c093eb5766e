//! The query panel as one state value and a pure reducer.
//!
//! Every user intent and every backend completion is a [`PanelEvent`];
//! [`reduce`] turns `(state, event)` into the next state. Derived editor
//! configuration is recomputed explicitly whenever the selection or the
//! registry changes.

use std::time::SystemTime;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::aggregator::{aggregate, Aggregation};
use crate::derived_config::{self, DerivedConfig};
use crate::history::{HistoryEntry, QueryHistory};
use crate::instances::{InstanceRef, InstanceRegistry, TableMetadata};
use crate::query_result::{AggregatedTable, ErrorRecord, RawInstanceResult};
use crate::selection::{QueryMode, Selection};

pub const DEFAULT_QUERY: &str = "select now()";

#[derive(Debug, Clone, PartialEq)]
pub struct PanelState {
    pub registry: InstanceRegistry,
    pub selection: Selection,
    pub query_text: String,
    pub derived: DerivedConfig,
    pub table: AggregatedTable,
    pub errors: Vec<ErrorRecord>,
    pub dispatch_in_flight: bool,
    pub dispatch_failure: Option<String>,
    pub history: QueryHistory,
}

impl Default for PanelState {
    fn default() -> Self {
        Self::new(QueryHistory::new())
    }
}

/// Inputs accepted by [`reduce`].
#[derive(Debug, Clone, PartialEq)]
pub enum PanelEvent {
    InstancesLoaded(InstanceRegistry),
    TableMetadataLoaded {
        instance: InstanceRef,
        metadata: TableMetadata,
    },
    SelectGroupType(String),
    SelectInstance(InstanceRef),
    SetMode(QueryMode),
    EditQueryText(String),
    ExecuteStarted(ExecuteRequest),
    DispatchCompleted {
        mode: QueryMode,
        results: Vec<RawInstanceResult>,
    },
    DispatchFailed(String),
    DismissDispatchFailure,
    ReplayHistoryEntry(HistoryEntry),
}

impl PanelEvent {
    fn changes_configuration(&self) -> bool {
        matches!(
            self,
            Self::InstancesLoaded(_)
                | Self::TableMetadataLoaded { .. }
                | Self::SelectGroupType(_)
                | Self::SelectInstance(_)
                | Self::SetMode(_)
                | Self::ReplayHistoryEntry(_)
        )
    }
}

/// A validated Execute intent: what to send and against which selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub query: String,
    pub selection: Selection,
    pub issued_at: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecuteBlocked {
    #[error("a query is already running")]
    InFlight,
    #[error("query text is empty")]
    EmptyQuery,
    #[error("select an instance to run in single mode")]
    NoInstanceSelected,
}

impl PanelState {
    #[must_use]
    pub fn new(history: QueryHistory) -> Self {
        Self {
            registry: InstanceRegistry::default(),
            selection: Selection::default(),
            query_text: DEFAULT_QUERY.to_string(),
            derived: DerivedConfig::default(),
            table: AggregatedTable::default(),
            errors: Vec::new(),
            dispatch_in_flight: false,
            dispatch_failure: None,
            history,
        }
    }

    pub fn execute_request(&self, issued_at: SystemTime) -> Result<ExecuteRequest, ExecuteBlocked> {
        if self.dispatch_in_flight {
            return Err(ExecuteBlocked::InFlight);
        }
        if self.query_text.trim().is_empty() {
            return Err(ExecuteBlocked::EmptyQuery);
        }
        if self.selection.mode() == QueryMode::Single && self.selection.instance().is_none() {
            return Err(ExecuteBlocked::NoInstanceSelected);
        }
        Ok(ExecuteRequest {
            query: self.query_text.clone(),
            selection: self.selection.clone(),
            issued_at,
        })
    }

    #[must_use]
    pub fn missing_metadata(&self) -> Vec<InstanceRef> {
        derived_config::instances_missing_metadata(&self.selection, &self.registry)
    }
}

#[must_use]
pub fn reduce(mut state: PanelState, event: PanelEvent) -> PanelState {
    let refresh_configuration = event.changes_configuration();

    match event {
        PanelEvent::InstancesLoaded(registry) => {
            info!(instances = registry.len(), "instance registry replaced");
            state.selection = state.selection.reconcile(&registry);
            state.registry = registry;
        }
        PanelEvent::TableMetadataLoaded { instance, metadata } => {
            state.registry = state.registry.with_table_metadata(&instance, metadata);
        }
        PanelEvent::SelectGroupType(group_type) => {
            state.selection = state.selection.set_group_type(group_type);
        }
        PanelEvent::SelectInstance(instance) => {
            state.selection = state.selection.set_instance(instance);
        }
        PanelEvent::SetMode(mode) => {
            state.selection = state.selection.set_mode(mode);
        }
        PanelEvent::EditQueryText(text) => {
            state.query_text = text;
        }
        PanelEvent::ExecuteStarted(request) => {
            let entry = HistoryEntry::new(request.issued_at, &request.selection, request.query);
            if !state.history.append(entry) {
                debug!("repeated query not added to history");
            }
            state.dispatch_in_flight = true;
            state.dispatch_failure = None;
        }
        PanelEvent::DispatchCompleted { mode, results } => {
            let Aggregation { table, errors } = aggregate(mode, &results);
            info!(
                instances = results.len(),
                rows = table.rows.len(),
                errors = errors.len(),
                "dispatch completed"
            );
            state.table = table;
            state.errors = errors;
            state.dispatch_in_flight = false;
        }
        PanelEvent::DispatchFailed(message) => {
            warn!(%message, "dispatch failed");
            state.dispatch_in_flight = false;
            state.dispatch_failure = Some(message);
        }
        PanelEvent::DismissDispatchFailure => {
            state.dispatch_failure = None;
        }
        PanelEvent::ReplayHistoryEntry(entry) => {
            state.selection = entry.selection();
            state.query_text = entry.query;
        }
    }

    if refresh_configuration {
        state.derived = derived_config::resolve(&state.selection, &state.registry);
    }
    state
}
