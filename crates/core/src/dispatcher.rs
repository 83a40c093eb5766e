use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::instances::{Instance, InstanceRef, TableMetadata};
use crate::query_result::RawInstanceResult;
use crate::selection::{QueryMode, Selection};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServiceError {
    message: String,
}

impl ServiceError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryScope {
    Instance(InstanceRef),
    Group(String),
}

/// Shape returned by a backend. Some backends answer a group query with one
/// aggregate object instead of a per-instance list.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceResponse {
    PerInstance(Vec<RawInstanceResult>),
    Single(RawInstanceResult),
}

#[async_trait]
pub trait QueryService: Send + Sync {
    async fn list_instances(&self) -> Result<Vec<Instance>, ServiceError>;

    async fn fetch_table_metadata(
        &self,
        instance: &InstanceRef,
    ) -> Result<TableMetadata, ServiceError>;

    async fn run_query(
        &self,
        query: &str,
        scope: &QueryScope,
    ) -> Result<ServiceResponse, ServiceError>;

    /// Releases pooled connections. Called once when the panel shuts down.
    async fn close(&self) {}
}

#[async_trait]
impl<S: QueryService + ?Sized> QueryService for Arc<S> {
    async fn list_instances(&self) -> Result<Vec<Instance>, ServiceError> {
        (**self).list_instances().await
    }

    async fn fetch_table_metadata(
        &self,
        instance: &InstanceRef,
    ) -> Result<TableMetadata, ServiceError> {
        (**self).fetch_table_metadata(instance).await
    }

    async fn run_query(
        &self,
        query: &str,
        scope: &QueryScope,
    ) -> Result<ServiceResponse, ServiceError> {
        (**self).run_query(query, scope).await
    }

    async fn close(&self) {
        (**self).close().await;
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("query text is empty")]
    EmptyQuery,
    #[error("single mode requires a selected instance")]
    NoInstanceSelected,
    #[error("query service failed: {0}")]
    Service(#[source] ServiceError),
}

impl DispatchError {
    /// True for failures of the call itself, as opposed to a rejected request.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Service(_))
    }
}

#[derive(Debug, Clone)]
pub struct QueryDispatcher<S> {
    service: S,
}

impl<S: QueryService> QueryDispatcher<S> {
    #[must_use]
    pub fn new(service: S) -> Self {
        Self { service }
    }

    #[must_use]
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Issues `query` against the selection and returns one result per
    /// dispatched instance.
    pub async fn dispatch(
        &self,
        query: &str,
        selection: &Selection,
    ) -> Result<Vec<RawInstanceResult>, DispatchError> {
        if query.trim().is_empty() {
            return Err(DispatchError::EmptyQuery);
        }

        let scope = scope_for(selection)?;
        debug!(?scope, "dispatching query");
        let response = self
            .service
            .run_query(query, &scope)
            .await
            .map_err(DispatchError::Service)?;

        Ok(normalize(response, &scope))
    }
}

fn scope_for(selection: &Selection) -> Result<QueryScope, DispatchError> {
    match selection.mode() {
        QueryMode::Single => selection
            .instance()
            .cloned()
            .map(QueryScope::Instance)
            .ok_or(DispatchError::NoInstanceSelected),
        QueryMode::Group => Ok(QueryScope::Group(selection.group_type().to_string())),
    }
}

fn normalize(response: ServiceResponse, scope: &QueryScope) -> Vec<RawInstanceResult> {
    match (scope, response) {
        (QueryScope::Instance(instance), ServiceResponse::Single(mut result)) => {
            result.instance_id = instance.id;
            vec![result]
        }
        (QueryScope::Instance(instance), ServiceResponse::PerInstance(results)) => {
            if results.len() > 1 {
                warn!(
                    count = results.len(),
                    "single-instance query returned several results, keeping the first"
                );
            }
            results
                .into_iter()
                .next()
                .map(|mut result| {
                    result.instance_id = instance.id;
                    result
                })
                .into_iter()
                .collect()
        }
        (QueryScope::Group(_), ServiceResponse::Single(result)) => vec![result],
        (QueryScope::Group(_), ServiceResponse::PerInstance(results)) => results,
    }
}
