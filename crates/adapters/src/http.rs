use async_trait::async_trait;
use mdb_core::derived_config::DEFAULT_DIALECT;
use mdb_core::dispatcher::{QueryScope, QueryService, ServiceError, ServiceResponse};
use mdb_core::instances::{Instance, InstanceId, InstanceRef, TableMetadata};
use mdb_core::query_result::{Column, QueryError, RawInstanceResult, Row};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Talks to a remote query server that owns the database connections.
#[derive(Debug, Clone)]
pub struct HttpQueryService {
    client: Client,
    base_url: String,
}

impl HttpQueryService {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let url = self.endpoint(path);
        debug!(%url, "sending request");
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .map_err(|error| ServiceError::new(format!("request to {url} failed: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::new(status_message(&url, status, &body)));
        }

        response.json::<T>().await.map_err(|error| {
            ServiceError::new(format!("unexpected response from {url}: {error}"))
        })
    }
}

#[async_trait]
impl QueryService for HttpQueryService {
    async fn list_instances(&self) -> Result<Vec<Instance>, ServiceError> {
        let instances: Option<Vec<WireInstance>> = self.get_json("databases", &[]).await?;
        Ok(instances
            .unwrap_or_default()
            .into_iter()
            .map(WireInstance::into_instance)
            .collect())
    }

    async fn fetch_table_metadata(
        &self,
        instance: &InstanceRef,
    ) -> Result<TableMetadata, ServiceError> {
        let metadata: Option<TableMetadata> = self
            .get_json(
                "tables-metadata",
                &[
                    ("groupId", instance.id.to_string()),
                    ("groupType", instance.group_type.clone()),
                ],
            )
            .await?;
        Ok(metadata.unwrap_or_default())
    }

    async fn run_query(
        &self,
        query: &str,
        scope: &QueryScope,
    ) -> Result<ServiceResponse, ServiceError> {
        let mut params = Vec::with_capacity(3);
        match scope {
            QueryScope::Instance(instance) => {
                params.push(("groupId", instance.id.to_string()));
                params.push(("groupType", instance.group_type.clone()));
            }
            QueryScope::Group(group_type) => params.push(("groupType", group_type.clone())),
        }
        params.push(("query", query.to_string()));

        let response: WireQueryResponse = self.get_json("query", &params).await?;
        Ok(response.into_service_response())
    }
}

fn status_message(url: &str, status: StatusCode, body: &str) -> String {
    let reason = serde_json::from_str::<WireErrorBody>(body)
        .map(|wire| wire.error)
        .unwrap_or_else(|_| body.trim().to_string());
    if reason.is_empty() {
        format!("{url} answered {status}")
    } else {
        format!("{url} answered {status}: {reason}")
    }
}

#[derive(Debug, Deserialize)]
struct WireErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireInstance {
    group_id: InstanceId,
    group_type: String,
    #[serde(default)]
    title: String,
    #[serde(default, rename = "type")]
    dialect: Option<String>,
}

impl WireInstance {
    fn into_instance(self) -> Instance {
        let dialect = self
            .dialect
            .filter(|dialect| !dialect.is_empty())
            .unwrap_or_else(|| DEFAULT_DIALECT.to_string());
        Instance::new(self.group_id, self.group_type, self.title, dialect)
    }
}

#[derive(Debug, Default, Deserialize)]
struct WireQueryData {
    #[serde(default)]
    columns: Option<Vec<Column>>,
    #[serde(default)]
    rows: Option<Vec<Row>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireQueryResult {
    #[serde(default)]
    group_id: Option<InstanceId>,
    #[serde(default)]
    data: Option<WireQueryData>,
    #[serde(default)]
    error: Option<QueryError>,
}

impl WireQueryResult {
    fn into_raw(self) -> RawInstanceResult {
        let data = self.data.unwrap_or_default();
        RawInstanceResult {
            instance_id: self.group_id.unwrap_or_default(),
            columns: data.columns,
            rows: data.rows,
            error: self.error,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireQueryResponse {
    Many(Vec<WireQueryResult>),
    One(WireQueryResult),
}

impl WireQueryResponse {
    fn into_service_response(self) -> ServiceResponse {
        match self {
            Self::Many(results) => ServiceResponse::PerInstance(
                results.into_iter().map(WireQueryResult::into_raw).collect(),
            ),
            Self::One(result) => ServiceResponse::Single(result.into_raw()),
        }
    }
}
