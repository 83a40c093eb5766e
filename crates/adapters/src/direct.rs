use std::collections::HashSet;

use async_trait::async_trait;
use futures_util::future::join_all;
use mdb_core::config::InstanceConfig;
use mdb_core::dispatcher::{QueryScope, QueryService, ServiceError, ServiceResponse};
use mdb_core::instances::{registry_order, Instance, InstanceRef, TableMetadata};
use mdb_core::query_result::{Column, QueryError, RawInstanceResult, Row};
use tracing::{debug, warn};

use crate::{mysql, postgres};

pub(crate) type QueryOutput = (Vec<Column>, Vec<Row>);

#[derive(Debug)]
enum Connection {
    Mysql(mysql_async::Pool),
    Postgres(sqlx::PgPool),
}

impl Connection {
    fn open(config: &InstanceConfig) -> Option<Self> {
        match config.dialect.as_str() {
            mysql::DIALECT => Some(Self::Mysql(mysql::pool(config))),
            postgres::DIALECT => Some(Self::Postgres(postgres::pool(config))),
            _ => None,
        }
    }

    async fn table_metadata(&self) -> Result<TableMetadata, ServiceError> {
        match self {
            Self::Mysql(pool) => mysql::table_metadata(pool).await,
            Self::Postgres(pool) => postgres::table_metadata(pool).await,
        }
    }

    async fn run_query(&self, query: &str) -> Result<QueryOutput, QueryError> {
        match self {
            Self::Mysql(pool) => mysql::run_query(pool, query).await,
            Self::Postgres(pool) => postgres::run_query(pool, query).await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Mysql(pool) => mysql::disconnect(pool.clone()).await,
            Self::Postgres(pool) => pool.close().await,
        }
    }
}

#[derive(Debug)]
struct DirectTarget {
    instance: Instance,
    connection: Connection,
}

/// Runs queries directly against every configured instance, one pool per
/// instance. MySQL and PostgreSQL instances are supported.
#[derive(Debug, Default)]
pub struct DirectQueryService {
    targets: Vec<DirectTarget>,
}

impl DirectQueryService {
    #[must_use]
    pub fn from_config(instances: &[InstanceConfig]) -> Self {
        let mut targets = instances
            .iter()
            .filter_map(|config| {
                let Some(connection) = Connection::open(config) else {
                    warn!(
                        id = config.id,
                        group_type = %config.group_type,
                        dialect = %config.dialect,
                        "skipping instance with unsupported dialect"
                    );
                    return None;
                };
                Some(DirectTarget {
                    instance: config.instance(),
                    connection,
                })
            })
            .collect::<Vec<_>>();
        targets.sort_by(|left, right| registry_order(&left.instance, &right.instance));
        Self { targets }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    fn target(&self, instance: &InstanceRef) -> Option<&DirectTarget> {
        self.targets
            .iter()
            .find(|target| target.instance.is(instance))
    }
}

#[async_trait]
impl QueryService for DirectQueryService {
    async fn list_instances(&self) -> Result<Vec<Instance>, ServiceError> {
        Ok(self
            .targets
            .iter()
            .map(|target| target.instance.clone())
            .collect())
    }

    async fn fetch_table_metadata(
        &self,
        instance: &InstanceRef,
    ) -> Result<TableMetadata, ServiceError> {
        let target = self
            .target(instance)
            .ok_or_else(|| ServiceError::new(unregistered_message(instance)))?;
        target.connection.table_metadata().await
    }

    async fn run_query(
        &self,
        query: &str,
        scope: &QueryScope,
    ) -> Result<ServiceResponse, ServiceError> {
        match scope {
            QueryScope::Instance(instance) => {
                let result = match self.target(instance) {
                    Some(target) => run_on(target, query).await,
                    None => RawInstanceResult::failed(
                        instance.id,
                        QueryError::new(unregistered_message(instance)),
                    ),
                };
                Ok(ServiceResponse::Single(result))
            }
            QueryScope::Group(group_type) => {
                let runs = self
                    .targets
                    .iter()
                    .filter(|target| &target.instance.group_type == group_type)
                    .map(|target| run_on(target, query));
                Ok(ServiceResponse::PerInstance(join_all(runs).await))
            }
        }
    }

    async fn close(&self) {
        join_all(
            self.targets
                .iter()
                .map(|target| target.connection.close()),
        )
        .await;
        debug!(pools = self.targets.len(), "instance pools closed");
    }
}

async fn run_on(target: &DirectTarget, query: &str) -> RawInstanceResult {
    let instance_id = target.instance.id;
    match target.connection.run_query(query).await {
        Ok((columns, rows)) => {
            debug!(instance_id, rows = rows.len(), "instance query finished");
            RawInstanceResult::data(instance_id, columns, rows)
        }
        Err(error) => {
            warn!(instance_id, error = %error.message, "instance query failed");
            RawInstanceResult::failed(instance_id, error)
        }
    }
}

/// Gives every column a unique row key. A repeated name takes the first free
/// `__{n}` suffix, counting from 1.
pub(crate) fn columns_with_field_names(names: Vec<String>) -> Vec<Column> {
    let mut used = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            let mut field_name = name.clone();
            let mut suffix = 0;
            while used.contains(&field_name) {
                suffix += 1;
                field_name = format!("{name}__{suffix}");
            }
            used.insert(field_name.clone());
            Column::new(name, field_name)
        })
        .collect()
}

pub(crate) fn metadata_from_pairs(pairs: Vec<(String, String)>) -> TableMetadata {
    let mut metadata = TableMetadata::new();
    for (table, column) in pairs {
        metadata.entry(table).or_default().push(column);
    }
    metadata
}

pub(crate) fn float_to_json(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn unregistered_message(instance: &InstanceRef) -> String {
    format!(
        "no database registered with groupId={}, groupType={}",
        instance.id, instance.group_type
    )
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mdb_core::config::{ConnectionSettings, InstanceConfig};
    use mdb_core::dispatcher::{QueryScope, QueryService, ServiceResponse};
    use mdb_core::instances::InstanceRef;

    use super::{columns_with_field_names, metadata_from_pairs, DirectQueryService};

    fn instance_config(id: i64, group_type: &str, dialect: &str) -> InstanceConfig {
        InstanceConfig {
            id,
            group_type: group_type.to_string(),
            title: format!("{group_type} {id}"),
            dialect: dialect.to_string(),
            connection: ConnectionSettings::new("127.0.0.1", "root"),
        }
    }

    fn field_names(names: &[&str]) -> Vec<String> {
        columns_with_field_names(names.iter().map(|name| (*name).to_string()).collect())
            .into_iter()
            .map(|column| column.field_name)
            .collect()
    }

    #[test]
    fn duplicate_column_names_get_numbered_field_names() {
        let columns = columns_with_field_names(vec![
            "id".to_string(),
            "name".to_string(),
            "id".to_string(),
        ]);

        let names = columns
            .iter()
            .map(|column| column.field_name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["id", "name", "id__1"]);
        assert_eq!(columns[2].name, "id");

        assert_eq!(
            field_names(&["id", "name", "type_id", "id", "name", "id", "name"]),
            vec!["id", "name", "type_id", "id__1", "name__1", "id__2", "name__2"]
        );
    }

    #[test]
    fn renamed_field_skips_names_the_query_already_returned() {
        assert_eq!(field_names(&["a", "a__1", "a"]), vec!["a", "a__1", "a__2"]);
        assert_eq!(field_names(&["a", "a__2", "a"]), vec!["a", "a__2", "a__1"]);
        assert_eq!(field_names(&["a", "a", "a__1"]), vec!["a", "a__1", "a__1__1"]);
    }

    #[test]
    fn metadata_pairs_group_by_table_in_order() {
        let metadata = metadata_from_pairs(vec![
            ("orders".to_string(), "id".to_string()),
            ("orders".to_string(), "total".to_string()),
            ("users".to_string(), "id".to_string()),
        ]);

        assert_eq!(
            metadata.get("orders"),
            Some(&vec!["id".to_string(), "total".to_string()])
        );
        assert_eq!(metadata.get("users"), Some(&vec!["id".to_string()]));
    }

    #[tokio::test]
    async fn serves_mysql_and_postgres_instances() {
        let service = DirectQueryService::from_config(&[
            instance_config(1, "orders", "mysql"),
            instance_config(2, "orders", "postgresql"),
            instance_config(3, "orders", "firebird"),
        ]);

        let instances = service
            .list_instances()
            .await
            .expect("listing should succeed");

        assert_eq!(service.len(), 2);
        let dialects = instances
            .iter()
            .map(|instance| (instance.id, instance.dialect.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(dialects, vec![(1, "mysql"), (2, "postgresql")]);
        assert!(instances[0].table_metadata.is_none());
    }

    #[tokio::test]
    async fn instances_follow_registry_order() {
        let service = DirectQueryService::from_config(&[
            instance_config(2, "orders", "mysql"),
            instance_config(1, "users", "postgresql"),
            instance_config(1, "orders", "mysql"),
        ]);

        let order = service
            .list_instances()
            .await
            .expect("listing should succeed")
            .into_iter()
            .map(|instance| (instance.id, instance.group_type))
            .collect::<Vec<_>>();

        assert_eq!(
            order,
            vec![
                (1, "orders".to_string()),
                (1, "users".to_string()),
                (2, "orders".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn unknown_instance_is_a_per_instance_error() {
        let service = DirectQueryService::default();
        let instance = InstanceRef {
            id: 4,
            group_type: "orders".to_string(),
            title: "orders 4".to_string(),
        };

        let response = service
            .run_query("select 1", &QueryScope::Instance(instance.clone()))
            .await
            .expect("unknown instance should not be a transport failure");
        let ServiceResponse::Single(result) = response else {
            panic!("single scope should answer with one result");
        };
        assert_eq!(result.instance_id, 4);
        assert!(result
            .error
            .expect("error expected")
            .message
            .contains("groupId=4"));

        assert!(service.fetch_table_metadata(&instance).await.is_err());

        let group = service
            .run_query("select 1", &QueryScope::Group("orders".to_string()))
            .await
            .expect("empty group should answer");
        assert_eq!(group, ServiceResponse::PerInstance(Vec::new()));
    }

    #[tokio::test]
    async fn close_releases_idle_pools_promptly() {
        let service = DirectQueryService::from_config(&[
            instance_config(1, "orders", "mysql"),
            instance_config(2, "orders", "postgresql"),
        ]);

        let closed = tokio::time::timeout(Duration::from_secs(5), service.close()).await;
        assert!(closed.is_ok());
    }
}
