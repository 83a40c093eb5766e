//! Merges the per-instance answers of one dispatch into a single table.
//!
//! Group mode prepends a synthetic `groupId` column, reconciles divergent
//! column sets into their ordered union and reports instances that lack part
//! of that union. Per-instance failures never abort the merge; they only add
//! to the returned error list.

use std::collections::HashSet;

use serde_json::Value;
use tracing::debug;

use crate::instances::InstanceId;
use crate::query_result::{
    AggregatedTable, Column, ErrorRecord, RawInstanceResult, Row, GROUP_ID_FIELD,
};
use crate::selection::QueryMode;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Aggregation {
    pub table: AggregatedTable,
    /// Sorted ascending by `group_id`.
    pub errors: Vec<ErrorRecord>,
}

#[derive(Debug)]
struct StagedInstance {
    instance_id: InstanceId,
    columns: Vec<Column>,
    rows: Vec<Row>,
}

#[must_use]
pub fn aggregate(mode: QueryMode, results: &[RawInstanceResult]) -> Aggregation {
    match mode {
        QueryMode::Single => aggregate_single(results.first()),
        QueryMode::Group => aggregate_group(results),
    }
}

fn aggregate_single(result: Option<&RawInstanceResult>) -> Aggregation {
    let Some(result) = result else {
        return Aggregation::default();
    };

    if let Some(error) = &result.error {
        return Aggregation {
            table: AggregatedTable::default(),
            errors: vec![ErrorRecord::from_query_error(result.instance_id, error)],
        };
    }

    match (&result.columns, &result.rows) {
        (Some(columns), Some(rows)) => Aggregation {
            table: AggregatedTable {
                columns: columns.clone(),
                rows: rows.clone(),
            },
            errors: Vec::new(),
        },
        _ => Aggregation::default(),
    }
}

fn aggregate_group(results: &[RawInstanceResult]) -> Aggregation {
    let mut errors = Vec::new();
    let mut staged = Vec::with_capacity(results.len());

    for result in results {
        if let Some(error) = &result.error {
            errors.push(ErrorRecord::from_query_error(result.instance_id, error));
            continue;
        }
        let (Some(columns), Some(rows)) = (&result.columns, &result.rows) else {
            debug!(
                instance_id = result.instance_id,
                "skipping result without columns or rows"
            );
            continue;
        };
        staged.push(stage(result.instance_id, columns, rows));
    }

    let columns = union_columns(&staged);
    for instance in &staged {
        let present = instance
            .columns
            .iter()
            .map(|column| column.field_name.as_str())
            .collect::<HashSet<_>>();
        let missing = columns
            .iter()
            .filter(|column| !present.contains(column.field_name.as_str()))
            .cloned()
            .collect::<Vec<_>>();
        if !missing.is_empty() {
            errors.push(ErrorRecord::missing_columns(instance.instance_id, missing));
        }
    }

    let mut rows = Vec::with_capacity(staged.iter().map(|instance| instance.rows.len()).sum());
    for instance in staged {
        for mut row in instance.rows {
            for column in &columns {
                row.entry(column.field_name.clone()).or_insert(Value::Null);
            }
            rows.push(row);
        }
    }

    errors.sort_by_key(|error| error.group_id);
    Aggregation {
        table: AggregatedTable { columns, rows },
        errors,
    }
}

fn stage(instance_id: InstanceId, columns: &[Column], rows: &[Row]) -> StagedInstance {
    let mut staged_columns = Vec::with_capacity(columns.len() + 1);
    staged_columns.push(Column::group_id());
    staged_columns.extend(
        columns
            .iter()
            .filter(|column| column.field_name != GROUP_ID_FIELD)
            .cloned(),
    );

    let staged_rows = rows
        .iter()
        .map(|row| {
            let mut row = row.clone();
            row.insert(GROUP_ID_FIELD.to_string(), Value::from(instance_id));
            row
        })
        .collect();

    StagedInstance {
        instance_id,
        columns: staged_columns,
        rows: staged_rows,
    }
}

fn union_columns(staged: &[StagedInstance]) -> Vec<Column> {
    if staged.is_empty() {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut columns = Vec::new();
    for column in staged.iter().flat_map(|instance| instance.columns.iter()) {
        if seen.insert(column.field_name.as_str()) {
            columns.push(column.clone());
        }
    }
    columns
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{aggregate, Aggregation};
    use crate::query_result::{
        Column, ErrorDetail, ErrorRecord, QueryError, RawInstanceResult, Row,
    };
    use crate::selection::QueryMode;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn field_names(aggregation: &Aggregation) -> Vec<&str> {
        aggregation
            .table
            .columns
            .iter()
            .map(|column| column.field_name.as_str())
            .collect()
    }

    #[test]
    fn single_mode_passes_result_through_verbatim() {
        let results = vec![RawInstanceResult::data(
            1,
            vec![Column::named("n")],
            vec![row(json!({"n": 1}))],
        )];

        let aggregation = aggregate(QueryMode::Single, &results);

        assert_eq!(field_names(&aggregation), vec!["n"]);
        assert_eq!(aggregation.table.rows, vec![row(json!({"n": 1}))]);
        assert!(aggregation.errors.is_empty());
    }

    #[test]
    fn single_mode_error_leaves_table_empty() {
        let error = QueryError::new("syntax error").with_detail(json!({"position": 8}));
        let results = vec![RawInstanceResult {
            instance_id: 3,
            columns: Some(vec![Column::named("n")]),
            rows: Some(vec![row(json!({"n": 1}))]),
            error: Some(error),
        }];

        let aggregation = aggregate(QueryMode::Single, &results);

        assert!(aggregation.table.is_empty());
        assert_eq!(
            aggregation.errors,
            vec![ErrorRecord {
                group_id: 3,
                message: "syntax error".to_string(),
                detail: Some(ErrorDetail::Backend(json!({"position": 8}))),
            }]
        );
    }

    #[test]
    fn group_mode_reconciles_divergent_schema() {
        let results = vec![
            RawInstanceResult::data(
                1,
                vec![Column::named("a"), Column::named("b")],
                vec![row(json!({"a": 1, "b": 2}))],
            ),
            RawInstanceResult::data(2, vec![Column::named("a")], vec![row(json!({"a": 3}))]),
        ];

        let aggregation = aggregate(QueryMode::Group, &results);

        assert_eq!(field_names(&aggregation), vec!["groupId", "a", "b"]);
        assert_eq!(
            aggregation.table.rows,
            vec![
                row(json!({"groupId": 1, "a": 1, "b": 2})),
                row(json!({"groupId": 2, "a": 3, "b": null})),
            ]
        );
        assert_eq!(
            aggregation.errors,
            vec![ErrorRecord::missing_columns(2, vec![Column::named("b")])]
        );
    }

    #[test]
    fn group_mode_collects_instance_errors_and_keeps_others() {
        let results = vec![
            RawInstanceResult::failed(1, QueryError::new("timeout")),
            RawInstanceResult::data(2, vec![Column::named("a")], vec![row(json!({"a": 5}))]),
        ];

        let aggregation = aggregate(QueryMode::Group, &results);

        assert_eq!(field_names(&aggregation), vec!["groupId", "a"]);
        assert_eq!(
            aggregation.table.rows,
            vec![row(json!({"groupId": 2, "a": 5}))]
        );
        assert_eq!(aggregation.errors.len(), 1);
        assert_eq!(aggregation.errors[0].group_id, 1);
        assert_eq!(aggregation.errors[0].message, "timeout");
        assert_eq!(aggregation.errors[0].detail, None);
    }

    #[test]
    fn malformed_results_are_dropped_silently() {
        let results = vec![
            RawInstanceResult {
                instance_id: 1,
                columns: Some(vec![Column::named("a")]),
                rows: None,
                error: None,
            },
            RawInstanceResult {
                instance_id: 2,
                ..RawInstanceResult::default()
            },
        ];

        let aggregation = aggregate(QueryMode::Group, &results);

        assert!(aggregation.table.is_empty());
        assert!(aggregation.errors.is_empty());
    }

    #[test]
    fn union_keeps_first_seen_order_and_group_id_first() {
        let results = vec![
            RawInstanceResult::data(
                4,
                vec![Column::named("c"), Column::named("a")],
                vec![row(json!({"c": 1, "a": 2}))],
            ),
            RawInstanceResult::data(
                2,
                vec![Column::named("b"), Column::named("a"), Column::named("d")],
                vec![row(json!({"b": 1, "a": 2, "d": 3}))],
            ),
        ];

        let aggregation = aggregate(QueryMode::Group, &results);

        assert_eq!(
            field_names(&aggregation),
            vec!["groupId", "c", "a", "b", "d"]
        );
        let missing = aggregation
            .errors
            .iter()
            .map(|error| (error.group_id, error.detail.clone()))
            .collect::<Vec<_>>();
        assert_eq!(
            missing,
            vec![
                (
                    2,
                    Some(ErrorDetail::MissingColumns(vec![Column::named("c")]))
                ),
                (
                    4,
                    Some(ErrorDetail::MissingColumns(vec![
                        Column::named("b"),
                        Column::named("d")
                    ]))
                ),
            ]
        );
    }

    #[test]
    fn errors_are_sorted_by_group_id() {
        let results = vec![
            RawInstanceResult::failed(9, QueryError::new("down")),
            RawInstanceResult::data(5, vec![Column::named("a")], Vec::new()),
            RawInstanceResult::failed(1, QueryError::new("down")),
            RawInstanceResult::data(
                3,
                vec![Column::named("a"), Column::named("b")],
                Vec::new(),
            ),
        ];

        let aggregation = aggregate(QueryMode::Group, &results);
        let ids = aggregation
            .errors
            .iter()
            .map(|error| error.group_id)
            .collect::<Vec<_>>();

        assert_eq!(ids, vec![1, 5, 9]);
    }

    #[test]
    fn instance_group_id_column_is_shadowed_by_stamp() {
        let results = vec![RawInstanceResult::data(
            7,
            vec![Column::named("groupId"), Column::named("a")],
            vec![row(json!({"groupId": "local", "a": 1}))],
        )];

        let aggregation = aggregate(QueryMode::Group, &results);

        assert_eq!(field_names(&aggregation), vec!["groupId", "a"]);
        assert_eq!(
            aggregation.table.rows,
            vec![row(json!({"groupId": 7, "a": 1}))]
        );
    }

    #[test]
    fn aggregation_is_idempotent() {
        let results = vec![
            RawInstanceResult::failed(2, QueryError::new("timeout")),
            RawInstanceResult::data(1, vec![Column::named("a")], vec![row(json!({"a": 1}))]),
            RawInstanceResult::data(3, vec![Column::named("b")], vec![row(json!({"b": 1}))]),
        ];

        let first = aggregate(QueryMode::Group, &results);
        let second = aggregate(QueryMode::Group, &results);

        assert_eq!(first, second);
    }

    #[test]
    fn zero_staged_instances_yield_empty_table_with_errors() {
        let results = vec![RawInstanceResult::failed(1, QueryError::new("down"))];

        let aggregation = aggregate(QueryMode::Group, &results);

        assert!(aggregation.table.is_empty());
        assert_eq!(aggregation.errors.len(), 1);
        assert!(aggregate(QueryMode::Group, &[]).table.is_empty());
    }
}
