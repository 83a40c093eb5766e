use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::instances::InstanceId;

/// Field name of the synthetic column stamped on every row in group mode.
pub const GROUP_ID_FIELD: &str = "groupId";

pub type Row = serde_json::Map<String, Value>;

/// A result column. `name` is what the database reported, `field_name` is the
/// key used in each row and is unique within one result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub field_name: String,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_name: field_name.into(),
        }
    }

    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            field_name: name.clone(),
            name,
        }
    }

    #[must_use]
    pub fn group_id() -> Self {
        Self::named(GROUP_ID_FIELD)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryError {
    pub message: String,
    #[serde(default, rename = "err", skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl QueryError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            detail: None,
        }
    }

    #[must_use]
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// What one instance answered to one dispatch. The well-formed shapes are
/// `columns` + `rows` or `error`, but any combination may arrive.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawInstanceResult {
    pub instance_id: InstanceId,
    pub columns: Option<Vec<Column>>,
    pub rows: Option<Vec<Row>>,
    pub error: Option<QueryError>,
}

impl RawInstanceResult {
    #[must_use]
    pub fn data(instance_id: InstanceId, columns: Vec<Column>, rows: Vec<Row>) -> Self {
        Self {
            instance_id,
            columns: Some(columns),
            rows: Some(rows),
            error: None,
        }
    }

    #[must_use]
    pub fn failed(instance_id: InstanceId, error: QueryError) -> Self {
        Self {
            instance_id,
            columns: None,
            rows: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ErrorDetail {
    Backend(Value),
    MissingColumns(Vec<Column>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub group_id: InstanceId,
    pub message: String,
    pub detail: Option<ErrorDetail>,
}

impl ErrorRecord {
    #[must_use]
    pub fn from_query_error(group_id: InstanceId, error: &QueryError) -> Self {
        Self {
            group_id,
            message: error.message.clone(),
            detail: error.detail.clone().map(ErrorDetail::Backend),
        }
    }

    #[must_use]
    pub fn missing_columns(group_id: InstanceId, columns: Vec<Column>) -> Self {
        Self {
            group_id,
            message: "missing columns".to_string(),
            detail: Some(ErrorDetail::MissingColumns(columns)),
        }
    }

    /// Pretty JSON of the detail payload, for drill-down views.
    #[must_use]
    pub fn detail_text(&self) -> Option<String> {
        self.detail
            .as_ref()
            .and_then(|detail| serde_json::to_string_pretty(detail).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct AggregatedTable {
    pub columns: Vec<Column>,
    pub rows: Vec<Row>,
}

impl AggregatedTable {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty() && self.rows.is_empty()
    }

    #[must_use]
    pub fn has_group_id(&self) -> bool {
        self.columns
            .first()
            .is_some_and(|column| column.field_name == GROUP_ID_FIELD)
    }

    /// Cell values of one row in column order; absent fields read as `null`.
    #[must_use]
    pub fn row_values(&self, index: usize) -> Option<Vec<&Value>> {
        let row = self.rows.get(index)?;
        Some(
            self.columns
                .iter()
                .map(|column| row.get(&column.field_name).unwrap_or(&Value::Null))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AggregatedTable, Column, ErrorRecord, QueryError, Row};

    #[test]
    fn query_error_reads_wire_detail_from_err_field() {
        let error: QueryError =
            serde_json::from_value(json!({"message": "boom", "err": {"code": 1045}}))
                .expect("query error should parse");

        assert_eq!(error.message, "boom");
        assert_eq!(error.detail, Some(json!({"code": 1045})));

        let record = ErrorRecord::from_query_error(7, &error);
        assert_eq!(record.group_id, 7);
        assert!(record
            .detail_text()
            .expect("detail should render")
            .contains("1045"));
    }

    #[test]
    fn row_values_fill_absent_fields_with_null() {
        let mut row = Row::new();
        row.insert("a".to_string(), json!(1));
        let table = AggregatedTable {
            columns: vec![Column::named("a"), Column::named("b")],
            rows: vec![row],
        };

        let values = table.row_values(0).expect("row should exist");
        assert_eq!(values, vec![&json!(1), &json!(null)]);
        assert!(table.row_values(1).is_none());
    }

    #[test]
    fn group_id_is_detected_only_in_first_position() {
        let group = AggregatedTable {
            columns: vec![Column::group_id(), Column::named("a")],
            rows: Vec::new(),
        };
        assert!(group.has_group_id());

        let trailing = AggregatedTable {
            columns: vec![Column::named("a"), Column::group_id()],
            rows: Vec::new(),
        };
        assert!(!trailing.has_group_id());
        assert!(!AggregatedTable::default().has_group_id());
    }

    #[test]
    fn missing_columns_detail_serializes_as_column_list() {
        let record = ErrorRecord::missing_columns(2, vec![Column::named("b")]);
        let rendered = serde_json::to_value(&record).expect("record should serialize");

        assert_eq!(
            rendered,
            json!({
                "groupId": 2,
                "message": "missing columns",
                "detail": [{"name": "b", "fieldName": "b"}]
            })
        );
    }
}
