//! Change records reconstructed from a row's history.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::Display;

use super::statements::{HistoryLayout, BEGIN_COLUMN, END_COLUMN, USER_COLUMN};
use crate::types::{ResultSet, Value};

/// What happened to a row in one history interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A value before and after an update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub original: Value,
    pub current: Value,
}

/// One history row, classified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    pub history_id: i64,
    pub begin: Value,
    pub end: Value,
    pub operate_user: Option<String>,
    /// The whole history row keyed by column.
    pub data: BTreeMap<String, Value>,
    /// Versioned columns that differ from the previous row. Empty unless `kind` is update.
    pub changes: BTreeMap<String, FieldChange>,
}

/// Versioned columns whose value differs between two history rows.
pub fn compare_difference(
    previous: &BTreeMap<String, Value>,
    current: &BTreeMap<String, Value>,
    columns: &[String],
) -> BTreeMap<String, FieldChange> {
    columns
        .iter()
        .filter_map(|column| {
            let before = previous.get(column).cloned().unwrap_or(Value::Null);
            let after = current.get(column).cloned().unwrap_or(Value::Null);
            (before != after).then(|| {
                (
                    column.clone(),
                    FieldChange {
                        original: before,
                        current: after,
                    },
                )
            })
        })
        .collect()
}

/// Classify history rows ordered oldest first.
///
/// The first row is the insert, a zero-length interval is a delete marker,
/// anything else is an update diffed against the row before it.
pub fn classify_history(rows: &ResultSet, layout: &HistoryLayout) -> Vec<ChangeRecord> {
    let mut out: Vec<ChangeRecord> = Vec::with_capacity(rows.len());
    for index in 0..rows.len() {
        let data = rows.row_map(index).unwrap_or_default();
        let get = |column: &str| rows.get(index, column).cloned().unwrap_or(Value::Null);
        let begin = get(BEGIN_COLUMN);
        let end = get(END_COLUMN);

        let (kind, changes) = match out.last() {
            None => (ChangeKind::Insert, BTreeMap::new()),
            Some(_) if begin == end => (ChangeKind::Delete, BTreeMap::new()),
            Some(previous) => (
                ChangeKind::Update,
                compare_difference(&previous.data, &data, &layout.tracked_columns),
            ),
        };
        out.push(ChangeRecord {
            kind,
            history_id: get(layout.pk.as_str()).as_i64().unwrap_or_default(),
            operate_user: get(USER_COLUMN).as_str().map(str::to_string),
            begin,
            end,
            data,
            changes,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HistoryConfig;

    fn layout() -> HistoryLayout {
        let columns = vec!["id".to_string(), "status".to_string()];
        HistoryLayout::new("orders", &columns, &HistoryConfig::default()).unwrap()
    }

    fn history(rows: &[(i64, &str, &str, &str)]) -> ResultSet {
        ResultSet::new(
            ["id", "status", "record_begin_time", "record_end_time", "record_operate_user", "base_id"]
                .iter()
                .map(|c| c.to_string())
                .collect(),
            rows.iter()
                .map(|(id, status, begin, end)| {
                    vec![
                        Value::Integer(*id),
                        Value::from(*status),
                        Value::from(*begin),
                        Value::from(*end),
                        Value::from("alice"),
                        Value::Integer(1),
                    ]
                })
                .collect(),
        )
    }

    #[test]
    fn test_classification_and_diff() {
        let rows = history(&[
            (1, "new", "t1", "t2"),
            (2, "paid", "t2", "t3"),
            (3, "paid", "t3", "t3"),
        ]);
        let records = classify_history(&rows, &layout());
        let kinds: Vec<_> = records.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]);

        let diff = &records[1].changes;
        assert_eq!(diff.len(), 1);
        assert_eq!(diff["status"].original, Value::from("new"));
        assert_eq!(diff["status"].current, Value::from("paid"));
        assert_eq!(records[2].history_id, 3);
        assert_eq!(records[0].operate_user.as_deref(), Some("alice"));
    }

    #[test]
    fn test_diff_ignores_bookkeeping_columns() {
        let rows = history(&[(1, "new", "t1", "t2"), (2, "new", "t2", "t9")]);
        let records = classify_history(&rows, &layout());
        assert_eq!(records[1].kind, ChangeKind::Update);
        assert!(records[1].changes.is_empty());
    }

    #[test]
    fn test_change_kind_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ChangeKind::Delete).unwrap(), "\"delete\"");
        assert_eq!(ChangeKind::Update.to_string(), "update");
    }
}
