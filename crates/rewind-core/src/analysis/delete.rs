//! Targets and row predicate of DELETE statements.
//!
//! Three forms are recognized:
//! - `DELETE FROM t [AS a] [WHERE ...]`
//! - `DELETE FROM t1, t2 USING <refs> [WHERE ...]`
//! - `DELETE t1, t2 FROM <refs> [WHERE ...]`

use serde::{Deserialize, Serialize};

use super::table_refs::{alias_map, collect_table_refs, AliasMap, TableRef};
use crate::error::{ErrorCode, HistoryError, HistoryResult};
use crate::sql::keywords::DELETE_OPTIONS;
use crate::sql::node::{Head, Node};
use crate::sql::{bind_nodes, Statement};
use crate::types::{Params, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteForm {
    SingleTable,
    Using,
    ListBeforeFrom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteInfo {
    pub form: DeleteForm,
    /// Alias keys of the tables rows are deleted from.
    pub targets: Vec<String>,
    pub aliases: AliasMap,
    /// ` FROM <refs> [WHERE ...]` with `?` markers.
    pub predicate: String,
    /// Values for the markers in `predicate`.
    pub params: Vec<Value>,
}

impl DeleteInfo {
    /// Distinct real tables rows are deleted from.
    pub fn tables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for key in &self.targets {
            if let Some(table) = self.aliases.get(key) {
                if !out.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                    out.push(table.to_string());
                }
            }
        }
        out
    }
}

fn position_of(nodes: &[Node], from: usize, keyword: &str) -> Option<usize> {
    (from..nodes.len()).find(|&i| nodes[i].is_keyword(keyword))
}

/// Names in a delete target list. `t.*` names `t`.
fn target_names(nodes: &[Node]) -> Vec<String> {
    nodes
        .iter()
        .filter_map(|n| match n.as_identifier().map(|i| &i.head) {
            Some(Head::Name(name)) if name.is_wildcard() => name.qualifier(),
            Some(Head::Name(name)) => Some(name.name()),
            _ => None,
        })
        .collect()
}

/// End of the reference list: the WHERE clause or a trailing clause keyword.
fn refs_end(nodes: &[Node], from: usize) -> usize {
    (from..nodes.len())
        .find(|&i| {
            matches!(nodes[i], Node::Where(_))
                || nodes[i]
                    .keyword()
                    .map(crate::sql::keywords::is_clause_terminator)
                    .unwrap_or(false)
        })
        .unwrap_or(nodes.len())
}

pub fn analyze_delete(stmt: &Statement, params: &Params) -> HistoryResult<DeleteInfo> {
    let nodes = stmt.nodes();
    let start = position_of(nodes, 0, "DELETE")
        .ok_or_else(|| HistoryError::analysis("statement is not a DELETE"))?;
    let mut cursor = start + 1;
    while cursor < nodes.len()
        && (nodes[cursor].is_whitespace()
            || nodes[cursor]
                .keyword()
                .map(|k| DELETE_OPTIONS.contains(&k))
                .unwrap_or(false))
    {
        cursor += 1;
    }
    let from = position_of(nodes, cursor, "FROM")
        .ok_or_else(|| HistoryError::analysis("DELETE without FROM"))?;

    let (form, targets, refs, predicate_start) = if from > cursor {
        let targets = target_names(&nodes[cursor..from]);
        let end = refs_end(nodes, from + 1);
        let refs = collect_table_refs(&nodes[from + 1..end]);
        (DeleteForm::ListBeforeFrom, targets, refs, from + 1)
    } else if let Some(using) = position_of(nodes, from + 1, "USING") {
        let targets = target_names(&nodes[from + 1..using]);
        let end = refs_end(nodes, using + 1);
        let refs = collect_table_refs(&nodes[using + 1..end]);
        (DeleteForm::Using, targets, refs, using + 1)
    } else {
        let end = refs_end(nodes, from + 1);
        let refs = collect_table_refs(&nodes[from + 1..end]);
        let targets: Vec<String> = refs.first().map(|r| r.key().to_string()).into_iter().collect();
        (DeleteForm::SingleTable, targets, refs, from + 1)
    };

    if targets.is_empty() || refs.is_empty() {
        return Err(HistoryError::analysis_with_code(
            "DELETE has no table to delete from",
            ErrorCode::AnaTableNotFound,
        ));
    }
    let aliases = alias_map(&refs);
    for key in &targets {
        if !aliases.contains(key) {
            return Err(HistoryError::analysis_with_code(
                format!("delete target '{}' is not bound in the FROM clause", key),
                ErrorCode::AnaAliasUnbound,
            ));
        }
    }

    let bound = bind_nodes(&nodes[predicate_start..], params)?;
    Ok(DeleteInfo {
        form,
        targets: dedup_keys(targets, &refs),
        aliases,
        predicate: format!(" FROM {}", bound.sql.trim()),
        params: bound.values,
    })
}

/// Normalize targets to the key spelling used in the references.
fn dedup_keys(targets: Vec<String>, refs: &[TableRef]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for target in targets {
        let key = refs
            .iter()
            .map(TableRef::key)
            .find(|k| k.eq_ignore_ascii_case(&target))
            .map(str::to_string)
            .unwrap_or(target);
        if !out.iter().any(|k| k.eq_ignore_ascii_case(&key)) {
            out.push(key);
        }
    }
    out
}
