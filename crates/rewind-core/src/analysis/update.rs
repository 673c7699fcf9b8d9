//! Tables, assignments and row predicate of UPDATE statements.

use std::collections::{BTreeSet, HashMap};

use super::table_refs::{alias_map, collect_table_refs, AliasMap, TableRef};
use crate::config::AmbiguityPolicy;
use crate::error::{ErrorCode, HistoryError, HistoryResult};
use crate::sql::keywords::UPDATE_OPTIONS;
use crate::sql::node::{render, split_commas, Head, Node};
use crate::sql::{bind_nodes, Statement};
use crate::types::{Params, Value};

/// One `[alias.]column = expr` item of a SET clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub qualifier: Option<String>,
    pub column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateInfo {
    pub refs: Vec<TableRef>,
    /// Qualifiers used in SET, in order of first use.
    pub aliases_in_set: Vec<String>,
    pub changed_columns: BTreeSet<String>,
    /// Assigned columns written without a qualifier.
    pub unqualified_columns: BTreeSet<String>,
    pub assignments: Vec<Assignment>,
    pub aliases: AliasMap,
    /// ` FROM <refs> [WHERE ...]` with `?` markers. SET placeholders are not part of it.
    pub predicate: String,
    /// Values for the markers in `predicate`.
    pub params: Vec<Value>,
}

impl UpdateInfo {
    /// Whether table column lists are needed to resolve the updated tables.
    pub fn needs_schema(&self) -> bool {
        self.refs.len() > 1 && !self.unqualified_columns.is_empty()
    }

    /// Alias keys of the tables the statement modifies.
    ///
    /// `columns` maps table names to their column names and is only consulted
    /// for unqualified assignments in multi-table updates.
    pub fn resolve_targets(
        &self,
        policy: AmbiguityPolicy,
        columns: &HashMap<String, Vec<String>>,
    ) -> HistoryResult<Vec<String>> {
        if self.refs.len() == 1 {
            return Ok(vec![self.refs[0].key().to_string()]);
        }

        let mut keys: Vec<String> = Vec::new();
        let push = |key: &str, keys: &mut Vec<String>| {
            if !keys.iter().any(|k| k.eq_ignore_ascii_case(key)) {
                keys.push(key.to_string());
            }
        };

        for qualifier in &self.aliases_in_set {
            let key = self
                .refs
                .iter()
                .map(TableRef::key)
                .find(|k| k.eq_ignore_ascii_case(qualifier))
                .ok_or_else(|| {
                    HistoryError::analysis_with_code(
                        format!("'{}' in SET is not bound in the UPDATE clause", qualifier),
                        ErrorCode::AnaAliasUnbound,
                    )
                })?;
            push(key, &mut keys);
        }

        for column in &self.unqualified_columns {
            let matching: Vec<&TableRef> = self
                .refs
                .iter()
                .filter(|r| {
                    columns
                        .iter()
                        .find(|(t, _)| t.eq_ignore_ascii_case(&r.table))
                        .map(|(_, cols)| cols.iter().any(|c| c.eq_ignore_ascii_case(column)))
                        .unwrap_or(false)
                })
                .collect();
            match matching.len() {
                0 => {
                    return Err(HistoryError::analysis_with_code(
                        format!("column '{}' belongs to none of the updated tables", column),
                        ErrorCode::AnaUnknownColumn,
                    ))
                }
                n if n > 1 && policy == AmbiguityPolicy::Reject => {
                    return Err(HistoryError::analysis_with_code(
                        format!("column '{}' is ambiguous across {} tables", column, n),
                        ErrorCode::AnaAmbiguousColumn,
                    ))
                }
                _ => {
                    for r in matching {
                        push(r.key(), &mut keys);
                    }
                }
            }
        }
        Ok(keys)
    }
}

fn is_set_end(node: &Node) -> bool {
    matches!(node, Node::Where(_)) || node.is_keyword("ORDER BY") || node.is_keyword("LIMIT")
}

fn parse_assignment(item: &[Node]) -> HistoryResult<Assignment> {
    let target = item
        .iter()
        .find(|n| !n.is_whitespace())
        .and_then(Node::as_identifier)
        .and_then(|i| match &i.head {
            Head::Name(name) if i.alias.is_none() => Some(name),
            _ => None,
        })
        .ok_or_else(|| {
            HistoryError::analysis(format!(
                "cannot read assignment target in '{}'",
                render(item).trim()
            ))
        })?;
    Ok(Assignment {
        qualifier: target.qualifier(),
        column: target.name(),
    })
}

pub fn analyze_update(stmt: &Statement, params: &Params) -> HistoryResult<UpdateInfo> {
    let nodes = stmt.nodes();
    let start = nodes
        .iter()
        .position(|n| n.is_keyword("UPDATE"))
        .ok_or_else(|| HistoryError::analysis("statement is not an UPDATE"))?;
    let mut refs_start = start + 1;
    while refs_start < nodes.len()
        && (nodes[refs_start].is_whitespace()
            || nodes[refs_start]
                .keyword()
                .map(|k| UPDATE_OPTIONS.contains(&k))
                .unwrap_or(false))
    {
        refs_start += 1;
    }
    let set = (refs_start..nodes.len())
        .find(|&i| nodes[i].is_keyword("SET"))
        .ok_or_else(|| HistoryError::analysis("UPDATE without SET"))?;
    let set_end = (set + 1..nodes.len())
        .find(|&i| is_set_end(&nodes[i]))
        .unwrap_or(nodes.len());

    let refs_nodes = &nodes[refs_start..set];
    let refs = collect_table_refs(refs_nodes);
    if refs.is_empty() {
        return Err(HistoryError::analysis_with_code(
            "UPDATE names no table",
            ErrorCode::AnaTableNotFound,
        ));
    }

    let mut assignments = Vec::new();
    let mut aliases_in_set: Vec<String> = Vec::new();
    let mut changed_columns = BTreeSet::new();
    let mut unqualified_columns = BTreeSet::new();
    for item in split_commas(&nodes[set + 1..set_end]) {
        if item.iter().all(Node::is_whitespace) {
            continue;
        }
        let assignment = parse_assignment(item)?;
        match &assignment.qualifier {
            Some(q) => {
                if !aliases_in_set.iter().any(|a| a.eq_ignore_ascii_case(q)) {
                    aliases_in_set.push(q.clone());
                }
            }
            None => {
                unqualified_columns.insert(assignment.column.clone());
            }
        }
        changed_columns.insert(assignment.column.clone());
        assignments.push(assignment);
    }

    // Binding only the reference and tail nodes leaves every SET placeholder out.
    let head = bind_nodes(refs_nodes, params)?;
    let tail = bind_nodes(&nodes[set_end..], params)?;
    let mut predicate = format!(" FROM {}", head.sql.trim());
    if !tail.sql.trim().is_empty() {
        predicate.push(' ');
        predicate.push_str(tail.sql.trim());
    }
    let mut values = head.values;
    values.extend(tail.values);

    Ok(UpdateInfo {
        aliases: alias_map(&refs),
        refs,
        aliases_in_set,
        changed_columns,
        unqualified_columns,
        assignments,
        predicate,
        params: values,
    })
}
