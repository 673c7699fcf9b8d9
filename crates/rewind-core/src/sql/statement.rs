//! Parsed statements, classification and placeholder binding.

use serde::{Deserialize, Serialize};
use strum::Display;

use super::group::group;
use super::node::{first_significant, for_each_placeholder, render, Head, Node};
use super::tokens::{tokenize, Placeholder, TokenKind};
use crate::config::SqlDialect;
use crate::error::{HistoryError, HistoryResult};
use crate::types::{Params, Value};

/// DML kind of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
    Other,
}

/// Words that start a statement producing a result set.
const ROW_RETURNING: &[&str] = &[
    "SELECT", "WITH", "SHOW", "PRAGMA", "EXPLAIN", "DESCRIBE", "DESC", "VALUES", "TABLE",
];

/// A single tokenized and grouped statement.
#[derive(Debug, Clone)]
pub struct Statement {
    nodes: Vec<Node>,
    kind: StatementKind,
}

/// SQL rendered with `?` markers and the values bound to them, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSql {
    pub sql: String,
    pub values: Vec<Value>,
}

impl Statement {
    /// Tokenize and group one statement. A trailing semicolon is dropped.
    pub fn parse(sql: &str, dialect: SqlDialect) -> HistoryResult<Self> {
        let mut tokens = tokenize(sql, dialect)?;
        while tokens
            .last()
            .map(|t| t.is_whitespace() || t.kind == TokenKind::Semicolon)
            .unwrap_or(false)
        {
            tokens.pop();
        }
        if tokens.is_empty() || tokens.iter().all(|t| t.is_whitespace()) {
            return Err(HistoryError::unrecognized("empty statement"));
        }
        if tokens.iter().any(|t| t.kind == TokenKind::Semicolon) {
            return Err(HistoryError::unrecognized("more than one statement"));
        }

        let nodes = group(tokens)?;
        let kind = classify(&nodes);
        Ok(Self { nodes, kind })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    /// Upper-cased first word, whether or not it is a structural keyword.
    pub fn leading_word(&self) -> Option<String> {
        leading_word(&self.nodes)
    }

    /// Whether executing the statement yields rows.
    pub fn returns_rows(&self) -> bool {
        if self.kind != StatementKind::Other {
            return false;
        }
        if matches!(first_significant(&self.nodes), Some(Node::Parenthesis(_))) {
            return true;
        }
        self.leading_word()
            .map(|w| ROW_RETURNING.contains(&w.as_str()))
            .unwrap_or(false)
    }

    /// Bind the whole statement. Positional arguments must all be consumed.
    pub fn bind(&self, params: &Params) -> HistoryResult<BoundSql> {
        let bound = bind_nodes(&self.nodes, params)?;
        if let Params::Positional(values) = params {
            let mut positional = 0usize;
            let mut numbered = false;
            for_each_placeholder(&self.nodes, &mut |p| match p {
                Placeholder::Positional(_) => positional += 1,
                Placeholder::Numbered(_) => numbered = true,
                Placeholder::Named(_) => {}
            });
            if !numbered && positional < values.len() {
                return Err(HistoryError::unused_parameters(positional, values.len()));
            }
        }
        Ok(bound)
    }
}

impl std::fmt::Display for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&render(&self.nodes))
    }
}

fn leading_word(nodes: &[Node]) -> Option<String> {
    match first_significant(nodes)? {
        Node::Token(t) if t.kind == TokenKind::Keyword => Some(t.normalized.clone()),
        Node::Identifier(ident) => match &ident.head {
            Head::Name(q) if q.parts.len() == 1 => Some(q.parts[0].to_uppercase()),
            Head::Function(f) if f.name.parts.len() == 1 => Some(f.name.parts[0].to_uppercase()),
            _ => None,
        },
        _ => None,
    }
}

/// Map a statement tree to its DML kind from the first keyword.
pub fn classify(nodes: &[Node]) -> StatementKind {
    match leading_word(nodes).as_deref() {
        Some("INSERT") | Some("REPLACE") => StatementKind::Insert,
        Some("UPDATE") => StatementKind::Update,
        Some("DELETE") => StatementKind::Delete,
        // Only INSERT is tracked behind a WITH clause.
        Some("WITH") => match statement_after_with(nodes) {
            Some("INSERT") | Some("REPLACE") => StatementKind::Insert,
            _ => StatementKind::Other,
        },
        _ => StatementKind::Other,
    }
}

/// First top-level statement keyword following the CTE list.
fn statement_after_with(nodes: &[Node]) -> Option<&str> {
    nodes
        .iter()
        .filter_map(Node::keyword)
        .skip(1)
        .find(|k| matches!(*k, "SELECT" | "INSERT" | "REPLACE" | "UPDATE" | "DELETE"))
}

fn lookup(placeholder: &Placeholder, params: &Params) -> HistoryResult<Value> {
    let found = match (placeholder, params) {
        (Placeholder::Positional(i), Params::Positional(values)) => values.get(*i),
        (Placeholder::Numbered(n), Params::Positional(values)) => values.get(n - 1),
        (Placeholder::Named(name), Params::Named(map)) => map.get(name),
        _ => None,
    };
    found
        .cloned()
        .ok_or_else(|| HistoryError::missing_parameter(placeholder))
}

/// Render a fragment with `?` markers, resolving every placeholder against `params`.
pub fn bind_nodes(nodes: &[Node], params: &Params) -> HistoryResult<BoundSql> {
    let mut sql = String::new();
    let mut values = Vec::new();
    bind_into(nodes, params, &mut sql, &mut values)?;
    Ok(BoundSql { sql, values })
}

fn bind_into(
    nodes: &[Node],
    params: &Params,
    sql: &mut String,
    values: &mut Vec<Value>,
) -> HistoryResult<()> {
    for node in nodes {
        match node {
            Node::Token(t) => match &t.kind {
                TokenKind::Placeholder(p) => {
                    values.push(lookup(p, params)?);
                    sql.push('?');
                }
                _ => sql.push_str(&t.text),
            },
            Node::Identifier(ident) => {
                match &ident.head {
                    Head::Name(q) => sql.push_str(&q.to_string()),
                    Head::Function(func) => {
                        sql.push_str(&func.name.to_string());
                        sql.push('(');
                        bind_into(&func.args, params, sql, values)?;
                        sql.push(')');
                    }
                    Head::Group(children) => {
                        sql.push('(');
                        bind_into(children, params, sql, values)?;
                        sql.push(')');
                    }
                }
                if let Some(alias) = &ident.alias {
                    sql.push_str(&alias.lead);
                    sql.push_str(&alias.name);
                }
            }
            Node::Parenthesis(children) => {
                sql.push('(');
                bind_into(children, params, sql, values)?;
                sql.push(')');
            }
            Node::Where(children) => bind_into(children, params, sql, values)?,
        }
    }
    Ok(())
}
