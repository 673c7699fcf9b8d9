//! Table references and the alias map built from FROM/JOIN clauses.

use serde::{Deserialize, Serialize};

use crate::sql::keywords;
use crate::sql::node::{is_query, Head, Node, QualifiedName};

/// A table named in a FROM, JOIN, USING or UPDATE clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub table: String,
    pub schema: Option<String>,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn from_name(name: &QualifiedName, alias: Option<String>) -> Self {
        Self {
            table: name.name(),
            schema: name.qualifier(),
            alias,
        }
    }

    /// The name other clauses use to refer to this table.
    pub fn key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

/// Ordered alias (or bare table name) to table name mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasMap {
    entries: Vec<(String, String)>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to `table`. A later binding of the same key wins.
    pub fn insert(&mut self, key: impl Into<String>, table: impl Into<String>) {
        let key = key.into();
        let table = table.into();
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(entry) => entry.1 = table,
            None => self.entries.push((key, table)),
        }
    }

    /// Table bound to `key`, compared case-insensitively.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, t)| t.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Distinct table names in binding order.
    pub fn tables(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for (_, table) in &self.entries {
            if !out.iter().any(|t| t.eq_ignore_ascii_case(table)) {
                out.push(table.clone());
            }
        }
        out
    }

    pub fn merge(&mut self, other: AliasMap) {
        for (k, t) in other.entries {
            self.insert(k, t);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for AliasMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        let mut map = AliasMap::new();
        for (k, t) in iter {
            map.insert(k, t);
        }
        map
    }
}

/// Build an alias map from table references.
pub fn alias_map(refs: &[TableRef]) -> AliasMap {
    refs.iter()
        .map(|r| (r.key().to_string(), r.table.clone()))
        .collect()
}

/// Collect the tables of a FROM-like segment.
///
/// A table position is the start of the segment, the node after a comma, or
/// the node after a join keyword. Join conditions and derived tables are
/// skipped; parenthesized join groups are searched.
pub fn collect_table_refs(nodes: &[Node]) -> Vec<TableRef> {
    let mut refs = Vec::new();
    collect_into(nodes, &mut refs);
    refs
}

fn collect_into(nodes: &[Node], refs: &mut Vec<TableRef>) {
    let mut expecting = true;
    let mut in_condition = false;
    for node in nodes {
        if node.is_whitespace() {
            continue;
        }
        if node.is_comma() {
            expecting = true;
            in_condition = false;
            continue;
        }
        if let Some(kw) = node.keyword() {
            if keywords::is_join(kw) {
                expecting = true;
                in_condition = false;
            } else if kw == "ON" || kw == "USING" {
                expecting = false;
                in_condition = true;
            }
            continue;
        }
        if in_condition || !expecting {
            continue;
        }
        match node {
            Node::Identifier(ident) => match &ident.head {
                Head::Name(name) => refs.push(TableRef::from_name(name, ident.alias_value())),
                Head::Group(children) if !is_query(children) => collect_into(children, refs),
                _ => {}
            },
            Node::Parenthesis(children) if !is_query(children) => collect_into(children, refs),
            _ => {}
        }
        expecting = false;
    }
}
