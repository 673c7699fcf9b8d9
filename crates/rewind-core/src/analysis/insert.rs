//! Target table of INSERT and REPLACE statements.

use crate::sql::keywords::INSERT_OPTIONS;
use crate::sql::node::{Head, Node};
use crate::sql::Statement;

/// Table an INSERT or REPLACE writes to, without its schema qualifier.
///
/// Returns `None` when the target cannot be located syntactically.
pub fn analyze_insert(stmt: &Statement) -> Option<String> {
    let mut nodes = stmt.nodes().iter().filter(|n| !n.is_whitespace()).peekable();
    if nodes.peek()?.is_keyword("WITH") {
        // CTE bodies are parenthesized, so the first top-level INSERT is the statement.
        nodes.find(|n| n.is_keyword("INSERT") || n.is_keyword("REPLACE"))?;
    } else {
        match nodes.next()?.keyword()? {
            "INSERT" | "REPLACE" => {}
            _ => return None,
        }
    }
    for node in nodes {
        if let Some(kw) = node.keyword() {
            if kw == "INTO" || INSERT_OPTIONS.contains(&kw) {
                continue;
            }
            return None;
        }
        return match node {
            Node::Identifier(ident) => match &ident.head {
                Head::Name(name) if !name.is_wildcard() => Some(name.name()),
                // `t(a, b)` with no space groups as a call.
                Head::Function(func) => Some(func.name.name()),
                _ => None,
            },
            _ => None,
        };
    }
    None
}

/// Whether the statement carries `ON DUPLICATE KEY UPDATE`.
///
/// MySQL counts a row changed by the update clause as two affected rows and
/// an unchanged one as zero, so the affected count stops matching the ids
/// the statement generated.
pub fn is_upsert(stmt: &Statement) -> bool {
    stmt.nodes()
        .iter()
        .any(|n| n.is_keyword("ON DUPLICATE KEY UPDATE"))
}
