//! Keyword tables used when grouping tokens.
//!
//! Only words that matter for locating tables, clauses and predicates are
//! treated as keywords. Everything else (including many reserved words) is a
//! plain name so that columns such as `status` or `name` group as identifiers.

use std::collections::HashSet;

use once_cell::sync::Lazy;

static KEYWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "ALL", "AND", "ANY", "AS", "ASC", "BETWEEN", "BY", "CASE", "CROSS", "DELAYED", "DELETE",
        "DESC", "DISTINCT", "DIV", "DUPLICATE", "ELSE", "END", "ESCAPE", "EXCEPT", "EXISTS",
        "FALSE", "FOR", "FORCE", "FROM", "FULL", "GROUP", "HAVING", "HIGH_PRIORITY", "IF",
        "IGNORE", "IN", "INDEX", "INNER", "INSERT", "INTERSECT", "INTERVAL", "INTO", "IS", "JOIN",
        "KEY", "LATERAL", "LEFT", "LIKE", "LIMIT", "LOCK", "LOW_PRIORITY", "MOD", "NATURAL",
        "NOT", "NULL", "OFFSET", "ON", "OR", "ORDER", "OUTER", "OVER", "PARTITION", "QUICK",
        "RECURSIVE", "REGEXP", "REPLACE", "RETURNING", "RIGHT", "RLIKE", "SELECT", "SET",
        "SOME", "STRAIGHT_JOIN", "THEN", "TRUE", "UNION", "UPDATE", "USE", "USING",
        "VALUES", "WHEN", "WHERE", "WINDOW", "WITH", "XOR",
    ]
    .into_iter()
    .collect()
});

/// Keywords that double as function names when directly followed by `(`.
const FUNCTION_KEYWORDS: &[&str] = &[
    "IF", "LEFT", "RIGHT", "REPLACE", "INSERT", "MOD", "VALUES",
];

/// Multi-word keywords merged into one token, longest alternatives first.
pub(crate) const COMPOUND_KEYWORDS: &[&[&str]] = &[
    &["NATURAL", "LEFT", "OUTER", "JOIN"],
    &["NATURAL", "RIGHT", "OUTER", "JOIN"],
    &["NATURAL", "LEFT", "JOIN"],
    &["NATURAL", "RIGHT", "JOIN"],
    &["NATURAL", "INNER", "JOIN"],
    &["NATURAL", "JOIN"],
    &["LEFT", "OUTER", "JOIN"],
    &["RIGHT", "OUTER", "JOIN"],
    &["FULL", "OUTER", "JOIN"],
    &["LEFT", "JOIN"],
    &["RIGHT", "JOIN"],
    &["FULL", "JOIN"],
    &["INNER", "JOIN"],
    &["CROSS", "JOIN"],
    &["GROUP", "BY"],
    &["ORDER", "BY"],
    &["PARTITION", "BY"],
    &["UNION", "ALL"],
    &["UNION", "DISTINCT"],
    &["EXCEPT", "ALL"],
    &["INTERSECT", "ALL"],
    &["ON", "DUPLICATE", "KEY", "UPDATE"],
];

/// Option keywords allowed between the verb and the table of a DML statement.
pub const INSERT_OPTIONS: &[&str] = &["LOW_PRIORITY", "DELAYED", "HIGH_PRIORITY", "IGNORE"];
pub const DELETE_OPTIONS: &[&str] = &["LOW_PRIORITY", "QUICK", "IGNORE"];
pub const UPDATE_OPTIONS: &[&str] = &["LOW_PRIORITY", "IGNORE"];

/// Clause keywords that end a WHERE clause (and a FROM clause).
const CLAUSE_TERMINATORS: &[&str] = &[
    "GROUP BY", "ORDER BY", "HAVING", "LIMIT", "OFFSET", "WINDOW", "FOR", "LOCK", "INTO",
    "RETURNING", "UNION", "UNION ALL", "UNION DISTINCT", "EXCEPT", "EXCEPT ALL", "INTERSECT",
    "INTERSECT ALL", "ON DUPLICATE KEY UPDATE",
];

/// Whether an upper-cased bare word is a structural keyword.
pub fn is_keyword(upper: &str) -> bool {
    KEYWORDS.contains(upper)
}

/// Whether a keyword may name a function call.
pub fn is_function_keyword(upper: &str) -> bool {
    FUNCTION_KEYWORDS.contains(&upper)
}

/// Whether a normalized keyword closes a WHERE or FROM clause.
pub fn is_clause_terminator(normalized: &str) -> bool {
    CLAUSE_TERMINATORS.contains(&normalized)
}

/// Whether a normalized keyword joins two table references.
pub fn is_join(normalized: &str) -> bool {
    normalized.ends_with("JOIN")
}

/// Whether a normalized keyword combines two query branches.
pub fn is_set_operator(normalized: &str) -> bool {
    normalized.starts_with("UNION")
        || normalized.starts_with("EXCEPT")
        || normalized.starts_with("INTERSECT")
}
