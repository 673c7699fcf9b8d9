//! Groups a flat token list into a [`Node`] tree.
//!
//! Passes, applied at every parenthesis level:
//! 1. matching parentheses become [`Node::Parenthesis`];
//! 2. dotted names become identifiers, and a name directly followed by a
//!    parenthesis becomes a function call;
//! 3. aliases (`x AS y` or `x y`) attach to names, calls and groups;
//! 4. `WHERE ...` up to the next clause keyword becomes [`Node::Where`].

use super::keywords;
use super::node::{Alias, Function, Head, Identifier, Node, QualifiedName};
use super::tokens::{Token, TokenKind};
use crate::error::{HistoryError, HistoryResult};

pub fn group(tokens: Vec<Token>) -> HistoryResult<Vec<Node>> {
    let mut iter = tokens.into_iter();
    let nodes = group_parens(&mut iter, false)?;
    Ok(group_level(nodes))
}

fn group_parens(iter: &mut impl Iterator<Item = Token>, inside: bool) -> HistoryResult<Vec<Node>> {
    let mut out = Vec::new();
    while let Some(token) = iter.next() {
        match token.kind {
            TokenKind::LParen => out.push(Node::Parenthesis(group_parens(iter, true)?)),
            TokenKind::RParen if inside => return Ok(out),
            TokenKind::RParen => return Err(HistoryError::unrecognized("unbalanced ')'")),
            _ => out.push(Node::Token(token)),
        }
    }
    if inside {
        Err(HistoryError::unrecognized("unclosed '('"))
    } else {
        Ok(out)
    }
}

fn group_level(nodes: Vec<Node>) -> Vec<Node> {
    let nodes = nodes
        .into_iter()
        .map(|n| match n {
            Node::Parenthesis(children) => Node::Parenthesis(group_level(children)),
            other => other,
        })
        .collect();
    group_where(group_aliases(group_names(nodes)))
}

fn group_names(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut iter = nodes.into_iter().peekable();
    let mut pending: Vec<Node> = Vec::new();

    while let Some(node) = iter.next() {
        pending.clear();
        let first_text = match &node {
            Node::Token(t) if t.kind == TokenKind::Name => t.text.clone(),
            Node::Token(t)
                if t.kind == TokenKind::Keyword
                    && keywords::is_function_keyword(&t.normalized)
                    && matches!(iter.peek(), Some(Node::Parenthesis(_))) =>
            {
                t.text.clone()
            }
            _ => {
                out.push(node);
                continue;
            }
        };

        let mut parts = vec![first_text];
        // Dotted continuation: `.name` or `.*`, no whitespace allowed.
        loop {
            match iter.peek() {
                Some(Node::Token(t)) if t.kind == TokenKind::Period => {}
                _ => break,
            }
            let period = iter.next();
            match iter.peek() {
                Some(Node::Token(t)) if t.kind == TokenKind::Name || t.kind == TokenKind::Star => {
                    parts.push(t.text.clone());
                    iter.next();
                }
                _ => {
                    // Dangling period: keep it as a plain token after the name.
                    if let Some(p) = period {
                        pending.push(p);
                    }
                    break;
                }
            }
        }

        let name = QualifiedName { parts };
        let ident = if pending.is_empty() && matches!(iter.peek(), Some(Node::Parenthesis(_))) {
            match iter.next() {
                Some(Node::Parenthesis(args)) => Identifier {
                    head: Head::Function(Function { name, args }),
                    alias: None,
                },
                _ => Identifier::name(name),
            }
        } else {
            Identifier::name(name)
        };
        out.push(Node::Identifier(ident));
        out.append(&mut pending);
    }
    out
}

fn next_significant(nodes: &[Node], from: usize) -> Option<usize> {
    (from..nodes.len()).find(|&i| !nodes[i].is_whitespace())
}

fn alias_candidate(node: &Node) -> Option<String> {
    match node {
        Node::Identifier(Identifier {
            head: Head::Name(q),
            alias: None,
        }) if q.parts.len() == 1 && !q.is_wildcard() => Some(q.parts[0].clone()),
        _ => None,
    }
}

fn group_aliases(nodes: Vec<Node>) -> Vec<Node> {
    let mut out: Vec<Node> = Vec::with_capacity(nodes.len());
    let mut i = 0;
    while i < nodes.len() {
        let aliasable = match &nodes[i] {
            Node::Identifier(ident) => ident.alias.is_none(),
            Node::Parenthesis(_) => true,
            _ => false,
        };
        if !aliasable {
            out.push(nodes[i].clone());
            i += 1;
            continue;
        }

        let mut attached = None;
        if let Some(j) = next_significant(&nodes, i + 1) {
            if nodes[j].is_keyword("AS") {
                if let Some(k) = next_significant(&nodes, j + 1) {
                    let name = alias_candidate(&nodes[k]).or_else(|| match &nodes[k] {
                        Node::Token(t) if t.kind == TokenKind::Literal => Some(t.text.clone()),
                        _ => None,
                    });
                    if let Some(name) = name {
                        attached = Some((k, name));
                    }
                }
            } else if j > i + 1 {
                if let Some(name) = alias_candidate(&nodes[j]) {
                    attached = Some((j, name));
                }
            }
        }

        match attached {
            Some((end, name)) => {
                let lead: String = nodes[i + 1..end].iter().map(|n| n.to_string()).collect();
                let alias = Some(Alias { lead, name });
                let ident = match nodes[i].clone() {
                    Node::Identifier(mut ident) => {
                        ident.alias = alias;
                        ident
                    }
                    Node::Parenthesis(children) => Identifier {
                        head: Head::Group(children),
                        alias,
                    },
                    other => {
                        out.push(other);
                        i += 1;
                        continue;
                    }
                };
                out.push(Node::Identifier(ident));
                i = end + 1;
            }
            None => {
                out.push(nodes[i].clone());
                i += 1;
            }
        }
    }
    out
}

fn group_where(nodes: Vec<Node>) -> Vec<Node> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut iter = nodes.into_iter().peekable();
    while let Some(node) = iter.next() {
        if !node.is_keyword("WHERE") {
            out.push(node);
            continue;
        }
        let mut clause = vec![node];
        while let Some(next) = iter.peek() {
            if next.keyword().map(keywords::is_clause_terminator).unwrap_or(false) {
                break;
            }
            if let Some(n) = iter.next() {
                clause.push(n);
            }
        }
        out.push(Node::Where(clause));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqlDialect;
    use crate::sql::node::render;
    use crate::sql::tokens::tokenize;

    fn tree(sql: &str) -> Vec<Node> {
        group(tokenize(sql, SqlDialect::MySql).unwrap()).unwrap()
    }

    fn idents(nodes: &[Node]) -> Vec<&Identifier> {
        nodes.iter().filter_map(Node::as_identifier).collect()
    }

    #[test]
    fn test_grouping_renders_losslessly() {
        let sql = "SELECT o.id, COUNT(*) AS n FROM orders o WHERE o.x IN (SELECT y FROM z) ORDER BY n";
        assert_eq!(render(&tree(sql)), sql);
    }

    #[test]
    fn test_alias_with_and_without_as() {
        let nodes = tree("FROM orders o, `items` AS i");
        let found = idents(&nodes);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].alias_value().as_deref(), Some("o"));
        assert_eq!(found[1].alias_value().as_deref(), Some("i"));
        assert_eq!(found[1].as_name().unwrap().name(), "items");
    }

    #[test]
    fn test_function_call_and_qualified_wildcard() {
        let nodes = tree("SELECT t.*, MAX(t.v) m");
        let found = idents(&nodes);
        assert!(found[0].as_name().unwrap().is_wildcard());
        assert!(matches!(found[1].head, Head::Function(_)));
        assert_eq!(found[1].alias_value().as_deref(), Some("m"));
    }

    #[test]
    fn test_derived_table_gets_alias() {
        let nodes = tree("FROM (SELECT 1) d WHERE 1");
        let found = idents(&nodes);
        assert!(matches!(found[0].head, Head::Group(_)));
        assert!(nodes.iter().any(|n| matches!(n, Node::Where(_))));
    }

    #[test]
    fn test_where_stops_at_order_by() {
        let nodes = tree("DELETE FROM t WHERE a = 1 ORDER BY b LIMIT 2");
        let clause = nodes
            .iter()
            .find_map(|n| match n {
                Node::Where(c) => Some(render(c)),
                _ => None,
            })
            .unwrap();
        assert_eq!(clause, "WHERE a = 1 ");
    }

    #[test]
    fn test_unbalanced_parens_are_unrecognized() {
        let tokens = tokenize("SELECT (1", SqlDialect::MySql).unwrap();
        assert!(group(tokens).unwrap_err().is_unrecognized());
    }
}
