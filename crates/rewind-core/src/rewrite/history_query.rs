//! Point-in-time rewrite of read queries.
//!
//! Every table in a FROM or JOIN position is swapped for its history table
//! and restricted to the rows whose validity interval contains the requested
//! instant. Scope columns are redirected to their `base_` mirrors. Derived
//! tables, subqueries, CTE bodies and set-operator branches are rewritten
//! recursively with the same instant.

use std::ops::Range;

use tracing::debug;

use crate::analysis::AliasMap;
use crate::config::HistoryConfig;
use crate::error::{HistoryError, HistoryResult};
use crate::sql::keywords;
use crate::sql::node::{is_query, render, significant, Alias, Head, Node, QualifiedName};
use crate::sql::Statement;

/// Result of rewriting a read query.
#[derive(Debug, Clone, PartialEq)]
pub struct RewrittenQuery {
    pub sql: String,
    /// Alias (or history table name) to history table, across all levels.
    pub aliases: AliasMap,
}

struct Ctx<'a> {
    config: &'a HistoryConfig,
    /// Instant, already escaped for a single-quoted literal.
    as_of: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindingKind {
    History,
    Cte,
    Derived,
}

#[derive(Debug, Clone)]
struct Binding {
    /// Alias, or the history table name when unaliased.
    key: String,
    /// Text used to qualify the interval columns.
    qualifier: String,
    kind: BindingKind,
    /// Bare table name that other clauses may still use as a qualifier.
    renamed_from: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct Scope {
    bindings: Vec<Binding>,
    ctes: Vec<String>,
}

impl Scope {
    fn lookup(&self, qualifier: &str) -> Option<&Binding> {
        self.bindings.iter().rev().find(|b| {
            b.key.eq_ignore_ascii_case(qualifier)
                || b.renamed_from
                    .as_deref()
                    .map(|r| r.eq_ignore_ascii_case(qualifier))
                    .unwrap_or(false)
        })
    }

    fn is_cte(&self, name: &str) -> bool {
        self.ctes.iter().any(|c| c.eq_ignore_ascii_case(name))
    }

    fn extend(&self, level: &[Binding]) -> Scope {
        let mut scope = self.clone();
        scope.bindings.extend(level.iter().cloned());
        scope
    }
}

/// Whether unqualified column names at this level may be redirected.
#[derive(Debug, Clone, Copy)]
struct Level {
    bare_columns: bool,
}

/// Bindings of one SELECT level and the scope its expressions resolve in.
struct FromScope<'a> {
    bindings: &'a [Binding],
    scope: &'a Scope,
    level: Level,
}

/// One table position of a FROM clause.
#[derive(Debug)]
struct FromItem {
    node: usize,
    join: Option<String>,
    bindings: Range<usize>,
    /// Nodes of the ON expression, excluding the keyword.
    on: Option<Range<usize>>,
    /// Items of a parenthesized join group.
    nested: Vec<FromItem>,
}

/// Rewrite a SELECT (or WITH ... SELECT) to read history as of `as_of`.
pub fn rewrite_history_query(
    stmt: &Statement,
    as_of: &str,
    config: &HistoryConfig,
) -> HistoryResult<RewrittenQuery> {
    ensure_query(stmt.nodes())?;
    let ctx = Ctx {
        config,
        as_of: as_of.replace('\'', "''"),
    };
    let (nodes, aliases) = rewrite_query(stmt.nodes(), &ctx, &Scope::default())?;
    let sql = render(&nodes);
    debug!(as_of, sql = %sql, "Rewrote history query");
    Ok(RewrittenQuery { sql, aliases })
}

fn ensure_query(nodes: &[Node]) -> HistoryResult<()> {
    match nodes.iter().find(|n| !n.is_whitespace()) {
        Some(n) if n.is_keyword("SELECT") || n.is_keyword("WITH") => Ok(()),
        Some(Node::Parenthesis(_)) => Ok(()),
        _ => Err(HistoryError::analysis(
            "only SELECT statements can be read as of a point in time",
        )),
    }
}

fn rewrite_query(nodes: &[Node], ctx: &Ctx, outer: &Scope) -> HistoryResult<(Vec<Node>, AliasMap)> {
    match nodes.iter().position(|n| !n.is_whitespace()) {
        Some(first) if nodes[first].is_keyword("WITH") => rewrite_with(nodes, first, ctx, outer),
        _ => rewrite_compound(nodes, ctx, outer),
    }
}

#[derive(Clone, Copy)]
enum CteState {
    Name,
    Body,
    AfterBody,
}

fn rewrite_with(
    nodes: &[Node],
    with: usize,
    ctx: &Ctx,
    outer: &Scope,
) -> HistoryResult<(Vec<Node>, AliasMap)> {
    let mut out = nodes[..=with].to_vec();
    let mut aliases = AliasMap::new();
    let mut scope = outer.clone();
    let mut state = CteState::Name;
    let mut after_as = false;
    let mut i = with + 1;

    while i < nodes.len() {
        let node = &nodes[i];
        if node.is_whitespace() || node.is_keyword("RECURSIVE") {
            out.push(node.clone());
            i += 1;
            continue;
        }
        match state {
            CteState::Name => {
                let name = node.as_identifier().and_then(|ident| match &ident.head {
                    Head::Name(q) => Some(q.name()),
                    Head::Function(f) => Some(f.name.name()),
                    Head::Group(_) => None,
                });
                match name {
                    Some(name) => {
                        scope.ctes.push(name);
                        out.push(node.clone());
                        state = CteState::Body;
                    }
                    None => break,
                }
            }
            CteState::Body => match node {
                Node::Parenthesis(children) if after_as => {
                    let (body, map) = rewrite_query(children, ctx, &scope)?;
                    aliases.merge(map);
                    out.push(Node::Parenthesis(body));
                    state = CteState::AfterBody;
                    after_as = false;
                }
                _ => {
                    after_as = node.is_keyword("AS");
                    out.push(node.clone());
                }
            },
            CteState::AfterBody if node.is_comma() => {
                out.push(node.clone());
                state = CteState::Name;
            }
            CteState::AfterBody => break,
        }
        i += 1;
    }

    ensure_query(&nodes[i..])?;
    let (main, map) = rewrite_compound(&nodes[i..], ctx, &scope)?;
    aliases.merge(map);
    out.extend(main);
    Ok((out, aliases))
}

fn rewrite_compound(
    nodes: &[Node],
    ctx: &Ctx,
    outer: &Scope,
) -> HistoryResult<(Vec<Node>, AliasMap)> {
    let mut out = Vec::with_capacity(nodes.len());
    let mut aliases = AliasMap::new();
    let mut start = 0;
    for (i, node) in nodes.iter().enumerate() {
        if node.keyword().map(keywords::is_set_operator).unwrap_or(false) {
            let (branch, map) = rewrite_branch(&nodes[start..i], ctx, outer)?;
            out.extend(branch);
            aliases.merge(map);
            out.push(node.clone());
            start = i + 1;
        }
    }
    let (branch, map) = rewrite_branch(&nodes[start..], ctx, outer)?;
    out.extend(branch);
    aliases.merge(map);
    Ok((out, aliases))
}

fn rewrite_branch(nodes: &[Node], ctx: &Ctx, outer: &Scope) -> HistoryResult<(Vec<Node>, AliasMap)> {
    let sig = significant(nodes);
    if let [only] = sig.as_slice() {
        if let Node::Parenthesis(children) = &nodes[*only] {
            let (inner, map) = rewrite_query(children, ctx, outer)?;
            let mut out = nodes.to_vec();
            out[*only] = Node::Parenthesis(inner);
            return Ok((out, map));
        }
    }
    rewrite_select(nodes, ctx, outer)
}

fn ends_from(node: &Node) -> bool {
    matches!(node, Node::Where(_))
        || node
            .keyword()
            .map(keywords::is_clause_terminator)
            .unwrap_or(false)
}

fn rewrite_select(nodes: &[Node], ctx: &Ctx, outer: &Scope) -> HistoryResult<(Vec<Node>, AliasMap)> {
    let mut aliases = AliasMap::new();
    let Some(from) = nodes.iter().position(|n| n.is_keyword("FROM")) else {
        let mut out = nodes.to_vec();
        let level = Level { bare_columns: false };
        rewrite_select_list(&mut out, ctx, outer, level, &mut aliases)?;
        return Ok((out, aliases));
    };
    let from_end = (from + 1..nodes.len())
        .find(|&i| ends_from(&nodes[i]))
        .unwrap_or(nodes.len());

    let mut segment = nodes[from + 1..from_end].to_vec();
    let mut bindings = Vec::new();
    let mut has_derived = false;
    let items = bind_from(&mut segment, ctx, outer, &mut bindings, &mut has_derived, &mut aliases)?;

    let scope = outer.extend(&bindings);
    let level = Level {
        bare_columns: !has_derived
            && bindings.iter().all(|b| b.kind == BindingKind::History)
            && !bindings.is_empty(),
    };
    let mut handled = vec![false; bindings.len()];
    let from_scope = FromScope {
        bindings: &bindings,
        scope: &scope,
        level,
    };
    finish_from(&mut segment, &items, &from_scope, ctx, &mut handled, &mut aliases)?;

    let mut head = nodes[..from].to_vec();
    rewrite_select_list(&mut head, ctx, &scope, level, &mut aliases)?;
    let mut rest = nodes[from_end..].to_vec();
    rewrite_columns(&mut rest, ctx, &scope, level, &mut aliases)?;

    let conjuncts: Vec<String> = bindings
        .iter()
        .zip(&handled)
        .filter(|(b, done)| b.kind == BindingKind::History && !**done)
        .map(|(b, _)| interval_conjunct(&b.qualifier, &ctx.as_of))
        .collect();

    let mut out = head;
    out.push(nodes[from].clone());
    attach_where(&mut out, segment, rest, &conjuncts);
    Ok((out, aliases))
}

/// Rename tables, rewrite derived tables and record bindings.
fn bind_from(
    seg: &mut [Node],
    ctx: &Ctx,
    outer: &Scope,
    bindings: &mut Vec<Binding>,
    has_derived: &mut bool,
    aliases: &mut AliasMap,
) -> HistoryResult<Vec<FromItem>> {
    let mut items: Vec<FromItem> = Vec::new();
    let mut expecting = true;
    let mut in_condition = false;
    let mut pending_join: Option<String> = None;
    let mut on_start: Option<usize> = None;

    for i in 0..seg.len() {
        if seg[i].is_whitespace() {
            continue;
        }
        let keyword = seg[i].keyword().map(str::to_string);
        if seg[i].is_comma() || keyword.as_deref().map(keywords::is_join).unwrap_or(false) {
            close_on(&mut items, &mut on_start, i);
            expecting = true;
            in_condition = false;
            pending_join = keyword;
            continue;
        }
        match keyword.as_deref() {
            Some("ON") => {
                on_start = Some(i + 1);
                in_condition = true;
                expecting = false;
                continue;
            }
            Some("USING") => {
                in_condition = true;
                expecting = false;
                continue;
            }
            Some(_) => continue,
            None => {}
        }
        if in_condition || !expecting {
            continue;
        }
        expecting = false;

        let start = bindings.len();
        let mut nested = Vec::new();
        match &mut seg[i] {
            Node::Identifier(ident) => {
                let alias = ident.alias.as_ref().map(|a| (a.value(), a.name.clone()));
                match &mut ident.head {
                    Head::Name(name) => {
                        bindings.push(bind_table(name, alias, ctx, outer, aliases));
                    }
                    Head::Group(children) if is_query(children) => {
                        let (rewritten, map) = rewrite_query(children, ctx, outer)?;
                        *children = rewritten;
                        aliases.merge(map);
                        *has_derived = true;
                        if let Some((key, raw)) = alias {
                            bindings.push(Binding {
                                key,
                                qualifier: raw,
                                kind: BindingKind::Derived,
                                renamed_from: None,
                            });
                        }
                    }
                    Head::Group(children) => {
                        nested = bind_from(children, ctx, outer, bindings, has_derived, aliases)?;
                    }
                    // Table functions.
                    Head::Function(_) => *has_derived = true,
                }
            }
            Node::Parenthesis(children) if is_query(children) => {
                let (rewritten, map) = rewrite_query(children, ctx, outer)?;
                *children = rewritten;
                aliases.merge(map);
                *has_derived = true;
            }
            Node::Parenthesis(children) => {
                nested = bind_from(children, ctx, outer, bindings, has_derived, aliases)?;
            }
            _ => {}
        }
        items.push(FromItem {
            node: i,
            join: pending_join.take(),
            bindings: start..bindings.len(),
            on: None,
            nested,
        });
    }
    close_on(&mut items, &mut on_start, seg.len());
    Ok(items)
}

fn close_on(items: &mut [FromItem], on_start: &mut Option<usize>, end: usize) {
    if let Some(start) = on_start.take() {
        if let Some(last) = items.last_mut() {
            last.on = Some(start..end);
        }
    }
}

fn bind_table(
    name: &mut QualifiedName,
    alias: Option<(String, String)>,
    ctx: &Ctx,
    outer: &Scope,
    aliases: &mut AliasMap,
) -> Binding {
    let table = name.name();
    if name.parts.len() == 1 && outer.is_cte(&table) {
        let (key, qualifier) = alias.unwrap_or_else(|| (table.clone(), name.to_string()));
        return Binding {
            key,
            qualifier,
            kind: BindingKind::Cte,
            renamed_from: None,
        };
    }

    let history = ctx.config.history_table(&table);
    name.set_name(&history);
    let (key, qualifier, renamed_from) = match alias {
        Some((key, raw)) => (key, raw, None),
        None => (history.clone(), name.to_string(), Some(table)),
    };
    aliases.insert(key.clone(), history);
    Binding {
        key,
        qualifier,
        kind: BindingKind::History,
        renamed_from,
    }
}

/// Bindings on the optional side of the join that introduces item `pos`.
fn optional_bindings(items: &[FromItem], pos: usize) -> Vec<usize> {
    let join = items[pos].join.as_deref().unwrap_or("");
    if join.starts_with("NATURAL") {
        return Vec::new();
    }
    let right: Vec<usize> = items[pos].bindings.clone().collect();
    let left: Vec<usize> = items[..pos]
        .iter()
        .flat_map(|item| item.bindings.clone())
        .collect();
    if join.starts_with("LEFT") {
        right
    } else if join.starts_with("RIGHT") {
        left
    } else if join.starts_with("FULL") {
        left.into_iter().chain(right).collect()
    } else {
        Vec::new()
    }
}

/// Rewrite ON expressions and move optional-side interval conditions into them.
fn finish_from(
    seg: &mut Vec<Node>,
    items: &[FromItem],
    from: &FromScope,
    ctx: &Ctx,
    handled: &mut [bool],
    aliases: &mut AliasMap,
) -> HistoryResult<()> {
    for item in items.iter().filter(|item| !item.nested.is_empty()) {
        let children = match &mut seg[item.node] {
            Node::Parenthesis(children) => children,
            Node::Identifier(ident) => match &mut ident.head {
                Head::Group(children) => children,
                _ => continue,
            },
            _ => continue,
        };
        finish_from(children, &item.nested, from, ctx, handled, aliases)?;
    }

    for pos in (0..items.len()).rev() {
        let Some(range) = items[pos].on.clone() else {
            continue;
        };
        let mut expr = seg[range.clone()].to_vec();
        rewrite_columns(&mut expr, ctx, from.scope, from.level, aliases)?;

        let mut conjuncts = Vec::new();
        for b in optional_bindings(items, pos) {
            let binding = &from.bindings[b];
            if binding.kind == BindingKind::History && !handled[b] {
                handled[b] = true;
                conjuncts.push(interval_conjunct(&binding.qualifier, &ctx.as_of));
            }
        }
        if !conjuncts.is_empty() {
            expr = wrap_with_conjuncts(expr, &conjuncts, false);
        }
        seg.splice(range, expr);
    }
    Ok(())
}

fn interval_conjunct(qualifier: &str, as_of: &str) -> String {
    format!(
        "{q}.record_begin_time <= '{t}' AND {q}.record_end_time >= '{t}'",
        q = qualifier,
        t = as_of
    )
}

fn split_trailing_whitespace(nodes: &mut Vec<Node>) -> Vec<Node> {
    let keep = nodes
        .iter()
        .rposition(|n| !n.is_whitespace())
        .map(|i| i + 1)
        .unwrap_or(0);
    nodes.split_off(keep)
}

/// `<lead>(<expr>) AND <conjuncts><trail>`
fn wrap_with_conjuncts(mut expr: Vec<Node>, conjuncts: &[String], pad_lead: bool) -> Vec<Node> {
    let trailing = split_trailing_whitespace(&mut expr);
    let lead_len = expr.iter().take_while(|n| n.is_whitespace()).count();
    let core = expr.split_off(lead_len);
    let mut out = expr;
    if out.is_empty() && pad_lead {
        out.push(Node::raw(" "));
    }
    if core.is_empty() {
        out.push(Node::raw(conjuncts.join(" AND ")));
    } else {
        out.push(Node::Parenthesis(core));
        out.push(Node::raw(format!(" AND {}", conjuncts.join(" AND "))));
    }
    out.extend(trailing);
    out
}

fn attach_where(out: &mut Vec<Node>, mut segment: Vec<Node>, mut rest: Vec<Node>, conjuncts: &[String]) {
    if conjuncts.is_empty() {
        out.extend(segment);
        out.extend(rest);
        return;
    }
    if let Some(Node::Where(children)) = rest.first_mut() {
        let body = children.split_off(1);
        children.extend(wrap_with_conjuncts(body, conjuncts, true));
        out.extend(segment);
        out.extend(rest);
        return;
    }
    let trailing = split_trailing_whitespace(&mut segment);
    out.extend(segment);
    out.push(Node::raw(format!(" WHERE {}", conjuncts.join(" AND "))));
    if !rest.is_empty() && trailing.is_empty() {
        out.push(Node::raw(" "));
    }
    out.extend(trailing);
    out.extend(rest);
}

/// Whether node `i` is a whole select item on its own.
fn is_sole_item(nodes: &[Node], i: usize) -> bool {
    let before = nodes[..i].iter().rev().find(|n| !n.is_whitespace());
    let after = nodes[i + 1..].iter().find(|n| !n.is_whitespace());
    let starts = matches!(before, Some(n) if n.is_comma() || n.keyword().is_some());
    let ends = match after {
        None => true,
        Some(n) => n.is_comma() || n.keyword().is_some(),
    };
    starts && ends
}

fn rewrite_select_list(
    nodes: &mut [Node],
    ctx: &Ctx,
    scope: &Scope,
    level: Level,
    aliases: &mut AliasMap,
) -> HistoryResult<()> {
    for i in 0..nodes.len() {
        let original = nodes[i]
            .as_identifier()
            .filter(|ident| ident.alias.is_none())
            .and_then(|ident| ident.as_name())
            .map(|name| name.last_raw().to_string());
        let renamed = rewrite_node(&mut nodes[i], ctx, scope, level, aliases)?;
        if !renamed || !is_sole_item(nodes, i) {
            continue;
        }
        if let (Some(original), Node::Identifier(ident)) = (original, &mut nodes[i]) {
            ident.alias = Some(Alias {
                lead: " AS ".to_string(),
                name: original,
            });
        }
    }
    Ok(())
}

fn rewrite_columns(
    nodes: &mut [Node],
    ctx: &Ctx,
    scope: &Scope,
    level: Level,
    aliases: &mut AliasMap,
) -> HistoryResult<()> {
    for node in nodes.iter_mut() {
        rewrite_node(node, ctx, scope, level, aliases)?;
    }
    Ok(())
}

/// Returns whether a column name was redirected to its `base_` mirror.
fn rewrite_node(
    node: &mut Node,
    ctx: &Ctx,
    scope: &Scope,
    level: Level,
    aliases: &mut AliasMap,
) -> HistoryResult<bool> {
    match node {
        Node::Identifier(ident) => match &mut ident.head {
            Head::Name(name) => Ok(rewrite_name(name, ctx, scope, level)),
            Head::Function(func) => {
                rewrite_group(&mut func.args, ctx, scope, level, aliases)?;
                Ok(false)
            }
            Head::Group(children) => {
                rewrite_group(children, ctx, scope, level, aliases)?;
                Ok(false)
            }
        },
        Node::Parenthesis(children) => {
            rewrite_group(children, ctx, scope, level, aliases)?;
            Ok(false)
        }
        Node::Where(children) => {
            rewrite_columns(children, ctx, scope, level, aliases)?;
            Ok(false)
        }
        Node::Token(_) => Ok(false),
    }
}

fn rewrite_group(
    children: &mut Vec<Node>,
    ctx: &Ctx,
    scope: &Scope,
    level: Level,
    aliases: &mut AliasMap,
) -> HistoryResult<()> {
    if is_query(children) {
        let (rewritten, map) = rewrite_query(children, ctx, scope)?;
        *children = rewritten;
        aliases.merge(map);
        Ok(())
    } else {
        rewrite_columns(children, ctx, scope, level, aliases)
    }
}

fn rewrite_name(name: &mut QualifiedName, ctx: &Ctx, scope: &Scope, level: Level) -> bool {
    let column = name.name();
    let Some(qualifier) = name.qualifier() else {
        if level.bare_columns && !name.is_wildcard() && ctx.config.is_scope_column(&column) {
            name.set_name(&ctx.config.base_column(&column));
            return true;
        }
        return false;
    };

    let Some(binding) = scope.lookup(&qualifier) else {
        return false;
    };
    let renamed_qualifier = binding
        .renamed_from
        .as_deref()
        .map(|r| r.eq_ignore_ascii_case(&qualifier))
        .unwrap_or(false);
    if renamed_qualifier {
        name.set_qualifier(&binding.key);
    }
    if binding.kind == BindingKind::History
        && !name.is_wildcard()
        && ctx.config.is_scope_column(&column)
    {
        name.set_name(&ctx.config.base_column(&column));
        return true;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SqlDialect;

    const T: &str = "2023-01-01 00:00:00";

    fn window(q: &str) -> String {
        interval_conjunct(q, T)
    }

    fn rewrite_with_config(sql: &str, config: &HistoryConfig) -> RewrittenQuery {
        let stmt = Statement::parse(sql, config.dialect).unwrap();
        rewrite_history_query(&stmt, T, config).unwrap()
    }

    fn rewrite(sql: &str) -> String {
        rewrite_with_config(sql, &HistoryConfig::default()).sql
    }

    #[test]
    fn test_aliased_table_with_where() {
        let out = rewrite_with_config(
            "SELECT * FROM orders o WHERE o.status='open'",
            &HistoryConfig::default(),
        );
        assert_eq!(
            out.sql,
            "SELECT * FROM orders_history o WHERE (o.status='open') AND o.record_begin_time <= '2023-01-01 00:00:00' AND o.record_end_time >= '2023-01-01 00:00:00'"
        );
        assert_eq!(out.aliases.get("o"), Some("orders_history"));
    }

    #[test]
    fn test_unaliased_table_and_scope_columns() {
        assert_eq!(
            rewrite("SELECT id, status FROM orders WHERE id = 3"),
            format!(
                "SELECT base_id AS id, status FROM orders_history WHERE (base_id = 3) AND {}",
                window("orders_history")
            )
        );
    }

    #[test]
    fn test_bare_table_qualifier_is_renamed() {
        assert_eq!(
            rewrite("SELECT orders.id FROM `orders` ORDER BY orders.id"),
            format!(
                "SELECT orders_history.base_id AS id FROM `orders_history` WHERE {} ORDER BY orders_history.base_id",
                window("`orders_history`")
            )
        );
    }

    #[test]
    fn test_left_join_condition_goes_into_on() {
        assert_eq!(
            rewrite("SELECT o.id, c.name FROM orders o LEFT JOIN customers c ON c.id = o.customer_id"),
            format!(
                "SELECT o.base_id AS id, c.name FROM orders_history o LEFT JOIN customers_history c ON (c.base_id = o.customer_id) AND {} WHERE {}",
                window("c"),
                window("o")
            )
        );
    }

    #[test]
    fn test_nested_join_group_on_optional_side() {
        let out = rewrite(
            "SELECT o.id FROM orders o LEFT JOIN (items i JOIN products p ON p.id = i.product_id) ON i.order_id = o.id",
        );
        assert!(out.contains(
            "LEFT JOIN (items_history i JOIN products_history p ON p.base_id = i.product_id)"
        ));
        assert!(out.contains(&format!(
            "ON (i.order_id = o.base_id) AND {} AND {}",
            window("i"),
            window("p")
        )));
        assert!(out.ends_with(&format!(" WHERE {}", window("o"))));
    }

    #[test]
    fn test_union_branches_and_subquery() {
        assert_eq!(
            rewrite("SELECT id FROM a UNION ALL SELECT id FROM b WHERE id IN (SELECT aid FROM c)"),
            format!(
                "SELECT base_id AS id FROM a_history WHERE {} UNION ALL SELECT base_id AS id FROM b_history WHERE (base_id IN (SELECT aid FROM c_history WHERE {})) AND {}",
                window("a_history"),
                window("c_history"),
                window("b_history")
            )
        );
    }

    #[test]
    fn test_derived_table_is_rewritten_inside() {
        assert_eq!(
            rewrite("SELECT d.id FROM (SELECT id FROM orders) d"),
            format!(
                "SELECT d.id FROM (SELECT base_id AS id FROM orders_history WHERE {}) d",
                window("orders_history")
            )
        );
    }

    #[test]
    fn test_cte_names_are_not_history_tables() {
        assert_eq!(
            rewrite("WITH recent AS (SELECT id FROM orders WHERE tenant_id = 1) SELECT r.id FROM recent r"),
            format!(
                "WITH recent AS (SELECT base_id AS id FROM orders_history WHERE (tenant_id = 1) AND {}) SELECT r.id FROM recent r",
                window("orders_history")
            )
        );
    }

    #[test]
    fn test_correlated_subquery_sees_outer_alias() {
        assert_eq!(
            rewrite("SELECT o.total FROM orders o WHERE EXISTS (SELECT 1 FROM items i WHERE i.order_id = o.id)"),
            format!(
                "SELECT o.total FROM orders_history o WHERE (EXISTS (SELECT 1 FROM items_history i WHERE (i.order_id = o.base_id) AND {})) AND {}",
                window("i"),
                window("o")
            )
        );
    }

    #[test]
    fn test_where_injected_before_trailing_clauses() {
        assert_eq!(
            rewrite("SELECT status, COUNT(*) FROM orders GROUP BY status LIMIT 5"),
            format!(
                "SELECT status, COUNT(*) FROM orders_history WHERE {} GROUP BY status LIMIT 5",
                window("orders_history")
            )
        );
    }

    #[test]
    fn test_extra_scope_columns_and_suffix() {
        let config = HistoryConfig::builder()
            .suffix("_hist")
            .scope_columns(["id", "tenant_id"])
            .dialect(SqlDialect::Sqlite)
            .build()
            .unwrap();
        let out = rewrite_with_config("SELECT * FROM orders WHERE tenant_id = ?", &config);
        assert_eq!(
            out.sql,
            format!(
                "SELECT * FROM orders_hist WHERE (base_tenant_id = ?) AND {}",
                interval_conjunct("orders_hist", T)
            )
        );
        assert_eq!(out.aliases.get("orders_hist"), Some("orders_hist"));
    }

    #[test]
    fn test_instant_is_escaped() {
        let stmt = Statement::parse("SELECT 1 FROM t", SqlDialect::MySql).unwrap();
        let out = rewrite_history_query(&stmt, "x'y", &HistoryConfig::default()).unwrap();
        assert!(out.sql.contains("<= 'x''y'"));
    }

    #[test]
    fn test_non_select_is_rejected() {
        let stmt = Statement::parse("UPDATE t SET a = 1", SqlDialect::MySql).unwrap();
        let err = rewrite_history_query(&stmt, T, &HistoryConfig::default()).unwrap_err();
        assert!(matches!(err, HistoryError::Analysis { .. }));
    }
}
