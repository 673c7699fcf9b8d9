//! Token tree produced by [`super::group`].

use std::fmt;

use super::tokens::{Placeholder, Token, TokenKind};

/// A node of the statement tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Token(Token),
    Identifier(Identifier),
    /// Children between a matching pair of parentheses.
    Parenthesis(Vec<Node>),
    /// A WHERE clause; the first child is the `WHERE` keyword.
    Where(Vec<Node>),
}

/// A name, function call or aliased parenthesized group.
#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub head: Head,
    pub alias: Option<Alias>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Head {
    Name(QualifiedName),
    Function(Function),
    Group(Vec<Node>),
}

/// Dotted name such as `schema.table.column`, parts kept as written.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifiedName {
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: QualifiedName,
    pub args: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alias {
    /// Text between the aliased expression and the alias name.
    pub lead: String,
    /// Alias as written.
    pub name: String,
}

impl Alias {
    pub fn value(&self) -> String {
        unquote(&self.name)
    }
}

/// Strip identifier (or string) quotes, collapsing doubled quote characters.
pub fn unquote(raw: &str) -> String {
    let mut chars = raw.chars();
    let (open, close) = match (chars.next(), raw.chars().last()) {
        (Some('`'), Some('`')) => ('`', '`'),
        (Some('"'), Some('"')) => ('"', '"'),
        (Some('\''), Some('\'')) => ('\'', '\''),
        (Some('['), Some(']')) => ('[', ']'),
        _ => return raw.to_string(),
    };
    if raw.len() < 2 {
        return raw.to_string();
    }
    let inner = &raw[open.len_utf8()..raw.len() - close.len_utf8()];
    if open == close {
        inner.replace(&format!("{}{}", close, close), &close.to_string())
    } else {
        inner.to_string()
    }
}

/// Re-apply the quoting style of `template` to `value`.
pub fn requote(template: &str, value: &str) -> String {
    match template.chars().next() {
        Some(q @ ('`' | '"')) => format!("{q}{}{q}", value.replace(q, &format!("{q}{q}"))),
        Some('[') => format!("[{}]", value),
        _ => value.to_string(),
    }
}

impl QualifiedName {
    pub fn last_raw(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or("")
    }

    /// Unquoted final part.
    pub fn name(&self) -> String {
        unquote(self.last_raw())
    }

    /// Unquoted part before the final one.
    pub fn qualifier(&self) -> Option<String> {
        let n = self.parts.len();
        (n >= 2).then(|| unquote(&self.parts[n - 2]))
    }

    pub fn is_wildcard(&self) -> bool {
        self.last_raw() == "*"
    }

    /// Replace the final part, keeping its quoting.
    pub fn set_name(&mut self, value: &str) {
        if let Some(last) = self.parts.last_mut() {
            *last = requote(last, value);
        }
    }

    /// Replace the qualifier part, keeping its quoting.
    pub fn set_qualifier(&mut self, value: &str) {
        let n = self.parts.len();
        if n >= 2 {
            self.parts[n - 2] = requote(&self.parts[n - 2], value);
        }
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.parts.join("."))
    }
}

impl Identifier {
    pub fn name(name: QualifiedName) -> Self {
        Self {
            head: Head::Name(name),
            alias: None,
        }
    }

    pub fn as_name(&self) -> Option<&QualifiedName> {
        match &self.head {
            Head::Name(q) => Some(q),
            _ => None,
        }
    }

    pub fn alias_value(&self) -> Option<String> {
        self.alias.as_ref().map(Alias::value)
    }
}

impl Node {
    pub fn raw(text: impl Into<String>) -> Self {
        Node::Token(Token::raw(text))
    }

    pub fn token(&self) -> Option<&Token> {
        match self {
            Node::Token(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_whitespace(&self) -> bool {
        matches!(self, Node::Token(t) if t.is_whitespace())
    }

    pub fn is_comma(&self) -> bool {
        matches!(self, Node::Token(t) if t.kind == TokenKind::Comma)
    }

    /// Normalized keyword text, if this node is a keyword.
    pub fn keyword(&self) -> Option<&str> {
        match self {
            Node::Token(t) if t.kind == TokenKind::Keyword => Some(&t.normalized),
            _ => None,
        }
    }

    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.keyword() == Some(keyword)
    }

    pub fn as_identifier(&self) -> Option<&Identifier> {
        match self {
            Node::Identifier(i) => Some(i),
            _ => None,
        }
    }

    pub fn placeholder(&self) -> Option<&Placeholder> {
        match self {
            Node::Token(Token {
                kind: TokenKind::Placeholder(p),
                ..
            }) => Some(p),
            _ => None,
        }
    }

    fn render_into(&self, out: &mut String) {
        match self {
            Node::Token(t) => out.push_str(&t.text),
            Node::Identifier(ident) => {
                match &ident.head {
                    Head::Name(q) => out.push_str(&q.to_string()),
                    Head::Function(func) => {
                        out.push_str(&func.name.to_string());
                        out.push('(');
                        render_all(&func.args, out);
                        out.push(')');
                    }
                    Head::Group(children) => {
                        out.push('(');
                        render_all(children, out);
                        out.push(')');
                    }
                }
                if let Some(alias) = &ident.alias {
                    out.push_str(&alias.lead);
                    out.push_str(&alias.name);
                }
            }
            Node::Parenthesis(children) => {
                out.push('(');
                render_all(children, out);
                out.push(')');
            }
            Node::Where(children) => render_all(children, out),
        }
    }
}

fn render_all(nodes: &[Node], out: &mut String) {
    for node in nodes {
        node.render_into(out);
    }
}

/// Render nodes back to SQL text.
pub fn render(nodes: &[Node]) -> String {
    let mut out = String::new();
    render_all(nodes, &mut out);
    out
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.render_into(&mut out);
        f.write_str(&out)
    }
}

/// Indices of non-whitespace nodes.
pub fn significant(nodes: &[Node]) -> Vec<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| !n.is_whitespace())
        .map(|(i, _)| i)
        .collect()
}

/// First non-whitespace node.
pub fn first_significant(nodes: &[Node]) -> Option<&Node> {
    nodes.iter().find(|n| !n.is_whitespace())
}

/// Whether a parenthesized group holds a query.
pub fn is_query(nodes: &[Node]) -> bool {
    match first_significant(nodes) {
        Some(node) if node.is_keyword("SELECT") || node.is_keyword("WITH") => true,
        Some(Node::Parenthesis(inner)) => is_query(inner),
        _ => false,
    }
}

/// Split nodes on top-level commas.
pub fn split_commas(nodes: &[Node]) -> Vec<&[Node]> {
    nodes.split(|n| n.is_comma()).collect()
}

/// Visit every placeholder, in textual order, including nested ones.
pub fn for_each_placeholder<'a>(nodes: &'a [Node], f: &mut dyn FnMut(&'a Placeholder)) {
    for node in nodes {
        match node {
            Node::Token(_) => {
                if let Some(p) = node.placeholder() {
                    f(p);
                }
            }
            Node::Identifier(ident) => match &ident.head {
                Head::Function(func) => for_each_placeholder(&func.args, f),
                Head::Group(children) => for_each_placeholder(children, f),
                Head::Name(_) => {}
            },
            Node::Parenthesis(children) | Node::Where(children) => {
                for_each_placeholder(children, f)
            }
        }
    }
}
