//! SQL statement model: tokens, the grouped node tree and classification.

pub mod group;
pub mod keywords;
pub mod node;
pub mod statement;
pub mod tokens;

pub use node::{render, unquote, Alias, Function, Head, Identifier, Node, QualifiedName};
pub use statement::{bind_nodes, classify, BoundSql, Statement, StatementKind};
pub use tokens::{Placeholder, Token, TokenKind};
