//! Query rewriting for point-in-time reads.

mod history_query;

pub use history_query::{rewrite_history_query, RewrittenQuery};
