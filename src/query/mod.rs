//! Query execution: filtering, ranked search, iteration and fusion.

pub mod collector;
pub mod filter;
pub mod filter_expr;
pub mod iterator;
pub mod rerank;
pub mod search;

pub use collector::{Hit, ScoreOrder, TopK};
pub use filter::{CompiledFilter, Filter};
pub use iterator::SearchIterator;
pub use rerank::{Ranker, RankedList};
pub use search::{HybridSearchRequest, QueryData, SearchContext, SearchParams, SearchRequest};
