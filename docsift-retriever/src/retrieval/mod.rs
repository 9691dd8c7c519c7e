pub mod bulk;
pub mod collaborators;
pub mod filter;
pub mod indexing_engine;
pub mod query_planner;
pub mod scoring;
pub mod search;
