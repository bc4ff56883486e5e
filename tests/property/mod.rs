//! Property-based tests for paging and reindex guarantees

mod paging;
