//! Integration tests for modcache-lib.

mod common;
mod concurrency_tests;
mod coordinator_tests;
