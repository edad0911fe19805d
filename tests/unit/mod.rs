//! Integration test entry point.

mod concurrency_tests;
mod invariant_tests;
mod recovery_tests;
mod scenario_tests;
