// tests/property/mod.rs

//! Property-based tests for gatebridge

pub mod cache_invariants_test;
pub mod lock_invariants_test;
