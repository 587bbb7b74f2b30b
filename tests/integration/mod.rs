// tests/integration/mod.rs

//! Integration tests for gatebridge

pub mod health_server_test;
pub mod request_flow_test;
pub mod test_helpers;
