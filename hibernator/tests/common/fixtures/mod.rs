//! This module provides reusable test utilities:
//! - A scriptable in-process executor
//! - A mock HTTP connector
//! - Plan spec builders
//! - A fully wired controller over the in-memory store
//! - Common test data

// Allow unused code in test fixtures - each test binary uses a subset
#![allow(dead_code)]
#![allow(unused_imports)]

pub mod harness;
pub mod mock_connector;
pub mod mock_executor;
pub mod plan_builder;
pub mod test_data;

// Re-export commonly used items
pub use harness::TestHarness;
pub use mock_connector::MockConnectorServer;
pub use mock_executor::MockExecutor;
pub use plan_builder::TestPlanBuilder;
pub use test_data::*;
