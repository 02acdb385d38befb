pub mod server;
pub mod test_utils;

pub use server::{CallCounts, StubBehavior, StubConfig, StubServerHandle};

// Timing used by the end-to-end scenarios
pub const TEST_REQUEST_TIMEOUT_MS: u64 = 500;
pub const TEST_RUN_BUDGET_SECS: u64 = 5;
