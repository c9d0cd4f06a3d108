pub mod capture;
pub mod engine;
pub mod error;
pub mod health;
pub mod notify;
pub mod policy;
pub mod supervisor;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod throttle;
pub mod traits;
pub mod types;
pub mod worker;
