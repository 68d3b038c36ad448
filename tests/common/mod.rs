//! Common test infrastructure
//!
//! Tests should only import from this module, not from internal submodules.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{fixtures, MockPlatform};
//!
//! #[tokio::test]
//! async fn test_sync() {
//!     let platform = MockPlatform::spawn().await;
//!     platform.set_plays(fixtures::plays(&[("t1", 0)]));
//!     let env = fixtures::TestEnv::new(&platform, Some(3600));
//!     let report = env.service().run_ingestion_cycle().await.unwrap();
//!     assert_eq!(report.inserted_plays, 1);
//! }
//! ```

mod constants;
pub mod fixtures;
mod mock_platform;
mod server;

// Public API - this is what tests import
pub use constants::*;
pub use mock_platform::{MockPlatform, ScriptedResponse};
pub use server::TestServer;
