//! Shared constants for end-to-end tests
//!
//! When the mock platform's canned data changes, update only this file.

// ============================================================================
// Client registration
// ============================================================================

pub const CLIENT_ID: &str = "test-client-id";
pub const CLIENT_SECRET: &str = "test-client-secret";
pub const REDIRECT_URI: &str = "http://127.0.0.1/v1/auth/callback";

// ============================================================================
// Credentials
// ============================================================================

/// Access token written to the credential file by the fixtures
pub const INITIAL_ACCESS_TOKEN: &str = "initial-access-token";

/// Refresh token written to the credential file by the fixtures
pub const INITIAL_REFRESH_TOKEN: &str = "initial-refresh-token";

/// Prefix of access tokens handed out by the mock accounts endpoint
pub const REFRESHED_ACCESS_PREFIX: &str = "mock-access-";

// ============================================================================
// Listener
// ============================================================================

pub const LISTENER_ID: &str = "mock-listener";
pub const LISTENER_NAME: &str = "Mock Listener";

// ============================================================================
// Timeouts
// ============================================================================

/// Maximum time to wait for a spawned server to answer
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Polling interval while waiting for a server
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 20;
