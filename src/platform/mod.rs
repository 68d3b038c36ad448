//! Access to the listening platform: play history, audio features and the
//! listener profile.

mod client;
mod models;
mod retry_policy;

pub use client::{ListeningPlatform, PlatformClient, RECENT_PLAYS_CEILING, TOP_TRACKS_CEILING};
pub use models::{PlatformProfile, PlayedTrack, RecentPlay};
pub use retry_policy::{parse_retry_after, RetryPolicy};
