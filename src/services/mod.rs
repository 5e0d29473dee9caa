/// OpenAPI documentation generation.
pub mod documentation;
/// Change-feed row publication.
pub mod feed_events;
/// Health check service.
pub mod health_service;
/// Sign-up, login and the admin predicate.
pub mod identity_service;
/// Poll votes, tallies and close awards.
pub mod poll_service;
/// Read-only leaderboard and snapshot projections.
pub mod public_service;
/// Score ledger.
pub mod score_service;
/// Admin-driven session transitions.
pub mod session_service;
/// Server-Sent Events change-feed streaming.
pub mod sse_service;
/// Background storage connection supervisor.
pub mod storage_supervisor;
