//! Offline-first mission log client.
//!
//! The daemon keeps a local copy of the mission list, queues writes made
//! while the server is unreachable, and replays them when the connection
//! comes back. New missions pushed by the server are merged into the cache.

pub mod client;
pub mod config;
pub mod connectivity;
pub mod database;
pub mod events;
pub mod queue;
pub mod reconciler;
