//! Logtail Server - Live log file streaming.
//!
//! This crate provides a server that tails a single, append-only log file and
//! pushes new lines to every connected WebSocket client:
//! - Watching the file for changes and reading only the bytes appended since
//!   the last read
//! - Sending each new client a snapshot of the most recent lines
//! - Broadcasting every delta to all live clients
//!
//! # Architecture
//!
//! The [`engine::TailEngine`] owns the read cursor and the subscriber
//! [`broadcast::BroadcastHub`]. The [`watcher::ChangeWatcher`] drives the
//! engine from file system events, and each WebSocket connection opens a
//! [`session::Session`] on it. Nothing is persisted: the cursor and the
//! subscriber set live in memory only.

pub mod broadcast;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod reader;
pub mod routes;
pub mod session;
pub mod watcher;
