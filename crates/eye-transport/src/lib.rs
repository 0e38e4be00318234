//! Publish sinks for the observer.
//!
//! This crate provides the hub connection (fire-and-forget invocations out,
//! commands in, automatic reconnect) and the key-value cache that holds
//! rendered images and the alignment map.

mod cache;
mod connection;
mod error;
mod hub;

pub use cache::{KeyValueCache, MemoryCache, RedisCache};
pub use connection::{ConnectionState, ReconnectPolicy};
pub use error::TransportError;
pub use hub::{HubClient, HubHandle, HubSink, RecordingHub, CONNECTED_STATUS};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Smallest reconnect delay factor (inclusive).
pub const MIN_RECONNECT_FACTOR: u32 = 2;

/// Largest reconnect delay factor (exclusive).
pub const MAX_RECONNECT_FACTOR: u32 = 12;

/// Seconds per reconnect delay factor.
pub const RECONNECT_DELAY_UNIT_SECS: u64 = 5;

/// Invocations buffered for the hub before publishing fails.
pub const OUTBOUND_CHANNEL_CAPACITY: usize = 256;

/// Longest accepted line from the hub, in bytes.
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;
