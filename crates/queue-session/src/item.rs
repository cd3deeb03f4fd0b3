//! Item types handed between sessions and the queue store.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Transaction identifier assigned by the queue store when an item is opened.
///
/// Unique among the currently open transactions of a queue. The store never
/// reuses an xid while its transaction is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Xid(u64);

impl Xid {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Xid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Xid {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Whether this instant is at or before the current time
    pub fn has_passed(&self) -> bool {
        Utc::now() >= self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Item Types
// ============================================================================

/// An item to be enqueued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewItem {
    pub data: Bytes,
    /// Opaque client flags echoed back on retrieval
    pub flags: u32,
    pub expiry: Option<Timestamp>,
}

impl NewItem {
    /// Create new item with payload
    pub fn new(data: Bytes) -> Self {
        Self {
            data,
            flags: 0,
            expiry: None,
        }
    }

    /// Set client flags
    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Set absolute expiry time
    pub fn with_expiry(mut self, expiry: Timestamp) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

/// An item handed out by the queue store.
///
/// `xid` is present only when the item was opened; peeks and plain removes
/// carry no transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub data: Bytes,
    pub xid: Option<Xid>,
    pub flags: u32,
    pub expiry: Option<Timestamp>,
    pub added_at: Timestamp,
}

impl Item {
    /// Create an unopened item from an enqueue request
    pub fn from_new(new_item: NewItem, added_at: Timestamp) -> Self {
        Self {
            data: new_item.data,
            xid: None,
            flags: new_item.flags,
            expiry: new_item.expiry,
            added_at,
        }
    }

    /// Check if the item has outlived its expiry
    pub fn is_expired(&self) -> bool {
        self.expiry.map(|expiry| expiry.has_passed()).unwrap_or(false)
    }

    /// Payload size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
#[path = "item_tests.rs"]
mod tests;
