//! Collaborator traits — blob storage and message queues.
//!
//! Every component is written against these traits so the transport can
//! be swapped without touching pipeline logic. Methods return boxed
//! futures so the traits stay object-safe and can be shared as
//! `Arc<dyn BlobStore>` / `Arc<dyn MessageQueue>`.
//!
//! # Queue semantics
//!
//! - At-least-once delivery; no ordering guarantee.
//! - `receive` leases messages for a visibility timeout. A leased message
//!   is hidden from other consumers until the lease expires, then becomes
//!   visible again with an incremented receive count.
//! - `ack` removes a message for good. Acking an already removed message
//!   is not an error.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::error::BackendResult;

/// Boxed, sendable future used by the collaborator traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Opaque token identifying one lease of one message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Receipt(pub String);

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed out by [`MessageQueue::receive`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub body: String,
    /// Token to pass to [`MessageQueue::ack`].
    pub receipt: Receipt,
    /// How many times this message has been leased, including this one.
    pub receive_count: u32,
}

/// Key-value store for binary payloads.
pub trait BlobStore: Send + Sync {
    /// Name of the bucket this handle addresses.
    fn bucket(&self) -> &str;

    /// Store `bytes` under `key`, replacing any previous value.
    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, BackendResult<()>>;

    /// Fetch the value under `key`. Missing keys are `BackendError::NotFound`.
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Vec<u8>>>;

    /// Remove `key`. Returns whether it existed.
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<bool>>;

    /// Remove every object in the bucket. Returns the number removed.
    fn purge(&self) -> BoxFuture<'_, BackendResult<u64>>;
}

/// Message channel with visibility-timeout leasing.
pub trait MessageQueue: Send + Sync {
    /// Name of the queue this handle addresses.
    fn name(&self) -> &str;

    /// Append a message.
    fn send<'a>(&'a self, body: &'a str) -> BoxFuture<'a, BackendResult<()>>;

    /// Lease up to `max` currently visible messages for `visibility`.
    /// Returns an empty vec when nothing is available.
    fn receive(
        &self,
        max: usize,
        visibility: Duration,
    ) -> BoxFuture<'_, BackendResult<Vec<ReceivedMessage>>>;

    /// Remove a leased message. Returns whether it was still present.
    fn ack<'a>(&'a self, receipt: &'a Receipt) -> BoxFuture<'a, BackendResult<bool>>;

    /// Approximate number of visible (not leased) messages.
    fn depth(&self) -> BoxFuture<'_, BackendResult<u64>>;

    /// Remove every message, leased or not. Returns the number removed.
    fn purge(&self) -> BoxFuture<'_, BackendResult<u64>>;
}
