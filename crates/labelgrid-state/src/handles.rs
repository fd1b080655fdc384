//! Named bucket and queue handles implementing the core collaborator traits.

use std::time::Duration;

use labelgrid_core::{
    BackendError, BackendResult, BlobStore, BoxFuture, MessageQueue, Receipt, ReceivedMessage,
};

use crate::store::{QueueStats, StateStore};

/// A blob bucket inside a [`StateStore`].
#[derive(Clone)]
pub struct Bucket {
    store: StateStore,
    name: String,
}

impl Bucket {
    pub(crate) fn new(store: StateStore, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    /// Keys currently stored in the bucket.
    pub fn keys(&self) -> BackendResult<Vec<String>> {
        Ok(self.store.list_blob_keys(&self.name)?)
    }
}

impl BlobStore for Bucket {
    fn bucket(&self) -> &str {
        &self.name
    }

    fn put<'a>(&'a self, key: &'a str, bytes: Vec<u8>) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.store
                .put_blob(&self.name, key, &bytes)
                .map_err(BackendError::from)
        })
    }

    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<Vec<u8>>> {
        Box::pin(async move {
            self.store
                .get_blob(&self.name, key)
                .map_err(BackendError::from)?
                .ok_or_else(|| BackendError::NotFound {
                    bucket: self.name.clone(),
                    key: key.to_string(),
                })
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, BackendResult<bool>> {
        Box::pin(async move { self.store.delete_blob(&self.name, key).map_err(BackendError::from) })
    }

    fn purge(&self) -> BoxFuture<'_, BackendResult<u64>> {
        Box::pin(async move { self.store.purge_bucket(&self.name).map_err(BackendError::from) })
    }
}

/// A message queue inside a [`StateStore`].
#[derive(Clone)]
pub struct Queue {
    store: StateStore,
    name: String,
}

impl Queue {
    pub(crate) fn new(store: StateStore, name: &str) -> Self {
        Self {
            store,
            name: name.to_string(),
        }
    }

    /// Visible and in-flight message counts.
    pub fn stats(&self) -> BackendResult<QueueStats> {
        Ok(self.store.queue_stats(&self.name)?)
    }
}

impl MessageQueue for Queue {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, body: &'a str) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            self.store
                .enqueue(&self.name, body)
                .map(|_| ())
                .map_err(BackendError::from)
        })
    }

    fn receive(
        &self,
        max: usize,
        visibility: Duration,
    ) -> BoxFuture<'_, BackendResult<Vec<ReceivedMessage>>> {
        Box::pin(async move {
            self.store
                .lease(&self.name, max, visibility)
                .map_err(BackendError::from)
        })
    }

    fn ack<'a>(&'a self, receipt: &'a Receipt) -> BoxFuture<'a, BackendResult<bool>> {
        Box::pin(async move { self.store.ack(&self.name, &receipt.0).map_err(BackendError::from) })
    }

    fn depth(&self) -> BoxFuture<'_, BackendResult<u64>> {
        Box::pin(async move {
            self.store
                .queue_stats(&self.name)
                .map(|stats| stats.visible)
                .map_err(BackendError::from)
        })
    }

    fn purge(&self) -> BoxFuture<'_, BackendResult<u64>> {
        Box::pin(async move { self.store.purge_queue(&self.name).map_err(BackendError::from) })
    }
}
