//! Handles to pending loads.
//!
//! A handle is the executor's suspension point: it is returned immediately by
//! a request and resolves when the batch holding the request is flushed.
//! Handles for the same identity in the same tick share one channel, so
//! cloning a handle never triggers another load.

use std::fmt;

use tokio::sync::watch;

use crate::connection::Connection;
use crate::error::{LoadError, LoadResult};
use crate::record::RelationValue;

/// Lifecycle of one request.
///
/// `Requested -> Batched -> Fetching -> Fulfilled | Failed`
#[derive(Debug, Clone)]
pub enum LoadState<T> {
    /// Queued for the next flush.
    Requested,
    /// Drained into a batch by a flush.
    Batched,
    /// Storage call in flight.
    Fetching,
    /// Loaded.
    Fulfilled(T),
    /// The batch failed.
    Failed(LoadError),
}

impl<T> LoadState<T> {
    /// Check if the state is final.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled(_) | Self::Failed(_))
    }

    /// Short name of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Batched => "batched",
            Self::Fetching => "fetching",
            Self::Fulfilled(_) => "fulfilled",
            Self::Failed(_) => "failed",
        }
    }
}

/// Handle to a value produced by a flush.
#[derive(Clone)]
pub struct Handle<T> {
    rx: watch::Receiver<LoadState<T>>,
}

/// Handle to an association load.
pub type LoadHandle = Handle<RelationValue>;

/// Handle to a connection load.
pub type ConnectionHandle = Handle<Connection>;

impl<T: Clone> Handle<T> {
    /// Create a handle and the sender that resolves it.
    pub(crate) fn channel() -> (watch::Sender<LoadState<T>>, Self) {
        let (tx, rx) = watch::channel(LoadState::Requested);
        (tx, Self { rx })
    }

    /// Create a handle that is already fulfilled.
    pub(crate) fn ready(value: T) -> Self {
        let (_tx, rx) = watch::channel(LoadState::Fulfilled(value));
        Self { rx }
    }

    /// Current state.
    pub fn state(&self) -> LoadState<T> {
        self.rx.borrow().clone()
    }

    /// Check if the handle has resolved, successfully or not.
    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_terminal()
    }

    /// Value if fulfilled.
    pub fn try_get(&self) -> Option<LoadResult<T>> {
        match &*self.rx.borrow() {
            LoadState::Fulfilled(value) => Some(Ok(value.clone())),
            LoadState::Failed(err) => Some(Err(err.clone())),
            _ => None,
        }
    }

    /// Wait for the flush that resolves this handle.
    ///
    /// Fails with `Cancelled` if the loader is dropped first.
    pub async fn wait(mut self) -> LoadResult<T> {
        let state = self
            .rx
            .wait_for(LoadState::is_terminal)
            .await
            .map_err(|_| LoadError::Cancelled)?;
        match &*state {
            LoadState::Fulfilled(value) => Ok(value.clone()),
            LoadState::Failed(err) => Err(err.clone()),
            other => Err(LoadError::internal(format!(
                "handle woke in state `{}`",
                other.name()
            ))),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("state", &self.rx.borrow().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[tokio::test]
    async fn test_handle_resolves() {
        let (tx, handle) = LoadHandle::channel();
        assert_eq!(handle.state().name(), "requested");
        assert!(handle.try_get().is_none());

        let author = Record::new("Author", 1).into_ref();
        tx.send_replace(LoadState::Fulfilled(RelationValue::One(Some(author))));

        assert!(handle.is_ready());
        let value = handle.clone().wait().await.unwrap();
        assert_eq!(value.len(), 1);
    }

    #[tokio::test]
    async fn test_handle_failure_is_shared() {
        let (tx, handle) = LoadHandle::channel();
        let other = handle.clone();
        tx.send_replace(LoadState::Failed(LoadError::storage("gone")));

        assert!(handle.wait().await.unwrap_err().is_storage());
        assert!(other.wait().await.unwrap_err().is_storage());
    }

    #[tokio::test]
    async fn test_dropped_sender_cancels() {
        let (tx, handle) = LoadHandle::channel();
        tx.send_replace(LoadState::Batched);
        drop(tx);
        assert_eq!(handle.wait().await.unwrap_err(), LoadError::Cancelled);
    }

    #[tokio::test]
    async fn test_ready_handle_survives_without_sender() {
        let handle = LoadHandle::ready(RelationValue::Many(Vec::new()));
        assert!(handle.wait().await.unwrap().is_empty());
    }
}
