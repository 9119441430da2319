use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

/// Outcome of a receive on a [`SharedReceiver`].
#[derive(Debug)]
pub enum Recv<T> {
    Item(T),
    Closed,
    Cancelled,
}

/// Bounded queue receiver shared by every worker of a pool.
///
/// The lock is held only while waiting for a single item.
pub struct SharedReceiver<T> {
    inner: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for SharedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> SharedReceiver<T> {
    pub fn new(rx: mpsc::Receiver<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(rx)),
        }
    }

    pub async fn recv(&self, cancel: &CancellationToken) -> Recv<T> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Recv::Cancelled,
            item = async { self.inner.lock().await.recv().await } => match item {
                Some(item) => Recv::Item(item),
                None => Recv::Closed,
            },
        }
    }

    /// Read and discard until the queue is closed, so upstream senders never block.
    ///
    /// Returns the number of discarded items.
    pub async fn drain(&self, cancel: &CancellationToken) -> usize {
        let mut discarded = 0;
        while let Recv::Item(_) = self.recv(cancel).await {
            discarded += 1;
        }
        discarded
    }
}
