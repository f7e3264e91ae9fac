use ordermgt_core::{Error, Result};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tonic::Status;

/// Sending half of a gRPC response stream.
///
/// Every send is raced against the service shutdown token, so a client that
/// stops reading cannot hold a stream task past shutdown. Clones share the
/// channel, the token and the count of delivered messages.
pub struct ResponseSink<T> {
    tx: mpsc::Sender<core::result::Result<T, Status>>,
    cancel: CancellationToken,
    sent: Arc<AtomicUsize>,
}

impl<T> Clone for ResponseSink<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            cancel: self.cancel.clone(),
            sent: Arc::clone(&self.sent),
        }
    }
}

impl<T: Send> ResponseSink<T> {
    pub fn new(tx: mpsc::Sender<core::result::Result<T, Status>>, cancel: CancellationToken) -> Self {
        Self {
            tx,
            cancel,
            sent: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Waits for room in the channel and hands `item` to the client.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] if shutdown cancels the wait.
    /// - [`Error::ChannelError`] if the client has gone away.
    pub async fn send(&self, item: T) -> Result<()> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Err(Error::ServiceShutdown),
            res = self.tx.send(Ok(item)) => {
                res.map_err(|e| Error::ChannelError {
                    context: format!("Failed to forward response: {e}"),
                })?;
                self.sent.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    /// Ends the stream with `status`, best effort.
    ///
    /// Once shutdown has begun the status is only delivered if the channel
    /// has room right away.
    pub async fn fail(&self, status: Status) {
        let delivered = tokio::select! {
            biased;
            () = self.cancel.cancelled() => self.tx.try_send(Err(status.clone())).is_ok(),
            res = self.tx.send(Err(status.clone())) => res.is_ok(),
        };
        if !delivered {
            tracing::debug!(code = ?status.code(), "Terminal status not delivered");
        }
    }

    /// Resolves once the client has dropped the response stream.
    pub async fn closed(&self) {
        self.tx.closed().await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once shutdown cancels in-flight streams.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Messages delivered so far, across all clones.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::time::Duration;
    use tokio::time::timeout;
    use tonic::Code;

    #[tokio::test]
    async fn counts_across_clones() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ResponseSink::new(tx, CancellationToken::new());
        let other = sink.clone();

        sink.send(1).await.unwrap();
        other.send(2).await.unwrap();

        assert_eq!(sink.sent(), 2);
        assert_eq!(rx.recv().await.unwrap().unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().unwrap(), 2);
    }

    #[tokio::test]
    async fn shutdown_releases_a_send_blocked_on_a_full_channel() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = ResponseSink::new(tx, cancel.clone());
        sink.send(1).await.unwrap();

        let blocked = tokio::spawn({
            let sink = sink.clone();
            async move { sink.send(2).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        cancel.cancel();
        let res = timeout(Duration::from_millis(500), blocked).await.unwrap();
        assert_eq!(res.unwrap(), Err(Error::ServiceShutdown));
        assert_eq!(sink.sent(), 1);
    }

    #[tokio::test]
    async fn fail_gives_up_on_a_full_channel_after_shutdown() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let sink = ResponseSink::new(tx, cancel.clone());
        sink.send(1).await.unwrap();
        cancel.cancel();

        timeout(Duration::from_millis(500), sink.fail(Status::unavailable("bye")))
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().unwrap(), 1);
        drop(sink);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn fail_delivers_the_status_when_there_is_room() {
        let (tx, mut rx) = mpsc::channel::<core::result::Result<u32, Status>>(1);
        let sink = ResponseSink::new(tx, CancellationToken::new());
        sink.fail(Status::not_found("gone")).await;

        let status = rx.recv().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::NotFound);
        assert_eq!(sink.sent(), 0);
    }

    #[tokio::test]
    async fn reports_a_departed_client() {
        let (tx, rx) = mpsc::channel(1);
        let sink = ResponseSink::new(tx, CancellationToken::new());
        drop(rx);

        assert!(sink.is_closed());
        assert!(matches!(sink.send(1).await, Err(Error::ChannelError { .. })));
    }
}
