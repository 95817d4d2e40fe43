use crate::{CancelToken, CloseHandler, TransportError};
use std::future::Future;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Why a stream stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// Closed by the caller, by dropping the handle or by cancellation.
    Closed,
    /// The message handler asked to stop.
    Stopped,
    /// The server ended the stream.
    Ended,
    Failed(TransportError),
}

/// Owned handle to a running stream. Dropping it closes the stream.
#[derive(Debug)]
pub struct StreamHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    joined: bool,
}

impl StreamHandle {
    /// Drives `pump` on a new task until it finishes, the handle is closed or
    /// `cancel` fires, then reports the outcome to `on_close`.
    pub fn spawn<F>(pump: F, cancel: Option<CancelToken>, on_close: CloseHandler) -> Self
    where
        F: Future<Output = StreamEnd> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let cancelled = async {
                match cancel {
                    Some(token) => token.cancelled().await,
                    None => futures::future::pending::<()>().await,
                }
            };
            let end = tokio::select! {
                end = pump => end,
                _ = shutdown_rx => StreamEnd::Closed,
                _ = cancelled => StreamEnd::Closed,
            };
            on_close(end);
        });
        Self {
            shutdown: Some(shutdown_tx),
            task,
            joined: false,
        }
    }

    pub fn close(mut self) {
        self.shutdown_now();
    }

    pub fn is_finished(&self) -> bool {
        self.joined || self.task.is_finished()
    }

    /// Waits until the stream has stopped and its close handler has run.
    pub async fn wait(&mut self) {
        if self.joined {
            return;
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "stream task aborted");
        }
        self.joined = true;
    }

    fn shutdown_now(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.shutdown_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    fn recorder() -> (Arc<Mutex<Vec<StreamEnd>>>, CloseHandler) {
        let ends = Arc::new(Mutex::new(Vec::new()));
        let sink = ends.clone();
        (ends, Box::new(move |end| sink.lock().unwrap().push(end)))
    }

    #[tokio::test]
    async fn reports_pump_outcome_once() {
        let (ends, on_close) = recorder();
        let mut handle = StreamHandle::spawn(async { StreamEnd::Ended }, None, on_close);
        handle.wait().await;
        handle.wait().await;
        assert!(handle.is_finished());
        assert_eq!(*ends.lock().unwrap(), vec![StreamEnd::Ended]);
    }

    #[tokio::test]
    async fn close_interrupts_pending_pump() {
        let (ends, on_close) = recorder();
        let handle = StreamHandle::spawn(futures::future::pending(), None, on_close);
        handle.close();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*ends.lock().unwrap(), vec![StreamEnd::Closed]);
    }

    #[tokio::test]
    async fn cancel_token_closes_stream() {
        let (ends, on_close) = recorder();
        let token = CancelToken::new();
        let mut handle =
            StreamHandle::spawn(futures::future::pending(), Some(token.clone()), on_close);
        token.cancel();
        handle.wait().await;
        assert_eq!(*ends.lock().unwrap(), vec![StreamEnd::Closed]);
    }
}
