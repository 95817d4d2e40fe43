//! Analysis task submission and status tracking.
//!
//! A task's status can be pulled with [`TaskClient::poll`] or pushed with
//! [`TaskClient::subscribe`]. Both record what they see in one
//! [`TaskStore`], so a task that one channel has seen terminate looks
//! terminated to the other as well.

use crate::client::decode;
use crate::store::{TaskState, TaskStore};
use crate::{AnalysisRequest, ClientError, TaskHandle, TaskStatus};
use serde::Deserialize;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};
use transport::{
    CallOptions, CloseHandler, Endpoint, MessageHandler, Method, Params, StreamEnd, StreamHandle,
    Transport, TransportError,
};

const ANALYZE: &str = "analyze";
const POLL: &str = "poll";
const SUBSCRIBE: &str = "subscribe";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Submitted {
    task_id: String,
}

/// How a subscription ended. Reported exactly once per subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// A terminal status was delivered.
    Completed,
    /// Closed by the caller or by cancellation.
    Closed,
    /// The server ended the stream before the task terminated.
    Disconnected,
    Failed(ClientError),
}

/// A live push channel for one task. Dropping it closes the channel.
#[derive(Debug)]
pub struct Subscription {
    task_id: String,
    stream: StreamHandle,
}

impl Subscription {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn is_active(&self) -> bool {
        !self.stream.is_finished()
    }

    /// Waits until the subscription has ended and its close callback ran.
    pub async fn wait(&mut self) {
        self.stream.wait().await
    }

    pub fn close(self) {
        self.stream.close()
    }
}

/// Submits and tracks analysis tasks.
///
/// Tracked tasks are kept after they terminate so that their final status
/// stays available once the server has dropped it. Nothing is evicted on its
/// own: a long-lived client should call [`TaskClient::forget`] once it has
/// consumed a terminal result.
#[derive(Clone)]
pub struct TaskClient {
    transport: Arc<dyn Transport>,
    store: TaskStore,
    options: CallOptions,
}

impl TaskClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            store: TaskStore::new(),
            options: CallOptions::default(),
        }
    }

    /// A client sharing this one's transport and tracked tasks whose calls
    /// are bounded by `options`.
    pub fn with_options(&self, options: CallOptions) -> Self {
        Self {
            transport: self.transport.clone(),
            store: self.store.clone(),
            options,
        }
    }

    pub fn options(&self) -> &CallOptions {
        &self.options
    }

    /// Starts an analysis run. Returns as soon as the server has accepted it.
    pub async fn submit(&self, request: &AnalysisRequest) -> Result<TaskHandle, ClientError> {
        let endpoint = Endpoint::new(ANALYZE);
        let value = self
            .transport
            .request(&endpoint, Method::Submit, &request.params(), &self.options)
            .await?;
        let Submitted { task_id } = decode(&endpoint, value)?;
        if task_id.is_empty() {
            return Err(ClientError::Decode {
                endpoint: endpoint.to_string(),
                reason: "empty task id".into(),
            });
        }
        if !self.store.insert(&task_id) {
            // the server hands out the same id for an identical running request
            debug!(task_id = %task_id, "joined already tracked task");
        }
        info!(
            task_id = %task_id,
            path = %request.path().display(),
            hash = %request.hash_algorithm(),
            "analysis submitted"
        );
        Ok(TaskHandle::new(task_id))
    }

    /// Resumes tracking a task id obtained elsewhere, e.g. by an earlier process.
    pub fn track(&self, task_id: &str) -> Result<TaskHandle, ClientError> {
        let task_id = task_id.trim();
        if task_id.is_empty() {
            return Err(ClientError::InvalidRequest("task id is empty".into()));
        }
        self.store.insert(task_id);
        Ok(TaskHandle::new(task_id.to_string()))
    }

    /// Stops tracking a task and releases its stored status. This is the
    /// expected cleanup after a terminal result has been consumed. Later
    /// calls with its handle fail with `UnknownTask`, and an open
    /// subscription stops at its next event.
    pub fn forget(&self, handle: &TaskHandle) -> bool {
        self.store.remove(handle.task_id())
    }

    /// Number of tasks currently tracked, finished ones included.
    pub fn tracked(&self) -> usize {
        self.store.len()
    }

    /// Last status seen by either channel, without a network call.
    pub fn last_status(&self, handle: &TaskHandle) -> Result<TaskState, ClientError> {
        self.store.get(handle.task_id())
    }

    /// Listener over the same state `last_status` reads.
    pub fn watch(&self, handle: &TaskHandle) -> Result<watch::Receiver<TaskState>, ClientError> {
        self.store.watch(handle.task_id())
    }

    /// Asks the server for the task's status once. Once a terminal status has
    /// been seen it is returned again without contacting the server.
    pub async fn poll(&self, handle: &TaskHandle) -> Result<TaskStatus, ClientError> {
        let task_id = handle.task_id();
        if let Some(done) = self.store.terminal(task_id)? {
            return Ok(done);
        }
        let endpoint = Endpoint::new(POLL);
        let value = self
            .transport
            .request(
                &endpoint,
                Method::Read,
                &Params::new().with("taskId", task_id),
                &self.options,
            )
            .await?;
        let status: TaskStatus = decode(&endpoint, value)?;
        self.store.record(task_id, status)
    }

    /// Opens a push channel for the task. `on_update` receives every status
    /// in arrival order; the channel closes itself after a terminal one.
    /// `on_closed` always runs once when the channel stops.
    pub fn subscribe<F, C>(
        &self,
        handle: &TaskHandle,
        on_update: F,
        on_closed: C,
    ) -> Result<Subscription, ClientError>
    where
        F: FnMut(TaskStatus) + Send + 'static,
        C: FnOnce(SubscriptionEnd) + Send + 'static,
    {
        let task_id = handle.task_id().to_string();
        let finished = self.store.terminal(&task_id)?;
        let mut on_update = on_update;

        let store = self.store.clone();
        let id = task_id.clone();
        let on_close: CloseHandler = Box::new(move |end| {
            let end = match end {
                StreamEnd::Stopped => match store.terminal(&id) {
                    Ok(Some(_)) => SubscriptionEnd::Completed,
                    _ => SubscriptionEnd::Closed,
                },
                StreamEnd::Closed => SubscriptionEnd::Closed,
                StreamEnd::Ended => SubscriptionEnd::Disconnected,
                StreamEnd::Failed(e) => SubscriptionEnd::Failed(e.into()),
            };
            debug!(task_id = %id, end = ?end, "subscription ended");
            on_closed(end)
        });

        if let Some(done) = finished {
            let replay = async move {
                on_update(done);
                StreamEnd::Stopped
            };
            let stream = StreamHandle::spawn(replay, None, on_close);
            return Ok(Subscription { task_id, stream });
        }

        let store = self.store.clone();
        let id = task_id.clone();
        let on_message: MessageHandler = Box::new(move |value| {
            let status: TaskStatus =
                serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()))?;
            let view = match store.record(&id, status) {
                Ok(view) => view,
                Err(_) => {
                    debug!(task_id = %id, "task no longer tracked, stopping");
                    return Ok(ControlFlow::Break(()));
                }
            };
            let terminal = view.is_terminal();
            on_update(view);
            Ok(if terminal {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        });

        let stream = self.transport.open_stream(
            &Endpoint::new(SUBSCRIBE),
            &Params::new().with("taskId", &task_id),
            &self.options,
            on_message,
            on_close,
        );
        Ok(Subscription { task_id, stream })
    }
}
