//! In-memory stand-in for the dedup service.
//!
//! Mirrors the server's observable behavior: tasks are dropped once their
//! terminal status has been polled, deleted files live in a separate set,
//! and unknown ids answer 404.

#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use dedup_core::{DeletedFileRecord, FileDescriptor, SimilarityGroup, TaskResult, TaskStatus};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use transport::{
    bounded, CallOptions, CloseHandler, Endpoint, MessageHandler, Method, Params, StreamEnd,
    StreamHandle, Transport, TransportError,
};

pub fn descriptor(path: &str, size: u64) -> FileDescriptor {
    FileDescriptor {
        path: PathBuf::from(path),
        size,
        modified_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
    }
}

pub fn pending(progress: u8) -> TaskStatus {
    TaskStatus::Pending {
        progress: Some(progress),
    }
}

pub fn completed(groups: &[&[&str]]) -> TaskStatus {
    TaskStatus::Completed {
        result: TaskResult {
            groups: groups
                .iter()
                .map(|members| SimilarityGroup {
                    members: members.iter().map(|p| descriptor(p, 1024)).collect(),
                    distances: Vec::new(),
                })
                .collect(),
        },
    }
}

/// Body of a successful answer. Bulk restore is acknowledged in plain text.
enum Reply {
    Json(Value),
    Text(&'static str),
}

#[derive(Default)]
struct State {
    dirs: Vec<PathBuf>,
    files: BTreeMap<PathBuf, FileDescriptor>,
    deleted: BTreeMap<String, (DeletedFileRecord, FileDescriptor)>,
    script: Vec<TaskStatus>,
    tasks: HashMap<String, VecDeque<TaskStatus>>,
    raw_events: Option<Vec<Value>>,
    next_task: usize,
    next_deleted: usize,
    calls: Vec<String>,
    last_params: Option<Params>,
    streams_opened: usize,
    hold_streams: bool,
    delay: Option<Duration>,
    fail_restore_all: bool,
}

#[derive(Clone, Default)]
pub struct FakeService {
    state: Arc<Mutex<State>>,
}

impl FakeService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dir(self, dir: &str) -> Self {
        self.state.lock().unwrap().dirs.push(PathBuf::from(dir));
        self
    }

    pub fn with_file(self, path: &str, size: u64) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(PathBuf::from(path), descriptor(path, size));
        self
    }

    /// Statuses every newly submitted task will report, in order.
    pub fn with_script(self, script: Vec<TaskStatus>) -> Self {
        self.state.lock().unwrap().script = script;
        self
    }

    /// Replaces the statuses pushed on the next streams with raw payloads.
    pub fn with_raw_events(self, events: Vec<Value>) -> Self {
        self.state.lock().unwrap().raw_events = Some(events);
        self
    }

    /// Keeps streams open after their scripted events instead of ending them.
    pub fn holding_streams(self) -> Self {
        self.state.lock().unwrap().hold_streams = true;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().delay = Some(delay);
        self
    }

    pub fn failing_restore_all(self) -> Self {
        self.state.lock().unwrap().fail_restore_all = true;
        self
    }

    pub fn calls(&self, endpoint: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == endpoint)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.state.lock().unwrap().calls.len()
    }

    pub fn last_params(&self) -> Option<Params> {
        self.state.lock().unwrap().last_params.clone()
    }

    pub fn streams_opened(&self) -> usize {
        self.state.lock().unwrap().streams_opened
    }

    fn handle(&self, endpoint: &Endpoint, method: Method, params: &Params) -> Result<Reply, TransportError> {
        let mut st = self.state.lock().unwrap();
        let name = endpoint.to_string();
        st.calls.push(name.clone());
        st.last_params = Some(params.clone());
        let segments = endpoint.segments();

        match (segments.iter().map(String::as_str).collect::<Vec<_>>().as_slice(), method) {
            (["analyze"], Method::Submit) => {
                let path = PathBuf::from(params.get("path").unwrap_or_default());
                if !st.dirs.iter().any(|d| path.starts_with(d)) {
                    return Err(TransportError::http(400));
                }
                st.next_task += 1;
                let id = format!("t{}", st.next_task);
                let script = st.script.iter().cloned().collect();
                st.tasks.insert(id.clone(), script);
                Ok(Reply::Json(json!({ "taskId": id })))
            }
            (["poll"], Method::Read) => {
                let id = params.get("taskId").unwrap_or_default().to_string();
                let queue = st.tasks.get_mut(&id).ok_or_else(|| TransportError::http(404))?;
                let status = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                }
                .ok_or_else(|| TransportError::http(500))?;
                if status.is_terminal() {
                    st.tasks.remove(&id);
                }
                Ok(Reply::Json(serde_json::to_value(status).unwrap()))
            }
            (["list_folder"], Method::Read) => {
                let dir = PathBuf::from(params.get("path").unwrap_or_default());
                if !st.dirs.contains(&dir) {
                    return Err(TransportError::http(404));
                }
                let files: Vec<_> = st
                    .files
                    .values()
                    .filter(|f| f.path.starts_with(&dir))
                    .cloned()
                    .collect();
                Ok(Reply::Json(serde_json::to_value(files).unwrap()))
            }
            (["delete_file"], Method::Submit) => {
                let path = PathBuf::from(params.get("path").unwrap_or_default());
                let file = st.files.remove(&path).ok_or_else(|| TransportError::http(404))?;
                st.next_deleted += 1;
                let record = DeletedFileRecord {
                    id: format!("d{}", st.next_deleted),
                    original_path: path,
                    deleted_at: Some(Utc.timestamp_millis_opt(1_700_000_500_000).unwrap()),
                };
                st.deleted.insert(record.id.clone(), (record.clone(), file));
                Ok(Reply::Json(serde_json::to_value(record).unwrap()))
            }
            (["deleted"], Method::Read) => {
                let records: Vec<_> = st.deleted.values().map(|(r, _)| r.clone()).collect();
                Ok(Reply::Json(serde_json::to_value(records).unwrap()))
            }
            (["deleted", "restore_all"], Method::Submit) => {
                if st.fail_restore_all {
                    return Err(TransportError::http(500));
                }
                let all: Vec<_> = std::mem::take(&mut st.deleted).into_values().collect();
                for (record, file) in all {
                    st.files.insert(record.original_path, file);
                }
                Ok(Reply::Text("OK"))
            }
            (["deleted", id, "restore"], Method::Submit) => {
                let (record, file) = st
                    .deleted
                    .remove(*id)
                    .ok_or_else(|| TransportError::http(404))?;
                st.files.insert(record.original_path, file.clone());
                Ok(Reply::Json(serde_json::to_value(file).unwrap()))
            }
            (_, Method::Read) | (_, Method::Submit) if known(segments) => Err(TransportError::http(405)),
            _ => Err(TransportError::http(404)),
        }
    }
}

fn known(segments: &[String]) -> bool {
    matches!(
        segments.first().map(String::as_str),
        Some("analyze" | "poll" | "list_folder" | "delete_file" | "deleted")
    )
}

#[async_trait::async_trait]
impl Transport for FakeService {
    async fn request(
        &self,
        endpoint: &Endpoint,
        method: Method,
        params: &Params,
        options: &CallOptions,
    ) -> Result<Value, TransportError> {
        let delay = self.state.lock().unwrap().delay;
        bounded(options, async {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            match self.handle(endpoint, method, params)? {
                Reply::Json(value) => Ok(value),
                Reply::Text(text) => Err(TransportError::Decode(format!(
                    "expected JSON, got {:?}",
                    text
                ))),
            }
        })
        .await
    }

    async fn request_unit(
        &self,
        endpoint: &Endpoint,
        method: Method,
        params: &Params,
        options: &CallOptions,
    ) -> Result<(), TransportError> {
        let delay = self.state.lock().unwrap().delay;
        bounded(options, async {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            self.handle(endpoint, method, params).map(drop)
        })
        .await
    }

    fn open_stream(
        &self,
        endpoint: &Endpoint,
        params: &Params,
        options: &CallOptions,
        mut on_message: MessageHandler,
        on_close: CloseHandler,
    ) -> StreamHandle {
        let mut st = self.state.lock().unwrap();
        st.streams_opened += 1;
        st.calls.push(endpoint.to_string());
        let id = params.get("taskId").unwrap_or_default().to_string();
        let events: Option<Vec<Value>> = match st.raw_events.clone() {
            Some(raw) => Some(raw),
            None => st.tasks.get(&id).map(|queue| {
                queue
                    .iter()
                    .map(|s| serde_json::to_value(s).unwrap())
                    .collect()
            }),
        };
        let hold = st.hold_streams;
        drop(st);

        let pump = async move {
            let Some(events) = events else {
                return StreamEnd::Failed(TransportError::http(404));
            };
            for event in events {
                tokio::task::yield_now().await;
                match on_message(event) {
                    Ok(ControlFlow::Continue(())) => {}
                    Ok(ControlFlow::Break(())) => return StreamEnd::Stopped,
                    Err(e) => return StreamEnd::Failed(e),
                }
            }
            if hold {
                std::future::pending::<()>().await;
            }
            StreamEnd::Ended
        };
        StreamHandle::spawn(pump, options.cancel.clone(), on_close)
    }
}

pub fn paths(status: &TaskStatus) -> Vec<Vec<&Path>> {
    status
        .result()
        .map(|r| r.groups.iter().map(|g| g.paths().collect()).collect())
        .unwrap_or_default()
}
