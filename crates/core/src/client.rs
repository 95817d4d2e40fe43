use crate::config::AppConfig;
use crate::{ClientError, FileClient, TaskClient};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use transport::{CallOptions, Endpoint, HttpConfig, HttpTransport, Transport};

/// Entry point bundling the task and file clients over one transport.
#[derive(Clone)]
pub struct DedupClient {
    tasks: TaskClient,
    files: FileClient,
}

impl DedupClient {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ClientError> {
        let transport = HttpTransport::new(HttpConfig {
            base_url: cfg.server.base_url.clone(),
            connect_timeout: cfg.server.connect_timeout(),
        })?;
        let mut options = CallOptions::default();
        if let Some(timeout) = cfg.server.request_timeout() {
            options = options.with_timeout(timeout);
        }
        Ok(Self::with_transport(Arc::new(transport)).with_options(options))
    }

    pub fn with_transport(transport: Arc<dyn Transport>) -> Self {
        Self {
            tasks: TaskClient::new(transport.clone()),
            files: FileClient::new(transport),
        }
    }

    /// Same clients, same task store, with every call bounded by `options`.
    pub fn with_options(&self, options: CallOptions) -> Self {
        Self {
            tasks: self.tasks.with_options(options.clone()),
            files: self.files.with_options(options),
        }
    }

    pub fn options(&self) -> &CallOptions {
        self.tasks.options()
    }

    pub fn tasks(&self) -> &TaskClient {
        &self.tasks
    }

    pub fn files(&self) -> &FileClient {
        &self.files
    }
}

pub(crate) fn decode<T: DeserializeOwned>(endpoint: &Endpoint, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::Decode {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}
