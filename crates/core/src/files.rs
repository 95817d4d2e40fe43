//! Directory listing and the soft-delete/restore lifecycle.

use crate::client::decode;
use crate::{ClientError, DeletedFileRecord, FileDescriptor};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use transport::{CallOptions, Endpoint, Method, Params, Transport};

const LIST_FOLDER: &str = "list_folder";
const DELETE_FILE: &str = "delete_file";
const DELETED: &str = "deleted";

/// Stateless client for file operations. Nothing is cached; listings are
/// snapshots and must be fetched again to observe later changes.
#[derive(Clone)]
pub struct FileClient {
    transport: Arc<dyn Transport>,
    options: CallOptions,
}

fn non_empty_path(path: &Path) -> Result<String, ClientError> {
    if path.as_os_str().is_empty() {
        return Err(ClientError::InvalidRequest("path is empty".into()));
    }
    Ok(path.to_string_lossy().into_owned())
}

impl FileClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            options: CallOptions::default(),
        }
    }

    pub fn with_options(&self, options: CallOptions) -> Self {
        Self {
            transport: self.transport.clone(),
            options,
        }
    }

    pub async fn list_dir(&self, path: &Path) -> Result<Vec<FileDescriptor>, ClientError> {
        let endpoint = Endpoint::new(LIST_FOLDER);
        let params = Params::new().with("path", non_empty_path(path)?);
        let value = self
            .transport
            .request(&endpoint, Method::Read, &params, &self.options)
            .await?;
        decode(&endpoint, value)
    }

    /// Moves a file into the deleted set.
    pub async fn delete_file(&self, path: &Path) -> Result<DeletedFileRecord, ClientError> {
        let endpoint = Endpoint::new(DELETE_FILE);
        let params = Params::new().with("path", non_empty_path(path)?);
        let value = self
            .transport
            .request(&endpoint, Method::Submit, &params, &self.options)
            .await?;
        let record: DeletedFileRecord = decode(&endpoint, value)?;
        info!(id = %record.id, path = %record.original_path.display(), "file deleted");
        Ok(record)
    }

    pub async fn restore_file(&self, id: &str) -> Result<FileDescriptor, ClientError> {
        if id.is_empty() {
            return Err(ClientError::InvalidRequest("deleted file id is empty".into()));
        }
        let endpoint = Endpoint::new(DELETED).segment(id).segment("restore");
        let value = self
            .transport
            .request(&endpoint, Method::Submit, &Params::new(), &self.options)
            .await?;
        let file: FileDescriptor = decode(&endpoint, value)?;
        info!(id, path = %file.path.display(), "file restored");
        Ok(file)
    }

    /// Restores every deleted file as a single call. A failure is reported
    /// as one error; which files were restored before it is not known, so
    /// callers should list the deleted set again.
    pub async fn restore_all(&self) -> Result<(), ClientError> {
        let endpoint = Endpoint::new(DELETED).segment("restore_all");
        self.transport
            .request_unit(&endpoint, Method::Submit, &Params::new(), &self.options)
            .await?;
        info!("all deleted files restored");
        Ok(())
    }

    pub async fn list_deleted(&self) -> Result<Vec<DeletedFileRecord>, ClientError> {
        let endpoint = Endpoint::new(DELETED);
        let value = self
            .transport
            .request(&endpoint, Method::Read, &Params::new(), &self.options)
            .await?;
        decode(&endpoint, value)
    }
}
