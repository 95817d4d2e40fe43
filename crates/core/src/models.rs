use crate::ClientError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use transport::Params;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// Mean hash.
    AHash,
    /// Mean hash over a DCT of the image.
    PHash,
    /// Gradient hash.
    DHash,
}

impl HashAlgorithm {
    pub fn as_wire(&self) -> &'static str {
        match self {
            HashAlgorithm::AHash => "AHash",
            HashAlgorithm::PHash => "PHash",
            HashAlgorithm::DHash => "DHash",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire().to_lowercase())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ahash" => Ok(HashAlgorithm::AHash),
            "phash" => Ok(HashAlgorithm::PHash),
            "dhash" => Ok(HashAlgorithm::DHash),
            other => Err(ClientError::InvalidRequest(format!(
                "unknown hash algorithm {:?} (expected ahash, phash or dhash)",
                other
            ))),
        }
    }
}

/// Parameters of one analysis run. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    path: PathBuf,
    distance: u32,
    hash_algorithm: HashAlgorithm,
    hash_size: u32,
}

impl AnalysisRequest {
    pub fn new(
        path: impl Into<PathBuf>,
        distance: u32,
        hash_algorithm: HashAlgorithm,
        hash_size: u32,
    ) -> Result<Self, ClientError> {
        let path = path.into();
        if path.as_os_str().is_empty() {
            return Err(ClientError::InvalidRequest("analysis path is empty".into()));
        }
        if hash_size == 0 {
            return Err(ClientError::InvalidRequest(
                "hash size must be positive".into(),
            ));
        }
        Ok(Self {
            path,
            distance,
            hash_algorithm,
            hash_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Maximum hash distance for two images to count as similar.
    pub fn distance(&self) -> u32 {
        self.distance
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.hash_algorithm
    }

    pub fn hash_size(&self) -> u32 {
        self.hash_size
    }

    pub(crate) fn params(&self) -> Params {
        Params::new()
            .with("path", self.path.to_string_lossy())
            .with("dist", self.distance)
            .with("hashType", self.hash_algorithm.as_wire())
            .with("hashSize", self.hash_size)
    }
}

/// Key for one submitted task. Only `TaskClient` hands these out.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskHandle {
    task_id: String,
    created_at: DateTime<Utc>,
}

impl TaskHandle {
    pub(crate) fn new(task_id: String) -> Self {
        Self {
            task_id,
            created_at: Utc::now(),
        }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub path: PathBuf,
    pub size: u64,
    #[serde(
        rename = "date",
        alias = "modifiedAt",
        with = "chrono::serde::ts_milliseconds"
    )]
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeletedFileRecord {
    pub id: String,
    #[serde(rename = "path", alias = "originalPath")]
    pub original_path: PathBuf,
    #[serde(
        rename = "deletedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Distance between two members of a group, by index into `members`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairDistance {
    pub a: usize,
    pub b: usize,
    pub distance: u32,
}

/// Files judged similar to each other. Members are always full file
/// descriptors (`{path, size, date}`); a group listing bare paths does not
/// decode, since size and date cannot be made up.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "GroupRepr")]
pub struct SimilarityGroup {
    pub members: Vec<FileDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub distances: Vec<PairDistance>,
}

// Groups arrive either as a bare list of files or with per-pair distances.
#[derive(Deserialize)]
#[serde(untagged)]
enum GroupRepr {
    Members(Vec<FileDescriptor>),
    Detailed {
        members: Vec<FileDescriptor>,
        #[serde(default)]
        distances: Vec<PairDistance>,
    },
}

impl From<GroupRepr> for SimilarityGroup {
    fn from(repr: GroupRepr) -> Self {
        match repr {
            GroupRepr::Members(members) => SimilarityGroup {
                members,
                distances: Vec::new(),
            },
            GroupRepr::Detailed { members, distances } => SimilarityGroup { members, distances },
        }
    }
}

impl SimilarityGroup {
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.members.iter().map(|m| m.path.as_path())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskResult {
    pub groups: Vec<SimilarityGroup>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TaskStatus {
    Pending {
        /// Percent of files processed, when the server reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        progress: Option<u8>,
    },
    Completed {
        result: TaskResult,
    },
    Failed {
        reason: String,
    },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Pending { .. })
    }

    pub fn result(&self) -> Option<&TaskResult> {
        match self {
            TaskStatus::Completed { result } => Some(result),
            _ => None,
        }
    }
}
