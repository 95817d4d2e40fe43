//! Client library for the image-dedup service: analysis tasks, their
//! status tracking, and the soft-delete/restore workflow.

pub mod client;
pub mod config;
pub mod error;
pub mod files;
pub mod models;
pub mod store;
pub mod tasks;

pub use client::DedupClient;
pub use error::ClientError;
pub use files::FileClient;
pub use models::{
    AnalysisRequest, DeletedFileRecord, FileDescriptor, HashAlgorithm, PairDistance,
    SimilarityGroup, TaskHandle, TaskResult, TaskStatus,
};
pub use tasks::{Subscription, SubscriptionEnd, TaskClient};
