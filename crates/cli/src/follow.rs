//! Waiting for a task to finish, by polling or by subscription.

use anyhow::{anyhow, bail, Result};
use dedup_core::{ClientError, SubscriptionEnd, TaskClient, TaskHandle, TaskStatus};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use transport::TransportError;

/// Polls every `interval` until the task reaches a terminal status.
/// `on_status` sees every polled status, the terminal one included.
pub async fn poll_until_done<F>(
    tasks: &TaskClient,
    handle: &TaskHandle,
    interval: Duration,
    mut on_status: F,
) -> Result<TaskStatus, ClientError>
where
    F: FnMut(&TaskStatus),
{
    loop {
        let status = tasks.poll(handle).await?;
        on_status(&status);
        if status.is_terminal() {
            return Ok(status);
        }
        debug!(task_id = handle.task_id(), ?interval, "task pending, sleeping");
        match &tasks.options().cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => return Err(TransportError::Cancelled.into()),
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            None => tokio::time::sleep(interval).await,
        }
    }
}

/// Subscribes to the task and returns its terminal status. Any other way
/// the subscription can end is an error.
pub async fn follow_until_done<F>(
    tasks: &TaskClient,
    handle: &TaskHandle,
    mut on_status: F,
) -> Result<TaskStatus>
where
    F: FnMut(&TaskStatus),
{
    let (tx, mut updates) = mpsc::unbounded_channel();
    let (end_tx, mut end_rx) = oneshot::channel();
    let _subscription = tasks.subscribe(
        handle,
        move |status| {
            let _ = tx.send(status);
        },
        move |end| {
            let _ = end_tx.send(end);
        },
    )?;

    let mut last = None;
    let end = loop {
        tokio::select! {
            Some(status) = updates.recv() => {
                on_status(&status);
                last = Some(status);
            }
            end = &mut end_rx => break end,
        }
    };
    // updates are sent before the end is reported
    while let Ok(status) = updates.try_recv() {
        on_status(&status);
        last = Some(status);
    }

    match end.map_err(|_| anyhow!("subscription dropped without reporting its end"))? {
        SubscriptionEnd::Completed => {
            last.ok_or_else(|| anyhow!("subscription completed without a status"))
        }
        SubscriptionEnd::Closed => bail!("subscription for {} was closed", handle),
        SubscriptionEnd::Disconnected => {
            bail!("server ended the stream before {} finished", handle)
        }
        SubscriptionEnd::Failed(e) => Err(e.into()),
    }
}
