//! Best-effort login audit trail.
//!
//! Entries go through a bounded channel to a background writer. A full
//! channel drops the entry with a warning; request latency never depends on
//! the audit store.

use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::store::IamStore;
use crate::models::LoginActivity;

#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<LoginActivity>,
}

impl AuditSink {
    /// Start the writer task. It exits once every sink clone is dropped and
    /// the queue is drained.
    pub fn spawn(store: Arc<dyn IamStore>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<LoginActivity>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(activity) = rx.recv().await {
                if let Err(e) = store.insert_login_activity(&activity).await {
                    tracing::error!(
                        error = %e,
                        username = %activity.username,
                        status = %activity.status_code,
                        "Failed to persist login activity"
                    );
                }
            }
            tracing::debug!("Audit writer stopped");
        });

        (Self { tx }, handle)
    }

    pub fn record(&self, activity: LoginActivity) {
        match self.tx.try_send(activity) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    username = %dropped.username,
                    status = %dropped.status_code,
                    "Audit queue full, dropping login activity"
                );
            }
            Err(TrySendError::Closed(dropped)) => {
                tracing::warn!(
                    username = %dropped.username,
                    "Audit writer gone, dropping login activity"
                );
            }
        }
    }
}
