//! Dedicated worker thread for workbook I/O
//!
//! The worker owns the [`RepositoryFacade`] and a current-thread runtime.
//! Requests are handled strictly one after another; a slow command delays
//! everything queued behind it. Progress events carry no request id.

pub mod commands;

use std::thread;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

pub use commands::{Command, SheetData};

use crate::repository::RepositoryFacade;

/// A command tagged with its correlation id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    #[serde(flatten)]
    pub command: Command,
}

/// Messages coming back from the worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WorkerEvent {
    Response {
        id: u64,
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Progress {
        percent: u8,
        stage: String,
    },
}

impl WorkerEvent {
    fn success(id: u64, result: Value) -> Self {
        WorkerEvent::Response {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    fn failure(id: u64, error: String) -> Self {
        WorkerEvent::Response {
            id,
            ok: false,
            result: None,
            error: Some(error),
        }
    }

    fn progress(percent: u8, stage: &str) -> Self {
        WorkerEvent::Progress {
            percent: percent.min(100),
            stage: stage.to_string(),
        }
    }
}

pub struct Worker;

impl Worker {
    /// Start the worker thread. The facade is built by the caller and moved in.
    pub fn spawn(facade: RepositoryFacade) -> Result<WorkerHandle> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to build worker runtime")?;

        let thread = thread::Builder::new()
            .name("stationdesk-worker".to_string())
            .spawn(move || runtime.block_on(serve(facade, request_rx, event_tx)))
            .context("Failed to start worker thread")?;

        Ok(WorkerHandle {
            requests: request_tx,
            events: event_rx,
            next_id: 1,
            thread: Some(thread),
        })
    }
}

async fn serve(
    facade: RepositoryFacade,
    mut requests: mpsc::UnboundedReceiver<Request>,
    events: mpsc::UnboundedSender<WorkerEvent>,
) {
    let _ = events.send(WorkerEvent::progress(100, "Worker ready"));
    log::debug!("Worker ready, data root {}", facade.paths().root().display());

    while let Some(Request { id, command }) = requests.recv().await {
        let name = command.name();
        log::debug!("Request {} {}", id, name);
        let sink = |percent: u8, stage: &str| {
            let _ = events.send(WorkerEvent::progress(percent, stage));
        };

        let event = match command.execute(&facade, &sink).await {
            Ok(result) => WorkerEvent::success(id, result),
            Err(e) => {
                log::error!("Request {} ({}) failed: {:#}", id, name, e);
                WorkerEvent::failure(id, format!("{:#}", e))
            }
        };
        if events.send(event).is_err() {
            break;
        }
    }
    log::debug!("Worker stopped");
}

/// Clonable request side of a worker
#[derive(Debug, Clone)]
pub struct RequestSender(mpsc::UnboundedSender<Request>);

impl RequestSender {
    pub fn send(&self, request: Request) -> Result<()> {
        self.0
            .send(request)
            .map_err(|_| anyhow!("Worker has stopped"))
    }
}

pub struct WorkerHandle {
    requests: mpsc::UnboundedSender<Request>,
    events: mpsc::UnboundedReceiver<WorkerEvent>,
    next_id: u64,
    thread: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Queue a command under the next id
    pub fn submit(&mut self, command: Command) -> Result<u64> {
        let id = self.next_id;
        self.next_id += 1;
        self.requests
            .send(Request { id, command })
            .map_err(|_| anyhow!("Worker has stopped"))?;
        Ok(id)
    }

    /// Sender for requests that carry their own ids
    pub fn sender(&self) -> RequestSender {
        RequestSender(self.requests.clone())
    }

    pub async fn next_event(&mut self) -> Option<WorkerEvent> {
        self.events.recv().await
    }

    /// Submit a command and wait for its response, passing progress along
    pub async fn call(
        &mut self,
        command: Command,
        mut on_progress: impl FnMut(u8, &str),
    ) -> Result<Value> {
        let id = self.submit(command)?;
        while let Some(event) = self.next_event().await {
            match event {
                WorkerEvent::Progress { percent, stage } => on_progress(percent, &stage),
                WorkerEvent::Response {
                    id: got,
                    ok,
                    result,
                    error,
                } if got == id => {
                    if ok {
                        return Ok(result.unwrap_or(Value::Null));
                    }
                    bail!(error.unwrap_or_else(|| "Unknown worker error".to_string()));
                }
                WorkerEvent::Response { id: other, .. } => {
                    log::debug!("Dropped response {} while waiting for {}", other, id);
                }
            }
        }
        bail!("Worker stopped before answering request {}", id)
    }

    /// Close the request channel and wait for the thread to finish
    pub fn shutdown(mut self) -> Result<()> {
        let thread = self.thread.take();
        drop(self);
        if let Some(thread) = thread {
            thread
                .join()
                .map_err(|_| anyhow!("Worker thread panicked"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppConfig, ConfigHandle, Paths};
    use crate::repository::SqliteConnector;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn spawn(dir: &TempDir) -> WorkerHandle {
        let facade = RepositoryFacade::new(
            Paths::at(dir.path()),
            ConfigHandle::fixed(AppConfig::default()),
            Arc::new(SqliteConnector),
        );
        Worker::spawn(facade).unwrap()
    }

    #[test]
    fn test_request_wire_format() {
        let request: Request = serde_json::from_value(json!({
            "id": 7,
            "command": "deleteStatusRow",
            "args": { "status": "Unknown" }
        }))
        .unwrap();
        assert_eq!(request.id, 7);
        assert_eq!(request.command.name(), "deleteStatusRow");

        let event = serde_json::to_value(WorkerEvent::progress(150, "Opening")).unwrap();
        assert_eq!(event, json!({ "type": "progress", "percent": 100, "stage": "Opening" }));
    }

    #[tokio::test]
    async fn test_requests_are_answered_in_order() {
        let dir = TempDir::new().unwrap();
        let mut worker = spawn(&dir);

        let first = worker.submit(Command::EnsureLookupsReady).unwrap();
        let second = worker
            .submit(Command::UpsertCompany {
                name: "NHS".into(),
                active: true,
            })
            .unwrap();
        assert!(second > first);

        let mut answered = Vec::new();
        while answered.len() < 2 {
            match worker.next_event().await.unwrap() {
                WorkerEvent::Response { id, ok, .. } => {
                    assert!(ok);
                    answered.push(id);
                }
                WorkerEvent::Progress { .. } => {}
            }
        }
        assert_eq!(answered, vec![first, second]);
        worker.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_errors_and_progress_reach_caller() {
        let dir = TempDir::new().unwrap();
        let mut worker = spawn(&dir);

        // no lookup workbook yet
        let err = worker
            .call(Command::ReadLookupsSnapshot, |_, _| {})
            .await
            .unwrap_err();
        assert!(!err.to_string().is_empty());

        let mut stages = Vec::new();
        let report = worker
            .call(Command::ReadStationsAggregate, |percent, stage| {
                stages.push((percent, stage.to_string()))
            })
            .await
            .unwrap();
        assert_eq!(report["totalCount"], json!(0));
        assert!(stages.iter().any(|(percent, _)| *percent == 100));
        worker.shutdown().unwrap();
    }
}
