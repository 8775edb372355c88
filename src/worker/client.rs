//! Async client for the engine worker process.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::error::{WorkerError, WorkerResult};
use super::protocol::{
    ColumnsParams, ColumnsResponse, EngineConnection, ExecuteParams, Method, Request, Response,
    RowSet,
};
use crate::config::Settings;

type Pending = Arc<Mutex<HashMap<String, oneshot::Sender<Response>>>>;

const WORKER_CANDIDATES: [&str; 3] = [
    "fieldforge-worker",
    "./fieldforge-worker",
    "./worker/fieldforge-worker",
];

/// Client for one worker child process.
///
/// Requests from any number of tasks share the pipe; each waits on its own
/// channel keyed by request id. A caller that gives up (timeout, dropped
/// future) removes its entry, so a late answer is discarded.
pub struct WorkerClient {
    stdin: tokio::sync::Mutex<BufWriter<ChildStdin>>,
    pending: Pending,
    _child: Child,
    reader: JoinHandle<()>,
    timeout: Duration,
}

impl WorkerClient {
    /// Spawn the worker named in settings, or the first one found on disk.
    pub async fn from_settings(settings: &Settings) -> WorkerResult<Self> {
        let path = match settings.worker_path() {
            Some(path) => path,
            None => WORKER_CANDIDATES
                .iter()
                .map(PathBuf::from)
                .find(|p| p.exists())
                .ok_or_else(|| {
                    WorkerError::Spawn(io::Error::new(
                        io::ErrorKind::NotFound,
                        "worker binary not found; set worker.path in the config file",
                    ))
                })?,
        };

        Self::spawn(
            &path,
            &settings.worker.args,
            Duration::from_millis(settings.worker.request_timeout_ms),
        )
        .await
    }

    pub async fn spawn(path: impl AsRef<Path>, args: &[String], timeout: Duration) -> WorkerResult<Self> {
        let mut child = Command::new(path.as_ref())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::Spawn)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(WorkerError::Spawn(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "worker pipes not captured",
            )));
        };

        let pending: Pending = Arc::default();
        let reader = tokio::spawn(read_responses(stdout, Arc::clone(&pending)));
        debug!(path = %path.as_ref().display(), "worker spawned");

        Ok(Self {
            stdin: tokio::sync::Mutex::new(BufWriter::new(stdin)),
            pending,
            _child: child,
            reader,
            timeout,
        })
    }

    pub fn is_alive(&self) -> bool {
        !self.reader.is_finished()
    }

    /// Send one request and wait for its answer.
    pub async fn call<P, R>(&self, method: Method, params: P) -> WorkerResult<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = uuid::Uuid::new_v4().to_string();
        let request = Request {
            id: &id,
            method: method.as_str(),
            params,
        };
        let mut line = serde_json::to_vec(&request).map_err(WorkerError::Encode)?;
        line.push(b'\n');

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id.clone(), tx);
        let _inflight = Inflight {
            pending: &self.pending,
            id: &id,
        };

        self.send(&line).await?;
        debug!(%id, method = method.as_str(), "worker request sent");

        let response = tokio::time::timeout(self.timeout, rx)
            .await
            .map_err(|_| WorkerError::Timeout(self.timeout.as_millis() as u64))?
            .map_err(|_| WorkerError::Exited)?;
        decode(response)
    }

    /// Describe the columns of `schema.table`.
    pub async fn columns(
        &self,
        connection: &EngineConnection,
        schema: &str,
        table: &str,
    ) -> WorkerResult<ColumnsResponse> {
        let params = ColumnsParams {
            connection,
            schema,
            table,
        };
        self.call(Method::Columns, params).await
    }

    /// Run a statement inside a read-only transaction.
    pub async fn execute_read_only(
        &self,
        connection: &EngineConnection,
        sql: &str,
        args: &[Value],
    ) -> WorkerResult<RowSet> {
        let params = ExecuteParams {
            connection,
            sql,
            args,
            read_only: true,
        };
        self.call(Method::Execute, params).await
    }

    async fn send(&self, line: &[u8]) -> WorkerResult<()> {
        let mut stdin = self.stdin.lock().await;
        let written = match stdin.write_all(line).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| match e.kind() {
            io::ErrorKind::BrokenPipe => WorkerError::Exited,
            _ => WorkerError::Io(e),
        })
    }
}

/// Removes a request's pending entry however the call ends.
struct Inflight<'a> {
    pending: &'a Pending,
    id: &'a str,
}

impl Drop for Inflight<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(self.id);
    }
}

async fn read_responses(stdout: ChildStdout, pending: Pending) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match serde_json::from_str::<Response>(&line) {
                Ok(response) => {
                    let waiter = pending.lock().remove(&response.id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(response);
                        }
                        None => debug!(id = %response.id, "discarding answer nobody waits for"),
                    }
                }
                Err(e) => warn!(error = %e, "unparseable worker line"),
            },
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "worker read failed");
                break;
            }
        }
    }

    // Dropping the senders fails every waiter with `Exited`.
    let orphaned = std::mem::take(&mut *pending.lock());
    if !orphaned.is_empty() {
        warn!(requests = orphaned.len(), "worker exited with requests in flight");
    }
}

fn decode<R: DeserializeOwned>(response: Response) -> WorkerResult<R> {
    if response.success {
        let result = response.result.unwrap_or(Value::Null);
        return serde_json::from_value(result).map_err(WorkerError::Decode);
    }
    Err(match response.error {
        Some(error) => WorkerError::from_wire(error),
        None => WorkerError::Remote {
            code: "UNKNOWN".to_string(),
            message: "failure without detail".to_string(),
        },
    })
}
