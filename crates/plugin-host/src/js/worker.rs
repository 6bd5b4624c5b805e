//! JavaScript Worker Thread
//!
//! QuickJS is single-threaded, so one dedicated OS thread owns the runtime and
//! executes commands in arrival order. Requests from the HTTP side only send a
//! command and await the reply; no two plugin calls ever run JavaScript at
//! the same time, and they all share one global object.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use super::policy::GlobalPolicy;
use super::runtime::{JsError, JsResult, JsRuntime, RuntimeOptions};

/// Errors talking to the worker thread
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Worker has terminated")]
    Terminated,

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Worker thread panicked")]
    ThreadPanic,

    #[error("Failed to spawn thread: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error(transparent)]
    Js(#[from] JsError),
}

/// Messages sent to the worker thread.
enum WorkerCommand {
    Import {
        location: String,
        source: String,
        reply: oneshot::Sender<JsResult<Vec<String>>>,
    },
    HasModule {
        location: String,
        reply: oneshot::Sender<bool>,
    },
    SetGlobals {
        vars: serde_json::Map<String, serde_json::Value>,
        reply: oneshot::Sender<JsResult<()>>,
    },
    Invoke {
        location: String,
        function: String,
        body: serde_json::Value,
        reply: oneshot::Sender<JsResult<serde_json::Value>>,
    },
    Shutdown,
}

/// Handle to the worker thread. Cheap to clone.
#[derive(Clone)]
pub struct JsWorkerHandle {
    cmd_tx: mpsc::UnboundedSender<WorkerCommand>,
    terminated: Arc<AtomicBool>,
    thread_handle: Arc<Mutex<Option<thread::JoinHandle<()>>>>,
}

/// Spawn the worker thread and wait until its runtime is ready.
pub fn spawn_worker(options: RuntimeOptions, policy: GlobalPolicy) -> Result<JsWorkerHandle, WorkerError> {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (init_tx, init_rx) = std::sync::mpsc::sync_channel::<JsResult<()>>(1);

    let thread_name = format!("js-{}", options.name);
    let thread_handle = thread::Builder::new()
        .name(thread_name.clone())
        .spawn(move || {
            let runtime = match JsRuntime::new(&options) {
                Ok(runtime) => {
                    let _ = init_tx.send(Ok(()));
                    runtime
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            tracing::debug!("[{}] Worker started", thread_name);
            run_worker(runtime, policy, cmd_rx);
            tracing::debug!("[{}] Worker exiting", thread_name);
        })?;

    init_rx.recv().map_err(|_| WorkerError::ChannelClosed)??;

    Ok(JsWorkerHandle {
        cmd_tx,
        terminated: Arc::new(AtomicBool::new(false)),
        thread_handle: Arc::new(Mutex::new(Some(thread_handle))),
    })
}

fn run_worker(mut runtime: JsRuntime, policy: GlobalPolicy, mut cmd_rx: mpsc::UnboundedReceiver<WorkerCommand>) {
    while let Some(cmd) = cmd_rx.blocking_recv() {
        match cmd {
            WorkerCommand::Import { location, source, reply } => {
                let _ = reply.send(runtime.import_module(&location, &source));
            }
            WorkerCommand::HasModule { location, reply } => {
                let _ = reply.send(runtime.has_module(&location));
            }
            WorkerCommand::SetGlobals { vars, reply } => {
                let _ = reply.send(runtime.set_globals(&vars));
            }
            WorkerCommand::Invoke {
                location,
                function,
                body,
                reply,
            } => {
                let _ = reply.send(runtime.invoke(&location, &function, &body, &policy));
            }
            WorkerCommand::Shutdown => break,
        }
    }

    tracing::debug!(modules = runtime.module_count(), "Releasing JS runtime");
    runtime.gc();
}

impl JsWorkerHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WorkerCommand,
    ) -> Result<T, WorkerError> {
        if self.is_terminated() {
            return Err(WorkerError::Terminated);
        }

        let (reply, response_rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .map_err(|_| WorkerError::ChannelClosed)?;

        response_rx.await.map_err(|_| WorkerError::ChannelClosed)
    }

    /// Evaluate `source` as the module for `location`. Returns its export names.
    pub async fn import_module(&self, location: &str, source: String) -> Result<Vec<String>, WorkerError> {
        let location = location.to_string();
        Ok(self
            .request(|reply| WorkerCommand::Import {
                location,
                source,
                reply,
            })
            .await??)
    }

    pub async fn has_module(&self, location: &str) -> Result<bool, WorkerError> {
        let location = location.to_string();
        self.request(|reply| WorkerCommand::HasModule { location, reply })
            .await
    }

    /// Assign environment variables onto the global object.
    pub async fn set_globals(
        &self,
        vars: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), WorkerError> {
        Ok(self
            .request(|reply| WorkerCommand::SetGlobals { vars, reply })
            .await??)
    }

    /// Activate the sandbox and call `function` from the module at `location`.
    pub async fn invoke(
        &self,
        location: &str,
        function: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, WorkerError> {
        let location = location.to_string();
        let function = function.to_string();
        Ok(self
            .request(|reply| WorkerCommand::Invoke {
                location,
                function,
                body,
                reply,
            })
            .await??)
    }

    /// Stop accepting commands and let the thread exit after the current one.
    pub fn shutdown(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return; // Already terminated
        }
        let _ = self.cmd_tx.send(WorkerCommand::Shutdown);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Wait for the worker thread to finish.
    pub fn join(&self) -> Result<(), WorkerError> {
        if let Some(handle) = self.thread_handle.lock().take() {
            handle.join().map_err(|_| WorkerError::ThreadPanic)?;
        }
        Ok(())
    }
}
