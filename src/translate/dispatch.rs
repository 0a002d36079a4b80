//! Correlates in-flight remote calls with their results by id.
//! A call is either run inline as its own task or queued to a worker task that
//! owns the provider. Completions can arrive in any order; each id resolves once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::provider::TranslationProvider;
use super::{TranslateCall, TranslateError};

/// Where dispatched calls execute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Spawn a task per call from the dispatching side.
    Inline,
    /// Queue calls to a dedicated worker task.
    #[default]
    Worker,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Translate(TranslateCall),
    DetectLanguage { text: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteReply {
    Translations(Vec<String>),
    Language(String),
}

pub type RemoteResult = Result<RemoteReply, TranslateError>;

/// id → outcome handle for every call still waiting on a result.
#[derive(Default)]
struct PendingTable {
    entries: Mutex<HashMap<String, oneshot::Sender<RemoteResult>>>,
}

impl PendingTable {
    fn insert(&self, id: &str) -> Result<oneshot::Receiver<RemoteResult>, TranslateError> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(TranslateError::InvalidInput(format!("request id already pending: {id}")));
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(id.to_string(), tx);
        Ok(rx)
    }

    fn remove(&self, id: &str) {
        self.entries.lock().remove(id);
    }

    /// Resolve and drop the entry for `id`. Unknown ids are ignored.
    fn complete(&self, id: &str, result: RemoteResult) -> bool {
        let Some(tx) = self.entries.lock().remove(id) else {
            debug!(request_id = id, "result for unknown request id ignored");
            return false;
        };
        // The caller may have given up (cancelled); nothing left to notify.
        let _ = tx.send(result);
        true
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

struct Job {
    id: String,
    call: RemoteCall,
}

enum Route {
    Inline(Arc<dyn TranslationProvider>),
    Worker(mpsc::Sender<Job>),
}

pub struct AsyncDispatcher {
    pending: Arc<PendingTable>,
    route: Route,
}

impl AsyncDispatcher {
    /// Must be called inside a Tokio runtime; worker mode spawns its loop here.
    pub fn new(provider: Arc<dyn TranslationProvider>, mode: DispatchMode, queue_capacity: usize) -> Self {
        let pending = Arc::new(PendingTable::default());
        let route = match mode {
            DispatchMode::Inline => Route::Inline(provider),
            DispatchMode::Worker => {
                let (tx, rx) = mpsc::channel(queue_capacity.max(1));
                tokio::spawn(run_worker_loop(rx, provider, Arc::clone(&pending)));
                Route::Worker(tx)
            }
        };
        Self { pending, route }
    }

    /// Fresh correlation id.
    pub fn next_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register `id` and hand the call to its execution context.
    /// The receiver resolves when the matching result arrives.
    pub async fn dispatch(
        &self,
        id: String,
        call: RemoteCall,
    ) -> Result<oneshot::Receiver<RemoteResult>, TranslateError> {
        let rx = self.pending.insert(&id)?;
        debug!(request_id = %id, "dispatching remote call");

        match &self.route {
            Route::Inline(provider) => {
                let provider = Arc::clone(provider);
                let pending = Arc::clone(&self.pending);
                tokio::spawn(async move {
                    let result = execute(provider.as_ref(), call).await;
                    pending.complete(&id, result);
                });
            }
            Route::Worker(tx) => {
                let job = Job { id, call };
                let sent = match tx.try_send(job) {
                    Ok(()) => Ok(()),
                    Err(mpsc::error::TrySendError::Full(job)) => {
                        warn!("dispatch queue full, awaiting slot");
                        tx.send(job).await.map_err(|e| e.0)
                    }
                    Err(mpsc::error::TrySendError::Closed(job)) => Err(job),
                };
                if let Err(job) = sent {
                    self.pending.remove(&job.id);
                    return Err(TranslateError::Network("dispatch worker stopped".into()));
                }
            }
        }
        Ok(rx)
    }

    /// Deliver a result for `id`. Returns false (and does nothing) when no
    /// call with that id is pending.
    pub fn on_result(&self, id: &str, result: RemoteResult) -> bool {
        self.pending.complete(id, result)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

async fn execute(provider: &dyn TranslationProvider, call: RemoteCall) -> RemoteResult {
    match call {
        RemoteCall::Translate(call) => provider.translate(&call).await.map(RemoteReply::Translations),
        RemoteCall::DetectLanguage { text } => provider.detect_language(&text).await.map(RemoteReply::Language),
    }
}

/// Worker loop: each job runs as its own task so a slow call never holds up
/// later ones.
async fn run_worker_loop(
    mut rx: mpsc::Receiver<Job>,
    provider: Arc<dyn TranslationProvider>,
    pending: Arc<PendingTable>,
) {
    info!("dispatch worker started");
    while let Some(job) = rx.recv().await {
        let provider = Arc::clone(&provider);
        let pending = Arc::clone(&pending);
        tokio::spawn(async move {
            let result = execute(provider.as_ref(), job.call).await;
            pending.complete(&job.id, result);
        });
    }
    info!("dispatch worker exiting (channel closed)");
}
