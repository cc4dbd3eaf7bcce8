use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error};

use crate::digest::Digest;
use crate::error::{CasError, CasResult};
use crate::fetch::ChunkSource;
use crate::store::ContentStore;

/// Collapses concurrent fetches of one digest onto a single transfer.
///
/// Callers whose digest is already present never block; callers whose
/// digest is in flight wait for the one physical fetch and share its
/// outcome.
pub struct FetchCoordinator {
    store: Arc<ContentStore>,
    inflight: Mutex<HashMap<Digest, Vec<oneshot::Sender<CasResult<()>>>>>,
}

impl FetchCoordinator {
    /// Creates a coordinator over `store`.
    pub fn new(store: Arc<ContentStore>) -> Self {
        Self {
            store,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// The coordinated store.
    pub fn store(&self) -> &Arc<ContentStore> {
        &self.store
    }

    /// Ensures the blob is present locally, fetching it at most once.
    ///
    /// Transport errors and not-present are returned to every coalesced
    /// caller. Corruption terminates the process: accepting corrupted
    /// content would poison every later build that reads it.
    pub async fn fetch_once(&self, digest: Digest, source: &dyn ChunkSource) -> CasResult<()> {
        loop {
            let waiting = {
                let mut inflight = self.inflight.lock().await;
                if self.store.has(&digest) {
                    return Ok(());
                }
                match inflight.get_mut(&digest) {
                    Some(waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Some(rx)
                    }
                    None => {
                        inflight.insert(digest, Vec::new());
                        None
                    }
                }
            };

            let rx = match waiting {
                Some(rx) => rx,
                None => break,
            };
            debug!(digest = %digest, "waiting on in-flight fetch");
            match rx.await {
                Ok(result) => {
                    if self.store.has(&digest) {
                        return Ok(());
                    }
                    return result;
                }
                Err(_) => {
                    return Err(CasError::Transport {
                        digest,
                        reason: "in-flight fetch canceled".to_string(),
                    })
                }
            }
        }

        let result = self.store.fetch(digest, source).await;
        if let Err(CasError::Corruption { got, want }) = &result {
            error!(got = %got, want = %want, "content corruption detected, terminating");
            std::process::exit(1);
        }

        let mut inflight = self.inflight.lock().await;
        for tx in inflight.remove(&digest).unwrap_or_default() {
            let outcome = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(e.duplicate()),
            };
            let _ = tx.send(outcome);
        }
        result
    }
}
