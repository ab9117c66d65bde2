use super::envelope::{Request, RequestData, Response, ResponseData, WorkerEvent};
use crate::error::Error;
use crate::store::Store;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Caller side of the worker boundary.
pub struct WorkerLink {
    pub requests: mpsc::UnboundedSender<Request>,
    pub events: mpsc::UnboundedReceiver<WorkerEvent>,
    pub worker: Option<AbortHandle>,
}

/// Worker side of the worker boundary.
pub struct WorkerEndpoint {
    pub requests: mpsc::UnboundedReceiver<Request>,
    pub events: mpsc::UnboundedSender<WorkerEvent>,
}

pub fn channel() -> (WorkerLink, WorkerEndpoint) {
    let (request_tx, request_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let link = WorkerLink {
        requests: request_tx,
        events: event_rx,
        worker: None,
    };
    let endpoint = WorkerEndpoint {
        requests: request_rx,
        events: event_tx,
    };
    (link, endpoint)
}

/// Executes store operations on behalf of the broker.
///
/// The worker owns the [`Store`] exclusively. Requests are handled one at a
/// time in arrival order; each one produces exactly one response.
pub struct StoreWorker {
    database_url: String,
    endpoint: WorkerEndpoint,
}

impl StoreWorker {
    pub fn new(database_url: impl Into<String>, endpoint: WorkerEndpoint) -> Self {
        Self {
            database_url: database_url.into(),
            endpoint,
        }
    }

    /// Spawn a worker for `database_url` plus a supervisor that reports a
    /// panic in the worker as a fault.
    pub fn spawn(database_url: impl Into<String>) -> WorkerLink {
        let (mut link, endpoint) = channel();
        let fault_tx = endpoint.events.clone();
        let worker = Self::new(database_url, endpoint);

        let handle = tokio::spawn(worker.run());
        link.worker = Some(handle.abort_handle());

        tokio::spawn(async move {
            match handle.await {
                Err(e) if e.is_panic() => {
                    tracing::error!("Store worker panicked: {}", e);
                    let _ = fault_tx.send(WorkerEvent::Fault(Error::WorkerFault(
                        "store worker panicked".to_string(),
                    )));
                }
                Err(_) => tracing::debug!("Store worker aborted"),
                Ok(()) => {}
            }
        });

        link
    }

    pub async fn run(mut self) {
        let store = match Store::open(&self.database_url).await {
            Ok(store) => store,
            Err(e) => {
                tracing::error!("Store worker could not open storage: {}", e);
                let _ = self.endpoint.events.send(WorkerEvent::Fault(e));
                return;
            }
        };

        if self.endpoint.events.send(WorkerEvent::Ready).is_err() {
            return;
        }
        tracing::info!("Store worker ready");

        while let Some(request) = self.endpoint.requests.recv().await {
            let response = Self::handle(&store, request).await;
            if self.endpoint.events.send(WorkerEvent::Response(response)).is_err() {
                break;
            }
        }

        store.close().await;
        tracing::info!("Store worker stopped");
    }

    async fn handle(store: &Store, request: Request) -> Response {
        let Request {
            action,
            data,
            correlation_id,
        } = request;

        let result = match data {
            RequestData::SaveSound(sound) => store
                .put(sound)
                .await
                .map(|id| Some(ResponseData::Saved { id })),
            RequestData::GetSounds { kind } => store
                .query_by_type(kind)
                .await
                .map(|sounds| Some(ResponseData::Sounds(sounds))),
            RequestData::GetSoundById { id } => store
                .get_by_id(id)
                .await
                .map(|sound| Some(ResponseData::Sound(sound))),
            RequestData::DeleteSound { id } => store.delete_by_id(id).await.map(|_| None),
        };

        match result {
            Ok(data) => Response::success(action, correlation_id, data),
            Err(e) => {
                tracing::warn!("Store worker: {} {} failed: {}", action, correlation_id, e);
                Response::failure(action, correlation_id, &e)
            }
        }
    }
}
