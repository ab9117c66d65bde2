//! Request/response broker between callers and the store worker.
//!
//! Callers never touch the [`Store`](crate::store::Store). Each call is
//! wrapped in a [`Request`] carrying a fresh [`CorrelationId`], handed to the
//! worker over a channel, and completed when a [`Response`] with the same id
//! comes back. Completion order is whatever order the worker answers in.

pub mod envelope;
pub mod worker;

pub use envelope::{
    Action, CorrelationId, Request, RequestData, Response, ResponseData, Status, WorkerEvent,
};
pub use worker::{StoreWorker, WorkerEndpoint, WorkerLink};

use crate::error::{CallError, Error};
use crate::store::{Blob, NewSound, SoundId, SoundKind, SoundRecord};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::AbortHandle;

/// Connection state between the broker and its worker.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    Connecting,
    Ready,
    Faulted(Error),
    Terminated,
}

struct PendingCall {
    action: Action,
    reply: oneshot::Sender<Result<Option<ResponseData>, Error>>,
}

struct Inner {
    requests: Mutex<Option<mpsc::UnboundedSender<Request>>>,
    pending: DashMap<CorrelationId, PendingCall>,
    state: watch::Sender<LinkState>,
    worker: Mutex<Option<AbortHandle>>,
    dispatcher: Mutex<Option<AbortHandle>>,
    call_timeout: Duration,
}

impl Inner {
    fn ensure_ready(&self) -> Result<(), Error> {
        match &*self.state.borrow() {
            LinkState::Ready => Ok(()),
            LinkState::Connecting => Err(Error::WorkerUnavailable(
                "worker is not ready yet".to_string(),
            )),
            LinkState::Faulted(Error::StoreUnavailable(m)) => Err(Error::StoreUnavailable(m.clone())),
            LinkState::Faulted(cause) => Err(Error::WorkerUnavailable(cause.to_string())),
            LinkState::Terminated => Err(Error::WorkerUnavailable(
                "worker was terminated".to_string(),
            )),
        }
    }

    fn send(&self, request: Request) -> Result<(), Error> {
        let requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
        match requests.as_ref() {
            Some(tx) => tx
                .send(request)
                .map_err(|_| Error::WorkerUnavailable("worker stopped receiving".to_string())),
            None => Err(Error::WorkerUnavailable("worker was terminated".to_string())),
        }
    }

    fn complete(&self, response: Response) {
        match self.pending.remove(&response.correlation_id) {
            Some((id, call)) => {
                if call.action != response.action {
                    tracing::warn!(
                        "Response {} is tagged {} but the call was {}",
                        id,
                        response.action,
                        call.action
                    );
                }
                // The caller may have stopped waiting; nothing to do then.
                let _ = call.reply.send(response.into_result());
            }
            None => tracing::warn!(
                "Dropping {} response for unknown call {}",
                response.action,
                response.correlation_id
            ),
        }
    }

    fn fail_all(&self, error: Error) -> usize {
        let ids: Vec<CorrelationId> = self.pending.iter().map(|entry| entry.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, call)) = self.pending.remove(&id) {
                let _ = call.reply.send(Err(error.clone()));
                failed += 1;
            }
        }
        failed
    }

    fn fault(&self, cause: Error) {
        let message = match &cause {
            Error::WorkerFault(m) => m.clone(),
            other => other.to_string(),
        };
        self.state.send_replace(LinkState::Faulted(cause));
        let failed = self.fail_all(Error::WorkerFault(message.clone()));
        tracing::error!("Worker fault ({}), failed {} pending calls", message, failed);
    }
}

/// Cloneable handle for issuing store calls.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    /// Spawn a store worker for `database_url` and connect to it.
    pub fn spawn(database_url: &str, call_timeout: Duration) -> Self {
        Self::connect(StoreWorker::spawn(database_url), call_timeout)
    }

    /// Connect to a worker through an existing link. Must be called from
    /// within a tokio runtime.
    pub fn connect(link: WorkerLink, call_timeout: Duration) -> Self {
        let WorkerLink {
            requests,
            events,
            worker,
        } = link;
        let (state, _) = watch::channel(LinkState::Connecting);

        let inner = Arc::new(Inner {
            requests: Mutex::new(Some(requests)),
            pending: DashMap::new(),
            state,
            worker: Mutex::new(worker),
            dispatcher: Mutex::new(None),
            call_timeout,
        });

        let dispatcher = tokio::spawn(Self::dispatch(inner.clone(), events));
        *inner.dispatcher.lock().unwrap_or_else(|e| e.into_inner()) = Some(dispatcher.abort_handle());

        Self { inner }
    }

    async fn dispatch(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<WorkerEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                WorkerEvent::Ready => {
                    let became_ready = inner.state.send_if_modified(|state| {
                        if *state == LinkState::Connecting {
                            *state = LinkState::Ready;
                            true
                        } else {
                            false
                        }
                    });
                    if became_ready {
                        tracing::info!("Store worker is ready");
                    }
                }
                WorkerEvent::Response(response) => inner.complete(response),
                WorkerEvent::Fault(cause) => inner.fault(cause),
            }
        }

        let closed_unexpectedly = matches!(
            *inner.state.borrow(),
            LinkState::Connecting | LinkState::Ready
        );
        if closed_unexpectedly {
            inner.fault(Error::WorkerFault("worker exited unexpectedly".to_string()));
        }
    }

    pub fn state(&self) -> LinkState {
        self.inner.state.borrow().clone()
    }

    pub fn pending_calls(&self) -> usize {
        self.inner.pending.len()
    }

    /// Wait until the worker has either become ready or failed to.
    pub async fn wait_ready(&self) -> Result<(), Error> {
        let mut state = self.inner.state.subscribe();
        state
            .wait_for(|s| *s != LinkState::Connecting)
            .await
            .map_err(|_| Error::WorkerUnavailable("broker closed".to_string()))?;
        self.inner.ensure_ready()
    }

    /// Send one request to the worker and wait for its response.
    ///
    /// Fails immediately when the worker is not ready. Once sent, the call
    /// resolves with the worker's answer, a fault, termination, or
    /// [`Error::TimedOut`], whichever comes first.
    pub async fn call(&self, data: RequestData) -> Result<Option<ResponseData>, CallError> {
        let action = data.action();
        self.inner
            .ensure_ready()
            .map_err(|e| CallError::new(action, e))?;

        let correlation_id = CorrelationId::generate(action);
        let (reply, rx) = oneshot::channel();
        self.inner
            .pending
            .insert(correlation_id.clone(), PendingCall { action, reply });

        match data.blob() {
            Some(blob) if blob.is_well_formed() => {
                tracing::debug!("{}: transferring {} byte blob", correlation_id, blob.len());
            }
            Some(blob) => {
                tracing::warn!("{}: sending malformed {:?} without transfer", correlation_id, blob);
            }
            None if action == Action::SaveSound => {
                tracing::warn!("{}: sending save request without a blob", correlation_id);
            }
            None => {}
        }

        let request = Request {
            action,
            data,
            correlation_id: correlation_id.clone(),
        };
        if let Err(e) = self.inner.send(request) {
            self.inner.pending.remove(&correlation_id);
            return Err(CallError::new(action, e));
        }

        // A fault or terminate between the readiness check and the insert
        // would have missed this entry.
        if let Err(e) = self.inner.ensure_ready() {
            if self.inner.pending.remove(&correlation_id).is_some() {
                return Err(CallError::new(action, e));
            }
        }

        let outcome = match tokio::time::timeout(self.inner.call_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::WorkerFault(
                "call dropped without a response".to_string(),
            )),
            Err(_) => {
                self.inner.pending.remove(&correlation_id);
                tracing::warn!(
                    "{} got no response within {:?}",
                    correlation_id,
                    self.inner.call_timeout
                );
                Err(Error::TimedOut(self.inner.call_timeout))
            }
        };

        outcome.map_err(|e| CallError::new(action, e))
    }

    /// Validate `blob` and save it as a new sound.
    pub async fn save_sound(
        &self,
        kind: SoundKind,
        name: impl Into<String>,
        blob: Blob,
    ) -> Result<SoundId, CallError> {
        blob.validate()
            .map_err(|e| CallError::new(Action::SaveSound, e))?;
        self.save(NewSound::new(kind, name, blob)).await
    }

    /// Save without caller-side validation; the worker still validates.
    pub async fn save(&self, sound: NewSound) -> Result<SoundId, CallError> {
        match self.call(RequestData::SaveSound(sound)).await? {
            Some(ResponseData::Saved { id }) => Ok(id),
            other => Err(unexpected(Action::SaveSound, other)),
        }
    }

    pub async fn get_sounds(&self, kind: SoundKind) -> Result<Vec<SoundRecord>, CallError> {
        match self.call(RequestData::GetSounds { kind }).await? {
            Some(ResponseData::Sounds(sounds)) => Ok(sounds),
            other => Err(unexpected(Action::GetSounds, other)),
        }
    }

    pub async fn get_sound_by_id(&self, id: SoundId) -> Result<Option<SoundRecord>, CallError> {
        match self.call(RequestData::GetSoundById { id }).await? {
            Some(ResponseData::Sound(sound)) => Ok(sound),
            other => Err(unexpected(Action::GetSoundById, other)),
        }
    }

    pub async fn delete_sound(&self, id: SoundId) -> Result<(), CallError> {
        self.call(RequestData::DeleteSound { id }).await.map(|_| ())
    }

    /// Tear down the worker. Outstanding calls fail with
    /// [`Error::Terminated`]; later calls fail with `WorkerUnavailable`.
    pub fn terminate(&self) {
        let previous = self.inner.state.send_replace(LinkState::Terminated);
        if previous == LinkState::Terminated {
            return;
        }

        self.inner
            .requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = self.inner.worker.lock().unwrap_or_else(|e| e.into_inner()).take() {
            worker.abort();
        }
        if let Some(dispatcher) = self
            .inner
            .dispatcher
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            dispatcher.abort();
        }

        let failed = self.inner.fail_all(Error::Terminated);
        tracing::info!("Broker terminated, failed {} pending calls", failed);
    }
}

fn unexpected(action: Action, data: Option<ResponseData>) -> CallError {
    CallError::new(
        action,
        Error::OperationFailed(format!("unexpected response payload: {:?}", data)),
    )
}
