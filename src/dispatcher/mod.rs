//! Serial access to the codec service.
//!
//! One OS thread owns the codec and serves a FIFO queue; callers enqueue an
//! envelope and await its reply. The thread is started by the first request
//! and stopped by [`Dispatcher::shutdown`], after which every request fails
//! with [`DispatchError::Unavailable`].

pub mod protocol;
mod worker;

use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{OnceCell, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::service::{
    ActivityCodec, ActivityService, DecodeResult, EncodeRequest, EncodeResult, ManufacturerList,
    SportList,
};
use protocol::{Envelope, MessageType, Payload, RequestId, Timed};
use worker::Factory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceState {
    Uninitialized,
    Initializing,
    Ready,
    ShuttingDown,
    Terminated,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("codec service is unavailable")]
    Unavailable,
    #[error("codec service failed to start: {0}")]
    Initialization(String),
    #[error("protocol fault: {0}")]
    Protocol(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// Cloneable handle to the codec worker.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

struct Inner {
    factory: Mutex<Option<Factory>>,
    failure: Mutex<Option<String>>,
    queue: OnceCell<mpsc::UnboundedSender<Envelope>>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    state: watch::Sender<ServiceState>,
}

impl Dispatcher {
    /// `factory` runs on the worker thread when the first request arrives.
    pub fn new<F, C, E>(factory: F) -> Self
    where
        F: FnOnce() -> Result<C, E> + Send + 'static,
        C: ActivityCodec,
        E: Display,
    {
        let factory: Factory = Box::new(move || match factory() {
            Ok(codec) => Ok(Box::new(codec) as Box<dyn ActivityCodec>),
            Err(err) => Err(err.to_string()),
        });
        let (state, _) = watch::channel(ServiceState::Uninitialized);

        Dispatcher {
            inner: Arc::new(Inner {
                factory: Mutex::new(Some(factory)),
                failure: Mutex::new(None),
                queue: OnceCell::new(),
                worker: Mutex::new(None),
                state,
            }),
        }
    }

    pub fn with_default_codec() -> Self {
        Self::new(ActivityService::new)
    }

    pub fn state(&self) -> ServiceState {
        *self.inner.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ServiceState> {
        self.inner.state.subscribe()
    }

    /// Start the codec if needed and confirm it answers.
    pub async fn is_ready(&self) -> Result<Timed<bool>, DispatchError> {
        self.request(MessageType::IsReady, Payload::Empty).await
    }

    pub async fn decode(&self, bytes: Vec<u8>) -> Result<Timed<DecodeResult>, DispatchError> {
        self.request(MessageType::Decode, Payload::Bytes(bytes)).await
    }

    pub async fn encode(
        &self,
        request: &EncodeRequest,
    ) -> Result<Timed<EncodeResult>, DispatchError> {
        let payload = serde_json::to_value(request)
            .map_err(|err| DispatchError::InvalidRequest(err.to_string()))?;
        self.encode_value(payload).await
    }

    /// Encode a request that is already in its JSON form. The codec validates
    /// it and reports problems in the result's `err`.
    pub async fn encode_value(
        &self,
        request: Value,
    ) -> Result<Timed<EncodeResult>, DispatchError> {
        self.request(MessageType::Encode, Payload::Json(request)).await
    }

    pub async fn manufacturer_list(&self) -> Result<Timed<ManufacturerList>, DispatchError> {
        self.request(MessageType::ManufacturerList, Payload::Empty).await
    }

    pub async fn sport_list(&self) -> Result<Timed<SportList>, DispatchError> {
        self.request(MessageType::SportList, Payload::Empty).await
    }

    /// Stop the worker. Requests queued behind the shutdown message are
    /// dropped and their callers see `Unavailable`. Later calls do nothing.
    pub async fn shutdown(&self) {
        let mut begun = false;
        self.inner.state.send_if_modified(|state| match state {
            ServiceState::ShuttingDown | ServiceState::Terminated => false,
            _ => {
                *state = ServiceState::ShuttingDown;
                begun = true;
                true
            }
        });
        if !begun {
            return;
        }
        info!("shutting down codec service");

        lock(&self.inner.factory).take();
        if let Some(queue) = self.inner.queue.get() {
            let _ = queue.send(Envelope {
                id: RequestId::new(),
                kind: MessageType::Shutdown,
                payload: Payload::Empty,
                reply: None,
            });
        }

        let handle = lock(&self.inner.worker).take();
        if let Some(handle) = handle {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => {}
                _ => warn!("codec worker did not exit cleanly"),
            }
        }

        self.inner.state.send_replace(ServiceState::Terminated);
        info!("codec service terminated");
    }

    async fn request<T: DeserializeOwned>(
        &self,
        kind: MessageType,
        payload: Payload,
    ) -> Result<Timed<T>, DispatchError> {
        let started = Instant::now();
        let id = RequestId::new();

        let queue = self.queue().await?;
        if self.state() != ServiceState::Ready {
            return Err(DispatchError::Unavailable);
        }

        let (reply, response) = oneshot::channel();
        queue
            .send(Envelope {
                id,
                kind,
                payload,
                reply: Some(reply),
            })
            .map_err(|_| DispatchError::Unavailable)?;
        let response = response.await.map_err(|_| DispatchError::Unavailable)?;

        if response.id != id || response.kind != kind {
            return Err(DispatchError::Protocol(format!(
                "expected {kind} response for {id}, got {} for {}",
                response.kind, response.id
            )));
        }
        let result = serde_json::from_value(response.result)
            .map_err(|err| DispatchError::Protocol(format!("malformed {kind} response: {err}")))?;

        let elapsed = started.elapsed();
        debug!(
            request_id = %id,
            %kind,
            elapsed_ms = elapsed.as_millis() as u64,
            "request completed"
        );
        Ok(Timed {
            request_id: id,
            result,
            elapsed,
        })
    }

    /// The worker's queue, starting the worker on first use. Concurrent
    /// callers wait for the same start.
    async fn queue(&self) -> Result<&mpsc::UnboundedSender<Envelope>, DispatchError> {
        match self.state() {
            ServiceState::ShuttingDown => return Err(DispatchError::Unavailable),
            ServiceState::Terminated => {
                let failure = lock(&self.inner.failure).clone();
                return Err(failure.map_or(DispatchError::Unavailable, DispatchError::Initialization));
            }
            _ => {}
        }
        self.inner.queue.get_or_try_init(|| self.start()).await
    }

    async fn start(&self) -> Result<mpsc::UnboundedSender<Envelope>, DispatchError> {
        let factory = lock(&self.inner.factory).take();
        let Some(factory) = factory else {
            return Err(match lock(&self.inner.failure).clone() {
                Some(failure) => DispatchError::Initialization(failure),
                None => DispatchError::Unavailable,
            });
        };

        let initializing = self.inner.state.send_if_modified(|state| {
            if *state == ServiceState::Uninitialized {
                *state = ServiceState::Initializing;
                true
            } else {
                false
            }
        });
        if !initializing {
            return Err(DispatchError::Unavailable);
        }
        info!("starting codec service");

        let (queue, receiver) = mpsc::unbounded_channel();
        let (ready, started) = oneshot::channel();
        let spawned = thread::Builder::new()
            .name("activity-codec".into())
            .spawn(move || worker::run(factory, receiver, ready));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => return Err(self.fail(err.to_string())),
        };
        {
            // Held while re-checking so shutdown either sees the handle or
            // has already moved past Initializing.
            let mut worker = lock(&self.inner.worker);
            if self.state() != ServiceState::Initializing {
                drop(worker);
                drop(queue);
                join_detached(handle);
                return Err(DispatchError::Unavailable);
            }
            *worker = Some(handle);
        }

        match started.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(self.fail(err)),
            Err(_) => return Err(self.fail("codec worker exited during startup".into())),
        }

        let promoted = self.inner.state.send_if_modified(|state| {
            if *state == ServiceState::Initializing {
                *state = ServiceState::Ready;
                true
            } else {
                false
            }
        });
        if !promoted {
            // Shut down while starting; dropping `queue` stops the worker.
            return Err(DispatchError::Unavailable);
        }
        info!("codec service ready");
        Ok(queue)
    }

    fn fail(&self, failure: String) -> DispatchError {
        *lock(&self.inner.failure) = Some(failure.clone());
        self.inner.state.send_replace(ServiceState::Terminated);
        DispatchError::Initialization(failure)
    }
}

/// Join a worker that shutdown never saw. Its queue is already dropped so
/// the thread is on its way out.
fn join_detached(handle: thread::JoinHandle<()>) {
    tokio::task::spawn_blocking(move || {
        if handle.join().is_err() {
            warn!("codec worker did not exit cleanly");
        }
    });
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
