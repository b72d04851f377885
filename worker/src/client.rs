//! Caller-side handle to the schedule worker. Correlates completions to
//! requests by id, enforces per-request deadlines, and routes progress to
//! the right callback.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use gtfs::{StopTimeRow, GTFS};
use tokio::sync::{mpsc, oneshot};

use crate::protocol::{Event, Request};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type ProgressFn = Box<dyn Fn(f64) + Send>;

/// What a load reports while it runs.
pub enum LoadProgress {
    /// Uncompressed entry sizes, before parsing starts
    Files { sizes: BTreeMap<String, u64> },
    Status { message: String },
    /// One table finished parsing
    Table { file: String, progress: f64 },
}

struct PendingRetrieval {
    complete: oneshot::Sender<Result<Vec<StopTimeRow>>>,
    on_progress: Option<ProgressFn>,
}

struct PendingLoad {
    complete: oneshot::Sender<Result<Box<GTFS>>>,
    on_progress: Option<Box<dyn Fn(LoadProgress) + Send>>,
}

#[derive(Default)]
struct Registry {
    retrievals: HashMap<u64, PendingRetrieval>,
    load: Option<PendingLoad>,
}

pub struct ScheduleClient {
    requests: mpsc::Sender<Request>,
    registry: Arc<Mutex<Registry>>,
    next_request_id: AtomicU64,
    timeout: Duration,
}

impl ScheduleClient {
    pub(crate) fn new(
        requests: mpsc::Sender<Request>,
        mut events: mpsc::UnboundedReceiver<Event>,
    ) -> Self {
        let registry = Arc::new(Mutex::new(Registry::default()));
        let dispatcher = registry.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                dispatch_event(&dispatcher, event);
            }
            // The worker hung up; fail anything still pending.
            let mut registry = dispatcher.lock().unwrap();
            for (_, pending) in registry.retrievals.drain() {
                let _ = pending.complete.send(Err(anyhow!("The schedule worker is gone")));
            }
            if let Some(load) = registry.load.take() {
                let _ = load.complete.send(Err(anyhow!("The schedule worker is gone")));
            }
        });
        Self {
            requests,
            registry,
            next_request_id: AtomicU64::new(0),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Overrides the default 30 second per-request deadline.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Ships an archive to the worker. The eager tables come back parsed;
    /// the stop-visit table stays behind with the worker, indexed on the
    /// first retrieve. Replaces any previously loaded archive.
    pub async fn load_archive(&self, raw: Vec<u8>) -> Result<GTFS> {
        self.load_archive_inner(raw, None).await
    }

    pub async fn load_archive_with_progress(
        &self,
        raw: Vec<u8>,
        on_progress: impl Fn(LoadProgress) + Send + 'static,
    ) -> Result<GTFS> {
        self.load_archive_inner(raw, Some(Box::new(on_progress))).await
    }

    /// Fetches every stop-visit row for the requested trips, in request
    /// order. Unknown ids just contribute zero rows.
    pub async fn retrieve(&self, trip_ids: Vec<String>) -> Result<Vec<StopTimeRow>> {
        self.retrieve_inner(trip_ids, None).await
    }

    /// Like retrieve, with `on_progress` called with the completed fraction
    /// as the worker gets through the trips.
    pub async fn retrieve_with_progress(
        &self,
        trip_ids: Vec<String>,
        on_progress: impl Fn(f64) + Send + 'static,
    ) -> Result<Vec<StopTimeRow>> {
        self.retrieve_inner(trip_ids, Some(Box::new(on_progress))).await
    }

    async fn load_archive_inner(
        &self,
        raw: Vec<u8>,
        on_progress: Option<Box<dyn Fn(LoadProgress) + Send>>,
    ) -> Result<GTFS> {
        let (complete, receiver) = oneshot::channel();
        {
            let mut registry = self.registry.lock().unwrap();
            if registry.load.is_some() {
                bail!("Another archive load is already in flight");
            }
            registry.load = Some(PendingLoad {
                complete,
                on_progress,
            });
        }

        if self.requests.send(Request::LoadArchive { raw }).await.is_err() {
            self.registry.lock().unwrap().load = None;
            bail!("The schedule worker is gone");
        }
        match receiver.await {
            Ok(result) => result.map(|gtfs| *gtfs),
            Err(_) => bail!("The schedule worker is gone"),
        }
    }

    async fn retrieve_inner(
        &self,
        trip_ids: Vec<String>,
        on_progress: Option<ProgressFn>,
    ) -> Result<Vec<StopTimeRow>> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (complete, receiver) = oneshot::channel();
        self.registry.lock().unwrap().retrievals.insert(
            request_id,
            PendingRetrieval {
                complete,
                on_progress,
            },
        );

        let request = Request::ExtractStopTimes {
            request_id,
            trip_ids,
        };
        if self.requests.send(request).await.is_err() {
            self.registry.lock().unwrap().retrievals.remove(&request_id);
            bail!("The schedule worker is gone");
        }

        match tokio::time::timeout(self.timeout, receiver).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => bail!("The schedule worker is gone"),
            Err(_) => {
                // Deadline passed. Forget the request; the worker isn't told
                // to stop, and its eventual completion is dropped as
                // orphaned.
                self.registry.lock().unwrap().retrievals.remove(&request_id);
                bail!(
                    "Request {} timed out after {:?}",
                    request_id,
                    self.timeout
                );
            }
        }
    }
}

fn dispatch_event(registry: &Mutex<Registry>, event: Event) {
    let mut registry = registry.lock().unwrap();
    match event {
        Event::Files { sizes } => {
            if let Some(load) = &registry.load {
                if let Some(cb) = &load.on_progress {
                    cb(LoadProgress::Files { sizes });
                }
            }
        }
        Event::Status { message } => {
            if let Some(load) = &registry.load {
                if let Some(cb) = &load.on_progress {
                    cb(LoadProgress::Status { message });
                }
            }
        }
        Event::Progress {
            request_id: None,
            file,
            progress,
        } => {
            if let Some(load) = &registry.load {
                if let Some(cb) = &load.on_progress {
                    cb(LoadProgress::Table { file, progress });
                }
            }
        }
        Event::Progress {
            request_id: Some(request_id),
            progress,
            ..
        } => {
            if let Some(pending) = registry.retrievals.get(&request_id) {
                if let Some(cb) = &pending.on_progress {
                    cb(progress);
                }
            }
        }
        Event::FilteredStopTimes { request_id, rows } => {
            match registry.retrievals.remove(&request_id) {
                Some(pending) => {
                    let _ = pending.complete.send(Ok(rows));
                }
                // The request already timed out; drop the late completion.
                None => debug!("Ignoring orphaned completion for request {}", request_id),
            }
        }
        Event::RequestError {
            request_id,
            message,
        } => {
            if let Some(pending) = registry.retrievals.remove(&request_id) {
                let _ = pending.complete.send(Err(anyhow!("{}", message)));
            }
        }
        Event::LoadDone { gtfs } => {
            if let Some(load) = registry.load.take() {
                let _ = load.complete.send(Ok(gtfs));
            }
        }
        Event::LoadError { message } => {
            if let Some(load) = registry.load.take() {
                let _ = load.complete.send(Err(anyhow!("{}", message)));
            }
        }
    }
}
