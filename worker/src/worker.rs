//! The execution context that owns the archive. One OS thread running a
//! current-thread runtime; message dispatch is run-to-completion, but each
//! retrieval runs as a local task that yields between trips, so concurrent
//! requests interleave at trip granularity.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use anyhow::Result;
use gtfs::{ScheduleTable, TripIndex, GTFS};
use tokio::sync::mpsc;
use tokio::task::LocalSet;

use crate::client::ScheduleClient;
use crate::protocol::{Event, Request, FILTERED_STOP_TIMES};

/// How many requests may sit in the worker's queue before senders wait
const REQUEST_QUEUE_DEPTH: usize = 16;

pub struct ScheduleWorker;

impl ScheduleWorker {
    /// Starts the worker thread and returns the caller-side handle. Call
    /// from inside a tokio runtime; the client's event dispatcher runs
    /// there.
    pub fn spawn() -> Result<ScheduleClient> {
        let (requests_tx, requests_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("schedule-worker".to_string())
            .spawn(move || run(requests_rx, events_tx))?;
        Ok(ScheduleClient::new(requests_tx, events_rx))
    }
}

fn run(requests: mpsc::Receiver<Request>, events: mpsc::UnboundedSender<Event>) {
    let runtime = match tokio::runtime::Builder::new_current_thread().build() {
        Ok(x) => x,
        Err(err) => {
            error!("Couldn't start the schedule worker: {}", err);
            return;
        }
    };
    let local = LocalSet::new();
    local.block_on(&runtime, dispatch(requests, events));
}

struct LoadedArchive {
    schedule: ScheduleTable,
    index: RefCell<IndexState>,
}

enum IndexState {
    Unbuilt,
    Built(Rc<TripIndex>),
    Failed,
}

async fn dispatch(mut requests: mpsc::Receiver<Request>, events: mpsc::UnboundedSender<Event>) {
    // In-flight retrievals hold their own Rc to the archive they started
    // against, so replacing this mid-request only affects later requests.
    let mut archive: Option<Rc<LoadedArchive>> = None;

    while let Some(request) = requests.recv().await {
        match request {
            Request::LoadArchive { raw } => {
                archive = None;
                match load_archive(&raw, &events) {
                    Ok((gtfs, schedule)) => {
                        archive = Some(Rc::new(LoadedArchive {
                            schedule,
                            index: RefCell::new(IndexState::Unbuilt),
                        }));
                        let _ = events.send(Event::LoadDone {
                            gtfs: Box::new(gtfs),
                        });
                    }
                    Err(err) => {
                        error!("Archive load failed: {:#}", err);
                        let _ = events.send(Event::LoadError {
                            message: format!("{:#}", err),
                        });
                    }
                }
            }
            Request::ExtractStopTimes {
                request_id,
                trip_ids,
            } => match archive.clone() {
                Some(archive) => {
                    tokio::task::spawn_local(extract(archive, events.clone(), request_id, trip_ids));
                }
                None => {
                    let _ = events.send(Event::RequestError {
                        request_id,
                        message: "No archive is loaded".to_string(),
                    });
                }
            },
        }
    }
}

fn load_archive(
    raw: &[u8],
    events: &mpsc::UnboundedSender<Event>,
) -> Result<(GTFS, ScheduleTable)> {
    let _ = events.send(Event::Files {
        sizes: gtfs::file_sizes(raw)?,
    });
    let _ = events.send(Event::Status {
        message: "Parsing archive".to_string(),
    });
    let result = GTFS::load_from_bytes(raw, |file| {
        let _ = events.send(Event::Progress {
            request_id: None,
            file: file.to_string(),
            progress: 1.0,
        });
    })?;
    let _ = events.send(Event::Status {
        message: "Parsing complete".to_string(),
    });
    Ok(result)
}

async fn extract(
    archive: Rc<LoadedArchive>,
    events: mpsc::UnboundedSender<Event>,
    request_id: u64,
    trip_ids: Vec<String>,
) {
    match extract_rows(&archive, &events, request_id, &trip_ids).await {
        Ok(rows) => {
            let _ = events.send(Event::FilteredStopTimes { request_id, rows });
        }
        Err(err) => {
            let _ = events.send(Event::RequestError {
                request_id,
                message: format!("{:#}", err),
            });
        }
    }
}

async fn extract_rows(
    archive: &LoadedArchive,
    events: &mpsc::UnboundedSender<Event>,
    request_id: u64,
    trip_ids: &[String],
) -> Result<Vec<gtfs::StopTimeRow>> {
    let mut rows = Vec::new();
    match ensure_index(archive) {
        Some(index) => {
            let total = trip_ids.len();
            for (done, trip_id) in trip_ids.iter().enumerate() {
                rows.extend(archive.schedule.slice_rows(&index, trip_id.trim()));
                let _ = events.send(Event::Progress {
                    request_id: Some(request_id),
                    file: FILTERED_STOP_TIMES.to_string(),
                    progress: (done + 1) as f64 / total as f64,
                });
                // Let a request that arrived meanwhile cut in
                tokio::task::yield_now().await;
            }
        }
        None => {
            // No index; stream the whole table once instead. Slower, but
            // correct no matter how the rows are ordered.
            let wanted: BTreeSet<String> =
                trip_ids.iter().map(|x| x.trim().to_string()).collect();
            let mut per_trip = archive.schedule.scan_rows(&wanted, |progress| {
                let _ = events.send(Event::Progress {
                    request_id: Some(request_id),
                    file: FILTERED_STOP_TIMES.to_string(),
                    progress: progress.min(0.99),
                });
            })?;
            for trip_id in trip_ids {
                if let Some(matched) = per_trip.remove(trip_id.trim()) {
                    rows.extend(matched);
                }
            }
            let _ = events.send(Event::Progress {
                request_id: Some(request_id),
                file: FILTERED_STOP_TIMES.to_string(),
                progress: 1.0,
            });
        }
    }
    Ok(rows)
}

/// Builds the index on the first retrieval against this archive and caches
/// it. The build is one uninterrupted pass; anything queued behind this
/// dispatch waits for it. A failed build is cached too, routing every
/// request for this archive through the full scan.
fn ensure_index(archive: &LoadedArchive) -> Option<Rc<TripIndex>> {
    let mut state = archive.index.borrow_mut();
    if let IndexState::Unbuilt = *state {
        *state = match archive.schedule.build_index() {
            Ok(index) => {
                info!("Indexed {} trips", index.ranges.len());
                IndexState::Built(Rc::new(index))
            }
            Err(err) => {
                error!(
                    "Couldn't index stop_times, falling back to full scans: {:#}",
                    err
                );
                IndexState::Failed
            }
        };
    }
    match &*state {
        IndexState::Built(index) => Some(index.clone()),
        _ => None,
    }
}
