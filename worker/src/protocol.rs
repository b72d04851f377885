//! Messages crossing the caller/worker boundary. Both sides live in one
//! process, so nothing here is serialized; owned values are handed across
//! channels and the raw table bytes never leave the worker.

use std::collections::BTreeMap;

use gtfs::{StopTimeRow, GTFS};

/// The label retrieval progress events carry, mirroring the table they
/// filter.
pub const FILTERED_STOP_TIMES: &str = "filtered_stop_times";

/// Caller to worker.
pub enum Request {
    /// Replaces whatever archive is currently loaded, invalidating the
    /// cached index.
    LoadArchive { raw: Vec<u8> },
    ExtractStopTimes {
        request_id: u64,
        trip_ids: Vec<String>,
    },
}

/// Worker to caller.
pub enum Event {
    /// Uncompressed entry sizes, sent before parsing starts so the caller
    /// can weight its progress reporting
    Files { sizes: BTreeMap<String, u64> },
    Status {
        message: String,
    },
    /// `request_id` is set for retrieval progress, so concurrent requests
    /// each route to their own callback; load-phase table progress has
    /// none.
    Progress {
        request_id: Option<u64>,
        file: String,
        progress: f64,
    },
    FilteredStopTimes {
        request_id: u64,
        rows: Vec<StopTimeRow>,
    },
    LoadDone {
        gtfs: Box<GTFS>,
    },
    LoadError {
        message: String,
    },
    RequestError {
        request_id: u64,
        message: String,
    },
}
