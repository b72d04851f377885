//! Retrieval engine for the stop-visit table. stop_times.txt routinely runs
//! to hundreds of megabytes, so it never goes through the csv/serde path the
//! other tables use. Instead the raw bytes are kept as-is, one pass records
//! the byte range of each trip's row block, and a query decodes only the
//! slices for the trips it asks about.

mod header;
mod index;
mod tokenizer;

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use serde::{Deserialize, Serialize};

pub use header::ColumnSchema;
pub use index::{TripByteRange, TripIndex};
pub use tokenizer::Tokenizer;

/// How many bytes each tokenizer call chews through at a time
const CHUNK_SIZE: usize = 1024 * 1024;

/// One stop visit, with the five columns anything downstream actually
/// consumes. Values are trimmed; a missing or unparseable stop_sequence
/// becomes 0 rather than an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopTimeRow {
    pub trip_id: String,
    pub stop_id: String,
    pub stop_sequence: u32,
    pub arrival_time: String,
    pub departure_time: String,
}

/// The unparsed bytes of stop_times.txt, exactly as they came out of the
/// archive.
#[derive(Debug)]
pub struct ScheduleTable {
    bytes: Vec<u8>,
}

impl ScheduleTable {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// One pass over the whole table, recording where each trip's rows
    /// live. Fails if the header has no trip_id column.
    pub fn build_index(&self) -> Result<TripIndex> {
        index::build(&self.bytes)
    }

    /// Decodes one trip's slice into rows. Every row in the range already
    /// belongs to the trip, so nothing is re-filtered here; cost is
    /// proportional to the trip's bytes, not the table's. Unknown trips
    /// yield no rows.
    pub fn slice_rows(&self, index: &TripIndex, trip_id: &str) -> Vec<StopTimeRow> {
        let range = match index.ranges.get(trip_id) {
            Some(x) => *x,
            None => return Vec::new(),
        };
        let mut rows = Vec::new();
        let mut tokenizer = Tokenizer::new();
        let mut handle = |fields: &[String]| rows.push(materialize(&index.schema, fields));
        for chunk in self.bytes[range.start..range.end].chunks(CHUNK_SIZE) {
            tokenizer.feed(chunk, &mut handle);
        }
        tokenizer.finish(&mut handle);
        rows
    }

    /// One streaming pass over the whole table, keeping only rows whose
    /// trip is in `wanted`. Linear in the table size, but correct even
    /// when a trip's rows aren't contiguous; this is the fallback when the
    /// index can't be built. `on_progress` gets the fraction of bytes
    /// consumed so far.
    pub fn scan_rows(
        &self,
        wanted: &BTreeSet<String>,
        mut on_progress: impl FnMut(f64),
    ) -> Result<BTreeMap<String, Vec<StopTimeRow>>> {
        let (schema, data_start) = header::resolve(&self.bytes)?;
        let data = &self.bytes[data_start..];

        let mut per_trip: BTreeMap<String, Vec<StopTimeRow>> = BTreeMap::new();
        let mut tokenizer = Tokenizer::new();
        let mut handle = |fields: &[String]| {
            let trip_id = match fields.get(schema.trip_id) {
                Some(x) => x.trim(),
                None => return,
            };
            if wanted.contains(trip_id) {
                per_trip
                    .entry(trip_id.to_string())
                    .or_insert_with(Vec::new)
                    .push(materialize(&schema, fields));
            }
        };

        let mut consumed = 0;
        for chunk in data.chunks(CHUNK_SIZE) {
            tokenizer.feed(chunk, &mut handle);
            consumed += chunk.len();
            on_progress(consumed as f64 / data.len() as f64);
        }
        tokenizer.finish(&mut handle);
        Ok(per_trip)
    }
}

fn materialize(schema: &ColumnSchema, fields: &[String]) -> StopTimeRow {
    StopTimeRow {
        trip_id: field(fields, Some(schema.trip_id)),
        stop_id: field(fields, schema.stop_id),
        stop_sequence: field(fields, schema.stop_sequence).parse().unwrap_or(0),
        arrival_time: field(fields, schema.arrival_time),
        departure_time: field(fields, schema.departure_time),
    }
}

fn field(fields: &[String], idx: Option<usize>) -> String {
    match idx.and_then(|i| fields.get(i)) {
        Some(x) => x.trim().to_string(),
        None => String::new(),
    }
}

/// Converts a GTFS HH:MM:SS time to seconds since midnight. Hours can
/// exceed 24 for trips running past midnight.
pub fn time_to_seconds(t: &str) -> Option<u32> {
    let mut parts = t.split(':');
    let hours: u32 = parts.next()?.trim().parse().ok()?;
    let minutes: u32 = parts.next()?.trim().parse().ok()?;
    let seconds: u32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600 + minutes * 60 + seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ScheduleTable {
        ScheduleTable::new(
            b"trip_id,stop_id,stop_sequence,arrival_time,departure_time\n\
              A,S1,1,08:00:00,08:00:30\n\
              A,S2,2,08:10:00,08:10:30\n\
              B,S1,1,09:00:00,09:00:30\n\
              B,S2,2,09:10:00,09:10:30\n\
              B,S3,3,09:20:00,09:20:30\n"
                .to_vec(),
        )
    }

    #[test]
    fn retrieve_one_trip() {
        let table = table();
        let index = table.build_index().unwrap();
        let rows = table.slice_rows(&index, "B");
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.trip_id == "B"));
        assert_eq!(
            rows.iter().map(|r| r.stop_sequence).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(rows[0].arrival_time, "09:00:00");
        assert_eq!(rows[0].departure_time, "09:00:30");
    }

    #[test]
    fn unknown_trip_yields_nothing() {
        let table = table();
        let index = table.build_index().unwrap();
        assert!(table.slice_rows(&index, "no-such-trip").is_empty());
    }

    // For contiguous input, the indexed path and the full scan agree
    // exactly.
    #[test]
    fn indexed_path_matches_full_scan() {
        let table = table();
        let index = table.build_index().unwrap();
        for trip_id in ["A", "B"] {
            let sliced = table.slice_rows(&index, trip_id);
            let mut scanned = table
                .scan_rows(&[trip_id.to_string()].into_iter().collect(), |_| {})
                .unwrap();
            assert_eq!(sliced, scanned.remove(trip_id).unwrap());
        }
    }

    #[test]
    fn repeated_queries_are_identical() {
        let table = table();
        let index = table.build_index().unwrap();
        assert_eq!(table.slice_rows(&index, "A"), table.slice_rows(&index, "A"));
    }

    // Non-contiguous trips degrade to their first block.
    #[test]
    fn non_contiguous_trip_returns_first_block() {
        let table = ScheduleTable::new(
            b"trip_id,stop_id,stop_sequence\nT1,S1,1\nT2,S2,1\nT1,S3,2\n".to_vec(),
        );
        let index = table.build_index().unwrap();
        assert!(index.contiguity_violated);

        let sliced = table.slice_rows(&index, "T1");
        assert_eq!(sliced.len(), 1);
        assert_eq!(sliced[0].stop_id, "S1");

        // The full scan still sees every row
        let scanned = table
            .scan_rows(&["T1".to_string()].into_iter().collect(), |_| {})
            .unwrap();
        assert_eq!(scanned["T1"].len(), 2);
    }

    #[test]
    fn bad_sequence_defaults_to_zero() {
        let table = ScheduleTable::new(
            b"trip_id,stop_id,stop_sequence\nA,S1,not-a-number\nA,S2,\n".to_vec(),
        );
        let index = table.build_index().unwrap();
        let rows = table.slice_rows(&index, "A");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].stop_sequence, 0);
        assert_eq!(rows[1].stop_sequence, 0);
    }

    #[test]
    fn absent_columns_stay_empty() {
        let table = ScheduleTable::new(b"trip_id,stop_sequence\nA,1\n".to_vec());
        let index = table.build_index().unwrap();
        let rows = table.slice_rows(&index, "A");
        assert_eq!(rows[0].stop_id, "");
        assert_eq!(rows[0].arrival_time, "");
        assert_eq!(rows[0].departure_time, "");
        assert_eq!(rows[0].stop_sequence, 1);
    }

    #[test]
    fn quoted_fields_and_crlf() {
        let table = ScheduleTable::new(
            b"trip_id,stop_id,stop_sequence\r\n\"a,b\"\"c\",S1,1\r\n\"a,b\"\"c\",S2,2\r\n"
                .to_vec(),
        );
        let index = table.build_index().unwrap();
        let rows = table.slice_rows(&index, "a,b\"c");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].trip_id, "a,b\"c");
    }

    #[test]
    fn scan_reports_progress() {
        let table = table();
        let mut last = 0.0;
        table
            .scan_rows(&["A".to_string()].into_iter().collect(), |p| last = p)
            .unwrap();
        assert_eq!(last, 1.0);
    }

    #[test]
    fn times_to_seconds() {
        assert_eq!(time_to_seconds("08:10:30"), Some(29430));
        assert_eq!(time_to_seconds("25:00:00"), Some(90000));
        assert_eq!(time_to_seconds(""), None);
        assert_eq!(time_to_seconds("8:00"), None);
    }
}
