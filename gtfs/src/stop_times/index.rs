use std::collections::BTreeMap;

use anyhow::Result;

use super::header::{self, ColumnSchema};

/// Where one trip's contiguous row block lives in the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TripByteRange {
    /// Offset of the trip's first row
    pub start: usize,
    /// Offset just past the trip's last row and its terminator
    pub end: usize,
}

/// Built once per loaded table, on the first query. Maps each trip to the
/// byte range of its first contiguous row block; a query then decodes only
/// that slice.
pub struct TripIndex {
    pub ranges: BTreeMap<String, TripByteRange>,
    pub schema: ColumnSchema,
    /// Where data rows begin, after the header and its terminator
    pub data_start: usize,
    /// Some trip's rows weren't contiguous, so only its first block is
    /// indexed. Queries for it return a subset of its true rows.
    pub contiguity_violated: bool,
}

/// One forward pass over the whole table. This runs the same quote/CRLF
/// transitions as the row tokenizer, but materializes nothing: it only
/// tracks the current column, the bytes of the trip_id column, and where
/// the current row started.
pub fn build(bytes: &[u8]) -> Result<TripIndex> {
    let (schema, data_start) = header::resolve(bytes)?;
    let trip_col = schema.trip_id;

    let mut ranges: BTreeMap<String, TripByteRange> = BTreeMap::new();
    let mut open: Option<(String, usize)> = None;
    let mut contiguity_violated = false;

    let mut in_quotes = false;
    let mut pending_quote = false;
    let mut col = 0;
    let mut trip_bytes: Vec<u8> = Vec::new();
    let mut row_has_content = false;
    let mut row_start = data_start;

    let mut idx = data_start;
    while idx < bytes.len() {
        let byte = bytes[idx];
        idx += 1;

        if pending_quote {
            pending_quote = false;
            if byte == b'"' {
                if col == trip_col {
                    trip_bytes.push(b'"');
                }
                continue;
            }
            in_quotes = false;
        }
        if in_quotes {
            if byte == b'"' {
                pending_quote = true;
            } else if col == trip_col {
                trip_bytes.push(byte);
            }
            continue;
        }
        match byte {
            b'"' => {
                in_quotes = true;
                row_has_content = true;
            }
            b',' => {
                col += 1;
                row_has_content = true;
            }
            b'\r' | b'\n' => {
                if byte == b'\r' && bytes.get(idx) == Some(&b'\n') {
                    idx += 1;
                }
                if row_has_content {
                    note_row(
                        &trip_bytes,
                        row_start,
                        &mut ranges,
                        &mut open,
                        &mut contiguity_violated,
                    );
                }
                col = 0;
                trip_bytes.clear();
                row_has_content = false;
                row_start = idx;
            }
            _ => {
                if col == trip_col {
                    trip_bytes.push(byte);
                }
                row_has_content = true;
            }
        }
    }

    // A final row without a terminator
    if row_has_content {
        note_row(
            &trip_bytes,
            row_start,
            &mut ranges,
            &mut open,
            &mut contiguity_violated,
        );
    }
    // Close whatever block is still open at the end of the buffer
    if let Some((id, start)) = open.take() {
        ranges.insert(
            id,
            TripByteRange {
                start,
                end: bytes.len(),
            },
        );
    }

    Ok(TripIndex {
        ranges,
        schema,
        data_start,
        contiguity_violated,
    })
}

fn note_row(
    trip_bytes: &[u8],
    row_start: usize,
    ranges: &mut BTreeMap<String, TripByteRange>,
    open: &mut Option<(String, usize)>,
    contiguity_violated: &mut bool,
) {
    let trip_id = String::from_utf8_lossy(trip_bytes);
    let trip_id = trip_id.trim();

    if let Some((open_id, _)) = open {
        // Still inside the same block; its end is set when a different trip
        // shows up.
        if open_id == trip_id {
            return;
        }
    }
    if let Some((prev_id, start)) = open.take() {
        ranges.insert(
            prev_id,
            TripByteRange {
                start,
                end: row_start,
            },
        );
    }
    if ranges.contains_key(trip_id) {
        // This trip's rows aren't contiguous after all. Keep its first
        // block rather than trying to patch things up; a query for it
        // returns a subset, and a caller who cares runs the full scan.
        if !*contiguity_violated {
            warn!(
                "Rows for trip {} aren't contiguous in stop_times; only its first block is indexed",
                trip_id
            );
            *contiguity_violated = true;
        }
        return;
    }
    open.replace((trip_id.to_string(), row_start));
}
