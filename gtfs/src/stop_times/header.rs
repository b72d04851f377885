use anyhow::Result;

/// Column layout of the stop-visit table, resolved once from its header row.
#[derive(Clone, Debug)]
pub struct ColumnSchema {
    /// Column names exactly as they appear in the header, trimmed
    pub columns: Vec<String>,
    pub trip_id: usize,
    pub stop_id: Option<usize>,
    pub stop_sequence: Option<usize>,
    pub arrival_time: Option<usize>,
    pub departure_time: Option<usize>,
}

/// Parses the header row, returning the schema and the offset where data
/// rows begin. Only trip_id is mandatory; a row's output field for any
/// other missing column is just left empty.
pub fn resolve(bytes: &[u8]) -> Result<(ColumnSchema, usize)> {
    let bom = if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        3
    } else {
        0
    };

    let mut header_end = bytes.len();
    let mut data_start = bytes.len();
    for (idx, byte) in bytes.iter().enumerate().skip(bom) {
        if *byte == b'\r' || *byte == b'\n' {
            header_end = idx;
            data_start = idx + 1;
            if *byte == b'\r' && bytes.get(idx + 1) == Some(&b'\n') {
                data_start += 1;
            }
            break;
        }
    }

    let line = String::from_utf8_lossy(&bytes[bom..header_end]);
    let columns = split_header(&line);
    let find = |name: &str| columns.iter().position(|x| x == name);
    let trip_id = match find("trip_id") {
        Some(x) => x,
        None => bail!("stop_times header has no trip_id column: {:?}", columns),
    };
    Ok((
        ColumnSchema {
            trip_id,
            stop_id: find("stop_id"),
            stop_sequence: find("stop_sequence"),
            arrival_time: find("arrival_time"),
            departure_time: find("departure_time"),
            columns,
        },
        data_start,
    ))
}

// Headers are simple comma-separated names in practice, but tolerate quoted
// ones anyway.
fn split_header(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                chars.next();
                current.push('"');
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    fields.push(current.trim().to_string());
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_all_columns() {
        let input = b"trip_id,stop_id,stop_sequence,arrival_time,departure_time\nA,S1,1,,\n";
        let (schema, data_start) = resolve(input).unwrap();
        assert_eq!(schema.trip_id, 0);
        assert_eq!(schema.stop_id, Some(1));
        assert_eq!(schema.stop_sequence, Some(2));
        assert_eq!(schema.arrival_time, Some(3));
        assert_eq!(schema.departure_time, Some(4));
        assert_eq!(&input[data_start..], b"A,S1,1,,\n");
    }

    #[test]
    fn strips_bom_and_crlf() {
        let input = b"\xEF\xBB\xBFtrip_id,stop_id\r\nA,S1\r\n";
        let (schema, data_start) = resolve(input).unwrap();
        assert_eq!(schema.columns, vec!["trip_id", "stop_id"]);
        assert_eq!(schema.trip_id, 0);
        assert_eq!(&input[data_start..], b"A,S1\r\n");
    }

    #[test]
    fn missing_trip_id() {
        assert!(resolve(b"stop_id,stop_sequence\nS1,1\n").is_err());
        assert!(resolve(b"").is_err());
    }

    #[test]
    fn optional_columns_absent() {
        let (schema, _) = resolve(b"stop_id,trip_id\nS1,A\n").unwrap();
        assert_eq!(schema.trip_id, 1);
        assert_eq!(schema.stop_id, Some(0));
        assert_eq!(schema.stop_sequence, None);
        assert_eq!(schema.arrival_time, None);
        assert_eq!(schema.departure_time, None);
    }

    #[test]
    fn quoted_header_names() {
        let (schema, _) = resolve(b"\"trip_id\", \"stop_id\"\nA,S1\n").unwrap();
        assert_eq!(schema.trip_id, 0);
        assert_eq!(schema.stop_id, Some(1));
    }
}
