/// Push parser for the delimited stop-visit table. Input arrives as byte
/// chunks split at arbitrary positions; quote state, a possible escaped
/// quote pair, a CRLF pair, and the partially accumulated field all carry
/// across chunk boundaries, so the rows produced are identical no matter
/// how the input is chopped up.
///
/// There are exactly two modes, inside a quoted field and inside a bare
/// field. A `"` toggles between them, except that `""` inside quotes emits
/// one literal quote. Outside quotes, `,` ends the field and `\r`/`\n`/
/// `\r\n` ends the row.
pub struct Tokenizer {
    in_quotes: bool,
    // A '"' arrived inside a quoted field, and the byte after it hasn't.
    // That next byte decides: another '"' is an escaped literal quote,
    // anything else means the field's quoting just closed.
    pending_quote: bool,
    // A '\r' ended a row; one immediately following '\n' is part of the
    // same terminator, even when it lands in the next chunk.
    pending_linefeed: bool,
    field: Vec<u8>,
    fields: Vec<String>,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            in_quotes: false,
            pending_quote: false,
            pending_linefeed: false,
            field: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Feeds one chunk, invoking `on_row` with the fields of every row that
    /// completes inside it. The slice is reused between rows; callers copy
    /// out whatever they keep.
    pub fn feed(&mut self, chunk: &[u8], on_row: &mut impl FnMut(&[String])) {
        for &byte in chunk {
            if self.pending_linefeed {
                self.pending_linefeed = false;
                if byte == b'\n' {
                    continue;
                }
            }
            if self.pending_quote {
                self.pending_quote = false;
                if byte == b'"' {
                    self.field.push(b'"');
                    continue;
                }
                self.in_quotes = false;
            }
            if self.in_quotes {
                if byte == b'"' {
                    self.pending_quote = true;
                } else {
                    self.field.push(byte);
                }
                continue;
            }
            match byte {
                b'"' => self.in_quotes = true,
                b',' => self.end_field(),
                b'\r' | b'\n' => {
                    self.pending_linefeed = byte == b'\r';
                    self.end_row(on_row);
                }
                _ => self.field.push(byte),
            }
        }
    }

    /// Flushes a final row that has no terminator.
    pub fn finish(&mut self, on_row: &mut impl FnMut(&[String])) {
        self.pending_quote = false;
        self.pending_linefeed = false;
        self.in_quotes = false;
        self.end_row(on_row);
    }

    fn end_field(&mut self) {
        // Malformed sequences become replacement characters; one bad byte
        // never aborts a scan.
        self.fields
            .push(String::from_utf8_lossy(&self.field).into_owned());
        self.field.clear();
    }

    fn end_row(&mut self, on_row: &mut impl FnMut(&[String])) {
        // Blank line
        if self.fields.is_empty() && self.field.is_empty() {
            return;
        }
        self.end_field();
        on_row(&self.fields);
        self.fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &[u8], chunk_size: usize) -> Vec<Vec<String>> {
        let mut rows = Vec::new();
        let mut tokenizer = Tokenizer::new();
        let mut handle = |fields: &[String]| rows.push(fields.to_vec());
        for chunk in input.chunks(chunk_size.max(1)) {
            tokenizer.feed(chunk, &mut handle);
        }
        tokenizer.finish(&mut handle);
        rows
    }

    #[test]
    fn plain_rows() {
        let rows = tokenize(b"a,b,c\nd,e,f\n", 1024);
        assert_eq!(rows, vec![vec!["a", "b", "c"], vec!["d", "e", "f"]]);
    }

    #[test]
    fn escaped_quotes() {
        let rows = tokenize(b"\"a,b\"\"c\",d\n", 1024);
        assert_eq!(rows, vec![vec!["a,b\"c", "d"]]);
    }

    #[test]
    fn newline_inside_quotes() {
        let rows = tokenize(b"\"line1\r\nline2\",x\n", 1024);
        assert_eq!(rows, vec![vec!["line1\r\nline2", "x"]]);
    }

    #[test]
    fn unterminated_last_row() {
        let rows = tokenize(b"a,b\nc,d", 1024);
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn blank_lines_skipped() {
        let rows = tokenize(b"a,b\n\n\r\nc,d\n", 1024);
        assert_eq!(rows, vec![vec!["a", "b"], vec!["c", "d"]]);
    }

    #[test]
    fn mixed_terminators() {
        let rows = tokenize(b"a\rb\r\nc\nd", 1024);
        assert_eq!(rows, vec![vec!["a"], vec!["b"], vec!["c"], vec!["d"]]);
    }

    // The property the chunking exists for: any split of the same bytes
    // produces identical rows, even when a CRLF pair, an escaped quote, or
    // a multi-byte character straddles the boundary.
    #[test]
    fn chunk_boundary_invariance() {
        let input = "tripñ,\"say \"\"hi\"\"\",x\r\nnext,row,é\r\nlast,one,z".as_bytes();
        let reference = tokenize(input, input.len());
        for chunk_size in 1..input.len() {
            assert_eq!(
                tokenize(input, chunk_size),
                reference,
                "chunk size {} disagrees",
                chunk_size
            );
        }
    }

    #[test]
    fn invalid_utf8_becomes_replacement() {
        let rows = tokenize(b"a,\xff\xfe,b\n", 1024);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], "a");
        assert_eq!(rows[0][2], "b");
        assert!(rows[0][1].contains('\u{FFFD}'));
    }
}
