// 🔤 Delimited-Text Codec
// Semicolon-separated text with RFC4180-style quoting, in both directions.
//
// Parsing is an explicit character state machine (no line pre-splitting), so
// quoted cells may carry the delimiter, doubled quotes and line breaks.
// Serializing goes through the csv writer with every cell force-quoted.

use crate::error::{ExchangeError, Result};
use csv::{QuoteStyle, Terminator, WriterBuilder};

/// Cell separator for every file this engine reads or writes.
pub const DELIMITER: char = ';';

/// UTF-8 byte-order mark, prepended so spreadsheet tools pick UTF-8.
pub const BOM: char = '\u{FEFF}';

// ============================================================================
// PARSED DATA
// ============================================================================

/// One data row, keyed by header. Empty cells are `None`, never `""`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Logical data-row number: header = 1, blank lines skipped (first data row = 2)
    pub line: usize,
    cells: Vec<(String, Option<String>)>,
}

impl Row {
    pub fn new(line: usize, cells: Vec<(String, Option<String>)>) -> Self {
        Row { line, cells }
    }

    /// Non-empty value under `header`. Missing and empty cells both give `None`.
    pub fn get(&self, header: &str) -> Option<&str> {
        self.cells
            .iter()
            .rev()
            .find(|(h, _)| h == header)
            .and_then(|(_, v)| v.as_deref())
    }

    /// Cells in header order
    pub fn cells(&self) -> &[(String, Option<String>)] {
        &self.cells
    }

    /// Cell values in header order, `None` rendered as an empty string.
    pub fn values(&self) -> Vec<String> {
        self.cells
            .iter()
            .map(|(_, v)| v.clone().unwrap_or_default())
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedFile {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

impl ParsedFile {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

// ============================================================================
// TOKENIZER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Nothing consumed for the current cell yet (leading blanks are skipped)
    FieldStart,
    Unquoted,
    Quoted,
    /// Inside a quoted span, just saw `"`: either an escape or the closing quote
    QuotedSeenQuote,
}

#[derive(Debug, Default)]
struct Cell {
    value: String,
    quoted: bool,
}

impl Cell {
    fn finish(mut self) -> (String, bool) {
        if !self.quoted {
            let trimmed = self.value.trim_end().len();
            self.value.truncate(trimmed);
        }
        (self.value, self.quoted)
    }
}

struct Tokenizer {
    state: State,
    cell: Cell,
    record: Vec<(String, bool)>,
    records: Vec<Vec<String>>,
}

impl Tokenizer {
    fn new() -> Self {
        Tokenizer {
            state: State::FieldStart,
            cell: Cell::default(),
            record: Vec::new(),
            records: Vec::new(),
        }
    }

    fn end_cell(&mut self) {
        let cell = std::mem::take(&mut self.cell);
        self.record.push(cell.finish());
        self.state = State::FieldStart;
    }

    fn end_record(&mut self) {
        self.end_cell();
        let record = std::mem::take(&mut self.record);

        // A blank line tokenizes as one empty, unquoted cell
        let blank = record.len() == 1 && !record[0].1 && record[0].0.is_empty();
        if !blank {
            self.records
                .push(record.into_iter().map(|(value, _)| value).collect());
        }
    }

    fn run(mut self, text: &str) -> Vec<Vec<String>> {
        let mut chars = text.chars().peekable();

        while let Some(c) = chars.next() {
            // CRLF counts as a single terminator
            let newline = c == '\n' || c == '\r';
            if c == '\r' && chars.peek() == Some(&'\n') && self.state != State::Quoted {
                chars.next();
            }

            match self.state {
                State::FieldStart => {
                    if c == '"' {
                        self.cell.quoted = true;
                        self.state = State::Quoted;
                    } else if c == DELIMITER {
                        self.end_cell();
                    } else if newline {
                        self.end_record();
                    } else if c == ' ' || c == '\t' {
                        // leading blanks are not part of the cell
                    } else {
                        self.cell.value.push(c);
                        self.state = State::Unquoted;
                    }
                }
                State::Unquoted => {
                    if c == DELIMITER {
                        self.end_cell();
                    } else if newline {
                        self.end_record();
                    } else {
                        self.cell.value.push(c);
                    }
                }
                State::Quoted => {
                    if c == '"' {
                        self.state = State::QuotedSeenQuote;
                    } else {
                        self.cell.value.push(c);
                    }
                }
                State::QuotedSeenQuote => {
                    if c == '"' {
                        self.cell.value.push('"');
                        self.state = State::Quoted;
                    } else if c == DELIMITER {
                        self.end_cell();
                    } else if newline {
                        self.end_record();
                    } else if c == ' ' || c == '\t' {
                        // blanks after the closing quote are dropped
                    } else {
                        // Stray text after a closing quote is kept literally
                        self.cell.value.push(c);
                        self.state = State::Unquoted;
                    }
                }
            }
        }

        // Flush the last record unless the text ended on a terminator.
        // An unbalanced quote keeps everything up to EOF as cell content.
        let pending = self.state != State::FieldStart
            || !self.record.is_empty()
            || self.cell.quoted;
        if pending {
            self.end_record();
        }

        self.records
    }
}

/// Split text into records of raw cell values (quotes removed, `""` unescaped).
/// Blank lines are discarded. No header handling.
pub fn tokenize(text: &str) -> Vec<Vec<String>> {
    let text = text.strip_prefix(BOM).unwrap_or(text);
    Tokenizer::new().run(text)
}

// ============================================================================
// PARSE / SERIALIZE
// ============================================================================

/// Parse delimited text: first record is the header, every following record
/// becomes a [`Row`] keyed by header name.
///
/// An empty file or a header-only file yields zero rows, not an error.
pub fn parse(text: &str) -> ParsedFile {
    let mut records = tokenize(text).into_iter();

    let headers = match records.next() {
        Some(headers) => headers,
        None => return ParsedFile::default(),
    };

    let rows = records
        .enumerate()
        .map(|(idx, values)| {
            let cells = headers
                .iter()
                .enumerate()
                .map(|(col, header)| {
                    let value = values.get(col).filter(|v| !v.is_empty()).cloned();
                    (header.clone(), value)
                })
                .collect();
            Row::new(idx + 2, cells) // +2: 1-indexed plus header row
        })
        .collect();

    ParsedFile { headers, rows }
}

/// Serialize a header line plus data rows: every cell quoted, internal quotes
/// doubled, `;` between cells, CRLF between lines, BOM in front.
pub fn serialize(headers: &[String], rows: &[Vec<String>]) -> Result<String> {
    let mut out = String::new();
    out.push(BOM);
    if headers.is_empty() {
        return Ok(out);
    }

    let mut writer = WriterBuilder::new()
        .delimiter(DELIMITER as u8)
        .quote_style(QuoteStyle::Always)
        .terminator(Terminator::CRLF)
        .flexible(true)
        .from_writer(Vec::new());

    writer.write_record(headers)?;
    for row in rows {
        writer.write_record(row)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| ExchangeError::Io(e.into_error()))?;
    let body = String::from_utf8(bytes).map_err(|e| ExchangeError::Decode(e.utf8_error()))?;

    // Lines are joined, not terminated
    out.push_str(body.strip_suffix("\r\n").unwrap_or(&body));
    Ok(out)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_basic_rows() {
        let parsed = parse("Email;Tipo de Usuario\r\nana@x.com;familia\nluis@x.com;clinica\n");

        assert_eq!(parsed.headers, strings(&["Email", "Tipo de Usuario"]));
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].line, 2);
        assert_eq!(parsed.rows[1].line, 3);
        assert_eq!(parsed.rows[1].get("Tipo de Usuario"), Some("clinica"));
    }

    #[test]
    fn test_empty_cell_is_null() {
        let parsed = parse("Email;Tipo de Usuario\n;administrador");
        let row = &parsed.rows[0];

        assert_eq!(row.get("Email"), None);
        assert_eq!(row.cells()[0], ("Email".to_string(), None));
        assert_eq!(row.get("Tipo de Usuario"), Some("administrador"));
    }

    #[test]
    fn test_quoted_semicolon_stays_one_cell() {
        let parsed = parse("Nombre;Curso\n\"Smith; John\";3º");

        assert_eq!(parsed.rows[0].get("Nombre"), Some("Smith; John"));
        assert_eq!(parsed.rows[0].get("Curso"), Some("3º"));
    }

    #[test]
    fn test_doubled_quotes_unescape() {
        let parsed = parse("A\n\"say \"\"hi\"\"\"");
        assert_eq!(parsed.rows[0].get("A"), Some("say \"hi\""));
    }

    #[test]
    fn test_quoted_newline_inside_cell() {
        let parsed = parse("A;B\n\"line one\r\nline two\";x\n");

        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].get("A"), Some("line one\r\nline two"));
        assert_eq!(parsed.rows[0].get("B"), Some("x"));
    }

    #[test]
    fn test_row_number_counts_records_not_physical_lines() {
        let parsed = parse("A;B\n\"uno\ndos\ntres\";x\n\n4;y\n");

        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].line, 2);
        // Physical line 6, logical data row 3
        assert_eq!(parsed.rows[1].line, 3);
        assert_eq!(parsed.rows[1].get("A"), Some("4"));
    }

    #[test]
    fn test_blank_lines_discarded() {
        let parsed = parse("A;B\n\n1;2\r\n   \r\n3;4\n\n");

        assert_eq!(parsed.rows.len(), 2);
        // Numbering follows non-blank data rows
        assert_eq!(parsed.rows[0].line, 2);
        assert_eq!(parsed.rows[1].line, 3);
        assert_eq!(parsed.rows[1].get("A"), Some("3"));
    }

    #[test]
    fn test_header_only_and_empty_file() {
        assert!(parse("").is_empty());
        assert!(parse("\r\n\r\n").is_empty());

        let header_only = parse("Email;Tipo de Usuario\r\n");
        assert_eq!(header_only.headers.len(), 2);
        assert!(header_only.is_empty());
    }

    #[test]
    fn test_bom_is_stripped() {
        let parsed = parse("\u{FEFF}Email\nana@x.com");
        assert_eq!(parsed.headers, strings(&["Email"]));
    }

    #[test]
    fn test_unquoted_cells_are_trimmed() {
        let parsed = parse("A;B\n  padded  ;\"  kept  \"");
        assert_eq!(parsed.rows[0].get("A"), Some("padded"));
        assert_eq!(parsed.rows[0].get("B"), Some("  kept  "));
    }

    #[test]
    fn test_short_and_long_rows() {
        let parsed = parse("A;B;C\n1\n1;2;3;4");

        assert_eq!(parsed.rows[0].get("B"), None);
        assert_eq!(parsed.rows[0].get("C"), None);
        assert_eq!(parsed.rows[1].values(), strings(&["1", "2", "3"]));
    }

    #[test]
    fn test_unbalanced_quote_runs_to_end() {
        let parsed = parse("A;B\n\"open;still open\n2;3");

        assert_eq!(parsed.rows.len(), 1);
        assert_eq!(parsed.rows[0].get("A"), Some("open;still open\n2;3"));
    }

    #[test]
    fn test_delimiter_runs() {
        let records = tokenize(";;;");
        assert_eq!(records, vec![strings(&["", "", "", ""])]);
    }

    #[test]
    fn test_serialize_format() {
        let out = serialize(
            &strings(&["Nombre", "Nota"]),
            &[strings(&["Ana \"la\" grande", "a;b"])],
        )
        .unwrap();

        assert_eq!(
            out,
            "\u{FEFF}\"Nombre\";\"Nota\"\r\n\"Ana \"\"la\"\" grande\";\"a;b\""
        );
    }

    #[test]
    fn test_serialize_header_only() {
        let out = serialize(&strings(&["A", "B"]), &[]).unwrap();
        assert_eq!(out, "\u{FEFF}\"A\";\"B\"");
    }

    #[test]
    fn test_serialize_empty_cell_parses_back_as_null() {
        let out = serialize(&strings(&["A", "B"]), &[strings(&["", "x"])]).unwrap();
        let parsed = parse(&out);

        assert_eq!(parsed.rows[0].get("A"), None);
        assert_eq!(parsed.rows[0].get("B"), Some("x"));
    }

    fn cell() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9 ;\",.\r\náñº]{1,12}"
    }

    fn table() -> impl Strategy<Value = (Vec<String>, Vec<Vec<String>>)> {
        (1usize..5).prop_flat_map(|cols| {
            (
                prop::collection::vec(cell(), cols),
                prop::collection::vec(prop::collection::vec(cell(), cols), 0..6),
            )
        })
    }

    proptest! {
        #[test]
        fn prop_serialize_then_parse_round_trips((headers, rows) in table()) {
            let text = serialize(&headers, &rows).unwrap();
            let parsed = parse(&text);

            prop_assert_eq!(&parsed.headers, &headers);
            prop_assert_eq!(parsed.rows.len(), rows.len());
            for (row, expected) in parsed.rows.iter().zip(rows.iter()) {
                prop_assert_eq!(&row.values(), expected);
            }
        }
    }
}
