use std::fmt;
use std::fs::File;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use csv::{Reader, ReaderBuilder, StringRecord, Terminator};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ingest::error::{LoadError, Result};

/// Row groups hold at most `chunk_size * GROUP_FACTOR` rows.
pub const GROUP_FACTOR: usize = 4;

/// One data line split into raw fields, positionally aligned to the key schema.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(Vec<String>);

impl Row {
    /// Wraps already-split fields.
    pub fn new(fields: Vec<String>) -> Self {
        Self(fields)
    }

    /// Raw fields in file order.
    pub fn fields(&self) -> &[String] {
        &self.0
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the row carries no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Consumes the row, returning its fields.
    pub fn into_fields(self) -> Vec<String> {
        self.0
    }

}

impl<S: Into<String>> FromIterator<S> for Row {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.0.join(", "))
    }
}

/// Single-byte field separator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Delimiter(u8);

impl Delimiter {
    /// Horizontal tab.
    pub const TAB: Delimiter = Delimiter(b'\t');
    /// Comma.
    pub const COMMA: Delimiter = Delimiter(b',');

    /// Separator byte.
    pub fn as_byte(self) -> u8 {
        self.0
    }
}

impl Default for Delimiter {
    fn default() -> Self {
        Delimiter::TAB
    }
}

impl FromStr for Delimiter {
    type Err = LoadError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw {
            "\t" | "\\t" | "tab" | "TAB" | "tsv" => return Ok(Delimiter::TAB),
            "," | "comma" | "csv" => return Ok(Delimiter::COMMA),
            "|" | "pipe" => return Ok(Delimiter(b'|')),
            ";" | "semicolon" => return Ok(Delimiter(b';')),
            _ => {}
        }
        match raw.as_bytes() {
            [byte] if byte.is_ascii() && *byte != b'\n' && *byte != b'\r' => Ok(Delimiter(*byte)),
            _ => Err(LoadError::argument(format!(
                "delimiter must be a single ASCII character, got {raw:?}"
            ))),
        }
    }
}

impl TryFrom<String> for Delimiter {
    type Error = LoadError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Delimiter> for String {
    fn from(value: Delimiter) -> Self {
        char::from(value.0).to_string()
    }
}

/// A contiguous slice of data rows handed from the reader to the partitioner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowGroup {
    /// Data-row offset of `rows[0]` counted from the first data row of the file.
    pub first_row: u64,
    /// Rows in file order.
    pub rows: Vec<Row>,
}

/// Streaming reader over a delimited text file.
///
/// Splitting is literal: no quoting or escaping, trailing empty fields are
/// kept, and blank lines are ignored. The file is never materialized; callers
/// read the header, skip to the start offset and then drain [`RowGroups`].
pub struct DelimitedFileReader {
    path: PathBuf,
    inner: Reader<File>,
    record: StringRecord,
    data_rows_read: u64,
}

impl fmt::Debug for DelimitedFileReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DelimitedFileReader")
            .field("path", &self.path)
            .field("data_rows_read", &self.data_rows_read)
            .finish()
    }
}

impl DelimitedFileReader {
    /// Opens `path` for streaming.
    pub fn open(path: impl AsRef<Path>, delimiter: Delimiter) -> Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LoadError::FileNotFound(path.to_path_buf()))
            }
            Err(err) => return Err(LoadError::io(path, err.into())),
        };
        let inner = ReaderBuilder::new()
            .delimiter(delimiter.as_byte())
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .double_quote(false)
            .terminator(Terminator::Any(b'\n'))
            .from_reader(file);
        debug!(path = %path.display(), delimiter = delimiter.as_byte(), "ingest.reader.opened");
        Ok(Self {
            path: path.to_path_buf(),
            inner,
            record: StringRecord::new(),
            data_rows_read: 0,
        })
    }

    /// Path being read.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consumes the first line. Returns `None` for an empty file.
    pub fn read_header(&mut self) -> Result<Option<Row>> {
        debug_assert_eq!(self.data_rows_read, 0, "header must be read first");
        self.read_line()
    }

    /// Reads and discards up to `count` data rows, returning how many were skipped.
    pub fn skip_rows(&mut self, count: u64) -> Result<u64> {
        let mut skipped = 0;
        while skipped < count && self.read_line()?.is_some() {
            skipped += 1;
            self.data_rows_read += 1;
        }
        Ok(skipped)
    }

    /// Next data row, or `None` at end of file.
    pub fn next_row(&mut self) -> Result<Option<Row>> {
        let row = self.read_line()?;
        if row.is_some() {
            self.data_rows_read += 1;
        }
        Ok(row)
    }

    /// Data rows consumed so far, skipped rows included.
    pub fn data_rows_read(&self) -> u64 {
        self.data_rows_read
    }

    /// Turns the reader into a lazy sequence of row groups sized for `chunk_size`.
    pub fn row_groups(self, chunk_size: NonZeroUsize) -> RowGroups {
        let group_size = chunk_size.get().saturating_mul(GROUP_FACTOR);
        RowGroups {
            reader: self,
            group_size,
            finished: false,
        }
    }

    /// Next non-blank line. Records end at `\n` only; a bare `\r` stays inside its field.
    fn read_line(&mut self) -> Result<Option<Row>> {
        loop {
            let more = self
                .inner
                .read_record(&mut self.record)
                .map_err(|err| LoadError::io(&self.path, err))?;
            if !more {
                return Ok(None);
            }
            let mut fields: Vec<String> = self.record.iter().map(str::to_owned).collect();
            if let Some(last) = fields.last_mut() {
                if last.ends_with('\r') {
                    last.pop();
                }
            }
            if fields.len() == 1 && fields[0].is_empty() {
                continue;
            }
            return Ok(Some(Row(fields)));
        }
    }
}

/// Finite, non-restartable sequence of row groups. Stops after the first error.
#[derive(Debug)]
pub struct RowGroups {
    reader: DelimitedFileReader,
    group_size: usize,
    finished: bool,
}

impl RowGroups {
    /// Largest number of rows a single group may hold.
    pub fn group_size(&self) -> usize {
        self.group_size
    }
}

impl Iterator for RowGroups {
    type Item = Result<RowGroup>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let first_row = self.reader.data_rows_read();
        let mut rows = Vec::with_capacity(self.group_size.min(64 * 1024));
        while rows.len() < self.group_size {
            match self.reader.next_row() {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {
                    self.finished = true;
                    break;
                }
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
            }
        }
        if rows.is_empty() {
            self.finished = true;
            return None;
        }
        Some(Ok(RowGroup { first_row, rows }))
    }
}
