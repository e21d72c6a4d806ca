//! CSV ledgers
//!
//! Every ledger is UTF-8 with a BOM and a mandatory header row. Readers match
//! columns case-insensitively and ignore columns they do not know; writers
//! always emit the current schema.
//!
//! Two write disciplines exist:
//! - append-only ledgers ([`AppendLedger`]) add one pre-rendered row per
//!   `write_all` under an advisory lock on the ledger file
//! - the Prospect Ledger is replaced atomically (temp file, fsync, rename)

pub mod bounces;
pub mod harvest;
pub mod history;
pub mod prospects;
pub mod tracking;
pub mod unsubscribes;

pub use bounces::BounceLedger;
pub use harvest::HarvestStore;
pub use history::{HistoryIndex, SendHistory};
pub use prospects::ProspectLedger;
pub use tracking::ProcessedTracking;
pub use unsubscribes::{match_company, MatchOutcome, UnsubscribeLedger};

use crate::{Error, Result};
use csv::StringRecord;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// UTF-8 byte order mark written at the start of every ledger
pub const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Header lookup for one parsed ledger file
#[derive(Debug, Default)]
pub struct Table {
    columns: HashMap<String, usize>,
    records: Vec<StringRecord>,
}

impl Table {
    pub fn rows(&self) -> impl Iterator<Item = Row<'_>> {
        self.records.iter().enumerate().map(move |(index, record)| Row {
            columns: &self.columns,
            record,
            line: index + 2,
        })
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One data row with case-insensitive column access
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a StringRecord,
    /// 1-based line number in the file (header is line 1)
    pub line: usize,
}

impl<'a> Row<'a> {
    /// Trimmed cell for a column; `None` when the column is absent
    pub fn get(&self, name: &str) -> Option<&'a str> {
        let index = *self.columns.get(name)?;
        self.record.get(index).map(str::trim)
    }

    /// First present column among aliases
    pub fn get_any(&self, names: &[&str]) -> Option<&'a str> {
        names.iter().find_map(|name| self.get(name))
    }

    /// Trimmed non-empty cell
    pub fn non_empty(&self, names: &[&str]) -> Option<&'a str> {
        self.get_any(names).filter(|v| !v.is_empty())
    }
}

/// Read a ledger file. A missing file is an empty table.
pub fn read_table(path: &Path) -> Result<Table> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Table::default()),
        Err(e) => return Err(e.into()),
    };
    let body = bytes.strip_prefix(BOM).unwrap_or(&bytes);

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(body);

    let mut columns = HashMap::new();
    for (index, name) in reader.headers()?.iter().enumerate() {
        columns
            .entry(name.trim().trim_start_matches('\u{FEFF}').to_ascii_lowercase())
            .or_insert(index);
    }

    let mut records = Vec::new();
    for record in reader.records() {
        let record = record?;
        if record.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        records.push(record);
    }
    Ok(Table { columns, records })
}

/// Render rows (optionally preceded by BOM + header) into one buffer
pub fn render_rows<I, R>(header: Option<&[&str]>, rows: I) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let mut out = Vec::new();
    if header.is_some() {
        out.extend_from_slice(BOM);
    }
    {
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(&mut out);
        if let Some(header) = header {
            writer.write_record(header)?;
        }
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
    }
    Ok(out)
}

/// Replace `path` with `contents`: sibling temp file, fsync, rename
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    fs::create_dir_all(&parent).map_err(|e| Error::ledger_write(path, e))?;

    let mut temp =
        tempfile::NamedTempFile::new_in(&parent).map_err(|e| Error::ledger_write(path, e))?;
    temp.write_all(contents)
        .map_err(|e| Error::ledger_write(path, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| Error::ledger_write(path, e))?;
    temp.persist(path)
        .map_err(|e| Error::ledger_write(path, e.error))?;
    Ok(())
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Mapping between a ledger row type and its CSV columns
pub trait LedgerRecord: Sized {
    /// Current schema, in column order
    const COLUMNS: &'static [&'static str];

    fn to_cells(&self) -> Vec<String>;

    /// Parse one row; `None` skips the row with a warning
    fn from_row(row: &Row<'_>) -> Option<Self>;
}

/// Append-only CSV ledger of `R` rows
#[derive(Debug, Clone)]
pub struct AppendLedger<R> {
    path: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R: LedgerRecord> AppendLedger<R> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _record: PhantomData,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every row in file order
    pub fn load(&self) -> Result<Vec<R>> {
        let table = read_table(&self.path)?;
        let mut out = Vec::with_capacity(table.len());
        for row in table.rows() {
            match R::from_row(&row) {
                Some(record) => out.push(record),
                None => tracing::warn!(
                    ledger = %self.path.display(),
                    line = row.line,
                    "Skipping unreadable ledger row"
                ),
            }
        }
        Ok(out)
    }

    pub fn append(&self, record: &R) -> Result<()> {
        self.append_all(std::slice::from_ref(record))
    }

    /// Append rows. Header and BOM are written only when the file is new or
    /// empty; each call issues a single `write_all`.
    pub fn append_all(&self, records: &[R]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let path = &self.path;
        fs::create_dir_all(parent_dir(path)).map_err(|e| Error::ledger_write(path, e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(|e| Error::ledger_write(path, e))?;
        file.lock_exclusive()
            .map_err(|e| Error::ledger_write(path, e))?;

        let result = (|| -> Result<()> {
            let len = file.metadata()?.len();
            let mut buffer = Vec::new();
            if len > 0 && !ends_with_newline(&mut file)? {
                buffer.push(b'\n');
            }
            let header = if len == 0 { Some(R::COLUMNS) } else { None };
            buffer.extend(render_rows(header, records.iter().map(|r| r.to_cells()))?);
            file.write_all(&buffer)?;
            file.flush()?;
            Ok(())
        })();

        let _ = FileExt::unlock(&file);
        result.map_err(|e| match e {
            Error::LedgerWrite(_) => e,
            other => Error::ledger_write(path, other),
        })
    }
}

fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

/// Empty cell for `None`
pub(crate) fn opt_cell(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}
