//! Flat-log storage backend.
//!
//! Each client owns one `{client_id}.csv` log under the data directory: a
//! `timestamp` column followed by one column per field name, in name
//! order. Records append a row; a record that introduces new fields
//! rewrites the log once with a widened header so every row always matches
//! the header.
//!
//! Reads go through a small cache of parsed tables keyed by client id and
//! fingerprinted by file metadata, so repeated queries against an
//! unchanged log skip the parse entirely.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use lru::LruCache;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, info, warn};

use loam_types::{Record, SampleTable, TableBuilder, parse_range};

use crate::error::{Error, Result};
use crate::store::{self, State, Storage};

/// Parsed tables kept in memory. Covers every client of a typical
/// deployment while bounding memory on pathological ones.
const CACHE_CAPACITY: usize = 32;

/// Change marker for a log file: modification time plus length.
type Fingerprint = (SystemTime, u64);

struct CacheEntry {
    fingerprint: Fingerprint,
    table: Arc<SampleTable>,
}

/// Flat-log store with a fingerprint-checked read cache.
pub struct FileStore {
    data_dir: PathBuf,
    state: RwLock<State>,
    /// Per-client log locks: writers exclusive, readers shared. Clients
    /// never contend with each other.
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
    cache: Mutex<LruCache<String, CacheEntry>>,
}

impl FileStore {
    /// Create a store rooted at `data_dir`. Nothing touches the
    /// filesystem until [`Storage::initialize`].
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            state: RwLock::new(State::Uninitialized),
            locks: Mutex::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    fn log_path(&self, client_id: &str) -> PathBuf {
        self.data_dir.join(format!("{client_id}.csv"))
    }

    fn client_lock(&self, client_id: &str) -> Arc<RwLock<()>> {
        let mut locks = store::lock(&self.locks);
        locks
            .entry(client_id.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    fn fingerprint(path: &Path) -> std::io::Result<Fingerprint> {
        let meta = fs::metadata(path)?;
        Ok((meta.modified()?, meta.len()))
    }

    /// Full parsed table for `client_id`, served from cache while the
    /// log's fingerprint is unchanged. `Ok(None)` when the log does not
    /// exist or holds no rows.
    fn read_cached(&self, client_id: &str) -> Result<Option<Arc<SampleTable>>> {
        let path = self.log_path(client_id);
        let lock = self.client_lock(client_id);
        let _guard = store::read_lock(&lock);

        let fingerprint = match Self::fingerprint(&path) {
            Ok(fingerprint) => fingerprint,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("No log for client {client_id}");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };

        {
            let mut cache = store::lock(&self.cache);
            if let Some(entry) = cache.get(client_id)
                && entry.fingerprint == fingerprint
            {
                return Ok(Some(entry.table.clone()));
            }
        }

        let table = read_table(&path)?;
        if table.is_empty() {
            return Ok(None);
        }

        let table = Arc::new(table);
        store::lock(&self.cache).put(
            client_id.to_string(),
            CacheEntry {
                fingerprint,
                table: table.clone(),
            },
        );
        Ok(Some(table))
    }
}

impl Storage for FileStore {
    fn initialize(&self) -> Result<()> {
        let mut state = store::write_lock(&self.state);
        if *state == State::Closed {
            return Err(Error::Closed);
        }

        fs::create_dir_all(&self.data_dir).map_err(|err| Error::CreateDirectory {
            path: self.data_dir.clone(),
            source: err,
        })?;
        *state = State::Ready;

        info!("Flat-log storage initialized at {}", self.data_dir.display());
        Ok(())
    }

    fn store(&self, client_id: &str, payload: Map<String, Value>) -> Result<()> {
        store::read_lock(&self.state).check_ready()?;
        store::check_client_id(client_id)?;

        let record = Record::from_payload(payload)?;
        let path = self.log_path(client_id);

        let lock = self.client_lock(client_id);
        {
            let _guard = store::write_lock(&lock);
            write_record(&path, &record)?;
        }

        // The log changed; drop any cached parse of it.
        store::lock(&self.cache).pop(client_id);

        debug!("Stored data for client {client_id}");
        Ok(())
    }

    fn list_clients(&self) -> Result<Vec<String>> {
        store::read_lock(&self.state).check_ready()?;

        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut clients = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("csv")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                clients.push(stem.to_string());
            }
        }
        clients.sort();
        Ok(clients)
    }

    fn retrieve(&self, client_id: &str, range: &str) -> Result<Option<SampleTable>> {
        store::read_lock(&self.state).check_ready()?;

        let table = match self.read_cached(client_id) {
            Ok(Some(table)) => table,
            Ok(None) => return Ok(None),
            Err(err) => {
                warn!("Failed to read data for {client_id}: {err}");
                return Ok(None);
            }
        };

        let cutoff = parse_range(range, OffsetDateTime::now_utc());
        let filtered = table.filter_since(cutoff);
        if filtered.is_empty() {
            return Ok(None);
        }

        debug!(
            "Retrieved {} records for {client_id} (range: {range})",
            filtered.len()
        );
        Ok(Some(filtered))
    }

    fn retrieve_all(&self, range: &str) -> Result<BTreeMap<String, SampleTable>> {
        store::read_lock(&self.state).check_ready()?;

        let mut all = BTreeMap::new();
        for client_id in self.list_clients()? {
            if let Some(table) = self.retrieve(&client_id, range)? {
                all.insert(client_id, table);
            }
        }

        debug!("Retrieved data for {} clients (range: {range})", all.len());
        Ok(all)
    }

    fn close(&self) -> Result<()> {
        let mut state = store::write_lock(&self.state);
        if *state == State::Closed {
            return Ok(());
        }
        *state = State::Closed;
        store::lock(&self.cache).clear();

        info!("Flat-log storage closed");
        Ok(())
    }
}

/// Append `record` to the log at `path`, creating it or rewriting it with
/// a widened header when the record introduces new fields.
fn write_record(path: &Path, record: &Record) -> Result<()> {
    match read_header(path)? {
        None => {
            let columns: Vec<String> = record.fields.keys().cloned().collect();
            let mut writer = csv::Writer::from_path(path)?;
            write_header_row(&mut writer, &columns)?;
            write_row(&mut writer, &columns, record)?;
            writer.flush()?;
            Ok(())
        }
        Some(columns) => {
            let unseen = record.fields.keys().any(|name| !columns.contains(name));
            if unseen {
                widen_log(path, &columns, record)
            } else {
                append_row(path, &columns, record)
            }
        }
    }
}

/// Field columns of an existing log, `None` when the log does not exist
/// (or is zero-length, which a crashed first write can leave behind).
fn read_header(path: &Path) -> Result<Option<Vec<String>>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() == 0 => return Ok(None),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut columns: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if columns.first().map(String::as_str) != Some("timestamp") {
        return Err(Error::MalformedLog {
            path: path.to_path_buf(),
            message: "missing timestamp column".to_string(),
        });
    }
    columns.remove(0);
    Ok(Some(columns))
}

fn append_row(path: &Path, columns: &[String], record: &Record) -> Result<()> {
    let file = fs::OpenOptions::new().append(true).open(path)?;
    let mut writer = csv::Writer::from_writer(file);
    write_row(&mut writer, columns, record)?;
    writer.flush()?;
    Ok(())
}

/// Rewrite the log with the union of the existing columns and the
/// record's fields, then append the record. Goes through a temp file and
/// a rename so concurrent processes see the old log or the new one, never
/// a partial one.
fn widen_log(path: &Path, existing: &[String], record: &Record) -> Result<()> {
    let columns: BTreeSet<String> = existing
        .iter()
        .cloned()
        .chain(record.fields.keys().cloned())
        .collect();
    let columns: Vec<String> = columns.into_iter().collect();

    let mut reader = csv::Reader::from_path(path)?;
    let old_header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let positions: Vec<Option<usize>> = columns
        .iter()
        .map(|column| old_header.iter().position(|h| h == column))
        .collect();

    let tmp_path = path.with_extension("csv.tmp");
    let mut writer = csv::Writer::from_path(&tmp_path)?;
    write_header_row(&mut writer, &columns)?;

    for row in reader.records() {
        let row = row?;
        let mut out = Vec::with_capacity(columns.len() + 1);
        out.push(row.get(0).unwrap_or_default());
        for position in &positions {
            out.push(position.and_then(|i| row.get(i)).unwrap_or_default());
        }
        writer.write_record(&out)?;
    }

    write_row(&mut writer, &columns, record)?;
    writer.flush()?;
    drop(writer);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn write_header_row<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    columns: &[String],
) -> Result<()> {
    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push("timestamp");
    header.extend(columns.iter().map(String::as_str));
    writer.write_record(&header)?;
    Ok(())
}

fn write_row<W: std::io::Write>(
    writer: &mut csv::Writer<W>,
    columns: &[String],
    record: &Record,
) -> Result<()> {
    let timestamp = record
        .timestamp
        .format(&Rfc3339)
        .map_err(|err| Error::InvalidTimestamp(err.to_string()))?;

    let mut row = Vec::with_capacity(columns.len() + 1);
    row.push(timestamp);
    for column in columns {
        row.push(match record.fields.get(column) {
            Some(value) => value.to_string(),
            None => String::new(),
        });
    }
    writer.write_record(&row)?;
    Ok(())
}

/// Parse a full log into a table sorted ascending by timestamp. Blank
/// cells mark fields a row never reported; non-numeric cells are skipped.
fn read_table(path: &Path) -> Result<SampleTable> {
    let mut reader = csv::Reader::from_path(path)?;
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if header.first().map(String::as_str) != Some("timestamp") {
        return Err(Error::MalformedLog {
            path: path.to_path_buf(),
            message: "missing timestamp column".to_string(),
        });
    }
    let columns = &header[1..];

    let mut builder = TableBuilder::new();
    for row in reader.records() {
        let row = row?;
        let raw = row.get(0).unwrap_or_default();
        let timestamp =
            OffsetDateTime::parse(raw, &Rfc3339).map_err(|err| Error::MalformedLog {
                path: path.to_path_buf(),
                message: format!("bad timestamp {raw:?}: {err}"),
            })?;

        let mut fields = BTreeMap::new();
        for (i, column) in columns.iter().enumerate() {
            let cell = row.get(i + 1).unwrap_or_default();
            if cell.is_empty() {
                continue;
            }
            match cell.parse::<f64>() {
                Ok(value) => {
                    fields.insert(column.clone(), value);
                }
                Err(_) => debug!("Skipping non-numeric cell {cell:?} in {}", path.display()),
            }
        }
        builder.push(Record { timestamp, fields });
    }
    Ok(builder.build())
}
