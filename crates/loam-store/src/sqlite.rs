//! Relational storage backend.
//!
//! Records land in a single `samples` table with a hybrid layout: the
//! hottest field names (`temperature`, `humidity`) get typed columns, and
//! every other field rides along as a JSON object in the `extras` column.
//! New field names therefore never require a schema change.
//!
//! Connections come from a bounded pool. Writers queue on the pool rather
//! than on a table lock, and a queue wait past the pool's timeout surfaces
//! as an error instead of hanging the caller.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::RwLock;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use loam_types::{Record, SampleTable, TableBuilder, parse_range};

use crate::error::{Error, Result};
use crate::schema;
use crate::store::{self, Storage};

enum PoolState {
    Uninitialized,
    Ready(Pool<SqliteConnectionManager>),
    Closed,
}

/// SQLite-backed store behind a bounded connection pool.
pub struct SqliteStore {
    path: PathBuf,
    pool_size: u32,
    state: RwLock<PoolState>,
}

impl SqliteStore {
    /// Create a store for the database at `path`. The pool is built by
    /// [`Storage::initialize`]; nothing is opened before that.
    pub fn new(path: PathBuf, pool_size: u32) -> Self {
        Self {
            path,
            pool_size,
            state: RwLock::new(PoolState::Uninitialized),
        }
    }

    fn build_pool(&self) -> Result<Pool<SqliteConnectionManager>> {
        let manager = SqliteConnectionManager::file(&self.path).with_init(|conn| {
            // WAL lets readers proceed while a writer holds the lock.
            conn.execute_batch(
                "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = 5000;",
            )
        });
        Ok(Pool::builder().max_size(self.pool_size).build(manager)?)
    }

    fn check_ready(&self) -> Result<()> {
        match &*store::read_lock(&self.state) {
            PoolState::Ready(_) => Ok(()),
            PoolState::Uninitialized => Err(Error::NotInitialized),
            PoolState::Closed => Err(Error::Closed),
        }
    }

    /// Pooled connection, queueing while the pool is exhausted.
    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        let pool = match &*store::read_lock(&self.state) {
            PoolState::Ready(pool) => pool.clone(),
            PoolState::Uninitialized => return Err(Error::NotInitialized),
            PoolState::Closed => return Err(Error::Closed),
        };
        Ok(pool.get()?)
    }

    fn query_client(
        &self,
        client_id: &str,
        cutoff: Option<OffsetDateTime>,
    ) -> Result<Option<SampleTable>> {
        let conn = self.connection()?;

        let mut sql = String::from(
            "SELECT recorded_at, temperature, humidity, extras
             FROM samples WHERE client_id = ?",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(client_id.to_string())];
        if let Some(cutoff) = cutoff {
            sql.push_str(" AND recorded_at >= ?");
            params.push(Box::new(cutoff.unix_timestamp()));
        }
        sql.push_str(" ORDER BY recorded_at ASC");

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_ref.as_slice())?;

        let mut builder = TableBuilder::new();
        while let Some(row) = rows.next()? {
            builder.push(read_record(row, 0)?);
        }
        if builder.is_empty() {
            return Ok(None);
        }
        Ok(Some(builder.build()))
    }

    fn query_all(&self, cutoff: Option<OffsetDateTime>) -> Result<BTreeMap<String, SampleTable>> {
        let conn = self.connection()?;

        let mut sql = String::from(
            "SELECT client_id, recorded_at, temperature, humidity, extras FROM samples",
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(cutoff) = cutoff {
            sql.push_str(" WHERE recorded_at >= ?");
            params.push(Box::new(cutoff.unix_timestamp()));
        }
        sql.push_str(" ORDER BY client_id, recorded_at ASC");

        let params_ref: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_ref.as_slice())?;

        let mut builders: BTreeMap<String, TableBuilder> = BTreeMap::new();
        let mut failed: BTreeSet<String> = BTreeSet::new();
        while let Some(row) = rows.next()? {
            let client_id: String = row.get(0)?;
            if failed.contains(&client_id) {
                continue;
            }
            match read_record(row, 1) {
                Ok(record) => builders.entry(client_id).or_default().push(record),
                Err(err) => {
                    // One client's bad rows must not sink the aggregate.
                    warn!("Skipping client {client_id}: {err}");
                    builders.remove(&client_id);
                    failed.insert(client_id);
                }
            }
        }

        Ok(builders
            .into_iter()
            .map(|(client_id, builder)| (client_id, builder.build()))
            .collect())
    }
}

impl Storage for SqliteStore {
    fn initialize(&self) -> Result<()> {
        let mut state = store::write_lock(&self.state);
        match &*state {
            PoolState::Closed => return Err(Error::Closed),
            PoolState::Ready(_) => return Ok(()),
            PoolState::Uninitialized => {}
        }

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|err| Error::CreateDirectory {
                path: parent.to_path_buf(),
                source: err,
            })?;
        }

        let pool = self.build_pool()?;
        let conn = pool.get()?;
        schema::initialize(&conn)?;
        *state = PoolState::Ready(pool);

        info!(
            "Relational storage initialized at {} (pool: {} connections)",
            self.path.display(),
            self.pool_size
        );
        Ok(())
    }

    fn store(&self, client_id: &str, payload: Map<String, Value>) -> Result<()> {
        self.check_ready()?;
        store::check_client_id(client_id)?;

        let record = Record::from_payload(payload)?;

        let mut temperature = None;
        let mut humidity = None;
        let mut extras = Map::new();
        for (name, value) in &record.fields {
            match name.as_str() {
                "temperature" => temperature = Some(*value),
                "humidity" => humidity = Some(*value),
                _ => {
                    extras.insert(name.clone(), Value::from(*value));
                }
            }
        }
        let extras = if extras.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&extras)?)
        };

        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO samples (client_id, recorded_at, temperature, humidity, extras)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                client_id,
                record.timestamp.unix_timestamp(),
                temperature,
                humidity,
                extras,
            ],
        )?;

        debug!("Stored data for client {client_id}");
        Ok(())
    }

    fn list_clients(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;

        let mut stmt = conn.prepare("SELECT DISTINCT client_id FROM samples ORDER BY client_id")?;
        let clients = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;

        Ok(clients)
    }

    fn retrieve(&self, client_id: &str, range: &str) -> Result<Option<SampleTable>> {
        self.check_ready()?;

        let cutoff = parse_range(range, OffsetDateTime::now_utc());
        match self.query_client(client_id, cutoff) {
            Ok(Some(table)) => {
                debug!(
                    "Retrieved {} records for {client_id} (range: {range})",
                    table.len()
                );
                Ok(Some(table))
            }
            Ok(None) => Ok(None),
            Err(err) => {
                warn!("Failed to read data for {client_id}: {err}");
                Ok(None)
            }
        }
    }

    fn retrieve_all(&self, range: &str) -> Result<BTreeMap<String, SampleTable>> {
        self.check_ready()?;

        let cutoff = parse_range(range, OffsetDateTime::now_utc());
        match self.query_all(cutoff) {
            Ok(all) => {
                debug!("Retrieved data for {} clients (range: {range})", all.len());
                Ok(all)
            }
            Err(err) => {
                warn!("Failed to read data for all clients: {err}");
                Ok(BTreeMap::new())
            }
        }
    }

    fn close(&self) -> Result<()> {
        let mut state = store::write_lock(&self.state);
        if matches!(&*state, PoolState::Closed) {
            return Ok(());
        }
        // Dropping the pool closes its connections.
        *state = PoolState::Closed;

        info!("Relational storage closed");
        Ok(())
    }
}

/// Rebuild a record from a result row. `offset` is the index of the
/// `recorded_at` column.
fn read_record(row: &rusqlite::Row<'_>, offset: usize) -> Result<Record> {
    let recorded_at: i64 = row.get(offset)?;
    let timestamp = OffsetDateTime::from_unix_timestamp(recorded_at)
        .map_err(|err| Error::InvalidTimestamp(err.to_string()))?;

    let mut fields = BTreeMap::new();
    if let Some(temperature) = row.get::<_, Option<f64>>(offset + 1)? {
        fields.insert("temperature".to_string(), temperature);
    }
    if let Some(humidity) = row.get::<_, Option<f64>>(offset + 2)? {
        fields.insert("humidity".to_string(), humidity);
    }
    if let Some(extras) = row.get::<_, Option<String>>(offset + 3)? {
        let extras: Map<String, Value> = serde_json::from_str(&extras)?;
        for (name, value) in extras {
            if let Some(value) = value.as_f64() {
                fields.insert(name, value);
            }
        }
    }

    Ok(Record { timestamp, fields })
}
