//! SQLite-backed store.
//!
//! One database file per user, fixed four-table schema, no referential
//! integrity between tables. Schema creation happens once at startup; every
//! other operation opens a short-lived connection and commits its own
//! transaction. The per-operation open costs a little but means a crashed
//! worker can never pin a lock past the storage layer's busy timeout, and
//! any number of workers can write without sharing connection state.

use anyhow::{Context, Result};
use gsm_ingest::Record;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Database file name under the per-user data directory.
pub const DB_FILE: &str = "anti.sqlite3";

/// Concurrent writers block up to this long instead of failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(60);

const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS PACKETS(
    UnixTime REAL,
    PeopleTime TEXT,
    CHANNEL TEXT,
    DBM TEXT,
    ARFCN TEXT,
    TMSI TEXT,
    IMSI TEXT,
    LAC TEXT,
    CID TEXT,
    MCC TEXT,
    MNC TEXT,
    IMEISV TEXT,
    FrameNumber TEXT,
    HASH TEXT PRIMARY KEY
);
CREATE TABLE IF NOT EXISTS PAGE(
    HASH TEXT PRIMARY KEY,
    UnixTime REAL,
    PeopleTime TEXT,
    CHANNEL TEXT,
    DBM TEXT,
    ARFCN TEXT,
    FrameNumber TEXT,
    idType TEXT,
    msgType TEXT,
    MODE TEXT,
    reqChanOne TEXT,
    reqChanTwo TEXT
);
CREATE TABLE IF NOT EXISTS LAC_CID(
    HASH TEXT PRIMARY KEY,
    UnixTime REAL,
    PeopleTime TEXT,
    CHANNEL TEXT,
    DBM TEXT,
    ARFCN TEXT,
    FrameNumber TEXT,
    LAC TEXT,
    CID TEXT
);
CREATE TABLE IF NOT EXISTS NEIGHBORS(
    HASH TEXT PRIMARY KEY,
    UnixTime REAL,
    PeopleTime TEXT,
    CHANNEL TEXT,
    DBM TEXT,
    ARFCN TEXT,
    FrameNumber TEXT,
    LAC TEXT,
    CID TEXT,
    N_CELL_LAC TEXT
);
";

/// Handle to the on-disk store. Cheap to clone; holds no connection.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
}

impl Store {
    /// `anti.sqlite3` under the platform's per-user data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DB_FILE)
    }

    /// Open the store and create the schema if it is not there yet.
    pub fn open(path: PathBuf) -> Result<Self> {
        let store = Self { path };
        let conn = store.connect()?;
        conn.execute_batch(SCHEMA)
            .with_context(|| format!("failed to create schema in {}", store.path.display()))?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)
            .with_context(|| format!("failed to open database {}", self.path.display()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }

    // ── Writes ───────────────────────────────────────────────────────────

    /// Insert one record into its variant's table.
    ///
    /// A duplicate primary key is skipped with a warning — it means the same
    /// hash was produced twice, which is tolerable; everything else gets one
    /// retry before escalating to the caller.
    pub fn insert(&self, record: &Record) -> Result<()> {
        let conn = self.connect()?;
        match insert_record(&conn, record) {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => {
                warn!(
                    "duplicate hash {} skipped ({})",
                    record.header().hash,
                    record.variant().table()
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    "insert into {} failed, retrying once: {}",
                    record.variant().table(),
                    e
                );
                match insert_record(&conn, record) {
                    Ok(_) => Ok(()),
                    Err(e) if is_duplicate_key(&e) => Ok(()),
                    Err(e) => Err(e).with_context(|| {
                        format!("insert into {} failed after retry", record.variant().table())
                    }),
                }
            }
        }
    }

    // ── Rule queries ─────────────────────────────────────────────────────

    /// `(LAC, CID)` identities advertised on two or more distinct ARFCNs.
    pub fn imposter_cells(&self) -> Result<Vec<(String, String)>> {
        self.read("imposter cell scan", |conn| {
            let mut stmt = conn.prepare(
                "SELECT LAC, CID
                 FROM LAC_CID
                 GROUP BY LAC, CID
                 HAVING COUNT(DISTINCT ARFCN) > 1",
            )?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }

    /// LACs seen in neighbour reports that never appear as a serving cell's
    /// own LAC (encoded, provisionally, as rows where `LAC = CID`).
    pub fn inconsistent_lacs(&self) -> Result<Vec<String>> {
        self.read("inconsistent LAC scan", |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT LAC FROM NEIGHBORS
                 EXCEPT
                 SELECT DISTINCT LAC FROM NEIGHBORS WHERE LAC = CID",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// LACs containing exactly one distinct cell identity.
    pub fn lonely_lacs(&self) -> Result<Vec<String>> {
        self.read("lonely LAC scan", |conn| {
            let mut stmt = conn.prepare(
                "SELECT LAC
                 FROM (SELECT DISTINCT LAC, CID FROM LAC_CID)
                 GROUP BY LAC
                 HAVING COUNT(*) = 1",
            )?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect()
        })
    }

    /// Run a read query with a one-shot retry for transient failures.
    fn read<T>(
        &self,
        what: &str,
        f: impl Fn(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self.connect()?;
        match f(&conn) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!("{} failed, retrying once: {}", what, e);
                f(&conn).with_context(|| format!("{} failed after retry", what))
            }
        }
    }
}

fn insert_record(conn: &Connection, record: &Record) -> rusqlite::Result<usize> {
    let h = record.header();
    match record {
        Record::Generic(_) => conn.execute(
            "INSERT INTO PACKETS (UnixTime, PeopleTime, CHANNEL, DBM, ARFCN, FrameNumber, HASH)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                h.unix_time,
                h.iso_time,
                h.channel.to_string(),
                h.signal_dbm.to_string(),
                h.arfcn.to_string(),
                h.frame_nr.to_string(),
                h.hash,
            ],
        ),
        Record::Paging { id_type, msg_type, mode, chan_req_ch1, chan_req_ch2, .. } => conn
            .execute(
                "INSERT INTO PAGE (HASH, UnixTime, PeopleTime, CHANNEL, DBM, ARFCN, FrameNumber,
                                   idType, msgType, MODE, reqChanOne, reqChanTwo)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    h.hash,
                    h.unix_time,
                    h.iso_time,
                    h.channel.to_string(),
                    h.signal_dbm.to_string(),
                    h.arfcn.to_string(),
                    h.frame_nr.to_string(),
                    id_type,
                    msg_type,
                    mode,
                    chan_req_ch1,
                    chan_req_ch2,
                ],
            ),
        Record::LacCid { lac, cid, .. } => conn.execute(
            "INSERT INTO LAC_CID (HASH, UnixTime, PeopleTime, CHANNEL, DBM, ARFCN, FrameNumber,
                                  LAC, CID)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                h.hash,
                h.unix_time,
                h.iso_time,
                h.channel.to_string(),
                h.signal_dbm.to_string(),
                h.arfcn.to_string(),
                h.frame_nr.to_string(),
                lac.to_string(),
                cid.to_string(),
            ],
        ),
        Record::Neighbors { lac, cid, n_cell_lac, .. } => conn.execute(
            "INSERT INTO NEIGHBORS (HASH, UnixTime, PeopleTime, CHANNEL, DBM, ARFCN, FrameNumber,
                                    LAC, CID, N_CELL_LAC)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                h.hash,
                h.unix_time,
                h.iso_time,
                h.channel.to_string(),
                h.signal_dbm.to_string(),
                h.arfcn.to_string(),
                h.frame_nr.to_string(),
                lac.to_string(),
                cid.to_string(),
                n_cell_lac.to_string(),
            ],
        ),
    }
}

fn is_duplicate_key(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
