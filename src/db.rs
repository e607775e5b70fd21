use std::{collections::HashSet, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use tracing::debug;

use crate::error::StoreError;
use crate::models::{Event, StoredEvent};
use crate::utils;

// Stays well below SQLITE_MAX_VARIABLE_NUMBER on older builds.
const ID_CHUNK: usize = 500;

const SELECT_COLUMNS: &str = "SELECT id, name, registration_is_open, start_date, end_date, city,
        date_scraped, created_at, updated_at
   FROM events";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(&utils::database_path())
    }

    pub fn open(path: &Path) -> Result<Self, StoreError> {
        utils::ensure_parent(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self { conn };
        store.init_schema()?;
        debug!(path = ?path, "event store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> rusqlite::Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS events(
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                registration_is_open INTEGER NOT NULL,
                start_date TEXT NOT NULL,
                end_date TEXT NOT NULL,
                city TEXT NOT NULL,
                date_scraped TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_start_date ON events(start_date);
            CREATE INDEX IF NOT EXISTS idx_events_registration ON events(registration_is_open);",
        )?;
        Ok(())
    }

    pub fn upsert_event(&self, event: &Event) -> rusqlite::Result<()> {
        upsert_with(&self.conn, event, Utc::now())
    }

    /// Upserts the whole batch in one transaction and returns the ids written.
    /// Nothing is committed if any row fails.
    pub fn upsert_events(&mut self, events: &[Event]) -> rusqlite::Result<HashSet<String>> {
        self.upsert_events_at(events, Utc::now())
    }

    pub(crate) fn upsert_events_at(
        &mut self,
        events: &[Event],
        now: DateTime<Utc>,
    ) -> rusqlite::Result<HashSet<String>> {
        let tx = self.conn.transaction()?;
        let mut written = HashSet::with_capacity(events.len());
        for event in events {
            upsert_with(&tx, event, now)?;
            written.insert(event.id.clone());
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn all_ids(&self) -> rusqlite::Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM events")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let ids = rows.collect::<rusqlite::Result<HashSet<String>>>()?;
        Ok(ids)
    }

    pub fn all_events(&self) -> rusqlite::Result<Vec<StoredEvent>> {
        self.query_events(&format!("{SELECT_COLUMNS} ORDER BY start_date, id"), [])
    }

    pub fn open_registration_events(&self) -> rusqlite::Result<Vec<StoredEvent>> {
        self.query_events(
            &format!("{SELECT_COLUMNS} WHERE registration_is_open = 1 ORDER BY start_date, id"),
            [],
        )
    }

    pub fn events_by_ids(&self, ids: &HashSet<String>) -> rusqlite::Result<Vec<StoredEvent>> {
        let ids: Vec<&String> = ids.iter().collect();
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("{SELECT_COLUMNS} WHERE id IN ({placeholders})");
            out.extend(self.query_events(&sql, params_from_iter(chunk.iter()))?);
        }
        out.sort_by(|a, b| {
            a.event
                .start_date
                .cmp(&b.event.start_date)
                .then_with(|| a.event.id.cmp(&b.event.id))
        });
        Ok(out)
    }

    pub fn get_event(&self, id: &str) -> rusqlite::Result<Option<StoredEvent>> {
        self.conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id],
                row_to_event,
            )
            .optional()
    }

    pub fn count(&self) -> rusqlite::Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    #[cfg(test)]
    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    fn query_events<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> rusqlite::Result<Vec<StoredEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, row_to_event)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn upsert_with(conn: &Connection, event: &Event, now: DateTime<Utc>) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO events (id, name, registration_is_open, start_date, end_date, city,
                             date_scraped, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(id) DO UPDATE SET
           name = excluded.name,
           registration_is_open = excluded.registration_is_open,
           start_date = excluded.start_date,
           end_date = excluded.end_date,
           city = excluded.city,
           date_scraped = excluded.date_scraped,
           updated_at = excluded.updated_at",
        params![
            event.id,
            event.name,
            event.registration_is_open,
            event.start_date,
            event.end_date,
            event.city,
            event.date_scraped,
            now
        ],
    )?;
    Ok(())
}

fn row_to_event(row: &Row<'_>) -> rusqlite::Result<StoredEvent> {
    Ok(StoredEvent {
        event: Event {
            id: row.get(0)?,
            name: row.get(1)?,
            registration_is_open: row.get(2)?,
            start_date: row.get(3)?,
            end_date: row.get(4)?,
            city: row.get(5)?,
            date_scraped: row.get(6)?,
        },
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
