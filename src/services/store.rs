//! SQLite storage for readings and trips.
//!
//! Readings are append-only; rows are never updated or deleted. Trips are
//! mutated only through `start_trip` / `end_active_trip`, and callers that
//! need the at-most-one-active invariant under concurrency must serialize
//! those two calls themselves (the API layer holds a mutex across them).

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use log::info;

use crate::db::models::{NewReading, NewTrip, StoredReading, Trip};
use crate::models::telemetry::Reading;
use crate::schema;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Hard cap on rows returned by the limit query, whatever the caller asks.
pub const MAX_QUERY_LIMIT: i64 = 1000;
pub const DEFAULT_QUERY_LIMIT: i64 = 20;

const BUSY_TIMEOUT_MS: u32 = 5000;

/// Applied to every pooled connection. WAL lets the reader endpoints run
/// while the writer appends; the busy timeout covers the remaining
/// write-write collisions.
#[derive(Debug)]
struct ConnectionSetup;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionSetup {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query("PRAGMA journal_mode = WAL;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        diesel::sql_query(format!("PRAGMA busy_timeout = {};", BUSY_TIMEOUT_MS))
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        diesel::sql_query("PRAGMA foreign_keys = ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct Store {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Store {
    /// Open (creating if needed) the database and run pending migrations.
    pub fn open(database_url: &str) -> Result<Self, String> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .connection_customizer(Box::new(ConnectionSetup))
            .build(manager)
            .map_err(|e| format!("DB connection failed: {}", e))?;

        let store = Store { pool };
        let mut conn = store.conn()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| format!("migrations failed: {}", e))?;
        if !applied.is_empty() {
            info!("Applied {} pending migration(s)", applied.len());
        }
        Ok(store)
    }

    #[cfg(test)]
    pub(crate) fn from_pool(pool: Pool<ConnectionManager<SqliteConnection>>) -> Self {
        Store { pool }
    }

    fn conn(&self) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, String> {
        self.pool.get().map_err(|e| format!("DB pool exhausted: {}", e))
    }

    /// Append one reading. Fully-null payloads are welcome; they record a
    /// tick where the bus had nothing to say.
    pub fn append_reading(&self, reading: &Reading) -> Result<StoredReading, String> {
        use schema::readings::dsl as R;

        let mut conn = self.conn()?;
        diesel::insert_into(R::readings)
            .values(NewReading::from(reading))
            .returning(StoredReading::as_returning())
            .get_result(&mut conn)
            .map_err(|e| format!("insert reading failed: {}", e))
    }

    /// The single most recent reading, or `None` on an empty table.
    pub fn latest_reading(&self) -> Result<Option<StoredReading>, String> {
        use schema::readings::dsl as R;

        let mut conn = self.conn()?;
        R::readings
            .order(R::id.desc())
            .first(&mut conn)
            .optional()
            .map_err(|e| format!("latest reading query failed: {}", e))
    }

    /// The most recent readings, newest first. `limit` defaults to
    /// [`DEFAULT_QUERY_LIMIT`] and is clamped to [`MAX_QUERY_LIMIT`].
    pub fn recent_readings(&self, limit: Option<i64>) -> Result<Vec<StoredReading>, String> {
        use schema::readings::dsl as R;

        let limit = limit.unwrap_or(DEFAULT_QUERY_LIMIT).clamp(1, MAX_QUERY_LIMIT);
        let mut conn = self.conn()?;
        R::readings
            .order(R::id.desc())
            .limit(limit)
            .load(&mut conn)
            .map_err(|e| format!("recent readings query failed: {}", e))
    }

    /// Readings with `start <= timestamp <= end`, ascending. Read-only and
    /// repeatable: running it twice returns the same rows.
    pub fn readings_in_range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<StoredReading>, String> {
        use schema::readings::dsl as R;

        let mut conn = self.conn()?;
        R::readings
            .filter(R::timestamp.ge(start))
            .filter(R::timestamp.le(end))
            .order(R::timestamp.asc())
            .then_order_by(R::id.asc())
            .load(&mut conn)
            .map_err(|e| format!("range query failed: {}", e))
    }

    pub fn reading_count(&self) -> Result<i64, String> {
        use schema::readings::dsl as R;

        let mut conn = self.conn()?;
        R::readings
            .count()
            .get_result(&mut conn)
            .map_err(|e| format!("reading count query failed: {}", e))
    }

    /// Start a trip at `started_at`. Any still-active trip is ended at the
    /// same instant first, so at most one trip row ever has a null end.
    pub fn start_trip(&self, started_at: DateTime<Utc>) -> Result<Trip, String> {
        use schema::trips::dsl as T;

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            diesel::update(T::trips.filter(T::ended_at.is_null()))
                .set(T::ended_at.eq(started_at))
                .execute(conn)?;
            diesel::insert_into(T::trips)
                .values(NewTrip { started_at })
                .returning(Trip::as_returning())
                .get_result(conn)
        })
        .map_err(|e: diesel::result::Error| format!("start trip failed: {}", e))
    }

    /// End the active trip at `ended_at`. Returns `None` when no trip is
    /// active.
    pub fn end_active_trip(&self, ended_at: DateTime<Utc>) -> Result<Option<Trip>, String> {
        use schema::trips::dsl as T;

        let mut conn = self.conn()?;
        conn.transaction(|conn| {
            let active: Option<Trip> = T::trips
                .filter(T::ended_at.is_null())
                .order(T::id.desc())
                .first(conn)
                .optional()?;
            match active {
                Some(trip) => diesel::update(T::trips.find(trip.id))
                    .set(T::ended_at.eq(ended_at))
                    .returning(Trip::as_returning())
                    .get_result(conn)
                    .map(Some),
                None => Ok(None),
            }
        })
        .map_err(|e: diesel::result::Error| format!("end trip failed: {}", e))
    }

    pub fn active_trip(&self) -> Result<Option<Trip>, String> {
        use schema::trips::dsl as T;

        let mut conn = self.conn()?;
        T::trips
            .filter(T::ended_at.is_null())
            .order(T::id.desc())
            .first(&mut conn)
            .optional()
            .map_err(|e| format!("active trip query failed: {}", e))
    }

    pub fn trip_by_id(&self, id: i32) -> Result<Option<Trip>, String> {
        use schema::trips::dsl as T;

        let mut conn = self.conn()?;
        T::trips
            .find(id)
            .first(&mut conn)
            .optional()
            .map_err(|e| format!("trip lookup failed: {}", e))
    }
}
