use crate::db_models::DbTrackingState;
use crate::state::{StoredState, TrackingSession, TrackingSettings};
use anyhow::{Context as AnyhowContext, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use turso::{Builder, Connection, Row};

/// Durable home of the agent's settings and trip state.
///
/// Every method is a single atomic write or read, so a process torn down
/// between (or during) cycles finds either the old or the new state.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load(&self) -> Result<StoredState>;

    /// Stores the settings and a fresh session and marks tracking on.
    async fn start_session(
        &self,
        settings: &TrackingSettings,
        session: &TrackingSession,
    ) -> Result<()>;

    /// Writes the trip progress of `session`. Returns `false` without
    /// writing when the stored session is a different one (for example
    /// because tracking was disabled meanwhile).
    async fn save_progress(&self, session: &TrackingSession) -> Result<bool>;

    async fn save_interval(&self, interval_seconds: u64) -> Result<()>;

    /// Marks tracking off and forgets the session; settings are kept.
    async fn clear_session(&self) -> Result<()>;
}

/// Client for interacting with the Turso (SQLite) database.
pub struct DbClient {
    conn: Arc<Mutex<Connection>>,
    db_file: PathBuf,
}

const STATE_COLUMNS: &str = "user_id, endpoint_url, interval_seconds, session_id, currently_tracking, cumulative_distance_meters, previous_latitude, previous_longitude, is_first_fix_of_session";

impl DbClient {
    /// Creates a new `DbClient` and initializes the database schema.
    pub async fn new(db_file: &Path) -> Result<Self> {
        let turso_db_client = Builder::new_local(db_file.to_str().ok_or_else(|| {
            anyhow::anyhow!("Cannot convert path name to unicode: {:?}", db_file)
        })?)
        .build()
        .await
        .with_context(|| {
            format!("Failed to open db (and/or its wal file). File name: {db_file:?}")
        })?;

        let conn = Arc::new(Mutex::new(turso_db_client.connect()?));

        let client = DbClient {
            conn,
            db_file: PathBuf::from(db_file),
        };
        client
            .init_db()
            .await
            .with_context(|| format!("Failed to init db file {db_file:?} (and/or its wal file)"))?;
        Ok(client)
    }

    /// Creates the `tracking_state` table and its only row if missing.
    async fn init_db(&self) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tracking_state (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                endpoint_url TEXT NOT NULL,
                interval_seconds INTEGER NOT NULL,
                session_id TEXT,
                currently_tracking BOOL NOT NULL,
                cumulative_distance_meters REAL NOT NULL,
                previous_latitude REAL,
                previous_longitude REAL,
                is_first_fix_of_session BOOL NOT NULL
            )",
            (),
        )
        .await?;

        let mut results = conn
            .query("SELECT COUNT(*) FROM tracking_state WHERE id = 0", ())
            .await?;
        let existing = match results.next().await? {
            Some(row) => row.get::<u64>(0)?,
            None => 0,
        };
        if existing == 0 {
            let defaults = DbTrackingState::from(&StoredState::default());
            conn.execute(
                &format!("INSERT INTO tracking_state (id, {STATE_COLUMNS}) VALUES (0, ?, ?, ?, ?, ?, ?, ?, ?, ?)"),
                (
                    defaults.user_id,
                    defaults.endpoint_url,
                    defaults.interval_seconds,
                    defaults.session_id,
                    defaults.currently_tracking,
                    defaults.cumulative_distance_meters,
                    defaults.previous_latitude,
                    defaults.previous_longitude,
                    defaults.is_first_fix_of_session,
                ),
            )
            .await?;
        }
        Ok(())
    }

    /// Helper function to convert a `turso::rows::Row` into a `DbTrackingState`.
    fn map_row_to_state(row: Row) -> Result<DbTrackingState> {
        Ok(DbTrackingState {
            user_id: row.get::<String>(0)?,
            endpoint_url: row.get::<String>(1)?,
            interval_seconds: row.get::<u64>(2)?,
            session_id: row.get::<Option<String>>(3)?,
            currently_tracking: row.get::<bool>(4)?,
            cumulative_distance_meters: row.get::<f64>(5)?,
            previous_latitude: row.get::<Option<f64>>(6)?,
            previous_longitude: row.get::<Option<f64>>(7)?,
            is_first_fix_of_session: row.get::<bool>(8)?,
        })
    }
}

#[async_trait]
impl SessionStore for DbClient {
    async fn load(&self) -> Result<StoredState> {
        let mut results = self
            .conn
            .lock()
            .await
            .query(
                &format!("SELECT {STATE_COLUMNS} FROM tracking_state WHERE id = 0"),
                (),
            )
            .await
            .with_context(|| format!("Failed to load tracking state. File name: {:?}", self.db_file))?;
        let row = results
            .next()
            .await?
            .ok_or_else(|| anyhow::anyhow!("tracking state row is missing from {:?}", self.db_file))?;
        Ok(Self::map_row_to_state(row)?.into())
    }

    async fn start_session(
        &self,
        settings: &TrackingSettings,
        session: &TrackingSession,
    ) -> Result<()> {
        let row = DbTrackingState::from(&StoredState {
            settings: settings.clone(),
            currently_tracking: true,
            session: Some(session.clone()),
        });
        self.conn
            .lock()
            .await
            .execute(
                "UPDATE tracking_state SET user_id = ?, endpoint_url = ?, interval_seconds = ?, session_id = ?, currently_tracking = ?, cumulative_distance_meters = ?, previous_latitude = ?, previous_longitude = ?, is_first_fix_of_session = ? WHERE id = 0",
                (
                    row.user_id,
                    row.endpoint_url,
                    row.interval_seconds,
                    row.session_id,
                    row.currently_tracking,
                    row.cumulative_distance_meters,
                    row.previous_latitude,
                    row.previous_longitude,
                    row.is_first_fix_of_session,
                ),
            )
            .await
            .with_context(|| format!("Failed to start session. File name: {:?}", self.db_file))?;
        Ok(())
    }

    async fn save_progress(&self, session: &TrackingSession) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .await
            .execute(
                "UPDATE tracking_state SET cumulative_distance_meters = ?, previous_latitude = ?, previous_longitude = ?, is_first_fix_of_session = ? WHERE id = 0 AND currently_tracking = 1 AND session_id = ?",
                (
                    session.cumulative_distance_m,
                    session.previous_fix.map(|p| p.latitude),
                    session.previous_fix.map(|p| p.longitude),
                    session.is_first_fix_of_session,
                    session.session_id.clone(),
                ),
            )
            .await
            .with_context(|| format!("Failed to save trip progress. File name: {:?}", self.db_file))?;
        Ok(changed > 0)
    }

    async fn save_interval(&self, interval_seconds: u64) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "UPDATE tracking_state SET interval_seconds = ? WHERE id = 0",
                (interval_seconds,),
            )
            .await
            .with_context(|| format!("Failed to save interval. File name: {:?}", self.db_file))?;
        Ok(())
    }

    async fn clear_session(&self) -> Result<()> {
        self.conn
            .lock()
            .await
            .execute(
                "UPDATE tracking_state SET session_id = NULL, currently_tracking = 0, cumulative_distance_meters = 0.0, previous_latitude = NULL, previous_longitude = NULL, is_first_fix_of_session = 1 WHERE id = 0",
                (),
            )
            .await
            .with_context(|| format!("Failed to clear session. File name: {:?}", self.db_file))?;
        Ok(())
    }
}
