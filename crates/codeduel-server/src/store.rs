use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use codeduel_core::room::{ParticipantId, Room};
use codeduel_core::submission::AcceptedSubmission;

/// Durable mirror of room history plus the account slice the engine is
/// allowed to touch (identity lookup and the win counter). Rooms are
/// mirrored lazily from the in-memory registry; rows survive after a room
/// leaves the live map.
#[derive(Clone)]
pub struct MatchStore {
    pool: SqlitePool,
}

/// Identity fields the engine reads from the account store.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub handle: String,
}

/// A persisted room row, as read back for history and audit.
#[derive(Debug, Clone)]
pub struct RoomRow {
    pub room_code: String,
    pub creator_id: ParticipantId,
    pub opponent_id: Option<ParticipantId>,
    pub status: String,
    pub match_started_at: Option<i64>,
    pub match_ended_at: Option<i64>,
    pub winner_id: Option<ParticipantId>,
}

impl MatchStore {
    /// Open (and if necessary create) the database at `url`.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory database for tests and local experiments. Single
    /// connection: each SQLite `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                user_id INTEGER PRIMARY KEY,
                username TEXT UNIQUE NOT NULL,
                cf_handle TEXT NOT NULL,
                wins INTEGER NOT NULL DEFAULT 0
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS rooms (
                room_code TEXT PRIMARY KEY,
                creator_id INTEGER NOT NULL,
                creator_handle TEXT NOT NULL,
                opponent_id INTEGER,
                opponent_handle TEXT,
                problem_id TEXT NOT NULL,
                problem_name TEXT NOT NULL,
                problem_rating INTEGER NOT NULL,
                problem_url TEXT NOT NULL,
                status TEXT NOT NULL,
                match_started_at INTEGER,
                match_ended_at INTEGER,
                winner_id INTEGER
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS winning_submissions (
                room_code TEXT NOT NULL,
                winner_id INTEGER NOT NULL,
                cf_submission_id INTEGER NOT NULL,
                problem_id TEXT NOT NULL,
                verdict TEXT NOT NULL,
                time_ms INTEGER NOT NULL,
                memory_bytes INTEGER NOT NULL,
                language TEXT NOT NULL,
                submitted_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Create an account row. Registration proper is owned by the identity
    /// service; this exists for seeding and tests. Returns the new id.
    pub async fn insert_account(
        &self,
        username: &str,
        cf_handle: &str,
    ) -> Result<ParticipantId, sqlx::Error> {
        let result = sqlx::query("INSERT INTO users (username, cf_handle) VALUES (?1, ?2)")
            .bind(username)
            .bind(cf_handle)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn fetch_identity(
        &self,
        id: ParticipantId,
    ) -> Result<Option<Identity>, sqlx::Error> {
        let row = sqlx::query("SELECT username, cf_handle FROM users WHERE user_id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Identity {
            username: r.get("username"),
            handle: r.get("cf_handle"),
        }))
    }

    pub async fn wins(&self, id: ParticipantId) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT wins FROM users WHERE user_id = ?1")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("wins"))
    }

    /// Record a freshly created room (status `waiting`).
    pub async fn insert_room(&self, room: &Room) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO rooms
             (room_code, creator_id, creator_handle, problem_id, problem_name,
              problem_rating, problem_url, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&room.code)
        .bind(room.creator.id)
        .bind(&room.creator.handle)
        .bind(&room.problem.problem_id)
        .bind(&room.problem.name)
        .bind(room.problem.rating as i64)
        .bind(&room.problem.url)
        .bind(room.phase.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mirror the waiting -> in_progress transition.
    pub async fn mark_started(
        &self,
        room_code: &str,
        opponent_id: ParticipantId,
        opponent_handle: &str,
        started_at: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE rooms
             SET opponent_id = ?1, opponent_handle = ?2, status = 'in_progress',
                 match_started_at = ?3
             WHERE room_code = ?4",
        )
        .bind(opponent_id)
        .bind(opponent_handle)
        .bind(started_at as i64)
        .bind(room_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Mirror an abandonment.
    pub async fn mark_abandoned(
        &self,
        room_code: &str,
        ended_at: u64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE rooms SET status = 'abandoned', match_ended_at = ?1 WHERE room_code = ?2",
        )
        .bind(ended_at as i64)
        .bind(room_code)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Winner declaration: room update, winning-submission insert, and the
    /// win-counter increment in one transaction, so a partial write can
    /// never leave the three records disagreeing.
    pub async fn declare_winner(
        &self,
        room_code: &str,
        winner_id: ParticipantId,
        ended_at: u64,
        submission: &AcceptedSubmission,
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE rooms
             SET winner_id = ?1, status = 'completed', match_ended_at = ?2
             WHERE room_code = ?3",
        )
        .bind(winner_id)
        .bind(ended_at as i64)
        .bind(room_code)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO winning_submissions
             (room_code, winner_id, cf_submission_id, problem_id, verdict,
              time_ms, memory_bytes, language, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(room_code)
        .bind(winner_id)
        .bind(submission.submission_id as i64)
        .bind(&submission.problem_id)
        .bind(&submission.verdict)
        .bind(submission.time_ms as i64)
        .bind(submission.memory_bytes as i64)
        .bind(&submission.language)
        .bind(submission.submitted_at as i64)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE users SET wins = wins + 1 WHERE user_id = ?1")
            .bind(winner_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await
    }

    /// Read a room row back for history/audit.
    pub async fn room_row(&self, room_code: &str) -> Result<Option<RoomRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT room_code, creator_id, opponent_id, status,
                    match_started_at, match_ended_at, winner_id
             FROM rooms WHERE room_code = ?1",
        )
        .bind(room_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| RoomRow {
            room_code: r.get("room_code"),
            creator_id: r.get("creator_id"),
            opponent_id: r.get("opponent_id"),
            status: r.get("status"),
            match_started_at: r.get("match_started_at"),
            match_ended_at: r.get("match_ended_at"),
            winner_id: r.get("winner_id"),
        }))
    }

    /// The winning submission id recorded for a room, if any.
    pub async fn winning_submission_id(
        &self,
        room_code: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT cf_submission_id FROM winning_submissions WHERE room_code = ?1",
        )
        .bind(room_code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get("cf_submission_id")))
    }
}
