//! `PostgreSQL` backend.
//!
//! Talks to the `leads` and `profiles` tables directly, for operators who run
//! the schema on their own database with service credentials. There is no
//! identity provider here: the connection's database role decides what is
//! allowed.
//!
//! Feature-gated behind `postgres-backend`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tracing::warn;
use uuid::Uuid;

use crate::records::{Lead, LeadId, LeadPatch, NewLead, NewProfile, Profile};
use crate::{LeadStore, ProfileStore, StoreError};

/// A lead store backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
}

impl std::fmt::Debug for PostgresBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresBackend")
            .field("pool", &"[PgPool]")
            .finish_non_exhaustive()
    }
}

#[derive(sqlx::FromRow)]
struct LeadRow {
    id: Uuid,
    created_at: DateTime<Utc>,
    name: String,
    email: String,
    telegram: Option<String>,
    seats: i32,
    company: Option<String>,
    goal: Option<String>,
    status: String,
    notes: Option<String>,
    source: Option<String>,
}

impl TryFrom<LeadRow> for Lead {
    type Error = String;

    fn try_from(row: LeadRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            created_at: row.created_at,
            name: row.name,
            email: row.email,
            telegram: row.telegram,
            seats: row.seats,
            company: row.company,
            goal: row.goal,
            status: row.status.parse()?,
            notes: row.notes,
            source: row.source,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: Uuid,
    role: Option<String>,
    full_name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

impl From<ProfileRow> for Profile {
    fn from(row: ProfileRow) -> Self {
        Self {
            id: row.id,
            role: row.role,
            full_name: row.full_name,
            email: row.email,
            avatar_url: row.avatar_url,
        }
    }
}

impl PostgresBackend {
    /// Connect and create the tables if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Config`] if the connection or migration fails.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Config(format!("database connection failed: {e}")))?;

        for ddl in [
            "CREATE TABLE IF NOT EXISTS leads (\
                id         UUID        PRIMARY KEY DEFAULT gen_random_uuid(), \
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
                name       TEXT        NOT NULL, \
                email      TEXT        NOT NULL, \
                telegram   TEXT, \
                seats      INTEGER     NOT NULL DEFAULT 1 CHECK (seats > 0), \
                company    TEXT, \
                goal       TEXT, \
                status     TEXT        NOT NULL DEFAULT 'new' \
                           CHECK (status IN ('new', 'in_progress', 'done')), \
                notes      TEXT, \
                source     TEXT\
            )",
            "CREATE INDEX IF NOT EXISTS idx_leads_created_at ON leads (created_at DESC)",
            "CREATE TABLE IF NOT EXISTS profiles (\
                id         UUID PRIMARY KEY, \
                role       TEXT DEFAULT 'user', \
                full_name  TEXT, \
                email      TEXT, \
                avatar_url TEXT\
            )",
        ] {
            sqlx::query(ddl)
                .execute(&pool)
                .await
                .map_err(|e| StoreError::Config(format!("migration failed: {e}")))?;
        }

        Ok(Self { pool })
    }
}

fn db_error(err: &sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let status = match db_err.code().as_deref() {
                Some("23505") => 409,
                Some("42501") => return StoreError::Denied(db_err.message().to_owned()),
                _ => 400,
            };
            StoreError::Rejected {
                status,
                message: db_err.message().to_owned(),
            }
        }
        sqlx::Error::PoolTimedOut => StoreError::Timeout,
        other => StoreError::Network(other.to_string()),
    }
}

#[async_trait::async_trait]
impl LeadStore for PostgresBackend {
    async fn insert_lead(&self, lead: &NewLead) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO leads (name, email, telegram, seats, company, goal, status, source)
              VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.telegram)
        .bind(lead.seats)
        .bind(&lead.company)
        .bind(&lead.goal)
        .bind(lead.status.as_str())
        .bind(lead.source.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;
        Ok(())
    }

    async fn select_leads(&self, limit: usize) -> Result<Vec<Lead>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, LeadRow>(
            r"SELECT id, created_at, name, email, telegram, seats, company, goal, status, notes, source
              FROM leads
              ORDER BY created_at DESC
              LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;

        let mut leads = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match Lead::try_from(row) {
                Ok(lead) => leads.push(lead),
                Err(e) => warn!(id = %id, error = %e, "skipping malformed lead row"),
            }
        }
        Ok(leads)
    }

    async fn update_lead(&self, id: LeadId, patch: &LeadPatch) -> Result<(), StoreError> {
        // A missing notes field keeps the column; `Some(None)` clears it.
        sqlx::query(
            r"UPDATE leads
              SET status = COALESCE($2, status),
                  notes  = CASE WHEN $3 THEN $4 ELSE notes END
              WHERE id = $1",
        )
        .bind(id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.notes.is_some())
        .bind(patch.notes.clone().flatten())
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;
        Ok(())
    }

    async fn delete_lead(&self, id: LeadId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM leads WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(&e))?;
        Ok(())
    }

    async fn delete_leads(&self, ids: &[LeadId]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        sqlx::query("DELETE FROM leads WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error(&e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ProfileStore for PostgresBackend {
    async fn select_profile(&self, id: Uuid) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(
            "SELECT id, role, full_name, email, avatar_url FROM profiles WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;
        Ok(row.map(Profile::from))
    }

    async fn insert_profile(&self, profile: &NewProfile) -> Result<(), StoreError> {
        sqlx::query(
            r"INSERT INTO profiles (id, email, full_name, avatar_url)
              VALUES ($1, $2, $3, $4)",
        )
        .bind(profile.id)
        .bind(&profile.email)
        .bind(&profile.full_name)
        .bind(&profile.avatar_url)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&e))?;
        Ok(())
    }
}
