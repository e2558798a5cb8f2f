//! PostgreSQL registration store.
//!
//! All capacity-sensitive reads take `FOR UPDATE` row locks that live until
//! the transaction resolves, so the enrollment count a transaction observes
//! cannot be invalidated by a concurrent commit. Lock waits are bounded by a
//! per-transaction `lock_timeout`; hitting it (or a deadlock/serialization
//! failure) surfaces as a retryable `CapacityConflict`, which the coordinator
//! retries a bounded number of times.
//!
//! Queries use runtime binding rather than the compile-time checked macros so
//! the crate builds without a live database.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use std::collections::BTreeMap;
use std::time::Duration;

use super::{
    NewAttendee, RegistrationStore, RegistrationTransaction, WorkshopAvailability,
};
use crate::config::{Config, EngineConfig};
use crate::error::{RegistrationError, Result};
use crate::types::{
    AttendeeId, CapacitySummary, Cohort, CohortId, CohortStatus, Prerequisite, PrerequisiteKind,
    Program, ProgramId, Workshop, WorkshopId,
};

/// PostgreSQL-backed [`RegistrationStore`].
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PostgresStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool, engine: &EngineConfig) -> Self {
        Self {
            pool,
            lock_timeout_ms: engine.lock_timeout_ms,
        }
    }

    /// Connect a new pool from configuration.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the database is unreachable.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await?;
        Ok(Self::new(pool, &config.engine))
    }

    /// Run the schema migrations in `migrations/`.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| RegistrationError::Persistence {
                detail: format!("migration failed: {e}"),
            })?;
        Ok(())
    }

    /// The underlying pool, for collaborators that share it.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// One registration attempt as a Postgres transaction.
pub struct PostgresTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl RegistrationStore for PostgresStore {
    type Transaction = PostgresTransaction;

    async fn begin(&self) -> Result<Self::Transaction> {
        let mut tx = self.pool.begin().await?;
        // Bound every row-lock wait in this transaction; exceeding it maps
        // to a retryable CapacityConflict via the 55P03 SQLSTATE.
        sqlx::query(&format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock_timeout_ms
        ))
        .execute(&mut *tx)
        .await?;
        Ok(PostgresTransaction { tx })
    }

    async fn workshop_availability(
        &self,
        program_id: ProgramId,
    ) -> Result<Vec<WorkshopAvailability>> {
        let rows = sqlx::query(
            r"
            SELECT w.id, w.title, w.max_participants,
                   COUNT(a.id) AS enrolled
            FROM workshops w
            LEFT JOIN attendees a ON a.assigned_workshop_id = w.id
            WHERE w.program_id = $1
            GROUP BY w.id, w.title, w.max_participants
            ORDER BY w.id
            ",
        )
        .bind(program_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(WorkshopAvailability {
                    workshop_id: WorkshopId::new(row.try_get("id")?),
                    title: row.try_get("title")?,
                    capacity: CapacitySummary {
                        max_participants: to_u32(row.try_get("max_participants")?)?,
                        enrolled: count_to_u32(row.try_get("enrolled")?)?,
                    },
                })
            })
            .collect()
    }

    async fn cohort_availability(&self, program_id: ProgramId) -> Result<Vec<Cohort>> {
        let rows = sqlx::query(
            r"
            SELECT id, program_id, name, status, max_participants, current_participants
            FROM cohorts
            WHERE program_id = $1
            ORDER BY id
            ",
        )
        .bind(program_id.get())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(cohort_from_row).collect()
    }
}

#[async_trait]
impl RegistrationTransaction for PostgresTransaction {
    async fn find_attendee_by_email(
        &mut self,
        program_id: ProgramId,
        email: &str,
    ) -> Result<Option<AttendeeId>> {
        let row = sqlx::query(
            "SELECT id FROM attendees WHERE program_id = $1 AND lower(email) = lower($2)",
        )
        .bind(program_id.get())
        .bind(email)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(match row {
            Some(row) => Some(AttendeeId::new(row.try_get("id")?)),
            None => None,
        })
    }

    async fn load_program(&mut self, program_id: ProgramId) -> Result<Option<Program>> {
        let row = sqlx::query(
            r"
            SELECT id, title, term, registration_open, max_participants, location
            FROM programs
            WHERE id = $1
            ",
        )
        .bind(program_id.get())
        .fetch_optional(&mut *self.tx)
        .await?;

        match row {
            Some(row) => Ok(Some(Program {
                id: ProgramId::new(row.try_get("id")?),
                title: row.try_get("title")?,
                term: row.try_get("term")?,
                registration_open: row.try_get("registration_open")?,
                max_participants: to_u32(row.try_get("max_participants")?)?,
                location: row.try_get("location")?,
            })),
            None => Ok(None),
        }
    }

    async fn load_workshops(&mut self, ids: &[WorkshopId]) -> Result<Vec<Workshop>> {
        let raw_ids: Vec<i64> = ids.iter().map(|id| id.get()).collect();

        let workshop_rows = sqlx::query(
            r"
            SELECT id, program_id, title, max_participants
            FROM workshops
            WHERE id = ANY($1)
            ORDER BY id
            ",
        )
        .bind(&raw_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let prereq_rows = sqlx::query(
            r"
            SELECT workshop_id, kind, mandatory, requirement_value, description
            FROM workshop_prerequisites
            WHERE workshop_id = ANY($1)
            ORDER BY workshop_id, id
            ",
        )
        .bind(&raw_ids)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut prereqs_by_workshop: BTreeMap<i64, Vec<Prerequisite>> = BTreeMap::new();
        for row in &prereq_rows {
            let workshop_id: i64 = row.try_get("workshop_id")?;
            let kind: String = row.try_get("kind")?;
            prereqs_by_workshop
                .entry(workshop_id)
                .or_default()
                .push(Prerequisite {
                    kind: PrerequisiteKind::parse(&kind)?,
                    mandatory: row.try_get("mandatory")?,
                    requirement_value: row.try_get("requirement_value")?,
                    description: row.try_get("description")?,
                });
        }

        workshop_rows
            .into_iter()
            .map(|row| {
                let id: i64 = row.try_get("id")?;
                Ok(Workshop {
                    id: WorkshopId::new(id),
                    program_id: ProgramId::new(row.try_get("program_id")?),
                    title: row.try_get("title")?,
                    max_participants: to_u32(row.try_get("max_participants")?)?,
                    prerequisites: prereqs_by_workshop.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn lock_workshop_capacity(
        &mut self,
        workshop_id: WorkshopId,
    ) -> Result<Option<CapacitySummary>> {
        // Lock the workshop row first; the enrollment count below stays
        // valid until this transaction resolves.
        let row = sqlx::query("SELECT max_participants FROM workshops WHERE id = $1 FOR UPDATE")
            .bind(workshop_id.get())
            .fetch_optional(&mut *self.tx)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let max_participants = to_u32(row.try_get("max_participants")?)?;

        let count_row =
            sqlx::query("SELECT COUNT(*) AS enrolled FROM attendees WHERE assigned_workshop_id = $1")
                .bind(workshop_id.get())
                .fetch_one(&mut *self.tx)
                .await?;

        Ok(Some(CapacitySummary {
            max_participants,
            enrolled: count_to_u32(count_row.try_get("enrolled")?)?,
        }))
    }

    async fn lock_cohort(&mut self, cohort_id: CohortId) -> Result<Option<Cohort>> {
        let row = sqlx::query(
            r"
            SELECT id, program_id, name, status, max_participants, current_participants
            FROM cohorts
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(cohort_id.get())
        .fetch_optional(&mut *self.tx)
        .await?;

        row.as_ref().map(cohort_from_row).transpose()
    }

    async fn insert_attendee(&mut self, attendee: &NewAttendee) -> Result<AttendeeId> {
        let preferences: Vec<i64> = attendee
            .workshop_preferences
            .iter()
            .map(|id| id.get())
            .collect();

        let row = sqlx::query(
            r"
            INSERT INTO attendees
                (program_id, first_name, last_name, email, phone, date_of_birth,
                 gender, workshop_preferences, cohort_id, assigned_workshop_id,
                 assigned_preference_rank, prerequisites_met, registration_status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id
            ",
        )
        .bind(attendee.program_id.get())
        .bind(&attendee.first_name)
        .bind(&attendee.last_name)
        .bind(&attendee.email)
        .bind(&attendee.phone)
        .bind(attendee.date_of_birth)
        .bind(&attendee.gender)
        .bind(sqlx::types::Json(&preferences))
        .bind(attendee.cohort_id.map(CohortId::get))
        .bind(attendee.assigned_workshop_id.map(WorkshopId::get))
        .bind(attendee.assigned_preference_rank.map(i64::from))
        .bind(sqlx::types::Json(&attendee.prerequisites_met))
        .bind(attendee.status.as_str())
        .fetch_one(&mut *self.tx)
        .await?;

        Ok(AttendeeId::new(row.try_get("id")?))
    }

    async fn increment_cohort(&mut self, cohort_id: CohortId) -> Result<()> {
        // The caller holds the row lock and has checked capacity; the
        // predicate and the table CHECK constraint are backstops.
        let result = sqlx::query(
            r"
            UPDATE cohorts
            SET current_participants = current_participants + 1
            WHERE id = $1 AND current_participants < max_participants
            ",
        )
        .bind(cohort_id.get())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RegistrationError::CohortAssignmentFailed {
                reason: format!("cohort {cohort_id} is no longer available"),
            });
        }
        Ok(())
    }

    async fn set_confirmation_code(&mut self, attendee_id: AttendeeId, code: &str) -> Result<()> {
        sqlx::query("UPDATE attendees SET confirmation_code = $1 WHERE id = $2")
            .bind(code)
            .bind(attendee_id.get())
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

fn cohort_from_row(row: &PgRow) -> Result<Cohort> {
    let status: String = row.try_get("status")?;
    Ok(Cohort {
        id: CohortId::new(row.try_get("id")?),
        program_id: ProgramId::new(row.try_get("program_id")?),
        name: row.try_get("name")?,
        status: match status.as_str() {
            "active" => CohortStatus::Active,
            "closed" => CohortStatus::Closed,
            other => {
                return Err(RegistrationError::Persistence {
                    detail: format!("unknown cohort status: {other}"),
                })
            }
        },
        max_participants: to_u32(row.try_get("max_participants")?)?,
        current_participants: to_u32(row.try_get("current_participants")?)?,
    })
}

fn to_u32(value: i32) -> Result<u32> {
    u32::try_from(value).map_err(|_| RegistrationError::Persistence {
        detail: format!("negative capacity value in store: {value}"),
    })
}

fn count_to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| RegistrationError::Persistence {
        detail: format!("implausible enrollment count: {value}"),
    })
}
