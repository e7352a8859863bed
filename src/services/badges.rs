use sqlx::PgPool;
use uuid::Uuid;

use crate::db::queries;
use crate::error::LedgerError;

/// Badge granted to users past the donation-count threshold.
pub const PATRON_BADGE: &str = "patron";

/// Read-mostly batch job over the same transaction aggregates as the
/// balance calculator. Purely additive: a badge is never revoked here.
#[derive(Clone)]
pub struct BadgeService {
    pool: PgPool,
}

impl BadgeService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Grants the patron badge to every user with at least `threshold`
    /// succeeded donations. Re-running is a no-op for users already holding
    /// the badge; returns the newly granted user ids.
    pub async fn check_threshold_badge(&self, threshold: i64) -> Result<Vec<Uuid>, LedgerError> {
        let granted = queries::grant_threshold_badges(&self.pool, threshold, PATRON_BADGE).await?;
        if !granted.is_empty() {
            tracing::info!(count = granted.len(), threshold, "patron badges granted");
        }
        Ok(granted)
    }
}
