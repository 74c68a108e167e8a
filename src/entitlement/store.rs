/// Entitlement store - persistent record of subscription state per email
use crate::{
    entitlement::{Entitlement, Role},
    error::{AppError, AppResult},
};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Entitlement store backed by SQLite
///
/// Lookup is by email, not identity id: a user may hold accounts across
/// multiple client surfaces that must converge on one record.
#[derive(Clone)]
pub struct EntitlementStore {
    db: SqlitePool,
}

impl EntitlementStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Find the entitlement for an email, if one exists
    pub async fn find_by_email(&self, email: &str) -> AppResult<Option<Entitlement>> {
        let row = sqlx::query(
            r#"
            SELECT id, email, user_id, role, trial_start, trial_end,
                   subscription_start, subscription_end, subscription_type,
                   last_seen, seen_on_web, exports_today, last_export_date
            FROM entitlement
            WHERE email = ?1
            "#,
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        row.map(row_to_entitlement).transpose()
    }

    /// Create an entitlement, idempotently
    ///
    /// Concurrent first-contact requests for the same email both reach this
    /// point; `INSERT OR IGNORE` plus a re-read makes them converge on the
    /// single record that won.
    pub async fn create(&self, entitlement: &Entitlement) -> AppResult<Entitlement> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO entitlement
                (id, email, user_id, role, trial_start, trial_end,
                 subscription_start, subscription_end, subscription_type,
                 last_seen, seen_on_web, exports_today, last_export_date)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&entitlement.id)
        .bind(&entitlement.email)
        .bind(&entitlement.user_id)
        .bind(entitlement.role.as_str())
        .bind(entitlement.trial_start.map(|t| t.to_rfc3339()))
        .bind(entitlement.trial_end.map(|t| t.to_rfc3339()))
        .bind(entitlement.subscription_start.map(|t| t.to_rfc3339()))
        .bind(entitlement.subscription_end.map(|t| t.to_rfc3339()))
        .bind(&entitlement.subscription_type)
        .bind(entitlement.last_seen.map(|t| t.to_rfc3339()))
        .bind(entitlement.seen_on_web)
        .bind(entitlement.exports_today)
        .bind(entitlement.last_export_date.format(DATE_FORMAT).to_string())
        .execute(&self.db)
        .await?;

        self.find_by_email(&entitlement.email).await?.ok_or_else(|| {
            AppError::Internal(format!(
                "Entitlement for {} missing immediately after create",
                entitlement.email
            ))
        })
    }

    /// Persist a role transition (downgrade writes clear the related fields)
    pub async fn save_role(&self, entitlement: &Entitlement) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE entitlement SET
                role = ?2,
                trial_start = ?3,
                trial_end = ?4,
                subscription_start = ?5,
                subscription_end = ?6,
                subscription_type = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&entitlement.id)
        .bind(entitlement.role.as_str())
        .bind(entitlement.trial_start.map(|t| t.to_rfc3339()))
        .bind(entitlement.trial_end.map(|t| t.to_rfc3339()))
        .bind(entitlement.subscription_start.map(|t| t.to_rfc3339()))
        .bind(entitlement.subscription_end.map(|t| t.to_rfc3339()))
        .bind(&entitlement.subscription_type)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Persist the daily export counter and its reset date
    pub async fn save_quota(
        &self,
        id: &str,
        exports_today: u32,
        last_export_date: NaiveDate,
    ) -> AppResult<()> {
        sqlx::query(
            "UPDATE entitlement SET exports_today = ?2, last_export_date = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(exports_today)
        .bind(last_export_date.format(DATE_FORMAT).to_string())
        .execute(&self.db)
        .await?;

        Ok(())
    }

    /// Best-effort last-seen update; callers ignore the error
    pub async fn touch_last_seen(&self, id: &str, now: DateTime<Utc>) -> AppResult<()> {
        sqlx::query("UPDATE entitlement SET last_seen = ?2 WHERE id = ?1")
            .bind(id)
            .bind(now.to_rfc3339())
            .execute(&self.db)
            .await?;

        Ok(())
    }

    /// Flag the account as having signed in on the web surface
    pub async fn mark_seen_on_web(&self, email: &str) -> AppResult<()> {
        sqlx::query("UPDATE entitlement SET seen_on_web = 1 WHERE email = ?1")
            .bind(email)
            .execute(&self.db)
            .await?;

        Ok(())
    }
}

fn row_to_entitlement(row: sqlx::sqlite::SqliteRow) -> AppResult<Entitlement> {
    let role: String = row.try_get("role")?;
    Ok(Entitlement {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        user_id: row.try_get("user_id")?,
        role: Role::from_db(&role),
        trial_start: parse_opt_timestamp(row.try_get("trial_start")?)?,
        trial_end: parse_opt_timestamp(row.try_get("trial_end")?)?,
        subscription_start: parse_opt_timestamp(row.try_get("subscription_start")?)?,
        subscription_end: parse_opt_timestamp(row.try_get("subscription_end")?)?,
        subscription_type: row.try_get("subscription_type")?,
        last_seen: parse_opt_timestamp(row.try_get("last_seen")?)?,
        seen_on_web: row.try_get("seen_on_web")?,
        exports_today: row.try_get::<i64, _>("exports_today")? as u32,
        last_export_date: parse_date(&row.try_get::<String, _>("last_export_date")?)?,
    })
}

fn parse_opt_timestamp(value: Option<String>) -> AppResult<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| AppError::Internal(format!("Invalid timestamp: {}", e)))
        })
        .transpose()
}

fn parse_date(s: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|e| AppError::Internal(format!("Invalid date: {}", e)))
}
