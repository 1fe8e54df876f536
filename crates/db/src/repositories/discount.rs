use chrono::Utc;
use sqlx::{sqlite::SqliteRow, Row, SqliteConnection};

use orderly_core::activity::ActivityEvent;
use orderly_core::domain::actor::Actor;
use orderly_core::domain::discount::{
    Discount, DiscountDraft, DiscountId, DiscountKind, DiscountPatch, DiscountStatus,
};
use orderly_core::errors::WorkflowError;

use super::{activity_log, parse_date, parse_decimal, parse_timestamp, parse_u32, RepositoryError};
use crate::{begin_immediate, DbPool};

#[async_trait::async_trait]
pub trait DiscountRepository: Send + Sync {
    async fn create(&self, draft: DiscountDraft, actor: &Actor)
        -> Result<Discount, WorkflowError>;

    async fn update(
        &self,
        id: &DiscountId,
        patch: DiscountPatch,
        actor: &Actor,
    ) -> Result<Discount, WorkflowError>;

    async fn soft_delete(&self, id: &DiscountId, actor: &Actor) -> Result<(), WorkflowError>;

    async fn reactivate(&self, id: &DiscountId, actor: &Actor)
        -> Result<Discount, WorkflowError>;

    /// Includes soft-deleted rows so deactivated campaigns stay inspectable.
    async fn find_by_id(&self, id: &DiscountId) -> Result<Option<Discount>, WorkflowError>;

    async fn find_live_by_code(&self, code: &str) -> Result<Option<Discount>, WorkflowError>;

    async fn list_live(&self) -> Result<Vec<Discount>, WorkflowError>;
}

pub struct SqlDiscountRepository {
    pool: DbPool,
}

impl SqlDiscountRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl DiscountRepository for SqlDiscountRepository {
    async fn create(
        &self,
        draft: DiscountDraft,
        actor: &Actor,
    ) -> Result<Discount, WorkflowError> {
        let now = Utc::now();
        let discount = Discount {
            id: DiscountId(format!("disc-{}", sqlx::types::Uuid::new_v4())),
            name: draft.name,
            code: draft.code,
            kind: draft.kind,
            value: draft.value,
            start_date: draft.start_date,
            end_date: draft.end_date,
            usage_limit: draft.usage_limit,
            used_count: 0,
            status: DiscountStatus::Active,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        discount.validate()?;

        // Code uniqueness only counts live rows, so it cannot be a UNIQUE
        // constraint; the check-then-insert runs under the write lock instead.
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        if live_code_taken(&mut tx, &discount.code, None).await? {
            return Err(WorkflowError::conflict("Discount code already in use"));
        }
        insert_discount_row(&mut tx, &discount).await?;

        let event = ActivityEvent::new(actor, format!("Discount '{}' created", discount.name));
        activity_log::append(&mut *tx, &event).await?;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(discount)
    }

    async fn update(
        &self,
        id: &DiscountId,
        patch: DiscountPatch,
        actor: &Actor,
    ) -> Result<Discount, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut discount = fetch_discount(&mut tx, &id.0)
            .await?
            .filter(|discount| !discount.deleted)
            .ok_or_else(|| WorkflowError::not_found("discount", &id.0))?;

        if let Some(name) = patch.name {
            discount.name = name;
        }
        if let Some(code) = patch.code {
            discount.code = code;
        }
        if let Some(kind) = patch.kind {
            discount.kind = kind;
        }
        if let Some(value) = patch.value {
            discount.value = value;
        }
        if let Some(start_date) = patch.start_date {
            discount.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            discount.end_date = end_date;
        }
        if let Some(usage_limit) = patch.usage_limit {
            discount.usage_limit = usage_limit;
        }
        discount.validate()?;

        if live_code_taken(&mut tx, &discount.code, Some(&discount.id.0)).await? {
            return Err(WorkflowError::conflict("Discount code already in use"));
        }

        discount.updated_at = Utc::now();
        update_discount_row(&mut tx, &discount).await?;

        let event = ActivityEvent::new(actor, format!("Discount '{}' updated", discount.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(discount)
    }

    async fn soft_delete(&self, id: &DiscountId, actor: &Actor) -> Result<(), WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut discount = fetch_discount(&mut tx, &id.0)
            .await?
            .filter(|discount| !discount.deleted)
            .ok_or_else(|| WorkflowError::not_found("discount", &id.0))?;

        discount.deleted = true;
        discount.status = DiscountStatus::Inactive;
        discount.updated_at = Utc::now();
        update_discount_row(&mut tx, &discount).await?;

        let event =
            ActivityEvent::new(actor, format!("Discount '{}' deactivated", discount.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(())
    }

    async fn reactivate(
        &self,
        id: &DiscountId,
        actor: &Actor,
    ) -> Result<Discount, WorkflowError> {
        let mut tx = begin_immediate(&self.pool).await.map_err(RepositoryError::from)?;

        let mut discount = fetch_discount(&mut tx, &id.0)
            .await?
            .ok_or_else(|| WorkflowError::not_found("discount", &id.0))?;
        discount.ensure_can_reactivate(Utc::now().date_naive())?;

        if live_code_taken(&mut tx, &discount.code, Some(&discount.id.0)).await? {
            return Err(WorkflowError::conflict("Discount code already in use"));
        }

        discount.deleted = false;
        discount.status = DiscountStatus::Active;
        discount.updated_at = Utc::now();
        update_discount_row(&mut tx, &discount).await?;

        let event =
            ActivityEvent::new(actor, format!("Discount '{}' reactivated", discount.name));
        activity_log::append_best_effort(&mut *tx, &event).await;

        tx.commit().await.map_err(RepositoryError::from)?;
        Ok(discount)
    }

    async fn find_by_id(&self, id: &DiscountId) -> Result<Option<Discount>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_discount(&mut conn, &id.0).await?)
    }

    async fn find_live_by_code(&self, code: &str) -> Result<Option<Discount>, WorkflowError> {
        let mut conn = self.pool.acquire().await.map_err(RepositoryError::from)?;
        Ok(fetch_live_discount_by_code(&mut conn, code).await?)
    }

    async fn list_live(&self) -> Result<Vec<Discount>, WorkflowError> {
        let rows = sqlx::query(
            "SELECT
                id,
                name,
                code,
                kind,
                CAST(value AS TEXT) AS value,
                start_date,
                end_date,
                usage_limit,
                used_count,
                status,
                deleted,
                created_at,
                updated_at
             FROM discount
             WHERE deleted = 0
             ORDER BY created_at DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        rows.into_iter()
            .map(discount_from_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(WorkflowError::from)
    }
}

pub(crate) async fn fetch_live_discount_by_code(
    conn: &mut SqliteConnection,
    code: &str,
) -> Result<Option<Discount>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            name,
            code,
            kind,
            CAST(value AS TEXT) AS value,
            start_date,
            end_date,
            usage_limit,
            used_count,
            status,
            deleted,
            created_at,
            updated_at
         FROM discount
         WHERE deleted = 0 AND code = ?",
    )
    .bind(code)
    .fetch_optional(conn)
    .await?;

    row.map(discount_from_row).transpose()
}

/// Bumps the redemption counter for a coupon applied to an invoice. Runs in
/// the applying operation's transaction.
pub(crate) async fn record_redemption(
    conn: &mut SqliteConnection,
    id: &DiscountId,
) -> Result<(), RepositoryError> {
    sqlx::query("UPDATE discount SET used_count = used_count + 1, updated_at = ? WHERE id = ?")
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(conn)
        .await?;
    Ok(())
}

async fn fetch_discount(
    conn: &mut SqliteConnection,
    id: &str,
) -> Result<Option<Discount>, RepositoryError> {
    let row = sqlx::query(
        "SELECT
            id,
            name,
            code,
            kind,
            CAST(value AS TEXT) AS value,
            start_date,
            end_date,
            usage_limit,
            used_count,
            status,
            deleted,
            created_at,
            updated_at
         FROM discount
         WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;

    row.map(discount_from_row).transpose()
}

async fn live_code_taken(
    conn: &mut SqliteConnection,
    code: &str,
    excluding_id: Option<&str>,
) -> Result<bool, WorkflowError> {
    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM discount WHERE deleted = 0 AND code = ? AND id != COALESCE(?, '')",
    )
    .bind(code)
    .bind(excluding_id)
    .fetch_optional(conn)
    .await
    .map_err(RepositoryError::from)?;
    Ok(existing.is_some())
}

async fn insert_discount_row(
    conn: &mut SqliteConnection,
    discount: &Discount,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO discount (
            id,
            name,
            code,
            kind,
            value,
            start_date,
            end_date,
            usage_limit,
            used_count,
            status,
            deleted,
            created_at,
            updated_at
         ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&discount.id.0)
    .bind(&discount.name)
    .bind(&discount.code)
    .bind(discount.kind.as_str())
    .bind(discount.value.to_string())
    .bind(discount.start_date.to_string())
    .bind(discount.end_date.to_string())
    .bind(discount.usage_limit.map(i64::from))
    .bind(i64::from(discount.used_count))
    .bind(discount.status.as_str())
    .bind(discount.deleted)
    .bind(discount.created_at.to_rfc3339())
    .bind(discount.updated_at.to_rfc3339())
    .execute(conn)
    .await?;

    Ok(())
}

async fn update_discount_row(
    conn: &mut SqliteConnection,
    discount: &Discount,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "UPDATE discount SET
            name = ?,
            code = ?,
            kind = ?,
            value = ?,
            start_date = ?,
            end_date = ?,
            usage_limit = ?,
            used_count = ?,
            status = ?,
            deleted = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(&discount.name)
    .bind(&discount.code)
    .bind(discount.kind.as_str())
    .bind(discount.value.to_string())
    .bind(discount.start_date.to_string())
    .bind(discount.end_date.to_string())
    .bind(discount.usage_limit.map(i64::from))
    .bind(i64::from(discount.used_count))
    .bind(discount.status.as_str())
    .bind(discount.deleted)
    .bind(discount.updated_at.to_rfc3339())
    .bind(&discount.id.0)
    .execute(conn)
    .await?;

    Ok(())
}

fn discount_from_row(row: SqliteRow) -> Result<Discount, RepositoryError> {
    let raw_kind = row.try_get::<String, _>("kind")?;
    let kind = DiscountKind::parse(&raw_kind)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown discount kind `{raw_kind}`")))?;
    let raw_status = row.try_get::<String, _>("status")?;
    let status = DiscountStatus::parse(&raw_status)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown discount status `{raw_status}`")))?;

    Ok(Discount {
        id: DiscountId(row.try_get("id")?),
        name: row.try_get("name")?,
        code: row.try_get("code")?,
        kind,
        value: parse_decimal("value", row.try_get("value")?)?,
        start_date: parse_date("start_date", row.try_get("start_date")?)?,
        end_date: parse_date("end_date", row.try_get("end_date")?)?,
        usage_limit: row
            .try_get::<Option<i64>, _>("usage_limit")?
            .map(|limit| parse_u32("usage_limit", limit))
            .transpose()?,
        used_count: parse_u32("used_count", row.try_get("used_count")?)?,
        status,
        deleted: row.try_get("deleted")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, Utc};
    use rust_decimal::Decimal;

    use orderly_core::domain::actor::Actor;
    use orderly_core::domain::discount::{
        DiscountDraft, DiscountKind, DiscountPatch, DiscountStatus,
    };
    use orderly_core::errors::WorkflowError;

    use super::{DiscountRepository, SqlDiscountRepository};
    use crate::{connect_with_settings, migrations, DbPool};

    #[tokio::test]
    async fn create_validates_and_enforces_live_code_uniqueness() {
        let pool = setup_pool().await;
        let repo = SqlDiscountRepository::new(pool.clone());
        let actor = Actor::system();

        let festive = repo
            .create(draft("FEST10", DiscountKind::Percentage, Decimal::new(1000, 2)), &actor)
            .await
            .expect("create discount");
        assert_eq!(festive.status, DiscountStatus::Active);
        assert_eq!(festive.used_count, 0);

        let found = repo.find_by_id(&festive.id).await.expect("find discount");
        assert_eq!(found, Some(festive.clone()));

        let same_code = repo
            .create(draft("FEST10", DiscountKind::Flat, Decimal::new(5000, 2)), &actor)
            .await;
        assert!(matches!(same_code, Err(WorkflowError::Conflict { .. })));

        let mut inverted = draft("INV1", DiscountKind::Flat, Decimal::new(5000, 2));
        std::mem::swap(&mut inverted.start_date, &mut inverted.end_date);
        assert!(matches!(repo.create(inverted, &actor).await, Err(WorkflowError::Validation { .. })));

        let mut capped = draft("CAP0", DiscountKind::Flat, Decimal::new(5000, 2));
        capped.usage_limit = Some(0);
        assert!(matches!(repo.create(capped, &actor).await, Err(WorkflowError::Validation { .. })));

        // Retiring the live holder frees the code for reuse.
        repo.soft_delete(&festive.id, &actor).await.expect("retire discount");
        repo.create(draft("FEST10", DiscountKind::Flat, Decimal::new(2500, 2)), &actor)
            .await
            .expect("reuse code after retirement");

        pool.close().await;
    }

    #[tokio::test]
    async fn update_revalidates_and_checks_code_collisions() {
        let pool = setup_pool().await;
        let repo = SqlDiscountRepository::new(pool.clone());
        let actor = Actor::system();

        let festive = repo
            .create(draft("FEST10", DiscountKind::Percentage, Decimal::new(1000, 2)), &actor)
            .await
            .expect("create festive");
        let clearance = repo
            .create(draft("CLEAR5", DiscountKind::Flat, Decimal::new(500, 2)), &actor)
            .await
            .expect("create clearance");

        let renamed = repo
            .update(
                &festive.id,
                DiscountPatch {
                    name: Some("Festive Season".to_owned()),
                    value: Some(Decimal::new(1500, 2)),
                    usage_limit: Some(None),
                    ..DiscountPatch::default()
                },
                &actor,
            )
            .await
            .expect("update discount");
        assert_eq!(renamed.name, "Festive Season");
        assert_eq!(renamed.value, Decimal::new(1500, 2));
        assert_eq!(renamed.usage_limit, None);

        let stolen_code = repo
            .update(
                &clearance.id,
                DiscountPatch { code: Some("FEST10".to_owned()), ..DiscountPatch::default() },
                &actor,
            )
            .await;
        assert!(matches!(stolen_code, Err(WorkflowError::Conflict { .. })));

        let out_of_range = repo
            .update(
                &festive.id,
                DiscountPatch { value: Some(Decimal::new(15000, 2)), ..DiscountPatch::default() },
                &actor,
            )
            .await;
        assert!(matches!(out_of_range, Err(WorkflowError::Validation { .. })));

        pool.close().await;
    }

    #[tokio::test]
    async fn soft_delete_marks_inactive_and_hides_from_live_reads() {
        let pool = setup_pool().await;
        let repo = SqlDiscountRepository::new(pool.clone());
        let actor = Actor::system();

        let festive = repo
            .create(draft("FEST10", DiscountKind::Percentage, Decimal::new(1000, 2)), &actor)
            .await
            .expect("create discount");

        repo.soft_delete(&festive.id, &actor).await.expect("soft delete");

        assert_eq!(repo.find_live_by_code("FEST10").await.expect("live lookup"), None);
        assert!(repo.list_live().await.expect("list live").is_empty());

        let retired = repo
            .find_by_id(&festive.id)
            .await
            .expect("find retired")
            .expect("retired row kept");
        assert!(retired.deleted);
        assert_eq!(retired.status, DiscountStatus::Inactive);

        let again = repo.soft_delete(&festive.id, &actor).await;
        assert!(matches!(again, Err(WorkflowError::NotFound { .. })));

        pool.close().await;
    }

    #[tokio::test]
    async fn reactivate_restores_unexpired_discounts_only() {
        let pool = setup_pool().await;
        let repo = SqlDiscountRepository::new(pool.clone());
        let actor = Actor::system();

        let festive = repo
            .create(draft("FEST10", DiscountKind::Percentage, Decimal::new(1000, 2)), &actor)
            .await
            .expect("create discount");

        let still_live = repo.reactivate(&festive.id, &actor).await;
        assert!(matches!(still_live, Err(WorkflowError::Conflict { .. })));

        repo.soft_delete(&festive.id, &actor).await.expect("soft delete");
        let restored = repo.reactivate(&festive.id, &actor).await.expect("reactivate");
        assert_eq!(restored.status, DiscountStatus::Active);
        assert!(!restored.deleted);
        assert!(repo.find_live_by_code("FEST10").await.expect("live lookup").is_some());

        let mut bygone = draft("OLD24", DiscountKind::Flat, Decimal::new(5000, 2));
        bygone.start_date = NaiveDate::from_ymd_opt(2024, 1, 1).expect("valid date");
        bygone.end_date = NaiveDate::from_ymd_opt(2024, 2, 1).expect("valid date");
        let expired = repo.create(bygone, &actor).await.expect("create expired");
        repo.soft_delete(&expired.id, &actor).await.expect("delete expired");

        let too_late = repo.reactivate(&expired.id, &actor).await;
        assert!(matches!(too_late, Err(WorkflowError::Validation { .. })));

        pool.close().await;
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:?cache=shared", 1, 30)
            .await
            .expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }

    fn draft(code: &str, kind: DiscountKind, value: Decimal) -> DiscountDraft {
        let today = Utc::now().date_naive();
        DiscountDraft {
            name: format!("Campaign {code}"),
            code: code.to_owned(),
            kind,
            value,
            start_date: today - Duration::days(7),
            end_date: today + Duration::days(7),
            usage_limit: None,
        }
    }
}
