//! SQLite implementations of the storage interfaces.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_query::{Expr, OnConflict, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Acquire, Row, SqlitePool};
use tracing::warn;
use uuid::Uuid;

use crate::domain::{
    BnpcProfile, DiscountBreakdown, LoyaltyAccount, LoyaltySettings, OrderState, Promo,
    PromoScope, PromoType, SettlementRecord, WeeklyCapWindow,
};
use crate::interfaces::{
    LoyaltyStore, PromoStore, Result, SettlementCommit, SettlementStore, StorageError,
};

use super::schema::{
    BnpcProfiles, CapWindows, LoyaltyAccounts, LoyaltyConfig, Promos, Settlements,
    CREATE_BNPC_PROFILES_TABLE, CREATE_CAP_WINDOWS_TABLE, CREATE_LOYALTY_ACCOUNTS_TABLE,
    CREATE_LOYALTY_CONFIG_TABLE, CREATE_PROMOS_TABLE, CREATE_SETTLEMENTS_TABLE,
};

fn get_decimal(row: &SqliteRow, col: &str) -> Result<Decimal> {
    let raw: String = row.get(col);
    Decimal::from_str(&raw).map_err(|_| StorageError::InvalidDecimal(raw))
}

fn get_opt_decimal(row: &SqliteRow, col: &str) -> Result<Option<Decimal>> {
    let raw: Option<String> = row.get(col);
    match raw {
        Some(raw) => Decimal::from_str(&raw)
            .map(Some)
            .map_err(|_| StorageError::InvalidDecimal(raw)),
        None => Ok(None),
    }
}

fn get_datetime(row: &SqliteRow, col: &str) -> Result<DateTime<Utc>> {
    let raw: String = row.get(col);
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| StorageError::InvalidTimestamp(raw))
}

fn get_uuid(row: &SqliteRow, col: &str) -> Result<Uuid> {
    let raw: String = row.get(col);
    Ok(Uuid::parse_str(&raw)?)
}

fn promo_from_row(row: &SqliteRow) -> Result<Promo> {
    let promo_type_raw: String = row.get("promo_type");
    let promo_type = PromoType::parse(&promo_type_raw)
        .ok_or_else(|| StorageError::Consistency(format!("bad promo type '{promo_type_raw}'")))?;
    let scope_raw: String = row.get("scope");
    let scope = PromoScope::parse(&scope_raw)
        .ok_or_else(|| StorageError::Consistency(format!("bad promo scope '{scope_raw}'")))?;
    let target_ids_raw: String = row.get("target_ids");
    let target_ids: Vec<Uuid> = serde_json::from_str(&target_ids_raw)?;
    let usage_limit: Option<i64> = row.get("usage_limit");
    let used_count: i64 = row.get("used_count");
    let active: i64 = row.get("active");

    Ok(Promo {
        id: get_uuid(row, "id")?,
        code: row.get("code"),
        promo_type,
        value: get_decimal(row, "value")?,
        scope,
        target_ids,
        min_purchase: get_opt_decimal(row, "min_purchase")?,
        start_date: get_datetime(row, "start_date")?,
        end_date: get_datetime(row, "end_date")?,
        usage_limit: usage_limit.map(|l| l as u32),
        used_count: used_count as u32,
        active: active != 0,
    })
}

fn record_from_row(row: &SqliteRow) -> Result<SettlementRecord> {
    let state_raw: String = row.get("state");
    let state = OrderState::parse(&state_raw)
        .ok_or_else(|| StorageError::Consistency(format!("bad order state '{state_raw}'")))?;
    let breakdown_raw: String = row.get("breakdown");
    let breakdown: DiscountBreakdown = serde_json::from_str(&breakdown_raw)?;
    let promo_id: Option<String> = row.get("promo_id");
    let promo_id = promo_id.map(|s| Uuid::parse_str(&s)).transpose()?;

    Ok(SettlementRecord {
        order_id: get_uuid(row, "order_id")?,
        customer_id: get_uuid(row, "customer_id")?,
        state,
        breakdown,
        promo_id,
        purchase_consumed_delta: get_decimal(row, "purchase_delta")?,
        discount_consumed_delta: get_decimal(row, "discount_delta")?,
        points_used: get_decimal(row, "points_used")?,
        points_earned: get_decimal(row, "points_earned")?,
        settled_at: get_datetime(row, "settled_at")?,
    })
}

fn window_from_row(row: &SqliteRow) -> Result<WeeklyCapWindow> {
    Ok(WeeklyCapWindow {
        customer_id: get_uuid(row, "customer_id")?,
        week_start: get_datetime(row, "week_start")?,
        purchase_consumed: get_decimal(row, "purchase_consumed")?,
        discount_consumed: get_decimal(row, "discount_consumed")?,
    })
}

/// SQLite implementation of PromoStore.
pub struct SqlitePromoStore {
    pool: SqlitePool,
}

impl SqlitePromoStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_PROMOS_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    fn insert_query(promo: &Promo) -> Result<String> {
        let target_ids = serde_json::to_string(&promo.target_ids)?;
        Ok(Query::insert()
            .into_table(Promos::Table)
            .columns([
                Promos::Id,
                Promos::Code,
                Promos::PromoType,
                Promos::Value,
                Promos::Scope,
                Promos::TargetIds,
                Promos::MinPurchase,
                Promos::StartDate,
                Promos::EndDate,
                Promos::UsageLimit,
                Promos::UsedCount,
                Promos::Active,
            ])
            .values_panic([
                promo.id.to_string().into(),
                promo.code.clone().into(),
                promo.promo_type.as_str().into(),
                promo.value.to_string().into(),
                promo.scope.as_str().into(),
                target_ids.into(),
                promo.min_purchase.map(|m| m.to_string()).into(),
                promo.start_date.to_rfc3339().into(),
                promo.end_date.to_rfc3339().into(),
                promo.usage_limit.map(|l| l as i64).into(),
                (promo.used_count as i64).into(),
                (promo.active as i32).into(),
            ])
            .to_string(SqliteQueryBuilder))
    }
}

#[async_trait]
impl PromoStore for SqlitePromoStore {
    async fn by_code(&self, code: &str) -> Result<Option<Promo>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Promos::Table)
            .and_where(Expr::col(Promos::Code).eq(code))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(promo_from_row).transpose()
    }

    async fn by_id(&self, id: Uuid) -> Result<Option<Promo>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Promos::Table)
            .and_where(Expr::col(Promos::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(promo_from_row).transpose()
    }

    async fn list(&self) -> Result<Vec<Promo>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Promos::Table)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(promo_from_row).collect()
    }

    async fn insert(&self, promo: Promo) -> Result<()> {
        let query = Self::insert_query(&promo)?;
        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn update(&self, promo: Promo) -> Result<()> {
        let target_ids = serde_json::to_string(&promo.target_ids)?;
        let query = Query::update()
            .table(Promos::Table)
            .value(Promos::Code, promo.code.clone())
            .value(Promos::PromoType, promo.promo_type.as_str())
            .value(Promos::Value, promo.value.to_string())
            .value(Promos::Scope, promo.scope.as_str())
            .value(Promos::TargetIds, target_ids)
            .value(Promos::MinPurchase, promo.min_purchase.map(|m| m.to_string()))
            .value(Promos::StartDate, promo.start_date.to_rfc3339())
            .value(Promos::EndDate, promo.end_date.to_rfc3339())
            .value(Promos::UsageLimit, promo.usage_limit.map(|l| l as i64))
            .value(Promos::Active, promo.active as i32)
            .and_where(Expr::col(Promos::Id).eq(promo.id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("promo {}", promo.id)));
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        let query = Query::delete()
            .from_table(Promos::Table)
            .and_where(Expr::col(Promos::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("promo {id}")));
        }
        Ok(())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<()> {
        let query = Query::update()
            .table(Promos::Table)
            .value(Promos::Active, active as i32)
            .and_where(Expr::col(Promos::Id).eq(id.to_string()))
            .to_string(SqliteQueryBuilder);

        let result = sqlx::query(&query).execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("promo {id}")));
        }
        Ok(())
    }
}

/// SQLite implementation of LoyaltyStore.
pub struct SqliteLoyaltyStore {
    pool: SqlitePool,
}

impl SqliteLoyaltyStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_LOYALTY_CONFIG_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_LOYALTY_ACCOUNTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LoyaltyStore for SqliteLoyaltyStore {
    async fn settings(&self) -> Result<LoyaltySettings> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(LoyaltyConfig::Table)
            .and_where(Expr::col(LoyaltyConfig::Id).eq(1))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let enabled: i64 = row.get("enabled");
                Ok(LoyaltySettings {
                    points_to_currency_rate: get_decimal(&row, "points_to_currency_rate")?,
                    max_redeem_percent: get_decimal(&row, "max_redeem_percent")?,
                    earn_rate: get_decimal(&row, "earn_rate")?,
                    enabled: enabled != 0,
                })
            }
            None => Ok(LoyaltySettings::default()),
        }
    }

    async fn put_settings(&self, settings: LoyaltySettings) -> Result<()> {
        let query = Query::insert()
            .into_table(LoyaltyConfig::Table)
            .columns([
                LoyaltyConfig::Id,
                LoyaltyConfig::PointsToCurrencyRate,
                LoyaltyConfig::MaxRedeemPercent,
                LoyaltyConfig::EarnRate,
                LoyaltyConfig::Enabled,
            ])
            .values_panic([
                1.into(),
                settings.points_to_currency_rate.to_string().into(),
                settings.max_redeem_percent.to_string().into(),
                settings.earn_rate.to_string().into(),
                (settings.enabled as i32).into(),
            ])
            .on_conflict(
                OnConflict::column(LoyaltyConfig::Id)
                    .update_columns([
                        LoyaltyConfig::PointsToCurrencyRate,
                        LoyaltyConfig::MaxRedeemPercent,
                        LoyaltyConfig::EarnRate,
                        LoyaltyConfig::Enabled,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn set_enabled(&self, enabled: bool) -> Result<()> {
        let mut settings = self.settings().await?;
        settings.enabled = enabled;
        self.put_settings(settings).await
    }

    async fn account(&self, customer_id: Uuid) -> Result<LoyaltyAccount> {
        let query = Query::select()
            .column(LoyaltyAccounts::PointsBalance)
            .from(LoyaltyAccounts::Table)
            .and_where(Expr::col(LoyaltyAccounts::CustomerId).eq(customer_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        let points_balance = match row {
            Some(row) => get_decimal(&row, "points_balance")?,
            None => Decimal::ZERO,
        };
        Ok(LoyaltyAccount {
            customer_id,
            points_balance,
        })
    }

    async fn credit(&self, customer_id: Uuid, points: Decimal) -> Result<()> {
        let current = self.account(customer_id).await?.points_balance;
        let query = Query::insert()
            .into_table(LoyaltyAccounts::Table)
            .columns([LoyaltyAccounts::CustomerId, LoyaltyAccounts::PointsBalance])
            .values_panic([
                customer_id.to_string().into(),
                (current + points).to_string().into(),
            ])
            .on_conflict(
                OnConflict::column(LoyaltyAccounts::CustomerId)
                    .update_columns([LoyaltyAccounts::PointsBalance])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn reset_all_points(&self) -> Result<()> {
        let query = Query::update()
            .table(LoyaltyAccounts::Table)
            .value(LoyaltyAccounts::PointsBalance, Decimal::ZERO.to_string())
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }
}

/// SQLite implementation of SettlementStore.
///
/// `commit` and `revert` run inside a single transaction; the promo
/// compare-and-increment is a guarded UPDATE whose row count decides the
/// race.
pub struct SqliteSettlementStore {
    pool: SqlitePool,
}

impl SqliteSettlementStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_BNPC_PROFILES_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_CAP_WINDOWS_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_SETTLEMENTS_TABLE)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SettlementStore for SqliteSettlementStore {
    async fn bnpc_profile(&self, customer_id: Uuid) -> Result<Option<BnpcProfile>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(BnpcProfiles::Table)
            .and_where(Expr::col(BnpcProfiles::CustomerId).eq(customer_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let verified: i64 = row.get("verified");
                Ok(Some(BnpcProfile {
                    customer_id: get_uuid(&row, "customer_id")?,
                    verified: verified != 0,
                    weekly_purchase_cap: get_decimal(&row, "weekly_purchase_cap")?,
                    weekly_discount_cap: get_decimal(&row, "weekly_discount_cap")?,
                    rate: get_decimal(&row, "rate")?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn put_bnpc_profile(&self, profile: BnpcProfile) -> Result<()> {
        let query = Query::insert()
            .into_table(BnpcProfiles::Table)
            .columns([
                BnpcProfiles::CustomerId,
                BnpcProfiles::Verified,
                BnpcProfiles::WeeklyPurchaseCap,
                BnpcProfiles::WeeklyDiscountCap,
                BnpcProfiles::Rate,
            ])
            .values_panic([
                profile.customer_id.to_string().into(),
                (profile.verified as i32).into(),
                profile.weekly_purchase_cap.to_string().into(),
                profile.weekly_discount_cap.to_string().into(),
                profile.rate.to_string().into(),
            ])
            .on_conflict(
                OnConflict::column(BnpcProfiles::CustomerId)
                    .update_columns([
                        BnpcProfiles::Verified,
                        BnpcProfiles::WeeklyPurchaseCap,
                        BnpcProfiles::WeeklyDiscountCap,
                        BnpcProfiles::Rate,
                    ])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);

        sqlx::query(&query).execute(&self.pool).await?;
        Ok(())
    }

    async fn cap_window(&self, customer_id: Uuid) -> Result<Option<WeeklyCapWindow>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(CapWindows::Table)
            .and_where(Expr::col(CapWindows::CustomerId).eq(customer_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(window_from_row).transpose()
    }

    async fn record(&self, order_id: Uuid) -> Result<Option<SettlementRecord>> {
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Settlements::Table)
            .and_where(Expr::col(Settlements::OrderId).eq(order_id.to_string()))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    async fn commit(&self, commit: SettlementCommit) -> Result<()> {
        let record = &commit.record;
        let breakdown = serde_json::to_string(&record.breakdown)?;

        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        // Idempotency guard: a record for this order aborts the commit.
        let existing = Query::select()
            .column(Settlements::OrderId)
            .from(Settlements::Table)
            .and_where(Expr::col(Settlements::OrderId).eq(record.order_id.to_string()))
            .to_string(SqliteQueryBuilder);
        if sqlx::query(&existing).fetch_optional(&mut *tx).await?.is_some() {
            return Err(StorageError::DuplicateOrder(record.order_id));
        }

        // Promo compare-and-increment: guarded UPDATE, row count decides.
        if let Some(usage) = &commit.promo_usage {
            let query = Query::update()
                .table(Promos::Table)
                .value(Promos::UsedCount, (usage.expected_used_count as i64) + 1)
                .and_where(Expr::col(Promos::Id).eq(usage.promo_id.to_string()))
                .and_where(Expr::col(Promos::UsedCount).eq(usage.expected_used_count as i64))
                .to_string(SqliteQueryBuilder);

            let result = sqlx::query(&query).execute(&mut *tx).await?;
            if result.rows_affected() == 0 {
                return Err(StorageError::UsageConflict);
            }
        }

        // Loyalty balance moves by earned - used, never below zero.
        let balance_query = Query::select()
            .column(LoyaltyAccounts::PointsBalance)
            .from(LoyaltyAccounts::Table)
            .and_where(Expr::col(LoyaltyAccounts::CustomerId).eq(record.customer_id.to_string()))
            .to_string(SqliteQueryBuilder);
        let balance = match sqlx::query(&balance_query).fetch_optional(&mut *tx).await? {
            Some(row) => get_decimal(&row, "points_balance")?,
            None => Decimal::ZERO,
        };
        let next = balance - record.points_used + record.points_earned;
        if next < Decimal::ZERO {
            return Err(StorageError::Consistency(format!(
                "balance for {} would go negative",
                record.customer_id
            )));
        }
        let query = Query::insert()
            .into_table(LoyaltyAccounts::Table)
            .columns([LoyaltyAccounts::CustomerId, LoyaltyAccounts::PointsBalance])
            .values_panic([
                record.customer_id.to_string().into(),
                next.to_string().into(),
            ])
            .on_conflict(
                OnConflict::column(LoyaltyAccounts::CustomerId)
                    .update_columns([LoyaltyAccounts::PointsBalance])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *tx).await?;

        if let Some(window) = &commit.window {
            let query = Query::insert()
                .into_table(CapWindows::Table)
                .columns([
                    CapWindows::CustomerId,
                    CapWindows::WeekStart,
                    CapWindows::PurchaseConsumed,
                    CapWindows::DiscountConsumed,
                ])
                .values_panic([
                    window.customer_id.to_string().into(),
                    window.week_start.to_rfc3339().into(),
                    window.purchase_consumed.to_string().into(),
                    window.discount_consumed.to_string().into(),
                ])
                .on_conflict(
                    OnConflict::column(CapWindows::CustomerId)
                        .update_columns([
                            CapWindows::WeekStart,
                            CapWindows::PurchaseConsumed,
                            CapWindows::DiscountConsumed,
                        ])
                        .to_owned(),
                )
                .to_string(SqliteQueryBuilder);
            sqlx::query(&query).execute(&mut *tx).await?;
        }

        let query = Query::insert()
            .into_table(Settlements::Table)
            .columns([
                Settlements::OrderId,
                Settlements::CustomerId,
                Settlements::State,
                Settlements::Breakdown,
                Settlements::PromoId,
                Settlements::PurchaseDelta,
                Settlements::DiscountDelta,
                Settlements::PointsUsed,
                Settlements::PointsEarned,
                Settlements::SettledAt,
            ])
            .values_panic([
                record.order_id.to_string().into(),
                record.customer_id.to_string().into(),
                record.state.as_str().into(),
                breakdown.into(),
                record.promo_id.map(|id| id.to_string()).into(),
                record.purchase_consumed_delta.to_string().into(),
                record.discount_consumed_delta.to_string().into(),
                record.points_used.to_string().into(),
                record.points_earned.to_string().into(),
                record.settled_at.to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *tx).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn revert(&self, order_id: Uuid) -> Result<SettlementRecord> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let query = Query::select()
            .expr(Expr::asterisk())
            .from(Settlements::Table)
            .and_where(Expr::col(Settlements::OrderId).eq(order_id.to_string()))
            .to_string(SqliteQueryBuilder);
        let row = sqlx::query(&query)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("settlement {order_id}")))?;
        let mut record = record_from_row(&row)?;
        if record.state != OrderState::Confirmed {
            return Err(StorageError::AlreadyReverted(order_id));
        }

        // Release the promo usage slot.
        if let Some(promo_id) = record.promo_id {
            let query = Query::select()
                .column(Promos::UsedCount)
                .from(Promos::Table)
                .and_where(Expr::col(Promos::Id).eq(promo_id.to_string()))
                .to_string(SqliteQueryBuilder);
            if let Some(row) = sqlx::query(&query).fetch_optional(&mut *tx).await? {
                let used: i64 = row.get("used_count");
                let query = Query::update()
                    .table(Promos::Table)
                    .value(Promos::UsedCount, used.saturating_sub(1))
                    .and_where(Expr::col(Promos::Id).eq(promo_id.to_string()))
                    .to_string(SqliteQueryBuilder);
                sqlx::query(&query).execute(&mut *tx).await?;
            }
        }

        // Hand back cap consumption only while the window still covers the
        // settled week; a rolled window already reset it.
        let query = Query::select()
            .expr(Expr::asterisk())
            .from(CapWindows::Table)
            .and_where(Expr::col(CapWindows::CustomerId).eq(record.customer_id.to_string()))
            .to_string(SqliteQueryBuilder);
        if let Some(row) = sqlx::query(&query).fetch_optional(&mut *tx).await? {
            let window = window_from_row(&row)?;
            if record.settled_at >= window.week_start {
                let purchase = (window.purchase_consumed - record.purchase_consumed_delta)
                    .max(Decimal::ZERO);
                let discount = (window.discount_consumed - record.discount_consumed_delta)
                    .max(Decimal::ZERO);
                let query = Query::update()
                    .table(CapWindows::Table)
                    .value(CapWindows::PurchaseConsumed, purchase.to_string())
                    .value(CapWindows::DiscountConsumed, discount.to_string())
                    .and_where(
                        Expr::col(CapWindows::CustomerId).eq(record.customer_id.to_string()),
                    )
                    .to_string(SqliteQueryBuilder);
                sqlx::query(&query).execute(&mut *tx).await?;
            }
        }

        // Undo the net point movement.
        let query = Query::select()
            .column(LoyaltyAccounts::PointsBalance)
            .from(LoyaltyAccounts::Table)
            .and_where(Expr::col(LoyaltyAccounts::CustomerId).eq(record.customer_id.to_string()))
            .to_string(SqliteQueryBuilder);
        let balance = match sqlx::query(&query).fetch_optional(&mut *tx).await? {
            Some(row) => get_decimal(&row, "points_balance")?,
            None => Decimal::ZERO,
        };
        let next = balance + record.points_used - record.points_earned;
        if next < Decimal::ZERO {
            warn!(customer = %record.customer_id, "refund would drive balance negative; clamping");
        }
        let next = next.max(Decimal::ZERO);
        let query = Query::insert()
            .into_table(LoyaltyAccounts::Table)
            .columns([LoyaltyAccounts::CustomerId, LoyaltyAccounts::PointsBalance])
            .values_panic([
                record.customer_id.to_string().into(),
                next.to_string().into(),
            ])
            .on_conflict(
                OnConflict::column(LoyaltyAccounts::CustomerId)
                    .update_columns([LoyaltyAccounts::PointsBalance])
                    .to_owned(),
            )
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *tx).await?;

        let query = Query::update()
            .table(Settlements::Table)
            .value(Settlements::State, OrderState::Refunded.as_str())
            .and_where(Expr::col(Settlements::OrderId).eq(order_id.to_string()))
            .to_string(SqliteQueryBuilder);
        sqlx::query(&query).execute(&mut *tx).await?;

        tx.commit().await?;

        record.state = OrderState::Refunded;
        Ok(record)
    }
}
