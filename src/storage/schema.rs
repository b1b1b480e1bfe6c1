//! Database schema definitions using sea-query.
//!
//! Table and column identifiers for type-safe query building. Currency and
//! point values are stored as TEXT-encoded decimals, timestamps as RFC 3339.

use sea_query::Iden;

/// Promos table schema.
#[derive(Iden)]
pub enum Promos {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "code"]
    Code,
    #[iden = "promo_type"]
    PromoType,
    #[iden = "value"]
    Value,
    #[iden = "scope"]
    Scope,
    #[iden = "target_ids"]
    TargetIds,
    #[iden = "min_purchase"]
    MinPurchase,
    #[iden = "start_date"]
    StartDate,
    #[iden = "end_date"]
    EndDate,
    #[iden = "usage_limit"]
    UsageLimit,
    #[iden = "used_count"]
    UsedCount,
    #[iden = "active"]
    Active,
}

/// BNPC profiles table schema.
#[derive(Iden)]
pub enum BnpcProfiles {
    Table,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "verified"]
    Verified,
    #[iden = "weekly_purchase_cap"]
    WeeklyPurchaseCap,
    #[iden = "weekly_discount_cap"]
    WeeklyDiscountCap,
    #[iden = "rate"]
    Rate,
}

/// Weekly cap windows table schema.
#[derive(Iden)]
pub enum CapWindows {
    Table,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "week_start"]
    WeekStart,
    #[iden = "purchase_consumed"]
    PurchaseConsumed,
    #[iden = "discount_consumed"]
    DiscountConsumed,
}

/// Loyalty accounts table schema.
#[derive(Iden)]
pub enum LoyaltyAccounts {
    Table,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "points_balance"]
    PointsBalance,
}

/// Loyalty settings table schema (single tenant-wide row).
#[derive(Iden)]
pub enum LoyaltyConfig {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "points_to_currency_rate"]
    PointsToCurrencyRate,
    #[iden = "max_redeem_percent"]
    MaxRedeemPercent,
    #[iden = "earn_rate"]
    EarnRate,
    #[iden = "enabled"]
    Enabled,
}

/// Settlements table schema.
#[derive(Iden)]
pub enum Settlements {
    Table,
    #[iden = "order_id"]
    OrderId,
    #[iden = "customer_id"]
    CustomerId,
    #[iden = "state"]
    State,
    #[iden = "breakdown"]
    Breakdown,
    #[iden = "promo_id"]
    PromoId,
    #[iden = "purchase_delta"]
    PurchaseDelta,
    #[iden = "discount_delta"]
    DiscountDelta,
    #[iden = "points_used"]
    PointsUsed,
    #[iden = "points_earned"]
    PointsEarned,
    #[iden = "settled_at"]
    SettledAt,
}

/// SQL for creating the promos table.
pub const CREATE_PROMOS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS promos (
    id TEXT PRIMARY KEY,
    code TEXT NOT NULL UNIQUE,
    promo_type TEXT NOT NULL,
    value TEXT NOT NULL,
    scope TEXT NOT NULL,
    target_ids TEXT NOT NULL DEFAULT '[]',
    min_purchase TEXT,
    start_date TEXT NOT NULL,
    end_date TEXT NOT NULL,
    usage_limit INTEGER,
    used_count INTEGER NOT NULL DEFAULT 0,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_promos_code ON promos(code);
"#;

/// SQL for creating the BNPC profiles table.
pub const CREATE_BNPC_PROFILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS bnpc_profiles (
    customer_id TEXT PRIMARY KEY,
    verified INTEGER NOT NULL DEFAULT 0,
    weekly_purchase_cap TEXT NOT NULL,
    weekly_discount_cap TEXT NOT NULL,
    rate TEXT NOT NULL
);
"#;

/// SQL for creating the cap windows table.
pub const CREATE_CAP_WINDOWS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS cap_windows (
    customer_id TEXT PRIMARY KEY,
    week_start TEXT NOT NULL,
    purchase_consumed TEXT NOT NULL,
    discount_consumed TEXT NOT NULL
);
"#;

/// SQL for creating the loyalty accounts table.
pub const CREATE_LOYALTY_ACCOUNTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS loyalty_accounts (
    customer_id TEXT PRIMARY KEY,
    points_balance TEXT NOT NULL
);
"#;

/// SQL for creating the loyalty settings table.
pub const CREATE_LOYALTY_CONFIG_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS loyalty_config (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    points_to_currency_rate TEXT NOT NULL,
    max_redeem_percent TEXT NOT NULL,
    earn_rate TEXT NOT NULL,
    enabled INTEGER NOT NULL DEFAULT 1
);
"#;

/// SQL for creating the settlements table.
pub const CREATE_SETTLEMENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS settlements (
    order_id TEXT PRIMARY KEY,
    customer_id TEXT NOT NULL,
    state TEXT NOT NULL,
    breakdown TEXT NOT NULL,
    promo_id TEXT,
    purchase_delta TEXT NOT NULL,
    discount_delta TEXT NOT NULL,
    points_used TEXT NOT NULL,
    points_earned TEXT NOT NULL,
    settled_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_settlements_customer ON settlements(customer_id);
"#;
