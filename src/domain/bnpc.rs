//! BNPC eligibility profile and the weekly cap window.
//!
//! The BNPC program grants verified senior/PWD customers a 5% discount on
//! eligible items, subject to weekly purchase and discount caps. Weeks run
//! Sunday 00:00 to Saturday in the tenant's local timezone; the window is
//! keyed by the week-start instant so resets are deterministic.

use chrono::{DateTime, Datelike, Duration, FixedOffset, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

/// A customer's BNPC eligibility, only meaningful once verified.
#[derive(Debug, Clone, PartialEq)]
pub struct BnpcProfile {
    pub customer_id: Uuid,
    pub verified: bool,
    pub weekly_purchase_cap: Decimal,
    pub weekly_discount_cap: Decimal,
    pub rate: Decimal,
}

impl BnpcProfile {
    /// Profile with the statutory caps: 2500 purchase, 125 discount, 5% rate.
    pub fn new(customer_id: Uuid, verified: bool) -> Self {
        Self {
            customer_id,
            verified,
            weekly_purchase_cap: Decimal::from(2500),
            weekly_discount_cap: Decimal::from(125),
            rate: Decimal::new(5, 2),
        }
    }
}

/// Rolling per-customer consumption for the current Sun-Sat week.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklyCapWindow {
    pub customer_id: Uuid,
    pub week_start: DateTime<Utc>,
    pub purchase_consumed: Decimal,
    pub discount_consumed: Decimal,
}

impl WeeklyCapWindow {
    /// Empty window for the week containing `now`.
    pub fn fresh(customer_id: Uuid, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        Self {
            customer_id,
            week_start: week_start(now, offset),
            purchase_consumed: Decimal::ZERO,
            discount_consumed: Decimal::ZERO,
        }
    }

    /// Roll forward: once `now` passes `week_start + 7d`, both counters reset
    /// and the window re-keys to the current week.
    pub fn rolled_forward(self, now: DateTime<Utc>, offset: FixedOffset) -> Self {
        if now >= self.week_start + Duration::days(7) {
            Self::fresh(self.customer_id, now, offset)
        } else {
            self
        }
    }
}

/// The Sunday 00:00 (local) instant of the week containing `now`.
///
/// Pure so weekly resets are testable without mocking timers.
pub fn week_start(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    let days_back = local.weekday().num_days_from_sunday() as i64;
    let sunday = local.date_naive() - Duration::days(days_back);
    let midnight = sunday
        .and_hms_opt(0, 0, 0)
        .expect("midnight is a valid time of day");
    midnight
        .and_local_timezone(offset)
        .single()
        .expect("fixed offsets map local times unambiguously")
        .with_timezone(&Utc)
}
