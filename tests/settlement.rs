//! End-to-end settlement behavior against the in-memory backend.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use sukli::contract::{RequestLine, SettleRequest};
use sukli::domain::{BnpcProfile, Promo, PromoScope, PromoType, SettlementRecord, WeeklyCapWindow};
use sukli::interfaces::{
    LoyaltyStore, PromoStore, Result as StoreResult, SettlementCommit, SettlementStore,
    StorageError,
};
use sukli::error::{SettlementError, ValidationError};
use sukli::settlement::{SettlementService, SettlementTuning};
use sukli::storage::{MemoryBackend, Stores};

fn stores(backend: &MemoryBackend) -> Stores {
    Stores {
        promos: backend.promo_store(),
        loyalty: backend.loyalty_store(),
        settlements: backend.settlement_store(),
    }
}

fn service(backend: &MemoryBackend) -> SettlementService {
    SettlementService::new(stores(backend), SettlementTuning::default())
}

fn now() -> DateTime<Utc> {
    // A Wednesday; the local (UTC+8) week started Sunday 2024-07-07.
    Utc.with_ymd_and_hms(2024, 7, 10, 4, 0, 0).unwrap()
}

fn line(unit_price: Decimal, quantity: u32, bnpc_eligible: bool) -> RequestLine {
    RequestLine {
        product_id: Uuid::new_v4(),
        category_id: Uuid::new_v4(),
        unit_price,
        quantity,
        bnpc_eligible,
    }
}

fn request(customer_id: Uuid, lines: Vec<RequestLine>) -> SettleRequest {
    SettleRequest {
        customer_id,
        order_id: Uuid::new_v4(),
        lines,
        promo_code: None,
        points_to_redeem: None,
    }
}

fn percentage_promo(code: &str, value: Decimal, min_purchase: Option<Decimal>) -> Promo {
    Promo {
        id: Uuid::new_v4(),
        code: code.to_string(),
        promo_type: PromoType::Percentage,
        value,
        scope: PromoScope::Cart,
        target_ids: vec![],
        min_purchase,
        start_date: now() - chrono::Duration::days(7),
        end_date: now() + chrono::Duration::days(7),
        usage_limit: None,
        used_count: 0,
        active: true,
    }
}

#[tokio::test]
async fn test_plain_order_pays_subtotal_and_earns() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let customer = Uuid::new_v4();

    let breakdown = svc
        .settle_at(request(customer, vec![line(dec!(250), 2, false)]), now())
        .await
        .unwrap();

    assert_eq!(breakdown.total, dec!(0));
    assert_eq!(breakdown.base_amount, dec!(500));
    assert_eq!(breakdown.final_amount_paid, dec!(500));
    // Default earn rate is 0.1 points per currency unit paid.
    assert_eq!(breakdown.loyalty_discount.points_earned, dec!(50.00));
    let account = backend.loyalty_store().account(customer).await.unwrap();
    assert_eq!(account.points_balance, dec!(50.00));
}

#[tokio::test]
async fn test_bnpc_discount_capped_by_weekly_allowances() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let customer = Uuid::new_v4();
    backend
        .settlement_store()
        .put_bnpc_profile(BnpcProfile::new(customer, true))
        .await
        .unwrap();

    // 3000 of eligible goods: only 2500 of it is discountable this week,
    // and 5% of that is exactly the 125 discount cap.
    let breakdown = svc
        .settle_at(request(customer, vec![line(dec!(3000), 1, true)]), now())
        .await
        .unwrap();

    assert_eq!(breakdown.bnpc_discount.total, dec!(125.00));
    assert_eq!(breakdown.final_amount_paid, dec!(2875.00));

    let window = backend
        .settlement_store()
        .cap_window(customer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(window.purchase_consumed, dec!(2500));
    assert_eq!(window.discount_consumed, dec!(125.00));

    // The week's allowances are spent; a second purchase gets nothing.
    let second = svc
        .settle_at(request(customer, vec![line(dec!(100), 1, true)]), now())
        .await
        .unwrap();
    assert_eq!(second.bnpc_discount.total, dec!(0));
    assert_eq!(second.final_amount_paid, dec!(100));
}

#[tokio::test]
async fn test_unverified_profile_gets_no_bnpc() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let customer = Uuid::new_v4();
    backend
        .settlement_store()
        .put_bnpc_profile(BnpcProfile::new(customer, false))
        .await
        .unwrap();

    let breakdown = svc
        .settle_at(request(customer, vec![line(dec!(1000), 1, true)]), now())
        .await
        .unwrap();
    assert_eq!(breakdown.bnpc_discount.total, dec!(0));
    assert!(backend
        .settlement_store()
        .cap_window(customer)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_promo_applies_above_min_purchase_only() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    backend
        .promo_store()
        .insert(percentage_promo("SUMMER24", dec!(10), Some(dec!(500))))
        .await
        .unwrap();

    let mut req = request(Uuid::new_v4(), vec![line(dec!(1000), 1, false)]);
    req.promo_code = Some("SUMMER24".to_string());
    let breakdown = svc.settle_at(req, now()).await.unwrap();
    assert_eq!(breakdown.promo_discount.amount, dec!(100.00));
    assert_eq!(breakdown.promo_discount.code.as_deref(), Some("SUMMER24"));

    let mut small = request(Uuid::new_v4(), vec![line(dec!(400), 1, false)]);
    small.promo_code = Some("SUMMER24".to_string());
    let err = svc.settle_at(small, now()).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::Validation(ValidationError::MinPurchaseNotMet { .. })
    ));
}

#[tokio::test]
async fn test_unknown_promo_code_is_rejected() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);

    let mut req = request(Uuid::new_v4(), vec![line(dec!(100), 1, false)]);
    req.promo_code = Some("NOPE".to_string());
    let err = svc.settle_at(req, now()).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::Validation(ValidationError::PromoNotFound(_))
    ));
}

#[tokio::test]
async fn test_loyalty_redeem_capped_by_percent_of_remaining() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let customer = Uuid::new_v4();
    backend
        .loyalty_store()
        .credit(customer, dec!(1000))
        .await
        .unwrap();

    // 500 points requested, but the default 20% ceiling on a 1000 order
    // allows only 200 currency units of redemption.
    let mut req = request(customer, vec![line(dec!(1000), 1, false)]);
    req.points_to_redeem = Some(500);
    let breakdown = svc.settle_at(req, now()).await.unwrap();

    assert_eq!(breakdown.loyalty_discount.amount, dec!(200.00));
    assert_eq!(breakdown.loyalty_discount.points_used, dec!(200));
    assert_eq!(breakdown.final_amount_paid, dec!(800.00));
    assert_eq!(breakdown.loyalty_discount.points_earned, dec!(80.00));

    // Balance moved by the net of redemption and earn in one commit.
    let account = backend.loyalty_store().account(customer).await.unwrap();
    assert_eq!(account.points_balance, dec!(880.00));
}

#[tokio::test]
async fn test_insufficient_points_fail_settlement() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let customer = Uuid::new_v4();
    backend
        .loyalty_store()
        .credit(customer, dec!(50))
        .await
        .unwrap();

    let mut req = request(customer, vec![line(dec!(1000), 1, false)]);
    req.points_to_redeem = Some(500);
    let err = svc.settle_at(req, now()).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::Validation(ValidationError::InsufficientPoints { .. })
    ));
    // Nothing was consumed.
    let account = backend.loyalty_store().account(customer).await.unwrap();
    assert_eq!(account.points_balance, dec!(50));
}

#[tokio::test]
async fn test_fully_discounted_order_earns_nothing() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let mut promo = percentage_promo("FREE", dec!(100), None);
    promo.promo_type = PromoType::Fixed;
    promo.value = dec!(1000);
    backend.promo_store().insert(promo).await.unwrap();

    let mut req = request(Uuid::new_v4(), vec![line(dec!(1000), 1, false)]);
    req.promo_code = Some("FREE".to_string());
    let breakdown = svc.settle_at(req, now()).await.unwrap();
    assert_eq!(breakdown.final_amount_paid, dec!(0.00));
    assert_eq!(breakdown.loyalty_discount.points_earned, dec!(0));
}

#[tokio::test]
async fn test_replay_returns_recorded_breakdown_without_double_consumption() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let customer = Uuid::new_v4();
    let promo = percentage_promo("SUMMER24", dec!(10), None);
    let promo_id = promo.id;
    backend.promo_store().insert(promo).await.unwrap();
    backend
        .loyalty_store()
        .credit(customer, dec!(1000))
        .await
        .unwrap();

    let mut req = request(customer, vec![line(dec!(1000), 1, false)]);
    req.promo_code = Some("SUMMER24".to_string());
    req.points_to_redeem = Some(100);

    let first = svc.settle_at(req.clone(), now()).await.unwrap();
    let balance_after_first = backend
        .loyalty_store()
        .account(customer)
        .await
        .unwrap()
        .points_balance;

    let second = svc.settle_at(req, now()).await.unwrap();
    assert_eq!(first, second);

    let promo = backend
        .promo_store()
        .by_id(promo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promo.used_count, 1);
    let balance_after_second = backend
        .loyalty_store()
        .account(customer)
        .await
        .unwrap()
        .points_balance;
    assert_eq!(balance_after_first, balance_after_second);
}

#[tokio::test]
async fn test_usage_limited_promo_admits_exactly_one_of_two_racers() {
    let backend = MemoryBackend::default();
    let svc = Arc::new(service(&backend));
    let mut promo = percentage_promo("LAST1", dec!(10), None);
    promo.usage_limit = Some(1);
    let promo_id = promo.id;
    backend.promo_store().insert(promo).await.unwrap();

    let mut a = request(Uuid::new_v4(), vec![line(dec!(100), 1, false)]);
    a.promo_code = Some("LAST1".to_string());
    let mut b = request(Uuid::new_v4(), vec![line(dec!(100), 1, false)]);
    b.promo_code = Some("LAST1".to_string());

    let (ra, rb) = tokio::join!(
        {
            let svc = Arc::clone(&svc);
            async move { svc.settle_at(a, now()).await }
        },
        {
            let svc = Arc::clone(&svc);
            async move { svc.settle_at(b, now()).await }
        }
    );

    let outcomes = [ra, rb];
    let wins = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    let loser = outcomes.iter().find(|r| r.is_err()).unwrap();
    assert!(matches!(
        loser,
        Err(SettlementError::Validation(
            ValidationError::UsageLimitReached
        ))
    ));

    let promo = backend
        .promo_store()
        .by_id(promo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promo.used_count, 1);
}

#[tokio::test]
async fn test_refund_restores_every_allowance() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let customer = Uuid::new_v4();
    let promo = percentage_promo("SUMMER24", dec!(10), None);
    let promo_id = promo.id;
    backend.promo_store().insert(promo).await.unwrap();
    backend
        .settlement_store()
        .put_bnpc_profile(BnpcProfile::new(customer, true))
        .await
        .unwrap();
    backend
        .loyalty_store()
        .credit(customer, dec!(1000))
        .await
        .unwrap();

    let mut req = request(customer, vec![line(dec!(1000), 1, true)]);
    req.promo_code = Some("SUMMER24".to_string());
    req.points_to_redeem = Some(100);
    let order_id = req.order_id;

    svc.settle_at(req, now()).await.unwrap();

    let reverted = svc.refund(order_id).await.unwrap();
    assert_eq!(reverted.order_id, order_id);

    let promo = backend
        .promo_store()
        .by_id(promo_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promo.used_count, 0);

    let window = backend
        .settlement_store()
        .cap_window(customer)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(window.purchase_consumed, dec!(0));
    assert_eq!(window.discount_consumed, dec!(0.00));

    let account = backend.loyalty_store().account(customer).await.unwrap();
    assert_eq!(account.points_balance, dec!(1000.00));

    let again = svc.refund(order_id).await.unwrap_err();
    assert!(matches!(
        again,
        SettlementError::Validation(ValidationError::AlreadyRefunded)
    ));
}

#[tokio::test]
async fn test_refund_of_unknown_order_is_rejected() {
    let backend = MemoryBackend::default();
    let svc = service(&backend);
    let err = svc.refund(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(
        err,
        SettlementError::Validation(ValidationError::RecordNotFound)
    ));
}

/// Settlement store whose operations never complete, for deadline coverage.
struct StalledSettlementStore;

#[async_trait::async_trait]
impl SettlementStore for StalledSettlementStore {
    async fn bnpc_profile(&self, _customer_id: Uuid) -> StoreResult<Option<BnpcProfile>> {
        std::future::pending().await
    }

    async fn put_bnpc_profile(&self, _profile: BnpcProfile) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn cap_window(&self, _customer_id: Uuid) -> StoreResult<Option<WeeklyCapWindow>> {
        std::future::pending().await
    }

    async fn record(&self, _order_id: Uuid) -> StoreResult<Option<SettlementRecord>> {
        std::future::pending().await
    }

    async fn commit(&self, _commit: SettlementCommit) -> StoreResult<()> {
        std::future::pending().await
    }

    async fn revert(&self, _order_id: Uuid) -> StoreResult<SettlementRecord> {
        std::future::pending().await
    }
}

/// Delegating store whose commits always lose the usage compare-and-increment.
struct ContendedSettlementStore {
    inner: Arc<dyn SettlementStore>,
}

#[async_trait::async_trait]
impl SettlementStore for ContendedSettlementStore {
    async fn bnpc_profile(&self, customer_id: Uuid) -> StoreResult<Option<BnpcProfile>> {
        self.inner.bnpc_profile(customer_id).await
    }

    async fn put_bnpc_profile(&self, profile: BnpcProfile) -> StoreResult<()> {
        self.inner.put_bnpc_profile(profile).await
    }

    async fn cap_window(&self, customer_id: Uuid) -> StoreResult<Option<WeeklyCapWindow>> {
        self.inner.cap_window(customer_id).await
    }

    async fn record(&self, order_id: Uuid) -> StoreResult<Option<SettlementRecord>> {
        self.inner.record(order_id).await
    }

    async fn commit(&self, _commit: SettlementCommit) -> StoreResult<()> {
        Err(StorageError::UsageConflict)
    }

    async fn revert(&self, order_id: Uuid) -> StoreResult<SettlementRecord> {
        self.inner.revert(order_id).await
    }
}

#[tokio::test]
async fn test_settlement_deadline_expires_as_timeout() {
    let backend = MemoryBackend::default();
    let svc = SettlementService::new(
        Stores {
            promos: backend.promo_store(),
            loyalty: backend.loyalty_store(),
            settlements: Arc::new(StalledSettlementStore),
        },
        SettlementTuning {
            timeout: Duration::from_millis(20),
            ..SettlementTuning::default()
        },
    );

    let req = request(Uuid::new_v4(), vec![line(dec!(100.00), 1, false)]);
    let err = svc.settle_at(req, now()).await.unwrap_err();
    assert!(matches!(err, SettlementError::Timeout));
}

#[tokio::test]
async fn test_promo_contention_exhausts_retries() {
    let backend = MemoryBackend::default();
    backend
        .promo_store()
        .insert(percentage_promo("SUMMER24", dec!(10), None))
        .await
        .unwrap();
    let svc = SettlementService::new(
        Stores {
            promos: backend.promo_store(),
            loyalty: backend.loyalty_store(),
            settlements: Arc::new(ContendedSettlementStore {
                inner: backend.settlement_store(),
            }),
        },
        SettlementTuning {
            promo_retry_max: 0,
            ..SettlementTuning::default()
        },
    );

    let mut req = request(Uuid::new_v4(), vec![line(dec!(500.00), 1, false)]);
    req.promo_code = Some("SUMMER24".to_string());
    let err = svc.settle_at(req, now()).await.unwrap_err();
    assert!(matches!(err, SettlementError::PromoContended { attempts: 1 }));
}
