//! Sukli - checkout settlement engine.
//!
//! Given an order snapshot and a customer's eligibility profile, decides how
//! much of a promo code, a BNPC (senior/PWD) discount, and redeemed loyalty
//! points may simultaneously reduce the order total, enforcing weekly caps,
//! usage limits, and point-earning rules. Settlements commit atomically; a
//! refund reverses every consumed allowance in one unit.

pub mod admin;
pub mod caps;
pub mod composer;
pub mod config;
pub mod contract;
pub mod domain;
pub mod error;
pub mod interfaces;
pub mod ledger;
pub mod poller;
pub mod promo_validator;
pub mod settlement;
pub mod storage;
pub mod telemetry;
