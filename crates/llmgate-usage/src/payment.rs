//! §4.F "Out-of-scope payment specifics are shielded behind a
//! `PaymentProvider` interface" (§6). Nothing in this crate knows how an
//! actual charge happens; it only reacts to the pass/fail outcome.

use async_trait::async_trait;
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct TopupOutcome {
    pub succeeded: bool,
    pub provider_reference: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn charge_topup(&self, organization_id: i64, amount: Decimal) -> TopupOutcome;
}

/// Default provider for deployments with no payment integration wired up
/// yet: every top-up attempt fails, leaving the transaction row as a record
/// of the attempt rather than silently dropping it.
pub struct NoopPaymentProvider;

#[async_trait]
impl PaymentProvider for NoopPaymentProvider {
    async fn charge_topup(&self, _organization_id: i64, _amount: Decimal) -> TopupOutcome {
        TopupOutcome {
            succeeded: false,
            provider_reference: None,
        }
    }
}
