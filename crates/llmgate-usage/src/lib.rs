//! §4.F/§4.G background usage plane: the queue-drain + credit-batching
//! worker and the minute-history/rollup calculator. Both run as long-lived
//! tasks spawned by the app's bootstrap alongside the request-serving side.

mod payment;
mod stats;
mod worker;

pub use payment::{NoopPaymentProvider, PaymentProvider, TopupOutcome};
pub use stats::StatsCalculator;
pub use worker::{UsageWorker, UsageWorkerConfig};
