//! §4.C `Router`: IAM rule evaluation plus cheapest-candidate selection.
//! Pure logic over [`llmgate_catalog`] and [`llmgate_storage`] — no HTTP.

mod iam;
mod router;

pub use router::{ModeHint, RouteDecision, RouteRequest, Router};
