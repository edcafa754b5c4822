//! §3 data model as SeaORM entities, plus the `Storage` trait every other
//! crate programs against (§5 "the DB connection pool is shared").

pub mod db;
pub mod entities;
pub mod seaorm;
pub mod snapshot;
pub mod storage;

pub use seaorm::SeaOrmStorage;
pub use snapshot::GlobalConfigRow;
pub use storage::{
    ActivityBucket, ApiKeyRow, CreditBatchOutcome, CredentialStore, IamRuleRow, LogQueryFilter,
    LogQueryResult, LogSummaryRow, NewLogRecord, OrgTopupCandidate, OrganizationRow, ProjectRow,
    ResolvedApiKey, Storage, StorageError, StorageResult,
};
