pub mod api_keys;
pub mod catalog_stats;
pub mod global_config;
pub mod iam_rules;
pub mod locks;
pub mod logs;
pub mod model_history;
pub mod model_provider_mapping_history;
pub mod organizations;
pub mod projects;
pub mod provider_keys;
pub mod transactions;

pub use api_keys::Entity as ApiKeys;
pub use catalog_stats::Entity as CatalogStats;
pub use global_config::Entity as GlobalConfig;
pub use iam_rules::Entity as IamRules;
pub use locks::Entity as Locks;
pub use logs::Entity as Logs;
pub use model_history::Entity as ModelHistory;
pub use model_provider_mapping_history::Entity as ModelProviderMappingHistory;
pub use organizations::Entity as Organizations;
pub use projects::Entity as Projects;
pub use provider_keys::Entity as ProviderKeys;
pub use transactions::Entity as Transactions;
