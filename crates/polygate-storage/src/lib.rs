pub mod entities;
pub mod store;
pub mod usage;

pub use store::{
    GatewayStore, NewApiKey, NewModel, NewOAuthAccount, NewProvider, RouteCandidate,
    StorageError, StorageResult, UsageRow,
};
pub use usage::UsageSink;
