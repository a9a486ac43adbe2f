pub mod api_keys;
pub mod models;
pub mod oauth_accounts;
pub mod providers;
pub mod usage_logs;

pub use api_keys::Entity as ApiKeys;
pub use models::Entity as Models;
pub use oauth_accounts::Entity as OAuthAccounts;
pub use providers::Entity as Providers;
pub use usage_logs::Entity as UsageLogs;
