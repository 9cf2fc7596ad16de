pub mod acl_store;
pub mod auth;
pub mod config_provider;
pub mod http_client;
pub mod prober;

pub use acl_store::{AclList, AclStore};
pub use auth::{AuthError, PolicyEngine, TokenAuthority, TokenClaims};
pub use config_provider::ConfigProvider;
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
pub use prober::Prober;
