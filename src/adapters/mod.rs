pub mod acl_memory;
pub mod config_providers;
pub mod grpc_bridge;
pub mod http_client;
pub mod http_handler;
pub mod jwt_authority;
pub mod pipeline;
pub mod policy_static;
pub mod prober;
pub mod ws_forwarder;

pub use acl_memory::MemoryAclStore;
pub use config_providers::FileConfigProvider;
pub use grpc_bridge::GrpcBridge;
pub use http_client::{ForwardMode, HttpClientAdapter};
pub use http_handler::GatewayApp;
pub use jwt_authority::JwtAuthority;
pub use pipeline::RequestPipeline;
pub use policy_static::StaticPolicyEngine;
pub use prober::ProtocolProber;
