//! Security checks run by the request pipeline.
pub mod anti_injection;
pub mod ip_acl;

pub use ip_acl::{AclVerdict, IpAcl};
