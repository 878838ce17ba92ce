//! Multi-tenant authorization, producer identity signing, and cross-tenant
//! replay prevention.

pub mod authorizer;
pub mod identity;
pub mod replay;

pub use authorizer::{create_default_authorizer, AuthorizationResult, TenantAuthorizer};
pub use identity::{ProducerIdentity, ProducerRole, ProducerSignature};
pub use replay::CrossTenantReplayPrevention;
