pub mod auth;
pub mod response;
pub mod tenant;

pub use auth::extract_bearer_token;
pub use response::{ApiResponse, ApiResult};
pub use tenant::{CallerIdentity, TenantContext, TenantContextError, TenantUser};
