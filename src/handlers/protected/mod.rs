// handlers/protected/mod.rs - Protected handlers (bearer token required)
//
// Every handler here takes a `TenantContext`, so it only runs once the token
// is verified and the caller's clinic store is connected and bound.
pub mod auth;
pub mod entities;
