// handlers/public/mod.rs - Public handlers (no authentication required)
//
// Token acquisition and clinic discovery. Every input is untrusted.
pub mod auth;
pub mod clinics;
