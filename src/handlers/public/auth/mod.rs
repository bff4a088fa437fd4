// handlers/public/auth/mod.rs - Token acquisition endpoints
pub mod clinic;
pub mod session;

pub use clinic::create as clinic_create;
pub use clinic::join as clinic_join;
pub use session::login;
pub use session::super_admin_login;
