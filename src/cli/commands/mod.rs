pub mod admin;
pub mod tenant;
