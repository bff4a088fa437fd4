// handlers/protected/entities - Generic CRUD over the fixed entity list
pub mod collection;
pub mod record;
pub mod utils;

pub use collection::get as collection_get;
pub use collection::post as collection_post;

pub use record::delete as record_delete;
pub use record::get as record_get;
pub use record::patch as record_patch;
