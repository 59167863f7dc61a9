pub mod blob;
pub mod database;
pub mod error;
pub mod logs;
pub mod persistence;
pub mod plants;
pub mod robots;
pub mod row_helpers;
pub mod schema;
pub mod schedule;
pub mod users;

pub use blob::FsBlobStore;
pub use database::Database;
pub use error::StoreError;
pub use persistence::SqlitePersistence;
