mod retention;

pub use retention::SqliteRetentionRepo;
