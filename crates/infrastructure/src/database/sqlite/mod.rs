pub mod sqlite_stats_repository;

pub use sqlite_stats_repository::SqliteStatsRepository;
