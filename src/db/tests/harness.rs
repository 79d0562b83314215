//! Test harness for database repository testing
//!
//! Provides utilities for setting up test databases:
//! - SQLite: Fast in-memory databases with real migrations
//! - PostgreSQL: Testcontainers-based instances with real migrations

#[cfg(feature = "database-sqlite")]
use sqlx::SqlitePool;

/// Create an in-memory SQLite pool for testing
///
/// A single connection keeps every query on the same in-memory database.
#[cfg(feature = "database-sqlite")]
pub async fn create_sqlite_pool() -> SqlitePool {
    sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory SQLite pool")
}

/// Run SQLite migrations on the pool
///
/// Uses the actual migration files to ensure tests match production schema
#[cfg(feature = "database-sqlite")]
pub async fn run_sqlite_migrations(pool: &SqlitePool) {
    sqlx::migrate!("./migrations_sqlx/sqlite")
        .run(pool)
        .await
        .expect("Failed to run SQLite migrations");
}

/// PostgreSQL test harness using testcontainers
#[cfg(all(test, feature = "database-postgres"))]
pub mod postgres {
    use std::sync::OnceLock;

    use sqlx::PgPool;
    use testcontainers_modules::{
        postgres::Postgres,
        testcontainers::{ContainerAsync, ImageExt, runners::AsyncRunner},
    };
    use tokio::sync::OnceCell;

    /// Shared container state - initialized once per test run
    struct SharedContainer {
        #[allow(dead_code)] // Test infrastructure: keeps container alive
        container: ContainerAsync<Postgres>,
        connection_string: String,
    }

    static SHARED_CONTAINER: OnceLock<OnceCell<SharedContainer>> = OnceLock::new();

    async fn get_shared_container() -> &'static SharedContainer {
        let cell = SHARED_CONTAINER.get_or_init(OnceCell::new);
        cell.get_or_init(|| async {
            let container = Postgres::default()
                .with_tag("17-alpine")
                .start()
                .await
                .expect("Failed to start PostgreSQL container");

            let host = container.get_host().await.expect("Failed to get host");
            let port = container
                .get_host_port_ipv4(5432)
                .await
                .expect("Failed to get port");

            SharedContainer {
                container,
                connection_string: format!("postgres://postgres:postgres@{host}:{port}/postgres"),
            }
        })
        .await
    }

    /// Create a pool bound to a fresh, uniquely named schema
    ///
    /// The container is shared by every test in the run; each test gets its
    /// own schema so retained tables never collide.
    pub async fn create_isolated_postgres_pool() -> PgPool {
        let shared = get_shared_container().await;

        let admin_pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(1)
            .connect(&shared.connection_string)
            .await
            .expect("Failed to connect to PostgreSQL");

        let schema_name = format!("sweeper_test_{}", uuid::Uuid::new_v4().simple());
        sqlx::query(&format!("CREATE SCHEMA \"{schema_name}\""))
            .execute(&admin_pool)
            .await
            .expect("Failed to create test schema");

        let isolated_url = format!(
            "{}?options=-c search_path={}",
            shared.connection_string, schema_name
        );

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(&isolated_url)
            .await
            .expect("Failed to connect to isolated schema")
    }

    /// Run PostgreSQL migrations on the pool
    pub async fn run_postgres_migrations(pool: &PgPool) {
        sqlx::migrate!("./migrations_sqlx/postgres")
            .run(pool)
            .await
            .expect("Failed to run PostgreSQL migrations");
    }
}
