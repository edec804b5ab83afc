use herald_core::models::{CleanedContent, DiscoveredItem, ExtractionTier, FeedEntry, NewArticle};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Migration statements from 001_articles.sql, executed one at a time.
const MIGRATIONS: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS articles (
        item_id VARCHAR(64) PRIMARY KEY,
        source VARCHAR(100) NOT NULL,
        title TEXT NOT NULL,
        url TEXT NOT NULL,
        published_at TIMESTAMPTZ,
        author TEXT,
        tags TEXT[] NOT NULL DEFAULT '{}',
        content TEXT NOT NULL,
        content_hash VARCHAR(64) NOT NULL,
        tier VARCHAR(32) NOT NULL,
        metadata JSONB NOT NULL DEFAULT '{}',
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_articles_source_created
        ON articles(source, created_at DESC)"#,
    r#"CREATE INDEX IF NOT EXISTS idx_articles_content_hash
        ON articles(content_hash)"#,
];

/// Spins up a PostgreSQL container and returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration —
/// dropping it will stop the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "herald_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string = format!("postgresql://postgres:postgres@{host}:{port}/herald_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    // Run migrations one statement at a time
    for migration in MIGRATIONS {
        sqlx::query(migration)
            .execute(&pool)
            .await
            .expect("Failed to run migration");
    }

    (pool, container)
}

/// A cleaned article for `source` with a distinct title and URL per `n`.
pub fn sample_article(source: &str, n: usize) -> NewArticle {
    let entry = FeedEntry::new(
        format!("Headline {n}"),
        format!("https://www.{source}.com/news/{n}"),
    );
    let item = DiscoveredItem::new(source, entry);
    let cleaned = CleanedContent {
        text: format!("Body of article {n}.\n\nSecond paragraph."),
        metadata: serde_json::json!({ "cleaned_by": "basic" }),
    };
    NewArticle::from_parts(&item, ExtractionTier::LightweightFetch, cleaned)
}
