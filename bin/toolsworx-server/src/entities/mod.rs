//! Persistence layer.
//!
//! [`JobStore`] defines the interface for job records; [`SqliteStore`] is the
//! only implementation. Trait methods use `impl Future` signatures so no
//! `async-trait` boxing is needed.
//!
//! Queries use the runtime-checked `sqlx::query` form so no `DATABASE_URL` is
//! needed at compile time. `sqlx::migrate!` embeds `./migrations` relative to
//! the crate root.

pub mod job;

pub use job::{JobRecord, JobStore};

use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the database at `url` and run pending migrations.
    ///
    /// `sqlite::memory:` keeps everything in one pooled connection that never
    /// idles out, since closing it would drop the database.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(8)
                .connect_with(options)
                .await?
        };

        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(in_memory, "job store migrated");
        Ok(Self { pool })
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
