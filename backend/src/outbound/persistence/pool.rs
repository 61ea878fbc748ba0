//! Async connection pool for Diesel PostgreSQL connections.
//!
//! Wraps `diesel-async` and `bb8`. Startup uses [`DbPool::connect`], which
//! retries a fixed number of times with a fixed delay so the service can come
//! up before the database does.

use std::time::Duration;

use diesel_async::AsyncPgConnection;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use tracing::{info, warn};

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Failed to check out a connection from the pool.
    #[error("failed to get connection from pool: {message}")]
    Checkout { message: String },

    /// Failed to build the connection pool.
    #[error("failed to build connection pool: {message}")]
    Build { message: String },
}

impl PoolError {
    /// Create a checkout error with the given message.
    pub fn checkout(message: impl Into<String>) -> Self {
        Self::Checkout {
            message: message.into(),
        }
    }

    /// Create a build error with the given message.
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build {
            message: message.into(),
        }
    }
}

/// Configuration for the database connection pool.
///
/// ```
/// use std::time::Duration;
/// use webhook_batcher::outbound::persistence::PoolConfig;
///
/// let config = PoolConfig::new("postgres://localhost/webhooks")
///     .with_max_size(20)
///     .with_connect_retries(5, Duration::from_secs(1));
/// assert_eq!(config.max_size(), 20);
/// assert_eq!(config.connect_attempts(), 5);
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfig {
    database_url: String,
    max_size: u32,
    min_idle: Option<u32>,
    connection_timeout: Duration,
    connect_attempts: u32,
    connect_delay: Duration,
}

impl PoolConfig {
    /// Configuration with defaults: 10 connections, 2 idle, 30 s checkout
    /// timeout, 10 startup attempts 2 s apart.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_size: 10,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(30),
            connect_attempts: 10,
            connect_delay: Duration::from_secs(2),
        }
    }

    /// Set the maximum number of connections in the pool.
    pub fn with_max_size(mut self, max_size: u32) -> Self {
        self.max_size = max_size;
        self
    }

    /// Set the minimum number of idle connections to maintain.
    pub fn with_min_idle(mut self, min_idle: Option<u32>) -> Self {
        self.min_idle = min_idle;
        self
    }

    /// Set the connection checkout timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set how often and how far apart startup connection attempts are made.
    pub fn with_connect_retries(mut self, attempts: u32, delay: Duration) -> Self {
        self.connect_attempts = attempts.max(1);
        self.connect_delay = delay;
        self
    }

    /// Database URL.
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Maximum pool size.
    pub fn max_size(&self) -> u32 {
        self.max_size
    }

    /// Startup connection attempts.
    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts
    }
}

/// Async connection pool for PostgreSQL via Diesel.
#[derive(Clone)]
pub struct DbPool {
    inner: Pool<AsyncPgConnection>,
}

impl DbPool {
    /// Build the pool and verify one connection.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Build` if the pool cannot be constructed or the
    /// first connection fails.
    pub async fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);

        let pool = Pool::builder()
            .max_size(config.max_size)
            .min_idle(config.min_idle)
            .connection_timeout(config.connection_timeout)
            .build(manager)
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;

        let pool = Self { inner: pool };
        pool.get()
            .await
            .map_err(|err| PoolError::build(err.to_string()))?;
        Ok(pool)
    }

    /// Build the pool, retrying up to the configured number of attempts.
    ///
    /// # Errors
    ///
    /// Returns the last `PoolError` once every attempt failed.
    pub async fn connect(config: PoolConfig) -> Result<Self, PoolError> {
        let attempts = config.connect_attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::new(config.clone()).await {
                Ok(pool) => {
                    info!(attempt, "database connected");
                    return Ok(pool);
                }
                Err(err) if attempt < attempts => {
                    warn!(
                        attempt,
                        attempts,
                        delay = ?config.connect_delay,
                        error = %err,
                        "database connection failed; retrying"
                    );
                    tokio::time::sleep(config.connect_delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Get a connection from the pool.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Checkout` if a connection cannot be obtained within
    /// the configured timeout.
    pub async fn get(&self) -> Result<PooledConnection<'_, AsyncPgConnection>, PoolError> {
        self.inner
            .get()
            .await
            .map_err(|err| PoolError::checkout(err.to_string()))
    }
}
