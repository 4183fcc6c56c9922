use std::time::Duration;

use async_trait::async_trait;
use bb8::{ManageConnection, Pool};
use bb8_tiberius::{ConnectionManager, rt};
use serde::Deserialize;
use tiberius::{AuthMethod, Config as TiberiusConfig};

use super::driver::MssqlDriverError;

/// Type alias for SQL Server client
pub type MssqlClient = rt::Client;

/// Pool handle shared by every request that runs outside a transaction.
pub type MssqlPool = Pool<MssqlConnectionManager>;

/// Rolls back whatever transaction a connection still holds before it is handed out.
///
/// Runs on every checkout in place of bb8-tiberius's `SELECT 1` liveness check.
const RESET_OPEN_TRANSACTION: &str =
    "DECLARE @open INT = @@TRANCOUNT; IF @open > 0 ROLLBACK TRANSACTION; SELECT @open";

/// `bb8_tiberius::ConnectionManager` that also resets abandoned transactions.
///
/// A [`MssqlTransaction`](super::MssqlTransaction) dropped without commit or
/// rollback, or whose rollback after a failed commit also failed, goes back to
/// the pool with the transaction still open. The checkout test rolls it back so
/// the next borrower starts clean.
pub struct MssqlConnectionManager {
    inner: ConnectionManager,
}

impl MssqlConnectionManager {
    #[must_use]
    pub fn new(config: TiberiusConfig) -> Self {
        Self {
            inner: ConnectionManager::new(config),
        }
    }
}

#[async_trait]
impl ManageConnection for MssqlConnectionManager {
    type Connection = MssqlClient;
    type Error = bb8_tiberius::Error;

    async fn connect(&self) -> Result<MssqlClient, Self::Error> {
        self.inner.connect().await
    }

    async fn is_valid(&self, conn: &mut MssqlClient) -> Result<(), Self::Error> {
        let row = conn
            .simple_query(RESET_OPEN_TRANSACTION)
            .await
            .map_err(bb8_tiberius::Error::Tiberius)?
            .into_row()
            .await
            .map_err(bb8_tiberius::Error::Tiberius)?;
        let open: Option<i32> = row.and_then(|row| row.try_get(0).ok().flatten());
        if let Some(open @ 1..) = open {
            tracing::warn!(open, "rolled back a transaction left open on a pooled connection");
        }
        Ok(())
    }

    fn has_broken(&self, conn: &mut MssqlClient) -> bool {
        self.inner.has_broken(conn)
    }
}

const DEFAULT_PORT: u16 = 1433;
const DEFAULT_MAX_POOL_SIZE: u32 = 20;

fn default_max_pool_size() -> u32 {
    DEFAULT_MAX_POOL_SIZE
}

/// Options for connecting to SQL Server.
///
/// Deserializable so it can come straight out of an application config file;
/// the password is kept out of `Debug` output.
#[derive(Clone, Deserialize)]
pub struct MssqlOptions {
    pub server: String,
    pub database: String,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub instance_name: Option<String>,
    #[serde(default)]
    pub trust_cert: bool,
    #[serde(default)]
    pub application_name: Option<String>,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: u32,
    /// How long to wait for a pooled connection, in seconds.
    #[serde(default)]
    pub connection_timeout_secs: Option<u64>,
}

impl std::fmt::Debug for MssqlOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlOptions")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("port", &self.port)
            .field("instance_name", &self.instance_name)
            .field("trust_cert", &self.trust_cert)
            .field("application_name", &self.application_name)
            .field("max_pool_size", &self.max_pool_size)
            .field("connection_timeout_secs", &self.connection_timeout_secs)
            .finish()
    }
}

impl MssqlOptions {
    #[must_use]
    pub fn new(server: String, database: String, user: String, password: String) -> Self {
        Self {
            server,
            database,
            user,
            password,
            port: None,
            instance_name: None,
            trust_cert: false,
            application_name: None,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            connection_timeout_secs: None,
        }
    }

    #[must_use]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn with_instance_name(mut self, instance_name: Option<String>) -> Self {
        self.instance_name = instance_name;
        self
    }

    #[must_use]
    pub fn with_trust_cert(mut self, trust_cert: bool) -> Self {
        self.trust_cert = trust_cert;
        self
    }

    #[must_use]
    pub fn with_max_pool_size(mut self, max_pool_size: u32) -> Self {
        self.max_pool_size = max_pool_size;
        self
    }

    #[must_use]
    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_secs.map(Duration::from_secs)
    }

    /// Check values tiberius and bb8 would otherwise reject late or panic on.
    ///
    /// # Errors
    ///
    /// Returns `MssqlDriverError::Config` for an empty server name or a zero pool size.
    pub fn validate(&self) -> Result<(), MssqlDriverError> {
        if self.server.trim().is_empty() {
            return Err(MssqlDriverError::Config("server must not be empty".into()));
        }
        if self.max_pool_size == 0 {
            return Err(MssqlDriverError::Config(
                "max_pool_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for MSSQL options.
#[derive(Debug, Clone)]
pub struct MssqlOptionsBuilder {
    opts: MssqlOptions,
}

impl MssqlOptionsBuilder {
    #[must_use]
    pub fn new(server: String, database: String, user: String, password: String) -> Self {
        Self {
            opts: MssqlOptions::new(server, database, user, password),
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.opts.port = Some(port);
        self
    }

    #[must_use]
    pub fn instance_name(mut self, instance_name: impl Into<String>) -> Self {
        self.opts.instance_name = Some(instance_name.into());
        self
    }

    #[must_use]
    pub fn trust_cert(mut self, trust_cert: bool) -> Self {
        self.opts.trust_cert = trust_cert;
        self
    }

    #[must_use]
    pub fn application_name(mut self, application_name: impl Into<String>) -> Self {
        self.opts.application_name = Some(application_name.into());
        self
    }

    #[must_use]
    pub fn max_pool_size(mut self, max_pool_size: u32) -> Self {
        self.opts.max_pool_size = max_pool_size;
        self
    }

    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.opts.connection_timeout_secs = Some(timeout.as_secs());
        self
    }

    #[must_use]
    pub fn finish(self) -> MssqlOptions {
        self.opts
    }
}

impl MssqlOptions {
    #[must_use]
    pub fn builder(
        server: impl Into<String>,
        database: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> MssqlOptionsBuilder {
        MssqlOptionsBuilder::new(server.into(), database.into(), user.into(), password.into())
    }
}

pub(crate) fn build_tiberius_config(opts: &MssqlOptions) -> TiberiusConfig {
    let mut config = TiberiusConfig::new();
    config.host(&opts.server);
    config.database(&opts.database);
    config.port(opts.port.unwrap_or(DEFAULT_PORT));
    config.authentication(AuthMethod::sql_server(&opts.user, &opts.password));
    if let Some(instance) = &opts.instance_name {
        config.instance_name(instance);
    }
    if let Some(name) = &opts.application_name {
        config.application_name(name);
    }
    if opts.trust_cert {
        config.trust_cert();
    }
    config
}

/// Build the pool and check out one connection so bad credentials fail here
/// rather than on the first query.
pub(crate) async fn build_pool(opts: &MssqlOptions) -> Result<MssqlPool, MssqlDriverError> {
    opts.validate()?;
    let manager = MssqlConnectionManager::new(build_tiberius_config(opts));

    let mut builder = Pool::builder()
        .max_size(opts.max_pool_size)
        .test_on_check_out(true);
    if let Some(timeout) = opts.connection_timeout() {
        builder = builder.connection_timeout(timeout);
    }
    let pool = builder.build(manager).await?;

    drop(pool.get().await?);
    tracing::debug!(
        server = %opts.server,
        database = %opts.database,
        max_pool_size = opts.max_pool_size,
        "SQL Server pool ready"
    );
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_everything() {
        let opts = MssqlOptions::builder("db.local", "app", "sa", "secret")
            .port(14330)
            .instance_name("SQLEXPRESS")
            .trust_cert(true)
            .application_name("billing")
            .max_pool_size(4)
            .connection_timeout(Duration::from_secs(3))
            .finish();

        assert_eq!(opts.port, Some(14330));
        assert_eq!(opts.instance_name.as_deref(), Some("SQLEXPRESS"));
        assert!(opts.trust_cert);
        assert_eq!(opts.max_pool_size, 4);
        assert_eq!(opts.connection_timeout(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn debug_redacts_password() {
        let opts = MssqlOptions::new("h".into(), "d".into(), "u".into(), "hunter2".into());
        let printed = format!("{opts:?}");
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let opts: MssqlOptions = serde_json::from_value(serde_json::json!({
            "server": "localhost",
            "database": "app",
            "user": "sa",
            "password": "pw"
        }))
        .unwrap();
        assert_eq!(opts.port, None);
        assert_eq!(opts.max_pool_size, 20);
        assert!(!opts.trust_cert);
        opts.validate().unwrap();
    }

    #[test]
    fn zero_pool_size_is_rejected() {
        let opts = MssqlOptions::new("h".into(), "d".into(), "u".into(), "p".into())
            .with_max_pool_size(0);
        assert!(matches!(opts.validate(), Err(MssqlDriverError::Config(_))));
    }
}
