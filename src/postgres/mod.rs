// ABOUTME: Connection management for source and target PostgreSQL databases
// ABOUTME: Opens TLS-capable tokio-postgres clients and releases them deterministically

use anyhow::{Context, Result};
use postgres_native_tls::MakeTlsConnector;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_postgres::Client;

use crate::config::ConnectionParams;

/// Session settings applied to every connection right after it opens.
///
/// Key tuples are compared in their `::text` rendering, which follows the
/// session's TimeZone, DateStyle, and IntervalStyle. Both sessions must
/// render a timestamptz (or date/interval) key identically or every run
/// would re-report those rows as missing regardless of each server's
/// configuration defaults.
const SESSION_RENDER_SETTINGS: &str =
    "SET TIME ZONE 'UTC'; SET datestyle TO ISO, MDY; SET intervalstyle TO postgres";

/// One live PostgreSQL connection plus its background driver task.
///
/// tokio-postgres splits a connection into a `Client` and a driver future that
/// must be polled for the client to make progress. The driver is spawned onto
/// the runtime here and joined again on [`PgConnection::close`], so a finished
/// run leaves no dangling socket behind.
pub struct PgConnection {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgConnection {
    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut Client {
        &mut self.client
    }

    /// Release the connection: drop the client and wait for the driver task.
    pub async fn close(self) {
        drop(self.client);
        let _ = self.driver.await;
    }
}

/// Open a single connection to a PostgreSQL database.
///
/// No pooling and no retry: a connect failure is logged and propagated, which
/// aborts the run before any table is touched. The timeout only bounds
/// connection establishment; queries issued later block until the server
/// responds.
pub async fn connect(params: &ConnectionParams, timeout: Duration) -> Result<PgConnection> {
    tracing::debug!(
        "Connecting to database {} at {}:{}",
        params.dbname,
        params.host,
        params.port
    );

    let mut config = tokio_postgres::Config::new();
    config
        .user(&params.user)
        .password(&params.password)
        .host(&params.host)
        .port(params.port)
        .dbname(&params.dbname)
        .ssl_mode(params.ssl_mode)
        .connect_timeout(timeout);

    let connector = native_tls::TlsConnector::new().context("Failed to build TLS connector")?;
    let tls = MakeTlsConnector::new(connector);

    let (client, connection) = config
        .connect(tls)
        .await
        .inspect_err(|e| tracing::error!("Failed to connect to {}: {}", params.dbname, e))
        .with_context(|| format!("Failed to connect to database {}", params.dbname))?;

    let dbname = params.dbname.clone();
    let driver = tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("Connection to {} terminated: {}", dbname, e);
        }
    });

    client
        .batch_execute(SESSION_RENDER_SETTINGS)
        .await
        .with_context(|| format!("Failed to pin session settings on {}", params.dbname))?;

    tracing::debug!("Connected to database {}", params.dbname);
    Ok(PgConnection { client, driver })
}

/// The pair of connections a sync run operates on.
///
/// Source is authoritative and only ever read; target receives missing rows.
/// Both connections are shared across all tables of the run and released
/// together via [`SyncSession::close`].
pub struct SyncSession {
    pub source: PgConnection,
    pub target: PgConnection,
}

impl SyncSession {
    /// Open both connections, target first to match the original bring-up
    /// order. Either failure is fatal for the run.
    pub async fn open(
        source_params: &ConnectionParams,
        target_params: &ConnectionParams,
        timeout: Duration,
    ) -> Result<Self> {
        let target = connect(target_params, timeout)
            .await
            .context("Failed to connect to target database")?;
        let source = connect(source_params, timeout)
            .await
            .context("Failed to connect to source database")?;
        Ok(Self { source, target })
    }

    /// Release both connections.
    pub async fn close(self) {
        self.source.close().await;
        self.target.close().await;
        tracing::debug!("Closed source and target connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_settings_pin_text_rendering() {
        assert!(SESSION_RENDER_SETTINGS.contains("SET TIME ZONE 'UTC'"));
        assert!(SESSION_RENDER_SETTINGS.contains("SET datestyle TO ISO, MDY"));
        assert!(SESSION_RENDER_SETTINGS.contains("SET intervalstyle TO postgres"));
    }
}
