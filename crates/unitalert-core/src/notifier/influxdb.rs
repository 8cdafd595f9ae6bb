//! InfluxDB notifier
//!
//! Writes one line-protocol point per unit, either to the HTTP `/write`
//! endpoint or straight to a Unix socket listener.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use url::Url;

use crate::error::{Error, Result};
use crate::models::UnitStatus;

use super::{NotificationError, Notifier};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// InfluxDB notifier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    /// `http(s)://host:port` or `unix:///path/to/socket`
    pub address: String,
    /// Target database
    pub database: String,
    /// Timestamp precision: ns, us, ms or s
    pub precision: String,
    /// Measurement name
    pub metric: String,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:8086".to_string(),
            database: "influxdb".to_string(),
            precision: "ns".to_string(),
            metric: "systemd-unit-failures".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precision {
    Nanoseconds,
    Microseconds,
    Milliseconds,
    Seconds,
}

impl Precision {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "ns" | "n" => Ok(Self::Nanoseconds),
            "us" | "u" => Ok(Self::Microseconds),
            "ms" => Ok(Self::Milliseconds),
            "s" => Ok(Self::Seconds),
            other => Err(Error::validation(format!("unsupported influxdb precision {other:?}"))),
        }
    }

    fn timestamp(self, at: DateTime<Utc>) -> i64 {
        match self {
            Self::Nanoseconds => at.timestamp_nanos_opt().unwrap_or_else(|| at.timestamp_micros() * 1000),
            Self::Microseconds => at.timestamp_micros(),
            Self::Milliseconds => at.timestamp_millis(),
            Self::Seconds => at.timestamp(),
        }
    }
}

#[derive(Debug, Clone)]
enum Target {
    Http(Url),
    Unix(PathBuf),
}

/// Records alert-worthy transitions as InfluxDB points
pub struct InfluxNotifier {
    config: InfluxConfig,
    precision: Precision,
    target: Target,
    client: Client,
}

impl InfluxNotifier {
    /// Create a new InfluxDB notifier
    pub fn new(config: InfluxConfig) -> Result<Self> {
        let precision = Precision::parse(&config.precision)?;

        let target = if let Some(socket) = config.address.strip_prefix("unix://") {
            Target::Unix(PathBuf::from(socket))
        } else {
            let mut url = Url::parse(&config.address)
                .map_err(|e| Error::config(format!("invalid influxdb address {:?}: {}", config.address, e)))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::config(format!(
                    "unsupported influxdb address scheme {:?}",
                    url.scheme()
                )));
            }
            url.path_segments_mut()
                .map_err(|_| Error::config("influxdb address cannot be a base URL"))?
                .pop_if_empty()
                .push("write");
            url.query_pairs_mut()
                .append_pair("db", &config.database)
                .append_pair("precision", &config.precision);
            Target::Http(url)
        };

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            config,
            precision,
            target,
            client,
        })
    }

    /// Render a batch as newline-terminated line protocol
    fn lines(&self, units: &[UnitStatus], at: DateTime<Utc>) -> String {
        let timestamp = self.precision.timestamp(at);
        let measurement = escape_measurement(&self.config.metric);

        units
            .iter()
            .map(|unit| {
                format!(
                    "{} unit=\"{}\",active_state=\"{}\",sub_state=\"{}\" {}\n",
                    measurement,
                    escape_field(&unit.name),
                    escape_field(&unit.active_state),
                    escape_field(&unit.sub_state),
                    timestamp
                )
            })
            .collect()
    }

    async fn write(&self, body: String) -> std::result::Result<(), NotificationError> {
        match &self.target {
            Target::Http(url) => {
                let response = self
                    .client
                    .post(url.clone())
                    .body(body)
                    .send()
                    .await
                    .map_err(|e| NotificationError::HttpError(e.to_string()))?;

                if !response.status().is_success() {
                    let status = response.status();
                    let text = response.text().await.unwrap_or_default();
                    return Err(NotificationError::HttpError(format!(
                        "InfluxDB returned {}: {}",
                        status, text
                    )));
                }
                Ok(())
            }
            Target::Unix(path) => write_unix(path, body.as_bytes()).await,
        }
    }
}

#[cfg(unix)]
async fn write_unix(path: &std::path::Path, body: &[u8]) -> std::result::Result<(), NotificationError> {
    use tokio::io::AsyncWriteExt;

    let mut stream = tokio::net::UnixStream::connect(path).await?;
    stream.write_all(body).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(not(unix))]
async fn write_unix(_path: &std::path::Path, _body: &[u8]) -> std::result::Result<(), NotificationError> {
    Err(NotificationError::ConfigError(
        "unix sockets are not supported on this platform".to_string(),
    ))
}

#[async_trait]
impl Notifier for InfluxNotifier {
    fn name(&self) -> &str {
        "influxdb"
    }

    async fn alert(&self, units: &[UnitStatus]) {
        if units.is_empty() {
            return;
        }

        let body = self.lines(units, Utc::now());
        match self.write(body).await {
            Ok(()) => debug!(address = %self.config.address, points = units.len(), "Wrote InfluxDB points"),
            Err(e) => error!(address = %self.config.address, error = %e, "Failed to write InfluxDB points"),
        }
    }
}

fn escape_measurement(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_field(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
