use anyhow::Context;
use influxdb::{Client, ReadQuery, WriteQuery};

use crate::point::MetricPoint;
use crate::sink::{to_write_query, TimeSeriesSink};

/// Write points directly to InfluxDB over HTTP.
///
/// Each batch is sent as a single line protocol request.
#[derive(Clone)]
pub struct InfluxClientSink {
    client: Client,
    address: String,
}

impl InfluxClientSink {
    pub fn new(address: impl Into<String>, database: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            client: Client::new(address.clone(), database),
            address,
        }
    }

    /// Authenticate with a username and password, as used by InfluxDB 1.x.
    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.client = self.client.with_auth(username, password);
        self
    }

    /// Authenticate with an API token, as used by InfluxDB 2.x.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.client = self.client.with_token(token);
        self
    }

    /// Check that the server is reachable, and that the database can be queried with the
    /// configured credentials, before any data is written.
    pub async fn ping(&self) -> anyhow::Result<()> {
        let (build, version) = self.client.ping().await.with_context(|| {
            format!(
                "Connection with InfluxDB at {} could not be established",
                self.address
            )
        })?;
        log::debug!("InfluxDB at {} is {build} {version}", self.address);

        // The ping needs neither credentials nor a database. A query needs both.
        self.client
            .query(ReadQuery::new("SHOW MEASUREMENTS"))
            .await
            .context("Test query failed")
            .with_context(|| {
                format!(
                    "Connection with InfluxDB at {} could not be established",
                    self.address
                )
            })?;

        log::info!(
            "Connection with InfluxDB at {} successfully established",
            self.address
        );

        Ok(())
    }
}

impl TimeSeriesSink for InfluxClientSink {
    async fn write_batch(&self, points: &[MetricPoint]) -> anyhow::Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let queries = points.iter().map(to_write_query).collect::<Vec<WriteQuery>>();
        self.client.query(queries).await.with_context(|| {
            format!(
                "Failed to write {} points to InfluxDB at {}",
                points.len(),
                self.address
            )
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve `/ping` like InfluxDB 1.x and answer every `/query` with `status` and `body`.
    async fn fake_influx(status: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let response = if request.starts_with(b"GET /ping") {
                    "HTTP/1.1 204 No Content\r\nX-Influxdb-Build: OSS\r\nX-Influxdb-Version: 1.8.10\r\nConnection: close\r\n\r\n".to_string()
                } else {
                    format!(
                        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    )
                };
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        address
    }

    #[tokio::test]
    async fn startup_check_passes_for_readable_database() {
        let address = fake_influx(
            "200 OK",
            r#"{"results":[{"statement_id":0,"series":[{"name":"measurements","columns":["name"],"values":[["requests"]]}]}]}"#,
        )
        .await;

        InfluxClientSink::new(address, "gatling").ping().await.unwrap();
    }

    #[tokio::test]
    async fn startup_check_fails_for_missing_database() {
        let address = fake_influx(
            "200 OK",
            r#"{"results":[{"statement_id":0,"error":"database not found: gatlin"}]}"#,
        )
        .await;

        let err = InfluxClientSink::new(address, "gatlin")
            .ping()
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("Test query failed"), "{err:#}");
        assert!(format!("{err:#}").contains("database not found"), "{err:#}");
    }

    #[tokio::test]
    async fn startup_check_fails_for_rejected_credentials() {
        let address = fake_influx(
            "401 Unauthorized",
            r#"{"error":"authorization failed"}"#,
        )
        .await;

        let err = InfluxClientSink::new(address, "gatling")
            .with_auth("gatling", "wrong")
            .ping()
            .await
            .unwrap_err();

        assert!(format!("{err:#}").contains("Test query failed"), "{err:#}");
    }

    #[tokio::test]
    async fn startup_check_fails_for_unreachable_server() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let err = InfluxClientSink::new(address, "gatling")
            .ping()
            .await
            .unwrap_err();

        assert!(err.to_string().contains("could not be established"), "{err:?}");
    }
}
