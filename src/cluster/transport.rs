//! Store transport
//!
//! A [`Transport`] sends one statement to one host and returns the raw
//! TabSeparated body. The HTTP implementation talks to the store's HTTP
//! interface with `reqwest`; connection reuse is handled by its pool.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use crate::cluster::error::{ExecError, ExecResult};
use crate::index::sql::Statement;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute a statement on `host` within `timeout`
    async fn execute(&self, host: &str, statement: &Statement, timeout: Duration)
        -> ExecResult<String>;
}

/// HTTP transport for the store's HTTP interface
pub struct HttpTransport {
    client: Client,
    user: Option<String>,
    password: Option<String>,
}

impl HttpTransport {
    pub fn new(user: Option<String>, password: Option<String>) -> ExecResult<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ExecError::host("*", format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            user,
            password,
        })
    }

    fn base_url(host: &str) -> String {
        if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        host: &str,
        statement: &Statement,
        timeout: Duration,
    ) -> ExecResult<String> {
        let base = Self::base_url(host);
        let request = match statement.body() {
            Some(body) => self
                .client
                .post(format!(
                    "{}/?query={}",
                    base,
                    urlencoding::encode(&statement.sql())
                ))
                .body(body),
            None => self.client.post(format!("{}/", base)).body(statement.sql()),
        };

        let request = match &self.user {
            Some(user) => request.basic_auth(user, self.password.as_ref()),
            None => request,
        };

        let response = request.timeout(timeout).send().await.map_err(|e| {
            if e.is_timeout() {
                ExecError::Timeout {
                    host: host.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else if e.is_connect() {
                ExecError::host(host, format!("connect: {}", e))
            } else {
                ExecError::host(host, e.to_string())
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ExecError::Timeout {
                    host: host.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }
            } else {
                ExecError::host(host, format!("reading body: {}", e))
            }
        })?;

        if status.is_success() {
            Ok(text)
        } else {
            let message: String = text.chars().take(512).collect();
            Err(ExecError::host(
                host,
                format!("HTTP {}: {}", status.as_u16(), message.trim()),
            ))
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(HttpTransport::base_url("ch1:8123"), "http://ch1:8123");
        assert_eq!(
            HttpTransport::base_url("https://ch1:8443/"),
            "https://ch1:8443"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_host_error() {
        let transport = HttpTransport::new(None, None).unwrap();
        let stmt = Statement::Select(crate::index::sql::Select::new(
            "t",
            vec![crate::index::sql::Projection::column("Path")],
        ));
        let err = transport
            .execute("127.0.0.1:1", &stmt, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
