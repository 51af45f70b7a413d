use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::StatusCode;

use crate::config::Config;
use crate::error::RequestError;
use crate::net::headers::format_http_date;
use crate::net::Network;
use crate::request::{Method, RequestRef};
use crate::response::{Headers, NetworkResponse};

/// Creates a [`reqwest::Client`] with the configured timeouts and user
/// agent. Responses are transparently decompressed.
pub fn create_client(config: &Config) -> reqwest::Client {
    reqwest::ClientBuilder::new()
        .gzip(true)
        .connect_timeout(config.connect_timeout)
        .pool_idle_timeout(Duration::from_secs(30))
        .user_agent(config.user_agent.clone())
        .build()
        .unwrap()
}

/// The reqwest-backed [`Network`] implementation.
///
/// Each attempt gets the timeout the request's retry policy currently calls
/// for. Timeouts, connection failures, and auth rejections are retried
/// through the policy; 5xx and other unexpected statuses are terminal. When
/// the request carries a cache entry, the attempt is made conditional and a
/// 304 answer is folded together with that entry.
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    pub fn new(config: &Config) -> Self {
        Self::with_client(create_client(config))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpNetwork { client }
    }

    async fn attempt(
        &self,
        request: &RequestRef,
        timeout: Duration,
    ) -> Result<NetworkResponse, RequestError> {
        let method = match request.method() {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Trace => reqwest::Method::TRACE,
            Method::Patch => reqwest::Method::PATCH,
        };

        let mut builder = self
            .client
            .request(method, request.url().clone())
            .timeout(timeout);

        for (name, value) in request.headers()? {
            builder = builder.header(name, value);
        }

        // Revalidate instead of refetching when we still hold an entry.
        if let Some(entry) = request.cache_entry() {
            if let Some(etag) = &entry.etag {
                builder = builder.header("If-None-Match", etag);
            }
            if entry.server_date > 0 {
                builder = builder.header("If-Modified-Since", format_http_date(entry.server_date));
            }
        }

        if let Some(body) = request.body()? {
            builder = builder
                .header("Content-Type", body.content_type)
                .body(body.data);
        }

        let response = builder
            .send()
            .await
            .map_err(|err| classify_reqwest_error(err, timeout))?;

        let status = response.status();
        let headers = collect_headers(response.headers());

        if status == StatusCode::NOT_MODIFIED {
            // Nothing newer on the server; answer from the entry we sent the
            // validators for, folding the 304's headers over the cached ones.
            let entry = request.cache_entry().unwrap_or_default();
            let mut merged = entry.response_headers;
            merged.extend(headers);
            return Ok(NetworkResponse {
                status: status.as_u16(),
                data: entry.data,
                headers: merged,
                not_modified: true,
            });
        }

        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(RequestError::Auth(status.to_string()));
        }
        if status.is_server_error() {
            return Err(RequestError::Server {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(RequestError::Network(format!(
                "unexpected status {status}"
            )));
        }

        let data = response
            .bytes()
            .await
            .map_err(|err| classify_reqwest_error(err, timeout))?
            .to_vec();

        Ok(NetworkResponse {
            status: status.as_u16(),
            data,
            headers,
            not_modified: false,
        })
    }
}

impl Network for HttpNetwork {
    fn perform_request<'a>(
        &'a self,
        request: &'a RequestRef,
    ) -> BoxFuture<'a, Result<NetworkResponse, RequestError>> {
        Box::pin(async move {
            loop {
                let timeout = request.retry_policy().lock().current_timeout();
                match self.attempt(request, timeout).await {
                    Ok(response) => return Ok(response),
                    Err(error) if is_retry_eligible(&error) => {
                        metric!(counter("network.retry") += 1);
                        tracing::debug!(url = %request.url(), %error, "retrying request");
                        request.retry_policy().lock().retry(error)?;
                        request.add_marker(&format!("retry [timeout={}ms]", timeout.as_millis()));
                    }
                    Err(error) => return Err(error),
                }
            }
        })
    }
}

fn is_retry_eligible(error: &RequestError) -> bool {
    matches!(
        error,
        RequestError::Timeout(_) | RequestError::NoConnection(_) | RequestError::Auth(_)
    )
}

fn classify_reqwest_error(error: reqwest::Error, timeout: Duration) -> RequestError {
    if error.is_timeout() {
        RequestError::Timeout(timeout)
    } else if error.is_connect() {
        RequestError::NoConnection(error.to_string())
    } else {
        RequestError::Network(error.to_string())
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Headers {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let value = value.to_str().ok()?;
            Some((name.as_str().to_owned(), value.to_owned()))
        })
        .collect()
}
