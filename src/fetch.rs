use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
}

/// GET `url` and return the body as text. Anything but a 2xx is an error.
pub async fn fetch_text(
    url: &str,
    timeout: Duration,
    user_agent: &str,
) -> Result<String, FetchError> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(10)))
        .user_agent(user_agent)
        .build()
        .map_err(FetchError::Client)?;

    let request_error = |source| FetchError::Request {
        url: url.to_string(),
        source,
    };

    let resp = client.get(url).send().await.map_err(request_error)?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let body = resp.text().await.map_err(request_error)?;
    tracing::debug!(url, bytes = body.len(), "fetched");
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn sends_user_agent_and_returns_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sub"))
            .and(header("user-agent", "PinPoint/1.1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .mount(&server)
            .await;

        let body = fetch_text(
            &format!("{}/sub", server.uri()),
            Duration::from_secs(5),
            "PinPoint/1.1",
        )
        .await
        .unwrap();
        assert_eq!(body, "payload");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = fetch_text(&server.uri(), Duration::from_secs(5), "ua")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }));
    }
}
