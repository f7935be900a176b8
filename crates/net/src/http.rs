//! reqwest-backed payload fetcher

use crate::config::{backoff_delay, FetchConfig};
use crate::{FetchEvent, HttpFetcher};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use otad_errors::{Error, NetworkError, Result};
use reqwest::header::RANGE;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Production [`HttpFetcher`] streaming one payload over HTTP(S).
///
/// Mid-transfer network errors and stalls are retried transparently with a
/// `Range` request continuing at the last delivered offset, so the consumer
/// sees each payload byte exactly once, preceded by a
/// [`FetchEvent::SeekToOffset`] when the connection was re-established
/// mid-payload.
pub struct HttpTransferFetcher {
    config: FetchConfig,
    client: Option<Client>,
    state: State,
}

enum State {
    Idle,
    Starting {
        url: String,
    },
    Reconnecting {
        url: String,
        offset: u64,
        attempt: u32,
    },
    Streaming {
        url: String,
        stream: BoxStream<'static, reqwest::Result<Bytes>>,
        offset: u64,
        attempt: u32,
    },
    Terminating,
    Done,
}

enum Pulled {
    Item(Option<reqwest::Result<Bytes>>),
    Stalled,
}

impl HttpTransferFetcher {
    /// Create a fetcher with the given tuning.
    #[must_use]
    pub fn new(config: FetchConfig) -> Self {
        Self {
            config,
            client: None,
            state: State::Idle,
        }
    }

    /// Create a fetcher with default tuning.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(FetchConfig::default())
    }

    fn client(&mut self) -> Result<Client> {
        if let Some(client) = &self.client {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .user_agent(&self.config.user_agent)
            .build()
            .map_err(|e| NetworkError::ConnectionRefused(e.to_string()))?;
        self.client = Some(client.clone());
        Ok(client)
    }

    /// Issue a GET positioned at `offset` and return its body stream.
    async fn open_stream(
        &mut self,
        url: &str,
        offset: u64,
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>> {
        validate_url(url)?;
        let client = self.client()?;

        let mut request = client.get(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_request_error(&e, url))?;
        validate_response(&response, offset > 0)?;

        Ok(response.bytes_stream().boxed())
    }

    /// Pull the next body chunk, converting silence into a stall.
    async fn pull(
        config: &FetchConfig,
        stream: &mut BoxStream<'static, reqwest::Result<Bytes>>,
    ) -> Pulled {
        match config.low_speed_timeout {
            Some(window) => match tokio::time::timeout(window, stream.next()).await {
                Ok(item) => Pulled::Item(item),
                Err(_) => Pulled::Stalled,
            },
            None => Pulled::Item(stream.next().await),
        }
    }
}

#[async_trait]
impl HttpFetcher for HttpTransferFetcher {
    fn set_low_speed_limit(&mut self, _bps: u32, seconds: u32) {
        // Any nonzero rate over the window counts as progress; what the
        // limit really polices is a connection that has gone silent.
        self.config.low_speed_timeout = Some(Duration::from_secs(u64::from(seconds)));
    }

    fn set_max_retry_count(&mut self, count: u32) {
        self.config.max_retries = count;
    }

    fn set_connect_timeout(&mut self, seconds: u32) {
        self.config.connect_timeout = Duration::from_secs(u64::from(seconds));
        // Rebuilt with the new timeout on next use.
        self.client = None;
    }

    fn begin_transfer(&mut self, url: &str) {
        self.state = State::Starting {
            url: url.to_string(),
        };
    }

    fn terminate_transfer(&mut self) {
        self.state = State::Terminating;
    }

    async fn next_event(&mut self) -> Option<FetchEvent> {
        loop {
            match std::mem::replace(&mut self.state, State::Done) {
                State::Idle | State::Done => return None,
                State::Terminating => return Some(FetchEvent::TransferTerminated),
                State::Starting { url } => {
                    self.state = State::Reconnecting {
                        url,
                        offset: 0,
                        attempt: 0,
                    };
                }
                State::Reconnecting {
                    url,
                    offset,
                    attempt,
                } => match self.open_stream(&url, offset).await {
                    Ok(stream) => {
                        self.state = State::Streaming {
                            url,
                            stream,
                            offset,
                            attempt,
                        };
                        if offset > 0 {
                            return Some(FetchEvent::SeekToOffset(offset));
                        }
                    }
                    Err(err) => {
                        let attempt = attempt + 1;
                        if attempt > self.config.max_retries || !is_retryable(&err) {
                            return Some(FetchEvent::TransferComplete { successful: false });
                        }
                        tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                        self.state = State::Reconnecting {
                            url,
                            offset,
                            attempt,
                        };
                    }
                },
                State::Streaming {
                    url,
                    mut stream,
                    offset,
                    attempt,
                } => match Self::pull(&self.config, &mut stream).await {
                    Pulled::Item(Some(Ok(bytes))) => {
                        self.state = State::Streaming {
                            url,
                            stream,
                            offset: offset + bytes.len() as u64,
                            attempt,
                        };
                        return Some(FetchEvent::Bytes(bytes));
                    }
                    Pulled::Item(None) => {
                        return Some(FetchEvent::TransferComplete { successful: true });
                    }
                    Pulled::Item(Some(Err(_))) | Pulled::Stalled => {
                        drop(stream);
                        let attempt = attempt + 1;
                        if attempt > self.config.max_retries {
                            return Some(FetchEvent::TransferComplete { successful: false });
                        }
                        tokio::time::sleep(backoff_delay(&self.config, attempt)).await;
                        self.state = State::Reconnecting {
                            url,
                            offset,
                            attempt,
                        };
                    }
                },
            }
        }
    }
}

/// Check the URL is something this fetcher can stream.
fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| NetworkError::InvalidUrl(e.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(NetworkError::UnsupportedProtocol {
            protocol: scheme.to_string(),
        }
        .into()),
    }
}

/// Check the response status matches what we asked for.
fn validate_response(response: &reqwest::Response, is_resume: bool) -> Result<()> {
    let status = response.status();

    if is_resume {
        if status != StatusCode::PARTIAL_CONTENT {
            return Err(NetworkError::PartialContentNotSupported.into());
        }
    } else if !status.is_success() {
        return Err(NetworkError::HttpError {
            status: status.as_u16(),
            message: status.to_string(),
        }
        .into());
    }

    Ok(())
}

fn map_request_error(err: &reqwest::Error, url: &str) -> Error {
    if err.is_timeout() {
        NetworkError::Timeout {
            url: url.to_string(),
        }
        .into()
    } else if err.is_connect() {
        NetworkError::ConnectionRefused(err.to_string()).into()
    } else {
        NetworkError::DownloadFailed(err.to_string()).into()
    }
}

/// Whether retrying the same request could plausibly succeed.
fn is_retryable(err: &Error) -> bool {
    match err {
        Error::Network(net) => match net {
            NetworkError::InvalidUrl(_)
            | NetworkError::UnsupportedProtocol { .. }
            | NetworkError::PartialContentNotSupported => false,
            NetworkError::HttpError { status, .. } => *status >= 500,
            _ => true,
        },
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn idle_fetcher_yields_nothing() {
        let mut fetcher = HttpTransferFetcher::with_defaults();
        assert!(fetcher.next_event().await.is_none());
    }

    #[tokio::test]
    async fn terminate_yields_terminated_then_none() {
        let mut fetcher = HttpTransferFetcher::with_defaults();
        fetcher.begin_transfer("https://updates.example/payload");
        fetcher.terminate_transfer();

        assert!(matches!(
            fetcher.next_event().await,
            Some(FetchEvent::TransferTerminated)
        ));
        assert!(fetcher.next_event().await.is_none());
    }

    #[tokio::test]
    async fn unsupported_scheme_fails_without_retrying() {
        let mut fetcher = HttpTransferFetcher::with_defaults();
        fetcher.begin_transfer("ftp://updates.example/payload");

        assert!(matches!(
            fetcher.next_event().await,
            Some(FetchEvent::TransferComplete { successful: false })
        ));
        assert!(fetcher.next_event().await.is_none());
    }

    #[test]
    fn url_validation() {
        assert!(validate_url("https://u.example/p").is_ok());
        assert!(validate_url("http://127.0.0.1:1234/p").is_ok());
        assert!(validate_url("file:///var/payload").is_err());
        assert!(validate_url("not a url").is_err());
    }

    #[test]
    fn retryability() {
        assert!(is_retryable(
            &NetworkError::DownloadFailed("reset".into()).into()
        ));
        assert!(is_retryable(
            &NetworkError::HttpError {
                status: 503,
                message: "unavailable".into()
            }
            .into()
        ));
        assert!(!is_retryable(
            &NetworkError::HttpError {
                status: 404,
                message: "not found".into()
            }
            .into()
        ));
        assert!(!is_retryable(&NetworkError::PartialContentNotSupported.into()));
    }
}
