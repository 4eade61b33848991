use crate::core::parser::HostsParser;
use crate::domain::model::{BlocklistSource, FetchSettings};
use crate::domain::ports::SourceFetcher;
use crate::utils::error::{IntelError, Result};
use reqwest::Client;
use tokio_util::sync::CancellationToken;

/// Streams block lists over HTTP(S) with bounded connect and read timeouts.
pub struct HttpFetcher {
    client: Client,
    max_source_bytes: usize,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .user_agent(settings.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            max_source_bytes: settings.max_source_bytes,
        })
    }
}

impl SourceFetcher for HttpFetcher {
    async fn fetch(
        &self,
        source: &BlocklistSource,
        parser: &mut HostsParser,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        tracing::debug!("Requesting {} from {}", source.name, source.url);

        // The response owns the connection; every early return drops it.
        let mut response = tokio::select! {
            _ = cancel.cancelled() => return Err(IntelError::Cancelled),
            response = self.client.get(&source.url).send() => response?,
        };

        let status = response.status();
        tracing::debug!("{} responded with {}", source.name, status);
        if !status.is_success() {
            return Err(IntelError::HttpStatusError {
                source_name: source.name.clone(),
                status: status.as_u16(),
            });
        }

        if let Some(length) = response.content_length() {
            if length > self.max_source_bytes as u64 {
                return Err(IntelError::PayloadTooLarge {
                    source_name: source.name.clone(),
                    limit: self.max_source_bytes,
                });
            }
        }

        let mut received: u64 = 0;
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(IntelError::Cancelled),
                chunk = response.chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };

            received += chunk.len() as u64;
            if received > self.max_source_bytes as u64 {
                return Err(IntelError::PayloadTooLarge {
                    source_name: source.name.clone(),
                    limit: self.max_source_bytes,
                });
            }
            parser.push_chunk(&chunk);
        }

        Ok(received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Category;
    use httpmock::prelude::*;

    fn source(url: String) -> BlocklistSource {
        BlocklistSource {
            name: "test-list".to_string(),
            url,
            category: Category::Tracker,
            severity: 1,
        }
    }

    #[tokio::test]
    async fn test_fetch_streams_body_into_parser() {
        let server = MockServer::start();
        let body = "# hosts\n0.0.0.0 ads.example.com\n0.0.0.0 Tracker.COM\n";
        let list_mock = server.mock(|when, then| {
            when.method(GET).path("/hosts");
            then.status(200)
                .header("Content-Type", "text/plain")
                .body(body);
        });

        let fetcher = HttpFetcher::new(&FetchSettings::default()).unwrap();
        let mut parser = HostsParser::new();
        let bytes = fetcher
            .fetch(&source(server.url("/hosts")), &mut parser, &CancellationToken::new())
            .await
            .unwrap();

        list_mock.assert();
        assert_eq!(bytes, body.len() as u64);
        assert_eq!(parser.finish().domains, vec!["ads.example.com", "tracker.com"]);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let server = MockServer::start();
        let list_mock = server.mock(|when, then| {
            when.method(GET).path("/missing");
            then.status(404);
        });

        let fetcher = HttpFetcher::new(&FetchSettings::default()).unwrap();
        let mut parser = HostsParser::new();
        let result = fetcher
            .fetch(&source(server.url("/missing")), &mut parser, &CancellationToken::new())
            .await;

        list_mock.assert();
        match result {
            Err(IntelError::HttpStatusError { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_body() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/big");
            then.status(200).body("0.0.0.0 a.example.com\n".repeat(100));
        });

        let settings = FetchSettings {
            max_source_bytes: 64,
            ..FetchSettings::default()
        };
        let fetcher = HttpFetcher::new(&settings).unwrap();
        let mut parser = HostsParser::new();
        let result = fetcher
            .fetch(&source(server.url("/big")), &mut parser, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(IntelError::PayloadTooLarge { limit: 64, .. })));
    }

    #[tokio::test]
    async fn test_fetch_observes_cancellation() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200)
                .delay(std::time::Duration::from_secs(5))
                .body("0.0.0.0 a.example.com\n");
        });

        let fetcher = HttpFetcher::new(&FetchSettings::default()).unwrap();
        let mut parser = HostsParser::new();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let result = fetcher
            .fetch(&source(server.url("/slow")), &mut parser, &cancel)
            .await;

        assert!(matches!(result, Err(IntelError::Cancelled)));
        assert!(started.elapsed() < std::time::Duration::from_secs(4));
    }
}
