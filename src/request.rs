use std::future::Future;

use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, ORIGIN, REFERER};
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::{RetryPolicy, TransportConfig};
use crate::model::{PageRequest, RawPage};
use crate::{Error, Result};

/// Anything that can hand back the raw markup of one page.
///
/// Implementations must not fail: a transport problem is reported as
/// [`RawPage::failed`] so sibling fetches of the same batch keep going.
pub trait PageSource: Send + Sync + 'static {
    fn fetch(&self, request: PageRequest) -> impl Future<Output = RawPage> + Send;
}

/// Issues APEX widget `PAGE` actions against a single report.
#[derive(Debug, Clone)]
pub struct PageFetcher {
    // Client uses Arc so we can clone cheaply
    client: Client,
    config: TransportConfig,
}

impl PageFetcher {
    pub fn new(config: TransportConfig) -> Result<Self> {
        config.validate()?;
        if config.accept_invalid_certs {
            warn!(
                endpoint = %config.endpoint,
                "TLS certificate validation is DISABLED for this endpoint"
            );
        }

        let client = Client::builder()
            .default_headers(default_headers(&config)?)
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .timeout(config.timeout)
            .build()?;

        Ok(Self { client, config })
    }

    /// The form body of one widget request.
    pub fn form(&self, request: PageRequest) -> Vec<(&'static str, String)> {
        let c = &self.config;
        vec![
            ("p_request", "APXWGT".to_string()),
            ("p_instance", c.instance.clone()),
            ("p_flow_id", c.flow_id.clone()),
            ("p_flow_step_id", c.flow_step_id.clone()),
            ("p_widget_num_return", request.page_size.to_string()),
            ("p_widget_name", "worksheet".to_string()),
            ("p_widget_mod", "ACTION".to_string()),
            ("p_widget_action", "PAGE".to_string()),
            ("p_widget_action_mod", request.action_mod()),
            ("x01", c.x01.clone()),
            ("x02", c.x02.clone()),
        ]
    }

    /// Requests a page once and returns the HTML.
    async fn request_page_html(&self, request: PageRequest) -> Result<String> {
        let res = self
            .client
            .post(&self.config.endpoint)
            .form(&self.form(request))
            .send()
            .await?
            .error_for_status()?;
        let html = res.text().await?;
        Ok(html)
    }
}

impl PageSource for PageFetcher {
    async fn fetch(&self, request: PageRequest) -> RawPage {
        let retry: RetryPolicy = self.config.retry;
        let mut attempt = 0;
        loop {
            debug!(offset = request.offset, attempt, "requesting page");
            match self.request_page_html(request).await {
                Ok(html) => return RawPage::ok(request.offset, html),
                Err(e) if attempt < retry.max_retries => {
                    attempt += 1;
                    let backoff = retry.backoff(attempt);
                    warn!(
                        offset = request.offset,
                        attempt,
                        ?backoff,
                        "Error fetching page, retrying: {e}"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => {
                    warn!(offset = request.offset, "Error fetching page: {e}");
                    return RawPage::failed(request.offset);
                }
            }
        }
    }
}

fn default_headers(config: &TransportConfig) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

    let optional = [
        (COOKIE, "Cookie", config.cookie.as_deref().unwrap_or_default()),
        (ORIGIN, "Origin", config.origin.as_str()),
        (REFERER, "Referer", config.referer.as_str()),
    ];
    for (key, name, value) in optional {
        if value.is_empty() {
            continue;
        }
        let value = HeaderValue::from_str(value).map_err(|_| Error::InvalidHeader {
            name,
            value: value.to_string(),
        })?;
        headers.insert(key, value);
    }
    Ok(headers)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    fn config() -> TransportConfig {
        let mut config = TransportConfig::new("http://127.0.0.1:9/apex/wwv_flow.show");
        config.instance = "8105332068485".into();
        config.flow_id = "104".into();
        config.flow_step_id = "3005".into();
        config.x01 = "1103022931242056".into();
        config.x02 = "1104926756242155".into();
        config.cookie = Some("SESSION=abc".into());
        config.origin = "http://127.0.0.1:9".into();
        config
    }

    #[test]
    fn form_carries_widget_protocol() {
        let fetcher = PageFetcher::new(config()).unwrap();
        let form = fetcher.form(PageRequest::new(101, 50));
        let get = |k: &str| {
            form.iter()
                .find(|(key, _)| *key == k)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("p_request"), "APXWGT");
        assert_eq!(get("p_instance"), "8105332068485");
        assert_eq!(get("p_widget_num_return"), "50");
        assert_eq!(
            get("p_widget_action_mod"),
            "pgR_min_row=101max_rows=50rows_fetched=50"
        );
        assert_eq!(get("x02"), "1104926756242155");
    }

    #[test]
    fn bad_cookie_is_a_config_error() {
        let mut config = config();
        config.cookie = Some("bad\nvalue".into());
        assert!(matches!(
            default_headers(&config),
            Err(Error::InvalidHeader { name: "Cookie", .. })
        ));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_failed_page() {
        let mut config = config();
        config.timeout = Duration::from_millis(500);
        let fetcher = PageFetcher::new(config).unwrap();

        let page = fetcher.fetch(PageRequest::new(1, 50)).await;
        assert_eq!(page, RawPage::failed(1));
    }

    /// Serves every connection with `reply`, or holds it open without
    /// answering when `reply` is `None`.
    async fn local_server(reply: Option<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                tokio::spawn(async move {
                    // The form always ends with the x02 token.
                    let mut request = Vec::new();
                    let mut buf = [0u8; 4096];
                    while !request.ends_with(b"x02=1104926756242155") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => request.extend_from_slice(&buf[..n]),
                        }
                    }
                    match reply {
                        Some(reply) => {
                            let _ = socket.write_all(reply.as_bytes()).await;
                            let _ = socket.shutdown().await;
                        }
                        None => tokio::time::sleep(Duration::from_secs(30)).await,
                    }
                });
            }
        });
        format!("http://{addr}/apex/wwv_flow.show")
    }

    fn fetcher_for(endpoint: String, timeout: Duration) -> PageFetcher {
        let mut config = config();
        config.endpoint = endpoint;
        config.timeout = timeout;
        PageFetcher::new(config).unwrap()
    }

    #[tokio::test]
    async fn success_response_is_returned_as_body() {
        let endpoint = local_server(Some(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 15\r\nConnection: close\r\n\r\n<table></table>",
        ))
        .await;
        let fetcher = fetcher_for(endpoint, Duration::from_secs(5));

        let page = fetcher.fetch(PageRequest::new(1, 50)).await;
        assert_eq!(page, RawPage::ok(1, "<table></table>"));
    }

    #[tokio::test]
    async fn server_error_status_is_a_failed_page() {
        let endpoint = local_server(Some(
            "HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        ))
        .await;
        let fetcher = fetcher_for(endpoint, Duration::from_secs(5));

        let page = fetcher.fetch(PageRequest::new(1, 50)).await;
        assert_eq!(page, RawPage::failed(1));
    }

    #[tokio::test]
    async fn hung_server_times_out_into_a_failed_page() {
        let endpoint = local_server(None).await;
        let fetcher = fetcher_for(endpoint, Duration::from_millis(300));

        let started = Instant::now();
        let page = fetcher.fetch(PageRequest::new(1, 50)).await;
        assert_eq!(page, RawPage::failed(1));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
