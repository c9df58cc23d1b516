use bytes::Bytes;
use http_body_util::{BodyExt as _, Full};
use hyper::Request;
use hyper::body::Incoming;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::transport::{
    Transport, TransportError, TransportErrorKind, TransportRequest, TransportResponse,
};

/// [`Transport`] over a pooled hyper client (HTTP/1.1, `http://` and `https://`).
#[derive(Debug, Clone)]
pub struct HyperTransport {
    inner: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
}

impl Default for HyperTransport {
    fn default() -> Self {
        // OS-level connect timeouts can run for tens of seconds against unreachable hosts.
        Self::new(Some(Duration::from_secs(3)))
    }
}

impl HyperTransport {
    #[must_use]
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);
        http_connector.set_connect_timeout(connect_timeout);

        let https_connector = HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let inner = Client::builder(TokioExecutor::new()).build(https_connector);

        Self { inner }
    }

    async fn send(
        &self,
        req: TransportRequest,
        started: Instant,
    ) -> Result<TransportResponse, TransportError> {
        let fail = |kind, message: String| TransportError::new(kind, message, started.elapsed());

        let parsed = url::Url::parse(&req.url)
            .map_err(|e| fail(TransportErrorKind::InvalidUrl, format!("{}: {e}", req.url)))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(fail(TransportErrorKind::UnsupportedScheme, req.url));
        }

        let uri: hyper::Uri = req
            .url
            .parse()
            .map_err(|e| fail(TransportErrorKind::InvalidUrl, format!("{}: {e}", req.url)))?;

        let mut builder = Request::builder().method(req.method).uri(uri);
        if !has_header(&req.headers, "host")
            && let Some(host) = host_header_value(&parsed)
        {
            builder = builder.header(http::header::HOST, host);
        }

        for (k, v) in &req.headers {
            let name = http::header::HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| fail(TransportErrorKind::InvalidRequest, format!("{k}: {e}")))?;
            let value = http::header::HeaderValue::from_str(v)
                .map_err(|e| fail(TransportErrorKind::InvalidRequest, format!("{k}: {e}")))?;
            builder = builder.header(name, value);
        }

        let request: Request<Full<Bytes>> = builder
            .body(Full::new(req.body))
            .map_err(|e| fail(TransportErrorKind::InvalidRequest, e.to_string()))?;

        let res: hyper::Response<Incoming> =
            match tokio::time::timeout(req.timeout, self.inner.request(request)).await {
                Ok(Ok(res)) => res,
                Ok(Err(e)) => {
                    let kind = if e.is_connect() {
                        TransportErrorKind::Connect
                    } else {
                        TransportErrorKind::Request
                    };
                    return Err(fail(kind, e.to_string()));
                }
                Err(_) => {
                    return Err(fail(
                        TransportErrorKind::Timeout,
                        format!("timed out after {:?}", req.timeout),
                    ));
                }
            };

        let (parts, body) = res.into_parts();

        let mut merged: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in parts.headers.iter() {
            let key = name.as_str().to_ascii_lowercase();
            let v = String::from_utf8_lossy(value.as_bytes()).to_string();
            merged
                .entry(key)
                .and_modify(|cur| {
                    if !cur.is_empty() {
                        cur.push_str(", ");
                    }
                    cur.push_str(&v);
                })
                .or_insert(v);
        }

        let remaining = req.timeout.saturating_sub(started.elapsed());
        let body = match tokio::time::timeout(remaining, body.collect()).await {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(e)) => return Err(fail(TransportErrorKind::BodyRead, e.to_string())),
            Err(_) => {
                return Err(fail(
                    TransportErrorKind::Timeout,
                    format!("body not received within {:?}", req.timeout),
                ));
            }
        };

        Ok(TransportResponse {
            status: parts.status.as_u16(),
            headers: merged.into_iter().collect(),
            body,
            latency: started.elapsed(),
        })
    }
}

impl Transport for HyperTransport {
    async fn issue_request(
        &self,
        req: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        self.send(req, Instant::now()).await
    }
}

fn has_header(headers: &[(String, String)], name: &str) -> bool {
    headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
}

fn host_header_value(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?;
    match parsed.port() {
        Some(port) => Some(format!("{host}:{port}")),
        None => Some(host.to_string()),
    }
}
