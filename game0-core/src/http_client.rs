use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use http::header::CONTENT_TYPE;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};

use crate::config::HttpCfg;
use crate::error::{CoreResult, Game0Error};

/// Request context carries tracing IDs and idempotency key.
#[derive(Clone, Copy, Default)]
pub struct RequestCtx<'a> {
    pub request_id: Option<&'a str>,
    pub turn_id: Option<&'a str>,
    pub idempotency_key: Option<&'a str>,
}

/// Raw response body chunks as they arrive from the transport.
pub type ByteStream = Pin<Box<dyn Stream<Item = CoreResult<Bytes>> + Send>>;

/// A successful streaming response: declared content type plus the unread body.
pub struct ResponseBody {
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Thin wrapper around reqwest::Client with defaults and helpers.
#[derive(Debug, Clone)]
pub struct HttpClient {
    inner: Client,
    user_agent: String,
}

impl HttpClient {
    pub fn new_default() -> CoreResult<Self> {
        Self::from_cfg(&HttpCfg::default())
    }

    pub fn from_cfg(cfg: &HttpCfg) -> CoreResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(Duration::from_millis(cfg.connect_timeout_ms))
            .timeout(Duration::from_millis(cfg.request_timeout_ms));
        if let Some(n) = cfg.pool_max_idle_per_host {
            builder = builder.pool_max_idle_per_host(n);
        }
        let inner = builder
            .build()
            .map_err(|e| Game0Error::Other(anyhow::anyhow!("http client build failed: {e}")))?;
        Ok(Self {
            inner,
            user_agent: "game0/0.1".to_string(),
        })
    }

    fn with_ctx(
        &self,
        mut req: reqwest::RequestBuilder,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> reqwest::RequestBuilder {
        req = req.header("User-Agent", &self.user_agent);
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        if let Some(rid) = ctx.request_id {
            req = req.header("X-Request-Id", rid);
        }
        if let Some(tid) = ctx.turn_id {
            req = req.header("X-Turn-Id", tid);
        }
        if let Some(ik) = ctx.idempotency_key {
            req = req.header("Idempotency-Key", ik);
        }
        req
    }

    /// POST JSON and hand back the body unread, so the caller can consume it incrementally.
    pub async fn post_stream<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<ResponseBody> {
        let req = self.with_ctx(
            self.inner
                .post(url)
                .json(body)
                .header("Accept", "text/event-stream, text/plain"),
            headers,
            ctx,
        );

        let resp = req.send().await.map_err(|e| {
            tracing::warn!(endpoint = url, error = %e, "request failed");
            Game0Error::EndpointUnavailable {
                endpoint: url.to_string(),
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, &body));
        }
        if resp.content_length() == Some(0) {
            return Err(Game0Error::MissingBody {
                endpoint: url.to_string(),
            });
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let endpoint = url.to_string();
        let body = resp.bytes_stream().map(move |chunk| {
            chunk.map_err(|e| {
                tracing::warn!(endpoint = %endpoint, error = %e, "body read failed");
                Game0Error::EndpointUnavailable {
                    endpoint: endpoint.clone(),
                }
            })
        });
        Ok(ResponseBody {
            content_type,
            body: Box::pin(body),
        })
    }

    pub async fn get_json<R: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        ctx: &RequestCtx<'_>,
    ) -> CoreResult<R> {
        let req = self.with_ctx(self.inner.get(url), headers, ctx);
        let resp = req
            .send()
            .await
            .map_err(|_e| Game0Error::EndpointUnavailable { endpoint: url.to_string() })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(map_http_error(url, status, &text));
        }

        resp.json::<R>().await.map_err(|e| Game0Error::EndpointStatus {
            endpoint: url.to_string(),
            code: status.as_u16().to_string(),
            message: format!("json decode error: {e}"),
        })
    }
}

fn map_http_error(endpoint: &str, status: StatusCode, body: &str) -> Game0Error {
    if status.is_server_error() {
        return Game0Error::EndpointUnavailable {
            endpoint: endpoint.to_string(),
        };
    }
    Game0Error::EndpointStatus {
        endpoint: endpoint.to_string(),
        code: status.as_u16().to_string(),
        message: truncate(body, 300),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() > max {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        let mut t = s[..cut].to_string();
        t.push_str("...");
        t
    } else {
        s.to_string()
    }
}
