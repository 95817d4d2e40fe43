use crate::sse::SseDecoder;
use crate::{
    bounded, CallOptions, CloseHandler, Endpoint, MessageHandler, Method, Params, StreamEnd,
    StreamHandle, Transport, TransportError,
};
use bytes::Bytes;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{Client, RequestBuilder, Url};
use serde_json::Value;
use std::ops::ControlFlow;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub base_url: String,
    pub connect_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(cfg: HttpConfig) -> Result<Self, TransportError> {
        let base = Url::parse(&cfg.base_url).map_err(|e| {
            TransportError::RequestFailed(format!("invalid base url {}: {}", cfg.base_url, e))
        })?;
        if base.cannot_be_a_base() {
            return Err(TransportError::RequestFailed(format!(
                "base url {} cannot carry a path",
                cfg.base_url
            )));
        }
        let mut builder = Client::builder();
        if let Some(t) = cfg.connect_timeout {
            builder = builder.connect_timeout(t);
        }
        let client = builder.build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn url_for(&self, endpoint: &Endpoint) -> Result<Url, TransportError> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                TransportError::RequestFailed(format!("base url {} cannot carry a path", self.base))
            })?;
            segments.pop_if_empty();
            for segment in endpoint.segments() {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    fn builder(
        &self,
        endpoint: &Endpoint,
        method: Method,
        params: &Params,
    ) -> Result<RequestBuilder, TransportError> {
        let url = self.url_for(endpoint)?;
        let builder = match method {
            Method::Read => self.client.get(url),
            Method::Submit => self.client.post(url),
        };
        Ok(builder.query(params.pairs()))
    }
}

fn decode_body(body: &[u8]) -> Result<Value, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(|e| TransportError::Decode(e.to_string()))
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn request(
        &self,
        endpoint: &Endpoint,
        method: Method,
        params: &Params,
        options: &CallOptions,
    ) -> Result<Value, TransportError> {
        let builder = self.builder(endpoint, method, params)?;
        debug!(%endpoint, ?method, "request");

        bounded(options, send_json(builder)).await
    }

    async fn request_unit(
        &self,
        endpoint: &Endpoint,
        method: Method,
        params: &Params,
        options: &CallOptions,
    ) -> Result<(), TransportError> {
        let builder = self.builder(endpoint, method, params)?;
        debug!(%endpoint, ?method, "request, status only");
        bounded(options, send_checked(builder)).await
    }

    fn open_stream(
        &self,
        endpoint: &Endpoint,
        params: &Params,
        options: &CallOptions,
        on_message: MessageHandler,
        on_close: CloseHandler,
    ) -> StreamHandle {
        let request = self.url_for(endpoint).map(|url| {
            self.client
                .get(url)
                .query(params.pairs())
                .header(ACCEPT, "text/event-stream")
        });
        let connect_timeout = options.timeout;
        let label = endpoint.to_string();
        debug!(endpoint = %label, "opening stream");

        let pump = async move {
            match request {
                Ok(request) => pump_events(request, connect_timeout, on_message).await,
                Err(e) => StreamEnd::Failed(e),
            }
        };
        let on_close: CloseHandler = Box::new(move |end| {
            match &end {
                StreamEnd::Failed(e) => warn!(endpoint = %label, error = %e, "stream failed"),
                other => debug!(endpoint = %label, end = ?other, "stream stopped"),
            }
            on_close(end)
        });
        StreamHandle::spawn(pump, options.cancel.clone(), on_close)
    }
}

async fn send_checked(builder: RequestBuilder) -> Result<(), TransportError> {
    let status = builder.send().await?.status();
    if !status.is_success() {
        return Err(TransportError::http(status.as_u16()));
    }
    Ok(())
}

async fn send_json(builder: RequestBuilder) -> Result<Value, TransportError> {
    let resp = builder.send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(TransportError::http(status.as_u16()));
    }
    let body = resp.bytes().await?;
    decode_body(&body)
}

/// Connects, then feeds every decoded event to `on_message` until the body
/// ends, the handler stops, or something fails. Only the connect phase is
/// bounded by `connect_timeout`.
async fn pump_events(
    request: RequestBuilder,
    connect_timeout: Option<Duration>,
    mut on_message: MessageHandler,
) -> StreamEnd {
    let connect = CallOptions {
        timeout: connect_timeout,
        cancel: None,
    };
    let send = async { request.send().await.map_err(TransportError::from) };
    let resp = match bounded(&connect, send).await {
        Ok(resp) => resp,
        Err(e) => return StreamEnd::Failed(e),
    };
    if !resp.status().is_success() {
        return StreamEnd::Failed(TransportError::http(resp.status().as_u16()));
    }

    let mut body = resp.bytes_stream();
    let mut decoder = SseDecoder::new();
    while let Some(chunk) = body.next().await {
        let chunk: Bytes = match chunk {
            Ok(c) => c,
            Err(e) => return StreamEnd::Failed(e.into()),
        };
        for data in decoder.feed(&chunk) {
            let value: Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(e) => return StreamEnd::Failed(TransportError::Decode(e.to_string())),
            };
            match on_message(value) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => return StreamEnd::Stopped,
                Err(e) => return StreamEnd::Failed(e),
            }
        }
    }
    StreamEnd::Ended
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(base: &str) -> HttpTransport {
        HttpTransport::new(HttpConfig {
            base_url: base.into(),
            connect_timeout: None,
        })
        .unwrap()
    }

    #[test]
    fn urls_encode_each_segment() {
        let t = transport("http://localhost:3000/api/");
        let url = t
            .url_for(&Endpoint::new("deleted").segment("a b/c").segment("restore"))
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:3000/api/deleted/a%20b%2Fc/restore");
    }

    #[test]
    fn rejects_bad_base_url() {
        let err = HttpTransport::new(HttpConfig {
            base_url: "mailto:someone@example.com".into(),
            connect_timeout: None,
        })
        .unwrap_err();
        assert!(matches!(err, TransportError::RequestFailed(_)));
    }

    #[test]
    fn empty_body_is_null() {
        assert_eq!(decode_body(b"").unwrap(), Value::Null);
        assert_eq!(decode_body(b" \n").unwrap(), Value::Null);
        assert!(matches!(decode_body(b"{oops"), Err(TransportError::Decode(_))));
    }
}
