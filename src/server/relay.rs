use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::providers;
use crate::server::AppState;
use crate::server::model_map;
use crate::server::request_logging::{extract_usage, write_log};
use crate::server::util::openai_error;
use crate::store::Store;
use crate::store::types::{ApiKey, Channel, Proxy, RequestLog, Token, new_id, now_ms};

pub struct Selected {
    pub channel: Channel,
    pub key: ApiKey,
}

/// 渠道选择：模型解析出的类型 ∩ enabled ∩ 令牌白名单，
/// 按插入顺序取第一个能给出密钥的渠道
pub async fn select_channel_and_key(
    state: &AppState,
    model: &str,
    token: &Token,
) -> crate::error::Result<Option<Selected>> {
    for channel in state.store.list_channels().await? {
        if !channel.enabled || !model_map::supports(model, channel.channel_type) {
            continue;
        }
        if !token.allowed_channels.is_empty() && !token.allowed_channels.contains(&channel.id) {
            continue;
        }
        let keys = state.store.active_keys_for(&channel.id).await?;
        if let Some(key) =
            state
                .balancer
                .select(&keys, channel.load_balance_strategy, &channel.id)
        {
            return Ok(Some(Selected { channel, key }));
        }
    }
    Ok(None)
}

fn upstream_url(channel: &Channel, key: &ApiKey, model: &str, path: &str) -> String {
    let url = if path == "/v1/chat/completions" {
        providers::chat_endpoint(channel.channel_type, &channel.base_url, model)
    } else {
        providers::passthrough_endpoint(&channel.base_url, path)
    };
    providers::append_url_auth(channel.channel_type, url, &key.key)
}

async fn resolve_proxy(state: &AppState, channel: &Channel) -> Option<Proxy> {
    match &channel.proxy_id {
        Some(proxy_id) => state.store.get_proxy(proxy_id).await.ok().flatten(),
        None => None,
    }
}

/// 端到端中继：构造上游请求、转发原始字节、记账并落一条日志。
/// 客户端 JSON 体逐字节转发，模型名不改写。
pub async fn relay_request(
    state: Arc<AppState>,
    token: &Token,
    model: String,
    path: &str,
    body: Bytes,
    streaming: bool,
) -> Response {
    let selected = match select_channel_and_key(&state, &model, token).await {
        Ok(Some(selected)) => selected,
        Ok(None) => {
            return openai_error(
                StatusCode::SERVICE_UNAVAILABLE,
                "No available API keys for this model",
                "server_error",
            );
        }
        Err(e) => {
            tracing::error!("Channel selection failed: {}", e);
            return openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "channel selection failed",
                "server_error",
            );
        }
    };
    let Selected { channel, key } = selected;

    let url = upstream_url(&channel, &key, &model, path);
    let proxy = resolve_proxy(&state, &channel).await;
    let client = match state.dialer.client(proxy.as_ref()) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(channel = %channel.name, "Failed to build upstream client: {}", e);
            return openai_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &e.to_string(),
                "server_error",
            );
        }
    };

    let builder = client
        .post(url)
        .header(header::CONTENT_TYPE, "application/json")
        .body(body);
    let builder = providers::authorize(channel.channel_type, builder, &key.key);

    let timestamp = now_ms();
    let started = Instant::now();
    let log = RequestLog {
        id: new_id(),
        timestamp,
        token_id: Some(token.id.clone()),
        channel_id: channel.id.clone(),
        key_id: key.id.clone(),
        model: model.clone(),
        path: path.to_string(),
        method: "POST".to_string(),
        status: 0,
        latency: 0,
        input_tokens: None,
        output_tokens: None,
        error: None,
        streaming,
    };

    let upstream = match builder.send().await {
        Ok(response) => response,
        Err(e) => {
            // 传输层失败：仅递增 errorCount，状态留给下一次探测改写
            return fail_transport(&state, &key, log, started, e).await;
        }
    };

    let status = upstream.status().as_u16();
    let ok = (200..300).contains(&status);
    if let Err(e) = state.store.record_key_outcome(&key.id, ok, true).await {
        tracing::error!(key_id = %key.id, "Failed to record key outcome: {}", e);
    }

    if streaming {
        stream_response(&state, upstream, log, started, status)
    } else {
        unary_response(&state, upstream, log, started, status, ok).await
    }
}

async fn fail_transport(
    state: &AppState,
    key: &ApiKey,
    mut log: RequestLog,
    started: Instant,
    error: reqwest::Error,
) -> Response {
    if let Err(e) = state.store.record_key_outcome(&key.id, false, false).await {
        tracing::error!(key_id = %key.id, "Failed to record key outcome: {}", e);
    }
    let message = error.to_string();
    log.status = 500;
    log.latency = started.elapsed().as_millis() as i64;
    log.error = Some(message.clone());
    write_log(&state.store, log).await;
    openai_error(StatusCode::INTERNAL_SERVER_ERROR, &message, "server_error")
}

/// 一元：读完上游 JSON，镜像状态码与响应体
async fn unary_response(
    state: &AppState,
    upstream: reqwest::Response,
    mut log: RequestLog,
    started: Instant,
    status: u16,
    ok: bool,
) -> Response {
    let content_type = upstream
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json")
        .to_string();

    let bytes = match upstream.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            let message = e.to_string();
            log.status = 500;
            log.latency = started.elapsed().as_millis() as i64;
            log.error = Some(message.clone());
            write_log(&state.store, log).await;
            return openai_error(StatusCode::INTERNAL_SERVER_ERROR, &message, "server_error");
        }
    };

    log.status = status;
    log.latency = started.elapsed().as_millis() as i64;
    if ok {
        if let Ok(body) = serde_json::from_slice::<serde_json::Value>(&bytes) {
            let (input, output) = extract_usage(&body);
            log.input_tokens = input;
            log.output_tokens = output;
        }
    } else {
        log.error = Some(String::from_utf8_lossy(&bytes).into_owned());
    }
    write_log(&state.store, log).await;

    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    response
}

/// 流式：上游字节原样分块转发，不整体缓冲；
/// 终结器保证完成 / 上游出错 / 客户端断开三种结局都恰好落一条日志
fn stream_response(
    state: &AppState,
    upstream: reqwest::Response,
    mut log: RequestLog,
    started: Instant,
    status: u16,
) -> Response {
    log.status = status;
    let relay_stream = RelayStream {
        upstream: upstream.bytes_stream().boxed(),
        finalizer: Some(StreamFinalizer {
            store: state.store.clone(),
            log,
            started,
        }),
    };

    let body_stream = futures_util::stream::try_unfold(relay_stream, |mut s| async move {
        match s.upstream.next().await {
            Some(Ok(chunk)) => Ok(Some((chunk, s))),
            Some(Err(e)) => {
                if let Some(finalizer) = s.finalizer.take() {
                    finalizer.finalize(Some(e.to_string()));
                }
                Err(std::io::Error::other(e))
            }
            None => {
                if let Some(finalizer) = s.finalizer.take() {
                    finalizer.finalize(None);
                }
                Ok(None)
            }
        }
    });

    let mut response = Response::new(Body::from_stream(body_stream));
    *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

struct StreamFinalizer {
    store: Arc<Store>,
    log: RequestLog,
    started: Instant,
}

impl StreamFinalizer {
    fn finalize(mut self, error: Option<String>) {
        self.log.latency = self.started.elapsed().as_millis() as i64;
        self.log.error = error;
        let store = self.store;
        let log = self.log;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                write_log(&store, log).await;
            });
        }
    }
}

struct RelayStream {
    upstream: BoxStream<'static, reqwest::Result<Bytes>>,
    finalizer: Option<StreamFinalizer>,
}

/// 客户端断开时流被丢弃；日志仍按部分时延与已观察到的状态写出
impl Drop for RelayStream {
    fn drop(&mut self) {
        if let Some(finalizer) = self.finalizer.take() {
            finalizer.finalize(None);
        }
    }
}
