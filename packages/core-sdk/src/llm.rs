use std::pin::Pin;

use anyhow::{anyhow, Result};
use async_stream::{stream, try_stream};
use futures_util::{pin_mut, Stream, StreamExt};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

use crate::chat::ChatSession;
use crate::error::CoreError;
use crate::models::{Message, Settings};
use crate::selection::SelectionState;

/** \brief 故障化作聊天消息时的固定前缀。 */
pub const ERROR_TURN_PREFIX: &str = "Error occurred: ";

/**
 * \brief 一轮对话对外可见的事件:若干增量之后恰好一个终止事件。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /** \brief 累计到当前为止的回复文本,每个非空片段之后发出一次。 */
    Partial(String),
    /** \brief 流正常结束,携带最终文本;助手消息已写入转写。 */
    Completed(String),
    /** \brief 连接、远端校验或传输中途失败;错误已作为助手消息写入转写。 */
    Failed(String),
}

/**
 * \brief 一轮对话的事件流。
 * \details 持有转写的独占借用直到终止事件,借用检查器因此保证同一会话
 *          不可能有第二个进行中的轮次。提前丢弃流即取消本轮:停止消费
 *          网络流,不追加任何消息。
 */
pub type TurnStream<'a> = Pin<Box<dyn Stream<Item = TurnEvent> + Send + 'a>>;

/**
 * \brief 驱动一次流式补全,并把结果归并进转写。
 * \details 选择不完整返回 Configuration;引用已不存在的 Provider 或模型返回
 *          NotFound。两者都在发起网络请求之前拒绝,不写转写。请求发出之后的
 *          一切失败都化作一条 "Error occurred: ..." 助手消息并以 Failed 收尾,
 *          不向调用方抛错。
 */
pub fn run_turn<'a>(
    session: &'a mut ChatSession,
    selection: &SelectionState,
    settings: &Settings,
) -> Result<TurnStream<'a>, CoreError> {
    if !selection.is_complete() {
        return Err(CoreError::Configuration(
            "provider, API key and model must all be set before chatting".to_string(),
        ));
    }
    let provider = selection.provider.clone().unwrap_or_default();
    let api_key = selection.api_key.clone().unwrap_or_default();
    let model = selection.model.clone().unwrap_or_default();

    let base_url = settings.base_urls.get(&provider).cloned().ok_or_else(|| {
        CoreError::NotFound(format!("provider {} is no longer registered", provider))
    })?;
    let offered = settings
        .models
        .get(&provider)
        .map(|list| list.iter().any(|m| m == &model))
        .unwrap_or(false);
    if !offered {
        return Err(CoreError::NotFound(format!(
            "model {} is no longer offered by provider {}",
            model, provider
        )));
    }

    // 逐条只保留 {role, content},按转写顺序整体发送
    let payload = json!({
        "model": model,
        "messages": session.messages(),
        "stream": true,
    });

    let fragments = open_completion_stream(base_url, api_key, payload);
    Ok(Box::pin(reduce_fragments(session, fragments)))
}

/**
 * \brief 发起流式 chat/completions 请求,按到达顺序产出解码出的内容片段。
 * \details 基地址自带版本段(如 .../v1),这里只追加 /chat/completions。
 *          连接失败与远端拒绝以 Err 项出现在流里,由归并层统一处理。
 */
fn open_completion_stream(
    base_url: String,
    api_key: String,
    payload: Value,
) -> impl Stream<Item = Result<String>> + Send + 'static {
    try_stream! {
        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let client = reqwest::Client::builder().build()?;
        let resp = client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", api_key))
            .json(&payload)
            .send()
            .await?;
        let resp = check_status(resp).await?;

        let mut bytes = resp.bytes_stream();
        let mut pending = Vec::<u8>::new();
        let mut done = false;
        while let Some(chunk) = bytes.next().await {
            let chunk = chunk?;
            pending.extend_from_slice(&chunk);
            while let Some(block) = take_event_block(&mut pending) {
                if let Some(data) = sse_data_line(&block) {
                    if data.trim() == "[DONE]" {
                        done = true;
                        break;
                    }
                    if let Some(delta) = content_delta(&data) {
                        yield delta;
                    }
                }
            }
            if done {
                break;
            }
        }
        // 流关闭后残留的半个事件块,尽力解析
        if !done && !pending.is_empty() {
            if let Some(data) = sse_data_line(&pending) {
                if data.trim() != "[DONE]" {
                    if let Some(delta) = content_delta(&data) {
                        yield delta;
                    }
                }
            }
        }
    }
}

/**
 * \brief 把内容片段流归并进转写:累计缓冲、逐段上报,终了落一条助手消息。
 * \details 到达顺序即最终文本,不重排不去重;空片段不产生事件。任何 Err 项
 *          中止累计,把错误变成可见的聊天轮次后立即收尾。
 */
fn reduce_fragments<'a, S>(
    session: &'a mut ChatSession,
    fragments: S,
) -> impl Stream<Item = TurnEvent> + Send + 'a
where
    S: Stream<Item = Result<String>> + Send + 'a,
{
    stream! {
        pin_mut!(fragments);
        let mut buffer = String::new();
        let mut failed = false;
        while let Some(item) = fragments.next().await {
            match item {
                Ok(delta) => {
                    if delta.is_empty() {
                        continue;
                    }
                    buffer.push_str(&delta);
                    yield TurnEvent::Partial(buffer.clone());
                }
                Err(e) => {
                    let text = format!("{}{}", ERROR_TURN_PREFIX, e);
                    session.append(Message::assistant(text.clone()));
                    yield TurnEvent::Failed(text);
                    failed = true;
                    break;
                }
            }
        }
        if !failed {
            session.append(Message::assistant(buffer.clone()));
            yield TurnEvent::Completed(buffer);
        }
    }
}

/** \brief 非 2xx 响应读出正文并转成错误。 */
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let text = resp.text().await.unwrap_or_default();
    Err(anyhow!("request failed: {} -> {}", status, text))
}

/** \brief 从缓冲中切出一个以空行收尾的完整 SSE 事件块。 */
fn take_event_block(pending: &mut Vec<u8>) -> Option<Vec<u8>> {
    let pos = pending.windows(2).position(|w| w == b"\n\n")?;
    Some(pending.drain(..pos + 2).collect())
}

/** \brief 取事件块中第一个 data: 行的负载。 */
fn sse_data_line(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    for line in text.lines() {
        let line = line.trim_start();
        if let Some(rest) = line.strip_prefix("data:") {
            return Some(rest.trim().to_string());
        }
    }
    None
}

/** \brief 解析 choice 0 的 delta.content 片段,其余 choice 一律忽略。 */
fn content_delta(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}
