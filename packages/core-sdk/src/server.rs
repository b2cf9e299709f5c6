use std::convert::Infallible;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    routing::{delete, get, get_service, post},
    Json, Router,
};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::services::ServeDir;

use crate::error::CoreError;
use crate::llm::{self, TurnEvent};
use crate::models::Message;
use crate::selection;
use crate::state::AppState;
use crate::telemetry;

/** \brief 表现层共享的应用状态;一把互斥锁同时序列化对话轮次。 */
pub type SharedState = Arc<Mutex<AppState>>;

/**
 * \brief 启动本地 HTTP 服务,提供静态前端与 API。
 * \param addr 监听地址,如 "127.0.0.1:5173"
 */
pub async fn run(addr: &str, state: AppState) -> Result<()> {
    let ui_root = std::env::var("UNICHAT_UI_DIR").unwrap_or_else(|_| "web".to_string());
    let static_service =
        get_service(ServeDir::new(ui_root).append_index_html_on_directories(true));
    let shared: SharedState = Arc::new(Mutex::new(state));

    let app = Router::new()
        .route("/api/admin/login", post(admin_login))
        .route("/api/admin/logout", post(admin_logout))
        .route("/api/admin/password", post(change_admin_secret))
        .route("/api/providers", get(list_providers).post(upsert_provider))
        .route("/api/providers/{name}", delete(remove_provider))
        .route("/api/models", get(list_models))
        .route("/api/select", post(select_model))
        .route("/api/chat", get(get_transcript))
        .route("/api/chat/clear", post(clear_chat))
        .route("/api/chat/sse", get(chat_sse))
        .fallback_service(static_service)
        .with_state(shared);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("UniChat listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Deserialize, Debug)]
struct LoginRequest {
    /** \brief 管理员口令(明文提交,仅本机回环使用)。 */
    secret: String,
}

#[derive(Serialize, Debug)]
struct LoginResponse {
    ok: bool,
}

#[derive(Deserialize, Debug)]
struct SecretRequest {
    /** \brief 新的管理员口令。 */
    secret: String,
}

#[derive(Deserialize, Debug)]
struct ProviderRequest {
    name: String,
    base_url: String,
    #[serde(default)]
    api_key: String,
    /** \brief 模型列表,保持给出的顺序。 */
    #[serde(default)]
    models: Vec<String>,
}

#[derive(Serialize, Debug)]
struct ProviderItem {
    name: String,
    base_url: String,
    api_key: String,
    models: Vec<String>,
}

#[derive(Serialize, Debug)]
struct ProvidersResponse {
    providers: Vec<ProviderItem>,
}

#[derive(Serialize, Debug)]
struct ModelChoiceDto {
    provider: String,
    model: String,
    display_name: String,
}

#[derive(Serialize, Debug)]
struct SelectionDto {
    provider: Option<String>,
    model: Option<String>,
}

#[derive(Serialize, Debug)]
struct ModelsResponse {
    choices: Vec<ModelChoiceDto>,
    selected: SelectionDto,
}

#[derive(Deserialize, Debug)]
struct SelectRequest {
    provider: String,
    model: String,
}

#[derive(Serialize, Debug)]
struct TranscriptResponse {
    messages: Vec<Message>,
}

#[derive(Deserialize, Debug)]
struct ChatQuery {
    /** \brief 用户输入(重试时省略)。 */
    #[serde(default)]
    prompt: Option<String>,
    /** \brief 为 true 时丢弃末尾助手消息并用缩短后的历史重新生成。 */
    #[serde(default)]
    retry: Option<bool>,
}

fn core_err(e: CoreError) -> (StatusCode, String) {
    let status = match &e {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Configuration(_) => StatusCode::CONFLICT,
        CoreError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string())
}

fn require_admin(state: &AppState) -> Result<(), (StatusCode, String)> {
    if state.is_admin {
        Ok(())
    } else {
        Err((StatusCode::FORBIDDEN, "请先登录管理员".to_string()))
    }
}

/**
 * \brief 管理员登录;口令错误只返回 ok=false,不锁定不限速。
 */
async fn admin_login(
    State(shared): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Json<LoginResponse> {
    let mut state = shared.lock().await;
    let ok = state.login(&payload.secret);
    Json(LoginResponse { ok })
}

/** \brief 注销管理员会话。 */
async fn admin_logout(State(shared): State<SharedState>) -> Json<serde_json::Value> {
    let mut state = shared.lock().await;
    state.logout();
    Json(serde_json::json!({"ok": true}))
}

/**
 * \brief 轮换管理员口令;成功后当前管理员会话随之失效。
 */
async fn change_admin_secret(
    State(shared): State<SharedState>,
    Json(payload): Json<SecretRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut state = shared.lock().await;
    require_admin(&state)?;
    state.set_admin_secret(&payload.secret).map_err(core_err)?;
    Ok(Json(serde_json::json!({"ok": true})))
}

/**
 * \brief 列出完整 Provider 配置,仅限管理员(含明文 Key)。
 */
async fn list_providers(
    State(shared): State<SharedState>,
) -> Result<Json<ProvidersResponse>, (StatusCode, String)> {
    let state = shared.lock().await;
    require_admin(&state)?;
    let settings = &state.store.settings;
    let providers = settings
        .base_urls
        .iter()
        .map(|(name, base_url)| ProviderItem {
            name: name.clone(),
            base_url: base_url.clone(),
            api_key: settings.api_keys.get(name).cloned().unwrap_or_default(),
            models: settings.models.get(name).cloned().unwrap_or_default(),
        })
        .collect();
    Ok(Json(ProvidersResponse { providers }))
}

/**
 * \brief 新增或整体覆盖 Provider,仅限管理员。
 */
async fn upsert_provider(
    State(shared): State<SharedState>,
    Json(payload): Json<ProviderRequest>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut state = shared.lock().await;
    require_admin(&state)?;
    state
        .upsert_provider(
            &payload.name,
            &payload.base_url,
            &payload.api_key,
            payload.models,
        )
        .map_err(core_err)?;
    Ok(Json(serde_json::json!({"ok": true})))
}

/**
 * \brief 删除 Provider,仅限管理员;删除激活者时选择一并清除。
 */
async fn remove_provider(
    State(shared): State<SharedState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let mut state = shared.lock().await;
    require_admin(&state)?;
    state.delete_provider(&name).map_err(core_err)?;
    Ok(Json(serde_json::json!({"ok": true})))
}

/**
 * \brief 列出全部可选 (Provider, 模型) 组合与当前选择。
 */
async fn list_models(State(shared): State<SharedState>) -> Json<ModelsResponse> {
    let state = shared.lock().await;
    let choices = selection::list_available_models(&state.store.settings)
        .into_iter()
        .map(|c| ModelChoiceDto {
            display_name: c.to_string(),
            provider: c.provider,
            model: c.model,
        })
        .collect();
    Json(ModelsResponse {
        choices,
        selected: SelectionDto {
            provider: state.selection.provider.clone(),
            model: state.selection.model.clone(),
        },
    })
}

/**
 * \brief 切换当前 (Provider, 模型);模型选择不需要管理员。
 */
async fn select_model(
    State(shared): State<SharedState>,
    Json(payload): Json<SelectRequest>,
) -> Result<Json<SelectionDto>, (StatusCode, String)> {
    let mut state = shared.lock().await;
    state
        .select(&payload.provider, &payload.model)
        .map_err(core_err)?;
    Ok(Json(SelectionDto {
        provider: state.selection.provider.clone(),
        model: state.selection.model.clone(),
    }))
}

/** \brief 返回当前会话转写。 */
async fn get_transcript(State(shared): State<SharedState>) -> Json<TranscriptResponse> {
    let state = shared.lock().await;
    Json(TranscriptResponse {
        messages: state.session.messages().to_vec(),
    })
}

/** \brief 清空会话转写。 */
async fn clear_chat(State(shared): State<SharedState>) -> Json<serde_json::Value> {
    let mut state = shared.lock().await;
    state.clear_chat();
    Json(serde_json::json!({"ok": true}))
}

/**
 * \brief 聊天 SSE 接口:GET /api/chat/sse?prompt=... 或 ?retry=true
 * \details data 事件携带累计文本,done/error 是终止事件,warning 表示轮次在
 *          发起前被拒绝(选择不完整或已失效)。状态锁在整轮期间被持有,
 *          后到的提交只能排队,同一会话同一时刻至多一轮在途。
 */
async fn chat_sse(
    State(shared): State<SharedState>,
    Query(q): Query<ChatQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)>
{
    let retry = q.retry.unwrap_or(false);
    let prompt = q.prompt.unwrap_or_default();
    if retry && !prompt.trim().is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            "prompt 与 retry 不可同时提供".to_string(),
        ));
    }
    if !retry && prompt.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "prompt 不能为空".to_string()));
    }

    let mut state = Arc::clone(&shared).lock_owned().await;
    if retry {
        if !state.session.drop_last_if_assistant() {
            return Err((
                StatusCode::CONFLICT,
                "末尾不是助手消息,无法重试".to_string(),
            ));
        }
    } else {
        state.session.append(Message::user(prompt));
    }

    let (tx, rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();

    tokio::spawn(async move {
        let AppState {
            store,
            selection,
            session,
            ..
        } = &mut *state;
        telemetry::log_event(
            "server.chat",
            &format!(
                "provider={} model={} msgs={} action={}",
                selection.provider.as_deref().unwrap_or("-"),
                selection.model.as_deref().unwrap_or("-"),
                session.len(),
                if retry { "retry" } else { "send" },
            ),
        );

        match llm::run_turn(session, selection, &store.settings) {
            Ok(mut turn) => {
                while let Some(event) = turn.next().await {
                    let out = match event {
                        TurnEvent::Partial(text) => Event::default().data(text),
                        TurnEvent::Completed(text) => Event::default().event("done").data(text),
                        TurnEvent::Failed(text) => {
                            telemetry::log_error("server.chat", &text);
                            Event::default().event("error").data(text)
                        }
                    };
                    if tx.send(Ok(out)).is_err() {
                        // 客户端已断开:丢弃轮次流即取消,不再追加消息
                        break;
                    }
                }
            }
            Err(e) => {
                telemetry::log_error("server.chat", &format!("turn rejected: {}", e));
                let _ = tx.send(Ok(Event::default().event("warning").data(e.to_string())));
            }
        }
    });

    let stream = UnboundedReceiverStream::new(rx);
    Ok(Sse::new(stream).keep_alive(KeepAlive::new()))
}
