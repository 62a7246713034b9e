//! 内置 HTTP 服务
//!
//! 传输层只是薄薄的管道：解码参数和请求体、从 X-User-Id 取调用者身份、
//! 调用对应引擎、把 AppError 映射为状态码。所有操作契约都在引擎层。

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use serde::Serialize;
use tracing::{error, info};

use crate::community::{CommentService, PostService};
use crate::conversation::types::{
    ReplyRequest, ScenarioListResponse, ScenarioResponse, StartSessionRequest,
};
use crate::conversation::{ConversationService, ScenarioService};
use crate::error::AppError;
use crate::models::{
    CommentCreateRequest, CommentUpdateRequest, PinPostRequest, PostCreateRequest, PostListQuery,
    PostUpdateRequest, SortMode,
};

pub struct AppState {
    pub posts: PostService,
    pub comments: CommentService,
    pub conversation: ConversationService,
    pub scenarios: Arc<ScenarioService>,
}

pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let make_svc = make_service_fn(move |_conn| {
        let state = Arc::clone(&state);
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req| {
                handle_request(Arc::clone(&state), req)
            }))
        }
    });

    info!("[Server] Listening on http://{}", addr);
    let server = Server::bind(&addr).serve(make_svc);
    server
        .await
        .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<Body> {
    let body = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::from("response build failed")))
}

fn empty_response(status: StatusCode) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

fn error_response(err: AppError) -> Response<Body> {
    let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        error!("[Server] {}", err);
    }
    let body: String = err.into();
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| Response::new(Body::from("error response build failed")))
}

fn query_map(query: Option<&str>) -> std::collections::HashMap<String, String> {
    url::form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect()
}

async fn read_json<T: serde::de::DeserializeOwned>(body: Body) -> Result<T, AppError> {
    let bytes = hyper::body::to_bytes(body)
        .await
        .map_err(|e| AppError::Validation(format!("failed to read request body: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::Validation(format!("invalid request body: {}", e)))
}

fn scenario_response(s: crate::models::Scenario) -> ScenarioResponse {
    ScenarioResponse {
        id: s.id,
        title: s.title,
        description: s.description,
        difficulty: s.difficulty,
        category: s.category,
        initial_message: s.initial_message,
    }
}

async fn handle_request(
    state: Arc<AppState>,
    req: Request<Body>,
) -> Result<Response<Body>, hyper::Error> {
    // 身份解析与认证是外部协作者的职责；这里只透传调用者 id
    let user_id = req
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();

    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = query_map(req.uri().query());
    let body = req.into_body();

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let response = dispatch(&state, &method, &segments, &query, body, &user_id).await;

    Ok(match response {
        Ok(resp) => resp,
        Err(err) => error_response(err),
    })
}

async fn dispatch(
    state: &AppState,
    method: &Method,
    segments: &[&str],
    query: &std::collections::HashMap<String, String>,
    body: Body,
    user_id: &str,
) -> Result<Response<Body>, AppError> {
    match (method, segments) {
        // ------------------------------------------------------------------
        // 社区板块
        // ------------------------------------------------------------------
        (&Method::GET, ["community", "posts"]) => {
            let list_query = PostListQuery {
                q: query.get("q").cloned(),
                tags: query
                    .get("tags")
                    .map(|t| t.split(',').map(|s| s.trim().to_string()).collect())
                    .unwrap_or_default(),
                sort: query.get("sort").map(|s| SortMode::parse(s)),
                page: query.get("page").and_then(|p| p.parse().ok()),
                limit: query.get("limit").and_then(|l| l.parse().ok()),
            };
            let page = state.posts.list(user_id, &list_query)?;
            Ok(json_response(StatusCode::OK, &page))
        }
        (&Method::POST, ["community", "posts"]) => {
            let req: PostCreateRequest = read_json(body).await?;
            let post = state.posts.create(user_id, &req)?;
            Ok(json_response(StatusCode::CREATED, &post))
        }
        (&Method::GET, ["community", "posts", post_id]) => {
            let post = state.posts.get(post_id, user_id)?;
            Ok(json_response(StatusCode::OK, &post))
        }
        (&Method::PUT, ["community", "posts", post_id]) => {
            let req: PostUpdateRequest = read_json(body).await?;
            let post = state.posts.update(post_id, user_id, &req)?;
            Ok(json_response(StatusCode::OK, &post))
        }
        (&Method::DELETE, ["community", "posts", post_id]) => {
            state.posts.delete(post_id, user_id)?;
            Ok(empty_response(StatusCode::NO_CONTENT))
        }
        (&Method::POST, ["community", "posts", post_id, "upvote"]) => {
            let result = state.posts.toggle_upvote(post_id, user_id)?;
            Ok(json_response(StatusCode::OK, &result))
        }
        (&Method::PUT, ["community", "posts", post_id, "pin"]) => {
            let req: PinPostRequest = read_json(body).await?;
            let post = state.posts.set_pinned(post_id, user_id, req.is_pinned)?;
            Ok(json_response(StatusCode::OK, &post))
        }
        (&Method::GET, ["community", "tags"]) => {
            let limit = query
                .get("limit")
                .and_then(|l| l.parse::<usize>().ok())
                .unwrap_or(20)
                .clamp(1, 50);
            let tags = state.posts.popular_tags(limit)?;
            Ok(json_response(StatusCode::OK, &tags))
        }
        (&Method::GET, ["community", "posts", post_id, "comments"]) => {
            let comments = state.comments.list_roots(post_id, user_id)?;
            Ok(json_response(StatusCode::OK, &comments))
        }
        (&Method::POST, ["community", "posts", post_id, "comments"]) => {
            let req: CommentCreateRequest = read_json(body).await?;
            let comment = state.comments.create(post_id, user_id, &req)?;
            Ok(json_response(StatusCode::CREATED, &comment))
        }
        (&Method::GET, ["community", "comments", comment_id, "replies"]) => {
            let replies = state.comments.list_replies(comment_id, user_id)?;
            Ok(json_response(StatusCode::OK, &replies))
        }
        (&Method::PUT, ["community", "comments", comment_id]) => {
            let req: CommentUpdateRequest = read_json(body).await?;
            let comment = state.comments.update(comment_id, user_id, &req)?;
            Ok(json_response(StatusCode::OK, &comment))
        }
        (&Method::DELETE, ["community", "comments", comment_id]) => {
            state.comments.soft_delete(comment_id, user_id)?;
            Ok(empty_response(StatusCode::NO_CONTENT))
        }
        (&Method::POST, ["community", "comments", comment_id, "upvote"]) => {
            let result = state.comments.toggle_upvote(comment_id, user_id)?;
            Ok(json_response(StatusCode::OK, &result))
        }

        // ------------------------------------------------------------------
        // 对话模拟
        // ------------------------------------------------------------------
        (&Method::GET, ["conversation", "scenarios"]) => {
            let scenarios: Vec<ScenarioResponse> = state
                .scenarios
                .list()?
                .into_iter()
                .map(scenario_response)
                .collect();
            let total = scenarios.len();
            Ok(json_response(
                StatusCode::OK,
                &ScenarioListResponse { scenarios, total },
            ))
        }
        (&Method::GET, ["conversation", "scenarios", scenario_id]) => {
            let scenario = state.scenarios.get(scenario_id)?;
            Ok(json_response(StatusCode::OK, &scenario_response(scenario)))
        }
        (&Method::POST, ["conversation", "simulation", "start"]) => {
            let req: StartSessionRequest = read_json(body).await?;
            let started = state.conversation.start(&req.scenario_id)?;
            Ok(json_response(StatusCode::OK, &started))
        }
        (&Method::POST, ["conversation", "simulation", session_id, "reply"]) => {
            let req: ReplyRequest = read_json(body).await?;
            let reply = state.conversation.reply(session_id, &req.content).await?;
            Ok(json_response(StatusCode::OK, &reply))
        }
        (&Method::POST, ["conversation", "simulation", session_id, "end"]) => {
            let ended = state.conversation.end(session_id, user_id).await?;
            Ok(json_response(StatusCode::OK, &ended))
        }
        (&Method::GET, ["conversation", "simulation", session_id]) => {
            let history = state.conversation.inspect(session_id).await?;
            Ok(json_response(StatusCode::OK, &history))
        }
        (&Method::GET, ["conversation", "history"]) => {
            let limit = query
                .get("limit")
                .and_then(|l| l.parse().ok())
                .unwrap_or(10);
            let skip = query.get("skip").and_then(|s| s.parse().ok()).unwrap_or(0);
            let history = state.conversation.history(limit, skip)?;
            Ok(json_response(StatusCode::OK, &history))
        }
        (&Method::GET, ["conversation", "history", record_id]) => {
            let detail = state.conversation.history_detail(record_id)?;
            Ok(json_response(StatusCode::OK, &detail))
        }

        _ => Ok(json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({ "code": "NOT_FOUND", "message": "Not Found" }),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_map_parses_pairs() {
        let map = query_map(Some("q=%E9%9D%A2%E8%AB%87&page=2&limit=5"));
        assert_eq!(map.get("q").map(String::as_str), Some("面談"));
        assert_eq!(map.get("page").map(String::as_str), Some("2"));
        assert_eq!(map.get("limit").map(String::as_str), Some("5"));
        assert!(query_map(None).is_empty());
    }

    #[tokio::test]
    async fn test_read_json_rejects_garbage() {
        let err = read_json::<PinPostRequest>(Body::from("not json")).await;
        assert!(matches!(err, Err(AppError::Validation(_))));

        let ok = read_json::<PinPostRequest>(Body::from(r#"{"is_pinned": true}"#))
            .await
            .unwrap();
        assert!(ok.is_pinned);
    }
}
