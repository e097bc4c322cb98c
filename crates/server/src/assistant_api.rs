//! The assistant HTTP surface.
//!
//! Chat turns stream back as newline-delimited JSON events; everything else
//! is plain request/response. Identity comes from the `x-user-id` header and
//! scopes every read and write, so one user's ids are invisible to another.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tracing::error;

use atrium_assistant::{ActionError, ActionService, Orchestrator, OrchestratorError, TurnRequest};
use atrium_core::domain::action::{ActionProposalId, ActionStatus};
use atrium_core::domain::records::UserId;
use atrium_core::domain::thread::ThreadId;
use atrium_db::repositories::{RepositoryError, ThreadRepository};

const USER_HEADER: &str = "x-user-id";

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
    pub actions: Arc<ActionService>,
    pub threads: Arc<dyn ThreadRepository>,
}

#[derive(Debug, Serialize)]
struct ApiError {
    error: String,
}

type ApiFailure = (StatusCode, Json<ApiError>);

fn failure(status: StatusCode, message: impl Into<String>) -> ApiFailure {
    (status, Json(ApiError { error: message.into() }))
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    #[serde(rename = "threadId", default)]
    thread_id: Option<String>,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ActionRequest {
    #[serde(rename = "actionId")]
    action_id: String,
    action: String,
}

#[derive(Debug, Serialize)]
struct ActionResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct ThreadResponse {
    id: String,
    title: String,
    created_at: String,
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct MessageResponse {
    id: String,
    role: &'static str,
    content: String,
    created_at: String,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/assistant/chat", post(chat))
        .route("/api/assistant/actions", post(resolve_action))
        .route("/api/assistant/threads", get(list_threads))
        .route("/api/assistant/threads/{thread_id}/messages", get(list_messages))
        .with_state(state)
}

fn owner_from_headers(headers: &HeaderMap) -> Result<UserId, ApiFailure> {
    headers
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| UserId(value.to_string()))
        .ok_or_else(|| failure(StatusCode::UNAUTHORIZED, "missing x-user-id header"))
}

fn repository_failure(error: RepositoryError) -> ApiFailure {
    error!(event_name = "api.assistant.repository_error", error = %error);
    failure(StatusCode::INTERNAL_SERVER_ERROR, "an internal storage error occurred")
}

async fn chat(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<ChatRequest>,
) -> Result<Response, ApiFailure> {
    let owner = owner_from_headers(&headers)?;
    let message = request.message.trim().to_string();
    if message.is_empty() {
        return Err(failure(StatusCode::BAD_REQUEST, "message must not be empty"));
    }

    let events = state
        .orchestrator
        .run(TurnRequest { owner, thread_id: request.thread_id.map(ThreadId), message })
        .await
        .map_err(|error| match error {
            OrchestratorError::ThreadNotFound => {
                failure(StatusCode::NOT_FOUND, "conversation thread not found")
            }
            OrchestratorError::Repository(error) => repository_failure(error),
        })?;

    let body = Body::from_stream(ReceiverStream::new(events).map(|event| {
        let mut line = serde_json::to_string(&event)
            .unwrap_or_else(|_| r#"{"type":"error","message":"event encoding failed"}"#.to_string());
        line.push('\n');
        Ok::<_, std::convert::Infallible>(line)
    }));

    Ok(([(header::CONTENT_TYPE, "application/x-ndjson")], body).into_response())
}

/// Settles a pending proposal one way or the other. Confirmation reports
/// execution failure as `success: false` with the stored error; any other
/// `action` verb is a client error.
async fn resolve_action(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(request): Json<ActionRequest>,
) -> Result<impl IntoResponse, ApiFailure> {
    let owner = owner_from_headers(&headers)?;
    let action_id = ActionProposalId(request.action_id);

    match request.action.as_str() {
        "confirm" => {
            let proposal =
                state.actions.confirm(&owner, &action_id).await.map_err(action_failure)?;
            Ok(Json(ActionResponse {
                success: proposal.status == ActionStatus::Executed,
                error: proposal.error_msg,
            }))
        }
        "cancel" => {
            state.actions.cancel(&owner, &action_id).await.map_err(action_failure)?;
            Ok(Json(ActionResponse { success: true, error: None }))
        }
        other => Err(failure(
            StatusCode::BAD_REQUEST,
            format!("unknown action \"{other}\", expected \"confirm\" or \"cancel\""),
        )),
    }
}

fn action_failure(error: ActionError) -> ApiFailure {
    match error {
        ActionError::ProposalNotFound => {
            failure(StatusCode::NOT_FOUND, "action proposal not found")
        }
        ActionError::AlreadySettled(status) => {
            failure(StatusCode::CONFLICT, format!("action is already {status}"))
        }
        ActionError::Conflict => {
            failure(StatusCode::CONFLICT, "action was modified concurrently")
        }
        ActionError::Payload(error) => {
            failure(StatusCode::UNPROCESSABLE_ENTITY, error.to_string())
        }
        ActionError::Execution(message) => failure(StatusCode::UNPROCESSABLE_ENTITY, message),
        ActionError::Repository(error) => repository_failure(error),
    }
}

async fn list_threads(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<Vec<ThreadResponse>>, ApiFailure> {
    let owner = owner_from_headers(&headers)?;
    let threads = state.threads.list_threads(&owner).await.map_err(repository_failure)?;

    Ok(Json(
        threads
            .into_iter()
            .map(|thread| ThreadResponse {
                id: thread.id.0,
                title: thread.title,
                created_at: thread.created_at.to_rfc3339(),
                updated_at: thread.updated_at.to_rfc3339(),
            })
            .collect(),
    ))
}

async fn list_messages(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(thread_id): Path<String>,
) -> Result<Json<Vec<MessageResponse>>, ApiFailure> {
    let owner = owner_from_headers(&headers)?;
    let thread_id = ThreadId(thread_id);

    // Ownership gate first so foreign thread ids read as missing.
    state
        .threads
        .find_thread(&owner, &thread_id)
        .await
        .map_err(repository_failure)?
        .ok_or_else(|| failure(StatusCode::NOT_FOUND, "conversation thread not found"))?;

    let messages = state.threads.list_messages(&thread_id).await.map_err(repository_failure)?;
    Ok(Json(
        messages
            .into_iter()
            .map(|message| MessageResponse {
                id: message.id.0,
                role: message.role.as_str(),
                content: message.content,
                created_at: message.created_at.to_rfc3339(),
            })
            .collect(),
    ))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use atrium_assistant::{
        ActionService, NoopIndexer, Orchestrator, RetrievalEngine, ScriptedProvider,
    };
    use atrium_core::domain::action::ActionType;
    use atrium_core::domain::records::UserId;
    use atrium_core::domain::thread::{ConversationThread, ThreadId};
    use atrium_db::repositories::{
        InMemoryActionRepository, InMemoryEmbeddingRepository, InMemoryRecordRepository,
        InMemoryThreadRepository, ThreadRepository,
    };

    use super::{router, ApiState};

    struct Fixture {
        state: ApiState,
        actions: Arc<ActionService>,
        threads: Arc<InMemoryThreadRepository>,
    }

    fn fixture(chunks: Vec<String>) -> Fixture {
        let provider = Arc::new(ScriptedProvider::streaming(chunks).without_embeddings());
        let threads = Arc::new(InMemoryThreadRepository::default());
        let records = Arc::new(InMemoryRecordRepository::default());
        let embeddings = Arc::new(InMemoryEmbeddingRepository::default());
        let action_rows = Arc::new(InMemoryActionRepository::new(threads.clone()));

        let retrieval =
            Arc::new(RetrievalEngine::new(provider.clone(), embeddings, records.clone()));
        let actions = Arc::new(ActionService::new(action_rows, records, Arc::new(NoopIndexer)));
        let orchestrator = Arc::new(Orchestrator::new(
            provider,
            threads.clone(),
            retrieval,
            actions.clone(),
        ));

        Fixture {
            state: ApiState {
                orchestrator,
                actions: actions.clone(),
                threads: threads.clone(),
            },
            actions,
            threads,
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn body_lines(response: axum::response::Response) -> Vec<Value> {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(|line| serde_json::from_str(line).expect("ndjson line"))
            .collect()
    }

    #[tokio::test]
    async fn requests_without_identity_are_unauthorized() {
        let fixture = fixture(Vec::new());
        let response = router(fixture.state)
            .oneshot(
                Request::post("/api/assistant/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"message": "hi"}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn blank_messages_are_rejected() {
        let fixture = fixture(Vec::new());
        let response = router(fixture.state)
            .oneshot(
                Request::post("/api/assistant/chat")
                    .header("content-type", "application/json")
                    .header("x-user-id", "user-1")
                    .body(Body::from(json!({"message": "   "}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn chat_streams_ndjson_events_ending_in_done() {
        let fixture = fixture(vec!["Hello ".to_string(), "there.".to_string()]);
        let response = router(fixture.state)
            .oneshot(
                Request::post("/api/assistant/chat")
                    .header("content-type", "application/json")
                    .header("x-user-id", "user-1")
                    .body(Body::from(json!({"message": "hi"}).to_string()))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("content-type").and_then(|value| value.to_str().ok()),
            Some("application/x-ndjson"),
        );

        let events = body_lines(response).await;
        assert_eq!(events[0]["type"], "status");
        assert_eq!(events[0]["phase"], "thinking");

        let first_chunk = events
            .iter()
            .find(|event| event["type"] == "chunk")
            .expect("chunk event");
        assert_eq!(first_chunk["content"], "Hello ");

        let done = events.last().expect("done");
        assert_eq!(done["type"], "done");
        assert!(done["threadId"].is_string());
    }

    #[tokio::test]
    async fn chat_against_a_foreign_thread_is_not_found() {
        let fixture = fixture(Vec::new());
        fixture
            .threads
            .save_thread(ConversationThread {
                id: ThreadId("thread-1".to_string()),
                owner_user_id: UserId("user-2".to_string()),
                title: "t".to_string(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .expect("seed");

        let response = router(fixture.state)
            .oneshot(
                Request::post("/api/assistant/chat")
                    .header("content-type", "application/json")
                    .header("x-user-id", "user-1")
                    .body(Body::from(
                        json!({"threadId": "thread-1", "message": "hi"}).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn confirm_endpoint_settles_a_proposal() {
        let fixture = fixture(Vec::new());
        fixture
            .threads
            .save_thread(ConversationThread {
                id: ThreadId("thread-1".to_string()),
                owner_user_id: UserId("user-1".to_string()),
                title: "t".to_string(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .expect("seed");
        let proposal = fixture
            .actions
            .propose(
                ThreadId("thread-1".to_string()),
                ActionType::CreateCompany,
                json!({"name": "Acme"}),
            )
            .await
            .expect("propose");

        let response = router(fixture.state)
            .oneshot(
                Request::post("/api/assistant/actions")
                    .header("content-type", "application/json")
                    .header("x-user-id", "user-1")
                    .body(Body::from(
                        json!({"actionId": proposal.id.0, "action": "confirm"}).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert!(body.get("error").is_none());
    }

    #[tokio::test]
    async fn unknown_action_verbs_are_rejected() {
        let fixture = fixture(Vec::new());
        let response = router(fixture.state)
            .oneshot(
                Request::post("/api/assistant/actions")
                    .header("content-type", "application/json")
                    .header("x-user-id", "user-1")
                    .body(Body::from(
                        json!({"actionId": "whatever", "action": "approve"}).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn cancel_of_a_foreign_proposal_is_not_found() {
        let fixture = fixture(Vec::new());
        fixture
            .threads
            .save_thread(ConversationThread {
                id: ThreadId("thread-1".to_string()),
                owner_user_id: UserId("user-2".to_string()),
                title: "t".to_string(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .expect("seed");
        let proposal = fixture
            .actions
            .propose(
                ThreadId("thread-1".to_string()),
                ActionType::CreateCompany,
                json!({"name": "Acme"}),
            )
            .await
            .expect("propose");

        let response = router(fixture.state)
            .oneshot(
                Request::post("/api/assistant/actions")
                    .header("content-type", "application/json")
                    .header("x-user-id", "user-1")
                    .body(Body::from(
                        json!({"actionId": proposal.id.0, "action": "cancel"}).to_string(),
                    ))
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn thread_listing_is_owner_scoped() {
        let fixture = fixture(Vec::new());
        for (id, owner) in [("thread-1", "user-1"), ("thread-2", "user-2")] {
            fixture
                .threads
                .save_thread(ConversationThread {
                    id: ThreadId(id.to_string()),
                    owner_user_id: UserId(owner.to_string()),
                    title: format!("{id} title"),
                    created_at: chrono::Utc::now(),
                    updated_at: chrono::Utc::now(),
                })
                .await
                .expect("seed");
        }

        let response = router(fixture.state)
            .oneshot(
                Request::get("/api/assistant/threads")
                    .header("x-user-id", "user-1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let listed = body.as_array().expect("array");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["id"], "thread-1");
    }

    #[tokio::test]
    async fn foreign_thread_messages_read_as_missing() {
        let fixture = fixture(Vec::new());
        fixture
            .threads
            .save_thread(ConversationThread {
                id: ThreadId("thread-1".to_string()),
                owner_user_id: UserId("user-2".to_string()),
                title: "t".to_string(),
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            })
            .await
            .expect("seed");

        let response = router(fixture.state)
            .oneshot(
                Request::get("/api/assistant/threads/thread-1/messages")
                    .header("x-user-id", "user-1")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
