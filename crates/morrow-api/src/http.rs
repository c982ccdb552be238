use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::State,
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use morrow_types::api::{
    CreateEventInput, CreateParticipantInput, CreateUserInput, EventsQuery, ParticipantsQuery,
    UpdateEventInput, UpdateParticipantInput, UpdateUserInput,
};

use crate::access::Caller;
use crate::error::ApiResult;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::middleware::identify_caller;
use crate::parse;
use crate::resolver::Resolver;

pub type AppState = Arc<Resolver>;

#[derive(Debug, Default, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub cascade: bool,
}

/// Every route the service exposes. Health probes skip caller identification.
pub fn router(state: AppState) -> Router {
    let probes = Router::new()
        .route("/health", get(health))
        .route("/ping", get(ping))
        .with_state(state.clone());

    let entities = Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/{id}", get(get_user).patch(update_user).delete(delete_user))
        .route("/events", get(list_events).post(create_event))
        .route("/events/{id}", get(get_event).patch(update_event).delete(delete_event))
        .route("/events/{id}/participants", get(event_participants))
        .route("/participants", get(list_participants).post(create_participant))
        .route(
            "/participants/{id}",
            get(get_participant)
                .patch(update_participant)
                .delete(delete_participant),
        )
        .layer(middleware::from_fn(identify_caller))
        .with_state(state);

    Router::new().merge(probes).merge(entities)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let timestamp = parse::format_timestamp(Utc::now());
    match state.health().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "database": { "status": "ok" },
                "timestamp": timestamp,
            })),
        ),
        Err(e) => {
            warn!("Database health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "database": { "status": "error" },
                    "timestamp": timestamp,
                })),
            )
        }
    }
}

async fn ping() -> impl IntoResponse {
    Json(json!({ "message": "pong" }))
}

fn deleted() -> Json<serde_json::Value> {
    Json(json!({ "deleted": true }))
}

// -- Users --

async fn create_user(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(input): ApiJson<CreateUserInput>,
) -> ApiResult<impl IntoResponse> {
    let user = state.create_user(&state.context(caller), input).await?;
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.user(&state.context(caller), &id).await?))
}

async fn list_users(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.users(&state.context(caller)).await?))
}

async fn update_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
    ApiJson(input): ApiJson<UpdateUserInput>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.update_user(&state.context(caller), &id, input).await?))
}

async fn delete_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    ApiQuery(query): ApiQuery<DeleteQuery>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    state
        .delete_user(&state.context(caller), &id, query.cascade)
        .await?;
    Ok(deleted())
}

// -- Events --

async fn create_event(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(input): ApiJson<CreateEventInput>,
) -> ApiResult<impl IntoResponse> {
    let event = state.create_event(&state.context(caller), input).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

async fn get_event(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.event(&state.context(caller), &id).await?))
}

async fn list_events(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<EventsQuery>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.events(&state.context(caller), query).await?))
}

async fn update_event(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
    ApiJson(input): ApiJson<UpdateEventInput>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.update_event(&state.context(caller), &id, input).await?))
}

async fn delete_event(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    state.delete_event(&state.context(caller), &id).await?;
    Ok(deleted())
}

async fn event_participants(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .event_participants(&state.context(caller), &id)
            .await?,
    ))
}

// -- Participants --

async fn create_participant(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    ApiJson(input): ApiJson<CreateParticipantInput>,
) -> ApiResult<impl IntoResponse> {
    let participant = state
        .create_participant(&state.context(caller), input)
        .await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

async fn get_participant(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.participant(&state.context(caller), &id).await?))
}

async fn list_participants(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<ParticipantsQuery>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.participants(&state.context(caller), query).await?))
}

async fn update_participant(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
    ApiJson(input): ApiJson<UpdateParticipantInput>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(
        state
            .update_participant(&state.context(caller), &id, input)
            .await?,
    ))
}

async fn delete_participant(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    state.delete_participant(&state.context(caller), &id).await?;
    Ok(deleted())
}

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use morrow_db::{Database, SystemClock};
    use serde_json::Value;
    use tower::ServiceExt;

    use super::*;
    use crate::middleware::CALLER_HEADER;

    fn app() -> Router {
        let db = Database::open_in_memory(Arc::new(SystemClock)).unwrap();
        router(Arc::new(Resolver::new(Arc::new(db), None)))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        caller: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(caller) = caller {
            builder = builder.header(CALLER_HEADER, caller);
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_user(app: &Router, email: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/users",
            None,
            Some(json!({ "email": email, "name": "Ana" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn create_event(app: &Router, creator: &str, visibility: &str) -> String {
        let (status, body) = send(
            app,
            "POST",
            "/events",
            Some(creator),
            Some(json!({
                "title": "Hike",
                "start_time": "2025-06-01T09:00:00Z",
                "end_time": "2025-06-01T12:00:00Z",
                "visibility": visibility,
                "creator_id": creator,
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn probes_answer_without_a_caller() {
        let app = app();
        let (status, body) = send(&app, "GET", "/health", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"]["status"], "ok");

        let (status, body) = send(&app, "GET", "/ping", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "pong");
    }

    #[tokio::test]
    async fn duplicate_email_is_a_conflict() {
        let app = app();
        create_user(&app, "ana@example.com").await;

        let (status, body) = send(
            &app,
            "POST",
            "/users",
            None,
            Some(json!({ "email": "ana@example.com", "name": "Other" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["type"], "conflict");
    }

    #[tokio::test]
    async fn malformed_ids_are_rejected() {
        let app = app();
        let (status, body) = send(&app, "GET", "/users/not-a-uuid", None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "validation_error");

        let (status, _) = send(&app, "GET", "/events", Some("not-a-uuid"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_bodies_and_queries_use_the_error_envelope() {
        let app = app();

        let (status, body) = send(
            &app,
            "POST",
            "/users",
            None,
            Some(json!({ "email": "a@x.com" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["type"], "validation_error");

        let (status, body) = send(
            &app,
            "POST",
            "/users",
            None,
            Some(json!({ "email": "a@x.com", "name": "A", "role": "owner" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "validation_error");

        let req = Request::builder()
            .method("POST")
            .uri("/users")
            .header("content-type", "application/json")
            .body(Body::from("not json"))
            .unwrap();
        let res = app.clone().oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "validation_error");

        let user = create_user(&app, "b@x.com").await;
        let (status, body) =
            send(&app, "DELETE", &format!("/users/{}?cascade=maybe", user), None, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["type"], "validation_error");
    }

    #[tokio::test]
    async fn private_events_are_hidden_from_strangers() {
        let app = app();
        let creator = create_user(&app, "ana@example.com").await;
        let stranger = create_user(&app, "bo@example.com").await;
        let event = create_event(&app, &creator, "private").await;
        let uri = format!("/events/{}", event);

        let (status, _) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", &uri, Some(&stranger), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&app, "GET", &uri, Some(&creator), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["visibility"], "private");

        let (status, body) = send(&app, "GET", "/events", Some(&stranger), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn participants_join_and_list_with_their_user() {
        let app = app();
        let creator = create_user(&app, "ana@example.com").await;
        let guest = create_user(&app, "bo@example.com").await;
        let event = create_event(&app, &creator, "shared").await;

        let (status, body) = send(
            &app,
            "POST",
            "/participants",
            Some(&guest),
            Some(json!({ "user_id": guest, "event_id": event })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["role"], "viewer");
        assert_eq!(body["status"], "pending");
        let participant = body["id"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            "PATCH",
            &format!("/participants/{}", participant),
            Some(&creator),
            Some(json!({ "status": "accepted" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "accepted");

        let (status, body) = send(
            &app,
            "GET",
            &format!("/events/{}/participants", event),
            Some(&guest),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0]["user"]["email"], "bo@example.com");
    }

    #[tokio::test]
    async fn user_delete_needs_cascade_while_referenced() {
        let app = app();
        let creator = create_user(&app, "ana@example.com").await;
        let event = create_event(&app, &creator, "public").await;
        let uri = format!("/users/{}", creator);

        let (status, body) = send(&app, "DELETE", &uri, None, None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["type"], "conflict");

        let (status, body) = send(&app, "DELETE", &format!("{}?cascade=true", uri), None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], true);

        let (status, _) = send(&app, "GET", &format!("/events/{}", event), None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
