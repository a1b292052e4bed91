use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Form, Json, Router,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::classroom::{ClassroomClient, CourseWorkCreate, GradeImportSummary};
use crate::db::Db;
use crate::error::ApiError;
use crate::jwt::KeysetCache;
use crate::launch::{login_init_url, resolve_custom_params, LaunchContext, MessageHint};
use crate::models::*;
use crate::sessions::{LaunchPurpose, LaunchSession, NewLaunchSession, SessionStore};
use crate::{assignment, jwt};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub sessions: Arc<SessionStore>,
    pub keysets: Arc<KeysetCache>,
    pub classroom: Arc<ClassroomClient>,
    pub platform_issuer: Arc<String>,
    pub base_url: Arc<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        // tool registry
        .route("/lti/tool", post(register_tool))
        .route("/lti/tools", get(list_tools))
        .route(
            "/lti/tool/:id",
            get(get_tool).put(update_tool).delete(delete_tool),
        )
        // deep linking
        .route("/lti/content-selection-launch-init", get(content_selection_launch_init))
        .route("/lti/deep-link-response", post(deep_link_response))
        // resource launch
        .route("/lti/launch-response", post(launch_response))
        .route("/classroom-shim/launch-assignment", get(launch_assignment))
        .route("/classroom-shim/e2e-resource-launch", get(e2e_resource_launch))
        // assignments
        .route("/classroom-shim/lti-assignment", post(create_assignment))
        .route("/classroom-shim/lti-assignments", get(list_assignments))
        .route(
            "/classroom-shim/lti-assignment/:id",
            get(get_assignment).patch(update_assignment).delete(delete_assignment),
        )
        .route("/classroom-shim/lti-assignment/:id/publish", post(publish_assignment))
        // grade passback / coursework import
        .route("/classroom-shim/course-works", get(course_work_list))
        .route("/classroom-shim/import-grades", post(import_grades))
        .with_state(state)
}

type AuthHeader = Option<TypedHeader<Authorization<Bearer>>>;

/// The token itself is validated by the auth collaborator in front of this
/// service; here we only require its presence and forward it to the
/// classroom provider where needed.
fn bearer(auth: &AuthHeader) -> Result<&str, ApiError> {
    match auth {
        Some(TypedHeader(Authorization(b))) => Ok(b.token()),
        None => Err(ApiError::Auth("missing bearer token")),
    }
}

#[derive(Deserialize)]
struct ContextQuery {
    context_id: String,
}

// --- tool registry ---

fn is_http_url(s: &str) -> bool {
    reqwest::Url::parse(s)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

fn validate_tool_req(req: &RegisterToolReq) -> Vec<String> {
    let mut bad = Vec::new();
    if req.name.trim().is_empty() {
        bad.push("name".into());
    }
    if req.client_id.trim().is_empty() {
        bad.push("client_id".into());
    }
    if req.deployment_id.trim().is_empty() {
        bad.push("deployment_id".into());
    }
    if req.issuer.trim().is_empty() {
        bad.push("issuer".into());
    }
    if !is_http_url(&req.tool_login_url) {
        bad.push("tool_login_url".into());
    }
    if !is_http_url(&req.content_selection_url) {
        bad.push("content_selection_url".into());
    }
    if req.redirect_uris.is_empty() || req.redirect_uris.iter().any(|u| !is_http_url(u)) {
        bad.push("redirect_uris".into());
    }
    match req.public_key_type {
        PublicKeyType::KeysetUrl => {
            if !req.tool_keyset_url.as_deref().map(is_http_url).unwrap_or(false) {
                bad.push("tool_keyset_url".into());
            }
            if req.tool_public_key.is_some() {
                bad.push("tool_public_key".into());
            }
        }
        PublicKeyType::PublicKey => {
            if req.tool_public_key.as_deref().map(str::trim).unwrap_or("").is_empty() {
                bad.push("tool_public_key".into());
            }
            if req.tool_keyset_url.is_some() {
                bad.push("tool_keyset_url".into());
            }
        }
    }
    bad
}

async fn register_tool(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(req): Json<RegisterToolReq>,
) -> Result<(StatusCode, Json<Tool>), ApiError> {
    bearer(&auth)?;
    let bad = validate_tool_req(&req);
    if !bad.is_empty() {
        return Err(ApiError::InvalidFields(bad));
    }

    let tool = sqlx::query_as::<_, Tool>(
        r#"
        INSERT INTO tools (id, name, client_id, deployment_id, issuer, tool_login_url,
                           public_key_type, tool_keyset_url, tool_public_key,
                           content_selection_url, redirect_uris, enable_grade_sync,
                           enable_nrps, deeplink_type, custom_params)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&req.name)
    .bind(&req.client_id)
    .bind(&req.deployment_id)
    .bind(&req.issuer)
    .bind(&req.tool_login_url)
    .bind(req.public_key_type)
    .bind(&req.tool_keyset_url)
    .bind(&req.tool_public_key)
    .bind(&req.content_selection_url)
    .bind(&req.redirect_uris)
    .bind(req.enable_grade_sync)
    .bind(req.enable_nrps)
    .bind(req.deeplink_type)
    .bind(&req.custom_params)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(tool)))
}

async fn list_tools(
    State(state): State<AppState>,
    auth: AuthHeader,
) -> Result<Json<Vec<Tool>>, ApiError> {
    bearer(&auth)?;
    let tools = sqlx::query_as::<_, Tool>("SELECT * FROM tools ORDER BY created_at DESC")
        .fetch_all(&state.db)
        .await?;
    Ok(Json(tools))
}

async fn fetch_tool(db: &Db, id: Uuid) -> Result<Tool, ApiError> {
    sqlx::query_as::<_, Tool>("SELECT * FROM tools WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(ApiError::NotFound("tool"))
}

async fn get_tool(
    State(state): State<AppState>,
    auth: AuthHeader,
    Path(id): Path<Uuid>,
) -> Result<Json<Tool>, ApiError> {
    bearer(&auth)?;
    Ok(Json(fetch_tool(&state.db, id).await?))
}

async fn update_tool(
    State(state): State<AppState>,
    auth: AuthHeader,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateToolReq>,
) -> Result<Json<Tool>, ApiError> {
    bearer(&auth)?;
    let mut bad = Vec::new();
    if req.name.as_deref().map(str::trim) == Some("") {
        bad.push("name".into());
    }
    if let Some(u) = &req.tool_login_url {
        if !is_http_url(u) {
            bad.push("tool_login_url".into());
        }
    }
    if let Some(u) = &req.content_selection_url {
        if !is_http_url(u) {
            bad.push("content_selection_url".into());
        }
    }
    if let Some(uris) = &req.redirect_uris {
        if uris.is_empty() || uris.iter().any(|u| !is_http_url(u)) {
            bad.push("redirect_uris".into());
        }
    }
    if !bad.is_empty() {
        return Err(ApiError::InvalidFields(bad));
    }

    sqlx::query_as::<_, Tool>(
        r#"
        UPDATE tools SET
            name = COALESCE($2, name),
            tool_login_url = COALESCE($3, tool_login_url),
            content_selection_url = COALESCE($4, content_selection_url),
            redirect_uris = COALESCE($5, redirect_uris),
            enable_grade_sync = COALESCE($6, enable_grade_sync),
            enable_nrps = COALESCE($7, enable_nrps),
            deeplink_type = COALESCE($8, deeplink_type),
            custom_params = COALESCE($9, custom_params)
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&req.name)
    .bind(&req.tool_login_url)
    .bind(&req.content_selection_url)
    .bind(&req.redirect_uris)
    .bind(req.enable_grade_sync)
    .bind(req.enable_nrps)
    .bind(req.deeplink_type)
    .bind(&req.custom_params)
    .fetch_optional(&state.db)
    .await?
    .map(Json)
    .ok_or(ApiError::NotFound("tool"))
}

async fn delete_tool(
    State(state): State<AppState>,
    auth: AuthHeader,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    bearer(&auth)?;
    let done = sqlx::query("DELETE FROM tools WHERE id = $1")
        .bind(id)
        .execute(&state.db)
        .await?;
    if done.rows_affected() == 0 {
        return Err(ApiError::NotFound("tool"));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// --- content selection (deep linking) ---

async fn content_selection_launch_init(
    State(state): State<AppState>,
    Query(params): Query<LaunchInitParams>,
) -> Result<Redirect, ApiError> {
    let tool = fetch_tool(&state.db, params.tool_id).await?;

    let custom = tool
        .custom_params
        .as_deref()
        .map(|t| {
            resolve_custom_params(
                t,
                &LaunchContext {
                    user_id: &params.user_id,
                    context_id: &params.context_id,
                    context_type: params.context_type,
                },
            )
        })
        .unwrap_or_default();

    let session = state.sessions.issue(NewLaunchSession {
        purpose: LaunchPurpose::DeepLink,
        target_link_uri: tool.content_selection_url.clone(),
        tool_id: tool.id,
        assignment_id: None,
        user_id: params.user_id.clone(),
        context_id: params.context_id.clone(),
        context_type: params.context_type,
    });

    let hint = MessageHint {
        context_id: params.context_id,
        context_type: params.context_type,
        deep_link: true,
        nonce: session.nonce.clone(),
        resource_link_id: None,
        custom,
    }
    .encode()?;

    let url = login_init_url(
        &tool,
        &state.platform_issuer,
        &params.user_id,
        &tool.content_selection_url,
        &hint,
    );
    tracing::info!(tool_id = %tool.id, context_id = %session.context_id, "content selection launch initiated");
    Ok(Redirect::to(&url))
}

fn content_item_type(raw: &serde_json::Value) -> Result<String, ApiError> {
    let obj = raw.as_object().ok_or(ApiError::MalformedContentItem)?;
    let ty = obj
        .get("type")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or(ApiError::MalformedContentItem)?;
    // a resource link without a launchable url is unusable downstream
    if ty == "ltiResourceLink"
        && obj.get("url").and_then(|v| v.as_str()).filter(|s| !s.is_empty()).is_none()
    {
        return Err(ApiError::MalformedContentItem);
    }
    Ok(ty.to_string())
}

/// An echoed lti_message_hint must name the same nonce as the JWT it
/// rides with; a mismatch means the tool crossed two launches.
fn check_echoed_hint(hint: &Option<String>, nonce: &str) -> Result<(), ApiError> {
    if let Some(raw) = hint {
        let hint = MessageHint::decode(raw)?;
        if hint.nonce != nonce {
            return Err(ApiError::UnknownState);
        }
    }
    Ok(())
}

async fn deep_link_response(
    State(state): State<AppState>,
    Form(form): Form<ToolJwtReturn>,
) -> Result<Json<ContentItem>, ApiError> {
    let nonce = jwt::peek_nonce(&form.jwt)?;
    check_echoed_hint(&form.lti_message_hint, &nonce)?;
    let session = state.sessions.peek(&nonce).ok_or(ApiError::UnknownState)?;
    if session.purpose != LaunchPurpose::DeepLink {
        return Err(ApiError::UnknownState);
    }

    let tool = fetch_tool(&state.db, session.tool_id).await?;
    let claims = state.keysets.verify(&tool, &form.jwt).await?;

    // single-use: burn the nonce only after the signature holds up
    let session = state.sessions.consume(&claims.nonce, Utc::now())?;

    let first = claims
        .content_items
        .first()
        .ok_or(ApiError::MalformedContentItem)?;
    let item_type = content_item_type(first)?;

    let item = if tool.deeplink_type == DeeplinkType::AllowOncePerContext {
        // no-op create when this (tool, context) already holds an item
        let inserted = sqlx::query_as::<_, ContentItem>(
            r#"
            INSERT INTO content_items (id, tool_id, context_id, context_type,
                                       content_item_type, content_item_info)
            SELECT $1, $2, $3, $4, $5, $6
            WHERE NOT EXISTS (
                SELECT 1 FROM content_items WHERE tool_id = $2 AND context_id = $3
            )
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tool.id)
        .bind(&session.context_id)
        .bind(session.context_type)
        .bind(&item_type)
        .bind(first)
        .fetch_optional(&state.db)
        .await?;
        match inserted {
            Some(item) => item,
            None => {
                // most recently created wins for display
                sqlx::query_as::<_, ContentItem>(
                    r#"
                    SELECT * FROM content_items
                    WHERE tool_id = $1 AND context_id = $2
                    ORDER BY created_at DESC LIMIT 1
                    "#,
                )
                .bind(tool.id)
                .bind(&session.context_id)
                .fetch_one(&state.db)
                .await?
            }
        }
    } else {
        sqlx::query_as::<_, ContentItem>(
            r#"
            INSERT INTO content_items (id, tool_id, context_id, context_type,
                                       content_item_type, content_item_info)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tool.id)
        .bind(&session.context_id)
        .bind(session.context_type)
        .bind(&item_type)
        .bind(first)
        .fetch_one(&state.db)
        .await?
    };

    tracing::info!(tool_id = %tool.id, content_item_id = %item.id, "deep link completed");
    Ok(Json(item))
}

// --- assignments ---

fn validate_dates(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<(), ApiError> {
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            return Err(ApiError::Validation("start_date must not be after end_date".into()));
        }
    }
    Ok(())
}

async fn create_assignment(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(req): Json<CreateAssignmentReq>,
) -> Result<(StatusCode, Json<LtiAssignment>), ApiError> {
    bearer(&auth)?;
    if req.lti_assignment_title.trim().is_empty() {
        return Err(ApiError::InvalidFields(vec!["lti_assignment_title".into()]));
    }
    validate_dates(req.start_date, req.end_date)?;
    fetch_tool(&state.db, req.tool_id).await?;

    let a = sqlx::query_as::<_, LtiAssignment>(
        r#"
        INSERT INTO lti_assignments (id, context_id, context_type, lti_assignment_title,
                                     tool_id, max_points, start_date, end_date, due_date)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&req.context_id)
    .bind(req.context_type)
    .bind(&req.lti_assignment_title)
    .bind(req.tool_id)
    .bind(req.max_points)
    .bind(req.start_date)
    .bind(req.end_date)
    .bind(req.due_date)
    .fetch_one(&state.db)
    .await?;

    Ok((StatusCode::CREATED, Json(a)))
}

async fn list_assignments(
    State(state): State<AppState>,
    auth: AuthHeader,
    Query(q): Query<ContextQuery>,
) -> Result<Json<Vec<LtiAssignment>>, ApiError> {
    bearer(&auth)?;
    let rows = sqlx::query_as::<_, LtiAssignment>(
        "SELECT * FROM lti_assignments WHERE context_id = $1 ORDER BY created_at",
    )
    .bind(&q.context_id)
    .fetch_all(&state.db)
    .await?;
    Ok(Json(rows))
}

async fn fetch_assignment(db: &Db, id: Uuid) -> Result<LtiAssignment, ApiError> {
    sqlx::query_as::<_, LtiAssignment>("SELECT * FROM lti_assignments WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?
        .ok_or(ApiError::NotFound("assignment"))
}

async fn get_assignment(
    State(state): State<AppState>,
    auth: AuthHeader,
    Path(id): Path<Uuid>,
) -> Result<Json<LtiAssignment>, ApiError> {
    bearer(&auth)?;
    Ok(Json(fetch_assignment(&state.db, id).await?))
}

async fn update_assignment(
    State(state): State<AppState>,
    auth: AuthHeader,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateAssignmentReq>,
) -> Result<Json<LtiAssignment>, ApiError> {
    bearer(&auth)?;

    let mut tx = state.db.begin().await?;
    let a = sqlx::query_as::<_, LtiAssignment>(
        "SELECT * FROM lti_assignments WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound("assignment"))?;

    let mut status = a.status;
    let mut content_item_id = a.lti_content_item_id;
    if let Some(ci_id) = req.lti_content_item_id {
        assignment::ensure_can_attach(&a)?;
        let item = sqlx::query_as::<_, ContentItem>("SELECT * FROM content_items WHERE id = $1")
            .bind(ci_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(ApiError::NotFound("content item"))?;
        if item.tool_id != a.tool_id || item.context_id != a.context_id {
            return Err(ApiError::Validation(
                "content item belongs to a different tool or context".into(),
            ));
        }
        content_item_id = Some(ci_id);
        status = AssignmentStatus::Linked;
    }

    let title = req.lti_assignment_title.unwrap_or(a.lti_assignment_title);
    if title.trim().is_empty() {
        return Err(ApiError::InvalidFields(vec!["lti_assignment_title".into()]));
    }
    let start = req.start_date.or(a.start_date);
    let end = req.end_date.or(a.end_date);
    validate_dates(start, end)?;

    let updated = sqlx::query_as::<_, LtiAssignment>(
        r#"
        UPDATE lti_assignments SET
            lti_assignment_title = $2, max_points = $3, start_date = $4,
            end_date = $5, due_date = $6, lti_content_item_id = $7,
            status = $8, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&title)
    .bind(req.max_points.or(a.max_points))
    .bind(start)
    .bind(end)
    .bind(req.due_date.or(a.due_date))
    .bind(content_item_id)
    .bind(status)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(updated))
}

async fn publish_assignment(
    State(state): State<AppState>,
    auth: AuthHeader,
    Path(id): Path<Uuid>,
) -> Result<Json<LtiAssignment>, ApiError> {
    let token = bearer(&auth)?;

    // the row lock is held across the provider call so two concurrent
    // publishes cannot both create remote courseWork
    let mut tx = state.db.begin().await?;
    let a = sqlx::query_as::<_, LtiAssignment>(
        "SELECT * FROM lti_assignments WHERE id = $1 FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(ApiError::NotFound("assignment"))?;

    assignment::ensure_can_publish(&a)?;

    let link = format!(
        "{}/classroom-shim/launch-assignment?lti_assignment_id={}",
        state.base_url, a.id
    );
    let body = CourseWorkCreate {
        title: a.lti_assignment_title.clone(),
        max_points: a.max_points,
        link,
        due_date: a.due_date,
    };
    // provider failure drops the transaction: state stays LINKED and the
    // provider's status/message go back to the caller untouched
    let cw = state
        .classroom
        .create_course_work(token, &a.context_id, &body)
        .await?;

    let published = sqlx::query_as::<_, LtiAssignment>(
        r#"
        UPDATE lti_assignments
        SET course_work_id = $2, status = 'published', updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&cw.id)
    .fetch_one(&mut *tx)
    .await?;
    tx.commit().await?;

    tracing::info!(assignment_id = %id, course_work_id = %cw.id, "assignment published");
    Ok(Json(published))
}

async fn delete_assignment(
    State(state): State<AppState>,
    auth: AuthHeader,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let token = bearer(&auth)?;
    let a = fetch_assignment(&state.db, id).await?;

    // remote first; a remote failure must not block local cleanup
    let mut warning = None;
    if let (AssignmentStatus::Published, Some(cw)) = (a.status, a.course_work_id.as_deref()) {
        if let Err(e) = state
            .classroom
            .delete_course_work(token, &a.context_id, cw)
            .await
        {
            tracing::warn!(assignment_id = %id, course_work_id = %cw, error = %e,
                "remote courseWork delete failed; local delete proceeds");
            warning = Some("remote_delete_failed");
        }
    }

    let mut tx = state.db.begin().await?;
    if let Some(cw) = &a.course_work_id {
        sqlx::query("DELETE FROM assignment_analytics WHERE course_work_id = $1")
            .bind(cw)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("DELETE FROM lti_assignments WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let mut body = serde_json::json!({ "deleted": true });
    if let Some(w) = warning {
        body["warning"] = serde_json::Value::String(w.into());
    }
    Ok(Json(body))
}

// --- resource launch ---

async fn initiate_launch(
    state: &AppState,
    assignment_id: Uuid,
    user_id: &str,
) -> Result<(String, LaunchSession), ApiError> {
    let a = fetch_assignment(&state.db, assignment_id).await?;
    let item_id = a.lti_content_item_id.ok_or(ApiError::AssignmentNotLinked)?;
    let item = sqlx::query_as::<_, ContentItem>("SELECT * FROM content_items WHERE id = $1")
        .bind(item_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(ApiError::NotFound("content item"))?;
    let tool = fetch_tool(&state.db, a.tool_id).await?;

    let target = item
        .content_item_info
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or(ApiError::MalformedContentItem)?
        .to_string();

    let custom = tool
        .custom_params
        .as_deref()
        .map(|t| {
            resolve_custom_params(
                t,
                &LaunchContext {
                    user_id,
                    context_id: &a.context_id,
                    context_type: a.context_type,
                },
            )
        })
        .unwrap_or_default();

    let session = state.sessions.issue(NewLaunchSession {
        purpose: LaunchPurpose::ResourceLink,
        target_link_uri: target.clone(),
        tool_id: tool.id,
        assignment_id: Some(a.id),
        user_id: user_id.to_string(),
        context_id: a.context_id.clone(),
        context_type: a.context_type,
    });

    let hint = MessageHint {
        context_id: a.context_id.clone(),
        context_type: a.context_type,
        deep_link: false,
        nonce: session.nonce.clone(),
        resource_link_id: Some(item.id),
        custom,
    }
    .encode()?;

    let url = login_init_url(&tool, &state.platform_issuer, user_id, &target, &hint);
    tracing::info!(assignment_id = %a.id, user_id, "resource launch initiated");
    Ok((url, session))
}

async fn launch_assignment(
    State(state): State<AppState>,
    Query(params): Query<AssignmentLaunchParams>,
) -> Result<Redirect, ApiError> {
    let (url, _) = initiate_launch(&state, params.lti_assignment_id, &params.user_id).await?;
    Ok(Redirect::to(&url))
}

/// Same handshake as launch-assignment, but hands the URL and session
/// material back as JSON for browser-driven test suites that cannot
/// follow a cross-origin redirect.
async fn e2e_resource_launch(
    State(state): State<AppState>,
    Query(params): Query<AssignmentLaunchParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (url, session) =
        initiate_launch(&state, params.lti_assignment_id, &params.user_id).await?;
    Ok(Json(serde_json::json!({
        "url": url,
        "state": session.state,
        "nonce": session.nonce,
    })))
}

async fn launch_response(
    State(state): State<AppState>,
    Form(form): Form<ToolJwtReturn>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let nonce = jwt::peek_nonce(&form.jwt)?;
    check_echoed_hint(&form.lti_message_hint, &nonce)?;
    let session = state.sessions.peek(&nonce).ok_or(ApiError::UnknownState)?;
    if session.purpose != LaunchPurpose::ResourceLink {
        return Err(ApiError::UnknownState);
    }

    let tool = fetch_tool(&state.db, session.tool_id).await?;
    let claims = state.keysets.verify(&tool, &form.jwt).await?;
    let session = state.sessions.consume(&claims.nonce, Utc::now())?;

    tracing::info!(
        tool_id = %tool.id,
        user_id = %session.user_id,
        assignment_id = ?session.assignment_id,
        "resource launch completed"
    );
    Ok(Json(serde_json::json!({ "redirect_url": session.target_link_uri })))
}

// --- grade passback / coursework import ---

async fn course_work_list(
    State(state): State<AppState>,
    auth: AuthHeader,
    Query(q): Query<ContextQuery>,
) -> Result<Json<Vec<crate::classroom::CourseWork>>, ApiError> {
    let token = bearer(&auth)?;
    let list = state.classroom.list_course_work(token, &q.context_id).await?;
    Ok(Json(list))
}

async fn import_grades(
    State(state): State<AppState>,
    auth: AuthHeader,
    Json(req): Json<ImportGradesReq>,
) -> Result<Json<GradeImportSummary>, ApiError> {
    let token = bearer(&auth)?;
    // roster failure fails the whole request; per-user failures below do not
    let students = state.classroom.list_students(token, &req.context_id).await?;

    let mut summary = GradeImportSummary::default();
    for student in students {
        let sub = match state
            .classroom
            .fetch_submission(token, &req.context_id, &req.coursework_id, &student.user_id)
            .await
        {
            Ok(sub) => sub,
            Err(e) => {
                tracing::warn!(user_id = %student.user_id, error = %e, "grade fetch failed");
                summary.push_failed(&student.user_id, e.to_string());
                continue;
            }
        };
        let upsert = sqlx::query(
            r#"
            INSERT INTO assignment_analytics (id, context_id, course_work_id, user_id,
                                              assigned_grade, submission_state)
            VALUES ($1,$2,$3,$4,$5,$6)
            ON CONFLICT (course_work_id, user_id)
            DO UPDATE SET assigned_grade = EXCLUDED.assigned_grade,
                          submission_state = EXCLUDED.submission_state,
                          imported_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.context_id)
        .bind(&req.coursework_id)
        .bind(&student.user_id)
        .bind(sub.assigned_grade)
        .bind(&sub.state)
        .execute(&state.db)
        .await;
        match upsert {
            Ok(_) => summary.push_ok(&student.user_id),
            Err(e) => {
                tracing::warn!(user_id = %student.user_id, error = %e, "analytics upsert failed");
                summary.push_failed(&student.user_id, e.to_string());
            }
        }
    }

    tracing::info!(
        context_id = %req.context_id,
        coursework_id = %req.coursework_id,
        succeeded = summary.succeeded.len(),
        failed = summary.failed.len(),
        "grade import finished"
    );
    Ok(Json(summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool_req() -> RegisterToolReq {
        RegisterToolReq {
            name: "Quiz Tool".into(),
            client_id: "client-123".into(),
            deployment_id: "dep-1".into(),
            issuer: "https://tool.example".into(),
            tool_login_url: "https://tool.example/login".into(),
            public_key_type: PublicKeyType::KeysetUrl,
            tool_keyset_url: Some("https://tool.example/jwks".into()),
            tool_public_key: None,
            content_selection_url: "https://tool.example/select".into(),
            redirect_uris: vec!["https://tool.example/launch".into()],
            enable_grade_sync: false,
            enable_nrps: false,
            deeplink_type: DeeplinkType::AllowEverytime,
            custom_params: None,
        }
    }

    #[test]
    fn valid_tool_passes() {
        assert!(validate_tool_req(&tool_req()).is_empty());
    }

    #[test]
    fn bad_urls_and_empty_redirects_are_flagged() {
        let mut req = tool_req();
        req.tool_login_url = "not a url".into();
        req.redirect_uris = vec![];
        let bad = validate_tool_req(&req);
        assert!(bad.contains(&"tool_login_url".to_string()));
        assert!(bad.contains(&"redirect_uris".to_string()));
    }

    #[test]
    fn exactly_one_key_source_is_enforced() {
        let mut req = tool_req();
        req.tool_public_key = Some("-----BEGIN PUBLIC KEY-----".into());
        let bad = validate_tool_req(&req);
        assert_eq!(bad, vec!["tool_public_key".to_string()]);

        let mut req = tool_req();
        req.public_key_type = PublicKeyType::PublicKey;
        // keyset url still set, public key missing: both fields flagged
        let bad = validate_tool_req(&req);
        assert!(bad.contains(&"tool_public_key".to_string()));
        assert!(bad.contains(&"tool_keyset_url".to_string()));
    }

    #[test]
    fn content_item_requires_type_and_launch_url() {
        let ok = serde_json::json!({
            "type": "ltiResourceLink", "title": "Quiz 1", "url": "https://tool.example/r/1"
        });
        assert_eq!(content_item_type(&ok).unwrap(), "ltiResourceLink");

        let no_url = serde_json::json!({ "type": "ltiResourceLink", "title": "Quiz 1" });
        assert!(matches!(content_item_type(&no_url), Err(ApiError::MalformedContentItem)));

        let no_type = serde_json::json!({ "title": "Quiz 1" });
        assert!(matches!(content_item_type(&no_type), Err(ApiError::MalformedContentItem)));

        assert!(content_item_type(&serde_json::json!("just a string")).is_err());

        // non-resource types carry their own payload; no url requirement
        let html = serde_json::json!({ "type": "html", "html": "<p>hi</p>" });
        assert_eq!(content_item_type(&html).unwrap(), "html");
    }

    #[test]
    fn echoed_hint_must_match_the_jwt_nonce() {
        let hint = MessageHint {
            context_id: "C1".into(),
            context_type: ContextType::Section,
            deep_link: true,
            nonce: "n-1".into(),
            resource_link_id: None,
            custom: Default::default(),
        }
        .encode()
        .unwrap();
        assert!(check_echoed_hint(&Some(hint.clone()), "n-1").is_ok());
        assert!(matches!(
            check_echoed_hint(&Some(hint), "n-2"),
            Err(ApiError::UnknownState)
        ));
        // tools that do not echo the hint are still accepted
        assert!(check_echoed_hint(&None, "n-1").is_ok());
    }

    #[test]
    fn date_order_is_validated() {
        let early = Utc::now();
        let late = early + chrono::Duration::days(7);
        assert!(validate_dates(Some(early), Some(late)).is_ok());
        assert!(validate_dates(Some(late), Some(early)).is_err());
        assert!(validate_dates(None, Some(early)).is_ok());
    }
}
