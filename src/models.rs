use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "public_key_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PublicKeyType {
    KeysetUrl,
    PublicKey,
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "deeplink_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeeplinkType {
    AllowEverytime,
    AllowOncePerContext,
    NotRequired,
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "context_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContextType {
    Section,
    CourseTemplate,
}

impl ContextType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContextType::Section => "section",
            ContextType::CourseTemplate => "course_template",
        }
    }
}

#[derive(sqlx::Type, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "assignment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Draft,
    Linked,
    Published,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct Tool {
    pub id: Uuid,
    pub name: String,
    pub client_id: String,
    pub deployment_id: String,
    pub issuer: String,
    pub tool_login_url: String,
    pub public_key_type: PublicKeyType,
    pub tool_keyset_url: Option<String>,
    pub tool_public_key: Option<String>,
    pub content_selection_url: String,
    pub redirect_uris: Vec<String>,
    pub enable_grade_sync: bool,
    pub enable_nrps: bool,
    pub deeplink_type: DeeplinkType,
    pub custom_params: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct ContentItem {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub context_id: String,
    pub context_type: ContextType,
    pub content_item_type: String,
    // opaque payload from the tool: title, url, type, ...
    pub content_item_info: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
pub struct LtiAssignment {
    pub id: Uuid,
    pub context_id: String,
    pub context_type: ContextType,
    pub lti_assignment_title: String,
    pub tool_id: Uuid,
    pub lti_content_item_id: Option<Uuid>,
    pub course_work_id: Option<String>,
    pub status: AssignmentStatus,
    pub max_points: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// --- request/response bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterToolReq {
    pub name: String,
    pub client_id: String,
    pub deployment_id: String,
    pub issuer: String,
    pub tool_login_url: String,
    pub public_key_type: PublicKeyType,
    pub tool_keyset_url: Option<String>,
    pub tool_public_key: Option<String>,
    pub content_selection_url: String,
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub enable_grade_sync: bool,
    #[serde(default)]
    pub enable_nrps: bool,
    pub deeplink_type: DeeplinkType,
    pub custom_params: Option<String>,
}

/// Patch body for an existing tool. Identity fields (client_id,
/// deployment_id, issuer) are immutable once registered; a patch naming
/// one is rejected outright rather than ignored.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct UpdateToolReq {
    pub name: Option<String>,
    pub tool_login_url: Option<String>,
    pub content_selection_url: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    pub enable_grade_sync: Option<bool>,
    pub enable_nrps: Option<bool>,
    pub deeplink_type: Option<DeeplinkType>,
    pub custom_params: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateAssignmentReq {
    pub context_id: String,
    pub context_type: ContextType,
    pub lti_assignment_title: String,
    pub tool_id: Uuid,
    pub max_points: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
}

/// Patch body for an assignment. tool_id and context_id are immutable;
/// changing either is delete + recreate, so a patch naming them is
/// rejected outright.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct UpdateAssignmentReq {
    pub lti_assignment_title: Option<String>,
    pub max_points: Option<f64>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub due_date: Option<DateTime<Utc>>,
    pub lti_content_item_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct LaunchInitParams {
    pub tool_id: Uuid,
    pub user_id: String,
    pub context_id: String,
    pub context_type: ContextType,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct AssignmentLaunchParams {
    pub lti_assignment_id: Uuid,
    pub user_id: String,
}

/// Form body a tool POSTs back after deep linking or launch. Tools echo
/// the opaque lti_message_hint they were launched with; when present it
/// must agree with the session named by the JWT's nonce.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ToolJwtReturn {
    #[serde(rename = "JWT")]
    pub jwt: String,
    #[serde(default)]
    pub lti_message_hint: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ImportGradesReq {
    pub context_id: String,
    pub coursework_id: String,
}
