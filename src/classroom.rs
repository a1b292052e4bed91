//! Thin client for the remote classroom provider.
//!
//! Every call is addressed with the caller's own bearer token; the shim
//! never stores provider credentials. Non-2xx responses surface the
//! provider's status and body verbatim as `RemoteProvider` errors and are
//! never retried here (a retried courseWork create can duplicate remote
//! state).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseWork {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub max_points: Option<f64>,
    #[serde(default)]
    pub alternate_link: Option<String>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseWorkCreate {
    pub title: String,
    pub max_points: Option<f64>,
    pub link: String,
    pub due_date: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub user_id: String,
    #[serde(default)]
    pub full_name: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    pub user_id: String,
    #[serde(default)]
    pub assigned_grade: Option<f64>,
    pub state: String,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct CourseWorkList {
    #[serde(default)]
    course_work: Vec<CourseWork>,
}

#[derive(Deserialize, Default)]
struct StudentList {
    #[serde(default)]
    students: Vec<Student>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct SubmissionList {
    #[serde(default)]
    student_submissions: Vec<Submission>,
}

pub struct ClassroomClient {
    http: reqwest::Client,
    base_url: String,
}

fn unreachable_err(e: reqwest::Error) -> ApiError {
    ApiError::RemoteProvider { status: 502, message: format!("provider unreachable: {e}") }
}

async fn check(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    Err(ApiError::RemoteProvider { status, message })
}

impl ClassroomClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub async fn list_course_work(
        &self,
        token: &str,
        context_id: &str,
    ) -> Result<Vec<CourseWork>, ApiError> {
        let url = format!("{}/courses/{}/courseWork", self.base_url, context_id);
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(unreachable_err)?;
        let list: CourseWorkList = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("provider response parse: {e}")))?;
        Ok(list.course_work)
    }

    pub async fn create_course_work(
        &self,
        token: &str,
        context_id: &str,
        body: &CourseWorkCreate,
    ) -> Result<CourseWork, ApiError> {
        let url = format!("{}/courses/{}/courseWork", self.base_url, context_id);
        let resp = self
            .http
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(unreachable_err)?;
        check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("provider response parse: {e}")))
    }

    pub async fn delete_course_work(
        &self,
        token: &str,
        context_id: &str,
        course_work_id: &str,
    ) -> Result<(), ApiError> {
        let url = format!(
            "{}/courses/{}/courseWork/{}",
            self.base_url, context_id, course_work_id
        );
        let resp = self
            .http
            .delete(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(unreachable_err)?;
        check(resp).await?;
        Ok(())
    }

    pub async fn list_students(
        &self,
        token: &str,
        context_id: &str,
    ) -> Result<Vec<Student>, ApiError> {
        let url = format!("{}/courses/{}/students", self.base_url, context_id);
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(unreachable_err)?;
        let list: StudentList = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("provider response parse: {e}")))?;
        Ok(list.students)
    }

    /// One user's submission for one courseWork. A user with no submission
    /// yet comes back as an ungraded "new" row rather than an error.
    pub async fn fetch_submission(
        &self,
        token: &str,
        context_id: &str,
        course_work_id: &str,
        user_id: &str,
    ) -> Result<Submission, ApiError> {
        let url = format!(
            "{}/courses/{}/courseWork/{}/studentSubmissions?userId={}",
            self.base_url, context_id, course_work_id, user_id
        );
        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(unreachable_err)?;
        let list: SubmissionList = check(resp)
            .await?
            .json()
            .await
            .map_err(|e| ApiError::Internal(format!("provider response parse: {e}")))?;
        Ok(list.student_submissions.into_iter().next().unwrap_or(Submission {
            user_id: user_id.to_string(),
            assigned_grade: None,
            state: "new".into(),
        }))
    }
}

// --- grade import bookkeeping ---

#[derive(Serialize, Debug, Default)]
pub struct GradeImportSummary {
    pub succeeded: Vec<String>,
    pub failed: Vec<GradeImportFailure>,
}

#[derive(Serialize, Debug)]
pub struct GradeImportFailure {
    pub user: String,
    pub reason: String,
}

impl GradeImportSummary {
    pub fn push_ok(&mut self, user: &str) {
        self.succeeded.push(user.to_string());
    }

    pub fn push_failed(&mut self, user: &str, reason: String) {
        self.failed.push(GradeImportFailure { user: user.to_string(), reason });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_keeps_both_sides() {
        let mut summary = GradeImportSummary::default();
        summary.push_ok("u1");
        summary.push_failed("u2", "provider error (500): boom".into());
        summary.push_ok("u3");
        assert_eq!(summary.succeeded, vec!["u1", "u3"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].user, "u2");
    }

    #[test]
    fn summary_serializes_with_stable_shape() {
        let mut summary = GradeImportSummary::default();
        summary.push_ok("u1");
        summary.push_failed("u2", "timeout".into());
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["succeeded"][0], "u1");
        assert_eq!(json["failed"][0]["user"], "u2");
        assert_eq!(json["failed"][0]["reason"], "timeout");
    }

    #[test]
    fn course_work_list_parses_provider_shape() {
        let raw = serde_json::json!({
            "courseWork": [
                { "id": "CW1", "title": "Quiz 1", "maxPoints": 100.0,
                  "alternateLink": "https://classroom.example/cw/CW1" },
                { "id": "CW2", "title": "Essay" }
            ]
        });
        let list: CourseWorkList = serde_json::from_value(raw).unwrap();
        assert_eq!(list.course_work.len(), 2);
        assert_eq!(list.course_work[0].max_points, Some(100.0));
        assert_eq!(list.course_work[1].max_points, None);
    }

    #[test]
    fn empty_submission_list_degrades_to_new() {
        let list: SubmissionList = serde_json::from_value(serde_json::json!({})).unwrap();
        assert!(list.student_submissions.is_empty());
    }
}
