//! Lifecycle rules for the assignment state machine.
//!
//! DRAFT -> LINKED (content item attached) -> PUBLISHED (courseWork
//! created remotely). Transitions only move forward; tool and context are
//! frozen at creation, so "move to another tool" is delete + recreate.

use crate::error::ApiError;
use crate::models::{AssignmentStatus, LtiAssignment};

/// A content item may be attached in DRAFT (first link) or re-attached in
/// LINKED (the admin re-ran content selection). Once published the remote
/// courseWork points at the old item, so swapping is rejected.
pub fn ensure_can_attach(a: &LtiAssignment) -> Result<(), ApiError> {
    match a.status {
        AssignmentStatus::Draft | AssignmentStatus::Linked => Ok(()),
        AssignmentStatus::Published => Err(ApiError::Validation(
            "cannot replace the content item of a published assignment".into(),
        )),
    }
}

pub fn ensure_can_publish(a: &LtiAssignment) -> Result<(), ApiError> {
    match a.status {
        AssignmentStatus::Linked if a.lti_content_item_id.is_some() => Ok(()),
        AssignmentStatus::Draft => Err(ApiError::Validation(
            "assignment has no content item attached; run content selection first".into(),
        )),
        AssignmentStatus::Published => Err(ApiError::Validation(
            "assignment is already published".into(),
        )),
        // LINKED without an item should be unreachable; treat as draft
        AssignmentStatus::Linked => Err(ApiError::Validation(
            "assignment has no content item attached; run content selection first".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use crate::models::ContextType;

    fn assignment(status: AssignmentStatus, item: Option<Uuid>) -> LtiAssignment {
        LtiAssignment {
            id: Uuid::new_v4(),
            context_id: "C1".into(),
            context_type: ContextType::Section,
            lti_assignment_title: "Quiz 1".into(),
            tool_id: Uuid::new_v4(),
            lti_content_item_id: item,
            course_work_id: None,
            status,
            max_points: Some(100.0),
            start_date: None,
            end_date: None,
            due_date: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn publish_requires_linked_state() {
        let draft = assignment(AssignmentStatus::Draft, None);
        let err = ensure_can_publish(&draft).unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let linked = assignment(AssignmentStatus::Linked, Some(Uuid::new_v4()));
        ensure_can_publish(&linked).unwrap();

        let published = assignment(AssignmentStatus::Published, Some(Uuid::new_v4()));
        assert!(ensure_can_publish(&published).is_err());
    }

    #[test]
    fn attach_allowed_until_published() {
        ensure_can_attach(&assignment(AssignmentStatus::Draft, None)).unwrap();
        ensure_can_attach(&assignment(AssignmentStatus::Linked, Some(Uuid::new_v4()))).unwrap();
        assert!(ensure_can_attach(&assignment(AssignmentStatus::Published, Some(Uuid::new_v4()))).is_err());
    }
}
