use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Json, Query};
use axum::http::StatusCode;
use serde::Deserialize;

use uninexus_core::{MembershipId, PermissionId, RoleId, UserId};
use uninexus_directory::{BulkAction, MemberStatus};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrganizationRequest {
    pub name: String,
    pub description: Option<String>,
    pub industry: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePermissionRequest {
    pub name: String,
    pub description: Option<String>,
    /// One of the category names; defaults to `other`.
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePermissionRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permission_ids: Vec<PermissionId>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRolesRequest {
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Deserialize)]
pub struct SetMemberStatusRequest {
    pub status: MemberStatus,
}

#[derive(Debug, Deserialize)]
pub struct BulkMembersRequest {
    pub member_ids: Vec<MembershipId>,
    #[serde(flatten)]
    pub action: BulkAction,
}

#[derive(Debug, Deserialize)]
pub struct CreateInvitationRequest {
    pub email: String,
    pub role_id: RoleId,
    /// Overrides the configured invitation lifetime; `1..=8760`.
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApproveJoinRequestRequest {
    #[serde(default)]
    pub role_ids: Vec<RoleId>,
}

// -------------------------
// Query DTOs
// -------------------------

#[derive(Debug, Default, Deserialize)]
pub struct PermissionListQuery {
    pub category: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MemberListQuery {
    pub status: Option<String>,
    pub search: Option<String>,
    pub role_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinRequestListQuery {
    pub status: Option<String>,
}

// -------------------------
// Extraction helpers
// -------------------------

/// Unwrap a JSON body, turning a rejection into a `validation_error` response.
pub fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, axum::response::Response> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            rejection.body_text(),
        )
    })
}

pub fn query<T>(params: Result<Query<T>, QueryRejection>) -> Result<T, axum::response::Response> {
    params.map(|Query(value)| value).map_err(|rejection| {
        errors::json_error(
            StatusCode::BAD_REQUEST,
            "validation_error",
            rejection.body_text(),
        )
    })
}

/// Parse an optional enum-valued parameter via its `FromStr`.
pub fn parse_opt<T>(raw: Option<&str>) -> Result<Option<T>, axum::response::Response>
where
    T: std::str::FromStr<Err = uninexus_core::DomainError>,
{
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(errors::domain_error_to_response))
        .transpose()
}

#[cfg(test)]
mod tests {
    use uninexus_directory::PermissionCategory;

    use super::*;

    #[test]
    fn bulk_request_flattens_action() {
        let id = MembershipId::new();
        let raw = serde_json::json!({
            "member_ids": [id],
            "action": "deactivate",
        });
        let req: BulkMembersRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(req.member_ids, vec![id]);
        assert_eq!(req.action, BulkAction::Deactivate);
    }

    #[test]
    fn blank_filters_are_ignored() {
        assert_eq!(parse_opt::<PermissionCategory>(Some("  ")).unwrap(), None);
        assert_eq!(
            parse_opt::<PermissionCategory>(Some("Billing")).unwrap(),
            Some(PermissionCategory::Billing)
        );
        assert!(parse_opt::<PermissionCategory>(Some("nope")).is_err());
    }
}
