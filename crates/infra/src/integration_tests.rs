//! Integration tests for the directory services over the in-memory store.
//!
//! Verifies:
//! - Organization bootstrap seeds permissions, default roles and the owner
//! - Role names are unique per organization only
//! - Role permission sets round-trip regardless of input order
//! - Referenced roles and permissions cannot be deleted
//! - Invitation accept/expiry windows driven by a manual clock
//! - Concurrent accepts of one token create exactly one membership
//! - Resend rotates the token, sweep is idempotent
//! - Bulk member actions are all-or-nothing
//! - Join request approval creates the membership once, requesters may withdraw
//! - Single-member add, role replace, status change and removal
//! - Invitation lifetimes that overflow the clock are rejected

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};

    use uninexus_auth::AuthenticatedUser;
    use uninexus_core::{Clock, DomainError, ManualClock, MembershipId, OrganizationId, UserId};
    use uninexus_directory::{
        ADMIN_ROLE, BulkAction, InvitationStatus, MEMBER_ROLE, MemberFilter, MemberStatus,
        PermissionCategory, RolePatch,
    };

    use crate::services::{DirectoryServices, InvitationSettings};
    use crate::store::InMemoryDirectoryStore;

    struct Harness {
        services: DirectoryServices,
        clock: Arc<ManualClock>,
    }

    fn setup() -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
        ));
        let store = Arc::new(InMemoryDirectoryStore::new());
        let services = DirectoryServices::new(store, clock.clone(), InvitationSettings::default());
        Harness { services, clock }
    }

    fn identity(email: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            user_id: UserId::new(),
            email: email.to_string(),
            name: None,
        }
    }

    impl Harness {
        async fn user(&self, email: &str) -> AuthenticatedUser {
            let who = identity(email);
            self.services.users.sync(&who).await.unwrap();
            who
        }

        async fn organization(&self, name: &str, owner: &AuthenticatedUser) -> OrganizationId {
            self.services
                .organizations
                .create(name, None, None, owner.user_id)
                .await
                .unwrap()
                .id
        }

        async fn role_id(&self, org: OrganizationId, name: &str) -> uninexus_core::RoleId {
            self.services
                .roles
                .list(org)
                .await
                .unwrap()
                .into_iter()
                .find(|r| r.name == name)
                .map(|r| r.id)
                .unwrap()
        }
    }

    #[tokio::test]
    async fn creating_organization_seeds_owner_and_defaults() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;

        let roles = h.services.roles.list(org).await.unwrap();
        let names: Vec<_> = roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec![ADMIN_ROLE, MEMBER_ROLE]);

        let permissions = h.services.permissions.list(org, None).await.unwrap();
        assert_eq!(permissions.len(), uninexus_auth::builtin::ALL.len());

        let access = h
            .services
            .members
            .access(org, owner.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(access.roles, vec![ADMIN_ROLE.to_string()]);
        assert!(access.permissions.iter().any(|p| p == "manage_roles"));

        let stats = h.services.organizations.stats(org).await.unwrap();
        assert_eq!(stats.total_members, 1);
        assert_eq!(stats.active_members, 1);
        assert_eq!(stats.roles, 2);

        let mine = h
            .services
            .organizations
            .list_for_user(owner.user_id)
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
    }

    #[tokio::test]
    async fn organization_names_are_unique() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        h.organization("Acme", &owner).await;

        let err = h
            .services
            .organizations
            .create("Acme", None, None, owner.user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateName(_)));
    }

    #[tokio::test]
    async fn role_names_are_unique_within_an_organization_only() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let acme = h.organization("Acme", &owner).await;
        let globex = h.organization("Globex", &owner).await;

        h.services
            .roles
            .create(acme, "Editor", None, vec![])
            .await
            .unwrap();
        let err = h
            .services
            .roles
            .create(acme, "Editor", None, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateName(_)));

        h.services
            .roles
            .create(globex, "Editor", None, vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn role_permissions_round_trip_regardless_of_order() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;

        let mut ids: Vec<_> = h
            .services
            .permissions
            .list(org, None)
            .await
            .unwrap()
            .into_iter()
            .take(3)
            .map(|p| p.id)
            .collect();
        ids.reverse();
        ids.push(ids[0]);

        let role = h
            .services
            .roles
            .create(org, "Reviewer", None, ids.clone())
            .await
            .unwrap();
        assert_eq!(role.permissions.len(), 3);

        ids.sort();
        ids.dedup();
        let mut stored: Vec<_> = h
            .services
            .roles
            .get(org, role.id)
            .await
            .unwrap()
            .permissions
            .into_iter()
            .map(|p| p.id)
            .collect();
        stored.sort();
        assert_eq!(stored, ids);
    }

    #[tokio::test]
    async fn roles_cannot_reference_another_organizations_permissions() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let acme = h.organization("Acme", &owner).await;
        let globex = h.organization("Globex", &owner).await;

        let foreign = h
            .services
            .permissions
            .create(globex, "export_reports", None, PermissionCategory::Analytics)
            .await
            .unwrap();
        let err = h
            .services
            .roles
            .create(acme, "Analyst", None, vec![foreign.id])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::CrossTenantReference(_)));

        let globex_admin = h.role_id(globex, ADMIN_ROLE).await;
        let err = h
            .services
            .invitations
            .create(acme, "x@acme.test", globex_admin, owner.user_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::CrossTenantReference(_)));
    }

    #[tokio::test]
    async fn referenced_permission_cannot_be_deleted() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;

        let permission = h
            .services
            .permissions
            .create(org, "export_reports", None, PermissionCategory::Analytics)
            .await
            .unwrap();
        let role = h
            .services
            .roles
            .create(org, "Analyst", None, vec![permission.id])
            .await
            .unwrap();

        let err = h
            .services
            .permissions
            .delete(org, permission.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        h.services
            .roles
            .update(
                org,
                role.id,
                RolePatch {
                    permission_ids: Some(vec![]),
                    ..RolePatch::default()
                },
            )
            .await
            .unwrap();
        h.services
            .permissions
            .delete(org, permission.id)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn role_in_use_cannot_be_deleted() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let admin = h.role_id(org, ADMIN_ROLE).await;

        let err = h.services.roles.delete(org, admin).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let spare = h
            .services
            .roles
            .create(org, "Spare", None, vec![])
            .await
            .unwrap();
        h.services
            .invitations
            .create(org, "new@acme.test", spare.id, owner.user_id, None)
            .await
            .unwrap();
        let err = h.services.roles.delete(org, spare.id).await.unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[tokio::test]
    async fn invitation_end_to_end_grants_role() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let view = h
            .services
            .permissions
            .list(org, None)
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.name == "view_members")
            .unwrap();
        let viewer = h
            .services
            .roles
            .create(org, "Viewer", None, vec![view.id])
            .await
            .unwrap();

        let issued = h
            .services
            .invitations
            .create(org, "  Dana@Acme.test ", viewer.id, owner.user_id, None)
            .await
            .unwrap();
        assert_eq!(issued.invitation.email, "dana@acme.test");
        assert!(issued.accept_link.ends_with(issued.invitation.token.as_str()));

        let token = issued.invitation.token.as_str().to_string();
        let details = h.services.invitations.resolve(&token).await.unwrap();
        assert_eq!(details.organization_name, "Acme");
        assert_eq!(details.role_name, "Viewer");

        let dana = h.user("dana@acme.test").await;
        let membership = h.services.invitations.accept(&token, &dana).await.unwrap();
        assert!(membership.role_ids.contains(&viewer.id));

        let access = h
            .services
            .members
            .access(org, dana.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(access.permissions, vec!["view_members".to_string()]);

        let listed = h.services.invitations.list(org).await.unwrap();
        assert_eq!(listed[0].status, InvitationStatus::Accepted);

        let err = h.services.invitations.resolve(&token).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn duplicate_pending_invitation_is_rejected() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;

        h.services
            .invitations
            .create(org, "dana@acme.test", member, owner.user_id, None)
            .await
            .unwrap();
        let err = h
            .services
            .invitations
            .create(org, "DANA@acme.test", member, owner.user_id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::PendingInvitationExists(_)));

        let err = h
            .services
            .invitations
            .create(org, "owner@acme.test", member, owner.user_id, None)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::AlreadyMember);
    }

    #[tokio::test]
    async fn expired_invitation_cannot_be_resolved_or_accepted() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;

        let issued = h
            .services
            .invitations
            .create(org, "dana@acme.test", member, owner.user_id, Some(Duration::hours(1)))
            .await
            .unwrap();
        let token = issued.invitation.token.as_str().to_string();
        let dana = h.user("dana@acme.test").await;

        h.clock.advance(Duration::hours(1));
        h.services.invitations.resolve(&token).await.unwrap();

        h.clock.advance(Duration::hours(1));
        let err = h.services.invitations.accept(&token, &dana).await.unwrap_err();
        assert_eq!(err, DomainError::Expired);

        let err = h.services.invitations.resolve(&token).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        assert!(
            h.services
                .members
                .access(org, dana.user_id)
                .await
                .unwrap()
                .is_none()
        );
        let listed = h.services.invitations.list(org).await.unwrap();
        assert_eq!(listed[0].status, InvitationStatus::Expired);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_accepts_create_one_membership() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;
        let issued = h
            .services
            .invitations
            .create(org, "dana@acme.test", member, owner.user_id, None)
            .await
            .unwrap();
        let token = issued.invitation.token.as_str().to_string();
        let dana = h.user("dana@acme.test").await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let services = h.services.clone();
                let token = token.clone();
                let dana = dana.clone();
                tokio::spawn(async move { services.invitations.accept(&token, &dana).await })
            })
            .collect();

        let mut accepted = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(err) => assert_eq!(err, DomainError::AlreadyProcessed),
            }
        }
        assert_eq!(accepted, 1);

        let members = h
            .services
            .members
            .list(org, &MemberFilter::default())
            .await
            .unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn accept_requires_matching_email() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;
        let issued = h
            .services
            .invitations
            .create(org, "dana@acme.test", member, owner.user_id, None)
            .await
            .unwrap();
        let mallory = h.user("mallory@acme.test").await;

        let err = h
            .services
            .invitations
            .accept(issued.invitation.token.as_str(), &mallory)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[tokio::test]
    async fn resend_rotates_token() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;
        let issued = h
            .services
            .invitations
            .create(org, "dana@acme.test", member, owner.user_id, None)
            .await
            .unwrap();
        let old = issued.invitation.token.as_str().to_string();

        h.clock.advance(Duration::hours(24));
        let resent = h
            .services
            .invitations
            .resend(org, issued.invitation.id)
            .await
            .unwrap();
        assert_ne!(resent.invitation.token.as_str(), old);
        assert_eq!(
            resent.invitation.expires_at,
            h.clock.now() + Duration::hours(168)
        );

        let err = h.services.invitations.resolve(&old).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
        h.services
            .invitations
            .resolve(resent.invitation.token.as_str())
            .await
            .unwrap();

        h.services
            .invitations
            .cancel(org, issued.invitation.id)
            .await
            .unwrap();
        let err = h
            .services
            .invitations
            .resend(org, issued.invitation.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));
    }

    #[tokio::test]
    async fn sweep_expires_due_invitations_once() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;
        for email in ["a@acme.test", "b@acme.test"] {
            h.services
                .invitations
                .create(org, email, member, owner.user_id, Some(Duration::hours(1)))
                .await
                .unwrap();
        }
        h.services
            .invitations
            .create(org, "c@acme.test", member, owner.user_id, None)
            .await
            .unwrap();

        assert_eq!(h.services.invitations.expire_due().await.unwrap(), 0);
        h.clock.advance(Duration::hours(2));
        assert_eq!(h.services.invitations.expire_due().await.unwrap(), 2);
        assert_eq!(h.services.invitations.expire_due().await.unwrap(), 0);

        let stats = h.services.organizations.stats(org).await.unwrap();
        assert_eq!(stats.pending_invitations, 1);
    }

    #[tokio::test]
    async fn bulk_actions_are_all_or_nothing() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;

        let mut ids = Vec::new();
        for email in ["a@acme.test", "b@acme.test"] {
            let who = h.user(email).await;
            let view = h
                .services
                .members
                .add(org, who.user_id, vec![member])
                .await
                .unwrap();
            ids.push(view.id);
        }

        let missing = MembershipId::new();
        let err = h
            .services
            .members
            .bulk(org, &[ids[0], missing], BulkAction::Deactivate)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::BatchRejected(vec![missing.to_string()]));

        let inactive = MemberFilter {
            status: Some(MemberStatus::Inactive),
            ..MemberFilter::default()
        };
        assert!(h.services.members.list(org, &inactive).await.unwrap().is_empty());

        let outcome = h
            .services
            .members
            .bulk(org, &ids, BulkAction::Deactivate)
            .await
            .unwrap();
        assert_eq!(outcome.affected, 2);
        assert_eq!(h.services.members.list(org, &inactive).await.unwrap().len(), 2);

        let err = h
            .services
            .members
            .bulk(org, &[], BulkAction::Remove)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[tokio::test]
    async fn join_request_approval_creates_membership_once() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let dana = h.user("dana@acme.test").await;

        let request = h
            .services
            .join_requests
            .create(org, dana.user_id)
            .await
            .unwrap();
        let err = h
            .services
            .join_requests
            .create(org, dana.user_id)
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::PendingJoinRequestExists);

        let membership = h
            .services
            .join_requests
            .approve(org, request.id, vec![])
            .await
            .unwrap();
        let member_role = h.role_id(org, MEMBER_ROLE).await;
        assert!(membership.role_ids.contains(&member_role));

        let err = h
            .services
            .join_requests
            .approve(org, request.id, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidState(_)));

        let members = h
            .services
            .members
            .list(org, &MemberFilter::default())
            .await
            .unwrap();
        assert_eq!(members.len(), 2);
    }

    #[tokio::test]
    async fn foreign_ids_look_missing_through_another_organization() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let acme = h.organization("Acme", &owner).await;
        let globex = h.organization("Globex", &owner).await;
        let globex_member = h.role_id(globex, MEMBER_ROLE).await;

        let err = h.services.roles.get(acme, globex_member).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[tokio::test]
    async fn permission_names_are_unique_within_an_organization() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let acme = h.organization("Acme", &owner).await;
        let globex = h.organization("Globex", &owner).await;

        h.services
            .permissions
            .create(acme, "export_reports", None, PermissionCategory::Analytics)
            .await
            .unwrap();
        let err = h
            .services
            .permissions
            .create(acme, "export_reports", None, PermissionCategory::Other)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::DuplicateName(_)));

        h.services
            .permissions
            .create(globex, "export_reports", None, PermissionCategory::Analytics)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn adding_an_existing_member_fails() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;
        let dana = h.user("dana@acme.test").await;

        h.services
            .members
            .add(org, dana.user_id, vec![member])
            .await
            .unwrap();
        let err = h
            .services
            .members
            .add(org, dana.user_id, vec![])
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::AlreadyMember);

        let err = h
            .services
            .members
            .add(org, owner.user_id, vec![])
            .await
            .unwrap_err();
        assert_eq!(err, DomainError::AlreadyMember);
    }

    #[tokio::test]
    async fn member_roles_must_belong_to_the_organization() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let acme = h.organization("Acme", &owner).await;
        let globex = h.organization("Globex", &owner).await;
        let acme_member = h.role_id(acme, MEMBER_ROLE).await;
        let globex_admin = h.role_id(globex, ADMIN_ROLE).await;
        let dana = h.user("dana@acme.test").await;

        let err = h
            .services
            .members
            .add(acme, dana.user_id, vec![globex_admin])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::CrossTenantReference(_)));
        assert!(h.services.members.access(acme, dana.user_id).await.unwrap().is_none());

        let view = h
            .services
            .members
            .add(acme, dana.user_id, vec![acme_member])
            .await
            .unwrap();
        let err = h
            .services
            .members
            .update_roles(acme, view.id, vec![acme_member, globex_admin])
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::CrossTenantReference(_)));

        let access = h
            .services
            .members
            .access(acme, dana.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(access.roles, vec![MEMBER_ROLE.to_string()]);
    }

    #[tokio::test]
    async fn updating_member_roles_replaces_the_set() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;
        let admin = h.role_id(org, ADMIN_ROLE).await;
        let dana = h.user("dana@acme.test").await;

        let view = h
            .services
            .members
            .add(org, dana.user_id, vec![member])
            .await
            .unwrap();

        let updated = h
            .services
            .members
            .update_roles(org, view.id, vec![admin])
            .await
            .unwrap();
        let names: Vec<_> = updated.roles.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec![ADMIN_ROLE]);

        let cleared = h
            .services
            .members
            .update_roles(org, view.id, vec![])
            .await
            .unwrap();
        assert!(cleared.roles.is_empty());

        let access = h
            .services
            .members
            .access(org, dana.user_id)
            .await
            .unwrap()
            .unwrap();
        assert!(access.roles.is_empty());
        assert!(access.permissions.is_empty());
    }

    #[tokio::test]
    async fn deactivated_member_keeps_membership_until_removed() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;
        let dana = h.user("dana@acme.test").await;

        let view = h
            .services
            .members
            .add(org, dana.user_id, vec![member])
            .await
            .unwrap();

        let inactive = h
            .services
            .members
            .set_active(org, view.id, false)
            .await
            .unwrap();
        assert_eq!(inactive.status, MemberStatus::Inactive);
        let active = h
            .services
            .members
            .set_active(org, view.id, true)
            .await
            .unwrap();
        assert_eq!(active.status, MemberStatus::Active);

        h.services.members.remove(org, view.id).await.unwrap();
        assert!(h.services.members.access(org, dana.user_id).await.unwrap().is_none());
        let err = h.services.members.remove(org, view.id).await.unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));

        let profile = h.services.users.get(dana.user_id).await.unwrap();
        assert_eq!(profile.email, "dana@acme.test");
    }

    #[tokio::test]
    async fn member_list_filters_by_search_and_role() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;
        let admin = h.role_id(org, ADMIN_ROLE).await;
        for email in ["dana@acme.test", "erin@acme.test"] {
            let who = h.user(email).await;
            h.services
                .members
                .add(org, who.user_id, vec![member])
                .await
                .unwrap();
        }

        let by_search = MemberFilter {
            search: Some("  DANA ".to_string()),
            ..MemberFilter::default()
        };
        let found = h.services.members.list(org, &by_search).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user.email, "dana@acme.test");

        let by_role = MemberFilter {
            role_id: Some(member),
            ..MemberFilter::default()
        };
        assert_eq!(h.services.members.list(org, &by_role).await.unwrap().len(), 2);

        let admins = MemberFilter {
            role_id: Some(admin),
            ..MemberFilter::default()
        };
        let found = h.services.members.list(org, &admins).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user.email, "owner@acme.test");

        let combined = MemberFilter {
            search: Some("erin".to_string()),
            role_id: Some(admin),
            ..MemberFilter::default()
        };
        assert!(h.services.members.list(org, &combined).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn overflowing_invitation_lifetime_is_rejected() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let member = h.role_id(org, MEMBER_ROLE).await;

        let err = h
            .services
            .invitations
            .create(
                org,
                "dana@acme.test",
                member,
                owner.user_id,
                Some(Duration::hours(1_000_000_000_000)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert!(h.services.invitations.list(org).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn requester_may_withdraw_own_join_request() {
        let h = setup();
        let owner = h.user("owner@acme.test").await;
        let org = h.organization("Acme", &owner).await;
        let dana = h.user("dana@acme.test").await;
        let erin = h.user("erin@acme.test").await;

        let request = h
            .services
            .join_requests
            .create(org, dana.user_id)
            .await
            .unwrap();

        let err = h
            .services
            .join_requests
            .withdraw(org, request.id, erin.user_id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));

        h.services
            .join_requests
            .withdraw(org, request.id, dana.user_id, false)
            .await
            .unwrap();
        assert!(h.services.join_requests.list(org, None).await.unwrap().is_empty());

        // Withdrawn requests no longer block a fresh one.
        let again = h
            .services
            .join_requests
            .create(org, dana.user_id)
            .await
            .unwrap();
        h.services
            .join_requests
            .withdraw(org, again.id, owner.user_id, true)
            .await
            .unwrap();
        let err = h
            .services
            .join_requests
            .withdraw(org, again.id, dana.user_id, false)
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }
}
