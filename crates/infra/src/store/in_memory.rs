use std::collections::{BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use uninexus_core::{
    InvitationId, JoinRequestId, MembershipId, OrganizationId, PermissionId, RoleId, UserId,
};
use uninexus_directory::{
    BulkAction, Invitation, InvitationStatus, InvitationToken, JoinRequest, JoinRequestStatus,
    JoinRequestView, MemberFilter, Membership, Organization, OrganizationSeed,
    OrganizationStats, Permission, PermissionCategory, Role, UserProfile,
};

use super::r#trait::{Constraint, DirectoryStore, MemberAccess, StoreError, StoreResult};

#[derive(Debug, Default)]
struct State {
    users: HashMap<UserId, UserProfile>,
    organizations: HashMap<OrganizationId, Organization>,
    permissions: HashMap<PermissionId, Permission>,
    roles: HashMap<RoleId, Role>,
    memberships: HashMap<MembershipId, Membership>,
    invitations: HashMap<InvitationId, Invitation>,
    join_requests: HashMap<JoinRequestId, JoinRequest>,
}

impl State {
    fn organization_exists(&self, id: OrganizationId) -> StoreResult<()> {
        if self.organizations.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::NotFound("organization"))
        }
    }

    fn check_organization_name(&self, org: &Organization) -> StoreResult<()> {
        let taken = self
            .organizations
            .values()
            .any(|o| o.id != org.id && o.name == org.name);
        if taken {
            return Err(StoreError::Violation(Constraint::OrganizationName));
        }
        Ok(())
    }

    fn check_permission_name(&self, permission: &Permission) -> StoreResult<()> {
        let taken = self.permissions.values().any(|p| {
            p.id != permission.id
                && p.organization_id == permission.organization_id
                && p.name == permission.name
        });
        if taken {
            return Err(StoreError::Violation(Constraint::PermissionName));
        }
        Ok(())
    }

    fn check_role(&self, role: &Role) -> StoreResult<()> {
        self.organization_exists(role.organization_id)?;
        let taken = self.roles.values().any(|r| {
            r.id != role.id && r.organization_id == role.organization_id && r.name == role.name
        });
        if taken {
            return Err(StoreError::Violation(Constraint::RoleName));
        }
        let scoped = role.permission_ids.iter().all(|id| {
            self.permissions
                .get(id)
                .is_some_and(|p| p.organization_id == role.organization_id)
        });
        if !scoped {
            return Err(StoreError::Violation(Constraint::RolePermissionScope));
        }
        Ok(())
    }

    fn check_roles_in(
        &self,
        organization_id: OrganizationId,
        role_ids: &BTreeSet<RoleId>,
        constraint: Constraint,
    ) -> StoreResult<()> {
        let scoped = role_ids.iter().all(|id| {
            self.roles
                .get(id)
                .is_some_and(|r| r.organization_id == organization_id)
        });
        if !scoped {
            return Err(StoreError::Violation(constraint));
        }
        Ok(())
    }

    fn check_membership(&self, membership: &Membership) -> StoreResult<()> {
        self.organization_exists(membership.organization_id)?;
        if !self.users.contains_key(&membership.user_id) {
            return Err(StoreError::NotFound("user"));
        }
        let duplicate = self.memberships.values().any(|m| {
            m.id != membership.id
                && m.organization_id == membership.organization_id
                && m.user_id == membership.user_id
        });
        if duplicate {
            return Err(StoreError::Violation(Constraint::MembershipUser));
        }
        self.check_roles_in(
            membership.organization_id,
            &membership.role_ids,
            Constraint::MembershipRoleScope,
        )
    }

    fn check_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        self.organization_exists(invitation.organization_id)?;
        let token_taken = self
            .invitations
            .values()
            .any(|i| i.id != invitation.id && i.token == invitation.token);
        if token_taken {
            return Err(StoreError::Violation(Constraint::InvitationToken));
        }
        if invitation.status == InvitationStatus::Pending {
            let pending = self.invitations.values().any(|i| {
                i.id != invitation.id
                    && i.organization_id == invitation.organization_id
                    && i.email == invitation.email
                    && i.status == InvitationStatus::Pending
            });
            if pending {
                return Err(StoreError::Violation(Constraint::PendingInvitation));
            }
        }
        self.check_roles_in(
            invitation.organization_id,
            &BTreeSet::from([invitation.role_id]),
            Constraint::InvitationRoleScope,
        )
    }

    fn check_join_request(&self, request: &JoinRequest) -> StoreResult<()> {
        self.organization_exists(request.organization_id)?;
        if request.status == JoinRequestStatus::Pending {
            let pending = self.join_requests.values().any(|r| {
                r.id != request.id
                    && r.organization_id == request.organization_id
                    && r.user_id == request.user_id
                    && r.status == JoinRequestStatus::Pending
            });
            if pending {
                return Err(StoreError::Violation(Constraint::PendingJoinRequest));
            }
        }
        Ok(())
    }
}

/// In-memory directory store.
///
/// Intended for tests/dev. Every method takes the single lock once, so each
/// call is atomic with respect to every other call.
#[derive(Debug, Default)]
pub struct InMemoryDirectoryStore {
    state: RwLock<State>,
}

impl InMemoryDirectoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

fn sorted_by_name<T>(mut items: Vec<T>, name: impl Fn(&T) -> &str) -> Vec<T> {
    items.sort_by(|a, b| name(a).cmp(name(b)));
    items
}

#[async_trait::async_trait]
impl DirectoryStore for InMemoryDirectoryStore {
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<UserProfile> {
        let mut state = self.write()?;
        let email_taken = state
            .users
            .values()
            .any(|u| u.id != profile.id && u.email == profile.email);
        if email_taken {
            return Err(StoreError::Violation(Constraint::UserEmail));
        }
        let stored = match state.users.get(&profile.id) {
            Some(existing) => UserProfile {
                created_at: existing.created_at,
                ..profile.clone()
            },
            None => profile.clone(),
        };
        state.users.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<UserProfile>> {
        Ok(self.read()?.users.get(&id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserProfile>> {
        let email = email.trim().to_lowercase();
        Ok(self
            .read()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn insert_organization(&self, seed: &OrganizationSeed) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.organizations.contains_key(&seed.organization.id) {
            return Err(StoreError::Backend("duplicate organization id".to_string()));
        }
        state.check_organization_name(&seed.organization)?;
        if !state.users.contains_key(&seed.owner.user_id) {
            return Err(StoreError::NotFound("user"));
        }

        // Validate the whole seed against a scratch copy so a failure leaves
        // nothing behind.
        let mut staged = State {
            users: HashMap::new(),
            organizations: HashMap::from([(seed.organization.id, seed.organization.clone())]),
            permissions: HashMap::new(),
            roles: HashMap::new(),
            memberships: HashMap::new(),
            invitations: HashMap::new(),
            join_requests: HashMap::new(),
        };
        for permission in &seed.permissions {
            staged.check_permission_name(permission)?;
            staged.permissions.insert(permission.id, permission.clone());
        }
        for role in &seed.roles {
            staged.check_role(role)?;
            staged.roles.insert(role.id, role.clone());
        }
        staged.check_roles_in(
            seed.organization.id,
            &seed.owner.role_ids,
            Constraint::MembershipRoleScope,
        )?;

        state
            .organizations
            .insert(seed.organization.id, seed.organization.clone());
        state.permissions.extend(staged.permissions);
        state.roles.extend(staged.roles);
        state.memberships.insert(seed.owner.id, seed.owner.clone());
        Ok(())
    }

    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        Ok(self.read()?.organizations.get(&id).cloned())
    }

    async fn list_organizations_for_user(&self, user_id: UserId) -> StoreResult<Vec<Organization>> {
        let state = self.read()?;
        let orgs = state
            .memberships
            .values()
            .filter(|m| m.user_id == user_id)
            .filter_map(|m| state.organizations.get(&m.organization_id).cloned())
            .collect();
        Ok(sorted_by_name(orgs, |o: &Organization| o.name.as_str()))
    }

    async fn update_organization(&self, organization: &Organization) -> StoreResult<()> {
        let mut state = self.write()?;
        state.organization_exists(organization.id)?;
        state.check_organization_name(organization)?;
        state
            .organizations
            .insert(organization.id, organization.clone());
        Ok(())
    }

    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.organizations.remove(&id).is_none() {
            return Err(StoreError::NotFound("organization"));
        }
        state.permissions.retain(|_, p| p.organization_id != id);
        state.roles.retain(|_, r| r.organization_id != id);
        state.memberships.retain(|_, m| m.organization_id != id);
        state.invitations.retain(|_, i| i.organization_id != id);
        state.join_requests.retain(|_, r| r.organization_id != id);
        Ok(())
    }

    async fn organization_stats(
        &self,
        id: OrganizationId,
        now: DateTime<Utc>,
    ) -> StoreResult<OrganizationStats> {
        let state = self.read()?;
        state.organization_exists(id)?;

        let count = |n: usize| n as u64;
        let members: Vec<&Membership> = state
            .memberships
            .values()
            .filter(|m| m.organization_id == id)
            .collect();
        let active = members.iter().filter(|m| m.is_active()).count();
        Ok(OrganizationStats {
            total_members: count(members.len()),
            active_members: count(active),
            inactive_members: count(members.len() - active),
            roles: count(state.roles.values().filter(|r| r.organization_id == id).count()),
            permissions: count(
                state
                    .permissions
                    .values()
                    .filter(|p| p.organization_id == id)
                    .count(),
            ),
            pending_invitations: count(
                state
                    .invitations
                    .values()
                    .filter(|i| i.organization_id == id && i.is_live(now))
                    .count(),
            ),
            pending_join_requests: count(
                state
                    .join_requests
                    .values()
                    .filter(|r| r.organization_id == id && r.status == JoinRequestStatus::Pending)
                    .count(),
            ),
        })
    }

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        let mut state = self.write()?;
        state.organization_exists(permission.organization_id)?;
        state.check_permission_name(permission)?;
        state.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn get_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        Ok(self.read()?.permissions.get(&id).cloned())
    }

    async fn find_permissions(&self, ids: &BTreeSet<PermissionId>) -> StoreResult<Vec<Permission>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.permissions.get(id).cloned())
            .collect())
    }

    async fn list_permissions(
        &self,
        organization_id: OrganizationId,
        category: Option<PermissionCategory>,
    ) -> StoreResult<Vec<Permission>> {
        let state = self.read()?;
        let permissions = state
            .permissions
            .values()
            .filter(|p| p.organization_id == organization_id)
            .filter(|p| category.is_none_or(|c| p.category == c))
            .cloned()
            .collect();
        Ok(sorted_by_name(permissions, |p: &Permission| p.name.as_str()))
    }

    async fn update_permission(&self, permission: &Permission) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.permissions.get(&permission.id) {
            Some(existing) if existing.organization_id == permission.organization_id => {}
            _ => return Err(StoreError::NotFound("permission")),
        }
        state.check_permission_name(permission)?;
        state.permissions.insert(permission.id, permission.clone());
        Ok(())
    }

    async fn delete_permission(&self, id: PermissionId) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.permissions.contains_key(&id) {
            return Err(StoreError::NotFound("permission"));
        }
        if state.roles.values().any(|r| r.permission_ids.contains(&id)) {
            return Err(StoreError::Violation(Constraint::PermissionInUse));
        }
        state.permissions.remove(&id);
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut state = self.write()?;
        state.check_role(role)?;
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        Ok(self.read()?.roles.get(&id).cloned())
    }

    async fn find_roles(&self, ids: &BTreeSet<RoleId>) -> StoreResult<Vec<Role>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.roles.get(id).cloned())
            .collect())
    }

    async fn list_roles(&self, organization_id: OrganizationId) -> StoreResult<Vec<Role>> {
        let state = self.read()?;
        let roles = state
            .roles
            .values()
            .filter(|r| r.organization_id == organization_id)
            .cloned()
            .collect();
        Ok(sorted_by_name(roles, |r: &Role| r.name.as_str()))
    }

    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.roles.get(&role.id) {
            Some(existing) if existing.organization_id == role.organization_id => {}
            _ => return Err(StoreError::NotFound("role")),
        }
        state.check_role(role)?;
        state.roles.insert(role.id, role.clone());
        Ok(())
    }

    async fn delete_role(&self, id: RoleId) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.roles.contains_key(&id) {
            return Err(StoreError::NotFound("role"));
        }
        let held = state.memberships.values().any(|m| m.role_ids.contains(&id));
        let offered = state
            .invitations
            .values()
            .any(|i| i.role_id == id && i.status == InvitationStatus::Pending);
        if held || offered {
            return Err(StoreError::Violation(Constraint::RoleInUse));
        }
        state.invitations.retain(|_, i| i.role_id != id);
        state.roles.remove(&id);
        Ok(())
    }

    async fn role_member_counts(
        &self,
        organization_id: OrganizationId,
    ) -> StoreResult<HashMap<RoleId, u64>> {
        let state = self.read()?;
        let mut counts = HashMap::new();
        for membership in state
            .memberships
            .values()
            .filter(|m| m.organization_id == organization_id)
        {
            for role_id in &membership.role_ids {
                *counts.entry(*role_id).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }

    async fn insert_membership(&self, membership: &Membership) -> StoreResult<()> {
        let mut state = self.write()?;
        state.check_membership(membership)?;
        state.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    async fn get_membership(&self, id: MembershipId) -> StoreResult<Option<Membership>> {
        Ok(self.read()?.memberships.get(&id).cloned())
    }

    async fn find_membership(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>> {
        Ok(self
            .read()?
            .memberships
            .values()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .cloned())
    }

    async fn list_members(
        &self,
        organization_id: OrganizationId,
        filter: &MemberFilter,
    ) -> StoreResult<Vec<(Membership, UserProfile)>> {
        let state = self.read()?;
        let mut rows: Vec<(Membership, UserProfile)> = state
            .memberships
            .values()
            .filter(|m| m.organization_id == organization_id)
            .filter_map(|m| {
                let user = state.users.get(&m.user_id)?;
                filter
                    .matches(m, user)
                    .then(|| (m.clone(), user.clone()))
            })
            .collect();
        rows.sort_by(|(a, _), (b, _)| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn update_membership(&self, membership: &Membership) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.memberships.get(&membership.id) {
            Some(existing)
                if existing.organization_id == membership.organization_id
                    && existing.user_id == membership.user_id => {}
            _ => return Err(StoreError::NotFound("membership")),
        }
        state.check_roles_in(
            membership.organization_id,
            &membership.role_ids,
            Constraint::MembershipRoleScope,
        )?;
        state.memberships.insert(membership.id, membership.clone());
        Ok(())
    }

    async fn delete_membership(&self, id: MembershipId) -> StoreResult<()> {
        match self.write()?.memberships.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound("membership")),
        }
    }

    async fn touch_membership(&self, id: MembershipId, at: DateTime<Utc>) -> StoreResult<()> {
        let mut state = self.write()?;
        let membership = state
            .memberships
            .get_mut(&id)
            .ok_or(StoreError::NotFound("membership"))?;
        membership.touch(at);
        Ok(())
    }

    async fn bulk_update_members(
        &self,
        organization_id: OrganizationId,
        ids: &[MembershipId],
        action: &BulkAction,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let mut state = self.write()?;
        let missing: Vec<MembershipId> = ids
            .iter()
            .filter(|id| {
                !state
                    .memberships
                    .get(id)
                    .is_some_and(|m| m.organization_id == organization_id)
            })
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::MissingMembers(missing));
        }
        if let BulkAction::SetRoles { role_ids } = action {
            let role_ids: BTreeSet<RoleId> = role_ids.iter().copied().collect();
            state.check_roles_in(organization_id, &role_ids, Constraint::MembershipRoleScope)?;
        }

        let unique: BTreeSet<MembershipId> = ids.iter().copied().collect();
        for id in &unique {
            match action {
                BulkAction::Remove => {
                    state.memberships.remove(id);
                }
                _ => {
                    if let Some(membership) = state.memberships.get_mut(id) {
                        membership.apply_bulk(action, now);
                    }
                }
            }
        }
        Ok(unique.len() as u64)
    }

    async fn member_access(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<MemberAccess>> {
        let state = self.read()?;
        let Some(membership) = state
            .memberships
            .values()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
        else {
            return Ok(None);
        };

        let roles: Vec<&Role> = membership
            .role_ids
            .iter()
            .filter_map(|id| state.roles.get(id))
            .collect();
        let permissions: BTreeSet<String> = roles
            .iter()
            .flat_map(|r| r.permission_ids.iter())
            .filter_map(|id| state.permissions.get(id))
            .map(|p| p.name.clone())
            .collect();
        let mut role_names: Vec<String> = roles.iter().map(|r| r.name.clone()).collect();
        role_names.sort();

        Ok(Some(MemberAccess {
            membership: membership.clone(),
            roles: role_names,
            permissions: permissions.into_iter().collect(),
        }))
    }

    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        let mut state = self.write()?;
        if state.invitations.contains_key(&invitation.id) {
            return Err(StoreError::Backend("duplicate invitation id".to_string()));
        }
        state.check_invitation(invitation)?;
        state.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn get_invitation(&self, id: InvitationId) -> StoreResult<Option<Invitation>> {
        Ok(self.read()?.invitations.get(&id).cloned())
    }

    async fn find_invitation_by_token(
        &self,
        token: &InvitationToken,
    ) -> StoreResult<Option<Invitation>> {
        Ok(self
            .read()?
            .invitations
            .values()
            .find(|i| &i.token == token)
            .cloned())
    }

    async fn find_pending_invitation(
        &self,
        organization_id: OrganizationId,
        email: &str,
    ) -> StoreResult<Option<Invitation>> {
        Ok(self
            .read()?
            .invitations
            .values()
            .find(|i| {
                i.organization_id == organization_id
                    && i.email == email
                    && i.status == InvitationStatus::Pending
            })
            .cloned())
    }

    async fn list_invitations(&self, organization_id: OrganizationId) -> StoreResult<Vec<Invitation>> {
        let state = self.read()?;
        let mut invitations: Vec<Invitation> = state
            .invitations
            .values()
            .filter(|i| i.organization_id == organization_id)
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(invitations)
    }

    async fn save_invitation(
        &self,
        invitation: &Invitation,
        expected: InvitationStatus,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.invitations.get(&invitation.id) {
            None => return Err(StoreError::NotFound("invitation")),
            Some(current) if current.status != expected => {
                return Err(StoreError::Conflict("invitation"));
            }
            Some(_) => {}
        }
        state.check_invitation(invitation)?;
        state.invitations.insert(invitation.id, invitation.clone());
        Ok(())
    }

    async fn accept_invitation(
        &self,
        id: InvitationId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Membership> {
        let mut state = self.write()?;
        let invitation = state
            .invitations
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound("invitation"))?;
        if invitation.status != InvitationStatus::Pending {
            return Err(StoreError::Conflict("invitation"));
        }
        if !state.users.contains_key(&user_id) {
            return Err(StoreError::NotFound("user"));
        }
        state.check_roles_in(
            invitation.organization_id,
            &BTreeSet::from([invitation.role_id]),
            Constraint::MembershipRoleScope,
        )?;

        let existing = state
            .memberships
            .values()
            .find(|m| m.organization_id == invitation.organization_id && m.user_id == user_id)
            .map(|m| m.id);
        let membership = match existing.and_then(|id| state.memberships.get_mut(&id)) {
            Some(membership) => {
                membership.grant_role(invitation.role_id, now);
                membership.clone()
            }
            None => {
                let membership =
                    Membership::new(invitation.organization_id, user_id, [invitation.role_id], now);
                state.memberships.insert(membership.id, membership.clone());
                membership
            }
        };

        if let Some(stored) = state.invitations.get_mut(&id) {
            stored.status = InvitationStatus::Accepted;
            stored.updated_at = now;
        }
        Ok(membership)
    }

    async fn expire_due_invitations(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.write()?;
        let mut expired = 0;
        for invitation in state.invitations.values_mut() {
            if invitation.expire(now) {
                expired += 1;
            }
        }
        Ok(expired)
    }

    async fn insert_join_request(&self, request: &JoinRequest) -> StoreResult<()> {
        let mut state = self.write()?;
        if !state.users.contains_key(&request.user_id) {
            return Err(StoreError::NotFound("user"));
        }
        state.check_join_request(request)?;
        state.join_requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn get_join_request(&self, id: JoinRequestId) -> StoreResult<Option<JoinRequest>> {
        Ok(self.read()?.join_requests.get(&id).cloned())
    }

    async fn list_join_requests(
        &self,
        organization_id: OrganizationId,
        status: Option<JoinRequestStatus>,
    ) -> StoreResult<Vec<JoinRequestView>> {
        let state = self.read()?;
        let mut requests: Vec<JoinRequestView> = state
            .join_requests
            .values()
            .filter(|r| r.organization_id == organization_id)
            .filter(|r| status.is_none_or(|s| r.status == s))
            .map(|r| JoinRequestView {
                request: r.clone(),
                user: state.users.get(&r.user_id).cloned(),
            })
            .collect();
        requests.sort_by(|a, b| {
            b.request
                .created_at
                .cmp(&a.request.created_at)
                .then(b.request.id.cmp(&a.request.id))
        });
        Ok(requests)
    }

    async fn save_join_request(
        &self,
        request: &JoinRequest,
        expected: JoinRequestStatus,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.join_requests.get(&request.id) {
            None => return Err(StoreError::NotFound("join request")),
            Some(current) if current.status != expected => {
                return Err(StoreError::Conflict("join request"));
            }
            Some(_) => {}
        }
        state.check_join_request(request)?;
        state.join_requests.insert(request.id, request.clone());
        Ok(())
    }

    async fn delete_join_request(&self, id: JoinRequestId) -> StoreResult<()> {
        match self.write()?.join_requests.remove(&id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound("join request")),
        }
    }

    async fn approve_join_request(
        &self,
        id: JoinRequestId,
        membership: &Membership,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut state = self.write()?;
        match state.join_requests.get(&id) {
            None => return Err(StoreError::NotFound("join request")),
            Some(request) if request.status != JoinRequestStatus::Pending => {
                return Err(StoreError::Conflict("join request"));
            }
            Some(_) => {}
        }
        state.check_membership(membership)?;
        state.memberships.insert(membership.id, membership.clone());
        if let Some(request) = state.join_requests.get_mut(&id) {
            request.status = JoinRequestStatus::Approved;
            request.updated_at = now;
        }
        Ok(())
    }
}

