//! Postgres-backed directory store.
//!
//! Schema lives in the workspace `migrations/` directory. Every constraint a
//! [`Constraint`] names exists in the schema under a fixed name, so a failed
//! statement is classified from the violated constraint alone.
//!
//! ## Error Mapping
//!
//! | SQLx Error | Constraint | StoreError |
//! |------------|------------|------------|
//! | unique violation (`23505`) | `*_key` | `Violation(..)` for the named constraint |
//! | foreign key violation (`23503`) on insert/update | composite `(organization_id, id)` keys | `Violation(*Scope)` |
//! | foreign key violation (`23503`) on delete | any | `Violation(PermissionInUse / RoleInUse)` |
//! | foreign key violation (`23503`) | `*_organization_fkey`, `*_user_fkey` | `NotFound(..)` |
//! | anything else | | `Backend` |
//!
//! ## Atomicity
//!
//! Multi-row writes (organization seeding, role/permission links, bulk
//! member actions, invitation acceptance, join request approval) run in a
//! single transaction. Status transitions lock the row with `FOR UPDATE` and
//! compare the stored status before writing.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgConnection, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use uninexus_core::{
    DomainError, InvitationId, JoinRequestId, MembershipId, OrganizationId, PermissionId, RoleId,
    UserId,
};
use uninexus_directory::{
    BulkAction, Invitation, InvitationStatus, InvitationToken, JoinRequest, JoinRequestStatus,
    JoinRequestView, MemberFilter, MemberStatus, Membership, Organization, OrganizationSeed,
    OrganizationStats, Permission, PermissionCategory, Role, UserProfile,
};

use super::r#trait::{Constraint, DirectoryStore, MemberAccess, StoreError, StoreResult};

/// Postgres-backed directory store.
///
/// ## Thread Safety
///
/// Uses SQLx connection pool which is thread-safe (Arc + Send + Sync).
///
/// ## Tenant Isolation
///
/// Links between tenant-owned rows carry `organization_id` and reference
/// `(organization_id, id)` on the target, so a cross-tenant link cannot be
/// written even if a caller skips the service-level checks.
#[derive(Debug, Clone)]
pub struct PostgresDirectoryStore {
    pool: Arc<PgPool>,
}

impl PostgresDirectoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ---------------------------------------------------------------------------
// Rows

#[derive(Debug, FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    full_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        UserProfile {
            id: UserId::from_uuid(row.id),
            email: row.email,
            full_name: row.full_name,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct OrganizationRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    industry: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrganizationRow> for Organization {
    fn from(row: OrganizationRow) -> Self {
        Organization {
            id: OrganizationId::from_uuid(row.id),
            name: row.name,
            description: row.description,
            industry: row.industry,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    category: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PermissionRow> for Permission {
    type Error = StoreError;

    fn try_from(row: PermissionRow) -> Result<Self, Self::Error> {
        Ok(Permission {
            id: PermissionId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            name: row.name,
            description: row.description,
            category: decode("permissions.category", &row.category)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: Uuid,
    organization_id: Uuid,
    name: String,
    description: Option<String>,
    permission_ids: Vec<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: RoleId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            name: row.name,
            description: row.description,
            permission_ids: row
                .permission_ids
                .into_iter()
                .map(PermissionId::from_uuid)
                .collect(),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct MembershipRow {
    id: Uuid,
    organization_id: Uuid,
    user_id: Uuid,
    status: String,
    role_ids: Vec<Uuid>,
    last_active: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<MembershipRow> for Membership {
    type Error = StoreError;

    fn try_from(row: MembershipRow) -> Result<Self, Self::Error> {
        Ok(Membership {
            id: MembershipId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            user_id: UserId::from_uuid(row.user_id),
            role_ids: row.role_ids.into_iter().map(RoleId::from_uuid).collect(),
            status: decode("memberships.status", &row.status)?,
            last_active: row.last_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MemberRow {
    #[sqlx(flatten)]
    membership: MembershipRow,
    user_email: String,
    user_full_name: Option<String>,
    user_created_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct InvitationRow {
    id: Uuid,
    organization_id: Uuid,
    email: String,
    role_id: Uuid,
    token: String,
    status: String,
    invited_by: Uuid,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InvitationRow> for Invitation {
    type Error = StoreError;

    fn try_from(row: InvitationRow) -> Result<Self, Self::Error> {
        Ok(Invitation {
            id: InvitationId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            email: row.email,
            role_id: RoleId::from_uuid(row.role_id),
            token: InvitationToken::from_string(row.token),
            status: decode("invitations.status", &row.status)?,
            invited_by: UserId::from_uuid(row.invited_by),
            created_at: row.created_at,
            expires_at: row.expires_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct JoinRequestRow {
    id: Uuid,
    organization_id: Uuid,
    user_id: Uuid,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JoinRequestRow> for JoinRequest {
    type Error = StoreError;

    fn try_from(row: JoinRequestRow) -> Result<Self, Self::Error> {
        Ok(JoinRequest {
            id: JoinRequestId::from_uuid(row.id),
            organization_id: OrganizationId::from_uuid(row.organization_id),
            user_id: UserId::from_uuid(row.user_id),
            status: decode("join_requests.status", &row.status)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct JoinRequestViewRow {
    #[sqlx(flatten)]
    request: JoinRequestRow,
    user_email: Option<String>,
    user_full_name: Option<String>,
    user_created_at: Option<DateTime<Utc>>,
}

fn decode<T>(column: &str, raw: &str) -> StoreResult<T>
where
    T: core::str::FromStr<Err = DomainError>,
{
    raw.parse()
        .map_err(|_| StoreError::Backend(format!("unexpected value {raw:?} in {column}")))
}

// ---------------------------------------------------------------------------
// Queries

const USER_COLUMNS: &str = "id, email, full_name, created_at";
const ORGANIZATION_COLUMNS: &str = "id, name, description, industry, created_at, updated_at";
const PERMISSION_COLUMNS: &str =
    "id, organization_id, name, description, category, created_at, updated_at";
const INVITATION_COLUMNS: &str = "id, organization_id, email, role_id, token, status, invited_by, \
     created_at, expires_at, updated_at";
const JOIN_REQUEST_COLUMNS: &str = "id, organization_id, user_id, status, created_at, updated_at";

fn role_query(filter: &str) -> String {
    format!(
        "SELECT r.id, r.organization_id, r.name, r.description, r.created_at, r.updated_at, \
                COALESCE(array_agg(rp.permission_id) FILTER (WHERE rp.permission_id IS NOT NULL), \
                         ARRAY[]::uuid[]) AS permission_ids \
         FROM roles r \
         LEFT JOIN role_permissions rp ON rp.role_id = r.id \
         WHERE {filter} \
         GROUP BY r.id \
         ORDER BY r.name"
    )
}

fn membership_query(filter: &str) -> String {
    format!(
        "SELECT m.id, m.organization_id, m.user_id, m.status, m.last_active, m.created_at, \
                m.updated_at, \
                COALESCE(array_agg(mr.role_id) FILTER (WHERE mr.role_id IS NOT NULL), \
                         ARRAY[]::uuid[]) AS role_ids \
         FROM memberships m \
         LEFT JOIN member_roles mr ON mr.membership_id = m.id \
         WHERE {filter} \
         GROUP BY m.id"
    )
}

fn uuids<'a, T: 'a>(ids: impl IntoIterator<Item = &'a T>, as_uuid: fn(&T) -> &Uuid) -> Vec<Uuid> {
    ids.into_iter().map(|id| *as_uuid(id)).collect()
}

async fn fetch_membership(
    conn: &mut PgConnection,
    id: MembershipId,
) -> Result<Option<MembershipRow>, sqlx::Error> {
    sqlx::query_as::<_, MembershipRow>(&membership_query("m.id = $1"))
        .bind(id.as_uuid())
        .fetch_optional(conn)
        .await
}

async fn insert_role_row(conn: &mut PgConnection, role: &Role) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO roles (id, organization_id, name, description, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(role.id.as_uuid())
    .bind(role.organization_id.as_uuid())
    .bind(&role.name)
    .bind(&role.description)
    .bind(role.created_at)
    .bind(role.updated_at)
    .execute(&mut *conn)
    .await?;
    replace_role_permissions(conn, role).await
}

async fn replace_role_permissions(conn: &mut PgConnection, role: &Role) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
        .bind(role.id.as_uuid())
        .execute(&mut *conn)
        .await?;
    let ids = uuids(&role.permission_ids, PermissionId::as_uuid);
    sqlx::query(
        r#"
        INSERT INTO role_permissions (organization_id, role_id, permission_id)
        SELECT $1, $2, UNNEST($3::uuid[])
        "#,
    )
    .bind(role.organization_id.as_uuid())
    .bind(role.id.as_uuid())
    .bind(&ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn insert_membership_row(
    conn: &mut PgConnection,
    membership: &Membership,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO memberships (
            id, organization_id, user_id, status, last_active, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(membership.id.as_uuid())
    .bind(membership.organization_id.as_uuid())
    .bind(membership.user_id.as_uuid())
    .bind(membership.status.as_str())
    .bind(membership.last_active)
    .bind(membership.created_at)
    .bind(membership.updated_at)
    .execute(&mut *conn)
    .await?;
    replace_member_roles(conn, membership).await
}

async fn replace_member_roles(
    conn: &mut PgConnection,
    membership: &Membership,
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM member_roles WHERE membership_id = $1")
        .bind(membership.id.as_uuid())
        .execute(&mut *conn)
        .await?;
    let ids = uuids(&membership.role_ids, RoleId::as_uuid);
    sqlx::query(
        r#"
        INSERT INTO member_roles (organization_id, membership_id, role_id)
        SELECT $1, $2, UNNEST($3::uuid[])
        "#,
    )
    .bind(membership.organization_id.as_uuid())
    .bind(membership.id.as_uuid())
    .bind(&ids)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[async_trait::async_trait]
impl DirectoryStore for PostgresDirectoryStore {
    #[instrument(skip(self, profile), fields(user_id = %profile.id), err)]
    async fn upsert_user(&self, profile: &UserProfile) -> StoreResult<UserProfile> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (id, email, full_name, created_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET email = EXCLUDED.email, full_name = EXCLUDED.full_name \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(profile.id.as_uuid())
        .bind(&profile.email)
        .bind(&profile.full_name)
        .bind(profile.created_at)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_user", e))?;
        Ok(row.into())
    }

    async fn get_user(&self, id: UserId) -> StoreResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_user", e))?;
        Ok(row.map(Into::into))
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<UserProfile>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email.trim().to_lowercase())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_user_by_email", e))?;
        Ok(row.map(Into::into))
    }

    #[instrument(
        skip(self, seed),
        fields(
            organization_id = %seed.organization.id,
            permission_count = seed.permissions.len(),
            role_count = seed.roles.len()
        ),
        err
    )]
    async fn insert_organization(&self, seed: &OrganizationSeed) -> StoreResult<()> {
        let op = "insert_organization";
        let org = &seed.organization;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, description, industry, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(org.id.as_uuid())
        .bind(&org.name)
        .bind(&org.description)
        .bind(&org.industry)
        .bind(org.created_at)
        .bind(org.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        for permission in &seed.permissions {
            insert_permission_row(&mut tx, permission)
                .await
                .map_err(|e| map_sqlx_error(op, e))?;
        }
        for role in &seed.roles {
            insert_role_row(&mut tx, role)
                .await
                .map_err(|e| map_sqlx_error(op, e))?;
        }
        insert_membership_row(&mut tx, &seed.owner)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(())
    }

    async fn get_organization(&self, id: OrganizationId) -> StoreResult<Option<Organization>> {
        let row = sqlx::query_as::<_, OrganizationRow>(&format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_organization", e))?;
        Ok(row.map(Into::into))
    }

    async fn list_organizations_for_user(&self, user_id: UserId) -> StoreResult<Vec<Organization>> {
        let rows = sqlx::query_as::<_, OrganizationRow>(
            r#"
            SELECT o.id, o.name, o.description, o.industry, o.created_at, o.updated_at
            FROM organizations o
            JOIN memberships m ON m.organization_id = o.id
            WHERE m.user_id = $1
            ORDER BY o.name
            "#,
        )
        .bind(user_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_organizations_for_user", e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, organization), fields(organization_id = %organization.id), err)]
    async fn update_organization(&self, organization: &Organization) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE organizations
            SET name = $2, description = $3, industry = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(organization.id.as_uuid())
        .bind(&organization.name)
        .bind(&organization.description)
        .bind(&organization.industry)
        .bind(organization.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_organization", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("organization"));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(organization_id = %id), err)]
    async fn delete_organization(&self, id: OrganizationId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_organization", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("organization"));
        }
        Ok(())
    }

    async fn organization_stats(
        &self,
        id: OrganizationId,
        now: DateTime<Utc>,
    ) -> StoreResult<OrganizationStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM memberships WHERE organization_id = o.id) AS total_members,
                (SELECT COUNT(*) FROM memberships
                    WHERE organization_id = o.id AND status = 'active') AS active_members,
                (SELECT COUNT(*) FROM roles WHERE organization_id = o.id) AS roles,
                (SELECT COUNT(*) FROM permissions WHERE organization_id = o.id) AS permissions,
                (SELECT COUNT(*) FROM invitations
                    WHERE organization_id = o.id AND status = 'pending'
                      AND expires_at >= $2) AS pending_invitations,
                (SELECT COUNT(*) FROM join_requests
                    WHERE organization_id = o.id AND status = 'pending') AS pending_join_requests
            FROM organizations o
            WHERE o.id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("organization_stats", e))?
        .ok_or(StoreError::NotFound("organization"))?;

        let count = |column: &str| -> StoreResult<u64> {
            row.try_get::<i64, _>(column)
                .map(|n| n.max(0) as u64)
                .map_err(|e| map_sqlx_error("organization_stats", e))
        };
        let total_members = count("total_members")?;
        let active_members = count("active_members")?;
        Ok(OrganizationStats {
            total_members,
            active_members,
            inactive_members: total_members.saturating_sub(active_members),
            roles: count("roles")?,
            permissions: count("permissions")?,
            pending_invitations: count("pending_invitations")?,
            pending_join_requests: count("pending_join_requests")?,
        })
    }

    #[instrument(
        skip(self, permission),
        fields(organization_id = %permission.organization_id, permission_id = %permission.id),
        err
    )]
    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_permission_row(&mut conn, permission)
            .await
            .map_err(|e| map_sqlx_error("insert_permission", e))
    }

    async fn get_permission(&self, id: PermissionId) -> StoreResult<Option<Permission>> {
        sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_permission", e))?
        .map(Permission::try_from)
        .transpose()
    }

    async fn find_permissions(&self, ids: &BTreeSet<PermissionId>) -> StoreResult<Vec<Permission>> {
        sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ANY($1)"
        ))
        .bind(uuids(ids, PermissionId::as_uuid))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_permissions", e))?
        .into_iter()
        .map(Permission::try_from)
        .collect()
    }

    async fn list_permissions(
        &self,
        organization_id: OrganizationId,
        category: Option<PermissionCategory>,
    ) -> StoreResult<Vec<Permission>> {
        sqlx::query_as::<_, PermissionRow>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions \
             WHERE organization_id = $1 AND ($2::text IS NULL OR category = $2) \
             ORDER BY name"
        ))
        .bind(organization_id.as_uuid())
        .bind(category.map(|c| c.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permissions", e))?
        .into_iter()
        .map(Permission::try_from)
        .collect()
    }

    #[instrument(skip(self, permission), fields(permission_id = %permission.id), err)]
    async fn update_permission(&self, permission: &Permission) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE permissions
            SET name = $3, description = $4, category = $5, updated_at = $6
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(permission.id.as_uuid())
        .bind(permission.organization_id.as_uuid())
        .bind(&permission.name)
        .bind(&permission.description)
        .bind(permission.category.as_str())
        .bind(permission.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("update_permission", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("permission"));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(permission_id = %id), err)]
    async fn delete_permission(&self, id: PermissionId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM permissions WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_delete_error("delete_permission", e, Constraint::PermissionInUse))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("permission"));
        }
        Ok(())
    }

    #[instrument(
        skip(self, role),
        fields(organization_id = %role.organization_id, role_id = %role.id),
        err
    )]
    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        insert_role_row(&mut tx, role)
            .await
            .map_err(|e| map_sqlx_error("insert_role", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn get_role(&self, id: RoleId) -> StoreResult<Option<Role>> {
        let row = sqlx::query_as::<_, RoleRow>(&role_query("r.id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get_role", e))?;
        Ok(row.map(Into::into))
    }

    async fn find_roles(&self, ids: &BTreeSet<RoleId>) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&role_query("r.id = ANY($1)"))
            .bind(uuids(ids, RoleId::as_uuid))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_roles", e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn list_roles(&self, organization_id: OrganizationId) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, RoleRow>(&role_query("r.organization_id = $1"))
            .bind(organization_id.as_uuid())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, role), fields(role_id = %role.id), err)]
    async fn update_role(&self, role: &Role) -> StoreResult<()> {
        let op = "update_role";
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let result = sqlx::query(
            r#"
            UPDATE roles
            SET name = $3, description = $4, updated_at = $5
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(role.organization_id.as_uuid())
        .bind(&role.name)
        .bind(&role.description)
        .bind(role.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("role"));
        }
        replace_role_permissions(&mut tx, role)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn delete_role(&self, id: RoleId) -> StoreResult<()> {
        let op = "delete_role";
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Pending invitations stay and block the delete through the FK.
        sqlx::query("DELETE FROM invitations WHERE role_id = $1 AND status <> 'pending'")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        let result = sqlx::query("DELETE FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_delete_error(op, e, Constraint::RoleInUse))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("role"));
        }
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn role_member_counts(
        &self,
        organization_id: OrganizationId,
    ) -> StoreResult<HashMap<RoleId, u64>> {
        let rows = sqlx::query(
            r#"
            SELECT role_id, COUNT(*) AS members
            FROM member_roles
            WHERE organization_id = $1
            GROUP BY role_id
            "#,
        )
        .bind(organization_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("role_member_counts", e))?;

        let mut counts = HashMap::with_capacity(rows.len());
        for row in rows {
            let role_id: Uuid = row
                .try_get("role_id")
                .map_err(|e| map_sqlx_error("role_member_counts", e))?;
            let members: i64 = row
                .try_get("members")
                .map_err(|e| map_sqlx_error("role_member_counts", e))?;
            counts.insert(RoleId::from_uuid(role_id), members.max(0) as u64);
        }
        Ok(counts)
    }

    #[instrument(
        skip(self, membership),
        fields(organization_id = %membership.organization_id, membership_id = %membership.id),
        err
    )]
    async fn insert_membership(&self, membership: &Membership) -> StoreResult<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        insert_membership_row(&mut tx, membership)
            .await
            .map_err(|e| map_sqlx_error("insert_membership", e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    async fn get_membership(&self, id: MembershipId) -> StoreResult<Option<Membership>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        fetch_membership(&mut conn, id)
            .await
            .map_err(|e| map_sqlx_error("get_membership", e))?
            .map(Membership::try_from)
            .transpose()
    }

    async fn find_membership(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<Membership>> {
        sqlx::query_as::<_, MembershipRow>(&membership_query(
            "m.organization_id = $1 AND m.user_id = $2",
        ))
        .bind(organization_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_membership", e))?
        .map(Membership::try_from)
        .transpose()
    }

    async fn list_members(
        &self,
        organization_id: OrganizationId,
        filter: &MemberFilter,
    ) -> StoreResult<Vec<(Membership, UserProfile)>> {
        let rows = sqlx::query_as::<_, MemberRow>(
            r#"
            SELECT m.id, m.organization_id, m.user_id, m.status, m.last_active,
                   m.created_at, m.updated_at,
                   COALESCE(array_agg(mr.role_id) FILTER (WHERE mr.role_id IS NOT NULL),
                            ARRAY[]::uuid[]) AS role_ids,
                   u.email AS user_email,
                   u.full_name AS user_full_name,
                   u.created_at AS user_created_at
            FROM memberships m
            JOIN users u ON u.id = m.user_id
            LEFT JOIN member_roles mr ON mr.membership_id = m.id
            WHERE m.organization_id = $1
              AND ($2::text IS NULL OR m.status = $2)
              AND ($3::text IS NULL
                   OR strpos(u.email, $3) > 0
                   OR strpos(lower(COALESCE(u.full_name, '')), $3) > 0)
              AND ($4::uuid IS NULL OR EXISTS (
                    SELECT 1 FROM member_roles f
                    WHERE f.membership_id = m.id AND f.role_id = $4))
            GROUP BY m.id, u.id
            ORDER BY m.created_at DESC, m.id DESC
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.search_term())
        .bind(filter.role_id.map(|r| *r.as_uuid()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_members", e))?;

        rows.into_iter()
            .map(|row| -> StoreResult<(Membership, UserProfile)> {
                let user = UserProfile {
                    id: UserId::from_uuid(row.membership.user_id),
                    email: row.user_email,
                    full_name: row.user_full_name,
                    created_at: row.user_created_at,
                };
                Ok((row.membership.try_into()?, user))
            })
            .collect()
    }

    #[instrument(skip(self, membership), fields(membership_id = %membership.id), err)]
    async fn update_membership(&self, membership: &Membership) -> StoreResult<()> {
        let op = "update_membership";
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        let result = sqlx::query(
            r#"
            UPDATE memberships
            SET status = $3, last_active = $4, updated_at = $5
            WHERE id = $1 AND organization_id = $2
            "#,
        )
        .bind(membership.id.as_uuid())
        .bind(membership.organization_id.as_uuid())
        .bind(membership.status.as_str())
        .bind(membership.last_active)
        .bind(membership.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("membership"));
        }
        replace_member_roles(&mut tx, membership)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }

    #[instrument(skip(self), fields(membership_id = %id), err)]
    async fn delete_membership(&self, id: MembershipId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM memberships WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_membership", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("membership"));
        }
        Ok(())
    }

    async fn touch_membership(&self, id: MembershipId, at: DateTime<Utc>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE memberships SET last_active = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("touch_membership", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("membership"));
        }
        Ok(())
    }

    #[instrument(
        skip(self, ids, action),
        fields(
            organization_id = %organization_id,
            action = action.name(),
            member_count = ids.len()
        ),
        err
    )]
    async fn bulk_update_members(
        &self,
        organization_id: OrganizationId,
        ids: &[MembershipId],
        action: &BulkAction,
        now: DateTime<Utc>,
    ) -> StoreResult<u64> {
        let op = "bulk_update_members";
        let requested: BTreeSet<MembershipId> = ids.iter().copied().collect();
        let requested_uuids = uuids(&requested, MembershipId::as_uuid);

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let locked: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM memberships WHERE organization_id = $1 AND id = ANY($2) FOR UPDATE",
        )
        .bind(organization_id.as_uuid())
        .bind(&requested_uuids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        let locked: BTreeSet<MembershipId> =
            locked.into_iter().map(MembershipId::from_uuid).collect();
        let missing: Vec<MembershipId> = requested.difference(&locked).copied().collect();
        if !missing.is_empty() {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::MissingMembers(missing));
        }

        match action {
            BulkAction::Remove => {
                sqlx::query("DELETE FROM memberships WHERE id = ANY($1)")
                    .bind(&requested_uuids)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(op, e))?;
            }
            BulkAction::Activate | BulkAction::Deactivate => {
                let status = if matches!(action, BulkAction::Activate) {
                    MemberStatus::Active
                } else {
                    MemberStatus::Inactive
                };
                sqlx::query("UPDATE memberships SET status = $1, updated_at = $2 WHERE id = ANY($3)")
                    .bind(status.as_str())
                    .bind(now)
                    .bind(&requested_uuids)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(op, e))?;
            }
            BulkAction::SetRoles { role_ids } => {
                let role_ids: BTreeSet<RoleId> = role_ids.iter().copied().collect();
                sqlx::query("DELETE FROM member_roles WHERE membership_id = ANY($1)")
                    .bind(&requested_uuids)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(op, e))?;
                sqlx::query(
                    r#"
                    INSERT INTO member_roles (organization_id, membership_id, role_id)
                    SELECT $1, m, r
                    FROM UNNEST($2::uuid[]) AS m CROSS JOIN UNNEST($3::uuid[]) AS r
                    "#,
                )
                .bind(organization_id.as_uuid())
                .bind(&requested_uuids)
                .bind(uuids(&role_ids, RoleId::as_uuid))
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(op, e))?;
                sqlx::query("UPDATE memberships SET updated_at = $1 WHERE id = ANY($2)")
                    .bind(now)
                    .bind(&requested_uuids)
                    .execute(&mut *tx)
                    .await
                    .map_err(|e| map_sqlx_error(op, e))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(requested.len() as u64)
    }

    async fn member_access(
        &self,
        organization_id: OrganizationId,
        user_id: UserId,
    ) -> StoreResult<Option<MemberAccess>> {
        let Some(membership) = self.find_membership(organization_id, user_id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            r#"
            SELECT r.name AS role_name, p.name AS permission_name
            FROM member_roles mr
            JOIN roles r ON r.id = mr.role_id
            LEFT JOIN role_permissions rp ON rp.role_id = r.id
            LEFT JOIN permissions p ON p.id = rp.permission_id
            WHERE mr.membership_id = $1
            "#,
        )
        .bind(membership.id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("member_access", e))?;

        let mut roles = BTreeSet::new();
        let mut permissions = BTreeSet::new();
        for row in rows {
            let role: String = row
                .try_get("role_name")
                .map_err(|e| map_sqlx_error("member_access", e))?;
            let permission: Option<String> = row
                .try_get("permission_name")
                .map_err(|e| map_sqlx_error("member_access", e))?;
            roles.insert(role);
            permissions.extend(permission);
        }

        Ok(Some(MemberAccess {
            membership,
            roles: roles.into_iter().collect(),
            permissions: permissions.into_iter().collect(),
        }))
    }

    #[instrument(
        skip(self, invitation),
        fields(organization_id = %invitation.organization_id, invitation_id = %invitation.id),
        err
    )]
    async fn insert_invitation(&self, invitation: &Invitation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invitations (
                id, organization_id, email, role_id, token, status, invited_by,
                created_at, expires_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(invitation.id.as_uuid())
        .bind(invitation.organization_id.as_uuid())
        .bind(&invitation.email)
        .bind(invitation.role_id.as_uuid())
        .bind(invitation.token.as_str())
        .bind(invitation.status.as_str())
        .bind(invitation.invited_by.as_uuid())
        .bind(invitation.created_at)
        .bind(invitation.expires_at)
        .bind(invitation.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_invitation", e))?;
        Ok(())
    }

    async fn get_invitation(&self, id: InvitationId) -> StoreResult<Option<Invitation>> {
        sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_invitation", e))?
        .map(Invitation::try_from)
        .transpose()
    }

    async fn find_invitation_by_token(
        &self,
        token: &InvitationToken,
    ) -> StoreResult<Option<Invitation>> {
        sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE token = $1"
        ))
        .bind(token.as_str())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_invitation_by_token", e))?
        .map(Invitation::try_from)
        .transpose()
    }

    async fn find_pending_invitation(
        &self,
        organization_id: OrganizationId,
        email: &str,
    ) -> StoreResult<Option<Invitation>> {
        sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE organization_id = $1 AND email = $2 AND status = 'pending'"
        ))
        .bind(organization_id.as_uuid())
        .bind(email)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_pending_invitation", e))?
        .map(Invitation::try_from)
        .transpose()
    }

    async fn list_invitations(&self, organization_id: OrganizationId) -> StoreResult<Vec<Invitation>> {
        sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations \
             WHERE organization_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(organization_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_invitations", e))?
        .into_iter()
        .map(Invitation::try_from)
        .collect()
    }

    #[instrument(
        skip(self, invitation),
        fields(invitation_id = %invitation.id, status = invitation.status.as_str()),
        err
    )]
    async fn save_invitation(
        &self,
        invitation: &Invitation,
        expected: InvitationStatus,
    ) -> StoreResult<()> {
        let op = "save_invitation";
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET email = $3, role_id = $4, token = $5, status = $6, expires_at = $7, updated_at = $8
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(invitation.id.as_uuid())
        .bind(expected.as_str())
        .bind(&invitation.email)
        .bind(invitation.role_id.as_uuid())
        .bind(invitation.token.as_str())
        .bind(invitation.status.as_str())
        .bind(invitation.expires_at)
        .bind(invitation.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM invitations WHERE id = $1)")
                    .bind(invitation.id.as_uuid())
                    .fetch_one(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(op, e))?;
            return Err(if exists {
                StoreError::Conflict("invitation")
            } else {
                StoreError::NotFound("invitation")
            });
        }
        Ok(())
    }

    #[instrument(skip(self), fields(invitation_id = %id, user_id = %user_id), err)]
    async fn accept_invitation(
        &self,
        id: InvitationId,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<Membership> {
        let op = "accept_invitation";
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let invitation: Invitation = sqlx::query_as::<_, InvitationRow>(&format!(
            "SELECT {INVITATION_COLUMNS} FROM invitations WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?
        .ok_or(StoreError::NotFound("invitation"))?
        .try_into()?;

        if invitation.status != InvitationStatus::Pending {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict("invitation"));
        }

        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM memberships WHERE organization_id = $1 AND user_id = $2 FOR UPDATE",
        )
        .bind(invitation.organization_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        let membership_id = match existing {
            Some(existing) => {
                let membership_id = MembershipId::from_uuid(existing);
                let added = sqlx::query(
                    r#"
                    INSERT INTO member_roles (organization_id, membership_id, role_id)
                    VALUES ($1, $2, $3)
                    ON CONFLICT DO NOTHING
                    "#,
                )
                .bind(invitation.organization_id.as_uuid())
                .bind(membership_id.as_uuid())
                .bind(invitation.role_id.as_uuid())
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(op, e))?;
                if added.rows_affected() > 0 {
                    sqlx::query("UPDATE memberships SET updated_at = $2 WHERE id = $1")
                        .bind(membership_id.as_uuid())
                        .bind(now)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| map_sqlx_error(op, e))?;
                }
                membership_id
            }
            None => {
                let membership =
                    Membership::new(invitation.organization_id, user_id, [invitation.role_id], now);
                insert_membership_row(&mut tx, &membership)
                    .await
                    .map_err(|e| map_sqlx_error(op, e))?;
                membership.id
            }
        };

        sqlx::query("UPDATE invitations SET status = 'accepted', updated_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;

        let membership: Membership = fetch_membership(&mut tx, membership_id)
            .await
            .map_err(|e| map_sqlx_error(op, e))?
            .ok_or(StoreError::NotFound("membership"))?
            .try_into()?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))?;
        Ok(membership)
    }

    #[instrument(skip(self), err)]
    async fn expire_due_invitations(&self, now: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE invitations
            SET status = 'expired', updated_at = $1
            WHERE status = 'pending' AND expires_at < $1
            "#,
        )
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("expire_due_invitations", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(
        skip(self, request),
        fields(organization_id = %request.organization_id, join_request_id = %request.id),
        err
    )]
    async fn insert_join_request(&self, request: &JoinRequest) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO join_requests (id, organization_id, user_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(request.id.as_uuid())
        .bind(request.organization_id.as_uuid())
        .bind(request.user_id.as_uuid())
        .bind(request.status.as_str())
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_join_request", e))?;
        Ok(())
    }

    async fn get_join_request(&self, id: JoinRequestId) -> StoreResult<Option<JoinRequest>> {
        sqlx::query_as::<_, JoinRequestRow>(&format!(
            "SELECT {JOIN_REQUEST_COLUMNS} FROM join_requests WHERE id = $1"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_join_request", e))?
        .map(JoinRequest::try_from)
        .transpose()
    }

    async fn list_join_requests(
        &self,
        organization_id: OrganizationId,
        status: Option<JoinRequestStatus>,
    ) -> StoreResult<Vec<JoinRequestView>> {
        let rows = sqlx::query_as::<_, JoinRequestViewRow>(
            r#"
            SELECT j.id, j.organization_id, j.user_id, j.status, j.created_at, j.updated_at,
                   u.email AS user_email,
                   u.full_name AS user_full_name,
                   u.created_at AS user_created_at
            FROM join_requests j
            LEFT JOIN users u ON u.id = j.user_id
            WHERE j.organization_id = $1 AND ($2::text IS NULL OR j.status = $2)
            ORDER BY j.created_at DESC, j.id DESC
            "#,
        )
        .bind(organization_id.as_uuid())
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_join_requests", e))?;

        rows.into_iter()
            .map(|row| -> StoreResult<JoinRequestView> {
                let user = match (row.user_email, row.user_created_at) {
                    (Some(email), Some(created_at)) => Some(UserProfile {
                        id: UserId::from_uuid(row.request.user_id),
                        email,
                        full_name: row.user_full_name,
                        created_at,
                    }),
                    _ => None,
                };
                Ok(JoinRequestView {
                    request: row.request.try_into()?,
                    user,
                })
            })
            .collect()
    }

    #[instrument(skip(self, request), fields(join_request_id = %request.id), err)]
    async fn save_join_request(
        &self,
        request: &JoinRequest,
        expected: JoinRequestStatus,
    ) -> StoreResult<()> {
        let op = "save_join_request";
        let result = sqlx::query(
            "UPDATE join_requests SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2",
        )
        .bind(request.id.as_uuid())
        .bind(expected.as_str())
        .bind(request.status.as_str())
        .bind(request.updated_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error(op, e))?;

        if result.rows_affected() == 0 {
            let exists: bool =
                sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM join_requests WHERE id = $1)")
                    .bind(request.id.as_uuid())
                    .fetch_one(&*self.pool)
                    .await
                    .map_err(|e| map_sqlx_error(op, e))?;
            return Err(if exists {
                StoreError::Conflict("join request")
            } else {
                StoreError::NotFound("join request")
            });
        }
        Ok(())
    }

    async fn delete_join_request(&self, id: JoinRequestId) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM join_requests WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("delete_join_request", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("join request"));
        }
        Ok(())
    }

    #[instrument(
        skip(self, membership),
        fields(join_request_id = %id, membership_id = %membership.id),
        err
    )]
    async fn approve_join_request(
        &self,
        id: JoinRequestId,
        membership: &Membership,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let op = "approve_join_request";
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM join_requests WHERE id = $1 FOR UPDATE")
                .bind(id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error(op, e))?;
        let status: JoinRequestStatus = match status {
            Some(raw) => decode("join_requests.status", &raw)?,
            None => return Err(StoreError::NotFound("join request")),
        };
        if status != JoinRequestStatus::Pending {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict("join request"));
        }

        insert_membership_row(&mut tx, membership)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;
        sqlx::query("UPDATE join_requests SET status = 'approved', updated_at = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error(op, e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit", e))
    }
}

async fn insert_permission_row(
    conn: &mut PgConnection,
    permission: &Permission,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO permissions (
            id, organization_id, name, description, category, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(permission.id.as_uuid())
    .bind(permission.organization_id.as_uuid())
    .bind(&permission.name)
    .bind(&permission.description)
    .bind(permission.category.as_str())
    .bind(permission.created_at)
    .bind(permission.updated_at)
    .execute(conn)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Error mapping

/// Map an sqlx error to a `StoreError`, classifying constraint violations by
/// constraint name.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            if let Some(mapped) = db_err.constraint().and_then(constraint_error) {
                return mapped;
            }
            StoreError::Backend(format!(
                "database error in {}: {}",
                operation,
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

/// Deleting a row that is still referenced surfaces as a foreign key
/// violation on the referencing table.
fn map_delete_error(operation: &str, err: sqlx::Error, in_use: Constraint) -> StoreError {
    if is_foreign_key_violation(&err) {
        return StoreError::Violation(in_use);
    }
    map_sqlx_error(operation, err)
}

fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23503";
        }
    }
    false
}

fn constraint_error(name: &str) -> Option<StoreError> {
    let constraint = match name {
        "organizations_name_key" => Constraint::OrganizationName,
        "users_email_key" => Constraint::UserEmail,
        "permissions_org_name_key" => Constraint::PermissionName,
        "roles_org_name_key" => Constraint::RoleName,
        "memberships_org_user_key" => Constraint::MembershipUser,
        "invitations_token_key" => Constraint::InvitationToken,
        "invitations_pending_email_key" => Constraint::PendingInvitation,
        "join_requests_pending_user_key" => Constraint::PendingJoinRequest,
        "role_permissions_permission_fkey" => Constraint::RolePermissionScope,
        "member_roles_role_fkey" => Constraint::MembershipRoleScope,
        "invitations_role_fkey" => Constraint::InvitationRoleScope,
        "role_permissions_role_fkey" => return Some(StoreError::NotFound("role")),
        "member_roles_membership_fkey" => return Some(StoreError::NotFound("membership")),
        "memberships_user_fkey" | "join_requests_user_fkey" | "invitations_inviter_fkey" => {
            return Some(StoreError::NotFound("user"));
        }
        other if other.ends_with("_organization_fkey") => {
            return Some(StoreError::NotFound("organization"));
        }
        _ => return None,
    };
    Some(StoreError::Violation(constraint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_constraint_names_are_classified() {
        assert_eq!(
            constraint_error("roles_org_name_key"),
            Some(StoreError::Violation(Constraint::RoleName))
        );
        assert_eq!(
            constraint_error("invitations_pending_email_key"),
            Some(StoreError::Violation(Constraint::PendingInvitation))
        );
        assert_eq!(
            constraint_error("member_roles_role_fkey"),
            Some(StoreError::Violation(Constraint::MembershipRoleScope))
        );
        assert_eq!(
            constraint_error("join_requests_organization_fkey"),
            Some(StoreError::NotFound("organization"))
        );
        assert_eq!(constraint_error("some_other_constraint"), None);
    }

    #[test]
    fn role_query_filters_before_grouping() {
        let sql = role_query("r.organization_id = $1");
        let filter = sql.find("WHERE r.organization_id = $1").unwrap();
        let group = sql.find("GROUP BY r.id").unwrap();
        assert!(filter < group);
    }
}
