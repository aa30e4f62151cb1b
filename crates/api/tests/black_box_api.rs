use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};
use uninexus_auth::JwtClaims;
use uninexus_core::UserId;

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod over the in-memory store, on an ephemeral port.
        let app = uninexus_api::app::build_app(JWT_SECRET.to_string());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn send(&self, method: reqwest::Method, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .request(method, self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::POST, token, path, body).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Caller {
    token: String,
}

fn mint_jwt(email: &str) -> Caller {
    let claims = JwtClaims::new(
        UserId::new(),
        email,
        None,
        Utc::now(),
        ChronoDuration::minutes(10),
    );
    let token = jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt");
    Caller { token }
}

async fn create_org(srv: &TestServer, owner: &Caller, name: &str) -> String {
    let (status, body) = srv
        .post(&owner.token, "/organizations", json!({ "name": name }))
        .await;
    assert_eq!(status, StatusCode::CREATED, "create org failed: {body}");
    body["id"].as_str().unwrap().to_string()
}

async fn permission_id(srv: &TestServer, owner: &Caller, org: &str, name: &str) -> String {
    let (status, body) = srv
        .get(&owner.token, &format!("/organizations/{org}/permissions"))
        .await;
    assert_eq!(status, StatusCode::OK);
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|p| p["name"] == name)
        .map(|p| p["id"].as_str().unwrap().to_string())
        .unwrap()
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(srv.url("/whoami"))
        .bearer_auth("not-a-jwt")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn identity_is_derived_from_token() {
    let srv = TestServer::spawn().await;
    let caller = mint_jwt("Owner@Acme.test");

    let (status, body) = srv.get(&caller.token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["email"], "owner@acme.test");
}

#[tokio::test]
async fn creator_owns_new_organization() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let org = create_org(&srv, &owner, "Acme").await;

    let (status, body) = srv.get(&owner.token, "/organizations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["items"][0]["name"], "Acme");

    let (status, body) = srv
        .get(&owner.token, &format!("/organizations/{org}/access"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        body["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "manage_roles")
    );

    let (status, body) = srv
        .post(&owner.token, "/organizations", json!({ "name": "Acme" }))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_name");
}

#[tokio::test]
async fn non_members_are_forbidden() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let stranger = mint_jwt("stranger@globex.test");
    let org = create_org(&srv, &owner, "Acme").await;

    let (status, body) = srv
        .get(&stranger.token, &format!("/organizations/{org}/members"))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = srv
        .post(
            &stranger.token,
            &format!("/organizations/{org}/roles"),
            json!({ "name": "Sneaky" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");

    let (status, body) = srv.get(&owner.token, "/organizations/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_id");
}

#[tokio::test]
async fn invitation_onboards_viewer_end_to_end() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let dana = mint_jwt("dana@acme.test");
    let org = create_org(&srv, &owner, "Acme").await;
    let view_members = permission_id(&srv, &owner, &org, "view_members").await;

    let (status, role) = srv
        .post(
            &owner.token,
            &format!("/organizations/{org}/roles"),
            json!({ "name": "Viewer", "permission_ids": [view_members] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(role["permissions"][0]["name"], "view_members");

    let (status, issued) = srv
        .post(
            &owner.token,
            &format!("/organizations/{org}/invitations"),
            json!({ "email": "Dana@acme.test", "role_id": role["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "invite failed: {issued}");
    let token = issued["invitation"]["token"].as_str().unwrap().to_string();
    assert!(issued["accept_link"].as_str().unwrap().ends_with(&token));

    // Public preview, no bearer token.
    let res = srv
        .client
        .get(srv.url(&format!("/invitations/verify/{token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let details: Value = res.json().await.unwrap();
    assert_eq!(details["organization_name"], "Acme");
    assert_eq!(details["role_name"], "Viewer");

    let (status, _) = srv
        .post(&dana.token, &format!("/accept-invitation/{token}"), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, members) = srv
        .get(&dana.token, &format!("/organizations/{org}/members"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(members["items"].as_array().unwrap().len(), 2);

    let (status, _) = srv
        .post(
            &dana.token,
            &format!("/organizations/{org}/roles"),
            json!({ "name": "Escalated" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = srv
        .post(&dana.token, &format!("/accept-invitation/{token}"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "already_processed");

    let res = srv
        .client
        .get(srv.url(&format!("/invitations/verify/{token}")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invitation_for_another_address_is_forbidden() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let mallory = mint_jwt("mallory@acme.test");
    let org = create_org(&srv, &owner, "Acme").await;
    let (_, roles) = srv
        .get(&owner.token, &format!("/organizations/{org}/roles"))
        .await;
    let member_role = roles["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "Member")
        .unwrap()["id"]
        .clone();

    let (_, issued) = srv
        .post(
            &owner.token,
            &format!("/organizations/{org}/invitations"),
            json!({ "email": "dana@acme.test", "role_id": member_role }),
        )
        .await;
    let token = issued["invitation"]["token"].as_str().unwrap().to_string();

    let (status, body) = srv
        .post(&mallory.token, &format!("/accept-invitation/{token}"), json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");
}

#[tokio::test]
async fn referenced_permission_cannot_be_deleted() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let org = create_org(&srv, &owner, "Acme").await;

    let (status, permission) = srv
        .post(
            &owner.token,
            &format!("/organizations/{org}/permissions"),
            json!({ "name": "export_reports", "category": "analytics" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(permission["category"], "analytics");
    let permission_id = permission["id"].as_str().unwrap().to_string();

    let (status, _) = srv
        .post(
            &owner.token,
            &format!("/organizations/{org}/roles"),
            json!({ "name": "Analyst", "permission_ids": [permission_id] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = srv
        .send(
            reqwest::Method::DELETE,
            &owner.token,
            &format!("/organizations/{org}/permissions/{permission_id}"),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "invalid_state");

    let (status, body) = srv
        .post(
            &owner.token,
            &format!("/organizations/{org}/roles"),
            json!({ "name": "Analyst" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "duplicate_name");
}

#[tokio::test]
async fn bulk_action_with_unknown_member_changes_nothing() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let org = create_org(&srv, &owner, "Acme").await;

    let (_, members) = srv
        .get(&owner.token, &format!("/organizations/{org}/members"))
        .await;
    let owner_membership = members["items"][0]["id"].as_str().unwrap().to_string();
    let unknown = uninexus_core::MembershipId::new().to_string();

    let (status, body) = srv
        .post(
            &owner.token,
            &format!("/organizations/{org}/members/bulk"),
            json!({ "action": "deactivate", "member_ids": [owner_membership, unknown] }),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "batch_rejected");
    assert_eq!(body["failed_ids"], json!([unknown]));

    let (status, members) = srv
        .get(
            &owner.token,
            &format!("/organizations/{org}/members?status=active"),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(members["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn join_request_approval_grants_member_role() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let erin = mint_jwt("erin@acme.test");
    let org = create_org(&srv, &owner, "Acme").await;

    let (status, request) = srv
        .post(&erin.token, &format!("/organizations/{org}/join-requests"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let request_id = request["id"].as_str().unwrap().to_string();

    let (status, body) = srv
        .post(&erin.token, &format!("/organizations/{org}/join-requests"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "join_request_pending");

    let (status, pending) = srv
        .get(
            &owner.token,
            &format!("/organizations/{org}/join-requests?status=pending"),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(pending["items"][0]["user"]["email"], "erin@acme.test");

    let res = srv
        .client
        .post(srv.url(&format!(
            "/organizations/{org}/join-requests/{request_id}/approve"
        )))
        .bearer_auth(&owner.token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let (status, access) = srv
        .get(&erin.token, &format!("/organizations/{org}/access"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        access["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|p| p == "view_members")
    );
}

#[tokio::test]
async fn invitation_lifetime_must_be_in_range() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let org = create_org(&srv, &owner, "Acme").await;
    let (_, roles) = srv
        .get(&owner.token, &format!("/organizations/{org}/roles"))
        .await;
    let member_role = roles["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["name"] == "Member")
        .unwrap()["id"]
        .clone();
    let path = format!("/organizations/{org}/invitations");

    for hours in [json!(i64::MAX), json!(0), json!(8761)] {
        let (status, body) = srv
            .post(
                &owner.token,
                &path,
                json!({ "email": "dana@acme.test", "role_id": member_role, "expires_in_hours": hours }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{hours}: {body}");
        assert_eq!(body["error"], "validation_error");
    }

    let (status, body) = srv
        .post(
            &owner.token,
            &path,
            json!({ "email": "dana@acme.test", "role_id": member_role, "expires_in_hours": 48 }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
}

#[tokio::test]
async fn permission_is_fetched_by_id_within_its_organization() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let acme = create_org(&srv, &owner, "Acme").await;
    let globex = create_org(&srv, &owner, "Globex").await;
    let id = permission_id(&srv, &owner, &acme, "view_members").await;

    let (status, body) = srv
        .get(&owner.token, &format!("/organizations/{acme}/permissions/{id}"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "view_members");

    let (status, _) = srv
        .get(&owner.token, &format!("/organizations/{globex}/permissions/{id}"))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = srv
        .post(
            &owner.token,
            &format!("/organizations/{acme}/permissions"),
            json!({ "name": "*" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn requester_can_withdraw_join_request() {
    let srv = TestServer::spawn().await;
    let owner = mint_jwt("owner@acme.test");
    let erin = mint_jwt("erin@acme.test");
    let mallory = mint_jwt("mallory@acme.test");
    let org = create_org(&srv, &owner, "Acme").await;

    let (status, request) = srv
        .post(&erin.token, &format!("/organizations/{org}/join-requests"), json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let path = format!(
        "/organizations/{org}/join-requests/{}",
        request["id"].as_str().unwrap()
    );

    let (status, body) = srv
        .send(reqwest::Method::DELETE, &mallory.token, &path, json!({}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, _) = srv
        .send(reqwest::Method::DELETE, &erin.token, &path, json!({}))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, pending) = srv
        .get(&owner.token, &format!("/organizations/{org}/join-requests"))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(pending["items"].as_array().unwrap().is_empty());
}
