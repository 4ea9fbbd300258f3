use axum::http::StatusCode;
use diddit_server::{server, storage};
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;

const PASSWORD: &str = "correct horse";

struct TestServer {
    base: String,
    client: Client,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

struct Account {
    token: String,
    user_id: String,
    email: String,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        Self::spawn_with(|_| {}).await
    }

    async fn spawn_with(tweak: impl FnOnce(&mut server::AppConfig)) -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let mut config = test_config();
        tweak(&mut config);
        let (addr, handle) = match start_server(&db_path, config).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            handle,
            _tempdir: dir,
        })
    }

    /// Opens a second handle on the server's database.
    async fn store(&self) -> storage::Store {
        let db_path = self._tempdir.path().join("test.db");
        storage::Store::connect_sqlite(db_path.to_str().unwrap())
            .await
            .expect("db")
    }

    async fn register(&self, email: &str, name: &str) -> Account {
        let body = self
            .request_expect(
                "POST",
                "/api/auth/register",
                None,
                Some(json!({"email": email, "password": PASSWORD, "display_name": name})),
                StatusCode::CREATED,
            )
            .await;
        Account {
            token: str_field(&body, "token"),
            user_id: str_field(&body["user"], "id"),
            email: str_field(&body["user"], "email"),
        }
    }

    async fn login(&self, email: &str, password: &str) -> (StatusCode, Value) {
        self.request(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({"email": email, "password": password})),
        )
        .await
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = format!("{}{}", self.base, path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }

    /// Creates a household owned by `owner` and returns its id.
    async fn household(&self, owner: &Account, name: &str) -> String {
        let body = self
            .request_expect(
                "POST",
                "/api/households",
                Some(&owner.token),
                Some(json!({"name": name})),
                StatusCode::CREATED,
            )
            .await;
        assert_eq!(body["role"], "admin");
        str_field(&body, "id")
    }

    async fn create(&self, token: &str, hid: &str, suffix: &str, body: Value) -> Value {
        self.request_expect(
            "POST",
            &hh_path(hid, suffix),
            Some(token),
            Some(body),
            StatusCode::CREATED,
        )
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn test_config() -> server::AppConfig {
    server::AppConfig {
        jwt_secret: "testsecret".into(),
        // Keep bcrypt fast in tests
        bcrypt_cost: 4,
        rate_limit: server::RateLimitConfig {
            enabled: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

async fn start_server(
    tmp_db: &Path,
    config: server::AppConfig,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");

    let state = server::AppState::new(config, store);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    Ok((addr, handle))
}

fn hh_path(household_id: &str, suffix: &str) -> String {
    let scope = diddit_shared::api::household_scope(household_id);
    let suffix = suffix.trim_start_matches('/');
    if suffix.is_empty() {
        scope
    } else {
        format!("{scope}/{suffix}")
    }
}

fn str_field(v: &Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| panic!("missing string field {key} in {v:?}"))
}

#[tokio::test]
async fn public_endpoints_work() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let health = server
        .request_expect("GET", "/healthz", None, None, StatusCode::OK)
        .await;
    assert_eq!(health["raw"], "ok");
    let version = server
        .request_expect("GET", "/api/version", None, None, StatusCode::OK)
        .await;
    assert_eq!(version["version"], env!("CARGO_PKG_VERSION"));
    server
        .request_expect("GET", "/api/nope", None, None, StatusCode::NOT_FOUND)
        .await;
}

#[tokio::test]
async fn responses_carry_request_id_and_security_headers() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let resp = server
        .client
        .get(format!("{}/api/version", server.base))
        .header("x-request-id", "trace-me-123")
        .send()
        .await
        .unwrap();
    let headers = resp.headers();
    assert_eq!(headers["x-request-id"], "trace-me-123");
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert!(
        headers["cache-control"]
            .to_str()
            .unwrap()
            .contains("no-store")
    );

    let resp = server
        .client
        .get(format!("{}/healthz", server.base))
        .send()
        .await
        .unwrap();
    assert!(!resp.headers()["x-request-id"].is_empty());
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let cases: Vec<(&str, String)> = vec![
        ("GET", "/api/auth/me".into()),
        ("POST", "/api/auth/renew".into()),
        ("POST", "/api/auth/logout".into()),
        ("GET", "/api/households".into()),
        ("GET", hh_path("h1", "")),
        ("GET", hh_path("h1", "members")),
        ("GET", hh_path("h1", "children")),
        ("GET", hh_path("h1", "children/c1/points")),
        ("GET", hh_path("h1", "tasks")),
        ("GET", hh_path("h1", "assignments")),
        ("POST", hh_path("h1", "assignments/a1/complete")),
        ("GET", hh_path("h1", "completions")),
        ("POST", hh_path("h1", "completions/x/approve")),
        ("GET", hh_path("h1", "rewards")),
        ("POST", hh_path("h1", "rewards/r1/redeem")),
    ];
    for (method, path) in cases.iter() {
        server
            .request_expect(method, path, None, None, StatusCode::UNAUTHORIZED)
            .await;
    }

    server
        .request_expect(
            "GET",
            "/api/households",
            Some("not-a-jwt"),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn register_and_login() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let alice = server.register("  Alice@Example.COM ", "Alice").await;
    assert_eq!(alice.email, "alice@example.com");

    // Same address in another case is still the same account
    server
        .request_expect(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({"email": "ALICE@example.com", "password": PASSWORD, "display_name": "A"})),
            StatusCode::CONFLICT,
        )
        .await;

    for bad in [
        json!({"email": "no-at-sign", "password": PASSWORD, "display_name": "X"}),
        json!({"email": "x@example.com", "password": "short", "display_name": "X"}),
        json!({"email": "x@example.com", "password": PASSWORD, "display_name": "  "}),
    ] {
        server
            .request_expect(
                "POST",
                "/api/auth/register",
                None,
                Some(bad),
                StatusCode::BAD_REQUEST,
            )
            .await;
    }

    let (status, wrong_pw) = server.login("alice@example.com", "wrong password").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, unknown) = server.login("nobody@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    // No hint which of the two was wrong
    assert_eq!(wrong_pw, unknown);

    let (status, body) = server.login("ALICE@example.com", PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
    let token = str_field(&body, "token");
    assert_eq!(str_field(&body["user"], "id"), alice.user_id);
    assert!(body["user"].get("password_hash").is_none());

    let me = server
        .request_expect("GET", "/api/auth/me", Some(&token), None, StatusCode::OK)
        .await;
    assert_eq!(me["display_name"], "Alice");
}

#[tokio::test]
async fn logout_and_renew_retire_the_old_session() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let bob = server.register("bob@example.com", "Bob").await;

    let renewed = server
        .request_expect(
            "POST",
            "/api/auth/renew",
            Some(&bob.token),
            None,
            StatusCode::OK,
        )
        .await;
    let fresh = str_field(&renewed, "token");
    assert_ne!(fresh, bob.token);
    server
        .request_expect(
            "GET",
            "/api/auth/me",
            Some(&bob.token),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;

    server
        .request_expect(
            "POST",
            "/api/auth/logout",
            Some(&fresh),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "GET",
            "/api/households",
            Some(&fresh),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn households_are_private_to_members() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let alice = server.register("alice@example.com", "Alice").await;
    let mallory = server.register("mallory@example.com", "Mallory").await;
    let hid = server.household(&alice, "Smiths").await;

    let mine = server
        .request_expect(
            "GET",
            "/api/households",
            Some(&alice.token),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let theirs = server
        .request_expect(
            "GET",
            "/api/households",
            Some(&mallory.token),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(theirs.as_array().unwrap().is_empty());

    for suffix in ["", "members", "children", "tasks", "rewards", "completions"] {
        server
            .request_expect(
                "GET",
                &hh_path(&hid, suffix),
                Some(&mallory.token),
                None,
                StatusCode::FORBIDDEN,
            )
            .await;
    }
    // Unknown household looks the same as someone else's
    server
        .request_expect(
            "GET",
            &hh_path("does-not-exist", ""),
            Some(&mallory.token),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;

    server
        .request_expect(
            "POST",
            "/api/households",
            Some(&alice.token),
            Some(json!({"name": "   "})),
            StatusCode::BAD_REQUEST,
        )
        .await;

    let renamed = server
        .request_expect(
            "PUT",
            &hh_path(&hid, ""),
            Some(&alice.token),
            Some(json!({"name": "The Smiths"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(renamed["name"], "The Smiths");

    server
        .request_expect(
            "DELETE",
            &hh_path(&hid, ""),
            Some(&alice.token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "GET",
            &hh_path(&hid, ""),
            Some(&alice.token),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
}

#[tokio::test]
async fn member_management_keeps_an_admin() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let alice = server.register("alice@example.com", "Alice").await;
    let bob = server.register("bob@example.com", "Bob").await;
    let hid = server.household(&alice, "Smiths").await;

    // The only admin can neither step down nor leave
    server
        .request_expect(
            "PUT",
            &hh_path(&hid, &format!("members/{}", alice.user_id)),
            Some(&alice.token),
            Some(json!({"role": "parent"})),
            StatusCode::CONFLICT,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &hh_path(&hid, &format!("members/{}", alice.user_id)),
            Some(&alice.token),
            None,
            StatusCode::CONFLICT,
        )
        .await;

    server
        .request_expect(
            "POST",
            &hh_path(&hid, "members"),
            Some(&alice.token),
            Some(json!({"email": "ghost@example.com", "role": "parent"})),
            StatusCode::NOT_FOUND,
        )
        .await;
    let added = server
        .create(
            &alice.token,
            &hid,
            "members",
            json!({"email": "BOB@example.com", "role": "parent"}),
        )
        .await;
    assert_eq!(added["user_id"], bob.user_id.as_str());
    assert_eq!(added["role"], "parent");
    server
        .request_expect(
            "POST",
            &hh_path(&hid, "members"),
            Some(&alice.token),
            Some(json!({"email": "bob@example.com", "role": "parent"})),
            StatusCode::CONFLICT,
        )
        .await;

    // Parents do not manage membership
    server
        .request_expect(
            "PUT",
            &hh_path(&hid, &format!("members/{}", alice.user_id)),
            Some(&bob.token),
            Some(json!({"role": "parent"})),
            StatusCode::FORBIDDEN,
        )
        .await;

    // With a second admin the first one may step down
    server
        .request_expect(
            "PUT",
            &hh_path(&hid, &format!("members/{}", bob.user_id)),
            Some(&alice.token),
            Some(json!({"role": "admin"})),
            StatusCode::OK,
        )
        .await;
    let demoted = server
        .request_expect(
            "PUT",
            &hh_path(&hid, &format!("members/{}", alice.user_id)),
            Some(&alice.token),
            Some(json!({"role": "parent"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(demoted["role"], "parent");

    // Alice is a parent now and leaves on her own
    server
        .request_expect(
            "DELETE",
            &hh_path(&hid, &format!("members/{}", alice.user_id)),
            Some(&alice.token),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let members = server
        .request_expect(
            "GET",
            &hh_path(&hid, "members"),
            Some(&bob.token),
            None,
            StatusCode::OK,
        )
        .await;
    let members = members.as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["user_id"], bob.user_id.as_str());
}

/// A household with a parent (admin), one child member and a sibling.
struct Family {
    parent: Account,
    kid: Account,
    hid: String,
    kid_id: String,
    sibling_id: String,
}

async fn family(server: &TestServer) -> Family {
    let parent = server.register("parent@example.com", "Parent").await;
    let kid = server.register("kid@example.com", "Kid").await;
    let hid = server.household(&parent, "Family").await;
    let child = server
        .create(
            &parent.token,
            &hid,
            "children",
            json!({"name": "Kid", "birth_date": "2015-06-01"}),
        )
        .await;
    assert_eq!(child["birth_date"], "2015-06-01");
    let kid_id = str_field(&child, "id");
    let sibling = server
        .create(&parent.token, &hid, "children", json!({"name": "Sibling"}))
        .await;
    let sibling_id = str_field(&sibling, "id");

    // A child membership must point at a child of this household
    server
        .request_expect(
            "POST",
            &hh_path(&hid, "members"),
            Some(&parent.token),
            Some(json!({"email": kid.email, "role": "child"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    server
        .create(
            &parent.token,
            &hid,
            "members",
            json!({"email": kid.email, "role": "child", "child_id": kid_id}),
        )
        .await;
    Family {
        parent,
        kid,
        hid,
        kid_id,
        sibling_id,
    }
}

async fn points(server: &TestServer, f: &Family, child_id: &str) -> i64 {
    let body = server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("children/{child_id}/points")),
            Some(&f.parent.token),
            None,
            StatusCode::OK,
        )
        .await;
    body["balance"].as_i64().unwrap()
}

#[tokio::test]
async fn catalogue_validation() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let t = &f.parent.token;

    for (suffix, body) in [
        ("tasks", json!({"title": "Dishes", "points": -1})),
        ("tasks", json!({"title": " ", "points": 5})),
        ("rewards", json!({"title": "Ice cream", "cost": 0})),
        ("children", json!({"name": "Bad date", "birth_date": "01/02/2015"})),
    ] {
        server
            .request_expect(
                "POST",
                &hh_path(&f.hid, suffix),
                Some(t),
                Some(body),
                StatusCode::BAD_REQUEST,
            )
            .await;
    }

    server
        .create(t, &f.hid, "tasks", json!({"title": "Dishes", "points": 5}))
        .await;
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, "tasks"),
            Some(t),
            Some(json!({"title": "Dishes", "points": 7})),
            StatusCode::CONFLICT,
        )
        .await;

    let task = server
        .create(t, &f.hid, "tasks", json!({"title": "Laundry", "points": 3}))
        .await;
    let tid = str_field(&task, "id");
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, "assignments"),
            Some(t),
            Some(json!({"task_id": tid, "child_id": f.kid_id, "due_date": "tomorrow"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, "assignments"),
            Some(t),
            Some(json!({"task_id": tid, "child_id": "nobody", "due_date": "2025-05-01"})),
            StatusCode::BAD_REQUEST,
        )
        .await;

    let updated = server
        .request_expect(
            "PUT",
            &hh_path(&f.hid, &format!("tasks/{tid}")),
            Some(t),
            Some(json!({"title": "Laundry", "description": "fold too", "points": 4, "requires_approval": true})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(updated["points"], 4);
    assert_eq!(updated["requires_approval"], true);
    server
        .request_expect(
            "DELETE",
            &hh_path(&f.hid, &format!("tasks/{tid}")),
            Some(t),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("tasks/{tid}")),
            Some(t),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn child_members_are_confined_to_themselves() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let kt = &f.kid.token;

    let children = server
        .request_expect("GET", &hh_path(&f.hid, "children"), Some(kt), None, StatusCode::OK)
        .await;
    let children = children.as_array().unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0]["id"], f.kid_id.as_str());

    server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("children/{}/points", f.sibling_id)),
            Some(kt),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("assignments?child_id={}", f.sibling_id)),
            Some(kt),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, "tasks"),
            Some(kt),
            Some(json!({"title": "Free candy", "points": 1000})),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, "children"),
            Some(kt),
            Some(json!({"name": "Imaginary"})),
            StatusCode::FORBIDDEN,
        )
        .await;

    // Sibling's chores are out of reach
    let task = server
        .create(&f.parent.token, &f.hid, "tasks", json!({"title": "Trash", "points": 2}))
        .await;
    let assignment = server
        .create(
            &f.parent.token,
            &f.hid,
            "assignments",
            json!({"task_id": task["id"], "child_id": f.sibling_id, "due_date": "2025-05-01"}),
        )
        .await;
    let aid = str_field(&assignment, "id");
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("assignments/{aid}/complete")),
            Some(kt),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
    let visible = server
        .request_expect("GET", &hh_path(&f.hid, "assignments"), Some(kt), None, StatusCode::OK)
        .await;
    assert!(visible.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn completion_approval_flow() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let pt = &f.parent.token;
    let kt = &f.kid.token;

    let checked = server
        .create(
            pt,
            &f.hid,
            "tasks",
            json!({"title": "Homework", "points": 10, "requires_approval": true}),
        )
        .await;
    let trusted = server
        .create(pt, &f.hid, "tasks", json!({"title": "Make bed", "points": 3}))
        .await;

    let a1 = server
        .create(
            pt,
            &f.hid,
            "assignments",
            json!({"task_id": checked["id"], "child_id": f.kid_id, "due_date": "2025-05-01"}),
        )
        .await;
    let a1 = str_field(&a1, "id");
    let a2 = server
        .create(
            pt,
            &f.hid,
            "assignments",
            json!({"task_id": trusted["id"], "child_id": f.kid_id, "due_date": "2025-05-01"}),
        )
        .await;
    let a2 = str_field(&a2, "id");
    // Same task, child and day twice is a duplicate
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, "assignments"),
            Some(pt),
            Some(json!({"task_id": trusted["id"], "child_id": f.kid_id, "due_date": "2025-05-01"})),
            StatusCode::CONFLICT,
        )
        .await;

    let todays = server
        .request_expect(
            "GET",
            &hh_path(&f.hid, "assignments?date=2025-05-01"),
            Some(kt),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(todays.as_array().unwrap().len(), 2);

    // Child submits work that needs checking
    let pending = server
        .create(
            kt,
            &f.hid,
            &format!("assignments/{a1}/complete"),
            json!({"note": "all pages"}),
        )
        .await;
    assert_eq!(pending["status"], "pending");
    assert_eq!(pending["points_awarded"], 0);
    assert_eq!(pending["note"], "all pages");
    let c1 = str_field(&pending, "id");
    assert_eq!(points(&server, &f, &f.kid_id).await, 0);

    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("assignments/{a1}/complete")),
            Some(kt),
            None,
            StatusCode::CONFLICT,
        )
        .await;
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("completions/{c1}/approve")),
            Some(kt),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;

    let queue = server
        .request_expect(
            "GET",
            &hh_path(&f.hid, "completions?status=pending"),
            Some(pt),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(queue.as_array().unwrap().len(), 1);

    let approved = server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("completions/{c1}/approve")),
            Some(pt),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["points_awarded"], 10);
    assert_eq!(approved["reviewed_by"], f.parent.user_id.as_str());
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("completions/{c1}/reject")),
            Some(pt),
            None,
            StatusCode::CONFLICT,
        )
        .await;
    assert_eq!(points(&server, &f, &f.kid_id).await, 10);

    // No approval needed: points land right away
    let instant = server
        .create(kt, &f.hid, &format!("assignments/{a2}/complete"), json!({}))
        .await;
    assert_eq!(instant["status"], "approved");
    assert_eq!(points(&server, &f, &f.kid_id).await, 13);

    let listed = server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("assignments/{a1}")),
            Some(kt),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(listed["status"], "approved");

    // Removing an assignment takes its points with it
    server
        .request_expect(
            "DELETE",
            &hh_path(&f.hid, &format!("assignments/{a2}")),
            Some(pt),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    assert_eq!(points(&server, &f, &f.kid_id).await, 10);
}

#[tokio::test]
async fn rejected_work_can_be_redone() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let pt = &f.parent.token;
    let kt = &f.kid.token;

    let task = server
        .create(
            pt,
            &f.hid,
            "tasks",
            json!({"title": "Tidy room", "points": 5, "requires_approval": true}),
        )
        .await;
    let a = server
        .create(
            pt,
            &f.hid,
            "assignments",
            json!({"task_id": task["id"], "child_id": f.kid_id, "due_date": "2025-05-02"}),
        )
        .await;
    let aid = str_field(&a, "id");
    let first = server
        .create(kt, &f.hid, &format!("assignments/{aid}/complete"), json!({}))
        .await;
    let rejected = server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("completions/{}/reject", str_field(&first, "id"))),
            Some(pt),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["points_awarded"], 0);

    let second = server
        .create(kt, &f.hid, &format!("assignments/{aid}/complete"), json!({}))
        .await;
    assert_eq!(second["status"], "pending");

    // A parent marking it done is trusted
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("completions/{}/reject", str_field(&second, "id"))),
            Some(pt),
            None,
            StatusCode::OK,
        )
        .await;
    let by_parent = server
        .create(pt, &f.hid, &format!("assignments/{aid}/complete"), json!({}))
        .await;
    assert_eq!(by_parent["status"], "approved");
    assert_eq!(by_parent["points_awarded"], 5);

    let history = server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("completions?child_id={}", f.kid_id)),
            Some(kt),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(history.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn rewards_spend_points() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let pt = &f.parent.token;
    let kt = &f.kid.token;

    let task = server
        .create(pt, &f.hid, "tasks", json!({"title": "Walk dog", "points": 8}))
        .await;
    let a = server
        .create(
            pt,
            &f.hid,
            "assignments",
            json!({"task_id": task["id"], "child_id": f.kid_id, "due_date": "2025-05-03"}),
        )
        .await;
    server
        .create(
            kt,
            &f.hid,
            &format!("assignments/{}/complete", str_field(&a, "id")),
            json!({}),
        )
        .await;

    let movie = server
        .create(pt, &f.hid, "rewards", json!({"title": "Movie night", "cost": 5}))
        .await;
    let rid = str_field(&movie, "id");

    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("rewards/{rid}/redeem")),
            Some(kt),
            Some(json!({"child_id": f.sibling_id})),
            StatusCode::FORBIDDEN,
        )
        .await;
    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("rewards/{rid}/redeem")),
            Some(pt),
            Some(json!({"child_id": f.sibling_id})),
            StatusCode::CONFLICT,
        )
        .await;

    let redeemed = server
        .create(
            kt,
            &f.hid,
            &format!("rewards/{rid}/redeem"),
            json!({"child_id": f.kid_id}),
        )
        .await;
    assert_eq!(redeemed["cost"], 5);
    assert_eq!(redeemed["balance_after"], 3);
    assert_eq!(points(&server, &f, &f.kid_id).await, 3);

    server
        .request_expect(
            "POST",
            &hh_path(&f.hid, &format!("rewards/{rid}/redeem")),
            Some(kt),
            Some(json!({"child_id": f.kid_id})),
            StatusCode::CONFLICT,
        )
        .await;

    // Deleting the reward keeps the history readable
    server
        .request_expect(
            "DELETE",
            &hh_path(&f.hid, &format!("rewards/{rid}")),
            Some(pt),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let history = server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("children/{}/redemptions?page=1&per_page=5", f.kid_id)),
            Some(kt),
            None,
            StatusCode::OK,
        )
        .await;
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["reward_title"], "Movie night");
    assert!(history[0]["reward_id"].is_null());
    assert!(history[0].get("balance_after").is_none());
    let far_away = server
        .request_expect(
            "GET",
            &hh_path(
                &f.hid,
                &format!(
                    "children/{}/redemptions?page=1000000000000000000&per_page=1000",
                    f.kid_id
                ),
            ),
            Some(kt),
            None,
            StatusCode::OK,
        )
        .await;
    assert!(far_away.as_array().unwrap().is_empty());

    let totals = server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("children/{}/points", f.kid_id)),
            Some(kt),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(totals["earned"], 8);
    assert_eq!(totals["spent"], 5);
}

#[tokio::test]
async fn login_is_rate_limited() {
    let Some(server) = TestServer::spawn_with(|cfg| {
        cfg.rate_limit = server::RateLimitConfig {
            enabled: true,
            window_secs: 60,
            auth_requests: 3,
            api_requests: 100,
            ..Default::default()
        };
    })
    .await
    else {
        return;
    };
    for _ in 0..3 {
        let (status, _) = server.login("nobody@example.com", PASSWORD).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
    let resp = server
        .client
        .post(format!("{}/api/auth/login", server.base))
        .json(&json!({"email": "nobody@example.com", "password": PASSWORD}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry: u64 = resp.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!((1..=60).contains(&retry));

    // Health checks are never limited
    server
        .request_expect("GET", "/healthz", None, None, StatusCode::OK)
        .await;
}

#[tokio::test]
async fn forwarded_for_does_not_reset_the_login_budget() {
    let limited = |cfg: &mut server::AppConfig| {
        cfg.rate_limit = server::RateLimitConfig {
            enabled: true,
            window_secs: 60,
            auth_requests: 3,
            ..Default::default()
        };
    };
    let Some(server) = TestServer::spawn_with(limited).await else {
        return;
    };
    let mut statuses = Vec::new();
    for i in 0..5 {
        let resp = server
            .client
            .post(format!("{}/api/auth/login", server.base))
            .header("x-forwarded-for", format!("203.0.113.{i}"))
            .json(&json!({"email": "nobody@example.com", "password": PASSWORD}))
            .send()
            .await
            .unwrap();
        statuses.push(resp.status());
    }
    assert_eq!(
        statuses,
        [
            StatusCode::UNAUTHORIZED,
            StatusCode::UNAUTHORIZED,
            StatusCode::UNAUTHORIZED,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::TOO_MANY_REQUESTS,
        ]
    );

    // Behind a trusted proxy each forwarded address has its own budget
    let Some(proxied) = TestServer::spawn_with(|cfg| {
        limited(cfg);
        cfg.rate_limit.trust_forwarded_for = true;
    })
    .await
    else {
        return;
    };
    for i in 0..5 {
        let resp = proxied
            .client
            .post(format!("{}/api/auth/login", proxied.base))
            .header("x-forwarded-for", format!("203.0.113.{i}, 10.0.0.1"))
            .json(&json!({"email": "nobody@example.com", "password": PASSWORD}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn deleting_a_child_removes_its_membership() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let pt = &f.parent.token;

    server
        .request_expect(
            "DELETE",
            &hh_path(&f.hid, &format!("children/{}", f.kid_id)),
            Some(pt),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;

    let members = server
        .request_expect("GET", &hh_path(&f.hid, "members"), Some(pt), None, StatusCode::OK)
        .await;
    let members = members.as_array().unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0]["user_id"], f.parent.user_id.as_str());
    assert!(
        members
            .iter()
            .all(|m| (m["role"] == "child") == m["child_id"].is_string())
    );

    // The kid's account survives but no longer belongs to the household
    let houses = server
        .request_expect("GET", "/api/households", Some(&f.kid.token), None, StatusCode::OK)
        .await;
    assert!(houses.as_array().unwrap().is_empty());
    server
        .request_expect(
            "GET",
            &hh_path(&f.hid, "assignments"),
            Some(&f.kid.token),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;

    // And can be bound again to another child
    server
        .create(
            pt,
            &f.hid,
            "members",
            json!({"email": f.kid.email, "role": "child", "child_id": f.sibling_id}),
        )
        .await;
}

#[tokio::test]
async fn deleting_a_task_drops_points_for_every_child() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let pt = &f.parent.token;

    let shared = server
        .create(pt, &f.hid, "tasks", json!({"title": "Feed cat", "points": 6}))
        .await;
    let other = server
        .create(pt, &f.hid, "tasks", json!({"title": "Water plants", "points": 2}))
        .await;
    for (task, child) in [
        (&shared, &f.kid_id),
        (&shared, &f.sibling_id),
        (&other, &f.kid_id),
    ] {
        let a = server
            .create(
                pt,
                &f.hid,
                "assignments",
                json!({"task_id": task["id"], "child_id": child, "due_date": "2025-05-04"}),
            )
            .await;
        server
            .create(
                pt,
                &f.hid,
                &format!("assignments/{}/complete", str_field(&a, "id")),
                json!({}),
            )
            .await;
    }
    // Warm the cache for both children
    assert_eq!(points(&server, &f, &f.kid_id).await, 8);
    assert_eq!(points(&server, &f, &f.sibling_id).await, 6);

    server
        .request_expect(
            "DELETE",
            &hh_path(&f.hid, &format!("tasks/{}", str_field(&shared, "id"))),
            Some(pt),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    assert_eq!(points(&server, &f, &f.kid_id).await, 2);
    assert_eq!(points(&server, &f, &f.sibling_id).await, 0);
}

#[tokio::test]
async fn deleting_a_household_removes_everything_in_it() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let pt = &f.parent.token;

    let task = server
        .create(pt, &f.hid, "tasks", json!({"title": "Rake leaves", "points": 9}))
        .await;
    let a = server
        .create(
            pt,
            &f.hid,
            "assignments",
            json!({"task_id": task["id"], "child_id": f.kid_id, "due_date": "2025-05-05"}),
        )
        .await;
    server
        .create(
            &f.kid.token,
            &f.hid,
            &format!("assignments/{}/complete", str_field(&a, "id")),
            json!({}),
        )
        .await;
    let reward = server
        .create(pt, &f.hid, "rewards", json!({"title": "Comic", "cost": 4}))
        .await;
    server
        .create(
            &f.kid.token,
            &f.hid,
            &format!("rewards/{}/redeem", str_field(&reward, "id")),
            json!({"child_id": f.kid_id}),
        )
        .await;
    assert_eq!(points(&server, &f, &f.kid_id).await, 5);

    server
        .request_expect("DELETE", &hh_path(&f.hid, ""), Some(pt), None, StatusCode::NO_CONTENT)
        .await;

    for account in [&f.parent, &f.kid] {
        let houses = server
            .request_expect("GET", "/api/households", Some(&account.token), None, StatusCode::OK)
            .await;
        assert!(houses.as_array().unwrap().is_empty());
    }

    let store = server.store().await;
    assert!(store.get_household(&f.hid).await.unwrap().is_none());
    assert!(store.get_membership(&f.hid, &f.kid.user_id).await.unwrap().is_none());
    assert!(store.get_child(&f.hid, &f.kid_id).await.unwrap().is_none());
    assert!(store.list_tasks(&f.hid).await.unwrap().is_empty());
    assert!(store.list_rewards(&f.hid).await.unwrap().is_empty());
    assert!(
        store
            .list_assignments(&f.hid, None, None)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        store
            .list_completions(&f.hid, None, None)
            .await
            .unwrap()
            .is_empty()
    );
    assert!(
        store
            .list_redemptions_for_child(&f.kid_id, 1, 10)
            .await
            .unwrap()
            .is_empty()
    );
    let totals = store.compute_points(&f.kid_id).await.unwrap();
    assert_eq!((totals.earned, totals.spent), (0, 0));

    // Accounts outlive the household
    let (status, _) = server.login(&f.kid.email, PASSWORD).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn concurrent_redeems_never_overdraw() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let f = family(&server).await;
    let pt = &f.parent.token;

    let task = server
        .create(pt, &f.hid, "tasks", json!({"title": "Vacuum", "points": 7}))
        .await;
    let a = server
        .create(
            pt,
            &f.hid,
            "assignments",
            json!({"task_id": task["id"], "child_id": f.kid_id, "due_date": "2025-05-06"}),
        )
        .await;
    server
        .create(
            pt,
            &f.hid,
            &format!("assignments/{}/complete", str_field(&a, "id")),
            json!({}),
        )
        .await;
    let reward = server
        .create(pt, &f.hid, "rewards", json!({"title": "Ice cream", "cost": 5}))
        .await;
    let path = hh_path(&f.hid, &format!("rewards/{}/redeem", str_field(&reward, "id")));
    let body = json!({"child_id": f.kid_id});

    let (first, second) = tokio::join!(
        server.request("POST", &path, Some(&f.kid.token), Some(body.clone())),
        server.request("POST", &path, Some(pt), Some(body.clone())),
    );
    let mut statuses = [first.0, second.0];
    statuses.sort_by_key(|s| s.as_u16());
    assert_eq!(statuses, [StatusCode::CREATED, StatusCode::CONFLICT]);

    assert_eq!(points(&server, &f, &f.kid_id).await, 2);
    let history = server
        .request_expect(
            "GET",
            &hh_path(&f.hid, &format!("children/{}/redemptions", f.kid_id)),
            Some(pt),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}
