//! Integration tests for the SpaceY backend.

use std::sync::Arc;

use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::auth::password::hash_password;
use crate::auth::JwtManager;
use crate::config::{Config, LogFormat};
use crate::db::{init_database, Repository};
use crate::models::{AccountStatus, User};
use crate::search::SearchIndex;
use crate::{create_router, AppState};

const JWT_SECRET: &str = "integration-test-secret";
const ADMIN_PASSWORD: &str = "admin-password";
const USER_PASSWORD: &str = "user-password";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    repo: Arc<Repository>,
    admin_token: String,
    _temp_dir: TempDir,
}

impl TestFixture {
    async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.sqlite");
        let index_path = temp_dir.path().join("index");

        // Initialize database
        let pool = init_database(&db_path).await.expect("Failed to init DB");
        let repo = Arc::new(Repository::new(pool));

        // Initialize search index
        let search = Arc::new(SearchIndex::open(&index_path).expect("Failed to init search"));

        let admin_hash = hash_password(ADMIN_PASSWORD).unwrap();
        repo.ensure_admin("admin", &admin_hash).await.unwrap();

        let config = Config {
            db_path,
            index_path,
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "warn".to_string(),
            log_format: LogFormat::Text,
            jwt_secret: JWT_SECRET.to_string(),
            jwt_secret_configured: true,
            token_ttl_secs: 3600,
            mail_from: "no-reply@spacey.test".to_string(),
            admin_username: Some("admin".to_string()),
            admin_password: Some(ADMIN_PASSWORD.to_string()),
            cycle_sweep_secs: 30,
        };

        let state = AppState::new(repo.clone(), search, &config);
        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        // Spawn server
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        let mut fixture = TestFixture {
            client: Client::new(),
            base_url,
            repo,
            admin_token: String::new(),
            _temp_dir: temp_dir,
        };
        fixture.admin_token = fixture.login("admin", ADMIN_PASSWORD).await;
        fixture
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn login(&self, username: &str, password: &str) -> String {
        let resp = self
            .client
            .post(self.url("/api/auth/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200, "login failed for {}", username);
        let body: Value = resp.json().await.unwrap();
        body["data"]["token"].as_str().unwrap().to_string()
    }

    /// Create an active user directly and return it with a token.
    async fn active_user(&self, username: &str, email: Option<&str>) -> (User, String) {
        let hash = hash_password(USER_PASSWORD).unwrap();
        let user = self
            .repo
            .create_user(username, email, &hash, AccountStatus::Active, false)
            .await
            .unwrap();
        let token = self.login(username, USER_PASSWORD).await;
        (user, token)
    }

    fn get(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(token)
    }

    fn post(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(token)
    }

    fn put(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.put(self.url(path)).bearer_auth(token)
    }

    fn delete(&self, path: &str, token: &str) -> RequestBuilder {
        self.client.delete(self.url(path)).bearer_auth(token)
    }

    async fn create_sensor(&self, designation: &str, grade: &str) -> Value {
        let resp = self
            .post("/api/sensors", &self.admin_token)
            .json(&json!({
                "designation": designation,
                "requiredGrade": grade,
                "supplier": "Omega"
            }))
            .send()
            .await
            .unwrap();
        data(resp).await
    }

    async fn create_machine(&self, body: Value) -> Value {
        let resp = self
            .post("/api/machines", &self.admin_token)
            .json(&body)
            .send()
            .await
            .unwrap();
        data(resp).await
    }
}

/// Assert a 200 success envelope and return its data.
async fn data(resp: Response) -> Value {
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    body["data"].clone()
}

/// Assert an error envelope with the given status and code.
async fn expect_error(resp: Response, status: u16, code: &str) {
    assert_eq!(resp.status(), status);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], code);
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_missing_token_is_unauthorized() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/machines"))
        .send()
        .await
        .unwrap();
    expect_error(resp, 401, "UNAUTHORIZED").await;
}

#[tokio::test]
async fn test_invalid_token_is_unauthorized() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .get("/api/machines", "not.a.token")
        .send()
        .await
        .unwrap();
    expect_error(resp, 401, "UNAUTHORIZED").await;

    // Signed with another secret
    let (user, _) = fixture.active_user("mallory", None).await;
    let (forged, _) = JwtManager::new(b"some-other-secret", 3600)
        .issue(&user)
        .unwrap();
    let resp = fixture.get("/api/machines", &forged).send().await.unwrap();
    expect_error(resp, 401, "UNAUTHORIZED").await;
}

#[tokio::test]
async fn test_expired_token_is_unauthorized() {
    let fixture = TestFixture::new().await;
    let (user, _) = fixture.active_user("bob", None).await;

    let (expired, _) = JwtManager::new(JWT_SECRET.as_bytes(), -3600)
        .issue(&user)
        .unwrap();
    let resp = fixture.get("/api/auth/me", &expired).send().await.unwrap();
    expect_error(resp, 401, "UNAUTHORIZED").await;
}

#[tokio::test]
async fn test_token_accepted_from_cookie() {
    let fixture = TestFixture::new().await;
    let (_, token) = fixture.active_user("carol", None).await;

    let resp = fixture
        .client
        .get(fixture.url("/api/auth/me"))
        .header("Cookie", format!("token={}", token))
        .send()
        .await
        .unwrap();
    let me = data(resp).await;
    assert_eq!(me["username"], "carol");
}

#[tokio::test]
async fn test_non_admin_is_forbidden_on_admin_routes() {
    let fixture = TestFixture::new().await;
    let (_, token) = fixture.active_user("dave", None).await;

    let resp = fixture
        .post("/api/machines", &token)
        .json(&json!({ "name": "Lathe", "mainPole": "Toulouse" }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 403, "FORBIDDEN").await;

    let resp = fixture.get("/api/users", &token).send().await.unwrap();
    expect_error(resp, 403, "FORBIDDEN").await;
}

#[tokio::test]
async fn test_signup_approval_flow() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/auth/register"))
        .json(&json!({
            "username": "erin",
            "email": "erin@example.com",
            "password": USER_PASSWORD
        }))
        .send()
        .await
        .unwrap();
    let user = data(resp).await;
    assert_eq!(user["status"], "pending");
    assert_eq!(user["grade"], "Apprentice");
    assert_eq!(user["points"], 0);
    let user_id = user["id"].as_str().unwrap().to_string();

    // Pending accounts cannot sign in
    let resp = fixture
        .client
        .post(fixture.url("/api/auth/login"))
        .json(&json!({ "username": "erin", "password": USER_PASSWORD }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 403, "FORBIDDEN").await;

    let pending = data(
        fixture
            .get("/api/users/pending", &fixture.admin_token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(pending.as_array().unwrap().len(), 1);

    let approved = data(
        fixture
            .post(&format!("/api/users/{}/approve", user_id), &fixture.admin_token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(approved["status"], "active");

    // Only pending accounts can be reviewed
    let resp = fixture
        .post(&format!("/api/users/{}/reject", user_id), &fixture.admin_token)
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    let token = fixture.login("erin", USER_PASSWORD).await;
    let me = data(fixture.get("/api/auth/me", &token).send().await.unwrap()).await;
    assert_eq!(me["id"], user_id.as_str());

    let outbox = data(
        fixture
            .get("/api/admin/outbox", &fixture.admin_token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    let outbox = outbox.as_array().unwrap();
    assert_eq!(outbox.len(), 1);
    assert_eq!(outbox[0]["recipient"], "erin@example.com");
}

#[tokio::test]
async fn test_register_validation() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/auth/register"))
        .json(&json!({ "username": "frank", "password": "short" }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;

    let resp = fixture
        .client
        .post(fixture.url("/api/auth/register"))
        .json(&json!({ "username": "admin", "password": USER_PASSWORD }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    let resp = fixture
        .client
        .post(fixture.url("/api/auth/login"))
        .json(&json!({ "username": "admin", "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 401, "UNAUTHORIZED").await;
}

#[tokio::test]
async fn test_filter_machines_by_pole() {
    let fixture = TestFixture::new().await;
    let (_, token) = fixture.active_user("gina", None).await;

    for (name, main_pole, sub_pole) in [
        ("Lathe", "Toulouse", "Workshop A"),
        ("Press", "Toulouse", "Workshop B"),
        ("Drill", "Kourou", "Hangar"),
    ] {
        fixture
            .create_machine(json!({ "name": name, "mainPole": main_pole, "subPole": sub_pole }))
            .await;
    }

    let page = data(
        fixture
            .get("/api/machines?mainPole=toulouse", &token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(page["total"], 2);
    let items = page["items"].as_array().unwrap();
    assert!(items.iter().all(|m| m["mainPole"] == "Toulouse"));

    let page = data(
        fixture
            .get("/api/machines?mainPole=Toulouse&subPole=Workshop%20B", &token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(page["total"], 1);
    assert_eq!(page["items"][0]["name"], "Press");

    let page = data(
        fixture
            .get("/api/machines?perPage=2&page=2", &token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(page["total"], 3);
    assert_eq!(page["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_start_and_end_cycle() {
    let fixture = TestFixture::new().await;
    let (user, token) = fixture.active_user("hank", None).await;

    let machine = fixture
        .create_machine(json!({
            "name": "Laser Cutter",
            "mainPole": "Toulouse",
            "maxUsers": 2,
            "pointsPerCycle": 25
        }))
        .await;
    assert_eq!(machine["status"], "available");
    let machine_id = machine["id"].as_str().unwrap();

    let started = data(
        fixture
            .post(&format!("/api/machines/{}/start-cycle", machine_id), &token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(started["machine"]["status"], "inUse");
    assert_eq!(started["machine"]["currentUsers"], json!([user.id]));
    assert_eq!(started["pointsAwarded"], 25);
    assert_eq!(started["userPoints"], 25);
    assert_eq!(started["cycle"]["userId"], user.id.as_str());

    // Joining twice is refused
    let resp = fixture
        .post(&format!("/api/machines/{}/start-cycle", machine_id), &token)
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    let me = data(fixture.get("/api/auth/me", &token).send().await.unwrap()).await;
    assert_eq!(me["points"], 25);

    let ended = data(
        fixture
            .post(&format!("/api/machines/{}/end-cycle", machine_id), &token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(ended["status"], "available");
    assert_eq!(ended["currentUsers"], json!([]));

    let resp = fixture
        .post(&format!("/api/machines/{}/end-cycle", machine_id), &token)
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    let cycles = data(
        fixture
            .get(&format!("/api/users/{}/cycles", user.id), &token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    let cycles = cycles.as_array().unwrap();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0]["endedAt"].is_string());
}

#[tokio::test]
async fn test_start_cycle_refusals() {
    let fixture = TestFixture::new().await;
    let (_, first) = fixture.active_user("ivan", None).await;
    let (_, second) = fixture.active_user("judy", None).await;

    let resp = fixture
        .post("/api/machines/does-not-exist/start-cycle", &first)
        .send()
        .await
        .unwrap();
    expect_error(resp, 404, "NOT_FOUND").await;

    // Full machine
    let machine = fixture
        .create_machine(json!({ "name": "Press", "mainPole": "Kourou", "maxUsers": 1 }))
        .await;
    let path = format!("/api/machines/{}/start-cycle", machine["id"].as_str().unwrap());
    data(fixture.post(&path, &first).send().await.unwrap()).await;
    let resp = fixture.post(&path, &second).send().await.unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    // Machine under maintenance
    let machine = fixture
        .create_machine(json!({ "name": "Mill", "mainPole": "Kourou", "status": "maintenance" }))
        .await;
    let path = format!("/api/machines/{}/start-cycle", machine["id"].as_str().unwrap());
    let resp = fixture.post(&path, &second).send().await.unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    // Sensor requiring a higher grade
    let sensor = fixture.create_sensor("Plasma probe", "Engineer").await;
    let machine = fixture
        .create_machine(json!({
            "name": "Plasma Torch",
            "mainPole": "Kourou",
            "availableSensors": [sensor["id"]]
        }))
        .await;
    let path = format!("/api/machines/{}/start-cycle", machine["id"].as_str().unwrap());
    let resp = fixture.post(&path, &second).send().await.unwrap();
    expect_error(resp, 403, "FORBIDDEN").await;

    let details = data(
        fixture
            .get(&format!("/api/machines/{}", machine["id"].as_str().unwrap()), &second)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(details["requiredGrade"], "Engineer");
}

#[tokio::test]
async fn test_machine_update_version_conflict() {
    let fixture = TestFixture::new().await;
    let machine = fixture
        .create_machine(json!({ "name": "Lathe", "mainPole": "Toulouse" }))
        .await;
    let path = format!("/api/machines/{}", machine["id"].as_str().unwrap());

    let updated = data(
        fixture
            .put(&path, &fixture.admin_token)
            .json(&json!({ "name": "Big Lathe", "expectedVersion": 1 }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(updated["name"], "Big Lathe");
    assert_eq!(updated["version"], 2);

    let resp = fixture
        .put(&path, &fixture.admin_token)
        .json(&json!({ "name": "Stale", "expectedVersion": 1 }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    let resp = fixture
        .delete(&path, &fixture.admin_token)
        .send()
        .await
        .unwrap();
    data(resp).await;
    let resp = fixture.get(&path, &fixture.admin_token).send().await.unwrap();
    expect_error(resp, 404, "NOT_FOUND").await;
}

#[tokio::test]
async fn test_daily_usage_series() {
    let fixture = TestFixture::new().await;
    let (_, token) = fixture.active_user("kate", None).await;

    let sensor = fixture.create_sensor("Thermocouple", "Apprentice").await;
    let sensor_id = sensor["id"].as_str().unwrap();
    let machine = fixture
        .create_machine(json!({
            "name": "Furnace",
            "mainPole": "Toulouse",
            "availableSensors": [sensor_id]
        }))
        .await;
    let machine_id = machine["id"].as_str().unwrap();

    for (at, value) in [
        ("2024-03-14T08:00:03Z", 12.5),
        ("2024-03-14T08:00:07Z", 13.0),
        ("2024-03-14T10:15:00+02:00", 40.0),
        ("2024-03-15T00:00:00Z", 99.0),
    ] {
        let resp = fixture
            .post(&format!("/api/machines/{}/readings", machine_id), &fixture.admin_token)
            .json(&json!({ "sensorId": sensor_id, "value": value, "recordedAt": at }))
            .send()
            .await
            .unwrap();
        data(resp).await;
    }

    let series = data(
        fixture
            .get(
                &format!(
                    "/api/machines/{}/usage?sensorId={}&day=2024-03-14",
                    machine_id, sensor_id
                ),
                &token,
            )
            .send()
            .await
            .unwrap(),
    )
    .await;

    let slots = series["slots"].as_array().unwrap();
    assert_eq!(slots.len(), 8_640);
    assert_eq!(series["readingCount"], 3);
    assert_eq!(slots[0]["time"], "00:00:00");
    assert_eq!(slots[8_639]["time"], "23:59:50");

    // 08:00:00 slot keeps the later of its two readings
    assert_eq!(slots[2_880]["time"], "08:00:00");
    assert_eq!(slots[2_880]["value"], 13.0);
    // 10:15 +02:00 is 08:15 UTC
    assert_eq!(slots[2_970]["value"], 40.0);
    assert_eq!(slots[2_881]["value"], 0.0);

    assert_eq!(series["viewport"]["start"], 2_880 - 360);
    assert_eq!(series["viewport"]["end"], 2_970 + 360);

    // Sensor not attached to the machine
    let resp = fixture
        .post(&format!("/api/machines/{}/readings", machine_id), &fixture.admin_token)
        .json(&json!({ "sensorId": "unknown", "value": 1.0 }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;
}

#[tokio::test]
async fn test_grade_upgrade_ticket_approved() {
    let fixture = TestFixture::new().await;
    let (user, token) = fixture.active_user("liam", Some("liam@example.com")).await;

    // Not enough points yet
    let resp = fixture
        .post("/api/tickets", &token)
        .json(&json!({ "type": "gradeUpgrade", "payload": { "requestedGrade": "Operator" } }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;

    data(
        fixture
            .put(&format!("/api/users/{}", user.id), &fixture.admin_token)
            .json(&json!({ "points": 150 }))
            .send()
            .await
            .unwrap(),
    )
    .await;

    // Skipping a grade is refused
    let resp = fixture
        .post("/api/tickets", &token)
        .json(&json!({ "type": "gradeUpgrade", "payload": { "requestedGrade": "Technician" } }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;

    let ticket = data(
        fixture
            .post("/api/tickets", &token)
            .json(&json!({ "type": "gradeUpgrade", "payload": { "requestedGrade": "Operator" } }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(ticket["status"], "pending");
    assert_eq!(ticket["type"], "gradeUpgrade");
    let ticket_id = ticket["id"].as_str().unwrap();

    // One pending ticket per type
    let resp = fixture
        .post("/api/tickets", &token)
        .json(&json!({ "type": "gradeUpgrade", "payload": { "requestedGrade": "Operator" } }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    // Users cannot review tickets
    let resp = fixture
        .post(&format!("/api/tickets/{}/approve", ticket_id), &token)
        .send()
        .await
        .unwrap();
    expect_error(resp, 403, "FORBIDDEN").await;

    let reviewed = data(
        fixture
            .post(&format!("/api/tickets/{}/approve", ticket_id), &fixture.admin_token)
            .json(&json!({ "comment": "Well earned" }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(reviewed["status"], "approved");
    assert_eq!(reviewed["comment"], "Well earned");

    let me = data(fixture.get("/api/auth/me", &token).send().await.unwrap()).await;
    assert_eq!(me["grade"], "Operator");

    let resp = fixture
        .post(&format!("/api/tickets/{}/reject", ticket_id), &fixture.admin_token)
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    let outbox = data(
        fixture
            .get("/api/admin/outbox", &fixture.admin_token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(outbox[0]["recipient"], "liam@example.com");
}

#[tokio::test]
async fn test_grade_upgrade_ticket_rejected() {
    let fixture = TestFixture::new().await;
    let (user, token) = fixture.active_user("mia", None).await;
    data(
        fixture
            .put(&format!("/api/users/{}", user.id), &fixture.admin_token)
            .json(&json!({ "points": 100 }))
            .send()
            .await
            .unwrap(),
    )
    .await;

    let ticket = data(
        fixture
            .post("/api/tickets", &token)
            .json(&json!({ "type": "gradeUpgrade", "payload": { "requestedGrade": "Operator" } }))
            .send()
            .await
            .unwrap(),
    )
    .await;

    let reviewed = data(
        fixture
            .post(
                &format!("/api/tickets/{}/reject", ticket["id"].as_str().unwrap()),
                &fixture.admin_token,
            )
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(reviewed["status"], "rejected");

    let me = data(fixture.get("/api/auth/me", &token).send().await.unwrap()).await;
    assert_eq!(me["grade"], "Apprentice");
}

#[tokio::test]
async fn test_machine_tickets() {
    let fixture = TestFixture::new().await;
    let (_, token) = fixture.active_user("nina", None).await;

    let ticket = data(
        fixture
            .post("/api/tickets", &token)
            .json(&json!({
                "type": "machineCreation",
                "payload": { "name": "Wind Tunnel", "mainPole": "Kourou" }
            }))
            .send()
            .await
            .unwrap(),
    )
    .await;

    data(
        fixture
            .post(
                &format!("/api/tickets/{}/approve", ticket["id"].as_str().unwrap()),
                &fixture.admin_token,
            )
            .send()
            .await
            .unwrap(),
    )
    .await;

    let page = data(fixture.get("/api/machines", &token).send().await.unwrap()).await;
    assert_eq!(page["total"], 1);
    let machine_id = page["items"][0]["id"].as_str().unwrap().to_string();

    let hits = data(
        fixture
            .get("/api/search?q=tunnel", &token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(hits["results"][0]["kind"], "machine");

    let ticket = data(
        fixture
            .post("/api/tickets", &token)
            .json(&json!({ "type": "machineDeletion", "payload": { "machineId": machine_id } }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    let ticket_id = ticket["id"].as_str().unwrap().to_string();

    // The requester may withdraw it
    let cancelled = data(
        fixture
            .post(&format!("/api/tickets/{}/cancel", ticket_id), &token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(cancelled["status"], "cancelled");

    let resp = fixture
        .post(&format!("/api/tickets/{}/approve", ticket_id), &fixture.admin_token)
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    let mine = data(fixture.get("/api/tickets", &token).send().await.unwrap()).await;
    assert_eq!(mine.as_array().unwrap().len(), 2);

    let resp = fixture
        .post("/api/tickets", &token)
        .json(&json!({ "type": "machineDeletion", "payload": { "machineId": "missing" } }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 404, "NOT_FOUND").await;
}

#[tokio::test]
async fn test_ticket_visibility() {
    let fixture = TestFixture::new().await;
    let (_, owner) = fixture.active_user("oscar", None).await;
    let (_, other) = fixture.active_user("paula", None).await;

    let ticket = data(
        fixture
            .post("/api/tickets", &owner)
            .json(&json!({
                "type": "machineCreation",
                "payload": { "name": "Crane", "mainPole": "Kourou" }
            }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    let path = format!("/api/tickets/{}", ticket["id"].as_str().unwrap());

    let resp = fixture.get(&path, &other).send().await.unwrap();
    expect_error(resp, 403, "FORBIDDEN").await;
    let theirs = data(fixture.get("/api/tickets", &other).send().await.unwrap()).await;
    assert!(theirs.as_array().unwrap().is_empty());

    data(fixture.get(&path, &fixture.admin_token).send().await.unwrap()).await;
    let all = data(
        fixture
            .get("/api/tickets?status=pending", &fixture.admin_token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(all.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_news_crud() {
    let fixture = TestFixture::new().await;
    let (_, token) = fixture.active_user("quinn", None).await;

    let resp = fixture
        .post("/api/news", &token)
        .json(&json!({ "title": "Hello" }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 403, "FORBIDDEN").await;

    let news = data(
        fixture
            .post("/api/news", &fixture.admin_token)
            .json(&json!({ "title": "Launch window", "body": "T-minus 3 days" }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    let path = format!("/api/news/{}", news["id"].as_str().unwrap());

    let updated = data(
        fixture
            .put(&path, &fixture.admin_token)
            .json(&json!({ "body": "T-minus 2 days" }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(updated["title"], "Launch window");
    assert_eq!(updated["body"], "T-minus 2 days");

    let list = data(fixture.get("/api/news", &token).send().await.unwrap()).await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    data(fixture.delete(&path, &fixture.admin_token).send().await.unwrap()).await;
    let resp = fixture.get(&path, &token).send().await.unwrap();
    expect_error(resp, 404, "NOT_FOUND").await;
}

#[tokio::test]
async fn test_sensor_attached_cannot_be_deleted() {
    let fixture = TestFixture::new().await;
    let sensor = fixture.create_sensor("Strain gauge", "Operator").await;
    let sensor_id = sensor["id"].as_str().unwrap();
    fixture
        .create_machine(json!({
            "name": "Test Bench",
            "mainPole": "Toulouse",
            "availableSensors": [sensor_id]
        }))
        .await;

    let resp = fixture
        .delete(&format!("/api/sensors/{}", sensor_id), &fixture.admin_token)
        .send()
        .await
        .unwrap();
    expect_error(resp, 409, "CONFLICT").await;

    // The refused delete is rolled back
    let kept = data(
        fixture
            .get(&format!("/api/sensors/{}", sensor_id), &fixture.admin_token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(kept["designation"], "Strain gauge");

    let resp = fixture
        .post("/api/machines", &fixture.admin_token)
        .json(&json!({ "name": "Ghost", "mainPole": "Toulouse", "availableSensors": ["nope"] }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;
}

#[tokio::test]
async fn test_leaderboard_and_expired_cycles() {
    let fixture = TestFixture::new().await;
    let (_, rita) = fixture.active_user("rita", None).await;
    let (_, sam) = fixture.active_user("sam", None).await;

    let machine = fixture
        .create_machine(json!({
            "name": "Sprint Bike",
            "mainPole": "Kourou",
            "maxUsers": 2,
            "pointsPerCycle": 40,
            "cycleDurationSecs": 1
        }))
        .await;
    let machine_id = machine["id"].as_str().unwrap();
    let path = format!("/api/machines/{}/start-cycle", machine_id);
    data(fixture.post(&path, &rita).send().await.unwrap()).await;

    let board = data(fixture.get("/api/leaderboard", &sam).send().await.unwrap()).await;
    assert_eq!(board[0]["username"], "rita");
    assert_eq!(board[0]["rank"], 1);
    assert_eq!(board[0]["points"], 40);

    tokio::time::sleep(tokio::time::Duration::from_millis(1_100)).await;
    assert_eq!(fixture.repo.release_expired_cycles().await.unwrap(), 1);

    let machine = fixture.repo.get_machine(machine_id).await.unwrap().unwrap();
    assert!(machine.current_users.is_empty());
    let cycles = fixture
        .repo
        .list_cycles_for_machine(machine_id)
        .await
        .unwrap();
    assert_eq!(cycles[0].ended_at.as_deref(), Some(cycles[0].ends_at.as_str()));
}

#[tokio::test]
async fn test_malformed_input_uses_error_envelope() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .post(fixture.url("/api/auth/register"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "BAD_REQUEST").await;

    let resp = fixture
        .post("/api/machines", &fixture.admin_token)
        .json(&json!({ "name": "Lathe", "mainPole": "Toulouse", "maxUsers": "many" }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "BAD_REQUEST").await;

    let sensor = fixture.create_sensor("Thermocouple", "Apprentice").await;
    let sensor_id = sensor["id"].as_str().unwrap();
    let machine = fixture
        .create_machine(json!({
            "name": "Furnace",
            "mainPole": "Toulouse",
            "availableSensors": [sensor_id]
        }))
        .await;
    let resp = fixture
        .get(
            &format!(
                "/api/machines/{}/usage?sensorId={}&day=yesterday",
                machine["id"].as_str().unwrap(),
                sensor_id
            ),
            &fixture.admin_token,
        )
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "BAD_REQUEST").await;

    // A review body is optional, but must be valid when present
    let (_, token) = fixture.active_user("quentin", None).await;
    let ticket = data(
        fixture
            .post("/api/tickets", &token)
            .json(&json!({
                "type": "machineCreation",
                "payload": { "name": "Wind Tunnel", "mainPole": "Kourou" }
            }))
            .send()
            .await
            .unwrap(),
    )
    .await;
    let resp = fixture
        .post(
            &format!("/api/tickets/{}/reject", ticket["id"].as_str().unwrap()),
            &fixture.admin_token,
        )
        .header("content-type", "application/json")
        .body("[")
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "BAD_REQUEST").await;
}

#[tokio::test]
async fn test_cycle_duration_upper_bound() {
    let fixture = TestFixture::new().await;
    let (_, token) = fixture.active_user("tom", None).await;

    let resp = fixture
        .post("/api/machines", &fixture.admin_token)
        .json(&json!({
            "name": "Centrifuge",
            "mainPole": "Kourou",
            "cycleDurationSecs": 100_000_000_000_000_i64
        }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;

    let machine = fixture
        .create_machine(json!({ "name": "Centrifuge", "mainPole": "Kourou" }))
        .await;
    let resp = fixture
        .put(
            &format!("/api/machines/{}", machine["id"].as_str().unwrap()),
            &fixture.admin_token,
        )
        .json(&json!({ "cycleDurationSecs": 100_000_000_000_000_i64 }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;

    let resp = fixture
        .post("/api/tickets", &token)
        .json(&json!({
            "type": "machineCreation",
            "payload": {
                "name": "Vacuum Chamber",
                "mainPole": "Kourou",
                "cycleDurationSecs": 100_000_000_000_000_i64
            }
        }))
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;

    // The machine is still usable
    let path = format!("/api/machines/{}/start-cycle", machine["id"].as_str().unwrap());
    data(fixture.post(&path, &token).send().await.unwrap()).await;
}

#[tokio::test]
async fn test_search_paging() {
    let fixture = TestFixture::new().await;
    for name in ["Lathe One", "Lathe Two", "Lathe Three"] {
        fixture
            .create_machine(json!({ "name": name, "mainPole": "Toulouse" }))
            .await;
    }

    let page = data(
        fixture
            .get("/api/search?q=lathe&limit=2", &fixture.admin_token)
            .send()
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(page["results"].as_array().unwrap().len(), 2);
    assert_eq!(page["total"], 3);
    assert_eq!(page["limit"], 2);

    let resp = fixture
        .get(
            &format!("/api/search?q=lathe&offset={}", usize::MAX - 5),
            &fixture.admin_token,
        )
        .send()
        .await
        .unwrap();
    expect_error(resp, 400, "VALIDATION_ERROR").await;
}
