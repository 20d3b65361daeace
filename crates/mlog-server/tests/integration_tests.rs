use axum::http::StatusCode;
use axum_test::multipart::{MultipartForm, Part};
use axum_test::TestServer;
use mlog_proto::{CrewPage, LoginResponse, Mission, MissionList, ServerEvent, UserInfo};
use mlog_server::config::{Environment, Settings};
use mlog_server::{auth, build_router, db::MissionDb, generator, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    server: TestServer,
    state: Arc<AppState>,
    _uploads: TempDir,
}

async fn harness() -> Harness {
    harness_with(|_| {}).await
}

async fn harness_with(configure: impl FnOnce(&mut Settings)) -> Harness {
    let uploads = TempDir::new().unwrap();
    let mut settings = Settings::default();
    settings.storage.upload_dir = uploads.path().display().to_string();
    configure(&mut settings);
    let db = MissionDb::in_memory().await.unwrap();
    let state = AppState::new(db, settings);
    let server = TestServer::new(build_router(state.clone())).unwrap();
    Harness {
        server,
        state,
        _uploads: uploads,
    }
}

fn apollo() -> Value {
    json!({
        "name": "Apollo 11",
        "status": "Completed",
        "type": "Exploration",
        "destination": "Moon",
        "launchDate": "1969-07-16",
        "budget": 355000000.0,
        "crewMembers": ["Neil Armstrong", "Buzz Aldrin"]
    })
}

async fn create_mission(server: &TestServer, body: Value) -> Mission {
    let response = server.post("/api/missions").json(&body).await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Mission>()
}

async fn register_and_login(server: &TestServer, username: &str, role: &str) -> LoginResponse {
    server
        .post("/api/users/register")
        .json(&json!({ "username": username, "password": "correct horse", "role": role }))
        .await
        .assert_status(StatusCode::CREATED);
    let response = server
        .post("/api/users/login")
        .json(&json!({ "username": username, "password": "correct horse" }))
        .await;
    response.assert_status_ok();
    response.json::<LoginResponse>()
}

#[tokio::test]
async fn health_reports_ok() {
    let h = harness().await;
    let response = h.server.get("/api/health").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "status": "ok" }));
}

#[tokio::test]
async fn invalid_mission_is_rejected_with_field_errors() {
    let h = harness().await;
    let response = h
        .server
        .post("/api/missions")
        .json(&json!({ "name": "Ab", "budget": -1 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert!(body["errors"]["name"].is_string());
    assert!(body["errors"]["budget"].is_string());

    let list = h.server.get("/api/missions").await.json::<MissionList>();
    assert!(list.missions.is_empty());
}

#[tokio::test]
async fn mission_crud_lifecycle() {
    let h = harness().await;
    let created = create_mission(&h.server, apollo()).await;
    assert_eq!(created.name, "Apollo 11");
    assert_eq!(created.crew_members.len(), 2);

    let fetched = h
        .server
        .get(&format!("/api/missions/{}", created.id))
        .await
        .json::<Mission>();
    assert_eq!(fetched, created);

    let mut replacement = apollo();
    replacement["status"] = json!("Failed");
    replacement["destination"] = json!("Mars");
    let updated = h
        .server
        .put(&format!("/api/missions/{}", created.id))
        .json(&replacement)
        .await
        .json::<Mission>();
    assert_eq!(updated.destination, "Mars");

    let patched = h
        .server
        .patch(&format!("/api/missions/{}", created.id))
        .json(&json!({ "budget": 42.5 }))
        .await
        .json::<Mission>();
    assert_eq!(patched.budget, 42.5);
    assert_eq!(patched.destination, "Mars");

    h.server
        .delete(&format!("/api/missions/{}", created.id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    h.server
        .get(&format!("/api/missions/{}", created.id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    h.server
        .delete(&format!("/api/missions/{}", created.id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn missions_filter_and_sort() {
    let h = harness().await;
    for (name, destination, budget) in [
        ("Ares One", "Mars", 300.0),
        ("Selene", "Moon", 100.0),
        ("Ares Two", "Mars", 200.0),
    ] {
        let mut body = apollo();
        body["name"] = json!(name);
        body["destination"] = json!(destination);
        body["budget"] = json!(budget);
        create_mission(&h.server, body).await;
    }

    let by_destination = h
        .server
        .get("/api/missions")
        .add_query_param("search", "mars")
        .add_query_param("filterType", "destination")
        .add_query_param("sortBy", "budget")
        .add_query_param("sortOrder", "asc")
        .await
        .json::<MissionList>();
    let names: Vec<_> = by_destination.missions.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, ["Ares Two", "Ares One"]);

    let by_budget = h
        .server
        .get("/api/missions")
        .add_query_param("sortBy", "budget")
        .add_query_param("sortOrder", "desc")
        .await
        .json::<MissionList>();
    let budgets: Vec<_> = by_budget.missions.iter().map(|m| m.budget).collect();
    assert_eq!(budgets, [300.0, 200.0, 100.0]);
}

#[tokio::test]
async fn crew_assignment_and_listing() {
    let h = harness().await;
    let mission = create_mission(&h.server, apollo()).await;

    let crew = h
        .server
        .post("/api/crew")
        .json(&json!({
            "name": "Valentina Tereshkova",
            "role": "Pilot",
            "nationality": "Russian",
            "age": 26,
            "experience": 3
        }))
        .await;
    crew.assert_status(StatusCode::CREATED);
    let crew_id = crew.json::<Value>()["id"].as_i64().unwrap();

    let assigned = h
        .server
        .post(&format!("/api/missions/{}/crew", mission.id))
        .json(&json!({ "crewMemberId": crew_id, "roleInMission": "Commander" }))
        .await;
    assigned.assert_status(StatusCode::CREATED);
    let assigned = assigned.json::<Mission>();
    assert_eq!(assigned.assignments.len(), 1);
    assert_eq!(assigned.assignments[0].role_in_mission, "Commander");

    let page = h.server.get("/api/crew").await.json::<CrewPage>();
    assert_eq!(page.total, 1);
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.crew_members[0].missions[0].mission_id, mission.id);

    h.server
        .post(&format!("/api/missions/{}/crew", mission.id))
        .json(&json!({ "crewMemberId": 999, "roleInMission": "Cook" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);

    h.server
        .delete(&format!("/api/missions/{}/crew/{}", mission.id, crew_id))
        .await
        .assert_status(StatusCode::NO_CONTENT);
    h.server
        .delete(&format!("/api/missions/{}/crew/{}", mission.id, crew_id))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn crew_validation_and_pagination() {
    let h = harness().await;
    let invalid = h
        .server
        .post("/api/crew")
        .json(&json!({ "name": "", "age": 12, "experience": -1, "status": "lost" }))
        .await;
    invalid.assert_status(StatusCode::BAD_REQUEST);
    let errors = &invalid.json::<Value>()["errors"];
    for field in ["name", "role", "nationality", "age", "experience", "status"] {
        assert!(errors[field].is_string(), "missing error for {}", field);
    }

    for i in 0..3 {
        h.server
            .post("/api/crew")
            .json(&json!({
                "name": format!("Crew {}", ["A", "B", "C"][i]),
                "role": "Engineer",
                "nationality": "Chilean",
                "age": 30 + i,
                "experience": i
            }))
            .await
            .assert_status(StatusCode::CREATED);
    }
    let page = h
        .server
        .get("/api/crew")
        .add_query_param("limit", 2)
        .add_query_param("page", 2)
        .await
        .json::<CrewPage>();
    assert_eq!(page.total, 3);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.page, 2);
    assert_eq!(page.crew_members.len(), 1);
    assert_eq!(page.crew_members[0].member.name, "Crew C");

    let far = h
        .server
        .get("/api/crew")
        .add_query_param("page", i64::MAX)
        .add_query_param("limit", 10)
        .await;
    far.assert_status_ok();
    let far = far.json::<CrewPage>();
    assert_eq!(far.page, i64::MAX);
    assert_eq!(far.total, 3);
    assert!(far.crew_members.is_empty());
}

#[tokio::test]
async fn register_login_and_two_factor_flow() {
    let h = harness().await;
    let session = register_and_login(&h.server, "sally", "user").await;
    assert_eq!(session.user.username, "sally");

    h.server
        .post("/api/users/register")
        .json(&json!({ "username": "sally", "password": "other" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
    h.server
        .post("/api/users/login")
        .json(&json!({ "username": "sally", "password": "wrong" }))
        .await
        .assert_status(StatusCode::UNAUTHORIZED);

    let setup = h
        .server
        .post("/api/users/2fa/setup")
        .authorization_bearer(&session.token)
        .await
        .json::<Value>();
    let secret = setup["secret"].as_str().unwrap().to_string();
    assert!(setup["otpauthUrl"].as_str().unwrap().starts_with("otpauth://totp/"));
    assert!(setup["qrCode"].as_str().unwrap().starts_with("data:image/png;base64,"));

    h.server
        .post("/api/users/2fa/verify")
        .authorization_bearer(&session.token)
        .json(&json!({ "token": "000000x" }))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let code = auth::build_totp(&secret, "test", "sally")
        .unwrap()
        .generate_current()
        .unwrap();
    h.server
        .post("/api/users/2fa/verify")
        .authorization_bearer(&session.token)
        .json(&json!({ "token": code }))
        .await
        .assert_status_ok();

    let missing = h
        .server
        .post("/api/users/login")
        .json(&json!({ "username": "sally", "password": "correct horse" }))
        .await;
    missing.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(missing.json::<Value>()["requiresTwoFactor"], json!(true));

    let with_code = h
        .server
        .post("/api/users/login")
        .json(&json!({ "username": "sally", "password": "correct horse", "token": code }))
        .await;
    with_code.assert_status_ok();
    assert!(with_code.json::<LoginResponse>().user.two_factor_enabled);
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    let h = harness().await;
    h.server
        .post("/api/users/2fa/setup")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
    h.server
        .get("/api/users/monitored")
        .authorization_bearer("not-a-jwt")
        .await
        .assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn monitored_users_are_admin_only() {
    let h = harness().await;
    let admin = register_and_login(&h.server, "root", "admin").await;
    let user = register_and_login(&h.server, "joe", "superuser").await;
    assert_eq!(
        user.user,
        UserInfo {
            id: user.user.id,
            username: "joe".to_string(),
            role: mlog_proto::Role::User,
            two_factor_enabled: false,
        }
    );

    h.server
        .get("/api/users/monitored")
        .authorization_bearer(&user.token)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    h.server
        .post("/api/users/monitored")
        .authorization_bearer(&admin.token)
        .json(&json!({ "username": "nobody" }))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    h.server
        .post("/api/users/monitored")
        .authorization_bearer(&admin.token)
        .json(&json!({}))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let added = h
        .server
        .post("/api/users/monitored")
        .authorization_bearer(&admin.token)
        .json(&json!({ "username": "joe" }))
        .await;
    added.assert_status(StatusCode::CREATED);
    assert_eq!(added.json::<Value>()["reason"], "Manually added by admin");

    let listed = h
        .server
        .get("/api/users/monitored")
        .authorization_bearer(&admin.token)
        .await
        .json::<Value>();
    assert_eq!(listed[0]["username"], "joe");
}

#[tokio::test]
async fn authenticated_writes_are_logged() {
    let h = harness().await;
    let session = register_and_login(&h.server, "writer", "user").await;
    let response = h
        .server
        .post("/api/missions")
        .authorization_bearer(&session.token)
        .json(&apollo())
        .await;
    response.assert_status(StatusCode::CREATED);
    create_mission(&h.server, apollo()).await;

    let since = chrono::Utc::now() - chrono::Duration::minutes(1);
    let counts = h.state.db.action_counts_since(since).await.unwrap();
    assert_eq!(counts, vec![(session.user.id, 1)]);
}

#[tokio::test]
async fn upload_stores_file() {
    let h = harness().await;
    let form = MultipartForm::new().add_part(
        "file",
        Part::bytes(b"launch checklist".to_vec())
            .file_name("check list.txt")
            .mime_type("text/plain"),
    );
    let response = h.server.post("/api/upload").multipart(form).await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["message"], "Upload successful");
    assert_eq!(body["file"]["originalName"], "check list.txt");
    assert_eq!(body["file"]["size"], 16);
    let stored = std::fs::read(body["file"]["path"].as_str().unwrap()).unwrap();
    assert_eq!(stored, b"launch checklist");

    let empty = MultipartForm::new().add_text("note", "no file here");
    h.server
        .post("/api/upload")
        .multipart(empty)
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generation_start_stop_is_idempotent() {
    let h = harness().await;
    let status = |r: axum_test::TestResponse| r.json::<Value>()["status"].clone();

    assert_eq!(status(h.server.post("/api/generation/stop").await), "Not running");
    assert_eq!(status(h.server.post("/api/generation/start").await), "Started generation");
    assert_eq!(status(h.server.post("/api/generation/start").await), "Already running");
    assert_eq!(status(h.server.post("/api/generation/stop").await), "Stopped generation");
    assert_eq!(status(h.server.post("/api/generation/stop").await), "Not running");
}

#[tokio::test]
async fn generated_missions_reach_every_subscriber_in_order() {
    let h = harness().await;
    let mut first = h.state.events.subscribe();
    let mut second = h.state.events.subscribe();

    let a = generator::generate_once(&h.state.db, &h.state.events).await.unwrap();
    let b = generator::generate_once(&h.state.db, &h.state.events).await.unwrap();

    for rx in [&mut first, &mut second] {
        for expected in [&a, &b] {
            let ServerEvent::MissionUpdate { new_mission } =
                serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(&new_mission, expected);
        }
    }

    let list = h.server.get("/api/missions").await.json::<MissionList>();
    assert_eq!(list.missions.len(), 2);
}

#[tokio::test]
async fn statistics_report_nationality_success() {
    let h = harness().await;
    let mission = create_mission(&h.server, apollo()).await;
    let crew_id = h
        .server
        .post("/api/crew")
        .json(&json!({
            "name": "Neil Armstrong",
            "role": "Commander",
            "nationality": "American",
            "age": 38,
            "experience": 10
        }))
        .await
        .json::<Value>()["id"]
        .as_i64()
        .unwrap();
    h.server
        .post(&format!("/api/missions/{}/crew", mission.id))
        .json(&json!({ "crewMemberId": crew_id, "roleInMission": "Commander" }))
        .await
        .assert_status(StatusCode::CREATED);

    let report = h
        .server
        .get("/api/statistics/mission-success-by-nationality")
        .await
        .json::<Value>();
    assert_eq!(report["summary"]["total_nationalities"], 1);
    assert_eq!(report["data"][0]["nationality"], "American");
    assert_eq!(report["data"][0]["success_rate"], 100.0);
    assert_eq!(report["data"][0]["status"], "Good");

    let budgets = h
        .server
        .get("/api/statistics/mission-budget-stats")
        .await
        .json::<Value>();
    assert_eq!(budgets["data"][0]["destination"], "Moon");
    assert_eq!(budgets["data"][0]["crew_size"], 1);
}

#[tokio::test]
async fn production_hides_internal_error_details() {
    let production = harness_with(|s| s.environment = Environment::Production).await;
    let development = harness().await;
    production.state.db.close().await;
    development.state.db.close().await;

    let hidden = production.server.get("/api/missions").await;
    hidden.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let body = hidden.json::<Value>();
    assert_eq!(body["error"], "Internal server error");
    assert!(body.get("details").is_none());

    let exposed = development.server.get("/api/missions").await;
    exposed.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert!(exposed.json::<Value>()["details"].is_string());
}
