//! End-to-end scenarios from `spec.md` §8, driven through the HTTP surface
//! with `rocket::local::blocking::Client`, in the teacher's
//! `tests/integration.rs` style (one temp SQLite file per client, no shared
//! fixtures). Dispatch passes are driven directly via
//! `warming_scheduler::scheduler::run_dispatch_pass` against a side
//! connection to the same file, rather than waiting on the live background
//! scheduler's real-time polling loop.

use rocket::http::{ContentType, Header, Status};
use rocket::local::blocking::Client;
use warming_scheduler::db::Db;
use warming_scheduler::outbound::{NoopOutbound, OutboundAdapter, OutboundMessage};
use warming_scheduler::scheduler::run_dispatch_pass;

struct TestApp {
    client: Client,
    db_path: String,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.db_path);
        let _ = std::fs::remove_file(format!("{}-wal", self.db_path));
        let _ = std::fs::remove_file(format!("{}-shm", self.db_path));
    }
}

fn test_app() -> TestApp {
    let db_path = format!(
        "/tmp/warming_test_{}.db",
        uuid::Uuid::new_v4().to_string().split('-').next().unwrap()
    );
    let rocket = warming_scheduler::rocket_with_db(&db_path);
    let client = Client::tracked(rocket).expect("valid rocket instance");
    TestApp { client, db_path }
}

fn admin(req: rocket::local::blocking::LocalRequest<'_>) -> rocket::local::blocking::LocalRequest<'_> {
    req.header(Header::new("X-User-Id", "tester"))
        .header(Header::new("X-User-Role", "admin"))
}

fn side_db(app: &TestApp) -> Db {
    Db::new(&app.db_path)
}

fn seed_instance(app: &TestApp, id: &str) {
    side_db(app).upsert_instance(id, id, "online").unwrap();
}

fn create_script_with_lines(app: &TestApp, lines: &[(i64, &str, &str)]) -> i64 {
    let res = admin(
        app.client
            .post("/warming/scripts")
            .header(ContentType::JSON)
            .body(r#"{"title":"warmup","category":"smalltalk"}"#),
    )
    .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    let script_id = body["data"]["id"].as_i64().unwrap();

    for (seq, actor, msg) in lines {
        let payload = serde_json::json!({
            "sequence_order": seq,
            "actor_role": actor,
            "message_content": msg,
        });
        let res = admin(
            app.client
                .post(format!("/warming/scripts/{script_id}/lines"))
                .header(ContentType::JSON)
                .body(payload.to_string()),
        )
        .dispatch();
        assert_eq!(res.status(), Status::Ok);
    }
    script_id
}

fn create_room(app: &TestApp, body: serde_json::Value) -> serde_json::Value {
    let res = admin(
        app.client
            .post("/warming/rooms")
            .header(ContentType::JSON)
            .body(body.to_string()),
    )
    .dispatch();
    assert_eq!(res.status(), Status::Ok, "create_room failed: {:?}", res.into_string());
    res.into_json::<serde_json::Value>().unwrap()
}

fn set_status(app: &TestApp, room_id: &str, status: &str) -> rocket::local::blocking::LocalResponse<'_> {
    admin(
        app.client
            .patch(format!("/warming/rooms/{room_id}/status"))
            .header(ContentType::JSON)
            .body(serde_json::json!({"status": status}).to_string()),
    )
    .dispatch()
}

// --- Scenario 1: Activate and dispatch --------------------------------------

#[test]
fn activate_and_dispatch_advances_then_finishes() {
    let app = test_app();
    seed_instance(&app, "alice");
    seed_instance(&app, "bob");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi"), (2, "ACTOR_B", "hey")]);

    let room = create_room(
        &app,
        serde_json::json!({
            "name": "R",
            "room_type": "BOT_VS_BOT",
            "sender_instance_id": "alice",
            "receiver_instance_id": "bob",
            "script_id": script_id,
            "interval_min_seconds": 5,
            "interval_max_seconds": 5,
            "send_real_message": false,
        }),
    );
    let room_id = room["data"]["id"].as_str().unwrap().to_string();

    let res = set_status(&app, &room_id, "ACTIVE");
    assert_eq!(res.status(), Status::Ok);

    let db = side_db(&app);
    // Force the due line to be claimable without a real 5s sleep.
    db.conn
        .lock()
        .unwrap()
        .execute(
            "UPDATE warming_rooms SET next_run_at = ?1 WHERE id = ?2",
            rusqlite::params![chrono::Utc::now().to_rfc3339(), room_id],
        )
        .unwrap();

    let report = tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(run_dispatch_pass(&db, &NoopOutbound, 10));
    assert_eq!(report.claimed, 1);

    let res = admin(app.client.get(format!("/warming/rooms/{room_id}"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["current_sequence"], 1);
    assert!(body["data"]["next_run_at"].is_string());

    db.conn
        .lock()
        .unwrap()
        .execute(
            "UPDATE warming_rooms SET next_run_at = ?1 WHERE id = ?2",
            rusqlite::params![chrono::Utc::now().to_rfc3339(), room_id],
        )
        .unwrap();
    let report = tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(run_dispatch_pass(&db, &NoopOutbound, 10));
    assert_eq!(report.claimed, 1);

    let res = admin(app.client.get(format!("/warming/rooms/{room_id}"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["current_sequence"], 2);

    db.conn
        .lock()
        .unwrap()
        .execute(
            "UPDATE warming_rooms SET next_run_at = ?1 WHERE id = ?2",
            rusqlite::params![chrono::Utc::now().to_rfc3339(), room_id],
        )
        .unwrap();
    let report = tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(run_dispatch_pass(&db, &NoopOutbound, 10));
    assert_eq!(report.claimed, 1);

    let res = admin(app.client.get(format!("/warming/rooms/{room_id}"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["status"], "FINISHED");
    assert!(body["data"]["next_run_at"].is_null());

    let res = admin(app.client.get(format!("/warming/logs?room_id={room_id}"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

// --- Scenario 2: Auto-pause conflict -----------------------------------------

#[test]
fn auto_pause_conflict_on_activation() {
    let app = test_app();
    seed_instance(&app, "bot1");
    seed_instance(&app, "bot2");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi")]);

    let r1 = create_room(
        &app,
        serde_json::json!({
            "name": "R1",
            "room_type": "HUMAN_VS_BOT",
            "sender_instance_id": "bot1",
            "script_id": script_id,
            "whitelisted_number": "628111",
        }),
    );
    let r1_id = r1["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(set_status(&app, &r1_id, "ACTIVE").status(), Status::Ok);

    let r2 = create_room(
        &app,
        serde_json::json!({
            "name": "R2",
            "room_type": "HUMAN_VS_BOT",
            "sender_instance_id": "bot2",
            "script_id": script_id,
            "whitelisted_number": "628111",
        }),
    );
    let r2_id = r2["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(set_status(&app, &r2_id, "ACTIVE").status(), Status::Ok);

    let res = admin(app.client.get(format!("/warming/rooms/{r1_id}"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["status"], "PAUSED");

    let res = admin(app.client.get(format!("/warming/rooms/{r2_id}"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["status"], "ACTIVE");
}

// --- Scenario 3: Duplicate guarded on update ----------------------------------
//
// Creation itself never guards against a duplicate whitelisted_number: a new
// room always starts STOPPED, outside invariant I1's ACTIVE-only uniqueness
// set (see scenario 2, where a second room on the same number is created and
// only conflicts once it is activated). The guard instead fires when `update`
// changes an existing room's number to collide with another room that is
// currently ACTIVE.

#[test]
fn duplicate_whitelisted_number_rejected_on_update() {
    let app = test_app();
    seed_instance(&app, "bot1");
    seed_instance(&app, "bot2");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi")]);

    let r1 = create_room(
        &app,
        serde_json::json!({
            "name": "R1",
            "room_type": "HUMAN_VS_BOT",
            "sender_instance_id": "bot1",
            "script_id": script_id,
            "whitelisted_number": "628222",
        }),
    );
    let r1_id = r1["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(set_status(&app, &r1_id, "ACTIVE").status(), Status::Ok);

    let r2 = create_room(
        &app,
        serde_json::json!({
            "name": "R2",
            "room_type": "HUMAN_VS_BOT",
            "sender_instance_id": "bot2",
            "script_id": script_id,
            "whitelisted_number": "628999",
        }),
    );
    let r2_id = r2["data"]["id"].as_str().unwrap().to_string();

    let res = admin(
        app.client
            .put(format!("/warming/rooms/{r2_id}"))
            .header(ContentType::JSON)
            .body(serde_json::json!({"whitelisted_number": "08222"}).to_string()),
    )
    .dispatch();
    assert_eq!(res.status(), Status::Conflict);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "DUPLICATE_WHITELISTED_NUMBER");
}

// --- Scenario 4: Reorder with swap --------------------------------------------

#[test]
fn reorder_swaps_two_lines() {
    let app = test_app();
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "one"), (2, "ACTOR_B", "two")]);

    let res = admin(app.client.get(format!("/warming/scripts/{script_id}/lines"))).dispatch();
    let lines: serde_json::Value = res.into_json().unwrap();
    let id1 = lines["data"][0]["id"].as_i64().unwrap();
    let id2 = lines["data"][1]["id"].as_i64().unwrap();

    let res = admin(
        app.client
            .post(format!("/warming/scripts/{script_id}/lines/reorder"))
            .header(ContentType::JSON)
            .body(serde_json::json!({"order": [[id1, 2], [id2, 1]]}).to_string()),
    )
    .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = admin(app.client.get(format!("/warming/scripts/{script_id}/lines"))).dispatch();
    let lines: serde_json::Value = res.into_json().unwrap();
    let by_id = |id: i64| lines["data"].as_array().unwrap().iter().find(|l| l["id"] == id).unwrap();
    assert_eq!(by_id(id1)["sequence_order"], 2);
    assert_eq!(by_id(id2)["sequence_order"], 1);
}

// --- Scenario 5: Failed dispatch advances -------------------------------------

struct FailingOutbound;

#[rocket::async_trait]
impl OutboundAdapter for FailingOutbound {
    async fn send(&self, _msg: OutboundMessage<'_>) -> Result<(), String> {
        Err("gateway unreachable".to_string())
    }
}

#[test]
fn failed_dispatch_still_advances_sequence() {
    let app = test_app();
    seed_instance(&app, "alice");
    seed_instance(&app, "bob");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi"), (2, "ACTOR_B", "hey")]);

    let room = create_room(
        &app,
        serde_json::json!({
            "name": "R",
            "room_type": "BOT_VS_BOT",
            "sender_instance_id": "alice",
            "receiver_instance_id": "bob",
            "script_id": script_id,
            "interval_min_seconds": 5,
            "interval_max_seconds": 5,
            "send_real_message": true,
        }),
    );
    let room_id = room["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(set_status(&app, &room_id, "ACTIVE").status(), Status::Ok);

    let db = side_db(&app);
    db.conn
        .lock()
        .unwrap()
        .execute(
            "UPDATE warming_rooms SET next_run_at = ?1 WHERE id = ?2",
            rusqlite::params![chrono::Utc::now().to_rfc3339(), room_id],
        )
        .unwrap();

    let report = tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(run_dispatch_pass(&db, &FailingOutbound, 10));
    assert_eq!(report.claimed, 1);

    let res = admin(app.client.get(format!("/warming/rooms/{room_id}"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["current_sequence"], 1);

    let res = admin(app.client.get(format!("/warming/logs?room_id={room_id}&status=FAILED"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

// --- Scenario 6: Inbound reply with AI fallback -------------------------------

#[test]
fn inbound_reply_with_ai_fallback_uses_script() {
    let app = test_app();
    seed_instance(&app, "bot1");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "how are you?")]);

    let room = create_room(
        &app,
        serde_json::json!({
            "name": "R",
            "room_type": "HUMAN_VS_BOT",
            "sender_instance_id": "bot1",
            "script_id": script_id,
            "whitelisted_number": "628333",
            "reply_delay_min": 0,
            "reply_delay_max": 0,
            "ai_enabled": true,
            "fallback_to_script": true,
        }),
    );
    let room_id = room["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(set_status(&app, &room_id, "ACTIVE").status(), Status::Ok);

    // No AI endpoint is configured in this test process, so the adapter is
    // `UnavailableAi` and this exercises the fallback path directly.
    let res = app
        .client
        .post("/warming/inbound")
        .header(ContentType::JSON)
        .body(serde_json::json!({"sender_whitelisted_number": "08333", "message": "hai"}).to_string())
        .dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["status"], "replied");

    let res = admin(app.client.get(format!("/warming/logs?room_id={room_id}"))).dispatch();
    let logs: serde_json::Value = res.into_json().unwrap();
    let logs = logs["data"].as_array().unwrap();
    assert_eq!(logs.len(), 2);
    assert!(logs.iter().any(|l| l["message_content"] == "how are you?"));
}

// --- Validation ---------------------------------------------------------------

#[test]
fn create_room_rejects_empty_name() {
    let app = test_app();
    seed_instance(&app, "alice");
    seed_instance(&app, "bob");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi")]);

    let res = admin(
        app.client
            .post("/warming/rooms")
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "name": "",
                    "room_type": "BOT_VS_BOT",
                    "sender_instance_id": "alice",
                    "receiver_instance_id": "bob",
                    "script_id": script_id,
                })
                .to_string(),
            ),
    )
    .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["error"], "NAME_REQUIRED");
}

#[test]
fn create_room_rejects_interval_max_below_min() {
    let app = test_app();
    seed_instance(&app, "alice");
    seed_instance(&app, "bob");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi")]);

    let res = admin(
        app.client
            .post("/warming/rooms")
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "name": "R",
                    "room_type": "BOT_VS_BOT",
                    "sender_instance_id": "alice",
                    "receiver_instance_id": "bob",
                    "script_id": script_id,
                    "interval_min_seconds": 20,
                    "interval_max_seconds": 5,
                })
                .to_string(),
            ),
    )
    .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}

#[test]
fn change_status_rejects_same_status() {
    let app = test_app();
    seed_instance(&app, "alice");
    seed_instance(&app, "bob");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi")]);
    let room = create_room(
        &app,
        serde_json::json!({
            "name": "R",
            "room_type": "BOT_VS_BOT",
            "sender_instance_id": "alice",
            "receiver_instance_id": "bob",
            "script_id": script_id,
        }),
    );
    let room_id = room["data"]["id"].as_str().unwrap().to_string();
    let res = set_status(&app, &room_id, "STOPPED");
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn change_status_rejects_finished_to_active_directly() {
    let app = test_app();
    seed_instance(&app, "alice");
    seed_instance(&app, "bob");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi")]);
    let room = create_room(
        &app,
        serde_json::json!({
            "name": "R",
            "room_type": "BOT_VS_BOT",
            "sender_instance_id": "alice",
            "receiver_instance_id": "bob",
            "script_id": script_id,
        }),
    );
    let room_id = room["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(set_status(&app, &room_id, "ACTIVE").status(), Status::Ok);
    assert_eq!(set_status(&app, &room_id, "FINISHED").status(), Status::Ok);
    let res = set_status(&app, &room_id, "ACTIVE");
    assert_eq!(res.status(), Status::Conflict);
}

#[test]
fn restart_resets_sequence_and_reactivates() {
    let app = test_app();
    seed_instance(&app, "alice");
    seed_instance(&app, "bob");
    let script_id = create_script_with_lines(&app, &[(1, "ACTOR_A", "hi")]);
    let room = create_room(
        &app,
        serde_json::json!({
            "name": "R",
            "room_type": "BOT_VS_BOT",
            "sender_instance_id": "alice",
            "receiver_instance_id": "bob",
            "script_id": script_id,
            "interval_min_seconds": 5,
            "interval_max_seconds": 5,
        }),
    );
    let room_id = room["data"]["id"].as_str().unwrap().to_string();
    assert_eq!(set_status(&app, &room_id, "ACTIVE").status(), Status::Ok);

    let db = side_db(&app);
    db.conn
        .lock()
        .unwrap()
        .execute(
            "UPDATE warming_rooms SET next_run_at = ?1 WHERE id = ?2",
            rusqlite::params![chrono::Utc::now().to_rfc3339(), room_id],
        )
        .unwrap();
    tokio::runtime::Runtime::new()
        .unwrap()
        .block_on(run_dispatch_pass(&db, &NoopOutbound, 10));

    let res = admin(app.client.get(format!("/warming/rooms/{room_id}"))).dispatch();
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["status"], "FINISHED");

    let res = admin(app.client.post(format!("/warming/rooms/{room_id}/restart"))).dispatch();
    assert_eq!(res.status(), Status::Ok);
    let body: serde_json::Value = res.into_json().unwrap();
    assert_eq!(body["data"]["current_sequence"], 0);
    assert_eq!(body["data"]["status"], "ACTIVE");
}

#[test]
fn generate_lines_rejects_out_of_range_count() {
    let app = test_app();
    let script_id = create_script_with_lines(&app, &[]);
    let res = admin(
        app.client
            .post("/warming/templates")
            .header(ContentType::JSON)
            .body(
                serde_json::json!({
                    "category": "smalltalk",
                    "name": "default",
                    "structure": [{"actorRole": "ACTOR_A", "messageType": "GREETING", "messageOptions": ["hi"]}],
                })
                .to_string(),
            ),
    )
    .dispatch();
    assert_eq!(res.status(), Status::Ok);

    let res = admin(
        app.client
            .post(format!("/warming/scripts/{script_id}/lines/generate"))
            .header(ContentType::JSON)
            .body(serde_json::json!({"line_count": 0, "category": "smalltalk"}).to_string()),
    )
    .dispatch();
    assert_eq!(res.status(), Status::BadRequest);
}
