//! End-to-end tests of the HTTP API against the simulated radio.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum_test::TestServer;
use chrono::{TimeZone, Utc};
use classbeacon_core::{BeaconRadio, Config, ManualClock, MockRadio};
use classbeacon_server::api::create_router;
use classbeacon_server::state::AppState;
use serde_json::{json, Value};

struct Harness {
    server: TestServer,
    clock: ManualClock,
    radio: Arc<MockRadio>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.session.tick_interval_ms = 20;
    config.attendance.confirmation_delay_ms = 20;
    config.retry.initial_backoff_ms = 5;
    config.retry.max_backoff_ms = 10;
    config
}

fn harness_with(config: Config, radio: MockRadio) -> Harness {
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 9, 0, 0).unwrap());
    let radio = Arc::new(radio.with_sighting_interval(Duration::from_millis(10)));
    let dyn_radio: Arc<dyn BeaconRadio> = radio.clone();
    let state = AppState::with_clock(config, dyn_radio, Arc::new(clock.clone())).unwrap();
    let server = TestServer::new(create_router(state)).unwrap();

    Harness {
        server,
        clock,
        radio,
    }
}

fn harness() -> Harness {
    harness_with(test_config(), MockRadio::demo())
}

async fn start_teacher(server: &TestServer) -> Value {
    let response = server
        .post("/api/session/start")
        .json(&json!({ "role": "teacher" }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()
}

fn error_messages(body: &Value) -> Vec<String> {
    body["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|n| n["level"] == "error")
        .filter_map(|n| n["message"].as_str().map(str::to_string))
        .collect()
}

// ============================================================================
// System
// ============================================================================

#[tokio::test]
async fn test_health_reports_backend() {
    let h = harness();
    let response = h.server.get("/health").await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["session_active"], false);
    assert_eq!(body["radio_backend"], "mock");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let h = harness();
    let response = h.server.get("/api/openapi.json").await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert!(body["paths"]["/api/attendance/export"].is_object());
}

// ============================================================================
// Session
// ============================================================================

#[tokio::test]
async fn test_session_start_and_stop_conflicts() {
    let h = harness();

    let started = start_teacher(&h.server).await;
    assert_eq!(started["active"], true);
    assert_eq!(started["class_code"], "CS-2024-001");
    assert_eq!(started["elapsed_display"], "0:00");

    let again = h
        .server
        .post("/api/session/start")
        .json(&json!({ "role": "teacher" }))
        .await;
    again.assert_status(StatusCode::CONFLICT);
    assert_eq!(again.json::<Value>()["error"], "session_already_active");

    let stopped = h.server.post("/api/session/stop").await;
    stopped.assert_status_ok();
    let body = stopped.json::<Value>();
    assert_eq!(body["final_state"]["class_code"], "CS-2024-001");
    assert_eq!(body["session"]["active"], false);
    assert_eq!(body["session"]["elapsed_secs"], 0);

    let again = h.server.post("/api/session/stop").await;
    again.assert_status(StatusCode::CONFLICT);
    assert_eq!(again.json::<Value>()["error"], "session_not_active");
}

#[tokio::test]
async fn test_class_codes_advance_per_session() {
    let h = harness();

    start_teacher(&h.server).await;
    h.server.post("/api/session/stop").await.assert_status_ok();
    let second = start_teacher(&h.server).await;

    assert_eq!(second["class_code"], "CS-2024-002");
}

#[tokio::test]
async fn test_teacher_session_broadcasts_beacon() {
    let h = harness();

    start_teacher(&h.server).await;
    let advert = h.radio.current_advert().expect("beacon broadcast");
    assert_eq!(advert.class_code, "CS-2024-001");

    h.server.post("/api/session/stop").await.assert_status_ok();
    assert!(h.radio.current_advert().is_none());
}

#[tokio::test]
async fn test_student_session_does_not_broadcast() {
    let h = harness();

    h.server
        .post("/api/session/start")
        .json(&json!({ "role": "student" }))
        .await
        .assert_status_ok();

    assert!(h.radio.current_advert().is_none());
}

#[tokio::test]
async fn test_elapsed_time_advances_while_active() {
    let h = harness();
    start_teacher(&h.server).await;

    tokio::time::sleep(Duration::from_millis(150)).await;

    let snapshot = h.server.get("/api/session").await.json::<Value>();
    assert!(snapshot["elapsed_secs"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_session_notifications_are_recorded() {
    let h = harness();
    start_teacher(&h.server).await;
    h.server.post("/api/session/stop").await.assert_status_ok();

    let body = h.server.get("/api/notifications").await.json::<Value>();
    let messages: Vec<&str> = body["notifications"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|n| n["message"].as_str())
        .collect();

    assert!(messages.contains(&"Beacon started - Students can now connect"));
    assert!(messages.contains(&"Beacon stopped"));
}

#[tokio::test]
async fn test_notifications_use_injected_clock() {
    let h = harness();
    start_teacher(&h.server).await;

    let body = h.server.get("/api/notifications").await.json::<Value>();
    assert_eq!(body["notifications"][0]["created_at_utc"], "2024-09-02T09:00:00Z");
}

#[tokio::test]
async fn test_rejected_requests_raise_error_notifications() {
    let h = harness();
    start_teacher(&h.server).await;

    h.server
        .post("/api/session/start")
        .json(&json!({ "role": "teacher" }))
        .await
        .assert_status(StatusCode::CONFLICT);
    h.server
        .post("/api/attendance/students/99/pending")
        .json(&json!({}))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    h.server
        .post("/api/attendance/students/5/confirm")
        .await
        .assert_status(StatusCode::CONFLICT);

    let body = h.server.get("/api/notifications").await.json::<Value>();
    let errors = error_messages(&body);
    assert_eq!(errors.len(), 3);
    assert!(errors[0].starts_with("A session is already active"));
    assert_eq!(errors[1], "Unknown student: '99'");
    assert!(errors[2].contains("cannot move from absent"));
}

#[tokio::test]
async fn test_stop_without_session_raises_error_notification() {
    let h = harness();
    h.server
        .post("/api/session/stop")
        .await
        .assert_status(StatusCode::CONFLICT);

    let body = h.server.get("/api/notifications").await.json::<Value>();
    assert_eq!(
        error_messages(&body),
        vec!["No session is active. Start a session first."]
    );
}

// ============================================================================
// Devices
// ============================================================================

#[tokio::test]
async fn test_sightings_are_deduplicated() {
    let h = harness();

    let first = h
        .server
        .post("/api/devices/sightings")
        .json(&json!({ "id": "AA:01", "name": null, "rssi_dbm": -60 }))
        .await;
    first.assert_status_ok();
    let body = first.json::<Value>();
    assert_eq!(body["new_device"], true);
    assert_eq!(body["device"]["name"], "Unknown Beacon");

    let second = h
        .server
        .post("/api/devices/sightings")
        .json(&json!({ "id": "AA:01", "name": "Renamed", "rssi_dbm": -40 }))
        .await
        .json::<Value>();
    assert_eq!(second["new_device"], false);
    assert_eq!(second["device"]["rssi_dbm"], -60);

    let list = h.server.get("/api/devices").await.json::<Value>();
    assert_eq!(list["count"], 1);

    let cleared = h.server.delete("/api/devices").await.json::<Value>();
    assert_eq!(cleared["cleared"], 1);
    assert_eq!(h.server.get("/api/devices").await.json::<Value>()["count"], 0);
}

#[tokio::test]
async fn test_sighting_requires_id() {
    let h = harness();
    let response = h
        .server
        .post("/api/devices/sightings")
        .json(&json!({ "id": "  ", "rssi_dbm": -60 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_scan_requires_active_session() {
    let h = harness();
    let response = h
        .server
        .post("/api/devices/scan")
        .add_query_param("window_secs", 1)
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_scan_populates_registry() {
    let h = harness();
    start_teacher(&h.server).await;

    let response = h
        .server
        .post("/api/devices/scan")
        .add_query_param("window_secs", 1)
        .await;
    response.assert_status_ok();

    let body = response.json::<Value>();
    assert_eq!(body["summary"]["cancelled"], false);
    assert_eq!(body["summary"]["new_devices"], 4);
    assert_eq!(body["devices"].as_array().unwrap().len(), 4);

    let session = h.server.get("/api/session").await.json::<Value>();
    assert_eq!(session["connected_devices"], 4);
}

#[tokio::test]
async fn test_stopping_session_cancels_scan() {
    let h = harness();
    start_teacher(&h.server).await;

    let scan = async {
        h.server
            .post("/api/devices/scan")
            .add_query_param("window_secs", 30)
            .await
    };
    let stop = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.server.post("/api/session/stop").await
    };

    let (scan, stop) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(scan, stop)
    })
    .await
    .expect("scan should end when the session stops");

    stop.assert_status_ok();
    scan.assert_status_ok();
    assert_eq!(scan.json::<Value>()["summary"]["cancelled"], true);
}

#[tokio::test]
async fn test_cancelled_scan_leaves_next_session_counter_alone() {
    let h = harness();
    start_teacher(&h.server).await;

    let scan = async {
        h.server
            .post("/api/devices/scan")
            .add_query_param("window_secs", 30)
            .await
    };
    let restart = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        h.server.post("/api/session/stop").await.assert_status_ok();
        start_teacher(&h.server).await
    };

    let (scan, restarted) = tokio::time::timeout(Duration::from_secs(5), async {
        tokio::join!(scan, restart)
    })
    .await
    .expect("scan should end when the session stops");

    scan.assert_status_ok();
    assert_eq!(scan.json::<Value>()["summary"]["cancelled"], true);
    assert_eq!(restarted["class_code"], "CS-2024-002");

    let session = h.server.get("/api/session").await.json::<Value>();
    assert_eq!(session["class_code"], "CS-2024-002");
    assert_eq!(session["connected_devices"], 0);
}

#[tokio::test]
async fn test_scan_window_is_validated() {
    let h = harness();
    start_teacher(&h.server).await;

    let response = h
        .server
        .post("/api/devices/scan")
        .add_query_param("window_secs", 0)
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["error"], "invalid_scan_window");
}

// ============================================================================
// Bluetooth
// ============================================================================

#[tokio::test]
async fn test_capability_probe() {
    let h = harness();
    let body = h.server.get("/api/bluetooth/capability").await.json::<Value>();
    assert_eq!(body["native"], true);
    assert_eq!(body["backend"], "mock");
}

#[tokio::test]
async fn test_connect_retries_transient_failures() {
    let h = harness_with(test_config(), MockRadio::demo().with_connect_failures(2));

    let response = h.server.post("/api/bluetooth/connect").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["device"]["name"], "Fitness Band");
    assert_eq!(h.radio.connect_attempts(), 3);
}

#[tokio::test]
async fn test_connect_without_bluetooth_is_unavailable() {
    let h = harness_with(test_config(), MockRadio::unsupported());

    let response = h.server.post("/api/bluetooth/connect").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.json::<Value>()["error"], "capability_unavailable");

    let notifications = h.server.get("/api/notifications").await.json::<Value>();
    let last = notifications["notifications"]
        .as_array()
        .and_then(|n| n.last())
        .cloned()
        .unwrap();
    assert_eq!(last["level"], "error");
}

// ============================================================================
// Attendance
// ============================================================================

#[tokio::test]
async fn test_demo_roster_stats() {
    let h = harness();
    let stats = h.server.get("/api/attendance/stats").await.json::<Value>();

    assert_eq!(stats["total_students"], 6);
    assert_eq!(stats["present_students"], 5);
    assert_eq!(stats["late_students"], 1);
    assert_eq!(stats["absent_students"], 1);
    assert_eq!(stats["attendance_rate"], 83);
    assert_eq!(stats["rate_band"], "good");
}

#[tokio::test]
async fn test_unknown_student_is_not_found() {
    let h = harness();
    let response = h
        .server
        .post("/api/attendance/students/99/pending")
        .json(&json!({}))
        .await;
    response.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(response.json::<Value>()["error"], "unknown_student");
}

#[tokio::test]
async fn test_confirm_requires_pending() {
    let h = harness();
    let response = h.server.post("/api/attendance/students/5/confirm").await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"], "invalid_transition");
}

#[tokio::test]
async fn test_late_confirmation_after_threshold() {
    let h = harness();

    h.server
        .post("/api/attendance/students/5/pending")
        .json(&json!({ "rssi_dbm": -60 }))
        .await
        .assert_status_ok();

    h.clock.advance(chrono::Duration::minutes(11));

    let record = h
        .server
        .post("/api/attendance/students/5/confirm")
        .await
        .json::<Value>();
    assert_eq!(record["status"], "late");
    assert_eq!(record["rssi_dbm"], -60);
}

#[tokio::test]
async fn test_teacher_session_opens_class_period() {
    let h = harness();
    h.clock.advance(chrono::Duration::minutes(45));
    start_teacher(&h.server).await;

    let body = h.server.get("/api/attendance").await.json::<Value>();
    assert_eq!(body["opened_at_utc"], "2024-09-02T09:45:00Z");

    h.server
        .post("/api/attendance/students/5/pending")
        .json(&json!({ "rssi_dbm": -55 }))
        .await
        .assert_status_ok();
    h.clock.advance(chrono::Duration::minutes(2));

    let record = h
        .server
        .post("/api/attendance/students/5/confirm")
        .await
        .json::<Value>();
    assert_eq!(record["status"], "present");
}

#[tokio::test]
async fn test_check_in_confirms_after_delay() {
    let h = harness();
    start_teacher(&h.server).await;

    let response = h
        .server
        .post("/api/attendance/students/5/check-in")
        .json(&json!({ "rssi_dbm": -52 }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["student"]["status"], "pending");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let body = h.server.get("/api/attendance").await.json::<Value>();
    let edward = body["records"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["id"] == "5")
        .cloned()
        .unwrap();
    assert_eq!(edward["status"], "present");
    assert_eq!(body["stats"]["attendance_rate"], 100);
}

#[tokio::test]
async fn test_check_in_rejects_weak_signal() {
    let h = harness();
    start_teacher(&h.server).await;

    let response = h
        .server
        .post("/api/attendance/students/5/check-in")
        .json(&json!({ "rssi_dbm": -90 }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let body = response.json::<Value>();
    assert_eq!(body["error"], "out_of_range");
    assert_eq!(body["details"]["threshold_dbm"], -70);
}

#[tokio::test]
async fn test_check_in_requires_session() {
    let h = harness();
    let response = h
        .server
        .post("/api/attendance/students/5/check-in")
        .json(&json!({ "rssi_dbm": -50 }))
        .await;
    response.assert_status(StatusCode::CONFLICT);
    assert_eq!(response.json::<Value>()["error"], "session_not_active");
}

#[tokio::test]
async fn test_stop_cancels_pending_confirmation() {
    let mut config = test_config();
    config.attendance.confirmation_delay_ms = 500;
    let h = harness_with(config, MockRadio::demo());
    start_teacher(&h.server).await;

    h.server
        .post("/api/attendance/students/5/check-in")
        .json(&json!({ "rssi_dbm": -50 }))
        .await
        .assert_status_ok();
    h.server.post("/api/session/stop").await.assert_status_ok();

    tokio::time::sleep(Duration::from_millis(700)).await;

    let stats = h.server.get("/api/attendance/stats").await.json::<Value>();
    assert_eq!(stats["pending_students"], 1);
}

#[tokio::test]
async fn test_reset_returns_everyone_to_absent() {
    let h = harness();
    let body = h.server.post("/api/attendance/reset").await.json::<Value>();

    assert_eq!(body["stats"]["absent_students"], 6);
    assert_eq!(body["stats"]["attendance_rate"], 0);
    assert_eq!(body["stats"]["rate_band"], "poor");
}

#[tokio::test]
async fn test_export_csv_download() {
    let h = harness();
    let response = h.server.get("/api/attendance/export").await;
    response.assert_status_ok();

    assert_eq!(response.header("content-type"), "text/csv");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"attendance-2024-09-02.csv\""
    );

    let csv = response.text();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines[0], "Name,Roll Number,Status,Timestamp");
    assert_eq!(lines[1], "Alice Johnson,CS2021001,present,09:15 AM");
    assert_eq!(lines[5], "Edward Wilson,CS2021005,absent,N/A");
    assert_eq!(lines.len(), 7);
}

#[tokio::test]
async fn test_configured_roster_replaces_demo() {
    let mut config = test_config();
    config.attendance.roster = Some(vec![classbeacon_core::RosterEntry {
        id: "s1".into(),
        name: "Smith, Jane".into(),
        roll_number: "R-1".into(),
    }]);
    let h = harness_with(config, MockRadio::demo());

    let csv = h.server.get("/api/attendance/export").await.text();
    assert_eq!(csv, "Name,Roll Number,Status,Timestamp\n\"Smith, Jane\",R-1,absent,N/A");
}

#[tokio::test]
async fn test_roster_and_timezone_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("classbeacon.toml");
    std::fs::write(
        &path,
        r#"
[attendance]
timezone = "Asia/Kolkata"
confirmation_delay_ms = 20

[[attendance.roster]]
id = "k1"
name = "Priya Nair"
roll_number = "EC-07"
"#,
    )
    .unwrap();

    let config = Config::load(Some(&path)).unwrap();
    let h = harness_with(config, MockRadio::demo());

    h.server
        .post("/api/attendance/students/k1/pending")
        .json(&json!({ "rssi_dbm": -48 }))
        .await
        .assert_status_ok();
    h.server
        .post("/api/attendance/students/k1/confirm")
        .await
        .assert_status_ok();

    // 09:00 UTC is 14:30 in Kolkata
    let csv = h.server.get("/api/attendance/export").await.text();
    assert_eq!(
        csv,
        "Name,Roll Number,Status,Timestamp\nPriya Nair,EC-07,present,02:30 PM"
    );
}
