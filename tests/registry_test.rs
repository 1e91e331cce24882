use serde_json::json;

mod common;
use common::ServerHandle;

/// Multi-session focus: ids are handed out in order, focus follows
/// creation, stop_tui falls back to the previous session, and killed
/// sessions disappear from the listing.
#[test]
fn test_multi_session_focus_chain() {
    let mut server = ServerHandle::spawn(&["--cols", "40", "--rows", "10"]);

    let data = server.expect_ok(json!({ "type": "create_process", "command": "cat" }));
    assert_eq!(data["terminal_id"], "1");
    let data = server.expect_ok(json!({ "type": "create_process", "command": "cat" }));
    assert_eq!(data["terminal_id"], "2");

    let data = server.expect_ok(json!({ "type": "list_tabs" }));
    assert_eq!(data["focused"], "2");
    assert_eq!(data["terminals"].as_array().unwrap().len(), 2);

    let data = server.expect_ok(json!({ "type": "stop_tui" }));
    assert_eq!(data, json!("stopped terminal 2"));
    server.wait_until_exited("2");

    // Both sessions still listed; focus fell back to 1.
    let data = server.expect_ok(json!({ "type": "list_tabs" }));
    let terminals = data["terminals"].as_array().unwrap();
    assert_eq!(terminals.len(), 2);
    assert_eq!(data["focused"], "1");
    let two = terminals.iter().find(|t| t["id"] == "2").unwrap();
    assert_eq!(two["running"], false);
    let one = terminals.iter().find(|t| t["id"] == "1").unwrap();
    assert_eq!(one["running"], true);

    server.expect_ok(json!({ "type": "kill_process", "terminal_id": "2" }));
    let data = server.expect_ok(json!({ "type": "list_tabs" }));
    let terminals = data["terminals"].as_array().unwrap();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0]["id"], "1");

    // A second kill of the same id reports the remaining candidates.
    let err = server.expect_error(json!({ "type": "kill_process", "terminal_id": "2" }));
    assert_eq!(err["kind"], "UnknownSession");
    assert!(err["message"].as_str().unwrap().contains("available: 1"));
}

/// run_tui with no focus creates a session; with a focused session it
/// restarts in place, keeping the id.
#[test]
fn test_run_tui_creates_then_restarts() {
    let mut server = ServerHandle::spawn(&["--cols", "40", "--rows", "10"]);

    let data = server.expect_ok(json!({
        "type": "run_tui",
        "command": "sh",
        "args": ["-c", "printf 'one'; sleep 5"],
    }));
    assert!(data.as_str().unwrap().contains("terminal 1"));
    let data = server.expect_ok(json!({ "type": "view_screen" }));
    assert!(data.as_str().unwrap().contains("one"));

    let data = server.expect_ok(json!({
        "type": "run_tui",
        "command": "sh",
        "args": ["-c", "printf 'two'; sleep 5"],
    }));
    assert!(data.as_str().unwrap().contains("restarted terminal 1"));

    let data = server.expect_ok(json!({ "type": "list_tabs" }));
    let terminals = data["terminals"].as_array().unwrap();
    assert_eq!(terminals.len(), 1);
    assert_eq!(terminals[0]["id"], "1");

    // The restart started from a clean grid.
    let data = server.expect_ok(json!({ "type": "view_screen" }));
    let screen = data.as_str().unwrap();
    assert!(screen.contains("two"));
    assert!(!screen.contains("one"));
}

/// Listing an empty registry is not an error.
#[test]
fn test_empty_listing_has_hint() {
    let mut server = ServerHandle::spawn(&[]);
    let data = server.expect_ok(json!({ "type": "list_tabs" }));
    assert_eq!(data["terminals"].as_array().unwrap().len(), 0);
    assert!(data["focused"].is_null());
    assert!(data["hint"].as_str().unwrap().contains("create_process"));

    let err = server.expect_error(json!({ "type": "view_screen" }));
    assert_eq!(err["kind"], "NoSession");
}

/// Explicit ids that do not exist name the available candidates.
#[test]
fn test_unknown_id_lists_candidates() {
    let mut server = ServerHandle::spawn(&["--cols", "40", "--rows", "10"]);
    server.expect_ok(json!({ "type": "create_process", "command": "cat" }));
    let err = server.expect_error(json!({ "type": "view_screen", "terminal_id": "9" }));
    assert_eq!(err["kind"], "UnknownSession");
    assert!(err["message"].as_str().unwrap().contains('1'));
}
