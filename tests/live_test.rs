use serde_json::json;

mod common;
use common::ServerHandle;

/// The live file holds a box-drawn frame of the focused screen, and is
/// rewritten as output arrives.
#[test]
fn test_live_file_mirrors_focused_screen() {
    let dir = tempfile::tempdir().unwrap();
    let live_path = dir.path().join("live.txt");
    let mut server = ServerHandle::spawn(&[
        "--cols",
        "30",
        "--rows",
        "5",
        "--live-file",
        live_path.to_str().unwrap(),
        "--",
        "sh",
        "-c",
        "printf 'mirrored'; sleep 5",
    ]);
    server.wait_ms(500);

    let frame = std::fs::read_to_string(&live_path).expect("live file written");
    let lines: Vec<&str> = frame.lines().collect();
    // Frame: top border, 5 grid rows, bottom border, status line.
    assert_eq!(lines.len(), 8);
    assert!(lines[0].starts_with('┌'));
    assert!(lines[0].contains("legacy"));
    assert!(lines[1].contains("mirrored"));
    assert!(lines[6].starts_with('└'));
    assert!(lines[7].contains("last call") || lines[7].contains("no calls yet"));
}

/// The mirror follows the focus: output of a newly focused session
/// replaces the old frame.
#[test]
fn test_live_file_follows_focus() {
    let dir = tempfile::tempdir().unwrap();
    let live_path = dir.path().join("live.txt");
    let mut server = ServerHandle::spawn(&[
        "--cols",
        "30",
        "--rows",
        "5",
        "--live-file",
        live_path.to_str().unwrap(),
    ]);

    server.expect_ok(json!({
        "type": "create_process",
        "command": "sh",
        "args": ["-c", "printf 'first screen'; sleep 5"],
    }));
    server.wait_ms(300);
    let frame = std::fs::read_to_string(&live_path).unwrap();
    assert!(frame.contains("first screen"));

    server.expect_ok(json!({
        "type": "create_process",
        "command": "sh",
        "args": ["-c", "printf 'second screen'; sleep 5"],
    }));
    server.wait_ms(300);
    let frame = std::fs::read_to_string(&live_path).unwrap();
    assert!(frame.contains("second screen"));
    assert!(!frame.contains("first screen"));
}

/// On shutdown the live file is flushed one final time, even though
/// the sessions have already been killed and removed by then.
#[test]
fn test_final_flush_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let live_path = dir.path().join("live.txt");
    {
        let mut server = ServerHandle::spawn(&[
            "--cols",
            "30",
            "--rows",
            "5",
            "--live-file",
            live_path.to_str().unwrap(),
        ]);
        server.expect_ok(json!({
            "type": "create_process",
            "command": "sh",
            "args": ["-c", "printf 'final frame'; sleep 30"],
        }));
        server.wait_ms(300);
        // Remove the frame written while running; shutdown must put a
        // fresh one back.
        std::fs::remove_file(&live_path).unwrap();
    }
    let frame = std::fs::read_to_string(&live_path).expect("shutdown rewrote the live file");
    assert!(frame.contains("final frame"));
}

/// Request logging writes a TOOL_CALL and a TOOL_RESULT line per
/// request, each with an ISO-8601 UTC timestamp prefix.
#[test]
fn test_request_log_format() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("requests.log");
    let mut server = ServerHandle::spawn(&[
        "--log-file",
        log_path.to_str().unwrap(),
    ]);
    server.expect_ok(json!({ "type": "list_tabs" }));
    server.wait_ms(100);

    let log = std::fs::read_to_string(&log_path).expect("log file written");
    let lines: Vec<&str> = log.lines().collect();
    assert!(lines.iter().any(|l| l.contains("TOOL_CALL") && l.contains("list_tabs")));
    assert!(lines.iter().any(|l| l.contains("TOOL_RESULT")));
    for line in &lines {
        let stamp = line.split_whitespace().next().unwrap();
        assert!(
            stamp.ends_with('Z') && stamp.contains('T'),
            "not an ISO-8601 UTC stamp: {}",
            stamp
        );
    }
}
