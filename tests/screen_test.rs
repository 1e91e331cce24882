use serde_json::json;

mod common;
use common::ServerHandle;

/// Menu-navigation shape: the launch command clears the screen, homes
/// the cursor, and prints two lines; view_screen reflects exactly that.
#[test]
fn test_clear_home_and_write() {
    let mut server = ServerHandle::spawn(&[
        "--cols",
        "80",
        "--rows",
        "24",
        "--",
        "sh",
        "-c",
        "printf '\\033[2J\\033[HHello\\nWorld\\n'; sleep 5",
    ]);
    server.wait_ms(500);

    let data = server.expect_ok(json!({ "type": "view_screen", "include_metadata": true }));
    assert_eq!(data["terminal_id"], "legacy");
    let screen = data["screen"].as_str().unwrap();
    let lines: Vec<&str> = screen.lines().collect();
    assert_eq!(lines[0], "Hello");
    assert_eq!(lines[1], "World");
    assert!(lines[2..].iter().all(|l| l.is_empty()));
    assert_eq!(data["cursor"]["row"], 2);
    assert_eq!(data["cursor"]["col"], 0);
    assert_eq!(data["size"]["cols"], 80);
    assert_eq!(data["size"]["rows"], 24);
}

/// Without include_metadata the snapshot is plain text.
#[test]
fn test_view_screen_plain_text() {
    let mut server = ServerHandle::spawn(&[
        "--cols",
        "40",
        "--rows",
        "5",
        "--",
        "sh",
        "-c",
        "printf 'plain'; sleep 5",
    ]);
    server.wait_ms(500);

    let data = server.expect_ok(json!({ "type": "view_screen" }));
    let screen = data.as_str().expect("plain snapshot is a string");
    assert_eq!(screen.lines().next().unwrap(), "plain");
}

/// Erase-to-end-of-line, driven through a real child.
#[test]
fn test_erase_line_from_cursor() {
    let mut server = ServerHandle::spawn(&[
        "--cols",
        "10",
        "--rows",
        "4",
        "--",
        "sh",
        "-c",
        "printf 'XXXXXXXXXX\\033[1;5H\\033[0K'; sleep 5",
    ]);
    server.wait_ms(500);

    let data = server.expect_ok(json!({ "type": "view_screen" }));
    let screen = data.as_str().unwrap();
    assert_eq!(screen.lines().next().unwrap(), "XXXX");
}

/// The screen size a session reports matches the launch geometry.
#[test]
fn test_get_screen_size() {
    let mut server = ServerHandle::spawn(&[
        "--cols",
        "132",
        "--rows",
        "43",
        "--",
        "sleep",
        "5",
    ]);
    let data = server.expect_ok(json!({ "type": "get_screen_size" }));
    assert_eq!(data["terminal_id"], "legacy");
    assert_eq!(data["cols"], 132);
    assert_eq!(data["rows"], 43);
}
