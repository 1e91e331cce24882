#![allow(dead_code)]

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{Duration, Instant};

use serde_json::{json, Value};

/// Path of the compiled pilotty binary under test.
pub fn pilotty_bin() -> &'static str {
    env!("CARGO_BIN_EXE_pilotty")
}

/// A running pilotty server plus the JSON-line protocol over its stdio.
///
/// Dropping the handle closes stdin, which the server treats as the
/// shutdown signal; the child is reaped (or killed after a timeout) so
/// tests never leak servers.
pub struct ServerHandle {
    child: Child,
    stdin: Option<ChildStdin>,
    reader: BufReader<ChildStdout>,
}

impl ServerHandle {
    pub fn spawn(args: &[&str]) -> Self {
        let mut child = Command::new(pilotty_bin())
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn pilotty");
        let stdin = child.stdin.take().expect("stdin pipe");
        let stdout = child.stdout.take().expect("stdout pipe");
        ServerHandle {
            child,
            stdin: Some(stdin),
            reader: BufReader::new(stdout),
        }
    }

    /// Send one request and read its response.
    pub fn request(&mut self, request: Value) -> Value {
        let stdin = self.stdin.as_mut().expect("server already shut down");
        writeln!(stdin, "{}", request).expect("failed to write request");
        stdin.flush().expect("failed to flush request");
        let mut line = String::new();
        self.reader
            .read_line(&mut line)
            .expect("failed to read response");
        serde_json::from_str(&line).expect("response is not valid JSON")
    }

    /// Send a request that must succeed; returns its data payload.
    pub fn expect_ok(&mut self, request: Value) -> Value {
        let response = self.request(request);
        assert_eq!(response["status"], "ok", "unexpected error: {}", response);
        response["data"].clone()
    }

    /// Send a request that must fail; returns the error payload.
    #[allow(dead_code)]
    pub fn expect_error(&mut self, request: Value) -> Value {
        let response = self.request(request);
        assert_eq!(
            response["status"], "error",
            "expected an error, got: {}",
            response
        );
        response["error"].clone()
    }

    /// Let the server (and its children) settle for a bit.
    #[allow(dead_code)]
    pub fn wait_ms(&mut self, ms: u64) {
        self.expect_ok(json!({ "type": "wait", "ms": ms }));
    }

    /// Poll list_tabs until the given terminal reports running=false.
    #[allow(dead_code)]
    pub fn wait_until_exited(&mut self, terminal_id: &str) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            let data = self.expect_ok(json!({ "type": "list_tabs" }));
            let exited = data["terminals"]
                .as_array()
                .unwrap()
                .iter()
                .any(|t| t["id"] == terminal_id && t["running"] == false);
            if exited {
                return;
            }
            self.wait_ms(50);
        }
        panic!("terminal {} did not exit in time", terminal_id);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        // EOF on stdin asks the server to shut down cleanly.
        drop(self.stdin.take());
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            match self.child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(50));
                }
                _ => {
                    let _ = self.child.kill();
                    let _ = self.child.wait();
                    return;
                }
            }
        }
    }
}
