mod backup;
mod db;
mod ipc;
mod model;
mod rank;

use serde_json::json;
use std::io::{self, BufRead, Write};

fn emit(stdout: &mut impl Write, resp: &serde_json::Value) {
    let line = serde_json::to_string(resp).unwrap_or_else(|_| "{\"ok\":false}".to_string());
    let _ = writeln!(stdout, "{}", line);
    let _ = stdout.flush();
}

fn main() {
    let mut state = ipc::AppState::new();

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // No parsed id to echo back.
                let resp = json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                });
                emit(&mut stdout, &resp);
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        emit(&mut stdout, &resp);
    }
}
