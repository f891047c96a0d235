//! Minimal HTTP/1.1 web-seed server for integration tests.
//!
//! Serves a fixed set of files by path. HEAD returns Content-Length (and
//! Content-Disposition when configured); GET returns the whole body.
//! Unknown paths get 404.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Default)]
pub struct SeedFile {
    pub body: Vec<u8>,
    /// Sent as `Content-Disposition: attachment; filename="..."`.
    pub disposition_name: Option<String>,
}

impl SeedFile {
    pub fn new(body: Vec<u8>) -> Self {
        Self {
            body,
            disposition_name: None,
        }
    }
}

/// Start serving `files` (keyed by path, e.g. "/movie.mkv") on a background
/// thread. Returns the base URL without trailing slash.
pub fn start(files: Vec<(&str, SeedFile)>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let files: Arc<HashMap<String, SeedFile>> = Arc::new(
        files
            .into_iter()
            .map(|(p, f)| (p.to_string(), f))
            .collect(),
    );
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let files = Arc::clone(&files);
            thread::spawn(move || handle(stream, &files));
        }
    });
    format!("http://127.0.0.1:{}", port)
}

fn handle(mut stream: std::net::TcpStream, files: &HashMap<String, SeedFile>) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(5)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let mut parts = request.lines().next().unwrap_or("").split_whitespace();
    let method = parts.next().unwrap_or("");
    let path = parts.next().unwrap_or("/");
    let path = path.split('?').next().unwrap_or(path);

    let Some(file) = files.get(path) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n");
        return;
    };

    let disposition = file
        .disposition_name
        .as_ref()
        .map(|n| format!("Content-Disposition: attachment; filename=\"{}\"\r\n", n))
        .unwrap_or_default();
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}Connection: close\r\n\r\n",
        file.body.len(),
        disposition
    );

    if method.eq_ignore_ascii_case("HEAD") {
        let _ = stream.write_all(head.as_bytes());
    } else if method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(head.as_bytes());
        let _ = stream.write_all(&file.body);
    } else {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
    }
}
