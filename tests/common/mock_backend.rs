//! Scripted HTTP backend for exercising the client against real sockets.
//!
//! Routes are matched on method and path. Routes sharing a method and path are
//! served in order, and the last one repeats once the others are used up.
#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone)]
pub struct MockRoute {
    pub method: String,
    pub path: String,
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl MockRoute {
    pub fn json(method: &str, path: &str, status: u16, body: &str) -> Self {
        Self::raw(method, path, status, "application/json", body.as_bytes())
    }

    pub fn text(method: &str, path: &str, status: u16, body: &str) -> Self {
        Self::raw(method, path, status, "text/plain", body.as_bytes())
    }

    pub fn raw(method: &str, path: &str, status: u16, content_type: &str, body: &[u8]) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            status,
            content_type: content_type.to_string(),
            body: body.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

struct RouteSlot {
    route: MockRoute,
    served: bool,
}

pub struct MockBackend {
    base_url: String,
    log: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockBackend {
    pub fn start(routes: Vec<MockRoute>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock backend");
        let addr = listener.local_addr().expect("mock backend addr");
        let log = Arc::new(Mutex::new(Vec::new()));
        let slots: Vec<RouteSlot> = routes
            .into_iter()
            .map(|route| RouteSlot {
                route,
                served: false,
            })
            .collect();
        let slots = Arc::new(Mutex::new(slots));
        let thread_log = Arc::clone(&log);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else {
                    continue;
                };
                let _ = handle(stream, &slots, &thread_log);
            }
        });
        Self {
            base_url: format!("http://{addr}"),
            log,
        }
    }

    pub fn url(&self) -> &str {
        &self.base_url
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.log.lock().expect("mock log").clone()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.requests()
            .iter()
            .filter(|request| request.method == method && request.path == path)
            .count()
    }
}

/// A base URL nothing is listening on.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind spare port");
    let addr = listener.local_addr().expect("spare port addr");
    drop(listener);
    format!("http://{addr}")
}

fn handle(
    stream: TcpStream,
    slots: &Mutex<Vec<RouteSlot>>,
    log: &Mutex<Vec<RecordedRequest>>,
) -> io::Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    if reader.read_line(&mut request_line)? == 0 {
        return Ok(());
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut headers = Vec::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    let header = |name: &str| {
        headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.clone())
    };
    let chunked = header("transfer-encoding")
        .map(|value| value.eq_ignore_ascii_case("chunked"))
        .unwrap_or(false);
    let body = if chunked {
        read_chunked(&mut reader)?
    } else if let Some(len) = header("content-length").and_then(|v| v.parse::<usize>().ok()) {
        let mut buf = vec![0; len];
        reader.read_exact(&mut buf)?;
        buf
    } else {
        Vec::new()
    };

    log.lock().expect("mock log").push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        headers: headers.clone(),
        body,
    });

    let route = {
        let mut slots = slots.lock().expect("mock routes");
        let matching: Vec<usize> = slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.route.method == method && slot.route.path == path)
            .map(|(idx, _)| idx)
            .collect();
        let chosen = matching
            .iter()
            .copied()
            .find(|idx| !slots[*idx].served)
            .or_else(|| matching.last().copied());
        chosen.map(|idx| {
            slots[idx].served = true;
            slots[idx].route.clone()
        })
    };
    let route = route.unwrap_or_else(|| {
        MockRoute::json(&method, &path, 404, r#"{"detail":"no mock route"}"#)
    });

    let mut stream = stream;
    write!(
        stream,
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        route.status,
        reason(route.status),
        route.content_type,
        route.body.len()
    )?;
    stream.write_all(&route.body)?;
    stream.flush()
}

fn read_chunked(reader: &mut BufReader<TcpStream>) -> io::Result<Vec<u8>> {
    let mut body = Vec::new();
    loop {
        let mut size_line = String::new();
        reader.read_line(&mut size_line)?;
        let size_text = size_line.trim().split(';').next().unwrap_or("0");
        let size = usize::from_str_radix(size_text, 16).unwrap_or(0);
        if size == 0 {
            let mut trailer = String::new();
            reader.read_line(&mut trailer)?;
            return Ok(body);
        }
        let mut chunk = vec![0; size];
        reader.read_exact(&mut chunk)?;
        body.extend_from_slice(&chunk);
        let mut crlf = [0u8; 2];
        reader.read_exact(&mut crlf)?;
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Status",
    }
}
