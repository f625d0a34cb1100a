//! Shared helpers for unit and scenario tests.

use std::io::Read;
use std::sync::{Arc, Mutex};
use std::thread;

use tiny_http::{Header, Response, Server, StatusCode};

use crate::engine::Reporter;

#[derive(Default)]
pub(crate) struct CollectingReporter {
    pub debugs: Vec<String>,
    pub infos: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl Reporter for CollectingReporter {
    fn debug(&mut self, msg: &str) {
        self.debugs.push(msg.to_string());
    }

    fn info(&mut self, msg: &str) {
        self.infos.push(msg.to_string());
    }

    fn warn(&mut self, msg: &str) {
        self.warns.push(msg.to_string());
    }

    fn error(&mut self, msg: &str) {
        self.errors.push(msg.to_string());
    }
}

/// One request as the mock server saw it.
#[derive(Debug, Clone)]
pub(crate) struct Recorded {
    pub method: String,
    pub url: String,
    pub base_url: String,
    pub body: String,
}

impl Recorded {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).expect("request body is json")
    }
}

pub(crate) struct Reply {
    status: u16,
    body: String,
}

impl Reply {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            body: body.to_string(),
        }
    }
}

/// HTTP server answering every request through `handler` until dropped.
pub(crate) struct MockServer {
    server: Arc<Server>,
    base_url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockServer {
    pub fn start<F>(handler: F) -> Self
    where
        F: Fn(&Recorded) -> Reply + Send + 'static,
    {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("server"));
        let base_url = format!("http://{}", server.server_addr());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let handle = {
            let server = Arc::clone(&server);
            let requests = Arc::clone(&requests);
            let base_url = base_url.clone();
            thread::spawn(move || {
                for mut req in server.incoming_requests() {
                    let mut body = String::new();
                    req.as_reader().read_to_string(&mut body).expect("body");
                    let recorded = Recorded {
                        method: req.method().to_string(),
                        url: req.url().to_string(),
                        base_url: base_url.clone(),
                        body,
                    };
                    let reply = handler(&recorded);
                    requests.lock().expect("lock").push(recorded);
                    let resp = Response::from_string(reply.body)
                        .with_status_code(StatusCode(reply.status))
                        .with_header(
                            Header::from_bytes("Content-Type", "application/json")
                                .expect("header"),
                        );
                    let _ = req.respond(resp);
                }
            })
        };

        Self {
            server,
            base_url,
            requests,
            handle: Some(handle),
        }
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("lock").clone()
    }

    /// Requests whose path (without query) equals `path`.
    pub fn requests_to(&self, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.split('?').next() == Some(path))
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
