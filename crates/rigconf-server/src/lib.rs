//! HTTP request surface of the rigconf daemon.
//!
//! Routes map one-to-one onto the manager's request records:
//!
//! - `POST /start_configuration`   body `{"name": "...", "strictness": 1|2}`
//! - `POST /stop_configuration`    body `{"strictness": 1|2}` (optional)
//! - `GET  /list_configurations`
//! - `POST /update_configurations`
//! - `GET  /status`, `GET /health`
//!
//! A failed transition is still a successful HTTP exchange: it answers `200`
//! with `{"ok": false, "message": ...}`.
//!
//! The [`TestServer`] helper starts a server on a random port for integration testing.

use rigconf_core::service::{self, Request, StartConfiguration, StopConfiguration};
use rigconf_core::{spawn_monitor, CoreError, Manager, Ticker};
use rigconf_runtime::{ParamError, RegistryError};
use serde::Serialize;
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use thiserror::Error;
use tiny_http::{Header, Method, Response, Server, StatusCode};
use tracing::{debug, error, info};

pub const DEFAULT_PORT: u16 = 8420;

pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;

/// How often [`serve_until_exit`] checks for a shutdown request.
const SHUTDOWN_POLL_HZ: u32 = 20;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("parameter file: {0}")]
    Params(#[from] ParamError),
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("monitor thread panicked")]
    MonitorPanicked,
}

impl ServerError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ServerError::Core(CoreError::Config(_) | CoreError::Catalog(_))
            | ServerError::Params(_)
            | ServerError::Registry(RegistryError::Unavailable(_)) => EXIT_CONFIG_ERROR,
            _ => EXIT_FAILURE,
        }
    }
}

/// The routes this server knows, independent of method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Start,
    Stop,
    List,
    Update,
    Status,
    Health,
}

impl Route {
    pub fn parse(url: &str) -> Option<Self> {
        let path = url.split('?').next().unwrap_or(url).trim_end_matches('/');
        match path {
            "/start_configuration" => Some(Route::Start),
            "/stop_configuration" => Some(Route::Stop),
            "/list_configurations" => Some(Route::List),
            "/update_configurations" => Some(Route::Update),
            "/status" => Some(Route::Status),
            "/health" => Some(Route::Health),
            _ => None,
        }
    }

    fn method(self) -> Method {
        match self {
            Route::Start | Route::Stop | Route::Update => Method::Post,
            Route::List | Route::Status | Route::Health => Method::Get,
        }
    }
}

fn json_header() -> Option<Header> {
    Header::from_bytes("Content-Type", "application/json").ok()
}

fn respond_err(req: tiny_http::Request, code: u16, msg: &str) {
    let _ = req.respond(Response::from_string(msg).with_status_code(StatusCode(code)));
}

fn respond_json(req: tiny_http::Request, value: &impl Serialize) {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::from_data(body);
            if let Some(header) = json_header() {
                response = response.with_header(header);
            }
            let _ = req.respond(response);
        }
        Err(e) => {
            error!("failed to encode response: {e}");
            respond_err(req, 500, "encoding error");
        }
    }
}

fn read_body(req: &mut tiny_http::Request) -> Option<Vec<u8>> {
    let mut body = Vec::new();
    if req.as_reader().read_to_end(&mut body).is_ok() {
        Some(body)
    } else {
        None
    }
}

/// Decode a JSON request body. An empty body decodes as `T::default()` when
/// `empty` is given.
fn decode<T: serde::de::DeserializeOwned>(body: &[u8], empty: Option<T>) -> Result<T, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        if let Some(value) = empty {
            return Ok(value);
        }
    }
    serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))
}

/// Handle a single HTTP request.
pub fn handle_request(manager: &Manager, mut req: tiny_http::Request) {
    let method = req.method().clone();
    let url = req.url().to_owned();
    debug!("{method} {url}");

    let Some(route) = Route::parse(&url) else {
        respond_err(req, 404, "not found");
        return;
    };
    if method != route.method() {
        respond_err(req, 405, "method not allowed");
        return;
    }

    let request = match route {
        Route::Health => {
            respond_json(req, &serde_json::json!({ "status": "ok" }));
            return;
        }
        Route::Status => {
            respond_json(req, &manager.status());
            return;
        }
        Route::List => Request::List,
        Route::Update => Request::Update,
        Route::Start | Route::Stop => {
            let Some(body) = read_body(&mut req) else {
                respond_err(req, 400, "read error");
                return;
            };
            let decoded = if route == Route::Start {
                decode::<StartConfiguration>(&body, None).map(Request::Start)
            } else {
                decode(&body, Some(StopConfiguration::default())).map(Request::Stop)
            };
            match decoded {
                Ok(request) => request,
                Err(msg) => {
                    respond_err(req, 400, &msg);
                    return;
                }
            }
        }
    };

    let reply = service::handle(manager, &request);
    info!("{method} {url}: ok={}", reply.ok());
    respond_json(req, &reply);
}

/// Serve requests until the server is unblocked. Each request runs on its
/// own thread; the manager serializes the ones that transition. Returns only
/// once every in-flight request has been answered.
pub fn serve(manager: &Arc<Manager>, server: &Server) {
    let mut in_flight: Vec<JoinHandle<()>> = Vec::new();
    for request in server.incoming_requests() {
        in_flight.retain(|handle| !handle.is_finished());
        let manager = Arc::clone(manager);
        in_flight.push(std::thread::spawn(move || {
            handle_request(&manager, request);
        }));
    }
    debug!(
        "request loop finished, draining {} in-flight requests",
        in_flight.len()
    );
    for handle in in_flight {
        if handle.join().is_err() {
            error!("request thread panicked");
        }
    }
}

/// Run the daemon until `exit` is set or the monitor terminates on its own.
///
/// Shutdown is ordered: the server stops accepting and drains in-flight
/// requests, then the monitor stops the active configuration, and the
/// manager is dropped last so that its teardown unloads whatever the
/// registry still holds.
pub fn serve_until_exit(
    manager: Arc<Manager>,
    server: Arc<Server>,
    exit: &AtomicBool,
) -> Result<(), ServerError> {
    let http = {
        let server = Arc::clone(&server);
        let manager = Arc::clone(&manager);
        std::thread::Builder::new()
            .name("rigconf-http".to_owned())
            .spawn(move || serve(&manager, &server))?
    };
    let monitor_exit = Arc::new(AtomicBool::new(false));
    let monitor = match spawn_monitor(Arc::clone(&manager), Arc::clone(&monitor_exit)) {
        Ok(monitor) => monitor,
        Err(e) => {
            server.unblock();
            let _ = http.join();
            return Err(e.into());
        }
    };

    let mut ticker = Ticker::new(SHUTDOWN_POLL_HZ);
    while !exit.load(Ordering::SeqCst) && !monitor.is_finished() {
        ticker.tick();
    }
    info!("no longer accepting requests");
    server.unblock();
    if http.join().is_err() {
        error!("request loop panicked");
    }

    monitor_exit.store(true, Ordering::SeqCst);
    let outcome = monitor.join();

    match Arc::into_inner(manager) {
        Some(manager) => drop(manager),
        None => error!("manager still shared at shutdown; teardown skipped"),
    }
    match outcome {
        Ok(result) => result.map_err(ServerError::from),
        Err(_) => Err(ServerError::MonitorPanicked),
    }
}

pub fn bind(addr: &str) -> Result<Server, ServerError> {
    Server::http(addr).map_err(|e| ServerError::Bind {
        addr: addr.to_owned(),
        reason: e.to_string(),
    })
}

/// A test helper that serves a manager on a random port in a background thread.
///
/// The server listens on `127.0.0.1:{port}`. Drop the `TestServer` to stop it
/// (via `Server::unblock`).
pub struct TestServer {
    pub url: String,
    pub port: u16,
    pub manager: Arc<Manager>,
    server: Arc<Server>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl TestServer {
    /// Binds to `127.0.0.1:0` (random port).
    pub fn start(manager: Arc<Manager>) -> Self {
        let server = Arc::new(bind("127.0.0.1:0").expect("failed to bind test HTTP server"));
        let port = server.server_addr().to_ip().expect("not an IP addr").port();
        let url = format!("http://127.0.0.1:{port}");

        let srv = Arc::clone(&server);
        let mgr = Arc::clone(&manager);
        let handle = std::thread::spawn(move || serve(&mgr, &srv));

        Self {
            url,
            port,
            manager,
            server,
            handle: Some(handle),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
