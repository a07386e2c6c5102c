use std::{
    net::SocketAddr,
    path::Path,
    sync::Arc,
    time::Duration,
};

use {
    anyhow::Context,
    axum::{
        Json, Router,
        extract::{Request, State},
        http::{HeaderName, HeaderValue, Method, StatusCode, header},
        middleware::{self, Next},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde_json::{Value, json},
    tokio::{net::TcpListener, sync::Mutex, task::JoinHandle},
    tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer},
    tracing::{info, warn},
};

use {
    tether_auth::{Credentials, TokenService},
    tether_config::WebInterfaceConfig,
    tether_protocol::PROTOCOL_VERSION,
    tether_simulation::SimulationFacade,
};

use crate::{
    auth,
    broadcast::run_status_broadcaster,
    error::GatewayError,
    rest,
    state::GatewayState,
    ws::ws_upgrade_handler,
};

/// How long `stop()` waits for in-flight requests before abandoning them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── Router ───────────────────────────────────────────────────────────────────

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>, static_dir: Option<&Path>) -> Router {
    let protected = rest::companion_routes(state.skins.max_bytes())
        .route("/auth/validate", get(auth::validate_handler));
    // `layer` rather than `route_layer`, so method mismatches on protected
    // paths are answered with 401 when unauthenticated.
    let require_bearer = middleware::from_fn_with_state(Arc::clone(&state), auth::require_bearer);
    let api = protected
        .clone()
        .route("/", get(api_index))
        .fallback(unknown_route)
        .layer(require_bearer.clone());
    // The nested `/` only matches `/api`, not `/api/`.
    let api_slash = Router::new()
        .route("/api/", get(api_index))
        .layer(require_bearer.clone());
    let protected = protected.layer(require_bearer);

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(auth::login_handler))
        .route("/api/auth/login", post(auth::login_handler))
        .route("/ws", get(ws_upgrade_handler))
        .merge(protected)
        .merge(api_slash)
        .nest("/api", api);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router.fallback(unknown_route),
    };

    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(preflight))
        .layer(cors_header(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            "*",
        ))
        .layer(cors_header(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            "GET, POST, PUT, DELETE, OPTIONS",
        ))
        .layer(cors_header(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            "Content-Type, Authorization",
        ))
}

fn cors_header(name: HeaderName, value: &'static str) -> SetResponseHeaderLayer<HeaderValue> {
    SetResponseHeaderLayer::overriding(name, HeaderValue::from_static(value))
}

/// Answer every `OPTIONS` request directly; the CORS layers add the headers.
async fn preflight(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(req).await
}

async fn unknown_route() -> GatewayError {
    GatewayError::UnknownRoute
}

async fn api_index(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "message": "Tether companion API",
        "version": state.version,
    }))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": state.version,
        "protocol": PROTOCOL_VERSION,
        "connections": state.sessions.count(),
    }))
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

struct Running {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    server: JoinHandle<std::io::Result<()>>,
    broadcaster: JoinHandle<()>,
}

/// HTTP + WebSocket listener plus its status broadcaster.
///
/// `start` and `stop` may be called repeatedly; each run gets fresh
/// runtime state.
pub struct GatewayServer {
    web: WebInterfaceConfig,
    tokens: Arc<TokenService>,
    credentials: Arc<Credentials>,
    simulation: Arc<dyn SimulationFacade>,
    running: Mutex<Option<Running>>,
}

impl GatewayServer {
    pub fn new(
        web: WebInterfaceConfig,
        tokens: Arc<TokenService>,
        credentials: Arc<Credentials>,
        simulation: Arc<dyn SimulationFacade>,
    ) -> Self {
        Self {
            web,
            tokens,
            credentials,
            simulation,
            running: Mutex::new(None),
        }
    }

    /// Bind and serve. Returns the bound address; if already running, the
    /// existing address is returned and nothing is rebound.
    pub async fn start(&self) -> anyhow::Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Ok(current.addr);
        }

        let state = GatewayState::new(
            &self.web,
            Arc::clone(&self.tokens),
            Arc::clone(&self.credentials),
            Arc::clone(&self.simulation),
        );
        let app = build_gateway_app(Arc::clone(&state), self.web.static_dir.as_deref());

        let listener = TcpListener::bind((self.web.bind.as_str(), self.web.port))
            .await
            .with_context(|| format!("failed to bind {}:{}", self.web.bind, self.web.port))?;
        let addr = listener.local_addr()?;

        let lines = [
            format!("tether gateway v{}", state.version),
            format!("protocol v{PROTOCOL_VERSION}, listening on {addr}"),
            format!("{} companions known", self.simulation.list().await.len()),
        ];
        let width = lines.iter().map(|l| l.len()).max().unwrap_or(0) + 4;
        info!("┌{}┐", "─".repeat(width));
        for line in &lines {
            info!("│  {:<w$}│", line, w = width - 2);
        }
        info!("└{}┘", "─".repeat(width));

        let shutdown = state.shutdown.clone();
        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
        });

        let period = Duration::from_secs(self.web.status_interval_secs.max(1));
        let broadcaster = tokio::spawn(run_status_broadcaster(
            Arc::clone(&state),
            period,
            state.shutdown.clone(),
        ));

        *running = Some(Running {
            addr,
            state,
            server,
            broadcaster,
        });
        Ok(addr)
    }

    /// Stop broadcasting, stop accepting, close every session, then wait
    /// for the listener task. A no-op when not running.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };

        running.state.shutdown.cancel();
        if let Err(e) = running.broadcaster.await {
            warn!(error = %e, "status broadcaster task failed");
        }
        let closed = running.state.sessions.close_all();

        let abort = running.server.abort_handle();
        match tokio::time::timeout(SHUTDOWN_GRACE, running.server).await {
            Ok(Ok(Ok(()))) => {},
            Ok(Ok(Err(e))) => warn!(error = %e, "gateway listener exited with an error"),
            Ok(Err(e)) => warn!(error = %e, "gateway listener task failed"),
            Err(_) => {
                warn!("gateway listener did not stop in time, aborting");
                abort.abort();
            },
        }
        info!(addr = %running.addr, closed_sessions = closed, "gateway stopped");
    }

    /// Runtime state of the current run, if started.
    pub async fn state(&self) -> Option<Arc<GatewayState>> {
        self.running.lock().await.as_ref().map(|r| Arc::clone(&r.state))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{self, PASSWORD, USERNAME},
        axum::body::{Body, to_bytes},
        tether_simulation::{LocalSimulation, Task},
        tower::ServiceExt,
        uuid::Uuid,
    };

    struct Harness {
        app: Router,
        state: Arc<GatewayState>,
        sim: Arc<LocalSimulation>,
        mine: Uuid,
        theirs: Uuid,
        _skins: tempfile::TempDir,
    }

    fn harness_with(configure: impl FnOnce(&mut WebInterfaceConfig)) -> Harness {
        let skins = tempfile::tempdir().unwrap();
        let mine = test_support::seed("Pip", USERNAME);
        let theirs = test_support::seed("Bramble", "steve");
        let (mine_id, theirs_id) = (mine.id.unwrap(), theirs.id.unwrap());
        let sim = Arc::new(LocalSimulation::spawn(vec![mine, theirs]).unwrap());

        let mut web = WebInterfaceConfig {
            skins_dir: skins.path().to_path_buf(),
            ..Default::default()
        };
        configure(&mut web);
        let state = test_support::state_with(&web, Arc::clone(&sim) as Arc<dyn SimulationFacade>);
        Harness {
            app: build_gateway_app(Arc::clone(&state), None),
            state,
            sim,
            mine: mine_id,
            theirs: theirs_id,
            _skins: skins,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    impl Harness {
        fn bearer(&self) -> String {
            format!("Bearer {}", self.state.tokens.issue(USERNAME).unwrap())
        }

        async fn send(&self, req: axum::http::Request<Body>) -> (StatusCode, Value) {
            let resp = self.app.clone().oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }

        async fn get(&self, uri: &str) -> (StatusCode, Value) {
            let req = axum::http::Request::get(uri)
                .header(header::AUTHORIZATION, self.bearer())
                .body(Body::empty())
                .unwrap();
            self.send(req).await
        }

        async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
            let req = axum::http::Request::post(uri)
                .header(header::AUTHORIZATION, self.bearer())
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.send(req).await
        }
    }

    #[tokio::test]
    async fn preflight_answers_any_path_with_cors_headers() {
        let h = harness();
        for uri in ["/companions", "/api/companions/abc/skin", "/nowhere"] {
            let req = axum::http::Request::builder()
                .method(Method::OPTIONS)
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let resp = h.app.clone().oneshot(req).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "{uri}");
            let headers = resp.headers();
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
            assert_eq!(
                headers[header::ACCESS_CONTROL_ALLOW_METHODS],
                "GET, POST, PUT, DELETE, OPTIONS"
            );
            assert_eq!(
                headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
                "Content-Type, Authorization"
            );
        }
    }

    #[tokio::test]
    async fn protected_routes_require_a_token_for_every_method() {
        let h = harness();
        let id = h.mine;
        let paths = [
            "/auth/validate".to_string(),
            "/companions".to_string(),
            format!("/companions/{id}"),
            format!("/companions/{id}/command"),
            format!("/companions/{id}/skin"),
            "/api/companions".to_string(),
            "/api/does-not-exist".to_string(),
        ];
        for path in &paths {
            for method in [Method::GET, Method::POST, Method::PUT, Method::DELETE] {
                let req = axum::http::Request::builder()
                    .method(method.clone())
                    .uri(path)
                    .body(Body::empty())
                    .unwrap();
                let resp = h.app.clone().oneshot(req).await.unwrap();
                assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{method} {path}");
                assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
            }
        }

        let req = axum::http::Request::get("/companions")
            .header(header::AUTHORIZATION, "Bearer not.a.token")
            .body(Body::empty())
            .unwrap();
        let (status, body) = h.send(req).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn login_issues_a_usable_token() {
        let h = harness();
        let req = axum::http::Request::post("/auth/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"username": USERNAME, "password": PASSWORD}).to_string(),
            ))
            .unwrap();
        let (status, body) = h.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["username"], USERNAME);
        let token = body["token"].as_str().unwrap();
        assert_eq!(h.state.tokens.validate(token).unwrap().sub, USERNAME);

        let req = axum::http::Request::get("/api/auth/validate")
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .unwrap();
        let (status, body) = h.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert!(body["expiresAt"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn login_rejects_bad_password_and_bad_bodies() {
        let h = harness();
        let attempt = |body: String| {
            axum::http::Request::post("/auth/login")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body))
                .unwrap()
        };

        let (status, body) = h
            .send(attempt(json!({"username": USERNAME, "password": "hunter3"}).to_string()))
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid credentials");

        for bad in ["{not json", r#"{"username": "admin"}"#, r#"{"username": 1, "password": 2}"#] {
            let (status, body) = h.send(attempt(bad.to_string())).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{bad}");
            assert_eq!(body["error"], "Invalid request format");
        }
    }

    #[tokio::test]
    async fn list_and_get_companions() {
        let h = harness();
        let (status, body) = h.get("/companions").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["companions"].as_array().unwrap().len(), 2);

        let (status, body) = h.get(&format!("/api/companions/{}", h.mine)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Pip");
        assert_eq!(body["maxHealth"], 20.0);

        let (status, body) = h.get("/companions/not-a-uuid").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid companion ID format");

        let (status, body) = h.get(&format!("/companions/{}", Uuid::new_v4())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Companion not found");

        let (status, _) = h.get("/api/nothing-here").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn command_is_enqueued_and_applied() {
        let h = harness();
        let (status, body) = h
            .post_json(&format!("/companions/{}/command", h.mine), json!({"command": "stay"}))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true, "message": "Command sent"}));

        h.sim.flush().await;
        assert_eq!(h.sim.companion(h.mine).unwrap().task, Task::Stay);
    }

    #[tokio::test]
    async fn command_validation() {
        let h = harness();
        let uri = format!("/companions/{}/command", h.mine);

        let (status, body) = h.post_json(&uri, json!({"payload": {}})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing command parameter");

        let (status, _) = h.post_json(&uri, json!({"command": "   "})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = h
            .post_json("/companions/xyz/command", json!({"command": "follow"}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = format!("/companions/{}/command", Uuid::new_v4());
        let (status, _) = h.post_json(&unknown, json!({"command": "follow"})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // The companion is looked up before the body is read.
        let (status, body) = h.post_json(&unknown, json!({})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Companion not found");
    }

    #[tokio::test]
    async fn command_fails_when_simulation_is_unavailable() {
        let seed = test_support::seed("Pip", USERNAME);
        let id = seed.id.unwrap();
        let sim = test_support::OfflineSimulation(LocalSimulation::spawn(vec![seed]).unwrap());
        let state = test_support::state_with(&WebInterfaceConfig::default(), Arc::new(sim));
        let app = build_gateway_app(Arc::clone(&state), None);

        let req = axum::http::Request::post(format!("/companions/{id}/command"))
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", state.tokens.issue(USERNAME).unwrap()),
            )
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"command": "follow"}).to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body, json!({"error": "Simulation unavailable"}));
    }

    #[tokio::test]
    async fn ownership_is_only_checked_when_enforced() {
        let open = harness();
        let (status, _) = open
            .post_json(&format!("/companions/{}/command", open.theirs), json!({"command": "follow"}))
            .await;
        assert_eq!(status, StatusCode::OK);

        let strict = harness_with(|web| web.enforce_ownership = true);
        let (status, body) = strict
            .post_json(&format!("/companions/{}/command", strict.theirs), json!({"command": "follow"}))
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["error"].is_string());

        let (status, _) = strict
            .post_json(&format!("/companions/{}/command", strict.mine), json!({"command": "follow"}))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn json_skin_requests() {
        let h = harness();
        let uri = format!("/companions/{}/skin", h.mine);

        let (status, body) = h.post_json(&uri, json!({"skinType": "alex"})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["skinType"], "alex");
        assert_eq!(body["message"], "Skin updated to alex");
        assert!(body.get("skinPath").is_none());
        h.sim.flush().await;
        assert_eq!(h.sim.companion(h.mine).unwrap().skin_type, "alex");

        let (status, _) = h.post_json(&uri, json!({"skinType": "custom"})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = h.post_json(&uri, json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing skinType parameter");

        let req = axum::http::Request::post(&uri)
            .header(header::AUTHORIZATION, h.bearer())
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from("alex"))
            .unwrap();
        let (status, _) = h.send(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    fn multipart_skin(bytes: &[u8]) -> (String, Vec<u8>) {
        let boundary = "tether-skin-boundary";
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"skin\"; \
             filename=\"skin.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={boundary}"), body)
    }

    #[tokio::test]
    async fn skin_for_unknown_companion_is_not_found() {
        let h = harness();
        let (status, body) = h
            .post_json(
                &format!("/companions/{}/skin", Uuid::new_v4()),
                json!({"skinType": "alex"}),
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Companion not found");
    }

    #[tokio::test]
    async fn skin_storage_failure_hides_the_detail() {
        let blocker = tempfile::tempdir().unwrap();
        let not_a_dir = blocker.path().join("skins");
        std::fs::write(&not_a_dir, b"occupied").unwrap();
        let h = harness_with(|web| web.skins_dir = not_a_dir.clone());

        let mut png = vec![0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];
        png.extend_from_slice(b"pixels");
        let (content_type, body) = multipart_skin(&png);
        let req = axum::http::Request::post(format!("/companions/{}/skin", h.mine))
            .header(header::AUTHORIZATION, h.bearer())
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap();
        let (status, body) = h.send(req).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({"error": "Internal server error"}));
        assert!(not_a_dir.is_file());
    }

    #[tokio::test]
    async fn api_root_identifies_the_service() {
        let h = harness();
        for uri in ["/api", "/api/"] {
            let (status, body) = h.get(uri).await;
            assert_eq!(status, StatusCode::OK, "{uri}");
            assert_eq!(body["message"], "Tether companion API");

            let req = axum::http::Request::get(uri).body(Body::empty()).unwrap();
            let (status, _) = h.send(req).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "{uri}");
        }
    }

    #[tokio::test]
    async fn health_reports_connections() {
        let h = harness();
        let req = axum::http::Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = h.send(req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["connections"], 0);
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn static_dir_is_served_at_root() {
        let web_root = tempfile::tempdir().unwrap();
        std::fs::write(web_root.path().join("index.html"), "<h1>tether</h1>").unwrap();
        let (state, _sim) = test_support::counting_state();
        let app = build_gateway_app(state, Some(web_root.path()));

        let resp = app
            .oneshot(axum::http::Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"<h1>tether</h1>");
    }
}
