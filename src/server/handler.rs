// Axum request handlers for upload, download, remove and execute over the storage root.

use std::net::SocketAddr;
use std::path::Path as FsPath;
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Path, RawQuery, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use bytes::Bytes;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use super::form::FormValues;
use super::response::{ApiError, ResponseData};
use super::serve::serve_path;
use crate::command;
use crate::config::{password_matches, ServerConfig, DATE_FORMAT, FORM_FILE, WELCOME_MESSAGE};
use crate::storage::local::LocalStorage;
use crate::storage::upload::{store_upload, StagedUpload};
use crate::version::VersionResolver;

const DOWNLOAD_PREFIX: &str = "/download/";

/// Everything a handler needs, shared read-only across requests.
pub struct AppState {
    pub config: ServerConfig,
    pub storage: LocalStorage,
    pub resolver: VersionResolver,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let storage = LocalStorage::new(config.storage_dir.clone());
        let resolver = VersionResolver::new(Arc::new(storage.clone()));
        Self {
            config,
            storage,
            resolver,
        }
    }

    fn management_allowed(&self, form: &FormValues) -> bool {
        password_matches(self.config.password.as_deref(), form.get("password"))
    }

    fn download_allowed(&self, form: &FormValues) -> bool {
        password_matches(self.config.download_password.as_deref(), form.get("password"))
    }
}

pub type SharedState = Arc<AppState>;

pub struct FileServer {
    addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl FileServer {
    /// Bind `addr` and serve in the background, returning a handle.
    pub async fn start(config: ServerConfig, addr: SocketAddr) -> Result<Self> {
        let state = Arc::new(AppState::new(config));
        state.storage.ensure_root().await?;

        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        if state.config.password.is_some() {
            info!("upload/remove/execute require a password");
        }
        if state.config.download_password.is_some() {
            info!("download requires a password");
        }
        if !state.config.commands.is_empty() {
            info!(
                "executable commands: {}",
                state.config.commands.iter().collect::<Vec<_>>().join(",")
            );
        }
        info!(
            "serving {} on {}",
            state.config.storage_dir.display(),
            addr
        );

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let app = router(state);

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
            {
                error!("server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Get the port the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub fn router(state: SharedState) -> Router {
    let upload_limit = DefaultBodyLimit::max(state.config.max_upload_bytes);
    Router::new()
        .route("/upload", any(upload_root).layer(upload_limit.clone()))
        .route("/upload/", any(upload_root).layer(upload_limit.clone()))
        .route("/upload/{*dir}", any(upload_in_dir).layer(upload_limit))
        .route("/remove", any(remove_root))
        .route("/remove/", any(remove_root))
        .route("/remove/{*path}", any(remove_handler))
        .route("/download", get(download_root))
        .route("/download/", get(download_root))
        .route("/download/{*path}", get(download_handler))
        .route("/execute", get(execute_handler).post(execute_handler))
        .fallback(welcome)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn welcome() -> &'static str {
    WELCOME_MESSAGE
}

/// Query parameters plus an url-encoded body, if the request carries one.
fn request_form(query: Option<&str>, headers: &HeaderMap, body: &Bytes) -> FormValues {
    let mut form = FormValues::new();
    let is_urlencoded = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    if is_urlencoded {
        form.extend_urlencoded(body);
    }
    form.extend_urlencoded(query.unwrap_or_default().as_bytes());
    form
}

async fn upload_root(
    State(state): State<SharedState>,
    RawQuery(query): RawQuery,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    upload(state, String::new(), query, multipart).await
}

async fn upload_in_dir(
    State(state): State<SharedState>,
    Path(dir): Path<String>,
    RawQuery(query): RawQuery,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    upload(state, dir, query, multipart).await
}

/// A file part taken from a multipart upload, already streamed to disk.
struct UploadedFile {
    name: String,
    upload: StagedUpload,
}

async fn read_multipart(
    storage: &LocalStorage,
    multipart: &mut Multipart,
    form: &mut FormValues,
) -> Result<Option<UploadedFile>, String> {
    let mut file = None;
    while let Some(mut field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().unwrap_or_default().to_string();
        if name == FORM_FILE && file.is_none() {
            let file_name = field.file_name().unwrap_or_default().to_string();
            let mut upload = StagedUpload::create(storage)
                .await
                .map_err(|e| e.to_string())?;
            while let Some(chunk) = field.chunk().await.map_err(|e| e.to_string())? {
                upload
                    .write_chunk(&chunk)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            file = Some(UploadedFile {
                name: file_name,
                upload,
            });
        } else {
            let value = field.text().await.map_err(|e| e.to_string())?;
            form.push(name, value);
        }
    }
    Ok(file)
}

async fn upload(
    state: SharedState,
    dir: String,
    query: Option<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let mut form = FormValues::new();
    let file = match multipart {
        Ok(mut multipart) => read_multipart(&state.storage, &mut multipart, &mut form).await,
        Err(rejection) => Err(rejection.body_text()),
    };
    form.extend_urlencoded(query.as_deref().unwrap_or_default().as_bytes());

    // A rejected upload drops its staged body, which deletes it.
    if !state.management_allowed(&form) {
        warn!("upload rejected: wrong password");
        return ApiError::Forbidden.into_response();
    }

    let file = match file {
        Ok(Some(file)) => file,
        Ok(None) => {
            return ResponseData::error(format!("the form file '{}' is required", FORM_FILE))
                .into_response()
        }
        Err(e) => {
            warn!("upload read failed: {}", e);
            return ResponseData::error(e).into_response();
        }
    };

    let dir = if form.get("bydate") == Some("true") {
        let date = chrono::Local::now().format(DATE_FORMAT).to_string();
        format!("{}/{}", date, dir)
    } else {
        dir
    };
    let override_existing = form.get_bool("override");
    debug!(
        "upload dir={} name={} override={}",
        dir, file.name, override_existing
    );

    match store_upload(
        &state.storage,
        &state.resolver,
        &dir,
        &file.name,
        file.upload,
        override_existing,
    )
    .await
    {
        Ok(stored) => {
            let base = FsPath::new(&stored)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or(stored);
            ResponseData::success(format!("uploaded {}", base)).into_response()
        }
        Err(e) => {
            error!("upload failed: {}", e);
            ResponseData::error(e.to_string()).into_response()
        }
    }
}

async fn remove_root(
    State(state): State<SharedState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    remove(state, String::new(), query, headers, body).await
}

async fn remove_handler(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    remove(state, path, query, headers, body).await
}

async fn remove(
    state: SharedState,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = request_form(query.as_deref(), &headers, &body);
    if !state.management_allowed(&form) {
        warn!("remove rejected: wrong password");
        return ApiError::Forbidden.into_response();
    }

    let path = path.trim_matches('/');
    if path.is_empty() {
        let output = "the path in url is required";
        warn!("{}", output);
        return ResponseData::error(output).into_response();
    }

    match state.storage.remove_all(path).await {
        Ok(()) => {
            let output = format!("removed {}", path);
            info!("{}", output);
            ResponseData::success(output).into_response()
        }
        Err(e) => {
            error!("remove {} failed: {}", path, e);
            ResponseData::error(e.to_string()).into_response()
        }
    }
}

async fn download_root(
    State(state): State<SharedState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    download(state, String::new(), query, headers).await
}

async fn download_handler(
    State(state): State<SharedState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    download(state, path, query, headers).await
}

/// GET /download/{path}?version=N: serve a file, optionally at a given version.
async fn download(
    state: SharedState,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
) -> Response {
    let form = FormValues::from_query(query.as_deref());
    if !state.download_allowed(&form) {
        warn!("download rejected: wrong password");
        return ApiError::Forbidden.into_response();
    }

    let version = form.get_non_empty("version");
    let outcome = state.resolver.resolve(&path, version).await;
    let Some(target) = outcome.path() else {
        return ApiError::NotFound.into_response();
    };

    match serve_path(&state.storage, target, DOWNLOAD_PREFIX, &headers).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// GET|POST /execute?cmd=...&args=...: run an allowlisted command.
async fn execute_handler(
    State(state): State<SharedState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let form = request_form(query.as_deref(), &headers, &body);
    if !state.management_allowed(&form) {
        warn!("execute rejected: wrong password");
        return ApiError::Forbidden.into_response();
    }

    let cmd = form.get("cmd").unwrap_or_default();
    let args = form.get_all("args");
    match command::execute(
        &state.config.commands,
        cmd,
        &args,
        state.config.command_timeout,
    )
    .await
    {
        Ok(output) => ResponseData::success(output).into_response(),
        Err(e) => {
            warn!("execute failed: {}", e);
            ResponseData::error(e.to_string()).into_response()
        }
    }
}
