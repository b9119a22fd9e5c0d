//! Protocol server: one shared handler behind both transports.
//!
//! The TCP loop drives a full turn-based conversation per connection; the
//! axum routes map each POST onto the slice of the conversation its body
//! carries. Either way the object logic is the same [`Handler`].

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};

use tin_core::repo::Repository;

use crate::auth::ServerAuth;
use crate::envelope::{
    join_frames, parse_frames, read_frame, write_frame, Envelope, MessageType, PROTOCOL_VERSION,
};
use crate::error::{ProtocolError, Result};
use crate::messages::{
    ConfigValues, ErrorMsg, GetConfig, Hello, OkMsg, Operation, Pack, UpdateRefs, Want,
};
use crate::pack;

/// Server configuration.
pub struct ServerOptions {
    /// Multi-repo root, or the repository itself in single-repo mode.
    pub root: PathBuf,
    /// Serve exactly one repository at `root`, ignoring `repo_path`.
    pub single_repo: bool,
    /// Create missing repositories on push.
    pub auto_create: bool,
    pub auth: ServerAuth,
}

impl ServerOptions {
    pub fn multi_repo(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            single_repo: false,
            auto_create: false,
            auth: ServerAuth::from_env(),
        }
    }

    pub fn single_repo(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            single_repo: true,
            auto_create: false,
            auth: ServerAuth::from_env(),
        }
    }
}

/// Strip and normalize a client-supplied repo path, rejecting anything
/// that would escape the root.
pub fn sanitize_repo_path(raw: &str) -> Result<PathBuf> {
    let trimmed = raw.trim_start_matches('/');
    let mut clean = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ProtocolError::InvalidRequest(format!(
                    "repo path {raw:?} is not allowed"
                )))
            }
        }
    }
    if clean.as_os_str().is_empty() {
        return Err(ProtocolError::InvalidRequest("empty repo path".to_string()));
    }
    Ok(clean)
}

/// Open (or, on push with auto-create, initialize) the addressed repo.
pub fn resolve_repo(opts: &ServerOptions, hello: &Hello) -> Result<Repository> {
    if opts.single_repo {
        // Accept either a bare store or a working repo's `.tin/`.
        let repo = Repository::open_bare(&opts.root)
            .or_else(|_| Repository::open_bare(opts.root.join(tin_core::STORE_DIR)))?;
        return Ok(repo);
    }

    let rel = sanitize_repo_path(&hello.repo_path)?;
    let path = opts.root.join(rel);
    match Repository::open_bare(&path) {
        Ok(repo) => Ok(repo),
        Err(_) if opts.auto_create && hello.operation == Operation::Push => {
            std::fs::create_dir_all(&path).map_err(ProtocolError::Io)?;
            info!(event = "repo.auto_created", path = %path.display());
            Ok(Repository::init_bare(&path)?)
        }
        Err(_) => Err(ProtocolError::Core(tin_core::TinError::not_found(
            "repository",
            hello.repo_path.clone(),
        ))),
    }
}

fn check_hello(frame: &Envelope) -> Result<Hello> {
    let hello: Hello = frame.clone().expect(MessageType::Hello)?.decode()?;
    if hello.version != PROTOCOL_VERSION {
        return Err(ProtocolError::Version(hello.version));
    }
    Ok(hello)
}

fn error_frame(err: &ProtocolError) -> Envelope {
    Envelope::new(
        MessageType::Error,
        &ErrorMsg {
            code: err.wire_code(),
            message: err.to_string(),
        },
    )
    .unwrap_or_else(|_| Envelope::bare(MessageType::Error))
}

/// Object-level operations shared by both transports.
pub struct Handler {
    pub repo: Repository,
}

impl Handler {
    pub fn refs_frame(&self) -> Result<Envelope> {
        Envelope::new(MessageType::Refs, &pack::advertise(&self.repo)?)
    }

    /// Apply a pusher's pack and ref updates; all-or-nothing.
    pub fn apply_push(&self, pack_frame: Envelope, updates_frame: Envelope) -> Result<Envelope> {
        let incoming: Pack = pack_frame.expect(MessageType::Pack)?.decode()?;
        let updates: UpdateRefs = updates_frame.expect(MessageType::UpdateRefs)?.decode()?;

        let stats = pack::apply_pack(&self.repo, &incoming)?;
        pack::apply_ref_updates(&self.repo, &updates)?;

        Envelope::new(
            MessageType::Ok,
            &OkMsg {
                message: Some(format!(
                    "received {} commits, {} thread versions",
                    stats.commits, stats.threads
                )),
            },
        )
    }

    /// Answer a puller's `want` with a pack.
    pub fn serve_want(&self, want_frame: Envelope) -> Result<Envelope> {
        let want: Want = want_frame.expect(MessageType::Want)?.decode()?;
        let outgoing = pack::build_want_pack(&self.repo, &want)?;
        Envelope::new(MessageType::Pack, &outgoing)
    }

    pub fn get_config(&self, frame: Envelope) -> Result<Envelope> {
        let request: GetConfig = frame.expect(MessageType::GetConfig)?.decode()?;
        let config = self.repo.config()?;
        let keys: Vec<&str> = if request.keys.is_empty() {
            tin_core::Config::keys().to_vec()
        } else {
            request.keys.iter().map(String::as_str).collect()
        };
        let mut values = std::collections::BTreeMap::new();
        for key in keys {
            if let Some(value) = config.get_key(key) {
                values.insert(key.to_string(), value);
            }
        }
        Envelope::new(MessageType::Config, &ConfigValues { values })
    }

    pub fn set_config(&self, frame: Envelope) -> Result<Envelope> {
        let request: ConfigValues = frame.expect(MessageType::SetConfig)?.decode()?;
        let mut config = self.repo.config()?;
        for (key, value) in &request.values {
            if !config.set_key(key, value) {
                return Err(ProtocolError::InvalidRequest(format!(
                    "unknown or invalid config key {key}"
                )));
            }
        }
        self.repo.set_config(&config)?;
        Envelope::new(MessageType::Ok, &OkMsg::default())
    }
}

// ---- TCP ----

/// Serve one TCP connection through a full conversation.
pub async fn serve_connection<S>(stream: S, opts: &ServerOptions) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read, mut write) = tokio::io::split(stream);
    let mut read = BufReader::new(read);

    let result = conversation(&mut read, &mut write, opts).await;
    if let Err(err) = &result {
        warn!(error = %err, "connection failed");
        let _ = write_frame(&mut write, &error_frame(err)).await;
    }
    result
}

async fn conversation<R, W>(read: &mut R, write: &mut W, opts: &ServerOptions) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let first = read_frame(read).await?.ok_or(ProtocolError::Closed)?;
    let hello = check_hello(&first)?;
    let handler = Handler {
        repo: resolve_repo(opts, &hello)?,
    };
    info!(
        event = "connection.accepted",
        operation = ?hello.operation,
        repo = %hello.repo_path,
    );

    match hello.operation {
        Operation::Push => {
            write_frame(write, &handler.refs_frame()?).await?;
            let pack_frame = read_frame(read).await?.ok_or(ProtocolError::Closed)?;
            let updates_frame = read_frame(read).await?.ok_or(ProtocolError::Closed)?;
            let reply = handler.apply_push(pack_frame, updates_frame)?;
            write_frame(write, &reply).await?;
        }
        Operation::Pull => {
            write_frame(write, &handler.refs_frame()?).await?;
            let want_frame = read_frame(read).await?.ok_or(ProtocolError::Closed)?;
            let reply = handler.serve_want(want_frame)?;
            write_frame(write, &reply).await?;
            // The client's closing ok is a courtesy; EOF is fine too.
            let _ = read_frame(read).await;
        }
        Operation::Config => {
            let frame = read_frame(read).await?.ok_or(ProtocolError::Closed)?;
            let reply = match frame.message_type {
                MessageType::GetConfig => handler.get_config(frame)?,
                MessageType::SetConfig => handler.set_config(frame)?,
                other => {
                    return Err(ProtocolError::Unexpected {
                        expected: "get-config or set-config",
                        got: other.as_str().to_string(),
                    })
                }
            };
            write_frame(write, &reply).await?;
        }
    }
    Ok(())
}

/// Accept loop for a bound TCP listener.
pub async fn serve_tcp(listener: TcpListener, opts: Arc<ServerOptions>) -> Result<()> {
    info!(event = "server.listening", addr = ?listener.local_addr().ok());
    loop {
        let (stream, peer) = listener.accept().await?;
        let opts = Arc::clone(&opts);
        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, &opts).await {
                warn!(peer = %peer, error = %e, "connection ended with error");
            }
        });
    }
}

// ---- HTTP ----

/// Router exposing `POST /<repo>/tin-{receive-pack,upload-pack,config}`.
pub fn router(opts: Arc<ServerOptions>) -> Router {
    Router::new()
        .route("/*path", post(handle_http))
        .with_state(opts)
}

async fn handle_http(
    State(opts): State<Arc<ServerOptions>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let authorized = opts.auth.check_header(
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok()),
    );
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            [(header::WWW_AUTHENTICATE, "Basic realm=\"tin\"")],
            "authentication required",
        )
            .into_response();
    }

    let reply = match http_frames(&opts, uri.path(), &body).await {
        Ok(frames) => frames,
        Err(err) => vec![error_frame(&err)],
    };
    match join_frames(&reply) {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

/// Process one POST body as a conversation slice.
async fn http_frames(opts: &ServerOptions, path: &str, body: &[u8]) -> Result<Vec<Envelope>> {
    let (repo_path, operation) = split_endpoint(path)?;

    let text = std::str::from_utf8(body)
        .map_err(|_| ProtocolError::InvalidRequest("body is not UTF-8".to_string()))?;
    let mut frames: std::collections::VecDeque<Envelope> = parse_frames(text)?.into();

    let first = frames
        .pop_front()
        .ok_or_else(|| ProtocolError::InvalidRequest("empty request body".to_string()))?;
    let mut hello = check_hello(&first)?;
    if hello.operation != operation {
        return Err(ProtocolError::InvalidRequest(format!(
            "endpoint does not accept {:?} operations",
            hello.operation
        )));
    }
    // The URL names the repository; the hello must stay inside the root
    // too, but the endpoint path is authoritative.
    sanitize_repo_path(&hello.repo_path)?;
    hello.repo_path = repo_path;

    let handler = Handler {
        repo: resolve_repo(opts, &hello)?,
    };

    match operation {
        Operation::Push => match (frames.pop_front(), frames.pop_front()) {
            // Negotiation half: advertise what we have.
            (None, _) => Ok(vec![handler.refs_frame()?]),
            (Some(pack_frame), Some(updates_frame)) => {
                Ok(vec![handler.apply_push(pack_frame, updates_frame)?])
            }
            (Some(frame), None) => Err(ProtocolError::Unexpected {
                expected: "pack followed by update-refs",
                got: frame.message_type.as_str().to_string(),
            }),
        },
        Operation::Pull => match frames.pop_front() {
            None => Ok(vec![handler.refs_frame()?]),
            Some(frame) if frame.message_type == MessageType::Want => {
                Ok(vec![handler.serve_want(frame)?])
            }
            // The closing courtesy ok.
            Some(frame) if frame.message_type == MessageType::Ok => {
                Ok(vec![Envelope::new(MessageType::Ok, &OkMsg::default())?])
            }
            Some(frame) => Err(ProtocolError::Unexpected {
                expected: "want",
                got: frame.message_type.as_str().to_string(),
            }),
        },
        Operation::Config => match frames.pop_front() {
            Some(frame) if frame.message_type == MessageType::GetConfig => {
                Ok(vec![handler.get_config(frame)?])
            }
            Some(frame) if frame.message_type == MessageType::SetConfig => {
                Ok(vec![handler.set_config(frame)?])
            }
            _ => Err(ProtocolError::InvalidRequest(
                "config request must carry get-config or set-config".to_string(),
            )),
        },
    }
}

/// Split `/<repo>/tin-<endpoint>` into repo path and operation.
fn split_endpoint(path: &str) -> Result<(String, Operation)> {
    let trimmed = path.trim_matches('/');
    let (repo, endpoint) = trimmed.rsplit_once('/').ok_or_else(|| {
        ProtocolError::InvalidRequest(format!("no endpoint in path {path:?}"))
    })?;
    let operation = match endpoint {
        "tin-receive-pack" => Operation::Push,
        "tin-upload-pack" => Operation::Pull,
        "tin-config" => Operation::Config,
        other => {
            return Err(ProtocolError::InvalidRequest(format!(
                "unknown endpoint {other:?}"
            )))
        }
    };
    Ok((repo.to_string(), operation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_paths_rejected() {
        assert!(sanitize_repo_path("/../../etc/passwd").is_err());
        assert!(sanitize_repo_path("a/../../b").is_err());
        assert!(sanitize_repo_path("").is_err());
        assert!(sanitize_repo_path("/").is_err());
        assert_eq!(
            sanitize_repo_path("/team/project").unwrap(),
            PathBuf::from("team/project")
        );
        assert_eq!(
            sanitize_repo_path("./team/./project").unwrap(),
            PathBuf::from("team/project")
        );
    }

    #[test]
    fn endpoint_split() {
        let (repo, op) = split_endpoint("/team/project/tin-upload-pack").unwrap();
        assert_eq!(repo, "team/project");
        assert_eq!(op, Operation::Pull);
        assert!(split_endpoint("/no-endpoint-here").is_err());
        assert!(split_endpoint("/repo/tin-bogus").is_err());
    }

    #[test]
    fn hello_version_enforced() {
        let frame = Envelope::new(
            MessageType::Hello,
            &Hello {
                version: 99,
                operation: Operation::Pull,
                repo_path: "r".to_string(),
            },
        )
        .unwrap();
        assert!(matches!(
            check_hello(&frame),
            Err(ProtocolError::Version(99))
        ));
    }
}
