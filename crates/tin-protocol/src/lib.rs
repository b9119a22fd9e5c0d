//! tin wire protocol
//!
//! A half-duplex, newline-delimited JSON protocol moving commits and
//! thread versions between repositories. One protocol instance handles a
//! single push, pull or config operation and then closes. TCP carries a
//! whole conversation on one stream; HTTPS maps each turn onto a POST
//! against per-operation endpoints with identical semantics.

pub mod auth;
pub mod carrier;
pub mod client;
pub mod envelope;
pub mod error;
pub mod http;
pub mod messages;
pub mod pack;
pub mod server;
pub mod tcp;

pub use auth::{ServerAuth, SERVER_AUTH_ENV};
pub use carrier::Carrier;
pub use client::{
    connect, get_remote_config, pull, push, set_remote_config, PullOutcome, PushOutcome,
    RemoteUrl,
};
pub use envelope::{Envelope, MessageType, PROTOCOL_VERSION};
pub use error::{ErrCode, ProtocolError, Result};
pub use http::HttpCarrier;
pub use messages::{
    ConfigValues, ErrorMsg, GetConfig, Hello, OkMsg, Operation, Pack, RefsAd, UpdateRefs, Want,
    WantVersion,
};
pub use pack::{
    advertise, apply_pack, apply_ref_updates, build_push_pack, build_want_pack, diff_wants,
    missing_commits, PackStats,
};
pub use server::{
    resolve_repo, router, sanitize_repo_path, serve_connection, serve_tcp, Handler, ServerOptions,
};
pub use tcp::TcpCarrier;
