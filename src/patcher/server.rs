//! Server side of the patcher sync channel.
//!
//! Fail-closed handshake: wrong content type, missing greeting header, a
//! token that does not decrypt, or a greeting mismatch all end the exchange
//! with an empty response - unauthenticated probes get no error payload to
//! learn from. Requests that pass are answered with a per-field-encrypted
//! envelope, and every successful switch or update regenerates the manifest.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use tracing::{info, warn};

use crate::branch::{BranchOps, RepoId};
use crate::crypto::FieldCipher;
use crate::task::{ExecutionResult, RunOptions};
use crate::web::guard::remote_host;

use super::manifest;
use super::{Envelope, MutateRequest, GREETING_HEADER};

#[derive(Clone)]
pub struct PatcherServer {
    pub cipher: FieldCipher,
    pub greeting: String,
    /// False on instances that are not the patcher host; requests are
    /// dropped exactly like handshake violations.
    pub enabled: bool,
    pub files_root: PathBuf,
    pub branches: Arc<dyn BranchOps>,
}

pub fn router(state: PatcherServer) -> Router {
    Router::new()
        .route("/", get(fetch_branch).post(mutate))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            verify_greeting,
        ))
        .with_state(state)
}

/// The tasks behind sync requests run without chat notices; outcomes travel
/// back in the envelope instead.
fn quiet() -> RunOptions {
    RunOptions {
        ignore_result: true,
        silent: true,
        skip_output: false,
    }
}

async fn verify_greeting(
    State(state): State<PatcherServer>,
    req: Request,
    next: Next,
) -> Response {
    let remote = remote_host(req.headers());

    if !state.enabled {
        warn!("a sync request came from {remote} but this is not a patcher server, dropping");
        return drop_request();
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    if content_type != Some("application/json") {
        warn!("odd sync request from {remote}, dropping");
        return drop_request();
    }

    let token = req
        .headers()
        .get(GREETING_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if token.is_empty() {
        warn!("no greeting came from {remote}, dropping");
        return drop_request();
    }

    match state.cipher.decrypt(token) {
        Ok(greeting) if greeting == state.greeting => next.run(req).await,
        _ => {
            warn!("couldn't verify greeting from {remote}, dropping");
            drop_request()
        }
    }
}

fn drop_request() -> Response {
    let mut response = StatusCode::BAD_REQUEST.into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn fetch_branch(State(state): State<PatcherServer>) -> Json<Envelope> {
    info!("sync branch fetch");
    let result = state
        .branches
        .current_branch(RepoId::Patcher, quiet())
        .await;
    Json(state.seal(&result))
}

async fn mutate(
    State(state): State<PatcherServer>,
    Json(request): Json<MutateRequest>,
) -> Json<Envelope> {
    info!(kind = %request.kind, "sync mutation");
    let result = if request.kind == "switch" {
        state.switch(&request.branch).await
    } else {
        state.update().await
    };
    Json(state.seal(&result))
}

impl PatcherServer {
    /// Validate the requested branch against the known remote branches
    /// before touching the checkout; an unknown branch is rejected without
    /// any repository mutation.
    async fn switch(&self, token: &str) -> ExecutionResult {
        let target = match self.cipher.decrypt(token) {
            Ok(target) => target,
            Err(err) => return reject(format!("Branch field failed to decrypt: {err}")),
        };

        let listing = self.branches.list_branches(RepoId::Patcher, quiet()).await;
        if !listing.ok() {
            return listing;
        }

        let known = listing.stdout.lines().any(|line| line.trim() == target);
        if !known {
            return reject(format!("Branch {target} doesn't exist on server repo!"));
        }

        let result = self
            .branches
            .switch_branch(RepoId::Patcher, &target, quiet())
            .await;
        self.after_mutation(result).await
    }

    async fn update(&self) -> ExecutionResult {
        let result = self
            .branches
            .update_repository(RepoId::Patcher, quiet())
            .await;
        self.after_mutation(result).await
    }

    async fn after_mutation(&self, result: ExecutionResult) -> ExecutionResult {
        if !result.ok() {
            return result;
        }
        match self.regenerate().await {
            Ok(()) => result,
            Err(err) => reject(format!("Manifest regeneration failed: {err:#}")),
        }
    }

    async fn regenerate(&self) -> anyhow::Result<()> {
        let root = self.files_root.clone();
        tokio::task::spawn_blocking(move || manifest::write_manifest(&root))
            .await
            .context("manifest task panicked")?
    }

    fn seal(&self, result: &ExecutionResult) -> Envelope {
        Envelope {
            error_code: self.cipher.encrypt(&result.code.to_string()),
            error_message: self.cipher.encrypt(&result.stderr),
            branch: self.cipher.encrypt(&result.stdout),
        }
    }
}

fn reject(message: String) -> ExecutionResult {
    ExecutionResult {
        code: 1,
        stdout: String::new(),
        stderr: message,
    }
}
