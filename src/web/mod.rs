//! Chat-webhook front end.
//!
//! Commands arrive as signed form posts. Each route acknowledges
//! immediately, then runs the actual work in a background task and reports
//! progress through the notifier - the chat hook doubles as the response
//! channel.

pub mod guard;

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info, warn};

use crate::branch::{self, BranchOps, RepoId};
use crate::config::Config;
use crate::crypto::FieldCipher;
use crate::fleet::Fleet;
use crate::game::reload::Reloader;
use crate::game::status::StatusProbe;
use crate::notify::Notifier;
use crate::patcher::client::PatcherClient;
use crate::patcher::server::PatcherServer;
use crate::task::RunOptions;

const ACK: &str = "Got your request! I'm processing it, give me a moment..";
const SIGN_OFF: &str = "Did what I could. Warden out.";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub notifier: Arc<dyn Notifier>,
    pub branches: Arc<dyn BranchOps>,
    pub cipher: FieldCipher,
    /// Signature verification is skipped in debug mode.
    pub debug: bool,
}

#[derive(Debug, Clone, Copy)]
enum Route {
    Branch,
    Server,
    Patcher,
}

impl Route {
    fn name(self) -> &'static str {
        match self {
            Route::Branch => "branch",
            Route::Server => "server",
            Route::Patcher => "patcher",
        }
    }
}

pub fn router(state: AppState) -> Router {
    let sync = PatcherServer {
        cipher: state.cipher.clone(),
        greeting: state.config.patcher_greeting.clone(),
        enabled: state.config.is_patcher_server,
        files_root: state.config.patcher_files_dir.clone(),
        branches: state.branches.clone(),
    };

    Router::new()
        .route("/", get(home))
        .route("/branch", post(branch_route))
        .route("/server", post(server_route))
        .route("/patcher", post(patcher_route))
        .with_state(state)
        .nest("/patcher_server", crate::patcher::server::router(sync))
}

async fn home() -> Json<serde_json::Value> {
    Json(json!({"text": "You reached the place where the devil says good night"}))
}

async fn branch_route(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    accept_command(state, headers, body, Route::Branch).await
}

async fn server_route(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    accept_command(state, headers, body, Route::Server).await
}

async fn patcher_route(State(state): State<AppState>, headers: HeaderMap, body: String) -> Response {
    accept_command(state, headers, body, Route::Patcher).await
}

/// Verify, acknowledge, and hand the command text to a background task.
async fn accept_command(state: AppState, headers: HeaderMap, body: String, route: Route) -> Response {
    let remote = guard::remote_host(&headers);

    if !state.debug
        && !guard::check(
            &state.config.signing_secret,
            state.config.request_timeout,
            &headers,
            &body,
        )
    {
        warn!("verification was unsuccessful for host {remote}, dropping");
        return drop_request();
    }

    let form = parse_form(&body);
    let channel = form.get("channel_name").map(String::as_str).unwrap_or("");
    if !channel.eq_ignore_ascii_case(&state.config.channel) {
        warn!("request came from not permitted channel {channel:?}, dropping");
        let pointer = format!(
            "Hold your horses mate. Not this channel, have a look at: {}",
            state.config.channel
        );
        return Json(json!({"text": pointer})).into_response();
    }

    let text = form.get("text").cloned().unwrap_or_default();
    info!("[{}] request from {remote} with arguments: {text}", route.name());

    tokio::spawn(async move {
        dispatch(&state, route, &text).await;
        state.notifier.send(SIGN_OFF).await;
    });

    Json(json!({"text": ACK})).into_response()
}

fn drop_request() -> Response {
    let mut response = StatusCode::BAD_REQUEST.into_response();
    response
        .headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    response
}

fn parse_form(body: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(body.as_bytes())
        .into_owned()
        .collect()
}

async fn dispatch(state: &AppState, route: Route, text: &str) {
    match route {
        Route::Branch => branch_dispatch(state, text).await,
        Route::Server => server_dispatch(state, text).await,
        Route::Patcher => patcher_dispatch(state, text).await,
    }
}

async fn unknown_command(state: &AppState) {
    state
        .notifier
        .send("I cannot perform any sort of this action. Double check your command mate!")
        .await;
}

/// Resolve a repository id argument, telling the channel what went wrong.
async fn targets(state: &AppState, raw: &str) -> Option<Vec<RepoId>> {
    let parsed = branch::parse_targets(raw);
    if parsed.is_none() {
        state.notifier.send("Provided type doesn't exist!").await;
        state
            .notifier
            .send(&format!("Available types: {}", branch::KNOWN_TARGETS))
            .await;
    }
    parsed
}

// =============================================================================
// /branch - repository bookkeeping
// =============================================================================

async fn branch_dispatch(state: &AppState, text: &str) {
    let args: Vec<&str> = text.split_whitespace().collect();

    if args.len() < 2 {
        list_branches(state, "all").await;
        return;
    }

    match args[1] {
        "check" => current_branch(state, args[0]).await,
        "switch" if args.len() >= 3 => switch_branch(state, args[0], args[2]).await,
        "update" => update_repository(state, args[0]).await,
        "list" => list_branches(state, args[0]).await,
        _ => unknown_command(state).await,
    }
}

async fn switch_branch(state: &AppState, raw_target: &str, branch: &str) {
    let Some(repos) = targets(state, raw_target).await else {
        return;
    };

    let mut last_ok = false;
    for repo in repos {
        let result = state
            .branches
            .switch_branch(repo, branch, RunOptions::default())
            .await;
        last_ok = result.ok();
    }

    if last_ok {
        state
            .notifier
            .send(&format!("Running branch was switched to {branch}!"))
            .await;
    }
}

async fn current_branch(state: &AppState, raw_target: &str) {
    let Some(repos) = targets(state, raw_target).await else {
        return;
    };

    let mut branch = String::new();
    for repo in repos {
        let result = state
            .branches
            .current_branch(repo, RunOptions::default())
            .await;
        branch = result.stdout;
    }

    state
        .notifier
        .send("You are currently running on branch:")
        .await;
    state.notifier.send(&branch).await;
}

async fn list_branches(state: &AppState, raw_target: &str) {
    let Some(repos) = targets(state, raw_target).await else {
        return;
    };

    let mut listing = String::new();
    for repo in repos {
        let result = state
            .branches
            .list_branches(repo, RunOptions::default())
            .await;
        listing = result.stdout;
    }

    state
        .notifier
        .send("Following branches are available:")
        .await;
    state.notifier.send(&listing).await;
}

async fn update_repository(state: &AppState, raw_target: &str) {
    let Some(repos) = targets(state, raw_target).await else {
        return;
    };

    let mut current = String::new();
    let mut last_ok = false;
    for repo in repos {
        current = state
            .branches
            .current_branch(repo, RunOptions::default())
            .await
            .stdout;
        last_ok = state
            .branches
            .update_repository(repo, RunOptions::default())
            .await
            .ok();
    }

    if last_ok {
        state
            .notifier
            .send(&format!("Branch {} was updated!", current.trim()))
            .await;
    }
}

// =============================================================================
// /server - fleet lifecycle, rebuilds, status, reloads
// =============================================================================

async fn server_dispatch(state: &AppState, text: &str) {
    let args: Vec<&str> = text.split_whitespace().collect();
    if args.is_empty() {
        return;
    }

    let fleet = Fleet::new(&state.config, state.notifier.clone(), state.branches.clone());

    if args.len() >= 2 && args[1] == "rebuild" {
        match args[0] {
            "core" => rebuild_core(state, &fleet).await,
            "quest" => rebuild_quest(state, &fleet).await,
            _ => unknown_command(state).await,
        }
        return;
    }

    match args[0] {
        "reload" if args.len() >= 2 => reload_game(state, &fleet, args[1]).await,
        "start" => {
            if run_logged("start", fleet.start(RunOptions::default()).await) {
                state.notifier.send("Server was started!").await;
            }
        }
        "stop" => {
            if run_logged("stop", fleet.stop(RunOptions::default()).await) {
                state.notifier.send("Server was stopped!").await;
            }
        }
        "restart" => {
            if run_logged("restart", fleet.restart(RunOptions::default()).await) {
                state.notifier.send("Server was restarted!").await;
            }
        }
        "update" => {
            fleet.update().await;
            state.notifier.send("Server was updated!").await;
        }
        "status" => {
            StatusProbe::new(&state.config, state.notifier.clone())
                .report()
                .await;
        }
        _ => unknown_command(state).await,
    }
}

fn run_logged(what: &str, outcome: anyhow::Result<()>) -> bool {
    match outcome {
        Ok(()) => true,
        Err(err) => {
            error!("{what} failed: {err:#}");
            false
        }
    }
}

async fn rebuild_core(state: &AppState, fleet: &Fleet) {
    let current = state
        .branches
        .current_branch(RepoId::Core, RunOptions::default())
        .await
        .stdout;

    if run_logged("core rebuild", fleet.rebuild_core().await) {
        state
            .notifier
            .send(&format!(
                "Core was rebuilt! Running branch: {}",
                current.trim()
            ))
            .await;
    }
}

async fn rebuild_quest(state: &AppState, fleet: &Fleet) {
    let current = state
        .branches
        .current_branch(RepoId::Locale, RunOptions::default())
        .await
        .stdout;

    if run_logged("quest rebuild", fleet.rebuild_quest().await) {
        state
            .notifier
            .send(&format!(
                "Quest was rebuilt! Running branch: {}",
                current.trim()
            ))
            .await;
    }
}

async fn reload_game(state: &AppState, fleet: &Fleet, scope: &str) {
    // The checkouts feeding the reload are refreshed first; a scope that
    // names no repository (e.g. proto) skips the refresh with a notice.
    if let Some(repos) = targets(state, scope).await {
        for repo in repos {
            state
                .branches
                .current_branch(repo, RunOptions::default())
                .await;
            state
                .branches
                .update_repository(repo, RunOptions::default())
                .await;
        }
    }

    if !run_logged("quest rebuild", fleet.rebuild_quest().await) {
        return;
    }

    Reloader::from_config(&state.config, state.notifier.clone())
        .reload(scope)
        .await;

    state.notifier.send("Game was reloaded!").await;
}

// =============================================================================
// /patcher - sync client commands
// =============================================================================

async fn patcher_dispatch(state: &AppState, text: &str) {
    let Some(url) = state.config.patcher_url.clone() else {
        state.notifier.send("Patcher is not configured!").await;
        return;
    };

    let args: Vec<&str> = text.split_whitespace().collect();
    if args.is_empty() {
        return;
    }

    let mut client = PatcherClient::new(
        url,
        state.cipher.clone(),
        state.config.patcher_greeting.clone(),
        state.config.request_timeout,
        state.notifier.clone(),
    );

    match args[0] {
        "switch" if args.len() >= 2 => {
            let branch = args[1];
            if let Err(err) = client.switch_branch(branch).await {
                error!("patcher switch failed: {err:#}");
                return;
            }
            if client.check_result() {
                state
                    .notifier
                    .send(&format!("Running branch was switched to {branch}!"))
                    .await;
            }
        }
        "check" => match client.fetch_branch().await {
            Err(err) => error!("patcher branch check failed: {err:#}"),
            Ok(branch) => {
                if client.check_result() {
                    state
                        .notifier
                        .send(&format!("Patcher's running branch: {}", branch.trim()))
                        .await;
                }
            }
        },
        "update" => {
            if let Err(err) = client.update_repository().await {
                error!("patcher update failed: {err:#}");
                return;
            }
            if client.check_result() {
                state.notifier.send("Patcher's list was updated!").await;
            }
        }
        _ => unknown_command(state).await,
    }
}
