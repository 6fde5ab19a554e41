use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use warden::branch::{BranchOps, RepoId};
use warden::crypto::FieldCipher;
use warden::notify::{BufferNotifier, Notifier};
use warden::patcher::client::PatcherClient;
use warden::patcher::server::{router, PatcherServer};
use warden::patcher::{manifest, GREETING_HEADER};
use warden::task::{ExecutionResult, RunOptions};

const SECRET: &str = "patcher shared secret";
const GREETING: &str = "warden checking in";

fn ok(stdout: &str) -> ExecutionResult {
    ExecutionResult {
        code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

/// Branch collaborator stub: `main` checked out, `main` and `dev` known.
#[derive(Default)]
struct StubBranches {
    calls: Mutex<Vec<String>>,
}

impl StubBranches {
    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl BranchOps for StubBranches {
    async fn current_branch(&self, _repo: RepoId, _opts: RunOptions) -> ExecutionResult {
        self.record("current".to_string());
        ok("main\n")
    }

    async fn switch_branch(
        &self,
        _repo: RepoId,
        branch: &str,
        _opts: RunOptions,
    ) -> ExecutionResult {
        self.record(format!("switch {branch}"));
        ok("")
    }

    async fn update_repository(&self, _repo: RepoId, _opts: RunOptions) -> ExecutionResult {
        self.record("update".to_string());
        ok("")
    }

    async fn list_branches(&self, _repo: RepoId, _opts: RunOptions) -> ExecutionResult {
        self.record("list".to_string());
        ok("main\ndev\n")
    }
}

struct Fixture {
    url: String,
    root: PathBuf,
    stub: Arc<StubBranches>,
    buffer: Arc<BufferNotifier>,
    _temp: TempDir,
}

impl Fixture {
    fn client(&self) -> PatcherClient {
        let notifier: Arc<dyn Notifier> = self.buffer.clone();
        PatcherClient::new(
            self.url.clone(),
            FieldCipher::new(SECRET),
            GREETING.to_string(),
            Duration::from_secs(5),
            notifier,
        )
    }
}

async fn start_server(enabled: bool) -> Fixture {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("client.dat"), "payload").unwrap();

    let stub = Arc::new(StubBranches::default());
    let state = PatcherServer {
        cipher: FieldCipher::new(SECRET),
        greeting: GREETING.to_string(),
        enabled,
        files_root: temp.path().to_path_buf(),
        branches: stub.clone(),
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Fixture {
        url: format!("http://{addr}/"),
        root: temp.path().to_path_buf(),
        stub,
        buffer: Arc::new(BufferNotifier::new()),
        _temp: temp,
    }
}

#[tokio::test]
async fn wrong_greeting_is_dropped_without_a_body() {
    let fixture = start_server(true).await;
    let stranger = FieldCipher::new("some other secret");

    let response = reqwest::Client::new()
        .get(&fixture.url)
        .header("Content-Type", "application/json")
        .header(GREETING_HEADER, stranger.encrypt(GREETING))
        .send()
        .await
        .unwrap();

    assert!(!response.status().is_success());
    assert!(response.bytes().await.unwrap().is_empty());
    assert!(fixture.stub.calls().is_empty());
}

#[tokio::test]
async fn missing_greeting_or_content_type_is_dropped() {
    let fixture = start_server(true).await;
    let cipher = FieldCipher::new(SECRET);
    let http = reqwest::Client::new();

    let no_greeting = http
        .get(&fixture.url)
        .header("Content-Type", "application/json")
        .send()
        .await
        .unwrap();
    assert!(no_greeting.bytes().await.unwrap().is_empty());

    let wrong_type = http
        .get(&fixture.url)
        .header("Content-Type", "text/plain")
        .header(GREETING_HEADER, cipher.encrypt(GREETING))
        .send()
        .await
        .unwrap();
    assert!(wrong_type.bytes().await.unwrap().is_empty());

    assert!(fixture.stub.calls().is_empty());
}

#[tokio::test]
async fn disabled_server_drops_even_valid_greetings() {
    let fixture = start_server(false).await;
    let mut client = fixture.client();

    assert!(client.fetch_branch().await.is_err());
}

#[tokio::test]
async fn fetch_branch_round_trip() {
    let fixture = start_server(true).await;
    let mut client = fixture.client();

    let branch = client.fetch_branch().await.unwrap();

    assert!(client.check_result());
    assert_eq!(branch.trim(), "main");
    assert_eq!(fixture.stub.calls(), ["current"]);
}

#[tokio::test]
async fn unknown_branch_is_rejected_without_mutation() {
    let fixture = start_server(true).await;
    let mut client = fixture.client();

    client.switch_branch("nope").await.unwrap();

    assert!(!client.check_result());
    assert_eq!(client.last_reply().code, 1);
    assert!(client.last_reply().message.contains("doesn't exist"));

    // Validation stopped before any repository mutation.
    assert_eq!(fixture.stub.calls(), ["list"]);
    assert!(!fixture.root.join(manifest::MANIFEST_NAME).exists());

    // The requester hears about it.
    let messages = fixture.buffer.messages();
    assert!(messages
        .iter()
        .any(|m| m.contains("An error occurred when trying to switch the branch!")));
    assert!(messages.iter().any(|m| m.contains("doesn't exist")));
}

#[tokio::test]
async fn switching_a_known_branch_regenerates_the_manifest() {
    let fixture = start_server(true).await;
    let mut client = fixture.client();

    client.switch_branch("dev").await.unwrap();

    assert!(client.check_result());
    assert_eq!(fixture.stub.calls(), ["list", "switch dev"]);

    let manifest = std::fs::read_to_string(fixture.root.join(manifest::MANIFEST_NAME)).unwrap();
    assert!(manifest.contains("FileProfiler FormatVersion=\"1\""));
    assert!(manifest.contains("FileName=\"client.dat\""));
}

#[tokio::test]
async fn update_pulls_and_regenerates_the_manifest() {
    let fixture = start_server(true).await;
    let mut client = fixture.client();

    client.update_repository().await.unwrap();

    assert!(client.check_result());
    assert_eq!(fixture.stub.calls(), ["update"]);
    assert!(fixture.root.join(manifest::MANIFEST_NAME).exists());
}
