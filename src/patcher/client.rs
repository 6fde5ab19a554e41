//! Client side of the patcher sync channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;

use crate::crypto::FieldCipher;
use crate::notify::Notifier;

use super::{Envelope, MutateRequest, GREETING_HEADER};

/// One decrypted reply: status code, branch, and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReply {
    pub code: i32,
    pub branch: String,
    pub message: String,
}

impl SyncReply {
    fn unset() -> Self {
        Self {
            code: -1,
            branch: String::new(),
            message: String::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

pub struct PatcherClient {
    http: reqwest::Client,
    url: String,
    cipher: FieldCipher,
    greeting: String,
    timeout: Duration,
    notifier: Arc<dyn Notifier>,
    last: SyncReply,
}

impl PatcherClient {
    pub fn new(
        url: String,
        cipher: FieldCipher,
        greeting: String,
        timeout: Duration,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            cipher,
            greeting,
            timeout,
            notifier,
            last: SyncReply::unset(),
        }
    }

    /// Ask the patcher host for its current branch.
    pub async fn fetch_branch(&mut self) -> Result<String> {
        let reply = self.exchange(None).await?;
        self.finish(reply, "An error occurred when trying to check the branch!")
            .await;
        Ok(self.last.branch.clone())
    }

    /// Request a switch to `target` on the patcher host.
    pub async fn switch_branch(&mut self, target: &str) -> Result<()> {
        let body = MutateRequest {
            kind: "switch".to_string(),
            branch: self.cipher.encrypt(target),
        };
        let reply = self.exchange(Some(body)).await?;
        self.finish(reply, "An error occurred when trying to switch the branch!")
            .await;
        Ok(())
    }

    /// Ask the patcher host to pull the latest changes.
    pub async fn update_repository(&mut self) -> Result<()> {
        let body = MutateRequest {
            kind: "update".to_string(),
            branch: String::new(),
        };
        let reply = self.exchange(Some(body)).await?;
        self.finish(reply, "An error occurred when trying to update the repository!")
            .await;
        Ok(())
    }

    pub fn check_result(&self) -> bool {
        self.last.ok()
    }

    pub fn last_reply(&self) -> &SyncReply {
        &self.last
    }

    /// One round trip. A handshake rejection surfaces here as a transport
    /// or body error, never as a decodable envelope.
    async fn exchange(&self, body: Option<MutateRequest>) -> Result<SyncReply> {
        let request = match &body {
            None => self.http.get(&self.url),
            Some(body) => self.http.post(&self.url).json(body),
        };

        let response = request
            .header(CONTENT_TYPE, "application/json")
            .header(GREETING_HEADER, self.cipher.encrypt(&self.greeting))
            .timeout(self.timeout)
            .send()
            .await
            .context("patcher host is unreachable")?;

        let envelope: Envelope = response
            .json()
            .await
            .context("patcher host refused the handshake")?;

        self.open(&envelope)
    }

    /// Decrypt every field of the envelope independently.
    fn open(&self, envelope: &Envelope) -> Result<SyncReply> {
        let code = self
            .cipher
            .decrypt(&envelope.error_code)
            .context("error_code field failed to decrypt")?
            .parse()
            .context("error_code is not an integer")?;
        let branch = self
            .cipher
            .decrypt(&envelope.branch)
            .context("branch field failed to decrypt")?;
        let message = self
            .cipher
            .decrypt(&envelope.error_message)
            .context("error_message field failed to decrypt")?;

        Ok(SyncReply {
            code,
            branch,
            message,
        })
    }

    async fn finish(&mut self, reply: SyncReply, failure_notice: &str) {
        if !reply.ok() {
            self.notifier.send(failure_notice).await;
            self.notifier.send("Error message:").await;
            self.notifier.send(&reply.message).await;
        }
        self.last = reply;
    }
}
