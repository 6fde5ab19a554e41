//! Fleet reachability report.
//!
//! Pure connect probes, no authentication: each configured shard port plus
//! the auth port is tried with a short timeout and the combined ON/OFF
//! report goes out as a single notification.

use std::sync::Arc;

use crate::config::{Config, Shard};
use crate::notify::Notifier;

use super::{ConnectionInfo, GameClient, STATUS_CHECK_TIMEOUT};

pub struct StatusProbe {
    client: GameClient,
    notifier: Arc<dyn Notifier>,
    host: String,
    shards: Vec<Shard>,
    auth_port: u16,
}

impl StatusProbe {
    pub fn new(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        let client = GameClient::new(
            ConnectionInfo {
                host: config.game_host.clone(),
                port: config.auth_port,
            },
            config.game_auth_pass.clone(),
        );
        Self {
            client,
            notifier,
            host: config.game_host.clone(),
            shards: config.shards.clone(),
            auth_port: config.auth_port,
        }
    }

    pub async fn report(&mut self) {
        self.notifier.send("Checking server status..").await;

        let mut report = String::new();
        for shard in self.shards.clone() {
            let status = self.probe(shard.port).await;
            report.push_str(&format!("{} status: *{status}*\n", shard.name));
        }

        let status = self.probe(self.auth_port).await;
        report.push_str(&format!("Auth status: *{status}*\n"));

        self.notifier.send(&report).await;
    }

    async fn probe(&mut self, port: u16) -> super::ConnectionStatus {
        self.client.retarget(ConnectionInfo {
            host: self.host.clone(),
            port,
        });
        let status = self.client.establish(STATUS_CHECK_TIMEOUT).await;
        self.client.clear();
        status
    }
}
