//! Reload directives across the shard fleet.

use std::sync::Arc;

use crate::config::Config;
use crate::notify::Notifier;

use super::{ConnectionInfo, GameClient};

/// What a reload request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadScope {
    Locale,
    Proto,
    All,
}

impl ReloadScope {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "LOCALE" => Some(Self::Locale),
            "PROTO" => Some(Self::Proto),
            "ALL" => Some(Self::All),
            _ => None,
        }
    }

    pub fn directive(self) -> &'static str {
        match self {
            Self::Locale => "RELOAD_LOCALE",
            Self::Proto => "RELOAD_PROTOS",
            Self::All => "RELOAD_ALL",
        }
    }
}

/// Directive for the shard at `index`. Only one shard needs the heavy full
/// reload; for scope ALL every shard after the first gets the lighter
/// locale directive.
pub fn directive_for_shard(scope: ReloadScope, index: usize) -> &'static str {
    match scope {
        ReloadScope::All if index > 0 => ReloadScope::Locale.directive(),
        _ => scope.directive(),
    }
}

pub struct Reloader {
    client: GameClient,
    notifier: Arc<dyn Notifier>,
    shards: Vec<(String, ConnectionInfo)>,
}

impl Reloader {
    pub fn new(
        shards: Vec<(String, ConnectionInfo)>,
        auth_pass: String,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let placeholder = shards
            .first()
            .map(|(_, target)| target.clone())
            .unwrap_or(ConnectionInfo {
                host: String::new(),
                port: 0,
            });
        Self {
            client: GameClient::new(placeholder, auth_pass),
            notifier,
            shards,
        }
    }

    pub fn from_config(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        let shards = config
            .shards
            .iter()
            .map(|shard| {
                (
                    shard.name.clone(),
                    ConnectionInfo {
                        host: config.game_host.clone(),
                        port: shard.port,
                    },
                )
            })
            .collect();
        Self::new(shards, config.game_auth_pass.clone(), notifier)
    }

    /// Issue one directive per shard, sequentially. An unreachable shard
    /// contributes an "off" line instead of aborting the batch.
    ///
    /// A PROTO-scope reload is settled by whichever shard answers first:
    /// processing stops after shard 0 and the remaining shards are never
    /// contacted.
    pub async fn reload(&mut self, raw_scope: &str) {
        let Some(scope) = ReloadScope::parse(raw_scope) else {
            self.notifier
                .send(&format!(
                    "Requested type is not found in reload list: {raw_scope}"
                ))
                .await;
            return;
        };

        self.notifier.send("Reloading server as requested..").await;

        let mut report = String::new();
        for (index, (name, target)) in self.shards.clone().into_iter().enumerate() {
            self.client.retarget(target);
            let directive = directive_for_shard(scope, index);

            match self.client.send_call(directive).await {
                None => report.push_str(&format!("Cannot reload {name} because it's off!\n")),
                Some(answer) => {
                    report.push_str(&format!("Return message from {name}: *{answer}*\n"))
                }
            }

            if scope == ReloadScope::Proto {
                self.notifier.send("Protos have been reloaded!").await;
                return;
            }
        }

        self.notifier.send(&report).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_parses_case_insensitively() {
        assert_eq!(ReloadScope::parse("locale"), Some(ReloadScope::Locale));
        assert_eq!(ReloadScope::parse("PROTO"), Some(ReloadScope::Proto));
        assert_eq!(ReloadScope::parse("All"), Some(ReloadScope::All));
        assert_eq!(ReloadScope::parse("everything"), None);
    }

    #[test]
    fn all_scope_sends_full_reload_to_first_shard_only() {
        assert_eq!(directive_for_shard(ReloadScope::All, 0), "RELOAD_ALL");
        assert_eq!(directive_for_shard(ReloadScope::All, 1), "RELOAD_LOCALE");
        assert_eq!(directive_for_shard(ReloadScope::All, 2), "RELOAD_LOCALE");
    }

    #[test]
    fn narrow_scopes_repeat_their_directive() {
        assert_eq!(directive_for_shard(ReloadScope::Locale, 2), "RELOAD_LOCALE");
        assert_eq!(directive_for_shard(ReloadScope::Proto, 0), "RELOAD_PROTOS");
    }
}
