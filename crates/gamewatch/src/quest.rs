//! Client for the quest/progression sidecar service.
//!
//! The bridge never de-duplicates grants itself beyond its own dedup
//! sets: `update` is safe to call more than once for the same logical
//! event and the service is the one that must care if that matters.

use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuestKind {
    Vote,
    LevelUp,
}

impl QuestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestKind::Vote => "vote",
            QuestKind::LevelUp => "levelup",
        }
    }
}

#[derive(Debug, Deserialize)]
struct HealthResp {
    #[serde(default)]
    status: String,
    #[serde(default)]
    authenticated: bool,
}

#[derive(Serialize)]
struct UpdateReq<'a> {
    #[serde(rename = "playerName")]
    player_name: &'a str,
    #[serde(rename = "questType")]
    quest_type: &'static str,
    increment: u32,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct QuestProgress {
    #[serde(default)]
    pub progress: u64,
    #[serde(default)]
    pub target: u64,
}

#[derive(Debug, Deserialize)]
struct UpdateResp {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(rename = "questData", default)]
    quest_data: Option<QuestProgress>,
}

pub struct QuestClient {
    http: reqwest::Client,
    base: String,
}

impl QuestClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let base = base.into().trim_end_matches('/').to_string();
        Ok(Self { http, base })
    }

    /// Probe the service; "available" means reachable *and* authenticated
    /// against its upstream. Any failure is just unavailable, never fatal.
    pub async fn health(&self) -> bool {
        let url = format!("{}/health", self.base);
        let resp = match self.http.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(err = %e, "quest health probe failed");
                return false;
            }
        };
        if !resp.status().is_success() {
            debug!(status = %resp.status(), "quest health probe non-success");
            return false;
        }
        match resp.json::<HealthResp>().await {
            Ok(h) => {
                debug!(status = %h.status, authenticated = h.authenticated, "quest health");
                h.authenticated
            }
            Err(e) => {
                debug!(err = %e, "quest health body unreadable");
                false
            }
        }
    }

    /// Advance a player's quest of the given kind. Errors mean the grant
    /// was not accepted; callers degrade, they do not retry inline (the
    /// health timer re-opens the path later).
    pub async fn update(
        &self,
        player: &str,
        kind: QuestKind,
        increment: u32,
    ) -> anyhow::Result<Option<QuestProgress>> {
        let url = format!("{}/update-quest", self.base);
        let req = UpdateReq {
            player_name: player,
            quest_type: kind.as_str(),
            increment,
        };
        let resp = self
            .http
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("quest service unreachable")?;
        if !resp.status().is_success() {
            anyhow::bail!("quest service returned {}", resp.status());
        }
        let body: UpdateResp = resp.json().await.context("quest response unreadable")?;
        if !body.success {
            anyhow::bail!(
                "quest update rejected: {}",
                body.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(body.quest_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_health_response() {
        let h: HealthResp =
            serde_json::from_str(r#"{"status":"ok","authenticated":true}"#).unwrap();
        assert!(h.authenticated);
        assert_eq!(h.status, "ok");

        // Missing fields default rather than fail.
        let h: HealthResp = serde_json::from_str("{}").unwrap();
        assert!(!h.authenticated);
    }

    #[test]
    fn parses_update_response_with_progress() {
        let r: UpdateResp = serde_json::from_str(
            r#"{"success":true,"questData":{"progress":2,"target":5,"extra":"ignored"}}"#,
        )
        .unwrap();
        assert!(r.success);
        let p = r.quest_data.unwrap();
        assert_eq!(p.progress, 2);
        assert_eq!(p.target, 5);
    }

    #[test]
    fn parses_update_failure() {
        let r: UpdateResp =
            serde_json::from_str(r#"{"success":false,"error":"player not found"}"#).unwrap();
        assert!(!r.success);
        assert_eq!(r.error.as_deref(), Some("player not found"));
        assert!(r.quest_data.is_none());
    }

    #[test]
    fn update_request_wire_shape() {
        let req = UpdateReq {
            player_name: "PlayerOne",
            quest_type: QuestKind::LevelUp.as_str(),
            increment: 1,
        };
        let s = serde_json::to_string(&req).unwrap();
        assert_eq!(
            s,
            r#"{"playerName":"PlayerOne","questType":"levelup","increment":1}"#
        );
    }
}
