//! Vote-site API client plus the daily-reset wall-clock arithmetic.
//!
//! The provider counts one vote per player per "day", where the day
//! rolls over at a configured hour in a configured fixed UTC offset. The
//! claim endpoint's status survives the rollover, so a stale "claimed"
//! from before today's boundary is demoted to "not voted".

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Timelike, Utc};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteStatus {
    NotVoted,
    VotedUnclaimed,
    VotedClaimed,
}

fn parse_status(text: &str) -> Option<VoteStatus> {
    match text.trim() {
        "0" => Some(VoteStatus::NotVoted),
        "1" => Some(VoteStatus::VotedUnclaimed),
        "2" => Some(VoteStatus::VotedClaimed),
        _ => None,
    }
}

/// Most recent reset boundary at or before `now_local`.
pub fn reset_boundary(now_local: NaiveDateTime, reset_hour: u32) -> NaiveDateTime {
    let mut b = now_local
        .date()
        .and_hms_opt(reset_hour, 0, 0)
        .expect("reset hour validated at config parse");
    if now_local < b {
        b -= chrono::Duration::days(1);
    }
    b
}

/// First reset boundary strictly after `t_local`.
pub fn next_boundary(t_local: NaiveDateTime, reset_hour: u32) -> NaiveDateTime {
    let same_day = t_local
        .date()
        .and_hms_opt(reset_hour, 0, 0)
        .expect("reset hour validated at config parse");
    if t_local < same_day {
        same_day
    } else {
        same_day + chrono::Duration::days(1)
    }
}

/// Whole hours and leftover minutes from `now` until `then`, clamped at
/// zero; feeds the "you can vote again in Xh Ym" message.
pub fn hours_minutes_until(now: NaiveDateTime, then: NaiveDateTime) -> (i64, i64) {
    let secs = (then - now).num_seconds().max(0);
    (secs / 3600, (secs % 3600) / 60)
}

/// True inside the boundary minute (the reset timer polls faster than
/// once a minute, so the caller still needs its own once-per-day guard).
pub fn is_reset_minute(now_local: NaiveDateTime, reset_hour: u32) -> bool {
    now_local.hour() == reset_hour && now_local.minute() == 0
}

pub struct VoteClient {
    http: reqwest::Client,
    base: String,
    key: String,
    offset: FixedOffset,
    reset_hour: u32,
    /// Latest known vote instant per player, refreshed from the history
    /// endpoint and bumped locally on a successful claim.
    last_votes: Mutex<HashMap<u64, DateTime<Utc>>>,
}

impl VoteClient {
    pub fn new(
        base: impl Into<String>,
        key: impl Into<String>,
        offset: FixedOffset,
        reset_hour: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
            key: key.into(),
            offset,
            reset_hour,
            last_votes: Mutex::new(HashMap::new()),
        })
    }

    fn require_key(&self) -> anyhow::Result<&str> {
        if self.key.is_empty() {
            anyhow::bail!("vote api key not configured");
        }
        Ok(&self.key)
    }

    fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }

    /// Claim status for a player, demoting a pre-boundary "claimed" to
    /// "not voted" so yesterday's claim does not block today's flow.
    pub async fn status(&self, platform_id: u64) -> anyhow::Result<VoteStatus> {
        let key = self.require_key()?;
        let url = format!(
            "{}/?object=votes&element=claim&key={}&steamid={}",
            self.base, key, platform_id
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("vote api unreachable")?;
        if !resp.status().is_success() {
            anyhow::bail!("vote api returned {}", resp.status());
        }
        let text = resp.text().await.context("vote api body unreadable")?;
        let status = parse_status(&text)
            .ok_or_else(|| anyhow::anyhow!("unexpected vote status {:?}", text.trim()))?;

        if status == VoteStatus::VotedClaimed && !self.has_voted_today(platform_id).await {
            debug!(platform_id, "claimed status predates today's reset; treating as not voted");
            return Ok(VoteStatus::NotVoted);
        }
        Ok(status)
    }

    /// Mark the player's current vote claimed. `Ok(false)` means the
    /// provider refused (nothing claimable), not a transport failure.
    pub async fn claim(&self, platform_id: u64) -> anyhow::Result<bool> {
        let key = self.require_key()?;
        let url = format!(
            "{}/?action=post&object=votes&element=claim&key={}&steamid={}",
            self.base, key, platform_id
        );
        let resp = self
            .http
            .post(&url)
            .send()
            .await
            .context("vote api unreachable")?;
        if !resp.status().is_success() {
            anyhow::bail!("vote api returned {}", resp.status());
        }
        let text = resp.text().await.context("vote api body unreadable")?;
        let ok = text.trim() == "1";
        if ok {
            self.last_votes.lock().await.insert(platform_id, Utc::now());
        }
        Ok(ok)
    }

    /// Whether the player's latest vote falls after today's boundary.
    pub async fn has_voted_today(&self, platform_id: u64) -> bool {
        let Some(last) = self.last_vote(platform_id).await else {
            return false;
        };
        let last_local = last.with_timezone(&self.offset).naive_local();
        let now_local = self.now_local();
        last_local > reset_boundary(now_local, self.reset_hour)
    }

    /// `(hours, minutes)` until the player may vote again, based on their
    /// latest vote. `None` when no vote is on record.
    pub async fn time_until_next_vote(&self, platform_id: u64) -> Option<(i64, i64)> {
        let last = self.last_vote(platform_id).await?;
        let last_local = last.with_timezone(&self.offset).naive_local();
        let next = next_boundary(last_local, self.reset_hour);
        Some(hours_minutes_until(self.now_local(), next))
    }

    async fn last_vote(&self, platform_id: u64) -> Option<DateTime<Utc>> {
        if let Some(t) = self.last_votes.lock().await.get(&platform_id) {
            return Some(*t);
        }
        match self.fetch_last_vote(platform_id).await {
            Ok(found) => found,
            Err(e) => {
                warn!(err = %e, platform_id, "vote history fetch failed");
                None
            }
        }
    }

    async fn fetch_last_vote(&self, platform_id: u64) -> anyhow::Result<Option<DateTime<Utc>>> {
        let key = self.require_key()?;
        let url = format!(
            "{}/?object=servers&element=votes&key={}&format=json",
            self.base, key
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("vote api unreachable")?;
        if !resp.status().is_success() {
            anyhow::bail!("vote api returned {}", resp.status());
        }
        let body: serde_json::Value = resp.json().await.context("vote history unreadable")?;
        let Some(unix) = latest_vote_unix(&body, platform_id) else {
            return Ok(None);
        };
        let Some(t) = DateTime::from_timestamp(unix, 0) else {
            return Ok(None);
        };
        self.last_votes.lock().await.insert(platform_id, t);
        Ok(Some(t))
    }
}

/// Latest vote timestamp for a player in the history payload. The feed
/// is loosely typed: ids and timestamps arrive as strings or numbers
/// depending on provider mood, and the UTC field name carries a space.
fn latest_vote_unix(body: &serde_json::Value, platform_id: u64) -> Option<i64> {
    let votes = body.get("votes")?.as_array()?;
    let pid_str = platform_id.to_string();
    votes
        .iter()
        .filter(|v| {
            match v.get("steamid") {
                Some(serde_json::Value::String(s)) => s == &pid_str,
                Some(n) => n.as_u64() == Some(platform_id),
                None => false,
            }
        })
        .filter_map(vote_unix)
        .max()
}

fn vote_unix(vote: &serde_json::Value) -> Option<i64> {
    for field in ["utc timestamp", "timestamp"] {
        let Some(v) = vote.get(field) else { continue };
        let n = match v {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        if let Some(n) = n {
            if n > 0 {
                return Some(n);
            }
        }
    }
    None
}
