//! gamewatch: a resilient bridge between a game server's remote console
//! and the services around it (vote provider, quest sidecar, persisted
//! player levels).
//!
//! One session task owns the console stream; periodic tasks and event
//! handlers route outbound work to it through a bounded channel that is
//! rebound on every reconnect. Losing the console degrades the bridge,
//! it never kills it.

mod console;
mod progress;
mod quest;
mod rewards;
mod store;
mod votes;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{FixedOffset, Utc};
use conproto::{Event, Matcher, RosterParser};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use console::{Console, ConsoleConfig, Read};
use progress::LevelPolicy;
use quest::{QuestClient, QuestKind};
use rewards::RewardPlan;
use store::{BridgeState, LevelStore};
use votes::{VoteClient, VoteStatus};

const VOTE_COMMAND_RESPONSE: &str = "Please vote for our server on the voting site! Your rewards will be dropped in front of you within 2 minutes after voting.";
const THANK_YOU_MESSAGE: &str = "Thanks for voting {player_name}! Your rewards have been automatically delivered. Look, goodies are at your feet :D";
const GLOBAL_REWARD_MESSAGE: &str = "{player_name} just received a well deserved voting reward!";
const GLOBAL_VOTE_MESSAGE: &str = "Vote for our server and get great rewards! Type /vote in chat!";
const ALREADY_VOTED_MESSAGE: &str = "You already voted today and claimed your reward! You can vote again in approximately {hours}h {minutes}m.";
const ALREADY_VOTED_NO_ETA_MESSAGE: &str = "You already voted today and claimed your reward! You can vote again after the next daily reset.";
const VOTE_SERVICE_DOWN_MESSAGE: &str = "The vote service is unavailable right now. Please try again in a few minutes.";

const DEFAULT_REWARD_ITEMS: &str = "drinkJarBoiledWater:10,foodBaconAndEggs:10,ammo9mmBulletBall:300";
const DEFAULT_REWARD_BOOKS: &str = "repairToolsSkillMagazine,bladesSkillMagazine,bowsSkillMagazine,riflesSkillMagazine,handgunsSkillMagazine,shotgunsSkillMagazine,medicalSkillMagazine,cookingSkillMagazine,trapsSkillMagazine,salvageToolsSkillMagazine";

fn usage_and_exit() -> ! {
    eprintln!(
        "gamewatch - console bridge for a live game server

Configuration is taken from the environment:
  GW_HOST                console host          (default 127.0.0.1)
  GW_PORT                console port          (default 8081)
  GW_PASSWORD            console password      (default empty)
  GW_WARMUP_COMMAND      throwaway command     (default version)
  GW_LEVELS_PATH         levels json path      (default players_levels.json)
  GW_QUEST_URL           quest sidecar url     (default http://127.0.0.1:3000)
  GW_VOTE_API_URL        vote provider url     (default https://7daystodie-servers.com/api)
  GW_VOTE_API_KEY        vote provider key     (default empty; /vote disabled without it)
  GW_RESET_HOUR          daily reset hour 0-23 (default 6)
  GW_UTC_OFFSET_MIN      reset tz, min from UTC (default 120)
  GW_LEVELUP_POLICY      first | all           (default first)
  GW_REWARD_ITEMS        name:qty,...          (built-in default)
  GW_REWARD_BOOKS        name,...              (built-in default)
  GW_REWARD_BOOK_COUNT   books per reward      (default 3)
  GW_READ_TIMEOUT_S      console read timeout  (default 5)
  GW_QUIET_MS            echo drain quiet gap  (default 300)
  GW_BACKOFF_FLOOR_S     reconnect floor       (default 30)
  GW_BACKOFF_MAX_S       reconnect cap         (default 480)
  GW_ROSTER_INTERVAL_S   roster refresh        (default 3600)
  GW_HEALTH_INTERVAL_S   quest health probe    (default 300)
  GW_PENDING_POLL_S      pending vote poll     (default 30)
  GW_PENDING_EVICT_S     pending eviction scan (default 60)
  GW_PENDING_TTL_S       pending entry ttl     (default 600)
  GW_BROADCAST_INTERVAL_S global vote reminder (default 3600)

Logging uses RUST_LOG (default info)."
    );
    std::process::exit(2);
}

#[derive(Debug)]
struct Config {
    host: String,
    port: u16,
    password: String,
    warmup_command: String,
    levels_path: PathBuf,
    quest_url: String,
    vote_api_url: String,
    vote_api_key: String,
    reset_hour: u32,
    utc_offset: FixedOffset,
    level_policy: LevelPolicy,
    reward_items: String,
    reward_books: String,
    reward_book_count: usize,
    read_timeout: Duration,
    quiet: Duration,
    connect_timeout: Duration,
    auth_timeout: Duration,
    http_timeout: Duration,
    backoff_floor: Duration,
    backoff_max: Duration,
    roster_interval: Duration,
    health_interval: Duration,
    pending_poll: Duration,
    pending_evict: Duration,
    pending_ttl: chrono::Duration,
    broadcast_interval: Duration,
    reset_poll: Duration,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(s) => s
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} has invalid value {s:?}")),
        Err(_) => Ok(default),
    }
}

fn parse_args() -> anyhow::Result<Config> {
    let reset_hour: u32 = env_parse("GW_RESET_HOUR", 6)?;
    if reset_hour > 23 {
        anyhow::bail!("GW_RESET_HOUR must be 0-23");
    }
    let offset_min: i32 = env_parse("GW_UTC_OFFSET_MIN", 120)?;
    let utc_offset = FixedOffset::east_opt(offset_min * 60)
        .ok_or_else(|| anyhow::anyhow!("GW_UTC_OFFSET_MIN out of range"))?;
    let policy_raw = env_or("GW_LEVELUP_POLICY", "first");
    let level_policy = LevelPolicy::parse(&policy_raw)
        .ok_or_else(|| anyhow::anyhow!("GW_LEVELUP_POLICY must be 'first' or 'all'"))?;

    Ok(Config {
        host: env_or("GW_HOST", "127.0.0.1"),
        port: env_parse("GW_PORT", 8081)?,
        password: env_or("GW_PASSWORD", ""),
        warmup_command: env_or("GW_WARMUP_COMMAND", "version"),
        levels_path: PathBuf::from(env_or("GW_LEVELS_PATH", "players_levels.json")),
        quest_url: env_or("GW_QUEST_URL", "http://127.0.0.1:3000"),
        vote_api_url: env_or("GW_VOTE_API_URL", "https://7daystodie-servers.com/api"),
        vote_api_key: env_or("GW_VOTE_API_KEY", ""),
        reset_hour,
        utc_offset,
        level_policy,
        reward_items: env_or("GW_REWARD_ITEMS", DEFAULT_REWARD_ITEMS),
        reward_books: env_or("GW_REWARD_BOOKS", DEFAULT_REWARD_BOOKS),
        reward_book_count: env_parse("GW_REWARD_BOOK_COUNT", 3)?,
        read_timeout: Duration::from_secs(env_parse("GW_READ_TIMEOUT_S", 5)?),
        quiet: Duration::from_millis(env_parse("GW_QUIET_MS", 300)?),
        connect_timeout: Duration::from_secs(10),
        auth_timeout: Duration::from_secs(5),
        http_timeout: Duration::from_secs(10),
        backoff_floor: Duration::from_secs(env_parse("GW_BACKOFF_FLOOR_S", 30)?),
        backoff_max: Duration::from_secs(env_parse("GW_BACKOFF_MAX_S", 480)?),
        roster_interval: Duration::from_secs(env_parse("GW_ROSTER_INTERVAL_S", 3600)?),
        health_interval: Duration::from_secs(env_parse("GW_HEALTH_INTERVAL_S", 300)?),
        pending_poll: Duration::from_secs(env_parse("GW_PENDING_POLL_S", 30)?),
        pending_evict: Duration::from_secs(env_parse("GW_PENDING_EVICT_S", 60)?),
        pending_ttl: chrono::Duration::seconds(env_parse("GW_PENDING_TTL_S", 600)?),
        broadcast_interval: Duration::from_secs(env_parse("GW_BROADCAST_INTERVAL_S", 3600)?),
        reset_poll: Duration::from_secs(30),
    })
}

impl Config {
    fn console(&self) -> ConsoleConfig {
        ConsoleConfig {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            warmup_command: self.warmup_command.clone(),
            connect_timeout: self.connect_timeout,
            auth_timeout: self.auth_timeout,
            quiet: self.quiet,
        }
    }
}

/// Exponential reconnect delay. Doubles on each use, capped, and reset
/// only by a completed authentication handshake.
struct Backoff {
    cur: Duration,
    floor: Duration,
    max: Duration,
}

impl Backoff {
    fn new(floor: Duration, max: Duration) -> Self {
        Self {
            cur: floor,
            floor,
            max,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let d = self.cur;
        self.cur = (d * 2).min(self.max);
        d
    }

    fn reset(&mut self) {
        self.cur = self.floor;
    }
}

/// Work routed to whichever session task currently owns the console.
#[derive(Debug)]
enum Outbound {
    Say(String),
    RefreshRoster,
    DeliverReward { platform_id: u64, name: String },
}

/// Slot holding the live session's sender. Unbound while disconnected,
/// so periodic tasks fail fast instead of queueing into the void.
#[derive(Clone, Default)]
struct SinkHandle {
    slot: Arc<Mutex<Option<mpsc::Sender<Outbound>>>>,
}

impl SinkHandle {
    async fn bind(&self, tx: mpsc::Sender<Outbound>) {
        *self.slot.lock().await = Some(tx);
    }

    async fn unbind(&self) {
        *self.slot.lock().await = None;
    }

    async fn send(&self, out: Outbound) -> bool {
        let guard = self.slot.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.try_send(out).is_ok(),
            None => false,
        }
    }
}

struct Shared {
    cfg: Config,
    state: Mutex<BridgeState>,
    quest: QuestClient,
    votes: VoteClient,
    rewards: RewardPlan,
    matcher: Matcher,
    roster: RosterParser,
    sink: SinkHandle,
}

enum ExitReason {
    Shutdown,
    Disconnected,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    if std::env::args().skip(1).any(|a| a == "-h" || a == "--help") {
        usage_and_exit();
    }
    let cfg = parse_args()?;
    info!(host = %cfg.host, port = cfg.port, "gamewatch starting");

    let levels = LevelStore::load(&cfg.levels_path);
    let quest = QuestClient::new(cfg.quest_url.clone(), cfg.http_timeout)?;
    let votes = VoteClient::new(
        cfg.vote_api_url.clone(),
        cfg.vote_api_key.clone(),
        cfg.utc_offset,
        cfg.reset_hour,
        cfg.http_timeout,
    )?;
    let rewards = RewardPlan::parse(&cfg.reward_items, &cfg.reward_books, cfg.reward_book_count);

    let shared = Arc::new(Shared {
        cfg,
        state: Mutex::new(BridgeState::new(levels)),
        quest,
        votes,
        rewards,
        matcher: Matcher::new(),
        roster: RosterParser::new(),
        sink: SinkHandle::default(),
    });

    let (shutdown_tx, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(err = %e, "ctrl-c handler failed");
            return;
        }
        info!("shutdown requested");
        let _ = shutdown_tx.send(true);
    });

    tokio::spawn(roster_timer(shared.clone(), shutdown.clone()));
    tokio::spawn(health_timer(shared.clone(), shutdown.clone()));
    tokio::spawn(pending_evict_timer(shared.clone(), shutdown.clone()));
    tokio::spawn(pending_poll_timer(shared.clone(), shutdown.clone()));
    tokio::spawn(broadcast_timer(shared.clone(), shutdown.clone()));
    tokio::spawn(reset_timer(shared.clone(), shutdown.clone()));

    supervise(shared, shutdown).await;
    info!("gamewatch stopped");
    Ok(())
}

/// Connect, run a session, and reconnect forever with capped backoff.
/// Backoff resets only after the handshake completes, so a server that
/// accepts TCP but drops us during auth still backs off.
async fn supervise(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut backoff = Backoff::new(shared.cfg.backoff_floor, shared.cfg.backoff_max);
    loop {
        if *shutdown.borrow() {
            return;
        }
        match Console::connect(&shared.cfg.console()).await {
            Ok(mut console) => {
                backoff.reset();
                let (tx, rx) = mpsc::channel(64);
                shared.sink.bind(tx).await;
                let res = session(&mut console, rx, &shared, &mut shutdown).await;
                shared.sink.unbind().await;
                match res {
                    Ok(ExitReason::Shutdown) => return,
                    Ok(ExitReason::Disconnected) => warn!("console closed; reconnecting"),
                    Err(e) => warn!(err = %e, "console session failed; reconnecting"),
                }
            }
            Err(e) => warn!(err = %e, "console connect failed"),
        }
        let delay = backoff.next_delay();
        info!(delay_s = delay.as_secs(), "waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => return,
        }
    }
}

/// One connection's lifetime: initial roster scan, collaborator probe,
/// then a select loop over inbound lines and outbound work.
async fn session(
    console: &mut Console,
    mut rx: mpsc::Receiver<Outbound>,
    shared: &Arc<Shared>,
    shutdown: &mut watch::Receiver<bool>,
) -> anyhow::Result<ExitReason> {
    // Levels feed catchup math and level-bump diffs, so scan before
    // processing any events.
    refresh_roster(console, shared).await?;

    let healthy = shared.quest.health().await;
    shared.state.lock().await.quest_healthy = healthy;
    if healthy {
        info!("quest service available");
    } else {
        warn!("quest service unavailable; quest updates degraded");
    }

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(ExitReason::Shutdown),
            out = rx.recv() => {
                // The supervisor holds the sender until the session ends,
                // so None only shows up at teardown.
                let Some(out) = out else { return Ok(ExitReason::Disconnected) };
                handle_outbound(console, shared, out).await;
            }
            res = console.read_line(shared.cfg.read_timeout) => match res? {
                Read::TimedOut => {}
                Read::Closed => return Ok(ExitReason::Disconnected),
                Read::Line(line) => handle_line(console, shared, &line).await,
            }
        }
    }
}

/// Outbound failures are degraded service, not session death; a dead
/// connection surfaces through the read loop soon enough.
async fn handle_outbound<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    out: Outbound,
) {
    let res = match out {
        Outbound::Say(msg) => console.send_say(&msg).await,
        Outbound::RefreshRoster => refresh_roster(console, shared).await,
        Outbound::DeliverReward { platform_id, name } => {
            deliver_reward(console, shared, platform_id, &name).await;
            Ok(())
        }
    };
    if let Err(e) = res {
        warn!(err = %e, "outbound console work failed");
    }
}

async fn refresh_roster<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
) -> anyhow::Result<()> {
    let records = console.fetch_roster(&shared.roster).await?;
    let mut st = shared.state.lock().await;
    let deltas = st.levels.refresh(&records);
    info!(
        online = records.len(),
        tracked = st.levels.tracked(),
        changed = deltas.len(),
        "roster refreshed"
    );
    for d in &deltas {
        debug!(player = %d.name, old = d.old, new = d.new, "level changed");
    }
    Ok(())
}

async fn handle_line<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    line: &str,
) {
    let Some(event) = shared.matcher.recognize(line) else {
        return;
    };
    debug!(?event, "console event");
    match event {
        Event::ChatCommand {
            platform_id,
            name,
            command,
            ..
        } => match command.as_str() {
            "vote" => match platform_id {
                Some(pid) => handle_vote_command(console, shared, pid, &name).await,
                None => debug!(player = %name, "ignoring /vote without a platform id"),
            },
            "catchup" => handle_catchup(console, shared, &name).await,
            other => debug!(player = %name, command = other, "unhandled chat command"),
        },
        Event::VoteCompleted { name } => handle_vote_completed(console, shared, &name).await,
        Event::LevelUp { name, level, .. } => {
            shared.state.lock().await.levels.set(&name, level);
            notify_level_up(console, shared, &name, level).await;
        }
        Event::LevelBump => handle_level_bump(console, shared).await,
        Event::PlayerSpawned { name, platform_id } => {
            handle_spawn(console, shared, platform_id, &name).await;
        }
    }
}

/// PM delivery is best-effort everywhere; failures are logged, never
/// propagated.
async fn pm<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    player: &str,
    msg: &str,
) {
    if let Err(e) = console.send_pm(player, msg).await {
        warn!(err = %e, player, "pm delivery failed");
    }
}

async fn handle_vote_command<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    pid: u64,
    name: &str,
) {
    info!(player = %name, platform_id = pid, "processing /vote");
    match shared.votes.status(pid).await {
        Err(e) => {
            warn!(err = %e, player = %name, "vote status check failed");
            pm(console, name, VOTE_SERVICE_DOWN_MESSAGE).await;
        }
        Ok(VoteStatus::NotVoted) => {
            pm(console, name, VOTE_COMMAND_RESPONSE).await;
            let mut st = shared.state.lock().await;
            st.add_pending(pid, name, Utc::now());
            info!(player = %name, "armed pending vote check");
        }
        Ok(VoteStatus::VotedUnclaimed) => deliver_reward(console, shared, pid, name).await,
        Ok(VoteStatus::VotedClaimed) => {
            let eta = shared.votes.time_until_next_vote(pid).await;
            pm(console, name, &already_voted_message(eta)).await;
        }
    }
}

/// Countdown text for a player whose vote is already claimed. With no
/// vote on record (history fetch failed) the message skips the estimate
/// rather than claiming "0h 0m".
fn already_voted_message(eta: Option<(i64, i64)>) -> String {
    match eta {
        Some((hours, minutes)) => ALREADY_VOTED_MESSAGE
            .replace("{hours}", &hours.to_string())
            .replace("{minutes}", &minutes.to_string()),
        None => ALREADY_VOTED_NO_ETA_MESSAGE.to_string(),
    }
}

/// Drop the goodies, claim the vote, and say thanks. The grants go out
/// before the claim: a claim hiccup must not eat a player's reward.
async fn deliver_reward<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    pid: u64,
    name: &str,
) {
    info!(player = %name, platform_id = pid, "delivering vote reward");
    for cmd in shared.rewards.commands_for(name) {
        if let Err(e) = console.send_command(&cmd).await {
            warn!(err = %e, command = %cmd, "reward grant failed");
        }
    }
    match shared.votes.claim(pid).await {
        Ok(true) => {}
        Ok(false) => warn!(player = %name, "vote provider refused the claim"),
        Err(e) => warn!(err = %e, player = %name, "vote claim failed"),
    }

    let (thank, announce) = {
        let mut st = shared.state.lock().await;
        st.remove_pending(pid);
        st.mark_checked(pid);
        (st.mark_thanked(pid), st.mark_announced(pid))
    };
    if thank {
        pm(console, name, &THANK_YOU_MESSAGE.replace("{player_name}", name)).await;
    }
    if announce {
        let msg = GLOBAL_REWARD_MESSAGE.replace("{player_name}", name);
        if let Err(e) = console.send_say(&msg).await {
            warn!(err = %e, "reward announcement failed");
        }
    }
}

async fn handle_vote_completed<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    name: &str,
) {
    info!(player = %name, "vote completion detected");
    pm(console, name, "Vote registered! Updating your daily quest...").await;
    quest_update(console, shared, name, QuestKind::Vote, "Vote").await;
}

async fn notify_level_up<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    name: &str,
    level: u32,
) {
    info!(player = %name, level, "level up");
    pm(
        console,
        name,
        &format!("Level {level} reached! Updating your daily quest..."),
    )
    .await;
    quest_update(console, shared, name, QuestKind::LevelUp, "Level up").await;
}

/// Advance a quest, degrading to an apologetic PM when the sidecar is
/// down or rejects the grant.
async fn quest_update<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    name: &str,
    kind: QuestKind,
    noun: &str,
) {
    let healthy = shared.state.lock().await.quest_healthy;
    if !healthy {
        warn!(player = %name, kind = kind.as_str(), "quest service offline; skipping update");
        pm(console, name, &format!("{noun} registered (quest system offline)")).await;
        return;
    }
    match shared.quest.update(name, kind, 1).await {
        Ok(Some(p)) => {
            info!(player = %name, kind = kind.as_str(), progress = p.progress, target = p.target, "quest updated");
            pm(
                console,
                name,
                &format!("{noun} registered! Quest progress: {}/{}", p.progress, p.target),
            )
            .await;
        }
        Ok(None) => {
            info!(player = %name, kind = kind.as_str(), "quest updated");
            pm(console, name, &format!("{noun} registered!")).await;
        }
        Err(e) => {
            warn!(err = %e, player = %name, kind = kind.as_str(), "quest update failed");
            pm(console, name, &format!("{noun} registered, but the quest update failed")).await;
        }
    }
}

/// The XP-gain marker names nobody; reconcile against a fresh roster
/// dump and act on the increases the policy selects.
async fn handle_level_bump<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
) {
    let records = match console.fetch_roster(&shared.roster).await {
        Ok(r) => r,
        Err(e) => {
            warn!(err = %e, "roster dump for level reconcile failed");
            return;
        }
    };
    let increases: Vec<store::LevelDelta> = {
        let mut st = shared.state.lock().await;
        st.levels
            .refresh(&records)
            .into_iter()
            .filter(|d| d.is_increase())
            .collect()
    };
    let selected: Vec<store::LevelDelta> =
        shared.cfg.level_policy.select(&increases).to_vec();
    for d in selected {
        notify_level_up(console, shared, &d.name, d.new).await;
    }
}

async fn handle_spawn<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    pid: u64,
    name: &str,
) {
    info!(player = %name, platform_id = pid, "player spawned");
    // A spawn tends to precede chat commands; a throwaway exchange wakes
    // server-side buffering the same way the login warm-up does.
    if let Err(e) = console.send_command(&shared.cfg.warmup_command).await {
        warn!(err = %e, "spawn warm-up failed");
    }
    let rearmed = {
        let mut st = shared.state.lock().await;
        st.rearm_remembered(pid, Utc::now())
    };
    if let Some(n) = rearmed {
        info!(player = %n, "re-armed pending vote check for returning player");
    }
}

async fn handle_catchup<R: AsyncRead + Unpin, W: AsyncWrite + Unpin>(
    console: &mut Console<R, W>,
    shared: &Arc<Shared>,
    name: &str,
) {
    let (level, highest) = {
        let st = shared.state.lock().await;
        (st.levels.get(name), st.levels.highest())
    };
    info!(player = %name, level, highest, "processing /catchup");
    if !progress::can_use_catchup(level) {
        pm(
            console,
            name,
            "Catchup is only for brand-new characters (level 1).",
        )
        .await;
        return;
    }
    let Some(target) = progress::catchup_target(highest) else {
        pm(
            console,
            name,
            "Catchup is not available yet; the server population is still too fresh.",
        )
        .await;
        return;
    };
    let xp = progress::xp_for_level(target);
    if let Err(e) = console.send_command(&format!("givexp {name} {xp}")).await {
        warn!(err = %e, player = %name, "catchup xp grant failed");
        pm(console, name, "Catchup failed to apply. Please try again.").await;
        return;
    }
    info!(player = %name, target, xp, "catchup granted");
    pm(
        console,
        name,
        &format!("Catchup applied! You have been boosted to level {target}."),
    )
    .await;
    shared.state.lock().await.levels.set(name, target);
}

fn make_interval(period: Duration) -> tokio::time::Interval {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tick
}

async fn roster_timer(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = make_interval(shared.cfg.roster_interval);
    tick.tick().await; // the session scans on connect; skip the immediate tick
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                if !shared.sink.send(Outbound::RefreshRoster).await {
                    debug!("roster refresh skipped; console disconnected");
                }
            }
        }
    }
}

/// Quest availability probe. Runs whether or not the console is up, and
/// logs only the transitions.
async fn health_timer(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = make_interval(shared.cfg.health_interval);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let healthy = shared.quest.health().await;
                let mut st = shared.state.lock().await;
                if st.quest_healthy != healthy {
                    if healthy {
                        info!("quest service connection restored");
                    } else {
                        warn!("quest service connection lost");
                    }
                    st.quest_healthy = healthy;
                }
            }
        }
    }
}

async fn pending_evict_timer(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = make_interval(shared.cfg.pending_evict);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let evicted = {
                    let mut st = shared.state.lock().await;
                    st.evict_stale_pending(Utc::now(), shared.cfg.pending_ttl)
                };
                for (pid, name) in evicted {
                    info!(player = %name, platform_id = pid, "pending vote check timed out");
                }
            }
        }
    }
}

/// Poll the provider for each pending voter and queue reward delivery
/// the moment a vote lands.
async fn pending_poll_timer(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = make_interval(shared.cfg.pending_poll);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => poll_pending(&shared, &shutdown).await,
        }
    }
}

async fn poll_pending(shared: &Arc<Shared>, shutdown: &watch::Receiver<bool>) {
    let entries = shared.state.lock().await.pending_entries();
    for (pid, name) in entries {
        if *shutdown.borrow() {
            return;
        }
        let already = {
            let mut st = shared.state.lock().await;
            if st.is_checked(pid) {
                st.remove_pending(pid);
                true
            } else {
                false
            }
        };
        if already {
            continue;
        }
        match shared.votes.status(pid).await {
            Ok(VoteStatus::VotedUnclaimed) => {
                info!(player = %name, platform_id = pid, "vote landed; queueing reward");
                shared.state.lock().await.remove_pending(pid);
                let queued = shared
                    .sink
                    .send(Outbound::DeliverReward {
                        platform_id: pid,
                        name: name.clone(),
                    })
                    .await;
                if !queued {
                    warn!(player = %name, "console disconnected; reward deferred");
                    // Re-arm with a fresh timestamp so the next poll
                    // retries after reconnect instead of evicting.
                    shared.state.lock().await.add_pending(pid, &name, Utc::now());
                }
            }
            Ok(VoteStatus::VotedClaimed) => {
                let mut st = shared.state.lock().await;
                st.remove_pending(pid);
                st.mark_checked(pid);
                info!(player = %name, "vote already claimed elsewhere");
            }
            Ok(VoteStatus::NotVoted) => {}
            Err(e) => warn!(err = %e, player = %name, "pending vote status check failed"),
        }
    }
}

async fn broadcast_timer(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = make_interval(shared.cfg.broadcast_interval);
    tick.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                if !shared.sink.send(Outbound::Say(GLOBAL_VOTE_MESSAGE.to_string())).await {
                    debug!("vote reminder skipped; console disconnected");
                }
            }
        }
    }
}

/// Clears the dedup sets once per local day, inside the reset minute.
/// Polls faster than once a minute; `daily_reset` makes repeats no-ops.
async fn reset_timer(shared: Arc<Shared>, mut shutdown: watch::Receiver<bool>) {
    let mut tick = make_interval(shared.cfg.reset_poll);
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = tick.tick() => {
                let now_local = Utc::now().with_timezone(&shared.cfg.utc_offset).naive_local();
                if votes::is_reset_minute(now_local, shared.cfg.reset_hour) {
                    let mut st = shared.state.lock().await;
                    if st.daily_reset(now_local.date()) {
                        info!(date = %now_local.date(), "daily reset; dedup sets cleared");
                    }
                }
            }
        }
    }
}
