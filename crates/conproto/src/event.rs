use regex::Captures;
use regex::Regex;

/// A domain event recognized in one console line.
///
/// At most one event is produced per line; lines nothing recognizes are
/// not events. The level-up signal comes in two phrasings because the
/// server logs it inconsistently depending on cause: a commanded XP grant
/// names the player directly (`LevelUp`), while natural XP gain only
/// leaves an anonymous marker (`LevelBump`) that the caller reconciles by
/// diffing roster snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A `/command` spoken in chat.
    ChatCommand {
        platform_id: Option<u64>,
        entity_id: u64,
        name: String,
        command: String,
        args: Vec<String>,
    },
    /// The vote-site bot confirmed a completed vote in global chat.
    VoteCompleted { name: String },
    /// Explicit level-up line naming the player.
    LevelUp {
        name: String,
        platform_id: u64,
        level: u32,
    },
    /// Anonymous "a level-up just happened" marker.
    LevelBump,
    /// A player spawned into the world.
    PlayerSpawned { name: String, platform_id: u64 },
}

type Extract = fn(&Captures) -> Option<Event>;

/// Ordered table of line recognizers; the first regex that matches wins
/// and its extractor decides the event. A matched line whose numeric
/// fields fail to parse degrades to no event.
pub struct Matcher {
    rules: Vec<(Regex, Extract)>,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    pub fn new() -> Self {
        let rules: Vec<(&str, Extract)> = vec![
            (
                r"Chat \(from '(?:Steam_(\d+)|[^']*)', entity id '(\d+)', to '[^']*'\): '([^']*)':/([A-Za-z0-9_]+) ?(.*)$",
                extract_chat_command,
            ),
            (
                r"Thanks for voting (.+?)!.*rewards have been automatically delivered",
                extract_vote_completed,
            ),
            (
                r"playerLeveled: (.+?) \(Steam_(\d+)\) made level (\d+)",
                extract_level_up,
            ),
            (r"XP gained during the last level:", extract_level_bump),
            (
                r"PlayerSpawnedInWorld.*PltfmId='Steam_(\d+)'.*PlayerName='([^']+)'",
                extract_player_spawned,
            ),
        ];

        let rules = rules
            .into_iter()
            .map(|(p, f)| (Regex::new(p).expect("static recognizer pattern"), f))
            .collect();
        Self { rules }
    }

    /// Convert a raw line into at most one typed event.
    pub fn recognize(&self, line: &str) -> Option<Event> {
        for (re, extract) in &self.rules {
            if let Some(caps) = re.captures(line) {
                return extract(&caps);
            }
        }
        None
    }
}

fn extract_chat_command(caps: &Captures) -> Option<Event> {
    let platform_id = match caps.get(1) {
        Some(m) => Some(m.as_str().parse().ok()?),
        None => None,
    };
    let entity_id = caps.get(2)?.as_str().parse().ok()?;
    let name = caps.get(3)?.as_str().to_string();
    let command = caps.get(4)?.as_str().to_ascii_lowercase();
    let args = caps
        .get(5)
        .map(|m| m.as_str().split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    Some(Event::ChatCommand {
        platform_id,
        entity_id,
        name,
        command,
        args,
    })
}

fn extract_vote_completed(caps: &Captures) -> Option<Event> {
    Some(Event::VoteCompleted {
        name: caps.get(1)?.as_str().to_string(),
    })
}

fn extract_level_up(caps: &Captures) -> Option<Event> {
    Some(Event::LevelUp {
        name: caps.get(1)?.as_str().to_string(),
        platform_id: caps.get(2)?.as_str().parse().ok()?,
        level: caps.get(3)?.as_str().parse().ok()?,
    })
}

fn extract_level_bump(_caps: &Captures) -> Option<Event> {
    Some(Event::LevelBump)
}

fn extract_player_spawned(caps: &Captures) -> Option<Event> {
    Some(Event::PlayerSpawned {
        platform_id: caps.get(1)?.as_str().parse().ok()?,
        name: caps.get(2)?.as_str().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m() -> Matcher {
        Matcher::new()
    }

    #[test]
    fn recognizes_chat_command() {
        let line = "2026-08-20T14:03:11 INF Chat (from 'Steam_76561198000000001', entity id '171', to 'Global'): 'PlayerOne':/catchup";
        match m().recognize(line) {
            Some(Event::ChatCommand {
                platform_id,
                entity_id,
                name,
                command,
                args,
            }) => {
                assert_eq!(platform_id, Some(76561198000000001));
                assert_eq!(entity_id, 171);
                assert_eq!(name, "PlayerOne");
                assert_eq!(command, "catchup");
                assert!(args.is_empty());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn chat_command_with_args_and_no_platform_id() {
        let line = "Chat (from 'XBL_abc', entity id '9', to 'Global'): 'Pad':/vote now please";
        match m().recognize(line) {
            Some(Event::ChatCommand {
                platform_id,
                name,
                command,
                args,
                ..
            }) => {
                assert_eq!(platform_id, None);
                assert_eq!(name, "Pad");
                assert_eq!(command, "vote");
                assert_eq!(args, vec!["now".to_string(), "please".to_string()]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn plain_chat_is_not_an_event() {
        let line = "Chat (from 'Steam_7656', entity id '3', to 'Global'): 'Bob':hello there";
        assert_eq!(m().recognize(line), None);
    }

    #[test]
    fn recognizes_vote_completion() {
        let line = "Chat (from '-non-player-', entity id '-1', to 'Global'): Thanks for voting PlayerTwo! Your rewards have been automatically delivered! Look, goodies are at your feet :D";
        assert_eq!(
            m().recognize(line),
            Some(Event::VoteCompleted {
                name: "PlayerTwo".to_string()
            })
        );
    }

    #[test]
    fn thanks_without_delivery_phrase_is_not_a_vote() {
        let line = "Thanks for voting PlayerTwo! Please claim manually.";
        assert_eq!(m().recognize(line), None);
    }

    #[test]
    fn recognizes_direct_level_up() {
        let line = "[CSMM_Patrons]playerLeveled: Raider (Steam_76561198012345678) made level 42";
        assert_eq!(
            m().recognize(line),
            Some(Event::LevelUp {
                name: "Raider".to_string(),
                platform_id: 76561198012345678,
                level: 42,
            })
        );
    }

    #[test]
    fn recognizes_indirect_level_bump() {
        let line = "INF XP gained during the last level: 186791";
        assert_eq!(m().recognize(line), Some(Event::LevelBump));
    }

    #[test]
    fn recognizes_player_spawn() {
        let line = "PlayerSpawnedInWorld (reason: JoinMultiplayer, position: 10, 61, -7): EntityID=513, PltfmId='Steam_76561198099999999', CrossId='EOS_0002', OwnerID='Steam_76561198099999999', PlayerName='Wanderer'";
        assert_eq!(
            m().recognize(line),
            Some(Event::PlayerSpawned {
                name: "Wanderer".to_string(),
                platform_id: 76561198099999999,
            })
        );
    }

    #[test]
    fn malformed_number_degrades_to_unrecognized() {
        // 25-digit id overflows u64; the line must not raise, just not match.
        let line =
            "[CSMM_Patrons]playerLeveled: Raider (Steam_9999999999999999999999999) made level 12";
        assert_eq!(m().recognize(line), None);

        let line = "Chat (from 'Steam_9999999999999999999999999', entity id '4', to 'Global'): 'X':/vote";
        assert_eq!(m().recognize(line), None);
    }

    #[test]
    fn unrelated_lines_are_ignored() {
        assert_eq!(m().recognize(""), None);
        assert_eq!(m().recognize("INF Time: 123.45m FPS: 38.1"), None);
        assert_eq!(m().recognize("version output Alpha 21"), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        // A chat-relayed vote confirmation: the chat rule is checked first
        // but does not match (no '/command'), so the vote rule applies.
        let line = "Chat (from '-', entity id '-1', to 'Global'): 'SERVER': Thanks for voting Zed! Your rewards have been automatically delivered!";
        assert_eq!(
            m().recognize(line),
            Some(Event::VoteCompleted {
                name: "Zed".to_string()
            })
        );
    }
}
