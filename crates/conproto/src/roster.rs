use regex::Regex;

/// One online player parsed from a roster dump line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterRecord {
    pub entity_id: u64,
    pub name: String,
    pub level: u32,
    /// Stable account id, when the dump carries one.
    pub platform_id: Option<u64>,
}

/// Tolerant parser for the console's `listplayers`-style roster dump.
///
/// The layout is loosely delimited and varies between server builds, so
/// matching keys on required fields only (`id=`, the display name, and
/// the first `level=`); records missing any of them are skipped, never
/// an error.
pub struct RosterParser {
    record: Regex,
    platform: Regex,
}

impl Default for RosterParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RosterParser {
    pub fn new() -> Self {
        Self {
            record: Regex::new(r"id=(\d+),\s*([^,]+),.*?level=(\d+)").expect("static pattern"),
            platform: Regex::new(r"(?i)(?:steamid|pltfmid)=(?:Steam_)?(\d+)")
                .expect("static pattern"),
        }
    }

    pub fn parse_line(&self, line: &str) -> Option<RosterRecord> {
        let caps = self.record.captures(line)?;
        let entity_id = caps.get(1)?.as_str().parse().ok()?;
        let name = caps.get(2)?.as_str().trim().to_string();
        let level = caps.get(3)?.as_str().parse().ok()?;
        if name.is_empty() {
            return None;
        }
        let platform_id = self
            .platform
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());
        Some(RosterRecord {
            entity_id,
            name,
            level,
            platform_id,
        })
    }

    /// Parse every record found in a multi-line dump, in dump order.
    pub fn parse_text(&self, text: &str) -> Vec<RosterRecord> {
        text.lines().filter_map(|l| self.parse_line(l)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = "\
1. id=171, PlayerOne, pos=(-1063.2, 61.0, -1492.8), rot=(4.9, -4.3, 0.0), remote=True, health=94, deaths=2, zombies=111, players=0, score=105, level=1, steamid=76561198000000001, ip=10.0.0.4, ping=42
2. id=202, Player, Two, pos=(12.0, 60.0, 9.5), rot=(0.0, 0.0, 0.0), remote=True, health=100, deaths=0, zombies=5, players=0, score=5, level=120, pltfmid=Steam_76561198000000002, ip=10.0.0.9, ping=18
Total of 2 in the game
";

    #[test]
    fn parses_records_in_order() {
        let p = RosterParser::new();
        let recs = p.parse_text(DUMP);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].entity_id, 171);
        assert_eq!(recs[0].name, "PlayerOne");
        assert_eq!(recs[0].level, 1);
        assert_eq!(recs[0].platform_id, Some(76561198000000001));
        // A comma in the display name truncates it; the rest of the
        // record still parses.
        assert_eq!(recs[1].name, "Player");
        assert_eq!(recs[1].level, 120);
        assert_eq!(recs[1].platform_id, Some(76561198000000002));
    }

    #[test]
    fn skips_malformed_records() {
        let p = RosterParser::new();
        assert_eq!(p.parse_line("Total of 2 in the game"), None);
        assert_eq!(p.parse_line("id=notanumber, Bob, level=3"), None);
        assert_eq!(p.parse_line("id=5, Bob, health=3"), None);
        // Level overflowing u32 degrades the record, never errors.
        assert_eq!(p.parse_line("id=5, Bob, level=99999999999999999999"), None);
    }

    #[test]
    fn platform_id_is_optional() {
        let p = RosterParser::new();
        let rec = p
            .parse_line("1. id=7, Drifter, remote=True, level=33, ip=10.1.1.1")
            .unwrap();
        assert_eq!(rec.platform_id, None);
        assert_eq!(rec.level, 33);
    }

    #[test]
    fn takes_first_level_field() {
        let p = RosterParser::new();
        let rec = p
            .parse_line("id=9, Scout, level=12, gamestage_level=80")
            .unwrap();
        assert_eq!(rec.level, 12);
    }
}
