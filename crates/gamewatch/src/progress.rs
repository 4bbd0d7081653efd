//! Pure progression decisions: catchup eligibility, the XP curve, and
//! level-diff policy. No I/O here; callers apply the results.

/// One catchup tier: servers whose highest level falls in `[min, max]`
/// bootstrap new characters to `target`.
#[derive(Debug, Clone, Copy)]
pub struct CatchupTier {
    pub min: u32,
    pub max: u32,
    pub target: u32,
}

/// Non-overlapping, ascending. A highest level outside every tier means
/// the server population is too low (or absurdly high) for catchup.
pub const CATCHUP_TIERS: &[CatchupTier] = &[
    CatchupTier { min: 100, max: 150, target: 60 },
    CatchupTier { min: 151, max: 200, target: 80 },
    CatchupTier { min: 201, max: 250, target: 120 },
    CatchupTier { min: 251, max: 300, target: 180 },
    CatchupTier { min: 301, max: 350, target: 240 },
    CatchupTier { min: 351, max: 400, target: 280 },
    CatchupTier { min: 401, max: 450, target: 320 },
];

/// Target level for the server's highest observed level, or `None` when
/// no tier applies.
pub fn catchup_target(highest: u32) -> Option<u32> {
    CATCHUP_TIERS
        .iter()
        .find(|t| t.min <= highest && highest <= t.max)
        .map(|t| t.target)
}

const XP_BASELINE: u64 = 3_702_082;
const XP_PER_LEVEL_ABOVE_60: u64 = 186_791;

/// Total XP that puts a fresh character at `level`.
///
/// The grant command gives XP, not a level, so this curve is the public
/// contract with the reward: it must match the server's exactly. Flat up
/// to level 60, then linear.
pub fn xp_for_level(level: u32) -> u64 {
    if level <= 60 {
        XP_BASELINE
    } else {
        XP_BASELINE + u64::from(level - 60) * XP_PER_LEVEL_ABOVE_60
    }
}

/// Catchup is a one-time bootstrap for brand-new characters only.
pub fn can_use_catchup(level: u32) -> bool {
    level <= 1
}

/// How many level increases from one roster diff to act on.
///
/// Simultaneous level-ups are rare, and acting on a single one per pass
/// bounds the blast radius if the roster inference is ever wrong, so
/// `FirstOnly` is the default. `All` handles every increase in the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelPolicy {
    FirstOnly,
    All,
}

impl LevelPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first" => Some(Self::FirstOnly),
            "all" => Some(Self::All),
            _ => None,
        }
    }

    /// Apply the policy to an ordered slice of increases.
    pub fn select<'a, T>(&self, increases: &'a [T]) -> &'a [T] {
        match self {
            Self::FirstOnly => &increases[..increases.len().min(1)],
            Self::All => increases,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiers_are_ascending_and_disjoint() {
        for w in CATCHUP_TIERS.windows(2) {
            assert!(w[0].max < w[1].min, "{:?} overlaps {:?}", w[0], w[1]);
        }
        for t in CATCHUP_TIERS {
            assert!(t.min <= t.max);
        }
    }

    #[test]
    fn target_inside_each_tier() {
        assert_eq!(catchup_target(100), Some(60));
        assert_eq!(catchup_target(120), Some(60));
        assert_eq!(catchup_target(150), Some(60));
        assert_eq!(catchup_target(151), Some(80));
        assert_eq!(catchup_target(250), Some(120));
        assert_eq!(catchup_target(450), Some(320));
    }

    #[test]
    fn ineligible_outside_every_tier() {
        assert_eq!(catchup_target(0), None);
        assert_eq!(catchup_target(1), None);
        assert_eq!(catchup_target(99), None);
        assert_eq!(catchup_target(451), None);
        assert_eq!(catchup_target(u32::MAX), None);
    }

    #[test]
    fn xp_curve_is_flat_then_linear() {
        assert_eq!(xp_for_level(0), xp_for_level(60));
        assert_eq!(xp_for_level(1), xp_for_level(60));
        assert_eq!(xp_for_level(59), xp_for_level(60));
        assert_eq!(xp_for_level(61) - xp_for_level(60), 186_791);
        assert_eq!(xp_for_level(60), 3_702_082);
        assert_eq!(xp_for_level(80), 3_702_082 + 20 * 186_791);
    }

    #[test]
    fn catchup_only_for_fresh_characters() {
        assert!(can_use_catchup(0));
        assert!(can_use_catchup(1));
        assert!(!can_use_catchup(2));
        assert!(!can_use_catchup(60));
    }

    #[test]
    fn level_policy_selection() {
        let inc = [1, 2, 3];
        assert_eq!(LevelPolicy::FirstOnly.select(&inc), &[1]);
        assert_eq!(LevelPolicy::All.select(&inc), &[1, 2, 3]);
        let empty: [i32; 0] = [];
        assert_eq!(LevelPolicy::FirstOnly.select(&empty).len(), 0);
    }

    #[test]
    fn policy_parsing() {
        assert_eq!(LevelPolicy::parse("first"), Some(LevelPolicy::FirstOnly));
        assert_eq!(LevelPolicy::parse("all"), Some(LevelPolicy::All));
        assert_eq!(LevelPolicy::parse("both"), None);
    }
}
