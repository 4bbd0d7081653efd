//! Vote reward delivery plan: a fixed set of item grants plus a few
//! distinct skill books sampled at random. The catalog contents are
//! configuration, not code.

use tracing::warn;

#[derive(Debug, Clone)]
pub struct RewardPlan {
    fixed: Vec<(String, u32)>,
    books: Vec<String>,
    book_count: usize,
}

impl RewardPlan {
    /// Parse from config strings: `items` is `name:qty,name:qty,...`,
    /// `books` a comma-separated item list. Malformed entries are
    /// skipped with a warning.
    pub fn parse(items: &str, books: &str, book_count: usize) -> Self {
        let mut fixed = Vec::new();
        for entry in items.split(',') {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            let Some((name, qty)) = entry.split_once(':') else {
                warn!(entry, "reward item missing ':qty'; skipping");
                continue;
            };
            let Ok(qty) = qty.trim().parse::<u32>() else {
                warn!(entry, "reward item has bad quantity; skipping");
                continue;
            };
            fixed.push((name.trim().to_string(), qty));
        }

        let books = books
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            fixed,
            books,
            book_count,
        }
    }

    /// Console `give` commands delivering one full reward to `player`.
    /// Book picks are distinct; a short book list just gives them all.
    pub fn commands_for(&self, player: &str) -> Vec<String> {
        let mut cmds: Vec<String> = self
            .fixed
            .iter()
            .map(|(item, qty)| format!("give {player} {item} {qty}"))
            .collect();
        for book in self.sample_books() {
            cmds.push(format!("give {player} {book} 1"));
        }
        cmds
    }

    fn sample_books(&self) -> Vec<&str> {
        let take = self.book_count.min(self.books.len());
        let mut idx: Vec<usize> = (0..self.books.len()).collect();
        // Partial Fisher-Yates: only the first `take` slots need shuffling.
        for i in 0..take {
            let j = i + rand_below(idx.len() - i);
            idx.swap(i, j);
        }
        idx[..take].iter().map(|&i| self.books[i].as_str()).collect()
    }
}

fn rand_below(bound: usize) -> usize {
    if bound <= 1 {
        return 0;
    }
    let mut b = [0u8; 8];
    getrandom::getrandom(&mut b).expect("getrandom");
    (u64::from_le_bytes(b) % bound as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn plan() -> RewardPlan {
        RewardPlan::parse(
            "drinkJarBoiledWater:5, foodBaconAndEggs:3, ammo762mmBulletBall:100",
            "repairToolsSkillMagazine, bladesSkillMagazine, bowsSkillMagazine, riflesSkillMagazine, medicalSkillMagazine",
            3,
        )
    }

    #[test]
    fn parses_fixed_items_and_books() {
        let p = plan();
        assert_eq!(p.fixed.len(), 3);
        assert_eq!(p.fixed[0], ("drinkJarBoiledWater".to_string(), 5));
        assert_eq!(p.books.len(), 5);
    }

    #[test]
    fn skips_malformed_entries() {
        let p = RewardPlan::parse("good:2,noqty,bad:xx, :3", "", 3);
        assert_eq!(p.fixed, vec![("good".to_string(), 2)]);
        assert!(p.books.is_empty());
    }

    #[test]
    fn commands_cover_fixed_plus_distinct_books() {
        let p = plan();
        for _ in 0..20 {
            let cmds = p.commands_for("PlayerOne");
            assert_eq!(cmds.len(), 3 + 3);
            assert!(cmds.iter().all(|c| c.starts_with("give PlayerOne ")));

            let books: HashSet<&str> = cmds[3..]
                .iter()
                .map(|c| c.split_whitespace().nth(2).unwrap())
                .collect();
            assert_eq!(books.len(), 3, "book picks must be distinct");
            for b in &books {
                assert!(p.books.iter().any(|x| x == b));
            }
        }
    }

    #[test]
    fn short_book_list_gives_everything() {
        let p = RewardPlan::parse("a:1", "one,two", 3);
        let cmds = p.commands_for("X");
        assert_eq!(cmds.len(), 1 + 2);
    }

    #[test]
    fn empty_catalog_still_works() {
        let p = RewardPlan::parse("", "", 3);
        assert!(p.commands_for("X").is_empty());
    }
}
