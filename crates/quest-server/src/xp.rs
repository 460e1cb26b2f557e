//! XP and leveling

use crate::models::UserXp;
use serde::{Deserialize, Serialize};

pub const DEFAULT_POINTS_PER_LEVEL: u64 = 1000;

/// Flat level curve: level = floor(total_points / points_per_level) + 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCurve {
    pub points_per_level: u64,
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self {
            points_per_level: DEFAULT_POINTS_PER_LEVEL,
        }
    }
}

impl LevelCurve {
    pub fn new(points_per_level: u64) -> Self {
        Self {
            points_per_level: points_per_level.max(1),
        }
    }

    pub fn level(&self, total_points: u64) -> u32 {
        let level = total_points / self.points_per_level.max(1) + 1;
        level.min(u32::MAX as u64) as u32
    }

    /// Read-modify-write of a user's XP row for one accepted completion.
    /// Creates the row lazily on the first completion.
    pub fn apply_completion(
        &self,
        existing: Option<UserXp>,
        user_id: &str,
        points_awarded: u32,
        now: i64,
    ) -> UserXp {
        let mut xp = existing.unwrap_or_else(|| UserXp::zero(user_id));
        xp.total_points = xp.total_points.saturating_add(points_awarded as u64);
        xp.quests_completed = xp.quests_completed.saturating_add(1);
        xp.level = self.level(xp.total_points);
        // updated_at feeds the leaderboard tie-break, keep it monotonic
        xp.updated_at = xp.updated_at.max(now);
        xp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_curve() {
        let curve = LevelCurve::default();
        assert_eq!(curve.level(0), 1);
        assert_eq!(curve.level(999), 1);
        assert_eq!(curve.level(1000), 2);
        assert_eq!(curve.level(2500), 3);
    }

    #[test]
    fn test_zero_points_per_level_is_clamped() {
        let curve = LevelCurve::new(0);
        assert_eq!(curve.points_per_level, 1);
        assert_eq!(curve.level(5), 6);
    }

    #[test]
    fn test_first_completion_creates_row() {
        let xp = LevelCurve::default().apply_completion(None, "alice", 50, 1_000);
        assert_eq!(xp.user_id, "alice");
        assert_eq!(xp.total_points, 50);
        assert_eq!(xp.quests_completed, 1);
        assert_eq!(xp.level, 1);
        assert_eq!(xp.updated_at, 1_000);
    }

    #[test]
    fn test_accumulates_and_levels_up() {
        let curve = LevelCurve::default();
        let xp = curve.apply_completion(None, "alice", 600, 1_000);
        let xp = curve.apply_completion(Some(xp), "alice", 600, 2_000);
        assert_eq!(xp.total_points, 1_200);
        assert_eq!(xp.quests_completed, 2);
        assert_eq!(xp.level, 2);
        assert_eq!(xp.updated_at, 2_000);
    }

    #[test]
    fn test_updated_at_never_moves_backwards() {
        let curve = LevelCurve::default();
        let xp = curve.apply_completion(None, "alice", 10, 5_000);
        let xp = curve.apply_completion(Some(xp), "alice", 10, 4_000);
        assert_eq!(xp.updated_at, 5_000);
    }
}
