use diesel_async::AsyncPgConnection;
use shared_types::LeaderboardEntry;
use uuid::Uuid;

use crate::db::{teams, users};
use crate::error::ApiResult;

pub const USER_LEADERBOARD_LIMIT: i64 = 100;

/// Number already-ordered rows 1, 2, 3, ... in input order.
pub fn rank_entries<I>(rows: I) -> Vec<LeaderboardEntry>
where
    I: IntoIterator<Item = (Uuid, String, i32)>,
{
    rows.into_iter()
        .enumerate()
        .map(|(index, (id, name, points))| LeaderboardEntry {
            rank: index + 1,
            id,
            name,
            points,
        })
        .collect()
}

pub struct LeaderboardService;

impl LeaderboardService {
    /// Verified teams by points, ties broken by name.
    pub async fn teams(conn: &mut AsyncPgConnection) -> ApiResult<Vec<LeaderboardEntry>> {
        let rows = teams::list_verified_by_points(conn).await?;
        Ok(rank_entries(rows.into_iter().map(|t| (t.id, t.name, t.points))))
    }

    /// Top non-admin users by points.
    pub async fn users(conn: &mut AsyncPgConnection) -> ApiResult<Vec<LeaderboardEntry>> {
        let rows = users::top_by_points(conn, USER_LEADERBOARD_LIMIT).await?;
        Ok(rank_entries(rows.into_iter().map(|u| (u.id, u.name, u.points))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranks_are_consecutive_from_one() {
        let rows = vec![
            (Uuid::new_v4(), "Alpha".to_string(), 30),
            (Uuid::new_v4(), "Beta".to_string(), 20),
            (Uuid::new_v4(), "Gamma".to_string(), 20),
        ];
        let ranked = rank_entries(rows);
        let ranks: Vec<usize> = ranked.iter().map(|e| e.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
        assert_eq!(ranked[0].name, "Alpha");
        assert_eq!(ranked[2].points, 20);
    }

    #[test]
    fn test_empty_leaderboard() {
        assert!(rank_entries(Vec::new()).is_empty());
    }
}
