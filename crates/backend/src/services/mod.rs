//! Business logic shared by the HTTP handlers and kept out of them for testability.

pub mod leaderboard;
pub mod teams;
pub mod users;

use crate::error::{ApiError, ApiResult};

/// Apply a signed adjustment to a points balance, which may never go negative.
pub fn apply_points_delta(current: i32, delta: i32) -> ApiResult<i32> {
    let updated = current
        .checked_add(delta)
        .ok_or_else(|| ApiError::bad_request("Points adjustment out of range"))?;
    if updated < 0 {
        return Err(ApiError::bad_request("Points cannot go below zero"));
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_delta_applies() {
        assert_eq!(apply_points_delta(10, 5).unwrap(), 15);
        assert_eq!(apply_points_delta(10, -10).unwrap(), 0);
    }

    #[test]
    fn test_points_never_negative() {
        assert!(apply_points_delta(3, -4).is_err());
    }

    #[test]
    fn test_points_overflow_rejected() {
        assert!(apply_points_delta(i32::MAX, 1).is_err());
    }
}
