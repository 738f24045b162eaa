//! Canonical bisection points

use crate::types::Height;

/// Bisection errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BisectionError {
    /// Heights differ by one, no point lies strictly between them
    #[error("heights {pre} and {post} are at a one-step fork")]
    OneStepFork {
        /// Predecessor height
        pre: Height,
        /// Vertex height
        post: Height,
    },
    /// Height is not above its predecessor
    #[error("height {post} is not above predecessor height {pre}")]
    InvalidRange {
        /// Predecessor height
        pre: Height,
        /// Vertex height
        post: Height,
    },
}

/// Whether two heights leave no room for a bisection
pub const fn is_one_step_fork(pre: Height, post: Height) -> bool {
    pre < post && post - pre == 1
}

/// Bisection point between a predecessor at `pre` and a vertex at `post`.
///
/// Takes the highest bit where `pre` and `post - 1` differ and rounds
/// `post - 1` down to it, so every party bisecting the same pair lands on the
/// same height.
pub fn bisection_point(pre: Height, post: Height) -> Result<Height, BisectionError> {
    if pre >= post {
        return Err(BisectionError::InvalidRange { pre, post });
    }
    if post - pre == 1 {
        return Err(BisectionError::OneStepFork { pre, post });
    }
    if post - pre == 2 {
        return Ok(pre + 1);
    }
    let last = post - 1;
    let msb = 63 - (pre ^ last).leading_zeros();
    let mask = u64::MAX << msb;
    Ok(last & mask)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_points() {
        assert_eq!(bisection_point(0, 7).unwrap(), 4);
        assert_eq!(bisection_point(0, 6).unwrap(), 4);
        assert_eq!(bisection_point(0, 4).unwrap(), 2);
        assert_eq!(bisection_point(0, 2).unwrap(), 1);
        assert_eq!(bisection_point(4, 8).unwrap(), 6);
        assert_eq!(bisection_point(4, 6).unwrap(), 5);
        assert_eq!(bisection_point(2, 4).unwrap(), 3);
        assert_eq!(bisection_point(3, 9).unwrap(), 8);
        assert_eq!(bisection_point(0, 32).unwrap(), 16);
    }

    #[test]
    fn test_one_step_fork_has_no_point() {
        assert_eq!(
            bisection_point(5, 6),
            Err(BisectionError::OneStepFork { pre: 5, post: 6 })
        );
        assert!(is_one_step_fork(5, 6));
        assert!(!is_one_step_fork(5, 7));
        assert!(!is_one_step_fork(6, 5));
    }

    #[test]
    fn test_invalid_range() {
        assert_eq!(bisection_point(6, 6), Err(BisectionError::InvalidRange { pre: 6, post: 6 }));
        assert!(bisection_point(7, 3).is_err());
    }

    #[test]
    fn test_point_strictly_between_for_all_small_pairs() {
        for pre in 0u64..64 {
            for post in (pre + 2)..130 {
                let mid = bisection_point(pre, post).unwrap();
                assert!(pre < mid && mid < post, "pre={} post={} mid={}", pre, post, mid);
                assert_eq!(bisection_point(pre, post).unwrap(), mid);
            }
        }
    }

    #[test]
    fn test_large_heights() {
        let mid = bisection_point(u64::MAX - 10, u64::MAX).unwrap();
        assert!(mid > u64::MAX - 10 && mid < u64::MAX);
        assert_eq!(bisection_point(0, u64::MAX).unwrap(), 1u64 << 63);
    }
}
