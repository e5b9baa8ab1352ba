//! Offset pagination for list endpoints.

use serde::Deserialize;
use serde_with::{DisplayFromStr, serde_as};
use utoipa::{IntoParams, ToSchema};

/// Page size when `limit` is not given.
pub const DEFAULT_LIMIT: i64 = 20;

/// Largest page a caller may request.
pub const MAX_LIMIT: i64 = 100;

/// `skip`/`limit` query parameters. Out-of-range values are clamped rather than rejected.
#[serde_as]
#[derive(Debug, Default, Clone, Copy, Deserialize, IntoParams, ToSchema)]
pub struct Pagination {
    /// Number of items to skip (default: 0)
    #[param(default = 0, minimum = 0)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub skip: Option<i64>,

    /// Maximum number of items to return (default: 20, max: 100)
    #[param(default = 20, minimum = 1, maximum = 100)]
    #[serde_as(as = "Option<DisplayFromStr>")]
    pub limit: Option<i64>,
}

impl Pagination {
    #[inline]
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    /// Clamped to `1..=MAX_LIMIT`.
    #[inline]
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    #[inline]
    pub fn params(&self) -> (i64, i64) {
        (self.skip(), self.limit())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        assert_eq!(Pagination::default().params(), (0, DEFAULT_LIMIT));
    }

    #[test]
    fn test_clamping() {
        let p = Pagination {
            skip: Some(-3),
            limit: Some(0),
        };
        assert_eq!(p.params(), (0, 1));

        let p = Pagination {
            skip: Some(40),
            limit: Some(5_000),
        };
        assert_eq!(p.params(), (40, MAX_LIMIT));
    }

    #[test]
    fn test_from_query_string() {
        let p: Pagination = serde_json::from_value(serde_json::json!({"skip": "10", "limit": "25"})).unwrap();
        assert_eq!(p.params(), (10, 25));

        let p: Pagination = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(p.params(), (0, DEFAULT_LIMIT));
    }
}
