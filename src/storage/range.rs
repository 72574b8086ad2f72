//! Byte range planning for `get`.
//!
//! Only the single range form `bytes=<start>-[<end>]` is understood. Anything
//! else (suffix ranges, multiple ranges, garbage, a start past the end of the
//! object) is answered with the full content instead of an error.

use axum::http::StatusCode;

/// The byte window a read should cover, `end` inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangePlan {
    pub start: u64,
    pub end: u64,
    pub length: u64,
    pub partial: bool,
}

impl RangePlan {
    /// The whole object.
    #[must_use]
    pub const fn full(size: u64) -> Self {
        Self {
            start: 0,
            end: size.saturating_sub(1),
            length: size,
            partial: false,
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        if self.partial {
            StatusCode::PARTIAL_CONTENT
        } else {
            StatusCode::OK
        }
    }

    /// `Content-Range` value for a partial plan.
    #[must_use]
    pub fn content_range(&self, size: u64) -> Option<String> {
        self.partial
            .then(|| format!("bytes {}-{}/{}", self.start, self.end, size))
    }
}

/// Work out which bytes of an object of `size` bytes to send back.
#[must_use]
pub fn plan(range: Option<&str>, size: u64) -> RangePlan {
    range
        .and_then(|range| parse(range, size))
        .unwrap_or_else(|| RangePlan::full(size))
}

fn parse(range: &str, size: u64) -> Option<RangePlan> {
    let bounds = range.trim().strip_prefix("bytes=")?;
    if bounds.contains(',') {
        return None;
    }
    let (start, end) = bounds.split_once('-')?;
    let start: u64 = start.trim().parse().ok()?;
    let last = size.checked_sub(1)?;
    let end = match end.trim() {
        "" => last,
        end => end.parse::<u64>().ok()?.min(last),
    };
    if start > end {
        return None;
    }

    Some(RangePlan {
        start,
        end,
        length: end - start + 1,
        partial: true,
    })
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn no_range_is_full_content() {
        let plan = plan(None, 24);
        assert_eq!(plan, RangePlan::full(24));
        assert_eq!(plan.status(), StatusCode::OK);
        assert_eq!(plan.content_range(24), None);
        assert_eq!(plan.length, 24);
    }

    #[test]
    fn first_five_bytes() {
        let plan = plan(Some("bytes=0-4"), 24);
        assert_eq!(
            plan,
            RangePlan {
                start: 0,
                end: 4,
                length: 5,
                partial: true
            }
        );
        assert_eq!(plan.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(plan.content_range(24).as_deref(), Some("bytes 0-4/24"));
    }

    #[test]
    fn open_ended_range_runs_to_last_byte() {
        let plan = plan(Some("bytes=10-"), 24);
        assert_eq!((plan.start, plan.end, plan.length), (10, 23, 14));
        assert_eq!(plan.content_range(24).as_deref(), Some("bytes 10-23/24"));
    }

    #[test]
    fn end_past_object_is_clamped() {
        let plan = plan(Some("bytes=20-100"), 24);
        assert_eq!((plan.start, plan.end, plan.length), (20, 23, 4));
    }

    #[rstest]
    #[case("bytes=-500")]
    #[case("bytes=0-1,4-5")]
    #[case("items=0-4")]
    #[case("bytes=abc-4")]
    #[case("bytes=5-2")]
    #[case("bytes=24-")]
    #[case("bytes=0-x")]
    #[case("")]
    fn unsupported_forms_fall_back_to_full(#[case] range: &str) {
        assert_eq!(plan(Some(range), 24), RangePlan::full(24));
    }

    #[test]
    fn empty_object_ignores_range() {
        let plan = plan(Some("bytes=0-4"), 0);
        assert_eq!(plan, RangePlan::full(0));
        assert_eq!(plan.length, 0);
    }
}
