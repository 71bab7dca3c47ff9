//! Fish search parameters and keyset pagination.
//!
//! Raw query parameters are normalized into [`FishSearchParams`] before they
//! reach the query layer. Pages are ordered by ascending fish id; the cursor is
//! the id of the last row on the previous page, and the query layer fetches
//! `per_page + 1` rows so [`FishSearchPage::from_lookahead`] can tell whether
//! another page exists without counting.

use crate::catalog::FishId;
use serde::{Deserialize, Serialize};
use std::num::IntErrorKind;
use thiserror::Error;

/// Maximum length of the free-text filter, after whitespace collapsing.
pub const MAX_TEXT_LEN: usize = 100;
/// Maximum length of tribe/location/method/category filters.
pub const MAX_FILTER_LEN: usize = 50;
/// Smallest page size a caller can get.
pub const MIN_PER_PAGE: u32 = 1;
/// Default page size when none is configured.
pub const DEFAULT_PER_PAGE: u32 = 20;
/// Default upper bound on page size.
pub const DEFAULT_MAX_PER_PAGE: u32 = 100;

/// Search parameter errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("search text must be at most {max} characters")]
    TextTooLong { max: usize },

    #[error("{field} filter must be at most {max} characters")]
    FilterTooLong { field: &'static str, max: usize },

    #[error("invalid cursor")]
    InvalidCursor,

    #[error("per_page must be an integer")]
    InvalidPerPage,
}

/// Page size bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchLimits {
    pub default_per_page: u32,
    pub max_per_page: u32,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            default_per_page: DEFAULT_PER_PAGE,
            max_per_page: DEFAULT_MAX_PER_PAGE,
        }
    }
}

/// Raw search query parameters as received on `GET /v1/fish`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FishSearchRequest {
    /// Free text matched against name, scientific name and common name.
    pub q: Option<String>,
    pub tribe: Option<String>,
    pub location: Option<String>,
    /// Capture method.
    pub method: Option<String>,
    /// Food/taboo category of a tribal classification.
    pub category: Option<String>,
    /// Cursor: id of the last fish on the previous page.
    pub last_id: Option<String>,
    pub per_page: Option<String>,
}

/// Normalized search parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FishSearchParams {
    pub text: Option<String>,
    pub tribe: Option<String>,
    pub location: Option<String>,
    pub method: Option<String>,
    pub category: Option<String>,
    pub cursor: Option<FishId>,
    pub per_page: u32,
}

impl FishSearchRequest {
    /// Validate and normalize the raw parameters.
    pub fn normalize(&self, limits: &SearchLimits) -> Result<FishSearchParams, SearchError> {
        Ok(FishSearchParams {
            text: normalize_text(self.q.as_deref())?,
            tribe: normalize_filter("tribe", self.tribe.as_deref())?,
            location: normalize_filter("location", self.location.as_deref())?,
            method: normalize_filter("method", self.method.as_deref())?,
            category: normalize_filter("category", self.category.as_deref())?,
            cursor: parse_cursor(self.last_id.as_deref())?,
            per_page: parse_per_page(self.per_page.as_deref(), limits)?,
        })
    }
}

impl FishSearchParams {
    /// First page with no filters.
    pub fn first_page(per_page: u32) -> Self {
        Self {
            text: None,
            tribe: None,
            location: None,
            method: None,
            category: None,
            cursor: None,
            per_page,
        }
    }

    /// Number of rows the query layer should fetch (one extra as lookahead).
    pub fn fetch_limit(&self) -> u32 {
        self.per_page.saturating_add(1)
    }
}

fn normalize_text(value: Option<&str>) -> Result<Option<String>, SearchError> {
    let Some(value) = value else {
        return Ok(None);
    };
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return Ok(None);
    }
    if collapsed.chars().count() > MAX_TEXT_LEN {
        return Err(SearchError::TextTooLong { max: MAX_TEXT_LEN });
    }
    Ok(Some(collapsed))
}

fn normalize_filter(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<String>, SearchError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) if v.chars().count() > MAX_FILTER_LEN => Err(SearchError::FilterTooLong {
            field,
            max: MAX_FILTER_LEN,
        }),
        Some(v) => Ok(Some(v.to_string())),
    }
}

fn parse_cursor(value: Option<&str>) -> Result<Option<FishId>, SearchError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => {
            // Only plain decimal digits; "+5" and "5.0" are not cursors.
            if !v.bytes().all(|b| b.is_ascii_digit()) {
                return Err(SearchError::InvalidCursor);
            }
            let id = v.parse::<i64>().map_err(|_| SearchError::InvalidCursor)?;
            FishId::new(id).map(Some).map_err(|_| SearchError::InvalidCursor)
        }
    }
}

fn parse_per_page(value: Option<&str>, limits: &SearchLimits) -> Result<u32, SearchError> {
    let max = limits.max_per_page.max(MIN_PER_PAGE);
    let requested = match value.map(str::trim) {
        None | Some("") => return Ok(limits.default_per_page.clamp(MIN_PER_PAGE, max)),
        Some(v) => match v.parse::<i128>() {
            Ok(n) => n,
            // Still an integer, just out of range for i128.
            Err(e) if *e.kind() == IntErrorKind::PosOverflow => return Ok(max),
            Err(e) if *e.kind() == IntErrorKind::NegOverflow => return Ok(MIN_PER_PAGE),
            Err(_) => return Err(SearchError::InvalidPerPage),
        },
    };
    let clamped = requested.clamp(i128::from(MIN_PER_PAGE), i128::from(max));
    Ok(clamped as u32)
}

/// Pagination metadata returned with each page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub per_page: u32,
    pub has_more: bool,
    /// Pass back as `last_id` to fetch the next page.
    pub next_cursor: Option<FishId>,
}

/// One page of search results.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FishSearchPage<T> {
    pub items: Vec<T>,
    pub page_info: PageInfo,
}

impl<T> FishSearchPage<T> {
    /// Build a page from a lookahead fetch of up to `per_page + 1` rows.
    pub fn from_lookahead(mut rows: Vec<T>, per_page: u32, id_of: impl Fn(&T) -> FishId) -> Self {
        let per_page_len = per_page as usize;
        let has_more = rows.len() > per_page_len;
        if has_more {
            rows.truncate(per_page_len);
        }
        let next_cursor = if has_more { rows.last().map(id_of) } else { None };

        Self {
            items: rows,
            page_info: PageInfo {
                per_page,
                has_more,
                next_cursor,
            },
        }
    }

    /// Convert the items while keeping the page info.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> FishSearchPage<U> {
        FishSearchPage {
            items: self.items.into_iter().map(f).collect(),
            page_info: self.page_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> FishSearchRequest {
        FishSearchRequest::default()
    }

    #[test]
    fn test_defaults() {
        let params = request().normalize(&SearchLimits::default()).unwrap();
        assert_eq!(params, FishSearchParams::first_page(DEFAULT_PER_PAGE));
        assert_eq!(params.fetch_limit(), DEFAULT_PER_PAGE + 1);
    }

    #[test]
    fn test_text_is_collapsed() {
        let req = FishSearchRequest {
            q: Some("  ikan \t  lais\n ".to_string()),
            ..request()
        };
        let params = req.normalize(&SearchLimits::default()).unwrap();
        assert_eq!(params.text.as_deref(), Some("ikan lais"));
    }

    #[test]
    fn test_blank_text_is_absent() {
        let req = FishSearchRequest {
            q: Some("   ".to_string()),
            tribe: Some("".to_string()),
            ..request()
        };
        let params = req.normalize(&SearchLimits::default()).unwrap();
        assert_eq!(params.text, None);
        assert_eq!(params.tribe, None);
    }

    #[test]
    fn test_text_length_bound() {
        let ok = FishSearchRequest {
            q: Some("a".repeat(MAX_TEXT_LEN)),
            ..request()
        };
        assert!(ok.normalize(&SearchLimits::default()).is_ok());

        let too_long = FishSearchRequest {
            q: Some("a".repeat(MAX_TEXT_LEN + 1)),
            ..request()
        };
        assert_eq!(
            too_long.normalize(&SearchLimits::default()).unwrap_err(),
            SearchError::TextTooLong { max: MAX_TEXT_LEN }
        );
    }

    #[test]
    fn test_filter_length_bound() {
        let req = FishSearchRequest {
            location: Some(format!(" {} ", "b".repeat(MAX_FILTER_LEN + 1))),
            ..request()
        };
        assert_eq!(
            req.normalize(&SearchLimits::default()).unwrap_err(),
            SearchError::FilterTooLong {
                field: "location",
                max: MAX_FILTER_LEN
            }
        );
    }

    #[test]
    fn test_cursor_parsing() {
        let limits = SearchLimits::default();
        for (raw, expected) in [("", None), ("  ", None), ("7", Some(7)), (" 12 ", Some(12))] {
            let req = FishSearchRequest {
                last_id: Some(raw.to_string()),
                ..request()
            };
            let params = req.normalize(&limits).unwrap();
            assert_eq!(params.cursor.map(FishId::get), expected, "cursor {raw:?}");
        }

        for raw in ["0", "-1", "abc", "1.5", "+3", "99999999999999999999"] {
            let req = FishSearchRequest {
                last_id: Some(raw.to_string()),
                ..request()
            };
            assert_eq!(
                req.normalize(&limits).unwrap_err(),
                SearchError::InvalidCursor,
                "cursor {raw:?}"
            );
        }
    }

    #[test]
    fn test_per_page_clamped() {
        let limits = SearchLimits {
            default_per_page: 20,
            max_per_page: 50,
        };
        for (raw, expected) in [
            ("0", 1),
            ("-10", 1),
            ("1", 1),
            ("30", 30),
            ("51", 50),
            ("100000000000", 50),
            ("170141183460469231731687303715884105728", 50),
            ("99999999999999999999999999999999999999999", 50),
            ("-99999999999999999999999999999999999999999", 1),
        ] {
            let req = FishSearchRequest {
                per_page: Some(raw.to_string()),
                ..request()
            };
            assert_eq!(
                req.normalize(&limits).unwrap().per_page,
                expected,
                "per_page {raw:?}"
            );
        }
    }

    #[test]
    fn test_per_page_must_be_integer() {
        let req = FishSearchRequest {
            per_page: Some("ten".to_string()),
            ..request()
        };
        assert_eq!(
            req.normalize(&SearchLimits::default()).unwrap_err(),
            SearchError::InvalidPerPage
        );
    }

    #[test]
    fn test_page_from_lookahead_with_more() {
        let rows: Vec<i64> = vec![3, 5, 8, 13];
        let page = FishSearchPage::from_lookahead(rows, 3, |id| FishId::new(*id).unwrap());
        assert_eq!(page.items, vec![3, 5, 8]);
        assert!(page.page_info.has_more);
        assert_eq!(page.page_info.next_cursor.map(FishId::get), Some(8));
    }

    #[test]
    fn test_page_from_lookahead_last_page() {
        let rows: Vec<i64> = vec![21, 22];
        let page = FishSearchPage::from_lookahead(rows, 3, |id| FishId::new(*id).unwrap());
        assert_eq!(page.items.len(), 2);
        assert!(!page.page_info.has_more);
        assert_eq!(page.page_info.next_cursor, None);

        let empty: FishSearchPage<i64> =
            FishSearchPage::from_lookahead(Vec::new(), 3, |id| FishId::new(*id).unwrap());
        assert!(empty.items.is_empty());
        assert!(!empty.page_info.has_more);
    }
}
