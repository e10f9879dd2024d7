//! Paginated list responses.

use serde::Serialize;

pub const DEFAULT_PER_PAGE: usize = 20;
pub const MAX_PER_PAGE: usize = 100;

/// One page of a filtered list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T: Serialize> {
    pub items: Vec<T>,
    /// Number of matching records across all pages
    pub total: usize,
    pub page: usize,
    pub per_page: usize,
}

impl<T: Serialize> Page<T> {
    /// Slice already-filtered records. `page` is 1-based; out-of-range pages are empty.
    pub fn paginate(records: Vec<T>, page: Option<usize>, per_page: Option<usize>) -> Self {
        let page = page.unwrap_or(1).max(1);
        let per_page = per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        let total = records.len();
        let items = records
            .into_iter()
            .skip((page - 1).saturating_mul(per_page))
            .take(per_page)
            .collect();

        Self {
            items,
            total,
            page,
            per_page,
        }
    }
}
