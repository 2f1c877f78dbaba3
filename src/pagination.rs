use serde::Serialize;

use crate::config::PAGE_SIZE;

/// Explicit pagination result: the page of items plus the metadata every
/// paginated endpoint reports.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub page_size: u32,
    pub total_count: u64,
    pub total_pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: u32, total_count: u64) -> Self {
        Page {
            items,
            page,
            page_size: PAGE_SIZE,
            total_count,
            total_pages: total_count.div_ceil(PAGE_SIZE as u64),
        }
    }
}

/// Pages are 1-based; anything below floors to 1.
pub fn clamp_page(page: u32) -> u32 {
    page.max(1)
}

/// Widened before the multiply so an attacker-supplied page number cannot
/// overflow u32.
pub fn offset(page: u32) -> u64 {
    (clamp_page(page) as u64 - 1) * PAGE_SIZE as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_metadata_rounds_up() {
        let p = Page::new(vec![1, 2, 3], 1, 11);
        assert_eq!(p.page_size, PAGE_SIZE);
        assert_eq!(p.total_pages, 3);
    }

    #[test]
    fn empty_result_has_zero_pages() {
        let p: Page<u32> = Page::new(Vec::new(), 1, 0);
        assert_eq!(p.total_count, 0);
        assert_eq!(p.total_pages, 0);
    }

    #[test]
    fn page_zero_floors_to_first() {
        assert_eq!(clamp_page(0), 1);
        assert_eq!(offset(0), 0);
        assert_eq!(offset(3), 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn huge_page_numbers_do_not_overflow() {
        assert_eq!(offset(4_000_000_000), 3_999_999_999 * PAGE_SIZE as u64);
        assert_eq!(offset(u32::MAX), (u32::MAX as u64 - 1) * PAGE_SIZE as u64);
    }
}
