use serde::{Deserialize, Serialize};

const MAX_PER_PAGE: u32 = 100;

/// `?page=&per_page=` query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageQuery {
    /// Clamp to page >= 1 and 1 <= per_page <= 100.
    pub fn resolve(&self, default_per_page: u32) -> PageRequest {
        PageRequest {
            page: self.page.unwrap_or(1).max(1),
            per_page: self
                .per_page
                .unwrap_or(default_per_page)
                .clamp(1, MAX_PER_PAGE),
        }
    }
}

impl PageRequest {
    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }
}

/// Pagination block returned next to every paged list.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub pages: u32,
    pub per_page: u32,
    pub total: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

impl Pagination {
    pub fn new(req: PageRequest, total: i64) -> Self {
        let per_page = i64::from(req.per_page);
        let pages = ((total.max(0) + per_page - 1) / per_page) as u32;
        Pagination {
            page: req.page,
            pages,
            per_page: req.per_page,
            total,
            has_next: req.page < pages,
            has_prev: req.page > 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_clamps_bounds() {
        let req = PageQuery { page: Some(0), per_page: Some(500) }.resolve(10);
        assert_eq!(req, PageRequest { page: 1, per_page: 100 });
        assert_eq!(PageQuery::default().resolve(20).per_page, 20);
    }

    #[test]
    fn pagination_counts_pages() {
        let req = PageRequest { page: 2, per_page: 10 };
        assert_eq!(req.offset(), 10);

        let p = Pagination::new(req, 25);
        assert_eq!(p.pages, 3);
        assert!(p.has_next);
        assert!(p.has_prev);

        let empty = Pagination::new(PageRequest { page: 1, per_page: 10 }, 0);
        assert_eq!(empty.pages, 0);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);
    }
}
