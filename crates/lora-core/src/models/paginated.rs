use serde::{Deserialize, Serialize};

/// One page of a filtered, sorted listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
}

impl<T: Clone> Paginated<T> {
    /// Slice `items` into the requested page. `page` and `page_size` below 1 are treated as 1.
    pub fn from_slice(items: &[T], page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let page_size = page_size.max(1);
        let total = items.len();
        let start = ((page - 1) * page_size).min(total);
        let end = (start + page_size).min(total);

        Self {
            items: items[start..end].to_vec(),
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size),
        }
    }
}

impl<T> Paginated<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paginated<U> {
        Paginated {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            page_size: self.page_size,
            total_pages: self.total_pages,
        }
    }
}
