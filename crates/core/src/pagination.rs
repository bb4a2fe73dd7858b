//! Stable pages over a feature collection.
//!
//! Pages are borrowed slices of the collection in its stored order: page `i`
//! of size `p` is `[i * p, min((i + 1) * p, total))`. Nothing is copied or
//! reordered, and the same request always yields the same slice.

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::model::{Feature, FeatureCollection};

/// A page to read: zero-based index and positive size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page_index: usize,
    pub page_size: usize,
}

impl PageRequest {
    /// # Errors
    ///
    /// Returns `Error::Validation` if `page_size` is 0.
    pub fn new(page_index: usize, page_size: usize) -> Result<Self, Error> {
        if page_size == 0 {
            return Err(Error::Validation("page size must be greater than 0".into()));
        }
        Ok(Self { page_index, page_size })
    }

    /// First page at `page_size`.
    pub fn first(page_size: usize) -> Result<Self, Error> {
        Self::new(0, page_size)
    }
}

/// One page of a collection.
///
/// Ordinals are 1-based for display; an empty collection yields a single
/// empty page with both ordinals 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageResult<'a> {
    pub features: &'a [Feature],
    pub page_index: usize,
    pub page_size: usize,
    pub total_count: usize,
    pub page_count: usize,
    pub first_ordinal: usize,
    pub last_ordinal: usize,
}

impl PageResult<'_> {
    pub fn has_previous(&self) -> bool {
        self.page_index > 0
    }

    pub fn has_next(&self) -> bool {
        self.page_index + 1 < self.page_count
    }
}

/// `ceil(total / page_size)`, never less than 1.
pub fn page_count(total_count: usize, page_size: usize) -> usize {
    total_count.div_ceil(page_size).max(1)
}

/// Slice page `page_index` of `page_size` features out of `collection`.
///
/// # Errors
///
/// - `Error::Validation` if `page_size` is 0
/// - `Error::Range` if `page_index >= page_count`; out-of-range indexes are
///   never clamped here, that is the caller's decision
pub fn get_page(collection: &FeatureCollection, page_index: usize, page_size: usize) -> Result<PageResult<'_>, Error> {
    if page_size == 0 {
        return Err(Error::Validation("page size must be greater than 0".into()));
    }

    let total_count = collection.len();
    let page_count = page_count(total_count, page_size);
    if page_index >= page_count {
        return Err(Error::Range { requested: page_index, valid_range: 0..=page_count - 1 });
    }

    let start = page_index.saturating_mul(page_size).min(total_count);
    let end = start.saturating_add(page_size).min(total_count);
    let (first_ordinal, last_ordinal) = if start == end { (0, 0) } else { (start + 1, end) };

    Ok(PageResult {
        features: &collection.features()[start..end],
        page_index,
        page_size,
        total_count,
        page_count,
        first_ordinal,
        last_ordinal,
    })
}

/// [`get_page`] for a validated [`PageRequest`].
pub fn paginate<'a>(collection: &'a FeatureCollection, request: &PageRequest) -> Result<PageResult<'a>, Error> {
    get_page(collection, request.page_index, request.page_size)
}

/// Every page of `collection` in order.
///
/// # Errors
///
/// Returns `Error::Validation` if `page_size` is 0.
pub fn pages(collection: &FeatureCollection, page_size: usize) -> Result<Pages<'_>, Error> {
    if page_size == 0 {
        return Err(Error::Validation("page size must be greater than 0".into()));
    }
    Ok(Pages { collection, page_size, next: 0, page_count: page_count(collection.len(), page_size) })
}

/// Iterator returned by [`pages`].
#[derive(Debug, Clone)]
pub struct Pages<'a> {
    collection: &'a FeatureCollection,
    page_size: usize,
    next: usize,
    page_count: usize,
}

impl<'a> Iterator for Pages<'a> {
    type Item = PageResult<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.page_count {
            return None;
        }
        let page = get_page(self.collection, self.next, self.page_size).ok()?;
        self.next += 1;
        Some(page)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.page_count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Pages<'_> {}
