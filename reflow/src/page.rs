use crate::FetchError;

/// Where the next page starts.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum PageCursor {
    /// Page number `index` of `page_size` items.
    Offset { index: usize, page_size: usize },
    /// An opaque continuation token defined by the data source.
    Cursor { token: String, page_size: usize },
}

impl PageCursor {
    /// Page sizes below 1 are clamped to 1.
    pub fn offset(index: usize, page_size: usize) -> Self {
        PageCursor::Offset {
            index,
            page_size: page_size.max(1),
        }
    }

    pub fn cursor(token: impl Into<String>, page_size: usize) -> Self {
        PageCursor::Cursor {
            token: token.into(),
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        match self {
            PageCursor::Offset { page_size, .. } | PageCursor::Cursor { page_size, .. } => {
                (*page_size).max(1)
            }
        }
    }

    /// The cursor after a full page. Offsets move one page forward; tokens are
    /// opaque and stay where they are.
    pub fn advance(&self) -> Self {
        match self {
            PageCursor::Offset { index, page_size } => PageCursor::Offset {
                index: index + 1,
                page_size: *page_size,
            },
            PageCursor::Cursor { .. } => self.clone(),
        }
    }
}

/// One fetched page, optionally naming the cursor of the page after it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>) -> Self {
        Page { items, next: None }
    }

    pub fn with_next(items: Vec<T>, next: PageCursor) -> Self {
        Page {
            items,
            next: Some(next),
        }
    }
}

/// What a page fetch function may resolve to.
pub trait IntoPage<T> {
    fn into_page(self) -> Result<Page<T>, FetchError>;
}

impl<T, E> IntoPage<T> for Result<Vec<T>, E>
where
    E: Into<FetchError>,
{
    fn into_page(self) -> Result<Page<T>, FetchError> {
        self.map(Page::new).map_err(Into::into)
    }
}

impl<T, E> IntoPage<T> for Result<Page<T>, E>
where
    E: Into<FetchError>,
{
    fn into_page(self) -> Result<Page<T>, FetchError> {
        self.map_err(Into::into)
    }
}

/// The accumulated state of a paginated subscription.
#[derive(Debug, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PaginatedOutcome<T> {
    pub items: Vec<T>,
    pub is_loading_more: bool,
    pub has_more_pages: bool,
}

impl<T> PaginatedOutcome<T> {
    pub fn new(items: Vec<T>, is_loading_more: bool, has_more_pages: bool) -> Self {
        PaginatedOutcome {
            items,
            is_loading_more,
            has_more_pages,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> Default for PaginatedOutcome<T> {
    fn default() -> Self {
        PaginatedOutcome {
            items: Vec::new(),
            is_loading_more: false,
            has_more_pages: true,
        }
    }
}
