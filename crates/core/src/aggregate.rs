use futures::future::join_all;
use std::cmp::Ordering;
use std::collections::HashSet;
use tracing::{debug, warn};

use crate::enumerate::DirEntry;
use crate::error::EnumerationError;
use crate::mime;
use crate::model::{DirectoryHandle, FileRecord, SortField, SortKey, SortOrder, SourceDirectory};
use crate::resolver::DirectoryResolver;

/// What happened to one source directory during a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOutcome {
    pub owner_category_id: String,
    pub handle: DirectoryHandle,
    /// Number of files found, or why the directory contributed nothing.
    pub listed: Result<usize, EnumerationError>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub files: Vec<FileRecord>,
    pub has_more: bool,
    /// Size of the full de-duplicated set the page was cut from.
    pub total: usize,
    pub outcomes: Vec<HandleOutcome>,
}

impl Page {
    fn empty(page: u32) -> Self {
        Self {
            page,
            files: Vec::new(),
            has_more: false,
            total: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn failures(&self) -> impl Iterator<Item = &EnumerationError> {
        self.outcomes.iter().filter_map(|o| o.listed.as_ref().err())
    }
}

/// Merges the files of many directories into one sorted, paginated listing.
///
/// Holds no state between calls; every page is computed from a fresh
/// enumeration of the given sources.
#[derive(Clone)]
pub struct Aggregator {
    resolver: DirectoryResolver,
    page_size: usize,
}

impl Aggregator {
    pub fn new(resolver: DirectoryResolver, page_size: usize) -> Self {
        Self {
            resolver,
            page_size: page_size.max(1),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Pages are 1-based; `0` is treated as the first page.
    pub async fn list_page(&self, sources: &[SourceDirectory], page: u32, sort: SortKey) -> Page {
        let page = page.max(1);
        if sources.is_empty() {
            return Page::empty(page);
        }

        let (files, outcomes) = self.collect_all(sources).await;
        let mut files = dedup_by_uri(files);
        sort_records(&mut files, sort);
        let total = files.len();
        let (files, has_more) = paginate(files, page, self.page_size);
        debug!(page, total, returned = files.len(), has_more, %sort, "listed page");

        Page {
            page,
            files,
            has_more,
            total,
            outcomes,
        }
    }

    /// Every file of every source, de-duplicated and sorted, without paging.
    pub async fn list_all(&self, sources: &[SourceDirectory], sort: SortKey) -> Vec<FileRecord> {
        if sources.is_empty() {
            return Vec::new();
        }
        let (files, _) = self.collect_all(sources).await;
        let mut files = dedup_by_uri(files);
        sort_records(&mut files, sort);
        files
    }

    async fn collect_all(
        &self,
        sources: &[SourceDirectory],
    ) -> (Vec<FileRecord>, Vec<HandleOutcome>) {
        // join_all keeps input order, so "first occurrence" follows source order
        let listings = join_all(sources.iter().cloned().map(|s| self.collect(s))).await;
        let mut files = Vec::new();
        let mut outcomes = Vec::with_capacity(listings.len());
        for (outcome, records) in listings {
            files.extend(records);
            outcomes.push(outcome);
        }
        (files, outcomes)
    }

    async fn collect(&self, source: SourceDirectory) -> (HandleOutcome, Vec<FileRecord>) {
        let SourceDirectory {
            owner_category_id,
            mut handle,
        } = source;

        let (listed, records) = match self.resolver.enumerate(&mut handle).await {
            Ok(entries) => {
                let records: Vec<FileRecord> = entries
                    .into_iter()
                    .filter(|e| !e.is_dir)
                    .map(|e| to_record(e, &owner_category_id))
                    .collect();
                (Ok(records.len()), records)
            }
            Err(e) => {
                warn!(uri = %handle.resource_uri, category = %owner_category_id, error = %e, "directory contributes no files");
                (Err(e), Vec::new())
            }
        };

        (
            HandleOutcome {
                owner_category_id,
                handle,
                listed,
            },
            records,
        )
    }
}

fn to_record(entry: DirEntry, owner: &str) -> FileRecord {
    let mime = mime::mime_for(&entry.name);
    FileRecord {
        path: entry.path,
        resource_uri: entry.resource_uri,
        name: entry.name,
        mime: mime.to_string(),
        mime_class: mime::classify(mime),
        size_bytes: entry.size,
        modified_at: entry.modified.unwrap_or_default(),
        owner_category_id: owner.to_string(),
    }
}

/// Keeps the first record for each `resource_uri`.
pub fn dedup_by_uri(files: impl IntoIterator<Item = FileRecord>) -> Vec<FileRecord> {
    let mut seen = HashSet::new();
    files
        .into_iter()
        .filter(|f| seen.insert(f.resource_uri.clone()))
        .collect()
}

/// Primary key from `sort`, then name, then path: a total order.
pub fn compare_records(a: &FileRecord, b: &FileRecord, sort: SortKey) -> Ordering {
    let primary = match sort.field {
        SortField::Date => a.modified_at.cmp(&b.modified_at),
        SortField::Name => a.name.cmp(&b.name),
        SortField::Type => a.mime.cmp(&b.mime),
        SortField::Size => a.size_bytes.cmp(&b.size_bytes),
    };
    let primary = match sort.order {
        SortOrder::Asc => primary,
        SortOrder::Desc => primary.reverse(),
    };
    primary
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.path.cmp(&b.path))
        .then_with(|| a.resource_uri.cmp(&b.resource_uri))
}

pub fn sort_records(files: &mut [FileRecord], sort: SortKey) {
    files.sort_by(|a, b| compare_records(a, b, sort));
}

pub fn paginate<T>(items: Vec<T>, page: u32, page_size: usize) -> (Vec<T>, bool) {
    let page_size = page_size.max(1);
    let start = (page.max(1) as usize - 1).saturating_mul(page_size);
    if start >= items.len() {
        return (Vec::new(), false);
    }
    let end = start.saturating_add(page_size).min(items.len());
    let has_more = end < items.len();
    let slice = items.into_iter().skip(start).take(end - start).collect();
    (slice, has_more)
}

/// Client-side accumulation of successive pages.
///
/// Files can appear or vanish between calls, so pages are merged by
/// `resource_uri` rather than appended blindly.
#[derive(Debug, Default, Clone)]
pub struct Listing {
    files: Vec<FileRecord>,
    seen: HashSet<String>,
    has_more: bool,
    last_page: u32,
}

impl Listing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns how many new files the page added.
    pub fn merge(&mut self, page: Page) -> usize {
        let before = self.files.len();
        for file in page.files {
            if self.seen.insert(file.resource_uri.clone()) {
                self.files.push(file);
            }
        }
        self.has_more = page.has_more;
        self.last_page = page.page;
        self.files.len() - before
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn next_page(&self) -> u32 {
        self.last_page + 1
    }

    pub fn into_files(self) -> Vec<FileRecord> {
        self.files
    }
}
