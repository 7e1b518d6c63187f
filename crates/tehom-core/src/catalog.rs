//! Paginated catalog of recorded audio files
//!
//! The catalog is the authority on which files exist. Adapters report
//! failures through [`CatalogError`] so callers can branch on the kind of
//! failure rather than on message text.

use async_trait::async_trait;
use chrono::Duration;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use thiserror::Error;

use crate::filename::{extract_timestamp, has_extension};
use crate::interval::{Interval, Timestamp};

/// One page request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogRequest {
    pub sensor: String,
    pub begin: Timestamp,
    pub end: Timestamp,
    pub extension: String,
    /// Most filenames wanted in the returned page
    pub page_size: usize,
    pub page_token: Option<String>,
}

/// One page of filenames
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogPage {
    pub filenames: Vec<String>,
    /// `None` once the service has no further pages
    pub next_page: Option<String>,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The service refused the parameters; the same request will fail again
    #[error("catalog rejected the request: {0}")]
    MalformedRequest(String),

    /// Worth retrying
    #[error("transient catalog failure: {0}")]
    Transient(String),

    /// The service knows nothing about the sensor or range
    #[error("catalog has no entry for {0}")]
    NotFound(String),

    #[error("catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog response could not be parsed: {0}")]
    Parse(String),
}

impl CatalogError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CatalogError::Transient(_))
    }
}

/// Read-only, paginated file catalog
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn list_page(&self, request: &CatalogRequest) -> Result<CatalogPage, CatalogError>;
}

/// Bounded retry with exponential backoff for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: std::time::Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, initial_backoff: std::time::Duration) -> Self {
        Self {
            max_retries,
            initial_backoff,
        }
    }

    pub fn none() -> Self {
        Self::new(0, std::time::Duration::ZERO)
    }

    /// Run `op`, retrying while it fails with a transient error
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, CatalogError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CatalogError>>,
    {
        let mut attempt = 0;
        let mut backoff = self.initial_backoff;
        loop {
            match op().await {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    log::warn!(
                        "Transient catalog failure (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        self.max_retries,
                        backoff,
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                other => return other,
            }
        }
    }
}

/// Page through the catalog for one sensor and range, collecting filenames
pub async fn list_all(
    catalog: &dyn Catalog,
    sensor: &str,
    range: &Interval,
    extension: &str,
    page_size: usize,
    retry: &RetryPolicy,
) -> Result<Vec<String>, CatalogError> {
    let mut request = CatalogRequest {
        sensor: sensor.to_string(),
        begin: range.lower(),
        end: range.upper(),
        extension: extension.to_string(),
        page_size,
        page_token: None,
    };

    let mut filenames = Vec::new();
    let mut pages = 0usize;
    loop {
        let page = retry.run(|| catalog.list_page(&request)).await?;
        pages += 1;
        filenames.extend(page.filenames);
        match page.next_page {
            Some(token) => request.page_token = Some(token),
            None => break,
        }
    }

    log::debug!(
        "Listed {} files for {} in {} page(s) over [{}, {})",
        filenames.len(),
        sensor,
        pages,
        range.lower(),
        range.upper()
    );
    Ok(filenames)
}

/// Manifest file read by [`ListingCatalog::load`]
#[derive(Debug, Clone, Deserialize)]
struct Manifest {
    /// Longest range the catalog accepts in one request
    #[serde(default)]
    max_range_s: Option<i64>,
    sensors: BTreeMap<String, Vec<String>>,
}

/// Catalog served from a JSON manifest of filenames per sensor.
///
/// Used for offline runs and tests. Files are returned when their nominal
/// extent overlaps the requested range; names without a parseable timestamp
/// are returned with every request so the caller decides what to do with
/// them.
#[derive(Debug, Clone)]
pub struct ListingCatalog {
    file_duration: Duration,
    max_range: Option<Duration>,
    sensors: BTreeMap<String, Vec<String>>,
}

impl ListingCatalog {
    /// `file_duration` is the nominal length of one file, the same value
    /// the certifier turns filenames into spans with
    pub fn new(sensors: BTreeMap<String, Vec<String>>, file_duration: Duration) -> Self {
        Self {
            file_duration,
            max_range: None,
            sensors,
        }
    }

    /// Reject requests spanning more than `max_range`
    pub fn with_max_range(mut self, max_range: Duration) -> Self {
        self.max_range = Some(max_range);
        self
    }

    pub fn load(path: &Path, file_duration: Duration) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest = serde_json::from_str(&content)
            .map_err(|e| CatalogError::Parse(format!("{}: {}", path.display(), e)))?;

        let mut catalog = Self::new(manifest.sensors, file_duration);
        if let Some(max) = manifest.max_range_s {
            if max <= 0 {
                return Err(CatalogError::Parse(format!(
                    "{}: max_range_s must be > 0",
                    path.display()
                )));
            }
            catalog = catalog.with_max_range(Duration::seconds(max));
        }
        Ok(catalog)
    }

    fn matches(&self, name: &str, request: &CatalogRequest) -> bool {
        if !has_extension(name, &request.extension) {
            return false;
        }
        match extract_timestamp(name) {
            Some(start) => start < request.end && start + self.file_duration > request.begin,
            None => true,
        }
    }
}

#[async_trait]
impl Catalog for ListingCatalog {
    async fn list_page(&self, request: &CatalogRequest) -> Result<CatalogPage, CatalogError> {
        if request.begin >= request.end {
            return Err(CatalogError::MalformedRequest(format!(
                "dateFrom {} is not before dateTo {}",
                request.begin, request.end
            )));
        }
        if let Some(max) = self.max_range {
            if request.end - request.begin > max {
                return Err(CatalogError::MalformedRequest(format!(
                    "requested range exceeds {} seconds",
                    max.num_seconds()
                )));
            }
        }
        if request.page_size == 0 {
            return Err(CatalogError::MalformedRequest("page size must be > 0".into()));
        }

        let files = self
            .sensors
            .get(&request.sensor)
            .ok_or_else(|| CatalogError::NotFound(request.sensor.clone()))?;

        let offset = match &request.page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| CatalogError::MalformedRequest(format!("bad page token {:?}", token)))?,
            None => 0,
        };

        let mut matching: Vec<&String> = files.iter().filter(|f| self.matches(f, request)).collect();
        matching.sort();

        let page: Vec<String> = matching
            .iter()
            .skip(offset)
            .take(request.page_size)
            .map(|s| s.to_string())
            .collect();
        let consumed = offset + page.len();
        let next_page = (consumed < matching.len()).then(|| consumed.to_string());

        Ok(CatalogPage {
            filenames: page,
            next_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn h(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2016, 1, 1, hour, 0, 0).unwrap()
    }

    fn catalog() -> ListingCatalog {
        let names = (0..12)
            .map(|i| format!("H1_20160101T{:02}0000.000Z.mp3", i))
            .chain(["H1_20160101T010000.000Z.wav".to_string(), "H1_garbage.mp3".to_string()])
            .collect();
        ListingCatalog::new(BTreeMap::from([("H1".to_string(), names)]), Duration::minutes(5))
    }

    /// Counts pages served by the wrapped catalog
    struct Counting {
        inner: ListingCatalog,
        pages: AtomicU32,
    }

    #[async_trait]
    impl Catalog for Counting {
        async fn list_page(&self, request: &CatalogRequest) -> Result<CatalogPage, CatalogError> {
            self.pages.fetch_add(1, Ordering::SeqCst);
            self.inner.list_page(request).await
        }
    }

    #[tokio::test]
    async fn test_pagination_collects_everything() {
        let c = catalog();
        let range = Interval::new(h(0), h(12)).unwrap();
        let files = list_all(&c, "H1", &range, "mp3", 3, &RetryPolicy::none()).await.unwrap();
        // 12 hourly files plus the unparseable one, no wav
        assert_eq!(files.len(), 13);
        assert!(files.iter().all(|f| f.ends_with(".mp3")));
    }

    #[tokio::test]
    async fn test_requested_page_size_drives_pagination() {
        let range = Interval::new(h(0), h(12)).unwrap();
        for (page_size, pages) in [(1, 13), (5, 3), (100, 1)] {
            let c = Counting {
                inner: catalog(),
                pages: AtomicU32::new(0),
            };
            let files = list_all(&c, "H1", &range, "mp3", page_size, &RetryPolicy::none())
                .await
                .unwrap();
            assert_eq!(files.len(), 13);
            assert_eq!(c.pages.load(Ordering::SeqCst), pages, "page size {}", page_size);
        }
    }

    #[tokio::test]
    async fn test_file_duration_drives_range_filter() {
        let names = vec!["H1_20160101T000000.000Z.mp3".to_string()];
        let range = Interval::new(h(0) + Duration::minutes(10), h(1)).unwrap();

        let short = ListingCatalog::new(BTreeMap::from([("H1".to_string(), names.clone())]), Duration::minutes(5));
        assert!(list_all(&short, "H1", &range, "mp3", 10, &RetryPolicy::none())
            .await
            .unwrap()
            .is_empty());

        let long = ListingCatalog::new(BTreeMap::from([("H1".to_string(), names)]), Duration::minutes(15));
        assert_eq!(
            list_all(&long, "H1", &range, "mp3", 10, &RetryPolicy::none()).await.unwrap().len(),
            1
        );
    }

    #[test]
    fn test_load_manifest() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("catalog.json");
        std::fs::write(
            &path,
            r#"{"max_range_s": 86400, "sensors": {"H1": ["H1_20160101T000000.000Z.mp3"]}}"#,
        )
        .unwrap();
        let c = ListingCatalog::load(&path, Duration::minutes(5)).unwrap();
        assert_eq!(c.max_range, Some(Duration::days(1)));
        assert_eq!(c.sensors["H1"].len(), 1);
    }

    #[test]
    fn test_load_errors_are_typed() {
        let dir = tempfile::TempDir::new().unwrap();
        let missing = ListingCatalog::load(&dir.path().join("absent.json"), Duration::minutes(5));
        assert!(matches!(missing, Err(CatalogError::Io(_))));

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ListingCatalog::load(&path, Duration::minutes(5)),
            Err(CatalogError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_range_filter_includes_straddling_file() {
        let c = catalog();
        let begin = h(3) + Duration::minutes(2);
        let range = Interval::new(begin, h(5)).unwrap();
        let files = list_all(&c, "H1", &range, "mp3", 100, &RetryPolicy::none()).await.unwrap();
        assert!(files.contains(&"H1_20160101T030000.000Z.mp3".to_string()));
        assert!(files.contains(&"H1_20160101T040000.000Z.mp3".to_string()));
        assert!(!files.contains(&"H1_20160101T050000.000Z.mp3".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_sensor_and_long_range() {
        let c = catalog();
        let range = Interval::new(h(0), h(12)).unwrap();
        assert!(matches!(
            list_all(&c, "H2", &range, "mp3", 100, &RetryPolicy::none()).await,
            Err(CatalogError::NotFound(_))
        ));

        let c = c.with_max_range(Duration::hours(1));
        assert!(matches!(
            list_all(&c, "H1", &range, "mp3", 100, &RetryPolicy::none()).await,
            Err(CatalogError::MalformedRequest(_))
        ));
    }

    struct Flaky {
        failures: AtomicU32,
    }

    #[async_trait]
    impl Catalog for Flaky {
        async fn list_page(&self, _request: &CatalogRequest) -> Result<CatalogPage, CatalogError> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(CatalogError::Transient("503".into()));
            }
            Ok(CatalogPage {
                filenames: vec!["H1_20160101T000000.000Z.mp3".into()],
                next_page: None,
            })
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let flaky = Flaky { failures: AtomicU32::new(2) };
        let retry = RetryPolicy::new(2, std::time::Duration::from_millis(1));
        let range = Interval::new(h(0), h(1)).unwrap();
        let files = list_all(&flaky, "H1", &range, "mp3", 100, &retry).await.unwrap();
        assert_eq!(files.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up() {
        let flaky = Flaky { failures: AtomicU32::new(3) };
        let retry = RetryPolicy::new(2, std::time::Duration::from_millis(1));
        let range = Interval::new(h(0), h(1)).unwrap();
        let result = list_all(&flaky, "H1", &range, "mp3", 100, &retry).await;
        assert!(matches!(result, Err(CatalogError::Transient(_))));
    }
}
