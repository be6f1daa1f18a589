use std::time::Duration;

use thiserror::Error;
use tracing::info;

use crate::{
    config::ConfigError,
    normalize::{normalize_all, ShopRow},
    overpass::{fetch_elements, FetchError, Interpreter},
    query::build_query,
    store::{RowStore, StoreError},
};

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_BATCH_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub city: String,
    pub area: Option<String>,
    pub mirrors: Vec<String>,
    pub batch_size: usize,
    pub batch_pause: Duration,
}

impl SyncSettings {
    /// `city` or `city (area)`, for logs
    pub fn label(&self) -> String {
        match &self.area {
            Some(area) => format!("{} ({area})", self.city),
            None => self.city.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    NothingToInsert,
    Upserted { rows: usize, batches: usize },
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("upsert of batch {batch} failed: {source}")]
    Upsert {
        batch: usize,
        #[source]
        source: StoreError,
    },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Runs one sync: fetch, normalize, fall back to the whole city once, upsert.
pub async fn run(
    settings: &SyncSettings,
    interpreter: &impl Interpreter,
    store: &impl RowStore,
) -> Result<Outcome, SyncError> {
    info!(
        city = %settings.city,
        area = settings.area.as_deref().unwrap_or("(all)"),
        "fetching kebab places"
    );
    let mut rows = collect_rows(settings, interpreter, settings.area.as_deref()).await?;

    // an area that doesn't resolve gives zero rows, not an error
    if rows.is_empty() && settings.area.is_some() {
        info!("no rows for the area, retrying with the whole city");
        rows = collect_rows(settings, interpreter, None).await?;
    }

    if rows.is_empty() {
        info!("no rows found, nothing to insert");
        return Ok(Outcome::NothingToInsert);
    }

    info!(rows = rows.len(), "upserting");
    let batches = upsert_batches(&rows, store, settings.batch_size, settings.batch_pause).await?;

    Ok(Outcome::Upserted {
        rows: rows.len(),
        batches,
    })
}

/// Fetches and normalizes one scope. `area: None` means the whole city.
pub async fn collect_rows(
    settings: &SyncSettings,
    interpreter: &impl Interpreter,
    area: Option<&str>,
) -> Result<Vec<ShopRow>, FetchError> {
    let query = build_query(&settings.city, area);
    let elements = fetch_elements(interpreter, &settings.mirrors, &query).await?;
    let rows = normalize_all(&elements);

    info!(
        elements = elements.len(),
        rows = rows.len(),
        "normalized Overpass elements"
    );
    Ok(rows)
}

/// Writes `rows` in order, `batch_size` at a time, sleeping `pause` between batches.
/// Stops at the first rejected batch; earlier batches stay written.
pub async fn upsert_batches(
    rows: &[ShopRow],
    store: &impl RowStore,
    batch_size: usize,
    pause: Duration,
) -> Result<usize, SyncError> {
    let mut written = 0;
    let mut batches = 0;

    for (i, batch) in rows.chunks(batch_size.max(1)).enumerate() {
        if i > 0 {
            tokio::time::sleep(pause).await;
        }

        store
            .upsert(batch)
            .await
            .map_err(|source| SyncError::Upsert {
                batch: i + 1,
                source,
            })?;

        written += batch.len();
        batches += 1;
        info!(batch = i + 1, size = batch.len(), written, "batch upserted");
    }

    Ok(batches)
}

#[cfg(test)]
mod tests {
    use std::{
        collections::{BTreeMap, HashMap},
        sync::Mutex,
    };

    use mockall::predicate::*;
    use tokio::time::Instant;

    use crate::{
        overpass::{Center, ElementKind, MirrorError, MockInterpreter, OverpassResponse, RawElement},
        store::MockRowStore,
    };

    use super::*;

    fn settings(area: Option<&str>) -> SyncSettings {
        SyncSettings {
            city: "Paris".to_string(),
            area: area.map(ToString::to_string),
            mirrors: vec!["https://a.example".to_string()],
            batch_size: DEFAULT_BATCH_SIZE,
            batch_pause: DEFAULT_BATCH_PAUSE,
        }
    }

    fn node(id: u64) -> RawElement {
        RawElement {
            kind: ElementKind::Node,
            id,
            lat: Some(48.87),
            lon: Some(2.35),
            center: None,
            tags: BTreeMap::from([("name".to_string(), format!("Kebab {id}"))]),
        }
    }

    fn way_without_center(id: u64) -> RawElement {
        RawElement {
            kind: ElementKind::Way,
            id,
            lat: None,
            lon: None,
            center: None,
            tags: BTreeMap::new(),
        }
    }

    fn row(id: u64) -> ShopRow {
        ShopRow {
            id: format!("osm-n_{id}"),
            name: "Kebab".to_string(),
            address: None,
            lat: 1.0,
            lng: 2.0,
        }
    }

    fn is_area_query(query: &str) -> bool {
        query.contains(r#"["boundary"="administrative"]"#)
    }

    /// Remembers every batch and when it arrived.
    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<(Vec<String>, Instant)>>,
    }

    #[async_trait::async_trait]
    impl RowStore for RecordingStore {
        async fn upsert(&self, batch: &[ShopRow]) -> Result<(), StoreError> {
            let ids = batch.iter().map(|r| r.id.clone()).collect();
            self.batches.lock().unwrap().push((ids, Instant::now()));
            Ok(())
        }
    }

    /// Merges rows by id, like the remote table.
    #[derive(Default)]
    struct MergingStore {
        rows: Mutex<HashMap<String, ShopRow>>,
    }

    #[async_trait::async_trait]
    impl RowStore for MergingStore {
        async fn upsert(&self, batch: &[ShopRow]) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            for row in batch {
                rows.insert(row.id.clone(), row.clone());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_area_rows_are_upserted_without_fallback() {
        let mut interpreter = MockInterpreter::new();
        interpreter
            .expect_interpret()
            .withf(|_, query| is_area_query(query))
            .times(1)
            .returning(|_, _| {
                Ok(OverpassResponse {
                    elements: vec![node(1), node(2)],
                })
            });

        let store = RecordingStore::default();
        let outcome = run(&settings(Some("Paris 10e Arrondissement")), &interpreter, &store)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Upserted { rows: 2, batches: 1 });
        let batches = store.batches.lock().unwrap();
        assert_eq!(batches[0].0, vec!["osm-n_1", "osm-n_2"]);
    }

    #[tokio::test]
    async fn test_empty_area_falls_back_to_city() {
        let mut interpreter = MockInterpreter::new();
        let mut seq = mockall::Sequence::new();
        // the area answers, but nothing in it has coordinates
        interpreter
            .expect_interpret()
            .withf(|_, query| is_area_query(query))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(OverpassResponse {
                    elements: vec![way_without_center(9)],
                })
            });
        interpreter
            .expect_interpret()
            .withf(|_, query| !is_area_query(query) && query.contains(r#"area["name"="Paris"]"#))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| {
                Ok(OverpassResponse {
                    elements: vec![node(3)],
                })
            });

        let store = RecordingStore::default();
        let outcome = run(&settings(Some("Paris 10e")), &interpreter, &store)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Upserted { rows: 1, batches: 1 });
    }

    #[tokio::test]
    async fn test_empty_after_fallback_is_a_noop() {
        let mut interpreter = MockInterpreter::new();
        interpreter
            .expect_interpret()
            .times(2)
            .returning(|_, _| Ok(OverpassResponse::default()));

        let mut store = MockRowStore::new();
        store.expect_upsert().never();

        let outcome = run(&settings(Some("Nowhere")), &interpreter, &store)
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::NothingToInsert);
    }

    #[tokio::test]
    async fn test_no_fallback_without_area() {
        let mut interpreter = MockInterpreter::new();
        interpreter
            .expect_interpret()
            .times(1)
            .returning(|_, _| Ok(OverpassResponse::default()));

        let mut store = MockRowStore::new();
        store.expect_upsert().never();

        let outcome = run(&settings(None), &interpreter, &store).await.unwrap();

        assert_eq!(outcome, Outcome::NothingToInsert);
    }

    #[tokio::test]
    async fn test_fetch_failure_skips_fallback() {
        let mut interpreter = MockInterpreter::new();
        interpreter.expect_interpret().times(1).returning(|_, _| {
            Err(MirrorError::Status {
                status: 504,
                body: "Gateway Timeout".to_string(),
            })
        });

        let mut store = MockRowStore::new();
        store.expect_upsert().never();

        let err = run(&settings(Some("Paris 10e")), &interpreter, &store)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Fetch(FetchError::AllMirrorsFailed { attempts: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_in_order_with_pause() {
        let rows: Vec<ShopRow> = (0..1200).map(row).collect();
        let store = RecordingStore::default();

        let batches = upsert_batches(&rows, &store, 500, Duration::from_millis(500))
            .await
            .unwrap();

        assert_eq!(batches, 3);
        let recorded = store.batches.lock().unwrap();
        let sizes: Vec<usize> = recorded.iter().map(|(ids, _)| ids.len()).collect();
        assert_eq!(sizes, vec![500, 500, 200]);

        let ids: Vec<String> = recorded.iter().flat_map(|(ids, _)| ids.clone()).collect();
        let expected: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, expected);

        for pair in recorded.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_batch_stops_the_run() {
        let rows: Vec<ShopRow> = (0..1200).map(row).collect();
        let mut store = MockRowStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_upsert()
            .withf(|batch| batch.len() == 500 && batch[0].id == "osm-n_0")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        store
            .expect_upsert()
            .withf(|batch| batch[0].id == "osm-n_500")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| {
                Err(StoreError::Rejected {
                    status: 409,
                    body: "conflict".to_string(),
                })
            });

        let err = upsert_batches(&rows, &store, 500, DEFAULT_BATCH_PAUSE)
            .await
            .unwrap_err();

        match err {
            SyncError::Upsert {
                batch,
                source: StoreError::Rejected { status, .. },
            } => {
                assert_eq!(batch, 2);
                assert_eq!(status, 409);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_is_idempotent() {
        let mut interpreter = MockInterpreter::new();
        interpreter
            .expect_interpret()
            .with(always(), always())
            .times(2)
            .returning(|_, _| {
                let mut way = way_without_center(1);
                way.center = Some(Center { lat: 45.0, lon: 4.0 });
                Ok(OverpassResponse {
                    elements: vec![node(1), way, node(2)],
                })
            });

        let store = MergingStore::default();
        let settings = settings(None);

        run(&settings, &interpreter, &store).await.unwrap();
        let first = store.rows.lock().unwrap().clone();
        run(&settings, &interpreter, &store).await.unwrap();
        let second = store.rows.lock().unwrap().clone();

        assert_eq!(first.len(), 3);
        assert_eq!(first, second);
        assert!(second.contains_key("osm-n_1") && second.contains_key("osm-w_1"));
    }

    #[test]
    fn test_label() {
        assert_eq!(settings(None).label(), "Paris");
        assert_eq!(settings(Some("Paris 10e")).label(), "Paris (Paris 10e)");
    }
}
