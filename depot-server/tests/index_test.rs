//! Index service properties over a populated store, plus snapshot reload.

use depot_server::{
    ArtifactCoordinates, ArtifactEntry, ArtifactIndexService, CoordinateFilter,
    MemoryArtifactStore, Paging, ScopePair,
};
use std::sync::Arc;
use tempfile::TempDir;

const PACKAGES: &[(&str, &str, &str)] = &[
    ("npm-group", "lodash", "4.17.21"),
    ("npm-group", "lodash", "4.17.20"),
    ("npm-group", "lodash-es", "4.17.21"),
    ("npm-group", "Lodash.Merge", "4.6.2"),
    ("npm-group", "underscore", "1.13.6"),
    ("npm-group", "react", "18.2.0"),
    ("npm-proxy", "lodash", "3.10.1"),
    ("npm-proxy", "react-dom", "18.2.0"),
    ("npm-hosted", "internal-utils", "0.4.0"),
];

async fn populate(index: &ArtifactIndexService) {
    for (repository, name, version) in PACKAGES {
        let scope = ScopePair::new("storage0", *repository).unwrap();
        let coordinates = ArtifactCoordinates::new()
            .with("name", *name)
            .with("version", *version);
        index
            .save(ArtifactEntry::new(
                &scope,
                format!("{name}/-/{name}-{version}.tgz"),
                coordinates,
            ))
            .await
            .unwrap();
    }
}

fn scopes(repositories: &[&str]) -> Vec<ScopePair> {
    repositories
        .iter()
        .map(|r| ScopePair::new("storage0", *r).unwrap())
        .collect()
}

async fn service() -> ArtifactIndexService {
    let index = ArtifactIndexService::new(Arc::new(MemoryArtifactStore::new()));
    populate(&index).await;
    index
}

#[tokio::test]
async fn test_count_agrees_with_unpaged_list() {
    let index = service().await;
    let scope_sets = [
        scopes(&["npm-group"]),
        scopes(&["npm-group", "npm-proxy"]),
        scopes(&["npm-proxy", "npm-hosted", "npm-missing"]),
    ];
    let filters = [
        CoordinateFilter::new(),
        CoordinateFilter::new().with("name", "lodash"),
        CoordinateFilter::new().with("name", "REACT"),
        CoordinateFilter::new()
            .with("name", "lodash")
            .with("version", "4.17"),
        CoordinateFilter::new().with_optional("version", None),
        CoordinateFilter::new().with("classifier", "x"),
    ];

    for scopes in &scope_sets {
        for filter in &filters {
            for strict in [true, false] {
                let listed = index
                    .list_artifacts(scopes, filter, Paging::unbounded(), None, strict)
                    .await
                    .unwrap();
                let counted = index.count_artifacts(scopes, filter, strict).await.unwrap();
                assert_eq!(
                    counted,
                    listed.len() as u64,
                    "scopes {scopes:?} filter {filter:?} strict {strict}"
                );
                for entry in &listed {
                    assert!(scopes
                        .iter()
                        .any(|s| s.storage_id() == entry.storage_id
                            && s.repository_id() == entry.repository_id));
                }
            }
        }
    }
}

#[tokio::test]
async fn test_pages_are_contiguous_windows() {
    let index = service().await;
    let scopes = scopes(&["npm-group", "npm-proxy", "npm-hosted"]);
    let filter = CoordinateFilter::new();

    for order_by in [Some("name"), Some("version"), Some("uuid"), None] {
        let full = index
            .list_artifacts(&scopes, &filter, Paging::unbounded(), order_by, false)
            .await
            .unwrap();
        assert_eq!(full.len(), PACKAGES.len());

        let mut stitched = Vec::new();
        for skip in (0..full.len()).step_by(4) {
            let page = index
                .list_artifacts(&scopes, &filter, Paging::new(skip, 4), order_by, false)
                .await
                .unwrap();
            stitched.extend(page);
        }
        let uuids = |entries: &[ArtifactEntry]| entries.iter().map(|e| e.uuid).collect::<Vec<_>>();
        assert_eq!(uuids(&stitched), uuids(&full), "order_by {order_by:?}");

        let again = index
            .list_artifacts(&scopes, &filter, Paging::unbounded(), order_by, false)
            .await
            .unwrap();
        assert_eq!(uuids(&again), uuids(&full));
    }
}

#[tokio::test]
async fn test_exists_agrees_with_find_one() {
    let index = service().await;
    let probes = [
        ("npm-group", "lodash/-/lodash-4.17.21.tgz"),
        ("npm-proxy", "lodash/-/lodash-4.17.21.tgz"),
        ("npm-proxy", "lodash/-/lodash-3.10.1.tgz"),
        ("npm-hosted", "missing/-/missing-1.0.0.tgz"),
    ];
    for (repository, path) in probes {
        let exists = index.exists("storage0", repository, path).await.unwrap();
        let found = index.find_one("storage0", repository, path).await.unwrap();
        assert_eq!(exists, found.is_some(), "{repository} {path}");
        if let Some(entry) = found {
            assert_eq!(entry.path, path);
            assert_eq!(entry.repository_id, repository);
        }
    }
}

#[tokio::test]
async fn test_distinct_coordinates_collapse_duplicates_across_repositories() {
    let index = service().await;
    let scope = ScopePair::new("storage0", "npm-hosted").unwrap();
    index
        .save(ArtifactEntry::new(
            &scope,
            "mirror/lodash-4.17.21.tgz",
            ArtifactCoordinates::new()
                .with("name", "lodash")
                .with("version", "4.17.21"),
        ))
        .await
        .unwrap();

    let scopes = scopes(&["npm-group", "npm-hosted"]);
    let filter = CoordinateFilter::new().with("name", "lodash");
    assert_eq!(index.count_artifacts(&scopes, &filter, true).await.unwrap(), 3);
    assert_eq!(index.count_coordinates(&scopes, &filter, true).await.unwrap(), 2);
}

#[tokio::test]
async fn test_snapshot_round_trip_keeps_index_probe() {
    let dir = TempDir::new().unwrap();
    let snapshot = dir.path().join("index.json");

    let store = Arc::new(MemoryArtifactStore::open(&snapshot).await.unwrap());
    populate(&ArtifactIndexService::new(store.clone())).await;
    store.persist().await.unwrap();

    let reopened = Arc::new(MemoryArtifactStore::open(&snapshot).await.unwrap());
    assert_eq!(reopened.len().await, PACKAGES.len());
    let index = ArtifactIndexService::new(reopened);
    assert!(index
        .exists("storage0", "npm-proxy", "react-dom/-/react-dom-18.2.0.tgz")
        .await
        .unwrap());
    let hits = index
        .find_artifact_list("storage0", "npm-group", &CoordinateFilter::new().with("name", "LODASH"))
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
}
