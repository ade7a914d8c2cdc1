//! Search Fallback Tests
//!
//! - Index available: rows come straight from the query engine
//! - Index unavailable: ID query plus batch fetch, projected to the same shape
//! - Other query failures are not degraded

use std::sync::Arc;

use failsafe_kv::engine::{
    codes, EngineError, FaultOp, MemoryCluster, QueryEngine, StorageEngine,
};
use failsafe_kv::resilience::{
    AccessError, AccessLayer, CancelSignal, ResilienceConfig, SearchPath,
};
use serde_json::json;

fn seeded() -> Arc<MemoryCluster> {
    let cluster = Arc::new(MemoryCluster::new());
    let airports = [
        ("airport_3567", "Colorado Springs Muni", "Colorado Springs", "COS"),
        ("airport_3614", "Palm Springs Intl", "Palm Springs", "PSP"),
        ("airport_3719", "Springfield Branson Natl", "Springfield", "SGF"),
        ("airport_3959", "Abraham Lincoln Capital", "Springfield", "SPI"),
        ("airport_507", "Heathrow", "London", "LHR"),
    ];
    for (key, name, city, faa) in airports {
        cluster.seed(
            key,
            json!({"type": "airport", "airportname": name, "city": city, "faa": faa}),
        );
    }
    cluster
}

fn layer(cluster: &Arc<MemoryCluster>) -> AccessLayer {
    AccessLayer::new(
        Arc::clone(cluster) as Arc<dyn StorageEngine>,
        Arc::clone(cluster) as Arc<dyn QueryEngine>,
        ResilienceConfig::default(),
    )
    .unwrap()
}

// =============================================================================
// Indexed Path
// =============================================================================

/// Case-insensitive substring match on the airport name.
#[tokio::test(start_paused = true)]
async fn test_indexed_search() {
    let cluster = seeded();
    let access = layer(&cluster);

    let results = access
        .search()
        .search("SPRING", &CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(results.path, SearchPath::Indexed);
    assert_eq!(results.failed, 0);
    assert_eq!(results.rows.len(), 3);
    assert_eq!(cluster.calls().queries, 1);
    assert_eq!(cluster.calls().gets, 0);
}

// =============================================================================
// Degraded Path
// =============================================================================

/// Missing index: same rows, fetched by key, projected to name and city.
#[tokio::test(start_paused = true)]
async fn test_degraded_search() {
    let cluster = seeded();
    cluster.inject_query_code(codes::query::NO_INDEX_AVAILABLE, "No index available");
    let access = layer(&cluster);

    let results = access
        .search()
        .search("spring", &CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(results.path, SearchPath::Degraded);
    assert_eq!(
        results.rows,
        vec![
            json!({"airportname": "Colorado Springs Muni", "city": "Colorado Springs"}),
            json!({"airportname": "Palm Springs Intl", "city": "Palm Springs"}),
            json!({"airportname": "Springfield Branson Natl", "city": "Springfield"}),
        ]
    );
    assert_eq!(results.failed, 0);
    assert_eq!(cluster.calls().queries, 2);
    assert_eq!(cluster.calls().gets, 3);
    assert_eq!(access.metrics().snapshot().degraded_queries, 1);
}

/// Degraded rows match the indexed rows for the same term.
#[tokio::test(start_paused = true)]
async fn test_degraded_matches_indexed() {
    let cluster = seeded();
    let access = layer(&cluster);
    let cancel = CancelSignal::new();

    let indexed = access.search().search("spring", &cancel).await.unwrap();
    cluster.inject_query_code(codes::query::INDEX_NOT_FOUND, "index not found");
    let degraded = access.search().search("spring", &cancel).await.unwrap();

    assert_eq!(degraded.path, SearchPath::Degraded);
    assert_eq!(indexed.rows, degraded.rows);
}

/// IDs that neither pass can read are counted, not fatal.
#[tokio::test(start_paused = true)]
async fn test_degraded_partial_results() {
    let cluster = seeded();
    cluster.inject_query_code(codes::query::PRIMARY_INDEX_MISSING, "primary index missing");
    cluster.inject_times(FaultOp::Get, "airport_3614", EngineError::Timeout, 1);
    cluster.inject_times(FaultOp::GetReplica, "airport_3614", EngineError::Timeout, 1);
    let access = layer(&cluster);

    let results = access
        .search()
        .search("spring", &CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(results.path, SearchPath::Degraded);
    assert_eq!(results.rows.len(), 2);
    assert_eq!(results.failed, 1);
}

/// A syntax error is a query failure, not a missing index.
#[tokio::test(start_paused = true)]
async fn test_other_query_errors_not_degraded() {
    let cluster = seeded();
    cluster.inject_query_code(codes::query::SYNTAX_ERROR, "syntax error");
    let access = layer(&cluster);

    let result = access.search().search("spring", &CancelSignal::new()).await;

    assert!(matches!(
        result,
        Err(AccessError::Engine(EngineError::Backend { code: 3000, .. }))
    ));
    assert_eq!(cluster.calls().queries, 1);
    assert_eq!(access.metrics().snapshot().degraded_queries, 0);
}
