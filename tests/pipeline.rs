//! End-to-end: JSON lines through detection into the relational fallback.

use std::sync::Arc;

use vehguard::config::{PipelineConfig, RelationalConfig};
use vehguard::detect::{AnomalyRuleEngine, DetectionThresholds};
use vehguard::metrics::Metrics;
use vehguard::pipeline::Pipeline;
use vehguard::sink::ResilientDualSink;
use vehguard::storage::AnomalyTable;
use vehguard::telemetry::simulate::{generate, SimulationParams};
use vehguard::telemetry::{Signal, VehicleEvent};

fn relational(dir: &tempfile::TempDir) -> RelationalConfig {
    RelationalConfig {
        path: dir.path().join("anomalies.db"),
        ..Default::default()
    }
}

fn pipeline(dir: &tempfile::TempDir, workers: usize) -> Pipeline {
    let table = AnomalyTable::open(&relational(dir)).unwrap();
    Pipeline::new(
        Arc::new(AnomalyRuleEngine::new(DetectionThresholds::default())),
        Arc::new(ResilientDualSink::new(
            None,
            Some(Box::new(table)),
            Arc::new(Metrics::new().unwrap()),
        )),
        PipelineConfig {
            workers,
            ..Default::default()
        },
    )
}

fn to_lines(events: &[VehicleEvent]) -> String {
    events
        .iter()
        .map(|e| serde_json::to_string(e).unwrap())
        .collect::<Vec<_>>()
        .join("\n")
}

#[tokio::test]
async fn test_anomalies_land_in_fallback_table() {
    let dir = tempfile::tempdir().unwrap();
    let events = vec![
        VehicleEvent::new("VIN1", 1_010, 1_000, Signal::new("speed", 10.0)),
        VehicleEvent::new("VIN1", 1_510, 1_500, Signal::new("speed", 20.0)),
        // Within 18 of the last second, 25 above the sample two seconds back.
        VehicleEvent::new("VIN1", 2_510, 2_500, Signal::new("speed", 35.0)),
        VehicleEvent::new("VIN2", 1_010, 1_000, Signal::new("LKA_EXIT", "true")),
        VehicleEvent::new("VIN2", 1_110, 1_100, Signal::new("ACC_EXIT", false)),
    ];

    let summary = pipeline(&dir, 2)
        .run(to_lines(&events).as_bytes(), std::future::pending::<()>())
        .await
        .unwrap();
    assert_eq!(summary.events, 5);
    assert_eq!(summary.anomalies, 2);
    assert_eq!(summary.persisted_fallback, 2);
    assert_eq!(summary.dropped, 0);

    let table = AnomalyTable::open(&relational(&dir)).unwrap();
    let mut rows = table.recent(10).unwrap();
    rows.sort_by(|a, b| a.vin.cmp(&b.vin));
    assert_eq!(rows.len(), 2);

    assert_eq!(rows[0].vin, "VIN1");
    assert_eq!(rows[0].anomaly_type, "SPEED_CHANGE_2S");
    assert_eq!(rows[0].severity, "MEDIUM");
    assert_eq!(rows[0].current_value, "25.0");
    assert_eq!(rows[0].threshold_value, "24.0");
    assert_eq!(rows[0].sig_timestamp, 2_500);

    assert_eq!(rows[1].vin, "VIN2");
    assert_eq!(rows[1].anomaly_type, "LKA_EXIT");
    assert_eq!(rows[1].current_value, "true");
}

#[tokio::test]
async fn test_worker_count_does_not_change_results() {
    let params = SimulationParams {
        vehicles: 6,
        events: 400,
        seed: 11,
        start_ms: 1_700_000_000_000,
        ..Default::default()
    };
    let input = to_lines(&generate(&params));

    let one = tempfile::tempdir().unwrap();
    let many = tempfile::tempdir().unwrap();
    let a = pipeline(&one, 1)
        .run(input.as_bytes(), std::future::pending::<()>())
        .await
        .unwrap();
    let b = pipeline(&many, 4)
        .run(input.as_bytes(), std::future::pending::<()>())
        .await
        .unwrap();

    assert_eq!(a, b);
    assert!(a.anomalies > 0);
    assert_eq!(a.persisted_fallback, a.anomalies);

    let count = |dir: &tempfile::TempDir| AnomalyTable::open(&relational(dir)).unwrap().count().unwrap();
    assert_eq!(count(&one), count(&many));
}
