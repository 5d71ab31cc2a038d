//! Synthetic telemetry for exercising the detector without a live fleet.
//!
//! Each simulated vehicle keeps its own clock and speed so that per-vehicle
//! event time only moves forward. Speed follows a bounded random walk with an
//! occasional abrupt jump; system signals fire with small fixed odds.

use super::{Signal, VehicleEvent, SPEED_SIGNAL};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const SYSTEM_SIGNALS: [(&str, f64); 4] = [
    ("AEB", 0.10),
    ("NOA_EXIT", 0.05),
    ("ACC_EXIT", 0.08),
    ("LKA_EXIT", 0.06),
];

#[derive(Debug, Clone)]
pub struct SimulationParams {
    pub vehicles: usize,
    pub events: usize,
    pub seed: u64,
    /// Wall-clock origin for generated timestamps (ms since epoch).
    pub start_ms: i64,
    /// Probability that a speed sample jumps by 20-30 m/s.
    pub jump_probability: f64,
    /// Share of events that carry the speed signal.
    pub speed_share: f64,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            vehicles: 5,
            events: 100,
            seed: 42,
            start_ms: chrono::Utc::now().timestamp_millis(),
            jump_probability: 0.1,
            speed_share: 0.8,
        }
    }
}

struct VehicleSim {
    vin: String,
    clock_ms: i64,
    speed: f64,
}

/// Generate `params.events` events spread across `params.vehicles` vehicles.
pub fn generate(params: &SimulationParams) -> Vec<VehicleEvent> {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut fleet: Vec<VehicleSim> = (0..params.vehicles.max(1))
        .map(|i| VehicleSim {
            vin: format!("1HGCM82633A{:06}", 123456 + i),
            clock_ms: params.start_ms,
            speed: rng.gen_range(5.0..25.0),
        })
        .collect();

    let mut events = Vec::with_capacity(params.events);
    for _ in 0..params.events {
        let idx = rng.gen_range(0..fleet.len());
        let v = &mut fleet[idx];
        v.clock_ms += rng.gen_range(200..=600);
        let event_ts = v.clock_ms;
        let ingestion_ts = event_ts + rng.gen_range(0..1000);

        let signal = if rng.gen_bool(params.speed_share.clamp(0.0, 1.0)) {
            if rng.gen_bool(params.jump_probability.clamp(0.0, 1.0)) {
                let jump = rng.gen_range(20.0..30.0);
                v.speed = if rng.gen_bool(0.5) { v.speed + jump } else { (v.speed - jump).max(0.0) };
            } else {
                v.speed = (v.speed + rng.gen_range(-1.5..1.5)).clamp(0.0, 45.0);
            }
            Signal::new(SPEED_SIGNAL, (v.speed * 100.0).round() / 100.0)
        } else {
            let (name, odds) = SYSTEM_SIGNALS[rng.gen_range(0..SYSTEM_SIGNALS.len())];
            Signal::new(name, rng.gen_bool(odds))
        };

        events.push(VehicleEvent::new(v.vin.clone(), ingestion_ts, event_ts, signal));
    }
    events
}
