use std::sync::Arc;

use crate::metrics::Metrics;
use crate::sink::ResilientDualSink;

#[derive(Clone)]
pub struct AppState {
    pub sink: Arc<ResilientDualSink>,
    pub metrics: Arc<Metrics>,
}
