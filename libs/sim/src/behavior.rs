//! Wire-level behavior records for the server and the network, and the
//! `CurveFn` triples built from them.
//!
//! Both behaviors share the same shape: a horizon `to` (seconds, the shared
//! x-axis span for every curve in the record), a pair of y-axis bounds for a
//! "range" quantity sampled as `N(mu, sigma)` at each elapsed time, and a
//! bare `[0, 1]`-bounded probability curve.

use serde::{Deserialize, Serialize};
use sim_curve::{BehaviorPoint, Bounds, CurveFn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSettings {
    pub max_concurrent_requests: usize,
    pub max_memory_mb: f64,
    pub max_queue_size: usize,
    pub memory_leak_rate_mb_per_sec: f64,
    pub memory_per_request_mb: f64,
    pub gc_pause_interval_sec: f64,
    pub gc_pause_duration_ms: f64,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 10,
            max_memory_mb: 512.0,
            max_queue_size: 50,
            memory_leak_rate_mb_per_sec: 0.0,
            memory_per_request_mb: 1.0,
            gc_pause_interval_sec: 30.0,
            gc_pause_duration_ms: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerBehavior {
    /// Curve horizon in seconds; shared x-axis span for `errors`/`rt_min`/`rt_max`.
    pub to: f64,
    pub rt_from: f64,
    pub rt_to: f64,
    pub errors: Vec<BehaviorPoint>,
    pub rt_min: Vec<BehaviorPoint>,
    pub rt_max: Vec<BehaviorPoint>,
    pub resource_management_enabled: bool,
    pub resource_settings: ResourceSettings,
}

impl Default for ServerBehavior {
    fn default() -> Self {
        Self {
            to: 60.0,
            rt_from: 0.0,
            rt_to: 100.0,
            errors: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
            rt_min: vec![BehaviorPoint::curve(0.0, 0.2), BehaviorPoint::curve(1.0, 0.2)],
            rt_max: vec![BehaviorPoint::curve(0.0, 0.4), BehaviorPoint::curve(1.0, 0.4)],
            resource_management_enabled: false,
            resource_settings: ResourceSettings::default(),
        }
    }
}

/// The three curves derived from a [`ServerBehavior`], evaluated at
/// elapsed-milliseconds-since-behavior-start.
#[derive(Debug, Clone)]
pub struct ServerCurves {
    pub rt_min: CurveFn,
    pub rt_max: CurveFn,
    pub error_rate: CurveFn,
}

impl ServerBehavior {
    pub fn build_curves(&self) -> ServerCurves {
        let horizon_ms = self.to * 1000.0;
        let rt_bounds = Bounds { min_x: 0.0, max_x: horizon_ms, min_y: self.rt_from, max_y: self.rt_to };
        let prob_bounds = Bounds { min_x: 0.0, max_x: horizon_ms, min_y: 0.0, max_y: 1.0 };
        ServerCurves {
            rt_min: CurveFn::new(rt_bounds, self.rt_min.clone()),
            rt_max: CurveFn::new(rt_bounds, self.rt_max.clone()),
            error_rate: CurveFn::new(prob_bounds, self.errors.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkBehavior {
    pub to: f64,
    pub lat_from: f64,
    pub lat_to: f64,
    pub drop_rate: Vec<BehaviorPoint>,
    pub lat_min: Vec<BehaviorPoint>,
    pub lat_max: Vec<BehaviorPoint>,
}

impl Default for NetworkBehavior {
    fn default() -> Self {
        Self {
            to: 60.0,
            lat_from: 1.0,
            lat_to: 5.0,
            drop_rate: vec![BehaviorPoint::curve(0.0, 0.0), BehaviorPoint::curve(1.0, 0.0)],
            lat_min: vec![BehaviorPoint::curve(0.0, 1.0), BehaviorPoint::curve(1.0, 1.0)],
            lat_max: vec![BehaviorPoint::curve(0.0, 5.0), BehaviorPoint::curve(1.0, 5.0)],
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkCurves {
    pub lat_min: CurveFn,
    pub lat_max: CurveFn,
    pub drop_rate: CurveFn,
}

impl NetworkBehavior {
    pub fn build_curves(&self) -> NetworkCurves {
        let horizon_ms = self.to * 1000.0;
        let lat_bounds = Bounds { min_x: 0.0, max_x: horizon_ms, min_y: self.lat_from, max_y: self.lat_to };
        let prob_bounds = Bounds { min_x: 0.0, max_x: horizon_ms, min_y: 0.0, max_y: 1.0 };
        NetworkCurves {
            lat_min: CurveFn::new(lat_bounds, self.lat_min.clone()),
            lat_max: CurveFn::new(lat_bounds, self.lat_max.clone()),
            drop_rate: CurveFn::new(prob_bounds, self.drop_rate.clone()),
        }
    }
}
