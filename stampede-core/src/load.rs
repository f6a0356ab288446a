//! Percentage/RPS conversion and agent utilization scoring.
//!
//! Conversions use ceiling arithmetic so a round-trip never lands below
//! the requested load.

const WEIGHT_CPU: f64 = 0.35;
const WEIGHT_MEM: f64 = 0.60;
const WEIGHT_PORTS: f64 = 0.05;

/// RPS corresponding to `pct` percent of `target`, rounded up.
pub fn rps_from_percent(pct: i32, target: i64) -> i64 {
    if pct <= 0 || target <= 0 {
        return 0;
    }
    (target * pct as i64 + 99) / 100
}

/// Percentage of `target` that `rps` represents, rounded up.
pub fn percent_from_rps(rps: i64, target: i64) -> i32 {
    if rps <= 0 || target <= 0 {
        return 0;
    }
    ((rps * 100 + target - 1) / target) as i32
}

/// Weighted utilization score of an agent, 0..=100 scaled inputs.
pub fn total_loading(cpu_used: i32, mem_used: i32, ports_used: i32) -> i16 {
    let score =
        f64::from(cpu_used) * WEIGHT_CPU + f64::from(mem_used) * WEIGHT_MEM + f64::from(ports_used) * WEIGHT_PORTS;
    score.round() as i16
}
