//! Per-task-type earnings rates (currency units per second of execution).

use std::collections::HashMap;
use std::time::Duration;

const FALLBACK_RATE: f64 = 0.001;

#[derive(Debug, Clone)]
pub struct EarningsTable {
    rates: HashMap<String, f64>,
    fallback: f64,
}

impl Default for EarningsTable {
    fn default() -> Self {
        let rates = [
            ("image_processing", 0.001),
            ("data_analysis", 0.002),
            ("ai_inference", 0.003),
            ("video_encoding", 0.004),
            ("model_training", 0.005),
            ("hash_calculation", 0.0015),
            ("data_compression", 0.0012),
            ("compute", 0.001),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            rates,
            fallback: FALLBACK_RATE,
        }
    }
}

impl EarningsTable {
    pub fn with_rate(mut self, task_type: impl Into<String>, rate: f64) -> Self {
        self.rates.insert(task_type.into(), rate);
        self
    }

    pub fn rate_for(&self, task_type: &str) -> f64 {
        self.rates.get(task_type).copied().unwrap_or(self.fallback)
    }

    /// Rounded to 4 decimal places.
    pub fn estimate(&self, task_type: &str, elapsed: Duration) -> f64 {
        let raw = self.rate_for(task_type) * elapsed.as_secs_f64();
        (raw * 10_000.0).round() / 10_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("model_training", 0.005)]
    #[case("hash_calculation", 0.0015)]
    #[case("compute", 0.001)]
    #[case("never_heard_of_it", 0.001)]
    fn rates(#[case] task_type: &str, #[case] rate: f64) {
        assert_eq!(EarningsTable::default().rate_for(task_type), rate);
    }

    #[test]
    fn estimate_scales_with_time() {
        let table = EarningsTable::default();
        assert_eq!(table.estimate("data_analysis", Duration::from_secs(10)), 0.02);
        assert_eq!(table.estimate("compute", Duration::from_millis(0)), 0.0);
    }
}
