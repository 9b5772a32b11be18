//! Built-in demo handlers: `compute`, `hash_calculation`, `data_analysis`.
//!
//! Real workloads are plugged in by the embedding application; these exist
//! so a fresh node can serve something out of the box. Long loops yield to
//! the runtime and check the context so a timeout actually stops them.

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::handler::{Handler, HandlerContext, TaskPayload};
use super::registry::{HandlerRegistry, RegistryError};
use crate::error::HandlerError;

const COMPUTE_YIELD_EVERY: u64 = 10_000;
const HASH_YIELD_EVERY: u64 = 100;
const SAMPLE_SIZE: usize = 1_000;

/// Register all built-in handlers.
pub fn register_builtin(registry: &mut HandlerRegistry) -> Result<(), RegistryError> {
    registry.register::<ComputePayload, _>(ComputeHandler)?;
    registry.register::<HashPayload, _>(HashHandler)?;
    registry.register::<AnalysisPayload, _>(AnalysisHandler)?;
    Ok(())
}

fn sha256_hex(input: &[u8]) -> String {
    let digest = Sha256::digest(input);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComputePayload {
    #[serde(default = "default_complexity")]
    pub complexity: u64,
}

fn default_complexity() -> u64 {
    1_000_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComputeOutput {
    pub complexity: u64,
    pub result: f64,
    pub computed: bool,
    pub checksum: String,
}

impl TaskPayload for ComputePayload {
    const TYPE: &'static str = "compute";
    type Output = ComputeOutput;
}

/// Trigonometric busy loop.
pub struct ComputeHandler;

#[async_trait]
impl Handler<ComputePayload> for ComputeHandler {
    async fn handle(
        &self,
        payload: ComputePayload,
        ctx: HandlerContext,
    ) -> Result<ComputeOutput, HandlerError> {
        let mut result = 0.0_f64;
        for i in 0..payload.complexity {
            let x = i as f64;
            result += x.sqrt() * x.sin() * x.cos();
            if i % COMPUTE_YIELD_EVERY == 0 {
                ctx.checkpoint()?;
                tokio::task::yield_now().await;
            }
        }
        Ok(ComputeOutput {
            complexity: payload.complexity,
            result,
            computed: true,
            checksum: sha256_hex(result.to_string().as_bytes()),
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashPayload {
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default = "default_hash_iterations")]
    pub iterations: u64,
}

fn default_hash_iterations() -> u64 {
    1_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HashOutput {
    pub algorithm: String,
    pub iterations: u64,
    pub input: String,
    pub hash: String,
}

impl TaskPayload for HashPayload {
    const TYPE: &'static str = "hash_calculation";
    type Output = HashOutput;
}

/// Iterated SHA-256: `h0 = sha(input)`, `h(i+1) = sha(h(i) ++ i)`.
pub struct HashHandler;

#[async_trait]
impl Handler<HashPayload> for HashHandler {
    async fn handle(
        &self,
        payload: HashPayload,
        ctx: HandlerContext,
    ) -> Result<HashOutput, HandlerError> {
        let input = payload
            .input
            .unwrap_or_else(|| format!("{{\"task\":\"{}\"}}", ctx.task_id));

        let mut hash = sha256_hex(input.as_bytes());
        for i in 0..payload.iterations {
            hash = sha256_hex(format!("{hash}{i}").as_bytes());
            if i % HASH_YIELD_EVERY == 0 {
                ctx.checkpoint()?;
                tokio::task::yield_now().await;
            }
        }

        let preview: String = input.chars().take(100).collect();
        Ok(HashOutput {
            algorithm: "SHA-256".to_string(),
            iterations: payload.iterations,
            input: preview,
            hash,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisPayload {
    /// Generated (uniform 0..100) when absent.
    #[serde(default)]
    pub dataset: Option<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisOutput {
    pub count: usize,
    pub sum: f64,
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub variance: f64,
    pub min: f64,
    pub max: f64,
}

impl TaskPayload for AnalysisPayload {
    const TYPE: &'static str = "data_analysis";
    type Output = AnalysisOutput;
}

/// Descriptive statistics over a numeric dataset.
pub struct AnalysisHandler;

#[async_trait]
impl Handler<AnalysisPayload> for AnalysisHandler {
    async fn handle(
        &self,
        payload: AnalysisPayload,
        _ctx: HandlerContext,
    ) -> Result<AnalysisOutput, HandlerError> {
        let dataset = match payload.dataset {
            Some(data) => data,
            None => {
                let mut rng = rand::thread_rng();
                (0..SAMPLE_SIZE).map(|_| rng.gen_range(0.0..100.0)).collect()
            }
        };
        analyze(&dataset)
    }
}

pub fn analyze(dataset: &[f64]) -> Result<AnalysisOutput, HandlerError> {
    if dataset.is_empty() {
        return Err(HandlerError::InvalidPayload("dataset is empty".into()));
    }
    if dataset.iter().any(|v| !v.is_finite()) {
        return Err(HandlerError::InvalidPayload(
            "dataset contains non-finite values".into(),
        ));
    }

    let count = dataset.len();
    let sum: f64 = dataset.iter().sum();
    let mean = sum / count as f64;
    let variance = dataset.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;

    let mut sorted = dataset.to_vec();
    sorted.sort_by(f64::total_cmp);
    let median = sorted[count / 2];

    Ok(AnalysisOutput {
        count,
        sum,
        mean,
        median,
        std_dev: variance.sqrt(),
        variance,
        min: sorted[0],
        max: sorted[count - 1],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> HandlerContext {
        HandlerContext::new(TaskId::new("t-1"), CancellationToken::new())
    }

    #[test]
    fn analysis_statistics() {
        let out = analyze(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert_eq!(out.count, 8);
        assert_eq!(out.sum, 40.0);
        assert_eq!(out.mean, 5.0);
        assert_eq!(out.variance, 4.0);
        assert_eq!(out.std_dev, 2.0);
        assert_eq!(out.median, 5.0);
        assert_eq!(out.min, 2.0);
        assert_eq!(out.max, 9.0);
    }

    #[test]
    fn analysis_rejects_empty_dataset() {
        assert!(matches!(analyze(&[]), Err(HandlerError::InvalidPayload(_))));
    }

    #[tokio::test]
    async fn analysis_generates_sample_when_missing() {
        let out = AnalysisHandler
            .handle(AnalysisPayload { dataset: None }, ctx())
            .await
            .unwrap();
        assert_eq!(out.count, SAMPLE_SIZE);
        assert!(out.min >= 0.0 && out.max < 100.0);
    }

    #[tokio::test]
    async fn hash_is_deterministic_for_fixed_input() {
        let payload = || HashPayload {
            input: Some("hello".into()),
            iterations: 10,
        };
        let a = HashHandler.handle(payload(), ctx()).await.unwrap();
        let b = HashHandler.handle(payload(), ctx()).await.unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
        assert_eq!(a.algorithm, "SHA-256");
    }

    #[tokio::test]
    async fn zero_hash_iterations_is_plain_sha256() {
        let out = HashHandler
            .handle(
                HashPayload {
                    input: Some("abc".into()),
                    iterations: 0,
                },
                ctx(),
            )
            .await
            .unwrap();
        assert_eq!(
            out.hash,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn compute_stops_when_cancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let ctx = HandlerContext::new(TaskId::new("c"), token);
        let err = ComputeHandler
            .handle(ComputePayload { complexity: 50_000 }, ctx)
            .await
            .unwrap_err();
        assert_eq!(err, HandlerError::Cancelled);
    }

    #[tokio::test]
    async fn compute_small_run_completes() {
        let out = ComputeHandler
            .handle(ComputePayload { complexity: 100 }, ctx())
            .await
            .unwrap();
        assert!(out.computed);
        assert_eq!(out.complexity, 100);
        assert_eq!(out.checksum.len(), 64);
    }

    #[test]
    fn builtin_registration_covers_three_types() {
        let mut registry = HandlerRegistry::new();
        register_builtin(&mut registry).unwrap();
        assert_eq!(
            registry.registered_types(),
            vec!["compute", "data_analysis", "hash_calculation"]
        );
    }
}
