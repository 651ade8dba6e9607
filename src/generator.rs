//! Random QAP instance generation.
//!
//! Version 1 scatters the locations over a 100x100 plane, version 2 lays
//! them out along the two aisles of a warehouse. Distances are rounded
//! Euclidean distances in both cases.

use crate::error::{QapError, Result};
use crate::instance::QapInstance;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

const PLANE_MAX: i64 = 100;
const AISLE_DISTANCE: f64 = 20.0;

/// Generator configuration
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Number of facilities
    pub size: usize,
    /// Same number of locations as facilities
    pub square: bool,
    /// Layout version (1 or 2)
    pub version: u8,
    pub seed: u64,
    pub name: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            size: 5,
            square: true,
            version: 1,
            seed: 42,
            name: "generated".to_string(),
        }
    }
}

/// Generate an instance; the same config always yields the same instance.
pub fn generate(config: &GeneratorConfig) -> Result<QapInstance> {
    if !matches!(config.version, 1 | 2) {
        return Err(QapError::UnsupportedGeneratorVersion(config.version));
    }
    if config.size == 0 {
        return Err(QapError::MalformedInstance("instance size must be positive".to_string()));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let n = config.size;
    let m = if config.square {
        n
    } else {
        n + rng.gen_range(1..=(n / 2).max(1))
    };

    let max_flow = if config.version == 1 { 50 } else { 100 };
    let flow: Vec<Vec<i64>> = (0..n)
        .map(|f1| {
            (0..n)
                .map(|f2| if f1 == f2 { 0 } else { rng.gen_range(0..=max_flow) })
                .collect()
        })
        .collect();

    let coordinates: Vec<(f64, f64)> = match config.version {
        1 => (0..m)
            .map(|_| {
                (
                    rng.gen_range(0..=PLANE_MAX) as f64,
                    rng.gen_range(0..=PLANE_MAX) as f64,
                )
            })
            .collect(),
        _ => (0..m)
            .map(|l| {
                let (slot, aisle) = if l < m / 2 { (l, 0.0) } else { (l - m / 2, AISLE_DISTANCE) };
                (slot as f64 * AISLE_DISTANCE, aisle)
            })
            .collect(),
    };

    let distance: Vec<Vec<f64>> = coordinates
        .iter()
        .map(|&(x1, y1)| {
            coordinates
                .iter()
                .map(|&(x2, y2)| ((x1 - x2).powi(2) + (y1 - y2).powi(2)).sqrt().round())
                .collect()
        })
        .collect();

    log::info!(
        "Generated {} (v{}, seed {}): {} facilities, {} locations",
        config.name,
        config.version,
        config.seed,
        n,
        m
    );

    QapInstance::new(
        config.name.clone(),
        (1..=n).map(|i| format!("f{}", i)).collect(),
        (1..=m).map(|i| i.to_string()).collect(),
        flow,
        distance,
    )
}
