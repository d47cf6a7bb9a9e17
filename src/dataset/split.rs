//! Seeded train/validation split
//!
//! The whole sample list is shuffled once with a ChaCha8 RNG and the tail
//! fraction becomes the validation set, so the same seed always yields the
//! same partition.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use super::loader::ImageSample;
use crate::utils::error::{LeafScanError, Result};

/// Split configuration
#[derive(Debug, Clone, Copy)]
pub struct SplitConfig {
    /// Fraction of samples held out for validation
    pub validation_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn new(validation_fraction: f64, seed: u64) -> Result<Self> {
        if !(0.0..1.0).contains(&validation_fraction) {
            return Err(LeafScanError::Config(format!(
                "Validation fraction must be in [0.0, 1.0), got {}",
                validation_fraction
            )));
        }
        Ok(Self {
            validation_fraction,
            seed,
        })
    }
}

/// Training and validation partitions
#[derive(Debug, Clone)]
pub struct TrainValSplit {
    pub train: Vec<ImageSample>,
    pub validation: Vec<ImageSample>,
}

/// Shuffle with the configured seed and cut off the validation tail
pub fn train_val_split(samples: &[ImageSample], config: &SplitConfig) -> TrainValSplit {
    let mut shuffled = samples.to_vec();
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    shuffled.shuffle(&mut rng);

    let num_val = (shuffled.len() as f64 * config.validation_fraction).round() as usize;
    let num_val = num_val.min(shuffled.len());
    let validation = shuffled.split_off(shuffled.len() - num_val);

    TrainValSplit {
        train: shuffled,
        validation,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn samples(n: usize) -> Vec<ImageSample> {
        (0..n)
            .map(|i| ImageSample {
                path: PathBuf::from(format!("img_{i}.jpg")),
                label: i % 3,
            })
            .collect()
    }

    #[test]
    fn test_eighty_twenty_split() {
        let split = train_val_split(&samples(100), &SplitConfig::default());
        assert_eq!(split.train.len(), 80);
        assert_eq!(split.validation.len(), 20);

        for s in &split.validation {
            assert!(!split.train.contains(s));
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let data = samples(50);
        let a = train_val_split(&data, &SplitConfig::default());
        let b = train_val_split(&data, &SplitConfig::default());
        assert_eq!(a.validation, b.validation);

        let c = train_val_split(&data, &SplitConfig::new(0.2, 7).unwrap());
        assert_ne!(a.validation, c.validation);
    }

    #[test]
    fn test_invalid_fraction() {
        assert!(SplitConfig::new(1.0, 42).is_err());
        assert!(SplitConfig::new(-0.1, 42).is_err());
    }
}
