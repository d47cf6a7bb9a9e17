//! Burn Dataset Integration
//!
//! Decoded training items and the batcher that stacks them into tensors.
//! Items are stored channels-last exactly as preprocessing produces them;
//! the batcher reorders to the `[N, C, H, W]` layout the convolutions expect.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::warn;

use super::loader::ImageSample;
use super::preprocess::{image_to_hwc, load_image, CHANNELS};
use crate::model::classifier::channels_first;

/// A single decoded image ready for Burn
#[derive(Clone, Debug)]
pub struct LeafItem {
    /// Image data as flattened HWC float array `[H * W * 3]`, values in [0, 1]
    pub image: Vec<f32>,
    /// Class label
    pub label: usize,
}

impl LeafItem {
    pub fn from_sample(sample: &ImageSample, image_size: usize) -> crate::Result<Self> {
        let image = load_image(&sample.path)?;
        Ok(Self {
            image: image_to_hwc(image, image_size),
            label: sample.label,
        })
    }
}

/// Training images decoded on demand
///
/// Only paths are held by default; [`LeafImageDataset::cached`] decodes
/// everything up front for small datasets that fit in memory.
#[derive(Debug, Clone)]
pub struct LeafImageDataset {
    samples: Vec<ImageSample>,
    image_size: usize,
    cached_items: Option<Vec<LeafItem>>,
}

impl LeafImageDataset {
    /// Keep samples whose image header reads; pixels are decoded in `get`
    pub fn new(samples: &[ImageSample], image_size: usize) -> Self {
        let samples = samples
            .iter()
            .filter(|sample| match image::image_dimensions(&sample.path) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Skipping {}: {}", sample.path.display(), e);
                    false
                }
            })
            .cloned()
            .collect();

        Self {
            samples,
            image_size,
            cached_items: None,
        }
    }

    /// Decode every sample up front; unreadable files are skipped with a warning
    pub fn cached(samples: &[ImageSample], image_size: usize) -> Self {
        let pb = ProgressBar::new(samples.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("  {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );

        let mut kept = Vec::with_capacity(samples.len());
        let mut items = Vec::with_capacity(samples.len());
        for sample in samples {
            match LeafItem::from_sample(sample, image_size) {
                Ok(item) => {
                    kept.push(sample.clone());
                    items.push(item);
                }
                Err(e) => warn!("Skipping {}: {}", sample.path.display(), e),
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        Self {
            samples: kept,
            image_size,
            cached_items: Some(items),
        }
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    pub fn is_cached(&self) -> bool {
        self.cached_items.is_some()
    }
}

impl Dataset<LeafItem> for LeafImageDataset {
    fn get(&self, index: usize) -> Option<LeafItem> {
        if let Some(cached) = &self.cached_items {
            return cached.get(index).cloned();
        }

        let sample = self.samples.get(index)?;
        match LeafItem::from_sample(sample, self.image_size) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Skipping {}: {}", sample.path.display(), e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images for training
#[derive(Clone, Debug)]
pub struct LeafBatch<B: Backend> {
    /// Images with shape `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// Labels with shape `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Batcher for training and validation batches
#[derive(Clone, Debug)]
pub struct LeafBatcher {
    image_size: usize,
}

impl LeafBatcher {
    pub fn new(image_size: usize) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, LeafItem, LeafBatch<B>> for LeafBatcher {
    fn batch(&self, items: Vec<LeafItem>, device: &B::Device) -> LeafBatch<B> {
        let batch_size = items.len();
        let side = self.image_size;

        let images_data: Vec<f32> = items.iter().flat_map(|item| item.image.iter().copied()).collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, side, side, CHANNELS]),
            device,
        );

        let targets_data: Vec<i64> = items.iter().map(|item| item.label as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LeafBatch {
            images: channels_first(images),
            targets,
        }
    }
}
