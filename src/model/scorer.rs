//! Uniform scoring interface over every artifact format
//!
//! A stored model either returns a raw score array or a mapping of named
//! outputs. [`OutputSelector`] takes whichever arrives, picks the first named
//! output when there is a mapping, and hands back the first row of scores.
//! Callers only ever see [`Scorer::score`].

use std::sync::Mutex;

use burn::prelude::*;

use super::classifier::{channels_first, LeafClassifier};
use crate::utils::error::{LeafScanError, Result};

/// Anything that maps a preprocessed `[1, side, side, 3]` batch to per-class scores
pub trait Scorer: Send + Sync {
    fn score(&self, input: TensorData) -> Result<Vec<f32>>;
}

/// What a stored model returns from a forward call
#[derive(Debug, Clone)]
pub enum ModelOutput {
    /// Named output tensors, in the order the model declares them
    Named(Vec<(String, TensorData)>),
    /// A single batched score tensor
    Raw(TensorData),
}

/// A loaded model as stored, before output selection
pub trait ServingModel: Send {
    fn call(&self, input: TensorData) -> Result<ModelOutput>;
}

/// Resolves a [`ServingModel`]'s output into a plain score vector
pub struct OutputSelector<M> {
    model: Mutex<M>,
}

impl<M: ServingModel> OutputSelector<M> {
    pub fn new(model: M) -> Self {
        Self {
            model: Mutex::new(model),
        }
    }
}

impl<M: ServingModel> Scorer for OutputSelector<M> {
    fn score(&self, input: TensorData) -> Result<Vec<f32>> {
        let output = {
            let model = self
                .model
                .lock()
                .map_err(|_| LeafScanError::Inference("model lock poisoned".to_string()))?;
            model.call(input)?
        };

        let scores = match output {
            ModelOutput::Named(mut outputs) => {
                if outputs.is_empty() {
                    return Err(LeafScanError::Inference(
                        "model returned no named outputs".to_string(),
                    ));
                }
                outputs.swap_remove(0).1
            }
            ModelOutput::Raw(data) => data,
        };

        first_row(scores)
    }
}

/// First row of a `[batch, classes]` score tensor
pub fn first_row(data: TensorData) -> Result<Vec<f32>> {
    let shape = data.shape.clone();
    let values = data
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| LeafScanError::Inference(format!("unreadable model output: {:?}", e)))?;

    match shape.as_slice() {
        [batch, classes] if *batch >= 1 => Ok(values[..*classes].to_vec()),
        [classes] => Ok(values[..*classes].to_vec()),
        other => Err(LeafScanError::Inference(format!(
            "expected scores shaped [batch, classes], got {:?}",
            other
        ))),
    }
}

/// Named outputs a serving directory may declare
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Probabilities,
    Logits,
}

impl OutputKind {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "probabilities" => Some(OutputKind::Probabilities),
            "logits" => Some(OutputKind::Logits),
            _ => None,
        }
    }
}

/// A classifier whose forward call returns softmax probabilities as a raw array
pub struct ClassifierModel<B: Backend> {
    model: LeafClassifier<B>,
    device: B::Device,
}

impl<B: Backend> ClassifierModel<B> {
    pub fn new(model: LeafClassifier<B>, device: B::Device) -> Self {
        Self { model, device }
    }
}

impl<B: Backend> ServingModel for ClassifierModel<B> {
    fn call(&self, input: TensorData) -> Result<ModelOutput> {
        let images = channels_first(Tensor::<B, 4>::from_data(input, &self.device));
        let probs = self.model.forward_probabilities(images);
        Ok(ModelOutput::Raw(probs.into_data()))
    }
}

/// A classifier exported with a signature; its forward call returns named outputs
pub struct SignatureModel<B: Backend> {
    model: LeafClassifier<B>,
    outputs: Vec<(String, OutputKind)>,
    device: B::Device,
}

impl<B: Backend> SignatureModel<B> {
    pub fn new(
        model: LeafClassifier<B>,
        outputs: Vec<(String, OutputKind)>,
        device: B::Device,
    ) -> Self {
        Self {
            model,
            outputs,
            device,
        }
    }
}

impl<B: Backend> ServingModel for SignatureModel<B> {
    fn call(&self, input: TensorData) -> Result<ModelOutput> {
        let images = channels_first(Tensor::<B, 4>::from_data(input, &self.device));
        let logits = self.model.forward(images);

        let named = self
            .outputs
            .iter()
            .map(|(name, kind)| {
                let tensor = match kind {
                    OutputKind::Logits => logits.clone(),
                    OutputKind::Probabilities => burn::tensor::activation::softmax(logits.clone(), 1),
                };
                (name.clone(), tensor.into_data())
            })
            .collect();

        Ok(ModelOutput::Named(named))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ModelOutput);

    impl ServingModel for Fixed {
        fn call(&self, _input: TensorData) -> Result<ModelOutput> {
            Ok(self.0.clone())
        }
    }

    fn input() -> TensorData {
        TensorData::new(vec![0.0f32; 12], [1, 2, 2, 3])
    }

    #[test]
    fn test_raw_output_passes_through() {
        let scorer = OutputSelector::new(Fixed(ModelOutput::Raw(TensorData::new(
            vec![0.1f32, 0.7, 0.2],
            [1, 3],
        ))));
        assert_eq!(scorer.score(input()).unwrap(), vec![0.1, 0.7, 0.2]);
    }

    #[test]
    fn test_first_named_output_is_selected() {
        let scorer = OutputSelector::new(Fixed(ModelOutput::Named(vec![
            ("dense".to_string(), TensorData::new(vec![0.9f32, 0.1], [1, 2])),
            ("aux".to_string(), TensorData::new(vec![0.0f32, 1.0], [1, 2])),
        ])));
        assert_eq!(scorer.score(input()).unwrap(), vec![0.9, 0.1]);
    }

    #[test]
    fn test_empty_named_output_is_an_error() {
        let scorer = OutputSelector::new(Fixed(ModelOutput::Named(vec![])));
        assert!(matches!(
            scorer.score(input()),
            Err(LeafScanError::Inference(_))
        ));
    }

    #[test]
    fn test_first_row_of_batch() {
        let data = TensorData::new(vec![1.0f32, 2.0, 3.0, 4.0], [2, 2]);
        assert_eq!(first_row(data).unwrap(), vec![1.0, 2.0]);

        let bad = TensorData::new(vec![0.0f32; 8], [2, 2, 2]);
        assert!(first_row(bad).is_err());
    }

    #[test]
    fn test_output_kind_parse() {
        assert_eq!(OutputKind::parse("logits"), Some(OutputKind::Logits));
        assert_eq!(
            OutputKind::parse("probabilities"),
            Some(OutputKind::Probabilities)
        );
        assert_eq!(OutputKind::parse("embeddings"), None);
    }
}
