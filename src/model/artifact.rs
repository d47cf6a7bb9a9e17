//! Model artifact discovery, loading and export
//!
//! Three on-disk formats are understood, probed in this order relative to a
//! base directory:
//!
//! | format             | location                         | declares input size |
//! |--------------------|----------------------------------|---------------------|
//! | single-file bundle | `model.mpk`                      | yes                 |
//! | legacy single file | `model.bin`                      | no (224)            |
//! | serving directory  | `model/` with `signature.json`   | yes                 |
//!
//! Whatever the format, loading yields a [`LoadedModel`] whose scorer exposes
//! the same `score` call.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::{
    module::Module,
    prelude::*,
    record::{BinFileRecorder, FullPrecisionSettings, NamedMpkFileRecorder, Record, Recorder},
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::classifier::{LeafClassifier, LeafClassifierConfig, LeafClassifierRecord};
use super::scorer::{ClassifierModel, OutputKind, OutputSelector, Scorer, SignatureModel};
use crate::utils::error::{LeafScanError, Result};

pub const BUNDLE_FILE: &str = "model.mpk";
pub const LEGACY_FILE: &str = "model.bin";
pub const SERVING_DIR: &str = "model";
pub const SIGNATURE_FILE: &str = "signature.json";
pub const SERVING_WEIGHTS_FILE: &str = "weights.mpk";

/// Input side used when the artifact does not declare one
pub const DEFAULT_INPUT_SIZE: usize = 224;

/// Storage format of a model artifact, with its location
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactFormat {
    SingleFileBundle(PathBuf),
    SingleFileLegacy(PathBuf),
    ServingDirectory(PathBuf),
}

impl ArtifactFormat {
    pub fn path(&self) -> &Path {
        match self {
            ArtifactFormat::SingleFileBundle(p)
            | ArtifactFormat::SingleFileLegacy(p)
            | ArtifactFormat::ServingDirectory(p) => p,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArtifactFormat::SingleFileBundle(_) => "single-file bundle",
            ArtifactFormat::SingleFileLegacy(_) => "legacy single file",
            ArtifactFormat::ServingDirectory(_) => "serving directory",
        }
    }

    fn exists(&self) -> bool {
        match self {
            ArtifactFormat::SingleFileBundle(p) | ArtifactFormat::SingleFileLegacy(p) => {
                p.is_file()
            }
            ArtifactFormat::ServingDirectory(p) => p.join(SIGNATURE_FILE).is_file(),
        }
    }
}

/// Candidate artifact locations under `base_dir`, in priority order
pub fn candidates(base_dir: &Path) -> [ArtifactFormat; 3] {
    [
        ArtifactFormat::SingleFileBundle(base_dir.join(BUNDLE_FILE)),
        ArtifactFormat::SingleFileLegacy(base_dir.join(LEGACY_FILE)),
        ArtifactFormat::ServingDirectory(base_dir.join(SERVING_DIR)),
    ]
}

/// Return the first candidate that exists on disk
pub fn probe(base_dir: &Path) -> Result<ArtifactFormat> {
    let candidates = candidates(base_dir);
    match candidates.iter().find(|c| c.exists()) {
        Some(found) => Ok(found.clone()),
        None => Err(LeafScanError::ModelNotFound(
            candidates.iter().map(|c| c.path().to_path_buf()).collect(),
        )),
    }
}

/// Self-describing record stored in the single-file bundle
#[derive(Record)]
pub struct BundleRecord<B: Backend> {
    pub input_size: usize,
    pub num_classes: usize,
    pub base_filters: usize,
    pub classifier: LeafClassifierRecord<B>,
}

/// `signature.json` of a serving directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServingSignature {
    pub input_size: usize,
    pub num_classes: usize,
    pub base_filters: usize,
    /// Output names in the order the forward call returns them
    pub outputs: Vec<String>,
}

impl ServingSignature {
    fn output_kinds(&self, dir: &Path) -> Result<Vec<(String, OutputKind)>> {
        self.outputs
            .iter()
            .map(|name| {
                OutputKind::parse(name).map(|kind| (name.clone(), kind)).ok_or_else(|| {
                    LeafScanError::ModelLoad(
                        dir.to_path_buf(),
                        format!("unknown output '{}' in {}", name, SIGNATURE_FILE),
                    )
                })
            })
            .collect()
    }
}

/// A model ready to serve
#[derive(Clone)]
pub struct LoadedModel {
    pub format: ArtifactFormat,
    /// Square input side expected by the model
    pub input_size: usize,
    pub num_classes: usize,
    pub scorer: Arc<dyn Scorer>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("format", &self.format)
            .field("input_size", &self.input_size)
            .field("num_classes", &self.num_classes)
            .finish()
    }
}

/// Probe `base_dir` and load the first artifact found
pub fn load_model<B: Backend>(base_dir: &Path, device: &B::Device) -> Result<LoadedModel> {
    let format = probe(base_dir)?;
    info!("Loading {} from {}", format.name(), format.path().display());

    let loaded = match &format {
        ArtifactFormat::SingleFileBundle(path) => load_bundle::<B>(path, device)?,
        ArtifactFormat::SingleFileLegacy(path) => load_legacy::<B>(path, device)?,
        ArtifactFormat::ServingDirectory(dir) => load_serving_dir::<B>(dir, device)?,
    };

    info!(
        "Model ready: {} classes, {}x{} input",
        loaded.num_classes, loaded.input_size, loaded.input_size
    );
    Ok(loaded)
}

fn load_error(path: &Path, err: impl std::fmt::Debug) -> LeafScanError {
    LeafScanError::ModelLoad(path.to_path_buf(), format!("{:?}", err))
}

fn load_bundle<B: Backend>(path: &Path, device: &B::Device) -> Result<LoadedModel> {
    let record: BundleRecord<B> = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .load(path.to_path_buf(), device)
        .map_err(|e| load_error(path, e))?;

    let config = LeafClassifierConfig::new(record.num_classes)
        .with_input_size(record.input_size)
        .with_base_filters(record.base_filters);
    let model = config.init::<B>(device).load_record(record.classifier);

    Ok(LoadedModel {
        format: ArtifactFormat::SingleFileBundle(path.to_path_buf()),
        input_size: config.input_size,
        num_classes: config.num_classes,
        scorer: Arc::new(OutputSelector::new(ClassifierModel::new(model, device.clone()))),
    })
}

fn load_legacy<B: Backend>(path: &Path, device: &B::Device) -> Result<LoadedModel> {
    let record: LeafClassifierRecord<B> = BinFileRecorder::<FullPrecisionSettings>::new()
        .load(path.to_path_buf(), device)
        .map_err(|e| load_error(path, e))?;

    // Only weights are stored: recover the architecture from tensor shapes
    let base_filters = record.backbone.block1.conv.weight.dims()[0];
    let num_classes = record.head.fc.weight.dims()[1];
    warn!(
        "{} declares no input shape, assuming {}x{}",
        path.display(),
        DEFAULT_INPUT_SIZE,
        DEFAULT_INPUT_SIZE
    );

    let model = LeafClassifierConfig::new(num_classes)
        .with_base_filters(base_filters)
        .init::<B>(device)
        .load_record(record);

    Ok(LoadedModel {
        format: ArtifactFormat::SingleFileLegacy(path.to_path_buf()),
        input_size: DEFAULT_INPUT_SIZE,
        num_classes,
        scorer: Arc::new(OutputSelector::new(ClassifierModel::new(model, device.clone()))),
    })
}

fn load_serving_dir<B: Backend>(dir: &Path, device: &B::Device) -> Result<LoadedModel> {
    let signature_path = dir.join(SIGNATURE_FILE);
    let signature: ServingSignature = serde_json::from_str(
        &std::fs::read_to_string(&signature_path).map_err(|e| load_error(&signature_path, e))?,
    )
    .map_err(|e| load_error(&signature_path, e))?;
    let outputs = signature.output_kinds(dir)?;

    let weights_path = dir.join(SERVING_WEIGHTS_FILE);
    let record: LeafClassifierRecord<B> = NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .load(weights_path.clone(), device)
        .map_err(|e| load_error(&weights_path, e))?;

    let model = LeafClassifierConfig::new(signature.num_classes)
        .with_input_size(signature.input_size)
        .with_base_filters(signature.base_filters)
        .init::<B>(device)
        .load_record(record);

    Ok(LoadedModel {
        format: ArtifactFormat::ServingDirectory(dir.to_path_buf()),
        input_size: signature.input_size,
        num_classes: signature.num_classes,
        scorer: Arc::new(OutputSelector::new(SignatureModel::new(
            model,
            outputs,
            device.clone(),
        ))),
    })
}

/// Write the self-describing single-file bundle
pub fn save_bundle<B: Backend>(
    model: &LeafClassifier<B>,
    config: &LeafClassifierConfig,
    path: &Path,
) -> Result<()> {
    let record = BundleRecord {
        input_size: config.input_size,
        num_classes: config.num_classes,
        base_filters: config.base_filters,
        classifier: model.clone().into_record(),
    };
    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .record(record, path.to_path_buf())
        .map_err(|e| load_error(path, e))
}

/// Write weights only, in the legacy binary format
pub fn save_legacy<B: Backend>(model: &LeafClassifier<B>, path: &Path) -> Result<()> {
    BinFileRecorder::<FullPrecisionSettings>::new()
        .record(model.clone().into_record(), path.to_path_buf())
        .map_err(|e| load_error(path, e))
}

/// Write a serving directory exposing the given named outputs
pub fn save_serving_dir<B: Backend>(
    model: &LeafClassifier<B>,
    config: &LeafClassifierConfig,
    dir: &Path,
    outputs: &[&str],
) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    let signature = ServingSignature {
        input_size: config.input_size,
        num_classes: config.num_classes,
        base_filters: config.base_filters,
        outputs: outputs.iter().map(|s| s.to_string()).collect(),
    };
    signature.output_kinds(dir)?;

    NamedMpkFileRecorder::<FullPrecisionSettings>::new()
        .record(model.clone().into_record(), dir.join(SERVING_WEIGHTS_FILE))
        .map_err(|e| load_error(dir, e))?;
    std::fs::write(
        dir.join(SIGNATURE_FILE),
        serde_json::to_string_pretty(&signature)?,
    )?;
    Ok(())
}

/// Save in the format implied by the output path: `.mpk` bundle, `.bin`
/// legacy file, anything else a serving directory
pub fn save_artifact<B: Backend>(
    model: &LeafClassifier<B>,
    config: &LeafClassifierConfig,
    out: &Path,
) -> Result<ArtifactFormat> {
    let extension = out.extension().and_then(|e| e.to_str()).unwrap_or("");
    match extension {
        "mpk" => {
            save_bundle(model, config, out)?;
            Ok(ArtifactFormat::SingleFileBundle(out.to_path_buf()))
        }
        "bin" => {
            save_legacy(model, out)?;
            Ok(ArtifactFormat::SingleFileLegacy(out.to_path_buf()))
        }
        _ => {
            save_serving_dir(model, config, out, &["probabilities", "logits"])?;
            Ok(ArtifactFormat::ServingDirectory(out.to_path_buf()))
        }
    }
}

/// Load backbone weights from a classifier weight file (bundle or plain record)
pub fn load_backbone<B: Backend>(
    model: LeafClassifier<B>,
    path: &Path,
    device: &B::Device,
) -> Result<LeafClassifier<B>> {
    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let backbone = match recorder.load::<BundleRecord<B>>(path.to_path_buf(), device) {
        Ok(bundle) => bundle.classifier.backbone,
        Err(_) => {
            let record: LeafClassifierRecord<B> = recorder
                .load(path.to_path_buf(), device)
                .map_err(|e| load_error(path, e))?;
            record.backbone
        }
    };

    let mut model = model;
    model.backbone = model.backbone.load_record(backbone);
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn small_config(num_classes: usize, input_size: usize) -> LeafClassifierConfig {
        LeafClassifierConfig::new(num_classes)
            .with_input_size(input_size)
            .with_base_filters(2)
    }

    fn sample_input(side: usize) -> TensorData {
        TensorData::new(vec![0.5f32; side * side * 3], [1, side, side, 3])
    }

    #[test]
    fn test_probe_order_and_not_found() {
        let dir = TempDir::new().unwrap();

        let err = probe(dir.path()).unwrap_err();
        match err {
            LeafScanError::ModelNotFound(paths) => {
                assert_eq!(paths.len(), 3);
                assert!(paths[0].ends_with(BUNDLE_FILE));
                assert!(paths[1].ends_with(LEGACY_FILE));
                assert!(paths[2].ends_with(SERVING_DIR));
            }
            other => panic!("unexpected error: {other}"),
        }

        // a serving directory without its marker file does not count
        std::fs::create_dir(dir.path().join(SERVING_DIR)).unwrap();
        assert!(probe(dir.path()).is_err());

        std::fs::write(dir.path().join(SERVING_DIR).join(SIGNATURE_FILE), "{}").unwrap();
        assert!(matches!(
            probe(dir.path()).unwrap(),
            ArtifactFormat::ServingDirectory(_)
        ));

        std::fs::write(dir.path().join(LEGACY_FILE), b"").unwrap();
        assert!(matches!(
            probe(dir.path()).unwrap(),
            ArtifactFormat::SingleFileLegacy(_)
        ));

        std::fs::write(dir.path().join(BUNDLE_FILE), b"").unwrap();
        assert!(matches!(
            probe(dir.path()).unwrap(),
            ArtifactFormat::SingleFileBundle(_)
        ));
    }

    #[test]
    fn test_bundle_declares_input_size() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config(3, 32);
        let model = config.init::<TestBackend>(&device);

        save_bundle(&model, &config, &dir.path().join(BUNDLE_FILE)).unwrap();
        let loaded = load_model::<TestBackend>(dir.path(), &device).unwrap();

        assert!(matches!(loaded.format, ArtifactFormat::SingleFileBundle(_)));
        assert_eq!(loaded.input_size, 32);
        assert_eq!(loaded.num_classes, 3);

        let scores = loaded.scorer.score(sample_input(32)).unwrap();
        assert_eq!(scores.len(), 3);
        assert!((scores.iter().sum::<f32>() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_legacy_falls_back_to_default_size() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config(4, 64);
        let model = config.init::<TestBackend>(&device);

        save_legacy(&model, &dir.path().join(LEGACY_FILE)).unwrap();
        let loaded = load_model::<TestBackend>(dir.path(), &device).unwrap();

        assert!(matches!(loaded.format, ArtifactFormat::SingleFileLegacy(_)));
        assert_eq!(loaded.input_size, DEFAULT_INPUT_SIZE);
        assert_eq!(loaded.num_classes, 4);
        assert_eq!(loaded.scorer.score(sample_input(32)).unwrap().len(), 4);
    }

    #[test]
    fn test_serving_directory_selects_first_output() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config(2, 16);
        let model = config.init::<TestBackend>(&device);

        save_serving_dir(&model, &config, &dir.path().join(SERVING_DIR), &["logits"]).unwrap();
        let logits_model = load_model::<TestBackend>(dir.path(), &device).unwrap();
        assert!(matches!(
            logits_model.format,
            ArtifactFormat::ServingDirectory(_)
        ));
        assert_eq!(logits_model.input_size, 16);
        let logits = logits_model.scorer.score(sample_input(16)).unwrap();

        save_serving_dir(
            &model,
            &config,
            &dir.path().join(SERVING_DIR),
            &["probabilities", "logits"],
        )
        .unwrap();
        let probs_model = load_model::<TestBackend>(dir.path(), &device).unwrap();
        let probs = probs_model.scorer.score(sample_input(16)).unwrap();

        assert_eq!(logits.len(), 2);
        assert!((probs.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        // argmax agrees between logits and probabilities
        let argmax = |v: &[f32]| if v[0] >= v[1] { 0 } else { 1 };
        assert_eq!(argmax(&logits), argmax(&probs));
    }

    #[test]
    fn test_unknown_signature_output_is_rejected() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config(2, 16);
        let model = config.init::<TestBackend>(&device);

        let result = save_serving_dir(&model, &config, dir.path(), &["embeddings"]);
        assert!(matches!(result, Err(LeafScanError::ModelLoad(..))));
    }

    #[test]
    fn test_save_artifact_picks_format_from_extension() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config(2, 16);
        let model = config.init::<TestBackend>(&device);

        let bundle = save_artifact(&model, &config, &dir.path().join("out.mpk")).unwrap();
        assert!(matches!(bundle, ArtifactFormat::SingleFileBundle(_)));
        assert!(dir.path().join("out.mpk").is_file());

        let legacy = save_artifact(&model, &config, &dir.path().join("out.bin")).unwrap();
        assert!(matches!(legacy, ArtifactFormat::SingleFileLegacy(_)));
        assert!(dir.path().join("out.bin").is_file());

        let serving = save_artifact(&model, &config, &dir.path().join("export")).unwrap();
        assert!(matches!(serving, ArtifactFormat::ServingDirectory(_)));
        assert!(dir.path().join("export").join(SIGNATURE_FILE).is_file());
    }

    #[test]
    fn test_load_backbone_from_bundle() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = small_config(3, 16);
        let pretrained = config.init::<TestBackend>(&device);
        let path = dir.path().join("backbone.mpk");
        save_bundle(&pretrained, &config, &path).unwrap();

        let fresh = small_config(5, 16).init::<TestBackend>(&device);
        let model = load_backbone(fresh, &path, &device).unwrap();

        let expected = pretrained
            .backbone
            .block1
            .conv
            .weight
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let actual = model
            .backbone
            .block1
            .conv
            .weight
            .val()
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        assert_eq!(expected, actual);
        assert_eq!(model.num_classes(), 5);
    }
}
