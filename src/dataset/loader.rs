//! Labeled image directory loader
//!
//! One subdirectory per class; the sorted directory names define the label
//! indices and therefore the order of the written class list.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{LeafScanError, Result};

/// File extensions picked up as training images
pub const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "gif"];

/// A single image sample with its label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSample {
    /// Path to the image file
    pub path: PathBuf,
    /// Class label index
    pub label: usize,
}

/// A labeled directory tree, discovered but not yet decoded
#[derive(Debug, Clone)]
pub struct LabeledImageDir {
    /// Root directory of the dataset
    pub root_dir: PathBuf,
    /// Class names, index == label
    pub class_names: Vec<String>,
    /// All samples, grouped by class in label order
    pub samples: Vec<ImageSample>,
}

impl LabeledImageDir {
    /// Discover classes and samples under `root_dir`
    ///
    /// ```text
    /// root_dir/
    /// ├── Potato___Early_blight/
    /// │   ├── leaf_0001.jpg
    /// │   └── ...
    /// └── Tomato_healthy/
    ///     └── ...
    /// ```
    pub fn open<P: AsRef<Path>>(root_dir: P) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        info!("Scanning training images in {:?}", root_dir);

        if !root_dir.is_dir() {
            return Err(LeafScanError::Dataset(format!(
                "Data directory does not exist: {}",
                root_dir.display()
            )));
        }

        let mut class_names: Vec<String> = Vec::new();
        for entry in std::fs::read_dir(&root_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    class_names.push(name.to_string());
                }
            }
        }
        class_names.sort();

        if class_names.is_empty() {
            return Err(LeafScanError::Dataset(format!(
                "No class subdirectories found in {}",
                root_dir.display()
            )));
        }

        let mut samples = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let mut class_paths: Vec<PathBuf> = WalkDir::new(root_dir.join(class_name))
                .min_depth(1)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .map(|e| e.into_path())
                .filter(|p| is_image_file(p))
                .collect();
            class_paths.sort();

            debug!("Class '{}' (label {}): {} images", class_name, label, class_paths.len());
            samples.extend(class_paths.into_iter().map(|path| ImageSample { path, label }));
        }

        if samples.is_empty() {
            return Err(LeafScanError::Dataset(format!(
                "No images found under {}",
                root_dir.display()
            )));
        }

        info!(
            "Found {} images across {} classes",
            samples.len(),
            class_names.len()
        );

        Ok(Self {
            root_dir,
            class_names,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    /// Number of samples per class, indexed by label
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.num_classes()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

/// True for paths whose extension marks a supported image
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Write the class list as a JSON array, index == label
pub fn write_class_names(class_names: &[String], path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(class_names)?;
    std::fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"x").unwrap();
    }

    #[test]
    fn test_classes_are_sorted_and_labelled() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("Tomato_healthy/a.jpg"));
        touch(&dir.path().join("Potato___Late_blight/b.PNG"));
        touch(&dir.path().join("Potato___Early_blight/c.jpeg"));
        touch(&dir.path().join("Potato___Early_blight/d.jpg"));
        touch(&dir.path().join("Potato___Early_blight/readme.txt"));

        let data = LabeledImageDir::open(dir.path()).unwrap();
        assert_eq!(
            data.class_names,
            vec![
                "Potato___Early_blight",
                "Potato___Late_blight",
                "Tomato_healthy"
            ]
        );
        assert_eq!(data.len(), 4);
        assert_eq!(data.class_counts(), vec![2, 1, 1]);
        assert!(data
            .samples
            .iter()
            .all(|s| s.label < data.num_classes()));
    }

    #[test]
    fn test_missing_or_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(LabeledImageDir::open(dir.path().join("nope")).is_err());
        assert!(LabeledImageDir::open(dir.path()).is_err());

        std::fs::create_dir(dir.path().join("empty_class")).unwrap();
        assert!(matches!(
            LabeledImageDir::open(dir.path()),
            Err(LeafScanError::Dataset(_))
        ));
    }

    #[test]
    fn test_write_class_names() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("class_names.json");
        let names = vec!["A".to_string(), "B".to_string()];

        write_class_names(&names, &path).unwrap();

        let read: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(read, names);
    }
}
