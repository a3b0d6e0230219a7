use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Context, Result};

/// Enrolled reference embeddings, one per identity label.
///
/// Loaded once at startup from a directory of `<label>.json` files, each a
/// JSON array of f32. The map is unordered; nothing here depends on
/// iteration order except tie-breaking among equal distances, which is
/// documented as implementation-defined.
#[derive(Default)]
pub struct FaceGallery {
    faces: HashMap<String, Vec<f32>>,
}

impl FaceGallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` embedding in the directory.
    ///
    /// A missing directory is an error (the caller degrades to disabled);
    /// an individual unreadable file is logged and skipped.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("read gallery directory {}", dir.display()))?;

        let mut faces = HashMap::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !crate::is_valid_label(stem) {
                log::warn!("skipping gallery file with unusable label: {}", path.display());
                continue;
            }
            match load_embedding(&path) {
                Ok(embedding) => {
                    log::info!("loaded face: {}", stem);
                    faces.insert(stem.to_string(), embedding);
                }
                Err(e) => {
                    log::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
        Ok(Self { faces })
    }

    pub fn insert(&mut self, label: String, embedding: Vec<f32>) {
        self.faces.insert(label, embedding);
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Nearest enrolled identity by Euclidean distance.
    ///
    /// Ties at the minimum resolve to whichever entry the map iterates first.
    pub fn best_match(&self, embedding: &[f32]) -> Option<(&str, f32)> {
        let mut best: Option<(&str, f32)> = None;
        for (label, reference) in &self.faces {
            let distance = euclidean_distance(embedding, reference);
            if best.map_or(true, |(_, d)| distance < d) {
                best = Some((label, distance));
            }
        }
        best
    }
}

fn load_embedding(path: &Path) -> Result<Vec<f32>> {
    let raw = std::fs::read_to_string(path)?;
    let embedding: Vec<f32> = serde_json::from_str(&raw)?;
    if embedding.is_empty() {
        return Err(anyhow!("empty embedding"));
    }
    Ok(embedding)
}

/// Euclidean distance; embeddings of different dimensionality never match.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::MAX;
    }
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}
