//! Face recognition against an enrolled gallery.
//!
//! A `FaceEmbedder` is a black-box extractor: crop in, zero or more face
//! embeddings out (in discovery order). The gallery holds one reference
//! embedding per enrolled identity, loaded once at startup from
//! `<label>.json` files. Classification is nearest-neighbor Euclidean
//! distance under a tolerance; everything that fails along the way
//! (no face, extraction error, no gallery) resolves to "unknown" rather than
//! an error.
//!
//! The whole capability is resolved once at startup into
//! `Recognition::Enabled` or `Recognition::Disabled`; the hot path never
//! re-checks library or gallery availability.

mod embedder;
mod gallery;

pub use embedder::{FaceEmbedder, StubEmbedder};
#[cfg(feature = "embed-tract")]
pub use embedder::TractEmbedder;
pub use gallery::{euclidean_distance, FaceGallery};

use std::path::Path;

use anyhow::{anyhow, Result};

use crate::config::RecognitionSettings;
use crate::frame::RgbFrame;
use crate::UNKNOWN_LABEL;

/// Identity classifier: embedder + gallery + tolerance policy.
pub struct IdentityClassifier {
    embedder: Box<dyn FaceEmbedder>,
    gallery: FaceGallery,
}

impl IdentityClassifier {
    pub fn new(embedder: Box<dyn FaceEmbedder>, gallery: FaceGallery) -> Self {
        Self { embedder, gallery }
    }

    /// Match the crop against the gallery.
    ///
    /// At most one face is considered (the first the embedder reports). The
    /// minimum distance must be strictly below `tolerance` to count as a
    /// match. Equal minimum distances between two enrolled identities resolve
    /// to whichever the gallery iterates first; that order is
    /// implementation-defined, not a policy.
    pub fn classify(&self, crop: &RgbFrame, tolerance: f32) -> String {
        let embeddings = match self.embedder.embed(crop) {
            Ok(embeddings) => embeddings,
            Err(e) => {
                log::warn!("face embedding failed: {:#}", e);
                return UNKNOWN_LABEL.to_string();
            }
        };
        let Some(embedding) = embeddings.first() else {
            log::debug!("no face found in crop");
            return UNKNOWN_LABEL.to_string();
        };

        match self.gallery.best_match(embedding) {
            Some((label, distance)) if distance < tolerance => {
                log::debug!("face matched {} (distance {:.3})", label, distance);
                label.to_string()
            }
            Some((label, distance)) => {
                log::debug!(
                    "face not matched (nearest {} at distance {:.3} >= {:.3})",
                    label,
                    distance,
                    tolerance
                );
                UNKNOWN_LABEL.to_string()
            }
            None => UNKNOWN_LABEL.to_string(),
        }
    }

    pub fn gallery_len(&self) -> usize {
        self.gallery.len()
    }
}

/// Recognition capability, resolved once at startup.
pub enum Recognition {
    Enabled(IdentityClassifier),
    Disabled,
}

impl Recognition {
    /// Resolve the capability from config: disabled in config, an unloadable
    /// gallery directory, or an empty gallery all degrade to `Disabled`
    /// without failing startup.
    pub fn resolve(settings: &RecognitionSettings, embedder: Box<dyn FaceEmbedder>) -> Self {
        if !settings.enabled {
            log::info!("face recognition disabled in config");
            return Recognition::Disabled;
        }
        let gallery = match FaceGallery::load_dir(&settings.known_faces_dir) {
            Ok(gallery) => gallery,
            Err(e) => {
                log::warn!(
                    "face recognition disabled: cannot load gallery from {}: {:#}",
                    settings.known_faces_dir.display(),
                    e
                );
                return Recognition::Disabled;
            }
        };
        if gallery.is_empty() {
            log::warn!(
                "face recognition disabled: no enrolled faces in {}",
                settings.known_faces_dir.display()
            );
            return Recognition::Disabled;
        }
        log::info!(
            "face recognition enabled: {} enrolled faces, embedder {}",
            gallery.len(),
            embedder.name()
        );
        Recognition::Enabled(IdentityClassifier::new(embedder, gallery))
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Recognition::Enabled(_))
    }

    /// Classify a crop; `Disabled` always answers "unknown".
    pub fn classify(&self, crop: &RgbFrame, tolerance: f32) -> String {
        match self {
            Recognition::Enabled(classifier) => classifier.classify(crop, tolerance),
            Recognition::Disabled => UNKNOWN_LABEL.to_string(),
        }
    }
}

/// Best available embedder for a deployment: the ONNX model when the
/// `embed-tract` feature and a model path are present, the stub otherwise.
/// Model load failure degrades to the stub rather than erroring.
pub fn default_embedder(model: Option<&Path>) -> Box<dyn FaceEmbedder> {
    #[cfg(feature = "embed-tract")]
    if let Some(model) = model {
        match TractEmbedder::new(model) {
            Ok(embedder) => return Box::new(embedder),
            Err(e) => {
                log::warn!(
                    "face embedding model {} unavailable ({:#}); using stub embedder",
                    model.display(),
                    e
                );
            }
        }
    }
    #[cfg(not(feature = "embed-tract"))]
    if model.is_some() {
        log::warn!("built without embed-tract; embedding model ignored");
    }
    Box::new(StubEmbedder::new())
}

/// Enroll a known face from a reference photo.
///
/// Extracts the first face embedding from the image and persists it as
/// `<label>.json` in the gallery directory. Fails when the image cannot be
/// read or contains no face; warns (and proceeds with the first face) when it
/// contains several.
pub fn enroll(
    embedder: &dyn FaceEmbedder,
    image_path: &Path,
    label: &str,
    gallery_dir: &Path,
) -> Result<std::path::PathBuf> {
    let label = normalize_enroll_label(label)?;

    let image = image::open(image_path)
        .map_err(|e| anyhow!("cannot read image {}: {}", image_path.display(), e))?
        .to_rgb8();
    let frame = RgbFrame::from_image(&image);

    let embeddings = embedder.embed(&frame)?;
    let embedding = match embeddings.len() {
        0 => return Err(anyhow!("no face found in {}", image_path.display())),
        1 => &embeddings[0],
        n => {
            log::warn!("{} faces found in {}, using the first", n, image_path.display());
            &embeddings[0]
        }
    };

    std::fs::create_dir_all(gallery_dir)?;
    let out_path = gallery_dir.join(format!("{}.json", label));
    let json = serde_json::to_string(embedding)?;
    std::fs::write(&out_path, json)?;
    log::info!("enrolled {} -> {}", label, out_path.display());
    Ok(out_path)
}

fn normalize_enroll_label(label: &str) -> Result<String> {
    let normalized = crate::sanitize_label(label);
    if normalized.is_empty() {
        return Err(anyhow!("label {:?} normalizes to nothing", label));
    }
    if normalized == UNKNOWN_LABEL {
        return Err(anyhow!("label {:?} is reserved", UNKNOWN_LABEL));
    }
    if normalized != label {
        log::warn!("label {:?} normalized to {:?}", label, normalized);
    }
    Ok(normalized)
}
