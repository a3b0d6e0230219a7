use anyhow::Result;

use crate::frame::RgbFrame;

/// Face embedding extractor.
///
/// Returns one embedding per face found in the image, in discovery order; an
/// empty vector means no face. Callers that only care about one face take the
/// first.
pub trait FaceEmbedder: Send {
    /// Embedder identifier.
    fn name(&self) -> &'static str;

    fn embed(&self, image: &RgbFrame) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic embedder for tests and `stub://` deployments.
///
/// "Detects" one face in any image at least 8x8 pixels and derives the
/// embedding from per-quadrant channel means, so identical pixels always
/// produce identical embeddings.
pub struct StubEmbedder {
    mode: StubMode,
}

enum StubMode {
    Derived,
    Fixed(Vec<f32>),
    Faceless,
}

const MIN_FACE_SIDE: u32 = 8;

impl StubEmbedder {
    pub fn new() -> Self {
        Self {
            mode: StubMode::Derived,
        }
    }

    /// Always reports one face with exactly this embedding.
    pub fn fixed(embedding: Vec<f32>) -> Self {
        Self {
            mode: StubMode::Fixed(embedding),
        }
    }

    /// Never finds a face.
    pub fn faceless() -> Self {
        Self {
            mode: StubMode::Faceless,
        }
    }
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl FaceEmbedder for StubEmbedder {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn embed(&self, image: &RgbFrame) -> Result<Vec<Vec<f32>>> {
        match &self.mode {
            StubMode::Faceless => Ok(vec![]),
            StubMode::Fixed(embedding) => Ok(vec![embedding.clone()]),
            StubMode::Derived => {
                if image.width < MIN_FACE_SIDE || image.height < MIN_FACE_SIDE {
                    return Ok(vec![]);
                }
                Ok(vec![quadrant_means(image)])
            }
        }
    }
}

/// Per-channel means over a 2x2 grid: a 12-dimensional signature.
fn quadrant_means(image: &RgbFrame) -> Vec<f32> {
    let half_w = image.width / 2;
    let half_h = image.height / 2;
    let mut embedding = Vec::with_capacity(12);
    for qy in 0..2u32 {
        for qx in 0..2u32 {
            let x0 = qx * half_w;
            let y0 = qy * half_h;
            let mut sums = [0.0f64; 3];
            let mut count = 0u64;
            for y in y0..(y0 + half_h).min(image.height) {
                for x in x0..(x0 + half_w).min(image.width) {
                    let idx = ((y * image.width + x) * 3) as usize;
                    for c in 0..3 {
                        sums[c] += image.pixels[idx + c] as f64;
                    }
                    count += 1;
                }
            }
            for sum in sums {
                embedding.push(if count == 0 {
                    0.0
                } else {
                    (sum / count as f64 / 255.0) as f32
                });
            }
        }
    }
    embedding
}

// ----------------------------------------------------------------------------
// Tract-based embedder (feature: embed-tract)
// ----------------------------------------------------------------------------

#[cfg(feature = "embed-tract")]
pub use tract_embedder::TractEmbedder;

#[cfg(feature = "embed-tract")]
mod tract_embedder {
    use std::path::Path;

    use anyhow::{anyhow, Context, Result};
    use tract_onnx::prelude::*;

    use super::FaceEmbedder;
    use crate::frame::RgbFrame;

    const INPUT_SIZE: usize = 112;
    const NORM_MEAN: f32 = 127.5;
    const NORM_STD: f32 = 127.5;

    /// ONNX face-embedding backend (ArcFace-style models).
    ///
    /// The model sees the whole crop resized to 112x112; it reports a single
    /// face embedding, L2-normalized. Face localization is delegated to the
    /// person detector upstream (the crop is already a person region).
    pub struct TractEmbedder {
        model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    }

    impl TractEmbedder {
        pub fn new<P: AsRef<Path>>(model_path: P) -> Result<Self> {
            let model_path = model_path.as_ref();
            let model = tract_onnx::onnx()
                .model_for_path(model_path)
                .with_context(|| {
                    format!("failed to load embedding model from {}", model_path.display())
                })?
                .with_input_fact(
                    0,
                    InferenceFact::dt_shape(
                        f32::datum_type(),
                        tvec!(1, 3, INPUT_SIZE, INPUT_SIZE),
                    ),
                )
                .context("failed to set input fact")?
                .into_optimized()
                .context("failed to optimize embedding model")?
                .into_runnable()
                .context("failed to build runnable embedding model")?;
            Ok(Self { model })
        }
    }

    impl FaceEmbedder for TractEmbedder {
        fn name(&self) -> &'static str {
            "tract"
        }

        fn embed(&self, image: &RgbFrame) -> Result<Vec<Vec<f32>>> {
            let src_w = image.width as usize;
            let src_h = image.height as usize;
            if src_w == 0 || src_h == 0 {
                return Ok(vec![]);
            }

            let input = tract_ndarray::Array4::from_shape_fn(
                (1, 3, INPUT_SIZE, INPUT_SIZE),
                |(_, channel, y, x)| {
                    let src_y = (((y as f64 + 0.5) * src_h as f64 / INPUT_SIZE as f64) as usize)
                        .min(src_h - 1);
                    let src_x = (((x as f64 + 0.5) * src_w as f64 / INPUT_SIZE as f64) as usize)
                        .min(src_w - 1);
                    let idx = (src_y * src_w + src_x) * 3 + channel;
                    (image.pixels[idx] as f32 - NORM_MEAN) / NORM_STD
                },
            );

            let outputs = self
                .model
                .run(tvec!(input.into_tensor().into()))
                .context("embedding inference failed")?;
            let output = outputs
                .first()
                .ok_or_else(|| anyhow!("embedding model produced no outputs"))?;
            let view = output
                .to_array_view::<f32>()
                .context("embedding output was not f32")?;
            let mut embedding: Vec<f32> = view.iter().copied().collect();
            l2_normalize(&mut embedding);
            Ok(vec![embedding])
        }
    }

    fn l2_normalize(v: &mut [f32]) {
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
    }
}
