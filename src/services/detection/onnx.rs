// Local OCR with ONNX Runtime: text-region detection + per-script line recognition

use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::Array4;
use once_cell::sync::OnceCell;
use ort::session::Session;
use ort::value::Value;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace};

use super::postprocess::{boxes_from_probability_map, scale_boxes, sort_reading_order, BoxParams};
use super::recognition::{ctc_greedy_decode, Vocabulary};
use super::{DetectorFactory, TextDetector};
use crate::core::config::DetectionConfig;
use crate::core::errors::{DetectionError, DetectionResult};
use crate::core::types::{LanguageSet, Script};
use crate::services::onnx_builder::build_session_with_acceleration;

/// Recognition input height
const REC_HEIGHT: u32 = 48;
const REC_MIN_WIDTH: u32 = 8;
const REC_MAX_WIDTH: u32 = 1280;

/// ImageNet normalization used by the detection model
const DET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const DET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Model files for one recognition script
pub fn recognition_model_paths(models_dir: &Path, script: Script) -> (PathBuf, PathBuf) {
    let dir = models_dir.join("recognition");
    (
        dir.join(format!("{}.onnx", script.as_str())),
        dir.join(format!("{}_dict.txt", script.as_str())),
    )
}

pub fn detection_model_path(models_dir: &Path) -> PathBuf {
    models_dir.join("detection.onnx")
}

struct LoadedModel {
    session: Mutex<Session>,
    backend: String,
}

impl LoadedModel {
    fn load(path: &Path, name: &str, forced_backend: Option<&str>) -> DetectionResult<Self> {
        if !path.exists() {
            return Err(DetectionError::ModelNotFound {
                path: path.display().to_string(),
            });
        }

        let (backend, session) = build_session_with_acceleration(path, name, forced_backend)
            .map_err(|e| DetectionError::ModelLoad(format!("{:#}", e)))?;

        Ok(Self {
            session: Mutex::new(session),
            backend,
        })
    }

    /// Run the model on one NCHW tensor and copy out the first output
    fn run(&self, input: Array4<f32>) -> DetectionResult<(Vec<usize>, Vec<f32>)> {
        let shape: [usize; 4] = [
            input.shape()[0],
            input.shape()[1],
            input.shape()[2],
            input.shape()[3],
        ];
        let (data, _offset) = input.into_raw_vec_and_offset();
        let value = Value::from_array((shape, data)).map_err(inference_error)?;

        // Extract data while the session is held, then release
        let mut session = self.session.lock();
        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| DetectionError::Inference("model has no inputs".to_string()))?;

        let outputs = session
            .run(ort::inputs![input_name.as_str() => value])
            .map_err(inference_error)?;

        let first_key = outputs
            .keys()
            .next()
            .ok_or_else(|| DetectionError::Inference("model produced no outputs".to_string()))?;
        let (dims, values) = outputs[first_key]
            .try_extract_tensor::<f32>()
            .map_err(inference_error)?;

        let dims: Vec<usize> = dims.iter().map(|&d| d as usize).collect();
        Ok((dims, values.to_vec()))
    }
}

fn inference_error(e: impl std::fmt::Display) -> DetectionError {
    DetectionError::Inference(e.to_string())
}

/// Builds detectors from the models directory.
///
/// The detection model is shared by every language set and loaded once;
/// recognition models are loaded per script.
pub struct OnnxDetectorFactory {
    config: DetectionConfig,
    detection_model: OnceCell<Arc<LoadedModel>>,
}

impl OnnxDetectorFactory {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            detection_model: OnceCell::new(),
        }
    }

    fn detection_model(&self) -> DetectionResult<Arc<LoadedModel>> {
        self.detection_model
            .get_or_try_init(|| {
                info!("Loading text detection model from {}", self.config.models_dir.display());
                LoadedModel::load(
                    &detection_model_path(&self.config.models_dir),
                    "text detection",
                    self.config.inference_backend.as_deref(),
                )
                .map(Arc::new)
            })
            .map(Arc::clone)
    }

    /// Whether the model files needed for `languages` exist on disk
    pub fn models_available(&self, languages: &LanguageSet) -> bool {
        let Ok(script) = languages.recognition_script() else {
            return false;
        };
        let (model, dict) = recognition_model_paths(&self.config.models_dir, script);
        detection_model_path(&self.config.models_dir).exists() && model.exists() && dict.exists()
    }
}

impl DetectorFactory for OnnxDetectorFactory {
    fn create(&self, languages: &LanguageSet) -> DetectionResult<Arc<dyn TextDetector>> {
        let script = languages.recognition_script()?;
        let detection = self.detection_model()?;

        let (model_path, dict_path) = recognition_model_paths(&self.config.models_dir, script);
        if !dict_path.exists() {
            return Err(DetectionError::ModelNotFound {
                path: dict_path.display().to_string(),
            });
        }
        let vocab = Vocabulary::load(&dict_path)
            .map_err(|e| DetectionError::ModelLoad(format!("{:#}", e)))?;
        let recognition = LoadedModel::load(
            &model_path,
            &format!("{} recognition", script.as_str()),
            self.config.inference_backend.as_deref(),
        )?;

        info!(
            "✓ OCR ready for [{}]: detection={}, recognition={} ({} symbols)",
            languages,
            detection.backend,
            recognition.backend,
            vocab.len()
        );

        Ok(Arc::new(OnnxTextDetector {
            detection,
            recognition,
            vocab,
            limit_side: self.config.limit_side,
            box_params: BoxParams {
                pixel_threshold: self.config.pixel_threshold,
                box_threshold: self.config.box_threshold,
                unclip_ratio: self.config.unclip_ratio,
                ..BoxParams::default()
            },
        }))
    }
}

/// OCR pipeline for one recognition script
pub struct OnnxTextDetector {
    detection: Arc<LoadedModel>,
    recognition: LoadedModel,
    vocab: Vocabulary,
    limit_side: u32,
    box_params: BoxParams,
}

impl OnnxTextDetector {
    /// Resize so both sides are multiples of 32 and the longest is at most `limit_side`
    fn detection_input_size(&self, width: u32, height: u32) -> (u32, u32) {
        let longest = width.max(height) as f32;
        let scale = if longest > self.limit_side as f32 {
            self.limit_side as f32 / longest
        } else {
            1.0
        };
        let round32 = |side: u32| -> u32 {
            let scaled = (side as f32 * scale).round() as u32;
            (((scaled + 16) / 32) * 32).max(32)
        };
        (round32(width), round32(height))
    }

    fn detection_tensor(&self, img: &DynamicImage, width: u32, height: u32) -> Array4<f32> {
        let rgb = img.resize_exact(width, height, FilterType::Triangle).to_rgb8();
        let mut tensor = Array4::<f32>::zeros((1, 3, height as usize, width as usize));

        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] =
                    (pixel[c] as f32 / 255.0 - DET_MEAN[c]) / DET_STD[c];
            }
        }
        tensor
    }

    fn recognition_tensor(&self, crop: &DynamicImage) -> Array4<f32> {
        let ratio = crop.width() as f32 / crop.height().max(1) as f32;
        let width = ((REC_HEIGHT as f32 * ratio).ceil() as u32).clamp(REC_MIN_WIDTH, REC_MAX_WIDTH);
        let rgb = crop.resize_exact(width, REC_HEIGHT, FilterType::Lanczos3).to_rgb8();

        let mut tensor = Array4::<f32>::zeros((1, 3, REC_HEIGHT as usize, width as usize));
        for (x, y, pixel) in rgb.enumerate_pixels() {
            for c in 0..3 {
                tensor[[0, c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - 0.5) / 0.5;
            }
        }
        tensor
    }

    fn recognize(&self, crop: &DynamicImage) -> DetectionResult<(String, f32)> {
        let (dims, logits) = self.recognition.run(self.recognition_tensor(crop))?;

        let (seq_len, classes) = match dims.as_slice() {
            [1, s, c] => (*s, *c),
            [s, 1, c] => (*s, *c),
            [s, c] => (*s, *c),
            other => {
                return Err(DetectionError::Inference(format!(
                    "unexpected recognition output shape {:?}",
                    other
                )))
            }
        };

        Ok(ctc_greedy_decode(&logits, seq_len, classes, &self.vocab))
    }
}

impl TextDetector for OnnxTextDetector {
    #[instrument(skip(self, image), fields(width = image.width(), height = image.height()))]
    fn detect(&self, image: &DynamicImage) -> DetectionResult<Vec<String>> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 {
            return Err(DetectionError::Preprocessing(format!(
                "invalid image dimensions {}x{}",
                width, height
            )));
        }

        let (det_w, det_h) = self.detection_input_size(width, height);
        trace!("Detection input: {}x{} → {}x{}", width, height, det_w, det_h);

        let (dims, prob) = self.detection.run(self.detection_tensor(image, det_w, det_h))?;
        let (map_h, map_w) = match dims.as_slice() {
            [_, _, h, w] => (*h, *w),
            [_, h, w] => (*h, *w),
            other => {
                return Err(DetectionError::Inference(format!(
                    "unexpected detection output shape {:?}",
                    other
                )))
            }
        };

        let mut boxes = boxes_from_probability_map(&prob, map_w, map_h, &self.box_params);
        scale_boxes(&mut boxes, (map_w as u32, map_h as u32), (width, height));
        sort_reading_order(&mut boxes);
        debug!("Found {} text regions", boxes.len());

        let mut fragments = Vec::with_capacity(boxes.len());
        for b in boxes.iter().filter(|b| b.width() > 0 && b.height() > 0) {
            let crop = image.crop_imm(b.x0, b.y0, b.width(), b.height());
            let (text, confidence) = self.recognize(&crop)?;
            trace!("Region ({}, {}) → '{}' ({:.2})", b.x0, b.y0, text, confidence);
            if !text.is_empty() {
                fragments.push(text);
            }
        }

        Ok(fragments)
    }

    fn backend(&self) -> &str {
        &self.detection.backend
    }
}
