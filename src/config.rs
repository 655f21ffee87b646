use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::{CpuBackend, DetectorBackend, EngineOptions, StubBackend};
use crate::error::PipelineError;
use crate::geometry::{ContentFit, Size};

const DEFAULT_ASSET_PATH: &str = "stub://demo_clip";
const DEFAULT_DISPLAY_WIDTH: u32 = 390;
const DEFAULT_DISPLAY_HEIGHT: u32 = 844;
const DEFAULT_MODEL_INPUT: u32 = 640;
const DEFAULT_SNAPSHOT_EVERY: u64 = 30;
/// Per-side limit for the display canvas.
const MAX_DISPLAY_DIMENSION: u32 = 16_384;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    asset_path: Option<String>,
    model: Option<ModelConfigFile>,
    display: Option<DisplayConfigFile>,
    confidence_threshold: Option<f32>,
    top_label_only: Option<bool>,
    snapshot: Option<SnapshotConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    backend: Option<BackendKind>,
    path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplayConfigFile {
    width: Option<u32>,
    height: Option<u32>,
    content_fit: Option<ContentFit>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SnapshotConfigFile {
    dir: Option<PathBuf>,
    every: Option<u64>,
}

/// Which detector runs on the worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Luminance blob detector, no model file.
    #[default]
    Cpu,
    /// Detects nothing. Exercises the pipeline without a detector.
    Stub,
    /// ONNX model through tract (feature `backend-tract`).
    Tract,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "stub" => Ok(Self::Stub),
            "tract" => Ok(Self::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub asset_path: String,
    pub model: ModelSettings,
    pub display: DisplaySettings,
    pub confidence_threshold: f32,
    pub top_label_only: bool,
    pub snapshot: SnapshotSettings,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub backend: BackendKind,
    pub path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_width: u32,
    pub input_height: u32,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub width: u32,
    pub height: u32,
    pub content_fit: ContentFit,
}

#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    /// Snapshots are off when unset.
    pub dir: Option<PathBuf>,
    pub every: u64,
}

impl DisplaySettings {
    pub fn size(&self) -> Size {
        Size::new(self.width as f64, self.height as f64)
    }
}

impl OverlayConfig {
    /// Load from the file named by `OVERLAY_CONFIG`, if set.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("OVERLAY_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Load from `path` (or defaults), then apply environment overrides and validate.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: OverlayConfigFile) -> Self {
        let model = file.model.unwrap_or_default();
        let display = file.display.unwrap_or_default();
        let snapshot = file.snapshot.unwrap_or_default();
        Self {
            asset_path: file
                .asset_path
                .unwrap_or_else(|| DEFAULT_ASSET_PATH.to_string()),
            model: ModelSettings {
                backend: model.backend.unwrap_or_default(),
                path: model.path,
                labels_path: model.labels_path,
                input_width: model.input_width.unwrap_or(DEFAULT_MODEL_INPUT),
                input_height: model.input_height.unwrap_or(DEFAULT_MODEL_INPUT),
            },
            display: DisplaySettings {
                width: display.width.unwrap_or(DEFAULT_DISPLAY_WIDTH),
                height: display.height.unwrap_or(DEFAULT_DISPLAY_HEIGHT),
                content_fit: display.content_fit.unwrap_or_default(),
            },
            confidence_threshold: file
                .confidence_threshold
                .unwrap_or(EngineOptions::default().confidence_threshold),
            top_label_only: file
                .top_label_only
                .unwrap_or(EngineOptions::default().top_label_only),
            snapshot: SnapshotSettings {
                dir: snapshot.dir,
                every: snapshot.every.unwrap_or(DEFAULT_SNAPSHOT_EVERY),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(asset) = non_empty_env("OVERLAY_ASSET") {
            self.asset_path = asset;
        }
        if let Some(backend) = non_empty_env("OVERLAY_BACKEND") {
            self.model.backend = backend.parse().context("OVERLAY_BACKEND")?;
        }
        if let Some(path) = non_empty_env("OVERLAY_MODEL_PATH") {
            self.model.path = Some(PathBuf::from(path));
        }
        if let Some(fit) = non_empty_env("OVERLAY_CONTENT_FIT") {
            self.display.content_fit = fit
                .parse()
                .map_err(|e| anyhow!("OVERLAY_CONTENT_FIT: {}", e))?;
        }
        if let Some(threshold) = non_empty_env("OVERLAY_CONFIDENCE_THRESHOLD") {
            self.confidence_threshold = threshold.trim().parse().map_err(|_| {
                anyhow!("OVERLAY_CONFIDENCE_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Some(top) = non_empty_env("OVERLAY_TOP_LABEL_ONLY") {
            self.top_label_only = parse_bool(&top)
                .ok_or_else(|| anyhow!("OVERLAY_TOP_LABEL_ONLY must be true or false"))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.asset_path.trim().is_empty() {
            return Err(invalid("asset_path must not be empty"));
        }
        if !self.confidence_threshold.is_finite()
            || !(0.0..=1.0).contains(&self.confidence_threshold)
        {
            return Err(invalid(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.model.backend == BackendKind::Tract && self.model.path.is_none() {
            return Err(invalid("the tract backend requires model.path"));
        }
        if self.display.width > MAX_DISPLAY_DIMENSION
            || self.display.height > MAX_DISPLAY_DIMENSION
        {
            return Err(invalid(format!(
                "display size {}x{} exceeds {} on a side",
                self.display.width, self.display.height, MAX_DISPLAY_DIMENSION
            )));
        }
        if self.model.input_width == 0 || self.model.input_height == 0 {
            return Err(invalid("model input size must be non-zero"));
        }
        if self.snapshot.every == 0 {
            return Err(invalid("snapshot.every must be greater than zero"));
        }
        Ok(())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            confidence_threshold: self.confidence_threshold,
            top_label_only: self.top_label_only,
        }
    }

    /// Construct the configured detector. Loading a model can fail here.
    pub fn build_backend(&self) -> Result<Box<dyn DetectorBackend>, PipelineError> {
        match self.model.backend {
            BackendKind::Cpu => Ok(Box::new(CpuBackend::new())),
            BackendKind::Stub => Ok(Box::new(StubBackend::new())),
            BackendKind::Tract => self.build_tract_backend(),
        }
    }

    #[cfg(feature = "backend-tract")]
    fn build_tract_backend(&self) -> Result<Box<dyn DetectorBackend>, PipelineError> {
        use crate::detect::TractBackend;

        let path = self
            .model
            .path
            .as_ref()
            .ok_or_else(|| PipelineError::model("tract", "model.path is not set"))?;
        let model_name = path.display().to_string();
        let mut backend =
            TractBackend::new(path, self.model.input_width, self.model.input_height)
                .map_err(|e| PipelineError::model(&model_name, format!("{e:#}")))?;
        if let Some(labels) = &self.model.labels_path {
            backend = backend
                .with_labels_file(labels)
                .map_err(|e| PipelineError::model(&model_name, format!("{e:#}")))?;
        }
        Ok(Box::new(backend))
    }

    #[cfg(not(feature = "backend-tract"))]
    fn build_tract_backend(&self) -> Result<Box<dyn DetectorBackend>, PipelineError> {
        let model_name = self
            .model
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "tract".to_string());
        Err(PipelineError::model(
            model_name,
            "the tract backend requires the backend-tract feature",
        ))
    }
}

fn invalid(reason: impl Into<String>) -> anyhow::Error {
    PipelineError::InvalidConfig(reason.into()).into()
}

fn read_config_file(path: &Path) -> Result<OverlayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
