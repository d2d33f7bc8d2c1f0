use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::params::{DetectionParameters, TrackedLabels, DEFAULT_CONFIDENCE, DEFAULT_OVERLAP};

const DEFAULT_SOURCE_URI: &str = "0";
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_BACKEND: &str = "stub";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_DASHBOARD_ADDR: &str = "127.0.0.1:8790";
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct TallyConfigFile {
    source: Option<SourceConfigFile>,
    detector: Option<DetectorConfigFile>,
    parameters: Option<ParametersConfigFile>,
    tracked_labels: Option<Vec<String>>,
    dashboard: Option<DashboardConfigFile>,
    pacing: Option<PacingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_frames: Option<u64>,
    repeat: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ParametersConfigFile {
    confidence: Option<f32>,
    overlap: Option<f32>,
    agnostic: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct DashboardConfigFile {
    addr: Option<String>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct PacingConfigFile {
    cycle_interval_ms: Option<u64>,
    max_cycles: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct TallyConfig {
    pub source: SourceSettings,
    pub detector: DetectorSettings,
    pub parameters: DetectionParameters,
    pub tracked_labels: TrackedLabels,
    pub dashboard: DashboardSettings,
    pub cycle_interval: Option<Duration>,
    pub max_cycles: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub uri: String,
    pub width: u32,
    pub height: u32,
    pub target_fps: u32,
    /// End a synthetic stream after this many frames.
    pub max_frames: Option<u64>,
    /// Loop an image directory instead of ending the stream.
    pub repeat: bool,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            uri: DEFAULT_SOURCE_URI.to_string(),
            width: DEFAULT_SOURCE_WIDTH,
            height: DEFAULT_SOURCE_HEIGHT,
            target_fps: DEFAULT_SOURCE_FPS,
            max_frames: None,
            repeat: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: Option<PathBuf>,
    pub labels_path: Option<PathBuf>,
    pub input_size: u32,
}

#[derive(Debug, Clone)]
pub struct DashboardSettings {
    pub addr: String,
    pub jpeg_quality: u8,
}

impl TallyConfig {
    /// Defaults, then the JSON file named by `TALLY_CONFIG`, then `TALLY_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("TALLY_CONFIG").ok().map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TallyConfigFile) -> Result<Self> {
        let defaults = SourceSettings::default();
        let source = match file.source {
            Some(src) => SourceSettings {
                uri: src.uri.unwrap_or(defaults.uri),
                width: src.width.unwrap_or(defaults.width),
                height: src.height.unwrap_or(defaults.height),
                target_fps: src.target_fps.unwrap_or(defaults.target_fps),
                max_frames: src.max_frames,
                repeat: src.repeat.unwrap_or(defaults.repeat),
            },
            None => defaults,
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .unwrap_or_else(|| DEFAULT_BACKEND.to_string()),
            model_path: detector_file.model_path,
            labels_path: detector_file.labels_path,
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        };

        let params_file = file.parameters.unwrap_or_default();
        let parameters = DetectionParameters::new(
            params_file.confidence.unwrap_or(DEFAULT_CONFIDENCE),
            params_file.overlap.unwrap_or(DEFAULT_OVERLAP),
            params_file.agnostic.unwrap_or(true),
        )?;

        let tracked_labels = match file.tracked_labels {
            Some(labels) => TrackedLabels::new(labels)?,
            None => TrackedLabels::default(),
        };

        let dashboard_file = file.dashboard.unwrap_or_default();
        let dashboard = DashboardSettings {
            addr: dashboard_file
                .addr
                .unwrap_or_else(|| DEFAULT_DASHBOARD_ADDR.to_string()),
            jpeg_quality: dashboard_file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let pacing = file.pacing.unwrap_or_default();
        Ok(Self {
            source,
            detector,
            parameters,
            tracked_labels,
            dashboard,
            cycle_interval: pacing
                .cycle_interval_ms
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis),
            max_cycles: pacing.max_cycles,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("TALLY_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri.trim().to_string();
            }
        }
        if let Ok(backend) = std::env::var("TALLY_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_string();
            }
        }
        if let Ok(path) = std::env::var("TALLY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = Some(PathBuf::from(path));
            }
        }
        if let Ok(addr) = std::env::var("TALLY_DASHBOARD_ADDR") {
            if !addr.trim().is_empty() {
                self.dashboard.addr = addr;
            }
        }
        if let Ok(labels) = std::env::var("TALLY_TRACKED_LABELS") {
            let parsed = split_csv(&labels);
            if !parsed.is_empty() {
                self.tracked_labels = TrackedLabels::new(parsed)?;
            }
        }
        let mut confidence = self.parameters.confidence_threshold();
        let mut overlap = self.parameters.overlap_threshold();
        if let Ok(value) = std::env::var("TALLY_CONFIDENCE") {
            confidence = parse_threshold("TALLY_CONFIDENCE", &value)?;
        }
        if let Ok(value) = std::env::var("TALLY_OVERLAP") {
            overlap = parse_threshold("TALLY_OVERLAP", &value)?;
        }
        self.parameters = DetectionParameters::new(
            confidence,
            overlap,
            self.parameters.class_agnostic_suppression(),
        )?;
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.detector.backend.trim().is_empty() {
            return Err(anyhow!("detector backend must not be empty"));
        }
        self.detector.backend = self.detector.backend.to_lowercase();

        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector input_size must be greater than zero"));
        }
        if !(1..=100).contains(&self.dashboard.jpeg_quality) {
            return Err(anyhow!("dashboard jpeg_quality must be within 1..=100"));
        }
        if self.tracked_labels.is_empty() {
            return Err(anyhow!("tracked_labels must not be empty"));
        }
        Ok(())
    }
}

fn parse_threshold(name: &str, value: &str) -> Result<f32> {
    value
        .trim()
        .parse::<f32>()
        .map_err(|_| anyhow!("{} must be a number between 0 and 1", name))
}

fn read_config_file(path: &Path) -> Result<TallyConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
