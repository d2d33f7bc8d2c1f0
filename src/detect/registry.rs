use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};

use crate::detect::backend::Detector;
use crate::detect::result::Inference;
use crate::frame::Frame;
use crate::params::DetectionParameters;

/// Builds a detector. Called at most once per registered name.
pub type DetectorFactory = Box<dyn Fn() -> Result<Box<dyn Detector>> + Send + Sync>;

/// Cloneable handle to a loaded detector.
///
/// Wrapped in `Mutex` because `Detector::infer` takes `&mut self`; each detection loop
/// session locks it for one cycle at a time, so a model survives stop/start.
#[derive(Clone)]
pub struct SharedDetector {
    name: &'static str,
    inner: Arc<Mutex<Box<dyn Detector>>>,
}

impl SharedDetector {
    pub fn new(detector: Box<dyn Detector>) -> Self {
        Self {
            name: detector.name(),
            inner: Arc::new(Mutex::new(detector)),
        }
    }
}

impl Detector for SharedDetector {
    fn name(&self) -> &'static str {
        self.name
    }

    fn infer(&mut self, frame: &Frame, params: &DetectionParameters) -> Result<Inference> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        guard.infer(frame, params)
    }

    fn warm_up(&mut self) -> Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| anyhow!("detector lock poisoned"))?;
        guard.warm_up()
    }
}

/// Named detector factories with load-once caching.
///
/// Models are expensive to load, so the first `get_or_load` builds and warms the
/// detector and every later call hands back the same shared instance.
pub struct DetectorRegistry {
    factories: HashMap<String, DetectorFactory>,
    loaded: HashMap<String, SharedDetector>,
    default_name: Option<String>,
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            loaded: HashMap::new(),
            default_name: None,
        }
    }

    /// Register a factory. The first registered backend becomes the default.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Result<Box<dyn Detector>> + Send + Sync + 'static,
    {
        if self.default_name.is_none() {
            self.default_name = Some(name.to_string());
        }
        self.loaded.remove(name);
        self.factories.insert(name.to_string(), Box::new(factory));
    }

    /// Set default backend by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(anyhow!("detector backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    /// Load (once) and return the named detector.
    pub fn get_or_load(&mut self, name: &str) -> Result<SharedDetector> {
        if let Some(detector) = self.loaded.get(name) {
            return Ok(detector.clone());
        }
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| anyhow!("detector backend '{}' not registered", name))?;
        let detector = factory().with_context(|| format!("failed to load detector '{}'", name))?;
        let mut shared = SharedDetector::new(detector);
        shared
            .warm_up()
            .with_context(|| format!("failed to warm up detector '{}'", name))?;
        log::info!("detector '{}' loaded", name);
        self.loaded.insert(name.to_string(), shared.clone());
        Ok(shared)
    }

    /// Load (once) and return the default detector.
    pub fn default_detector(&mut self) -> Result<SharedDetector> {
        let name = self
            .default_name
            .clone()
            .ok_or_else(|| anyhow!("no detector backends registered"))?;
        self.get_or_load(&name)
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    /// List registered backends, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DetectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
