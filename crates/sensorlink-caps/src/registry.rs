use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use sensorlink_frame::{Protocol, Sensor};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::CapsConfig;
use crate::error::{CapsError, Result, ValidationError};
use crate::feature::{DataType, Feature, Limiter};

/// Features of one sensor, in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct Capabilities {
    sensor: Sensor,
    features: Vec<Feature>,
}

impl Capabilities {
    pub fn new(sensor: Sensor) -> Self {
        Self {
            sensor,
            features: Vec::new(),
        }
    }

    pub fn sensor(&self) -> Sensor {
        self.sensor
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Case-insensitive feature lookup.
    pub fn get(&self, key: &str) -> Option<&Feature> {
        self.position(key).map(|index| &self.features[index])
    }

    fn position(&self, key: &str) -> Option<usize> {
        let key = key.trim();
        self.features
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(key))
    }

    /// Insert or replace a feature. A replaced feature keeps its position and,
    /// when the new definition carries none, its current value.
    pub fn upsert(&mut self, mut feature: Feature) {
        match self.position(&feature.name) {
            Some(index) => {
                let existing = &mut self.features[index];
                if feature.current.is_empty() {
                    feature.current = std::mem::take(&mut existing.current);
                }
                feature.name = std::mem::take(&mut existing.name);
                *existing = feature;
            }
            None => self.features.push(feature),
        }
    }
}

/// Capabilities for every sensor a peer knows about.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    sensors: BTreeMap<Sensor, Capabilities>,
    config: CapsConfig,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::with_config(CapsConfig::default())
    }

    pub fn with_config(config: CapsConfig) -> Self {
        Self {
            sensors: BTreeMap::new(),
            config,
        }
    }

    /// Mark a sensor present even if it exposes no features.
    pub fn add_sensor(&mut self, sensor: Sensor) -> &mut Capabilities {
        self.sensors
            .entry(sensor)
            .or_insert_with(|| Capabilities::new(sensor))
    }

    pub fn remove_sensor(&mut self, sensor: Sensor) -> Option<Capabilities> {
        self.sensors.remove(&sensor)
    }

    /// Idempotent upsert of one feature definition.
    pub fn register_feature(
        &mut self,
        sensor: Sensor,
        name: &str,
        data_type: DataType,
        limiter: Limiter,
        allowed_values: Vec<String>,
    ) -> std::result::Result<(), ValidationError> {
        self.register(sensor, Feature::new(name, data_type, limiter, allowed_values))
    }

    /// Upsert a complete feature, including its current value.
    pub fn register(
        &mut self,
        sensor: Sensor,
        feature: Feature,
    ) -> std::result::Result<(), ValidationError> {
        feature.check_limits()?;
        debug!(%sensor, feature = %feature.name, limiter = %feature.limiter, "registering feature");
        self.add_sensor(sensor).upsert(feature);
        Ok(())
    }

    /// Replace a sensor's capabilities wholesale.
    pub fn replace(&mut self, capabilities: Capabilities) {
        self.sensors.insert(capabilities.sensor, capabilities);
    }

    pub fn has_sensor(&self, sensor: Sensor) -> bool {
        self.sensors.contains_key(&sensor)
    }

    pub fn sensors(&self) -> impl Iterator<Item = Sensor> + '_ {
        self.sensors.keys().copied()
    }

    pub fn capabilities(&self, sensor: Sensor) -> Option<&Capabilities> {
        self.sensors.get(&sensor)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capabilities> {
        self.sensors.values()
    }

    /// Validate one key/value pair. Returns the canonical key and value.
    pub fn validate(
        &self,
        sensor: Sensor,
        key: &str,
        value: &str,
    ) -> std::result::Result<(String, String), ValidationError> {
        let capabilities = self
            .sensors
            .get(&sensor)
            .ok_or_else(|| ValidationError::UnknownSensor(sensor.alias().to_string()))?;
        let feature = capabilities
            .get(key)
            .ok_or_else(|| ValidationError::UnknownKey {
                sensor: sensor.alias().to_string(),
                key: key.to_string(),
            })?;
        let canonical = feature.check(value)?;
        Ok((feature.name.clone(), canonical))
    }

    /// Validate every pair; the first failure rejects the whole set.
    pub fn validate_all<K, V>(
        &self,
        sensor: Sensor,
        pairs: &[(K, V)],
    ) -> std::result::Result<Vec<(String, String)>, ValidationError>
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        pairs
            .iter()
            .map(|(key, value)| self.validate(sensor, key.as_ref(), value.as_ref()))
            .collect()
    }

    /// Store already-validated values as current.
    pub fn apply(&mut self, sensor: Sensor, validated: &[(String, String)]) {
        let Some(capabilities) = self.sensors.get_mut(&sensor) else {
            return;
        };
        for (key, value) in validated {
            if let Some(index) = capabilities.position(key) {
                capabilities.features[index].current = value.clone();
            }
        }
    }

    /// Parse a feature file: an object mapping sensor names to feature lists.
    ///
    /// ```json
    /// { "camera": [ { "name": "flash", "type": "string", "limiter": "set",
    ///                 "values": ["Auto", "On", "Off"], "current": "Auto" } ] }
    /// ```
    pub fn from_json_str(json: &str, protocol: &Protocol) -> Result<Self> {
        let file: BTreeMap<String, Vec<FeatureEntry>> = serde_json::from_str(json)?;
        let mut registry = Self::new();

        for (name, entries) in file {
            let sensor = protocol
                .sensor(&name)
                .ok_or_else(|| ValidationError::UnknownSensor(name.clone()))?;
            registry.add_sensor(sensor);
            for entry in entries {
                registry.register(sensor, entry.into_feature())?;
            }
        }

        Ok(registry)
    }

    /// Load a feature file, refusing anything over the configured size.
    pub fn from_file(path: &Path, protocol: &Protocol, config: CapsConfig) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|err| CapsError::LoadFailed(format!("{}: {err}", path.display())))?;
        let metadata = file
            .metadata()
            .map_err(|err| CapsError::LoadFailed(err.to_string()))?;
        if !metadata.is_file() {
            return Err(CapsError::LoadFailed(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        if metadata.len() > config.max_file_size as u64 {
            return Err(CapsError::LoadFailed(format!(
                "feature file too large ({} bytes): {}",
                metadata.len(),
                path.display()
            )));
        }

        let read_limit = u64::try_from(config.max_file_size.saturating_add(1)).unwrap_or(u64::MAX);
        let mut content = String::new();
        file.take(read_limit)
            .read_to_string(&mut content)
            .map_err(|err| CapsError::LoadFailed(format!("{}: {err}", path.display())))?;
        if content.len() > config.max_file_size {
            return Err(CapsError::LoadFailed(format!(
                "feature file grew while reading: {}",
                path.display()
            )));
        }

        let mut registry = Self::from_json_str(&content, protocol)?;
        registry.config = config;
        Ok(registry)
    }

    pub fn config(&self) -> &CapsConfig {
        &self.config
    }
}

#[derive(Debug, Deserialize)]
struct FeatureEntry {
    name: String,
    #[serde(rename = "type")]
    data_type: DataType,
    limiter: Limiter,
    #[serde(default)]
    values: Vec<Value>,
    #[serde(default)]
    current: Option<Value>,
}

impl FeatureEntry {
    fn into_feature(self) -> Feature {
        let values = self.values.iter().map(scalar_text).collect();
        let feature = Feature::new(self.name, self.data_type, self.limiter, values);
        match self.current {
            Some(current) => feature.with_current(scalar_text(&current)),
            None => feature,
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
