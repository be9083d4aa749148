//! Hardware-free sensors for demos and tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use sensorlink_caps::{Capabilities, DataType, Feature, Limiter};
use sensorlink_frame::{CapturePlan, Sensor};
use tracing::debug;

use crate::error::ExecutorError;
use crate::executor::{SensorEvents, SensorExecutor};

/// A sensor that fabricates plausible data on a background thread.
pub struct SimulatedSensor {
    sensor: Sensor,
    features: Capabilities,
    settings: BTreeMap<String, String>,
    busy: Arc<AtomicBool>,
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedSensor {
    pub fn new(sensor: Sensor) -> Self {
        let features = default_features(sensor);
        let settings = features
            .features()
            .iter()
            .map(|f| (f.name.clone(), f.current.clone()))
            .collect();
        Self {
            sensor,
            features,
            settings,
            busy: Arc::new(AtomicBool::new(false)),
            stop: None,
            worker: None,
        }
    }

    /// One simulated executor per known sensor.
    pub fn all() -> Vec<Box<dyn SensorExecutor>> {
        Sensor::ALL
            .into_iter()
            .map(|sensor| Box::new(Self::new(sensor)) as Box<dyn SensorExecutor>)
            .collect()
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }

    fn reap(&mut self) {
        self.stop = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn file_type(sensor: Sensor) -> &'static str {
    match sensor {
        Sensor::Camera => "jpg",
        Sensor::Microphone => "wav",
        Sensor::Environment => "csv",
        Sensor::Location => "txt",
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_features(sensor: Sensor) -> Capabilities {
    let mut caps = Capabilities::new(sensor);
    let features = match sensor {
        Sensor::Camera => vec![
            Feature::new("flash", DataType::String, Limiter::Set, strings(&["Auto", "On", "Off"]))
                .with_current("Auto"),
            Feature::new("zoom", DataType::Integer, Limiter::Range, strings(&["0", "10"]))
                .with_current("0"),
            Feature::new("resolution", DataType::String, Limiter::Const, Vec::new())
                .with_current("1920x1080"),
        ],
        Sensor::Microphone => vec![
            Feature::new("gain", DataType::Double, Limiter::Range, strings(&["0.0", "4.0"]))
                .with_current("1.0"),
            Feature::new("encoding", DataType::String, Limiter::Set, strings(&["pcm", "aac"]))
                .with_current("pcm"),
        ],
        Sensor::Environment => vec![
            Feature::new("unit", DataType::String, Limiter::Set, strings(&["C", "F"]))
                .with_current("C"),
            Feature::new("buffer", DataType::Integer, Limiter::Size, Vec::new())
                .with_current("4096"),
        ],
        Sensor::Location => vec![Feature::new(
            "accuracy",
            DataType::String,
            Limiter::Set,
            strings(&["coarse", "fine"]),
        )
        .with_current("fine")],
    };
    for feature in features {
        caps.upsert(feature);
    }
    caps
}

fn sample(sensor: Sensor, task_id: i32, index: u32, settings: &BTreeMap<String, String>) -> Vec<u8> {
    match sensor {
        Sensor::Camera => {
            let mut image = vec![0xff, 0xd8];
            image.extend(format!("sim-frame task={task_id} n={index}").bytes());
            image.extend([0xff, 0xd9]);
            image
        }
        Sensor::Microphone => {
            let gain: f64 = settings
                .get("gain")
                .and_then(|g| g.parse().ok())
                .unwrap_or(1.0);
            (0..64u8)
                .map(|i| ((f64::from(i % 16) * gain) as u8).wrapping_add(index as u8))
                .collect()
        }
        Sensor::Environment => {
            let celsius = 20.0 + f64::from(index % 5) * 0.5;
            let value = match settings.get("unit").map(String::as_str) {
                Some("F") => celsius * 9.0 / 5.0 + 32.0,
                _ => celsius,
            };
            format!("{index},{value:.1},{}\n", 40 + index % 10).into_bytes()
        }
        Sensor::Location => Vec::new(),
    }
}

impl SensorExecutor for SimulatedSensor {
    fn sensor(&self) -> Sensor {
        self.sensor
    }

    fn features(&self) -> Capabilities {
        self.features.clone()
    }

    fn start(
        &mut self,
        task_id: i32,
        args: &[String],
        events: SensorEvents,
    ) -> Result<(), ExecutorError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(ExecutorError::new(format!("{} is busy", self.sensor)));
        }
        self.reap();

        let sensor = self.sensor;
        if sensor == Sensor::Location {
            let fine = self.setting("accuracy") != Some("coarse");
            let (lat, lon) = if fine {
                ("52.520008", "13.404954")
            } else {
                ("52.52", "13.40")
            };
            events.reading(task_id, strings(&[lat, lon]));
            events.completed(task_id);
            return Ok(());
        }

        let plan = CapturePlan::from_args(args).map_err(|err| ExecutorError::new(err.to_string()))?;
        let settings = self.settings.clone();
        let busy = Arc::clone(&self.busy);
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        busy.store(true, Ordering::SeqCst);
        let worker = std::thread::Builder::new()
            .name(format!("sim-{sensor}"))
            .spawn(move || {
                let started = Instant::now();
                let mut taken = 0u32;
                let stopped = loop {
                    if taken > 0 {
                        events.save_chunk(task_id);
                    }
                    let bytes = sample(sensor, task_id, taken, &settings);
                    events.chunk(task_id, file_type(sensor), bytes);
                    taken += 1;

                    if !plan.allows(taken, started.elapsed()) {
                        break false;
                    }
                    match stop_rx.recv_timeout(plan.interval) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break true,
                    }
                    if !plan.allows(taken, started.elapsed()) {
                        break false;
                    }
                };

                busy.store(false, Ordering::SeqCst);
                if stopped {
                    debug!(task_id, %sensor, taken, "simulated capture stopped");
                } else {
                    events.completed(task_id);
                }
            })
            .map_err(|err| {
                self.busy.store(false, Ordering::SeqCst);
                ExecutorError::new(format!("failed to spawn capture thread: {err}"))
            })?;

        self.stop = Some(stop_tx);
        self.worker = Some(worker);
        Ok(())
    }

    fn modify(&mut self, key: &str, value: &str) -> Result<(), ExecutorError> {
        let feature = self
            .features
            .get(key)
            .cloned()
            .ok_or_else(|| ExecutorError::new(format!("unknown setting {key}")))?;
        self.settings.insert(feature.name.clone(), value.to_string());
        self.features.upsert(feature.with_current(value));
        Ok(())
    }

    fn kill(&mut self) {
        if let Some(stop) = &self.stop {
            let _ = stop.send(());
        }
        self.reap();
        self.busy.store(false, Ordering::SeqCst);
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

impl Drop for SimulatedSensor {
    fn drop(&mut self) {
        self.kill();
    }
}
