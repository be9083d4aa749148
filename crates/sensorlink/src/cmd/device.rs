use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sensorlink_caps::{CapabilityRegistry, CapsConfig};
use sensorlink_frame::{Protocol, Role, Sensor};
use sensorlink_peer::{
    ConnectionManager, DispatchConfig, DispatchHandle, Dispatcher, ManagerConfig, Pinger,
    SimulatedSensor,
};
use tracing::{debug, info};

use crate::cmd::{parse_duration, DeviceArgs};
use crate::exit::{caps_error, io_error, peer_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_status, OutputFormat};

pub fn run(args: DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let ping_interval = parse_duration(&args.ping_interval)?;
    let protocol = Arc::new(Protocol::standard());
    let sensors = select_sensors(&protocol, args.sensors.as_deref())?;
    let overrides = match &args.features {
        Some(path) => Some(
            CapabilityRegistry::from_file(path, &protocol, CapsConfig::default())
                .map_err(|err| caps_error(&format!("failed loading {}", path.display()), err))?,
        ),
        None => None,
    };

    let (link, label) = args.link.device_link()?;
    let manager = ConnectionManager::new(
        link,
        Role::Device,
        ManagerConfig {
            ping_interval,
            ..ManagerConfig::default()
        },
    )
    .map_err(|err| peer_error("connection setup failed", err))?;

    let (handle, inbox) = DispatchHandle::channel();
    let mut dispatcher = Dispatcher::new(
        Arc::clone(&protocol),
        &handle,
        manager.outbox(),
        DispatchConfig {
            queue_capacity: args.queue_capacity,
        },
    );
    for sensor in &sensors {
        dispatcher.add_executor(Box::new(SimulatedSensor::new(*sensor)));
    }
    if let Some(overrides) = &overrides {
        dispatcher.override_features(overrides);
    }

    let inbound = handle.clone();
    manager.set_handler(move |frame| {
        if inbound.frame(frame).is_err() {
            debug!("dispatcher gone; dropping frame");
        }
    });
    let worker = thread::Builder::new()
        .name("sensorlink-dispatch".into())
        .spawn(move || dispatcher.run(inbox))
        .map_err(|err| io_error("failed starting dispatcher", err))?;

    manager
        .find_connection()
        .map_err(|err| peer_error("listen failed", err))?;
    let pinger =
        Pinger::spawn(manager.clone()).map_err(|err| peer_error("failed starting pinger", err))?;

    let names: Vec<&str> = sensors.iter().map(|sensor| sensor.alias()).collect();
    info!(endpoint = %label, sensors = %names.join(","), "device ready");
    print_status("listening", &label, format);

    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || flag.store(false, Ordering::SeqCst))
        .map_err(|err| CliError::new(crate::exit::INTERNAL, format!("signal handler: {err}")))?;
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    pinger.stop();
    handle.shutdown();
    let _ = worker.join();
    manager.cancel();
    print_status("stopped", &label, format);
    Ok(SUCCESS)
}

fn select_sensors(protocol: &Protocol, names: Option<&[String]>) -> CliResult<Vec<Sensor>> {
    let Some(names) = names else {
        return Ok(Sensor::ALL.to_vec());
    };
    let mut sensors = Vec::new();
    for name in names.iter().filter(|name| !name.trim().is_empty()) {
        let sensor = protocol
            .sensor(name)
            .ok_or_else(|| CliError::new(USAGE, format!("unknown sensor {name:?}")))?;
        if !sensors.contains(&sensor) {
            sensors.push(sensor);
        }
    }
    if sensors.is_empty() {
        return Err(CliError::new(USAGE, "at least one sensor is required"));
    }
    Ok(sensors)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_sensors_by_default() {
        let protocol = Protocol::standard();
        let sensors = select_sensors(&protocol, None).expect("default selection");
        assert_eq!(sensors, Sensor::ALL.to_vec());
    }

    #[test]
    fn sensor_names_accept_short_forms() {
        let protocol = Protocol::standard();
        let names = vec!["cam".to_string(), "GPS".to_string(), "camera".to_string()];
        let sensors = select_sensors(&protocol, Some(&names)).expect("names should resolve");
        assert_eq!(sensors, vec![Sensor::Camera, Sensor::Location]);
    }

    #[test]
    fn unknown_sensor_is_usage_error() {
        let protocol = Protocol::standard();
        let names = vec!["radar".to_string()];
        let err = select_sensors(&protocol, Some(&names)).expect_err("radar is not a sensor");
        assert_eq!(err.code, USAGE);
    }
}
