//! Application orchestrator: wires sensors, actuation and the server.

use std::sync::Arc;
use std::time::Duration;

use smartrc_actuation::{Actuator, SafetyLayer, SimulatedActuator, SpeedLimits};
use smartrc_protocol::Severity;
use smartrc_sensors::sources::{
    BatteryMonitor, BatteryQuantity, CpuTemperature, Environment, EnvironmentQuantity, IpAddress,
};
use smartrc_sensors::{AlertRule, SensorRegistry, SensorSource, SensorSpec};
use smartrc_vehicle_server::{ServerConfig, VehicleServer};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::guard::Guard;
use crate::sources::{self, MotorThermal, Rangefinder};

const BATTERY_CAPACITY_MAH: f64 = 2200.0;

/// Runs the daemon until shutdown is requested.
pub async fn run(config: Config) -> anyhow::Result<()> {
    // -- Actuation --
    let actuator: Arc<dyn Actuator> = Arc::new(SimulatedActuator::default());
    let safety = Arc::new(SafetyLayer::with_limits(
        Arc::clone(&actuator),
        config.watchdog_window(),
        SpeedLimits {
            forward: config.speed_limit_forward,
            backward: config.speed_limit_backward,
        },
    ));

    // -- Sensors --
    let registry = Arc::new(build_registry(&config, &actuator)?);
    registry.start()?;

    // -- Guard --
    let guard_cancel = CancellationToken::new();
    let guard = Guard::new(
        Arc::clone(&safety),
        registry.get(&config.obstacle.sensor).cloned(),
        registry.get("Motor-Temp").cloned(),
        config.obstacle.clone(),
        config.speed_limit_forward,
    );
    let guard_period = registry
        .get(&config.obstacle.sensor)
        .and_then(|s| s.interval())
        .unwrap_or(Duration::from_millis(200));
    let guard_task = tokio::spawn(guard.run(guard_period, guard_cancel.clone()));

    // -- Server --
    let server_config = ServerConfig {
        bind: config.bind,
        port: config.port,
        max_connections: config.max_connections,
        alerts_on_connect: config.alerts_on_connect,
    };
    let server = VehicleServer::new(server_config, Arc::clone(&registry), Arc::clone(&safety));
    let server_run = Arc::clone(&server);
    let mut server_task = tokio::spawn(async move { server_run.run().await });

    tracing::info!(
        name = %config.name,
        sensors = registry.len(),
        forward_limit = config.speed_limit_forward,
        backward_limit = config.speed_limit_backward,
        "vehicle ready"
    );

    // -- Main loop: wait for shutdown --
    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Ok(())) => tracing::info!("server stopped"),
                Ok(Err(e)) => tracing::error!("server error: {e}"),
                Err(e) => tracing::error!("server task failed: {e}"),
            }
        }
        signal = shutdown_signal() => {
            match signal {
                Ok(name) => tracing::info!(signal = name, "shutting down"),
                Err(e) => tracing::error!("failed to listen for shutdown signals: {e}"),
            }
            server.shutdown();
            if let Err(e) = server_task.await {
                tracing::error!("server task failed: {e}");
            }
        }
    }

    // -- Graceful shutdown --
    tracing::info!("stopping services...");
    guard_cancel.cancel();
    let _ = guard_task.await;
    registry.shutdown().await;
    safety.shutdown().await?;
    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on Unix, with the signal's name.
async fn shutdown_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let terminated = terminate.recv();
    #[cfg(not(unix))]
    let terminated = std::future::pending::<Option<()>>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => result.map(|()| "SIGINT"),
        _ = terminated => Ok("SIGTERM"),
    }
}

/// Registers the vehicle's sensor table.
fn build_registry(config: &Config, actuator: &Arc<dyn Actuator>) -> anyhow::Result<SensorRegistry> {
    let mut registry = SensorRegistry::new();

    let battery = Arc::new(BatteryMonitor::new(
        BATTERY_CAPACITY_MAH,
        sources::motor_load(actuator),
    ));
    registry.register(
        timed_spec(config, "Voltage", "V", 1.0, Arc::new(battery.reading(BatteryQuantity::Voltage)))
            .with_alert(AlertRule::below(6.6, Severity::Warning, "Low Volt.")),
    )?;
    registry.register(timed_spec(
        config,
        "Current",
        "A",
        1.0,
        Arc::new(battery.reading(BatteryQuantity::Current)),
    ))?;
    registry.register(timed_spec(
        config,
        "Charge",
        "mAh",
        5.0,
        Arc::new(battery.reading(BatteryQuantity::Charge)),
    ))?;
    registry.register(
        timed_spec(
            config,
            "Battery-Temp",
            "°C",
            5.0,
            Arc::new(battery.reading(BatteryQuantity::Temperature)),
        )
        .with_alert(AlertRule::above(60.0, Severity::Warning, "Battery Temp.")),
    )?;

    registry.register(
        timed_spec(
            config,
            &config.obstacle.sensor,
            "cm",
            0.2,
            Arc::new(Rangefinder::new(Arc::clone(actuator))),
        )
        .with_alert(AlertRule::below(
            config.obstacle.stop_distance_cm,
            Severity::Warning,
            "Obstacle at",
        )),
    )?;

    let environment = Arc::new(Environment::default());
    for (name, unit, quantity) in [
        ("Temperature", "°C", EnvironmentQuantity::Temperature),
        ("Humidity", "%", EnvironmentQuantity::Humidity),
        ("Pressure", "hPa", EnvironmentQuantity::Pressure),
    ] {
        registry.register(timed_spec(config, name, unit, 5.0, Arc::new(environment.reading(quantity))))?;
    }

    registry.register(
        timed_spec(
            config,
            "Motor-Temp",
            "°C",
            2.0,
            Arc::new(MotorThermal::new(Arc::clone(actuator))),
        )
        .with_alert(AlertRule::above(80.0, Severity::Critical, "Motor Temp.")),
    )?;

    let cpu = CpuTemperature::detect();
    if cpu.path().is_none() {
        tracing::warn!("no CPU temperature source, CPU-Temp will stay empty");
    }
    registry.register(timed_spec(config, "CPU-Temp", "°C", 5.0, Arc::new(cpu)))?;

    registry.register(timed_spec(config, "Speed", "%", 0.5, sources::speed_readback(actuator)))?;
    registry.register(timed_spec(config, "Steering", "%", 0.5, sources::steering_readback(actuator)))?;

    registry.register(SensorSpec::new("IP-Address", "", Arc::new(IpAddress)))?;

    Ok(registry)
}

/// A periodically refreshed sensor, honoring the configured override.
fn timed_spec(
    config: &Config,
    name: &str,
    unit: &str,
    default_secs: f64,
    source: Arc<dyn SensorSource>,
) -> SensorSpec {
    let interval = config
        .sensor_interval(name)
        .unwrap_or_else(|| Duration::from_secs_f64(default_secs));
    SensorSpec::new(name, unit, source).every(interval)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actuator() -> Arc<dyn Actuator> {
        Arc::new(SimulatedActuator::default())
    }

    #[tokio::test]
    async fn sensor_table_is_complete() {
        let registry = build_registry(&Config::default(), &actuator()).unwrap();
        let names: Vec<_> = registry.names().collect();
        assert_eq!(
            names,
            [
                "Voltage",
                "Current",
                "Charge",
                "Battery-Temp",
                "Distance",
                "Temperature",
                "Humidity",
                "Pressure",
                "Motor-Temp",
                "CPU-Temp",
                "Speed",
                "Steering",
                "IP-Address",
            ]
        );
        assert_eq!(
            registry.get("Voltage").unwrap().interval(),
            Some(Duration::from_secs(1))
        );
        assert_eq!(registry.get("IP-Address").unwrap().interval(), None);
    }

    #[tokio::test]
    async fn interval_overrides_apply() {
        let mut config = Config::default();
        config.sensor_intervals.insert("Charge".into(), 30.0);
        let registry = build_registry(&config, &actuator()).unwrap();
        assert_eq!(
            registry.get("Charge").unwrap().interval(),
            Some(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn readbacks_reflect_actuation() {
        let actuator = actuator();
        let registry = build_registry(&Config::default(), &actuator).unwrap();
        actuator.drive(30.0).unwrap();

        let speed = registry.get("Speed").unwrap();
        speed.refresh();
        assert_eq!(speed.value().as_number(), Some(30.0));

        let distance = registry.get("Distance").unwrap();
        distance.refresh();
        assert!(distance.value().as_number().is_some_and(|d| d > 0.0));
        assert!(distance.alert().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn sigterm_requests_shutdown() {
        use tokio::signal::unix::{SignalKind, signal};

        // Installs the handler before anything is raised.
        let _terminate = signal(SignalKind::terminate()).unwrap();
        let waiter = tokio::spawn(shutdown_signal());
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let signal = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(signal, "SIGTERM");
    }
}
