mod blackboard; // per-pin edge counts and ranging results
mod bus;
mod config;

use blackboard::{Blackboard, raise_fault, record_edge, record_range, snapshot};
use bus::Topic;
use config::{EngineKind, Settings};

use edgebridge_gpio::sensors::hc_sr04::SPEED_OF_SOUND_M_S;
use edgebridge_gpio::{EdgeEvent, EdgeLevel, Gpio, GpioEngine, HcSr04, Level, Pin, PinMode, SimEngine, Tick};
use spin_sleep::SpinSleeper;
use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{self, EnvFilter};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    info!("edgebridge started. Loading configuration...");
    let settings = config::load_settings()?;

    let tokio_rt = tokio::runtime::Runtime::new()?;
    match tokio_rt.block_on(run(settings)) {
        Ok(()) => {
            info!("edgebridge finished.");
            Ok(())
        }
        Err(e) => {
            error!("edgebridge failed: {:?}", e);
            Err(e)
        }
    }
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let (engine, sim) = build_engine(&settings)?;
    let gpio = Arc::new(Gpio::new(engine, &settings.gpio)?);
    let bb: Blackboard = Arc::default();
    let edges: Topic<EdgeEvent> = Topic::new(256);

    let sensor = &settings.sensor;
    gpio.set_mode(sensor.trigger, PinMode::Output)?;
    gpio.set_mode(sensor.echo, PinMode::Input)?;
    gpio.write(sensor.trigger, Level::Low)?;

    let mut watched = settings.watch.pins.clone();
    watched.push(sensor.echo);
    for &pin in &watched {
        let bb = Arc::clone(&bb);
        let edges = edges.clone();
        gpio.install_handler(pin, move |pin: Pin, level: EdgeLevel, tick: Tick| -> anyhow::Result<()> {
            record_edge(&bb, pin.number(), level, tick);
            edges.publish(EdgeEvent { pin: pin.number(), level, tick });
            Ok(())
        })?;
    }
    info!(pins = ?watched, "Edge handlers installed");

    let edge_log = tokio::spawn(log_edges(edges.subscribe()));

    let stop = Arc::new(AtomicBool::new(false));
    let toggler = match sim {
        Some(sim) => Some(spawn_input_toggler(sim, &settings, Arc::clone(&stop))?),
        None => None,
    };

    let hc_sr04 = Arc::new(HcSr04::new(Arc::clone(&gpio), sensor.trigger, sensor.echo)?);
    ranging_loop(&hc_sr04, &bb, sensor.period_ms, sensor.cycles).await?;

    stop.store(true, Ordering::Relaxed);
    if let Some(toggler) = toggler {
        if toggler.join().is_err() {
            raise_fault(&bb, "input toggler panicked");
        }
    }

    // Terminating releases the handlers and with them every publisher, which
    // ends the edge log task.
    gpio.terminate();
    drop(edges);
    if tokio::time::timeout(Duration::from_secs(1), edge_log).await.is_err() {
        warn!("Edge log task did not finish");
    }

    let state = snapshot(&bb);
    info!(
        edges = ?state.edges,
        watchdog = state.watchdog_events,
        ranges_ok = state.ranges_ok,
        ranges_missed = state.ranges_missed,
        last_range_m = ?state.last_range_m,
        dispatch = ?gpio.dispatch_stats(),
        "Run summary"
    );
    for fault in &state.faults {
        warn!("Fault: {}", fault);
    }
    Ok(())
}

fn build_engine(settings: &Settings) -> anyhow::Result<(Arc<dyn GpioEngine>, Option<Arc<SimEngine>>)> {
    match settings.engine {
        EngineKind::Sim => {
            let sim = Arc::new(SimEngine::new());
            let trigger = Pin::new(settings.sensor.trigger)?;
            let echo = Pin::new(settings.sensor.echo)?;
            let width_us = (settings.sim.distance_m * 2.0 / SPEED_OF_SOUND_M_S * 1e6) as u32;
            sim.attach_echo(trigger, echo, settings.sim.echo_delay_us, width_us);
            info!(distance_m = settings.sim.distance_m, width_us, "Using simulated GPIO engine");
            let engine: Arc<dyn GpioEngine> = sim.clone();
            Ok((engine, Some(sim)))
        }
        #[cfg(feature = "pigpio")]
        EngineKind::Pigpio => {
            info!("Using pigpio engine");
            let engine: Arc<dyn GpioEngine> = Arc::new(edgebridge_gpio::pigpio::PigpioEngine::new());
            Ok((engine, None))
        }
        #[cfg(not(feature = "pigpio"))]
        EngineKind::Pigpio => anyhow::bail!("engine = \"pigpio\" requires building with --features pigpio"),
    }
}

/// Stand-in for buttons on the watched pins when running without hardware.
fn spawn_input_toggler(
    sim: Arc<SimEngine>,
    settings: &Settings,
    stop: Arc<AtomicBool>,
) -> std::io::Result<std::thread::JoinHandle<()>> {
    let pins: Vec<Pin> = settings
        .watch
        .pins
        .iter()
        .filter_map(|&p| Pin::new(p).ok())
        .collect();
    let period = Duration::from_millis(settings.sim.toggle_ms.max(1));

    std::thread::Builder::new().name("sim-input".into()).spawn(move || {
        info!("Simulated input thread started.");
        let sleeper = SpinSleeper::new(10_000);
        let mut level = Level::Low;
        let mut round = 0u64;
        while !stop.load(Ordering::Relaxed) {
            level = level.inverse();
            for &pin in &pins {
                sim.set_input(pin, level);
            }
            round += 1;
            // Every so often report a watchdog timeout with no level change.
            if round % 16 == 0 {
                for &pin in &pins {
                    sim.inject_edge(pin, EdgeLevel::NoChange);
                }
            }
            sleeper.sleep(period);
        }
        info!("Simulated input thread finished.");
    })
}

async fn ranging_loop(sensor: &Arc<HcSr04>, bb: &Blackboard, period_ms: u64, cycles: u64) -> anyhow::Result<()> {
    let mut interval = tokio::time::interval(Duration::from_millis(period_ms.max(1)));
    let mut cycle = 0u64;
    while cycles == 0 || cycle < cycles {
        interval.tick().await;
        cycle += 1;

        // Busy-polls for up to tens of milliseconds; keep it off the async workers.
        let s = Arc::clone(sensor);
        let meters = tokio::task::spawn_blocking(move || s.distance_m()).await??;
        record_range(bb, meters);
        match meters {
            Some(m) => info!(cycle, distance_m = m, "Range"),
            None => {
                warn!(cycle, "No echo");
                if snapshot(bb).ranges_missed >= 5 {
                    raise_fault(bb, "repeated echo timeouts");
                }
            }
        }
    }
    Ok(())
}

async fn log_edges(mut rx: tokio::sync::broadcast::Receiver<Arc<EdgeEvent>>) {
    use tokio::sync::broadcast::error::RecvError;
    loop {
        match rx.recv().await {
            Ok(event) => debug!(pin = event.pin, level = %event.level, tick = event.tick.raw(), "Edge"),
            Err(RecvError::Lagged(n)) => warn!("Edge log lagging, skipped {} events", n),
            Err(RecvError::Closed) => break,
        }
    }
}
