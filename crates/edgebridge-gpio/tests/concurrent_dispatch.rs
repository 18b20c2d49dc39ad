//! Registry and dispatcher under concurrent installs and edge delivery.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use edgebridge_gpio::{
    DispatchMode, DispatchOutcome, EdgeDispatcher, EdgeHandler, EdgeLevel, Gpio, GpioSettings, Level, Pin,
    PinEdgeRegistry, SimEngine, Tick,
};

const NONE: u64 = u64::MAX;

struct Tagged {
    id: u64,
    fired: Arc<AtomicU64>,
    drops: Arc<AtomicUsize>,
}

impl EdgeHandler for Tagged {
    fn on_edge(&self, _pin: Pin, _level: EdgeLevel, _tick: Tick) -> anyhow::Result<()> {
        self.fired.store(self.id, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for Tagged {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_last_install_wins_while_dispatching() {
    const WRITERS: u32 = 4;
    const PINS_PER_WRITER: u32 = 2;
    const INSTALLS: u64 = 200;

    let registry = Arc::new(PinEdgeRegistry::new());
    let dispatcher = Arc::new(EdgeDispatcher::new(Arc::clone(&registry)));
    let drops = Arc::new(AtomicUsize::new(0));
    let fired: Vec<Arc<AtomicU64>> = (0..WRITERS * PINS_PER_WRITER)
        .map(|_| Arc::new(AtomicU64::new(NONE)))
        .collect();
    let stop = Arc::new(AtomicBool::new(false));

    let dispatchers: Vec<_> = (0..4)
        .map(|seed| {
            let dispatcher = Arc::clone(&dispatcher);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut n = seed;
                while !stop.load(Ordering::Relaxed) {
                    let outcome = dispatcher.dispatch(n % (WRITERS * PINS_PER_WRITER), EdgeLevel::High, Tick(n));
                    assert!(matches!(outcome, DispatchOutcome::Delivered | DispatchOutcome::NoHandler));
                    n = n.wrapping_add(7);
                }
            })
        })
        .collect();

    let writers: Vec<_> = (0..WRITERS)
        .map(|w| {
            let registry = Arc::clone(&registry);
            let drops = Arc::clone(&drops);
            let fired = fired.clone();
            thread::spawn(move || {
                for i in 0..INSTALLS {
                    for p in 0..PINS_PER_WRITER {
                        let pin = w * PINS_PER_WRITER + p;
                        let handler = Tagged {
                            id: i,
                            fired: Arc::clone(&fired[pin as usize]),
                            drops: Arc::clone(&drops),
                        };
                        registry.install(pin, handler).unwrap();
                    }
                }
            })
        })
        .collect();

    for writer in writers {
        writer.join().unwrap();
    }
    stop.store(true, Ordering::Relaxed);
    for d in dispatchers {
        d.join().unwrap();
    }

    let total = (WRITERS * PINS_PER_WRITER) as usize * INSTALLS as usize;
    let live = (WRITERS * PINS_PER_WRITER) as usize;
    assert_eq!(drops.load(Ordering::SeqCst), total - live);

    for (pin, slot) in fired.iter().enumerate() {
        assert_eq!(
            dispatcher.dispatch(pin as u32, EdgeLevel::Low, Tick(0)),
            DispatchOutcome::Delivered
        );
        assert_eq!(slot.load(Ordering::SeqCst), INSTALLS - 1, "pin {pin}");
    }

    registry.clear_all();
    assert_eq!(drops.load(Ordering::SeqCst), total);
}

#[test]
fn test_contested_pin_keeps_exactly_one_binding() {
    const THREADS: usize = 6;
    const INSTALLS: usize = 100;

    let registry = Arc::new(PinEdgeRegistry::new());
    let drops = Arc::new(AtomicUsize::new(0));
    let fired = Arc::new(AtomicU64::new(NONE));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let registry = Arc::clone(&registry);
            let drops = Arc::clone(&drops);
            let fired = Arc::clone(&fired);
            thread::spawn(move || {
                (0..INSTALLS)
                    .map(|i| {
                        let handler = Tagged {
                            id: (t * INSTALLS + i) as u64,
                            fired: Arc::clone(&fired),
                            drops: Arc::clone(&drops),
                        };
                        registry.install(30, handler).unwrap()
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut generations = Vec::new();
    for handle in handles {
        generations.extend(handle.join().unwrap());
    }
    generations.sort_unstable();
    generations.dedup();
    assert_eq!(generations.len(), THREADS * INSTALLS);

    let binding = registry.lookup(Pin::new(30).unwrap()).unwrap();
    assert!(generations.binary_search(&binding.generation()).is_ok());
    assert_eq!(drops.load(Ordering::SeqCst), THREADS * INSTALLS - 1);
    assert_eq!(registry.installed_pins(), vec![Pin::new(30).unwrap()]);
}

#[test]
fn test_queued_gpio_counts_every_edge() {
    let engine = Arc::new(SimEngine::new());
    let settings = GpioSettings {
        dispatch: DispatchMode::Queued { capacity: 4096 },
        ..Default::default()
    };
    let gpio = Gpio::new(engine.clone(), &settings).unwrap();
    let edges = Arc::new(AtomicUsize::new(0));

    for pin in [5u32, 6, 13, 19] {
        let edges = Arc::clone(&edges);
        gpio.install_handler(pin, move |_: Pin, _: EdgeLevel, _: Tick| -> anyhow::Result<()> {
            edges.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    }

    let drivers: Vec<_> = [5u32, 6, 13, 19]
        .into_iter()
        .map(|pin| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                let pin = Pin::new(pin).unwrap();
                for i in 0..100 {
                    engine.set_input(pin, Level::from(i % 2 == 0));
                }
            })
        })
        .collect();
    for driver in drivers {
        driver.join().unwrap();
    }

    gpio.terminate();
    let stats = gpio.dispatch_stats();
    assert_eq!(stats.dropped, 0);
    assert_eq!(edges.load(Ordering::SeqCst), 400);
    assert_eq!(stats.delivered, 400);
}
