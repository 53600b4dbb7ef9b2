//! Background execution shell.
//!
//! A [`Simulator`] owns two threads: a propagation worker that runs settles,
//! steps and ticks on the attached [`Propagator`], and a ticker that requests
//! ticks at the configured frequency. The threads only talk through request
//! flags guarded by one mutex and two condition variables, so every public
//! method returns as soon as its request is recorded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, warn};

use crate::error::{Result, SimError};
use crate::listeners::{ListenerId, Listeners};
use crate::value::Value;

use super::propagator::{Propagation, Propagator};
use super::ticker;

/// Default tick frequency in Hz.
pub const DEFAULT_TICK_FREQUENCY: f64 = 1.0;
/// Default number of steps a settle may take before it is declared
/// oscillating.
pub const DEFAULT_OSCILLATION_BOUND: usize = 1000;
/// Default widest bus a component may declare.
pub const DEFAULT_MAX_BUS_WIDTH: u8 = 32;

/// Configuration for the simulator.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Clock ticks per second while auto-ticking.
    pub tick_frequency: f64,
    /// Steps a settle may take before it is declared oscillating.
    pub oscillation_bound: usize,
    /// Widest bus a component may declare (at most 64).
    pub max_bus_width: u8,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            tick_frequency: DEFAULT_TICK_FREQUENCY,
            oscillation_bound: DEFAULT_OSCILLATION_BOUND,
            max_bus_width: DEFAULT_MAX_BUS_WIDTH,
        }
    }
}

impl SimulatorConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the auto-tick frequency (in Hz).
    pub fn with_tick_frequency(mut self, tick_frequency: f64) -> Self {
        self.tick_frequency = tick_frequency;
        self
    }

    /// Set the step bound for a single settle.
    ///
    /// Larger bounds tolerate deeper combinational chains but take longer to
    /// flag a genuine oscillation.
    pub fn with_oscillation_bound(mut self, oscillation_bound: usize) -> Self {
        self.oscillation_bound = oscillation_bound;
        self
    }

    /// Set the widest bus components may declare.
    pub fn with_max_bus_width(mut self, max_bus_width: u8) -> Self {
        self.max_bus_width = max_bus_width;
        self
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        validate_frequency(self.tick_frequency)?;
        if self.oscillation_bound == 0 {
            return Err(SimError::config("oscillation bound must be at least 1"));
        }
        if self.max_bus_width == 0 || self.max_bus_width as u32 > Value::MAX_WIDTH {
            return Err(SimError::config(format!(
                "max bus width must be between 1 and {}, got {}",
                Value::MAX_WIDTH,
                self.max_bus_width
            )));
        }
        Ok(())
    }
}

fn validate_frequency(frequency: f64) -> Result<()> {
    if !frequency.is_finite() || frequency <= 0.0 {
        return Err(SimError::config(format!(
            "tick frequency must be a positive number of Hz, got {}",
            frequency
        )));
    }
    Ok(())
}

/// Payload-free notification from the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimulatorEvent {
    /// A settle finished (or hit the oscillation bound)
    PropagationCompleted,
    /// One or more clock ticks were applied
    TickCompleted,
    /// Values changed outside a settle: step, reset or a new propagator
    StateChanged,
}

/// Flags shared by the caller, the worker and the ticker.
#[derive(Debug, Default)]
pub(super) struct Control {
    pub(super) running: bool,
    pub(super) ticking: bool,
    pub(super) frequency: f64,
    pub(super) pending_ticks: u32,
    pub(super) propagate: bool,
    pub(super) steps: u32,
    pub(super) reset: bool,
    pub(super) attached: bool,
    pub(super) fault: bool,
    pub(super) shutdown: bool,
}

impl Control {
    fn has_work(&self) -> bool {
        self.reset || self.attached || self.steps > 0 || self.pending_ticks > 0 || (self.propagate && self.running)
    }
}

pub(super) struct Shared {
    control: Mutex<Control>,
    worker_wake: Condvar,
    ticker_wake: Condvar,
    propagator: Arc<Mutex<Option<Propagator>>>,
    listeners: Listeners<SimulatorEvent>,
}

impl Shared {
    pub(super) fn lock_control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_propagator(&self) -> MutexGuard<'_, Option<Propagator>> {
        self.propagator.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(super) fn notify_worker(&self) {
        self.worker_wake.notify_all();
    }

    pub(super) fn wait_ticker<'a>(&self, guard: MutexGuard<'a, Control>, wait: Duration) -> MutexGuard<'a, Control> {
        match self.ticker_wake.wait_timeout(guard, ticker::clamp_wait(wait)) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    fn wait_worker<'a>(&self, guard: MutexGuard<'a, Control>) -> MutexGuard<'a, Control> {
        match self.worker_wake.wait_timeout(guard, Duration::from_millis(100)) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    /// Record a request and wake both threads.
    fn request(&self, update: impl FnOnce(&mut Control)) -> Result<()> {
        let mut control = self.lock_control();
        if control.shutdown {
            return Err(SimError::ShutDown);
        }
        update(&mut control);
        drop(control);
        self.worker_wake.notify_all();
        self.ticker_wake.notify_all();
        Ok(())
    }
}

/// What the worker took off the request flags in one round.
#[derive(Debug, Default)]
struct Work {
    reset: bool,
    attached: bool,
    ticks: u32,
    steps: u32,
    propagate: bool,
}

/// Runs a propagator on background threads.
///
/// # Example
///
/// ```no_run
/// use gatesim_core::{Project, Simulator, SimulatorConfig};
///
/// let project = Project::new(SimulatorConfig::default())?;
/// let top = project.add_circuit("top");
/// let sim = Simulator::new(SimulatorConfig::default())?;
/// sim.attach(Some(project.new_propagator(&top)));
/// sim.set_running(true)?;
/// sim.set_ticking(true)?;
/// # Ok::<(), gatesim_core::SimError>(())
/// ```
pub struct Simulator {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl Simulator {
    /// Start the worker and ticker threads. Nothing runs until a propagator
    /// is attached and running is switched on.
    pub fn new(config: SimulatorConfig) -> Result<Self> {
        config.validate()?;
        let shared = Arc::new(Shared {
            control: Mutex::new(Control {
                frequency: config.tick_frequency,
                ..Control::default()
            }),
            worker_wake: Condvar::new(),
            ticker_wake: Condvar::new(),
            propagator: Arc::new(Mutex::new(None)),
            listeners: Listeners::new(),
        });

        let worker_shared = shared.clone();
        let worker = thread::Builder::new()
            .name("gatesim-worker".into())
            .spawn(move || run_worker(worker_shared))
            .map_err(|e| SimError::config(format!("cannot start worker thread: {}", e)))?;
        let ticker_shared = shared.clone();
        let ticker = thread::Builder::new()
            .name("gatesim-ticker".into())
            .spawn(move || ticker::run(ticker_shared))
            .map_err(|e| SimError::config(format!("cannot start ticker thread: {}", e)))?;

        debug!(frequency = config.tick_frequency, "simulator started");
        Ok(Self {
            shared,
            worker: Some(worker),
            ticker: Some(ticker),
        })
    }

    /// Replace the simulated propagator. Circuit edits seen by the new
    /// propagator wake the worker.
    pub fn attach(&self, propagator: Option<Propagator>) {
        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        if let Some(prop) = &propagator {
            prop.set_waker(Some(Arc::new(move || {
                if let Some(shared) = weak.upgrade() {
                    let _ = shared.request(|c| c.propagate = true);
                }
            })));
        }
        let old = std::mem::replace(&mut *self.shared.lock_propagator(), propagator);
        if let Some(old) = old {
            old.set_waker(None);
        }
        let _ = self.shared.request(|c| {
            c.attached = true;
            c.pending_ticks = 0;
            c.propagate = true;
        });
    }

    /// Start or stop settling on changes (and ticking, if enabled).
    pub fn set_running(&self, running: bool) -> Result<()> {
        self.shared.request(|c| {
            if running && !c.running {
                c.propagate = true;
            }
            c.running = running;
        })
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock_control().running
    }

    /// Turn automatic clock ticks on or off. Ticks only happen while running.
    pub fn set_ticking(&self, ticking: bool) -> Result<()> {
        self.shared.request(|c| c.ticking = ticking)
    }

    pub fn is_ticking(&self) -> bool {
        self.shared.lock_control().ticking
    }

    /// Request a single step (paused) or a settle (running).
    pub fn step(&self) -> Result<()> {
        self.shared.request(|c| c.steps = c.steps.saturating_add(1))
    }

    /// Request `count` clock ticks.
    pub fn tick(&self, count: u32) -> Result<()> {
        self.shared.request(|c| {
            c.pending_ticks = c.pending_ticks.saturating_add(count).min(ticker::MAX_PENDING_TICKS)
        })
    }

    pub fn set_tick_frequency(&self, frequency: f64) -> Result<()> {
        validate_frequency(frequency)?;
        self.shared.request(|c| c.frequency = frequency)
    }

    pub fn tick_frequency(&self) -> f64 {
        self.shared.lock_control().frequency
    }

    /// Request a reset of the attached propagator.
    pub fn reset(&self) -> Result<()> {
        self.shared.request(|c| {
            c.reset = true;
            c.pending_ticks = 0;
        })
    }

    /// Ask for a settle, e.g. after poking a pin through
    /// [`Simulator::with_propagator`].
    pub fn request_propagate(&self) -> Result<()> {
        self.shared.request(|c| c.propagate = true)
    }

    /// Check if a component fault stopped the simulation.
    pub fn fault_encountered(&self) -> bool {
        self.shared.lock_control().fault
    }

    pub fn clear_fault(&self) {
        self.shared.lock_control().fault = false;
    }

    /// Run `f` on the attached propagator, waiting for the worker to finish
    /// its current pass. `None` if nothing is attached.
    pub fn with_propagator<R>(&self, f: impl FnOnce(&mut Propagator) -> R) -> Option<R> {
        self.shared.lock_propagator().as_mut().map(f)
    }

    /// Shared handle to the propagator slot.
    pub fn propagator(&self) -> Arc<Mutex<Option<Propagator>>> {
        self.shared.propagator.clone()
    }

    pub fn add_listener<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&SimulatorEvent) + Send + Sync + 'static,
    {
        self.shared.listeners.add(callback)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Stop both threads and wait for them. Further requests fail with
    /// [`SimError::ShutDown`].
    pub fn shutdown(&mut self) {
        {
            let mut control = self.shared.lock_control();
            control.shutdown = true;
            control.running = false;
        }
        self.shared.worker_wake.notify_all();
        self.shared.ticker_wake.notify_all();
        for handle in [self.worker.take(), self.ticker.take()].into_iter().flatten() {
            if handle.join().is_err() {
                error!("simulator thread panicked during shutdown");
            }
        }
        if let Some(prop) = self.shared.lock_propagator().as_ref() {
            prop.set_waker(None);
        }
        debug!("simulator shut down");
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(shared: Arc<Shared>) {
    loop {
        let (work, running) = {
            let mut control = shared.lock_control();
            while !control.shutdown && !control.has_work() {
                control = shared.wait_worker(control);
            }
            if control.shutdown {
                break;
            }
            let running = control.running;
            let mut work = Work {
                reset: std::mem::take(&mut control.reset),
                attached: std::mem::take(&mut control.attached),
                ..Work::default()
            };
            if running {
                work.ticks = std::mem::take(&mut control.pending_ticks);
                let stepped = std::mem::take(&mut control.steps) > 0;
                work.propagate = std::mem::take(&mut control.propagate) || stepped;
            } else if control.pending_ticks > 0 {
                control.pending_ticks -= 1;
                work.ticks = 1;
            } else if control.steps > 0 {
                control.steps -= 1;
                work.steps = 1;
            }
            (work, running)
        };

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| perform(&shared, &work, running)));
        let stop = match outcome {
            Ok(Ok(events)) => {
                for event in &events.fired {
                    shared.listeners.fire(event);
                }
                events.oscillating
            }
            Ok(Err(err)) => {
                error!(error = %err, "simulation fault");
                shared.lock_control().fault = true;
                true
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(panic = %message, "component panicked during propagation");
                shared.lock_control().fault = true;
                true
            }
        };
        if stop {
            let mut control = shared.lock_control();
            control.running = false;
            control.pending_ticks = 0;
            control.propagate = false;
            drop(control);
            shared.ticker_wake.notify_all();
            shared.listeners.fire(&SimulatorEvent::StateChanged);
        }
    }
    debug!("worker thread exiting");
}

struct Outcome {
    fired: Vec<SimulatorEvent>,
    oscillating: bool,
}

fn perform(shared: &Shared, work: &Work, running: bool) -> Result<Outcome> {
    let mut guard = shared.lock_propagator();
    let mut outcome = Outcome {
        fired: Vec::new(),
        oscillating: false,
    };
    let Some(prop) = guard.as_mut() else {
        return Ok(outcome);
    };

    if work.reset {
        prop.reset();
        if running {
            prop.propagate()?;
        }
        outcome.fired.push(SimulatorEvent::StateChanged);
    }
    if work.attached {
        outcome.fired.push(SimulatorEvent::StateChanged);
    }
    if work.ticks > 0 {
        let result = prop.tick(work.ticks)?;
        outcome.oscillating |= report(result);
        outcome.fired.push(SimulatorEvent::TickCompleted);
    }
    if work.steps > 0 {
        prop.step()?;
        outcome.fired.push(SimulatorEvent::StateChanged);
    }
    if work.propagate {
        let result = prop.propagate()?;
        outcome.oscillating |= report(result);
        outcome.fired.push(SimulatorEvent::PropagationCompleted);
    }
    Ok(outcome)
}

fn report(result: Propagation) -> bool {
    if result.is_oscillating() {
        warn!(steps = result.steps(), "stopping simulation: circuit oscillates");
    }
    result.is_oscillating()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::{AttributeSet, Circuit, EndData, Location};
    use crate::components::CustomComponent;
    use crate::demos;
    use crate::edit::Transaction;
    use crate::project::Project;
    use crate::sim::InstanceState;
    use crossbeam::channel::{self, Receiver};
    use std::time::Instant;

    const PATIENCE: Duration = Duration::from_secs(5);

    fn project() -> Project {
        Project::new(SimulatorConfig::default().with_oscillation_bound(64)).unwrap()
    }

    fn events(sim: &Simulator) -> Receiver<SimulatorEvent> {
        let (tx, rx) = channel::unbounded();
        sim.add_listener(move |event| {
            let _ = tx.send(*event);
        });
        rx
    }

    fn wait_for(rx: &Receiver<SimulatorEvent>, wanted: SimulatorEvent) {
        let deadline = Instant::now() + PATIENCE;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(left) {
                Ok(event) if event == wanted => return,
                Ok(_) => continue,
                Err(_) => panic!("no {:?} event", wanted),
            }
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool) {
        let deadline = Instant::now() + PATIENCE;
        while !check() {
            assert!(Instant::now() < deadline, "condition never held");
            thread::sleep(Duration::from_millis(5));
        }
    }

    fn inverter(project: &Project) -> (Circuit, crate::circuit::ComponentId) {
        let circuit = project.add_circuit("inverter");
        let mut b = project.builder(&circuit);
        b.component("Pin", (0, 0), AttributeSet::new().with("label", "a")).unwrap();
        let not = b.component("NOT Gate", (60, 0), AttributeSet::new()).unwrap();
        b.component(
            "Pin",
            (60, 0),
            AttributeSet::new().with("label", "y").with("output", true),
        )
        .unwrap();
        b.wire((0, 0), (30, 0)).unwrap();
        b.commit().unwrap();
        (circuit, not)
    }

    fn output(sim: &Simulator) -> Value {
        sim.with_propagator(|p| p.value(Location::new(60, 0))).unwrap()
    }

    #[test]
    fn test_config_validation() {
        assert!(SimulatorConfig::default().validate().is_ok());
        assert!(SimulatorConfig::new().with_tick_frequency(0.0).validate().is_err());
        assert!(SimulatorConfig::new().with_tick_frequency(f64::NAN).validate().is_err());
        assert!(SimulatorConfig::new().with_oscillation_bound(0).validate().is_err());
        assert!(SimulatorConfig::new().with_max_bus_width(0).validate().is_err());
        assert!(SimulatorConfig::new().with_max_bus_width(65).validate().is_err());
        assert!(Simulator::new(SimulatorConfig::new().with_tick_frequency(-1.0)).is_err());
    }

    #[test]
    fn test_running_settles_changes() {
        let project = project();
        let (circuit, _) = inverter(&project);
        let sim = Simulator::new(SimulatorConfig::default()).unwrap();
        let rx = events(&sim);
        sim.attach(Some(project.new_propagator(&circuit)));
        sim.set_running(true).unwrap();
        wait_for(&rx, SimulatorEvent::PropagationCompleted);
        assert_eq!(output(&sim), Value::TRUE);

        sim.with_propagator(|p| p.poke_pin_named("a", Value::TRUE)).unwrap().unwrap();
        sim.request_propagate().unwrap();
        wait_for(&rx, SimulatorEvent::PropagationCompleted);
        assert_eq!(output(&sim), Value::FALSE);
    }

    #[test]
    fn test_circuit_edit_wakes_worker() {
        let project = project();
        let (circuit, not) = inverter(&project);
        let sim = Simulator::new(SimulatorConfig::default()).unwrap();
        let rx = events(&sim);
        sim.attach(Some(project.new_propagator(&circuit)));
        sim.set_running(true).unwrap();
        wait_for(&rx, SimulatorEvent::PropagationCompleted);

        let buffer = project.create_component("Buffer", (60, 0), AttributeSet::new()).unwrap();
        project
            .submit(&Transaction::new().replace(&circuit, vec![not], vec![buffer]))
            .unwrap();
        wait_until(|| output(&sim) == Value::FALSE);
    }

    #[test]
    fn test_paused_ticks_run_one_at_a_time() {
        let project = project();
        let circuit = demos::ring(&project, 3, 1).unwrap();
        let sim = Simulator::new(SimulatorConfig::default()).unwrap();
        let rx = events(&sim);
        sim.attach(Some(project.new_propagator(&circuit)));
        sim.tick(3).unwrap();
        for _ in 0..3 {
            wait_for(&rx, SimulatorEvent::TickCompleted);
        }
        assert_eq!(sim.with_propagator(|p| p.clock()), Some(3));
        assert!(!sim.is_running());
    }

    #[test]
    fn test_auto_ticking() {
        let project = project();
        let circuit = demos::counter(&project, 2).unwrap();
        let sim = Simulator::new(SimulatorConfig::default().with_tick_frequency(500.0)).unwrap();
        sim.attach(Some(project.new_propagator(&circuit)));
        sim.set_ticking(true).unwrap();
        sim.set_running(true).unwrap();
        wait_until(|| sim.with_propagator(|p| p.clock()).unwrap_or(0) >= 10);

        sim.set_running(false).unwrap();
        sim.reset().unwrap();
        wait_until(|| sim.with_propagator(|p| p.clock()) == Some(0));
    }

    #[test]
    fn test_oscillation_stops_running() {
        let project = project();
        let circuit = demos::ring(&project, 3, 0).unwrap();
        let sim = Simulator::new(SimulatorConfig::default()).unwrap();
        sim.attach(Some(project.new_propagator(&circuit)));
        sim.set_running(true).unwrap();
        wait_until(|| !sim.is_running());
        assert_eq!(sim.with_propagator(|p| p.is_oscillating()), Some(true));
        assert!(!sim.fault_encountered());
    }

    #[derive(Debug)]
    struct Panicky;

    impl CustomComponent for Panicky {
        fn ends(&self, location: Location) -> Vec<EndData> {
            vec![EndData::output(location, crate::value::BitWidth::ONE)]
        }

        fn propagate(&self, _state: &mut InstanceState<'_>) -> Result<()> {
            panic!("boom")
        }
    }

    #[test]
    fn test_panic_is_a_fault() {
        let project = project();
        project.register_custom("Panicky", Arc::new(Panicky));
        let circuit = project.add_circuit("broken");
        let mut b = project.builder(&circuit);
        b.component("Panicky", (0, 0), AttributeSet::new()).unwrap();
        b.commit().unwrap();

        let sim = Simulator::new(SimulatorConfig::default()).unwrap();
        sim.attach(Some(project.new_propagator(&circuit)));
        sim.set_running(true).unwrap();
        wait_until(|| sim.fault_encountered());
        assert!(!sim.is_running());
        sim.clear_fault();
        assert!(!sim.fault_encountered());
    }

    #[test]
    fn test_requests_fail_after_shutdown() {
        let mut sim = Simulator::new(SimulatorConfig::default()).unwrap();
        sim.shutdown();
        assert_eq!(sim.set_running(true), Err(SimError::ShutDown));
        assert_eq!(sim.tick(1), Err(SimError::ShutDown));
        assert!(sim.with_propagator(|p| p.clock()).is_none());
    }
}
