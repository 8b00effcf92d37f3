use log::debug;
use thiserror::Error;

use crate::component::Component;
use crate::expr::{mask, EvalError};
use crate::HashMap;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("unknown port `{path}`")]
    UnknownPort { path: String },
    #[error("width violation at `{path}`: value {value:#x} does not fit {width} bits")]
    WidthViolation { path: String, width: usize, value: u64 },
    #[error("combinational settling did not converge within {limit} iterations")]
    Unsettled { limit: usize },
    #[error("out-of-range address {addr:#x} on memory `{memory}` (depth {depth})")]
    InvalidMemoryAccess { memory: String, addr: u64, depth: usize },
    #[error("no case arm matches selector value {selector:#x}")]
    UnmatchedCase { selector: u64 },
    #[error("`{path}` already has a driver; fan-in is not allowed")]
    MultipleDrivers { path: String },
}

impl SimError {
    pub(crate) fn from_eval(e: EvalError) -> Self {
        match e {
            EvalError::UnknownNet(name) => SimError::UnknownPort { path: name },
            EvalError::OutOfRangeAddress { memory, addr, depth } => {
                SimError::InvalidMemoryAccess { memory, addr, depth }
            }
            EvalError::NoCaseMatch { selector } => SimError::UnmatchedCase { selector },
        }
    }
}

/// A free-running clock source. The value toggles once every `period` steps,
/// so a period of 1 gives one full clock cycle per two simulator steps.
#[derive(Debug, Clone)]
pub struct ClockGen {
    pub name: String,
    pub period: u64,
    value: u64,
    steps: u64,
}

impl ClockGen {
    fn new(name: String, period: u64) -> Self {
        Self { name, period: period.max(1), value: 0, steps: 0 }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    fn advance(&mut self) {
        self.steps += 1;
        if self.steps % self.period == 0 {
            self.value ^= 1;
        }
    }

    fn reset(&mut self) {
        self.value = 0;
        self.steps = 0;
    }
}

#[derive(Debug, Clone)]
enum Source {
    Output { comp: usize, port: String },
    Clock { index: usize },
}

#[derive(Debug, Clone)]
struct Binding {
    src: Source,
    dst: (usize, String),
}

const DEFAULT_SETTLE_LIMIT: usize = 16;

/// The behavioral simulator: an insertion-ordered collection of components,
/// clock generators, and connections, driven by a time-stepped loop with a
/// bounded combinational settle phase.
pub struct Simulator {
    components: Vec<Component>,
    index: HashMap<String, usize>,
    bindings: Vec<Binding>,
    clocks: Vec<ClockGen>,
    settle_limit: usize,
    step_count: u64,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
            index: HashMap::default(),
            bindings: Vec::new(),
            clocks: Vec::new(),
            settle_limit: DEFAULT_SETTLE_LIMIT,
            step_count: 0,
        }
    }

    pub fn with_settle_limit(mut self, limit: usize) -> Self {
        self.settle_limit = limit.max(1);
        self
    }

    /// Adds a component under `name`. The component is validated here;
    /// elaboration failures abort the build.
    pub fn add_component(
        &mut self,
        name: &str,
        mut component: Component,
    ) -> Result<usize, crate::component::ElabError> {
        component.check()?;
        let idx = self.components.len();
        self.index.insert(name.to_string(), idx);
        self.components.push(component.with_name(name));
        Ok(idx)
    }

    pub fn add_clock(&mut self, name: &str, period: u64) -> usize {
        let idx = self.clocks.len();
        self.clocks.push(ClockGen::new(name.to_string(), period));
        idx
    }

    /// Binds `src` (an output `comp.port` or a clock generator name) to the
    /// input `dst` (`comp.port`). Fan-out is unrestricted; a destination may
    /// have at most one source, and the two widths must agree.
    pub fn connect(&mut self, src: &str, dst: &str) -> Result<(), SimError> {
        let dst_pair = self.split_port(dst)?;
        let dst_width = self.port_width(dst_pair.0, &dst_pair.1, dst)?;
        if self
            .bindings
            .iter()
            .any(|b| b.dst.0 == dst_pair.0 && b.dst.1 == dst_pair.1)
        {
            return Err(SimError::MultipleDrivers { path: dst.to_string() });
        }
        let (source, src_width) =
            if let Some(ci) = self.clocks.iter().position(|c| c.name == src) {
                (Source::Clock { index: ci }, 1)
            } else {
                let (comp, port) = self.split_port(src)?;
                let width = self.port_width(comp, &port, src)?;
                (Source::Output { comp, port }, width)
            };
        if src_width != dst_width {
            return Err(SimError::WidthViolation {
                path: dst.to_string(),
                width: dst_width,
                value: src_width as u64,
            });
        }
        self.bindings.push(Binding { src: source, dst: dst_pair });
        Ok(())
    }

    fn port_width(&self, comp: usize, port: &str, path: &str) -> Result<usize, SimError> {
        self.components[comp]
            .ports()
            .iter()
            .find(|p| p.name == port)
            .map(|p| p.width())
            .ok_or_else(|| SimError::UnknownPort { path: path.to_string() })
    }

    fn split_port(&self, path: &str) -> Result<(usize, String), SimError> {
        let (comp, port) = path
            .split_once('.')
            .ok_or_else(|| SimError::UnknownPort { path: path.to_string() })?;
        let idx = *self
            .index
            .get(comp)
            .ok_or_else(|| SimError::UnknownPort { path: path.to_string() })?;
        Ok((idx, port.to_string()))
    }

    /// One simulation tick: advance the clocks, then propagate all components
    /// in insertion order until no wire changes, up to the settle bound.
    pub fn step(&mut self) -> Result<(), SimError> {
        self.step_count += 1;
        for clock in &mut self.clocks {
            clock.advance();
        }
        let bindings = self.bindings.clone();
        for pass in 0..self.settle_limit {
            let mut changed = false;
            for binding in &bindings {
                let value = match &binding.src {
                    Source::Clock { index } => self.clocks[*index].value(),
                    Source::Output { comp, port } => self.components[*comp].get_output(port)?,
                };
                let (ci, port) = &binding.dst;
                let old = self.components[*ci].peek(port)?;
                if old != value {
                    changed = true;
                }
                self.components[*ci].set_input(port, value)?;
            }
            for component in &mut self.components {
                changed |= component.propagate()?;
            }
            if !changed {
                debug!("settled after {} pass(es)", pass + 1);
                return Ok(());
            }
        }
        Err(SimError::Unsettled { limit: self.settle_limit })
    }

    pub fn run(&mut self, cycles: u64) -> Result<(), SimError> {
        for _ in 0..cycles {
            self.step()?;
        }
        Ok(())
    }

    /// Steps until `predicate` holds or `max_steps` elapse. Returns the
    /// number of steps taken. Used by debuggers as the breakpoint hook.
    pub fn run_until(
        &mut self,
        max_steps: u64,
        mut predicate: impl FnMut(&Simulator) -> bool,
    ) -> Result<u64, SimError> {
        for n in 0..max_steps {
            if predicate(self) {
                return Ok(n);
            }
            self.step()?;
        }
        Ok(max_steps)
    }

    /// Re-initializes latched state and clock generators to construction
    /// defaults. Idempotent.
    pub fn reset(&mut self) {
        for component in &mut self.components {
            component.reset_state();
        }
        for clock in &mut self.clocks {
            clock.reset();
        }
        self.step_count = 0;
    }

    pub fn poke(&mut self, path: &str, value: u64) -> Result<(), SimError> {
        let (idx, rest) = self.split_port(path)?;
        // The port lookup happens inside the component so nested paths work.
        let width = self.components[idx]
            .ports()
            .iter()
            .find(|p| p.name == rest)
            .map(|p| p.width());
        if let Some(w) = width {
            if value & !mask(w) != 0 {
                return Err(SimError::WidthViolation { path: path.to_string(), width: w, value });
            }
        }
        self.components[idx].poke(&rest, value)
    }

    pub fn peek(&self, path: &str) -> Result<u64, SimError> {
        if let Some(clock) = self.clocks.iter().find(|c| c.name == path) {
            return Ok(clock.value());
        }
        let (idx, rest) = self.split_port(path)?;
        self.components[idx].peek(&rest)
    }

    pub fn steps(&self) -> u64 {
        self.step_count
    }

    pub fn settle_limit(&self) -> usize {
        self.settle_limit
    }

    pub fn component(&self, name: &str) -> Option<&Component> {
        self.index.get(name).map(|i| &self.components[*i])
    }

    pub fn input_names(&self) -> Vec<String> {
        self.port_names(crate::wire::Direction::In)
    }

    pub fn output_names(&self) -> Vec<String> {
        self.port_names(crate::wire::Direction::Out)
    }

    fn port_names(&self, dir: crate::wire::Direction) -> Vec<String> {
        let mut names = Vec::new();
        for (name, idx) in self.component_names() {
            for port in self.components[idx].ports() {
                if port.direction == dir {
                    names.push(format!("{name}.{}", port.name));
                }
            }
        }
        names
    }

    fn component_names(&self) -> Vec<(String, usize)> {
        use itertools::Itertools;
        self.index
            .iter()
            .map(|(n, i)| (n.clone(), *i))
            .sorted_by_key(|(_, i)| *i)
            .collect()
    }

    /// All port signals as `(path, width)` pairs, for waveform writers.
    pub fn trace_signals(&self) -> Vec<(String, usize)> {
        let mut out = Vec::new();
        for clock in &self.clocks {
            out.push((clock.name.clone(), 1));
        }
        for (name, idx) in self.component_names() {
            for port in self.components[idx].ports() {
                out.push((format!("{name}.{}", port.name), port.width()));
            }
        }
        out
    }

    /// Snapshot of every traced signal's current value.
    pub fn trace_capture(&self) -> Vec<(String, u64)> {
        self.trace_signals()
            .into_iter()
            .map(|(name, _)| {
                let value = self.peek(&name).unwrap_or(0);
                (name, value)
            })
            .collect()
    }
}
