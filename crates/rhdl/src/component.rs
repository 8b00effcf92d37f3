use bit_set::BitSet;
use thiserror::Error;

use crate::expr::{mask, EvalEnv, EvalError, Expr};
use crate::flatting::{flatten, FlattenError, IrBundle};
use crate::ir::{
    AssignDecl, BehavioralIr, Connection, InstanceDecl, MemoryDecl, NetDecl, PortDecl,
    ProcessDecl, RegAssign, RegDecl, SyncReadPort, WritePort,
};
use crate::params::{ParamError, ParamExpr, Params};
use crate::sim::SimError;
use crate::wire::{Direction, Port};
use crate::{HashMap, HashSet};

#[derive(Error, Debug)]
pub enum ElabError {
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Flatten(#[from] FlattenError),
    #[error("width mismatch at `{path}`: declared {expected}, found {found}")]
    WidthMismatch { path: String, expected: usize, found: usize },
    #[error("invalid width {width} at `{path}` (must be 1..=64)")]
    BadWidth { path: String, width: usize },
    #[error("unknown signal `{path}`")]
    UnknownSignal { path: String },
    #[error("unknown memory `{path}`")]
    UnknownMemory { path: String },
    #[error("duplicate name `{path}`")]
    DuplicateName { path: String },
    #[error("`{path}` is driven by more than one continuous assignment")]
    MultipleDriver { path: String },
    #[error("fan-in at `{path}`: an input may have at most one source")]
    FanIn { path: String },
    #[error("`{path}` cannot be used in that direction")]
    DirectionConflict { path: String },
    #[error("write enable at `{path}` is {width} bits wide; it must reduce to a single bit")]
    MultiBitEnable { path: String, width: usize },
    #[error("memory `{path}` is read-only but has a write port")]
    ReadOnlyWrite { path: String },
}

/// One end of a structural link, relative to the enclosing component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A port or internal net of this component.
    Local(String),
    /// A port of a named child instance.
    Child { inst: String, port: String },
}

impl Endpoint {
    fn parse(path: &str) -> Self {
        match path.split_once('.') {
            Some((inst, port)) => {
                Endpoint::Child { inst: inst.to_string(), port: port.to_string() }
            }
            None => Endpoint::Local(path.to_string()),
        }
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Endpoint::Local(name) => write!(f, "{name}"),
            Endpoint::Child { inst, port } => write!(f, "{inst}.{port}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Link {
    src: Endpoint,
    dst: Endpoint,
}

const SETTLE_LIMIT: usize = 16;

#[derive(Debug, Clone)]
struct MemoryState {
    decl: MemoryDecl,
    data: Vec<u64>,
}

impl MemoryState {
    fn new(decl: MemoryDecl) -> Self {
        let mut data = vec![0u64; decl.depth];
        for (i, v) in decl.init.iter().enumerate().take(decl.depth) {
            data[i] = *v & mask(decl.width);
        }
        Self { decl, data }
    }

    fn reset(&mut self) {
        for (i, slot) in self.data.iter_mut().enumerate() {
            *slot = self.decl.init.get(i).copied().unwrap_or(0) & mask(self.decl.width);
        }
    }
}

/// A hardware unit: a port table, optional latched state, continuous
/// assignments, clocked processes, memory arrays, and child instances. The
/// builder methods mirror the construction primitives of the surface
/// language; `propagate` interprets the description directly and `ir`
/// produces the serializable behavioral record.
#[derive(Debug, Clone)]
pub struct Component {
    module: String,
    instance: Option<String>,
    params: Params,
    resolved_params: Option<HashMap<String, u64>>,
    ports: Vec<Port>,
    port_index: HashMap<String, usize>,
    nets: Vec<NetDecl>,
    net_values: HashMap<String, u64>,
    regs: Vec<RegDecl>,
    reg_values: HashMap<String, u64>,
    assigns: Vec<AssignDecl>,
    assign_order: Option<Vec<usize>>,
    processes: Vec<ProcessDecl>,
    memories: Vec<MemoryState>,
    /// Which clocks (by position in `clock_names` order) sampled high on the
    /// previous propagate.
    last_clocks: BitSet,
    children: Vec<Component>,
    child_index: HashMap<String, usize>,
    links: Vec<Link>,
    ties: Vec<(String, String, u64)>,
}

impl Component {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            instance: None,
            params: Params::new(),
            resolved_params: None,
            ports: Vec::new(),
            port_index: HashMap::default(),
            nets: Vec::new(),
            net_values: HashMap::default(),
            regs: Vec::new(),
            reg_values: HashMap::default(),
            assigns: Vec::new(),
            assign_order: None,
            processes: Vec::new(),
            memories: Vec::new(),
            last_clocks: BitSet::new(),
            children: Vec::new(),
            child_index: HashMap::default(),
            links: Vec::new(),
            ties: Vec::new(),
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn instance_name(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    pub fn with_name(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    // ---- construction primitives -------------------------------------------

    pub fn parameter(&mut self, name: impl Into<String>, value: u64) -> &mut Self {
        self.params.insert(name, value);
        self.resolved_params = None;
        self
    }

    pub fn derived_parameter(&mut self, name: impl Into<String>, expr: ParamExpr) -> &mut Self {
        self.params.insert_derived(name, expr);
        self.resolved_params = None;
        self
    }

    pub fn set_parameter(&mut self, name: &str, value: u64) -> Result<(), ParamError> {
        self.params.override_value(name, value)?;
        self.resolved_params = None;
        Ok(())
    }

    /// Resolves the parameter table (memoized) and reads one value.
    pub fn param(&mut self, name: &str) -> Result<u64, ParamError> {
        if self.resolved_params.is_none() {
            self.resolved_params = Some(self.params.resolve()?);
        }
        self.resolved_params
            .as_ref()
            .unwrap()
            .get(name)
            .copied()
            .ok_or_else(|| ParamError::Unknown { name: name.to_string() })
    }

    pub fn port_input(&mut self, name: &str, width: usize) -> &mut Self {
        self.add_port(Port::new(name, Direction::In, width));
        self
    }

    pub fn port_input_default(&mut self, name: &str, width: usize, default: u64) -> &mut Self {
        self.add_port(Port::new(name, Direction::In, width).with_default(default));
        self
    }

    pub fn port_output(&mut self, name: &str, width: usize) -> &mut Self {
        self.add_port(Port::new(name, Direction::Out, width));
        self
    }

    fn add_port(&mut self, port: Port) {
        let idx = self.ports.len();
        self.port_index.insert(port.name.clone(), idx);
        self.ports.push(port);
    }

    /// Declares an internal net.
    pub fn wire(&mut self, name: &str, width: usize) -> &mut Self {
        self.nets.push(NetDecl { name: name.to_string(), width });
        self
    }

    /// Declares a latched state cell.
    pub fn reg(&mut self, name: &str, width: usize, init: u64) -> &mut Self {
        self.reg_values.insert(name.to_string(), init & mask(width));
        self.regs.push(RegDecl { name: name.to_string(), width, init: init & mask(width) });
        self
    }

    /// Continuous assignment onto an output port or internal net.
    pub fn assign(&mut self, target: &str, expr: Expr) -> &mut Self {
        self.assigns.push(AssignDecl { target: target.to_string(), expr });
        self.assign_order = None;
        self
    }

    /// Adds a clocked process of non-blocking register updates.
    pub fn sequential(&mut self, process: ProcessDecl) -> &mut Self {
        self.processes.push(process);
        self
    }

    pub fn memory(&mut self, name: &str, depth: usize, width: usize) -> &mut Self {
        self.memories.push(MemoryState::new(MemoryDecl {
            name: name.to_string(),
            depth,
            width,
            init: Vec::new(),
            read_only: false,
            writes: Vec::new(),
            sync_reads: Vec::new(),
        }));
        self
    }

    pub fn memory_init(
        &mut self,
        name: &str,
        depth: usize,
        width: usize,
        init: Vec<u64>,
        read_only: bool,
    ) -> &mut Self {
        self.memories.push(MemoryState::new(MemoryDecl {
            name: name.to_string(),
            depth,
            width,
            init,
            read_only,
            writes: Vec::new(),
            sync_reads: Vec::new(),
        }));
        self
    }

    /// Binds a synchronous write port to a declared memory.
    pub fn sync_write(
        &mut self,
        memory: &str,
        clock: &str,
        addr: Expr,
        data: Expr,
        enable: Expr,
    ) -> &mut Self {
        if let Some(m) = self.memories.iter_mut().find(|m| m.decl.name == memory) {
            m.decl.writes.push(WritePort {
                clock: clock.to_string(),
                addr,
                data,
                enable,
            });
        }
        self
    }

    /// Binds a synchronous read port; `target` must be a declared reg of the
    /// memory's width.
    pub fn sync_read(&mut self, memory: &str, clock: &str, target: &str, addr: Expr) -> &mut Self {
        if let Some(m) = self.memories.iter_mut().find(|m| m.decl.name == memory) {
            m.decl.sync_reads.push(SyncReadPort {
                clock: clock.to_string(),
                target: target.to_string(),
                addr,
            });
        }
        self
    }

    /// Adds a child instance under `name`.
    pub fn instance(&mut self, name: &str, child: Component) -> &mut Self {
        let idx = self.children.len();
        self.child_index.insert(name.to_string(), idx);
        self.children.push(child.with_name(name));
        self
    }

    /// Structural connection from a readable endpoint (own input port, own
    /// net, or child output) to a writable one (child input, own output, own
    /// net). Paths are `name` or `inst.port`.
    pub fn link(&mut self, src: &str, dst: &str) -> &mut Self {
        self.links.push(Link { src: Endpoint::parse(src), dst: Endpoint::parse(dst) });
        self
    }

    /// Ties a child input port to a constant.
    pub fn tie(&mut self, inst: &str, port: &str, value: u64) -> &mut Self {
        self.ties.push((inst.to_string(), port.to_string(), value));
        self
    }

    // ---- direct access ------------------------------------------------------

    pub fn set_input(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let idx = *self
            .port_index
            .get(name)
            .ok_or_else(|| SimError::UnknownPort { path: name.to_string() })?;
        let port = &mut self.ports[idx];
        if port.direction != Direction::In {
            return Err(SimError::UnknownPort { path: name.to_string() });
        }
        if value & !mask(port.width()) != 0 {
            return Err(SimError::WidthViolation {
                path: name.to_string(),
                width: port.width(),
                value,
            });
        }
        port.attach();
        port.write(value);
        Ok(())
    }

    pub fn get_output(&self, name: &str) -> Result<u64, SimError> {
        let idx = *self
            .port_index
            .get(name)
            .ok_or_else(|| SimError::UnknownPort { path: name.to_string() })?;
        Ok(self.ports[idx].read())
    }

    /// Reads any signal by hierarchical path (`port`, `net`, `inst.port`, ...).
    pub fn peek(&self, path: &str) -> Result<u64, SimError> {
        match path.split_once('.') {
            Some((inst, rest)) => {
                let idx = self
                    .child_index
                    .get(inst)
                    .ok_or_else(|| SimError::UnknownPort { path: path.to_string() })?;
                self.children[*idx].peek(rest)
            }
            None => self
                .signal(path)
                .ok_or_else(|| SimError::UnknownPort { path: path.to_string() }),
        }
    }

    /// Writes an input port by hierarchical path.
    pub fn poke(&mut self, path: &str, value: u64) -> Result<(), SimError> {
        match path.split_once('.') {
            Some((inst, rest)) => {
                let idx = *self
                    .child_index
                    .get(inst)
                    .ok_or_else(|| SimError::UnknownPort { path: path.to_string() })?;
                self.children[idx].poke(rest, value)
            }
            None => self.set_input(path, value),
        }
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn input_names(&self) -> Vec<String> {
        self.ports
            .iter()
            .filter(|p| p.direction == Direction::In)
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.ports
            .iter()
            .filter(|p| p.direction == Direction::Out)
            .map(|p| p.name.clone())
            .collect()
    }

    fn signal(&self, name: &str) -> Option<u64> {
        if let Some(idx) = self.port_index.get(name) {
            return Some(self.ports[*idx].read());
        }
        if let Some(v) = self.net_values.get(name) {
            return Some(*v);
        }
        if self.nets.iter().any(|n| n.name == name) {
            return Some(0);
        }
        if let Some(v) = self.reg_values.get(name) {
            return Some(*v);
        }
        None
    }

    fn write_signal(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        if let Some(idx) = self.port_index.get(name) {
            let port = &mut self.ports[*idx];
            if port.direction == Direction::In {
                port.attach();
            }
            port.write(value);
            return Ok(());
        }
        if let Some(decl) = self.nets.iter().find(|n| n.name == name) {
            let w = decl.width;
            self.net_values.insert(name.to_string(), value & mask(w));
            return Ok(());
        }
        Err(SimError::UnknownPort { path: name.to_string() })
    }

    // ---- propagation --------------------------------------------------------

    /// Recomputes outputs from inputs: samples clocks, latches registers and
    /// memories on rising edges, then settles structural links, children, and
    /// continuous assignments to a fixed point. Returns whether any
    /// observable value changed.
    pub fn propagate(&mut self) -> Result<bool, SimError> {
        let before = self.state_snapshot();

        let ties = self.ties.clone();
        for (inst, port, value) in ties {
            if let Some(idx) = self.child_index.get(&inst).copied() {
                self.children[idx].set_input(&port, value)?;
            }
        }

        // Sample every clock once, at the start of the behavioral step. The
        // `clock_names` order is fixed by declaration order, so positional
        // membership in the bitset is stable across propagates.
        let mut rising: HashMap<String, bool> = HashMap::default();
        for (i, clock) in self.clock_names().into_iter().enumerate() {
            let cur = self.signal(&clock).unwrap_or(0) & 1;
            let was_high = self.last_clocks.contains(i);
            rising.insert(clock, !was_high && cur == 1);
            if cur == 1 {
                self.last_clocks.insert(i);
            } else {
                self.last_clocks.remove(i);
            }
        }

        // Two-phase non-blocking update: every right-hand side is sampled
        // against the pre-edge state before any register is written.
        let mut shadow: Vec<(String, u64)> = Vec::new();
        for process in &self.processes {
            let reset_active = process
                .reset
                .as_ref()
                .map(|r| self.signal(r).unwrap_or(0) & 1 == 1)
                .unwrap_or(false);
            let edge = rising.get(&process.clock).copied().unwrap_or(false);

            if process.async_reset && reset_active {
                for (reg, value) in &process.reset_values {
                    let w = self.reg_width(reg);
                    shadow.push((reg.clone(), value & mask(w)));
                }
            } else if edge {
                if reset_active {
                    for (reg, value) in &process.reset_values {
                        let w = self.reg_width(reg);
                        shadow.push((reg.clone(), value & mask(w)));
                    }
                } else {
                    for stmt in &process.body {
                        let w = self.reg_width(&stmt.reg);
                        let v = stmt.expr.eval(self).map_err(SimError::from_eval)?;
                        shadow.push((stmt.reg.clone(), v & mask(w)));
                    }
                }
            }
        }

        // Memory ports sample against the same pre-edge state.
        let mut mem_writes: Vec<(usize, u64, u64)> = Vec::new();
        let mut mem_latches: Vec<(String, u64)> = Vec::new();
        for (mi, mem) in self.memories.iter().enumerate() {
            for wp in &mem.decl.writes {
                if !rising.get(&wp.clock).copied().unwrap_or(false) {
                    continue;
                }
                if wp.enable.eval(self).map_err(SimError::from_eval)? & 1 == 0 {
                    continue;
                }
                let addr = wp.addr.eval(self).map_err(SimError::from_eval)?;
                if addr as usize >= mem.decl.depth {
                    return Err(SimError::InvalidMemoryAccess {
                        memory: mem.decl.name.clone(),
                        addr,
                        depth: mem.decl.depth,
                    });
                }
                let data = wp.data.eval(self).map_err(SimError::from_eval)?;
                mem_writes.push((mi, addr, data & mask(mem.decl.width)));
            }
            for rp in &mem.decl.sync_reads {
                if !rising.get(&rp.clock).copied().unwrap_or(false) {
                    continue;
                }
                let addr = rp.addr.eval(self).map_err(SimError::from_eval)?;
                if addr as usize >= mem.decl.depth {
                    return Err(SimError::InvalidMemoryAccess {
                        memory: mem.decl.name.clone(),
                        addr,
                        depth: mem.decl.depth,
                    });
                }
                mem_latches.push((rp.target.clone(), mem.data[addr as usize]));
            }
        }

        for (reg, value) in shadow {
            self.reg_values.insert(reg, value);
        }
        for (mi, addr, data) in mem_writes {
            self.memories[mi].data[addr as usize] = data;
        }
        for (target, value) in mem_latches {
            let w = self.reg_width(&target);
            self.reg_values.insert(target, value & mask(w));
        }

        // Combinational fixed point: links, children, and own assigns are
        // re-run until nothing moves. The bound catches true loops.
        let order = self.ensure_assign_order();
        let mut iterations = 0;
        loop {
            let mut changed = false;
            if !self.children.is_empty() {
                changed |= self.copy_links()?;
                for child in &mut self.children {
                    changed |= child.propagate()?;
                }
                changed |= self.copy_links()?;
            }
            for &i in &order {
                let assign = self.assigns[i].clone();
                let value = assign.expr.eval(self).map_err(SimError::from_eval)?;
                if self.signal(&assign.target) != Some(value) {
                    changed = true;
                }
                self.write_signal(&assign.target, value)?;
            }
            if !changed {
                break;
            }
            iterations += 1;
            if iterations >= SETTLE_LIMIT {
                return Err(SimError::Unsettled { limit: SETTLE_LIMIT });
            }
        }

        Ok(before != self.state_snapshot())
    }

    fn state_snapshot(&self) -> Vec<u64> {
        let mut snap: Vec<u64> = self.ports.iter().map(|p| p.read()).collect();
        for net in &self.nets {
            snap.push(self.net_values.get(&net.name).copied().unwrap_or(0));
        }
        for reg in &self.regs {
            snap.push(self.reg_values.get(&reg.name).copied().unwrap_or(reg.init));
        }
        for child in &self.children {
            snap.extend(child.state_snapshot());
        }
        snap
    }

    fn clock_names(&self) -> Vec<String> {
        let mut seen = HashSet::default();
        let mut out = Vec::new();
        for p in &self.processes {
            if seen.insert(p.clock.clone()) {
                out.push(p.clock.clone());
            }
        }
        for m in &self.memories {
            for wp in &m.decl.writes {
                if seen.insert(wp.clock.clone()) {
                    out.push(wp.clock.clone());
                }
            }
            for rp in &m.decl.sync_reads {
                if seen.insert(rp.clock.clone()) {
                    out.push(rp.clock.clone());
                }
            }
        }
        out
    }

    fn reg_width(&self, name: &str) -> usize {
        self.regs.iter().find(|r| r.name == name).map(|r| r.width).unwrap_or(64)
    }

    fn copy_links(&mut self) -> Result<bool, SimError> {
        let mut changed = false;
        let links = self.links.clone();
        for link in &links {
            let value = match &link.src {
                Endpoint::Local(name) => self
                    .signal(name)
                    .ok_or_else(|| SimError::UnknownPort { path: name.clone() })?,
                Endpoint::Child { inst, port } => {
                    let idx = *self
                        .child_index
                        .get(inst)
                        .ok_or_else(|| SimError::UnknownPort { path: link.src.to_string() })?;
                    self.children[idx].get_output(port)?
                }
            };
            match &link.dst {
                Endpoint::Local(name) => {
                    if self.signal(name) != Some(value) {
                        changed = true;
                    }
                    self.write_signal(name, value)?;
                }
                Endpoint::Child { inst, port } => {
                    let idx = *self
                        .child_index
                        .get(inst)
                        .ok_or_else(|| SimError::UnknownPort { path: link.dst.to_string() })?;
                    if self.children[idx].peek(port)? != value {
                        changed = true;
                    }
                    self.children[idx].set_input(port, value)?;
                }
            }
        }
        Ok(changed)
    }

    /// Topologically orders the continuous assignments where possible. A
    /// cyclic subset keeps declaration order; the simulator's settle loop is
    /// the arbiter for whether such a cycle converges.
    fn ensure_assign_order(&mut self) -> Vec<usize> {
        if let Some(order) = &self.assign_order {
            return order.clone();
        }
        let n = self.assigns.len();
        let mut target_of: HashMap<&str, usize> = HashMap::default();
        for (i, a) in self.assigns.iter().enumerate() {
            target_of.entry(a.target.as_str()).or_insert(i);
        }
        let mut deps: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree = vec![0usize; n];
        for (i, a) in self.assigns.iter().enumerate() {
            let mut nets = HashSet::default();
            a.expr.collect_nets(&mut nets);
            for net in nets {
                if let Some(&j) = target_of.get(net.as_str()) {
                    if j != i {
                        deps[j].push(i);
                        indegree[i] += 1;
                    }
                }
            }
        }
        let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut head = 0;
        while head < queue.len() {
            let u = queue[head];
            head += 1;
            order.push(u);
            for &v in &deps[u] {
                indegree[v] -= 1;
                if indegree[v] == 0 {
                    queue.push(v);
                }
            }
        }
        for i in 0..n {
            if !order.contains(&i) {
                order.push(i);
            }
        }
        self.assign_order = Some(order.clone());
        order
    }

    /// Restores latched state (registers, memories, edge detectors) to
    /// construction defaults.
    pub fn reset_state(&mut self) {
        for reg in &self.regs {
            self.reg_values.insert(reg.name.clone(), reg.init);
        }
        for mem in &mut self.memories {
            mem.reset();
        }
        self.last_clocks.make_empty();
        for child in &mut self.children {
            child.reset_state();
        }
    }

    // ---- validation ---------------------------------------------------------

    /// Structural and width validation of the whole description. Runs once
    /// before a component joins a simulator or is lowered.
    pub fn check(&mut self) -> Result<(), ElabError> {
        // Resolve parameters first so later width reads are stable.
        if self.resolved_params.is_none() {
            self.resolved_params = Some(self.params.resolve()?);
        }

        let mut names: HashSet<&str> = HashSet::default();
        for p in &self.ports {
            if p.width() == 0 || p.width() > 64 {
                return Err(ElabError::BadWidth { path: self.path(&p.name), width: p.width() });
            }
            if !names.insert(&p.name) {
                return Err(ElabError::DuplicateName { path: self.path(&p.name) });
            }
        }
        for n in &self.nets {
            if n.width == 0 || n.width > 64 {
                return Err(ElabError::BadWidth { path: self.path(&n.name), width: n.width });
            }
            if !names.insert(&n.name) {
                return Err(ElabError::DuplicateName { path: self.path(&n.name) });
            }
        }
        for r in &self.regs {
            if r.width == 0 || r.width > 64 {
                return Err(ElabError::BadWidth { path: self.path(&r.name), width: r.width });
            }
            if !names.insert(&r.name) {
                return Err(ElabError::DuplicateName { path: self.path(&r.name) });
            }
        }

        let mut driven: HashSet<&str> = HashSet::default();
        for a in &self.assigns {
            let target_width = match self.port_index.get(&a.target) {
                Some(idx) => {
                    let p = &self.ports[*idx];
                    if p.direction != Direction::Out {
                        return Err(ElabError::DirectionConflict { path: self.path(&a.target) });
                    }
                    p.width()
                }
                None => self
                    .nets
                    .iter()
                    .find(|n| n.name == a.target)
                    .map(|n| n.width)
                    .ok_or_else(|| ElabError::UnknownSignal { path: self.path(&a.target) })?,
            };
            if !driven.insert(&a.target) {
                return Err(ElabError::MultipleDriver { path: self.path(&a.target) });
            }
            if a.expr.width() != target_width {
                return Err(ElabError::WidthMismatch {
                    path: self.path(&a.target),
                    expected: target_width,
                    found: a.expr.width(),
                });
            }
            self.check_expr(&a.expr)?;
        }

        for proc in &self.processes {
            self.check_one_bit(&proc.clock)?;
            if let Some(reset) = &proc.reset {
                self.check_one_bit(reset)?;
            }
            for (reg, _) in &proc.reset_values {
                if !self.regs.iter().any(|r| &r.name == reg) {
                    return Err(ElabError::UnknownSignal { path: self.path(reg) });
                }
            }
            for stmt in &proc.body {
                let w = self
                    .regs
                    .iter()
                    .find(|r| r.name == stmt.reg)
                    .map(|r| r.width)
                    .ok_or_else(|| ElabError::UnknownSignal { path: self.path(&stmt.reg) })?;
                if stmt.expr.width() != w {
                    return Err(ElabError::WidthMismatch {
                        path: self.path(&stmt.reg),
                        expected: w,
                        found: stmt.expr.width(),
                    });
                }
                self.check_expr(&stmt.expr)?;
            }
        }

        for mem in &self.memories {
            if mem.decl.width == 0 || mem.decl.width > 64 {
                return Err(ElabError::BadWidth {
                    path: self.path(&mem.decl.name),
                    width: mem.decl.width,
                });
            }
            if mem.decl.read_only && !mem.decl.writes.is_empty() {
                return Err(ElabError::ReadOnlyWrite { path: self.path(&mem.decl.name) });
            }
            for wp in &mem.decl.writes {
                self.check_one_bit(&wp.clock)?;
                if wp.enable.width() != 1 {
                    return Err(ElabError::MultiBitEnable {
                        path: self.path(&mem.decl.name),
                        width: wp.enable.width(),
                    });
                }
                if wp.data.width() != mem.decl.width {
                    return Err(ElabError::WidthMismatch {
                        path: self.path(&mem.decl.name),
                        expected: mem.decl.width,
                        found: wp.data.width(),
                    });
                }
                self.check_expr(&wp.addr)?;
                self.check_expr(&wp.data)?;
                self.check_expr(&wp.enable)?;
            }
            for rp in &mem.decl.sync_reads {
                self.check_one_bit(&rp.clock)?;
                let w = self
                    .regs
                    .iter()
                    .find(|r| r.name == rp.target)
                    .map(|r| r.width)
                    .ok_or_else(|| ElabError::UnknownSignal { path: self.path(&rp.target) })?;
                if w != mem.decl.width {
                    return Err(ElabError::WidthMismatch {
                        path: self.path(&rp.target),
                        expected: mem.decl.width,
                        found: w,
                    });
                }
                self.check_expr(&rp.addr)?;
            }
        }

        // Structure: endpoints, widths, fan-in.
        let mut driven_inputs: HashSet<String> = HashSet::default();
        for link in &self.links {
            let src_width = self.endpoint_width(&link.src, Direction::Out)?;
            let dst_width = self.endpoint_width(&link.dst, Direction::In)?;
            if src_width != dst_width {
                return Err(ElabError::WidthMismatch {
                    path: self.path(&link.dst.to_string()),
                    expected: dst_width,
                    found: src_width,
                });
            }
            if !driven_inputs.insert(link.dst.to_string()) {
                return Err(ElabError::FanIn { path: self.path(&link.dst.to_string()) });
            }
        }
        for (inst, port, _) in &self.ties {
            let ep = Endpoint::Child { inst: inst.clone(), port: port.clone() };
            self.endpoint_width(&ep, Direction::In)?;
            if !driven_inputs.insert(ep.to_string()) {
                return Err(ElabError::FanIn { path: self.path(&ep.to_string()) });
            }
        }

        for child in &mut self.children {
            child.check()?;
        }
        self.ensure_assign_order();
        Ok(())
    }

    fn check_one_bit(&self, name: &str) -> Result<(), ElabError> {
        match self.local_width(name) {
            Some(1) => Ok(()),
            Some(w) => Err(ElabError::WidthMismatch {
                path: self.path(name),
                expected: 1,
                found: w,
            }),
            None => Err(ElabError::UnknownSignal { path: self.path(name) }),
        }
    }

    fn local_width(&self, name: &str) -> Option<usize> {
        if let Some(idx) = self.port_index.get(name) {
            return Some(self.ports[*idx].width());
        }
        if let Some(n) = self.nets.iter().find(|n| n.name == name) {
            return Some(n.width);
        }
        self.regs.iter().find(|r| r.name == name).map(|r| r.width)
    }

    fn endpoint_width(&self, ep: &Endpoint, want: Direction) -> Result<usize, ElabError> {
        match ep {
            Endpoint::Local(name) => {
                if let Some(idx) = self.port_index.get(name) {
                    let p = &self.ports[*idx];
                    // As a link source we read own inputs; as a destination we
                    // drive own outputs. Nets go both ways.
                    let ok = match want {
                        Direction::Out => p.direction == Direction::In,
                        Direction::In => p.direction == Direction::Out,
                    };
                    if !ok {
                        return Err(ElabError::DirectionConflict { path: self.path(name) });
                    }
                    return Ok(p.width());
                }
                self.nets
                    .iter()
                    .find(|n| n.name == *name)
                    .map(|n| n.width)
                    .ok_or_else(|| ElabError::UnknownSignal { path: self.path(name) })
            }
            Endpoint::Child { inst, port } => {
                let idx = self
                    .child_index
                    .get(inst)
                    .ok_or_else(|| ElabError::UnknownSignal { path: self.path(inst) })?;
                let child = &self.children[*idx];
                let pidx = child
                    .port_index
                    .get(port)
                    .ok_or_else(|| ElabError::UnknownSignal { path: self.path(&ep.to_string()) })?;
                let p = &child.ports[*pidx];
                let ok = match want {
                    Direction::Out => p.direction == Direction::Out,
                    Direction::In => p.direction == Direction::In,
                };
                if !ok {
                    return Err(ElabError::DirectionConflict { path: self.path(&ep.to_string()) });
                }
                Ok(p.width())
            }
        }
    }

    fn check_expr(&self, expr: &Expr) -> Result<(), ElabError> {
        match expr {
            Expr::Net { name, width } => {
                let declared = self
                    .local_width(name)
                    .ok_or_else(|| ElabError::UnknownSignal { path: self.path(name) })?;
                if declared != *width {
                    return Err(ElabError::WidthMismatch {
                        path: self.path(name),
                        expected: declared,
                        found: *width,
                    });
                }
                Ok(())
            }
            Expr::MemRead { memory, addr, width } => {
                let mem = self
                    .memories
                    .iter()
                    .find(|m| m.decl.name == *memory)
                    .ok_or_else(|| ElabError::UnknownMemory { path: self.path(memory) })?;
                if mem.decl.width != *width {
                    return Err(ElabError::WidthMismatch {
                        path: self.path(memory),
                        expected: mem.decl.width,
                        found: *width,
                    });
                }
                self.check_expr(addr)
            }
            Expr::Literal { .. } => Ok(()),
            Expr::Slice { base, high, low, .. } => {
                if *high >= base.width() || low > high {
                    return Err(ElabError::WidthMismatch {
                        path: self.path(&format!("{expr}")),
                        expected: base.width(),
                        found: high + 1,
                    });
                }
                self.check_expr(base)
            }
            Expr::Concat { parts, .. } => {
                for p in parts {
                    self.check_expr(p)?;
                }
                Ok(())
            }
            Expr::Replicate { base, .. } | Expr::Unary { base, .. } => self.check_expr(base),
            Expr::Binary { lhs, rhs, .. } => {
                self.check_expr(lhs)?;
                self.check_expr(rhs)
            }
            Expr::Mux { cond, then_expr, else_expr, .. } => {
                self.check_expr(cond)?;
                self.check_expr(then_expr)?;
                self.check_expr(else_expr)
            }
            Expr::Case { sel, arms, default, .. } => {
                self.check_expr(sel)?;
                for a in arms {
                    self.check_expr(&a.expr)?;
                }
                if let Some(d) = default {
                    self.check_expr(d)?;
                }
                Ok(())
            }
        }
    }

    fn path(&self, name: &str) -> String {
        match &self.instance {
            Some(inst) => format!("{inst}.{name}"),
            None => format!("{}.{}", self.module, name),
        }
    }

    // ---- IR production ------------------------------------------------------

    /// Produces this component's behavioral record: leaf behavior directly,
    /// children as `instances` entries.
    pub fn ir(&self) -> BehavioralIr {
        let mut ir = BehavioralIr::new(self.module.clone());
        ir.ports = self
            .ports
            .iter()
            .map(|p| PortDecl {
                name: p.name.clone(),
                direction: p.direction,
                width: p.width(),
                default: p.default,
            })
            .collect();
        ir.nets = self.nets.clone();
        ir.regs = self.regs.clone();
        ir.assigns = self.assigns.clone();
        ir.processes = self.processes.clone();
        ir.memories = self.memories.iter().map(|m| m.decl.clone()).collect();

        // Structural links become instance port bindings. Child outputs get a
        // canonical net so fan-out and pass-throughs stay expressible.
        let mut child_conns: Vec<Vec<(String, Connection)>> =
            vec![Vec::new(); self.children.len()];
        for (ci, child) in self.children.iter().enumerate() {
            let inst = child.instance.clone().unwrap_or_else(|| format!("u{ci}"));
            for port in &child.ports {
                if port.direction != Direction::Out {
                    continue;
                }
                let dsts: Vec<&Link> = self
                    .links
                    .iter()
                    .filter(|l| {
                        l.src == Endpoint::Child { inst: inst.clone(), port: port.name.clone() }
                    })
                    .collect();
                if dsts.is_empty() {
                    continue;
                }
                let canonical = format!("{}__{}", inst, port.name);
                ir.nets.push(NetDecl { name: canonical.clone(), width: port.width() });
                child_conns[ci].push((port.name.clone(), Connection::Net { name: canonical.clone() }));
                for link in dsts {
                    if let Endpoint::Local(dst) = &link.dst {
                        ir.assigns.push(AssignDecl {
                            target: dst.clone(),
                            expr: Expr::net(canonical.clone(), port.width()),
                        });
                    } else if let Endpoint::Child { inst: di, port: dp } = &link.dst {
                        let didx = self.child_index[di.as_str()];
                        child_conns[didx]
                            .push((dp.clone(), Connection::Net { name: canonical.clone() }));
                    }
                }
            }
        }
        for link in &self.links {
            if let (Endpoint::Local(src), Endpoint::Child { inst, port }) = (&link.src, &link.dst)
            {
                let didx = self.child_index[inst.as_str()];
                child_conns[didx].push((port.clone(), Connection::Net { name: src.clone() }));
            }
            if let (Endpoint::Local(src), Endpoint::Local(dst)) = (&link.src, &link.dst) {
                let w = self.local_width(src).unwrap_or(1);
                ir.assigns
                    .push(AssignDecl { target: dst.clone(), expr: Expr::net(src.clone(), w) });
            }
        }
        for (inst, port, value) in &self.ties {
            let didx = self.child_index[inst.as_str()];
            let w = self.children[didx]
                .local_width(port)
                .unwrap_or(crate::expr::min_width(*value));
            child_conns[didx].push((port.clone(), Connection::Literal { value: *value, width: w }));
        }

        for (ci, child) in self.children.iter().enumerate() {
            let inst = child.instance.clone().unwrap_or_else(|| format!("u{ci}"));
            let mut connections = Vec::new();
            for port in &child.ports {
                match child_conns[ci].iter().find(|(p, _)| p == &port.name) {
                    Some((_, conn)) => connections.push((port.name.clone(), conn.clone())),
                    None => connections.push((port.name.clone(), Connection::Open)),
                }
            }
            let params = child
                .resolved_params
                .as_ref()
                .map(|m| {
                    let mut pairs: Vec<(String, u64)> =
                        m.iter().map(|(k, v)| (k.clone(), *v)).collect();
                    pairs.sort();
                    pairs
                })
                .unwrap_or_default();
            ir.instances.push(InstanceDecl {
                name: inst,
                module: child.module.clone(),
                params,
                connections,
            });
        }
        ir
    }

    /// The component tree as a serializable bundle: top module plus every
    /// distinct child module. Same module name with differing elaborations
    /// (parameterizations) gets a suffixed unique name.
    pub fn bundle(&self) -> IrBundle {
        let mut modules: Vec<BehavioralIr> = Vec::new();
        let top = self.bundle_into(&mut modules);
        IrBundle { top, modules }
    }

    fn bundle_into(&self, modules: &mut Vec<BehavioralIr>) -> String {
        let mut ir = self.ir();
        for (ci, child) in self.children.iter().enumerate() {
            let unique = child.bundle_into(modules);
            ir.instances[ci].module = unique;
        }
        let unique = match modules.iter().find(|m| {
            let mut candidate = ir.clone();
            candidate.name = m.name.clone();
            **m == candidate
        }) {
            Some(existing) => existing.name.clone(),
            None => {
                let mut name = ir.name.clone();
                let mut k = 1;
                while modules.iter().any(|m| m.name == name) {
                    k += 1;
                    name = format!("{}@{k}", ir.name);
                }
                ir.name = name.clone();
                modules.push(ir);
                name
            }
        };
        unique
    }

    /// Recursively inlines every instance into a single flat IR with
    /// dot-qualified names, ready for structural lowering.
    pub fn flat_ir(&self) -> Result<BehavioralIr, ElabError> {
        let bundle = self.bundle();
        Ok(flatten(&bundle)?)
    }
}

impl EvalEnv for Component {
    fn net(&self, name: &str) -> Option<u64> {
        self.signal(name)
    }

    fn mem_read(&self, memory: &str, addr: u64) -> Result<u64, EvalError> {
        let mem = self
            .memories
            .iter()
            .find(|m| m.decl.name == memory)
            .ok_or_else(|| EvalError::UnknownNet(memory.to_string()))?;
        if addr as usize >= mem.decl.depth {
            return Err(EvalError::OutOfRangeAddress {
                memory: memory.to_string(),
                addr,
                depth: mem.decl.depth,
            });
        }
        Ok(mem.data[addr as usize])
    }
}

// Convenience constructors for clocked processes, mirroring the surface
// language's `sequential` block.
impl ProcessDecl {
    pub fn on(clock: impl Into<String>) -> Self {
        Self {
            clock: clock.into(),
            reset: None,
            async_reset: false,
            reset_values: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn with_reset(mut self, reset: impl Into<String>, async_reset: bool) -> Self {
        self.reset = Some(reset.into());
        self.async_reset = async_reset;
        self
    }

    pub fn reset_value(mut self, reg: impl Into<String>, value: u64) -> Self {
        self.reset_values.push((reg.into(), value));
        self
    }

    pub fn update(mut self, reg: impl Into<String>, expr: Expr) -> Self {
        self.body.push(RegAssign { reg: reg.into(), expr });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn half_adder() -> Component {
        let mut c = Component::new("half_adder");
        c.port_input("a", 1)
            .port_input("b", 1)
            .port_output("sum", 1)
            .port_output("cout", 1)
            .assign("sum", Expr::net("a", 1).xor(Expr::net("b", 1)))
            .assign("cout", Expr::net("a", 1).and(Expr::net("b", 1)));
        c
    }

    #[test]
    fn combinational_propagate() {
        let mut c = half_adder();
        c.check().unwrap();
        for (a, b, sum, cout) in
            [(0, 0, 0, 0), (0, 1, 1, 0), (1, 0, 1, 0), (1, 1, 0, 1u64)]
        {
            c.set_input("a", a).unwrap();
            c.set_input("b", b).unwrap();
            c.propagate().unwrap();
            assert_eq!(c.get_output("sum").unwrap(), sum);
            assert_eq!(c.get_output("cout").unwrap(), cout);
        }
    }

    #[test]
    fn sequential_latches_on_rising_edge_only() {
        let mut c = Component::new("dff");
        c.port_input("clk", 1)
            .port_input("d", 8)
            .port_output("q", 8)
            .reg("r", 8, 0)
            .sequential(ProcessDecl::on("clk").update("r", Expr::net("d", 8)))
            .assign("q", Expr::net("r", 8));
        c.check().unwrap();

        c.set_input("d", 0x42).unwrap();
        c.set_input("clk", 0).unwrap();
        c.propagate().unwrap();
        assert_eq!(c.get_output("q").unwrap(), 0);

        c.set_input("clk", 1).unwrap();
        c.propagate().unwrap();
        assert_eq!(c.get_output("q").unwrap(), 0x42);

        // Held high: no second edge.
        c.set_input("d", 0x7f).unwrap();
        c.propagate().unwrap();
        assert_eq!(c.get_output("q").unwrap(), 0x42);
    }

    #[test]
    fn width_violation_on_set_input() {
        let mut c = half_adder();
        let err = c.set_input("a", 2).unwrap_err();
        assert!(matches!(err, SimError::WidthViolation { .. }));
    }

    #[test]
    fn assign_width_mismatch_rejected() {
        let mut c = Component::new("bad");
        c.port_input("a", 4).port_output("y", 8).assign("y", Expr::net("a", 4));
        let err = c.check().unwrap_err();
        assert!(matches!(err, ElabError::WidthMismatch { expected: 8, found: 4, .. }));
    }

    #[test]
    fn multiple_drivers_rejected() {
        let mut c = Component::new("bad");
        c.port_input("a", 1)
            .port_output("y", 1)
            .assign("y", Expr::net("a", 1))
            .assign("y", Expr::net("a", 1).not());
        assert!(matches!(c.check().unwrap_err(), ElabError::MultipleDriver { .. }));
    }

    #[test]
    fn hierarchy_propagates_through_links() {
        let mut top = Component::new("top");
        top.port_input("x", 1).port_input("y", 1).port_output("s", 1).port_output("c", 1);
        top.instance("ha", half_adder());
        top.link("x", "ha.a").link("y", "ha.b").link("ha.sum", "s").link("ha.cout", "c");
        top.check().unwrap();

        top.set_input("x", 1).unwrap();
        top.set_input("y", 1).unwrap();
        top.propagate().unwrap();
        assert_eq!(top.get_output("s").unwrap(), 0);
        assert_eq!(top.get_output("c").unwrap(), 1);
        assert_eq!(top.peek("ha.sum").unwrap(), 0);
    }

    #[test]
    fn fan_in_rejected() {
        let mut top = Component::new("top");
        top.port_input("x", 1).port_input("y", 1).port_output("s", 1).port_output("c", 1);
        top.instance("ha", half_adder());
        top.link("x", "ha.a").link("y", "ha.a");
        assert!(matches!(top.check().unwrap_err(), ElabError::FanIn { .. }));
    }

    #[test]
    fn ir_has_instances_and_canonical_nets() {
        let mut top = Component::new("top");
        top.port_input("x", 1).port_input("y", 1).port_output("s", 1).port_output("c", 1);
        top.instance("ha", half_adder());
        top.link("x", "ha.a").link("y", "ha.b").link("ha.sum", "s").link("ha.cout", "c");
        top.check().unwrap();
        let ir = top.ir();
        assert_eq!(ir.instances.len(), 1);
        assert!(ir.nets.iter().any(|n| n.name == "ha__sum"));
        assert!(ir.assigns.iter().any(|a| a.target == "s"));
        let bundle = top.bundle();
        assert_eq!(bundle.modules.len(), 2);
    }

    #[test]
    fn memory_write_then_async_read() {
        let mut c = Component::new("ram");
        c.port_input("clk", 1)
            .port_input("we", 1)
            .port_input("waddr", 8)
            .port_input("wdata", 8)
            .port_input("raddr", 8)
            .port_output("rdata", 8)
            .memory("mem", 256, 8)
            .sync_write(
                "mem",
                "clk",
                Expr::net("waddr", 8),
                Expr::net("wdata", 8),
                Expr::net("we", 1),
            )
            .assign("rdata", Expr::mem_read("mem", Expr::net("raddr", 8), 8));
        c.check().unwrap();

        c.set_input("we", 1).unwrap();
        c.set_input("waddr", 0x05).unwrap();
        c.set_input("wdata", 0x42).unwrap();
        c.set_input("clk", 0).unwrap();
        c.propagate().unwrap();
        c.set_input("clk", 1).unwrap();
        c.propagate().unwrap();

        c.set_input("raddr", 0x05).unwrap();
        c.propagate().unwrap();
        assert_eq!(c.get_output("rdata").unwrap(), 0x42);
    }

    #[test]
    fn parameterized_widths() {
        let mut c = Component::new("passthru");
        c.parameter("WIDTH", 16);
        let w = c.param("WIDTH").unwrap() as usize;
        c.port_input("a", w).port_output("y", w).assign("y", Expr::net("a", w));
        c.check().unwrap();
        c.set_input("a", 0xbeef).unwrap();
        c.propagate().unwrap();
        assert_eq!(c.get_output("y").unwrap(), 0xbeef);
    }
}
