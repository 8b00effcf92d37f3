mod arith;
mod expr;
mod memory;
mod shift;

use log::debug;
use thiserror::Error;

use crate::expr::Expr;
use crate::gate::{Dff, Gate, GateIr, GateKind, PortGroup};
use crate::ir::BehavioralIr;
use crate::scheduler::{schedule, SchedulerError};
use crate::wire::Direction;
use crate::{HashMap, HashSet};

pub(crate) use memory::MemCells;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LowerError {
    #[error("width mismatch at `{context}`: expected {expected}, found {found}")]
    WidthError { context: String, expected: usize, found: usize },
    #[error("unknown net `{name}`")]
    UnknownNet { name: String },
    #[error("unknown memory `{name}`")]
    UnknownMemory { name: String },
    #[error("net `{net}` has more than one driver")]
    MultipleDriver { net: String },
    #[error("write enable at `{context}` is {width} bits; it must be a single-bit net")]
    MultiBitEnable { context: String, width: usize },
    #[error("case-select on `{context}` covers {covered} of {total} values and has no default")]
    NonExhaustiveCase { context: String, covered: u64, total: u64 },
    #[error("combinational loop through: {}", .nets.join(", "))]
    CombinationalLoop { nets: Vec<String> },
    #[error("module `{module}` still contains instances; flatten it first")]
    NotFlat { module: String },
    #[error("memory `{name}` is read-only but has a write port")]
    ReadOnlyWrite { name: String },
}

/// Lowers a flat behavioral IR to a gate-level netlist. Pure: the same input
/// yields a byte-identical result, since net indices follow one depth-first
/// walk of the IR in declared order.
pub fn lower(ir: &BehavioralIr) -> Result<GateIr, LowerError> {
    if !ir.is_flat() {
        return Err(LowerError::NotFlat { module: ir.name.clone() });
    }
    let mut lowerer = Lowerer::new(ir);
    lowerer.run()?;
    lowerer.finish()
}

pub(crate) struct Lowerer<'a> {
    ir: &'a BehavioralIr,
    next_net: usize,
    gates: Vec<Gate>,
    dffs: Vec<Dff>,
    groups: HashMap<String, Vec<usize>>,
    group_order: Vec<String>,
    const_bits: [Option<usize>; 2],
    mem_cells: HashMap<String, MemCells>,
}

impl<'a> Lowerer<'a> {
    fn new(ir: &'a BehavioralIr) -> Self {
        Self {
            ir,
            next_net: 0,
            gates: Vec::new(),
            dffs: Vec::new(),
            groups: HashMap::default(),
            group_order: Vec::new(),
            const_bits: [None, None],
            mem_cells: HashMap::default(),
        }
    }

    // ---- net bookkeeping ----------------------------------------------------

    pub(crate) fn alloc1(&mut self) -> usize {
        let n = self.next_net;
        self.next_net += 1;
        n
    }

    pub(crate) fn alloc(&mut self, width: usize) -> Vec<usize> {
        (0..width).map(|_| self.alloc1()).collect()
    }

    fn alloc_group(&mut self, name: &str, width: usize) {
        let nets = self.alloc(width);
        self.groups.insert(name.to_string(), nets);
        self.group_order.push(name.to_string());
    }

    pub(crate) fn group(&self, name: &str) -> Result<Vec<usize>, LowerError> {
        self.groups
            .get(name)
            .cloned()
            .ok_or_else(|| LowerError::UnknownNet { name: name.to_string() })
    }

    fn group1(&self, name: &str) -> Result<usize, LowerError> {
        let g = self.group(name)?;
        if g.len() != 1 {
            return Err(LowerError::WidthError {
                context: name.to_string(),
                expected: 1,
                found: g.len(),
            });
        }
        Ok(g[0])
    }

    pub(crate) fn emit(&mut self, kind: GateKind, inputs: Vec<usize>) -> usize {
        let output = self.alloc1();
        self.gates.push(Gate { kind, inputs, output, value: None });
        output
    }

    pub(crate) fn emit_into(&mut self, kind: GateKind, inputs: Vec<usize>, output: usize) {
        self.gates.push(Gate { kind, inputs, output, value: None });
    }

    pub(crate) fn push_dff(&mut self, dff: Dff) {
        self.dffs.push(dff);
    }

    /// Constant bit nets are shared; the two possible CONST gates are emitted
    /// on first use, keeping allocation deterministic.
    pub(crate) fn const_bit(&mut self, value: u64) -> usize {
        let b = (value & 1) as usize;
        if let Some(n) = self.const_bits[b] {
            return n;
        }
        let output = self.alloc1();
        self.gates.push(Gate {
            kind: GateKind::Const,
            inputs: Vec::new(),
            output,
            value: Some(b as u64),
        });
        self.const_bits[b] = Some(output);
        output
    }

    pub(crate) fn const_word(&mut self, value: u64, width: usize) -> Vec<usize> {
        (0..width).map(|i| self.const_bit((value >> i) & 1)).collect()
    }

    /// Zero-extends or truncates a bit group to `width`.
    pub(crate) fn fit(&mut self, mut bits: Vec<usize>, width: usize) -> Vec<usize> {
        if bits.len() > width {
            bits.truncate(width);
        } else {
            while bits.len() < width {
                bits.push(self.const_bit(0));
            }
        }
        bits
    }

    /// A 2:1 mux per bit, `sel ? b : a` with inputs `[a, b, sel]`.
    pub(crate) fn mux_word(&mut self, a: &[usize], b: &[usize], sel: usize) -> Vec<usize> {
        debug_assert_eq!(a.len(), b.len());
        a.iter()
            .zip(b.iter())
            .map(|(&ai, &bi)| self.emit(GateKind::Mux, vec![ai, bi, sel]))
            .collect()
    }

    // ---- driver -------------------------------------------------------------

    fn run(&mut self) -> Result<(), LowerError> {
        let ir = self.ir;
        for port in &ir.ports {
            self.alloc_group(&port.name, port.width);
        }
        for net in &ir.nets {
            self.alloc_group(&net.name, net.width);
        }
        for reg in &ir.regs {
            self.alloc_group(&reg.name, reg.width);
        }
        for mem in &ir.memories {
            let cells = memory::build_cells(self, mem);
            self.mem_cells.insert(mem.name.clone(), cells);
        }

        let mut driven: HashSet<&str> = HashSet::default();
        for assign in &ir.assigns {
            if !driven.insert(assign.target.as_str()) {
                return Err(LowerError::MultipleDriver { net: assign.target.clone() });
            }
        }

        for assign in &ir.assigns {
            let target = self.group(&assign.target)?;
            if assign.expr.width() != target.len() {
                return Err(LowerError::WidthError {
                    context: assign.target.clone(),
                    expected: target.len(),
                    found: assign.expr.width(),
                });
            }
            let bits = self.lower_expr(&assign.expr)?;
            for (src, dst) in bits.into_iter().zip(target) {
                self.emit_into(GateKind::Buf, vec![src], dst);
            }
        }

        for mem in &ir.memories {
            memory::lower_write_ports(self, mem)?;
        }

        let mut reg_driven: HashSet<String> = HashSet::default();
        for mem in &ir.memories {
            memory::lower_sync_reads(self, mem, &mut reg_driven)?;
        }
        for process in &ir.processes {
            self.lower_process(process, &mut reg_driven)?;
        }

        debug!(
            "lowered `{}`: {} nets, {} gates, {} dffs",
            self.ir.name,
            self.next_net,
            self.gates.len(),
            self.dffs.len()
        );
        self.check_cycles()
    }

    /// One D flip-flop per register bit. Synchronous reset and enable fold
    /// into the D-side mux chain (reset outermost, so it wins over a
    /// deasserted enable); asynchronous reset uses the flop's dedicated line,
    /// storing bits with a nonzero reset value inverted so a cleared flop
    /// reads back the declared value.
    fn lower_process(
        &mut self,
        process: &crate::ir::ProcessDecl,
        reg_driven: &mut HashSet<String>,
    ) -> Result<(), LowerError> {
        let clock = self.group1(&process.clock)?;
        let reset = match &process.reset {
            Some(r) => Some(self.group1(r)?),
            None => None,
        };
        let reset_value = |reg: &str| -> Option<u64> {
            process
                .reset_values
                .iter()
                .find(|(r, _)| r == reg)
                .map(|(_, v)| *v)
        };

        // Registers listed in the reset set but not updated by the body still
        // need flops that hold their value.
        let mut targets: Vec<(String, Option<&Expr>)> = Vec::new();
        for stmt in &process.body {
            targets.push((stmt.reg.clone(), Some(&stmt.expr)));
        }
        for (reg, _) in &process.reset_values {
            if !process.body.iter().any(|s| &s.reg == reg) {
                targets.push((reg.clone(), None));
            }
        }

        for (reg, next) in targets {
            if !reg_driven.insert(reg.clone()) {
                return Err(LowerError::MultipleDriver { net: reg });
            }
            let q_nets = self.group(&reg)?;
            let width = q_nets.len();

            // Enable peephole: `q' = en ? d : q` (or its mirror) maps onto the
            // flop's enable input when no synchronous reset interferes.
            let (enable_expr, next_expr, enable_inverted): (Option<&Expr>, Option<&Expr>, bool) =
                match next {
                    Some(Expr::Mux { cond, then_expr, else_expr, .. }) => {
                        if matches!(&**else_expr, Expr::Net { name, .. } if name == &reg) {
                            (Some(&**cond), Some(&**then_expr), false)
                        } else if matches!(&**then_expr, Expr::Net { name, .. } if name == &reg) {
                            (Some(&**cond), Some(&**else_expr), true)
                        } else {
                            (None, next, false)
                        }
                    }
                    other => (None, other, false),
                };

            let mut d_bits = match next_expr {
                Some(e) => {
                    let bits = self.lower_expr(e)?;
                    self.fit(bits, width)
                }
                None => q_nets.clone(),
            };
            let mut enable_bit = match enable_expr {
                Some(e) => {
                    let bits = self.lower_expr(e)?;
                    let b = self.reduce(GateKind::Or, &bits);
                    Some(if enable_inverted { self.emit(GateKind::Not, vec![b]) } else { b })
                }
                None => None,
            };

            // While reset is asserted no body update lands: registers with a
            // declared reset value take it, the rest hold. Synchronous reset
            // folds into the D mux (outermost, so it overrides a deasserted
            // enable); the asynchronous flavor uses the flop's reset line for
            // the value and a hold mux for unlisted registers.
            let rv = reset_value(&reg);
            if let Some(rst) = reset {
                let needs_d_mux = !process.async_reset || rv.is_none();
                if needs_d_mux {
                    if let Some(en) = enable_bit.take() {
                        d_bits = self.mux_word(&q_nets, &d_bits, en);
                    }
                    let on_reset = match (rv, process.async_reset) {
                        (Some(value), false) => self.const_word(value, width),
                        _ => q_nets.clone(),
                    };
                    d_bits = self.mux_word(&d_bits, &on_reset, rst);
                }
            }

            let async_rst = if process.async_reset && rv.is_some() { reset } else { None };
            for (i, &q) in q_nets.iter().enumerate() {
                let inverted = process.async_reset
                    && rv.map(|v| (v >> i) & 1 == 1).unwrap_or(false);
                let (d, flop_q) = if inverted {
                    let d = self.emit(GateKind::Not, vec![d_bits[i]]);
                    let fq = self.alloc1();
                    self.emit_into(GateKind::Not, vec![fq], q);
                    (d, fq)
                } else {
                    (d_bits[i], q)
                };
                self.dffs.push(Dff {
                    d,
                    q: flop_q,
                    clock,
                    reset: async_rst,
                    enable: enable_bit,
                    async_reset: process.async_reset && async_rst.is_some(),
                });
            }
        }
        Ok(())
    }

    fn check_cycles(&self) -> Result<(), LowerError> {
        match schedule(&self.gates, self.next_net) {
            Ok(_) => Ok(()),
            Err(SchedulerError::CombinationalLoop { nets }) => {
                let name_of = self.net_names();
                let mut named: Vec<String> = nets
                    .iter()
                    .map(|n| name_of.get(n).cloned().unwrap_or_else(|| format!("n{n}")))
                    .collect();
                named.sort();
                named.dedup();
                Err(LowerError::CombinationalLoop { nets: named })
            }
        }
    }

    fn net_names(&self) -> HashMap<usize, String> {
        let mut map = HashMap::default();
        for name in &self.group_order {
            let nets = &self.groups[name];
            for (i, &n) in nets.iter().enumerate() {
                let label = if nets.len() == 1 {
                    name.clone()
                } else {
                    format!("{name}[{i}]")
                };
                map.insert(n, label);
            }
        }
        map
    }

    fn finish(self) -> Result<GateIr, LowerError> {
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();
        for port in &self.ir.ports {
            let group = PortGroup { name: port.name.clone(), nets: self.groups[&port.name].clone() };
            match port.direction {
                Direction::In => inputs.push(group),
                Direction::Out => outputs.push(group),
            }
        }
        Ok(GateIr {
            name: self.ir.name.clone(),
            net_count: self.next_net,
            inputs,
            outputs,
            gates: self.gates,
            dffs: self.dffs,
        })
    }

    pub(crate) fn mem(&self, name: &str) -> Result<MemCells, LowerError> {
        self.mem_cells
            .get(name)
            .cloned()
            .ok_or_else(|| LowerError::UnknownMemory { name: name.to_string() })
    }
}
