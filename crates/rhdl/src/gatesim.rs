use std::sync::Arc;

use bit_set::BitSet;

use crate::gate::{GateIr, GateKind};
use crate::scheduler::{schedule, SchedulerError};
use crate::sim::SimError;
use crate::HashMap;

/// Bit-parallel gate-level simulator. Each net holds one machine word whose
/// `L` least-significant bits are that net's value on `L` independent lanes,
/// so one `evaluate` runs up to 64 test vectors at once.
///
/// The gate IR is shared read-only; every simulator instance owns its net
/// array. The evaluation order is fixed once at load time.
pub struct GateSimulator {
    ir: Arc<GateIr>,
    nets: Vec<u64>,
    order: Vec<usize>,
    lanes: usize,
    lane_mask: u64,
    clock_roots: Vec<usize>,
    input_index: HashMap<String, usize>,
    output_index: HashMap<String, usize>,
}

impl GateSimulator {
    pub fn new(ir: GateIr, lanes: usize) -> Result<Self, SchedulerError> {
        Self::shared(Arc::new(ir), lanes)
    }

    pub fn shared(ir: Arc<GateIr>, lanes: usize) -> Result<Self, SchedulerError> {
        let lanes = lanes.clamp(1, 64);
        let lane_mask = if lanes >= 64 { u64::MAX } else { (1u64 << lanes) - 1 };
        let order = schedule(&ir.gates, ir.net_count)?;

        let mut input_index = HashMap::default();
        for (i, group) in ir.inputs.iter().enumerate() {
            input_index.insert(group.name.clone(), i);
        }
        let mut output_index = HashMap::default();
        for (i, group) in ir.outputs.iter().enumerate() {
            output_index.insert(group.name.clone(), i);
        }

        let clock_roots = find_clock_roots(&ir);

        Ok(Self {
            nets: vec![0; ir.net_count],
            ir,
            order,
            lanes,
            lane_mask,
            clock_roots,
            input_index,
            output_index,
        })
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn ir(&self) -> &GateIr {
        &self.ir
    }

    pub fn input_names(&self) -> Vec<String> {
        self.ir.inputs.iter().map(|g| g.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.ir.outputs.iter().map(|g| g.name.clone()).collect()
    }

    fn port_nets(&self, name: &str) -> Result<&[usize], SimError> {
        if let Some(&i) = self.input_index.get(name) {
            return Ok(&self.ir.inputs[i].nets);
        }
        if let Some(&i) = self.output_index.get(name) {
            return Ok(&self.ir.outputs[i].nets);
        }
        Err(SimError::UnknownPort { path: name.to_string() })
    }

    /// Writes an input, broadcasting the same value to every lane.
    pub fn poke(&mut self, name: &str, value: u64) -> Result<(), SimError> {
        let i = *self
            .input_index
            .get(name)
            .ok_or_else(|| SimError::UnknownPort { path: name.to_string() })?;
        let nets: Vec<usize> = self.ir.inputs[i].nets.clone();
        let width = nets.len();
        if width < 64 && value >> width != 0 {
            return Err(SimError::WidthViolation { path: name.to_string(), width, value });
        }
        for (bit, net) in nets.into_iter().enumerate() {
            self.nets[net] = if (value >> bit) & 1 == 1 { self.lane_mask } else { 0 };
        }
        Ok(())
    }

    /// Writes an input with one value per lane. Entries beyond the lane count
    /// are ignored; lanes without an entry read zero.
    pub fn poke_lanes(&mut self, name: &str, values: &[u64]) -> Result<(), SimError> {
        let i = *self
            .input_index
            .get(name)
            .ok_or_else(|| SimError::UnknownPort { path: name.to_string() })?;
        let nets: Vec<usize> = self.ir.inputs[i].nets.clone();
        let width = nets.len();
        let mut masks = vec![0u64; width];
        for (lane, &value) in values.iter().enumerate().take(self.lanes) {
            if width < 64 && value >> width != 0 {
                return Err(SimError::WidthViolation { path: name.to_string(), width, value });
            }
            for (bit, mask) in masks.iter_mut().enumerate() {
                if (value >> bit) & 1 == 1 {
                    *mask |= 1 << lane;
                }
            }
        }
        for (bit, net) in nets.into_iter().enumerate() {
            self.nets[net] = masks[bit] & self.lane_mask;
        }
        Ok(())
    }

    /// Reads a port as per-bit lane masks, LSB first.
    pub fn peek(&self, name: &str) -> Result<Vec<u64>, SimError> {
        let nets = self.port_nets(name)?;
        Ok(nets.iter().map(|&n| self.nets[n]).collect())
    }

    /// Reads one lane of a port as an integer.
    pub fn peek_lane(&self, name: &str, lane: usize) -> Result<u64, SimError> {
        let nets = self.port_nets(name)?;
        let mut value = 0u64;
        for (bit, &net) in nets.iter().enumerate() {
            if (self.nets[net] >> lane) & 1 == 1 {
                value |= 1 << bit;
            }
        }
        Ok(value)
    }

    /// Reads every lane of a port as integers.
    pub fn peek_lanes(&self, name: &str) -> Result<Vec<u64>, SimError> {
        (0..self.lanes).map(|lane| self.peek_lane(name, lane)).collect()
    }

    /// Fires every gate exactly once, in the load-time topological order.
    pub fn evaluate(&mut self) {
        eval_gates(&mut self.nets, &self.ir.gates, &self.order, self.lane_mask);
    }

    /// One clock cycle: every clock input pulses low, high, low again, and
    /// each flop commits where its own clock net saw a rising edge on that
    /// lane. D, enable, and reset are sampled in the clock-low phase, so
    /// gated clocks act as per-lane enables.
    pub fn tick(&mut self) {
        if self.ir.dffs.is_empty() {
            self.evaluate();
            return;
        }
        let ir = Arc::clone(&self.ir);

        let roots = self.clock_roots.clone();
        for &n in &roots {
            self.nets[n] = 0;
        }
        self.evaluate();

        let samples: Vec<(u64, Option<u64>, Option<u64>, u64)> = ir
            .dffs
            .iter()
            .map(|dff| {
                (
                    self.nets[dff.d],
                    dff.enable.map(|e| self.nets[e]),
                    dff.reset.map(|r| self.nets[r]),
                    self.nets[dff.clock],
                )
            })
            .collect();

        for &n in &roots {
            self.nets[n] = self.lane_mask;
        }
        self.evaluate();

        let next: Vec<u64> = ir
            .dffs
            .iter()
            .zip(samples.iter())
            .map(|(dff, &(d, en, rst, clk_low))| {
                let clk_high = self.nets[dff.clock];
                let rising = if roots.is_empty() {
                    self.lane_mask
                } else {
                    !clk_low & clk_high & self.lane_mask
                };
                let q = self.nets[dff.q];
                let mut q_next = d;
                if let Some(en) = en {
                    q_next = (q & !en) | (d & en);
                }
                let mut out = (q & !rising) | (q_next & rising);
                if let Some(rst) = rst {
                    if dff.async_reset {
                        out &= !rst;
                    } else {
                        out &= !(rising & rst);
                    }
                }
                out
            })
            .collect();
        for (dff, q) in ir.dffs.iter().zip(next) {
            self.nets[dff.q] = q;
        }

        for &n in &roots {
            self.nets[n] = 0;
        }
        self.evaluate();
    }

    /// Clears the net array; flip-flops return to zero (their reset state).
    pub fn reset(&mut self) {
        self.nets.fill(0);
        self.evaluate();
    }

    /// Snapshot of every output as per-bit lane masks, for waveform hooks.
    pub fn trace_capture(&self) -> Vec<(String, Vec<u64>)> {
        self.ir
            .outputs
            .iter()
            .map(|g| (g.name.clone(), g.nets.iter().map(|&n| self.nets[n]).collect()))
            .collect()
    }
}

fn eval_gates(nets: &mut [u64], gates: &[crate::gate::Gate], order: &[usize], lane_mask: u64) {
    for &gi in order {
        let gate = &gates[gi];
        let out = match gate.kind {
            GateKind::And => nets[gate.inputs[0]] & nets[gate.inputs[1]],
            GateKind::Or => nets[gate.inputs[0]] | nets[gate.inputs[1]],
            GateKind::Xor => nets[gate.inputs[0]] ^ nets[gate.inputs[1]],
            GateKind::Nand => !(nets[gate.inputs[0]] & nets[gate.inputs[1]]) & lane_mask,
            GateKind::Nor => !(nets[gate.inputs[0]] | nets[gate.inputs[1]]) & lane_mask,
            GateKind::Xnor => !(nets[gate.inputs[0]] ^ nets[gate.inputs[1]]) & lane_mask,
            GateKind::Not => !nets[gate.inputs[0]] & lane_mask,
            GateKind::Buf => nets[gate.inputs[0]],
            // sel ? b : a
            GateKind::Mux => {
                let s = nets[gate.inputs[2]];
                (nets[gate.inputs[0]] & !s) | (nets[gate.inputs[1]] & s)
            }
            GateKind::Const => {
                if gate.value.unwrap_or(0) == 0 { 0 } else { lane_mask }
            }
        };
        nets[gate.output] = out;
    }
}

/// Input nets in the transitive fan-in of any flop clock. These are the nets
/// `tick` pulses; anything between them and the clock pins (clock gating,
/// inverters) is evaluated normally, so derived clocks edge only where their
/// logic allows.
fn find_clock_roots(ir: &GateIr) -> Vec<usize> {
    let mut driver = vec![usize::MAX; ir.net_count];
    for (gi, gate) in ir.gates.iter().enumerate() {
        driver[gate.output] = gi;
    }
    let mut is_input = BitSet::with_capacity(ir.net_count);
    for group in &ir.inputs {
        for &n in &group.nets {
            is_input.insert(n);
        }
    }

    let mut seen = BitSet::with_capacity(ir.net_count);
    let mut stack: Vec<usize> = ir.dffs.iter().map(|d| d.clock).collect();
    let mut roots = Vec::new();
    while let Some(net) = stack.pop() {
        if !seen.insert(net) {
            continue;
        }
        if is_input.contains(net) {
            roots.push(net);
        }
        if net < driver.len() && driver[net] != usize::MAX {
            stack.extend(ir.gates[driver[net]].inputs.iter().copied());
        }
    }
    roots.sort_unstable();
    roots
}
