use serde::{Deserialize, Serialize};

/// Primitive gate kinds. `Mux` inputs are `[a, b, sel]` with `sel ? b : a`;
/// `Const` has no inputs and drives `value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Not,
    Buf,
    And,
    Or,
    Xor,
    Nand,
    Nor,
    Xnor,
    Mux,
    Const,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Gate {
    #[serde(rename = "type")]
    pub kind: GateKind,
    pub inputs: Vec<usize>,
    pub output: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<u64>,
}

/// Edge-triggered D flip-flop. `reset` clears Q, asynchronously when
/// `async_reset` is set, otherwise on the clock edge; `enable` gates updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dff {
    pub d: usize,
    pub q: usize,
    pub clock: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable: Option<usize>,
    #[serde(default)]
    pub async_reset: bool,
}

/// A named group of single-bit nets, LSB first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortGroup {
    pub name: String,
    pub nets: Vec<usize>,
}

/// The flat gate-level netlist: integer-indexed nets, primitive gates, and
/// flip-flops. Read-only after construction; simulators borrow it and keep
/// their own net-value arrays.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateIr {
    pub name: String,
    pub net_count: usize,
    pub inputs: Vec<PortGroup>,
    pub outputs: Vec<PortGroup>,
    pub gates: Vec<Gate>,
    pub dffs: Vec<Dff>,
}

impl GateIr {
    pub fn input(&self, name: &str) -> Option<&PortGroup> {
        self.inputs.iter().find(|g| g.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&PortGroup> {
        self.outputs.iter().find(|g| g.name == name)
    }

    pub fn gate_count(&self) -> usize {
        self.gates.len()
    }

    pub fn dff_count(&self) -> usize {
        self.dffs.len()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("gate IR serializes")
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        let ir = GateIr {
            name: "t".into(),
            net_count: 3,
            inputs: vec![PortGroup { name: "a".into(), nets: vec![0] }],
            outputs: vec![PortGroup { name: "y".into(), nets: vec![2] }],
            gates: vec![
                Gate { kind: GateKind::Const, inputs: vec![], output: 1, value: Some(1) },
                Gate { kind: GateKind::Xor, inputs: vec![0, 1], output: 2, value: None },
            ],
            dffs: vec![],
        };
        let json = ir.to_json();
        assert!(json.contains("\"type\": \"xor\""));
        let back = GateIr::from_json(&json).unwrap();
        assert_eq!(ir, back);
    }
}
