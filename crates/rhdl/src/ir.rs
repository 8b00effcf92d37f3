use serde::{Deserialize, Serialize};

use crate::expr::Expr;
use crate::wire::Direction;

/// A named, directioned port of a module. Multi-bit ports are LSB-first when
/// lowered. Ports declared without an explicit default are required at
/// instance boundaries; a default (zero included) makes them optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortDecl {
    pub name: String,
    pub direction: Direction,
    pub width: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetDecl {
    pub name: String,
    pub width: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegDecl {
    pub name: String,
    pub width: usize,
    #[serde(default)]
    pub init: u64,
}

/// A continuous assignment onto a net or output port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignDecl {
    pub target: String,
    pub expr: Expr,
}

/// One non-blocking register update inside a clocked process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegAssign {
    pub reg: String,
    pub expr: Expr,
}

/// A clocked process: on every rising edge of `clock`, all `body` right-hand
/// sides are sampled before any register is written. `reset` (when present)
/// forces the listed registers to their reset values, synchronously unless
/// `async_reset` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessDecl {
    pub clock: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
    #[serde(default)]
    pub async_reset: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reset_values: Vec<(String, u64)>,
    pub body: Vec<RegAssign>,
}

/// A synchronous write port: `mem[addr] <= data` on the rising edge of
/// `clock` while `enable` is high. The enable must be a single-bit signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WritePort {
    pub clock: String,
    pub addr: Expr,
    pub data: Expr,
    pub enable: Expr,
}

/// A synchronous read port: `target <= mem[addr]` on the rising edge of
/// `clock`. Asynchronous reads appear as `MemRead` expression nodes instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReadPort {
    pub clock: String,
    pub target: String,
    pub addr: Expr,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryDecl {
    pub name: String,
    pub depth: usize,
    pub width: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub init: Vec<u64>,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub writes: Vec<WritePort>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sync_reads: Vec<SyncReadPort>,
}

/// A sub-instance port binding. `Open` leaves the port unconnected: inputs
/// fall back to their declared default, outputs are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Connection {
    Net { name: String },
    Literal { value: u64, width: usize },
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDecl {
    pub name: String,
    pub module: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<(String, u64)>,
    pub connections: Vec<(String, Connection)>,
}

/// The serializable behavioral description of one module: pure data with no
/// references back to live component objects.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BehavioralIr {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub nets: Vec<NetDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub regs: Vec<RegDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub assigns: Vec<AssignDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub processes: Vec<ProcessDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub memories: Vec<MemoryDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<InstanceDecl>,
}

impl BehavioralIr {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn port(&self, name: &str) -> Option<&PortDecl> {
        self.ports.iter().find(|p| p.name == name)
    }

    /// Looks a name up across ports, nets, and regs, returning its width.
    pub fn signal_width(&self, name: &str) -> Option<usize> {
        self.ports
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.width)
            .or_else(|| self.nets.iter().find(|n| n.name == name).map(|n| n.width))
            .or_else(|| self.regs.iter().find(|r| r.name == name).map(|r| r.width))
    }

    pub fn memory(&self, name: &str) -> Option<&MemoryDecl> {
        self.memories.iter().find(|m| m.name == name)
    }

    pub fn is_flat(&self) -> bool {
        self.instances.is_empty()
    }

    /// Canonical JSON form for diagnostic dumps and tool interchange.
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("behavioral IR serializes")
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}
