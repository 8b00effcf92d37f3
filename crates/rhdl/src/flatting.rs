use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::expr::Expr;
use crate::ir::{
    AssignDecl, BehavioralIr, Connection, MemoryDecl, NetDecl, ProcessDecl, RegAssign, RegDecl,
    SyncReadPort, WritePort,
};
use crate::wire::Direction;
use crate::{HashMap, HashSet};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlattenError {
    #[error("unknown module `{name}`")]
    UnknownModule { name: String },
    #[error("instance cycle: {}", .path.join(" -> "))]
    InstanceCycle { path: Vec<String> },
    #[error("required input `{port}` of instance `{instance}` is unconnected")]
    MissingConnection { instance: String, port: String },
    #[error("invalid binding on port `{port}` of instance `{instance}`")]
    InvalidConnection { instance: String, port: String },
    #[error("connection width mismatch on `{instance}.{port}`: port is {expected}, net is {found}")]
    WidthMismatch { instance: String, port: String, expected: usize, found: usize },
    #[error("connection target `{name}` is not declared")]
    UnknownNet { name: String },
}

/// A top module plus every module it instantiates, in serializable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IrBundle {
    pub top: String,
    pub modules: Vec<BehavioralIr>,
}

impl IrBundle {
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("bundle serializes")
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

/// Module lookup for flattening.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, BehavioralIr>,
}

impl ModuleRegistry {
    pub fn new(modules: impl IntoIterator<Item = BehavioralIr>) -> Self {
        let mut map = HashMap::default();
        for m in modules {
            map.insert(m.name.clone(), m);
        }
        Self { modules: map }
    }

    pub fn get(&self, name: &str) -> Option<&BehavioralIr> {
        self.modules.get(name)
    }
}

/// Inlines every instance of the bundle's top module into one flat IR with
/// dot-qualified names (`cpu.alu.a`). The instance-class graph must be a DAG.
pub fn flatten(bundle: &IrBundle) -> Result<BehavioralIr, FlattenError> {
    let registry = ModuleRegistry::new(bundle.modules.iter().cloned());
    flatten_top(&bundle.top, &registry)
}

pub fn flatten_top(top: &str, registry: &ModuleRegistry) -> Result<BehavioralIr, FlattenError> {
    let module = registry
        .get(top)
        .ok_or_else(|| FlattenError::UnknownModule { name: top.to_string() })?;
    let mut out = BehavioralIr::new(module.name.clone());
    let mut widths: HashMap<String, usize> = HashMap::default();
    let mut stack = Vec::new();
    inline(module, "", registry, &mut out, &mut widths, &mut stack)?;
    Ok(out)
}

fn qualify(prefix: &str, name: &str) -> String {
    if prefix.is_empty() { name.to_string() } else { format!("{prefix}.{name}") }
}

fn inline(
    module: &BehavioralIr,
    prefix: &str,
    registry: &ModuleRegistry,
    out: &mut BehavioralIr,
    widths: &mut HashMap<String, usize>,
    stack: &mut Vec<String>,
) -> Result<(), FlattenError> {
    if stack.contains(&module.name) {
        let mut path = stack.clone();
        path.push(module.name.clone());
        return Err(FlattenError::InstanceCycle { path });
    }
    stack.push(module.name.clone());

    let q = |n: &str| qualify(prefix, n);

    for port in &module.ports {
        let name = q(&port.name);
        widths.insert(name.clone(), port.width);
        if prefix.is_empty() {
            out.ports.push(port.clone());
        } else {
            // Instance ports dissolve into plain nets of the flat module.
            out.nets.push(NetDecl { name, width: port.width });
        }
    }
    for net in &module.nets {
        let name = q(&net.name);
        widths.insert(name.clone(), net.width);
        out.nets.push(NetDecl { name, width: net.width });
    }
    for reg in &module.regs {
        let name = q(&reg.name);
        widths.insert(name.clone(), reg.width);
        out.regs.push(RegDecl { name, width: reg.width, init: reg.init });
    }
    for mem in &module.memories {
        out.memories.push(MemoryDecl {
            name: q(&mem.name),
            depth: mem.depth,
            width: mem.width,
            init: mem.init.clone(),
            read_only: mem.read_only,
            writes: mem
                .writes
                .iter()
                .map(|w| WritePort {
                    clock: q(&w.clock),
                    addr: w.addr.map_names(&q),
                    data: w.data.map_names(&q),
                    enable: w.enable.map_names(&q),
                })
                .collect(),
            sync_reads: mem
                .sync_reads
                .iter()
                .map(|r| SyncReadPort {
                    clock: q(&r.clock),
                    target: q(&r.target),
                    addr: r.addr.map_names(&q),
                })
                .collect(),
        });
    }
    for assign in &module.assigns {
        out.assigns.push(AssignDecl {
            target: q(&assign.target),
            expr: assign.expr.map_names(&q),
        });
    }
    for process in &module.processes {
        out.processes.push(ProcessDecl {
            clock: q(&process.clock),
            reset: process.reset.as_ref().map(|r| q(r)),
            async_reset: process.async_reset,
            reset_values: process
                .reset_values
                .iter()
                .map(|(r, v)| (q(r), *v))
                .collect(),
            body: process
                .body
                .iter()
                .map(|s| RegAssign { reg: q(&s.reg), expr: s.expr.map_names(&q) })
                .collect(),
        });
    }

    for inst in &module.instances {
        let child = registry
            .get(&inst.module)
            .ok_or_else(|| FlattenError::UnknownModule { name: inst.module.clone() })?;
        let child_prefix = q(&inst.name);
        inline(child, &child_prefix, registry, out, widths, stack)?;

        let connected: HashSet<&str> =
            inst.connections.iter().map(|(p, _)| p.as_str()).collect();
        for port in &child.ports {
            if !connected.contains(port.name.as_str()) && port.direction == Direction::In {
                match port.default {
                    Some(_) => {}
                    None => {
                        return Err(FlattenError::MissingConnection {
                            instance: child_prefix.clone(),
                            port: port.name.clone(),
                        });
                    }
                }
            }
        }

        for (port_name, conn) in &inst.connections {
            let port = child.port(port_name).ok_or_else(|| FlattenError::UnknownNet {
                name: format!("{child_prefix}.{port_name}"),
            })?;
            let inner = qualify(&child_prefix, port_name);
            match (port.direction, conn) {
                (Direction::In, Connection::Net { name }) => {
                    let outer = q(name);
                    let found = *widths
                        .get(&outer)
                        .ok_or_else(|| FlattenError::UnknownNet { name: outer.clone() })?;
                    if found != port.width {
                        return Err(FlattenError::WidthMismatch {
                            instance: child_prefix.clone(),
                            port: port_name.clone(),
                            expected: port.width,
                            found,
                        });
                    }
                    out.assigns.push(AssignDecl {
                        target: inner,
                        expr: Expr::net(outer, port.width),
                    });
                }
                (Direction::In, Connection::Literal { value, width }) => {
                    if *width != port.width {
                        return Err(FlattenError::WidthMismatch {
                            instance: child_prefix.clone(),
                            port: port_name.clone(),
                            expected: port.width,
                            found: *width,
                        });
                    }
                    out.assigns.push(AssignDecl {
                        target: inner,
                        expr: Expr::lit(*value, port.width),
                    });
                }
                (Direction::In, Connection::Open) => match port.default {
                    Some(d) => out.assigns.push(AssignDecl {
                        target: inner,
                        expr: Expr::lit(d, port.width),
                    }),
                    None => {
                        return Err(FlattenError::MissingConnection {
                            instance: child_prefix.clone(),
                            port: port_name.clone(),
                        });
                    }
                },
                (Direction::Out, Connection::Net { name }) => {
                    let outer = q(name);
                    let found = *widths
                        .get(&outer)
                        .ok_or_else(|| FlattenError::UnknownNet { name: outer.clone() })?;
                    if found != port.width {
                        return Err(FlattenError::WidthMismatch {
                            instance: child_prefix.clone(),
                            port: port_name.clone(),
                            expected: port.width,
                            found,
                        });
                    }
                    out.assigns.push(AssignDecl {
                        target: outer,
                        expr: Expr::net(inner, port.width),
                    });
                }
                (Direction::Out, Connection::Open) => {}
                (Direction::Out, Connection::Literal { .. }) => {
                    return Err(FlattenError::InvalidConnection {
                        instance: child_prefix.clone(),
                        port: port_name.clone(),
                    });
                }
            }
        }
    }

    stack.pop();
    Ok(())
}
