mod component;
mod debug;
mod expr;
mod flatting;
mod gate;
mod gatesim;
mod ir;
mod lower;
mod machine;
mod params;
mod primitives;
mod scheduler;
mod sim;
mod vcd;
mod vecsig;
mod wire;

pub(crate) use fxhash::FxHashMap as HashMap;
pub(crate) use fxhash::FxHashSet as HashSet;

pub use component::{Component, ElabError};
pub use debug::{TraceCapture, TraceOptions};
pub use expr::{BinaryOp, CaseArm, EvalEnv, EvalError, Expr, UnaryOp, clog2, mask, min_width};
pub use flatting::{FlattenError, IrBundle, ModuleRegistry, flatten, flatten_top};
pub use gate::{Dff, Gate, GateIr, GateKind, PortGroup};
pub use gatesim::GateSimulator;
pub use ir::{
    AssignDecl, BehavioralIr, Connection, InstanceDecl, MemoryDecl, NetDecl, PortDecl,
    ProcessDecl, RegAssign, RegDecl, SyncReadPort, WritePort,
};
pub use lower::{LowerError, lower};
pub use machine::{StateMachine, Transition};
pub use params::{ParamError, ParamExpr, Params};
pub use primitives::{counter, ram, ram_sync, register, register_file, rom};
pub use scheduler::{SchedulerError, schedule};
pub use sim::{ClockGen, SimError, Simulator};
pub use vcd::VcdWriter;
pub use vecsig::{Bundle, BundleField, SignalVec};
pub use wire::{Direction, Port, Wire};
