use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bit mask for a width in `0..=64`.
pub fn mask(width: usize) -> u64 {
    if width >= 64 { u64::MAX } else { (1u64 << width) - 1 }
}

pub(crate) fn mask128(width: usize) -> u128 {
    if width >= 128 { u128::MAX } else { (1u128 << width) - 1 }
}

/// Ceiling log2; `clog2(0)` and `clog2(1)` are 0.
pub fn clog2(n: u64) -> usize {
    if n <= 1 { 0 } else { 64 - (n - 1).leading_zeros() as usize }
}

/// Minimum number of bits that represent `v` (at least 1).
pub fn min_width(v: u64) -> usize {
    if v == 0 { 1 } else { 64 - v.leading_zeros() as usize }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Not,
    ReduceAnd,
    ReduceOr,
    ReduceXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Nand,
    Nor,
    Xnor,
    Shl,
    Shr,
    Sar,
    Rol,
    Ror,
    Eq,
    Ne,
    LtU,
    LtS,
    LeU,
    LeS,
    GtU,
    GtS,
    GeU,
    GeS,
}

impl BinaryOp {
    pub fn is_compare(self) -> bool {
        use BinaryOp::*;
        matches!(self, Eq | Ne | LtU | LtS | LeU | LeS | GtU | GtS | GeU | GeS)
    }

    pub fn is_shift(self) -> bool {
        use BinaryOp::*;
        matches!(self, Shl | Shr | Sar | Rol | Ror)
    }

    /// Result width by the RTL width rules: `+`/`-` grow one bit over the
    /// wider operand, `*` sums the operand widths, division and shifts keep
    /// the left width, comparisons are one bit.
    pub fn result_width(self, lw: usize, rw: usize) -> usize {
        use BinaryOp::*;
        match self {
            Add | Sub => lw.max(rw) + 1,
            Mul => lw + rw,
            Div | Rem => lw,
            And | Or | Xor | Nand | Nor | Xnor => lw,
            Shl | Shr | Sar | Rol | Ror => lw,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseArm {
    pub value: u64,
    pub expr: Expr,
}

/// A width-carrying expression tree. Every node records its result width so
/// serialized IR is self-describing; the constructors below derive widths by
/// the standard rules so hand-built trees stay consistent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expr {
    Literal { value: u64, width: usize },
    Net { name: String, width: usize },
    Slice { base: Box<Expr>, high: usize, low: usize, width: usize },
    Concat { parts: Vec<Expr>, width: usize },
    Replicate { base: Box<Expr>, count: usize, width: usize },
    Unary { op: UnaryOp, base: Box<Expr>, width: usize },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr>, width: usize },
    Mux { cond: Box<Expr>, then_expr: Box<Expr>, else_expr: Box<Expr>, width: usize },
    Case { sel: Box<Expr>, arms: Vec<CaseArm>, default: Option<Box<Expr>>, width: usize },
    MemRead { memory: String, addr: Box<Expr>, width: usize },
}

impl Expr {
    pub fn lit(value: u64, width: usize) -> Self {
        Expr::Literal { value: value & mask(width), width }
    }

    /// Width-inferring literal: the minimum number of bits that fit the value.
    pub fn lit_min(value: u64) -> Self {
        Expr::lit(value, min_width(value))
    }

    pub fn net(name: impl Into<String>, width: usize) -> Self {
        Expr::Net { name: name.into(), width }
    }

    pub fn slice(self, high: usize, low: usize) -> Self {
        let width = high - low + 1;
        Expr::Slice { base: Box::new(self), high, low, width }
    }

    pub fn bit(self, index: usize) -> Self {
        self.slice(index, index)
    }

    pub fn concat(parts: Vec<Expr>) -> Self {
        let width = parts.iter().map(|p| p.width()).sum();
        Expr::Concat { parts, width }
    }

    pub fn repeat(self, count: usize) -> Self {
        let width = self.width() * count;
        Expr::Replicate { base: Box::new(self), count, width }
    }

    pub fn unary(op: UnaryOp, base: Expr) -> Self {
        let width = match op {
            UnaryOp::Not => base.width(),
            _ => 1,
        };
        Expr::Unary { op, base: Box::new(base), width }
    }

    pub fn not(self) -> Self {
        Expr::unary(UnaryOp::Not, self)
    }

    pub fn reduce_and(self) -> Self {
        Expr::unary(UnaryOp::ReduceAnd, self)
    }

    pub fn reduce_or(self) -> Self {
        Expr::unary(UnaryOp::ReduceOr, self)
    }

    pub fn reduce_xor(self) -> Self {
        Expr::unary(UnaryOp::ReduceXor, self)
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        let width = op.result_width(lhs.width(), rhs.width());
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), width }
    }

    pub fn add(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Add, self, rhs)
    }

    pub fn sub(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Sub, self, rhs)
    }

    pub fn mul(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Mul, self, rhs)
    }

    pub fn div(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Div, self, rhs)
    }

    pub fn rem(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Rem, self, rhs)
    }

    pub fn and(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::And, self, rhs)
    }

    pub fn or(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Or, self, rhs)
    }

    pub fn xor(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Xor, self, rhs)
    }

    pub fn shl(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Shl, self, rhs)
    }

    pub fn shr(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Shr, self, rhs)
    }

    pub fn sar(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Sar, self, rhs)
    }

    pub fn eq(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn ne(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::Ne, self, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::LtU, self, rhs)
    }

    pub fn ge(self, rhs: Expr) -> Self {
        Expr::binary(BinaryOp::GeU, self, rhs)
    }

    pub fn mux(cond: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        let width = then_expr.width().max(else_expr.width());
        Expr::Mux {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
            width,
        }
    }

    pub fn case(sel: Expr, arms: Vec<CaseArm>, default: Option<Expr>) -> Self {
        let width = arms
            .iter()
            .map(|a| a.expr.width())
            .chain(default.iter().map(|d| d.width()))
            .max()
            .unwrap_or(1);
        Expr::Case { sel: Box::new(sel), arms, default: default.map(Box::new), width }
    }

    pub fn mem_read(memory: impl Into<String>, addr: Expr, width: usize) -> Self {
        Expr::MemRead { memory: memory.into(), addr: Box::new(addr), width }
    }

    /// Zero-extends or truncates to `width`, chasing the gate-level rule that
    /// width adjustment is zero-extension on the high side.
    pub fn resize(self, width: usize) -> Self {
        let cur = self.width();
        if width == cur {
            self
        } else if width < cur {
            self.slice(width - 1, 0)
        } else {
            Expr::concat(vec![Expr::lit(0, width - cur), self])
        }
    }

    pub fn width(&self) -> usize {
        match self {
            Expr::Literal { width, .. }
            | Expr::Net { width, .. }
            | Expr::Slice { width, .. }
            | Expr::Concat { width, .. }
            | Expr::Replicate { width, .. }
            | Expr::Unary { width, .. }
            | Expr::Binary { width, .. }
            | Expr::Mux { width, .. }
            | Expr::Case { width, .. }
            | Expr::MemRead { width, .. } => *width,
        }
    }

    /// Collects the names of all referenced nets (for dependency ordering).
    pub fn collect_nets(&self, out: &mut crate::HashSet<String>) {
        match self {
            Expr::Literal { .. } => {}
            Expr::Net { name, .. } => {
                out.insert(name.clone());
            }
            Expr::Slice { base, .. } | Expr::Replicate { base, .. } => base.collect_nets(out),
            Expr::Concat { parts, .. } => {
                for p in parts {
                    p.collect_nets(out);
                }
            }
            Expr::Unary { base, .. } => base.collect_nets(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_nets(out);
                rhs.collect_nets(out);
            }
            Expr::Mux { cond, then_expr, else_expr, .. } => {
                cond.collect_nets(out);
                then_expr.collect_nets(out);
                else_expr.collect_nets(out);
            }
            Expr::Case { sel, arms, default, .. } => {
                sel.collect_nets(out);
                for a in arms {
                    a.expr.collect_nets(out);
                }
                if let Some(d) = default {
                    d.collect_nets(out);
                }
            }
            Expr::MemRead { addr, .. } => addr.collect_nets(out),
        }
    }

    /// Collects referenced memory names.
    pub fn collect_mems(&self, out: &mut crate::HashSet<String>) {
        match self {
            Expr::Literal { .. } | Expr::Net { .. } => {}
            Expr::Slice { base, .. } | Expr::Replicate { base, .. } => base.collect_mems(out),
            Expr::Concat { parts, .. } => {
                for p in parts {
                    p.collect_mems(out);
                }
            }
            Expr::Unary { base, .. } => base.collect_mems(out),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_mems(out);
                rhs.collect_mems(out);
            }
            Expr::Mux { cond, then_expr, else_expr, .. } => {
                cond.collect_mems(out);
                then_expr.collect_mems(out);
                else_expr.collect_mems(out);
            }
            Expr::Case { sel, arms, default, .. } => {
                sel.collect_mems(out);
                for a in arms {
                    a.expr.collect_mems(out);
                }
                if let Some(d) = default {
                    d.collect_mems(out);
                }
            }
            Expr::MemRead { memory, addr, .. } => {
                out.insert(memory.clone());
                addr.collect_mems(out);
            }
        }
    }

    /// Rewrites every net and memory reference through `f` (used by the
    /// flattening pass to qualify names with instance prefixes).
    pub fn map_names(&self, f: &impl Fn(&str) -> String) -> Expr {
        match self {
            Expr::Literal { value, width } => Expr::Literal { value: *value, width: *width },
            Expr::Net { name, width } => Expr::Net { name: f(name), width: *width },
            Expr::Slice { base, high, low, width } => Expr::Slice {
                base: Box::new(base.map_names(f)),
                high: *high,
                low: *low,
                width: *width,
            },
            Expr::Concat { parts, width } => Expr::Concat {
                parts: parts.iter().map(|p| p.map_names(f)).collect(),
                width: *width,
            },
            Expr::Replicate { base, count, width } => Expr::Replicate {
                base: Box::new(base.map_names(f)),
                count: *count,
                width: *width,
            },
            Expr::Unary { op, base, width } => Expr::Unary {
                op: *op,
                base: Box::new(base.map_names(f)),
                width: *width,
            },
            Expr::Binary { op, lhs, rhs, width } => Expr::Binary {
                op: *op,
                lhs: Box::new(lhs.map_names(f)),
                rhs: Box::new(rhs.map_names(f)),
                width: *width,
            },
            Expr::Mux { cond, then_expr, else_expr, width } => Expr::Mux {
                cond: Box::new(cond.map_names(f)),
                then_expr: Box::new(then_expr.map_names(f)),
                else_expr: Box::new(else_expr.map_names(f)),
                width: *width,
            },
            Expr::Case { sel, arms, default, width } => Expr::Case {
                sel: Box::new(sel.map_names(f)),
                arms: arms
                    .iter()
                    .map(|a| CaseArm { value: a.value, expr: a.expr.map_names(f) })
                    .collect(),
                default: default.as_ref().map(|d| Box::new(d.map_names(f))),
                width: *width,
            },
            Expr::MemRead { memory, addr, width } => Expr::MemRead {
                memory: f(memory),
                addr: Box::new(addr.map_names(f)),
                width: *width,
            },
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    #[error("unknown signal `{0}`")]
    UnknownNet(String),
    #[error("out-of-range address {addr:#x} on memory `{memory}` (depth {depth})")]
    OutOfRangeAddress { memory: String, addr: u64, depth: usize },
    #[error("no case arm matches selector value {selector:#x}")]
    NoCaseMatch { selector: u64 },
}

/// Name resolution for the behavioral interpreter.
pub trait EvalEnv {
    fn net(&self, name: &str) -> Option<u64>;
    fn mem_read(&self, memory: &str, addr: u64) -> Result<u64, EvalError>;
}

impl Expr {
    /// Interprets the expression against `env`. Arithmetic is carried in 128
    /// bits so grown intermediate widths (e.g. a 64x64 product) stay exact
    /// before the final truncation to the node width.
    pub fn eval(&self, env: &impl EvalEnv) -> Result<u64, EvalError> {
        let v = self.eval128(env)?;
        Ok((v & mask128(self.width().min(64))) as u64)
    }

    fn eval128(&self, env: &impl EvalEnv) -> Result<u128, EvalError> {
        use BinaryOp::*;
        let v = match self {
            Expr::Literal { value, .. } => *value as u128,
            Expr::Net { name, .. } => env
                .net(name)
                .ok_or_else(|| EvalError::UnknownNet(name.clone()))? as u128,
            Expr::Slice { base, high, low, .. } => {
                let v = base.eval128(env)?;
                (v >> low) & mask128(high - low + 1)
            }
            Expr::Concat { parts, .. } => {
                let mut acc = 0u128;
                for p in parts {
                    acc = (acc << p.width()) | (p.eval128(env)? & mask128(p.width()));
                }
                acc
            }
            Expr::Replicate { base, count, .. } => {
                let v = base.eval128(env)? & mask128(base.width());
                let mut acc = 0u128;
                for _ in 0..*count {
                    acc = (acc << base.width()) | v;
                }
                acc
            }
            Expr::Unary { op, base, .. } => {
                let w = base.width();
                let v = base.eval128(env)? & mask128(w);
                match op {
                    UnaryOp::Not => !v & mask128(w),
                    UnaryOp::ReduceAnd => (v == mask128(w)) as u128,
                    UnaryOp::ReduceOr => (v != 0) as u128,
                    UnaryOp::ReduceXor => (v.count_ones() & 1) as u128,
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                let lw = lhs.width();
                let l = lhs.eval128(env)? & mask128(lw);
                let r = rhs.eval128(env)? & mask128(rhs.width());
                // Operands equalize by zero-extension, matching the gate
                // lowering; signed comparisons flip the MSB at that width.
                let we = lw.max(rhs.width());
                let signed = |x: u128| x ^ (1u128 << (we - 1));
                match op {
                    Add => l + r,
                    Sub => (l.wrapping_sub(r)) & mask128(we + 1),
                    Mul => l * r,
                    Div => {
                        if r == 0 { mask128(we) } else { l / r }
                    }
                    Rem => {
                        if r == 0 { l } else { l % r }
                    }
                    And => l & r,
                    Or => l | r,
                    Xor => l ^ r,
                    Nand => !(l & r) & mask128(we),
                    Nor => !(l | r) & mask128(we),
                    Xnor => !(l ^ r) & mask128(we),
                    Shl => {
                        let a = r.min(128) as usize;
                        if a >= lw { 0 } else { (l << a) & mask128(lw) }
                    }
                    Shr => {
                        let a = r.min(128) as usize;
                        if a >= lw { 0 } else { l >> a }
                    }
                    Sar => {
                        let a = (r.min(128) as usize).min(lw);
                        let sign = (l >> (lw - 1)) & 1;
                        let shifted = if a >= lw { 0 } else { l >> a };
                        let fill = if sign == 1 {
                            mask128(lw) & !(mask128(lw.saturating_sub(a)))
                        } else {
                            0
                        };
                        (shifted | fill) & mask128(lw)
                    }
                    Rol => {
                        let a = (r as usize) % lw;
                        if a == 0 { l } else { ((l << a) | (l >> (lw - a))) & mask128(lw) }
                    }
                    Ror => {
                        let a = (r as usize) % lw;
                        if a == 0 { l } else { ((l >> a) | (l << (lw - a))) & mask128(lw) }
                    }
                    Eq => (l == r) as u128,
                    Ne => (l != r) as u128,
                    LtU => (l < r) as u128,
                    LeU => (l <= r) as u128,
                    GtU => (l > r) as u128,
                    GeU => (l >= r) as u128,
                    LtS => (signed(l) < signed(r)) as u128,
                    LeS => (signed(l) <= signed(r)) as u128,
                    GtS => (signed(l) > signed(r)) as u128,
                    GeS => (signed(l) >= signed(r)) as u128,
                }
            }
            Expr::Mux { cond, then_expr, else_expr, .. } => {
                if cond.eval128(env)? & mask128(cond.width()) != 0 {
                    then_expr.eval128(env)? & mask128(then_expr.width())
                } else {
                    else_expr.eval128(env)? & mask128(else_expr.width())
                }
            }
            Expr::Case { sel, arms, default, .. } => {
                let s = (sel.eval128(env)? & mask128(sel.width())) as u64;
                let mut hit = None;
                for arm in arms {
                    if arm.value == s {
                        hit = Some(arm.expr.eval128(env)? & mask128(arm.expr.width()));
                        break;
                    }
                }
                match (hit, default) {
                    (Some(v), _) => v,
                    (None, Some(d)) => d.eval128(env)? & mask128(d.width()),
                    (None, None) => return Err(EvalError::NoCaseMatch { selector: s }),
                }
            }
            Expr::MemRead { memory, addr, .. } => {
                let a = (addr.eval128(env)? & mask128(addr.width())) as u64;
                env.mem_read(memory, a)? as u128
            }
        };
        Ok(v)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal { value, width } => write!(f, "{width}'d{value}"),
            Expr::Net { name, .. } => write!(f, "{name}"),
            Expr::Slice { base, high, low, .. } => {
                if high == low {
                    write!(f, "{base}[{low}]")
                } else {
                    write!(f, "{base}[{high}:{low}]")
                }
            }
            Expr::Concat { parts, .. } => {
                write!(f, "{{")?;
                for (i, p) in parts.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, "}}")
            }
            Expr::Replicate { base, count, .. } => write!(f, "{{{count}{{{base}}}}}"),
            Expr::Unary { op, base, .. } => {
                let s = match op {
                    UnaryOp::Not => "~",
                    UnaryOp::ReduceAnd => "&",
                    UnaryOp::ReduceOr => "|",
                    UnaryOp::ReduceXor => "^",
                };
                write!(f, "{s}({base})")
            }
            Expr::Binary { op, lhs, rhs, .. } => write!(f, "({lhs} {op:?} {rhs})"),
            Expr::Mux { cond, then_expr, else_expr, .. } => {
                write!(f, "({cond} ? {then_expr} : {else_expr})")
            }
            Expr::Case { sel, arms, default, .. } => {
                write!(f, "case({sel})")?;
                for a in arms {
                    write!(f, " {}:{}", a.value, a.expr)?;
                }
                if let Some(d) = default {
                    write!(f, " default:{d}")?;
                }
                Ok(())
            }
            Expr::MemRead { memory, addr, .. } => write!(f, "{memory}[{addr}]"),
        }
    }
}
