use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{HashMap, HashSet};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParamError {
    #[error("parameter cycle: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },
    #[error("unresolved parameter `{name}` referenced by `{referrer}`")]
    Unresolved { name: String, referrer: String },
    #[error("unknown parameter `{name}`")]
    Unknown { name: String },
}

/// A derived-parameter expression. Direct parameters are plain values; derived
/// ones are small arithmetic trees over other parameters, resolved in
/// dependency order at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamExpr {
    Const { value: u64 },
    Ref { name: String },
    Add { lhs: Box<ParamExpr>, rhs: Box<ParamExpr> },
    Sub { lhs: Box<ParamExpr>, rhs: Box<ParamExpr> },
    Mul { lhs: Box<ParamExpr>, rhs: Box<ParamExpr> },
    Div { lhs: Box<ParamExpr>, rhs: Box<ParamExpr> },
    Max { lhs: Box<ParamExpr>, rhs: Box<ParamExpr> },
    Clog2 { base: Box<ParamExpr> },
}

impl ParamExpr {
    pub fn value(v: u64) -> Self {
        ParamExpr::Const { value: v }
    }

    pub fn name(n: impl Into<String>) -> Self {
        ParamExpr::Ref { name: n.into() }
    }

    pub fn add(self, rhs: ParamExpr) -> Self {
        ParamExpr::Add { lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn sub(self, rhs: ParamExpr) -> Self {
        ParamExpr::Sub { lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn mul(self, rhs: ParamExpr) -> Self {
        ParamExpr::Mul { lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn div(self, rhs: ParamExpr) -> Self {
        ParamExpr::Div { lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn max(self, rhs: ParamExpr) -> Self {
        ParamExpr::Max { lhs: Box::new(self), rhs: Box::new(rhs) }
    }

    pub fn clog2(self) -> Self {
        ParamExpr::Clog2 { base: Box::new(self) }
    }

    fn deps(&self, out: &mut Vec<String>) {
        match self {
            ParamExpr::Const { .. } => {}
            ParamExpr::Ref { name } => out.push(name.clone()),
            ParamExpr::Add { lhs, rhs }
            | ParamExpr::Sub { lhs, rhs }
            | ParamExpr::Mul { lhs, rhs }
            | ParamExpr::Div { lhs, rhs }
            | ParamExpr::Max { lhs, rhs } => {
                lhs.deps(out);
                rhs.deps(out);
            }
            ParamExpr::Clog2 { base } => base.deps(out),
        }
    }

    fn eval(&self, resolved: &HashMap<String, u64>) -> u64 {
        match self {
            ParamExpr::Const { value } => *value,
            ParamExpr::Ref { name } => resolved[name],
            ParamExpr::Add { lhs, rhs } => lhs.eval(resolved).wrapping_add(rhs.eval(resolved)),
            ParamExpr::Sub { lhs, rhs } => lhs.eval(resolved).wrapping_sub(rhs.eval(resolved)),
            ParamExpr::Mul { lhs, rhs } => lhs.eval(resolved).wrapping_mul(rhs.eval(resolved)),
            ParamExpr::Div { lhs, rhs } => {
                let d = rhs.eval(resolved);
                if d == 0 { 0 } else { lhs.eval(resolved) / d }
            }
            ParamExpr::Max { lhs, rhs } => lhs.eval(resolved).max(rhs.eval(resolved)),
            ParamExpr::Clog2 { base } => crate::expr::clog2(base.eval(resolved)) as u64,
        }
    }
}

/// The parameter table of a component: direct bindings plus derived
/// expressions, frozen into plain values by [`Params::resolve`].
#[derive(Debug, Clone, Default)]
pub struct Params {
    direct: Vec<(String, u64)>,
    derived: Vec<(String, ParamExpr)>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: u64) {
        self.direct.push((name.into(), value));
    }

    pub fn insert_derived(&mut self, name: impl Into<String>, expr: ParamExpr) {
        self.derived.push((name.into(), expr));
    }

    /// Overrides a direct parameter (used by instance parameterization).
    /// Returns `ParamError::Unknown` when the name was never declared.
    pub fn override_value(&mut self, name: &str, value: u64) -> Result<(), ParamError> {
        for (n, v) in self.direct.iter_mut() {
            if n == name {
                *v = value;
                return Ok(());
            }
        }
        Err(ParamError::Unknown { name: name.to_string() })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.direct
            .iter()
            .map(|(n, _)| n.as_str())
            .chain(self.derived.iter().map(|(n, _)| n.as_str()))
    }

    /// Resolves direct parameters first, then derived parameters in dependency
    /// order. A cycle through derived parameters is an error and reports the
    /// participating names in discovery order.
    pub fn resolve(&self) -> Result<HashMap<String, u64>, ParamError> {
        let mut resolved: HashMap<String, u64> = HashMap::default();
        for (name, value) in &self.direct {
            resolved.insert(name.clone(), *value);
        }

        let mut pending: Vec<(String, ParamExpr, Vec<String>)> = self
            .derived
            .iter()
            .map(|(name, expr)| {
                let mut deps = Vec::new();
                expr.deps(&mut deps);
                (name.clone(), expr.clone(), deps)
            })
            .collect();

        let known: HashSet<String> = resolved
            .keys()
            .cloned()
            .chain(pending.iter().map(|(n, _, _)| n.clone()))
            .collect();
        for (name, _, deps) in &pending {
            for dep in deps {
                if !known.contains(dep) {
                    return Err(ParamError::Unresolved {
                        name: dep.clone(),
                        referrer: name.clone(),
                    });
                }
            }
        }

        while !pending.is_empty() {
            let ready: Vec<usize> = pending
                .iter()
                .enumerate()
                .filter(|(_, (_, _, deps))| deps.iter().all(|d| resolved.contains_key(d)))
                .map(|(i, _)| i)
                .collect();
            if ready.is_empty() {
                let path: Vec<String> = pending.iter().map(|(n, _, _)| n.clone()).collect();
                return Err(ParamError::Cycle { path });
            }
            for i in ready.into_iter().rev() {
                let (name, expr, _) = pending.remove(i);
                let value = expr.eval(&resolved);
                resolved.insert(name, value);
            }
        }

        Ok(resolved)
    }
}
