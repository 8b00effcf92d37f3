use crate::expr::{BinaryOp, Expr, UnaryOp};
use crate::gate::GateKind;
use crate::lower::{LowerError, Lowerer};
use crate::HashSet;

use super::memory;

impl Lowerer<'_> {
    /// Compiles an expression tree into a gate subnetwork, returning exactly
    /// `expr.width()` nets, LSB first.
    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<Vec<usize>, LowerError> {
        let width = expr.width();
        let bits = match expr {
            Expr::Literal { value, width } => self.const_word(*value, *width),
            Expr::Net { name, width } => {
                let group = self.group(name)?;
                if group.len() != *width {
                    return Err(LowerError::WidthError {
                        context: name.clone(),
                        expected: group.len(),
                        found: *width,
                    });
                }
                group
            }
            Expr::Slice { base, high, low, .. } => {
                let bits = self.lower_expr(base)?;
                if *high >= bits.len() {
                    return Err(LowerError::WidthError {
                        context: format!("{base}"),
                        expected: bits.len(),
                        found: high + 1,
                    });
                }
                bits[*low..=*high].to_vec()
            }
            Expr::Concat { parts, .. } => {
                let mut bits = Vec::with_capacity(width);
                for part in parts.iter().rev() {
                    bits.extend(self.lower_expr(part)?);
                }
                bits
            }
            Expr::Replicate { base, count, .. } => {
                let base_bits = self.lower_expr(base)?;
                let mut bits = Vec::with_capacity(width);
                for _ in 0..*count {
                    bits.extend(base_bits.iter().copied());
                }
                bits
            }
            Expr::Unary { op, base, .. } => {
                let bits = self.lower_expr(base)?;
                match op {
                    UnaryOp::Not => bits
                        .into_iter()
                        .map(|b| self.emit(GateKind::Not, vec![b]))
                        .collect(),
                    UnaryOp::ReduceAnd => vec![self.reduce(GateKind::And, &bits)],
                    UnaryOp::ReduceOr => vec![self.reduce(GateKind::Or, &bits)],
                    UnaryOp::ReduceXor => vec![self.reduce(GateKind::Xor, &bits)],
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => self.lower_binary(*op, lhs, rhs)?,
            Expr::Mux { cond, then_expr, else_expr, .. } => {
                let sel = self.lower_bool(cond)?;
                let t = self.lower_expr(then_expr)?;
                let t = self.fit(t, width);
                let e = self.lower_expr(else_expr)?;
                let e = self.fit(e, width);
                self.mux_word(&e, &t, sel)
            }
            Expr::Case { sel, arms, default, .. } => {
                self.lower_case(sel, arms, default.as_deref(), width)?
            }
            Expr::MemRead { memory, addr, .. } => {
                let addr_bits = self.lower_expr(addr)?;
                memory::lower_async_read(self, memory, &addr_bits)?
            }
        };
        Ok(self.fit(bits, width))
    }

    /// Truthiness of a (possibly multi-bit) condition as one net.
    pub(crate) fn lower_bool(&mut self, expr: &Expr) -> Result<usize, LowerError> {
        let bits = self.lower_expr(expr)?;
        Ok(self.reduce(GateKind::Or, &bits))
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
    ) -> Result<Vec<usize>, LowerError> {
        use BinaryOp::*;

        if op.is_shift() {
            let a = self.lower_expr(lhs)?;
            return match rhs {
                Expr::Literal { value, .. } => Ok(self.shift_static(op, &a, *value)),
                _ => {
                    let amount = self.lower_expr(rhs)?;
                    Ok(self.shift_dynamic(op, &a, &amount))
                }
            };
        }

        let a = self.lower_expr(lhs)?;
        let b = self.lower_expr(rhs)?;
        // The narrower operand zero-extends before per-bit operations.
        let we = a.len().max(b.len());
        let a = self.fit(a, we);
        let b = self.fit(b, we);

        let bits = match op {
            And | Or | Xor | Nand | Nor | Xnor => {
                let kind = match op {
                    And => GateKind::And,
                    Or => GateKind::Or,
                    Xor => GateKind::Xor,
                    Nand => GateKind::Nand,
                    Nor => GateKind::Nor,
                    _ => GateKind::Xnor,
                };
                a.iter()
                    .zip(b.iter())
                    .map(|(&x, &y)| self.emit(kind, vec![x, y]))
                    .collect()
            }
            Add => {
                let cin = self.const_bit(0);
                let (mut sum, cout) = self.ripple_add(&a, &b, cin);
                sum.push(cout);
                sum
            }
            Sub => self.ripple_sub(&a, &b),
            Mul => self.array_mul(&a, &b),
            Div => self.restoring_divmod(&a, &b).0,
            Rem => self.restoring_divmod(&a, &b).1,
            Eq => vec![self.eq_word(&a, &b)],
            Ne => {
                let eq = self.eq_word(&a, &b);
                vec![self.emit(GateKind::Not, vec![eq])]
            }
            LtU => vec![self.lt_word(&a, &b)],
            GtU => vec![self.lt_word(&b, &a)],
            LeU => {
                let gt = self.lt_word(&b, &a);
                vec![self.emit(GateKind::Not, vec![gt])]
            }
            GeU => {
                let lt = self.lt_word(&a, &b);
                vec![self.emit(GateKind::Not, vec![lt])]
            }
            LtS | LeS | GtS | GeS => {
                // Signed magnitude compare: flip both MSBs, then compare
                // unsigned.
                let af = self.flip_msb(&a);
                let bf = self.flip_msb(&b);
                match op {
                    LtS => vec![self.lt_word(&af, &bf)],
                    GtS => vec![self.lt_word(&bf, &af)],
                    LeS => {
                        let gt = self.lt_word(&bf, &af);
                        vec![self.emit(GateKind::Not, vec![gt])]
                    }
                    _ => {
                        let lt = self.lt_word(&af, &bf);
                        vec![self.emit(GateKind::Not, vec![lt])]
                    }
                }
            }
            Shl | Shr | Sar | Rol | Ror => unreachable!("shifts handled above"),
        };
        Ok(bits)
    }

    fn lower_case(
        &mut self,
        sel: &Expr,
        arms: &[crate::expr::CaseArm],
        default: Option<&Expr>,
        width: usize,
    ) -> Result<Vec<usize>, LowerError> {
        let sel_width = sel.width();
        let sel_bits = self.lower_expr(sel)?;

        // Arms whose key cannot fit the selector can never match; lowering
        // them would alias onto the low selector bits.
        let live: Vec<&crate::expr::CaseArm> = arms
            .iter()
            .filter(|a| sel_width >= 64 || a.value <= crate::expr::mask(sel_width))
            .collect();

        let mut distinct: HashSet<u64> = HashSet::default();
        for arm in &live {
            distinct.insert(arm.value);
        }
        let total: u128 = 1u128 << sel_width.min(127);
        let exhaustive = (distinct.len() as u128) >= total;
        if default.is_none() && !exhaustive {
            return Err(LowerError::NonExhaustiveCase {
                context: format!("{sel}"),
                covered: distinct.len() as u64,
                total: total.min(u64::MAX as u128) as u64,
            });
        }

        // Fold from the last alternative inward so the first declared arm is
        // the outermost mux: declaration order decides ties.
        let mut acc = match default {
            Some(d) => {
                let bits = self.lower_expr(d)?;
                self.fit(bits, width)
            }
            None => self.const_word(0, width),
        };
        for arm in live.into_iter().rev() {
            let hit = self.eq_const(&sel_bits, arm.value);
            let arm_bits = self.lower_expr(&arm.expr)?;
            let arm_bits = self.fit(arm_bits, width);
            acc = self.mux_word(&acc, &arm_bits, hit);
        }
        Ok(acc)
    }

    /// Fan-in tree of `w - 1` two-input gates.
    pub(crate) fn reduce(&mut self, kind: GateKind, bits: &[usize]) -> usize {
        let mut layer = bits.to_vec();
        while layer.len() > 1 {
            let mut next = Vec::with_capacity(layer.len().div_ceil(2));
            for pair in layer.chunks(2) {
                if pair.len() == 2 {
                    next.push(self.emit(kind, vec![pair[0], pair[1]]));
                } else {
                    next.push(pair[0]);
                }
            }
            layer = next;
        }
        layer[0]
    }

    /// Equality against a constant: an AND tree over each bit or its inverse.
    pub(crate) fn eq_const(&mut self, bits: &[usize], value: u64) -> usize {
        let terms: Vec<usize> = bits
            .iter()
            .enumerate()
            .map(|(i, &b)| {
                if (value >> i) & 1 == 1 {
                    b
                } else {
                    self.emit(GateKind::Not, vec![b])
                }
            })
            .collect();
        self.reduce(GateKind::And, &terms)
    }

    /// Equality: XOR per bit, then reduce-NOR.
    pub(crate) fn eq_word(&mut self, a: &[usize], b: &[usize]) -> usize {
        let diffs: Vec<usize> = a
            .iter()
            .zip(b.iter())
            .map(|(&x, &y)| self.emit(GateKind::Xor, vec![x, y]))
            .collect();
        let any = self.reduce(GateKind::Or, &diffs);
        self.emit(GateKind::Not, vec![any])
    }

    /// Unsigned `a < b` via a full-subtractor borrow chain.
    pub(crate) fn lt_word(&mut self, a: &[usize], b: &[usize]) -> usize {
        let mut borrow = self.const_bit(0);
        for (&ai, &bi) in a.iter().zip(b.iter()) {
            let not_a = self.emit(GateKind::Not, vec![ai]);
            let generate = self.emit(GateKind::And, vec![not_a, bi]);
            let same = self.emit(GateKind::Xnor, vec![ai, bi]);
            let propagate = self.emit(GateKind::And, vec![same, borrow]);
            borrow = self.emit(GateKind::Or, vec![generate, propagate]);
        }
        borrow
    }

    fn flip_msb(&mut self, bits: &[usize]) -> Vec<usize> {
        let mut out = bits.to_vec();
        let last = out.len() - 1;
        out[last] = self.emit(GateKind::Not, vec![bits[last]]);
        out
    }
}
