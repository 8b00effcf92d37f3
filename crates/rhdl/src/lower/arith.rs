use crate::gate::GateKind;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// Half adder: sum and carry from two bits.
    fn half_adder(&mut self, a: usize, b: usize) -> (usize, usize) {
        let s = self.emit(GateKind::Xor, vec![a, b]);
        let c = self.emit(GateKind::And, vec![a, b]);
        (s, c)
    }

    /// Full adder composed of two half adders and an OR.
    fn full_adder(&mut self, a: usize, b: usize, cin: usize) -> (usize, usize) {
        let (s1, c1) = self.half_adder(a, b);
        let (s, c2) = self.half_adder(s1, cin);
        let cout = self.emit(GateKind::Or, vec![c1, c2]);
        (s, cout)
    }

    /// Ripple-carry adder over equal-width operands. The first cell collapses
    /// to a half adder when the carry-in is the shared constant zero.
    pub(crate) fn ripple_add(
        &mut self,
        a: &[usize],
        b: &[usize],
        cin: usize,
    ) -> (Vec<usize>, usize) {
        debug_assert_eq!(a.len(), b.len());
        let zero = self.const_bit(0);
        let mut sum = Vec::with_capacity(a.len());
        let mut carry = cin;
        for (i, (&ai, &bi)) in a.iter().zip(b.iter()).enumerate() {
            let (s, c) = if i == 0 && carry == zero {
                self.half_adder(ai, bi)
            } else {
                self.full_adder(ai, bi, carry)
            };
            sum.push(s);
            carry = c;
        }
        (sum, carry)
    }

    /// `a - b` as `a + !b + 1`: a row of inverters plus the ripple adder with
    /// the carry-in tied high. Returns the difference and the carry-out (the
    /// carry-out is high exactly when no borrow occurred, i.e. `a >= b`).
    pub(crate) fn sub_with_carry(&mut self, a: &[usize], b: &[usize]) -> (Vec<usize>, usize) {
        debug_assert_eq!(a.len(), b.len());
        let nb: Vec<usize> = b.iter().map(|&x| self.emit(GateKind::Not, vec![x])).collect();
        let one = self.const_bit(1);
        self.ripple_add(a, &nb, one)
    }

    /// Two's-complement subtraction at `max(a, b) + 1` bits.
    pub(crate) fn ripple_sub(&mut self, a: &[usize], b: &[usize]) -> Vec<usize> {
        let w = a.len().max(b.len()) + 1;
        let a = self.fit(a.to_vec(), w);
        let b = self.fit(b.to_vec(), w);
        let (diff, _carry) = self.sub_with_carry(&a, &b);
        diff
    }

    /// Array multiplier: per-bit AND partial products summed by a diagonal of
    /// ripple adders, producing `a + b` bits.
    pub(crate) fn array_mul(&mut self, a: &[usize], b: &[usize]) -> Vec<usize> {
        let la = a.len();
        let lb = b.len();
        let zero = self.const_bit(0);
        let mut acc = vec![zero; la + lb];
        for (j, &bj) in b.iter().enumerate() {
            let row: Vec<usize> = a
                .iter()
                .map(|&ai| self.emit(GateKind::And, vec![ai, bj]))
                .collect();
            let mut carry = zero;
            for (i, &p) in row.iter().enumerate() {
                let (s, c) = self.full_adder(acc[i + j], p, carry);
                acc[i + j] = s;
                carry = c;
            }
            if j + la < acc.len() {
                acc[j + la] = carry;
            }
        }
        acc
    }

    /// Restoring divider over equal-width operands: `w` iterations of
    /// subtract, compare, and conditional reload. Returns `(quotient,
    /// remainder)`, both `w` bits. Division by zero yields an all-ones
    /// quotient and the dividend as remainder, matching the behavioral
    /// interpreter.
    pub(crate) fn restoring_divmod(
        &mut self,
        a: &[usize],
        b: &[usize],
    ) -> (Vec<usize>, Vec<usize>) {
        debug_assert_eq!(a.len(), b.len());
        let w = a.len();
        let zero = self.const_bit(0);
        let divisor = self.fit(b.to_vec(), w + 1);
        let mut remainder = vec![zero; w + 1];
        let mut quotient = vec![zero; w];
        for i in (0..w).rev() {
            let mut shifted = Vec::with_capacity(w + 1);
            shifted.push(a[i]);
            shifted.extend(remainder[..w].iter().copied());
            let (diff, no_borrow) = self.sub_with_carry(&shifted, &divisor);
            quotient[i] = no_borrow;
            remainder = self.mux_word(&shifted, &diff, no_borrow);
        }
        (quotient, remainder[..w].to_vec())
    }
}
