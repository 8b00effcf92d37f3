use crate::expr::BinaryOp;
use crate::gate::GateKind;
use crate::lower::Lowerer;

impl Lowerer<'_> {
    /// Shift by a compile-time constant: pure wire renaming, no gates beyond
    /// the shared constant fill.
    pub(crate) fn shift_static(&mut self, op: BinaryOp, a: &[usize], amount: u64) -> Vec<usize> {
        let w = a.len();
        let amt = usize::try_from(amount).unwrap_or(usize::MAX);
        match op {
            BinaryOp::Shl => (0..w)
                .map(|i| if i >= amt { a[i - amt] } else { self.const_bit(0) })
                .collect(),
            BinaryOp::Shr => (0..w)
                .map(|i| if i + amt < w { a[i + amt] } else { self.const_bit(0) })
                .collect(),
            BinaryOp::Sar => {
                let fill = a[w - 1];
                (0..w).map(|i| if i + amt < w { a[i + amt] } else { fill }).collect()
            }
            BinaryOp::Rol => {
                let k = amt % w;
                (0..w).map(|i| a[(i + w - k) % w]).collect()
            }
            BinaryOp::Ror => {
                let k = amt % w;
                (0..w).map(|i| a[(i + k) % w]).collect()
            }
            _ => unreachable!("not a shift"),
        }
    }

    /// Barrel shifter: one layer of 2:1 muxes per amount bit, routing a shift
    /// by `2^j`. Amount bits whose stride reaches past the word select the
    /// fill value outright; rotates wrap instead.
    pub(crate) fn shift_dynamic(
        &mut self,
        op: BinaryOp,
        a: &[usize],
        amount: &[usize],
    ) -> Vec<usize> {
        let w = a.len();
        let rotate = matches!(op, BinaryOp::Rol | BinaryOp::Ror);
        let mut cur = a.to_vec();
        let mut overflow = Vec::new();

        for (j, &sel) in amount.iter().enumerate() {
            let stride = 1u128 << j.min(127);
            if rotate {
                let k = (stride % w as u128) as u64;
                if k == 0 {
                    continue;
                }
                let shifted = self.shift_static(op, &cur, k);
                cur = self.mux_word(&cur, &shifted, sel);
            } else if stride >= w as u128 {
                overflow.push(sel);
            } else {
                let shifted = self.shift_static(op, &cur, stride as u64);
                cur = self.mux_word(&cur, &shifted, sel);
            }
        }

        if !overflow.is_empty() {
            let ovf = self.reduce(GateKind::Or, &overflow);
            let fill_bit = match op {
                BinaryOp::Sar => a[w - 1],
                _ => self.const_bit(0),
            };
            let fill = vec![fill_bit; w];
            cur = self.mux_word(&cur, &fill, ovf);
        }
        cur
    }
}
