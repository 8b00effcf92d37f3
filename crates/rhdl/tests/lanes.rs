//! Lane packing: running L vectors at once must agree with L separate runs.

use proptest::prelude::*;
use rhdl::{lower, Component, Expr, GateIr, GateSimulator};

fn adder8_ir() -> GateIr {
    let mut c = Component::new("adder8");
    let total = Expr::net("a", 8).add(Expr::net("b", 8));
    c.port_input("a", 8)
        .port_input("b", 8)
        .port_output("sum", 8)
        .port_output("cout", 1)
        .assign("sum", total.clone().slice(7, 0))
        .assign("cout", total.bit(8));
    c.check().unwrap();
    lower(&c.flat_ir().unwrap()).unwrap()
}

#[test]
fn broadcast_poke_fills_every_lane() {
    let mut sim = GateSimulator::new(adder8_ir(), 8).unwrap();
    sim.poke("a", 0x21).unwrap();
    sim.poke("b", 0x11).unwrap();
    sim.evaluate();
    assert_eq!(sim.peek_lanes("sum").unwrap(), vec![0x32; 8]);
}

#[test]
fn peek_returns_per_bit_lane_masks() {
    let mut sim = GateSimulator::new(adder8_ir(), 2).unwrap();
    sim.poke_lanes("a", &[0x01, 0x00]).unwrap();
    sim.poke("b", 0x00).unwrap();
    sim.evaluate();
    // Bit 0 of `sum` is high on lane 0 only.
    let masks = sim.peek("sum").unwrap();
    assert_eq!(masks.len(), 8);
    assert_eq!(masks[0], 0b01);
    assert_eq!(masks[1], 0);
}

#[test]
fn lane_count_is_clamped_and_masked() {
    let mut sim = GateSimulator::new(adder8_ir(), 3).unwrap();
    assert_eq!(sim.lanes(), 3);
    sim.poke("a", 0xff).unwrap();
    sim.poke("b", 0x00).unwrap();
    sim.evaluate();
    // Only the three live lanes carry bits.
    for mask in sim.peek("sum").unwrap() {
        assert!(mask <= 0b111);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn lanes_match_individual_runs(
        a in proptest::collection::vec(0u64..256, 8),
        b in proptest::collection::vec(0u64..256, 8),
    ) {
        let ir = adder8_ir();
        let mut wide = GateSimulator::new(ir.clone(), 8).unwrap();
        wide.poke_lanes("a", &a).unwrap();
        wide.poke_lanes("b", &b).unwrap();
        wide.evaluate();

        for lane in 0..8 {
            let mut narrow = GateSimulator::new(ir.clone(), 1).unwrap();
            narrow.poke("a", a[lane]).unwrap();
            narrow.poke("b", b[lane]).unwrap();
            narrow.evaluate();
            prop_assert_eq!(
                wide.peek_lane("sum", lane).unwrap(),
                narrow.peek_lane("sum", 0).unwrap()
            );
            prop_assert_eq!(
                wide.peek_lane("cout", lane).unwrap(),
                narrow.peek_lane("cout", 0).unwrap()
            );
        }
    }

    #[test]
    fn clocked_lanes_stay_independent(d in proptest::collection::vec(0u64..256, 4)) {
        let mut c = rhdl::register(8);
        c.check().unwrap();
        let ir = lower(&c.flat_ir().unwrap()).unwrap();

        let mut wide = GateSimulator::new(ir.clone(), 4).unwrap();
        wide.poke("rst", 0).unwrap();
        wide.poke("en", 1).unwrap();
        wide.poke_lanes("d", &d).unwrap();
        wide.tick();
        // Lane 2 alone takes a reset on the second edge.
        wide.poke_lanes("rst", &[0, 0, 1, 0]).unwrap();
        wide.tick();

        for lane in 0..4 {
            let expect = if lane == 2 { 0 } else { d[lane] };
            prop_assert_eq!(wide.peek_lane("q", lane).unwrap(), expect);
        }
    }
}
