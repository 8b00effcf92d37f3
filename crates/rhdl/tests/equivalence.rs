//! Behavioral vs. gate-level agreement on the same component descriptions.

use proptest::prelude::*;
use rhdl::{lower, Component, Expr, GateSimulator};
use test_case::test_case;

fn gate_sim(component: &mut Component) -> GateSimulator {
    component.check().unwrap();
    let flat = component.flat_ir().unwrap();
    let gate = lower(&flat).unwrap();
    GateSimulator::new(gate, 1).unwrap()
}

fn behavioral_cycle(c: &mut Component) {
    c.set_input("clk", 0).unwrap();
    c.propagate().unwrap();
    c.set_input("clk", 1).unwrap();
    c.propagate().unwrap();
}

fn half_adder() -> Component {
    let mut c = Component::new("half_adder");
    c.port_input("a", 1)
        .port_input("b", 1)
        .port_output("sum", 1)
        .port_output("cout", 1)
        .assign("sum", Expr::net("a", 1).xor(Expr::net("b", 1)))
        .assign("cout", Expr::net("a", 1).and(Expr::net("b", 1)));
    c
}

#[test_case(0, 0, 0, 0)]
#[test_case(0, 1, 1, 0)]
#[test_case(1, 0, 1, 0)]
#[test_case(1, 1, 0, 1)]
fn half_adder_matches(a: u64, b: u64, sum: u64, cout: u64) {
    let mut c = half_adder();
    let mut gates = gate_sim(&mut c);

    c.set_input("a", a).unwrap();
    c.set_input("b", b).unwrap();
    c.propagate().unwrap();
    assert_eq!(c.get_output("sum").unwrap(), sum);
    assert_eq!(c.get_output("cout").unwrap(), cout);

    gates.poke("a", a).unwrap();
    gates.poke("b", b).unwrap();
    gates.evaluate();
    assert_eq!(gates.peek_lane("sum", 0).unwrap(), sum);
    assert_eq!(gates.peek_lane("cout", 0).unwrap(), cout);
}

fn ripple_adder8() -> Component {
    let mut c = Component::new("adder8");
    let total = Expr::net("a", 8)
        .add(Expr::net("b", 8))
        .add(Expr::net("cin", 1));
    c.port_input("a", 8)
        .port_input("b", 8)
        .port_input("cin", 1)
        .port_output("sum", 8)
        .port_output("cout", 1)
        .assign("sum", total.clone().slice(7, 0))
        .assign("cout", total.bit(8));
    c
}

#[test_case(0xa5, 0x3c, 1, 0xe2, 0)]
#[test_case(0xff, 0x01, 0, 0x00, 1)]
#[test_case(0x00, 0x00, 0, 0x00, 0)]
#[test_case(0x80, 0x80, 1, 0x01, 1)]
fn ripple_adder_matches(a: u64, b: u64, cin: u64, sum: u64, cout: u64) {
    let mut c = ripple_adder8();
    let mut gates = gate_sim(&mut c);

    for (sim_in, value) in [("a", a), ("b", b), ("cin", cin)] {
        c.set_input(sim_in, value).unwrap();
        gates.poke(sim_in, value).unwrap();
    }
    c.propagate().unwrap();
    gates.evaluate();

    assert_eq!(c.get_output("sum").unwrap(), sum);
    assert_eq!(c.get_output("cout").unwrap(), cout);
    assert_eq!(gates.peek_lane("sum", 0).unwrap(), sum);
    assert_eq!(gates.peek_lane("cout", 0).unwrap(), cout);
}

#[test]
fn register_with_sync_reset_and_enable() {
    let mut c = rhdl::register(8);
    let mut gates = gate_sim(&mut c);

    // (rst, en, d) -> expected q after the edge
    let sequence: [(u64, u64, u64, u64); 4] = [
        (0, 1, 0x42, 0x42),
        (0, 1, 0x7f, 0x7f),
        (1, 1, 0xaa, 0x00),
        (0, 0, 0x11, 0x00),
    ];

    assert_eq!(c.get_output("q").unwrap(), 0);
    gates.evaluate();
    assert_eq!(gates.peek_lane("q", 0).unwrap(), 0);

    for (rst, en, d, expect) in sequence {
        c.set_input("rst", rst).unwrap();
        c.set_input("en", en).unwrap();
        c.set_input("d", d).unwrap();
        behavioral_cycle(&mut c);
        assert_eq!(c.get_output("q").unwrap(), expect);

        gates.poke("rst", rst).unwrap();
        gates.poke("en", en).unwrap();
        gates.poke("d", d).unwrap();
        gates.tick();
        assert_eq!(gates.peek_lane("q", 0).unwrap(), expect);
    }
}

#[test]
fn ram_256x8_interleaved_writes() {
    let mut c = rhdl::ram(256, 8);
    let mut gates = gate_sim(&mut c);

    for addr in 0..16u64 {
        let data = 0x42 ^ (addr * 7);
        for (name, value) in [("we", 1), ("waddr", addr), ("wdata", data & 0xff)] {
            c.set_input(name, value).unwrap();
            gates.poke(name, value).unwrap();
        }
        behavioral_cycle(&mut c);
        gates.tick();
    }

    c.set_input("we", 0).unwrap();
    gates.poke("we", 0).unwrap();
    for addr in 0..16u64 {
        let expect = (0x42 ^ (addr * 7)) & 0xff;
        c.set_input("raddr", addr).unwrap();
        c.propagate().unwrap();
        gates.poke("raddr", addr).unwrap();
        gates.evaluate();
        assert_eq!(c.get_output("rdata").unwrap(), expect);
        assert_eq!(gates.peek_lane("rdata", 0).unwrap(), expect);
    }
}

#[test]
fn traffic_light_state_machine() {
    use rhdl::{StateMachine, Transition};

    let machine = StateMachine {
        clock: "clk".into(),
        reset: "rst".into(),
        async_reset: false,
        states: vec!["red".into(), "green".into(), "yellow".into(), "walk".into()],
        initial: "red".into(),
        state_output: Some("state".into()),
        transitions: vec![
            Transition::when("red", Expr::net("sensor", 1), "green"),
            Transition::always("green", "yellow"),
            Transition::always("yellow", "red"),
        ],
    };
    let red = machine.state_index("red").unwrap();
    let green = machine.state_index("green").unwrap();

    let mut c = Component::new("traffic");
    c.port_input("clk", 1)
        .port_input("rst", 1)
        .port_input("sensor", 1)
        .port_output("state", 2);
    c.state_machine("st", machine).unwrap();
    let mut gates = gate_sim(&mut c);

    c.set_input("rst", 1).unwrap();
    gates.poke("rst", 1).unwrap();
    behavioral_cycle(&mut c);
    gates.tick();

    c.set_input("rst", 0).unwrap();
    c.set_input("sensor", 0).unwrap();
    gates.poke("rst", 0).unwrap();
    gates.poke("sensor", 0).unwrap();
    for _ in 0..4 {
        behavioral_cycle(&mut c);
        gates.tick();
        assert_eq!(c.get_output("state").unwrap(), red);
        assert_eq!(gates.peek_lane("state", 0).unwrap(), red);
    }

    c.set_input("sensor", 1).unwrap();
    gates.poke("sensor", 1).unwrap();
    behavioral_cycle(&mut c);
    gates.tick();
    assert_eq!(c.get_output("state").unwrap(), green);
    assert_eq!(gates.peek_lane("state", 0).unwrap(), green);
}

#[test]
fn hierarchical_adder_from_half_adders() {
    // Full adder out of two half adders and an OR, checked against the flat
    // gate lowering of the whole tree.
    let mut c = Component::new("full_adder");
    c.port_input("a", 1)
        .port_input("b", 1)
        .port_input("cin", 1)
        .port_output("sum", 1)
        .port_output("cout", 1)
        .wire("c1", 1)
        .wire("c2", 1)
        .wire("s1", 1);
    c.instance("ha0", half_adder());
    c.instance("ha1", half_adder());
    c.link("a", "ha0.a")
        .link("b", "ha0.b")
        .link("ha0.sum", "s1")
        .link("ha0.cout", "c1")
        .link("s1", "ha1.a")
        .link("cin", "ha1.b")
        .link("ha1.sum", "sum")
        .link("ha1.cout", "c2")
        .assign("cout", Expr::net("c1", 1).or(Expr::net("c2", 1)));
    let mut gates = gate_sim(&mut c);

    for v in 0..8u64 {
        let (a, b, cin) = (v & 1, (v >> 1) & 1, (v >> 2) & 1);
        let expect = a + b + cin;
        c.set_input("a", a).unwrap();
        c.set_input("b", b).unwrap();
        c.set_input("cin", cin).unwrap();
        c.propagate().unwrap();
        gates.poke("a", a).unwrap();
        gates.poke("b", b).unwrap();
        gates.poke("cin", cin).unwrap();
        gates.evaluate();
        assert_eq!(c.get_output("sum").unwrap(), expect & 1);
        assert_eq!(c.get_output("cout").unwrap(), expect >> 1);
        assert_eq!(gates.peek_lane("sum", 0).unwrap(), expect & 1);
        assert_eq!(gates.peek_lane("cout", 0).unwrap(), expect >> 1);
    }
}

fn alu8() -> Component {
    let a = || Expr::net("a", 8);
    let b = || Expr::net("b", 8);
    let mut c = Component::new("alu8");
    c.port_input("a", 8)
        .port_input("b", 8)
        .port_input("sel", 1)
        .port_output("add_out", 8)
        .port_output("and_out", 8)
        .port_output("xor_out", 8)
        .port_output("mul_out", 8)
        .port_output("div_out", 8)
        .port_output("rem_out", 8)
        .port_output("mux_out", 8)
        .port_output("lt_out", 1)
        .port_output("lts_out", 1)
        .port_output("eq_out", 1)
        .port_output("shr_out", 8)
        .port_output("sar_out", 8)
        .port_output("rxor_out", 1)
        .assign("add_out", a().add(b()).slice(7, 0))
        .assign("and_out", a().and(b()))
        .assign("xor_out", a().xor(b()))
        .assign("mul_out", a().mul(b()).slice(7, 0))
        .assign("div_out", a().div(b()))
        .assign("rem_out", a().rem(b()))
        .assign("mux_out", Expr::mux(Expr::net("sel", 1), a(), b()))
        .assign("lt_out", a().lt(b()))
        .assign("lts_out", Expr::binary(rhdl::BinaryOp::LtS, a(), b()))
        .assign("eq_out", a().eq(b()))
        .assign("shr_out", a().shr(b().slice(2, 0)))
        .assign("sar_out", a().sar(b().slice(2, 0)))
        .assign("rxor_out", a().reduce_xor());
    c
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn alu_matches_on_random_inputs(a in 0u64..256, b in 0u64..256, sel in 0u64..2) {
        let mut c = alu8();
        let mut gates = gate_sim(&mut c);

        for (name, value) in [("a", a), ("b", b), ("sel", sel)] {
            c.set_input(name, value).unwrap();
            gates.poke(name, value).unwrap();
        }
        c.propagate().unwrap();
        gates.evaluate();

        for out in [
            "add_out", "and_out", "xor_out", "mul_out", "div_out", "rem_out", "mux_out",
            "lt_out", "lts_out", "eq_out", "shr_out", "sar_out", "rxor_out",
        ] {
            prop_assert_eq!(
                c.get_output(out).unwrap(),
                gates.peek_lane(out, 0).unwrap(),
                "mismatch on {}", out
            );
        }
    }
}
