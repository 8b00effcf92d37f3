//! Component trees: instance wiring, parameterized children, bundle
//! serialization, and flattening diagnostics at the component level.

use rhdl::{flatten, lower, Component, ElabError, Expr, GateSimulator, IrBundle, ProcessDecl};

fn scaler(width: usize, shift: u64) -> Component {
    let mut c = Component::new("scaler");
    c.parameter("WIDTH", width as u64);
    c.parameter("SHIFT", shift);
    c.port_input("x", width)
        .port_output("y", width)
        .assign("y", Expr::net("x", width).shl(Expr::lit(shift, 3)));
    c
}

#[test]
fn same_module_different_params_get_unique_names() {
    let mut top = Component::new("top");
    top.port_input("x", 8).port_output("narrow", 8).port_output("wide", 16);
    top.instance("s8", scaler(8, 1));
    top.instance("s16", scaler(16, 2));
    top.wire("x16", 16);
    top.assign("x16", Expr::net("x", 8).resize(16));
    top.link("x", "s8.x")
        .link("x16", "s16.x")
        .link("s8.y", "narrow")
        .link("s16.y", "wide");
    top.check().unwrap();

    let bundle = top.bundle();
    // Two distinct elaborations of `scaler` plus the top.
    assert_eq!(bundle.modules.len(), 3);
    let names: Vec<&str> = bundle.modules.iter().map(|m| m.name.as_str()).collect();
    assert!(names.contains(&"scaler"));
    assert!(names.iter().any(|n| n.starts_with("scaler@")));

    let mut gates =
        GateSimulator::new(lower(&top.flat_ir().unwrap()).unwrap(), 1).unwrap();
    gates.poke("x", 0x21).unwrap();
    gates.evaluate();
    assert_eq!(gates.peek_lane("narrow", 0).unwrap(), 0x42);
    assert_eq!(gates.peek_lane("wide", 0).unwrap(), 0x84);
}

#[test]
fn identical_children_share_one_module() {
    let mut top = Component::new("top");
    top.port_input("x", 8).port_output("a", 8).port_output("b", 8);
    top.instance("u0", scaler(8, 1));
    top.instance("u1", scaler(8, 1));
    top.link("x", "u0.x").link("x", "u1.x").link("u0.y", "a").link("u1.y", "b");
    top.check().unwrap();
    let bundle = top.bundle();
    assert_eq!(bundle.modules.len(), 2);
}

#[test]
fn tie_drives_a_constant_input() {
    let mut adder = Component::new("add1");
    adder
        .port_input("x", 8)
        .port_input("inc", 8)
        .port_output("y", 8)
        .assign("y", Expr::net("x", 8).add(Expr::net("inc", 8)).slice(7, 0));

    let mut top = Component::new("top");
    top.port_input("x", 8).port_output("y", 8);
    top.instance("u", adder);
    top.link("x", "u.x").link("u.y", "y").tie("u", "inc", 5);
    top.check().unwrap();

    top.set_input("x", 10).unwrap();
    top.propagate().unwrap();
    assert_eq!(top.get_output("y").unwrap(), 15);

    let mut gates = GateSimulator::new(lower(&top.flat_ir().unwrap()).unwrap(), 1).unwrap();
    gates.poke("x", 10).unwrap();
    gates.evaluate();
    assert_eq!(gates.peek_lane("y", 0).unwrap(), 15);
}

#[test]
fn unconnected_required_input_fails_flattening() {
    let mut leaf = Component::new("leaf");
    leaf.port_input("must", 1).port_output("o", 1).assign("o", Expr::net("must", 1));
    let mut top = Component::new("top");
    top.port_output("o", 1);
    top.instance("u", leaf);
    top.link("u.o", "o");
    top.check().unwrap();
    let err = top.flat_ir().unwrap_err();
    assert!(matches!(err, ElabError::Flatten(_)), "{err}");
}

#[test]
fn unconnected_default_input_is_tied_off() {
    let mut leaf = Component::new("leaf");
    leaf.port_input_default("en", 1, 1)
        .port_input("d", 4)
        .port_output("o", 4)
        .assign(
            "o",
            Expr::mux(Expr::net("en", 1), Expr::net("d", 4), Expr::lit(0, 4)),
        );
    let mut top = Component::new("top");
    top.port_input("d", 4).port_output("o", 4);
    top.instance("u", leaf);
    top.link("d", "u.d").link("u.o", "o");
    top.check().unwrap();

    let mut gates = GateSimulator::new(lower(&top.flat_ir().unwrap()).unwrap(), 1).unwrap();
    gates.poke("d", 0x9).unwrap();
    gates.evaluate();
    assert_eq!(gates.peek_lane("o", 0).unwrap(), 0x9);
}

#[test]
fn bundle_round_trips_through_json() {
    let mut top = Component::new("top");
    top.port_input("x", 8).port_output("y", 8);
    top.instance("u", scaler(8, 3));
    top.link("x", "u.x").link("u.y", "y");
    top.check().unwrap();

    let bundle = top.bundle();
    let json = bundle.to_json();
    let back = IrBundle::from_json(&json).unwrap();
    assert_eq!(bundle, back);

    let flat = flatten(&back).unwrap();
    let gate = lower(&flat).unwrap();
    let mut sim = GateSimulator::new(gate, 1).unwrap();
    sim.poke("x", 1).unwrap();
    sim.evaluate();
    assert_eq!(sim.peek_lane("y", 0).unwrap(), 8);
}

#[test]
fn clocked_child_inside_structural_parent() {
    let mut reg = Component::new("reg4");
    reg.port_input("clk", 1)
        .port_input("d", 4)
        .port_output("q", 4)
        .reg("r", 4, 0)
        .sequential(ProcessDecl::on("clk").update("r", Expr::net("d", 4)))
        .assign("q", Expr::net("r", 4));

    let mut top = Component::new("top");
    top.port_input("clk", 1).port_input("d", 4).port_output("q", 4);
    top.instance("stage", reg);
    top.link("clk", "stage.clk").link("d", "stage.d").link("stage.q", "q");
    top.check().unwrap();

    top.set_input("d", 0xa).unwrap();
    top.set_input("clk", 0).unwrap();
    top.propagate().unwrap();
    assert_eq!(top.get_output("q").unwrap(), 0);
    top.set_input("clk", 1).unwrap();
    top.propagate().unwrap();
    assert_eq!(top.get_output("q").unwrap(), 0xa);

    // Same story after lowering: the flop's clock is the flattened input.
    let mut gates = GateSimulator::new(lower(&top.flat_ir().unwrap()).unwrap(), 1).unwrap();
    gates.poke("d", 0x5).unwrap();
    gates.tick();
    assert_eq!(gates.peek_lane("q", 0).unwrap(), 0x5);
}
