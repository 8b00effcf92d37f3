//! Parameter binding and derived-parameter resolution on real components.

use rhdl::{lower, Component, Expr, GateSimulator, ParamError, ParamExpr};

/// A FIFO-ish depth/width pair where the address width derives from depth.
fn build_buffer(depth: u64) -> Component {
    let mut c = Component::new("buffer");
    c.parameter("DEPTH", depth);
    c.parameter("WIDTH", 8);
    c.derived_parameter("ADDR", ParamExpr::name("DEPTH").clog2());
    c
}

#[test]
fn derived_widths_shape_the_ports() {
    let mut c = build_buffer(64);
    let width = c.param("WIDTH").unwrap() as usize;
    let depth = c.param("DEPTH").unwrap() as usize;
    let addr = c.param("ADDR").unwrap() as usize;
    assert_eq!(addr, 6);

    c.port_input("clk", 1)
        .port_input("we", 1)
        .port_input("waddr", addr)
        .port_input("wdata", width)
        .port_input("raddr", addr)
        .port_output("rdata", width)
        .memory("mem", depth, width)
        .sync_write(
            "mem",
            "clk",
            Expr::net("waddr", addr),
            Expr::net("wdata", width),
            Expr::net("we", 1),
        )
        .assign("rdata", Expr::mem_read("mem", Expr::net("raddr", addr), width));
    c.check().unwrap();

    let gate = lower(&c.flat_ir().unwrap()).unwrap();
    assert_eq!(gate.input("waddr").unwrap().nets.len(), 6);
    assert_eq!(gate.dff_count(), 64 * 8);

    let mut sim = GateSimulator::new(gate, 1).unwrap();
    sim.poke("we", 1).unwrap();
    sim.poke("waddr", 0x2a).unwrap();
    sim.poke("wdata", 0x99).unwrap();
    sim.tick();
    sim.poke("we", 0).unwrap();
    sim.poke("raddr", 0x2a).unwrap();
    sim.evaluate();
    assert_eq!(sim.peek_lane("rdata", 0).unwrap(), 0x99);
}

#[test]
fn instance_parameter_override() {
    let mut c = build_buffer(16);
    c.set_parameter("DEPTH", 32).unwrap();
    assert_eq!(c.param("ADDR").unwrap(), 5);
}

#[test]
fn override_unknown_parameter_errors() {
    let mut c = build_buffer(16);
    assert_eq!(
        c.set_parameter("NOPE", 1).unwrap_err(),
        ParamError::Unknown { name: "NOPE".into() }
    );
}

#[test]
fn parameter_cycle_surfaces_from_check() {
    let mut c = Component::new("cyclic");
    c.derived_parameter("A", ParamExpr::name("B").add(ParamExpr::value(1)));
    c.derived_parameter("B", ParamExpr::name("A").add(ParamExpr::value(1)));
    c.port_input("x", 1).port_output("y", 1).assign("y", Expr::net("x", 1));
    let err = c.check().unwrap_err();
    assert!(matches!(
        err,
        rhdl::ElabError::Param(ParamError::Cycle { .. })
    ));
}

#[test]
fn unknown_parameter_read() {
    let mut c = build_buffer(16);
    assert_eq!(
        c.param("GONE").unwrap_err(),
        ParamError::Unknown { name: "GONE".into() }
    );
}

#[test]
fn derived_parameters_appear_in_the_instance_record() {
    let mut child = build_buffer(8);
    child.port_input("x", 1).port_output("y", 1).assign("y", Expr::net("x", 1));
    let mut top = Component::new("top");
    top.port_input("x", 1).port_output("y", 1);
    top.instance("u", child);
    top.link("x", "u.x").link("u.y", "y");
    top.check().unwrap();

    let ir = top.ir();
    let params = &ir.instances[0].params;
    assert!(params.contains(&("DEPTH".to_string(), 8)));
    assert!(params.contains(&("ADDR".to_string(), 3)));
}
