//! A four-state traffic light, run on both engines.
//!
//!     cargo run --example traffic

use rhdl::{lower, Component, Expr, GateSimulator, StateMachine, Transition};

fn main() {
    let machine = StateMachine {
        clock: "clk".into(),
        reset: "rst".into(),
        async_reset: false,
        states: vec!["red".into(), "green".into(), "yellow".into(), "flash".into()],
        initial: "red".into(),
        state_output: Some("state".into()),
        transitions: vec![
            Transition::when("red", Expr::net("sensor", 1), "green"),
            Transition::always("green", "yellow"),
            Transition::always("yellow", "red"),
        ],
    };
    let names = machine.states.clone();

    let mut light = Component::new("traffic");
    light
        .port_input("clk", 1)
        .port_input("rst", 1)
        .port_input("sensor", 1)
        .port_output("state", 2);
    light.state_machine("st", machine).expect("state machine elaborates");
    light.check().expect("component validates");

    let flat = light.flat_ir().expect("flattens");
    let gate = lower(&flat).expect("lowers");
    println!(
        "lowered `{}`: {} nets, {} gates, {} flops",
        gate.name,
        gate.net_count,
        gate.gate_count(),
        gate.dff_count()
    );

    let mut sim = GateSimulator::new(gate, 1).expect("acyclic netlist");
    sim.poke("rst", 1).unwrap();
    sim.tick();
    sim.poke("rst", 0).unwrap();

    for (cycle, sensor) in [0u64, 0, 1, 0, 0, 0, 1, 0].into_iter().enumerate() {
        sim.poke("sensor", sensor).unwrap();
        sim.tick();
        let state = sim.peek_lane("state", 0).unwrap() as usize;
        println!("cycle {cycle}: sensor={sensor} -> {}", names[state]);
    }
}
