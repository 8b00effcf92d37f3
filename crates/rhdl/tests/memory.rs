//! Memory primitives across both engines, plus address and enable
//! diagnostics.

use rhdl::{
    lower, Component, ElabError, Expr, GateSimulator, LowerError, SimError,
};

fn gate_sim(component: &mut Component) -> GateSimulator {
    component.check().unwrap();
    GateSimulator::new(lower(&component.flat_ir().unwrap()).unwrap(), 1).unwrap()
}

fn behavioral_cycle(c: &mut Component) {
    c.set_input("clk", 0).unwrap();
    c.propagate().unwrap();
    c.set_input("clk", 1).unwrap();
    c.propagate().unwrap();
}

#[test]
fn rom_matches_behavioral() {
    let contents = vec![0x00, 0x11, 0x7f, 0xff, 0x42];
    let mut c = rhdl::rom(8, contents.clone());
    let mut gates = gate_sim(&mut c);
    for (addr, expect) in contents.iter().enumerate() {
        c.set_input("addr", addr as u64).unwrap();
        c.propagate().unwrap();
        gates.poke("addr", addr as u64).unwrap();
        gates.evaluate();
        assert_eq!(c.get_output("data").unwrap(), *expect);
        assert_eq!(gates.peek_lane("data", 0).unwrap(), *expect);
    }
    // Addresses past the contents read zero at the gate level.
    gates.poke("addr", 7).unwrap();
    gates.evaluate();
    assert_eq!(gates.peek_lane("data", 0).unwrap(), 0);
}

#[test]
fn sync_read_pipeline_matches() {
    let mut c = rhdl::ram_sync(16, 8);
    let mut gates = gate_sim(&mut c);

    for (name, value) in [("we", 1u64), ("waddr", 9), ("wdata", 0x77), ("raddr", 9)] {
        c.set_input(name, value).unwrap();
        gates.poke(name, value).unwrap();
    }
    behavioral_cycle(&mut c);
    gates.tick();
    // The write lands on this edge; the registered read still sees the old
    // contents.
    assert_eq!(c.get_output("rdata").unwrap(), 0);
    assert_eq!(gates.peek_lane("rdata", 0).unwrap(), 0);

    c.set_input("we", 0).unwrap();
    gates.poke("we", 0).unwrap();
    behavioral_cycle(&mut c);
    gates.tick();
    assert_eq!(c.get_output("rdata").unwrap(), 0x77);
    assert_eq!(gates.peek_lane("rdata", 0).unwrap(), 0x77);
}

#[test]
fn register_file_matches() {
    let mut c = rhdl::register_file(8, 16);
    let mut gates = gate_sim(&mut c);

    for (addr, data) in [(1u64, 0x1111u64), (4, 0x4444), (7, 0x7777)] {
        for (name, value) in [("we", 1), ("waddr", addr), ("wdata", data)] {
            c.set_input(name, value).unwrap();
            gates.poke(name, value).unwrap();
        }
        behavioral_cycle(&mut c);
        gates.tick();
    }
    c.set_input("we", 0).unwrap();
    gates.poke("we", 0).unwrap();

    for (a, b, ea, eb) in [(1u64, 4u64, 0x1111u64, 0x4444u64), (7, 0, 0x7777, 0)] {
        c.set_input("raddr_a", a).unwrap();
        c.set_input("raddr_b", b).unwrap();
        c.propagate().unwrap();
        gates.poke("raddr_a", a).unwrap();
        gates.poke("raddr_b", b).unwrap();
        gates.evaluate();
        assert_eq!(c.get_output("rdata_a").unwrap(), ea);
        assert_eq!(c.get_output("rdata_b").unwrap(), eb);
        assert_eq!(gates.peek_lane("rdata_a", 0).unwrap(), ea);
        assert_eq!(gates.peek_lane("rdata_b", 0).unwrap(), eb);
    }
}

#[test]
fn initialized_ram_survives_gate_reset() {
    let mut c = Component::new("boot_ram");
    c.port_input("clk", 1)
        .port_input("we", 1)
        .port_input("addr", 2)
        .port_input("wdata", 8)
        .port_output("rdata", 8)
        .memory_init("mem", 4, 8, vec![0xf0, 0x0f, 0xaa, 0x55], false)
        .sync_write(
            "mem",
            "clk",
            Expr::net("addr", 2),
            Expr::net("wdata", 8),
            Expr::net("we", 1),
        )
        .assign("rdata", Expr::mem_read("mem", Expr::net("addr", 2), 8));
    let mut gates = gate_sim(&mut c);

    gates.poke("we", 0).unwrap();
    for (addr, expect) in [(0u64, 0xf0u64), (1, 0x0f), (2, 0xaa), (3, 0x55)] {
        gates.poke("addr", addr).unwrap();
        gates.evaluate();
        assert_eq!(gates.peek_lane("rdata", 0).unwrap(), expect);
    }

    // Overwrite one word, then reset: the initial contents come back.
    gates.poke("we", 1).unwrap();
    gates.poke("addr", 2).unwrap();
    gates.poke("wdata", 0x00).unwrap();
    gates.tick();
    gates.poke("we", 0).unwrap();
    gates.evaluate();
    assert_eq!(gates.peek_lane("rdata", 0).unwrap(), 0x00);

    gates.reset();
    gates.poke("addr", 2).unwrap();
    gates.evaluate();
    assert_eq!(gates.peek_lane("rdata", 0).unwrap(), 0xaa);
}

#[test]
fn out_of_range_write_address_errors() {
    // Depth 10 with a 4-bit address leaves 10..15 invalid.
    let mut c = Component::new("short_ram");
    c.port_input("clk", 1)
        .port_input("we", 1)
        .port_input("addr", 4)
        .port_input("wdata", 8)
        .port_output("rdata", 8)
        .memory("mem", 10, 8)
        .sync_write(
            "mem",
            "clk",
            Expr::net("addr", 4),
            Expr::net("wdata", 8),
            Expr::net("we", 1),
        )
        .assign("rdata", Expr::mem_read("mem", Expr::net("addr", 4), 8));
    c.check().unwrap();

    c.set_input("we", 1).unwrap();
    c.set_input("addr", 12).unwrap();
    c.set_input("wdata", 1).unwrap();
    c.set_input("clk", 0).unwrap();
    let err = c.propagate().unwrap_err();
    // The read side trips first: the address is combinational.
    assert!(matches!(err, SimError::InvalidMemoryAccess { addr: 12, depth: 10, .. }));
}

#[test]
fn multi_bit_write_enable_is_rejected() {
    let mut c = Component::new("bad_ram");
    c.port_input("clk", 1)
        .port_input("en2", 2)
        .port_input("addr", 2)
        .port_input("wdata", 4)
        .port_output("rdata", 4)
        .memory("mem", 4, 4)
        .sync_write(
            "mem",
            "clk",
            Expr::net("addr", 2),
            Expr::net("wdata", 4),
            Expr::net("en2", 2),
        )
        .assign("rdata", Expr::mem_read("mem", Expr::net("addr", 2), 4));
    assert!(matches!(
        c.check().unwrap_err(),
        ElabError::MultiBitEnable { width: 2, .. }
    ));
}

#[test]
fn multi_bit_enable_rejected_in_lowering_too() {
    use rhdl::{AssignDecl, BehavioralIr, Direction, MemoryDecl, NetDecl, PortDecl, WritePort};
    let mut ir = BehavioralIr::new("bad");
    ir.ports = vec![
        PortDecl { name: "clk".into(), direction: Direction::In, width: 1, default: None },
        PortDecl { name: "en2".into(), direction: Direction::In, width: 2, default: None },
        PortDecl { name: "addr".into(), direction: Direction::In, width: 2, default: None },
        PortDecl { name: "d".into(), direction: Direction::In, width: 4, default: None },
        PortDecl { name: "q".into(), direction: Direction::Out, width: 4, default: None },
    ];
    ir.nets = vec![NetDecl { name: "t".into(), width: 4 }];
    ir.memories = vec![MemoryDecl {
        name: "mem".into(),
        depth: 4,
        width: 4,
        init: Vec::new(),
        read_only: false,
        writes: vec![WritePort {
            clock: "clk".into(),
            addr: Expr::net("addr", 2),
            data: Expr::net("d", 4),
            enable: Expr::net("en2", 2),
        }],
        sync_reads: Vec::new(),
    }];
    ir.assigns = vec![AssignDecl {
        target: "q".into(),
        expr: Expr::mem_read("mem", Expr::net("addr", 2), 4),
    }];
    assert!(matches!(
        lower(&ir).unwrap_err(),
        LowerError::MultiBitEnable { width: 2, .. }
    ));
}

#[test]
fn read_only_memory_rejects_writes() {
    let mut c = Component::new("bad_rom");
    c.port_input("clk", 1)
        .port_input("addr", 2)
        .port_output("data", 8)
        .memory_init("mem", 4, 8, vec![1, 2, 3, 4], true)
        .sync_write(
            "mem",
            "clk",
            Expr::net("addr", 2),
            Expr::lit(0, 8),
            Expr::lit(1, 1),
        )
        .assign("data", Expr::mem_read("mem", Expr::net("addr", 2), 8));
    assert!(matches!(c.check().unwrap_err(), ElabError::ReadOnlyWrite { .. }));
}
