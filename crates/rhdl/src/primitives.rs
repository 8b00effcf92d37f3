use crate::component::Component;
use crate::expr::{clog2, Expr};
use crate::ir::ProcessDecl;

/// Width-parameterized register with synchronous reset and enable:
/// `q' = rst ? 0 : en ? d : q`.
pub fn register(width: usize) -> Component {
    let mut c = Component::new("register");
    c.parameter("WIDTH", width as u64);
    c.port_input("clk", 1)
        .port_input("rst", 1)
        .port_input_default("en", 1, 1)
        .port_input("d", width)
        .port_output("q", width)
        .reg("r", width, 0)
        .sequential(
            ProcessDecl::on("clk")
                .with_reset("rst", false)
                .reset_value("r", 0)
                .update(
                    "r",
                    Expr::mux(Expr::net("en", 1), Expr::net("d", width), Expr::net("r", width)),
                ),
        )
        .assign("q", Expr::net("r", width));
    c
}

/// Free-running up-counter with synchronous reset and enable.
pub fn counter(width: usize) -> Component {
    let mut c = Component::new("counter");
    c.parameter("WIDTH", width as u64);
    c.port_input("clk", 1)
        .port_input("rst", 1)
        .port_input_default("en", 1, 1)
        .port_output("q", width)
        .reg("r", width, 0)
        .sequential(
            ProcessDecl::on("clk")
                .with_reset("rst", false)
                .reset_value("r", 0)
                .update(
                    "r",
                    Expr::mux(
                        Expr::net("en", 1),
                        Expr::net("r", width).add(Expr::lit(1, width)).slice(width - 1, 0),
                        Expr::net("r", width),
                    ),
                ),
        )
        .assign("q", Expr::net("r", width));
    c
}

/// Single-port RAM: synchronous write, asynchronous read.
pub fn ram(depth: usize, width: usize) -> Component {
    let aw = clog2(depth as u64).max(1);
    let mut c = Component::new("ram");
    c.parameter("DEPTH", depth as u64);
    c.parameter("WIDTH", width as u64);
    c.port_input("clk", 1)
        .port_input("we", 1)
        .port_input("waddr", aw)
        .port_input("wdata", width)
        .port_input("raddr", aw)
        .port_output("rdata", width)
        .memory("mem", depth, width)
        .sync_write(
            "mem",
            "clk",
            Expr::net("waddr", aw),
            Expr::net("wdata", width),
            Expr::net("we", 1),
        )
        .assign("rdata", Expr::mem_read("mem", Expr::net("raddr", aw), width));
    c
}

/// Single-port RAM with a registered (synchronous) read: `rdata` lags the
/// read address by one clock.
pub fn ram_sync(depth: usize, width: usize) -> Component {
    let aw = clog2(depth as u64).max(1);
    let mut c = Component::new("ram_sync");
    c.parameter("DEPTH", depth as u64);
    c.parameter("WIDTH", width as u64);
    c.port_input("clk", 1)
        .port_input("we", 1)
        .port_input("waddr", aw)
        .port_input("wdata", width)
        .port_input("raddr", aw)
        .port_output("rdata", width)
        .reg("rq", width, 0)
        .memory("mem", depth, width)
        .sync_write(
            "mem",
            "clk",
            Expr::net("waddr", aw),
            Expr::net("wdata", width),
            Expr::net("we", 1),
        )
        .sync_read("mem", "clk", "rq", Expr::net("raddr", aw))
        .assign("rdata", Expr::net("rq", width));
    c
}

/// Read-only memory with constant contents and an asynchronous read port.
pub fn rom(width: usize, contents: Vec<u64>) -> Component {
    let depth = contents.len().max(1);
    let aw = clog2(depth as u64).max(1);
    let mut c = Component::new("rom");
    c.port_input("addr", aw)
        .port_output("data", width)
        .memory_init("mem", depth, width, contents, true)
        .assign("data", Expr::mem_read("mem", Expr::net("addr", aw), width));
    c
}

/// Register file: one synchronous write port, two asynchronous read ports.
pub fn register_file(count: usize, width: usize) -> Component {
    let aw = clog2(count as u64).max(1);
    let mut c = Component::new("register_file");
    c.parameter("COUNT", count as u64);
    c.parameter("WIDTH", width as u64);
    c.port_input("clk", 1)
        .port_input("we", 1)
        .port_input("waddr", aw)
        .port_input("wdata", width)
        .port_input("raddr_a", aw)
        .port_input("raddr_b", aw)
        .port_output("rdata_a", width)
        .port_output("rdata_b", width)
        .memory("regs", count, width)
        .sync_write(
            "regs",
            "clk",
            Expr::net("waddr", aw),
            Expr::net("wdata", width),
            Expr::net("we", 1),
        )
        .assign("rdata_a", Expr::mem_read("regs", Expr::net("raddr_a", aw), width))
        .assign("rdata_b", Expr::mem_read("regs", Expr::net("raddr_b", aw), width));
    c
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cycle(c: &mut Component) {
        c.set_input("clk", 0).unwrap();
        c.propagate().unwrap();
        c.set_input("clk", 1).unwrap();
        c.propagate().unwrap();
    }

    #[test]
    fn register_sequence() {
        let mut c = register(8);
        c.check().unwrap();
        let steps: [(u64, u64, u64, u64); 4] = [
            (0, 1, 0x42, 0x42),
            (0, 1, 0x7f, 0x7f),
            (1, 1, 0xaa, 0x00),
            (0, 0, 0x11, 0x00),
        ];
        assert_eq!(c.get_output("q").unwrap(), 0);
        for (rst, en, d, expect) in steps {
            c.set_input("rst", rst).unwrap();
            c.set_input("en", en).unwrap();
            c.set_input("d", d).unwrap();
            cycle(&mut c);
            assert_eq!(c.get_output("q").unwrap(), expect);
        }
    }

    #[test]
    fn counter_counts_and_holds() {
        let mut c = counter(4);
        c.check().unwrap();
        c.set_input("rst", 0).unwrap();
        for expect in 1..=3 {
            cycle(&mut c);
            assert_eq!(c.get_output("q").unwrap(), expect);
        }
        c.set_input("en", 0).unwrap();
        cycle(&mut c);
        assert_eq!(c.get_output("q").unwrap(), 3);
        c.set_input("en", 1).unwrap();
        c.set_input("rst", 1).unwrap();
        cycle(&mut c);
        assert_eq!(c.get_output("q").unwrap(), 0);
    }

    #[test]
    fn ram_write_readback() {
        let mut c = ram(256, 8);
        c.check().unwrap();
        for addr in 0..16u64 {
            c.set_input("we", 1).unwrap();
            c.set_input("waddr", addr).unwrap();
            c.set_input("wdata", addr * 3).unwrap();
            cycle(&mut c);
        }
        c.set_input("we", 0).unwrap();
        for addr in 0..16u64 {
            c.set_input("raddr", addr).unwrap();
            c.propagate().unwrap();
            assert_eq!(c.get_output("rdata").unwrap(), (addr * 3) & 0xff);
        }
    }

    #[test]
    fn ram_sync_read_lags_one_cycle() {
        let mut c = ram_sync(16, 8);
        c.check().unwrap();
        c.set_input("we", 1).unwrap();
        c.set_input("waddr", 3).unwrap();
        c.set_input("wdata", 0x5a).unwrap();
        cycle(&mut c);
        c.set_input("we", 0).unwrap();
        c.set_input("raddr", 3).unwrap();
        // The registered read returns the value only after the next edge.
        c.propagate().unwrap();
        assert_eq!(c.get_output("rdata").unwrap(), 0);
        cycle(&mut c);
        assert_eq!(c.get_output("rdata").unwrap(), 0x5a);
    }

    #[test]
    fn rom_reads_contents() {
        let mut c = rom(8, vec![0xde, 0xad, 0xbe, 0xef]);
        c.check().unwrap();
        for (addr, expect) in [(0u64, 0xde), (1, 0xad), (2, 0xbe), (3, 0xef)] {
            c.set_input("addr", addr).unwrap();
            c.propagate().unwrap();
            assert_eq!(c.get_output("data").unwrap(), expect);
        }
    }

    #[test]
    fn register_file_dual_read() {
        let mut c = register_file(8, 16);
        c.check().unwrap();
        c.set_input("we", 1).unwrap();
        c.set_input("waddr", 2).unwrap();
        c.set_input("wdata", 0x1234).unwrap();
        cycle(&mut c);
        c.set_input("waddr", 5).unwrap();
        c.set_input("wdata", 0x5678).unwrap();
        cycle(&mut c);
        c.set_input("we", 0).unwrap();
        c.set_input("raddr_a", 2).unwrap();
        c.set_input("raddr_b", 5).unwrap();
        c.propagate().unwrap();
        assert_eq!(c.get_output("rdata_a").unwrap(), 0x1234);
        assert_eq!(c.get_output("rdata_b").unwrap(), 0x5678);
    }
}
