use crate::gate::{Dff, GateKind};
use crate::ir::MemoryDecl;
use crate::lower::{LowerError, Lowerer};
use crate::HashSet;

/// One stored bit of a RAM: the flop's Q net plus whether the cell is stored
/// inverted (used when the declared initial contents have that bit set, since
/// flops come up as zero).
#[derive(Debug, Clone, Copy)]
pub(crate) struct FlopCell {
    pub q: usize,
    pub inverted: bool,
}

/// The lowered storage of one memory: per-address readable net groups, plus
/// the backing flop cells for writable memories. ROMs are constants only.
#[derive(Debug, Clone)]
pub(crate) struct MemCells {
    pub width: usize,
    pub words: Vec<Vec<usize>>,
    pub flops: Option<Vec<Vec<FlopCell>>>,
}

/// Allocates `depth * width` storage bits (or constants for a ROM).
pub(crate) fn build_cells(lw: &mut Lowerer<'_>, mem: &MemoryDecl) -> MemCells {
    if mem.read_only {
        let words = (0..mem.depth)
            .map(|a| {
                let value = mem.init.get(a).copied().unwrap_or(0);
                lw.const_word(value, mem.width)
            })
            .collect();
        return MemCells { width: mem.width, words, flops: None };
    }

    let mut words = Vec::with_capacity(mem.depth);
    let mut flops = Vec::with_capacity(mem.depth);
    for a in 0..mem.depth {
        let init = mem.init.get(a).copied().unwrap_or(0);
        let mut word = Vec::with_capacity(mem.width);
        let mut cells = Vec::with_capacity(mem.width);
        for bit in 0..mem.width {
            if (init >> bit) & 1 == 0 {
                let q = lw.alloc1();
                word.push(q);
                cells.push(FlopCell { q, inverted: false });
            } else {
                let q = lw.alloc1();
                let visible = lw.emit(GateKind::Not, vec![q]);
                word.push(visible);
                cells.push(FlopCell { q, inverted: true });
            }
        }
        words.push(word);
        flops.push(cells);
    }
    MemCells { width: mem.width, words, flops: Some(flops) }
}

/// Write ports: an address decoder (AND of compare-against-constant bit
/// patterns) gates each cell's flop enable; the D side muxes the port data
/// over the current value, first declared port winning ties.
pub(crate) fn lower_write_ports(lw: &mut Lowerer<'_>, mem: &MemoryDecl) -> Result<(), LowerError> {
    if mem.writes.is_empty() {
        return Ok(());
    }
    let cells = lw.mem(&mem.name)?;
    let flops = match &cells.flops {
        Some(f) => f.clone(),
        None => return Err(LowerError::ReadOnlyWrite { name: mem.name.clone() }),
    };

    struct PortNets {
        addr: Vec<usize>,
        data: Vec<usize>,
        enable: usize,
        clock: usize,
    }
    let mut ports = Vec::with_capacity(mem.writes.len());
    for wp in &mem.writes {
        if wp.enable.width() != 1 {
            return Err(LowerError::MultiBitEnable {
                context: mem.name.clone(),
                width: wp.enable.width(),
            });
        }
        let addr = lw.lower_expr(&wp.addr)?;
        let data = lw.lower_expr(&wp.data)?;
        let data = lw.fit(data, mem.width);
        let enable = lw.lower_expr(&wp.enable)?[0];
        let clock_group = lw.group(&wp.clock)?;
        if clock_group.len() != 1 {
            return Err(LowerError::WidthError {
                context: wp.clock.clone(),
                expected: 1,
                found: clock_group.len(),
            });
        }
        ports.push(PortNets { addr, data, enable, clock: clock_group[0] });
    }

    for (a, cell_row) in flops.iter().enumerate() {
        let mut decodes = Vec::with_capacity(ports.len());
        for p in &ports {
            let hit = lw.eq_const(&p.addr, a as u64);
            decodes.push(lw.emit(GateKind::And, vec![hit, p.enable]));
        }
        let write_any = lw.reduce(GateKind::Or, &decodes);

        for (bit, cell) in cell_row.iter().enumerate() {
            let current = cells.words[a][bit];
            let mut d = current;
            for (p, &decode) in ports.iter().zip(decodes.iter()).rev() {
                d = lw.emit(GateKind::Mux, vec![d, p.data[bit], decode]);
            }
            let d = if cell.inverted { lw.emit(GateKind::Not, vec![d]) } else { d };
            lw.push_dff(Dff {
                d,
                q: cell.q,
                clock: ports[0].clock,
                reset: None,
                enable: Some(write_any),
                async_reset: false,
            });
        }
    }
    Ok(())
}

/// Asynchronous read: an address-indexed multiplexer tree over the cell
/// words. Unreachable or missing addresses read as zero.
pub(crate) fn lower_async_read(
    lw: &mut Lowerer<'_>,
    memory: &str,
    addr: &[usize],
) -> Result<Vec<usize>, LowerError> {
    let cells = lw.mem(memory)?;
    Ok(mux_tree(lw, &cells.words, addr, cells.width))
}

fn mux_tree(lw: &mut Lowerer<'_>, words: &[Vec<usize>], addr: &[usize], width: usize) -> Vec<usize> {
    if words.is_empty() {
        return lw.const_word(0, width);
    }
    if addr.is_empty() {
        return words[0].clone();
    }
    let (top, rest) = addr.split_last().unwrap();
    let half = 1usize << rest.len();
    let lo = mux_tree(lw, &words[..words.len().min(half)], rest, width);
    let hi = if words.len() > half {
        mux_tree(lw, &words[half..], rest, width)
    } else {
        lw.const_word(0, width)
    };
    lw.mux_word(&lo, &hi, *top)
}

/// Synchronous read: the same multiplexer tree with a pipeline register on
/// the data output.
pub(crate) fn lower_sync_reads(
    lw: &mut Lowerer<'_>,
    mem: &MemoryDecl,
    reg_driven: &mut HashSet<String>,
) -> Result<(), LowerError> {
    for rp in &mem.sync_reads {
        let clock_group = lw.group(&rp.clock)?;
        if clock_group.len() != 1 {
            return Err(LowerError::WidthError {
                context: rp.clock.clone(),
                expected: 1,
                found: clock_group.len(),
            });
        }
        let clock = clock_group[0];
        let addr = lw.lower_expr(&rp.addr)?;
        let data = lower_async_read(lw, &mem.name, &addr)?;
        let target = lw.group(&rp.target)?;
        if target.len() != mem.width {
            return Err(LowerError::WidthError {
                context: rp.target.clone(),
                expected: mem.width,
                found: target.len(),
            });
        }
        if !reg_driven.insert(rp.target.clone()) {
            return Err(LowerError::MultipleDriver { net: rp.target.clone() });
        }
        for (d, q) in data.into_iter().zip(target) {
            lw.push_dff(Dff { d, q, clock, reset: None, enable: None, async_reset: false });
        }
    }
    Ok(())
}
