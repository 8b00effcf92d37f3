use thiserror::Error;

use crate::gate::Gate;
use crate::HashSet;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("combinational loop through {} net(s)", .nets.len())]
    CombinationalLoop { nets: Vec<usize> },
}

/// Computes the fixed evaluation order for a gate list: a topological sort of
/// the combinational graph (flip-flops break cycles by not appearing here).
/// Deterministic for a given input. A residual cycle is a hard error naming
/// exactly the nets inside the strongly-connected components, not the logic
/// downstream of them.
pub fn schedule(gates: &[Gate], net_count: usize) -> Result<Vec<usize>, SchedulerError> {
    // driver[net] = index of the gate driving it, if any.
    let mut driver = vec![usize::MAX; net_count];
    for (gi, gate) in gates.iter().enumerate() {
        driver[gate.output] = gi;
    }

    let mut indegree = vec![0usize; gates.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); gates.len()];
    for (gi, gate) in gates.iter().enumerate() {
        for &input in &gate.inputs {
            let d = driver[input];
            if d != usize::MAX {
                successors[d].push(gi);
                indegree[gi] += 1;
            }
        }
    }

    let mut queue: Vec<usize> = (0..gates.len()).filter(|&g| indegree[g] == 0).collect();
    let mut order = Vec::with_capacity(gates.len());
    let mut head = 0;
    while head < queue.len() {
        let g = queue[head];
        head += 1;
        order.push(g);
        for &next in &successors[g] {
            indegree[next] -= 1;
            if indegree[next] == 0 {
                queue.push(next);
            }
        }
    }

    if order.len() != gates.len() {
        return Err(SchedulerError::CombinationalLoop {
            nets: cyclic_nets(gates, &successors),
        });
    }
    Ok(order)
}

struct TarjanContext {
    index: usize,
    stack: Vec<usize>,
    on_stack: HashSet<usize>,
    indices: Vec<Option<usize>>,
    lowlink: Vec<Option<usize>>,
    sccs: Vec<Vec<usize>>,
}

fn strong_connect(u: usize, adj: &[Vec<usize>], ctx: &mut TarjanContext) {
    ctx.indices[u] = Some(ctx.index);
    ctx.lowlink[u] = Some(ctx.index);
    ctx.index += 1;
    ctx.stack.push(u);
    ctx.on_stack.insert(u);

    for &v in &adj[u] {
        if ctx.indices[v].is_none() {
            strong_connect(v, adj, ctx);
            ctx.lowlink[u] = Some(ctx.lowlink[u].unwrap().min(ctx.lowlink[v].unwrap()));
        } else if ctx.on_stack.contains(&v) {
            ctx.lowlink[u] = Some(ctx.lowlink[u].unwrap().min(ctx.indices[v].unwrap()));
        }
    }

    if ctx.lowlink[u] == ctx.indices[u] {
        let mut scc = Vec::new();
        while let Some(w) = ctx.stack.pop() {
            ctx.on_stack.remove(&w);
            scc.push(w);
            if w == u {
                break;
            }
        }
        ctx.sccs.push(scc);
    }
}

/// Tarjan SCC extraction over the gate graph. The cycle participants are the
/// gates inside a component of size greater than one, or with a self edge;
/// everything merely reachable from a loop stays out of the diagnostic.
fn cyclic_nets(gates: &[Gate], adj: &[Vec<usize>]) -> Vec<usize> {
    let mut ctx = TarjanContext {
        index: 0,
        stack: Vec::new(),
        on_stack: HashSet::default(),
        indices: vec![None; gates.len()],
        lowlink: vec![None; gates.len()],
        sccs: Vec::new(),
    };
    for g in 0..gates.len() {
        if ctx.indices[g].is_none() {
            strong_connect(g, adj, &mut ctx);
        }
    }

    let mut nets = Vec::new();
    for scc in &ctx.sccs {
        let cyclic = scc.len() > 1 || adj[scc[0]].contains(&scc[0]);
        if cyclic {
            nets.extend(scc.iter().map(|&g| gates[g].output));
        }
    }
    nets.sort_unstable();
    nets.dedup();
    nets
}
