//! Decides which functions a pass may touch.
//!
//! Inline assembly and non-local jumps make a function untransformable, and
//! that taint spreads to every caller through the call graph: a function that
//! can reach `longjmp` may unwind through frames whose layout the passes
//! would otherwise be free to rearrange.

use chakravyuha_core::{Callee, Function, Inst, Module, Terminator};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, Reversed};
use std::collections::{HashMap, HashSet};
use tracing::debug;

const NON_LOCAL_JUMPS: [&str; 3] = ["setjmp", "_setjmp", "longjmp"];

/// Per-module safety verdicts. Pure: built once, then only queried.
pub struct SafetyOracle {
    unsafe_fns: HashSet<String>,
}

impl SafetyOracle {
    /// Scan the module and close the unsafe set over the call graph.
    pub fn for_module(module: &Module) -> Self {
        let mut graph: DiGraph<&str, ()> = DiGraph::new();
        let mut nodes: HashMap<&str, NodeIndex> = HashMap::new();
        for f in &module.functions {
            nodes.insert(f.name.as_str(), graph.add_node(f.name.as_str()));
        }

        let mut seeds: Vec<NodeIndex> = Vec::new();
        for f in &module.functions {
            let caller = nodes[f.name.as_str()];
            let mut directly_unsafe = false;
            for id in f.block_ids() {
                for inst in &f.block(id).insts {
                    if let Inst::Call { callee, .. } = inst {
                        match callee {
                            Callee::Asm(_) => directly_unsafe = true,
                            Callee::Direct(name) => {
                                if NON_LOCAL_JUMPS.contains(&name.as_str()) {
                                    directly_unsafe = true;
                                } else if let Some(&callee_node) = nodes.get(name.as_str()) {
                                    graph.add_edge(caller, callee_node, ());
                                }
                            }
                            Callee::Indirect(_) => {}
                        }
                    }
                }
            }
            if directly_unsafe {
                seeds.push(caller);
            }
        }

        // Callers of an unsafe function become unsafe: walk call edges
        // backwards from every seed until the set stops growing.
        let mut unsafe_fns = HashSet::new();
        let callers = Reversed(&graph);
        for seed in seeds {
            let mut bfs = Bfs::new(callers, seed);
            while let Some(node) = bfs.next(callers) {
                unsafe_fns.insert(graph[node].to_string());
            }
        }

        if !unsafe_fns.is_empty() {
            debug!("oracle marked {} function(s) unsafe", unsafe_fns.len());
        }
        Self { unsafe_fns }
    }

    /// Whether the named function (or anything it can reach) uses inline
    /// assembly or non-local jumps.
    pub fn is_unsafe(&self, name: &str) -> bool {
        self.unsafe_fns.contains(name)
    }

    /// Whether a pass may rewrite this function at all.
    pub fn may_transform(&self, f: &Function) -> bool {
        !f.is_declaration && !f.is_intrinsic && !self.is_unsafe(&f.name)
    }
}

/// True when the function contains a terminator or block the control-flow
/// passes cannot model: EH pads, invokes, indirect branches.
pub fn has_unsupported_control_flow(f: &Function) -> bool {
    f.block_ids().iter().any(|&id| {
        let block = f.block(id);
        block.is_eh_pad
            || matches!(block.term, Some(Terminator::Unsupported { .. }))
            || block.term.is_none()
    })
}
