//! Analytical metrics for judging what a pass did to a module.
//!
//! A small set quantified by printed IR size, control-flow complexity and
//! dominator overlap, folded into a Wroblewski-style potency score. The
//! pipeline collects metrics before and after each pass and logs the delta;
//! a transform that grows complexity without bloating the output scores
//! positive.

use chakravyuha_core::{BlockId, Function, Module};
use petgraph::algo::dominators::simple_fast;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Reversed;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Module-level complexity snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Size of the printed IR in bytes.
    pub byte_len: usize,
    /// Number of basic blocks across all function bodies.
    pub block_cnt: usize,
    /// Number of CFG edges across all function bodies.
    pub edge_cnt: usize,
    /// Fraction of blocks whose immediate dominator and post-dominator
    /// coincide, averaged over multi-block functions. Near 1.0 means linear
    /// control flow.
    pub dom_overlap: f64,
    /// Composite potency score (higher reads as harder to analyse).
    pub potency: f64,
}

/// Collect metrics over every function body in the module.
pub fn collect_metrics(module: &Module) -> Metrics {
    let mut block_cnt = 0usize;
    let mut edge_cnt = 0usize;
    let mut overlap_sum = 0.0f64;
    let mut overlap_fns = 0usize;

    for f in module.functions.iter().filter(|f| !f.is_declaration) {
        block_cnt += f.block_count();
        edge_cnt += f
            .block_ids()
            .iter()
            .map(|&id| f.successors(id).len())
            .sum::<usize>();
        if f.block_count() >= 2 {
            overlap_sum += function_dom_overlap(f);
            overlap_fns += 1;
        }
    }

    let dom_overlap = if overlap_fns > 0 {
        overlap_sum / overlap_fns as f64
    } else {
        1.0
    };

    Metrics {
        byte_len: module.ir_size() as usize,
        block_cnt,
        edge_cnt,
        dom_overlap,
        potency: score(dom_overlap, block_cnt, edge_cnt),
    }
}

/// Fraction of a function's blocks that are pinch points: their immediate
/// dominator and post-dominator are the same node.
fn function_dom_overlap(f: &Function) -> f64 {
    let mut graph: DiGraph<(), ()> = DiGraph::new();
    let mut nodes: HashMap<BlockId, NodeIndex> = HashMap::new();
    for id in f.block_ids() {
        nodes.insert(id, graph.add_node(()));
    }
    // Virtual exit so multi-return functions have a post-dominator root.
    let exit = graph.add_node(());
    for id in f.block_ids() {
        let succs = f.successors(id);
        if succs.is_empty() {
            graph.add_edge(nodes[&id], exit, ());
        }
        for succ in succs {
            graph.add_edge(nodes[&id], nodes[&succ], ());
        }
    }

    let entry = nodes[&f.entry()];
    let doms = simple_fast(&graph, entry);
    let post = simple_fast(Reversed(&graph), exit);

    let mut common = 0usize;
    let mut counted = 0usize;
    for (_, &node) in nodes.iter() {
        let (Some(idom), Some(ipdom)) =
            (doms.immediate_dominator(node), post.immediate_dominator(node))
        else {
            continue;
        };
        counted += 1;
        if idom == ipdom {
            common += 1;
        }
    }
    if counted == 0 {
        1.0
    } else {
        common as f64 / counted as f64
    }
}

/// Potency heuristic: complexity from blocks and edges, discounted by how
/// linear the dominator structure stayed.
fn score(overlap: f64, blocks: usize, edges: usize) -> f64 {
    5.0 * (blocks.max(1) as f64).log2() + edges as f64 + 30.0 * (1.0 - overlap)
}

/// Net effect of a transform: potency gained minus a charge for output
/// growth. Positive is a win.
pub fn compare(before: &Metrics, after: &Metrics) -> f64 {
    after.potency - before.potency - 0.25 * (after.byte_len as f64 - before.byte_len as f64) / 64.0
}
