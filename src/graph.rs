//! Connection-graph analysis: strongly connected components and execution
//! ordering.
//!
//! The per-group child graph is condensed with Tarjan's algorithm at setup
//! time; traversal during solves never re-detects cycles. Ordering is fully
//! deterministic: ties are broken by child insertion order so repeated runs
//! of the same configuration execute identically.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

/// Strongly connected components of a directed graph over `0..n`.
///
/// Iterative Tarjan; components are emitted in reverse topological order
/// with members sorted ascending.
pub(crate) fn tarjan_scc(n: usize, adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    #[derive(Clone, Copy)]
    struct NodeState {
        index: usize,
        lowlink: usize,
        on_stack: bool,
        visited: bool,
    }

    let mut state = vec![
        NodeState {
            index: 0,
            lowlink: 0,
            on_stack: false,
            visited: false,
        };
        n
    ];
    let mut stack: Vec<usize> = Vec::new();
    let mut sccs: Vec<Vec<usize>> = Vec::new();
    let mut counter = 0usize;

    // Explicit DFS stack: (node, next-neighbor cursor)
    let mut work: Vec<(usize, usize)> = Vec::new();

    for root in 0..n {
        if state[root].visited {
            continue;
        }
        work.push((root, 0));
        while let Some(&(v, cursor)) = work.last() {
            if cursor == 0 && !state[v].visited {
                state[v].visited = true;
                state[v].index = counter;
                state[v].lowlink = counter;
                counter += 1;
                stack.push(v);
                state[v].on_stack = true;
            }

            if cursor < adj[v].len() {
                let w = adj[v][cursor];
                work.last_mut().expect("work is nonempty").1 += 1;
                if !state[w].visited {
                    work.push((w, 0));
                } else if state[w].on_stack {
                    state[v].lowlink = state[v].lowlink.min(state[w].index);
                }
            } else {
                work.pop();
                if let Some(&(parent, _)) = work.last() {
                    let low = state[v].lowlink;
                    state[parent].lowlink = state[parent].lowlink.min(low);
                }
                if state[v].lowlink == state[v].index {
                    let mut component = Vec::new();
                    loop {
                        let w = stack.pop().expect("tarjan stack underflow");
                        state[w].on_stack = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    sccs.push(component);
                }
            }
        }
    }

    sccs
}

/// Topologically ordered strongly connected components.
///
/// Components are ordered so every edge points forward; among ready
/// components the one containing the smallest node index (earliest
/// insertion) runs first. Members inside a component keep ascending order.
pub(crate) fn execution_order(n: usize, adj: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let sccs = tarjan_scc(n, adj);
    let mut scc_of = vec![0usize; n];
    for (k, scc) in sccs.iter().enumerate() {
        for &v in scc {
            scc_of[v] = k;
        }
    }

    // Condensation edges and in-degrees
    let m = sccs.len();
    let mut out: Vec<Vec<usize>> = vec![Vec::new(); m];
    let mut indeg = vec![0usize; m];
    for v in 0..n {
        for &w in &adj[v] {
            let (a, b) = (scc_of[v], scc_of[w]);
            if a != b && !out[a].contains(&b) {
                out[a].push(b);
                indeg[b] += 1;
            }
        }
    }

    // Kahn's algorithm, ready set keyed by smallest member for determinism
    let mut ready: BinaryHeap<Reverse<(usize, usize)>> = BinaryHeap::new();
    for k in 0..m {
        if indeg[k] == 0 {
            ready.push(Reverse((sccs[k][0], k)));
        }
    }

    let mut order = Vec::with_capacity(m);
    while let Some(Reverse((_, k))) = ready.pop() {
        order.push(sccs[k].clone());
        for &next in &out[k] {
            indeg[next] -= 1;
            if indeg[next] == 0 {
                ready.push(Reverse((sccs[next][0], next)));
            }
        }
    }

    debug_assert_eq!(order.len(), m, "condensation must be acyclic");
    order
}

/// Whether node `v` has an edge to itself.
pub(crate) fn has_self_loop(adj: &[Vec<usize>], v: usize) -> bool {
    adj[v].contains(&v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_is_singletons_in_order() {
        // 0 -> 1 -> 2
        let adj = vec![vec![1], vec![2], vec![]];
        let order = execution_order(3, &adj);
        assert_eq!(order, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn two_cycle_is_one_component() {
        // 0 <-> 1, 1 -> 2
        let adj = vec![vec![1], vec![0, 2], vec![]];
        let order = execution_order(3, &adj);
        assert_eq!(order, vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn nested_cycles_and_tail() {
        // (0 <-> 1) -> (2 <-> 3) -> 4
        let adj = vec![vec![1], vec![0, 2], vec![3], vec![2, 4], vec![]];
        let order = execution_order(5, &adj);
        assert_eq!(order, vec![vec![0, 1], vec![2, 3], vec![4]]);
    }

    #[test]
    fn independent_nodes_run_in_insertion_order() {
        let adj = vec![vec![], vec![], vec![]];
        let order = execution_order(3, &adj);
        assert_eq!(order, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn self_loop_detected() {
        let adj = vec![vec![0], vec![]];
        assert!(has_self_loop(&adj, 0));
        assert!(!has_self_loop(&adj, 1));
        // A self-loop is still a singleton component
        let order = execution_order(2, &adj);
        assert_eq!(order, vec![vec![0], vec![1]]);
    }

    #[test]
    fn deep_graph_does_not_overflow_stack() {
        // Long chain exercises the iterative DFS
        let n = 100_000;
        let adj: Vec<Vec<usize>> = (0..n).map(|i| if i + 1 < n { vec![i + 1] } else { vec![] }).collect();
        let sccs = tarjan_scc(n, &adj);
        assert_eq!(sccs.len(), n);
    }
}
