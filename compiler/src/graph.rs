// graph.rs — Process call-graph resolution
//
// Validates one process's call graph and orders it for emission: every
// wavefunction number is unique, every mother reference resolves to a
// wavefunction of the same process, and nodes are placed in a topological
// order (every mother before its dependents).
//
// Preconditions: `process` comes from an upstream model (untrusted shape).
// Postconditions: returns a `ProcessGraph` whose `order` lists every node
//                 exactly once, mothers first, ties broken by declaration
//                 position (so an already ordered input is kept as is).
// Failure modes: duplicate numbers, unresolved mothers, cycles, vertices
//                without couplings, colour terms out of range, processes
//                without amplitudes → `MalformedGraph`.
// Side effects: none.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::diag::ConvertError;
use crate::model::{Node, NodeKey, Process};
use crate::signature::Mother;

// ── Public types ────────────────────────────────────────────────────────────

/// A node with its mothers resolved to (number, spin).
#[derive(Debug, Clone)]
pub struct ResolvedNode<'p> {
    pub process: &'p str,
    pub node: &'p Node,
    /// Mothers in declaration order.
    pub mothers: Vec<Mother>,
}

impl<'p> ResolvedNode<'p> {
    pub fn key(&self) -> NodeKey {
        self.node.key()
    }

    /// Human-readable location for error messages.
    pub fn site(&self) -> String {
        format!("{} in process '{}'", self.node.key(), self.process)
    }

    pub fn coupling_count(&self) -> usize {
        self.node.vertex().map_or(0, |v| v.couplings.len())
    }
}

/// A validated process graph in emission order.
#[derive(Debug)]
pub struct ProcessGraph<'p> {
    pub process: &'p Process,
    pub order: Vec<ResolvedNode<'p>>,
}

impl ProcessGraph<'_> {
    /// Size of the wavefunction array (largest number + 1).
    pub fn wavefunction_slots(&self) -> usize {
        self.order
            .iter()
            .filter_map(|n| match n.key() {
                NodeKey::Wavefunction(num) => Some(num as usize + 1),
                NodeKey::Amplitude(_) => None,
            })
            .max()
            .unwrap_or(1)
    }

    /// Size of the amplitude array (largest number + 1).
    pub fn amplitude_slots(&self) -> usize {
        self.order
            .iter()
            .filter_map(|n| match n.key() {
                NodeKey::Amplitude(num) => Some(num as usize + 1),
                NodeKey::Wavefunction(_) => None,
            })
            .max()
            .unwrap_or(1)
    }

    /// Complex components per wavefunction slot (widest spin present).
    pub fn wavefunction_width(&self) -> usize {
        self.order
            .iter()
            .filter_map(|n| n.node.spin())
            .map(|s| s.components())
            .max()
            .unwrap_or(1)
    }
}

// ── Public entry point ──────────────────────────────────────────────────────

pub fn resolve_process(process: &Process) -> Result<ProcessGraph<'_>, ConvertError> {
    let malformed = |key: NodeKey, reason: String| ConvertError::MalformedGraph {
        process: process.name.clone(),
        node: key.to_string(),
        reason,
    };

    // Index wavefunctions and amplitudes by number.
    let mut position: HashMap<NodeKey, usize> = HashMap::new();
    for (i, node) in process.nodes.iter().enumerate() {
        if position.insert(node.key(), i).is_some() {
            return Err(malformed(node.key(), "number is defined more than once".into()));
        }
    }
    if !process.nodes.iter().any(|n| matches!(n, Node::Amplitude(_))) {
        return Err(ConvertError::MalformedGraph {
            process: process.name.clone(),
            node: "<process>".into(),
            reason: "no amplitude node terminates the graph".into(),
        });
    }

    // Resolve mothers, check vertex payloads, build dependency edges.
    let mut resolved: Vec<Vec<Mother>> = Vec::with_capacity(process.nodes.len());
    let mut in_degree = vec![0usize; process.nodes.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); process.nodes.len()];

    for (i, node) in process.nodes.iter().enumerate() {
        let mut mothers = Vec::with_capacity(node.mothers().len());
        for &number in node.mothers() {
            let Some(&m) = position.get(&NodeKey::Wavefunction(number)) else {
                return Err(malformed(
                    node.key(),
                    format!("mother w[{number}] is not defined"),
                ));
            };
            // Wavefunction keys always map to nodes carrying a spin.
            let Some(spin) = process.nodes[m].spin() else {
                return Err(malformed(node.key(), format!("mother w[{number}] has no spin")));
            };
            mothers.push(Mother { number, spin });
            in_degree[i] += 1;
            dependents[m].push(i);
        }

        if let Some(vertex) = node.vertex() {
            if vertex.couplings.is_empty() {
                return Err(malformed(node.key(), "vertex has no coupling".into()));
            }
        }
        if let Node::Amplitude(amp) = node {
            for term in &amp.color {
                if term.jamp >= process.ncolor {
                    return Err(malformed(
                        node.key(),
                        format!(
                            "colour flow jamp[{}] out of range (ncolor = {})",
                            term.jamp, process.ncolor
                        ),
                    ));
                }
                if term.denominator == 0 {
                    return Err(malformed(node.key(), "colour factor has zero denominator".into()));
                }
            }
        }
        resolved.push(mothers);
    }

    // Kahn's algorithm; ready nodes leave in declaration order.
    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|&(_, &deg)| deg == 0)
        .map(|(i, _)| Reverse(i))
        .collect();
    let mut sequence = Vec::with_capacity(process.nodes.len());

    while let Some(Reverse(i)) = ready.pop() {
        sequence.push(i);
        for &next in &dependents[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push(Reverse(next));
            }
        }
    }

    if sequence.len() < process.nodes.len() {
        let stuck: Vec<String> = (0..process.nodes.len())
            .filter(|i| in_degree[*i] > 0)
            .map(|i| process.nodes[i].key().to_string())
            .collect();
        let first = process.nodes[in_degree.iter().position(|&d| d > 0).unwrap_or(0)].key();
        return Err(malformed(
            first,
            format!("cyclic dependency among {}", stuck.join(", ")),
        ));
    }

    let mut slots: Vec<Option<Vec<Mother>>> = resolved.into_iter().map(Some).collect();
    let order = sequence
        .into_iter()
        .map(|i| ResolvedNode {
            process: &process.name,
            node: &process.nodes[i],
            mothers: slots[i].take().unwrap_or_default(),
        })
        .collect();

    Ok(ProcessGraph { process, order })
}
