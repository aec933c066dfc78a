// model.rs — Upstream amplitude model as consumed by the converter
//
// The amplitude model (particles, couplings, Lorentz structures, the
// per-process call graph) is produced elsewhere and handed over as JSON.
// This module only describes its shape and resolves names against it.
//
// Preconditions: none.
// Postconditions: `Model::from_json` returns a structurally typed model; no
//                 graph validation happens here (see `graph`).
// Failure modes: unreadable file → `ModelLoad`; bad JSON → `ModelParse`.
// Side effects: `Model::load` reads one file.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diag::ConvertError;

/// Parameter name the upstream model uses for an exactly vanishing mass/width.
pub const ZERO: &str = "ZERO";

// ── Spin ────────────────────────────────────────────────────────────────────

/// Spin classification of a wavefunction. Fermions carry their flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpinClass {
    /// Outgoing fermion flow (barred spinor).
    FermionOut,
    /// Incoming fermion flow.
    FermionIn,
    Vector,
    Scalar,
    Tensor,
}

pub const ALL_SPINS: [SpinClass; 5] = [
    SpinClass::FermionOut,
    SpinClass::FermionIn,
    SpinClass::Vector,
    SpinClass::Scalar,
    SpinClass::Tensor,
];

impl SpinClass {
    /// Primary key of the canonical mother ordering.
    pub fn rank(self) -> u8 {
        match self {
            SpinClass::FermionOut => 0,
            SpinClass::FermionIn => 1,
            SpinClass::Vector => 2,
            SpinClass::Scalar => 3,
            SpinClass::Tensor => 4,
        }
    }

    /// Leg letter used in routine families and formal parameter names.
    pub fn letter(self) -> char {
        match self {
            SpinClass::FermionOut | SpinClass::FermionIn => 'F',
            SpinClass::Vector => 'V',
            SpinClass::Scalar => 'S',
            SpinClass::Tensor => 'T',
        }
    }

    /// Number of complex components in one wavefunction of this spin.
    pub fn components(self) -> usize {
        match self {
            SpinClass::Scalar => 3,
            SpinClass::FermionOut | SpinClass::FermionIn | SpinClass::Vector => 6,
            SpinClass::Tensor => 18,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SpinClass::FermionOut => "fermion-out",
            SpinClass::FermionIn => "fermion-in",
            SpinClass::Vector => "vector",
            SpinClass::Scalar => "scalar",
            SpinClass::Tensor => "tensor",
        }
    }
}

impl fmt::Display for SpinClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Model ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default)]
    pub couplings: Vec<Coupling>,
    #[serde(default)]
    pub lorentz: Vec<LorentzStructure>,
    #[serde(default)]
    pub processes: Vec<Process>,
}

/// A real model parameter (mass, width, input constant).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub value: f64,
}

/// A coupling constant with its target-language expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupling {
    pub name: String,
    pub expression: String,
}

/// A Lorentz structure and the routine bodies upstream computed for it,
/// one per off-shell leg (0 = amplitude).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LorentzStructure {
    pub name: String,
    #[serde(default)]
    pub routines: Vec<LorentzRoutine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LorentzRoutine {
    pub offshell: usize,
    pub body: String,
}

/// One process: its call graph and the number of colour flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Process {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "one")]
    pub ncolor: u32,
    pub nodes: Vec<Node>,
}

// ── Nodes ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    External(ExternalLeg),
    Internal(InternalWavefunction),
    Amplitude(AmplitudeNode),
}

/// An external leg: a leaf of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalLeg {
    pub number: u32,
    pub spin: SpinClass,
    pub leg: u32,
    #[serde(default = "zero_name")]
    pub mass: String,
    /// Particle/antiparticle or initial/final sign passed to the routine.
    pub sign: i32,
}

/// A wavefunction produced by a vertex from its mothers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalWavefunction {
    pub number: u32,
    pub spin: SpinClass,
    pub mothers: Vec<u32>,
    #[serde(flatten)]
    pub vertex: Vertex,
    #[serde(default = "zero_name")]
    pub mass: String,
    #[serde(default = "zero_name")]
    pub width: String,
}

/// An amplitude closing a diagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmplitudeNode {
    pub number: u32,
    pub mothers: Vec<u32>,
    #[serde(flatten)]
    pub vertex: Vertex,
    #[serde(default)]
    pub color: Vec<ColorTerm>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vertex {
    pub lorentz: String,
    /// Coupling names; a leading `-` negates the coupling.
    pub couplings: Vec<String>,
}

/// Contribution `±[i]·(num/den)·amp` to one colour flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorTerm {
    pub jamp: u32,
    #[serde(default)]
    pub negative: bool,
    #[serde(default)]
    pub imaginary: bool,
    #[serde(default = "one")]
    pub numerator: u32,
    #[serde(default = "one")]
    pub denominator: u32,
}

fn one() -> u32 {
    1
}

fn zero_name() -> String {
    ZERO.to_string()
}

/// Identity of a node inside one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NodeKey {
    Wavefunction(u32),
    Amplitude(u32),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Wavefunction(n) => write!(f, "w[{n}]"),
            NodeKey::Amplitude(n) => write!(f, "amp[{n}]"),
        }
    }
}

impl Node {
    pub fn key(&self) -> NodeKey {
        match self {
            Node::External(e) => NodeKey::Wavefunction(e.number),
            Node::Internal(w) => NodeKey::Wavefunction(w.number),
            Node::Amplitude(a) => NodeKey::Amplitude(a.number),
        }
    }

    /// Mother numbers in declaration order.
    pub fn mothers(&self) -> &[u32] {
        match self {
            Node::External(_) => &[],
            Node::Internal(w) => &w.mothers,
            Node::Amplitude(a) => &a.mothers,
        }
    }

    /// Own spin; `None` for amplitudes.
    pub fn spin(&self) -> Option<SpinClass> {
        match self {
            Node::External(e) => Some(e.spin),
            Node::Internal(w) => Some(w.spin),
            Node::Amplitude(_) => None,
        }
    }

    pub fn vertex(&self) -> Option<&Vertex> {
        match self {
            Node::External(_) => None,
            Node::Internal(w) => Some(&w.vertex),
            Node::Amplitude(a) => Some(&a.vertex),
        }
    }
}

// ── Loading and lookup ──────────────────────────────────────────────────────

impl Model {
    pub fn from_json(source: &str) -> Result<Model, ConvertError> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn load(path: &Path) -> Result<(Model, String), ConvertError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConvertError::ModelLoad {
            path: path.to_path_buf(),
            source: e,
        })?;
        let model = Model::from_json(&source)?;
        Ok((model, source))
    }

    /// Model name usable in file names and include guards.
    pub fn sanitized_name(&self) -> String {
        sanitize(&self.name)
    }

    pub fn lorentz_structure(&self, name: &str) -> Option<&LorentzStructure> {
        self.lorentz.iter().find(|l| l.name == name)
    }
}

impl LorentzStructure {
    pub fn routine(&self, offshell: usize) -> Option<&LorentzRoutine> {
        self.routines.iter().find(|r| r.offshell == offshell)
    }
}

pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Split a coupling reference into (negated, bare name).
pub fn split_coupling_sign(reference: &str) -> (bool, &str) {
    match reference.strip_prefix('-') {
        Some(bare) => (true, bare),
        None => (false, reference),
    }
}

// ── Symbols ─────────────────────────────────────────────────────────────────

/// Name resolution for call binding: coupling slots and parameter names.
///
/// Coupling slots are assigned to couplings referenced by any process, in the
/// order the model declares them, so slot numbers are stable across runs.
#[derive(Debug, Clone, Default)]
pub struct ModelSymbols {
    slots: HashMap<String, usize>,
    referenced: Vec<Coupling>,
    parameters: HashMap<String, f64>,
}

impl ModelSymbols {
    pub fn collect(model: &Model) -> ModelSymbols {
        let mut used: HashSet<&str> = HashSet::new();
        for process in &model.processes {
            for node in &process.nodes {
                if let Some(vertex) = node.vertex() {
                    for reference in &vertex.couplings {
                        used.insert(split_coupling_sign(reference).1);
                    }
                }
            }
        }

        let mut symbols = ModelSymbols::default();
        for coupling in &model.couplings {
            if used.contains(coupling.name.as_str()) && !symbols.slots.contains_key(&coupling.name) {
                symbols
                    .slots
                    .insert(coupling.name.clone(), symbols.referenced.len());
                symbols.referenced.push(coupling.clone());
            }
        }
        for p in &model.parameters {
            symbols.parameters.insert(p.name.clone(), p.value);
        }
        symbols
    }

    pub fn coupling_slot(&self, name: &str) -> Option<usize> {
        self.slots.get(name).copied()
    }

    /// Referenced couplings in slot order.
    pub fn referenced_couplings(&self) -> &[Coupling] {
        &self.referenced
    }

    /// Target-language operand for a mass/width parameter.
    pub fn parameter_operand(&self, name: &str) -> Option<String> {
        if name == ZERO {
            Some("0.".to_string())
        } else if self.parameters.contains_key(name) {
            Some(name.to_string())
        } else {
            None
        }
    }
}
