// synth.rs — Call-template synthesis with a per-target signature cache
//
// For every node the converter needs the exact call text for its target.
// The text depends only on the node's call signature, so it is derived once
// per signature and reused; node-specific operands (wavefunction numbers,
// coupling slots, masses) are bound into the template afterwards.
//
// Preconditions: nodes come from `graph::resolve_process` (mothers resolved).
// Postconditions: equal signatures yield the same `Rc<CallTemplate>`; the
//                 type table is consulted only on cache misses.
// Failure modes: no catalog shape → `UnsupportedShape`; coupling count differs
//                from the cached shape → `CacheInconsistency`; two signatures
//                naming one routine with different prototypes →
//                `RoutineConflict`; unknown
//                coupling/parameter at bind time → `UnknownReference`.
// Side effects: grows the cache.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::diag::ConvertError;
use crate::dialect::{ArgumentRole, ComplexPart, CouplingRepr, NumericKind, TypeTable};
use crate::graph::ResolvedNode;
use crate::model::{split_coupling_sign, ModelSymbols, Node, NodeKey, SpinClass};
use crate::scaffold::{substitute, Placeholders};
use crate::signature::{canonical_mothers, lookup_shape, CallShape, CallSignature};

// ── Public types ────────────────────────────────────────────────────────────

/// Target call text for one signature, with `%(name)s` operand slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTemplate {
    pub signature: CallSignature,
    pub shape: CallShape,
    /// Routine invoked by the call.
    pub routine: String,
    /// One statement; operands are left as slots.
    pub call: String,
    /// Formal parameter list of the routine definition.
    pub formals: Vec<String>,
    /// Routine prototype; `None` for external-leg routines, which the
    /// support library provides.
    pub declaration: Option<String>,
    /// Statements prepended to the routine body.
    pub preamble: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SynthStats {
    pub hits: usize,
    pub misses: usize,
}

pub struct Synthesizer<'t> {
    table: &'t dyn TypeTable,
    cache: HashMap<CallSignature, Rc<CallTemplate>>,
    /// First template derived for each routine name.
    routines: HashMap<String, Rc<CallTemplate>>,
    stats: SynthStats,
}

// ── Synthesis ───────────────────────────────────────────────────────────────

impl<'t> Synthesizer<'t> {
    pub fn new(table: &'t dyn TypeTable) -> Self {
        Synthesizer {
            table,
            cache: HashMap::new(),
            routines: HashMap::new(),
            stats: SynthStats::default(),
        }
    }

    pub fn stats(&self) -> SynthStats {
        self.stats
    }

    /// Number of distinct signatures synthesized so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    pub fn signature_of(node: &ResolvedNode<'_>) -> CallSignature {
        CallSignature::new(
            node.node.vertex().map(|v| v.lorentz.as_str()),
            &node.mothers,
            node.node.spin(),
        )
    }

    pub fn synthesize(&mut self, node: &ResolvedNode<'_>) -> Result<Rc<CallTemplate>, ConvertError> {
        let signature = Self::signature_of(node);
        let requested = node.coupling_count();

        if let Some(template) = self.cache.get(&signature) {
            let cached = template.shape.couplings();
            if cached != requested {
                return Err(ConvertError::CacheInconsistency {
                    signature,
                    cached,
                    requested,
                    site: node.site(),
                });
            }
            self.stats.hits += 1;
            trace!(%signature, site = %node.site(), "call template cache hit");
            return Ok(Rc::clone(template));
        }

        let Some(shape) = lookup_shape(&signature, requested) else {
            return Err(ConvertError::UnsupportedShape {
                arity: signature.arity(),
                couplings: requested,
                signature,
                site: node.site(),
            });
        };

        let template = Rc::new(self.derive(signature.clone(), shape));
        match self.routines.get(&template.routine) {
            Some(first) if first.declaration != template.declaration => {
                return Err(ConvertError::RoutineConflict {
                    routine: template.routine.clone(),
                    first: first.signature.clone(),
                    second: signature,
                    site: node.site(),
                });
            }
            Some(_) => {}
            None => {
                self.routines.insert(template.routine.clone(), Rc::clone(&template));
            }
        }
        self.stats.misses += 1;
        debug!(%signature, routine = %template.routine, "synthesized call template");
        self.cache.insert(signature, Rc::clone(&template));
        Ok(template)
    }

    fn derive(&self, signature: CallSignature, shape: CallShape) -> CallTemplate {
        match &shape {
            CallShape::External { routine } => {
                let call = format!(
                    "{routine}( momenta, %(mass)s, cHel[%(leg)s], %(sign)s, %(out)s, %(leg)s );"
                );
                CallTemplate {
                    routine: routine.to_string(),
                    call,
                    formals: Vec::new(),
                    declaration: None,
                    preamble: Vec::new(),
                    signature,
                    shape,
                }
            }
            CallShape::Vertex {
                legs,
                offshell,
                couplings,
                ..
            } => {
                let lorentz = signature.lorentz.as_deref().unwrap_or_default();
                let routine = format!("{lorentz}_{offshell}");
                let t = self.table;
                let complex = t.spelling(NumericKind::Complex, ArgumentRole::Value);
                let real = t.spelling(NumericKind::Real, ArgumentRole::Value);

                let mut args = Vec::new();
                let mut formals = Vec::new();
                let mut preamble = Vec::new();

                for (i, (pos, spin)) in input_legs(legs, *offshell).enumerate() {
                    args.push(format!("%(in{i})s"));
                    formals.push(format!("const {complex} {}[]", leg_name(spin, pos)));
                }

                for i in 0..*couplings {
                    let name = coupling_formal(i, *couplings);
                    let slot = format!("%(coup{i})s");
                    let sign = format!("%(coup{i}_sign)s");
                    match t.coupling_repr() {
                        CouplingRepr::Complex => {
                            args.push(format!("{sign}{slot}"));
                            let ty = t.spelling(NumericKind::Complex, ArgumentRole::Coupling);
                            formals.push(format!("const {ty} {name}"));
                        }
                        CouplingRepr::RealPair => {
                            args.push(format!("{sign}{}", t.access(ComplexPart::Real, &slot)));
                            args.push(format!("{sign}{}", t.access(ComplexPart::Imag, &slot)));
                            formals.push(format!("const {real} {name}_re"));
                            formals.push(format!("const {real} {name}_im"));
                            preamble.push(format!(
                                "const {complex} {name} = {};",
                                t.make_complex(&format!("{name}_re"), &format!("{name}_im"))
                            ));
                        }
                    }
                }

                if *offshell > 0 {
                    args.push("%(mass)s".to_string());
                    args.push("%(width)s".to_string());
                    let uniform = t.uniform_real();
                    formals.push(format!("const {uniform} M{offshell}"));
                    formals.push(format!("const {uniform} W{offshell}"));
                    let produced = legs[offshell - 1];
                    formals.push(format!("{complex} {}[]", leg_name(produced, offshell - 1)));
                } else {
                    let ty = t.spelling(NumericKind::Complex, ArgumentRole::VertexOutputPointer);
                    formals.push(format!("{ty} vertex"));
                }
                args.push("%(out)s".to_string());

                let call = format!("{routine}( {} );", args.join(", "));
                let declaration = format!(
                    "{}void {routine}( {} )",
                    t.function_qualifier(),
                    formals.join(", ")
                );
                CallTemplate {
                    routine,
                    call,
                    formals,
                    declaration: Some(declaration),
                    preamble,
                    signature,
                    shape,
                }
            }
        }
    }
}

/// (0-based position, spin) of every leg that is an input of the call.
fn input_legs(legs: &[SpinClass], offshell: usize) -> impl Iterator<Item = (usize, SpinClass)> + '_ {
    legs.iter()
        .copied()
        .enumerate()
        .filter(move |(pos, _)| *pos + 1 != offshell)
}

fn leg_name(spin: SpinClass, pos: usize) -> String {
    format!("{}{}", spin.letter(), pos + 1)
}

fn coupling_formal(index: usize, count: usize) -> String {
    if count == 1 {
        "COUP".to_string()
    } else {
        format!("COUP{}", index + 1)
    }
}

// ── Binding ─────────────────────────────────────────────────────────────────

impl CallTemplate {
    /// Fill the operand slots for one node, producing the final statement.
    pub fn bind(&self, node: &ResolvedNode<'_>, symbols: &ModelSymbols) -> Result<String, ConvertError> {
        let mut bound: Vec<(String, String)> = Vec::new();
        let parameter = |name: &str| {
            symbols
                .parameter_operand(name)
                .ok_or_else(|| ConvertError::UnknownReference {
                    kind: "parameter",
                    name: name.to_string(),
                    site: node.site(),
                })
        };

        match node.node {
            Node::External(ext) => {
                bound.push(("mass".into(), parameter(&ext.mass)?));
                bound.push(("leg".into(), ext.leg.to_string()));
                bound.push(("sign".into(), format!("{:+}", ext.sign)));
            }
            Node::Internal(w) => {
                bound.push(("mass".into(), parameter(&w.mass)?));
                bound.push(("width".into(), parameter(&w.width)?));
            }
            Node::Amplitude(_) => {}
        }

        for (i, mother) in canonical_mothers(&node.mothers).iter().enumerate() {
            bound.push((format!("in{i}"), format!("w[{}]", mother.number)));
        }

        if let Some(vertex) = node.node.vertex() {
            for (i, reference) in vertex.couplings.iter().enumerate() {
                let (negated, name) = split_coupling_sign(reference);
                let slot = symbols
                    .coupling_slot(name)
                    .ok_or_else(|| ConvertError::UnknownReference {
                        kind: "coupling",
                        name: name.to_string(),
                        site: node.site(),
                    })?;
                bound.push((format!("coup{i}"), format!("COUPs[{slot}]")));
                let sign = if negated { "-" } else { "" };
                bound.push((format!("coup{i}_sign"), sign.to_string()));
            }
        }

        let out = match node.key() {
            NodeKey::Wavefunction(n) => format!("w[{n}]"),
            NodeKey::Amplitude(n) => format!("&amp[{n}]"),
        };
        bound.push(("out".into(), out));

        let vars: Placeholders<'_> = bound.iter().map(|(k, v)| (k.as_str(), v.clone())).collect();
        substitute(&self.call, &vars).map_err(|name| ConvertError::UnboundPlaceholder {
            owner: format!("call template for {}", self.signature),
            name,
        })
    }
}
