// diag.rs — Conversion error taxonomy
//
// Every failure of a model conversion is one `ConvertError` variant carrying
// the identifiers needed to locate the defect upstream (signature, node,
// process, scaffold key). All variants are fatal for the unit of work in
// progress; nothing here is retried or defaulted.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::scaffold::ScaffoldKey;
use crate::signature::CallSignature;

// ── Diagnostic code ──────────────────────────────────────────────────────

/// A stable diagnostic code (e.g., `E0100`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // E01xx: call-shape synthesis
    pub const E0100: DiagCode = DiagCode("E0100"); // unsupported call shape
    pub const E0101: DiagCode = DiagCode("E0101"); // cache inconsistency
    pub const E0102: DiagCode = DiagCode("E0102"); // routine name conflict

    // E02xx: input graph / model
    pub const E0200: DiagCode = DiagCode("E0200"); // malformed graph
    pub const E0201: DiagCode = DiagCode("E0201"); // unknown reference
    pub const E0202: DiagCode = DiagCode("E0202"); // model could not be read
    pub const E0203: DiagCode = DiagCode("E0203"); // model could not be parsed
    pub const E0204: DiagCode = DiagCode("E0204"); // output name collision

    // E03xx: scaffolds
    pub const E0300: DiagCode = DiagCode("E0300"); // missing scaffold
    pub const E0301: DiagCode = DiagCode("E0301"); // unbound placeholder
    pub const E0302: DiagCode = DiagCode("E0302"); // scaffold could not be read
}

// ── Error ────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConvertError {
    /// No catalog entry for the spin/arity combination of a node.
    #[error("unsupported call shape {signature} (arity {arity}, {couplings} coupling(s)) at {site}")]
    UnsupportedShape {
        signature: CallSignature,
        arity: usize,
        couplings: usize,
        site: String,
    },

    /// Cyclic dependency, unresolved mother, or otherwise invalid node.
    #[error("malformed graph in process '{process}' at {node}: {reason}")]
    MalformedGraph {
        process: String,
        node: String,
        reason: String,
    },

    /// No header/footer fragment registered for a required key.
    #[error("missing scaffold fragment '{key}'")]
    MissingScaffold { key: ScaffoldKey },

    /// Two nodes share a call signature but request different call shapes.
    #[error(
        "call signature {signature} was synthesized with {cached} coupling(s) but {site} requests {requested}"
    )]
    CacheInconsistency {
        signature: CallSignature,
        cached: usize,
        requested: usize,
        site: String,
    },

    /// Two signatures derive the same routine name with different prototypes.
    #[error("routine {routine} is already synthesized for {first} but {site} requests it for {second}")]
    RoutineConflict {
        routine: String,
        first: CallSignature,
        second: CallSignature,
        site: String,
    },

    /// Two emitted units of one target map to the same file name.
    #[error("output file '{path}' of {owner} collides with an earlier unit")]
    OutputCollision { path: String, owner: String },

    /// A node names a Lorentz structure, routine, coupling or parameter the
    /// model does not define.
    #[error("unknown {kind} '{name}' referenced by {site}")]
    UnknownReference {
        kind: &'static str,
        name: String,
        site: String,
    },

    /// A fragment names a placeholder the emitter does not supply.
    #[error("{owner} names unbound placeholder '%({name})s'")]
    UnboundPlaceholder { owner: String, name: String },

    #[error("cannot read model {}: {source}", .path.display())]
    ModelLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse model: {0}")]
    ModelParse(#[from] serde_json::Error),

    #[error("cannot read scaffold {}: {source}", .path.display())]
    ScaffoldLoad {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ConvertError {
    /// Stable code for this error class.
    pub fn code(&self) -> DiagCode {
        match self {
            ConvertError::UnsupportedShape { .. } => codes::E0100,
            ConvertError::CacheInconsistency { .. } => codes::E0101,
            ConvertError::RoutineConflict { .. } => codes::E0102,
            ConvertError::MalformedGraph { .. } => codes::E0200,
            ConvertError::UnknownReference { .. } => codes::E0201,
            ConvertError::ModelLoad { .. } => codes::E0202,
            ConvertError::ModelParse(_) => codes::E0203,
            ConvertError::OutputCollision { .. } => codes::E0204,
            ConvertError::MissingScaffold { .. } => codes::E0300,
            ConvertError::UnboundPlaceholder { .. } => codes::E0301,
            ConvertError::ScaffoldLoad { .. } => codes::E0302,
        }
    }

    /// Errors caused by the environment rather than by the model content.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            ConvertError::ModelLoad { .. } | ConvertError::ScaffoldLoad { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Target;
    use crate::model::SpinClass;
    use crate::scaffold::{Part, Unit};

    #[test]
    fn display_malformed_graph() {
        let e = ConvertError::MalformedGraph {
            process: "P1_epem_mupmum".into(),
            node: "w[4]".into(),
            reason: "mother w[9] is not defined".into(),
        };
        assert_eq!(
            e.to_string(),
            "malformed graph in process 'P1_epem_mupmum' at w[4]: mother w[9] is not defined"
        );
        assert_eq!(e.code(), codes::E0200);
    }

    #[test]
    fn display_missing_scaffold_names_key() {
        let e = ConvertError::MissingScaffold {
            key: ScaffoldKey::new(Target::Cuda, Unit::Process, Part::Footer),
        };
        assert_eq!(e.to_string(), "missing scaffold fragment 'cuda/process_footer'");
        assert_eq!(e.code(), codes::E0300);
    }

    #[test]
    fn display_unsupported_shape_reports_signature() {
        let e = ConvertError::UnsupportedShape {
            signature: CallSignature {
                lorentz: Some("XYZ1".into()),
                mothers: vec![SpinClass::Tensor, SpinClass::Tensor],
                own: Some(SpinClass::Tensor),
            },
            arity: 2,
            couplings: 1,
            site: "w[3] in process 'P'".into(),
        };
        let text = e.to_string();
        assert!(text.contains("XYZ1(tensor, tensor) -> tensor"), "{text}");
        assert!(text.contains("arity 2"), "{text}");
    }

    #[test]
    fn display_routine_conflict_names_both_signatures() {
        let e = ConvertError::RoutineConflict {
            routine: "L1_0".into(),
            first: CallSignature {
                lorentz: Some("L1".into()),
                mothers: vec![SpinClass::FermionOut, SpinClass::FermionIn, SpinClass::Vector],
                own: None,
            },
            second: CallSignature {
                lorentz: Some("L1".into()),
                mothers: vec![SpinClass::Vector, SpinClass::Vector, SpinClass::Vector],
                own: None,
            },
            site: "amp[0] in process 'P2'".into(),
        };
        let text = e.to_string();
        assert!(text.starts_with("routine L1_0 is already synthesized for L1("), "{text}");
        assert!(text.contains("L1(vector, vector, vector)"), "{text}");
        assert_eq!(e.code(), codes::E0102);
    }

    #[test]
    fn placeholder_message_keeps_percent_syntax() {
        let e = ConvertError::UnboundPlaceholder {
            owner: "scaffold 'cpp/process_header'".into(),
            name: "nevents".into(),
        };
        assert_eq!(
            e.to_string(),
            "scaffold 'cpp/process_header' names unbound placeholder '%(nevents)s'"
        );
    }

    #[test]
    fn io_classification() {
        let io = ConvertError::ScaffoldLoad {
            path: PathBuf::from("/nonexistent"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        assert!(io.is_io());
        let shape = ConvertError::UnknownReference {
            kind: "coupling",
            name: "GC_1".into(),
            site: "amp[0]".into(),
        };
        assert!(!shape.is_io());
    }
}
