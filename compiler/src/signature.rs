// signature.rs — Call signatures, canonical mother ordering, shape catalog
//
// A call signature is the cache key for call-template synthesis: the
// canonically ordered mother spins, the node's own spin and the Lorentz
// structure. The catalog maps the full leg pattern of a vertex onto the
// fixed call shape the kernel vocabulary provides for it.
//
// Preconditions: mothers carry resolved spins (see `graph`).
// Postconditions: `canonical_mothers` is a strict total order over
//                 (spin rank, mother number); equal inputs give equal keys.
// Failure modes: `lookup_shape` returns `None` for unknown combinations.
// Side effects: none.

use std::fmt;

use crate::model::SpinClass;

// ── Canonical ordering ──────────────────────────────────────────────────────

/// A resolved mother reference: its wavefunction number and spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mother {
    pub number: u32,
    pub spin: SpinClass,
}

/// Sort mothers by spin rank, then by wavefunction number.
///
/// Wavefunction numbers are unique within a process, so the order is total
/// and independent of how the mother list was enumerated upstream.
pub fn canonical_mothers(mothers: &[Mother]) -> Vec<Mother> {
    let mut sorted = mothers.to_vec();
    sorted.sort_by_key(|m| (m.spin.rank(), m.number));
    sorted
}

// ── Signature ───────────────────────────────────────────────────────────────

/// Cache key for one call shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallSignature {
    /// `None` for external legs.
    pub lorentz: Option<String>,
    /// Mother spins in canonical order.
    pub mothers: Vec<SpinClass>,
    /// `None` for amplitudes.
    pub own: Option<SpinClass>,
}

impl CallSignature {
    pub fn new(lorentz: Option<&str>, mothers: &[Mother], own: Option<SpinClass>) -> Self {
        CallSignature {
            lorentz: lorentz.map(str::to_string),
            mothers: canonical_mothers(mothers).iter().map(|m| m.spin).collect(),
            own,
        }
    }

    pub fn arity(&self) -> usize {
        self.mothers.len()
    }
}

impl fmt::Display for CallSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spins: Vec<&str> = self.mothers.iter().map(|s| s.name()).collect();
        match &self.lorentz {
            Some(l) => write!(f, "{}({})", l, spins.join(", "))?,
            None => write!(f, "external({})", spins.join(", "))?,
        }
        match self.own {
            Some(own) => write!(f, " -> {}", own),
            None => write!(f, " -> amplitude"),
        }
    }
}

// ── Shape catalog ───────────────────────────────────────────────────────────

/// A vertex family the kernel vocabulary supports, legs in canonical order.
#[derive(Debug)]
pub struct VertexFamily {
    pub name: &'static str,
    pub legs: &'static [SpinClass],
}

use SpinClass::{FermionIn as I, FermionOut as O, Scalar as S, Tensor as T, Vector as V};

pub const VERTEX_CATALOG: &[VertexFamily] = &[
    VertexFamily { name: "FFV", legs: &[O, I, V] },
    VertexFamily { name: "FFS", legs: &[O, I, S] },
    VertexFamily { name: "FFT", legs: &[O, I, T] },
    VertexFamily { name: "VVV", legs: &[V, V, V] },
    VertexFamily { name: "VVS", legs: &[V, V, S] },
    VertexFamily { name: "VSS", legs: &[V, S, S] },
    VertexFamily { name: "SSS", legs: &[S, S, S] },
    VertexFamily { name: "VVT", legs: &[V, V, T] },
    VertexFamily { name: "SST", legs: &[S, S, T] },
    VertexFamily { name: "FFVV", legs: &[O, I, V, V] },
    VertexFamily { name: "VVVV", legs: &[V, V, V, V] },
    VertexFamily { name: "VVSS", legs: &[V, V, S, S] },
    VertexFamily { name: "SSSS", legs: &[S, S, S, S] },
];

/// External-leg routines of the helas library, by spin.
pub const EXTERNAL_CATALOG: &[(SpinClass, &str)] = &[
    (O, "oxxxxx"),
    (I, "ixxxxx"),
    (V, "vxxxxx"),
    (S, "sxxxxx"),
    (T, "txxxxx"),
];

/// The fixed call shape selected for a signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallShape {
    External {
        routine: &'static str,
    },
    Vertex {
        family: &'static str,
        /// All legs in canonical order, the produced one included.
        legs: Vec<SpinClass>,
        /// 1-based position of the produced leg; 0 for amplitudes.
        offshell: usize,
        couplings: usize,
    },
}

impl CallShape {
    pub fn couplings(&self) -> usize {
        match self {
            CallShape::External { .. } => 0,
            CallShape::Vertex { couplings, .. } => *couplings,
        }
    }
}

/// Select the call shape for `signature` with `couplings` coupling operands.
pub fn lookup_shape(signature: &CallSignature, couplings: usize) -> Option<CallShape> {
    if signature.lorentz.is_none() {
        if !signature.mothers.is_empty() || couplings != 0 {
            return None;
        }
        let own = signature.own?;
        return EXTERNAL_CATALOG
            .iter()
            .find(|(spin, _)| *spin == own)
            .map(|&(_, routine)| CallShape::External { routine });
    }

    if couplings == 0 {
        return None;
    }

    let (legs, offshell) = match signature.own {
        Some(own) => {
            // The produced leg goes first among legs of equal rank.
            let pos = signature
                .mothers
                .iter()
                .take_while(|m| m.rank() < own.rank())
                .count();
            let mut legs = signature.mothers.clone();
            legs.insert(pos, own);
            (legs, pos + 1)
        }
        None => (signature.mothers.clone(), 0),
    };

    VERTEX_CATALOG
        .iter()
        .find(|family| family.legs == legs.as_slice())
        .map(|family| CallShape::Vertex {
            family: family.name,
            legs,
            offshell,
            couplings,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(number: u32, spin: SpinClass) -> Mother {
        Mother { number, spin }
    }

    #[test]
    fn canonical_order_by_spin_then_number() {
        let sorted = canonical_mothers(&[m(4, V), m(2, I), m(7, O), m(1, V)]);
        let numbers: Vec<u32> = sorted.iter().map(|m| m.number).collect();
        assert_eq!(numbers, vec![7, 2, 1, 4]);
    }

    #[test]
    fn permuted_mothers_give_equal_signature() {
        let a = CallSignature::new(Some("VVV1"), &[m(0, V), m(1, V)], Some(V));
        let b = CallSignature::new(Some("VVV1"), &[m(1, V), m(0, V)], Some(V));
        assert_eq!(a, b);
        let c = CallSignature::new(Some("FFV1"), &[m(3, V), m(0, O)], Some(I));
        let d = CallSignature::new(Some("FFV1"), &[m(0, O), m(3, V)], Some(I));
        assert_eq!(c, d);
    }

    #[test]
    fn signature_distinguishes_lorentz_and_own_spin() {
        let a = CallSignature::new(Some("FFV1"), &[m(0, O), m(1, I)], Some(V));
        let b = CallSignature::new(Some("FFV2"), &[m(0, O), m(1, I)], Some(V));
        let c = CallSignature::new(Some("FFV1"), &[m(0, O), m(1, I), m(2, V)], None);
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_signature() {
        let s = CallSignature::new(Some("FFV1"), &[m(1, I), m(0, O)], Some(V));
        assert_eq!(s.to_string(), "FFV1(fermion-out, fermion-in) -> vector");
        let ext = CallSignature::new(None, &[], Some(S));
        assert_eq!(ext.to_string(), "external() -> scalar");
    }

    #[test]
    fn amplitude_shape_is_offshell_zero() {
        let sig = CallSignature::new(Some("FFV1"), &[m(0, I), m(1, O), m(2, V)], None);
        match lookup_shape(&sig, 1) {
            Some(CallShape::Vertex { family, offshell, legs, couplings }) => {
                assert_eq!(family, "FFV");
                assert_eq!(offshell, 0);
                assert_eq!(legs, vec![O, I, V]);
                assert_eq!(couplings, 1);
            }
            other => panic!("unexpected shape {other:?}"),
        }
    }

    #[test]
    fn wavefunction_offshell_position() {
        // produced vector after both fermions
        let sig = CallSignature::new(Some("FFV1P0"), &[m(0, O), m(1, I)], Some(V));
        assert!(matches!(lookup_shape(&sig, 1), Some(CallShape::Vertex { offshell: 3, .. })));
        // produced incoming fermion sits behind the outgoing one
        let sig = CallSignature::new(Some("FFV1"), &[m(0, O), m(2, V)], Some(I));
        assert!(matches!(lookup_shape(&sig, 1), Some(CallShape::Vertex { offshell: 2, .. })));
        // produced leg is first among equal ranks
        let sig = CallSignature::new(Some("VVV1"), &[m(0, V), m(1, V)], Some(V));
        assert!(matches!(lookup_shape(&sig, 1), Some(CallShape::Vertex { offshell: 1, .. })));
    }

    #[test]
    fn external_shapes() {
        for (spin, routine) in EXTERNAL_CATALOG {
            let sig = CallSignature::new(None, &[], Some(*spin));
            assert_eq!(lookup_shape(&sig, 0), Some(CallShape::External { routine: *routine }));
        }
    }

    #[test]
    fn unknown_combinations_have_no_shape() {
        // two outgoing fermions cannot meet a vector
        let sig = CallSignature::new(Some("FFV1"), &[m(0, O), m(1, O)], Some(V));
        assert_eq!(lookup_shape(&sig, 1), None);
        // five-point vertex
        let five: Vec<Mother> = (0..4).map(|n| m(n, V)).collect();
        let sig = CallSignature::new(Some("VVVVV1"), &five, Some(V));
        assert_eq!(lookup_shape(&sig, 1), None);
        // vertex with a single leg
        let sig = CallSignature::new(Some("V1"), &[], Some(V));
        assert_eq!(lookup_shape(&sig, 1), None);
        // vertex without coupling
        let sig = CallSignature::new(Some("VVV1"), &[m(0, V), m(1, V)], Some(V));
        assert_eq!(lookup_shape(&sig, 0), None);
    }

    #[test]
    fn catalog_legs_are_canonically_ordered() {
        for family in VERTEX_CATALOG {
            let ranks: Vec<u8> = family.legs.iter().map(|s| s.rank()).collect();
            let mut sorted = ranks.clone();
            sorted.sort();
            assert_eq!(ranks, sorted, "{}", family.name);
        }
    }
}
