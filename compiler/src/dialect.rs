// dialect.rs — Type/operator mapping table for each target
//
// Maps abstract numeric kinds and argument roles onto target-language text:
// type keywords, pointer decoration, complex accessors, the imaginary unit.
// Each target is a data record; the converter selects one at construction.
//
// Preconditions: none.
// Postconditions: every (kind, role) pair spells to a non-empty string.
// Failure modes: none (the table is exhaustive by construction).
// Side effects: none.

use std::fmt;

use clap::ValueEnum;
use serde::Serialize;

/// Slot name used inside accessor patterns for the operand expression.
pub const EXPR_SLOT: &str = "%(expr)s";

// ── Abstract vocabulary ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    Integer,
    Real,
    Complex,
}

pub const ALL_KINDS: [NumericKind; 3] = [NumericKind::Integer, NumericKind::Real, NumericKind::Complex];

/// Decoration applied on top of a kind's base spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgumentRole {
    Value,
    Coupling,
    VertexOutputPointer,
}

pub const ALL_ROLES: [ArgumentRole; 3] = [
    ArgumentRole::Value,
    ArgumentRole::Coupling,
    ArgumentRole::VertexOutputPointer,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComplexPart {
    Real,
    Imag,
}

/// How a coupling crosses a call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CouplingRepr {
    /// One complex value.
    Complex,
    /// Two reals: unpacked at the call site, repacked inside the routine.
    RealPair,
}

// ── Targets ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// GPU device code.
    Cuda,
    /// Scalar host code.
    Cpp,
    /// Vectorized host code.
    Simd,
}

pub const ALL_TARGETS: [Target; 3] = [Target::Cuda, Target::Cpp, Target::Simd];

impl Target {
    pub fn name(self) -> &'static str {
        match self {
            Target::Cuda => "cuda",
            Target::Cpp => "cpp",
            Target::Simd => "simd",
        }
    }

    pub fn extension(self) -> &'static str {
        self.dialect().extension
    }

    /// The built-in mapping table for this target.
    pub fn dialect(self) -> &'static Dialect {
        match self {
            Target::Cuda => &CUDA,
            Target::Cpp => &CPP,
            Target::Simd => &SIMD,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Lookup seam ─────────────────────────────────────────────────────────────

/// Read-only lookup over a target's spelling rules.
///
/// `Dialect` is the only production implementation; the trait exists so a
/// conversion can be run against an instrumented table.
pub trait TypeTable {
    fn target(&self) -> Target;

    /// Type text for `kind` in `role`, decoration included (`cxtype*`).
    fn spelling(&self, kind: NumericKind, role: ArgumentRole) -> String;

    /// Accessor pattern for one part of a complex value; contains `EXPR_SLOT`.
    fn accessor(&self, part: ComplexPart) -> &str;

    /// Real type of values shared by every lane: model parameters, masses,
    /// widths and momenta. Differs from the `Real` spelling on vector targets.
    fn uniform_real(&self) -> &str;

    fn imaginary_unit_literal(&self) -> &str;

    /// Name of the complex constructor taking (real, imag).
    fn complex_constructor(&self) -> &str;

    /// Qualifier placed before every emitted function (may be empty).
    fn function_qualifier(&self) -> &str;

    fn coupling_repr(&self) -> CouplingRepr;

    fn extension(&self) -> &str;

    /// Apply the accessor pattern for `part` to `expr`.
    fn access(&self, part: ComplexPart, expr: &str) -> String {
        self.accessor(part).replace(EXPR_SLOT, expr)
    }

    /// `ctor( re, im )` in this target's spelling.
    fn make_complex(&self, re: &str, im: &str) -> String {
        format!("{}( {}, {} )", self.complex_constructor(), re, im)
    }
}

// ── Data records ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub target: Target,
    pub extension: &'static str,
    pub qualifier: &'static str,
    pub integer: &'static str,
    pub real: &'static str,
    pub uniform_real: &'static str,
    pub complex: &'static str,
    pub vertex_decoration: &'static str,
    pub coupling_decoration: &'static str,
    pub real_accessor: &'static str,
    pub imag_accessor: &'static str,
    pub complex_ctor: &'static str,
    pub imaginary_unit: &'static str,
    pub coupling_repr: CouplingRepr,
}

pub static CUDA: Dialect = Dialect {
    target: Target::Cuda,
    extension: "cu",
    qualifier: "__device__ ",
    integer: "int",
    real: "fptype",
    uniform_real: "fptype",
    complex: "cxtype",
    vertex_decoration: "*",
    coupling_decoration: "",
    real_accessor: "%(expr)s.real()",
    imag_accessor: "%(expr)s.imag()",
    complex_ctor: "cxtype",
    imaginary_unit: "cxtype( 0., 1. )",
    coupling_repr: CouplingRepr::RealPair,
};

pub static CPP: Dialect = Dialect {
    target: Target::Cpp,
    extension: "cc",
    qualifier: "",
    integer: "int",
    real: "double",
    uniform_real: "double",
    complex: "std::complex<double>",
    vertex_decoration: "*",
    coupling_decoration: "",
    real_accessor: "%(expr)s.real()",
    imag_accessor: "%(expr)s.imag()",
    complex_ctor: "std::complex<double>",
    imaginary_unit: "std::complex<double>( 0., 1. )",
    coupling_repr: CouplingRepr::Complex,
};

pub static SIMD: Dialect = Dialect {
    target: Target::Simd,
    extension: "cc",
    qualifier: "",
    integer: "int",
    real: "fptype_v",
    uniform_real: "fptype",
    complex: "cxtype_v",
    vertex_decoration: "*",
    coupling_decoration: "",
    real_accessor: "cxreal( %(expr)s )",
    imag_accessor: "cximag( %(expr)s )",
    complex_ctor: "cxmake",
    imaginary_unit: "cxmake( 0., 1. )",
    coupling_repr: CouplingRepr::Complex,
};

impl Dialect {
    fn base(&self, kind: NumericKind) -> &'static str {
        match kind {
            NumericKind::Integer => self.integer,
            NumericKind::Real => self.real,
            NumericKind::Complex => self.complex,
        }
    }
}

impl TypeTable for Dialect {
    fn target(&self) -> Target {
        self.target
    }

    fn spelling(&self, kind: NumericKind, role: ArgumentRole) -> String {
        let decoration = match role {
            ArgumentRole::Value => "",
            ArgumentRole::Coupling => self.coupling_decoration,
            ArgumentRole::VertexOutputPointer => self.vertex_decoration,
        };
        format!("{}{}", self.base(kind), decoration)
    }

    fn accessor(&self, part: ComplexPart) -> &str {
        match part {
            ComplexPart::Real => self.real_accessor,
            ComplexPart::Imag => self.imag_accessor,
        }
    }

    fn uniform_real(&self) -> &str {
        self.uniform_real
    }

    fn imaginary_unit_literal(&self) -> &str {
        self.imaginary_unit
    }

    fn complex_constructor(&self) -> &str {
        self.complex_ctor
    }

    fn function_qualifier(&self) -> &str {
        self.qualifier
    }

    fn coupling_repr(&self) -> CouplingRepr {
        self.coupling_repr
    }

    fn extension(&self) -> &str {
        self.extension
    }
}
