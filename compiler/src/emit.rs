// emit.rs — Shared and per-process kernel emission for one target
//
// A `ModelConverter` owns one target's type table, the model's symbol table
// and a call-template cache whose lifetime is one model conversion. The two
// public operations assemble final source units: the shared kernel pair
// (declarations and definitions of every routine the model calls) and one
// evaluation routine per process.
//
// Preconditions: scaffolds for the target are registered (checked by `new`).
// Postconditions: returned text is byte-identical for identical input.
// Failure modes: every `ConvertError` raised by graph resolution, synthesis,
//                binding or scaffold rendering aborts the unit in progress.
// Side effects: grows the converter's call-template cache.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::rc::Rc;

use tracing::{debug, instrument};

use crate::diag::ConvertError;
use crate::dialect::{ArgumentRole, NumericKind, TypeTable};
use crate::graph::{resolve_process, ProcessGraph, ResolvedNode};
use crate::model::{sanitize, ColorTerm, Model, ModelSymbols, Node, Process};
use crate::scaffold::{Part, Placeholders, ScaffoldKey, ScaffoldSet, Unit};
use crate::signature::CallShape;
use crate::synth::{CallTemplate, Synthesizer};

/// Identifier for the imaginary unit inside emitted routines.
const IMAGINARY_UNIT: &str = "cI";

// ── Converter ───────────────────────────────────────────────────────────────

pub struct ModelConverter<'a> {
    model: &'a Model,
    table: &'a dyn TypeTable,
    scaffolds: &'a ScaffoldSet,
    symbols: ModelSymbols,
    synth: Synthesizer<'a>,
}

impl<'a> ModelConverter<'a> {
    /// Fails with `MissingScaffold` before anything is emitted.
    pub fn new(
        model: &'a Model,
        table: &'a dyn TypeTable,
        scaffolds: &'a ScaffoldSet,
    ) -> Result<Self, ConvertError> {
        scaffolds.require_target(table.target())?;
        Ok(ModelConverter {
            model,
            table,
            scaffolds,
            symbols: ModelSymbols::collect(model),
            synth: Synthesizer::new(table),
        })
    }

    pub fn synthesizer(&self) -> &Synthesizer<'a> {
        &self.synth
    }

    /// Base name of the shared kernel pair, e.g. `HelAmps_sm`.
    pub fn shared_stem(&self) -> String {
        format!("HelAmps_{}", self.model.sanitized_name())
    }

    /// File name of one process kernel, e.g. `P1_epem_mupmum.cu`.
    pub fn process_file_name(&self, process: &Process) -> String {
        format!("{}.{}", sanitize(&process.name), self.table.extension())
    }

    fn placeholders(&self, file: &str) -> Placeholders<'static> {
        let mut vars = Placeholders::new();
        vars.insert("model", self.model.sanitized_name());
        vars.insert("target", self.table.target().name().to_string());
        vars.insert("extension", self.table.extension().to_string());
        vars.insert("file", file.to_string());
        vars
    }

    fn key(&self, unit: Unit, part: Part) -> ScaffoldKey {
        ScaffoldKey::new(self.table.target(), unit, part)
    }

    /// Header, optional library fragment, `body`, footer.
    fn wrap(&self, unit: Unit, vars: &Placeholders<'_>, body: &str) -> Result<String, ConvertError> {
        let mut out = self.scaffolds.render(self.key(unit, Part::Header), vars)?;
        if let Some(library) = self
            .scaffolds
            .render_optional(self.key(unit, Part::Library), vars)?
        {
            out.push_str(&library);
        }
        out.push_str(body);
        out.push_str(&self.scaffolds.render(self.key(unit, Part::Footer), vars)?);
        Ok(out)
    }

    fn imaginary_unit_definition(&self) -> String {
        format!(
            "const {} {IMAGINARY_UNIT} = {};",
            self.table.spelling(NumericKind::Complex, ArgumentRole::Value),
            self.table.imaginary_unit_literal()
        )
    }

    // ── Shared kernels ──────────────────────────────────────────────────────

    /// Emit the shared kernel pair: `<stem>.h` and `<stem>.<ext>`.
    #[instrument(skip(self), fields(target = %self.table.target(), model = %self.model.name))]
    pub fn emit_shared_kernels(&mut self) -> Result<BTreeMap<String, String>, ConvertError> {
        let mut routines: BTreeMap<String, Rc<CallTemplate>> = BTreeMap::new();
        for process in &self.model.processes {
            let graph = resolve_process(process)?;
            for node in &graph.order {
                let template = self.synth.synthesize(node)?;
                // One prototype per routine name; `synthesize` rejects a
                // second signature that would need a different one.
                if template.declaration.is_some() {
                    routines.entry(template.routine.clone()).or_insert(template);
                }
            }
        }
        debug!(routines = routines.len(), "collected shared routines");

        let stem = self.shared_stem();
        let header_name = format!("{stem}.h");
        let source_name = format!("{stem}.{}", self.table.extension());

        let q = self.table.function_qualifier();
        let real = self.table.uniform_real();
        let couplings_formal = format!(
            "{} COUPs",
            self.table
                .spelling(NumericKind::Complex, ArgumentRole::VertexOutputPointer)
        );
        let couplings_decl = format!("{q}void compute_couplings( {couplings_formal} )");

        // Declarations
        let mut decls = String::new();
        if !self.model.parameters.is_empty() {
            decls.push_str("\n// Model parameters\n");
            for p in &self.model.parameters {
                let _ = writeln!(decls, "{q}constexpr {real} {} = {:?};", p.name, p.value);
            }
        }
        decls.push_str("\n// Couplings\n");
        let _ = writeln!(decls, "{couplings_decl};");
        if !routines.is_empty() {
            decls.push_str("\n// Lorentz routines\n");
            for template in routines.values() {
                if let Some(declaration) = &template.declaration {
                    let _ = writeln!(decls, "{declaration};");
                }
            }
        }
        decls.push('\n');

        // Definitions
        let mut defs = String::new();
        let _ = writeln!(defs, "\n{couplings_decl}");
        defs.push_str("{\n");
        let referenced = self.symbols.referenced_couplings();
        if referenced
            .iter()
            .any(|c| uses_identifier(&c.expression, IMAGINARY_UNIT))
        {
            let _ = writeln!(defs, "  {}", self.imaginary_unit_definition());
        }
        for (slot, coupling) in referenced.iter().enumerate() {
            let _ = writeln!(defs, "  COUPs[{slot}] = {}; // {}", coupling.expression, coupling.name);
        }
        defs.push_str("}\n");

        for template in routines.values() {
            self.define_routine(&mut defs, template)?;
        }
        defs.push('\n');

        let mut files = BTreeMap::new();
        let vars = self.placeholders(&header_name);
        files.insert(header_name, self.wrap(Unit::SharedHeader, &vars, &decls)?);
        let vars = self.placeholders(&source_name);
        files.insert(source_name, self.wrap(Unit::SharedSource, &vars, &defs)?);
        Ok(files)
    }

    fn define_routine(&self, out: &mut String, template: &CallTemplate) -> Result<(), ConvertError> {
        let (Some(declaration), CallShape::Vertex { offshell, .. }) =
            (&template.declaration, &template.shape)
        else {
            return Ok(());
        };
        let site = format!("routine {}", template.routine);
        let lorentz = template.signature.lorentz.as_deref().unwrap_or_default();
        let structure =
            self.model
                .lorentz_structure(lorentz)
                .ok_or_else(|| ConvertError::UnknownReference {
                    kind: "Lorentz structure",
                    name: lorentz.to_string(),
                    site: site.clone(),
                })?;
        let routine = structure
            .routine(*offshell)
            .ok_or_else(|| ConvertError::UnknownReference {
                kind: "Lorentz routine",
                name: template.routine.clone(),
                site,
            })?;

        let _ = writeln!(out, "\n{declaration}");
        out.push_str("{\n");
        for line in &template.preamble {
            let _ = writeln!(out, "  {line}");
        }
        if uses_identifier(&routine.body, IMAGINARY_UNIT) {
            let _ = writeln!(out, "  {}", self.imaginary_unit_definition());
        }
        for line in routine.body.lines() {
            if line.trim().is_empty() {
                out.push('\n');
            } else {
                let _ = writeln!(out, "  {}", line.trim_end());
            }
        }
        out.push_str("}\n");
        Ok(())
    }

    // ── Process kernels ─────────────────────────────────────────────────────

    /// Emit the evaluation routine of one process.
    #[instrument(skip(self, process), fields(target = %self.table.target(), process = %process.name))]
    pub fn emit_process_kernel(&mut self, process: &Process) -> Result<String, ConvertError> {
        let graph = resolve_process(process)?;
        let body = self.process_body(&graph)?;
        let file = self.process_file_name(process);
        let mut vars = self.placeholders(&file);
        vars.insert("process", sanitize(&process.name));
        self.wrap(Unit::Process, &vars, &body)
    }

    fn process_body(&mut self, graph: &ProcessGraph<'_>) -> Result<String, ConvertError> {
        let t = self.table;
        let q = t.function_qualifier();
        let int = t.spelling(NumericKind::Integer, ArgumentRole::Value);
        let real = t.uniform_real();
        let complex = t.spelling(NumericKind::Complex, ArgumentRole::Value);
        let process = graph.process;

        let mut statements = Vec::with_capacity(graph.order.len());
        for node in &graph.order {
            let template = self.synth.synthesize(node)?;
            statements.push(template.bind(node, &self.symbols)?);
            statements.extend(color_statements(node));
        }

        let mut out = String::new();
        let description = if process.description.is_empty() {
            &process.name
        } else {
            &process.description
        };
        let _ = writeln!(out, "\n// Process: {description}");
        let _ = writeln!(
            out,
            "{q}void calculate_wavefunctions_{}( const {real}* momenta, const {int}* cHel, \
             const {complex}* COUPs, {complex}* jamp )",
            sanitize(&process.name)
        );
        out.push_str("{\n");
        let _ = writeln!(
            out,
            "  {complex} w[{}][{}];",
            graph.wavefunction_slots(),
            graph.wavefunction_width()
        );
        let _ = writeln!(out, "  {complex} amp[{}];", graph.amplitude_slots());
        let imaginary = graph
            .order
            .iter()
            .any(|n| matches!(n.node, Node::Amplitude(a) if a.color.iter().any(|c| c.imaginary)));
        if imaginary {
            let _ = writeln!(out, "  {}", self.imaginary_unit_definition());
        }
        let _ = writeln!(
            out,
            "  for( {int} icol = 0; icol < {}; icol++ ) jamp[icol] = {};",
            process.ncolor,
            t.make_complex("0.", "0.")
        );
        out.push('\n');
        for statement in &statements {
            let _ = writeln!(out, "  {statement}");
        }
        out.push_str("}\n\n");
        Ok(out)
    }
}

/// Colour-flow accumulation statements following an amplitude call.
fn color_statements(node: &ResolvedNode<'_>) -> Vec<String> {
    let Node::Amplitude(amp) = node.node else {
        return Vec::new();
    };
    amp.color
        .iter()
        .map(|term| {
            format!(
                "jamp[{}] {} {}{}amp[{}];",
                term.jamp,
                if term.negative { "-=" } else { "+=" },
                color_factor(term),
                if term.imaginary { "cI * " } else { "" },
                amp.number
            )
        })
        .collect()
}

fn color_factor(term: &ColorTerm) -> String {
    match (term.numerator, term.denominator) {
        (1, 1) => String::new(),
        (n, 1) => format!("{n}. * "),
        (n, d) => format!("{n}. / {d}. * "),
    }
}

/// True if `ident` occurs in `text` as a whole identifier.
fn uses_identifier(text: &str, ident: &str) -> bool {
    let is_ident = |c: char| c.is_ascii_alphanumeric() || c == '_';
    text.match_indices(ident).any(|(at, _)| {
        let before = text[..at].chars().next_back();
        let after = text[at + ident.len()..].chars().next();
        !before.is_some_and(is_ident) && !after.is_some_and(is_ident)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::{Target, CPP, CUDA, SIMD};
    use crate::model::{AmplitudeNode, Vertex};

    const MODEL: &str = r#"{
        "name": "sm-ee",
        "parameters": [{ "name": "mdl_MZ", "value": 91.188 }, { "name": "mdl_WZ", "value": 2.441404 }],
        "couplings": [
            { "name": "GC_1", "expression": "-(mdl_ee * cI) / 3." },
            { "name": "GC_3", "expression": "-(mdl_ee * cI)" }
        ],
        "lorentz": [
            { "name": "FFV1", "routines": [{ "offshell": 0, "body": "(*vertex) = COUP * ( F1[2] * V3[2] );" }] },
            { "name": "FFV1P0", "routines": [{ "offshell": 3, "body": "V3[0] = F1[0] + F2[0];\nV3[2] = cI * COUP;" }] }
        ],
        "processes": [{
            "name": "P1_epem_mupmum",
            "description": "e+ e- > mu+ mu-",
            "ncolor": 1,
            "nodes": [
                { "kind": "external", "number": 0, "spin": "fermion-out", "leg": 0, "sign": -1 },
                { "kind": "external", "number": 1, "spin": "fermion-in", "leg": 1, "sign": 1 },
                { "kind": "external", "number": 2, "spin": "fermion-in", "leg": 2, "sign": 1 },
                { "kind": "external", "number": 3, "spin": "fermion-out", "leg": 3, "sign": -1 },
                { "kind": "internal", "number": 4, "spin": "vector", "mothers": [1, 0],
                  "lorentz": "FFV1P0", "couplings": ["GC_3"] },
                { "kind": "amplitude", "number": 0, "mothers": [2, 3, 4],
                  "lorentz": "FFV1", "couplings": ["-GC_3"],
                  "color": [{ "jamp": 0, "negative": true, "imaginary": true, "numerator": 1, "denominator": 3 }] }
            ]
        }]
    }"#;

    fn scaffolds(target: Target) -> ScaffoldSet {
        let mut set = ScaffoldSet::new();
        for unit in [Unit::SharedHeader, Unit::SharedSource, Unit::Process] {
            set.insert(
                ScaffoldKey::new(target, unit, Part::Header),
                format!("// %(file)s ({})\n", unit.name()),
            );
            set.insert(ScaffoldKey::new(target, unit, Part::Footer), "// end %(model)s\n");
        }
        set
    }

    #[test]
    fn missing_scaffold_fails_at_construction() {
        let model = Model::from_json(MODEL).unwrap();
        let mut set = scaffolds(Target::Cpp);
        set.insert(ScaffoldKey::new(Target::Cuda, Unit::Process, Part::Header), "");
        assert!(matches!(
            ModelConverter::new(&model, &CUDA, &set),
            Err(ConvertError::MissingScaffold { .. })
        ));
    }

    #[test]
    fn process_kernel_orders_and_binds_calls() {
        let model = Model::from_json(MODEL).unwrap();
        let set = scaffolds(Target::Cpp);
        let mut conv = ModelConverter::new(&model, &CPP, &set).unwrap();
        let text = conv.emit_process_kernel(&model.processes[0]).unwrap();

        assert!(text.starts_with("// P1_epem_mupmum.cc (process)\n"), "{text}");
        assert!(text.ends_with("// end sm_ee\n"), "{text}");
        assert!(text.contains("// Process: e+ e- > mu+ mu-"));
        assert!(text.contains(
            "void calculate_wavefunctions_P1_epem_mupmum( const double* momenta, const int* cHel, \
             const std::complex<double>* COUPs, std::complex<double>* jamp )"
        ));
        assert!(text.contains("  std::complex<double> w[5][6];"));
        assert!(text.contains("  const std::complex<double> cI = std::complex<double>( 0., 1. );"));

        let w4 = text.find("FFV1P0_3( w[0], w[1], COUPs[0], 0., 0., w[4] );").unwrap();
        let amp = text.find("FFV1_0( w[3], w[2], w[4], -COUPs[0], &amp[0] );").unwrap();
        let w0 = text.find("oxxxxx( momenta, 0., cHel[0], -1, w[0], 0 );").unwrap();
        assert!(w0 < w4 && w4 < amp);
        assert!(text.contains("jamp[0] -= 1. / 3. * cI * amp[0];"));
    }

    #[test]
    fn shared_kernels_declare_and_define_each_routine_once() {
        let model = Model::from_json(MODEL).unwrap();
        let set = scaffolds(Target::Cuda);
        let mut conv = ModelConverter::new(&model, &CUDA, &set).unwrap();
        let files = conv.emit_shared_kernels().unwrap();

        let names: Vec<&str> = files.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["HelAmps_sm_ee.cu", "HelAmps_sm_ee.h"]);

        let header = &files["HelAmps_sm_ee.h"];
        assert!(header.contains("__device__ constexpr fptype mdl_MZ = 91.188;"));
        assert!(header.contains("__device__ void compute_couplings( cxtype* COUPs );"));
        assert_eq!(header.matches("void FFV1_0(").count(), 1);
        assert_eq!(header.matches("void FFV1P0_3(").count(), 1);
        assert!(!header.contains("oxxxxx"));

        let source = &files["HelAmps_sm_ee.cu"];
        assert!(source.contains("  COUPs[0] = -(mdl_ee * cI); // GC_3"));
        assert!(!source.contains("GC_1"));
        assert!(source.contains("  const cxtype COUP = cxtype( COUP_re, COUP_im );"));
        assert!(source.contains("  V3[2] = cI * COUP;"));
        // FFV1 body does not use cI; FFV1P0 and compute_couplings do
        assert_eq!(source.matches("const cxtype cI = cxtype( 0., 1. );").count(), 2);
    }

    #[test]
    fn missing_lorentz_routine_is_unknown_reference() {
        let mut model = Model::from_json(MODEL).unwrap();
        model.lorentz.retain(|l| l.name != "FFV1P0");
        let set = scaffolds(Target::Cpp);
        let mut conv = ModelConverter::new(&model, &CPP, &set).unwrap();
        match conv.emit_shared_kernels() {
            Err(ConvertError::UnknownReference { kind, name, .. }) => {
                assert_eq!(kind, "Lorentz structure");
                assert_eq!(name, "FFV1P0");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn vector_target_keeps_parameters_and_momenta_scalar() {
        let model = Model::from_json(MODEL).unwrap();
        let set = scaffolds(Target::Simd);
        let mut conv = ModelConverter::new(&model, &SIMD, &set).unwrap();
        let files = conv.emit_shared_kernels().unwrap();
        let header = &files["HelAmps_sm_ee.h"];
        assert!(header.contains("constexpr fptype mdl_MZ = 91.188;"), "{header}");
        assert!(
            header.contains("const fptype M3, const fptype W3, cxtype_v V3[] )"),
            "{header}"
        );
        assert!(!header.contains("fptype_v"), "{header}");

        let text = conv.emit_process_kernel(&model.processes[0]).unwrap();
        assert!(text.contains("( const fptype* momenta, const int* cHel, "), "{text}");
        assert!(text.contains("  cxtype_v w[5][6];"), "{text}");
    }

    #[test]
    fn one_routine_name_with_two_prototypes_is_rejected() {
        let model = Model::from_json(
            r#"{
            "name": "clash",
            "couplings": [{ "name": "GC_1", "expression": "mdl_ee" }],
            "lorentz": [{ "name": "L1", "routines": [{ "offshell": 0, "body": "(*vertex) = COUP;" }] }],
            "processes": [
                { "name": "P1_ffv", "nodes": [
                    { "kind": "external", "number": 0, "spin": "fermion-out", "leg": 0, "sign": -1 },
                    { "kind": "external", "number": 1, "spin": "fermion-in", "leg": 1, "sign": 1 },
                    { "kind": "external", "number": 2, "spin": "vector", "leg": 2, "sign": 1 },
                    { "kind": "amplitude", "number": 0, "mothers": [0, 1, 2],
                      "lorentz": "L1", "couplings": ["GC_1"], "color": [{ "jamp": 0 }] }
                ] },
                { "name": "P2_vvv", "nodes": [
                    { "kind": "external", "number": 0, "spin": "vector", "leg": 0, "sign": -1 },
                    { "kind": "external", "number": 1, "spin": "vector", "leg": 1, "sign": -1 },
                    { "kind": "external", "number": 2, "spin": "vector", "leg": 2, "sign": 1 },
                    { "kind": "amplitude", "number": 0, "mothers": [0, 1, 2],
                      "lorentz": "L1", "couplings": ["GC_1"], "color": [{ "jamp": 0 }] }
                ] }
            ]
        }"#,
        )
        .unwrap();
        let set = scaffolds(Target::Cpp);
        let mut conv = ModelConverter::new(&model, &CPP, &set).unwrap();
        match conv.emit_shared_kernels() {
            Err(ConvertError::RoutineConflict { routine, first, second, site }) => {
                assert_eq!(routine, "L1_0");
                assert_eq!(first.to_string(), "L1(fermion-out, fermion-in, vector) -> amplitude");
                assert_eq!(second.to_string(), "L1(vector, vector, vector) -> amplitude");
                assert_eq!(site, "amp[0] in process 'P2_vvv'");
            }
            other => panic!("unexpected {other:?}"),
        }

        // The process kernel alone hits the same check.
        let mut conv = ModelConverter::new(&model, &CPP, &set).unwrap();
        conv.emit_process_kernel(&model.processes[0]).unwrap();
        assert!(matches!(
            conv.emit_process_kernel(&model.processes[1]),
            Err(ConvertError::RoutineConflict { .. })
        ));
    }

    #[test]
    fn cache_is_shared_between_operations() {
        let model = Model::from_json(MODEL).unwrap();
        let set = scaffolds(Target::Cpp);
        let mut conv = ModelConverter::new(&model, &CPP, &set).unwrap();
        conv.emit_shared_kernels().unwrap();
        let misses = conv.synthesizer().stats().misses;
        conv.emit_process_kernel(&model.processes[0]).unwrap();
        assert_eq!(conv.synthesizer().stats().misses, misses);
    }

    #[test]
    fn colour_factors() {
        let mut term = ColorTerm {
            jamp: 1,
            negative: false,
            imaginary: false,
            numerator: 1,
            denominator: 1,
        };
        assert_eq!(color_factor(&term), "");
        term.numerator = 2;
        assert_eq!(color_factor(&term), "2. * ");
        term.denominator = 9;
        assert_eq!(color_factor(&term), "2. / 9. * ");

        let node = Node::Amplitude(AmplitudeNode {
            number: 7,
            mothers: vec![],
            vertex: Vertex {
                lorentz: "VVV1".into(),
                couplings: vec!["GC_10".into()],
            },
            color: vec![term],
        });
        let resolved = ResolvedNode {
            process: "P",
            node: &node,
            mothers: vec![],
        };
        assert_eq!(color_statements(&resolved), vec!["jamp[1] += 2. / 9. * amp[7];"]);
    }

    #[test]
    fn identifier_detection_respects_boundaries() {
        assert!(uses_identifier("a * cI", "cI"));
        assert!(uses_identifier("(cI)", "cI"));
        assert!(!uses_identifier("cIm + x", "cI"));
        assert!(!uses_identifier("mdl_cI", "cI"));
        assert!(!uses_identifier("", "cI"));
    }
}
