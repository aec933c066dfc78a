// pipeline.rs — One model conversion over one or more targets
//
// Runs a `ModelConverter` per target (each with its own call-template cache)
// and collects every emitted unit with its digest, plus provenance for the
// whole run.
//
// Preconditions: `model_source` is the exact text `model` was parsed from.
// Postconditions: `ConversionOutput::files` is ordered by (target, path) and
//                 byte-identical across runs for identical input.
// Failure modes: the first `ConvertError` aborts the whole conversion; two
//                units mapping to one file name → `OutputCollision`.
// Side effects: none (writing files is the caller's business).

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info_span, instrument};

use crate::diag::ConvertError;
use crate::dialect::{Target, TypeTable};
use crate::emit::ModelConverter;
use crate::model::Model;
use crate::scaffold::ScaffoldSet;

// ── Options and results ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub targets: Vec<Target>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            targets: vec![Target::Cpp],
        }
    }
}

/// One emitted source unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFile {
    pub target: Target,
    /// Relative path, `<target>/<file name>`.
    pub path: String,
    #[serde(skip)]
    pub source: String,
    pub sha256: String,
}

/// Provenance metadata for downstream build caches.
///
/// `model_hash`: SHA-256 of the raw model JSON.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provenance {
    pub model_hash: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn new(model_source: &str) -> Self {
        Provenance {
            model_hash: sha256(model_source.as_bytes()),
            compiler_version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Hex string of the model hash (64 characters).
    pub fn model_hash_hex(&self) -> String {
        bytes_to_hex(&self.model_hash)
    }
}

#[derive(Debug, Clone)]
pub struct ConversionOutput {
    pub model: String,
    pub provenance: Provenance,
    pub files: Vec<OutputFile>,
}

#[derive(Serialize)]
struct Manifest<'a> {
    manifest_schema_version: u32,
    model: &'a str,
    model_hash: String,
    compiler_version: &'a str,
    files: &'a [OutputFile],
}

impl ConversionOutput {
    /// Serialize the file list and provenance for `--emit manifest`.
    pub fn manifest_json(&self) -> Result<String, ConvertError> {
        let manifest = Manifest {
            manifest_schema_version: 1,
            model: &self.model,
            model_hash: self.provenance.model_hash_hex(),
            compiler_version: self.provenance.compiler_version,
            files: &self.files,
        };
        let mut json = serde_json::to_string_pretty(&manifest)?;
        json.push('\n');
        Ok(json)
    }

    pub fn file(&self, path: &str) -> Option<&OutputFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

pub(crate) fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

pub(crate) fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        let _ = write!(s, "{:02x}", b);
    }
    s
}

// ── Conversion ──────────────────────────────────────────────────────────────

/// Convert `model` for every requested target.
///
/// Each target owns one converter, so the call-template cache spans every
/// process of the model but never crosses targets.
#[instrument(skip_all, fields(model = %model.name, targets = options.targets.len()))]
pub fn convert_model(
    model: &Model,
    model_source: &str,
    scaffolds: &ScaffoldSet,
    options: &ConvertOptions,
) -> Result<ConversionOutput, ConvertError> {
    let mut targets = options.targets.clone();
    targets.sort();
    targets.dedup();

    // Scaffold completeness is checked for every target before any emission.
    for &target in &targets {
        scaffolds.require_target(target)?;
    }

    let mut files = Vec::new();
    for target in targets {
        let _span = info_span!("target", %target).entered();
        let table = target.dialect();
        let mut converter = ModelConverter::new(model, table, scaffolds)?;

        // Sanitizing can map distinct process names onto one file (and one
        // kernel function); such a model cannot be converted.
        let mut unit_files: BTreeMap<String, String> = converter.emit_shared_kernels()?;
        for process in &model.processes {
            let name = converter.process_file_name(process);
            if unit_files.contains_key(&name) {
                return Err(ConvertError::OutputCollision {
                    path: format!("{target}/{name}"),
                    owner: format!("process '{}'", process.name),
                });
            }
            let text = converter.emit_process_kernel(process)?;
            unit_files.insert(name, text);
        }

        let stats = converter.synthesizer().stats();
        tracing::debug!(hits = stats.hits, misses = stats.misses, "call template cache");

        files.extend(unit_files.into_iter().map(|(name, source)| OutputFile {
            target,
            path: format!("{}/{}", table.target(), name),
            sha256: bytes_to_hex(&sha256(source.as_bytes())),
            source,
        }));
    }

    Ok(ConversionOutput {
        model: model.sanitized_name(),
        provenance: Provenance::new(model_source),
        files,
    })
}
