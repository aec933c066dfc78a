// scaffold.rs — Header/footer fragments wrapped around emitted units
//
// Scaffolds are opaque text fragments keyed by (target, unit, part). The
// converter never interprets them beyond `%(name)s` placeholder substitution.
//
// Preconditions: none.
// Postconditions: `render` returns the fragment with every placeholder bound.
// Failure modes: absent key → `MissingScaffold`; placeholder without a value
//                → `UnboundPlaceholder`; unreadable file → `ScaffoldLoad`.
// Side effects: `load_dir` reads files below one directory.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::diag::ConvertError;
use crate::dialect::Target;

// ── Keys ────────────────────────────────────────────────────────────────────

/// Which emitted file a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Unit {
    /// Shared kernel declarations.
    SharedHeader,
    /// Shared kernel definitions.
    SharedSource,
    /// One per-process kernel.
    Process,
}

pub const ALL_UNITS: [Unit; 3] = [Unit::SharedHeader, Unit::SharedSource, Unit::Process];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Part {
    Header,
    Footer,
    /// Optional block of helper code emitted right after the header.
    Library,
}

impl Unit {
    pub fn name(self) -> &'static str {
        match self {
            Unit::SharedHeader => "shared_h",
            Unit::SharedSource => "shared_src",
            Unit::Process => "process",
        }
    }
}

impl Part {
    pub fn name(self) -> &'static str {
        match self {
            Part::Header => "header",
            Part::Footer => "footer",
            Part::Library => "library",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScaffoldKey {
    pub target: Target,
    pub unit: Unit,
    pub part: Part,
}

impl ScaffoldKey {
    pub fn new(target: Target, unit: Unit, part: Part) -> Self {
        ScaffoldKey { target, unit, part }
    }

    /// File name below the target directory, e.g. `process_footer.inc`.
    pub fn file_name(&self) -> String {
        format!("{}_{}.inc", self.unit.name(), self.part.name())
    }
}

impl fmt::Display for ScaffoldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}_{}", self.target, self.unit.name(), self.part.name())
    }
}

// ── Placeholders ────────────────────────────────────────────────────────────

/// Values available to `%(name)s` placeholders.
pub type Placeholders<'a> = BTreeMap<&'a str, String>;

/// Replace every `%(name)s` in `text` with its bound value.
///
/// A `%(` that does not open a well-formed placeholder is copied verbatim.
/// Returns the first unbound name on failure.
pub fn substitute(text: &str, vars: &Placeholders<'_>) -> Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("%(") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match placeholder_name(after) {
            Some(name) => {
                let value = vars.get(name).ok_or_else(|| name.to_string())?;
                out.push_str(value);
                rest = &after[name.len() + 2..];
            }
            None => {
                out.push_str("%(");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    Ok(out)
}

/// Identifier followed by `)s` at the start of `text`.
fn placeholder_name(text: &str) -> Option<&str> {
    let end = text.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))?;
    if end == 0 || !text[end..].starts_with(")s") {
        return None;
    }
    Some(&text[..end])
}

// ── Scaffold set ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct ScaffoldSet {
    fragments: BTreeMap<ScaffoldKey, String>,
}

impl ScaffoldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ScaffoldKey, text: impl Into<String>) {
        self.fragments.insert(key, text.into());
    }

    pub fn get(&self, key: ScaffoldKey) -> Option<&str> {
        self.fragments.get(&key).map(String::as_str)
    }

    pub fn require(&self, key: ScaffoldKey) -> Result<&str, ConvertError> {
        self.get(key).ok_or(ConvertError::MissingScaffold { key })
    }

    /// Check that every header and footer for `target` is present.
    pub fn require_target(&self, target: Target) -> Result<(), ConvertError> {
        for unit in ALL_UNITS {
            for part in [Part::Header, Part::Footer] {
                self.require(ScaffoldKey::new(target, unit, part))?;
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Render a required fragment with placeholders bound.
    pub fn render(&self, key: ScaffoldKey, vars: &Placeholders<'_>) -> Result<String, ConvertError> {
        let text = self.require(key)?;
        substitute(text, vars).map_err(|name| ConvertError::UnboundPlaceholder {
            owner: format!("scaffold '{key}'"),
            name,
        })
    }

    /// Render an optional fragment; absent keys render as `None`.
    pub fn render_optional(
        &self,
        key: ScaffoldKey,
        vars: &Placeholders<'_>,
    ) -> Result<Option<String>, ConvertError> {
        if self.get(key).is_none() {
            return Ok(None);
        }
        self.render(key, vars).map(Some)
    }

    /// Load `<dir>/<target>/<unit>_<part>.inc` for each target.
    ///
    /// Absent files are skipped; `require_target` reports them later with
    /// the key that is missing.
    pub fn load_dir(dir: &Path, targets: &[Target]) -> Result<ScaffoldSet, ConvertError> {
        let mut set = ScaffoldSet::new();
        for &target in targets {
            for unit in ALL_UNITS {
                for part in [Part::Header, Part::Footer, Part::Library] {
                    let key = ScaffoldKey::new(target, unit, part);
                    let path = dir.join(target.name()).join(key.file_name());
                    match std::fs::read_to_string(&path) {
                        Ok(text) => {
                            debug!(%key, path = %path.display(), "loaded scaffold");
                            set.insert(key, text);
                        }
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(ConvertError::ScaffoldLoad { path, source: e }),
                    }
                }
            }
        }
        Ok(set)
    }
}
