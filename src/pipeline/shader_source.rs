//! Slot-Based Shader Composition
//!
//! Base shaders are parsed into a [`ShaderTemplate`]: literal text
//! interleaved with named **slots**. Every line of the form
//! `#include <name>` or `#pragma <name>` becomes a slot whose default
//! content is the line itself, so an unpatched slot renders unchanged and
//! the downstream include resolver still sees it.
//!
//! Extensions never search and replace raw text. They edit slots through a
//! [`ShaderBuilder`]:
//!
//! | Edit | Effect | Slot afterwards |
//! |------|--------|-----------------|
//! | `prepend(slot, text)` | text before the slot content | open |
//! | `append(slot, text)` | text after the slot content | open |
//! | `replace(slot, text)` | swaps the slot content | open |
//! | `consume(slot, text)` | swaps the content and closes the slot | closed |
//! | `remove(slot)` | drops content and edits | closed |
//!
//! Edits to a closed or missing slot are no-ops reported through the
//! return value and a `debug!` log line. This is the one ordering hazard of
//! the scheme: when an extension consumes a slot that a later extension
//! also edits, the later edit is dropped. Priorities are the only
//! mitigation.
//!
//! ```text
//! template:   "#include <common>"   "void main() {"   "#include <output>"
//!                    │                                      │
//! edits:      append("common", A)                   prepend("output", B)
//!                    ▼                                      ▼
//! rendered:   "#include <common>\nA" "void main() {" "B\n#include <output>"
//! ```

use rustc_hash::FxHashMap;
use xxhash_rust::xxh3::xxh3_64;

use crate::resources::ShaderDefines;

// ─── Template ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Slot(String),
}

/// A parsed shader stage: text with named slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderTemplate {
    segments: Vec<Segment>,
    /// Default content per slot: the marker line itself.
    defaults: FxHashMap<String, String>,
}

/// Extracts the slot name from `#include <name>` / `#pragma <name>`.
fn marker_name(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    let rest = trimmed
        .strip_prefix("#include")
        .or_else(|| trimmed.strip_prefix("#pragma"))?
        .trim_start();
    let name = rest.strip_prefix('<')?.strip_suffix('>')?.trim();
    (!name.is_empty()).then_some(name)
}

impl ShaderTemplate {
    /// Parses `source`, turning every marker line into a slot.
    #[must_use]
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut defaults = FxHashMap::default();
        let mut text = String::new();

        for line in source.lines() {
            if let Some(name) = marker_name(line) {
                if !text.is_empty() {
                    segments.push(Segment::Text(std::mem::take(&mut text)));
                }
                defaults
                    .entry(name.to_string())
                    .or_insert_with(|| line.trim().to_string());
                segments.push(Segment::Slot(name.to_string()));
            } else {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(line);
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Self { segments, defaults }
    }

    #[must_use]
    pub fn has_slot(&self, name: &str) -> bool {
        self.defaults.contains_key(name)
    }

    /// Slot names in source order (duplicates included).
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Slot(name) => Some(name.as_str()),
            Segment::Text(_) => None,
        })
    }
}

// ─── Builder ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
struct SlotEdit {
    before: Vec<String>,
    content: Option<String>,
    after: Vec<String>,
    closed: bool,
}

/// Edits against one shader stage.
#[derive(Debug, Clone)]
pub struct StageBuilder<'t> {
    template: &'t ShaderTemplate,
    edits: FxHashMap<String, SlotEdit>,
    current: &'static str,
}

impl<'t> StageBuilder<'t> {
    fn new(template: &'t ShaderTemplate) -> Self {
        Self {
            template,
            edits: FxHashMap::default(),
            current: "",
        }
    }

    /// Returns `true` if `slot` exists and is still open.
    #[must_use]
    pub fn is_open(&self, slot: &str) -> bool {
        self.template.has_slot(slot) && !self.edits.get(slot).is_some_and(|e| e.closed)
    }

    fn open_edit(&mut self, slot: &str, op: &str) -> Option<&mut SlotEdit> {
        if !self.is_open(slot) {
            log::debug!(
                "Shader edit '{op}' on slot <{slot}> by '{}' ignored: slot is closed or missing",
                self.current
            );
            return None;
        }
        Some(self.edits.entry(slot.to_string()).or_default())
    }

    /// Inserts `text` before the slot content. Later prepends land closer
    /// to the content.
    pub fn prepend(&mut self, slot: &str, text: &str) -> bool {
        self.open_edit(slot, "prepend")
            .map(|e| e.before.push(text.to_string()))
            .is_some()
    }

    /// Inserts `text` after the slot content, in call order.
    pub fn append(&mut self, slot: &str, text: &str) -> bool {
        self.open_edit(slot, "append")
            .map(|e| e.after.push(text.to_string()))
            .is_some()
    }

    /// Replaces the slot content, keeping the slot open.
    pub fn replace(&mut self, slot: &str, text: &str) -> bool {
        self.open_edit(slot, "replace")
            .map(|e| e.content = Some(text.to_string()))
            .is_some()
    }

    /// Replaces the slot content and closes the slot.
    pub fn consume(&mut self, slot: &str, text: &str) -> bool {
        self.open_edit(slot, "consume")
            .map(|e| {
                e.content = Some(text.to_string());
                e.closed = true;
            })
            .is_some()
    }

    /// Drops the slot and every edit made to it, closing it.
    pub fn remove(&mut self, slot: &str) -> bool {
        self.open_edit(slot, "remove")
            .map(|e| {
                e.before.clear();
                e.after.clear();
                e.content = Some(String::new());
                e.closed = true;
            })
            .is_some()
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut push = |s: &str| {
            if s.is_empty() {
                return;
            }
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(s);
        };

        for segment in &self.template.segments {
            match segment {
                Segment::Text(text) => push(text),
                Segment::Slot(name) => {
                    let default = self
                        .template
                        .defaults
                        .get(name)
                        .map_or("", String::as_str);
                    match self.edits.get(name) {
                        None => push(default),
                        Some(edit) => {
                            for text in &edit.before {
                                push(text);
                            }
                            push(edit.content.as_deref().unwrap_or(default));
                            for text in &edit.after {
                                push(text);
                            }
                        }
                    }
                }
            }
        }
        out
    }
}

/// Edits against both stages of a program, handed to extensions.
#[derive(Debug, Clone)]
pub struct ShaderBuilder<'t> {
    pub vertex: StageBuilder<'t>,
    pub fragment: StageBuilder<'t>,
}

impl<'t> ShaderBuilder<'t> {
    #[must_use]
    pub fn new(source: &'t ShaderSource) -> Self {
        Self {
            vertex: StageBuilder::new(&source.vertex),
            fragment: StageBuilder::new(&source.fragment),
        }
    }

    /// Names the extension whose edits follow, for diagnostics.
    pub fn begin_extension(&mut self, name: &'static str) {
        self.vertex.current = name;
        self.fragment.current = name;
    }

    /// Renders both stages with `defines` as a preamble.
    #[must_use]
    pub fn compose(&self, defines: &ShaderDefines) -> ComposedShader {
        ComposedShader::new(defines, self.vertex.render(), self.fragment.render())
    }
}

// ─── Source & Output ──────────────────────────────────────────────────────────

/// A base program: vertex and fragment templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSource {
    pub name: String,
    pub vertex: ShaderTemplate,
    pub fragment: ShaderTemplate,
}

impl ShaderSource {
    #[must_use]
    pub fn new(name: &str, vertex: &str, fragment: &str) -> Self {
        Self {
            name: name.to_string(),
            vertex: ShaderTemplate::parse(vertex),
            fragment: ShaderTemplate::parse(fragment),
        }
    }
}

/// Final program text handed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedShader {
    pub vertex: String,
    pub fragment: String,
    hash: u64,
}

impl ComposedShader {
    #[must_use]
    pub fn new(defines: &ShaderDefines, vertex: String, fragment: String) -> Self {
        let preamble = defines.to_preamble();
        let vertex = format!("{preamble}{vertex}");
        let fragment = format!("{preamble}{fragment}");
        let hash = xxh3_64(vertex.as_bytes()) ^ xxh3_64(fragment.as_bytes()).rotate_left(1);
        Self {
            vertex,
            fragment,
            hash,
        }
    }

    /// xxh3 hash of both stages.
    #[inline]
    #[must_use]
    pub fn source_hash(&self) -> u64 {
        self.hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAG: &str =
        "#include <common>\nvoid main() {\n#pragma <body>\n#include <output_fragment>\n}";

    fn source() -> ShaderSource {
        ShaderSource::new("test", "void main() {}", FRAG)
    }

    #[test]
    fn parse_finds_both_marker_styles() {
        let t = ShaderTemplate::parse(FRAG);
        let slots: Vec<_> = t.slots().collect();
        assert_eq!(slots, ["common", "body", "output_fragment"]);
        assert!(!t.has_slot("main"));
    }

    #[test]
    fn unedited_template_renders_source() {
        let src = source();
        let builder = ShaderBuilder::new(&src);
        let shader = builder.compose(&ShaderDefines::new());
        assert_eq!(shader.fragment, FRAG);
    }

    #[test]
    fn edits_land_around_slot() {
        let src = source();
        let mut b = ShaderBuilder::new(&src);
        assert!(b.fragment.append("common", "uniform float a;"));
        assert!(b.fragment.prepend("output_fragment", "color *= a;"));
        assert!(b.fragment.replace("body", "color = vec4(1.0);"));

        let out = b.compose(&ShaderDefines::new()).fragment;
        assert_eq!(
            out,
            "#include <common>\nuniform float a;\nvoid main() {\ncolor = vec4(1.0);\ncolor *= a;\n#include <output_fragment>\n}"
        );
    }

    #[test]
    fn consumed_slot_rejects_later_edits() {
        let src = source();
        let mut b = ShaderBuilder::new(&src);
        b.begin_extension("first");
        assert!(b.fragment.consume("body", "first();"));
        b.begin_extension("second");
        assert!(!b.fragment.append("body", "second();"));
        assert!(!b.fragment.replace("missing", "x"));

        let out = b.compose(&ShaderDefines::new()).fragment;
        assert!(out.contains("first();"));
        assert!(!out.contains("second();"));
    }

    #[test]
    fn defines_change_source_hash() {
        let src = source();
        let b = ShaderBuilder::new(&src);
        let mut defines = ShaderDefines::new();
        let h0 = b.compose(&defines).source_hash();
        defines.set("EXTRA", "1");
        let h1 = b.compose(&defines).source_hash();
        assert_ne!(h0, h1);
        assert!(b.compose(&defines).fragment.starts_with("#define EXTRA 1\n"));
    }
}
