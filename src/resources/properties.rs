//! Property Descriptors
//!
//! Every pass exposes its tunables as a declarative table of
//! [`PropertyDescriptor`]s backed by a [`PropertySet`]. The table is the
//! single source of truth; three independent adapters read it:
//!
//! | Adapter | Reads | Produces |
//! |---------|-------|----------|
//! | [`uniform_table`] | `PropertyKind::Uniform` | [`UniformTable`] for the pass material |
//! | [`define_table`] | `PropertyKind::Define` | [`ShaderDefines`] (text-affecting) |
//! | [`ui_controls`] | all | [`UiControl`] list for an external editor |
//! | [`to_json`] / [`load_json`] | all | plain key/value object for scene files |
//!
//! `Plain` properties only steer CPU-side pass logic.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut props = PropertySet::new(vec![
//!     PropertyDescriptor::uniform("intensity", "intensity", 0.2).range(0.0, 3.0),
//!     PropertyDescriptor::define("step_count", "SSR_STEP_COUNT", 16_i64).range(1.0, 32.0),
//!     PropertyDescriptor::plain("debug", false),
//! ]);
//!
//! props.set("intensity", PropertyValue::Float(1.5))?;
//! let uniforms = uniform_table(&props);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::shader_defines::ShaderDefines;
use super::uniforms::UniformTable;
use super::version_tracker::ChangeTracker;
use crate::errors::{PipelineError, Result};

// ─── Values ───────────────────────────────────────────────────────────────────

/// A property value. Serialized untagged, so it maps onto plain JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl PropertyValue {
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            Self::Float(v) => Some(v),
            Self::Int(v) => Some(v as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "a boolean",
            Self::Int(_) => "an integer",
            Self::Float(_) => "a number",
            Self::Text(_) => "a string",
        }
    }

    /// Converts `value` to this value's type, accepting integers for floats.
    fn coerce(&self, value: PropertyValue) -> Option<PropertyValue> {
        match (self, value) {
            (Self::Bool(_), v @ Self::Bool(_))
            | (Self::Int(_), v @ Self::Int(_))
            | (Self::Float(_), v @ Self::Float(_))
            | (Self::Text(_), v @ Self::Text(_)) => Some(v),
            (Self::Float(_), Self::Int(i)) => Some(Self::Float(i as f64)),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

// ─── Descriptors ──────────────────────────────────────────────────────────────

/// Where a property's value flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKind {
    /// Uploaded as a uniform; never triggers a recompile.
    Uniform,
    /// Emitted as a shader define; changes program text.
    Define,
    /// CPU-side only.
    Plain,
}

/// Inclusive numeric range with an optional UI step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PropertyRange {
    pub min: f64,
    pub max: f64,
    pub step: Option<f64>,
}

/// Declaration of one property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDescriptor {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: PropertyKind,
    /// Uniform or define name the value binds to. Equals `name` for plain
    /// properties.
    pub binding: &'static str,
    pub range: Option<PropertyRange>,
    pub default: PropertyValue,
}

impl PropertyDescriptor {
    fn build(
        kind: PropertyKind,
        name: &'static str,
        binding: &'static str,
        default: impl Into<PropertyValue>,
    ) -> Self {
        Self {
            name,
            label: name,
            kind,
            binding,
            range: None,
            default: default.into(),
        }
    }

    #[must_use]
    pub fn uniform(
        name: &'static str,
        binding: &'static str,
        default: impl Into<PropertyValue>,
    ) -> Self {
        Self::build(PropertyKind::Uniform, name, binding, default)
    }

    #[must_use]
    pub fn define(
        name: &'static str,
        binding: &'static str,
        default: impl Into<PropertyValue>,
    ) -> Self {
        Self::build(PropertyKind::Define, name, binding, default)
    }

    #[must_use]
    pub fn plain(name: &'static str, default: impl Into<PropertyValue>) -> Self {
        Self::build(PropertyKind::Plain, name, name, default)
    }

    #[must_use]
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some(PropertyRange {
            min,
            max,
            step: self.range.and_then(|r| r.step),
        });
        self
    }

    #[must_use]
    pub fn step(mut self, step: f64) -> Self {
        if let Some(range) = self.range.as_mut() {
            range.step = Some(step);
        }
        self
    }

    #[must_use]
    pub fn label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    fn validate(&self, value: PropertyValue) -> Result<PropertyValue> {
        let value = self
            .default
            .coerce(value)
            .ok_or_else(|| PipelineError::PropertyType {
                name: self.name.to_string(),
                expected: self.default.type_name(),
            })?;

        if let (Some(range), Some(v)) = (self.range, value.as_f64())
            && !(range.min..=range.max).contains(&v)
        {
            return Err(PipelineError::PropertyOutOfRange {
                name: self.name.to_string(),
                value: v,
                min: range.min,
                max: range.max,
            });
        }
        Ok(value)
    }
}

// ─── Property Set ─────────────────────────────────────────────────────────────

/// Values for a fixed descriptor table.
#[derive(Debug, Clone)]
pub struct PropertySet {
    descriptors: Vec<PropertyDescriptor>,
    values: Vec<PropertyValue>,
    version: ChangeTracker,
}

impl PropertySet {
    #[must_use]
    pub fn new(descriptors: Vec<PropertyDescriptor>) -> Self {
        let values = descriptors.iter().map(|d| d.default.clone()).collect();
        Self {
            descriptors,
            values,
            version: ChangeTracker::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn descriptors(&self) -> &[PropertyDescriptor] {
        &self.descriptors
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.descriptors
            .iter()
            .position(|d| d.name == name)
            .ok_or_else(|| PipelineError::UnknownProperty(name.to_string()))
    }

    #[must_use]
    pub fn descriptor(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.descriptors.iter().find(|d| d.name == name)
    }

    pub fn get(&self, name: &str) -> Result<&PropertyValue> {
        Ok(&self.values[self.index_of(name)?])
    }

    /// Validates and stores `value`. Returns whether the stored value changed.
    pub fn set(&mut self, name: &str, value: impl Into<PropertyValue>) -> Result<bool> {
        let idx = self.index_of(name)?;
        let value = self.descriptors[idx].validate(value.into())?;
        if self.values[idx] == value {
            return Ok(false);
        }
        self.values[idx] = value;
        self.version.changed();
        Ok(true)
    }

    /// Restores every value to its declared default.
    pub fn reset(&mut self) {
        for (value, desc) in self.values.iter_mut().zip(&self.descriptors) {
            *value = desc.default.clone();
        }
        self.version.changed();
    }

    /// Numeric value of `name`, `0.0` if absent.
    #[must_use]
    pub fn float(&self, name: &str) -> f32 {
        self.get(name)
            .ok()
            .and_then(PropertyValue::as_f64)
            .unwrap_or_default() as f32
    }

    /// Integer value of `name`, `0` if absent.
    #[must_use]
    pub fn int(&self, name: &str) -> i64 {
        self.get(name)
            .ok()
            .and_then(|v| v.as_int().or_else(|| v.as_f64().map(|f| f.round() as i64)))
            .unwrap_or_default()
    }

    /// Boolean value of `name`, `false` if absent.
    #[must_use]
    pub fn flag(&self, name: &str) -> bool {
        self.get(name)
            .ok()
            .and_then(PropertyValue::as_bool)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn text(&self, name: &str) -> &str {
        self.get(name)
            .ok()
            .and_then(PropertyValue::as_text)
            .unwrap_or_default()
    }

    #[inline]
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.version()
    }

    /// Returns `true` if a `Define` property is named `name`.
    #[must_use]
    pub fn is_define(&self, name: &str) -> bool {
        self.descriptor(name)
            .is_some_and(|d| d.kind == PropertyKind::Define)
    }

    fn entries(&self) -> impl Iterator<Item = (&PropertyDescriptor, &PropertyValue)> {
        self.descriptors.iter().zip(&self.values)
    }
}

// ─── Adapters ─────────────────────────────────────────────────────────────────

/// Uniform adapter: every `Uniform` property keyed by its binding.
#[must_use]
pub fn uniform_table(props: &PropertySet) -> UniformTable {
    let mut table = UniformTable::new();
    for (desc, value) in props.entries() {
        if desc.kind != PropertyKind::Uniform {
            continue;
        }
        match *value {
            PropertyValue::Bool(v) => table.set(desc.binding, v),
            PropertyValue::Int(v) => table.set(desc.binding, v as i32),
            PropertyValue::Float(v) => table.set(desc.binding, v as f32),
            PropertyValue::Text(_) => {}
        }
    }
    table
}

/// Define adapter: every `Define` property keyed by its binding.
#[must_use]
pub fn define_table(props: &PropertySet) -> ShaderDefines {
    let mut defines = ShaderDefines::new();
    for (desc, value) in props.entries() {
        if desc.kind != PropertyKind::Define {
            continue;
        }
        match value {
            PropertyValue::Bool(v) => defines.set_bool(desc.binding, *v),
            PropertyValue::Int(v) => defines.set_value(desc.binding, v),
            PropertyValue::Float(v) => defines.set_value(desc.binding, format!("{v:?}")),
            PropertyValue::Text(v) => defines.set(desc.binding, v),
        }
    }
    defines
}

/// Widget an external editor should render for a property.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiWidget {
    Slider { min: f64, max: f64, step: Option<f64> },
    Number,
    Checkbox,
    Text,
}

/// One editor control.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UiControl {
    pub name: &'static str,
    pub label: &'static str,
    pub widget: UiWidget,
    pub value: PropertyValue,
}

/// UI adapter: one control per property, in declaration order.
#[must_use]
pub fn ui_controls(props: &PropertySet) -> Vec<UiControl> {
    props
        .entries()
        .map(|(desc, value)| {
            let widget = match (value, desc.range) {
                (PropertyValue::Bool(_), _) => UiWidget::Checkbox,
                (PropertyValue::Text(_), _) => UiWidget::Text,
                (_, Some(r)) => UiWidget::Slider {
                    min: r.min,
                    max: r.max,
                    step: r.step,
                },
                (_, None) => UiWidget::Number,
            };
            UiControl {
                name: desc.name,
                label: desc.label,
                widget,
                value: value.clone(),
            }
        })
        .collect()
}

/// Serialization adapter: `{ name: value, .. }`.
#[must_use]
pub fn to_json(props: &PropertySet) -> Value {
    let map: Map<String, Value> = props
        .entries()
        .map(|(desc, value)| {
            let json = serde_json::to_value(value).unwrap_or(Value::Null);
            (desc.name.to_string(), json)
        })
        .collect();
    Value::Object(map)
}

/// Loads values written by [`to_json`]. Unknown keys are skipped with a
/// warning. Returns the number of values that changed.
pub fn load_json(props: &mut PropertySet, json: &Value) -> Result<usize> {
    let Value::Object(map) = json else {
        return Err(PipelineError::PropertyType {
            name: "<root>".to_string(),
            expected: "an object",
        });
    };

    let mut changed = 0;
    for (key, raw) in map {
        if props.descriptor(key).is_none() {
            log::warn!("Ignoring unknown property '{key}' while loading");
            continue;
        }
        let value: PropertyValue =
            serde_json::from_value(raw.clone()).map_err(|_| PipelineError::PropertyType {
                name: key.clone(),
                expected: "a boolean, number or string",
            })?;
        if props.set(key, value)? {
            changed += 1;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::uniforms::UniformValue;

    fn sample() -> PropertySet {
        PropertySet::new(vec![
            PropertyDescriptor::uniform("intensity", "bloomIntensity", 0.2).range(0.0, 3.0),
            PropertyDescriptor::define("step_count", "SSR_STEP_COUNT", 16_i64).range(1.0, 32.0),
            PropertyDescriptor::define("inline", "SSR_INLINE", false),
            PropertyDescriptor::plain("debug", false),
        ])
    }

    #[test]
    fn set_validates_range_and_type() {
        let mut props = sample();
        assert!(props.set("intensity", 1.5).unwrap());
        assert!(!props.set("intensity", 1.5).unwrap());
        assert!(matches!(
            props.set("intensity", 9.0),
            Err(PipelineError::PropertyOutOfRange { .. })
        ));
        assert!(matches!(
            props.set("debug", 1.0),
            Err(PipelineError::PropertyType { .. })
        ));
        assert!(matches!(
            props.set("missing", true),
            Err(PipelineError::UnknownProperty(_))
        ));
    }

    #[test]
    fn integer_accepted_for_float_property() {
        let mut props = sample();
        props.set("intensity", 2_i64).unwrap();
        assert!((props.float("intensity") - 2.0).abs() < 1e-6);
    }

    #[test]
    fn adapters_split_by_kind() {
        let props = sample();
        let uniforms = uniform_table(&props);
        assert_eq!(uniforms.len(), 1);
        assert_eq!(
            uniforms.get("bloomIntensity"),
            Some(&UniformValue::Float(0.2))
        );

        let defines = define_table(&props);
        assert_eq!(defines.get("SSR_STEP_COUNT"), Some("16"));
        assert_eq!(defines.get("SSR_INLINE"), Some("0"));
        assert!(!defines.contains("debug"));

        let controls = ui_controls(&props);
        assert_eq!(controls.len(), 4);
        assert_eq!(controls[3].widget, UiWidget::Checkbox);
    }

    #[test]
    fn json_round_trip_restores_values() {
        let mut props = sample();
        props.set("intensity", 0.8).unwrap();
        props.set("inline", true).unwrap();
        let json = to_json(&props);

        let mut fresh = sample();
        let changed = load_json(&mut fresh, &json).unwrap();
        assert_eq!(changed, 2);
        assert!(fresh.flag("inline"));
        assert!((fresh.float("intensity") - 0.8).abs() < 1e-6);
    }

    #[test]
    fn load_json_skips_unknown_keys() {
        let mut props = sample();
        let json = serde_json::json!({ "nonexistent": 3, "debug": true });
        assert_eq!(load_json(&mut props, &json).unwrap(), 1);
    }
}
