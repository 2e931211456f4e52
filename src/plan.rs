//! Plan state extraction.
//!
//! Flattens the JSON document printed by `show -json <planfile>` into lookup
//! tables for outputs and resource attributes.

use crate::error::ExtractionError;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Outputs and resource attributes of one planned module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanIndex {
    /// `name -> value` for every planned output.
    pub outputs: BTreeMap<String, Value>,
    /// `type.name.attr -> value`, plus `type.name -> values` for the whole mapping.
    pub resources: BTreeMap<String, Value>,
}

impl PlanIndex {
    /// Build the index from `show -json` output.
    ///
    /// Only an unparsable payload is an error. Missing or oddly shaped fields
    /// simply contribute nothing.
    pub fn from_json(bytes: &[u8]) -> Result<Self, ExtractionError> {
        let root: Value = serde_json::from_slice(bytes)?;
        let mut index = PlanIndex::default();

        let Some(planned) = root.get("planned_values") else {
            return Ok(index);
        };

        if let Some(outputs) = planned.get("outputs").and_then(Value::as_object) {
            for (name, wrapper) in outputs {
                if let Some(value) = wrapper.as_object().and_then(|w| w.get("value")) {
                    index.outputs.insert(name.clone(), value.clone());
                }
            }
        }

        if let Some(root_module) = planned.get("root_module") {
            index.collect_resources(root_module);
        }

        Ok(index)
    }

    fn collect_resources(&mut self, module: &Value) {
        let Some(module) = module.as_object() else {
            return;
        };

        for resource in array_field(module, "resources") {
            let Some(resource) = resource.as_object() else {
                continue;
            };
            let resource_type = resource.get("type").and_then(Value::as_str).unwrap_or_default();
            let name = resource.get("name").and_then(Value::as_str).unwrap_or_default();
            let values = resource
                .get("values")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();

            for (attr, value) in &values {
                self.resources
                    .insert(format!("{resource_type}.{name}.{attr}"), value.clone());
            }
            self.resources
                .insert(format!("{resource_type}.{name}"), Value::Object(values));
        }

        for child in array_field(module, "child_modules") {
            self.collect_resources(child);
        }
    }

    pub fn output(&self, name: &str) -> Option<&Value> {
        self.outputs.get(name)
    }

    /// Look up a resource attribute, or the whole mapping when `attribute` is `None`.
    ///
    /// A dotted attribute such as `tags.Name` or `ingress.0.from_port` that has
    /// no flat entry is walked into the top-level attribute's value.
    pub fn resource(&self, resource_type: &str, name: &str, attribute: Option<&str>) -> Option<Value> {
        let base = format!("{resource_type}.{name}");
        let Some(attribute) = attribute else {
            return self.resources.get(&base).cloned();
        };

        if let Some(value) = self.resources.get(&format!("{base}.{attribute}")) {
            return Some(value.clone());
        }

        let mut segments = attribute.split('.');
        let head = segments.next()?;
        let mut current = self.resources.get(&format!("{base}.{head}"))?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current.clone())
    }
}

fn array_field<'a>(object: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}
