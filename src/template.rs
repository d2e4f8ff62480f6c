//! CloudFormation template loading
//!
//! Accepts JSON or YAML text. Both are read into a `serde_yaml::Value` first
//! so declaration order of `Resources` survives, then converted to
//! `serde_json::Value`. YAML short-form intrinsics (`!Ref`, `!GetAtt`,
//! `!Sub`, ...) are folded into their long JSON form so two templates that
//! differ only in notation compare equal.

use crate::error::{CostError, Result};
use crate::model::{Properties, Resource};
use serde_json::{Map, Number, Value};
use serde_yaml::value::TaggedValue;
use std::path::Path;

/// Parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub description: Option<String>,
    pub parameters: Properties,
    /// In declaration order
    pub resources: Vec<Resource>,
}

/// Read and parse a template file
pub fn load_template(path: &Path) -> Result<Template> {
    let text = std::fs::read_to_string(path)?;
    parse_template(&text)
        .map_err(|e| CostError::Template(format!("{}: {}", path.display(), e)))
}

/// Parse template text; JSON when it starts with `{`, YAML otherwise
pub fn parse_template(text: &str) -> Result<Template> {
    let raw: serde_yaml::Value = if text.trim_start().starts_with('{') {
        serde_json::from_str(text)?
    } else {
        serde_yaml::from_str(text)?
    };

    let serde_yaml::Value::Mapping(mut root) = raw else {
        return Err(CostError::Template("template root is not a mapping".to_string()));
    };

    let description = root
        .get("Description")
        .and_then(serde_yaml::Value::as_str)
        .map(str::to_string);
    let parameters = match root.remove("Parameters").map(to_json) {
        Some(Value::Object(params)) => params,
        _ => Properties::new(),
    };

    // Walk the YAML mapping directly; a JSON object would not keep declaration order
    let resources = match root.remove("Resources") {
        Some(serde_yaml::Value::Mapping(resources)) => resources,
        Some(_) => return Err(CostError::Template("Resources is not a mapping".to_string())),
        None => return Err(CostError::Template("template has no Resources section".to_string())),
    };

    let resources = resources
        .into_iter()
        .map(|(logical_id, body)| resource_from(key_string(logical_id), to_json(body)))
        .collect::<Result<Vec<_>>>()?;

    Ok(Template {
        description,
        parameters,
        resources,
    })
}

fn resource_from(logical_id: String, body: Value) -> Result<Resource> {
    let Value::Object(mut body) = body else {
        return Err(CostError::Template(format!(
            "resource '{}' is not a mapping",
            logical_id
        )));
    };

    let resource_type = match body.remove("Type") {
        Some(Value::String(t)) => t,
        _ => {
            return Err(CostError::Template(format!(
                "resource '{}' has no Type",
                logical_id
            )))
        }
    };

    let properties = match body.remove("Properties") {
        None | Some(Value::Null) => Properties::new(),
        Some(Value::Object(props)) => props,
        Some(_) => {
            return Err(CostError::Template(format!(
                "Properties of resource '{}' is not a mapping",
                logical_id
            )))
        }
    };

    Ok(Resource::new(logical_id, resource_type, properties))
}

fn to_json(value: serde_yaml::Value) -> Value {
    use serde_yaml::Value as Yaml;

    match value {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => yaml_number(&n),
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(to_json).collect()),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                map.insert(key_string(key), to_json(value));
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => intrinsic(*tagged),
    }
}

fn yaml_number(n: &serde_yaml::Number) -> Value {
    if let Some(i) = n.as_i64() {
        Value::Number(i.into())
    } else if let Some(u) = n.as_u64() {
        Value::Number(u.into())
    } else {
        n.as_f64()
            .and_then(Number::from_f64)
            .map_or(Value::Null, Value::Number)
    }
}

fn key_string(key: serde_yaml::Value) -> String {
    match key {
        serde_yaml::Value::String(s) => s,
        serde_yaml::Value::Bool(b) => b.to_string(),
        serde_yaml::Value::Number(n) => n.to_string(),
        other => serde_yaml::to_string(&other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Long form of a short-form intrinsic function tag
fn intrinsic(tagged: TaggedValue) -> Value {
    let tag = tagged.tag.to_string();
    let name = tag.trim_start_matches('!');
    let value = to_json(tagged.value);

    let (key, value) = match name {
        "Ref" | "Condition" => (name.to_string(), value),
        "GetAtt" => {
            // !GetAtt Resource.Attribute is the scalar spelling of a two-element list
            let value = match value {
                Value::String(s) => match s.split_once('.') {
                    Some((resource, attribute)) => {
                        Value::Array(vec![Value::from(resource), Value::from(attribute)])
                    }
                    None => Value::String(s),
                },
                other => other,
            };
            ("Fn::GetAtt".to_string(), value)
        }
        _ => (format!("Fn::{}", name), value),
    };

    let mut map = Map::new();
    map.insert(key, value);
    Value::Object(map)
}
