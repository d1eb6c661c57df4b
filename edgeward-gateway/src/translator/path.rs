//! Path patterns selecting identifier fields in a JSON payload.
//!
//! Grammar: dot-separated segments, each an object key, `*` (every key of
//! an object or every element of an array), or a key followed by `[n]` /
//! `[*]` selectors. A leading `$.` is ignored. The last segment must be a
//! plain key: the identifier field itself.
//!
//! ```text
//! properties.items[*].contractId
//! $.groups.items[0].parentGroupId
//! *.contractId
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Wildcard,
    Index(usize),
    AnyIndex,
}

/// One step from the payload root to a matched object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    Key(String),
    Index(usize),
}

/// A field matched by a pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    /// Steps to the object holding the field.
    pub parent: Vec<Step>,
    pub field: String,
    /// Identifier value rendered as a string.
    pub raw_id: String,
}

/// Compiled path pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PathPattern {
    raw: String,
    segments: Vec<Segment>,
    field: String,
}

impl PathPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("$.")
            .or_else(|| trimmed.strip_prefix('$'))
            .unwrap_or(trimmed);
        if body.is_empty() {
            return Err("empty path pattern".to_string());
        }

        let mut segments = Vec::new();
        let parts: Vec<&str> = body.split('.').collect();
        for (i, part) in parts.iter().enumerate() {
            let last = i + 1 == parts.len();
            if part.is_empty() {
                return Err(format!("empty segment in '{}'", raw));
            }
            if *part == "*" {
                if last {
                    return Err(format!("'{}' must end with a field name", raw));
                }
                segments.push(Segment::Wildcard);
                continue;
            }

            let (key, mut selectors) = match part.find('[') {
                Some(at) => (&part[..at], &part[at..]),
                None => (*part, ""),
            };
            if key.contains([']', '*']) {
                return Err(format!("invalid key '{}' in '{}'", key, raw));
            }
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            if last && (!selectors.is_empty() || key.is_empty()) {
                return Err(format!("'{}' must end with a field name", raw));
            }
            while !selectors.is_empty() {
                let inner_end = selectors
                    .find(']')
                    .ok_or_else(|| format!("unclosed '[' in '{}'", raw))?;
                if !selectors.starts_with('[') {
                    return Err(format!("unexpected '{}' in '{}'", selectors, raw));
                }
                let inner = &selectors[1..inner_end];
                if inner == "*" {
                    segments.push(Segment::AnyIndex);
                } else {
                    let index = inner
                        .parse::<usize>()
                        .map_err(|_| format!("invalid index '[{}]' in '{}'", inner, raw))?;
                    segments.push(Segment::Index(index));
                }
                selectors = &selectors[inner_end + 1..];
            }
        }

        // The final segment is always a Key after the checks above.
        let field = match segments.pop() {
            Some(Segment::Key(field)) => field,
            _ => return Err(format!("'{}' must end with a field name", raw)),
        };

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
            field,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The identifier field name.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// Every string or numeric identifier the pattern selects.
    pub fn find(&self, root: &Value) -> Vec<FieldMatch> {
        let mut out = Vec::new();
        let mut trail = Vec::new();
        self.walk(root, 0, &mut trail, &mut out);
        out
    }

    fn walk(&self, value: &Value, depth: usize, trail: &mut Vec<Step>, out: &mut Vec<FieldMatch>) {
        let Some(segment) = self.segments.get(depth) else {
            if let Some(raw_id) = value.as_object().and_then(|o| o.get(&self.field)).and_then(id_string) {
                out.push(FieldMatch {
                    parent: trail.clone(),
                    field: self.field.clone(),
                    raw_id,
                });
            }
            return;
        };

        match (segment, value) {
            (Segment::Key(key), Value::Object(map)) => {
                if let Some(child) = map.get(key) {
                    self.descend(child, depth, Step::Key(key.clone()), trail, out);
                }
            }
            (Segment::Index(i), Value::Array(items)) => {
                if let Some(child) = items.get(*i) {
                    self.descend(child, depth, Step::Index(*i), trail, out);
                }
            }
            (Segment::AnyIndex | Segment::Wildcard, Value::Array(items)) => {
                for (i, child) in items.iter().enumerate() {
                    self.descend(child, depth, Step::Index(i), trail, out);
                }
            }
            (Segment::Wildcard, Value::Object(map)) => {
                for (key, child) in map {
                    self.descend(child, depth, Step::Key(key.clone()), trail, out);
                }
            }
            _ => {}
        }
    }

    fn descend(&self, child: &Value, depth: usize, step: Step, trail: &mut Vec<Step>, out: &mut Vec<FieldMatch>) {
        trail.push(step);
        self.walk(child, depth + 1, trail, out);
        trail.pop();
    }
}

impl TryFrom<String> for PathPattern {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<PathPattern> for String {
    fn from(pattern: PathPattern) -> Self {
        pattern.raw
    }
}

impl std::fmt::Display for PathPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Object reached by following `steps` from `root`.
pub fn object_at_mut<'a>(root: &'a mut Value, steps: &[Step]) -> Option<&'a mut Map<String, Value>> {
    let mut current = root;
    for step in steps {
        current = match step {
            Step::Key(key) => current.as_object_mut()?.get_mut(key)?,
            Step::Index(i) => current.as_array_mut()?.get_mut(*i)?,
        };
    }
    current.as_object_mut()
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ids(pattern: &str, payload: &Value) -> Vec<String> {
        PathPattern::parse(pattern)
            .unwrap()
            .find(payload)
            .into_iter()
            .map(|m| m.raw_id)
            .collect()
    }

    #[test]
    fn test_array_wildcard() {
        let payload = json!({"properties": {"items": [
            {"propertyId": "prp_1", "contractId": "ctr_1"},
            {"propertyId": "prp_2", "contractId": "ctr_2"},
            {"propertyId": "prp_3"}
        ]}});
        assert_eq!(ids("properties.items[*].contractId", &payload), vec!["ctr_1", "ctr_2"]);
    }

    #[test]
    fn test_index_and_dollar_prefix() {
        let payload = json!({"items": [{"groupId": "grp_1"}, {"groupId": "grp_2"}]});
        assert_eq!(ids("$.items[1].groupId", &payload), vec!["grp_2"]);
        assert!(ids("items[5].groupId", &payload).is_empty());
    }

    #[test]
    fn test_object_wildcard_and_numbers() {
        let payload = json!({"a": {"cpCode": 123}, "b": {"cpCode": "456"}, "c": 1});
        let mut found = ids("*.cpCode", &payload);
        found.sort();
        assert_eq!(found, vec!["123", "456"]);
    }

    #[test]
    fn test_root_field() {
        assert_eq!(ids("contractId", &json!({"contractId": "ctr_9"})), vec!["ctr_9"]);
    }

    #[test]
    fn test_root_array() {
        let payload = json!([{"groupId": "g1"}, {"groupId": "g2"}]);
        assert_eq!(ids("[*].groupId", &payload), vec!["g1", "g2"]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(PathPattern::parse("").is_err());
        assert!(PathPattern::parse("items[*]").is_err());
        assert!(PathPattern::parse("items.*").is_err());
        assert!(PathPattern::parse("items[x].id").is_err());
        assert!(PathPattern::parse("items[0.id").is_err());
        assert!(PathPattern::parse("a..b").is_err());
    }

    #[test]
    fn test_object_at_mut() {
        let mut payload = json!({"items": [{"id": 1}, {"id": 2}]});
        let obj = object_at_mut(&mut payload, &[Step::Key("items".into()), Step::Index(1)]).unwrap();
        obj.insert("idName".into(), json!("two"));
        assert_eq!(payload["items"][1]["idName"], "two");
        assert!(object_at_mut(&mut payload, &[Step::Key("missing".into())]).is_none());
    }

    #[test]
    fn test_serde_roundtrip_string_form() {
        let pattern: PathPattern = serde_json::from_str("\"items[*].contractId\"").unwrap();
        assert_eq!(pattern.field(), "contractId");
        assert_eq!(serde_json::to_string(&pattern).unwrap(), "\"items[*].contractId\"");
        assert!(serde_json::from_str::<PathPattern>("\"items[*]\"").is_err());
    }
}
