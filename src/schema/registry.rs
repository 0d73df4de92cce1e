use serde::{Serialize, Deserialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{Props, TermSet};
use crate::query::types::Query;

/// Value slot reserved for the guid pseudo-property. It is always stored so
/// a row's guid can be retrieved without consulting the caller's schema.
pub const GUID_SLOT: u32 = 0;
pub const GUID_PROP: &str = "guid";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyType {
    Text,
    Number,
    Boolean,
    Date,
}

/// Declarative description of one document property: how it is typed, how it
/// is indexed, and what callers are allowed to do with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertySpec {
    pub name: String,
    pub typecast: PropertyType,
    pub slot: Option<u32>,          // stored value slot; sortable when present
    pub prefix: Option<String>,     // exact-term prefix; query-eligible when present
    pub boolean: bool,              // filter membership without affecting ranking
    pub full_text: bool,            // fed to the tokenizer
    pub localized: bool,            // value is a locale -> text map
    pub readable: bool,
    pub writable: bool,
    pub write_once: bool,           // settable at creation only
    pub required: bool,             // must be present at creation (or defaulted)
    pub blob: bool,                 // not settable through the scalar accessor
    pub default: Option<JsonValue>,
}

impl PropertySpec {
    pub fn text(name: &str) -> Self {
        PropertySpec {
            name: name.to_string(),
            typecast: PropertyType::Text,
            slot: None,
            prefix: None,
            boolean: false,
            full_text: false,
            localized: false,
            readable: true,
            writable: true,
            write_once: false,
            required: false,
            blob: false,
            default: None,
        }
    }

    pub fn number(name: &str) -> Self {
        PropertySpec { typecast: PropertyType::Number, ..Self::text(name) }
    }

    pub fn boolean(name: &str) -> Self {
        PropertySpec { typecast: PropertyType::Boolean, ..Self::text(name) }
    }

    pub fn date(name: &str) -> Self {
        PropertySpec { typecast: PropertyType::Date, ..Self::text(name) }
    }

    pub fn slot(mut self, slot: u32) -> Self {
        self.slot = Some(slot);
        self
    }

    pub fn prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }

    /// Mark as a boolean filter term: affects result membership, never ranking.
    pub fn boolean_term(mut self) -> Self {
        self.boolean = true;
        self
    }

    pub fn full_text(mut self) -> Self {
        self.full_text = true;
        self
    }

    pub fn localized(mut self) -> Self {
        self.localized = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn write_once(mut self) -> Self {
        self.write_once = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.writable = false;
        self
    }

    pub fn blob(mut self) -> Self {
        self.blob = true;
        self
    }

    pub fn default_value(mut self, value: JsonValue) -> Self {
        self.default = Some(value);
        self
    }

    /// Query-eligible: participates in exact/boolean filtering.
    pub fn is_term(&self) -> bool {
        self.prefix.is_some() || self.boolean
    }
}

/// Ordered property registry, built once at startup and passed by reference
/// into every component that needs it. No global state, no lazy init.
#[derive(Debug, Clone)]
pub struct PropertyRegistry {
    specs: Vec<PropertySpec>,
    by_name: HashMap<String, usize>,
}

impl PropertyRegistry {
    pub fn new() -> Self {
        let guid = PropertySpec {
            slot: Some(GUID_SLOT),
            prefix: Some("Q".to_string()),
            writable: false,
            ..PropertySpec::text(GUID_PROP)
        };
        let mut registry = PropertyRegistry {
            specs: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.push(guid);
        registry
    }

    pub fn with_property(mut self, spec: PropertySpec) -> Self {
        self.push(spec);
        self
    }

    fn push(&mut self, spec: PropertySpec) {
        assert!(
            !self.by_name.contains_key(&spec.name),
            "duplicate property {}", spec.name
        );
        if let Some(slot) = spec.slot {
            assert!(
                self.specs.iter().all(|s| s.slot != Some(slot)),
                "slot {} already taken", slot
            );
        }
        self.by_name.insert(spec.name.clone(), self.specs.len());
        self.specs.push(spec);
    }

    pub fn get(&self, name: &str) -> Option<&PropertySpec> {
        self.by_name.get(name).map(|i| &self.specs[*i])
    }

    pub fn specs(&self) -> &[PropertySpec] {
        &self.specs
    }

    /// Canonical term string for a scalar value of this property.
    pub fn term_value(value: &JsonValue) -> String {
        match value {
            JsonValue::String(s) => s.clone(),
            JsonValue::Bool(b) => if *b { "1".to_string() } else { "0".to_string() },
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => i.to_string(),
                None => n.to_string(),
            },
            JsonValue::Null => String::new(),
            other => other.to_string(),
        }
    }

    /// Reduce a property map to the (property, value) term language used by
    /// the overlay cache and the query filter predicates.
    pub fn term_set(&self, props: &Props) -> TermSet {
        let mut terms = TermSet::new();
        for (name, value) in props {
            let Some(spec) = self.get(name) else { continue };
            if !spec.is_term() {
                continue;
            }
            match value {
                JsonValue::Array(values) => {
                    for v in values {
                        terms.insert((name.clone(), Self::term_value(v)));
                    }
                }
                JsonValue::Object(map) if spec.localized => {
                    for v in map.values() {
                        terms.insert((name.clone(), Self::term_value(v)));
                    }
                }
                v => {
                    terms.insert((name.clone(), Self::term_value(v)));
                }
            }
        }
        terms
    }

    /// Resolve a stored value for the caller: localized text properties fall
    /// back from the active locale to the default language, else empty.
    pub fn decode_value(
        &self,
        spec: &PropertySpec,
        value: JsonValue,
        locale: &str,
        default_locale: &str,
    ) -> JsonValue {
        if spec.localized {
            if let JsonValue::Object(map) = value {
                return map
                    .get(locale)
                    .or_else(|| map.get(default_locale))
                    .cloned()
                    .unwrap_or_else(|| JsonValue::String(String::new()));
            }
        }
        value
    }

    /// Eager boundary check for a store. Either every property validates or
    /// the call fails before any mutation is queued.
    pub fn validate_store(&self, props: &Props, is_new: bool) -> Result<()> {
        for name in props.keys() {
            let spec = self.get(name).ok_or_else(|| Error::new(
                ErrorKind::ConstraintViolation,
                format!("unknown property {}", name),
            ))?;
            if spec.blob {
                return Err(Error::new(
                    ErrorKind::ConstraintViolation,
                    format!("property {} is a blob and cannot be set through the scalar accessor", name),
                ));
            }
            if !spec.writable {
                return Err(Error::new(
                    ErrorKind::Forbidden,
                    format!("property {} is not writable", name),
                ));
            }
            if spec.write_once && !is_new {
                return Err(Error::new(
                    ErrorKind::ConstraintViolation,
                    format!("property {} can only be set at creation", name),
                ));
            }
        }
        if is_new {
            for spec in &self.specs {
                if spec.required && !props.contains_key(&spec.name) && spec.default.is_none() {
                    return Err(Error::new(
                        ErrorKind::ConstraintViolation,
                        format!("required property {} missing and declares no default", spec.name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Fill creation defaults for declared-but-omitted properties.
    pub fn apply_defaults(&self, mut props: Props) -> Props {
        for spec in &self.specs {
            if spec.name == GUID_PROP {
                continue;
            }
            if !props.contains_key(&spec.name) {
                if let Some(default) = &spec.default {
                    props.insert(spec.name.clone(), default.clone());
                }
            }
        }
        props
    }

    /// Reject requests that reference unknown or non-filterable properties,
    /// and sort/group keys without a stored value slot.
    pub fn validate_request(&self, query: &Query) -> Result<()> {
        for name in query.request.keys() {
            match self.get(name) {
                Some(spec) if spec.is_term() => {}
                Some(_) => {
                    return Err(Error::new(
                        ErrorKind::QueryError,
                        format!("property {} is not filterable", name),
                    ));
                }
                None => {
                    return Err(Error::new(
                        ErrorKind::QueryError,
                        format!("unknown property {} in request", name),
                    ));
                }
            }
        }
        for key in [query.order_key(), query.group_by.as_deref()].into_iter().flatten() {
            match self.get(key) {
                Some(spec) if spec.slot.is_some() => {}
                Some(_) => {
                    return Err(Error::new(
                        ErrorKind::QueryError,
                        format!("property {} has no stored value and cannot order results", key),
                    ));
                }
                None => {
                    return Err(Error::new(
                        ErrorKind::QueryError,
                        format!("unknown property {} in sort key", key),
                    ));
                }
            }
        }
        Ok(())
    }
}

pub type SharedRegistry = Arc<PropertyRegistry>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> PropertyRegistry {
        PropertyRegistry::new()
            .with_property(PropertySpec::text("title").slot(1).prefix("T").full_text())
            .with_property(PropertySpec::text("color").slot(2).prefix("C"))
            .with_property(
                PropertySpec::text("kind")
                    .slot(3)
                    .prefix("K")
                    .boolean_term()
                    .required()
                    .default_value(json!("generic")),
            )
            .with_property(PropertySpec::text("creator").prefix("A").write_once())
            .with_property(PropertySpec::number("size").slot(4))
            .with_property(PropertySpec::text("payload").blob())
    }

    #[test]
    fn term_set_covers_only_query_eligible_properties() {
        let registry = registry();
        let props = Props::from([
            ("color".to_string(), json!("red")),
            ("size".to_string(), json!(42)),
            ("title".to_string(), json!("hello")),
        ]);
        let terms = registry.term_set(&props);
        assert!(terms.contains(&("color".to_string(), "red".to_string())));
        assert!(terms.contains(&("title".to_string(), "hello".to_string())));
        // size has a slot but no prefix: sortable, not filterable
        assert!(!terms.iter().any(|(p, _)| p == "size"));
    }

    #[test]
    fn multi_valued_properties_emit_one_term_per_value() {
        let registry = registry();
        let props = Props::from([("color".to_string(), json!(["red", "blue"]))]);
        let terms = registry.term_set(&props);
        assert_eq!(terms.len(), 2);
    }

    #[test]
    fn store_validation_rejects_write_once_updates() {
        let registry = registry();
        let props = Props::from([("creator".to_string(), json!("me"))]);
        assert!(registry.validate_store(&props, true).is_ok());
        let err = registry.validate_store(&props, false).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConstraintViolation);
    }

    #[test]
    fn store_validation_rejects_blob_and_guid() {
        let registry = registry();
        let blob = Props::from([("payload".to_string(), json!("AAAA"))]);
        assert_eq!(
            registry.validate_store(&blob, true).unwrap_err().kind,
            ErrorKind::ConstraintViolation
        );
        let guid = Props::from([("guid".to_string(), json!("abc"))]);
        assert_eq!(
            registry.validate_store(&guid, false).unwrap_err().kind,
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn creation_defaults_fill_required_properties() {
        let registry = registry();
        let props = registry.apply_defaults(Props::new());
        assert_eq!(props.get("kind"), Some(&json!("generic")));
    }

    #[test]
    fn localized_decode_falls_back_to_default_locale() {
        let registry = PropertyRegistry::new()
            .with_property(PropertySpec::text("title").slot(1).localized());
        let spec = registry.get("title").unwrap();
        let value = json!({"en": "hello", "fr": "salut"});
        assert_eq!(
            registry.decode_value(spec, value.clone(), "fr", "en"),
            json!("salut")
        );
        assert_eq!(
            registry.decode_value(spec, value.clone(), "de_DE", "en"),
            json!("hello")
        );
        assert_eq!(
            registry.decode_value(spec, json!({"fr": "salut"}), "de_DE", "en"),
            json!("")
        );
    }
}
