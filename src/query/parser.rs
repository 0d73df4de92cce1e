use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use crate::query::types::Query;
use crate::schema::registry::{PropertyRegistry, PropertyType};

/// A query after free-text preprocessing: exact clauses folded into the
/// request, range clauses lifted out, and only genuine free text left over.
#[derive(Debug, Clone, Default)]
pub struct ParsedQuery {
    pub request: HashMap<String, JsonValue>,
    pub ranges: Vec<RangeFilter>,
    pub free_text: String,
}

/// `name:lo..hi` over a numeric/boolean stored value, both ends inclusive.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeFilter {
    pub prop: String,
    pub lo: f64,
    pub hi: f64,
}

impl ParsedQuery {
    /// A request carrying nothing but a guid filter takes the cheap lookup
    /// path: no term reasoning, no search engine query tree.
    pub fn is_guid_only(&self) -> bool {
        self.request.len() == 1
            && self.request.contains_key("guid")
            && self.ranges.is_empty()
            && self.free_text.trim().is_empty()
    }
}

/// Split `name:=value` / `name:="quoted value"` exact-match clauses and
/// `name:lo..hi` range clauses out of the free-text string.
///
/// A clause is only honored when `name` is a query-eligible property (range
/// clauses additionally need a numeric/boolean typecast and a stored slot);
/// malformed or unknown clauses stay behind as ordinary free text.
pub fn parse_query(registry: &PropertyRegistry, query: &Query) -> ParsedQuery {
    let exact = Regex::new(r#"(\w+):=(?:"([^"]*)"|(\S+))"#).unwrap();
    let range = Regex::new(r"(\w+):(-?\d+(?:\.\d+)?)\.\.(-?\d+(?:\.\d+)?)").unwrap();

    let mut request = query.request.clone();
    let mut ranges = Vec::new();

    let text = replace_matched(&query.free_text, &exact, |caps| {
        let name = &caps[1];
        let eligible = registry.get(name).is_some_and(|spec| spec.is_term());
        if !eligible {
            return false;
        }
        let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
        request.insert(name.to_string(), JsonValue::String(value.to_string()));
        true
    });

    let text = replace_matched(&text, &range, |caps| {
        let name = &caps[1];
        let rangeable = registry.get(name).is_some_and(|spec| {
            spec.slot.is_some()
                && matches!(spec.typecast, PropertyType::Number | PropertyType::Boolean)
        });
        if !rangeable {
            return false;
        }
        let (Ok(lo), Ok(hi)) = (caps[2].parse(), caps[3].parse()) else {
            return false;
        };
        ranges.push(RangeFilter { prop: name.to_string(), lo, hi });
        true
    });

    ParsedQuery {
        request,
        ranges,
        free_text: text.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}

/// Remove every match the callback accepts; keep the rest verbatim.
fn replace_matched(
    text: &str,
    pattern: &Regex,
    mut accept: impl FnMut(&regex::Captures) -> bool,
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in pattern.captures_iter(text) {
        let m = caps.get(0).unwrap();
        out.push_str(&text[last..m.start()]);
        if !accept(&caps) {
            out.push_str(m.as_str());
        }
        last = m.end();
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::schema::registry::PropertySpec;

    fn registry() -> PropertyRegistry {
        PropertyRegistry::new()
            .with_property(PropertySpec::text("title").slot(1).prefix("T").full_text())
            .with_property(PropertySpec::text("color").slot(2).prefix("C"))
            .with_property(PropertySpec::number("size").slot(3).prefix("S"))
            .with_property(PropertySpec::text("body").full_text())
    }

    fn query(text: &str) -> Query {
        Query { free_text: text.to_string(), ..Query::default() }
    }

    #[test]
    fn exact_clause_moves_into_request() {
        let parsed = parse_query(&registry(), &query("color:=red quick fox"));
        assert_eq!(parsed.request.get("color"), Some(&json!("red")));
        assert_eq!(parsed.free_text, "quick fox");
    }

    #[test]
    fn quoted_clause_may_contain_spaces() {
        let parsed = parse_query(&registry(), &query(r#"title:="hello world" rest"#));
        assert_eq!(parsed.request.get("title"), Some(&json!("hello world")));
        assert_eq!(parsed.free_text, "rest");
    }

    #[test]
    fn unknown_or_unfilterable_names_stay_as_free_text() {
        let parsed = parse_query(&registry(), &query("shape:=round body:=x"));
        assert!(parsed.request.is_empty());
        assert_eq!(parsed.free_text, "shape:=round body:=x");
    }

    #[test]
    fn malformed_clause_is_ordinary_text() {
        let parsed = parse_query(&registry(), &query("color:= red"));
        assert!(parsed.request.is_empty());
        assert_eq!(parsed.free_text, "color:= red");
    }

    #[test]
    fn numeric_range_clause_is_lifted() {
        let parsed = parse_query(&registry(), &query("size:10..200 cats"));
        assert_eq!(
            parsed.ranges,
            vec![RangeFilter { prop: "size".to_string(), lo: 10.0, hi: 200.0 }]
        );
        assert_eq!(parsed.free_text, "cats");
    }

    #[test]
    fn range_on_text_property_is_not_a_range() {
        let parsed = parse_query(&registry(), &query("color:1..2"));
        assert!(parsed.ranges.is_empty());
        assert_eq!(parsed.free_text, "color:1..2");
    }

    #[test]
    fn request_from_caller_is_preserved() {
        let mut q = query("color:=red");
        q.request.insert("size".to_string(), json!([1, 2]));
        let parsed = parse_query(&registry(), &q);
        assert_eq!(parsed.request.len(), 2);
    }
}
