//! Query paths for extracting an address from a JSON response
//!
//! A path is a jq program (`.ip`, `.data | .addr`, `.list[1:] | .[0].ip`,
//! `.ip? // .data.ip`, ...) run by the `jaq` engine with the jq standard
//! library loaded. A path starting with `/` is an RFC 6901 JSON pointer.
//!
//! [`JsonPath::extract_string`] requires the program to yield exactly one
//! string.

use ddns_core::{Error, Result};
use jaq_core::load::{Arena, File, Loader};
use jaq_core::{Compiler, Ctx, Filter, Native, RcIter};
use jaq_json::Val;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Kind {
    Jq,
    Pointer,
}

/// A validated extraction path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonPath {
    source: String,
    kind: Kind,
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl FromStr for JsonPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let source = s.trim();
        if source.is_empty() {
            return Err(Error::config("json path is empty"));
        }

        let path = Self {
            source: source.to_string(),
            kind: if source.starts_with('/') {
                Kind::Pointer
            } else {
                Kind::Jq
            },
        };

        if path.kind == Kind::Jq {
            compile(&path.source)?;
        }
        Ok(path)
    }
}

/// Compile a jq program against the standard and JSON definitions
fn compile(program: &str) -> Result<Filter<Native<Val>>> {
    let invalid = |why: String| Error::config(format!("invalid json path {:?}: {}", program, why));

    let arena = Arena::default();
    let loader = Loader::new(jaq_std::defs().chain(jaq_json::defs()));
    let modules = loader
        .load(&arena, File { path: (), code: program })
        .map_err(|errs| invalid(format!("{} syntax error(s)", errs.len())))?;

    Compiler::default()
        .with_funs(jaq_std::funs().chain(jaq_json::funs()))
        .compile(modules)
        .map_err(|errs| invalid(format!("{} undefined name(s)", errs.len())))
}

impl JsonPath {
    /// Every value the path yields for `doc`
    pub fn evaluate(&self, doc: &Value) -> Result<Vec<Value>> {
        if self.kind == Kind::Pointer {
            return Ok(doc.pointer(&self.source).cloned().into_iter().collect());
        }

        let filter = compile(&self.source)?;
        let inputs = RcIter::new(core::iter::empty());

        filter
            .run((Ctx::new([], &inputs), Val::from(doc.clone())))
            .map(|out| {
                out.map(Value::from).map_err(|e| {
                    Error::detection(format!("json path {} failed: {}", self, e))
                })
            })
            .collect()
    }

    /// Evaluate and require exactly one string result
    pub fn extract_string(&self, doc: &Value) -> Result<String> {
        let values = self.evaluate(doc)?;
        match values.as_slice() {
            [] => Err(Error::detection(format!("json path {} matched nothing", self))),
            [Value::String(s)] => Ok(s.trim().to_string()),
            [Value::Null] => Err(Error::detection(format!("json path {} matched null", self))),
            [other] => Err(Error::detection(format!(
                "json path {} matched a non-string value: {}",
                self, other
            ))),
            many => Err(Error::detection(format!(
                "json path {} matched {} values, expected one",
                self,
                many.len()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn extract(path: &str, doc: &Value) -> Result<String> {
        path.parse::<JsonPath>()?.extract_string(doc)
    }

    #[test]
    fn simple_and_nested_keys() {
        let doc = json!({"ip": "203.0.113.9", "data": {"addr": "2001:db8::9"}});

        assert_eq!(extract(".ip", &doc).unwrap(), "203.0.113.9");
        assert_eq!(extract(".data.addr", &doc).unwrap(), "2001:db8::9");
    }

    #[test]
    fn indexing_and_quoted_keys() {
        let doc = json!({"list": ["a", "b"], "my ip": "203.0.113.9"});

        assert_eq!(extract(".list[1]", &doc).unwrap(), "b");
        assert_eq!(extract(".list[-1]", &doc).unwrap(), "b");
        assert_eq!(extract(".\"my ip\"", &doc).unwrap(), "203.0.113.9");
        assert_eq!(extract(".[\"my ip\"]", &doc).unwrap(), "203.0.113.9");
    }

    #[test]
    fn full_jq_programs() {
        let doc = json!({
            "data": {"ip": "203.0.113.9"},
            "list": [{"ip": "a"}, {"ip": "203.0.113.10"}]
        });

        assert_eq!(extract(".data | .ip", &doc).unwrap(), "203.0.113.9");
        assert_eq!(extract(".data.ip // empty", &doc).unwrap(), "203.0.113.9");
        assert_eq!(extract(".list[1:] | .[0].ip", &doc).unwrap(), "203.0.113.10");
        assert_eq!(extract(".ip? // .data.ip", &doc).unwrap(), "203.0.113.9");
        assert_eq!(
            extract(".list | map(select(.ip != \"a\")) | .[0].ip", &doc).unwrap(),
            "203.0.113.10"
        );
    }

    #[test]
    fn iterator_must_yield_exactly_one() {
        let one = json!({"list": [{"ip": "203.0.113.9"}]});
        let two = json!({"list": [{"ip": "a"}, {"ip": "b"}]});

        assert_eq!(extract(".list[].ip", &one).unwrap(), "203.0.113.9");
        assert!(extract(".list[].ip", &two).is_err());
        assert!(extract(".list[]", &json!({"list": []})).is_err());
        assert!(extract(".ip // empty", &json!({})).is_err());
    }

    #[test]
    fn json_pointer() {
        let doc = json!({"data": {"ip": "203.0.113.9"}});

        assert_eq!(extract("/data/ip", &doc).unwrap(), "203.0.113.9");
        assert!(extract("/data/missing", &doc).is_err());
    }

    #[test]
    fn non_string_results_are_rejected() {
        let doc = json!({"ip": 42, "none": null});

        assert!(extract(".ip", &doc).is_err());
        assert!(extract(".none", &doc).is_err());
        assert!(extract(".missing", &doc).is_err());
    }

    #[test]
    fn runtime_errors_fail_detection() {
        let doc = json!({"ip": "203.0.113.9"});

        assert!(matches!(extract(".ip[0]", &doc), Err(Error::Detection(_))));
    }

    #[test]
    fn malformed_programs_fail_to_parse() {
        assert!(matches!("".parse::<JsonPath>(), Err(Error::Config(_))));
        assert!(matches!(".list[".parse::<JsonPath>(), Err(Error::Config(_))));
        assert!(matches!(".\"open".parse::<JsonPath>(), Err(Error::Config(_))));
        assert!(matches!("no_such_function".parse::<JsonPath>(), Err(Error::Config(_))));
    }
}
