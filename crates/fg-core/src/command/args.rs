//! Typed access to request fields
//!
//! Requests are loose JSON objects. A field that is absent, `null` or an empty
//! string is treated as not given, except by [`Args::text_or`] where only an
//! absent or `null` field takes the default. A field of the wrong type fails
//! with the message the caller supplies.

use glam::DVec3;
use serde_json::{Map, Value};

use crate::constants::REQUEST_UNITS;
use crate::error::{EngineError, EngineResult};
use crate::units::PointMm;
use crate::verify::Tolerances;

fn invalid(message: &str) -> EngineError {
    EngineError::InvalidInput(message.to_string())
}

/// Numbers and numeric strings both count as numbers
fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Read-only view of a request object
#[derive(Debug, Clone, Copy)]
pub struct Args<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> Args<'a> {
    /// Create a view; a non-object request has no fields
    pub fn new(request: &'a Value) -> Self {
        Self {
            fields: request.as_object(),
        }
    }

    /// Raw value of a field that was given
    pub fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields?
            .get(key)
            .filter(|v| !v.is_null() && v.as_str() != Some(""))
    }

    /// String field; non-string values are rendered as JSON text
    pub fn text(&self, key: &str) -> Option<String> {
        self.get(key).map(render)
    }

    /// String field with a default; an empty string is kept so the caller's
    /// parser rejects it
    pub fn text_or(&self, key: &str, default: &str) -> String {
        self.fields
            .and_then(|f| f.get(key))
            .filter(|v| !v.is_null())
            .map_or_else(|| default.to_string(), render)
    }

    pub fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).map_or(default, truthy)
    }

    /// Flag that is `None` when not given
    pub fn opt_flag(&self, key: &str) -> Option<bool> {
        self.get(key).map(truthy)
    }

    /// Required number
    pub fn number(&self, key: &str, message: &str) -> EngineResult<f64> {
        self.get(key)
            .and_then(as_number)
            .filter(|n| n.is_finite())
            .ok_or_else(|| invalid(message))
    }

    /// Number with a default for when the field is not given
    pub fn number_or(&self, key: &str, default: f64, message: &str) -> EngineResult<f64> {
        match self.get(key) {
            None => Ok(default),
            Some(_) => self.number(key, message),
        }
    }

    /// Required integer
    pub fn integer(&self, key: &str, message: &str) -> EngineResult<i64> {
        self.get(key).and_then(as_integer).ok_or_else(|| invalid(message))
    }

    pub fn integer_or(&self, key: &str, default: i64, message: &str) -> EngineResult<i64> {
        match self.get(key) {
            None => Ok(default),
            Some(_) => self.integer(key, message),
        }
    }

    /// Point object `{x, y, z}`; missing components are zero
    pub fn point(&self, key: &str, message: &str) -> EngineResult<Option<DVec3>> {
        self.get(key).map(|v| point_value(v, message)).transpose()
    }

    /// Point that must be given
    pub fn required_point(&self, key: &str, message: &str) -> EngineResult<DVec3> {
        self.point(key, message)?.ok_or_else(|| invalid(message))
    }

    /// List of strings
    pub fn string_list(&self, key: &str, message: &str) -> EngineResult<Option<Vec<String>>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        let items = value.as_array().ok_or_else(|| invalid(message))?;
        items
            .iter()
            .map(|item| item.as_str().map(str::to_string).ok_or_else(|| invalid(message)))
            .collect::<EngineResult<Vec<_>>>()
            .map(Some)
    }

    /// Reject any request unit other than millimetres
    pub fn require_mm_units(&self) -> EngineResult<()> {
        match self.text("units") {
            None => Ok(()),
            Some(units) if units == REQUEST_UNITS => Ok(()),
            Some(units) => Err(EngineError::InvalidInput(format!(
                "Unsupported units: {units}. Only 'mm' is supported."
            ))),
        }
    }

    /// Verification tolerances, falling back to `defaults` per field
    pub fn tolerances(&self, defaults: Tolerances) -> EngineResult<Tolerances> {
        Ok(Tolerances {
            mm: self.number_or(
                "verification_tolerance_mm",
                defaults.mm,
                "verification_tolerance_mm must be a number",
            )?,
            pct: self.number_or(
                "verification_tolerance_pct",
                defaults.pct,
                "verification_tolerance_pct must be a number",
            )?,
        })
    }
}

/// Parse a `{x, y, z}` object
pub fn point_value(value: &Value, message: &str) -> EngineResult<DVec3> {
    if !value.is_object() {
        return Err(invalid(message));
    }
    let point: PointMm = serde_json::from_value(value.clone()).map_err(|_| invalid(message))?;
    if !point.is_finite() {
        return Err(invalid(message));
    }
    Ok(point.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_and_null_are_missing() {
        let request = json!({ "a": "", "b": null, "c": "x" });
        let args = Args::new(&request);
        assert!(args.get("a").is_none());
        assert!(args.get("b").is_none());
        assert_eq!(args.text("c").as_deref(), Some("x"));
    }

    #[test]
    fn test_text_or_defaults_only_when_absent() {
        let request = json!({ "a": "", "b": null, "n": 3 });
        let args = Args::new(&request);
        assert_eq!(args.text_or("a", "XY"), "");
        assert_eq!(args.text_or("b", "XY"), "XY");
        assert_eq!(args.text_or("missing", "XY"), "XY");
        assert_eq!(args.text_or("n", "XY"), "3");
    }

    #[test]
    fn test_numbers_accept_numeric_strings() {
        let request = json!({ "d": "12.5", "e": "abc", "n": 3 });
        let args = Args::new(&request);
        assert_eq!(args.number("d", "bad").unwrap(), 12.5);
        assert_eq!(args.number("n", "bad").unwrap(), 3.0);
        let err = args.number("e", "e must be a number").unwrap_err();
        assert_eq!(err, EngineError::InvalidInput("e must be a number".into()));
        assert!(args.number("missing", "m").is_err());
        assert_eq!(args.number_or("missing", 7.0, "m").unwrap(), 7.0);
    }

    #[test]
    fn test_integers() {
        let request = json!({ "i": 2, "f": 2.0, "g": 2.5 });
        let args = Args::new(&request);
        assert_eq!(args.integer("i", "bad").unwrap(), 2);
        assert_eq!(args.integer("f", "bad").unwrap(), 2);
        assert!(args.integer("g", "bad").is_err());
        assert_eq!(args.integer_or("missing", 0, "bad").unwrap(), 0);
    }

    #[test]
    fn test_flags_follow_truthiness() {
        let request = json!({ "t": true, "z": 0, "s": "yes" });
        let args = Args::new(&request);
        assert!(args.flag("t", false));
        assert!(!args.flag("z", true));
        assert!(args.flag("s", false));
        assert!(args.flag("missing", true));
        assert_eq!(args.opt_flag("missing"), None);
    }

    #[test]
    fn test_points() {
        let request = json!({ "p": { "x": 1.0, "y": 2.0 }, "q": [1, 2], "r": { "x": "a" } });
        let args = Args::new(&request);
        assert_eq!(
            args.point("p", "bad").unwrap(),
            Some(DVec3::new(1.0, 2.0, 0.0))
        );
        assert!(args.point("q", "bad").is_err());
        assert!(args.point("r", "bad").is_err());
        assert_eq!(args.point("missing", "bad").unwrap(), None);
        assert!(args.required_point("missing", "need p").is_err());
    }

    #[test]
    fn test_units_and_tolerances() {
        let request = json!({ "units": "in", "verification_tolerance_mm": 0.5 });
        let args = Args::new(&request);
        assert_eq!(
            args.require_mm_units().unwrap_err().to_string(),
            "Unsupported units: in. Only 'mm' is supported."
        );
        let tol = args.tolerances(Tolerances::default()).unwrap();
        assert_eq!(tol.mm, 0.5);
        assert_eq!(tol.pct, 1.0);
        assert!(Args::new(&json!({ "units": "mm" })).require_mm_units().is_ok());
    }

    #[test]
    fn test_string_list() {
        let request = json!({ "ok": ["a", "b"], "bad": "a", "mixed": ["a", 1] });
        let args = Args::new(&request);
        assert_eq!(
            args.string_list("ok", "bad").unwrap(),
            Some(vec!["a".to_string(), "b".to_string()])
        );
        assert!(args.string_list("bad", "bad").is_err());
        assert!(args.string_list("mixed", "bad").is_err());
        assert_eq!(args.string_list("missing", "bad").unwrap(), None);
    }
}
