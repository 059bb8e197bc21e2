use aloe_core::{AloeError, Label, Severity, Verdict};
use serde_json::Value;

/// Check a classification response against the closed verdict schema.
///
/// String fields are compared after trimming and lower-casing; anything
/// outside the closed sets, or a confidence outside [0, 1], is rejected.
pub fn validate_verdict(raw: &Value) -> Result<Verdict, AloeError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| invalid("response is not a JSON object"))?;

    let text = |key: &str| -> Result<String, AloeError> {
        obj.get(key)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_ascii_lowercase())
            .ok_or_else(|| invalid(&format!("missing string field '{key}'")))
    };

    let label_raw = text("label")?;
    let label = Label::parse(&label_raw)
        .ok_or_else(|| invalid(&format!("label '{label_raw}' not in closed set")))?;
    let severity_raw = text("severity")?;
    let severity = Severity::parse(&severity_raw)
        .ok_or_else(|| invalid(&format!("severity '{severity_raw}' not in closed set")))?;
    let priority_raw = text("priority")?;
    let priority = Severity::parse(&priority_raw)
        .ok_or_else(|| invalid(&format!("priority '{priority_raw}' not in closed set")))?;

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| invalid("missing numeric field 'confidence'"))?;
    if !(0.0..=1.0).contains(&confidence) {
        return Err(invalid(&format!("confidence {confidence} outside [0, 1]")));
    }

    let reason = obj
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Ok(Verdict {
        label,
        severity,
        priority,
        confidence,
        reason,
    })
}

fn invalid(msg: &str) -> AloeError {
    AloeError::ClassificationSchemaInvalid(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_well_formed() {
        let v = validate_verdict(&json!({
            "label": "Internal_Error ", "severity": "high", "priority": "MEDIUM",
            "confidence": 0.82, "reason": "NPE in handler"
        }))
        .unwrap();
        assert_eq!(v.label, Label::InternalError);
        assert_eq!(v.priority, Severity::Medium);
        assert_eq!(v.reason, "NPE in handler");
    }

    #[test]
    fn rejects_label_outside_set() {
        let err = validate_verdict(&json!({
            "label": "database", "severity": "high", "priority": "high", "confidence": 0.5
        }))
        .unwrap_err();
        assert!(matches!(err, AloeError::ClassificationSchemaInvalid(_)));
        assert!(err.to_string().contains("database"));
    }

    #[test]
    fn rejects_bad_confidence() {
        for c in [json!(1.2), json!(-0.1), json!("0.5")] {
            let raw = json!({"label": "noise", "severity": "low", "priority": "low", "confidence": c});
            assert!(validate_verdict(&raw).is_err());
        }
    }

    #[test]
    fn rejects_missing_fields_and_non_objects() {
        assert!(validate_verdict(&json!({"label": "noise"})).is_err());
        assert!(validate_verdict(&json!("noise")).is_err());
    }

    #[test]
    fn integer_confidence_is_numeric() {
        let raw = json!({"label": "timeout", "severity": "low", "priority": "low", "confidence": 1});
        assert_eq!(validate_verdict(&raw).unwrap().confidence, 1.0);
    }
}
