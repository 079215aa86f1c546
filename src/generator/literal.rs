use crate::trace::TraceValue;

/// Render a traced value as Java source that evaluates to the same value.
pub fn java_literal(value: &TraceValue) -> String {
    match value {
        TraceValue::Bool(v) => v.to_string(),
        TraceValue::Int(v) if i32::try_from(*v).is_ok() => v.to_string(),
        TraceValue::Int(v) => format!("{v}L"),
        TraceValue::Float(v) => float_literal(*v),
        TraceValue::Double(v) => double_literal(*v),
        TraceValue::Char(c) => format!("'{}'", escape(*c, Quote::Single)),
        TraceValue::Str(s) => {
            let body: String = s.chars().map(|c| escape(c, Quote::Double)).collect();
            format!("\"{body}\"")
        }
        TraceValue::Null => "null".to_string(),
    }
}

/// Whether an assertion on this value needs a tolerance argument.
pub fn is_floating(value: &TraceValue) -> bool {
    matches!(value, TraceValue::Float(_) | TraceValue::Double(_))
}

fn float_literal(v: f32) -> String {
    if v.is_nan() {
        "Float.NaN".to_string()
    } else if v.is_infinite() {
        let sign = if v > 0.0 { "POSITIVE" } else { "NEGATIVE" };
        format!("Float.{sign}_INFINITY")
    } else {
        format!("{v:?}f")
    }
}

fn double_literal(v: f64) -> String {
    if v.is_nan() {
        "Double.NaN".to_string()
    } else if v.is_infinite() {
        let sign = if v > 0.0 { "POSITIVE" } else { "NEGATIVE" };
        format!("Double.{sign}_INFINITY")
    } else {
        format!("{v:?}")
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Quote {
    Single,
    Double,
}

fn escape(c: char, quote: Quote) -> String {
    match c {
        '\\' => "\\\\".to_string(),
        '\n' => "\\n".to_string(),
        '\r' => "\\r".to_string(),
        '\t' => "\\t".to_string(),
        '\u{8}' => "\\b".to_string(),
        '\u{c}' => "\\f".to_string(),
        '\'' if quote == Quote::Single => "\\'".to_string(),
        '"' if quote == Quote::Double => "\\\"".to_string(),
        c if c.is_control() => format!("\\u{:04x}", c as u32),
        c => c.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integers() {
        assert_eq!(java_literal(&TraceValue::Int(5)), "5");
        assert_eq!(java_literal(&TraceValue::Int(-2147483648)), "-2147483648");
        assert_eq!(java_literal(&TraceValue::Int(3_000_000_000)), "3000000000L");
    }

    #[test]
    fn test_floating_point() {
        assert_eq!(java_literal(&TraceValue::Float(1.5)), "1.5f");
        assert_eq!(java_literal(&TraceValue::Float(2.0)), "2.0f");
        assert_eq!(java_literal(&TraceValue::Double(2.0)), "2.0");
        assert_eq!(java_literal(&TraceValue::Double(f64::NAN)), "Double.NaN");
        assert_eq!(
            java_literal(&TraceValue::Float(f32::NEG_INFINITY)),
            "Float.NEGATIVE_INFINITY"
        );
        assert!(is_floating(&TraceValue::Double(0.1)));
        assert!(!is_floating(&TraceValue::Int(1)));
    }

    #[test]
    fn test_text() {
        assert_eq!(
            java_literal(&TraceValue::Str("say \"hi\"\n".to_string())),
            "\"say \\\"hi\\\"\\n\""
        );
        assert_eq!(java_literal(&TraceValue::Str("it's".to_string())), "\"it's\"");
        assert_eq!(java_literal(&TraceValue::Char('\'')), "'\\''");
        assert_eq!(java_literal(&TraceValue::Char('"')), "'\"'");
        assert_eq!(java_literal(&TraceValue::Char('\u{1}')), "'\\u0001'");
    }

    #[test]
    fn test_bool_and_null() {
        assert_eq!(java_literal(&TraceValue::Bool(true)), "true");
        assert_eq!(java_literal(&TraceValue::Null), "null");
    }
}
