//! Text forms of values: the one-line summary printed next to a variable name
//! and the recursive expansion printed for `print <name>`.

use std::fmt;

use crate::{inspect::InspectedValue, target::Value};

/// One-line form of a value.
pub fn summary(value: &Value) -> String {
    match value {
        Value::Boolean(v) => v.to_string(),
        Value::Byte(v) => v.to_string(),
        Value::Char(c) => char::from_u32(u32::from(*c))
            .unwrap_or('\u{FFFD}')
            .to_string(),
        Value::Short(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Float(v) => java_float(*v),
        Value::Double(v) => java_float(*v),
        Value::Void => "void".to_string(),
        Value::Null => "null".to_string(),
        Value::Str(text) => format!("\"{text}\""),
        Value::Array { array, length } => format!(
            "instance of {} (id={})",
            sized_array_type(&array.type_name, *length),
            array.id
        ),
        Value::Object(object) => format!("instance of {}(id={})", object.type_name, object.id),
    }
}

/// Recursive form of an inspected value.
pub fn format(value: &InspectedValue) -> String {
    match value {
        InspectedValue::Leaf(value) => summary(value),
        InspectedValue::Array { elements, .. } => {
            let elements: Vec<String> = elements.iter().map(format).collect();
            format!("Content: [{}]", elements.join(", "))
        }
        InspectedValue::Object { fields, .. } => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(field, value)| {
                    format!("{}.{}={}", field.declaring_type, field.name, format(value))
                })
                .collect();
            format!("Fields: {{{}}}", fields.join(", "))
        }
        InspectedValue::Revisited(object) => {
            format!("<cycle: instance of {}(id={})>", object.type_name, object.id)
        }
    }
}

/// `int[][]` with length 3 reads `int[3][]`.
fn sized_array_type(type_name: &str, length: usize) -> String {
    match type_name.find("[]") {
        Some(at) => format!("{}[{length}]{}", &type_name[..at], &type_name[at + 2..]),
        None => format!("{type_name}[{length}]"),
    }
}

/// Floating point text as `Double.toString` prints it: always a fractional
/// digit, scientific notation outside `[1e-3, 1e7)`.
fn java_float<F>(value: F) -> String
where
    F: Copy + Into<f64> + fmt::Display + fmt::LowerExp,
{
    let wide: f64 = value.into();
    if wide.is_nan() {
        return "NaN".to_string();
    }
    if wide.is_infinite() {
        return if wide > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }

    let magnitude = wide.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        let text = value.to_string();
        return if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        };
    }

    let text = format!("{value:e}");
    let (mantissa, exponent) = text.split_once('e').unwrap_or((text.as_str(), "0"));
    if mantissa.contains('.') {
        format!("{mantissa}E{exponent}")
    } else {
        format!("{mantissa}.0E{exponent}")
    }
}
