//! Materialises the full object graph below a value so it can be formatted
//! without talking to the target again.

use async_recursion::async_recursion;

use crate::{
    error::DebugResult,
    target::{DebugTarget, FieldRef, ObjectId, ObjectRef, Value},
};

#[derive(Debug, Clone, PartialEq)]
pub enum InspectedValue {
    /// Primitives, strings and `null`.
    Leaf(Value),
    Array {
        array: ObjectRef,
        elements: Vec<InspectedValue>,
    },
    Object {
        object: ObjectRef,
        fields: Vec<(FieldRef, InspectedValue)>,
    },
    /// An object already being expanded further up the current path.
    Revisited(ObjectRef),
}

/// Expand `value` recursively.
///
/// Expansion stops at objects that are their own ancestors; shared
/// sub-objects that do not form a cycle are expanded at every occurrence.
pub async fn inspect<T: DebugTarget>(target: &mut T, value: &Value) -> DebugResult<InspectedValue> {
    let mut path = Vec::new();
    expand(target, value, &mut path).await
}

#[async_recursion(?Send)]
async fn expand<T: DebugTarget>(
    target: &mut T,
    value: &Value,
    path: &mut Vec<ObjectId>,
) -> DebugResult<InspectedValue> {
    let object = match value {
        Value::Array { array, .. } => array,
        Value::Object(object) => object,
        _ => return Ok(InspectedValue::Leaf(value.clone())),
    };
    if path.contains(&object.id) {
        return Ok(InspectedValue::Revisited(object.clone()));
    }

    path.push(object.id);
    let expanded = match value {
        Value::Array { array, .. } => {
            let mut elements = Vec::new();
            for element in target.array_elements(array).await? {
                elements.push(expand(target, &element, path).await?);
            }
            InspectedValue::Array {
                array: array.clone(),
                elements,
            }
        }
        _ => {
            let mut fields = Vec::new();
            for (field, field_value) in target.object_fields(object).await? {
                fields.push((field, expand(target, &field_value, path).await?));
            }
            InspectedValue::Object {
                object: object.clone(),
                fields,
            }
        }
    };
    path.pop();
    Ok(expanded)
}
