use serde_json::Value;

/// Looks up a dotted field path (e.g. `details.dest_port`) against a JSON
/// projection of an event. Missing intermediate nodes return `None` rather
/// than erroring — callers treat that as "condition false", matching the
/// rule engine's field-lookup contract.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}
