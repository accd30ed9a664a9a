//! JSON parsing past serde_json's fixed nesting limit
//!
//! serde_json refuses documents nested more than 128 levels deep. Bodies
//! are instead parsed with the limit disabled and the stack grown on
//! demand, up to [`MAX_JSON_DEPTH`] levels of arrays and objects.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Deepest array/object nesting accepted in a request body
pub const MAX_JSON_DEPTH: usize = 1000;

/// Parses `text` as one JSON document, or `None` if it is not valid JSON
/// or nests deeper than [`MAX_JSON_DEPTH`]
pub fn parse_body(text: &str) -> Option<Value> {
    if nesting_depth(text) > MAX_JSON_DEPTH {
        return None;
    }
    from_slice_unbounded(text.as_bytes()).ok()
}

/// Deserializes `bytes` with no recursion limit
pub fn from_slice_unbounded<T: DeserializeOwned>(bytes: &[u8]) -> serde_json::Result<T> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    let value = T::deserialize(serde_stacker::Deserializer::new(&mut de))?;
    de.end()?;
    Ok(value)
}

/// Maximum bracket depth outside string literals
fn nesting_depth(text: &str) -> usize {
    let (mut depth, mut max) = (0usize, 0usize);
    let mut in_string = false;
    let mut escaped = false;

    for b in text.bytes() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => {
                depth += 1;
                max = max.max(depth);
            }
            b']' | b'}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}
