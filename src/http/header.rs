//! Header name helpers

/// Returns the canonical MIME form of a header name
///
/// The first character and every character following a hyphen are
/// upper-cased, everything else is lower-cased: `x-forwarded-for`
/// becomes `X-Forwarded-For`.
pub fn canonical_name(name: &str) -> String {
    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}
