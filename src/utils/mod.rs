pub mod logging;
pub mod serial;

/// Truthy env-style flag: `1` or any casing of `true`.
pub fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}
