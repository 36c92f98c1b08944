//! Indonesian phone-number normalisation for `whitelisted_number`.
//!
//! Normalised form is always `628...` (no leading `+`). This is a quiet
//! precondition in the original system (spec.md §9): every create *and*
//! every comparison must normalise first, or the uniqueness invariant (I1)
//! silently breaks for numbers that are equal after normalisation but not
//! before.

/// Normalise a raw phone number to the `628...` form.
///
/// Rules, applied in order:
/// - strip a leading `+`
/// - strip non-digit characters
/// - a leading `08` becomes `628`
/// - a leading `8` (without `62`) becomes `628`
pub fn normalize(raw: &str) -> String {
    let stripped: String = raw
        .trim()
        .trim_start_matches('+')
        .chars()
        .filter(|c| c.is_ascii_digit())
        .collect();

    if let Some(rest) = stripped.strip_prefix("08") {
        format!("628{rest}")
    } else if stripped.starts_with("62") {
        stripped
    } else if let Some(rest) = stripped.strip_prefix('8') {
        format!("628{rest}")
    } else {
        stripped
    }
}
