//! Phone number canonicalization

/// Minimum digits a canonical phone must keep
pub const MIN_PHONE_DIGITS: usize = 10;

/// Canonicalize a raw provider identifier into a digits-only phone number
///
/// Everything from the first `@` onward is dropped (provider suffixes such as
/// `@s.whatsapp.net`), then every non-digit. Returns an empty string when
/// fewer than [`MIN_PHONE_DIGITS`] digits remain.
#[must_use]
pub fn canonicalize(raw: &str) -> String {
    let user_part = raw.split_once('@').map_or(raw, |(user, _)| user);
    let digits: String = user_part.chars().filter(char::is_ascii_digit).collect();

    if digits.len() < MIN_PHONE_DIGITS {
        return String::new();
    }
    digits
}

/// Canonicalize the first candidate that is present and non-blank
///
/// The candidates are ordered by preference; the first one that exists is the
/// one canonicalized, even when it turns out too short. Falling through to a
/// less-preferred identifier would risk picking the business's own number.
#[must_use]
pub fn canonicalize_preferred(candidates: &[Option<&str>]) -> String {
    candidates
        .iter()
        .flatten()
        .map(|s| s.trim())
        .find(|s| !s.is_empty())
        .map(canonicalize)
        .unwrap_or_default()
}
