//! Canonical contact identifiers.
//!
//! Raw contact ids reach the store in several spellings: bare numbers,
//! numbers with a transport suffix, and scratch-prefixed analytics aliases.
//! Every lookup funnels through one normalization step so all spellings
//! resolve to the same entity.

/// Transport suffix re-appended to every canonical contact id.
pub const CANONICAL_CONTACT_SUFFIX: &str = "@s.whatsapp.net";

/// Scratch prefix some producers attach to keep side-channel threads apart.
const SCRATCH_ALIAS_PREFIX: &str = "analytics_";

/// Normalizes any raw spelling to the single canonical form.
///
/// An empty or whitespace-only input normalizes to the empty string, which
/// callers treat as invalid.
pub fn canonical_contact_id(raw: &str) -> String {
    let bare = bare_contact_id(raw);
    if bare.is_empty() {
        return String::new();
    }
    format!("{bare}{CANONICAL_CONTACT_SUFFIX}")
}

/// The undecorated identifier: scratch prefix and transport suffix stripped.
pub fn bare_contact_id(raw: &str) -> String {
    let mut value = raw.trim();
    if let Some(stripped) = value.strip_prefix(SCRATCH_ALIAS_PREFIX) {
        value = stripped;
    }
    if let Some((bare, _)) = value.split_once('@') {
        value = bare;
    }
    value.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::{bare_contact_id, canonical_contact_id, CANONICAL_CONTACT_SUFFIX};

    #[test]
    fn unit_all_alias_spellings_share_one_canonical_form() {
        let expected = format!("6281234567890{CANONICAL_CONTACT_SUFFIX}");
        for raw in [
            "6281234567890",
            "6281234567890@s.whatsapp.net",
            "6281234567890@c.us",
            "analytics_6281234567890",
            "analytics_6281234567890@s.whatsapp.net",
            "  6281234567890@s.whatsapp.net  ",
        ] {
            assert_eq!(canonical_contact_id(raw), expected, "raw spelling {raw:?}");
        }
    }

    #[test]
    fn unit_bare_contact_id_strips_decorations_only() {
        assert_eq!(bare_contact_id("analytics_628@s.whatsapp.net"), "628");
        assert_eq!(bare_contact_id("628"), "628");
    }

    #[test]
    fn regression_blank_input_normalizes_to_empty() {
        assert_eq!(canonical_contact_id("   "), "");
        assert_eq!(canonical_contact_id("@s.whatsapp.net"), "");
        assert_eq!(canonical_contact_id("analytics_"), "");
    }
}
