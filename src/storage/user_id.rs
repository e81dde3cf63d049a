use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

const MAX_HINT_LEN: usize = 12;

/// Readable user id: `<HINT>_<32 hex>` where the hint is built from the first two name parts
/// (accents stripped, A-Z only, at most 12 chars). A name with no usable letters yields the bare hex id.
pub fn build_user_id(full_name: Option<&str>) -> String {
    let guid = uuid::Uuid::new_v4().simple().to_string();
    match full_name.and_then(name_hint) {
        Some(hint) => format!("{}_{}", hint, guid),
        None => guid,
    }
}

pub(crate) fn name_hint(full_name: &str) -> Option<String> {
    let stripped: String = full_name.trim().nfd().filter(|c| !is_combining_mark(*c)).nfc().collect();
    let upper = stripped.to_uppercase();
    let hint: String = upper
        .split_whitespace()
        .take(2)
        .flat_map(|part| part.chars())
        .filter(|c| c.is_ascii_uppercase())
        .take(MAX_HINT_LEN)
        .collect();
    if hint.is_empty() { None } else { Some(hint) }
}
