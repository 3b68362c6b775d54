//! Payload fixtures whose bodies identify them.

use outpost_core::{Feature, Payload};

/// Payload whose body is the decimal `n`, so delivery order can be read
/// back from the backend.
pub fn numbered(feature: Feature, n: u32) -> Payload {
    Payload::new(feature, n.to_string().into_bytes())
}

/// Sequence numbers carried by payloads built with `numbered`.
///
/// Payloads with other bodies are skipped.
pub(crate) fn sequence_of<'a>(payloads: impl IntoIterator<Item = &'a Payload>) -> Vec<u32> {
    payloads
        .into_iter()
        .filter_map(|payload| std::str::from_utf8(payload.body()).ok()?.parse().ok())
        .collect()
}
