const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const CALL_ID_RANDOM_LEN: usize = 8;

/// Synthesize a tool-call id of the form `call_<8 random base36 chars>` for
/// host messages that omitted one.
#[must_use]
pub(crate) fn synth_call_id() -> String {
    let mut out = String::with_capacity(5 + CALL_ID_RANDOM_LEN);
    out.push_str("call_");
    for _ in 0..CALL_ID_RANDOM_LEN {
        let idx = fastrand::usize(..BASE36.len());
        out.push(char::from(BASE36[idx]));
    }
    out
}

/// Canonical dedup key for a logical tool call: name plus the canonical JSON
/// serialization of its arguments. `serde_json` maps are ordered, so two
/// structurally equal objects produce the same key regardless of the order
/// their keys arrived in.
#[must_use]
pub(crate) fn canonical_call_key(name: &str, arguments: &serde_json::Value) -> String {
    let mut out = String::with_capacity(name.len() + 24);
    out.push_str(name);
    out.push(':');
    match serde_json::to_string(arguments) {
        Ok(canonical) => out.push_str(&canonical),
        Err(_) => out.push_str("{}"),
    }
    out
}
