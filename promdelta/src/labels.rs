//! Label sets and their canonical string form
//!
//! A series is identified by its metric name and its labels. Labels arrive in
//! whatever order the exposition listed them; the canonical form sorts them by
//! name so that equal label sets always produce byte-identical keys.
//!
//! Names or values containing `=` or spaces can make two distinct label sets
//! render to the same canonical string. Prometheus label names never contain
//! either; values can, and that ambiguity is accepted.

use std::collections::BTreeMap;

/// Label name to label value. Iteration is in ascending name order.
pub type LabelSet = BTreeMap<String, String>;

/// Render `labels` as `name=value` pairs separated by single spaces, names
/// ascending. An empty set renders as the empty string.
#[must_use]
pub fn canonicalize(labels: &LabelSet) -> String {
    let mut out = String::new();
    for (name, value) in labels {
        out.push_str(name);
        out.push('=');
        out.push_str(value);
        out.push(' ');
    }
    out.trim_end().to_string()
}
