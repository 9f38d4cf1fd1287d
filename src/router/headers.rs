//! Headers-exchange matching (§4.2).
//!
//! Ports `iteration346_message_broker.py::_match_headers`'s `x-match: all`/
//! `any` semantics directly: `all` requires every declared header to equal
//! the envelope's value, `any` requires at least one to.

use crate::envelope::Attributes;
use crate::topology::HeaderMatchMode;

pub fn headers_match(mode: HeaderMatchMode, required: &Attributes, actual: &Attributes) -> bool {
    if required.is_empty() {
        return true;
    }
    match mode {
        HeaderMatchMode::All => required.iter().all(|(k, v)| actual.get(k) == Some(v)),
        HeaderMatchMode::Any => required.iter().any(|(k, v)| actual.get(k) == Some(v)),
    }
}
