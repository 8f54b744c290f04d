//! Sequence number type and sentinels.
//!
//! Global seqnos are monotonically increasing and gapless within a primary
//! configuration. Internally an action's ordering is an `Option<Seqno>`;
//! the C-style sentinels exist only for the external boundary and the CONF
//! wire record.

/// Signed 64-bit sequence number.
pub type Seqno = i64;

/// No ordering assigned; the action was not serialized.
pub const SEQNO_ILL: Seqno = -1;

/// Empty history; no actions applied.
pub const SEQNO_NIL: Seqno = 0;

/// First assignable sequence number.
pub const SEQNO_FIRST: Seqno = 1;

/// Map an optional seqno to its boundary sentinel.
pub fn seqno_or_ill(seqno: Option<Seqno>) -> Seqno {
    seqno.unwrap_or(SEQNO_ILL)
}

/// Map a boundary sentinel back to an optional seqno.
///
/// `SEQNO_ILL` means unordered; everything else (including `SEQNO_NIL`)
/// is a real history position.
pub fn seqno_from_wire(raw: Seqno) -> Option<Seqno> {
    if raw == SEQNO_ILL {
        None
    } else {
        Some(raw)
    }
}
