//! Close-code classification.
//!
//! Every close code maps to exactly one [`CloseClass`] through [`CLOSE_CODES`].
//! Codes not in the table are treated as resumable.

/// What a close code means for the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseClass {
    /// Reconnect and resume the existing session.
    Resumable,
    /// Reconnect, discard the session, and identify again.
    Reidentify,
    /// Stop. Reconnecting would fail the same way.
    Fatal,
}

/// A classified close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseCode {
    /// Numeric code.
    pub code: u16,
    /// Short description.
    pub reason: &'static str,
    /// What to do about it.
    pub class: CloseClass,
}

/// Code used when no close frame arrived.
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Code the client sends when it intends to resume.
pub const RESUMABLE_TEARDOWN: u16 = 4000;
/// Code the client sends on shutdown or before identifying again.
pub const NORMAL_TEARDOWN: u16 = 1000;

/// The close-code table.
pub const CLOSE_CODES: &[CloseCode] = &[
    entry(1000, "normal closure", CloseClass::Reidentify),
    entry(1001, "going away", CloseClass::Reidentify),
    entry(ABNORMAL_CLOSURE, "abnormal closure", CloseClass::Resumable),
    entry(4000, "unknown error", CloseClass::Resumable),
    entry(4001, "unknown opcode", CloseClass::Resumable),
    entry(4002, "decode error", CloseClass::Resumable),
    entry(4003, "not authenticated", CloseClass::Reidentify),
    entry(4004, "authentication failed", CloseClass::Fatal),
    entry(4005, "already authenticated", CloseClass::Resumable),
    entry(4007, "invalid sequence", CloseClass::Reidentify),
    entry(4008, "rate limited", CloseClass::Resumable),
    entry(4009, "session timed out", CloseClass::Reidentify),
    entry(4010, "invalid shard", CloseClass::Fatal),
    entry(4011, "sharding required", CloseClass::Fatal),
    entry(4012, "invalid API version", CloseClass::Fatal),
    entry(4013, "invalid intents", CloseClass::Fatal),
    entry(4014, "disallowed intents", CloseClass::Fatal),
];

const fn entry(code: u16, reason: &'static str, class: CloseClass) -> CloseCode {
    CloseCode {
        code,
        reason,
        class,
    }
}

/// Look up `code`. Unknown codes are resumable.
#[must_use]
pub fn classify(code: u16) -> CloseCode {
    CLOSE_CODES
        .iter()
        .find(|c| c.code == code)
        .copied()
        .unwrap_or(CloseCode {
            code,
            reason: "unknown",
            class: CloseClass::Resumable,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_codes() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert_eq!(classify(code).class, CloseClass::Fatal, "code {code}");
        }
    }

    #[test]
    fn reidentify_codes() {
        for code in [1000, 1001, 4003, 4007, 4009] {
            assert_eq!(classify(code).class, CloseClass::Reidentify, "code {code}");
        }
    }

    #[test]
    fn resumable_codes() {
        for code in [1006, 4000, 4001, 4002, 4005, 4008] {
            assert_eq!(classify(code).class, CloseClass::Resumable, "code {code}");
        }
    }

    #[test]
    fn unknown_codes_are_resumable() {
        let close = classify(4999);
        assert_eq!(close.class, CloseClass::Resumable);
        assert_eq!(close.reason, "unknown");
        assert_eq!(close.code, 4999);
    }

    #[test]
    fn table_has_no_duplicates() {
        for (i, a) in CLOSE_CODES.iter().enumerate() {
            for b in CLOSE_CODES.iter().skip(i.saturating_add(1)) {
                assert_ne!(a.code, b.code);
            }
        }
    }
}
