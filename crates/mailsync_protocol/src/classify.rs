//! Response status classification.

use mailsync_store::MutationKind;

/// How the engine should treat a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseClass {
    /// The request took effect.
    Success,
    /// Transient failure; try again later.
    Retryable,
    /// The server refused the request; retrying cannot help.
    Terminal,
    /// The pull cursor is no longer valid; resync the container from scratch.
    CursorExpired,
}

fn base(status: u16) -> ResponseClass {
    match status {
        200..=299 => ResponseClass::Success,
        408 | 429 => ResponseClass::Retryable,
        500..=599 => ResponseClass::Retryable,
        _ => ResponseClass::Terminal,
    }
}

/// Classifies a mutation replay response. Deleting something the server no
/// longer has (404 or 410) counts as success.
#[must_use]
pub fn classify_mutation(kind: &MutationKind, status: u16) -> ResponseClass {
    match (kind, status) {
        (MutationKind::Delete, 404 | 410) => ResponseClass::Success,
        _ => base(status),
    }
}

/// Classifies a pull response. 410 means the cursor expired.
#[must_use]
pub fn classify_pull(status: u16) -> ResponseClass {
    match status {
        410 => ResponseClass::CursorExpired,
        _ => base(status),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_range() {
        for status in [200, 201, 204] {
            assert_eq!(classify_mutation(&MutationKind::Update, status), ResponseClass::Success);
        }
    }

    #[test]
    fn retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert_eq!(classify_mutation(&MutationKind::Create, status), ResponseClass::Retryable);
        }
    }

    #[test]
    fn terminal_statuses() {
        for status in [400, 401, 403, 404, 409, 422] {
            assert_eq!(classify_mutation(&MutationKind::Update, status), ResponseClass::Terminal);
        }
    }

    #[test]
    fn delete_of_missing_entity_succeeds() {
        assert_eq!(classify_mutation(&MutationKind::Delete, 404), ResponseClass::Success);
        assert_eq!(classify_mutation(&MutationKind::Delete, 410), ResponseClass::Success);
        assert_eq!(classify_mutation(&MutationKind::Delete, 403), ResponseClass::Terminal);
    }

    #[test]
    fn pull_classes() {
        assert_eq!(classify_pull(200), ResponseClass::Success);
        assert_eq!(classify_pull(410), ResponseClass::CursorExpired);
        assert_eq!(classify_pull(503), ResponseClass::Retryable);
        assert_eq!(classify_pull(401), ResponseClass::Terminal);
    }
}
