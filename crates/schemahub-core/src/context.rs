//! Context (tenant) naming and qualified-subject parsing.
//!
//! A context is a namespace: schema ids, subjects, configs, and modes all
//! live strictly within one context. Names are case-sensitive and compared
//! byte-exact everywhere they appear in keys.

/// The default context every unqualified subject lives in.
pub const DEFAULT_CONTEXT: &str = ".";

/// The subject name under which context-global config and mode are stored.
pub const GLOBAL_SUBJECT: &str = "";

/// Returns `true` when `ctx` is the default context.
pub fn is_default_context(ctx: &str) -> bool {
    ctx == DEFAULT_CONTEXT
}

/// Split a possibly context-qualified subject into `(context, subject)`.
///
/// Clients may address a context inline with the `:.ctx:subject` syntax.
/// An empty context segment (`:.:subject`) selects the default context, as
/// does any subject without the qualifier.
pub fn split_qualified_subject(subject: &str) -> (String, String) {
    if let Some(rest) = subject.strip_prefix(":.") {
        if let Some((ctx, subj)) = rest.split_once(':') {
            let ctx = if ctx.is_empty() {
                DEFAULT_CONTEXT.to_string()
            } else {
                ctx.to_string()
            };
            return (ctx, subj.to_string());
        }
    }
    (DEFAULT_CONTEXT.to_string(), subject.to_string())
}

/// Render a `(context, subject)` pair back into qualified form.
pub fn qualify_subject(ctx: &str, subject: &str) -> String {
    if is_default_context(ctx) {
        subject.to_string()
    } else {
        format!(":.{ctx}:{subject}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unqualified_subject_lands_in_default_context() {
        let (ctx, subj) = split_qualified_subject("users-value");
        assert_eq!(ctx, DEFAULT_CONTEXT);
        assert_eq!(subj, "users-value");
    }

    #[test]
    fn qualified_subject_carries_its_context() {
        let (ctx, subj) = split_qualified_subject(":.staging:users-value");
        assert_eq!(ctx, "staging");
        assert_eq!(subj, "users-value");
    }

    #[test]
    fn empty_qualifier_is_the_default_context() {
        let (ctx, subj) = split_qualified_subject(":.:orders");
        assert_eq!(ctx, DEFAULT_CONTEXT);
        assert_eq!(subj, "orders");
    }

    #[test]
    fn context_names_are_case_sensitive() {
        let (lower, _) = split_qualified_subject(":.dev:s");
        let (upper, _) = split_qualified_subject(":.DEV:s");
        assert_ne!(lower, upper);
    }

    #[test]
    fn qualify_roundtrip() {
        assert_eq!(qualify_subject(DEFAULT_CONTEXT, "orders"), "orders");
        assert_eq!(qualify_subject("dev", "orders"), ":.dev:orders");
        let (ctx, subj) = split_qualified_subject(&qualify_subject("dev", "orders"));
        assert_eq!((ctx.as_str(), subj.as_str()), ("dev", "orders"));
    }
}
