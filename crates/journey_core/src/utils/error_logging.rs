//! Error logging through tracing with miette's formatting

use std::error::Error;

/// Log an error at ERROR level using its Debug form. Pass a
/// `miette::Report` to get the rendered diagnostic.
#[macro_export]
macro_rules! log_error {
    ($err:expr) => {{
        let err = &$err;
        tracing::error!("{:?}", err);
    }};
    ($msg:expr, $err:expr) => {{
        let err = &$err;
        tracing::error!("{}: {:?}", $msg, err);
    }};
}

/// Like [`log_error!`], followed by one line per underlying cause
#[macro_export]
macro_rules! log_error_chain {
    ($err:expr) => {{
        let err = &$err;
        tracing::error!("{:?}", err);
        for (depth, cause) in $crate::utils::error_chain(err).enumerate() {
            tracing::error!("  caused by {}: {}", depth + 1, cause);
        }
    }};
    ($msg:expr, $err:expr) => {{
        let err = &$err;
        tracing::error!("{}: {:?}", $msg, err);
        for (depth, cause) in $crate::utils::error_chain(err).enumerate() {
            tracing::error!("  caused by {}: {}", depth + 1, cause);
        }
    }};
}

/// Causes of an error, nearest first, excluding the error itself
pub fn error_chain<'a>(
    err: &'a (dyn Error + 'static),
) -> impl Iterator<Item = &'a (dyn Error + 'static)> {
    std::iter::successors(err.source(), |cause: &&'a (dyn Error + 'static)| {
        (*cause).source()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        CoreError,
        gateway::GatewayError,
        model::ObjectKind,
    };

    fn flow_failure() -> CoreError {
        CoreError::ExportFailed {
            journey: "Login".to_string(),
            cause: Box::new(CoreError::gateway(
                "reading node 'page-1'",
                GatewayError::not_found(ObjectKind::Node, "page-1"),
            )),
        }
    }

    #[test]
    fn test_error_chain_walks_nested_causes() {
        let error = flow_failure();
        let causes: Vec<String> = error_chain(&error).map(|cause| cause.to_string()).collect();
        assert_eq!(
            causes,
            vec![
                "Gateway call failed while reading node 'page-1'",
                "node 'page-1' not found",
            ]
        );
    }

    #[test]
    fn test_error_chain_is_empty_without_source() {
        let error = GatewayError::server(502, "bad gateway");
        assert_eq!(error_chain(&error).count(), 0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_macros_emit_diagnostics() {
        let error = CoreError::not_found(ObjectKind::Theme, "Starter");
        crate::log_error!("Theme lookup failed", error);
        assert!(logs_contain("Theme lookup failed"));
        assert!(logs_contain("NotFound"));

        crate::log_error_chain!(flow_failure());
        assert!(logs_contain("caused by 1: Gateway call failed"));
        assert!(logs_contain("caused by 2: node 'page-1' not found"));
    }
}
