//! Logging initialization
//!
//! One process-wide subscriber, chosen by [`Profile`].

use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Logging profile configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable output, `contentdb=debug`
    Development,
    /// JSON output, `contentdb=info`
    Production,
    /// No output; tests install [`super::test_capture`] instead
    Test,
}

impl Profile {
    /// Filter used when `RUST_LOG` is not set
    pub fn default_filter(&self) -> &'static str {
        match self {
            Profile::Development => "contentdb=debug",
            Profile::Production => "contentdb=info",
            Profile::Test => "off",
        }
    }
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber for `profile`
///
/// Only the first call has an effect. `RUST_LOG` overrides the profile's
/// default filter.
///
/// # Example
///
/// ```
/// use contentdb_core::logging_facility::{init, Profile};
///
/// init(Profile::Development);
/// ```
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(profile.default_filter()));
        // try_init: a host application may already own the global subscriber
        let already_set = match profile {
            Profile::Development => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .try_init()
                .is_err(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .try_init()
                .is_err(),
            Profile::Test => tracing_subscriber::registry().try_init().is_err(),
        };
        if already_set {
            tracing::debug!("global subscriber already set, keeping it");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        for profile in [Profile::Test, Profile::Development, Profile::Production] {
            init(profile);
        }
        init(Profile::Test);
    }

    #[test]
    fn test_default_filters_target_the_crate() {
        assert_eq!(Profile::Development.default_filter(), "contentdb=debug");
        assert_eq!(Profile::Production.default_filter(), "contentdb=info");
    }
}
