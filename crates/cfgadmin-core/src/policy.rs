//! Binding policy
//!
//! Decides whether a consumer may receive a configuration given the
//! configuration's owner location. Evaluated for every delivery.

use std::sync::Arc;

/// Owner locations starting with this prefix may be shared by many
/// providers
pub const MULTI_LOCATION_PREFIX: &str = "?";

/// Permission check for multi-location owners
pub trait AccessControl: Send + Sync {
    /// May a consumer at `consumer_location` see configurations owned by
    /// the multi-location `owner_location`?
    fn permits(&self, consumer_location: &str, owner_location: &str) -> bool;
}

/// Visibility rule, pure apart from the optional access check.
///
/// - unbound (`None`) owner: visible to everyone
/// - multi-location owner: delegated to `access`, visible if absent
/// - otherwise: exact location match
#[must_use]
pub fn can_deliver(
    consumer_location: &str,
    owner_location: Option<&str>,
    access: Option<&dyn AccessControl>,
) -> bool {
    match owner_location {
        None => true,
        Some(owner) if owner.starts_with(MULTI_LOCATION_PREFIX) => {
            access.map_or(true, |access| access.permits(consumer_location, owner))
        }
        Some(owner) => consumer_location == owner,
    }
}

/// Binding policy holding the optional access check
#[derive(Clone, Default)]
pub struct BindingPolicy {
    access: Option<Arc<dyn AccessControl>>,
}

impl std::fmt::Debug for BindingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingPolicy")
            .field("access_control", &self.access.is_some())
            .finish()
    }
}

impl BindingPolicy {
    /// Policy without an access check
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy delegating multi-location owners to `access`
    #[inline]
    #[must_use]
    pub fn with_access_control(access: Arc<dyn AccessControl>) -> Self {
        Self {
            access: Some(access),
        }
    }

    /// See [`can_deliver`]
    #[inline]
    #[must_use]
    pub fn can_deliver(&self, consumer_location: &str, owner_location: Option<&str>) -> bool {
        can_deliver(consumer_location, owner_location, self.access.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DenyAll;

    impl AccessControl for DenyAll {
        fn permits(&self, _: &str, _: &str) -> bool {
            false
        }
    }

    #[test]
    fn visibility_table() {
        let policy = BindingPolicy::new();
        assert!(policy.can_deliver("any", None));
        assert!(policy.can_deliver("A", Some("A")));
        assert!(!policy.can_deliver("B", Some("A")));
        assert!(policy.can_deliver("X", Some("?multi")));
    }

    #[test]
    fn multi_location_delegates_to_access_control() {
        let policy = BindingPolicy::with_access_control(Arc::new(DenyAll));
        assert!(!policy.can_deliver("X", Some("?multi")));
        assert!(policy.can_deliver("A", Some("A")));
        assert!(policy.can_deliver("X", None));
    }
}
