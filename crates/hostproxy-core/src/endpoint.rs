//! Endpoint descriptors and the registry that composes them.

use crate::ipc::IpcServer;
use crate::version::Version;
use crate::{ProxyError, Result};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Attaches one (group, version) service to an endpoint server.
pub trait Registrant: Send + Sync + 'static {
    fn register(&self, server: &mut IpcServer);
}

/// One RPC service instance to host.
#[derive(Clone)]
pub struct EndpointDescriptor {
    group: String,
    version: Version,
    registrant: Arc<dyn Registrant>,
}

impl EndpointDescriptor {
    pub fn new(group: impl Into<String>, version: Version, registrant: Arc<dyn Registrant>) -> Self {
        Self {
            group: group.into(),
            version,
            registrant,
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn registrant(&self) -> &Arc<dyn Registrant> {
        &self.registrant
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("group", &self.group)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// The flat set of endpoints a process hosts.
///
/// (group, version) pairs are unique; inserting a duplicate is rejected
/// rather than overwriting the earlier entry.
#[derive(Debug, Default)]
pub struct EndpointRegistry {
    descriptors: Vec<EndpointDescriptor>,
    seen: HashSet<(String, Version)>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, descriptor: EndpointDescriptor) -> Result<()> {
        if descriptor.group.is_empty() {
            return Err(ProxyError::Config {
                message: format!("Endpoint at {} has an empty group name", descriptor.version),
            });
        }

        let key = (descriptor.group.clone(), descriptor.version.clone());
        if !self.seen.insert(key) {
            return Err(ProxyError::DuplicateRegistration {
                group: descriptor.group,
                version: descriptor.version.to_string(),
            });
        }

        self.descriptors.push(descriptor);
        Ok(())
    }

    /// Insert every descriptor, stopping at the first rejected one.
    pub fn extend(&mut self, descriptors: impl IntoIterator<Item = EndpointDescriptor>) -> Result<()> {
        descriptors.into_iter().try_for_each(|d| self.insert(d))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EndpointDescriptor> {
        self.descriptors.iter()
    }

    /// Versions registered for `group`, in registration order.
    pub fn versions_of(&self, group: &str) -> Vec<&Version> {
        self.descriptors
            .iter()
            .filter(|d| d.group == group)
            .map(|d| &d.version)
            .collect()
    }

    pub fn into_descriptors(self) -> Vec<EndpointDescriptor> {
        self.descriptors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Nothing;

    impl Registrant for Nothing {
        fn register(&self, _server: &mut IpcServer) {}
    }

    fn descriptor(group: &str, version: &str) -> EndpointDescriptor {
        EndpointDescriptor::new(group, Version::parse(version).unwrap(), Arc::new(Nothing))
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut registry = EndpointRegistry::new();
        registry.insert(descriptor("disk", "v1")).unwrap();
        registry.insert(descriptor("disk", "v1beta3")).unwrap();
        registry.insert(descriptor("volume", "v1")).unwrap();

        let err = registry.insert(descriptor("disk", "1.0.0")).unwrap_err();
        assert!(matches!(
            err,
            ProxyError::DuplicateRegistration { ref group, ref version } if group == "disk" && version == "v1"
        ));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_insert_rejects_empty_group() {
        let mut registry = EndpointRegistry::new();
        assert!(registry.insert(descriptor("", "v1")).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_extend_and_versions_of() {
        let mut registry = EndpointRegistry::new();
        registry
            .extend(vec![
                descriptor("iscsi", "v1alpha1"),
                descriptor("iscsi", "v1alpha2"),
                descriptor("smb", "v1"),
            ])
            .unwrap();

        let versions: Vec<String> = registry
            .versions_of("iscsi")
            .iter()
            .map(|v| v.to_string())
            .collect();
        assert_eq!(versions, ["v1alpha1", "v1alpha2"]);
        assert_eq!(registry.into_descriptors().len(), 3);
    }
}
