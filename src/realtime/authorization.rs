use std::{collections::HashMap, sync::Arc};

use super::ObserverSubscription;

/// Decides whether one observer may see one device's data.
///
/// Evaluated per observer for every broadcast, so implementations must be
/// cheap and free of side effects.
pub trait AuthorizationFilter: Send + Sync {
    fn is_authorized(&self, observer: &ObserverSubscription, device_id: &str) -> bool;
}

/// Resolves the devices a user has registered.
///
/// Stands in for the user-profile store, which lives outside this service.
pub trait ProfileDirectory: Send + Sync {
    /// Registered devices of `user`, default device first. Empty when unknown.
    fn devices_for(&self, user: &str) -> &[String];

    fn owns(&self, user: &str, device_id: &str) -> bool {
        self.devices_for(user).iter().any(|d| d == device_id)
    }

    /// The device a new connection should follow: `requested` if the user owns
    /// it, otherwise the user's default device. `None` when the user is
    /// unknown or requested a device they don't own.
    fn resolve(&self, user: Option<&str>, requested: Option<&str>) -> Option<String> {
        let user = user?;
        match requested {
            Some(device) => self.owns(user, device).then(|| device.to_owned()),
            None => self.devices_for(user).first().cloned(),
        }
    }
}

/// `ProfileDirectory` loaded once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticProfileDirectory {
    devices: HashMap<String, Vec<String>>,
}

impl StaticProfileDirectory {
    pub fn new(devices: HashMap<String, Vec<String>>) -> Self {
        Self { devices }
    }
}

impl ProfileDirectory for StaticProfileDirectory {
    fn devices_for(&self, user: &str) -> &[String] {
        self.devices.get(user).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Authorizes an observer for the device it follows, provided its user still
/// owns that device.
#[derive(Clone)]
pub struct ProfileFilter {
    directory: Arc<dyn ProfileDirectory>,
}

impl ProfileFilter {
    pub fn new(directory: Arc<dyn ProfileDirectory>) -> Self {
        Self { directory }
    }
}

impl AuthorizationFilter for ProfileFilter {
    fn is_authorized(&self, observer: &ObserverSubscription, device_id: &str) -> bool {
        let (Some(user), Some(followed)) = (&observer.user, &observer.device_id) else {
            return false;
        };
        followed == device_id && self.directory.owns(user, device_id)
    }
}
