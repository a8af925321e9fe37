//! Shared state of every simulated hub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use homehub_app::ports::TransportError;

#[derive(Debug, Default)]
struct HubState {
    online: bool,
    dials: usize,
    journal: Vec<String>,
    levels: HashMap<String, f32>,
}

impl HubState {
    fn new() -> Self {
        Self {
            online: true,
            ..Self::default()
        }
    }

    fn apply(&mut self, line: &str) {
        let mut words = line.split_whitespace();
        if words.next() == Some("SET")
            && let (Some(address), Some(level)) = (words.next(), words.next())
            && let Ok(level) = level.parse()
        {
            self.levels.insert(address.to_string(), level);
        }
        self.journal.push(line.to_string());
    }
}

/// Hubs keyed by their connection address. Cloning shares the same hubs.
#[derive(Debug, Clone, Default)]
pub struct VirtualPlant {
    hubs: Arc<Mutex<HashMap<String, HubState>>>,
}

impl VirtualPlant {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn hubs(&self) -> MutexGuard<'_, HashMap<String, HubState>> {
        self.hubs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn dial(&self, address: &str) -> Result<(), TransportError> {
        let mut hubs = self.hubs();
        let hub = hubs.entry(address.to_string()).or_insert_with(HubState::new);
        if !hub.online {
            return Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("virtual hub {address} is offline"),
            )
            .into());
        }
        hub.dials += 1;
        Ok(())
    }

    pub(crate) fn receive(&self, address: &str, line: &str) -> Result<(), TransportError> {
        let mut hubs = self.hubs();
        let hub = hubs.entry(address.to_string()).or_insert_with(HubState::new);
        if !hub.online {
            return Err(TransportError::Closed);
        }
        hub.apply(line);
        Ok(())
    }

    #[must_use]
    pub fn is_online(&self, address: &str) -> bool {
        self.hubs().get(address).is_none_or(|hub| hub.online)
    }

    /// Take a hub off the network. Open connections fail their next write.
    pub fn set_offline(&self, address: &str, offline: bool) {
        self.hubs()
            .entry(address.to_string())
            .or_insert_with(HubState::new)
            .online = !offline;
    }

    /// Every line the hub received, oldest first.
    #[must_use]
    pub fn journal(&self, address: &str) -> Vec<String> {
        self.hubs()
            .get(address)
            .map(|hub| hub.journal.clone())
            .unwrap_or_default()
    }

    /// Last level written to a zone address.
    #[must_use]
    pub fn level(&self, address: &str, zone_address: &str) -> Option<f32> {
        self.hubs()
            .get(address)
            .and_then(|hub| hub.levels.get(zone_address).copied())
    }

    #[must_use]
    pub fn dials(&self, address: &str) -> usize {
        self.hubs().get(address).map_or(0, |hub| hub.dials)
    }
}
