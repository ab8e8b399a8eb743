//! Connectivity probe.

use std::sync::atomic::{AtomicBool, Ordering};

/// Best-effort, synchronous network state.
pub trait Connectivity: Send + Sync {
    fn is_online(&self) -> bool;

    fn is_on_wifi(&self) -> bool;
}

/// Connectivity flags set by the platform layer's network callbacks.
#[derive(Debug)]
pub struct StaticConnectivity {
    online: AtomicBool,
    wifi: AtomicBool,
}

impl StaticConnectivity {
    pub const fn new(online: bool, wifi: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            wifi: AtomicBool::new(wifi),
        }
    }

    pub const fn online() -> Self {
        Self::new(true, true)
    }

    pub const fn offline() -> Self {
        Self::new(false, false)
    }

    /// Update the online flag. Returns true when the device just came back.
    pub fn set_online(&self, online: bool) -> bool {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        online && !was_online
    }

    pub fn set_wifi(&self, wifi: bool) {
        self.wifi.store(wifi, Ordering::SeqCst);
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::online()
    }
}

impl Connectivity for StaticConnectivity {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn is_on_wifi(&self) -> bool {
        self.is_online() && self.wifi.load(Ordering::SeqCst)
    }
}
