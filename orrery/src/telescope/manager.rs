use std::collections::BTreeMap;
use std::time::Duration;

use minstant::Instant;

use super::TelescopeError;
use super::client::{TelescopeLink, now_us};
use super::direction::Direction;
use super::protocol::GotoFrame;
use super::url::TelescopeUrl;
use crate::config::TelescopeConfig;
use crate::link::{ConnectionLoop, Connector, Handle, PollSelector, Selector, TcpConnector};
use crate::trace::{debug, info, warn};

/// Highest configurable slot number.
pub const MAX_SLOT: u8 = 8;
/// Ocular fields of view read per slot.
pub const MAX_OCULARS: usize = 9;
/// Wait between a failed or lost connection and the next attempt.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

struct Slot {
    url: TelescopeUrl,
    oculars: Vec<f64>,
    handle: Option<Handle>,
    retry_at: Option<Instant>,
}

/// Telescopes by slot, all serviced from one [`ConnectionLoop`].
///
/// Call [`communicate`](Self::communicate) once per frame of the control
/// loop. It never blocks on the network apart from host name resolution.
pub struct TelescopeManager<C = TcpConnector, S = PollSelector> {
    link: ConnectionLoop<TelescopeLink, C, S>,
    slots: BTreeMap<u8, Slot>,
    reconnect_delay: Duration,
}

impl TelescopeManager {
    /// # Errors
    ///
    /// Bad URLs, out-of-range or duplicate slots.
    pub fn from_config(telescopes: &[TelescopeConfig]) -> Result<Self, TelescopeError> {
        let mut manager = Self::with_parts(TcpConnector, PollSelector);
        for cfg in telescopes {
            manager.add(cfg.slot, cfg.url.parse()?, &cfg.oculars)?;
        }
        Ok(manager)
    }
}

impl<C: Connector, S: Selector> TelescopeManager<C, S> {
    pub fn with_parts(connector: C, selector: S) -> Self {
        Self {
            link: ConnectionLoop::with_parts(connector, selector),
            slots: BTreeMap::new(),
            reconnect_delay: RECONNECT_DELAY,
        }
    }

    #[must_use]
    pub const fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Registers a telescope. The first connection attempt happens in the
    /// next `communicate()`.
    ///
    /// Only the first nine ocular values are kept and non-positive values
    /// are ignored.
    ///
    /// # Errors
    ///
    /// [`TelescopeError::InvalidSlot`], [`TelescopeError::DuplicateSlot`].
    pub fn add(&mut self, slot: u8, url: TelescopeUrl, oculars: &[f64]) -> Result<(), TelescopeError> {
        if slot > MAX_SLOT {
            return Err(TelescopeError::InvalidSlot(slot));
        }
        if self.slots.contains_key(&slot) {
            return Err(TelescopeError::DuplicateSlot(slot));
        }
        let oculars = oculars
            .iter()
            .take(MAX_OCULARS)
            .copied()
            .filter(|fov| *fov > 0.0)
            .collect();
        info!(slot, url = %url, "telescope configured");
        self.slots.insert(
            slot,
            Slot {
                url,
                oculars,
                handle: None,
                retry_at: None,
            },
        );
        Ok(())
    }

    /// Closes and forgets the telescope in `slot`.
    pub fn remove(&mut self, slot: u8) -> bool {
        let Some(entry) = self.slots.remove(&slot) else {
            return false;
        };
        if let Some(handle) = entry.handle {
            self.link.disconnect(handle);
        }
        true
    }

    /// Reconnects slots whose retry time has come, then runs one tick of the
    /// connection loop. Returns the number of connections serviced.
    ///
    /// # Errors
    ///
    /// Only a failed readiness check; per-telescope failures are logged and
    /// retried.
    pub fn communicate(&mut self) -> Result<usize, TelescopeError> {
        if self.slots.is_empty() {
            return Ok(0);
        }
        let now = Instant::now();
        self.reap_lost(now);

        for (slot, entry) in &mut self.slots {
            if entry.handle.is_some() || entry.retry_at.is_some_and(|at| now < at) {
                continue;
            }
            let link = TelescopeLink::new(entry.url.name.clone(), entry.url.delay_us);
            match self.link.connect(&entry.url.host, entry.url.port, link) {
                Ok(handle) => {
                    debug!(slot = *slot, %handle, "telescope connect started");
                    entry.handle = Some(handle);
                    entry.retry_at = None;
                }
                Err(e) => {
                    warn!(slot = *slot, telescope = %entry.url.name, error = %e, "telescope connect failed");
                    entry.retry_at = Some(now + self.reconnect_delay);
                }
            }
        }

        let serviced = self.link.tick()?;
        self.reap_lost(Instant::now());
        Ok(serviced)
    }

    /// Schedules a reconnect for slots whose connection the loop dropped.
    fn reap_lost(&mut self, now: Instant) {
        for (slot, entry) in &mut self.slots {
            if let Some(handle) = entry.handle
                && !self.link.contains(handle)
            {
                info!(slot = *slot, telescope = %entry.url.name, "telescope disconnected, will retry");
                entry.handle = None;
                entry.retry_at = Some(now + self.reconnect_delay);
            }
        }
    }

    /// Sends a goto to right ascension `ra_hours`, declination `dec_deg`.
    ///
    /// # Errors
    ///
    /// [`TelescopeError::UnknownSlot`] or [`TelescopeError::NotConnected`].
    pub fn goto(&mut self, slot: u8, ra_hours: f64, dec_deg: f64) -> Result<(), TelescopeError> {
        self.goto_direction(slot, &Direction::from_hours_degrees(ra_hours, dec_deg))
    }

    /// Sends a goto towards a J2000 direction.
    ///
    /// # Errors
    ///
    /// [`TelescopeError::UnknownSlot`] or [`TelescopeError::NotConnected`].
    pub fn goto_direction(&mut self, slot: u8, target: &Direction) -> Result<(), TelescopeError> {
        let handle = self.connected_handle(slot)?;
        let mut buf = Vec::with_capacity(20);
        GotoFrame::new(now_us(), target).encode(&mut buf);
        self.link.send(handle, &buf)?;
        debug!(slot, "goto queued");
        Ok(())
    }

    fn connected_handle(&self, slot: u8) -> Result<Handle, TelescopeError> {
        let entry = self.slots.get(&slot).ok_or(TelescopeError::UnknownSlot(slot))?;
        entry
            .handle
            .filter(|h| self.link.connection(*h).is_some_and(|c| c.is_established()))
            .ok_or(TelescopeError::NotConnected(slot))
    }

    #[must_use]
    pub fn is_connected(&self, slot: u8) -> bool {
        self.connected_handle(slot).is_ok()
    }

    /// Current pointing, delayed by the slot's configured latency.
    #[must_use]
    pub fn position(&self, slot: u8) -> Option<Direction> {
        let handle = self.connected_handle(slot).ok()?;
        self.link.handler(handle)?.position(now_us())
    }

    /// Slots whose telescope points within `limit_fov_deg` of `direction`.
    #[must_use]
    pub fn search_around(&self, direction: &Direction, limit_fov_deg: f64) -> Vec<u8> {
        let cos_limit = limit_fov_deg.to_radians().cos();
        self.slots
            .keys()
            .copied()
            .filter(|slot| {
                self.position(*slot)
                    .is_some_and(|pos| pos.dot(direction) >= cos_limit)
            })
            .collect()
    }

    /// Slot of the telescope with exactly this name.
    #[must_use]
    pub fn search_by_name(&self, name: &str) -> Option<u8> {
        self.slots
            .iter()
            .find(|(_, entry)| entry.url.name == name)
            .map(|(slot, _)| *slot)
    }

    /// Telescope names starting with `prefix` (case-insensitive), sorted and
    /// truncated to `max`.
    #[must_use]
    pub fn list_matching_names(&self, prefix: &str, max: usize) -> Vec<String> {
        if max == 0 {
            return Vec::new();
        }
        let prefix = prefix.to_uppercase();
        let mut names: Vec<String> = self
            .slots
            .values()
            .map(|entry| &entry.url.name)
            .filter(|name| name.to_uppercase().starts_with(&prefix))
            .cloned()
            .collect();
        names.sort();
        names.truncate(max);
        names
    }

    #[must_use]
    pub fn oculars(&self, slot: u8) -> &[f64] {
        self.slots.get(&slot).map_or(&[][..], |entry| entry.oculars.as_slice())
    }

    #[must_use]
    pub fn name(&self, slot: u8) -> Option<&str> {
        self.slots.get(&slot).map(|entry| entry.url.name.as_str())
    }

    pub fn slots(&self) -> impl Iterator<Item = u8> + '_ {
        self.slots.keys().copied()
    }

    #[must_use]
    pub fn connection_loop(&self) -> &ConnectionLoop<TelescopeLink, C, S> {
        &self.link
    }

    /// Closes every connection. Slots stay configured and reconnect on the
    /// next `communicate()`.
    pub fn disconnect_all(&mut self) {
        for entry in self.slots.values_mut() {
            if let Some(handle) = entry.handle.take() {
                self.link.disconnect(handle);
            }
            entry.retry_at = None;
        }
    }
}
