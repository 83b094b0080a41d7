//! Peripheral discovery, filtering and selection

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::roster::{DeviceRoster, RosterSlot};
use crate::config::ScanConfig;
use crate::transport::{Transport, TransportEvent};
use crate::types::{ConnectionState, DiscoveredPeripheral, PeripheralId};
use crate::{LinkError, Result};

/// A discovered peripheral and its connection state
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedPeripheral {
    pub id: PeripheralId,
    pub name: Option<String>,
    pub rssi: i16,
    pub uart_advertised: bool,
    pub state: ConnectionState,
}

impl ScannedPeripheral {
    fn from_discovery(found: DiscoveredPeripheral) -> Self {
        Self {
            id: found.id,
            name: found.name,
            rssi: found.rssi,
            uart_advertised: found.uart_advertised,
            state: ConnectionState::Disconnected,
        }
    }
}

/// Discovered peripherals plus the selection the user is connecting to
///
/// Transport events are fed in through [`handle_event`](Self::handle_event);
/// the session does not subscribe on its own, so its owner decides when
/// events are applied. The filtered view is cached and recomputed only after
/// a change.
pub struct ScanSession {
    transport: Arc<dyn Transport>,
    config: ScanConfig,
    peripherals: HashMap<PeripheralId, ScannedPeripheral>,
    filtered: Vec<ScannedPeripheral>,
    dirty: bool,
    recomputes: u64,
    selected: Option<PeripheralId>,
    state: ConnectionState,
    roster: DeviceRoster,
}

impl fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSession")
            .field("config", &self.config)
            .field("peripherals", &self.peripherals.len())
            .field("selected", &self.selected)
            .field("state", &self.state)
            .field("roster", &self.roster)
            .finish_non_exhaustive()
    }
}

impl ScanSession {
    pub fn new(transport: Arc<dyn Transport>, config: ScanConfig) -> Self {
        Self {
            transport,
            config,
            peripherals: HashMap::new(),
            filtered: Vec::new(),
            dirty: true,
            recomputes: 0,
            selected: None,
            state: ConnectionState::Disconnected,
            roster: DeviceRoster::new(),
        }
    }

    pub async fn start_scan(&self) -> Result<()> {
        info!("Starting peripheral scan");
        self.transport.start_scan().await
    }

    pub async fn stop_scan(&self) -> Result<()> {
        info!("Stopping peripheral scan");
        self.transport.stop_scan().await
    }

    /// Drop every peripheral that is not connected and ask the transport to
    /// report what is still in range
    pub async fn refresh(&mut self) -> Result<()> {
        self.peripherals.retain(|_, p| p.state != ConnectionState::Disconnected);
        self.dirty = true;
        self.transport.refresh().await
    }

    /// Forget every discovered peripheral
    pub fn clear(&mut self) {
        debug!(count = self.peripherals.len(), "Clearing discovered peripherals");
        self.peripherals.clear();
        self.dirty = true;
    }

    /// Apply one transport event.
    ///
    /// Returns the error a lifecycle event carries for the selected
    /// peripheral: a failed connect, or a failed service discovery after
    /// connecting (in which case the peripheral is disconnected again).
    pub async fn handle_event(&mut self, event: TransportEvent) -> Result<()> {
        self.dirty = true;

        match event {
            TransportEvent::Discovered(found) => {
                match self.peripherals.get_mut(&found.id) {
                    Some(known) => {
                        known.rssi = found.rssi;
                        known.uart_advertised = found.uart_advertised;
                        if found.name.is_some() {
                            known.name = found.name;
                        }
                    }
                    None => {
                        debug!(peripheral = %found.id, name = ?found.name, rssi = found.rssi, "Discovered peripheral");
                        self.peripherals
                            .insert(found.id.clone(), ScannedPeripheral::from_discovery(found));
                    }
                }
                Ok(())
            }
            TransportEvent::NameUpdated { peripheral, name } => {
                if let Some(known) = self.peripherals.get_mut(&peripheral) {
                    known.name = name;
                }
                Ok(())
            }
            TransportEvent::Connected(peripheral) => self.on_connected(peripheral).await,
            TransportEvent::ConnectFailed { peripheral, reason } => {
                warn!(%peripheral, "Connect failed: {}", reason);
                self.set_peripheral_state(&peripheral, ConnectionState::Disconnected);
                if self.selected.as_ref() == Some(&peripheral) {
                    self.clear_selection(&peripheral);
                    return Err(LinkError::ConnectFailed { peripheral, reason });
                }
                Ok(())
            }
            TransportEvent::Disconnected(peripheral) => {
                self.on_disconnected(&peripheral);
                Ok(())
            }
            TransportEvent::WriteFailed { .. } => Ok(()),
        }
    }

    async fn on_connected(&mut self, peripheral: PeripheralId) -> Result<()> {
        if self.selected.as_ref() != Some(&peripheral) {
            debug!(%peripheral, "Ignoring connection of unselected peripheral");
            return Ok(());
        }

        self.set_peripheral_state(&peripheral, ConnectionState::Connected);
        info!(%peripheral, "Connected, discovering services");

        if let Err(e) = self.transport.discover_services(&peripheral).await {
            error!(%peripheral, "Service discovery failed: {}", e);
            self.clear_selection(&peripheral);
            self.set_peripheral_state(&peripheral, ConnectionState::Disconnected);
            if let Err(disconnect_err) = self.transport.disconnect(&peripheral).await {
                warn!(%peripheral, "Disconnect after failed discovery failed: {}", disconnect_err);
            }
            return Err(e);
        }

        self.state = ConnectionState::Connected;
        Ok(())
    }

    fn on_disconnected(&mut self, peripheral: &PeripheralId) {
        debug!(%peripheral, "Peripheral disconnected");
        self.set_peripheral_state(peripheral, ConnectionState::Disconnected);
        self.roster.release_peripheral(peripheral);

        let Some(selected) = self.selected.clone() else {
            return;
        };
        let remaining = self
            .peripherals
            .values()
            .filter(|p| p.state == ConnectionState::Connected)
            .count();
        // A pending connect survives other peripherals dropping
        let pending = self.state == ConnectionState::Connecting;
        if &selected == peripheral || (remaining == 0 && !pending) {
            self.clear_selection(&selected);
        }
    }

    /// Select `peripheral` and ask the transport to connect to it.
    ///
    /// Completion arrives later as a transport event. Selecting another
    /// peripheral while a connect is still pending either cancels the
    /// pending one or fails with [`LinkError::ConnectConflict`], depending
    /// on [`ScanConfig::cancel_pending_on_reselect`].
    pub async fn connect(&mut self, peripheral: &PeripheralId) -> Result<()> {
        if !self.peripherals.contains_key(peripheral) {
            return Err(LinkError::UnknownPeripheral { peripheral: peripheral.clone() });
        }

        if let Some(selected) = self.selected.clone() {
            if &selected == peripheral && self.state != ConnectionState::Disconnected {
                debug!(%peripheral, state = ?self.state, "Already selected");
                return Ok(());
            }
            if self.state == ConnectionState::Connecting {
                if !self.config.cancel_pending_on_reselect {
                    return Err(LinkError::ConnectConflict {
                        pending: selected,
                        requested: peripheral.clone(),
                    });
                }
                warn!(pending = %selected, requested = %peripheral, "Cancelling pending connect");
                self.clear_selection(&selected);
                self.set_peripheral_state(&selected, ConnectionState::Disconnected);
                self.roster.release_peripheral(&selected);
                if let Err(e) = self.transport.disconnect(&selected).await {
                    warn!(pending = %selected, "Failed to cancel pending connect: {}", e);
                }
            }
        }

        info!(%peripheral, "Connecting");
        self.selected = Some(peripheral.clone());
        self.state = ConnectionState::Connecting;
        self.set_peripheral_state(peripheral, ConnectionState::Connecting);
        self.roster.assign(RosterSlot::Primary, peripheral.clone());
        self.dirty = true;

        if let Err(e) = self.transport.connect(peripheral).await {
            error!(%peripheral, "Connect request failed: {}", e);
            self.clear_selection(peripheral);
            self.set_peripheral_state(peripheral, ConnectionState::Disconnected);
            return Err(e);
        }
        Ok(())
    }

    /// Deselect `peripheral` and ask the transport to disconnect it
    pub async fn disconnect(&mut self, peripheral: &PeripheralId) -> Result<()> {
        info!(%peripheral, "Disconnecting");
        if self.selected.as_ref() == Some(peripheral) {
            self.clear_selection(peripheral);
        }
        self.roster.release_peripheral(peripheral);
        self.set_peripheral_state(peripheral, ConnectionState::Disconnected);
        self.dirty = true;
        self.transport.disconnect(peripheral).await
    }

    fn clear_selection(&mut self, peripheral: &PeripheralId) {
        if self.selected.as_ref() == Some(peripheral) {
            self.selected = None;
            self.state = ConnectionState::Disconnected;
        }
        self.roster.release_peripheral(peripheral);
    }

    fn set_peripheral_state(&mut self, peripheral: &PeripheralId, state: ConnectionState) {
        if let Some(known) = self.peripherals.get_mut(peripheral) {
            known.state = state;
        }
    }

    /// Read the peripheral's current RSSI and record it
    pub async fn refresh_rssi(&mut self, peripheral: &PeripheralId) -> Result<i16> {
        let rssi = self.transport.read_rssi(peripheral).await?;
        if let Some(known) = self.peripherals.get_mut(peripheral) {
            known.rssi = rssi;
            self.dirty = true;
        }
        Ok(rssi)
    }

    pub fn set_filters(&mut self, only_uart: bool, show_unnamed: bool) {
        if self.config.only_uart == only_uart && self.config.show_unnamed == show_unnamed {
            return;
        }
        debug!(only_uart, show_unnamed, "Scan filters changed");
        self.config.only_uart = only_uart;
        self.config.show_unnamed = show_unnamed;
        self.dirty = true;
    }

    /// UART-capable, named peripherals only
    pub fn set_default_filters(&mut self) {
        let defaults = ScanConfig::default();
        self.set_filters(defaults.only_uart, defaults.show_unnamed);
    }

    pub fn filters(&self) -> (bool, bool) {
        (self.config.only_uart, self.config.show_unnamed)
    }

    /// Human-readable summary of the active filters, `None` when nothing is
    /// filtered
    pub fn filters_description(&self) -> Option<String> {
        let mut parts = Vec::new();
        if !self.config.show_unnamed {
            parts.push("with name");
        }
        if self.config.only_uart {
            parts.push("with UART");
        }
        if parts.is_empty() {
            return None;
        }
        Some(format!("Showing peripherals {}", parts.join(" and ")))
    }

    /// Filtered, sorted view; recomputed only when something changed or
    /// when `force_refresh` is set
    pub fn filtered_peripherals(&mut self, force_refresh: bool) -> &[ScannedPeripheral] {
        if self.dirty || force_refresh {
            self.recompute();
        }
        &self.filtered
    }

    fn recompute(&mut self) {
        let ScanConfig { only_uart, show_unnamed, .. } = self.config;

        let mut filtered: Vec<ScannedPeripheral> = self
            .peripherals
            .values()
            .filter(|p| !only_uart || p.uart_advertised)
            .filter(|p| show_unnamed || p.name.is_some())
            .cloned()
            .collect();

        // Named first, then by name; identity keeps the order stable
        filtered.sort_by(|a, b| {
            (a.name.is_none(), &a.name, a.id.as_str()).cmp(&(b.name.is_none(), &b.name, b.id.as_str()))
        });

        self.filtered = filtered;
        self.dirty = false;
        self.recomputes += 1;
    }

    /// Discovered peripherals the active filters hide
    pub fn hidden_count(&mut self) -> usize {
        let total = self.peripherals.len();
        total - self.filtered_peripherals(false).len()
    }

    /// How often the filtered view has been rebuilt
    pub fn recompute_count(&self) -> u64 {
        self.recomputes
    }

    pub fn peripheral(&self, peripheral: &PeripheralId) -> Option<&ScannedPeripheral> {
        self.peripherals.get(peripheral)
    }

    /// Number of discovered peripherals, filtered or not
    pub fn len(&self) -> usize {
        self.peripherals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peripherals.is_empty()
    }

    pub fn selected(&self) -> Option<&PeripheralId> {
        self.selected.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    pub fn roster(&self) -> &DeviceRoster {
        &self.roster
    }

    /// Roster for assigning left and right devices
    pub fn roster_mut(&mut self) -> &mut DeviceRoster {
        &mut self.roster
    }
}
