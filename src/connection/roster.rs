//! Slots for the devices an app drives at once

use crate::types::PeripheralId;

/// Role a connected peripheral plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RosterSlot {
    /// The single device of a controller-style session
    Primary,
    Left,
    Right,
}

impl RosterSlot {
    pub const ALL: [RosterSlot; 3] = [RosterSlot::Primary, RosterSlot::Left, RosterSlot::Right];
}

/// Which peripheral fills which slot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRoster {
    primary: Option<PeripheralId>,
    left: Option<PeripheralId>,
    right: Option<PeripheralId>,
}

impl DeviceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot_mut(&mut self, slot: RosterSlot) -> &mut Option<PeripheralId> {
        match slot {
            RosterSlot::Primary => &mut self.primary,
            RosterSlot::Left => &mut self.left,
            RosterSlot::Right => &mut self.right,
        }
    }

    pub fn device(&self, slot: RosterSlot) -> Option<&PeripheralId> {
        match slot {
            RosterSlot::Primary => self.primary.as_ref(),
            RosterSlot::Left => self.left.as_ref(),
            RosterSlot::Right => self.right.as_ref(),
        }
    }

    pub fn is_connected(&self, slot: RosterSlot) -> bool {
        self.device(slot).is_some()
    }

    /// Put `peripheral` in `slot`, returning the peripheral it replaced
    pub fn assign(&mut self, slot: RosterSlot, peripheral: PeripheralId) -> Option<PeripheralId> {
        self.slot_mut(slot).replace(peripheral)
    }

    pub fn release(&mut self, slot: RosterSlot) -> Option<PeripheralId> {
        self.slot_mut(slot).take()
    }

    /// Empty every slot holding `peripheral`; returns the slots emptied
    pub fn release_peripheral(&mut self, peripheral: &PeripheralId) -> Vec<RosterSlot> {
        let held = self.slots_of(peripheral);
        for slot in &held {
            self.release(*slot);
        }
        held
    }

    pub fn slots_of(&self, peripheral: &PeripheralId) -> Vec<RosterSlot> {
        RosterSlot::ALL
            .into_iter()
            .filter(|slot| self.device(*slot) == Some(peripheral))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        RosterSlot::ALL.iter().all(|slot| !self.is_connected(*slot))
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
