//! Session buffer accounting
//!
//! Every modifying command sent inside a secure session is kept by the card until the
//! session is closed. Revision 3 cards count the bytes each command takes; older cards
//! count commands.

use std::fmt;
use std::ops::Range;

use crate::commands::PoCommand;
use crate::constants::SESSION_BUFFER_CMD_OVERHEAD;
use crate::settings::ModificationMode;
use crate::{Error, Result};

/// Capacity of the card session buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferBudget {
    /// Bytes, each command costing its payload plus a fixed overhead
    Bytes(usize),
    /// Modifying commands
    Operations(usize),
}

impl BufferBudget {
    /// Total capacity in budget units
    pub const fn capacity(self) -> usize {
        match self {
            Self::Bytes(capacity) | Self::Operations(capacity) => capacity,
        }
    }

    /// Units a command takes, zero for commands that modify nothing
    pub fn cost(self, command: &PoCommand) -> usize {
        if !command.is_modifying() {
            return 0;
        }
        match self {
            Self::Bytes(_) => command.payload_len() + SESSION_BUFFER_CMD_OVERHEAD,
            Self::Operations(_) => 1,
        }
    }
}

impl fmt::Display for BufferBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(capacity) => write!(f, "{capacity} bytes"),
            Self::Operations(capacity) => write!(f, "{capacity} operations"),
        }
    }
}

/// Tracks session buffer use since the session was (re)opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionBufferAccountant {
    budget: BufferBudget,
    used: usize,
}

impl SessionBufferAccountant {
    /// Create an empty accountant
    pub const fn new(budget: BufferBudget) -> Self {
        Self { budget, used: 0 }
    }

    /// Buffer capacity
    pub const fn budget(&self) -> BufferBudget {
        self.budget
    }

    /// Units used in the current cycle
    pub const fn used(&self) -> usize {
        self.used
    }

    /// Units left in the current cycle
    pub const fn remaining(&self) -> usize {
        self.budget.capacity().saturating_sub(self.used)
    }

    /// Units a command takes
    pub fn cost(&self, command: &PoCommand) -> usize {
        self.budget.cost(command)
    }

    /// Whether a command fits in what is left
    pub fn fits(&self, command: &PoCommand) -> bool {
        self.cost(command) <= self.remaining()
    }

    /// Account for a command about to be sent
    pub fn charge(&mut self, command: &PoCommand) -> Result<()> {
        let cost = self.cost(command);
        if cost > self.remaining() {
            return Err(Error::SessionBufferOverflow {
                required: self.used + cost,
                capacity: self.budget.capacity(),
            });
        }
        self.used += cost;
        Ok(())
    }

    /// Start a new cycle
    pub const fn reset(&mut self) {
        self.used = 0;
    }

    /// Split pending commands into session cycles
    ///
    /// The first cycle continues the current one. Consumption is checked after every
    /// command: in [`ModificationMode::Atomic`] the first command that does not fit is
    /// an overflow, in [`ModificationMode::Multiple`] it starts a new cycle. A command
    /// larger than the whole buffer is an overflow in both modes. Nothing is charged.
    pub fn plan(
        &self,
        commands: &[PoCommand],
        mode: ModificationMode,
    ) -> Result<Vec<Range<usize>>> {
        let capacity = self.budget.capacity();
        let mut cycles = Vec::new();
        let mut start = 0;
        let mut used = self.used;

        for (index, command) in commands.iter().enumerate() {
            let cost = self.cost(command);
            if used + cost > capacity {
                if mode == ModificationMode::Atomic || cost > capacity {
                    return Err(Error::SessionBufferOverflow {
                        required: used + cost,
                        capacity,
                    });
                }
                cycles.push(start..index);
                start = index;
                used = 0;
            }
            used += cost;
        }
        cycles.push(start..commands.len());
        Ok(cycles)
    }
}
