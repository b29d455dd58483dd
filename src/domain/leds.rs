use crate::domain::lock;
use crate::error::{Result, WiimoteError};
use crate::infrastructure::bluetooth::connection::CommandChannel;
use crate::infrastructure::bluetooth::protocol::{led_byte, OutputReport};
use std::sync::{Arc, Mutex};

pub const LED_COUNT: usize = 4;

/// The four player LEDs. Every change writes the full LED byte.
pub struct Leds {
    commands: Arc<CommandChannel>,
    state: Mutex<[bool; LED_COUNT]>,
}

impl Leds {
    pub fn new(commands: Arc<CommandChannel>) -> Self {
        Self {
            commands,
            state: Mutex::new([false; LED_COUNT]),
        }
    }

    pub fn get(&self, index: usize) -> Result<bool> {
        check_index(index)?;
        Ok(lock(&self.state)[index])
    }

    pub fn state(&self) -> [bool; LED_COUNT] {
        *lock(&self.state)
    }

    pub fn set(&self, index: usize, on: bool) -> Result<()> {
        check_index(index)?;
        let mut state = lock(&self.state);
        let mut next = *state;
        next[index] = on;
        self.commands.send(&OutputReport::SetLeds(led_byte(&next)))?;
        *state = next;
        Ok(())
    }

    pub fn set_all(&self, leds: [bool; LED_COUNT]) -> Result<()> {
        let mut state = lock(&self.state);
        self.commands.send(&OutputReport::SetLeds(led_byte(&leds)))?;
        *state = leds;
        Ok(())
    }

    /// Accept a slice from callers that build patterns dynamically
    pub fn set_pattern(&self, leds: &[bool]) -> Result<()> {
        let leds: [bool; LED_COUNT] = leds.try_into().map_err(|_| {
            WiimoteError::invalid(format!(
                "LED pattern needs exactly {} entries, got {}",
                LED_COUNT,
                leds.len()
            ))
        })?;
        self.set_all(leds)
    }
}

fn check_index(index: usize) -> Result<()> {
    if index >= LED_COUNT {
        return Err(WiimoteError::invalid(format!(
            "LED index {} out of range 0..{}",
            index, LED_COUNT
        )));
    }
    Ok(())
}
