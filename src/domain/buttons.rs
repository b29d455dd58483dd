//! Core button decoding.
//!
//! Every input report carries the 16-bit button word in the two bytes
//! following the report type, so this decoder sees every frame.

use crate::domain::callbacks::{CallbackId, CallbackRegistry};
use crate::domain::lock;
use crate::error::{ProtocolViolation, Result, WiimoteError};
use std::str::FromStr;
use std::sync::Mutex;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Button {
    A,
    B,
    Down,
    Home,
    Left,
    Minus,
    One,
    Plus,
    Right,
    Two,
    Up,
}

impl Button {
    pub const ALL: [Button; 11] = [
        Button::A,
        Button::B,
        Button::Down,
        Button::Home,
        Button::Left,
        Button::Minus,
        Button::One,
        Button::Plus,
        Button::Right,
        Button::Two,
        Button::Up,
    ];

    /// Bit of this button in the big-endian button word
    pub fn mask(&self) -> u16 {
        match self {
            Self::A => 0x0008,
            Self::B => 0x0004,
            Self::Down => 0x0400,
            Self::Home => 0x0080,
            Self::Left => 0x0100,
            Self::Minus => 0x0010,
            Self::One => 0x0002,
            Self::Plus => 0x1000,
            Self::Right => 0x0200,
            Self::Two => 0x0001,
            Self::Up => 0x0800,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::Down => "Down",
            Self::Home => "Home",
            Self::Left => "Left",
            Self::Minus => "Minus",
            Self::One => "One",
            Self::Plus => "Plus",
            Self::Right => "Right",
            Self::Two => "Two",
            Self::Up => "Up",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

impl FromStr for Button {
    type Err = WiimoteError;

    fn from_str(s: &str) -> Result<Self> {
        Button::ALL
            .into_iter()
            .find(|b| b.name() == s)
            .ok_or_else(|| WiimoteError::invalid(format!("unknown button '{}'", s)))
    }
}

/// A single entry of a button diff: the button and its new state.
pub type ButtonChange = (Button, bool);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ButtonState {
    pressed: [bool; Button::ALL.len()],
}

impl ButtonState {
    pub fn from_bits(bits: u16) -> Self {
        let mut state = Self::default();
        for button in Button::ALL {
            state.pressed[button.index()] = bits & button.mask() != 0;
        }
        state
    }

    pub fn to_bits(&self) -> u16 {
        Button::ALL
            .into_iter()
            .filter(|b| self.is_pressed(*b))
            .fold(0, |acc, b| acc | b.mask())
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.pressed[button.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = ButtonChange> + '_ {
        Button::ALL.into_iter().map(|b| (b, self.is_pressed(b)))
    }

    /// Entries of `next` that differ from `self`
    pub fn diff(&self, next: &ButtonState) -> Vec<ButtonChange> {
        Button::ALL
            .into_iter()
            .filter(|b| self.is_pressed(*b) != next.is_pressed(*b))
            .map(|b| (b, next.is_pressed(b)))
            .collect()
    }
}

pub struct Buttons {
    state: Mutex<ButtonState>,
    callbacks: CallbackRegistry<[ButtonChange]>,
}

impl Buttons {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ButtonState::default()),
            callbacks: CallbackRegistry::new(),
        }
    }

    /// Decode the button word and return the changed entries.
    ///
    /// Callbacks only fire when at least one button changed.
    pub fn handle_report(&self, report: &[u8]) -> Result<Vec<ButtonChange>> {
        if report.len() < 3 {
            return Err(ProtocolViolation::ShortReport {
                report_type: report.first().copied().unwrap_or_default(),
                expected: 3,
                actual: report.len(),
            }
            .into());
        }

        let bits = u16::from_be_bytes([report[1], report[2]]);
        let next = ButtonState::from_bits(bits);
        let diff = {
            let mut state = lock(&self.state);
            let diff = state.diff(&next);
            *state = next;
            diff
        };

        if !diff.is_empty() {
            trace!("Button diff: {:?}", diff);
            self.callbacks.notify(&diff);
        }
        Ok(diff)
    }

    pub fn state(&self) -> ButtonState {
        *lock(&self.state)
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.state().is_pressed(button)
    }

    /// Look up a button by its name ("A", "Home", ...)
    pub fn get(&self, name: &str) -> Result<bool> {
        Ok(self.is_pressed(name.parse()?))
    }

    pub fn register_callback<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&[ButtonChange]) + Send + Sync + 'static,
    {
        self.callbacks.register(callback)
    }

    pub fn unregister_callback(&self, id: CallbackId) -> bool {
        self.callbacks.unregister(id)
    }
}

impl Default for Buttons {
    fn default() -> Self {
        Self::new()
    }
}
