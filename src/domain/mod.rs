pub mod accelerometer;
pub mod buttons;
pub mod callbacks;
pub mod ir_camera;
pub mod leds;
pub mod memory;
pub mod models;
pub mod settings;
pub mod status;

use std::sync::{Mutex, MutexGuard};

/// Peripheral state stays consistent even if an observer panicked while a
/// guard was held, so recover the guard instead of propagating poison.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
