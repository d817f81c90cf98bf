use parking_lot::Mutex;
use smartrc_protocol::SensorValue;

use crate::error::SensorError;
use crate::sensor::SensorSource;

/// Source returning whatever was last stored in it.
///
/// Stands in for external collaborators that push readings (range finders
/// on a separate bus) and for tests.
#[derive(Debug)]
pub struct ManualSource {
    current: Mutex<Result<SensorValue, String>>,
}

impl ManualSource {
    pub fn new(initial: impl Into<SensorValue>) -> Self {
        Self {
            current: Mutex::new(Ok(initial.into())),
        }
    }

    pub fn set(&self, value: impl Into<SensorValue>) {
        *self.current.lock() = Ok(value.into());
    }

    /// Makes every following read fail with `reason`.
    pub fn fail(&self, reason: impl Into<String>) {
        *self.current.lock() = Err(reason.into());
    }
}

impl SensorSource for ManualSource {
    fn read(&self) -> Result<SensorValue, SensorError> {
        self.current.lock().clone().map_err(SensorError::Read)
    }
}
