/// Errors from actuation requests.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActuationError {
    #[error("{what} {value} out of range [{min}, {max}]")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("motor is blocked")]
    MotorBlocked,

    #[error("actuator failure: {0}")]
    Actuator(String),
}

impl ActuationError {
    /// Checks `value` against the closed range `[min, max]`; NaN is rejected.
    pub(crate) fn check_range(
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<f64, Self> {
        if (min..=max).contains(&value) {
            Ok(value)
        } else {
            Err(Self::OutOfRange {
                what,
                value,
                min,
                max,
            })
        }
    }
}
