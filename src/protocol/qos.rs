//! Quality-of-service levels
//!
//! QoS is a closed set of three levels. Numeric input from configuration
//! files is checked at parse time so an out-of-range value never reaches the
//! transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// MQTT delivery guarantee
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Qos {
    /// At most once (0)
    AtMostOnce,
    /// At least once (1)
    AtLeastOnce,
    /// Exactly once (2)
    ExactlyOnce,
}

#[derive(Debug, Error, PartialEq)]
#[error("QoS must be 0, 1 or 2, got {0}")]
pub struct InvalidQos(pub u8);

impl Qos {
    pub fn as_u8(self) -> u8 {
        match self {
            Qos::AtMostOnce => 0,
            Qos::AtLeastOnce => 1,
            Qos::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for Qos {
    type Error = InvalidQos;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Qos::AtMostOnce),
            1 => Ok(Qos::AtLeastOnce),
            2 => Ok(Qos::ExactlyOnce),
            other => Err(InvalidQos(other)),
        }
    }
}

impl From<Qos> for u8 {
    fn from(qos: Qos) -> Self {
        qos.as_u8()
    }
}

impl fmt::Display for Qos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn only_three_levels_parse(value in any::<u8>()) {
            let parsed = Qos::try_from(value);
            if value <= 2 {
                prop_assert_eq!(parsed.unwrap().as_u8(), value);
            } else {
                prop_assert_eq!(parsed, Err(InvalidQos(value)));
            }
        }
    }

    #[test]
    fn test_qos_deserializes_from_integer() {
        #[derive(Deserialize)]
        struct Wrapper {
            qos: Qos,
        }

        let parsed: Wrapper = toml::from_str("qos = 2").unwrap();
        assert_eq!(parsed.qos, Qos::ExactlyOnce);

        let rejected: Result<Wrapper, _> = toml::from_str("qos = 3");
        assert!(rejected.is_err(), "QoS 3 must be rejected at parse time");
    }

    #[test]
    fn test_qos_display() {
        assert_eq!(Qos::AtLeastOnce.to_string(), "1");
    }
}
