//! Profile and card credentials

use std::fmt;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::{CAN_LENGTH, MAX_PIN_LENGTH, MIN_PIN_LENGTH};

/// Identifier of the user profile the token is minted for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(Error::EmptyProfileId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Card access number printed on the health card
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct CardAccessNumber(String);

impl CardAccessNumber {
    pub fn new(can: impl Into<String>) -> Result<Self> {
        let can = can.into();
        if can.len() != CAN_LENGTH {
            return Err(Error::CanLength {
                expected: CAN_LENGTH,
                actual: can.chars().count(),
            });
        }
        if !can.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::NotNumeric("Card access number"));
        }
        Ok(Self(can))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CardAccessNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CardAccessNumber({})", self.0)
    }
}

/// Card holder PIN. Zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Pin(String);

impl Pin {
    pub fn new(pin: impl Into<String>) -> Result<Self> {
        let mut pin = pin.into();
        if !(MIN_PIN_LENGTH..=MAX_PIN_LENGTH).contains(&pin.len()) {
            let actual = pin.chars().count();
            pin.zeroize();
            return Err(Error::PinLength {
                min: MIN_PIN_LENGTH,
                max: MAX_PIN_LENGTH,
                actual,
            });
        }
        if !pin.bytes().all(|b| b.is_ascii_digit()) {
            pin.zeroize();
            return Err(Error::NotNumeric("PIN"));
        }
        Ok(Self(pin))
    }

    /// Expose the PIN for the card VERIFY command
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Pin(***)")
    }
}

/// Secrets an attempt is started with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Sign on to the IDP with the health card
    HealthCard { can: CardAccessNumber, pin: Pin },
    /// Pair a secure-element key with the health card for later card-less sign on
    SecureElementPairing { can: CardAccessNumber, pin: Pin },
}

impl Credentials {
    pub fn health_card(can: &str, pin: &str) -> Result<Self> {
        Ok(Self::HealthCard {
            can: CardAccessNumber::new(can)?,
            pin: Pin::new(pin)?,
        })
    }

    /// Credentials for pairing a secure-element key with the card
    pub fn secure_element_pairing(can: &str, pin: &str) -> Result<Self> {
        Ok(Self::SecureElementPairing {
            can: CardAccessNumber::new(can)?,
            pin: Pin::new(pin)?,
        })
    }

    pub fn can(&self) -> &CardAccessNumber {
        match self {
            Self::HealthCard { can, .. } | Self::SecureElementPairing { can, .. } => can,
        }
    }

    pub fn pin(&self) -> &Pin {
        match self {
            Self::HealthCard { pin, .. } | Self::SecureElementPairing { pin, .. } => pin,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::HealthCard { .. } => "health_card",
            Self::SecureElementPairing { .. } => "secure_element_pairing",
        }
    }
}
