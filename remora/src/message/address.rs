use std::fmt;

/// Endpoint-local routing handle of a registered object.
///
/// Addresses are only meaningful to the endpoint that assigned them: a message's
/// address always names an object registered on the *receiving* side. `0` is
/// reserved for control traffic and never assigned to an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ObjectAddress(u8);

impl ObjectAddress {
    /// The reserved control address.
    pub const INVALID: ObjectAddress = ObjectAddress(0);

    /// Highest assignable address.
    pub const MAX: ObjectAddress = ObjectAddress(u8::MAX);

    pub const fn new(raw: u8) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn get(self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for ObjectAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u8> for ObjectAddress {
    fn from(raw: u8) -> Self {
        Self(raw)
    }
}
