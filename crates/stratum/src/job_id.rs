use super::*;

/// Job identifier, sent as lowercase hex without padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, DeserializeFromStr, SerializeDisplay)]
pub struct JobId(u32);

impl JobId {
    pub fn new(n: u32) -> Self {
        Self(n)
    }

    /// The id after this one. Multiples of `0xffff` are skipped by restarting
    /// at 1, so ids stay within four hex digits.
    pub fn next(self) -> Self {
        let n = self.0.wrapping_add(1);
        if n % 0xffff == 0 { Self(1) } else { Self(n) }
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for JobId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(u32::from_str_radix(s, 16)?))
    }
}
