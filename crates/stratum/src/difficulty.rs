use super::*;

/// Share difficulty as sent in `mining.set_difficulty`. Whole values are
/// written as integers so `8` goes out as `8` rather than `8.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Difficulty(pub f64);

impl Difficulty {
    pub fn as_f64(self) -> f64 {
        self.0
    }
}

impl From<f64> for Difficulty {
    fn from(difficulty: f64) -> Self {
        Self(difficulty)
    }
}

impl From<u64> for Difficulty {
    fn from(difficulty: u64) -> Self {
        Self(difficulty as f64)
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Difficulty {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if self.0.fract() == 0.0 && self.0 >= 0.0 && self.0 < 9_007_199_254_740_992.0 {
            serializer.serialize_u64(self.0 as u64)
        } else {
            serializer.serialize_f64(self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Difficulty {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Self(f64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[track_caller]
    fn case(difficulty: f64, expected: &str) {
        pretty_assert_eq!(
            serde_json::to_string(&Difficulty(difficulty)).unwrap(),
            expected
        );
    }

    #[test]
    fn serialize() {
        case(8.0, "8");
        case(0.5, "0.5");
        case(512.0, "512");
        case(17.12345678, "17.12345678");
    }

    #[test]
    fn deserialize() {
        assert_eq!(
            serde_json::from_str::<Difficulty>("16").unwrap(),
            Difficulty(16.0)
        );
        assert_eq!(
            serde_json::from_str::<Difficulty>("0.25").unwrap(),
            Difficulty(0.25)
        );
    }

    #[test]
    fn ordering() {
        assert!(Difficulty(8.0) < Difficulty(16.0));
    }
}
