use super::*;

/// Splits the coinbase placeholder between the pool assigned extranonce1 and
/// the miner rolled extranonce2.
#[derive(Debug, Clone, Copy)]
pub struct Extranonces {
    extranonce1_size: usize,
    extranonce2_size: usize,
}

impl Extranonces {
    pub fn new(placeholder_size: usize, extranonce1_size: usize) -> Result<Self> {
        ensure!(
            extranonce1_size >= MIN_EXTRANONCE_SIZE,
            "extranonce1 size {extranonce1_size} below minimum {MIN_EXTRANONCE_SIZE}"
        );

        let extranonce2_size = placeholder_size
            .checked_sub(extranonce1_size)
            .filter(|size| *size >= MIN_EXTRANONCE_SIZE)
            .with_context(|| {
                format!(
                    "placeholder of {placeholder_size} bytes leaves no room for extranonce2 after {extranonce1_size} bytes of extranonce1"
                )
            })?;

        Ok(Self {
            extranonce1_size,
            extranonce2_size,
        })
    }

    /// A fresh random extranonce1 for a new subscription.
    pub(crate) fn next_extranonce1(&self) -> Extranonce {
        Extranonce::generate(self.extranonce1_size)
    }

    pub(crate) fn extranonce2_size(&self) -> usize {
        self.extranonce2_size
    }
}

impl Default for Extranonces {
    fn default() -> Self {
        Self {
            extranonce1_size: EXTRANONCE1_SIZE,
            extranonce2_size: EXTRANONCE_PLACEHOLDER_SIZE - EXTRANONCE1_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_split() {
        let extranonces = Extranonces::default();
        assert_eq!(extranonces.extranonce2_size(), 4);
        assert_eq!(extranonces.next_extranonce1().len(), 4);
    }

    #[test]
    fn custom_split() {
        let extranonces = Extranonces::new(8, 2).unwrap();
        assert_eq!(extranonces.extranonce2_size(), 6);
        assert_eq!(extranonces.next_extranonce1().len(), 2);
    }

    #[test]
    fn rejects_impossible_split() {
        assert!(Extranonces::new(8, 1).is_err());
        assert!(Extranonces::new(8, 7).is_err());
        assert!(Extranonces::new(4, 8).is_err());
    }

    #[test]
    fn extranonce1_values_differ() {
        let extranonces = Extranonces::default();
        let values = (0..16)
            .map(|_| extranonces.next_extranonce1())
            .collect::<HashSet<_>>();
        assert!(values.len() > 1);
    }
}
