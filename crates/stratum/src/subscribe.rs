use super::*;

/// Result of `mining.subscribe`:
/// `[[["mining.set_difficulty", id], ["mining.notify", id]], extranonce1, extranonce2_size]`.
#[derive(Debug, PartialEq, Clone)]
pub struct SubscribeResult {
    pub subscriptions: Vec<(String, String)>,
    pub extranonce1: Extranonce,
    pub extranonce2_size: usize,
}

impl SubscribeResult {
    pub fn new(subscription_id: &str, extranonce1: Extranonce, extranonce2_size: usize) -> Self {
        Self {
            subscriptions: vec![
                ("mining.set_difficulty".into(), subscription_id.into()),
                ("mining.notify".into(), subscription_id.into()),
            ],
            extranonce1,
            extranonce2_size,
        }
    }
}

impl Serialize for SubscribeResult {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(3))?;
        seq.serialize_element(&self.subscriptions)?;
        seq.serialize_element(&self.extranonce1)?;
        seq.serialize_element(&self.extranonce2_size)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for SubscribeResult {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (subscriptions, extranonce1, extranonce2_size) =
            <(Vec<(String, String)>, Extranonce, usize)>::deserialize(deserializer)?;

        Ok(SubscribeResult {
            subscriptions,
            extranonce1,
            extranonce2_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let result = SubscribeResult::new(
            "0000000000000001",
            "08000002".parse().unwrap(),
            4,
        );

        pretty_assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!([
                [
                    ["mining.set_difficulty", "0000000000000001"],
                    ["mining.notify", "0000000000000001"]
                ],
                "08000002",
                4
            ])
        );

        pretty_assert_eq!(
            serde_json::from_value::<SubscribeResult>(serde_json::to_value(&result).unwrap())
                .unwrap(),
            result
        );
    }
}
