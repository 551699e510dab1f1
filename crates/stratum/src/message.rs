use super::*;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Clone)]
#[serde(untagged)]
pub enum Id {
    Null,
    Number(Number),
    String(String),
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum Message {
    Request {
        id: Id,
        method: String,
        params: Value,
    },
    Response {
        id: Id,
        result: Option<Value>,
        error: Option<JsonRpcError>,
    },
    Notification {
        method: String,
        params: Value,
    },
}

impl Message {
    pub fn notification(method: &str, params: impl Serialize) -> serde_json::Result<Self> {
        Ok(Self::Notification {
            method: method.into(),
            params: serde_json::to_value(params)?,
        })
    }
}

/// Notifications always carry `"id": null` on the wire, which is what miners
/// expect even though plain JSON-RPC would omit the field.
impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(3))?;

        match self {
            Self::Request { id, method, params } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("method", method)?;
                map.serialize_entry("params", params)?;
            }
            Self::Response { id, result, error } => {
                map.serialize_entry("id", id)?;
                map.serialize_entry("result", result)?;
                map.serialize_entry("error", error)?;
            }
            Self::Notification { method, params } => {
                map.serialize_entry("id", &Id::Null)?;
                map.serialize_entry("method", method)?;
                map.serialize_entry("params", params)?;
            }
        }

        map.end()
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;

        if !value.is_object() {
            return Err(de::Error::custom("expected a JSON object"));
        }

        let has_method = value.get("method").is_some();

        if !has_method && (value.get("result").is_some() || value.get("error").is_some()) {
            #[derive(Deserialize)]
            struct Resp {
                id: Id,
                result: Option<Value>,
                error: Option<JsonRpcError>,
            }

            let r: Resp = serde_json::from_value(value).map_err(de::Error::custom)?;

            return Ok(Message::Response {
                id: r.id,
                result: r.result,
                error: r.error,
            });
        }

        let method = value
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| de::Error::missing_field("method"))?
            .to_string();

        let params = value.get("params").cloned().unwrap_or(Value::Null);

        match value.get("id") {
            None | Some(Value::Null) => Ok(Message::Notification { method, params }),
            Some(id) => Ok(Message::Request {
                id: Id::deserialize(id).map_err(de::Error::custom)?,
                method,
                params,
            }),
        }
    }
}
