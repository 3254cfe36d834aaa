use std::fmt;

use serde::{
    de::{self, Visitor},
    Deserializer, Serializer,
};

use crate::parse_quantity;

/// Writes a wei amount as a decimal string.
pub fn serde_serialize_wei<S>(amount: &u128, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.collect_str(amount)
}

/// Reads a wei amount from a decimal or `0x` hex string, or from a JSON integer.
pub fn serde_deserialize_wei<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(WeiVisitor)
}

struct WeiVisitor;

impl Visitor<'_> for WeiVisitor {
    type Value = u128;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer amount of wei")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<u128, E> {
        Ok(v.into())
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> Result<u128, E> {
        Ok(v)
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<u128, E> {
        u128::try_from(v).map_err(|_| E::invalid_value(de::Unexpected::Signed(v), &self))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<u128, E> {
        parse_quantity(v).map_err(E::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "kind")]
    enum Tagged {
        Amount {
            #[serde(
                serialize_with = "serde_serialize_wei",
                deserialize_with = "serde_deserialize_wei"
            )]
            wei: u128,
        },
    }

    #[test]
    fn large_amounts_survive_tagged_enums() {
        let value = Tagged::Amount {
            wei: u128::from(u64::MAX) * 1000,
        };
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"kind":"Amount","wei":"18446744073709551615000"}"#);
        assert_eq!(serde_json::from_str::<Tagged>(&json).unwrap(), value);
    }

    #[test]
    fn accepts_numbers_and_hex() {
        let from_number: Tagged = serde_json::from_str(r#"{"kind":"Amount","wei":1000}"#).unwrap();
        assert_eq!(from_number, Tagged::Amount { wei: 1000 });
        let from_hex: Tagged = serde_json::from_str(r#"{"kind":"Amount","wei":"0x3e8"}"#).unwrap();
        assert_eq!(from_hex, Tagged::Amount { wei: 1000 });
        assert!(serde_json::from_str::<Tagged>(r#"{"kind":"Amount","wei":-1}"#).is_err());
    }
}
