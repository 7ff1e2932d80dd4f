//! Deserializers for the CLOB's loosely typed JSON.
//!
//! Prices and sizes arrive sometimes as numbers, sometimes as strings;
//! `clobTokenIds` can be a JSON array or a JSON-encoded string of one.
//! Malformed values are rejected instead of defaulting.

use serde::de::{self, Deserializer};
use serde::Deserialize;

/// Accept a number, or a string containing a number.
pub(crate) fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(f64),
        Str(String),
    }
    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| de::Error::custom(format!("invalid number: {s:?}"))),
    }
}

/// Accept a missing/null value, a number, or a numeric string.
pub(crate) fn flexible_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeNum {
        None,
        Num(f64),
        Str(String),
    }
    match MaybeNum::deserialize(deserializer)? {
        MaybeNum::None => Ok(None),
        MaybeNum::Num(n) => Ok(Some(n)),
        MaybeNum::Str(s) if s.trim().is_empty() => Ok(None),
        MaybeNum::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| de::Error::custom(format!("invalid number: {s:?}"))),
    }
}

/// Accept a string list, or a JSON-encoded string holding one
/// (the Gamma API ships `clobTokenIds` both ways).
pub(crate) fn flexible_string_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrStr {
        List(Vec<String>),
        Str(String),
    }
    match ListOrStr::deserialize(deserializer)? {
        ListOrStr::List(v) => Ok(v),
        ListOrStr::Str(s) => serde_json::from_str::<Vec<String>>(&s)
            .map_err(|e| de::Error::custom(format!("invalid id list {s:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Price {
        #[serde(deserialize_with = "super::flexible_f64")]
        p: f64,
    }

    #[derive(Deserialize)]
    struct Ids {
        #[serde(deserialize_with = "super::flexible_string_list")]
        ids: Vec<String>,
    }

    #[test]
    fn number_and_string_both_parse() {
        let a: Price = serde_json::from_str(r#"{"p": 0.48}"#).unwrap();
        let b: Price = serde_json::from_str(r#"{"p": "0.48"}"#).unwrap();
        assert_eq!(a.p, 0.48);
        assert_eq!(b.p, 0.48);
    }

    #[test]
    fn garbage_string_is_rejected() {
        assert!(serde_json::from_str::<Price>(r#"{"p": "n/a"}"#).is_err());
    }

    #[test]
    fn token_ids_parse_from_both_encodings() {
        let a: Ids = serde_json::from_str(r#"{"ids": ["1","2"]}"#).unwrap();
        let b: Ids = serde_json::from_str(r#"{"ids": "[\"1\",\"2\"]"}"#).unwrap();
        assert_eq!(a.ids, vec!["1", "2"]);
        assert_eq!(b.ids, vec!["1", "2"]);
    }
}
