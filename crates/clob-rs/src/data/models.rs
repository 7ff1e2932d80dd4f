use serde::Deserialize;

use crate::serde_util::{flexible_f64, flexible_f64_opt, flexible_string_list};

/// One on-chain position from the Data API.
#[derive(Debug, Clone, Deserialize)]
pub struct DataPosition {
    #[serde(default)]
    pub asset: String,
    #[serde(default, deserialize_with = "flexible_f64")]
    pub size: f64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub outcome: String,
}

/// Market metadata from the Gamma API.
#[derive(Debug, Clone, Deserialize)]
pub struct GammaMarket {
    #[serde(default, rename = "conditionId")]
    pub condition_id: String,
    #[serde(default)]
    pub question: String,
    #[serde(default, rename = "clobTokenIds", deserialize_with = "flexible_string_list")]
    pub clob_token_ids: Vec<String>,
    #[serde(default, rename = "volume24hr", deserialize_with = "flexible_f64_opt")]
    pub volume_24hr: Option<f64>,
    #[serde(default)]
    pub events: Vec<GammaEvent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GammaEvent {
    #[serde(default)]
    pub id: serde_json::Value,
}

impl GammaEvent {
    /// Event ids arrive as numbers or strings; normalise to a string key.
    pub fn id_string(&self) -> String {
        match &self.id {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gamma_market_parses_stringified_token_ids() {
        let json = r#"{
            "conditionId": "0xc1",
            "question": "Will it?",
            "clobTokenIds": "[\"111\", \"222\"]",
            "volume24hr": "12345.6",
            "events": [{"id": 42}]
        }"#;
        let m: GammaMarket = serde_json::from_str(json).unwrap();
        assert_eq!(m.clob_token_ids, vec!["111", "222"]);
        assert_eq!(m.volume_24hr, Some(12345.6));
        assert_eq!(m.events[0].id_string(), "42");
    }

    #[test]
    fn data_position_parses_string_size() {
        let json = r#"{"asset": "999", "size": "49.5", "title": "t", "outcome": "Yes"}"#;
        let p: DataPosition = serde_json::from_str(json).unwrap();
        assert_eq!(p.size, 49.5);
    }
}
