//! Custom serde helpers for broker wire formats.

/// Deserializes a decimal amount sent either as a JSON string (`"100.5"`) or a
/// JSON number (`100.5`).
///
/// The broker is not consistent across methods: ledger balances come back as
/// strings while some pushes carry bare numbers.
pub mod flexible_decimal {
    use rust_decimal::Decimal;
    use serde::{Deserialize, Deserializer};
    use std::str::FromStr;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Num(serde_json::Number),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = match Raw::deserialize(deserializer)? {
            Raw::Str(s) => s,
            Raw::Num(n) => n.to_string(),
        };
        Decimal::from_str(text.trim())
            .or_else(|_| Decimal::from_scientific(text.trim()))
            .map_err(|e| serde::de::Error::custom(format!("Invalid amount {}: {}", text, e)))
    }
}
