use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Mobile-money services whose message formats are understood.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Bkash,
    Nagad,
    Rocket,
    Unknown,
}

impl Provider {
    /// Detection priority. Earlier entries win when several match.
    pub const KNOWN: [Provider; 3] = [Provider::Bkash, Provider::Nagad, Provider::Rocket];

    /// Lowercase names searched for in message bodies and sender titles.
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Provider::Bkash => &["bkash"],
            Provider::Nagad => &["nagad"],
            Provider::Rocket => &["rocket", "dbbl"],
            Provider::Unknown => &[],
        }
    }

    /// `lowercase` must already be lowercased.
    pub fn mentioned_in(self, lowercase: &str) -> bool {
        self.aliases().iter().any(|alias| lowercase.contains(alias))
    }

    /// First provider (in priority order) whose alias occurs in `text`,
    /// compared case-insensitively.
    pub fn find_in(text: &str) -> Option<Provider> {
        let lower = text.to_lowercase();
        Self::KNOWN.into_iter().find(|p| p.mentioned_in(&lower))
    }

    /// Normalises a free-form label (e.g. from a language model) against the
    /// closed set. Anything unrecognised becomes `Unknown`.
    pub fn from_label(label: &str) -> Provider {
        Self::find_in(label).unwrap_or(Provider::Unknown)
    }

    /// Wire identifier used by the verify endpoint.
    pub fn id(self) -> &'static str {
        match self {
            Provider::Bkash => "bkash",
            Provider::Nagad => "nagad",
            Provider::Rocket => "rocket",
            Provider::Unknown => "unknown",
        }
    }

    pub fn is_known(self) -> bool {
        self != Provider::Unknown
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Bkash => write!(f, "bKash"),
            Provider::Nagad => write!(f, "Nagad"),
            Provider::Rocket => write!(f, "Rocket"),
            Provider::Unknown => write!(f, "Unknown"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    /// Accepts wire ids and display names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bkash" => Ok(Provider::Bkash),
            "nagad" => Ok(Provider::Nagad),
            "rocket" => Ok(Provider::Rocket),
            "unknown" => Ok(Provider::Unknown),
            other => Err(format!("Unknown provider: '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_in_respects_priority_order() {
        assert_eq!(Provider::find_in("Nagad to bKash transfer"), Some(Provider::Bkash));
        assert_eq!(Provider::find_in("DBBL mobile banking"), Some(Provider::Rocket));
        assert_eq!(Provider::find_in("Your bank statement"), None);
    }

    #[test]
    fn from_label_normalises_case_and_noise() {
        assert_eq!(Provider::from_label("BKASH"), Provider::Bkash);
        assert_eq!(Provider::from_label("probably Nagad"), Provider::Nagad);
        assert_eq!(Provider::from_label("Upay"), Provider::Unknown);
        assert_eq!(Provider::from_label(""), Provider::Unknown);
    }

    #[test]
    fn display_and_parse() {
        assert_eq!(Provider::Bkash.to_string(), "bKash");
        assert_eq!("bKash".parse::<Provider>().unwrap(), Provider::Bkash);
        assert_eq!("ROCKET".parse::<Provider>().unwrap(), Provider::Rocket);
        assert!("upay".parse::<Provider>().is_err());
    }

    #[test]
    fn serde_uses_wire_ids() {
        assert_eq!(serde_json::to_string(&Provider::Nagad).unwrap(), "\"nagad\"");
        let p: Provider = serde_json::from_str("\"rocket\"").unwrap();
        assert_eq!(p, Provider::Rocket);
    }
}
