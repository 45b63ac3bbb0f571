use std::sync::OnceLock;

use payclaim_core::Provider;
use regex::Regex;

/// Extraction rules for one provider. Every pattern has exactly one capture
/// group holding the value.
pub struct ProviderPatterns {
    pub provider: Provider,
    pub transaction_code: Regex,
    pub amount: Regex,
    pub sender: Regex,
}

impl ProviderPatterns {
    pub fn transaction_code<'t>(&self, text: &'t str) -> Option<&'t str> {
        first_capture(&self.transaction_code, text)
    }

    pub fn amount<'t>(&self, text: &'t str) -> Option<&'t str> {
        first_capture(&self.amount, text)
    }

    pub fn sender<'t>(&self, text: &'t str) -> Option<&'t str> {
        first_capture(&self.sender, text)
    }
}

fn first_capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text)?
        .get(1)
        .map(|m| m.as_str())
        .filter(|s| !s.is_empty())
}

// ── Rule sources ──────────────────────────────────────────────────────────────

struct RuleSource {
    provider: Provider,
    transaction_code: &'static str,
    amount: &'static str,
    sender: &'static str,
}

// Order matches `Provider::KNOWN`; pattern-based detection walks this slice.
const RULES: &[RuleSource] = &[
    // You have received Tk 1,500.00 from 01712345678. ... TrxID 9H76K54L at ...
    RuleSource {
        provider: Provider::Bkash,
        transaction_code: r"(?i)TrxID\s+([A-Z0-9]+)",
        amount: r"(?i)Tk\s+([\d,.]+)",
        sender: r"(?i)from\s+(\d+)",
    },
    // Money Received. Amount: Tk 2050. Sender: 01987654321. ... TxnID: 7X123999.
    RuleSource {
        provider: Provider::Nagad,
        transaction_code: r"(?i)TxnID[:\s]+([A-Z0-9]+)",
        amount: r"(?i)Amount[:\s]+Tk\s*([\d,.]+)",
        sender: r"(?i)Sender[:\s]+(\d+)",
    },
    // Tk5000 credited to your account from 01811223344. Trans ID: 8877665544.
    RuleSource {
        provider: Provider::Rocket,
        transaction_code: r"(?i)Trans\s*ID[:\s]+([A-Z0-9]+)",
        amount: r"(?i)Tk([\d,.]+)",
        sender: r"(?i)from\s+(\d+)",
    },
];

// ── Compiled table ────────────────────────────────────────────────────────────

/// The compiled table, built on first use and shared read-only afterwards.
pub fn table() -> &'static [ProviderPatterns] {
    static TABLE: OnceLock<Vec<ProviderPatterns>> = OnceLock::new();
    TABLE.get_or_init(|| {
        RULES
            .iter()
            .map(|src| ProviderPatterns {
                provider: src.provider,
                transaction_code: Regex::new(src.transaction_code).expect("invalid regex"),
                amount: Regex::new(src.amount).expect("invalid regex"),
                sender: Regex::new(src.sender).expect("invalid regex"),
            })
            .collect()
    })
}

pub fn patterns_for(provider: Provider) -> Option<&'static ProviderPatterns> {
    table().iter().find(|p| p.provider == provider)
}
