use payclaim_core::{Money, ParsedFields, Provider};

use crate::patterns::{self, ProviderPatterns};

/// Provider-aware extraction of payment fields from SMS and notification text.
///
/// Best effort only: nothing here is trusted by verification, which re-checks
/// amounts against the stored record.
pub struct Parser;

impl Parser {
    /// Parse `text`, optionally helped by a sender title or app package name.
    /// Never fails; anything that cannot be read comes back as `None`.
    pub fn parse(text: &str, hint: Option<&str>) -> ParsedFields {
        let Some(provider) = Self::detect_provider(text, hint) else {
            tracing::debug!("no provider signal in message");
            return ParsedFields::unknown();
        };
        match patterns::patterns_for(provider) {
            Some(rules) => Self::extract(provider, rules, text),
            None => ParsedFields::unknown(),
        }
    }

    /// Name match first (hint or body, walking providers in priority order),
    /// then the first transaction-code pattern that matches.
    pub fn detect_provider(text: &str, hint: Option<&str>) -> Option<Provider> {
        let body = text.to_lowercase();
        let hint = hint.unwrap_or_default().to_lowercase();

        Provider::KNOWN
            .into_iter()
            .find(|p| p.mentioned_in(&hint) || p.mentioned_in(&body))
            .or_else(|| {
                patterns::table()
                    .iter()
                    .find(|rules| rules.transaction_code.is_match(text))
                    .map(|rules| rules.provider)
            })
    }

    // Each field is matched on its own; they need not come from the same span.
    fn extract(provider: Provider, rules: &ProviderPatterns, text: &str) -> ParsedFields {
        ParsedFields {
            provider,
            transaction_code: rules.transaction_code(text).map(str::to_string),
            amount: rules
                .amount(text)
                .and_then(Money::parse)
                .filter(|m| m.is_positive()),
            sender: rules.sender(text).map(str::to_string),
        }
    }
}
