//! Price extraction.
//!
//! Candidates are collected by an ordered list of passes ([`PRICE_PASSES`]).
//! The labeled pass yields explicit-tier candidates; every other pass yields
//! normal-tier ones. The largest explicit candidate wins; without one the
//! largest candidate overall wins.

use regex::Regex;
use std::sync::LazyLock;

use super::number::{normalize_line, normalize_number};
use crate::models::Currency;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceTier {
    /// Parsed from a line labeled `price` / `цена`.
    Explicit,
    Normal,
}

/// One candidate-collection strategy, tried in [`PRICE_PASSES`] order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PricePass {
    /// Lines mentioning `price`/`цена`: every number is a candidate.
    Labeled,
    /// Lines with a currency token, an `NNk` marker or `тыс`/`thousand`:
    /// the largest number on the line.
    CurrencyOrThousands,
    /// Lines with a currency symbol: the largest number on the line.
    BareCurrency,
    /// The first line with a currency symbol followed by 2-6 digits.
    CurrencyThenDigits,
}

pub const PRICE_PASSES: [PricePass; 4] = [
    PricePass::Labeled,
    PricePass::CurrencyOrThousands,
    PricePass::BareCurrency,
    PricePass::CurrencyThenDigits,
];

impl PricePass {
    pub fn tier(&self) -> PriceTier {
        match self {
            PricePass::Labeled => PriceTier::Explicit,
            _ => PriceTier::Normal,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceMatch {
    pub value: f64,
    pub currency: Currency,
    /// Set only when the currency is USD.
    pub usd: Option<f64>,
    pub tier: PriceTier,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    value: f64,
    currency: Currency,
    tier: PriceTier,
}

static CURRENCIES: LazyLock<Vec<(Regex, Currency)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)(\$|usd|\bus\s?d\b|\bдол(?:л(?:ар\w*)?)?\b)").unwrap(),
            Currency::Usd,
        ),
        (Regex::new(r"(?i)(₾|\bgel\b|\bлари\b)").unwrap(), Currency::Gel),
        (Regex::new(r"(?i)(€|\beur\b)").unwrap(), Currency::Eur),
        (Regex::new(r"(?i)(₽|\bруб\w*|\brub\b)").unwrap(), Currency::Rub),
    ]
});

// A glued `150k` always counts as thousands. A spaced `95 к` only does when a
// currency or the end of the line follows, since "к" is also a preposition.
const K_AMOUNT: &str = r"\d{2,3}(?:[kк]\b|\s+[kк](?:\s*(?:$|[$€₾₽]|usd\b|дол)))";

// The `NNk` alternatives go first so "150k" is not cut short at "150".
static AMOUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i){K_AMOUNT}|\d{{1,3}}(?:[.\s,'’]\d{{3}})+|\d{{3,}}|\d{{2,3}}[.,]\d{{1,2}}"
    ))
    .unwrap()
});
static K_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^(\d{2,3})\s*[kк]").unwrap());
static LABEL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)цена|price").unwrap());
static K_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(&format!(r"(?i)\b{K_AMOUNT}")).unwrap());
static THOUSAND_WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)тыс|thousand").unwrap());
static CURRENCY_SYMBOL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[$€₾₽]").unwrap());
static SYMBOL_THEN_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[$€₾₽]\s*\d{2,6}").unwrap());
static SHORT_DIGITS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d{2,6}").unwrap());

static PER_AREA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(/\s?[mм]2|per\s?[mм]2|per\s?sqm|за\s?[mм]2|за\s?кв\.?\s?м)").unwrap()
});
static AREA_HINT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)([mм]2|кв\.?\s?м)").unwrap());

/// Whether a line quotes a unit price per area rather than a total.
pub fn is_price_per_area(line: &str) -> bool {
    let normalized = normalize_line(line);
    PER_AREA.is_match(&normalized)
        || (CURRENCY_SYMBOL.is_match(&normalized) && AREA_HINT.is_match(&normalized))
}

/// First currency whose pattern matches the line.
fn detect_currency(normalized: &str) -> Option<Currency> {
    CURRENCIES
        .iter()
        .find(|(re, _)| re.is_match(normalized))
        .map(|(_, currency)| *currency)
}

/// Parse one matched amount, honoring a `k`/`к` thousands suffix.
fn parse_amount(raw: &str) -> Option<f64> {
    if let Some(caps) = K_DIGITS.captures(raw) {
        normalize_number(&caps[1]).map(|v| v * 1000.0)
    } else {
        normalize_number(raw)
    }
}

fn amounts(line: &str) -> impl Iterator<Item = f64> + '_ {
    AMOUNT.find_iter(line).filter_map(|m| parse_amount(m.as_str()))
}

fn max_amount(line: &str) -> Option<f64> {
    amounts(line).fold(None, |best, v| match best {
        Some(b) if b >= v => Some(b),
        _ => Some(v),
    })
}

impl PricePass {
    fn collect(&self, lines: &[&str], out: &mut Vec<Candidate>) {
        let tier = self.tier();
        match self {
            PricePass::Labeled => {
                for line in lines.iter().filter(|l| LABEL.is_match(l)) {
                    if is_price_per_area(line) {
                        continue;
                    }
                    let currency = detect_currency(&normalize_line(line)).unwrap_or(Currency::Usd);
                    out.extend(amounts(line).map(|value| Candidate {
                        value,
                        currency,
                        tier,
                    }));
                }
            }
            PricePass::CurrencyOrThousands => {
                for line in lines {
                    if is_price_per_area(line) {
                        continue;
                    }
                    let normalized = normalize_line(line);
                    let currency = detect_currency(&normalized);
                    if currency.is_none() && !K_MARKER.is_match(line) && !THOUSAND_WORD.is_match(line) {
                        continue;
                    }
                    if let Some(value) = max_amount(line) {
                        out.push(Candidate {
                            value,
                            currency: currency.unwrap_or(Currency::Usd),
                            tier,
                        });
                    }
                }
            }
            PricePass::BareCurrency => {
                for line in lines {
                    if is_price_per_area(line) {
                        continue;
                    }
                    let normalized = normalize_line(line);
                    if !CURRENCY_SYMBOL.is_match(&normalized) {
                        continue;
                    }
                    if let Some(value) = max_amount(line) {
                        out.push(Candidate {
                            value,
                            currency: detect_currency(&normalized).unwrap_or(Currency::Usd),
                            tier,
                        });
                    }
                }
            }
            PricePass::CurrencyThenDigits => {
                let hit = lines.iter().find(|line| {
                    !is_price_per_area(line) && SYMBOL_THEN_DIGITS.is_match(&normalize_line(line))
                });
                if let Some(line) = hit {
                    let value = SHORT_DIGITS
                        .find(line)
                        .and_then(|m| normalize_number(m.as_str()));
                    if let Some(value) = value {
                        out.push(Candidate {
                            value,
                            currency: detect_currency(&normalize_line(line)).unwrap_or(Currency::Usd),
                            tier,
                        });
                    }
                }
            }
        }
    }
}

/// Largest value; the earliest candidate wins ties.
fn pick_largest<'a>(candidates: impl Iterator<Item = &'a Candidate>) -> Option<&'a Candidate> {
    candidates.fold(None::<&'a Candidate>, |best, c| match best {
        Some(b) if b.value >= c.value => Some(b),
        _ => Some(c),
    })
}

/// Extract the asking price from free text.
pub fn extract_price(text: &str) -> Option<PriceMatch> {
    let lines = super::split_lines(text);

    let mut candidates = Vec::new();
    for pass in PRICE_PASSES {
        pass.collect(&lines, &mut candidates);
    }

    let best = pick_largest(candidates.iter().filter(|c| c.tier == PriceTier::Explicit))
        .or_else(|| pick_largest(candidates.iter()))?;

    Some(PriceMatch {
        value: best.value,
        currency: best.currency,
        usd: (best.currency == Currency::Usd).then_some(best.value),
        tier: best.tier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labeled_usd_price() {
        let price = extract_price("Цена: $165,000\nPlaceholder line").unwrap();
        assert_eq!(price.value, 165_000.0);
        assert_eq!(price.currency, Currency::Usd);
        assert_eq!(price.usd, Some(165_000.0));
        assert_eq!(price.tier, PriceTier::Explicit);
    }

    #[test]
    fn test_explicit_line_beats_larger_amount() {
        let price = extract_price("Цена 50000$\nсосед продает за 80000$ ошибочно").unwrap();
        assert_eq!(price.value, 50_000.0);
        assert_eq!(price.tier, PriceTier::Explicit);
    }

    #[test]
    fn test_without_label_largest_wins() {
        let price = extract_price("Квартира 2+1\n75000$\nили 80 000 $ с мебелью").unwrap();
        assert_eq!(price.value, 80_000.0);
        assert_eq!(price.tier, PriceTier::Normal);
    }

    #[test]
    fn test_k_suffix() {
        let price = extract_price("Продается за 150k").unwrap();
        assert_eq!(price.value, 150_000.0);
        assert_eq!(price.currency, Currency::Usd);

        let price = extract_price("95 к долларов").unwrap();
        assert_eq!(price.value, 95_000.0);
    }

    #[test]
    fn test_spaced_k_preposition_is_not_thousands() {
        let price = extract_price("Цена 85000$, 100 к морю").unwrap();
        assert_eq!(price.value, 85_000.0);
        assert_eq!(price.currency, Currency::Usd);
        assert_eq!(price.tier, PriceTier::Explicit);

        let price = extract_price("Цена: 120 к $").unwrap();
        assert_eq!(price.value, 120_000.0);

        let price = extract_price("Продаю, 90 к").unwrap();
        assert_eq!(price.value, 90_000.0);
    }

    #[test]
    fn test_gel_has_no_usd_value() {
        let price = extract_price("Price: 250 000 ₾").unwrap();
        assert_eq!(price.value, 250_000.0);
        assert_eq!(price.currency, Currency::Gel);
        assert_eq!(price.usd, None);
    }

    #[test]
    fn test_per_area_line_ignored() {
        let price = extract_price("$1622 за м²\n$95,000").unwrap();
        assert_eq!(price.value, 95_000.0);

        assert!(is_price_per_area("$1200/m2"));
        assert!(is_price_per_area("1 500 ₾ за кв.м"));
        assert!(!is_price_per_area("Цена: $165,000"));
    }

    #[test]
    fn test_no_price() {
        assert_eq!(extract_price("Уютная квартира у парка"), None);
        assert_eq!(extract_price(""), None);
    }

    #[test]
    fn test_pass_order_is_fixed() {
        assert_eq!(PRICE_PASSES[0], PricePass::Labeled);
        assert_eq!(PRICE_PASSES[0].tier(), PriceTier::Explicit);
        assert!(PRICE_PASSES[1..].iter().all(|p| p.tier() == PriceTier::Normal));
    }
}
