//! Deterministic field extraction from one assembled table row.
//!
//! Every step is best-effort: a field that cannot be read stays `None` and
//! the row is still emitted.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

static MONTH_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2}),?\s+(\d{4})\b",
    )
    .expect("hardcoded month-name date regex is valid")
});

static DMY_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{1,2})[./-](\d{1,2})[./-](\d{4}|\d{2})\b")
        .expect("hardcoded numeric date regex is valid")
});

static ISO_DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("hardcoded ISO date regex is valid")
});

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\(?\d{1,3}(?:[ \x{a0}]\d{3})+(?:[.,]\d+)?\)?-?|-?\(?\d[\d.,]*\)?-?")
        .expect("hardcoded amount regex is valid")
});

static CURRENCY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(PLN|USD|EUR)\b|€|\$|zł").expect("hardcoded currency regex is valid")
});

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// One transaction. Serialized field names are the export labels, so a JSON
/// array produced by the completion fallback deserializes into this type.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParsedTransaction {
    #[serde(rename = "Date", default, deserialize_with = "lenient_text")]
    pub date: Option<String>,
    #[serde(
        rename = "Source Date",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_date: Option<String>,
    #[serde(rename = "Description", default, deserialize_with = "lenient_description")]
    pub description: String,
    #[serde(rename = "Credit", default, deserialize_with = "lenient_amount")]
    pub credit: Option<f64>,
    #[serde(rename = "Debit", default, deserialize_with = "lenient_amount")]
    pub debit: Option<f64>,
    #[serde(rename = "Amount", default, deserialize_with = "lenient_amount")]
    pub amount: Option<f64>,
    #[serde(rename = "Balance", default, deserialize_with = "lenient_amount")]
    pub balance: Option<f64>,
    #[serde(rename = "Currency", default, deserialize_with = "lenient_text")]
    pub currency: Option<String>,
    #[serde(
        rename = "Reference Number",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_number: Option<String>,
    #[serde(
        rename = "Reference 1",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_1: Option<String>,
    #[serde(
        rename = "Reference 2",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub reference_2: Option<String>,
    #[serde(
        rename = "Transaction Type",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_type: Option<String>,
    #[serde(
        rename = "Transaction Category",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub transaction_category: Option<String>,
    #[serde(
        rename = "Branch",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub branch: Option<String>,
    #[serde(
        rename = "Sender/Receiver Name",
        default,
        deserialize_with = "lenient_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub counterparty: Option<String>,
    #[serde(
        rename = "Source Statement Page",
        default,
        deserialize_with = "lenient_page",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_page: Option<u32>,
}

impl ParsedTransaction {
    /// Sets `amount` and routes it to credit (>= 0) or debit (< 0, absolute).
    pub fn set_amount(&mut self, amount: Option<f64>) {
        self.amount = amount;
        self.credit = amount.filter(|value| *value >= 0.0);
        self.debit = amount.filter(|value| *value < 0.0).map(f64::abs);
    }
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    })
}

fn lenient_description<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    lenient_text(deserializer).map(Option::unwrap_or_default)
}

fn lenient_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number.as_f64(),
        Some(Value::String(text)) => normalize_number(&text),
        _ => None,
    })
}

fn lenient_page<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(number)) => number.as_u64().and_then(|page| u32::try_from(page).ok()),
        Some(Value::String(text)) => text.trim().parse().ok(),
        _ => None,
    })
}

/// Named output columns, in canonical export order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OutputField {
    Date,
    SourceDate,
    Description,
    Credit,
    Debit,
    Amount,
    Balance,
    Currency,
    ReferenceNumber,
    Reference1,
    Reference2,
    TransactionType,
    TransactionCategory,
    Branch,
    SenderReceiverName,
    SourceStatementPage,
}

impl OutputField {
    pub const ALL: [Self; 16] = [
        Self::Date,
        Self::SourceDate,
        Self::Description,
        Self::Credit,
        Self::Debit,
        Self::Amount,
        Self::Balance,
        Self::Currency,
        Self::ReferenceNumber,
        Self::Reference1,
        Self::Reference2,
        Self::TransactionType,
        Self::TransactionCategory,
        Self::Branch,
        Self::SenderReceiverName,
        Self::SourceStatementPage,
    ];

    pub const DEFAULT_SELECTION: [Self; 4] =
        [Self::Date, Self::Description, Self::Debit, Self::Balance];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Date => "Date",
            Self::SourceDate => "Source Date",
            Self::Description => "Description",
            Self::Credit => "Credit",
            Self::Debit => "Debit",
            Self::Amount => "Amount",
            Self::Balance => "Balance",
            Self::Currency => "Currency",
            Self::ReferenceNumber => "Reference Number",
            Self::Reference1 => "Reference 1",
            Self::Reference2 => "Reference 2",
            Self::TransactionType => "Transaction Type",
            Self::TransactionCategory => "Transaction Category",
            Self::Branch => "Branch",
            Self::SenderReceiverName => "Sender/Receiver Name",
            Self::SourceStatementPage => "Source Statement Page",
        }
    }

    /// Cell text for this field; amounts use two decimals, missing values
    /// are empty.
    #[must_use]
    pub fn value(self, transaction: &ParsedTransaction) -> String {
        let text = |value: &Option<String>| value.clone().unwrap_or_default();
        let number = |value: Option<f64>| value.map(|v| format!("{v:.2}")).unwrap_or_default();
        match self {
            Self::Date => text(&transaction.date),
            Self::SourceDate => text(&transaction.source_date),
            Self::Description => transaction.description.clone(),
            Self::Credit => number(transaction.credit),
            Self::Debit => number(transaction.debit),
            Self::Amount => number(transaction.amount),
            Self::Balance => number(transaction.balance),
            Self::Currency => text(&transaction.currency),
            Self::ReferenceNumber => text(&transaction.reference_number),
            Self::Reference1 => text(&transaction.reference_1),
            Self::Reference2 => text(&transaction.reference_2),
            Self::TransactionType => text(&transaction.transaction_type),
            Self::TransactionCategory => text(&transaction.transaction_category),
            Self::Branch => text(&transaction.branch),
            Self::SenderReceiverName => text(&transaction.counterparty),
            Self::SourceStatementPage => transaction
                .source_page
                .map(|page| page.to_string())
                .unwrap_or_default(),
        }
    }

    /// Parses a comma-separated field list and returns it in canonical
    /// order without duplicates.
    pub fn parse_list(list: &str) -> Result<Vec<Self>, String> {
        let mut fields = list
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(Self::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        if fields.is_empty() {
            return Err("field list cannot be empty".to_string());
        }
        fields.sort_unstable();
        fields.dedup();
        Ok(fields)
    }
}

impl FromStr for OutputField {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let wanted = value.trim().replace(['_', '-'], " ").to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|field| field.label().to_ascii_lowercase() == wanted)
            .ok_or_else(|| format!("unknown output field '{}'", value.trim()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DateMatch {
    pub start: usize,
    pub end: usize,
    pub raw: String,
    pub iso: String,
}

type DateReader = fn(&Captures<'_>) -> Option<NaiveDate>;

fn capture_u32(caps: &Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

fn read_month_date(caps: &Captures<'_>) -> Option<NaiveDate> {
    let prefix = caps.get(1)?.as_str().to_ascii_lowercase();
    let month = MONTHS.iter().position(|name| *name == prefix)?;
    let year = i32::try_from(capture_u32(caps, 3)?).ok()?;
    NaiveDate::from_ymd_opt(year, u32::try_from(month + 1).ok()?, capture_u32(caps, 2)?)
}

fn read_numeric_date(caps: &Captures<'_>) -> Option<NaiveDate> {
    let first = capture_u32(caps, 1)?;
    let second = capture_u32(caps, 2)?;
    let year_text = caps.get(3)?.as_str();
    let mut year = i32::try_from(capture_u32(caps, 3)?).ok()?;
    if year_text.len() == 2 {
        year += if year < 70 { 2000 } else { 1900 };
    }
    // day-first unless only the month-first reading is a real date
    NaiveDate::from_ymd_opt(year, second, first)
        .or_else(|| NaiveDate::from_ymd_opt(year, first, second))
}

fn read_iso_date(caps: &Captures<'_>) -> Option<NaiveDate> {
    let year = i32::try_from(capture_u32(caps, 1)?).ok()?;
    NaiveDate::from_ymd_opt(year, capture_u32(caps, 2)?, capture_u32(caps, 3)?)
}

fn date_patterns() -> [(&'static Regex, DateReader); 3] {
    [
        (&*MONTH_DATE_RE, read_month_date),
        (&*DMY_DATE_RE, read_numeric_date),
        (&*ISO_DATE_RE, read_iso_date),
    ]
}

fn date_matches<'t>(
    regex: &'static Regex,
    reader: DateReader,
    text: &'t str,
) -> impl Iterator<Item = DateMatch> + 't {
    regex.captures_iter(text).filter_map(move |caps| {
        let whole = caps.get(0)?;
        let date = reader(&caps)?;
        Some(DateMatch {
            start: whole.start(),
            end: whole.end(),
            raw: whole.as_str().to_string(),
            iso: date.to_string(),
        })
    })
}

/// First date by pattern priority: month name, then D/M/Y, then ISO.
fn first_date(text: &str) -> Option<DateMatch> {
    date_patterns()
        .into_iter()
        .find_map(|(regex, reader)| date_matches(regex, reader, text).next())
}

/// Every valid date in the text, left to right, without overlaps.
pub(crate) fn scan_dates(text: &str) -> Vec<DateMatch> {
    let mut found = date_patterns()
        .into_iter()
        .flat_map(|(regex, reader)| date_matches(regex, reader, text))
        .collect::<Vec<_>>();
    found.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

    let mut dates: Vec<DateMatch> = Vec::with_capacity(found.len());
    for candidate in found {
        if dates.last().is_none_or(|previous| candidate.start >= previous.end) {
            dates.push(candidate);
        }
    }
    dates
}

/// Normalizes the first date found to `YYYY-MM-DD`.
#[must_use]
pub fn extract_date(text: &str) -> Option<String> {
    first_date(text).map(|date| date.iso)
}

/// Parses a formatted amount. Parentheses, a leading or a trailing minus mean
/// negative. With both separators present the last one is decimal; a lone
/// comma followed by exactly two digits is decimal; a lone dot is decimal;
/// any other separator groups thousands.
#[must_use]
pub fn normalize_number(token: &str) -> Option<f64> {
    let kept = token
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '(' | ')'))
        .collect::<String>();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let negative = kept.starts_with('-')
        || kept.ends_with('-')
        || (kept.contains('(') && kept.contains(')'));
    let digits = kept
        .chars()
        .filter(|c| !matches!(c, '-' | '(' | ')'))
        .collect::<String>();

    let normalized = match (digits.rfind('.'), digits.rfind(',')) {
        (Some(dot), Some(comma)) if dot > comma => digits.replace(',', ""),
        (Some(_), Some(_)) => digits.replace('.', "").replace(',', "."),
        (None, Some(comma)) => {
            let decimals = digits.len() - comma - 1;
            if digits.matches(',').count() == 1 && decimals == 2 {
                digits.replace(',', ".")
            } else {
                digits.replace(',', "")
            }
        }
        (Some(_), None) if digits.matches('.').count() > 1 => digits.replace('.', ""),
        _ => digits,
    };

    let value = normalized.parse::<f64>().ok()?;
    Some(if negative { -value } else { value })
}

/// First currency mention as a 3-letter code.
#[must_use]
pub fn extract_currency(text: &str) -> Option<String> {
    let found = CURRENCY_RE.find(text)?.as_str();
    let code = match found {
        "€" => "EUR",
        "$" => "USD",
        other if other.eq_ignore_ascii_case("zł") || other.eq_ignore_ascii_case("pln") => "PLN",
        other => return Some(other.to_ascii_uppercase()),
    };
    Some(code.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct NumberToken {
    start: usize,
    value: f64,
}

fn mask_dates(text: &str, dates: &[DateMatch]) -> String {
    let mut masked = text.to_string();
    for date in dates {
        masked.replace_range(date.start..date.end, &" ".repeat(date.end - date.start));
    }
    masked
}

/// Amount-like tokens outside dates. Digits glued to letters (account or
/// reference numbers) are not amounts.
fn number_tokens(text: &str) -> Vec<NumberToken> {
    let masked = mask_dates(text, &scan_dates(text));
    NUMBER_RE
        .find_iter(&masked)
        .filter(|found| {
            masked[..found.start()]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_ascii_alphanumeric())
        })
        .filter_map(|found| {
            Some(NumberToken {
                start: found.start(),
                value: normalize_number(found.as_str())?,
            })
        })
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses one transaction. With two or more amounts the last is the balance
/// and the one before it the amount; a single amount is the balance unless
/// `lone_number_is_amount`.
fn parse_segment(text: &str, lone_number_is_amount: bool) -> ParsedTransaction {
    let date = first_date(text);
    let numbers = number_tokens(text);
    let (amount, balance) = match numbers.as_slice() {
        [] => (None, None),
        [only] if lone_number_is_amount => (Some(*only), None),
        [only] => (None, Some(*only)),
        [.., amount, balance] => (Some(*amount), Some(*balance)),
    };

    let cut = numbers.last().map_or(text.len(), |token| token.start);
    let mut description = text[..cut].to_string();
    if let Some(date) = date.as_ref().filter(|date| date.end <= cut) {
        description.replace_range(date.start..date.end, " ");
    }

    let mut transaction = ParsedTransaction {
        date: date.as_ref().map(|date| date.iso.clone()),
        source_date: date.map(|date| date.raw),
        description: collapse_whitespace(&description),
        balance: balance.map(|token| token.value),
        currency: extract_currency(text),
        ..ParsedTransaction::default()
    };
    transaction.set_amount(amount.map(|token| token.value));
    transaction
}

fn standalone_amount(word: &str) -> Option<f64> {
    if word
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '(' | ')' | '$' | '€'))
    {
        normalize_number(word)
    } else {
        None
    }
}

fn is_reference(word: &str) -> bool {
    word.len() >= 6
        && word
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        && word.chars().any(|c| c.is_ascii_digit())
}

/// `date description amount date description REFERENCE amount`, the shape
/// wide statements use to print two transactions per line.
fn parse_two_transaction_layout(text: &str, dates: &[DateMatch]) -> Option<Vec<ParsedTransaction>> {
    let [first, second] = dates else {
        return None;
    };
    if !text[..first.start].trim().is_empty() {
        return None;
    }

    let mut middle = text[first.end..second.start].split_whitespace().collect::<Vec<_>>();
    let first_amount = standalone_amount(middle.pop()?)?;
    if middle.is_empty() {
        return None;
    }

    let tail = text[second.end..].split_whitespace().collect::<Vec<_>>();
    let [second_words @ .., reference, second_amount] = tail.as_slice() else {
        return None;
    };
    if second_words.is_empty() || !is_reference(reference) {
        return None;
    }
    let second_amount = standalone_amount(second_amount)?;

    let currency = extract_currency(text);
    let mut earlier = ParsedTransaction {
        date: Some(first.iso.clone()),
        source_date: Some(first.raw.clone()),
        description: middle.join(" "),
        currency: currency.clone(),
        ..ParsedTransaction::default()
    };
    earlier.set_amount(Some(first_amount));

    let mut later = ParsedTransaction {
        date: Some(second.iso.clone()),
        source_date: Some(second.raw.clone()),
        description: second_words.join(" "),
        currency,
        reference_number: Some((*reference).to_string()),
        ..ParsedTransaction::default()
    };
    later.set_amount(Some(second_amount));

    Some(vec![earlier, later])
}

/// Parses an assembled row into one or more transactions. A row carrying
/// several dates is split at each date and every segment is parsed on its
/// own. Blank rows produce nothing.
#[must_use]
pub fn parse_row(text: &str) -> Vec<ParsedTransaction> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let dates = scan_dates(text);
    if dates.len() < 2 {
        return vec![parse_segment(text, false)];
    }
    if let Some(pair) = parse_two_transaction_layout(text, &dates) {
        return pair;
    }

    dates
        .iter()
        .enumerate()
        .map(|(index, date)| {
            let start = if index == 0 { 0 } else { date.start };
            let end = dates.get(index + 1).map_or(text.len(), |next| next.start);
            parse_segment(&text[start..end], true)
        })
        .collect()
}

/// Identity used for de-duplication: date, first known amount and
/// description, case-insensitive.
#[must_use]
pub fn transaction_key(transaction: &ParsedTransaction) -> String {
    let amount = transaction
        .amount
        .or(transaction.debit)
        .or(transaction.credit)
        .map(|value| format!("{value:.2}"))
        .unwrap_or_default();
    format!(
        "{}||{}||{}",
        transaction.date.as_deref().unwrap_or_default(),
        amount,
        collapse_whitespace(&transaction.description)
    )
    .to_lowercase()
}

/// Keeps the first transaction of every key, preserving order.
#[must_use]
pub fn dedupe_transactions(transactions: Vec<ParsedTransaction>) -> Vec<ParsedTransaction> {
    let mut seen = HashSet::new();
    transactions
        .into_iter()
        .filter(|transaction| seen.insert(transaction_key(transaction)))
        .collect()
}
