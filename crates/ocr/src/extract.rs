use std::str::FromStr;
use std::sync::OnceLock;

use nbbang_core::{ExtractedItem, Money};
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

use crate::recognizer::split_lines;
use crate::types::{ExtractedReceipt, NormalizedLine};

// ── Compiled regex cache ─────────────────────────────────────────────────────

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_amount,
    r"^[₩\\]?(?:\d{1,3}(?:,\d{3})+|\d+)(?:\.\d+)?원?$");
re!(re_quantity,
    r"^(?:[xX×*](\d{1,2})|(\d{1,2})(?:[xX×*]|개|인분|잔|병|ea|EA|pcs))$");
re!(re_separator,
    r"^(?:[xX×*@=:]|원)$");

re!(re_store_label,
    r"(?i)^\s*(?:상호명?|가맹점명?|매장명?|점포명|store(?:\s+name)?|merchant)\s*[:：]\s*(\S.*?)\s*$");

re!(re_phone,
    r"\(?\d{2,4}\)?[\s\-]\d{3,4}-\d{4}");
re!(re_business_no,
    r"\d{3}-\d{2}-\d{5}");
re!(re_date,
    r"\d{2,4}[-./]\d{1,2}[-./]\d{1,2}");
re!(re_time,
    r"\d{1,2}:\d{2}");
re!(re_url,
    r"(?i)(https?://|www\.)\S+");

re!(re_noise_word,
    r"(?i)\b(?:total|subtotal|tax|vat|change|cash|card|balance|amount\s+due|tel|receipt)\b");

/// Summary, payment and header vocabulary. A line containing any of these is
/// never an item and never a merchant name. English words go through
/// `re_noise_word` so they only match whole words.
const NOISE_KEYWORDS: &[&str] = &[
    "합계", "총액", "소계", "총계", "부가세", "부가가치세", "과세", "면세", "공급가",
    "결제", "카드", "현금", "받을", "받은", "거스름", "잔돈", "할인", "승인", "포인트",
    "사업자", "대표", "전화", "주소", "영수증", "고객용", "매출", "일시",
];

/// Column titles of the item table. Two or more on one line mark the header row.
const COLUMN_TITLES: &[&str] = &[
    "품명", "품목", "메뉴", "단가", "수량", "금액", "item", "qty", "price", "amount",
];

const MAX_QUANTITY: i64 = 99;
/// Largest figure read as an amount (one trillion won). Anything longer is
/// treated as a code or serial number.
const MAX_AMOUNT: i64 = 1_000_000_000_000;

// ── Public extraction API ─────────────────────────────────────────────────────

pub struct Extractor;

impl Extractor {
    /// Pull the merchant name and line items out of corrected receipt lines.
    pub fn extract(lines: &[NormalizedLine]) -> ExtractedReceipt {
        let parsed: Vec<Option<ParsedItem>> = lines
            .iter()
            .map(|l| {
                let p = parse_item_line(&l.text);
                if p.is_none() {
                    tracing::trace!("Line {} is not an item: {:?}", l.order, l.text);
                }
                p
            })
            .collect();

        let first_item = parsed.iter().position(Option::is_some).unwrap_or(lines.len());
        let store_name = Self::extract_store_name(lines, first_item);

        let items = parsed
            .into_iter()
            .flatten()
            .map(|p| {
                ExtractedItem::new(
                    store_name.clone(),
                    p.name,
                    p.quantity,
                    Money::new(p.unit_price),
                    Money::new(p.total),
                )
            })
            .collect::<Vec<_>>();

        tracing::debug!("Extracted {} items, store '{}'", items.len(), store_name);
        ExtractedReceipt { store_name, items }
    }

    /// Convenience for raw multi-line text.
    pub fn extract_text(text: &str) -> ExtractedReceipt {
        let lines: Vec<NormalizedLine> = split_lines(text)
            .into_iter()
            .map(|l| NormalizedLine::new(l.text, l.order))
            .collect();
        Self::extract(&lines)
    }

    // ── Store name ────────────────────────────────────────────────────────────

    fn extract_store_name(lines: &[NormalizedLine], first_item: usize) -> String {
        if let Some(labelled) = lines
            .iter()
            .find_map(|l| re_store_label().captures(&l.text).and_then(|c| c.get(1)))
        {
            return labelled.as_str().to_string();
        }

        lines[..first_item]
            .iter()
            .map(|l| l.text.trim())
            .find(|l| looks_like_merchant(l))
            .map(str::to_string)
            .unwrap_or_default()
    }
}

fn looks_like_merchant(line: &str) -> bool {
    let chars = line.chars().count();
    let digits = line.chars().filter(|c| c.is_ascii_digit()).count();
    (2..=40).contains(&chars)
        && line.chars().any(char::is_alphabetic)
        && !line.starts_with(|c: char| c.is_ascii_digit())
        && digits * 2 < chars
        && !re_phone().is_match(line)
        && !re_business_no().is_match(line)
        && !re_date().is_match(line)
        && !re_time().is_match(line)
        && !re_url().is_match(line)
        && !is_noise(line)
        && !is_column_header(line)
}

fn is_noise(line: &str) -> bool {
    NOISE_KEYWORDS.iter().any(|k| line.contains(k)) || re_noise_word().is_match(line)
}

fn is_column_header(line: &str) -> bool {
    let lower = line.to_lowercase();
    COLUMN_TITLES.iter().filter(|k| lower.contains(*k)).count() >= 2
}

// ── Item lines ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedItem {
    name: String,
    quantity: u32,
    unit_price: i64,
    total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Number {
    value: i64,
    /// Bare digits, no grouping commas, decimals or currency marks.
    plain: bool,
}

impl Number {
    fn is_quantity(self) -> bool {
        self.plain && (1..=MAX_QUANTITY).contains(&self.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Amount(Number),
    Quantity(u32),
    Separator,
}

fn classify(raw: &str) -> Token<'_> {
    if re_separator().is_match(raw) {
        return Token::Separator;
    }
    if let Some(c) = re_quantity().captures(raw) {
        if let Some(q) = c.get(1).or_else(|| c.get(2)).and_then(|m| m.as_str().parse().ok()) {
            return Token::Quantity(q);
        }
    }
    if re_amount().is_match(raw) {
        if let Some(value) = parse_amount_str(raw) {
            let plain = raw.chars().all(|c| c.is_ascii_digit());
            return Token::Amount(Number { value, plain });
        }
    }
    Token::Word(raw)
}

/// Split a line into a leading name and a numeric tail, then resolve the tail
/// into quantity, unit price and total. `None` for anything that is not a
/// well-formed item line.
fn parse_item_line(text: &str) -> Option<ParsedItem> {
    if is_noise(text) || is_column_header(text) {
        return None;
    }

    let raw: Vec<&str> = text.split_whitespace().collect();
    let tokens: Vec<Token> = raw.iter().map(|t| classify(t)).collect();

    let tail_start = tokens.iter().rposition(|t| matches!(t, Token::Word(_)))? + 1;
    let mut name_parts: Vec<&str> = raw[..tail_start].to_vec();

    let mut explicit_qty = None;
    let mut numbers: Vec<(usize, Number)> = Vec::new();
    for (i, token) in tokens.iter().enumerate().skip(tail_start) {
        match token {
            Token::Amount(n) => numbers.push((i, *n)),
            Token::Quantity(q) => explicit_qty = Some(*q),
            Token::Separator | Token::Word(_) => {}
        }
    }

    let keep = if explicit_qty.is_some() { 2 } else { 3 };
    if numbers.len() > keep {
        let extra = numbers.len() - keep;
        name_parts.extend(numbers.drain(..extra).map(|(i, _)| raw[i]));
    }
    let nums: Vec<Number> = numbers.into_iter().map(|(_, n)| n).collect();

    let (quantity, unit_price, total) = match (explicit_qty, nums.as_slice()) {
        (Some(q), [p]) => (q, p.value, p.value.checked_mul(i64::from(q))?),
        (Some(q), [p, t]) => (q, p.value, t.value),
        (None, [a]) => (1, a.value, a.value),
        (None, [a, b]) => resolve_pair(*a, *b)?,
        (None, [a, b, c]) => resolve_triplet(*a, *b, *c)?,
        _ => return None,
    };

    let name = name_parts.join(" ");
    let name = name.trim_start_matches('*').trim();
    if quantity == 0 || !name.chars().any(char::is_alphabetic) {
        return None;
    }

    Some(ParsedItem { name: name.to_string(), quantity, unit_price, total })
}

/// `name a b`: either quantity + unit price, or unit price + line total.
fn resolve_pair(a: Number, b: Number) -> Option<(u32, i64, i64)> {
    if a.is_quantity() {
        return Some((a.value as u32, b.value, b.value.checked_mul(a.value)?));
    }
    if b.is_quantity() {
        return Some((b.value as u32, a.value, a.value.checked_mul(b.value)?));
    }
    if a.value > 0 && b.value >= a.value && b.value % a.value == 0 {
        if let Ok(q) = u32::try_from(b.value / a.value) {
            return Some((q, a.value, b.value));
        }
    }
    Some((1, a.value, b.value))
}

/// `name a b c` where `c` is the line total and `a`, `b` are quantity and unit
/// price in either order.
fn resolve_triplet(a: Number, b: Number, c: Number) -> Option<(u32, i64, i64)> {
    if a.value.checked_mul(b.value) == Some(c.value) {
        let (q, p) = if a.value <= b.value { (a, b) } else { (b, a) };
        if q.is_quantity() {
            return Some((q.value as u32, p.value, c.value));
        }
    }
    if a.is_quantity() {
        return Some((a.value as u32, b.value, c.value));
    }
    if b.is_quantity() {
        return Some((b.value as u32, a.value, c.value));
    }
    None
}

// ── Amount parsing ────────────────────────────────────────────────────────────

fn parse_amount_str(s: &str) -> Option<i64> {
    let clean: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    Decimal::from_str(&clean)
        .ok()?
        .round()
        .to_i64()
        .filter(|v| *v <= MAX_AMOUNT)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
