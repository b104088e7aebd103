//! Pure, total normalization of raw records. Nothing here ever fails;
//! unparseable fields pass through (or empty out) and the validator
//! classifies the result.

use crate::observability::metrics;
use crate::types::{CleanedRecord, RawRecord};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

/// Query parameters that carry tracking state, not identity.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "ref",
    "spm",
    "from",
];

pub const ACTION_STRIPPED_CONTROL: &str = "stripped_control_chars";
pub const ACTION_FILTERED_CHARS: &str = "filtered_disallowed_chars";
pub const ACTION_COLLAPSED_WHITESPACE: &str = "collapsed_whitespace";
pub const ACTION_REWROTE_TIME: &str = "rewrote_time_token";
pub const ACTION_CANONICALIZED_URL: &str = "canonicalized_url";
pub const ACTION_CLAMPED_COUNTER: &str = "clamped_counter";

/// `YYYY-MM-DD HH:MM` (also with `/` separators or a `T`).
static ABSOLUTE_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})[-/](\d{1,2})[-/](\d{1,2})[ T](\d{1,2}):(\d{2})").unwrap());

/// `M月D日 HH:MM` wording used by the listing site.
static CJK_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})月(\d{1,2})日\s*(\d{1,2}):(\d{2})").unwrap());

static CANONICAL_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}/\d{2} \d{2}:\d{2}$").unwrap());

pub struct Cleaner {
    counter_upper_bound: i64,
}

impl Cleaner {
    pub fn new(counter_upper_bound: u64) -> Self {
        Self { counter_upper_bound: counter_upper_bound as i64 }
    }

    /// Normalize one raw record into its canonical shape.
    pub fn clean(&self, record: &RawRecord) -> CleanedRecord {
        let mut actions = Vec::new();

        let title = clean_text(&record.title, &mut actions);
        let location_text = clean_text(&record.location_text, &mut actions);
        let time_text = rewrite_time_token(&clean_text(&record.time_text, &mut actions), &mut actions);

        let url = clean_url(&record.url, &mut actions);
        let image_url = clean_url(&record.image_url, &mut actions);

        let view_count = self.clamp_counter(record.view_count, &mut actions);
        let favorite_count = self.clamp_counter(record.favorite_count, &mut actions);

        actions.sort();
        actions.dedup();
        if !actions.is_empty() {
            metrics::clean::actions_applied(actions.len() as u64);
        }
        metrics::clean::record_cleaned();

        CleanedRecord {
            id: record.id.clone().filter(|s| !s.trim().is_empty()),
            title,
            time_text,
            location_text,
            url,
            image_url,
            view_count,
            favorite_count,
            discovered_at: record.discovered_at,
            sort_rank: record.sort_rank,
            cleaning_actions: actions,
        }
    }

    fn clamp_counter(&self, value: Option<i64>, actions: &mut Vec<String>) -> Option<i64> {
        let value = value?;
        let clamped = value.clamp(0, self.counter_upper_bound - 1);
        if clamped != value {
            actions.push(ACTION_CLAMPED_COUNTER.to_string());
        }
        Some(clamped)
    }
}

/// Strip control and zero-width characters, restrict to the allow-listed
/// character class, and collapse whitespace.
fn clean_text(text: &str, actions: &mut Vec<String>) -> String {
    // whitespace-class controls (tab, newline) survive to the collapse step
    let without_control: String = text
        .chars()
        .filter(|c| c.is_whitespace() || (!c.is_control() && !is_zero_width(*c)))
        .collect();
    if without_control != text {
        actions.push(ACTION_STRIPPED_CONTROL.to_string());
    }

    let allowed: String = without_control
        .chars()
        .filter(|c| is_allowed_char(*c))
        .collect();
    if allowed != without_control {
        actions.push(ACTION_FILTERED_CHARS.to_string());
    }

    let collapsed = allowed.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed != allowed {
        actions.push(ACTION_COLLAPSED_WHITESPACE.to_string());
    }
    collapsed
}

fn is_zero_width(c: char) -> bool {
    matches!(c, '\u{200B}'..='\u{200D}' | '\u{FEFF}' | '\u{2060}')
}

/// Letters of supported scripts, digits, whitespace, and common punctuation.
fn is_allowed_char(c: char) -> bool {
    if c.is_alphanumeric() || c.is_whitespace() {
        return true;
    }
    matches!(
        c,
        '.' | ','
            | '!'
            | '?'
            | ':'
            | ';'
            | '-'
            | '_'
            | '/'
            | '('
            | ')'
            | '['
            | ']'
            | '&'
            | '+'
            | '#'
            | '@'
            | '\''
            | '"'
            | '。'
            | '，'
            | '！'
            | '？'
            | '：'
            | '；'
            | '（'
            | '）'
            | '【'
            | '】'
            | '《'
            | '》'
            | '、'
            | '·'
            | '—'
            | '～'
    )
}

/// Rewrite recognizable date-time variants into the canonical
/// `MM/DD HH:MM` token. Text with no recognized pattern passes through.
fn rewrite_time_token(time_text: &str, actions: &mut Vec<String>) -> String {
    if CANONICAL_TOKEN_RE.is_match(time_text) {
        return time_text.to_string();
    }

    let captures = ABSOLUTE_DATE_RE
        .captures(time_text)
        .map(|c| (c[2].to_string(), c[3].to_string(), c[4].to_string(), c[5].to_string()))
        .or_else(|| {
            CJK_DATE_RE
                .captures(time_text)
                .map(|c| (c[1].to_string(), c[2].to_string(), c[3].to_string(), c[4].to_string()))
        });

    match captures {
        Some((month, day, hour, minute)) => {
            let (month, day, hour) = (
                month.parse::<u32>().unwrap_or(0),
                day.parse::<u32>().unwrap_or(0),
                hour.parse::<u32>().unwrap_or(0),
            );
            actions.push(ACTION_REWROTE_TIME.to_string());
            format!("{:02}/{:02} {:02}:{}", month, day, hour, minute)
        }
        None => time_text.to_string(),
    }
}

/// Re-parse and re-serialize a URL, stripping tracking parameters and the
/// fragment. The original (trimmed) string survives any parse failure.
pub(crate) fn canonicalize_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let Ok(mut parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    parsed.set_fragment(None);
    if parsed.query().is_some() {
        let kept: Vec<(String, String)> = parsed
            .query_pairs()
            .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if kept.is_empty() {
            parsed.set_query(None);
        } else {
            parsed.query_pairs_mut().clear().extend_pairs(kept);
        }
    }

    parsed.to_string()
}

fn clean_url(url: &str, actions: &mut Vec<String>) -> String {
    let canonical = canonicalize_url(url);
    if canonical != url {
        actions.push(ACTION_CANONICALIZED_URL.to_string());
    }
    canonical
}
