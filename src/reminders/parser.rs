//! Natural-language reminder requests (Chinese).
//!
//! Understands delays ("5分钟后提醒我 喝水"), times of day
//! ("明天9点提醒我 开会"), absolute dates ("2026-01-23 09:00 提醒我 交水电费")
//! and several times at once ("明天9点半，10点半提醒我喝水").

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{Days, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;

/// One reminder extracted from a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReminder {
    pub due_at_ms: i64,
    pub message: String,
}

/// Turns free text into zero or more reminders.
pub trait RequestParser {
    fn parse(&self, text: &str, now_ms: i64) -> Vec<ParsedReminder>;
}

/// Parser for Chinese reminder phrasing, resolving times in one timezone.
#[derive(Debug, Clone, Copy)]
pub struct ChineseParser {
    tz: Tz,
}

impl ChineseParser {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}

impl RequestParser for ChineseParser {
    fn parse(&self, text: &str, now_ms: i64) -> Vec<ParsedReminder> {
        if let Some(multi) = parse_multi_time(text, now_ms, self.tz) {
            return multi;
        }
        parse_delay(text, now_ms)
            .or_else(|| parse_absolute(text, now_ms, self.tz))
            .into_iter()
            .collect()
    }
}

const NUM: &str = r"(\d+|[零〇一二两三四五六七八九十]+)";
const VERB: &str = r"(?:提醒|叫|通知|发|发送)";

static MENTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"@(\d+)").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static DELAY_LEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:{VERB}(?:我|你)?\s*)?(?:{NUM}\s*(?:天|d))?\s*(?:{NUM}\s*(?:小时|h))?\s*(?:{NUM}\s*(?:分钟|分|min|m))?\s*(?:后|以后|之后)\s*(?:{VERB}(?:我|你)?\s*)?(.+)$"
    ))
    .unwrap()
});

static DELAY_TRAILING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(?i)^(?:{NUM}\s*(?:天|d))?\s*(?:{NUM}\s*(?:小时|h))?\s*(?:{NUM}\s*(?:分钟|分|min|m))?\s*(?:后|以后|之后)\s*{VERB}(?:我|你)?\s*(.+)$"
    ))
    .unwrap()
});

static DATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(\d{{4}})[-/](\d{{1,2}})[-/](\d{{1,2}})\s+(\d{{1,2}})[:：](\d{{1,2}})\s*{VERB}(?:我)?\s*(.+)$"
    ))
    .unwrap()
});

static TIME_OF_DAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:在\s*)?(今天|明天|后天|今晚)?\s*(\d{{1,2}}(?:[:：]\d{{1,2}}|点\d{{1,2}}|点半|点)?)\s*{VERB}(?:我)?\s*(.+)$"
    ))
    .unwrap()
});

static MULTI_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"^(?:在\s*)?(今天|明天|后天|今晚)?\s*((?s:.)+?)\s*{VERB}(?:我|你|ta|他|她)?\s*(.+)$"
    ))
    .unwrap()
});

static HM: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})(?:[:：点](\d{1,2}))?$").unwrap());
static HM_COLON: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})\s*[:：]\s*(\d{1,2})$").unwrap());
static HM_HALF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})\s*点\s*半$").unwrap());
static HM_DIAN_MIN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})\s*点\s*(\d{1,2})$").unwrap());
static HM_DIAN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d{1,2})\s*点$").unwrap());

static SELF_REQUEST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"{VERB}\s*(?:一下|下)?\s*(?:我|自己)")).unwrap()
});

static CREATE_DELAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?i){NUM}\s*(?:天|d|小时|h|分钟|分|min|m)\s*(?:后|以后|之后)")).unwrap()
});
static CREATE_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}[-/]\d{1,2}[-/]\d{1,2}\s+\d{1,2}[:：]\d{1,2}").unwrap());
static CREATE_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(r"(?:在\s*)?(?:今天|明天|后天|今晚)?\s*\d{{1,2}}(?:[:：]\d{{1,2}}|点\d{{1,2}}|点半|点)?\s*{VERB}")).unwrap()
});
static CREATE_DAY_TIME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:今天|明天|后天|今晚)\s*(?s:.){0,16}(?:\d{1,2}点半|\d{1,2}点|\d{1,2}[:：]\d{1,2})").unwrap()
});
static CANCEL_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(?:取消|删除)提醒").unwrap());
static LIST_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:提醒列表|查看提醒|我的提醒|列出提醒)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayHint {
    Today,
    Tomorrow,
    DayAfterTomorrow,
}

impl DayHint {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "" => None,
            "明天" => Some(DayHint::Tomorrow),
            "后天" => Some(DayHint::DayAfterTomorrow),
            _ => Some(DayHint::Today),
        }
    }

    fn offset_days(self) -> u64 {
        match self {
            DayHint::Today => 0,
            DayHint::Tomorrow => 1,
            DayHint::DayAfterTomorrow => 2,
        }
    }
}

/// Arabic digits or simple Chinese numerals up to the tens ("二十五").
fn parse_cn_number(input: &str) -> Option<u32> {
    let s = input.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse().ok();
    }

    let mut total = 0u32;
    let mut cur = 0u32;
    for ch in s.chars() {
        if ch == '十' {
            total += cur.max(1) * 10;
            cur = 0;
            continue;
        }
        let v = match ch {
            '零' | '〇' => 0,
            '一' => 1,
            '二' | '两' => 2,
            '三' => 3,
            '四' => 4,
            '五' => 5,
            '六' => 6,
            '七' => 7,
            '八' => 8,
            '九' => 9,
            _ => return None,
        };
        cur += v;
    }
    Some(total + cur)
}

fn clamp_number(raw: Option<regex::Match<'_>>, max: u32) -> u32 {
    raw.and_then(|m| parse_cn_number(m.as_str())).map(|n| n.min(max)).unwrap_or(0)
}

fn hour_minute(h: &str, m: Option<&str>) -> Option<(u32, u32)> {
    let hour = h.parse::<u32>().ok()?.min(23);
    let minute = match m {
        Some(m) => m.parse::<u32>().ok()?.min(59),
        None => 0,
    };
    Some((hour, minute))
}

/// "9", "9:30", "9点30".
fn parse_hm(text: &str) -> Option<(u32, u32)> {
    let caps = HM.captures(text)?;
    hour_minute(&caps[1], caps.get(2).map(|m| m.as_str()))
}

/// A single entry of a multi-time list: "9:30", "9点半", "9点30", "9点", "9".
fn parse_time_token(text: &str) -> Option<(u32, u32)> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(c) = HM_COLON.captures(t) {
        return hour_minute(&c[1], Some(&c[2]));
    }
    if let Some(c) = HM_HALF.captures(t) {
        return hour_minute(&c[1], Some("30"));
    }
    if let Some(c) = HM_DIAN_MIN.captures(t) {
        return hour_minute(&c[1], Some(&c[2]));
    }
    if let Some(c) = HM_DIAN.captures(t) {
        return hour_minute(&c[1], None);
    }
    parse_hm(t)
}

/// Next occurrence of `hour:minute` in `tz`.
///
/// With a day hint the day is fixed; without one, a time already passed
/// today rolls over to tomorrow.
fn next_time(tz: Tz, day_hint: Option<DayHint>, hour: u32, minute: u32, now_ms: i64) -> Option<i64> {
    let now = Utc.timestamp_millis_opt(now_ms).single()?.with_timezone(&tz);
    let offset = day_hint.map(DayHint::offset_days).unwrap_or(0);
    let date = now.date_naive().checked_add_days(Days::new(offset))?;
    let due = local_ms(tz, date, hour, minute)?;

    if day_hint.is_none() && due <= now_ms {
        let date = date.checked_add_days(Days::new(1))?;
        return local_ms(tz, date, hour, minute);
    }
    Some(due)
}

fn local_ms(tz: Tz, date: NaiveDate, hour: u32, minute: u32) -> Option<i64> {
    let naive = date.and_hms_opt(hour, minute, 0)?;
    tz.from_local_datetime(&naive).earliest().map(|dt| dt.timestamp_millis())
}

/// Remove `@123` mentions and collapse whitespace.
pub fn strip_mentions(text: &str) -> String {
    let without = MENTION.replace_all(text, " ");
    WHITESPACE.replace_all(&without, " ").trim().to_string()
}

/// All `@123` mention ids in order.
pub fn extract_mention_ids(text: &str) -> Vec<String> {
    MENTION.captures_iter(text).map(|c| c[1].to_string()).collect()
}

/// Whether the requester wants to be reminded themselves ("提醒我", not "提醒我们").
pub fn is_self_reminder_request(text: &str) -> bool {
    SELF_REQUEST.find_iter(text).any(|m| {
        if m.as_str().ends_with("自己") {
            return true;
        }
        !text[m.end()..].starts_with('们')
    })
}

/// Who a reminder request is about: the first mention after "提醒", else the first mention.
pub fn pick_mention_for_request(text: &str) -> Option<String> {
    if let Some(i) = text.find("提醒")
        && let Some(id) = extract_mention_ids(&text[i..]).into_iter().next()
    {
        return Some(id);
    }
    extract_mention_ids(text).into_iter().next()
}

/// Cheap check used to route chat text to reminder creation.
pub fn looks_like_create_request(text: &str) -> bool {
    let t = text.trim();
    if t.is_empty() || !t.contains("提醒") {
        return false;
    }
    if matches!(t, "提醒帮助" | "定时帮助" | "定时提醒帮助") {
        return false;
    }
    if CANCEL_PREFIX.is_match(t) || LIST_SUFFIX.is_match(t) {
        return false;
    }
    CREATE_DELAY.is_match(t) || CREATE_DATE.is_match(t) || CREATE_TIME.is_match(t) || CREATE_DAY_TIME.is_match(t)
}

fn parse_delay(text: &str, now_ms: i64) -> Option<ParsedReminder> {
    let t = strip_mentions(text);
    let caps = DELAY_LEADING.captures(&t).or_else(|| DELAY_TRAILING.captures(&t))?;

    let days = clamp_number(caps.get(1), 365) as i64;
    let hours = clamp_number(caps.get(2), 168) as i64;
    let mins = clamp_number(caps.get(3), 10_080) as i64;
    if days == 0 && hours == 0 && mins == 0 {
        return None;
    }

    let message = strip_mentions(caps.get(4).map(|m| m.as_str()).unwrap_or(""));
    if message.is_empty() {
        return None;
    }
    let delay_ms = (days * 24 * 60 + hours * 60 + mins) * 60_000;
    let due_at_ms = now_ms.checked_add(delay_ms)?;
    Some(ParsedReminder { due_at_ms, message })
}

fn parse_absolute(text: &str, now_ms: i64, tz: Tz) -> Option<ParsedReminder> {
    let t = strip_mentions(text);

    if let Some(c) = DATE_TIME.captures(&t) {
        let year: i32 = c[1].parse().ok()?;
        let month = c[2].parse::<u32>().ok()?.clamp(1, 12);
        let day = c[3].parse::<u32>().ok()?.clamp(1, 31);
        let (hour, minute) = hour_minute(&c[4], Some(&c[5]))?;
        let message = strip_mentions(&c[6]);
        if message.is_empty() {
            return None;
        }
        let date = NaiveDate::from_ymd_opt(year, month, day)?;
        let due_at_ms = local_ms(tz, date, hour, minute)?;
        if due_at_ms <= now_ms {
            return None;
        }
        return Some(ParsedReminder { due_at_ms, message });
    }

    let c = TIME_OF_DAY.captures(&t)?;
    let hint = DayHint::parse(c.get(1).map(|m| m.as_str().trim()).unwrap_or(""));
    let (hour, minute) = parse_time_token(&c[2])?;
    let message = strip_mentions(&c[3]);
    if message.is_empty() {
        return None;
    }
    let due_at_ms = next_time(tz, hint, hour, minute, now_ms)?;
    if due_at_ms <= now_ms {
        return None;
    }
    Some(ParsedReminder { due_at_ms, message })
}

/// Several times sharing one message; needs at least two future times.
fn parse_multi_time(text: &str, now_ms: i64, tz: Tz) -> Option<Vec<ParsedReminder>> {
    let t = strip_mentions(text);
    let c = MULTI_TIME.captures(&t)?;

    let hint = DayHint::parse(c.get(1).map(|m| m.as_str().trim()).unwrap_or(""));
    let times_raw = c[2].trim();
    let message = strip_mentions(&c[3]);
    if times_raw.is_empty() || message.is_empty() {
        return None;
    }

    let normalized = times_raw.replace(['，', '、'], ",");
    let candidates: Vec<&str> = normalized
        .split(|ch: char| ch == ',' || ch.is_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if candidates.len() < 2 {
        return None;
    }

    // Keyed by due time: duplicates collapse and the result comes out sorted.
    let mut unique = BTreeMap::new();
    for candidate in candidates {
        let Some((hour, minute)) = parse_time_token(candidate) else {
            continue;
        };
        let Some(due_at_ms) = next_time(tz, hint, hour, minute, now_ms) else {
            continue;
        };
        if due_at_ms <= now_ms {
            continue;
        }
        unique.insert(due_at_ms, ParsedReminder { due_at_ms, message: message.clone() });
    }

    if unique.len() >= 2 { Some(unique.into_values().collect()) } else { None }
}
