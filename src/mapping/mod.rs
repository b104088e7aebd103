//! Rule-based + fuzzy resolution of free-text locations to canonical cities.
//!
//! Rules are compiled once from the active city reference set into an
//! immutable, priority-sorted list; matching is a greedy scan with an
//! edit-distance fallback for texts no rule reaches.

pub mod similarity;

use crate::config::MappingConfig;
use crate::types::{
    City, MappingResult, MatchType, ProcessedEvent, RecordStatus, ValidatedRecord,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

const EXACT_BASE: f64 = 0.95;
const PROVINCE_BASE: f64 = 0.8;
const KEYWORD_BASE: f64 = 0.7;
const FUZZY_BASE: f64 = 0.6;

/// Exact matches at or above this confidence end the rule scan.
const EARLY_STOP_CONFIDENCE: f64 = 0.9;
/// Below this best rule confidence the similarity fallback also runs.
const FALLBACK_TRIGGER: f64 = 0.7;

const PRIORITY_EXACT_NATIVE: i32 = 100;
const PRIORITY_EXACT_SECONDARY: i32 = 99;
const PRIORITY_PROVINCE_BEFORE: i32 = 85;
const PRIORITY_PROVINCE_AFTER: i32 = 84;
const PRIORITY_FUZZY_PARTIAL: i32 = 60;
const PRIORITY_KEYWORD: i32 = 40;

/// A compiled location-matching rule for one city.
#[derive(Debug)]
pub struct MatchRule {
    pattern: Regex,
    raw_pattern: String,
    city_id: String,
    priority: i32,
    kind: MatchType,
}

impl MatchRule {
    fn new(raw_pattern: &str, city_id: &str, priority: i32, kind: MatchType) -> Option<Self> {
        if raw_pattern.is_empty() {
            return None;
        }
        // Literal patterns, case-insensitive for secondary-script names.
        let pattern = Regex::new(&format!("(?i){}", regex::escape(raw_pattern))).ok()?;
        Some(Self {
            pattern,
            raw_pattern: raw_pattern.to_string(),
            city_id: city_id.to_string(),
            priority,
            kind,
        })
    }

    /// Type base plus the priority-derived bonus, clamped into [0.1, 1.0].
    ///
    /// The bonus coefficients reproduce the established scoring behavior and
    /// carry no meaning beyond that.
    fn confidence(&self) -> f64 {
        let base = match self.kind {
            MatchType::Exact => EXACT_BASE,
            MatchType::Province => PROVINCE_BASE,
            MatchType::Keyword => KEYWORD_BASE,
            MatchType::Fuzzy => FUZZY_BASE,
        };
        let bonus = (self.priority - 50) as f64 / 100.0 * 0.1;
        (base + bonus).clamp(0.1, 1.0)
    }
}

/// Resolves location text to canonical cities with confidence scores.
pub struct CityMapper {
    rules: Vec<MatchRule>,
    cities: Vec<City>,
    config: MappingConfig,
}

impl CityMapper {
    /// Compile the rule set from the active cities. Done once per run.
    pub fn new(cities: &[City], config: MappingConfig) -> Self {
        let active: Vec<City> = cities.iter().filter(|c| c.active).cloned().collect();
        let mut rules = Vec::new();

        for city in &active {
            rules.extend(MatchRule::new(
                &city.name_zh,
                &city.id,
                PRIORITY_EXACT_NATIVE,
                MatchType::Exact,
            ));
            rules.extend(MatchRule::new(
                &city.name_en,
                &city.id,
                PRIORITY_EXACT_SECONDARY,
                MatchType::Exact,
            ));

            if let Some(province) = &city.province {
                rules.extend(MatchRule::new(
                    &format!("{}{}", province, city.name_zh),
                    &city.id,
                    PRIORITY_PROVINCE_BEFORE,
                    MatchType::Province,
                ));
                rules.extend(MatchRule::new(
                    &format!("{}{}", city.name_zh, province),
                    &city.id,
                    PRIORITY_PROVINCE_AFTER,
                    MatchType::Province,
                ));
            }

            // Partial form of the native name, only when long enough to stay
            // distinctive.
            let chars: Vec<char> = city.name_zh.chars().collect();
            if chars.len() >= 3 {
                let partial: String = chars[..chars.len() - 1].iter().collect();
                rules.extend(MatchRule::new(
                    &partial,
                    &city.id,
                    PRIORITY_FUZZY_PARTIAL,
                    MatchType::Fuzzy,
                ));
            }

            for district in &city.districts {
                rules.extend(MatchRule::new(
                    district,
                    &city.id,
                    PRIORITY_KEYWORD,
                    MatchType::Keyword,
                ));
            }
        }

        // Global priority order; ties broken for determinism.
        rules.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.city_id.cmp(&b.city_id))
                .then_with(|| a.raw_pattern.cmp(&b.raw_pattern))
        });

        debug!(rule_count = rules.len(), city_count = active.len(), "Compiled city match rules");

        Self { rules, cities: active, config }
    }

    /// Resolve one location text to candidate cities, best first.
    pub fn map_to_city(&self, location_text: &str) -> Vec<MappingResult> {
        let text = location_text.trim();
        if text.is_empty() {
            return Vec::new();
        }

        let mut best: HashMap<String, MappingResult> = HashMap::new();

        for rule in &self.rules {
            if !rule.pattern.is_match(text) {
                continue;
            }
            let confidence = rule.confidence();
            merge_candidate(
                &mut best,
                MappingResult {
                    city_id: rule.city_id.clone(),
                    confidence,
                    match_type: rule.kind,
                    matched_text: rule.raw_pattern.clone(),
                },
            );
            if rule.kind == MatchType::Exact && confidence >= EARLY_STOP_CONFIDENCE {
                break;
            }
        }

        let top_confidence = best
            .values()
            .map(|m| m.confidence)
            .fold(0.0_f64, f64::max);

        if top_confidence < FALLBACK_TRIGGER {
            self.similarity_fallback(text, &mut best);
        }

        let mut results: Vec<MappingResult> = best.into_values().collect();
        results.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.city_id.cmp(&b.city_id))
        });
        results
    }

    /// Edit-distance pass against every active city name, both scripts.
    ///
    /// The similarity itself is the confidence, the way the conflation-style
    /// matchers score fuzzy candidates.
    fn similarity_fallback(&self, text: &str, best: &mut HashMap<String, MappingResult>) {
        let text_lower = text.to_lowercase();
        for city in &self.cities {
            for name in [&city.name_zh, &city.name_en] {
                if name.is_empty() {
                    continue;
                }
                let sim = similarity::normalized_similarity(&text_lower, &name.to_lowercase());
                if sim >= self.config.similarity_threshold {
                    merge_candidate(
                        best,
                        MappingResult {
                            city_id: city.id.clone(),
                            confidence: sim,
                            match_type: MatchType::Fuzzy,
                            matched_text: name.clone(),
                        },
                    );
                }
            }
        }
    }

    /// Map a validated batch into published events, applying the confidence
    /// floor and per-record cap. Invalid records are excluded here.
    pub fn map_all(&self, records: &[ValidatedRecord], now: DateTime<Utc>) -> Vec<ProcessedEvent> {
        records
            .iter()
            .filter(|v| v.status != RecordStatus::Invalid)
            .map(|v| self.to_processed_event(v, now))
            .collect()
    }

    fn to_processed_event(&self, validated: &ValidatedRecord, now: DateTime<Utc>) -> ProcessedEvent {
        let record = &validated.record;

        let mut mappings = self.map_to_city(&record.location_text);
        mappings.retain(|m| m.confidence >= self.config.confidence_floor);
        mappings.truncate(self.config.max_mappings);

        let id = record.id.clone().unwrap_or_default();
        let (is_upcoming, formatted_date) = describe_time_token(&record.time_text, now);

        ProcessedEvent {
            slug: derive_slug(&id),
            id,
            title: record.title.clone(),
            time_text: record.time_text.clone(),
            location_text: record.location_text.clone(),
            url: record.url.clone(),
            image_url: record.image_url.clone(),
            local_image: None,
            view_count: record.view_count.unwrap_or(0),
            favorite_count: record.favorite_count.unwrap_or(0),
            sort_rank: record.sort_rank,
            status: validated.status,
            issues: validated.issues.clone(),
            tags: derive_tags(&record.title),
            is_upcoming,
            formatted_date,
            city_mappings: mappings,
        }
    }
}

fn merge_candidate(best: &mut HashMap<String, MappingResult>, candidate: MappingResult) {
    match best.get(&candidate.city_id) {
        Some(existing) if existing.confidence >= candidate.confidence => {}
        _ => {
            best.insert(candidate.city_id.clone(), candidate);
        }
    }
}

/// Stable slug for a record id: lowercase alphanumerics, runs of anything
/// else collapsed to a dash.
pub fn derive_slug(id: &str) -> String {
    let mut slug = String::with_capacity(id.len() + 6);
    slug.push_str("event-");
    let mut last_dash = false;
    for c in id.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Keyword table for tag derivation over titles.
static TAG_KEYWORDS: &[(&str, &[&str])] = &[
    ("音乐", &["音乐", "演出", "乐队", "live", "concert"]),
    ("讲座", &["讲座", "分享会", "沙龙", "talk", "lecture"]),
    ("工作坊", &["工作坊", "手作", "workshop"]),
    ("展览", &["展览", "画展", "艺术展", "exhibition"]),
    ("户外", &["户外", "徒步", "露营", "hiking"]),
    ("市集", &["市集", "集市", "market"]),
    ("运动", &["运动", "瑜伽", "跑步", "骑行"]),
    ("亲子", &["亲子", "儿童", "kids"]),
];

pub fn derive_tags(title: &str) -> BTreeSet<String> {
    let title_lower = title.to_lowercase();
    let mut tags = BTreeSet::new();
    for (tag, keywords) in TAG_KEYWORDS {
        if keywords.iter().any(|k| title_lower.contains(k)) {
            tags.insert((*tag).to_string());
        }
    }
    tags
}

static TIME_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{2})/(\d{2}) (\d{2}):(\d{2})$").unwrap());

/// Interpret a canonical `MM/DD HH:MM` token relative to the run's clock.
///
/// Tokens are read in the current year; month/days already behind today's
/// date count as past. Unrecognized text yields (false, "").
fn describe_time_token(time_text: &str, now: DateTime<Utc>) -> (bool, String) {
    let caps = match TIME_TOKEN_RE.captures(time_text) {
        Some(c) => c,
        None => return (false, String::new()),
    };
    let month: u32 = caps[1].parse().unwrap_or(0);
    let day: u32 = caps[2].parse().unwrap_or(0);

    let event_day = match NaiveDate::from_ymd_opt(now.year(), month, day) {
        Some(d) => d,
        None => return (false, String::new()),
    };

    let formatted = format!("{}月{}日 {}:{}", month, day, &caps[3], &caps[4]);
    (event_day >= now.date_naive(), formatted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CleanedRecord, IssueCode};
    use chrono::TimeZone;

    fn city(id: &str, zh: &str, en: &str) -> City {
        City {
            id: id.to_string(),
            name_zh: zh.to_string(),
            name_en: en.to_string(),
            province: None,
            districts: Vec::new(),
            active: true,
        }
    }

    fn reference_cities() -> Vec<City> {
        let mut beijing = city("beijing", "北京", "Beijing");
        beijing.districts = vec!["朝阳".to_string(), "海淀".to_string(), "798".to_string()];
        let mut shanghai = city("shanghai", "上海", "Shanghai");
        shanghai.districts = vec!["浦东".to_string()];
        let mut hangzhou = city("hangzhou", "杭州", "Hangzhou");
        hangzhou.districts = vec!["西湖".to_string()];
        let mut shenyang = city("shenyang", "沈阳", "Shenyang");
        shenyang.province = Some("辽宁".to_string());
        vec![
            beijing,
            shanghai,
            hangzhou,
            city("shijiazhuang", "石家庄", "Shijiazhuang"),
            shenyang,
        ]
    }

    fn mapper() -> CityMapper {
        CityMapper::new(&reference_cities(), MappingConfig::default())
    }

    #[test]
    fn test_exact_native_name_maps_with_high_confidence() {
        let results = mapper().map_to_city("北京朝阳");
        assert!(!results.is_empty());
        let top = &results[0];
        assert_eq!(top.city_id, "beijing");
        assert!(matches!(top.match_type, MatchType::Exact | MatchType::Keyword));
        assert!(top.confidence >= 0.7);
    }

    #[test]
    fn test_district_keyword_maps_without_city_name() {
        let results = mapper().map_to_city("朝阳区某创意园");
        let top = &results[0];
        assert_eq!(top.city_id, "beijing");
        assert_eq!(top.match_type, MatchType::Keyword);
        // keyword base 0.7 with priority-40 bonus of -0.01
        assert!((top.confidence - 0.69).abs() < 1e-9);
    }

    #[test]
    fn test_secondary_script_match_is_case_insensitive() {
        let results = mapper().map_to_city("beijing 798 art zone");
        assert_eq!(results[0].city_id, "beijing");
        assert_eq!(results[0].match_type, MatchType::Exact);
    }

    #[test]
    fn test_province_qualified_match() {
        let mut cities = reference_cities();
        // force the province rule to be observable by removing the bare name
        for c in &mut cities {
            if c.id == "shenyang" {
                c.name_en = String::new();
            }
        }
        let mapper = CityMapper::new(&cities, MappingConfig::default());
        let results = mapper.map_to_city("辽宁沈阳某剧场");
        let top = &results[0];
        assert_eq!(top.city_id, "shenyang");
        // the bare native name still wins at priority 100
        assert_eq!(top.match_type, MatchType::Exact);
        assert!(results.iter().all(|m| m.confidence <= 1.0));
    }

    #[test]
    fn test_fuzzy_partial_rule() {
        // 石家 is the compiled partial of 石家庄
        let results = mapper().map_to_city("石家放映厅");
        assert_eq!(results[0].city_id, "shijiazhuang");
        assert_eq!(results[0].match_type, MatchType::Fuzzy);
        assert!((results[0].confidence - 0.61).abs() < 1e-9);
    }

    #[test]
    fn test_similarity_fallback_catches_typos() {
        // no rule contains "hangzou"; edit distance to "hangzhou" is 1
        let results = mapper().map_to_city("hangzou");
        assert!(!results.is_empty());
        assert_eq!(results[0].city_id, "hangzhou");
        assert_eq!(results[0].match_type, MatchType::Fuzzy);
        assert!(results[0].confidence >= 0.6);
    }

    #[test]
    fn test_no_match_for_unknown_location() {
        let results = mapper().map_to_city("线上直播间");
        assert!(results.is_empty());
    }

    #[test]
    fn test_empty_location_maps_to_nothing() {
        assert!(mapper().map_to_city("   ").is_empty());
    }

    #[test]
    fn test_exact_match_stops_the_scan() {
        // with an exact hit the scan ends early: one result, full confidence
        let results = mapper().map_to_city("北京上海双城巡回");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].match_type, MatchType::Exact);
        assert!((results[0].confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_results_sorted_descending_and_capped() {
        let mapper = mapper();
        // keyword/fuzzy matches across four cities, no exact hit
        let text = "朝阳浦东西湖石家巡回场地";
        let results = mapper.map_to_city(text);
        assert_eq!(results.len(), 4);
        for pair in results.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }

        let validated = validated_record("e1", "巡回演出", text);
        let events = mapper.map_all(&[validated], Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].city_mappings.len(), 3);
        for pair in events[0].city_mappings.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
    }

    #[test]
    fn test_map_all_excludes_invalid_records() {
        let mut bad = validated_record("e2", "测试", "北京");
        bad.status = RecordStatus::Invalid;
        bad.issues = vec![IssueCode::MissingUrl];
        let good = validated_record("e3", "测试", "北京");

        let events = mapper().map_all(&[bad, good], Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, "e3");
    }

    #[test]
    fn test_upcoming_and_formatted_date() {
        let now = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let (upcoming, formatted) = describe_time_token("09/21 14:00", now);
        assert!(upcoming);
        assert_eq!(formatted, "9月21日 14:00");

        let (upcoming, _) = describe_time_token("03/01 10:00", now);
        assert!(!upcoming);

        let (upcoming, formatted) = describe_time_token("下周六晚上", now);
        assert!(!upcoming);
        assert!(formatted.is_empty());
    }

    #[test]
    fn test_slug_derivation() {
        assert_eq!(derive_slug("E12345"), "event-e12345");
        assert_eq!(derive_slug("ev_9 8"), "event-ev-9-8");
        assert_eq!(derive_slug(""), "event");
    }

    #[test]
    fn test_tag_derivation() {
        let tags = derive_tags("周末爵士音乐 Live 专场");
        assert!(tags.contains("音乐"));
        let tags = derive_tags("城市徒步与露营工作坊");
        assert!(tags.contains("户外"));
        assert!(tags.contains("工作坊"));
        assert!(derive_tags("普通聚会").is_empty());
    }

    fn validated_record(id: &str, title: &str, location: &str) -> ValidatedRecord {
        ValidatedRecord {
            record: CleanedRecord {
                id: Some(id.to_string()),
                title: title.to_string(),
                time_text: "09/21 14:00".to_string(),
                location_text: location.to_string(),
                url: format!("https://example.com/event/{}", id),
                image_url: String::new(),
                view_count: Some(10),
                favorite_count: Some(2),
                discovered_at: Utc::now(),
                sort_rank: 1,
                cleaning_actions: Vec::new(),
            },
            status: RecordStatus::Valid,
            issues: Vec::new(),
        }
    }
}
