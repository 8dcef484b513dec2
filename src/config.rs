use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::HashSet;

use crate::db;
use crate::model::{BonusSlot, Letter};

pub const GRADING_SECTION_KEY: &str = "setup.grading";

/// Typed view of the `setup.grading` section.
#[derive(Debug, Clone)]
pub struct GradingConfig {
    non_quantitative_subjects: HashSet<String>,
    pub allowed_letters: Vec<Letter>,
    pub bonus_moment_max: f64,
    pub bonus_total_max: f64,
    pub bulk_max_entries: usize,
}

impl GradingConfig {
    pub fn is_non_quantitative(&self, subject_name: &str) -> bool {
        self.non_quantitative_subjects
            .contains(&normalize_subject(subject_name))
    }

    pub fn letter_allowed(&self, letter: Letter) -> bool {
        self.allowed_letters.contains(&letter)
    }

    pub fn bonus_max(&self, slot: BonusSlot) -> f64 {
        match slot {
            BonusSlot::Moment(_) => self.bonus_moment_max,
            BonusSlot::Total => self.bonus_total_max,
        }
    }

    fn from_section(v: &Value) -> Self {
        let non_quantitative_subjects = v
            .get("nonQuantitativeSubjects")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str())
                    .map(normalize_subject)
                    .collect()
            })
            .unwrap_or_default();
        let allowed_letters = v
            .get("allowedLetters")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|s| s.as_str())
                    .filter_map(Letter::parse)
                    .collect()
            })
            .unwrap_or_default();
        GradingConfig {
            non_quantitative_subjects,
            allowed_letters,
            bonus_moment_max: v
                .get("bonusMomentMax")
                .and_then(|v| v.as_f64())
                .unwrap_or(2.0),
            bonus_total_max: v
                .get("bonusTotalMax")
                .and_then(|v| v.as_f64())
                .unwrap_or(5.0),
            bulk_max_entries: v
                .get("bulkMaxEntries")
                .and_then(|v| v.as_u64())
                .unwrap_or(5000) as usize,
        }
    }
}

impl Default for GradingConfig {
    fn default() -> Self {
        GradingConfig::from_section(&default_section())
    }
}

fn normalize_subject(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn default_section() -> Value {
    json!({
        "nonQuantitativeSubjects": ["Orientation", "Group and Participation"],
        "allowedLetters": ["A", "B", "C", "D", "E"],
        "bonusMomentMax": 2,
        "bonusTotalMax": 5,
        "bulkMaxEntries": 5000
    })
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v
        .as_f64()
        .ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_list(v: &Value, key: &str, max_len: usize) -> Result<Vec<String>, String> {
    let arr = v
        .as_array()
        .ok_or_else(|| format!("{} must be an array of strings", key))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        let s = item
            .as_str()
            .ok_or_else(|| format!("{} must be an array of strings", key))?
            .trim();
        if s.is_empty() {
            return Err(format!("{} entries must not be empty", key));
        }
        if s.len() > max_len {
            return Err(format!("{} entries must be <= {} chars", key, max_len));
        }
        out.push(s.to_string());
    }
    Ok(out)
}

pub fn merge_grading_patch(current: &mut Value, patch: &Map<String, Value>) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match k.as_str() {
            "nonQuantitativeSubjects" => {
                let names = parse_string_list(v, k, 120)?;
                obj.insert(k.clone(), json!(names));
            }
            "allowedLetters" => {
                let raw = parse_string_list(v, k, 1)?;
                let mut letters: Vec<&'static str> = Vec::new();
                for s in &raw {
                    let Some(l) = Letter::parse(s) else {
                        return Err(format!("allowedLetters: unknown letter {}", s));
                    };
                    if !letters.contains(&l.as_str()) {
                        letters.push(l.as_str());
                    }
                }
                if letters.is_empty() {
                    return Err("allowedLetters must not be empty".into());
                }
                obj.insert(k.clone(), json!(letters));
            }
            "bonusMomentMax" | "bonusTotalMax" => {
                obj.insert(k.clone(), json!(parse_f64_range(v, k, 0.0, 20.0)?));
            }
            "bulkMaxEntries" => {
                obj.insert(k.clone(), json!(parse_i64_range(v, k, 1, 20000)?));
            }
            _ => return Err(format!("unknown grading field: {}", k)),
        }
    }
    Ok(())
}

pub fn load_section(conn: &Connection) -> anyhow::Result<Value> {
    let mut current = default_section();
    if let Some(saved) = db::settings_get_json(conn, GRADING_SECTION_KEY)? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut one = Map::new();
                one.insert(k.clone(), v.clone());
                let _ = merge_grading_patch(&mut current, &one);
            }
        }
    }
    Ok(current)
}

pub fn load(conn: &Connection) -> anyhow::Result<GradingConfig> {
    Ok(GradingConfig::from_section(&load_section(conn)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Moment;

    #[test]
    fn defaults_cover_exclusion_set_and_bonus_ranges() {
        let cfg = GradingConfig::default();
        assert!(cfg.is_non_quantitative("orientation"));
        assert!(cfg.is_non_quantitative("  Group   and participation "));
        assert!(!cfg.is_non_quantitative("Mathematics"));
        assert_eq!(cfg.bonus_max(BonusSlot::Moment(Moment::new(1).expect("m"))), 2.0);
        assert_eq!(cfg.bonus_max(BonusSlot::Total), 5.0);
        assert_eq!(cfg.allowed_letters.len(), 5);
    }

    #[test]
    fn patch_rejects_unknown_fields_and_bad_ranges() {
        let mut cur = default_section();
        let patch = json!({ "bonusTotalMax": 40 });
        assert!(merge_grading_patch(&mut cur, patch.as_object().expect("obj")).is_err());
        let patch = json!({ "roundingMode": "even" });
        assert!(merge_grading_patch(&mut cur, patch.as_object().expect("obj")).is_err());
        let patch = json!({ "allowedLetters": ["a", "B", "a"] });
        merge_grading_patch(&mut cur, patch.as_object().expect("obj")).expect("letters");
        assert_eq!(cur["allowedLetters"], json!(["A", "B"]));
    }

    #[test]
    fn saved_section_overrides_defaults() {
        let conn = db::open_memory();
        db::settings_set_json(
            &conn,
            GRADING_SECTION_KEY,
            &json!({ "nonQuantitativeSubjects": ["Conduct"], "bonusMomentMax": "bad" }),
        )
        .expect("save");
        let cfg = load(&conn).expect("load");
        assert!(cfg.is_non_quantitative("conduct"));
        assert!(!cfg.is_non_quantitative("Orientation"));
        assert_eq!(cfg.bonus_moment_max, 2.0);
    }
}
