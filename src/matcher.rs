//! Keyword-driven category matching.
//!
//! Maps free-text symptom descriptions to candidate disease categories by
//! case-insensitive substring containment against a data-driven keyword
//! table. The table is domain knowledge, not code: it can be replaced
//! wholesale from a TOML file, and the builtin table only ships as a
//! starting point.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::config::FusionConfig;
use crate::error::Result;
use crate::models::CategoryMatch;

/// Keyword entry for one category.
#[derive(Debug, Clone, Deserialize)]
pub struct CategoryEntry {
    pub keywords: Vec<String>,
    /// 1 = primary match, 2 = secondary. Lower priority numbers weigh more.
    #[serde(default = "default_priority")]
    pub priority: u8,
    /// Whether this category receives the age boost for young patients.
    #[serde(default)]
    pub pediatric: bool,
}

fn default_priority() -> u8 {
    1
}

/// The full category → keywords table. A `BTreeMap` keeps iteration (and
/// therefore tie-breaking) deterministic.
#[derive(Debug, Clone, Deserialize)]
pub struct KeywordTable {
    pub categories: BTreeMap<String, CategoryEntry>,
}

impl KeywordTable {
    pub fn load(path: &Path) -> Result<KeywordTable> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// The builtin table covering the six guideline categories the corpus
    /// ships with. Keywords are bilingual because symptom descriptions
    /// arrive in both Chinese and English.
    pub fn builtin() -> KeywordTable {
        let mut categories = BTreeMap::new();

        categories.insert(
            "respiratory".to_string(),
            entry(
                &[
                    "咳嗽", "咳痰", "气喘", "呼吸困难", "呼吸", "喘息", "胸闷", "肺炎", "哮喘",
                    "支气管炎", "copd", "慢阻肺", "肺", "cough", "sputum", "wheeze", "dyspnea",
                    "asthma", "pneumonia", "bronchitis", "breathing",
                ],
                1,
                false,
            ),
        );
        categories.insert(
            "cardiovascular".to_string(),
            entry(
                &[
                    "心悸", "胸闷", "胸痛", "心痛", "心绞痛", "心梗", "高血压", "心律失常",
                    "心衰", "心力衰竭", "冠心病", "heart", "chest pain", "palpitation",
                    "hypertension", "arrhythmia", "cardiac", "cardiovascular",
                ],
                1,
                false,
            ),
        );
        categories.insert(
            "digestive".to_string(),
            entry(
                &[
                    "腹痛", "腹泻", "恶心", "呕吐", "消化不良", "胃炎", "肝炎", "便秘", "腹胀",
                    "胃痛", "肠炎", "abdominal pain", "diarrhea", "nausea", "vomiting",
                    "indigestion", "gastritis", "hepatitis",
                ],
                1,
                false,
            ),
        );
        categories.insert(
            "pediatric".to_string(),
            entry(
                &[
                    "儿童", "婴儿", "小儿", "宝宝", "孩子", "发烧", "疫苗", "发育", "新生儿",
                    "幼儿", "child", "infant", "baby", "pediatric", "vaccine", "growth",
                    "development",
                ],
                2,
                true,
            ),
        );
        categories.insert(
            "dermatology".to_string(),
            entry(
                &[
                    "皮疹", "瘙痒", "皮肤", "湿疹", "荨麻疹", "皮炎", "痤疮", "痘痘", "红斑",
                    "水泡", "rash", "itch", "skin", "eczema", "urticaria", "dermatitis", "acne",
                ],
                1,
                false,
            ),
        );
        categories.insert(
            "neurological".to_string(),
            entry(
                &[
                    "头痛", "头晕", "眩晕", "抽搐", "癫痫", "中风", "偏瘫", "麻木", "神经痛",
                    "失眠", "headache", "dizziness", "seizure", "epilepsy", "stroke",
                    "paralysis", "neuralgia", "insomnia",
                ],
                1,
                false,
            ),
        );

        KeywordTable { categories }
    }
}

fn entry(keywords: &[&str], priority: u8, pediatric: bool) -> CategoryEntry {
    CategoryEntry {
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        priority,
        pediatric,
    }
}

pub struct CategoryMatcher {
    table: KeywordTable,
    age_boost: u32,
    age_threshold: u32,
}

impl CategoryMatcher {
    pub fn new(table: KeywordTable, fusion: &FusionConfig) -> CategoryMatcher {
        CategoryMatcher {
            table,
            age_boost: fusion.pediatric_age_boost,
            age_threshold: fusion.pediatric_age_threshold,
        }
    }

    /// Match symptoms against the keyword table.
    ///
    /// Each contained keyword scores one point; pediatric-flagged categories
    /// gain the age boost for young patients (which alone can make the
    /// category eligible). `final_score` weighs the raw score by priority,
    /// and the result is sorted by it, descending. Categories that score
    /// zero are excluded.
    pub fn match_symptoms(&self, symptoms: &str, patient_age: Option<u32>) -> Vec<CategoryMatch> {
        let symptoms_lower = symptoms.to_lowercase();
        let mut matches: Vec<CategoryMatch> = Vec::new();

        for (category, entry) in &self.table.categories {
            let mut score = 0u32;
            let mut matched_keywords = Vec::new();

            for keyword in &entry.keywords {
                if symptoms_lower.contains(&keyword.to_lowercase()) {
                    score += 1;
                    matched_keywords.push(keyword.clone());
                }
            }

            if entry.pediatric {
                if let Some(age) = patient_age {
                    if age < self.age_threshold {
                        score += self.age_boost;
                    }
                }
            }

            if score > 0 {
                let final_score = f64::from(score) * priority_weight(entry.priority);
                matches.push(CategoryMatch {
                    category: category.clone(),
                    score,
                    matched_keywords,
                    priority: entry.priority,
                    final_score,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.final_score
                .partial_cmp(&a.final_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.category.cmp(&b.category))
        });

        matches
    }
}

/// Priority 1 doubles the raw score, priority 2 keeps it as-is. Anything
/// lower-priority still counts with weight 1.
fn priority_weight(priority: u8) -> f64 {
    f64::from((3i32 - i32::from(priority)).max(1))
}
