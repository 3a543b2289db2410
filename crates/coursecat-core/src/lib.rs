//! Core catalog model, seed fixture and query engine for coursecat.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "coursecat-core";

/// Number of records returned when a query carries no usable limit.
pub const DEFAULT_LIMIT: usize = 8;

/// Name shown for a course-like object that carries no usable name.
pub const FALLBACK_COURSE_NAME: &str = "Program";

/// A read-only catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRecord {
    pub id: u32,
    pub name: String,
    pub university_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub university_id: Option<String>,
    pub country: String,
    #[serde(alias = "category")]
    pub field_of_study: String,
    pub tuition: f64,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub popularity: Option<u8>,
}

impl CourseRecord {
    /// Token the university filter compares against: the identifier when the
    /// record has one, otherwise the display name.
    pub fn university_key(&self) -> &str {
        self.university_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .unwrap_or(&self.university_name)
    }

    pub fn popularity_score(&self) -> u8 {
        self.popularity.unwrap_or(0)
    }

    /// Calendar date of `created_at`, when it starts with an ISO `YYYY-MM-DD`.
    pub fn created_on(&self) -> Option<NaiveDate> {
        let date = self.created_at.get(..10)?;
        NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SortBy {
    #[default]
    Newest,
    Oldest,
    Popularity,
    /// Any token the engine does not know; results keep input order.
    Other(String),
}

impl SortBy {
    pub fn parse(token: &str) -> Self {
        match token.trim().to_lowercase().as_str() {
            "newest" => Self::Newest,
            "oldest" => Self::Oldest,
            "popularity" => Self::Popularity,
            _ => Self::Other(token.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Newest => "newest",
            Self::Oldest => "oldest",
            Self::Popularity => "popularity",
            Self::Other(token) => token,
        }
    }
}

impl From<String> for SortBy {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<SortBy> for String {
    fn from(value: SortBy) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for SortBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied filter/sort/limit request. Absent fields impose nothing,
/// except `limit`, which falls back to [`DEFAULT_LIMIT`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySpec {
    #[serde(default)]
    pub sort_by: Option<SortBy>,
    #[serde(default)]
    pub university: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl QuerySpec {
    pub fn effective_limit(&self) -> usize {
        match self.limit {
            None => DEFAULT_LIMIT,
            Some(l) if l <= 0 => 0,
            Some(l) => usize::try_from(l).unwrap_or(usize::MAX),
        }
    }
}

/// Run `spec` against `catalog`: filter (AND), stable sort, then limit.
/// The catalog itself is never modified.
pub fn query(catalog: &[CourseRecord], spec: &QuerySpec) -> Vec<CourseRecord> {
    let university = active_token(spec.university.as_deref());
    let country = active_token(spec.country.as_deref());
    let category = active_token(spec.category.as_deref());

    let mut rows = catalog
        .iter()
        .filter(|c| university.map_or(true, |u| same_token(c.university_key(), u)))
        .filter(|c| country.map_or(true, |k| same_token(&c.country, k)))
        .filter(|c| category.map_or(true, |k| same_token(&c.field_of_study, k)))
        .cloned()
        .collect::<Vec<_>>();

    match &spec.sort_by {
        Some(SortBy::Newest) => rows.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        Some(SortBy::Oldest) => rows.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        Some(SortBy::Popularity) => {
            rows.sort_by(|a, b| b.popularity_score().cmp(&a.popularity_score()))
        }
        Some(SortBy::Other(_)) | None => {}
    }

    rows.truncate(spec.effective_limit().min(rows.len()));
    rows
}

fn active_token(token: Option<&str>) -> Option<&str> {
    token.map(str::trim).filter(|t| !t.is_empty())
}

fn same_token(value: &str, token: &str) -> bool {
    value.to_lowercase() == token.to_lowercase()
}

/// Uniform display shape, built either from a [`CourseRecord`] or from an
/// arbitrary course-like JSON object.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayCourse {
    pub name: String,
    pub university: Option<String>,
    pub country: Option<String>,
    pub category: Option<String>,
    pub fee: Option<Fee>,
}

impl DisplayCourse {
    pub fn fee_label(&self) -> Option<String> {
        self.fee.as_ref().map(ToString::to_string)
    }
}

impl From<&CourseRecord> for DisplayCourse {
    fn from(record: &CourseRecord) -> Self {
        Self {
            name: non_empty(&record.name).unwrap_or_else(|| FALLBACK_COURSE_NAME.to_string()),
            university: non_empty(&record.university_name),
            country: non_empty(&record.country),
            category: non_empty(&record.field_of_study),
            fee: Some(Fee::from_amount(record.tuition)),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Fee {
    Free,
    Amount(f64),
    Text(String),
}

impl Fee {
    pub fn from_amount(amount: f64) -> Self {
        if amount == 0.0 {
            Self::Free
        } else {
            Self::Amount(amount)
        }
    }
}

impl fmt::Display for Fee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("Free"),
            Self::Amount(amount) => f.write_str(&format_amount(*amount)),
            Self::Text(text) => f.write_str(text),
        }
    }
}

/// `12500.0` -> `$12,500`, `1234.5` -> `$1,234.50`.
pub fn format_amount(amount: f64) -> String {
    let rounded = (amount * 100.0).round() / 100.0;
    let abs = rounded.abs();
    let whole = abs.trunc() as u64;
    let cents = ((abs - abs.trunc()) * 100.0).round() as u64;

    let digits = whole.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if rounded < 0.0 { "-" } else { "" };
    if cents > 0 {
        format!("{sign}${grouped}.{cents:02}")
    } else {
        format!("{sign}${grouped}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UniversityFacet {
    pub id: Option<String>,
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetCount {
    pub value: String,
    pub count: usize,
}

/// Distinct filter values present in a catalog, for building filter controls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogFacets {
    pub universities: Vec<UniversityFacet>,
    pub countries: Vec<FacetCount>,
    pub categories: Vec<FacetCount>,
}

pub fn facets(catalog: &[CourseRecord]) -> CatalogFacets {
    let mut universities = BTreeMap::<(String, Option<String>), usize>::new();
    let mut countries = BTreeMap::<String, usize>::new();
    let mut categories = BTreeMap::<String, usize>::new();
    for c in catalog {
        *universities
            .entry((c.university_name.clone(), c.university_id.clone()))
            .or_default() += 1;
        *countries.entry(c.country.clone()).or_default() += 1;
        *categories.entry(c.field_of_study.clone()).or_default() += 1;
    }

    let counts = |map: BTreeMap<String, usize>| {
        map.into_iter()
            .map(|(value, count)| FacetCount { value, count })
            .collect::<Vec<_>>()
    };

    CatalogFacets {
        universities: universities
            .into_iter()
            .map(|((name, id), count)| UniversityFacet { id, name, count })
            .collect(),
        countries: counts(countries),
        categories: counts(categories),
    }
}

/// Load a catalog from a JSON array of course records.
pub fn load_catalog(path: impl AsRef<Path>) -> anyhow::Result<Vec<CourseRecord>> {
    let path = path.as_ref();
    let data = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let catalog: Vec<CourseRecord> =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))?;

    let mut seen = HashSet::with_capacity(catalog.len());
    for record in &catalog {
        if !seen.insert(record.id) {
            bail!("duplicate course id {} in {}", record.id, path.display());
        }
        if record.created_on().is_none() {
            bail!(
                "invalid createdAt {:?} for course {} in {}",
                record.created_at,
                record.id,
                path.display()
            );
        }
    }
    Ok(catalog)
}

type SeedRow = (
    u32,
    &'static str,
    &'static str,
    Option<&'static str>,
    &'static str,
    &'static str,
    f64,
    &'static str,
    Option<u8>,
);

const SEED: [SeedRow; 24] = [
    (1, "Bachelor of Computer Science", "University of Toronto", Some("uoft"), "Canada", "Computer Science", 61720.0, "2024-09-12", Some(95)),
    (2, "Master of Business Administration", "University of Toronto", Some("uoft"), "Canada", "Business", 48500.0, "2023-11-02", Some(80)),
    (3, "Doctor of Medicine", "McGill University", Some("mcgill"), "Canada", "Medicine", 52000.0, "2024-05-20", Some(88)),
    (4, "Bachelor of Arts in History", "McGill University", Some("mcgill"), "Canada", "Arts", 0.0, "2022-08-15", Some(62)),
    (5, "Bachelor of Applied Science in Civil Engineering", "University of British Columbia", Some("ubc"), "Canada", "Engineering", 45300.0, "2024-02-01", Some(88)),
    (6, "Master of Data Science", "University of British Columbia", Some("ubc"), "Canada", "Computer Science", 39800.0, "2023-06-30", Some(71)),
    (7, "Bachelor of Commerce", "University of Melbourne", Some("unimelb"), "Australia", "Business", 44600.0, "2024-07-08", Some(77)),
    (8, "Master of Engineering (Mechanical)", "Monash University", Some("monash"), "Australia", "Engineering", 42000.0, "2023-03-14", Some(69)),
    (9, "Bachelor of Laws", "University of Sydney", None, "Australia", "Law", 51200.0, "2022-12-01", Some(74)),
    (10, "MSc Advanced Computer Science", "University of Oxford", Some("oxford"), "United Kingdom", "Computer Science", 33000.0, "2024-10-03", Some(92)),
    (11, "BA Philosophy, Politics and Economics", "University of Oxford", Some("oxford"), "United Kingdom", "Arts", 36800.0, "2021-09-27", Some(85)),
    (12, "MSc Biomedical Engineering", "Imperial College London", Some("imperial"), "United Kingdom", "Engineering", 39400.0, "2023-09-18", Some(81)),
    (13, "LLM International Law", "King's College London", None, "United Kingdom", "Law", 28750.0, "2022-04-11", None),
    (14, "BS Electrical Engineering and Computer Science", "Massachusetts Institute of Technology", Some("mit"), "United States", "Computer Science", 59750.0, "2024-01-22", Some(99)),
    (15, "Master of Business Administration", "Stanford University", Some("stanford"), "United States", "Business", 76950.0, "2023-10-05", Some(97)),
    (16, "Doctor of Medicine", "Johns Hopkins University", Some("jhu"), "United States", "Medicine", 65400.0, "2022-06-09", Some(90)),
    (17, "BFA Studio Art", "City College of New York", Some("ccny"), "United States", "Arts", 7340.0, "2021-03-15", Some(48)),
    (18, "MSc Informatics", "Technical University of Munich", Some("tum"), "Germany", "Computer Science", 0.0, "2024-04-17", Some(86)),
    (19, "BSc Mechanical Engineering", "RWTH Aachen University", Some("rwth"), "Germany", "Engineering", 0.0, "2023-01-30", Some(73)),
    (20, "MA International Business", "Freie Universität Berlin", Some("fu-berlin"), "Germany", "Business", 0.0, "2022-10-10", Some(58)),
    (21, "MSc Robotics, Systems and Control", "ETH Zurich", Some("eth"), "Switzerland", "Engineering", 1460.0, "2024-03-11", Some(91)),
    (22, "Master in Law", "University of Geneva", Some("unige"), "Switzerland", "Law", 1000.0, "2023-04-25", Some(64)),
    (23, "Bachelor of Nursing", "University of Melbourne", Some("unimelb"), "Australia", "Medicine", 38400.0, "2023-06-30", Some(55)),
    (24, "Bachelor of Fine Arts", "OCAD University", Some("ocad"), "Canada", "Arts", 27900.0, "2021-11-19", Some(66)),
];

/// The fixed 24-record mock catalog.
pub fn seed_catalog() -> Vec<CourseRecord> {
    SEED.iter()
        .map(
            |&(id, name, university_name, university_id, country, field_of_study, tuition, created_at, popularity)| {
                CourseRecord {
                    id,
                    name: name.to_string(),
                    university_name: university_name.to_string(),
                    university_id: university_id.map(ToString::to_string),
                    country: country.to_string(),
                    field_of_study: field_of_study.to_string(),
                    tuition,
                    created_at: created_at.to_string(),
                    popularity,
                }
            },
        )
        .collect()
}
