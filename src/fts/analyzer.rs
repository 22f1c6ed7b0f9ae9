//! Analyzer definitions and per-field analyzer resolution.
//!
//! An [`Analyzer`] is a closed description of a tokenizer pipeline: one
//! tokenizer kind followed by an ordered list of token filters. It is
//! parsed once from the JSON parameter block attached to a schema field
//! and is immutable afterwards.
//!
//! A field either carries a single analyzer or a [`MultiAnalyzer`], which
//! picks one of several named analyzers per row based on the value of a
//! discriminator field (`by_field`). Resolution never fails: a label is
//! looked up directly, then through the alias table, and finally falls
//! back to the mandatory `"default"` analyzer.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde_json::Value;

use crate::error::{FtsError, Result};
use crate::fts::tokenizer::{self, Token};
use crate::types::Row;

/// Name every multi analyzer must define.
pub const DEFAULT_ANALYZER_NAME: &str = "default";

/// Tokenizer stage of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenizerKind {
    /// UAX #29 words, further split at non-alphanumeric characters.
    Standard,
    /// Splits on Unicode whitespace only.
    Whitespace,
    /// UAX #29 word boundaries, unchanged.
    Icu,
    /// CJK-aware segmentation: each Han ideograph is a token.
    Jieba,
}

impl TokenizerKind {
    fn parse(name: &str) -> std::result::Result<Self, String> {
        match name {
            "standard" => Ok(TokenizerKind::Standard),
            "whitespace" => Ok(TokenizerKind::Whitespace),
            "icu" => Ok(TokenizerKind::Icu),
            "jieba" => Ok(TokenizerKind::Jieba),
            other => Err(format!("unsupported tokenizer: {other}")),
        }
    }
}

/// Snowball stemmer languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StemLanguage {
    Arabic,
    Danish,
    Dutch,
    English,
    Finnish,
    French,
    German,
    Greek,
    Hungarian,
    Italian,
    Norwegian,
    Portuguese,
    Romanian,
    Russian,
    Spanish,
    Swedish,
    Tamil,
    Turkish,
}

impl StemLanguage {
    fn parse(name: &str) -> std::result::Result<Self, String> {
        let lang = match name.to_ascii_lowercase().as_str() {
            "arabic" => StemLanguage::Arabic,
            "danish" => StemLanguage::Danish,
            "dutch" => StemLanguage::Dutch,
            "english" => StemLanguage::English,
            "finnish" => StemLanguage::Finnish,
            "french" => StemLanguage::French,
            "german" => StemLanguage::German,
            "greek" => StemLanguage::Greek,
            "hungarian" => StemLanguage::Hungarian,
            "italian" => StemLanguage::Italian,
            "norwegian" => StemLanguage::Norwegian,
            "portuguese" => StemLanguage::Portuguese,
            "romanian" => StemLanguage::Romanian,
            "russian" => StemLanguage::Russian,
            "spanish" => StemLanguage::Spanish,
            "swedish" => StemLanguage::Swedish,
            "tamil" => StemLanguage::Tamil,
            "turkish" => StemLanguage::Turkish,
            other => return Err(format!("unsupported stemmer language: {other}")),
        };
        Ok(lang)
    }
}

/// Token filter stage of a pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenFilter {
    Lowercase,
    /// Folds Latin diacritics to their ASCII base letters.
    AsciiFolding,
    /// Drops tokens containing anything but ASCII letters and digits.
    AlphaNumOnly,
    /// Drops tokens equal to one of the listed words (case-sensitive).
    Stop(BTreeSet<String>),
    /// Drops tokens longer than `max` characters.
    Length { max: usize },
    Stemmer(StemLanguage),
}

/// Tokenizer pipeline of one analyzer.
#[derive(Debug, Clone, PartialEq)]
pub struct Analyzer {
    pub tokenizer: TokenizerKind,
    pub filters: Vec<TokenFilter>,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::standard()
    }
}

impl Analyzer {
    /// `{"type": "standard"}`: standard tokenizer, lowercased.
    pub fn standard() -> Self {
        Self {
            tokenizer: TokenizerKind::Standard,
            filters: vec![TokenFilter::Lowercase],
        }
    }

    /// `{"type": "english"}`: standard tokenizer, lowercase, English stop
    /// words and the English snowball stemmer.
    pub fn english() -> Self {
        Self {
            tokenizer: TokenizerKind::Standard,
            filters: vec![
                TokenFilter::Lowercase,
                TokenFilter::Stop(tokenizer::english_stop_words()),
                TokenFilter::Stemmer(StemLanguage::English),
            ],
        }
    }

    /// `{"type": "chinese"}`.
    pub fn chinese() -> Self {
        Self {
            tokenizer: TokenizerKind::Jieba,
            filters: vec![TokenFilter::Lowercase],
        }
    }

    /// Parse an analyzer parameter block. Errors carry a human readable
    /// reason; callers attach the field name.
    pub fn from_params(params: &Value) -> std::result::Result<Self, String> {
        let obj = params
            .as_object()
            .ok_or_else(|| format!("analyzer params must be an object, got {params}"))?;

        if let Some(builtin) = obj.get("type") {
            if obj.contains_key("tokenizer") || obj.contains_key("filter") {
                return Err("\"type\" cannot be combined with \"tokenizer\" or \"filter\"".into());
            }
            let name = builtin
                .as_str()
                .ok_or_else(|| "analyzer \"type\" must be a string".to_string())?;
            let mut analyzer = match name {
                "standard" => Analyzer::standard(),
                "english" => Analyzer::english(),
                "chinese" => Analyzer::chinese(),
                other => return Err(format!("unsupported analyzer type: {other}")),
            };
            for key in obj.keys() {
                if key != "type" && key != "stop_words" {
                    return Err(format!("unknown analyzer param: {key}"));
                }
            }
            if let Some(words) = obj.get("stop_words") {
                // Custom stop words replace the builtin list.
                analyzer
                    .filters
                    .retain(|f| !matches!(f, TokenFilter::Stop(_)));
                let pos = analyzer
                    .filters
                    .iter()
                    .position(|f| matches!(f, TokenFilter::Stemmer(_)))
                    .unwrap_or(analyzer.filters.len());
                analyzer
                    .filters
                    .insert(pos, TokenFilter::Stop(parse_stop_words(words)?));
            }
            return Ok(analyzer);
        }

        for key in obj.keys() {
            if key != "tokenizer" && key != "filter" {
                return Err(format!("unknown analyzer param: {key}"));
            }
        }

        let tokenizer = match obj.get("tokenizer") {
            None => TokenizerKind::Standard,
            Some(Value::String(name)) => TokenizerKind::parse(name)?,
            Some(Value::Object(t)) => {
                let name = t
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "tokenizer object must carry a string \"type\"".to_string())?;
                TokenizerKind::parse(name)?
            }
            Some(other) => return Err(format!("invalid tokenizer: {other}")),
        };

        let filters = match obj.get("filter") {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(parse_filter)
                .collect::<std::result::Result<Vec<_>, _>>()?,
            Some(other) => return Err(format!("\"filter\" must be an array, got {other}")),
        };

        Ok(Analyzer { tokenizer, filters })
    }

    /// Run the pipeline over `text`.
    pub fn analyze(&self, text: &str) -> Vec<Token> {
        tokenizer::tokenize(text, self)
    }
}

fn parse_filter(value: &Value) -> std::result::Result<TokenFilter, String> {
    match value {
        Value::String(name) => match name.as_str() {
            "lowercase" => Ok(TokenFilter::Lowercase),
            "asciifolding" => Ok(TokenFilter::AsciiFolding),
            "alphanumonly" => Ok(TokenFilter::AlphaNumOnly),
            other => Err(format!("unsupported filter: {other}")),
        },
        Value::Object(obj) => {
            let kind = obj
                .get("type")
                .and_then(Value::as_str)
                .ok_or_else(|| "filter object must carry a string \"type\"".to_string())?;
            match kind {
                "lowercase" => Ok(TokenFilter::Lowercase),
                "asciifolding" => Ok(TokenFilter::AsciiFolding),
                "alphanumonly" => Ok(TokenFilter::AlphaNumOnly),
                "stop" => {
                    let words = obj
                        .get("stop_words")
                        .ok_or_else(|| "stop filter requires \"stop_words\"".to_string())?;
                    Ok(TokenFilter::Stop(parse_stop_words(words)?))
                }
                "length" => {
                    let max = obj
                        .get("max")
                        .and_then(Value::as_u64)
                        .ok_or_else(|| "length filter requires integer \"max\"".to_string())?;
                    Ok(TokenFilter::Length { max: max as usize })
                }
                "stemmer" => {
                    let lang = obj
                        .get("language")
                        .and_then(Value::as_str)
                        .ok_or_else(|| "stemmer filter requires \"language\"".to_string())?;
                    Ok(TokenFilter::Stemmer(StemLanguage::parse(lang)?))
                }
                other => Err(format!("unsupported filter: {other}")),
            }
        }
        other => Err(format!("invalid filter: {other}")),
    }
}

fn parse_stop_words(value: &Value) -> std::result::Result<BTreeSet<String>, String> {
    let items = value
        .as_array()
        .ok_or_else(|| "\"stop_words\" must be an array of strings".to_string())?;
    let mut words = BTreeSet::new();
    for item in items {
        let word = item
            .as_str()
            .ok_or_else(|| format!("stop word must be a string, got {item}"))?;
        if word == "_english_" {
            words.extend(tokenizer::english_stop_words());
        } else {
            words.insert(word.to_string());
        }
    }
    Ok(words)
}

/// Several named analyzers selected per row by a discriminator field.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiAnalyzer {
    pub by_field: String,
    analyzers: BTreeMap<String, Analyzer>,
    alias: BTreeMap<String, String>,
    default: Analyzer,
}

impl MultiAnalyzer {
    /// Parse a `multi_analyzer_params` block declared on `field`.
    ///
    /// Does not check that `by_field` exists; that needs the whole schema.
    pub fn from_params(field: &str, params: &Value) -> Result<Self> {
        let invalid = |reason: String| FtsError::InvalidAnalyzer {
            field: field.to_string(),
            reason,
        };
        let obj = params
            .as_object()
            .ok_or_else(|| invalid(format!("multi analyzer params must be an object, got {params}")))?;

        let by_field = match obj.get("by_field") {
            None | Some(Value::Null) => {
                return Err(FtsError::MissingByField {
                    field: field.to_string(),
                })
            }
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(other) => return Err(invalid(format!("invalid by_field: {other}"))),
        };

        let raw = match obj.get("analyzers") {
            Some(Value::Object(map)) => map,
            None => {
                return Err(FtsError::MissingDefaultAnalyzer {
                    field: field.to_string(),
                })
            }
            Some(other) => return Err(invalid(format!("\"analyzers\" must be an object, got {other}"))),
        };
        let mut analyzers = BTreeMap::new();
        for (name, analyzer_params) in raw {
            let analyzer = Analyzer::from_params(analyzer_params)
                .map_err(|reason| invalid(format!("analyzer {name}: {reason}")))?;
            analyzers.insert(name.clone(), analyzer);
        }
        let default = analyzers
            .get(DEFAULT_ANALYZER_NAME)
            .cloned()
            .ok_or_else(|| FtsError::MissingDefaultAnalyzer {
                field: field.to_string(),
            })?;

        let mut alias = BTreeMap::new();
        match obj.get("alias") {
            None | Some(Value::Null) => {}
            Some(Value::Object(map)) => {
                for (label, target) in map {
                    let target = target
                        .as_str()
                        .ok_or_else(|| invalid(format!("alias {label} must map to a string")))?;
                    // Dangling aliases are accepted and resolve to default.
                    alias.insert(label.clone(), target.to_string());
                }
            }
            Some(other) => return Err(invalid(format!("\"alias\" must be an object, got {other}"))),
        }

        for key in obj.keys() {
            if !matches!(key.as_str(), "by_field" | "analyzers" | "alias") {
                return Err(invalid(format!("unknown multi analyzer param: {key}")));
            }
        }

        Ok(Self {
            by_field,
            analyzers,
            alias,
            default,
        })
    }

    /// Name of the analyzer that `label` resolves to.
    ///
    /// Direct name first, then alias, then `"default"`. An absent or empty
    /// label always resolves to `"default"`.
    pub fn resolve_name<'a>(&'a self, label: Option<&'a str>) -> &'a str {
        let Some(label) = label.filter(|l| !l.is_empty()) else {
            return DEFAULT_ANALYZER_NAME;
        };
        if self.analyzers.contains_key(label) {
            return label;
        }
        if let Some(target) = self.alias.get(label) {
            if self.analyzers.contains_key(target.as_str()) {
                return target;
            }
        }
        DEFAULT_ANALYZER_NAME
    }

    pub fn resolve(&self, label: Option<&str>) -> &Analyzer {
        self.analyzers
            .get(self.resolve_name(label))
            .unwrap_or(&self.default)
    }

    pub fn analyzer_names(&self) -> impl Iterator<Item = &str> {
        self.analyzers.keys().map(String::as_str)
    }
}

/// Analyzer configuration of one text field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldAnalyzer {
    Single(Analyzer),
    Multi(MultiAnalyzer),
}

impl FieldAnalyzer {
    /// Analyzer for a concrete label. Single analyzers ignore the label.
    pub fn resolve(&self, label: Option<&str>) -> &Analyzer {
        match self {
            FieldAnalyzer::Single(analyzer) => analyzer,
            FieldAnalyzer::Multi(multi) => multi.resolve(label),
        }
    }

    /// Stable key of the resolved analyzer, usable for caching per-analyzer
    /// work such as analyzed query terms.
    pub fn resolve_name<'a>(&'a self, label: Option<&'a str>) -> &'a str {
        match self {
            FieldAnalyzer::Single(_) => DEFAULT_ANALYZER_NAME,
            FieldAnalyzer::Multi(multi) => multi.resolve_name(label),
        }
    }

    pub fn by_field(&self) -> Option<&str> {
        match self {
            FieldAnalyzer::Single(_) => None,
            FieldAnalyzer::Multi(multi) => Some(&multi.by_field),
        }
    }

    /// Discriminator label of `row`, if this field routes by one.
    pub fn row_label(&self, row: &Row) -> Option<String> {
        self.by_field()
            .and_then(|by| row.get(by))
            .and_then(|v| v.as_label())
    }

    /// Analyzer that applies to `row`.
    pub fn resolve_for_row(&self, row: &Row) -> &Analyzer {
        match self {
            FieldAnalyzer::Single(analyzer) => analyzer,
            FieldAnalyzer::Multi(multi) => multi.resolve(self.row_label(row).as_deref()),
        }
    }
}

/// Analyzer configurations of all analyzer-enabled fields of a collection.
#[derive(Debug, Clone, Default)]
pub struct AnalyzerRegistry {
    fields: HashMap<String, FieldAnalyzer>,
}

impl AnalyzerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, field: impl Into<String>, analyzer: FieldAnalyzer) {
        self.fields.insert(field.into(), analyzer);
    }

    pub fn get(&self, field: &str) -> Option<&FieldAnalyzer> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Analyzer for query text against `field`. `analyzer_name` comes from
    /// the search request; empty and absent both mean "default".
    pub fn resolve_for_query(&self, field: &str, analyzer_name: Option<&str>) -> Option<&Analyzer> {
        self.fields.get(field).map(|a| a.resolve(analyzer_name))
    }
}
