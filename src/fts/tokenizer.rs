//! Unicode-aware tokenizer pipeline.
//!
//! `tokenize` is a pure function of the text and the analyzer: the same
//! input always yields the same token sequence, in document order, with
//! duplicates retained.

use std::collections::BTreeSet;

use jieba_rs::Jieba;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_segmentation::UnicodeSegmentation;

use crate::fts::analyzer::{Analyzer, StemLanguage, TokenFilter, TokenizerKind};

/// A term together with its ordinal in the tokenizer output.
///
/// Positions are assigned before filtering, so a removed stop word leaves
/// a gap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub term: String,
    pub position: u32,
}

/// Tokenize `text` with the analyzer's tokenizer and apply each filter in
/// declared order. Empty input yields no tokens.
#[must_use]
pub fn tokenize(text: &str, analyzer: &Analyzer) -> Vec<Token> {
    if text.is_empty() {
        return Vec::new();
    }

    let stemmers: Vec<Option<Stemmer>> = analyzer
        .filters
        .iter()
        .map(|f| match f {
            TokenFilter::Stemmer(lang) => Some(create_stemmer(*lang)),
            _ => None,
        })
        .collect();

    split(text, analyzer.tokenizer)
        .into_iter()
        .enumerate()
        .filter_map(|(position, word)| {
            let mut term = word.to_string();
            for (filter, stemmer) in analyzer.filters.iter().zip(&stemmers) {
                term = apply_filter(filter, stemmer.as_ref(), term)?;
            }
            Some(Token {
                term,
                position: position as u32,
            })
        })
        .collect()
}

/// Terms only, in document order.
#[must_use]
pub fn tokenize_terms(text: &str, analyzer: &Analyzer) -> Vec<String> {
    tokenize(text, analyzer).into_iter().map(|t| t.term).collect()
}

fn split(text: &str, kind: TokenizerKind) -> Vec<&str> {
    match kind {
        TokenizerKind::Whitespace => text.split_whitespace().collect(),
        TokenizerKind::Icu => text.unicode_words().collect(),
        TokenizerKind::Standard => text
            .unicode_words()
            .flat_map(|w| w.split(|c: char| !c.is_alphanumeric()))
            .filter(|w| !w.is_empty())
            .collect(),
        TokenizerKind::Jieba => JIEBA
            .cut(text, true)
            .into_iter()
            .filter(|w| w.chars().any(char::is_alphanumeric))
            .collect(),
    }
}

fn apply_filter(filter: &TokenFilter, stemmer: Option<&Stemmer>, term: String) -> Option<String> {
    match filter {
        TokenFilter::Lowercase => Some(term.to_lowercase()),
        TokenFilter::AsciiFolding => Some(ascii_fold(&term)),
        TokenFilter::AlphaNumOnly => term
            .chars()
            .all(|c| c.is_ascii_alphanumeric())
            .then_some(term),
        TokenFilter::Stop(words) => (!words.contains(&term)).then_some(term),
        TokenFilter::Length { max } => (term.chars().count() <= *max).then_some(term),
        TokenFilter::Stemmer(_) => match stemmer {
            Some(s) => Some(s.stem(&term).into_owned()),
            None => Some(term),
        },
    }
    .filter(|t| !t.is_empty())
}

fn create_stemmer(language: StemLanguage) -> Stemmer {
    let algorithm = match language {
        StemLanguage::Arabic => Algorithm::Arabic,
        StemLanguage::Danish => Algorithm::Danish,
        StemLanguage::Dutch => Algorithm::Dutch,
        StemLanguage::English => Algorithm::English,
        StemLanguage::Finnish => Algorithm::Finnish,
        StemLanguage::French => Algorithm::French,
        StemLanguage::German => Algorithm::German,
        StemLanguage::Greek => Algorithm::Greek,
        StemLanguage::Hungarian => Algorithm::Hungarian,
        StemLanguage::Italian => Algorithm::Italian,
        StemLanguage::Norwegian => Algorithm::Norwegian,
        StemLanguage::Portuguese => Algorithm::Portuguese,
        StemLanguage::Romanian => Algorithm::Romanian,
        StemLanguage::Russian => Algorithm::Russian,
        StemLanguage::Spanish => Algorithm::Spanish,
        StemLanguage::Swedish => Algorithm::Swedish,
        StemLanguage::Tamil => Algorithm::Tamil,
        StemLanguage::Turkish => Algorithm::Turkish,
    };
    Stemmer::create(algorithm)
}

fn ascii_fold(term: &str) -> String {
    if term.is_ascii() {
        return term.to_string();
    }
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        match fold_char(c) {
            Some(folded) => out.push_str(folded),
            None => out.push(c),
        }
    }
    out
}

fn fold_char(c: char) -> Option<&'static str> {
    let folded = match c {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'Æ' => "AE",
        'æ' => "ae",
        'Ç' | 'Ć' | 'Ĉ' | 'Ċ' | 'Č' => "C",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'Ð' | 'Ď' | 'Đ' => "D",
        'ð' | 'ď' | 'đ' => "d",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ĕ' | 'Ė' | 'Ę' | 'Ě' => "E",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'Ĝ' | 'Ğ' | 'Ġ' | 'Ģ' => "G",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'Ĥ' | 'Ħ' => "H",
        'ĥ' | 'ħ' => "h",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ĩ' | 'Ī' | 'Ĭ' | 'Į' | 'İ' => "I",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'Ĵ' => "J",
        'ĵ' => "j",
        'Ķ' => "K",
        'ķ' => "k",
        'Ĺ' | 'Ļ' | 'Ľ' | 'Ŀ' | 'Ł' => "L",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'Ñ' | 'Ń' | 'Ņ' | 'Ň' => "N",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ø' | 'Ō' | 'Ŏ' | 'Ő' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'Œ' => "OE",
        'œ' => "oe",
        'Ŕ' | 'Ŗ' | 'Ř' => "R",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'Ś' | 'Ŝ' | 'Ş' | 'Š' => "S",
        'ś' | 'ŝ' | 'ş' | 'š' => "s",
        'ß' => "ss",
        'Ţ' | 'Ť' | 'Ŧ' => "T",
        'ţ' | 'ť' | 'ŧ' => "t",
        'Þ' => "TH",
        'þ' => "th",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ũ' | 'Ū' | 'Ŭ' | 'Ů' | 'Ű' | 'Ų' => "U",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'Ŵ' => "W",
        'ŵ' => "w",
        'Ý' | 'Ÿ' | 'Ŷ' => "Y",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

/// Lucene/Elasticsearch-compatible English stopwords.
/// Only true function words: articles, prepositions, conjunctions,
/// pronouns, auxiliaries.
static ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

lazy_static::lazy_static! {
    /// Loaded once; the bundled dictionary takes a while to build.
    static ref JIEBA: Jieba = Jieba::new();
    static ref ENGLISH_STOPWORD_SET: BTreeSet<String> =
        ENGLISH_STOPWORDS.iter().map(|w| w.to_string()).collect();
}

/// The builtin list behind `"_english_"`.
pub fn english_stop_words() -> BTreeSet<String> {
    ENGLISH_STOPWORD_SET.clone()
}
