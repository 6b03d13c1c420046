//! Feature extraction pipeline.
//!
//! Every signal is one [`Feature`]; its position in [`Feature::ALL`] is its
//! column in the vector consumed by the scaler and the models. Extractors return
//! `Result<f64, ExtractFailure>` and the sentinel for a failure is decided in
//! exactly one place, [`Feature::sentinel`].

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;

use crate::url_parts::UrlParts;

pub mod assembler;
pub mod lexical;
pub mod network;
pub mod page;
pub mod whois;

pub use assembler::{FeatureAssembler, Probes};

/// Where an extractor gets its input from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// URL string only; pure and deterministic.
    Lexical,
    /// One external lookup (DNS, WHOIS, search engine, traffic ranking).
    Network,
    /// The fetched target page.
    Page,
}

macro_rules! feature_schema {
    ($($variant:ident => $name:literal, $source:ident;)+) => {
        /// Every feature, declared in schema order.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Feature {
            $($variant,)+
        }

        impl Feature {
            pub const ALL: &'static [Feature] = &[$(Feature::$variant,)+];

            pub fn name(self) -> &'static str {
                match self {
                    $(Feature::$variant => $name,)+
                }
            }

            pub fn source(self) -> Source {
                match self {
                    $(Feature::$variant => Source::$source,)+
                }
            }
        }

        /// Column names in schema order.
        pub const FEATURE_NAMES: &[&str] = &[$($name,)+];
    };
}

feature_schema! {
    GoogleIndex => "google_index", Network;
    NbHyperlinks => "nb_hyperlinks", Page;
    WebTraffic => "web_traffic", Network;
    NbWww => "nb_www", Lexical;
    RatioExtHyperlinks => "ratio_extHyperlinks", Page;
    DomainAge => "domain_age", Network;
    PhishHints => "phish_hints", Lexical;
    SafeAnchor => "safe_anchor", Lexical;
    RatioDigitsUrl => "ratio_digits_url", Lexical;
    LengthUrl => "length_url", Lexical;
    AvgWordPath => "avg_word_path", Lexical;
    LengthHostname => "length_hostname", Lexical;
    RatioExtRedirection => "ratio_extRedirection", Page;
    LongestWordsRaw => "longest_words_raw", Lexical;
    LengthWordsRaw => "length_words_raw", Lexical;
    NbDots => "nb_dots", Lexical;
    LinksInTags => "links_in_tags", Page;
    DomainRegistrationLength => "domain_registration_length", Network;
    NbSlash => "nb_slash", Lexical;
    DomainInTitle => "domain_in_title", Page;
    AvgWordsRaw => "avg_words_raw", Page;
    ShortestWordPath => "shortest_word_path", Lexical;
    Ip => "ip", Network;
    NbHyphens => "nb_hyphens", Lexical;
    AvgWordHost => "avg_word_host", Lexical;
    RatioDigitsHost => "ratio_digits_host", Lexical;
    RatioIntMedia => "ratio_intMedia", Page;
    NbQm => "nb_qm", Lexical;
    DomainWithCopyright => "domain_with_copyright", Page;
    RatioExtMedia => "ratio_extMedia", Page;
    NbExtCss => "nb_extCSS", Page;
    NbSubdomains => "nb_subdomains", Lexical;
    DomainInBrand => "domain_in_brand", Page;
    NbAnd => "nb_and", Lexical;
    NbSpecialCharacters => "nb_special_characters", Lexical;
    HttpsInUrl => "https_in_url", Lexical;
    HttpsInDomain => "https_in_domain", Lexical;
    HasPrefixSuffix => "has_prefix_suffix", Lexical;
    DepthOfUrl => "depth_of_url", Lexical;
    CountParameters => "count_parameters", Lexical;
    UncommonTld => "uncommon_tld", Lexical;
    IsNumericDomain => "is_numeric_domain", Lexical;
    DomainMisspelling => "domain_misspelling", Lexical;
    QtyDoubleSlashPath => "qty_double_slash_path", Lexical;
    NonStandardPort => "non_standard_port", Lexical;
    AbnormalUrl => "abnormal_url", Lexical;
    UrlShortened => "url_shortened", Lexical;
    TldCountInUrl => "tld_count_in_url", Lexical;
    TldCountInDomain => "tld_count_in_domain", Lexical;
    TildeCount => "tilde_count", Lexical;
    AsteriskCount => "asterisk_count", Lexical;
    DollarCount => "dollar_count", Lexical;
    FileLength => "file_length", Lexical;
    RepeatedLetters => "repeated_letters", Lexical;
    RepeatedVowels => "repeated_vowels", Lexical;
    VowelRepetitionRatio => "vowel_repetition_ratio", Lexical;
}

pub const FEATURE_COUNT: usize = FEATURE_NAMES.len();

/// Uniform failure value used by the all-or-nothing fallback.
pub const FALLBACK_SENTINEL: f64 = -1.0;

impl Feature {
    /// Value recorded when this feature's extractor fails.
    ///
    /// `web_traffic` treats a failed scrape as "no traffic signal". The two
    /// WHOIS features diverge on purpose: the models were fit against 365 for a
    /// failed age lookup and 0 for a failed registration-length lookup.
    pub fn sentinel(self) -> f64 {
        match self {
            Feature::WebTraffic => 0.0,
            Feature::DomainAge => 365.0,
            Feature::DomainRegistrationLength => 0.0,
            _ => FALLBACK_SENTINEL,
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_name(name: &str) -> Option<Feature> {
        Feature::ALL.iter().copied().find(|f| f.name() == name)
    }
}

/// Why a single extractor could not produce a value.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExtractFailure {
    #[error("timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected HTTP status {0}")]
    HttpStatus(u16),
    #[error("could not resolve {0}")]
    Unresolved(String),
    #[error("malformed input: {0}")]
    Malformed(&'static str),
    #[error("no explicit port")]
    NoPort,
    #[error("whois lookup failed: {0}")]
    Whois(String),
    #[error("overall extraction deadline reached")]
    Deadline,
}

pub type Extracted = Result<f64, ExtractFailure>;

/// The URL under analysis together with its parsed parts.
#[derive(Debug, Clone)]
pub struct Target {
    pub url: String,
    pub parts: UrlParts,
}

impl Target {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let parts = UrlParts::parse(&url);
        Self { url, parts }
    }
}

/// One assembled, fixed-order feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn from_values(values: [f64; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    /// The uniform all-sentinel vector.
    pub fn fallback() -> Self {
        Self {
            values: [FALLBACK_SENTINEL; FEATURE_COUNT],
        }
    }

    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    pub fn by_name(&self, name: &str) -> Option<f64> {
        Feature::from_name(name).map(|f| self.get(f))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn is_fallback(&self) -> bool {
        self.values.iter().all(|v| *v == FALLBACK_SENTINEL)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.values.iter().copied())
    }
}

impl Serialize for FeatureVector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COUNT))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, &value)?;
        }
        map.end()
    }
}
