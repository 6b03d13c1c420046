//! Lexical features: pure functions of the URL string.
//!
//! Host-level rules read [`UrlParts::domain`](crate::url_parts::UrlParts::domain),
//! i.e. the network location with the port removed.

use std::sync::OnceLock;

use regex::Regex;

use super::{ExtractFailure, Extracted, Feature, Target};

const PHISH_HINTS: &[&str] = &[
    "login",
    "secure",
    "verify",
    "account",
    "update",
    "confirm",
    "alert",
    "suspend",
    "password",
    "credentials",
    "bank",
    "free",
    "offers",
    "click",
    "urgent",
    "porn",
    "x",
    "torrent",
];

const UNSAFE_DOMAINS: &[&str] = &[
    "example.com",
    "test.com",
    "phishingsite.com",
    "malicious.com",
    "suspicious.com",
    "fakebank.com",
    "secure-login.com",
    "login-page.com",
    "verify-account.com",
    "bank-update.com",
    "update-your-account.com",
    "account-login.com",
    "login-confirm.com",
    "payment-verification.com",
    "confirm-your-account.com",
    "secure-accounts.com",
    "account-recovery.com",
    "get-your-password.com",
    "login-secure.com",
    "account-access.com",
    "phishingsite.net",
    "malicious.net",
    "suspicious.net",
    "unknown-website.com",
    "untrusted-site.com",
    "fraudulent-activity.com",
    "scam-website.com",
    "dangerous-link.com",
    "fraud.com",
    "impersonate.com",
    "malware-distribution.com",
    "phishing-attack.com",
    "hacked-login.com",
    "spoofed-site.com",
    "secure-your-identity.com",
    "identity-theft.com",
    "login-verification.com",
    "verify-your-identity.com",
];

const SAFE_ANCHOR_TLDS: &[&str] = &["com", "org", "net", "gov", "edu", "info"];

const MAX_URL_LENGTH: usize = 2048;

const URL_NOISE_WORDS: &[&str] = &[
    "http",
    "https",
    "ftp",
    "www",
    "com",
    "co",
    "uk",
    "org",
    "net",
    "gov",
    "edu",
    "info",
    "localhost",
];

pub(crate) const TWO_PART_SUFFIXES: &[&str] = &[
    "co.uk", "com.au", "net.au", "org.au", "gov.uk", "ac.uk", "gov.au", "com.sg", "co.jp",
    "co.in", "co.kr", "com.cn",
];

const SPECIAL_CHARACTERS: &str = "@!$%^&*(),?\":{}|<>";

const COMMON_TLDS: &[&str] = &[
    "com", "org", "net", "gov", "edu", "mil", "info", "co", "us", "io", "biz", "me", "dev",
    "store", "health", "name", "pro", "jobs",
];

const BRANDS: &[&str] = &[
    "google",
    "facebook",
    "fb",
    "amazon",
    "instagram",
    "insta",
    "twitter",
    "youtube",
    "yt",
    "shopify",
    "paypal",
    "linkedin",
    "microsoft",
    "apple",
];

const SUSPICIOUS_AFFIXES: &[&str] = &[
    "my", "login", "secure", "service", "page", "account", "help", "buy", "shop", "friends",
    "support", "team",
];

const ABNORMAL_URL_LENGTH: usize = 75;

const HIGH_RISK_TLDS: &[&str] = &[
    ".xyz", ".top", ".club", ".online", ".site", ".win", ".work", ".info", ".biz", ".pw", ".icu",
    ".ga", ".cf", ".ml", ".party", ".loan", ".trade", ".gq", ".space", ".mobi", ".buzz", ".link",
    ".bizz",
];

const SHORTENERS: &[&str] = &[
    "bit.ly",
    "goo.gl",
    "tinyurl.com",
    "ow.ly",
    "t.co",
    "buff.ly",
    "adf.ly",
    "bit.do",
    "cutt.ly",
    "is.gd",
    "soo.gd",
    "s2r.co",
    "shorte.st",
    "lnkd.in",
    "t.ly",
    "bl.ink",
    "mcaf.ee",
    "x.co",
    "tiny.cc",
    "rebrand.ly",
    "trib.al",
    "clck.ru",
    "m.me",
    "po.st",
    "smarturl.it",
    "qr.ae",
    "v.gd",
    "0rz.tw",
    "ln.is",
];

const VALID_TLDS: &[&str] = &[
    "com", "org", "net", "edu", "gov", "co", "io", "uk", "au", "in", "store", "info", "biz", "me",
    "tv", "name", "xyz", "online", "app", "shop", "website", "mobi", "pro", "cc", "asia",
    "global", "travel", "site", "tech", "health", "money", "media", "law", "design", "photo",
    "fun", "tips", "life", "work", "family", "today", "place", "space", "win", "group", "club",
];

const VOWELS: &str = "aeiouAEIOU";

static WORD_RE: OnceLock<Option<Regex>> = OnceLock::new();
static BRAND_RE: OnceLock<Option<Regex>> = OnceLock::new();
static FORBIDDEN_RE: OnceLock<Option<Regex>> = OnceLock::new();
static LEADING_IP_RE: OnceLock<Option<Regex>> = OnceLock::new();
static LEADING_LOCAL_RE: OnceLock<Option<Regex>> = OnceLock::new();
static EMBEDDED_DOMAIN_RE: OnceLock<Option<Regex>> = OnceLock::new();
static DOMAIN_TLD_RE: OnceLock<Option<Regex>> = OnceLock::new();
static DOMAIN_LABEL_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn pattern(
    cell: &'static OnceLock<Option<Regex>>,
    source: &str,
) -> Result<&'static Regex, ExtractFailure> {
    cell.get_or_init(|| Regex::new(source).ok())
        .as_ref()
        .ok_or(ExtractFailure::Malformed("invalid built-in pattern"))
}

fn word_re() -> Result<&'static Regex, ExtractFailure> {
    pattern(&WORD_RE, r"\w+")
}

/// Dispatches one lexical feature. Non-lexical features are rejected.
pub fn extract(feature: Feature, target: &Target) -> Extracted {
    let value = match feature {
        Feature::NbWww => nb_www(target),
        Feature::PhishHints => phish_hints(target),
        Feature::SafeAnchor => safe_anchor(target),
        Feature::RatioDigitsUrl => ratio_digits_url(target),
        Feature::LengthUrl => length_url(target),
        Feature::AvgWordPath => avg_word_path(target),
        Feature::LengthHostname => length_hostname(target),
        Feature::LongestWordsRaw => return longest_words_raw(target),
        Feature::LengthWordsRaw => return length_words_raw(target),
        Feature::NbDots => count_in_domain(target, '.'),
        Feature::NbSlash => nb_slash(target),
        Feature::ShortestWordPath => shortest_word_path(target),
        Feature::NbHyphens => count_in_domain(target, '-'),
        Feature::AvgWordHost => avg_word_host(target),
        Feature::RatioDigitsHost => ratio_digits_host(target),
        Feature::NbQm => count_in_url(target, '?'),
        Feature::NbAnd => count_in_url(target, '&'),
        Feature::TildeCount => count_in_url(target, '~'),
        Feature::AsteriskCount => count_in_url(target, '*'),
        Feature::DollarCount => count_in_url(target, '$'),
        Feature::NbSubdomains => nb_subdomains(target),
        Feature::NbSpecialCharacters => nb_special_characters(target),
        Feature::HttpsInUrl => flag(target.parts.scheme == "https"),
        Feature::HttpsInDomain => flag(target.parts.domain().contains("https")),
        Feature::HasPrefixSuffix => flag(target.parts.domain().contains('-')),
        Feature::DepthOfUrl => depth_of_url(target),
        Feature::CountParameters => count_parameters(target),
        Feature::UncommonTld => return uncommon_tld(target),
        Feature::IsNumericDomain => return is_numeric_domain(target),
        Feature::DomainMisspelling => return domain_misspelling(target),
        Feature::QtyDoubleSlashPath => target.parts.path.matches("//").count() as f64,
        Feature::NonStandardPort => return non_standard_port(target),
        Feature::AbnormalUrl => return abnormal_url(target),
        Feature::UrlShortened => url_shortened(target),
        Feature::TldCountInUrl => return tld_count_in_url(target),
        Feature::TldCountInDomain => return tld_count_in_domain(target),
        Feature::FileLength => file_length(target),
        Feature::RepeatedLetters => return repeated_letters(target),
        Feature::RepeatedVowels => return repeated_vowels(target),
        Feature::VowelRepetitionRatio => return vowel_repetition_ratio(target),
        _ => return Err(ExtractFailure::Malformed("not a lexical feature")),
    };
    Ok(value)
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn digit_ratio(s: &str) -> f64 {
    let total = char_len(s);
    if total == 0 {
        return 0.0;
    }
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count();
    digits as f64 / total as f64
}

fn count_in_url(target: &Target, needle: char) -> f64 {
    target.url.matches(needle).count() as f64
}

fn count_in_domain(target: &Target, needle: char) -> f64 {
    target.parts.domain().matches(needle).count() as f64
}

pub fn nb_www(target: &Target) -> f64 {
    target.parts.domain().matches("www").count() as f64
}

pub fn phish_hints(target: &Target) -> f64 {
    let lowered = target.url.to_lowercase();
    PHISH_HINTS.iter().filter(|hint| lowered.contains(*hint)).count() as f64
}

pub fn safe_anchor(target: &Target) -> f64 {
    let domain = target.parts.domain();
    let https = target.url.to_ascii_lowercase().starts_with("https://");
    let listed = UNSAFE_DOMAINS.iter().any(|unsafe_domain| domain.contains(unsafe_domain));
    let common_tld = target
        .parts
        .tld()
        .map(|tld| SAFE_ANCHOR_TLDS.contains(&tld.as_str()))
        .unwrap_or(false);
    let short_enough = char_len(&target.url) <= MAX_URL_LENGTH;

    flag(https && !listed && common_tld && short_enough)
}

pub fn ratio_digits_url(target: &Target) -> f64 {
    digit_ratio(&target.url)
}

pub fn length_url(target: &Target) -> f64 {
    char_len(&target.url) as f64
}

pub fn avg_word_path(target: &Target) -> f64 {
    let segments = target.parts.path_segments();
    if segments.is_empty() {
        return 0.0;
    }
    let total: usize = segments.iter().map(|s| char_len(s)).sum();
    total as f64 / segments.len() as f64
}

pub fn length_hostname(target: &Target) -> f64 {
    char_len(&target.parts.hostname()) as f64
}

pub fn longest_words_raw(target: &Target) -> Extracted {
    let longest = word_re()?
        .find_iter(&target.url)
        .map(|m| char_len(m.as_str()))
        .max()
        .unwrap_or(0);
    Ok(longest as f64)
}

pub fn length_words_raw(target: &Target) -> Extracted {
    let total: usize = word_re()?
        .find_iter(&target.url)
        .map(|m| m.as_str())
        .filter(|word| !URL_NOISE_WORDS.contains(&word.to_lowercase().as_str()))
        .map(char_len)
        .sum();
    Ok(total as f64)
}

pub fn nb_slash(target: &Target) -> f64 {
    (target.parts.path.matches('/').count() + target.parts.query.matches('/').count()) as f64
}

pub fn shortest_word_path(target: &Target) -> f64 {
    target
        .parts
        .path_segments()
        .iter()
        .map(|s| char_len(s))
        .min()
        .unwrap_or(0) as f64
}

pub fn avg_word_host(target: &Target) -> f64 {
    let labels = target.parts.domain_labels();
    let total: usize = labels.iter().map(|l| char_len(l)).sum();
    total as f64 / labels.len().max(1) as f64
}

pub fn ratio_digits_host(target: &Target) -> f64 {
    digit_ratio(target.parts.domain())
}

pub fn nb_subdomains(target: &Target) -> f64 {
    let labels = target.parts.domain_labels();
    if labels.len() < 2 {
        return 0.0;
    }
    let suffix = if labels.len() > 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        labels[labels.len() - 1].to_string()
    };
    let registered = if TWO_PART_SUFFIXES.contains(&suffix.as_str()) {
        3
    } else {
        2
    };
    labels.len().saturating_sub(registered) as f64
}

pub fn nb_special_characters(target: &Target) -> f64 {
    target
        .url
        .chars()
        .filter(|c| SPECIAL_CHARACTERS.contains(*c))
        .count() as f64
}

/// `a.b` has an extension, `.profile` does not; a trailing dot counts.
fn has_extension(segment: &str) -> bool {
    segment.trim_start_matches('.').contains('.')
}

pub fn depth_of_url(target: &Target) -> f64 {
    let segments = target.parts.path_segments();
    match segments.last() {
        Some(last) if has_extension(last) => (segments.len() - 1) as f64,
        _ => segments.len() as f64,
    }
}

pub fn count_parameters(target: &Target) -> f64 {
    let query = &target.parts.query;
    if query.is_empty() {
        0.0
    } else {
        query.split('&').count() as f64
    }
}

pub fn uncommon_tld(target: &Target) -> Extracted {
    let tld = target
        .parts
        .tld()
        .ok_or(ExtractFailure::Malformed("domain has no TLD"))?;
    Ok(flag(!COMMON_TLDS.contains(&tld.as_str())))
}

pub fn is_numeric_domain(target: &Target) -> Extracted {
    let labels = target.parts.domain_labels();
    if labels.len() < 2 {
        return Err(ExtractFailure::Malformed("domain has no TLD"));
    }
    let main = labels[labels.len() - 2];
    Ok(flag(!main.is_empty() && main.chars().all(|c| c.is_ascii_digit())))
}

/// Flags a first label that wraps a known brand in phishing affixes, or that
/// names no known brand at all.
pub fn domain_misspelling(target: &Target) -> Extracted {
    let domain = target.parts.domain();
    if domain.is_empty() {
        return Err(ExtractFailure::Malformed("empty domain"));
    }
    let label = domain.split('.').next().unwrap_or_default();

    let brand_source = format!(r"(?i)\b(?:{})\b", BRANDS.join("|"));
    let brand_re = pattern(&BRAND_RE, &brand_source)?;
    if !brand_re.is_match(label) {
        return Ok(1.0);
    }

    let wraps_brand = BRANDS
        .iter()
        .any(|brand| label.contains(brand) && label != *brand);
    let has_affix = SUSPICIOUS_AFFIXES.iter().any(|affix| label.contains(affix));
    Ok(flag(wraps_brand && has_affix))
}

pub fn non_standard_port(target: &Target) -> Extracted {
    match target.parts.port() {
        None | Some(0) => Err(ExtractFailure::NoPort),
        Some(80) | Some(443) => Ok(0.0),
        Some(_) => Ok(1.0),
    }
}

pub fn abnormal_url(target: &Target) -> Extracted {
    let url = target.url.as_str();
    if char_len(url) > ABNORMAL_URL_LENGTH {
        return Ok(1.0);
    }
    if pattern(&FORBIDDEN_RE, r"[<>{}|\\^~\[\]`]")?.is_match(url) {
        return Ok(1.0);
    }
    if pattern(&LEADING_IP_RE, r"^(?:http://|https://)?(?:\d{1,3}\.){3}\d{1,3}")?.is_match(url) {
        return Ok(1.0);
    }
    if pattern(
        &LEADING_LOCAL_RE,
        r"^(?:http://|https://)?(?:localhost|127\.0\.0\.1|::1|(\w+\.)?localhost)",
    )?
    .is_match(url)
    {
        return Ok(1.0);
    }

    let domain = target.parts.domain();
    if HIGH_RISK_TLDS.iter().any(|tld| domain.ends_with(tld)) {
        return Ok(1.0);
    }
    Ok(flag(domain.split('.').count() > 3))
}

pub fn url_shortened(target: &Target) -> f64 {
    let domain = target.parts.domain().to_ascii_lowercase();
    flag(SHORTENERS.contains(&domain.as_str()))
}

pub fn tld_count_in_url(target: &Target) -> Extracted {
    let re = pattern(&EMBEDDED_DOMAIN_RE, r"\b(?:[a-zA-Z0-9-]+\.)+([a-zA-Z]{2,})\b")?;
    let count = re
        .captures_iter(&target.url)
        .filter_map(|caps| caps.get(1))
        .filter(|tld| VALID_TLDS.contains(&tld.as_str()))
        .count();
    Ok(count as f64)
}

pub fn tld_count_in_domain(target: &Target) -> Extracted {
    let re = pattern(&DOMAIN_TLD_RE, r"\.([a-z]{2,})$")?;
    Ok(flag(re.is_match(target.parts.domain())))
}

pub fn file_length(target: &Target) -> f64 {
    let path = &target.parts.path;
    if path.ends_with('/') {
        return 0.0;
    }
    path.rsplit('/').next().map(char_len).unwrap_or(0) as f64
}

/// The host label repeated-character features look at: what follows `://`
/// (minus a leading `www.`) up to the first character outside `[A-Za-z0-9.-]`.
fn repetition_label(url: &str) -> Result<&str, ExtractFailure> {
    let re = pattern(&DOMAIN_LABEL_RE, r"://(www\.)?([a-zA-Z0-9.-]+)")?;
    Ok(re
        .captures(url)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str())
        .unwrap_or(""))
}

/// Maximal runs of one repeated character, optionally restricted to `alphabet`.
fn repeated_runs(label: &str, alphabet: Option<&str>) -> usize {
    let mut runs = 0;
    let mut chars = label.chars().peekable();
    while let Some(c) = chars.next() {
        let mut len = 1;
        while chars.peek() == Some(&c) {
            chars.next();
            len += 1;
        }
        let eligible = alphabet.map(|a| a.contains(c)).unwrap_or(true);
        if len >= 2 && eligible {
            runs += 1;
        }
    }
    runs
}

pub fn repeated_letters(target: &Target) -> Extracted {
    let label = repetition_label(&target.url)?;
    Ok(repeated_runs(label, None) as f64)
}

pub fn repeated_vowels(target: &Target) -> Extracted {
    let label = repetition_label(&target.url)?;
    Ok(repeated_runs(label, Some(VOWELS)) as f64)
}

pub fn vowel_repetition_ratio(target: &Target) -> Extracted {
    let label = repetition_label(&target.url)?;
    if label.is_empty() {
        return Ok(0.0);
    }
    let ratio = repeated_runs(label, Some(VOWELS)) as f64 / label.len() as f64;
    Ok((ratio * 1000.0).round() / 1000.0)
}
