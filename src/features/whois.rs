//! Minimal port-43 WHOIS client.
//!
//! Only the creation and expiration dates are extracted; everything else in a
//! record is ignored.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::lexical::TWO_PART_SUFFIXES;
use super::ExtractFailure;

const WHOIS_PORT: u16 = 43;
const IANA_SERVER: &str = "whois.iana.org";
const MAX_RESPONSE_BYTES: u64 = 256 * 1024;

const CREATION_KEYS: &[&str] = &[
    "creation date",
    "created",
    "created on",
    "registration time",
    "registered on",
    "registered",
    "domain registration date",
    "domain name commencement date",
];

const EXPIRATION_KEYS: &[&str] = &[
    "registry expiry date",
    "registrar registration expiration date",
    "expiration date",
    "expiry date",
    "expires",
    "expires on",
    "expiration time",
    "paid-till",
    "renewal date",
];

const REFERRAL_KEYS: &[&str] = &["refer", "whois", "registrar whois server"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%SZ",
    "%Y-%m-%dT%H:%M:%S%.fZ",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y.%m.%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d-%b-%Y", "%Y.%m.%d", "%Y/%m/%d", "%d.%m.%Y"];

/// The two dates the WHOIS features need.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhoisRecord {
    pub creation: Option<NaiveDateTime>,
    pub expiration: Option<NaiveDateTime>,
}

impl WhoisRecord {
    pub fn parse(text: &str) -> Self {
        let fields = fields(text);
        Self {
            creation: first_date(&fields, CREATION_KEYS),
            expiration: first_date(&fields, EXPIRATION_KEYS),
        }
    }

    /// Days from creation to expiration, when both dates are known.
    pub fn registration_days(&self) -> Option<i64> {
        match (self.creation, self.expiration) {
            (Some(created), Some(expires)) => Some((expires - created).num_days()),
            _ => None,
        }
    }

    /// Field-wise merge preferring `self`.
    fn or(self, fallback: WhoisRecord) -> WhoisRecord {
        WhoisRecord {
            creation: self.creation.or(fallback.creation),
            expiration: self.expiration.or(fallback.expiration),
        }
    }
}

#[async_trait]
pub trait WhoisSource: Send + Sync {
    async fn lookup(&self, host: &str) -> Result<WhoisRecord, ExtractFailure>;
}

/// Plain TCP WHOIS. The first server comes from a TLD table (IANA otherwise);
/// one referral is followed.
pub struct TcpWhois {
    timeout: Duration,
    bootstrap: Option<String>,
}

impl TcpWhois {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            bootstrap: None,
        }
    }

    /// Sends every first query to `server` instead of the TLD table.
    pub fn with_bootstrap(mut self, server: impl Into<String>) -> Self {
        self.bootstrap = Some(server.into());
        self
    }

    fn server_for(&self, domain: &str) -> String {
        if let Some(server) = &self.bootstrap {
            return server.clone();
        }
        let tld = domain.rsplit('.').next().unwrap_or_default();
        tld_server(tld).unwrap_or(IANA_SERVER).to_string()
    }

    async fn query(&self, server: &str, domain: &str) -> Result<String, ExtractFailure> {
        let addr = if server.contains(':') {
            server.to_string()
        } else {
            format!("{server}:{WHOIS_PORT}")
        };
        debug!(%addr, %domain, "whois query");

        let mut stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| ExtractFailure::Whois(format!("connect {addr}: {e}")))?;
        stream
            .write_all(format!("{domain}\r\n").as_bytes())
            .await
            .map_err(|e| ExtractFailure::Whois(e.to_string()))?;

        let mut response = Vec::new();
        stream
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut response)
            .await
            .map_err(|e| ExtractFailure::Whois(e.to_string()))?;
        Ok(String::from_utf8_lossy(&response).into_owned())
    }

    async fn lookup_inner(&self, host: &str) -> Result<WhoisRecord, ExtractFailure> {
        let ascii = idna::domain_to_ascii(host)
            .map_err(|_| ExtractFailure::Malformed("host is not a valid domain name"))?;
        let domain = registrable_domain(&ascii);
        if domain.is_empty() {
            return Err(ExtractFailure::Malformed("empty host"));
        }

        let server = self.server_for(&domain);
        let first = self.query(&server, &domain).await?;
        let record = WhoisRecord::parse(&first);

        match referral(&first).filter(|next| !next.eq_ignore_ascii_case(&server)) {
            Some(next) => match self.query(&next, &domain).await {
                Ok(text) => Ok(WhoisRecord::parse(&text).or(record)),
                Err(e) => {
                    debug!(%next, error = %e, "whois referral failed");
                    Ok(record)
                }
            },
            None => Ok(record),
        }
    }
}

#[async_trait]
impl WhoisSource for TcpWhois {
    async fn lookup(&self, host: &str) -> Result<WhoisRecord, ExtractFailure> {
        timeout(self.timeout, self.lookup_inner(host))
            .await
            .map_err(|_| ExtractFailure::Timeout)?
    }
}

fn tld_server(tld: &str) -> Option<&'static str> {
    let server = match tld {
        "com" | "net" => "whois.verisign-grs.com",
        "org" => "whois.pir.org",
        "info" => "whois.afilias.net",
        "biz" => "whois.nic.biz",
        "us" => "whois.nic.us",
        "co" => "whois.nic.co",
        "io" => "whois.nic.io",
        "me" => "whois.nic.me",
        "uk" => "whois.nic.uk",
        "ca" => "whois.cira.ca",
        "de" => "whois.denic.de",
        "fr" => "whois.nic.fr",
        "ru" => "whois.tcinet.ru",
        "cn" => "whois.cnnic.cn",
        "jp" => "whois.jprs.jp",
        "au" => "whois.auda.org.au",
        "br" => "whois.registro.br",
        "in" => "whois.registry.in",
        "app" | "dev" => "whois.nic.google",
        "xyz" => "whois.nic.xyz",
        "top" => "whois.nic.top",
        _ => return None,
    };
    Some(server)
}

/// Strips subdomains, keeping three labels under a two-part public suffix.
fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }
    let suffix = labels[labels.len() - 2..].join(".");
    let keep = if TWO_PART_SUFFIXES.contains(&suffix.as_str()) {
        3
    } else {
        2
    };
    labels[labels.len().saturating_sub(keep)..].join(".")
}

fn fields(text: &str) -> Vec<(String, &str)> {
    text.lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_ascii_lowercase(), value.trim()))
        .filter(|(_, value)| !value.is_empty())
        .collect()
}

fn first_date(fields: &[(String, &str)], keys: &[&str]) -> Option<NaiveDateTime> {
    keys.iter().find_map(|key| {
        fields
            .iter()
            .filter(|(k, _)| k == key)
            .find_map(|(_, value)| parse_date(value))
    })
}

/// Next server named by a `refer:`, `whois:` or `Registrar WHOIS Server:` line.
fn referral(text: &str) -> Option<String> {
    let fields = fields(text);
    REFERRAL_KEYS.iter().find_map(|key| {
        fields.iter().find(|(k, _)| k == key).map(|(_, value)| {
            value
                .trim_start_matches("whois://")
                .trim_start_matches("https://")
                .trim_start_matches("http://")
                .trim_end_matches('/')
                .to_string()
        })
    })
    .filter(|server| !server.is_empty())
}

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    let mut tokens = value.split_whitespace();
    let first = tokens.next()?;
    let first_two = tokens.next().map(|second| format!("{first} {second}"));

    let candidates = [Some(value.to_string()), first_two, Some(first.to_string())];
    candidates.iter().flatten().find_map(|candidate| {
        if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
            return Some(dt.naive_utc());
        }
        DATETIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(candidate, fmt).ok())
            .or_else(|| {
                DATE_FORMATS
                    .iter()
                    .find_map(|fmt| NaiveDate::parse_from_str(candidate, fmt).ok())
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            })
    })
}
