//! SSRF-guarded URL ingestion
//!
//! Remote paper sources are fetched with a strict guard rail: http(s) only,
//! every hostname resolved and checked against private ranges, redirects
//! re-validated hop by hop, the body capped while streaming, and the whole
//! fetch bounded by a timeout. Content-Type dispatch decides which parser
//! handles the bytes.

use crate::errors::FetchError;
use crate::traits::{DocumentKind, DocumentParser, ParsedDocument};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::redirect::Policy;
use reqwest::Client;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tracing::{debug, warn};
use url::{Host, Url};

/// Bounds applied to every URL fetch
#[derive(Debug, Clone)]
pub struct FetchLimits {
    pub max_redirects: u32,
    pub max_bytes: u64,
    pub timeout: Duration,
}

impl Default for FetchLimits {
    fn default() -> Self {
        Self {
            max_redirects: 3,
            max_bytes: 10 * 1024 * 1024,
            timeout: Duration::from_secs(15),
        }
    }
}

/// A fetched document before parsing
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub kind: DocumentKind,
    pub bytes: Vec<u8>,
    pub final_url: String,
    pub content_type: Option<String>,
}

/// True when the address belongs to a range that must never be fetched:
/// RFC1918, loopback, link-local, ULA, CGNAT, v4-mapped private, unspecified.
pub fn is_private_addr(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_private_v4(&mapped);
            }
            v6.is_loopback()
                || v6.is_unspecified()
                // fe80::/10 link-local
                || (v6.segments()[0] & 0xffc0) == 0xfe80
                // fc00::/7 unique local
                || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (octets[0] == 100 && (octets[1] & 0xc0) == 64)
}

/// Reject hostnames that are local by name, before any DNS resolution
fn is_blocked_hostname(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    host == "localhost" || host.ends_with(".localhost") || host.ends_with(".local")
}

/// Parse and statically validate a URL: scheme and hostname checks only.
pub fn validate_url(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(FetchError::UnsupportedScheme(other.to_string())),
    }
    match url.host() {
        None => return Err(FetchError::InvalidUrl("missing host".to_string())),
        Some(Host::Domain(domain)) => {
            if is_blocked_hostname(domain) {
                return Err(FetchError::PrivateAddress(domain.to_string()));
            }
        }
        Some(Host::Ipv4(ip)) => {
            if is_private_addr(&IpAddr::V4(ip)) {
                return Err(FetchError::PrivateAddress(ip.to_string()));
            }
        }
        Some(Host::Ipv6(ip)) => {
            if is_private_addr(&IpAddr::V6(ip)) {
                return Err(FetchError::PrivateAddress(ip.to_string()));
            }
        }
    }
    Ok(url)
}

/// Resolve the URL's host and reject if any resolved address is private.
pub async fn ensure_public(url: &Url) -> Result<(), FetchError> {
    let host = match url.host() {
        Some(Host::Domain(domain)) => domain.to_string(),
        // Literal addresses were already checked in validate_url
        Some(_) => return Ok(()),
        None => return Err(FetchError::InvalidUrl("missing host".to_string())),
    };
    let port = url.port_or_known_default().unwrap_or(443);
    let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .map_err(|_| FetchError::ResolutionFailed(host.clone()))?
        .collect();
    if addrs.is_empty() {
        return Err(FetchError::ResolutionFailed(host));
    }
    for addr in addrs {
        if is_private_addr(&addr.ip()) {
            return Err(FetchError::PrivateAddress(format!("{} -> {}", host, addr.ip())));
        }
    }
    Ok(())
}

/// Rewrite arXiv abstract URLs to their PDF form before fetching
pub fn rewrite_arxiv_url(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(Host::Domain(domain)) = parsed.host() {
            if (domain == "arxiv.org" || domain == "www.arxiv.org")
                && parsed.path().starts_with("/abs/")
            {
                return url.replacen("/abs/", "/pdf/", 1);
            }
        }
    }
    url.to_string()
}

/// Decide the document kind from the response Content-Type, falling back to
/// the URL path extension.
pub fn dispatch_kind(content_type: Option<&str>, url_path: &str) -> Result<DocumentKind, FetchError> {
    let normalized = content_type
        .map(|ct| ct.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();
    let path = url_path.to_ascii_lowercase();

    if normalized == "application/pdf" || path.ends_with(".pdf") {
        Ok(DocumentKind::Pdf)
    } else if normalized == "application/json" || path.ends_with(".json") {
        Ok(DocumentKind::Json)
    } else if normalized == "text/html"
        || normalized == "application/xhtml+xml"
        || path.ends_with(".html")
        || path.ends_with(".htm")
    {
        Ok(DocumentKind::Html)
    } else if normalized == "text/plain" || path.ends_with(".txt") {
        Ok(DocumentKind::PlainText)
    } else if normalized.is_empty() {
        // No declared type and no known extension: treat as plain text
        Ok(DocumentKind::PlainText)
    } else {
        Err(FetchError::UnsupportedContentType(normalized))
    }
}

/// Decide the document kind for an uploaded file from its extension
pub fn kind_for_extension(file_name: &str) -> Result<DocumentKind, FetchError> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        Ok(DocumentKind::Pdf)
    } else if lower.ends_with(".json") {
        Ok(DocumentKind::Json)
    } else if lower.ends_with(".html") || lower.ends_with(".htm") {
        Ok(DocumentKind::Html)
    } else if lower.ends_with(".txt") || lower.ends_with(".md") {
        Ok(DocumentKind::PlainText)
    } else {
        let ext = lower.rsplit('.').next().unwrap_or("").to_string();
        Err(FetchError::UnsupportedContentType(ext))
    }
}

/// SSRF-guarded fetcher for remote paper sources
pub struct UrlFetcher {
    client: Client,
    limits: FetchLimits,
}

impl UrlFetcher {
    /// Build a fetcher. Redirects are disabled on the client so each hop can
    /// be re-validated before it is followed.
    pub fn new(limits: FetchLimits) -> Result<Self, FetchError> {
        let client = Client::builder()
            .redirect(Policy::none())
            .timeout(limits.timeout)
            .build()
            .map_err(|e| FetchError::NetworkError(format!("client construction: {}", e)))?;
        Ok(Self { client, limits })
    }

    /// Fetch a remote document, following at most `max_redirects` hops and
    /// capping the body while streaming.
    pub async fn fetch(&self, raw_url: &str) -> Result<FetchedDocument, FetchError> {
        let rewritten = rewrite_arxiv_url(raw_url);
        let mut url = validate_url(&rewritten)?;
        ensure_public(&url).await?;

        let deadline = tokio::time::Instant::now() + self.limits.timeout;
        let mut hops = 0u32;
        loop {
            let response = tokio::time::timeout_at(
                deadline,
                self.client.get(url.clone()).send(),
            )
            .await
            .map_err(|_| FetchError::Timeout(self.limits.timeout.as_secs()))?
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(self.limits.timeout.as_secs())
                } else {
                    FetchError::NetworkError(e.to_string())
                }
            })?;

            if response.status().is_redirection() {
                hops += 1;
                if hops > self.limits.max_redirects {
                    return Err(FetchError::TooManyRedirects(self.limits.max_redirects));
                }
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        FetchError::NetworkError("redirect without Location header".to_string())
                    })?;
                let next = url
                    .join(location)
                    .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", location, e)))?;
                debug!("Following redirect {} -> {}", url, next);
                url = validate_url(next.as_str())?;
                ensure_public(&url).await?;
                continue;
            }

            if !response.status().is_success() {
                return Err(FetchError::NetworkError(format!(
                    "HTTP {} from {}",
                    response.status(),
                    url
                )));
            }

            let content_type = response
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|s| s.to_string());
            let kind = dispatch_kind(content_type.as_deref(), url.path())?;

            if let Some(declared) = response.content_length() {
                if declared > self.limits.max_bytes {
                    return Err(FetchError::BodyTooLarge(self.limits.max_bytes));
                }
            }

            let mut bytes: Vec<u8> = Vec::new();
            let mut stream = response.bytes_stream();
            while let Some(chunk) = tokio::time::timeout_at(deadline, stream.next())
                .await
                .map_err(|_| FetchError::Timeout(self.limits.timeout.as_secs()))?
            {
                let chunk = chunk.map_err(|e| FetchError::NetworkError(e.to_string()))?;
                if bytes.len() as u64 + chunk.len() as u64 > self.limits.max_bytes {
                    warn!("Body cap hit fetching {}", url);
                    return Err(FetchError::BodyTooLarge(self.limits.max_bytes));
                }
                bytes.extend_from_slice(&chunk);
            }

            return Ok(FetchedDocument {
                kind,
                bytes,
                final_url: url.to_string(),
                content_type,
            });
        }
    }
}

/// Strip tags from an HTML document, dropping script and style bodies
pub fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len() / 2);
    let mut chars = html.char_indices().peekable();
    let lower = html.to_ascii_lowercase();
    let mut skip_until: Option<&'static str> = None;
    while let Some((i, c)) = chars.next() {
        if let Some(closer) = skip_until {
            if lower[i..].starts_with(closer) {
                skip_until = None;
                for _ in 0..closer.len() - 1 {
                    chars.next();
                }
            }
            continue;
        }
        if c == '<' {
            if lower[i..].starts_with("<script") {
                skip_until = Some("</script>");
                continue;
            }
            if lower[i..].starts_with("<style") {
                skip_until = Some("</style>");
                continue;
            }
            // Consume through the closing '>'
            for (_, tc) in chars.by_ref() {
                if tc == '>' {
                    break;
                }
            }
            out.push(' ');
            continue;
        }
        out.push(c);
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parser for text-bearing document kinds.
///
/// PDF bytes need an external parser; this implementation rejects them so the
/// host can wire a real one behind the same trait.
pub struct BasicDocumentParser;

#[async_trait]
impl DocumentParser for BasicDocumentParser {
    async fn parse(
        &self,
        kind: DocumentKind,
        bytes: &[u8],
        source_url: Option<&str>,
    ) -> Result<ParsedDocument, FetchError> {
        let mut metadata = serde_json::Map::new();
        if let Some(url) = source_url {
            metadata.insert("source_url".to_string(), serde_json::Value::String(url.to_string()));
        }
        match kind {
            DocumentKind::PlainText => {
                let text = String::from_utf8_lossy(bytes).to_string();
                Ok(ParsedDocument {
                    paper_id: None,
                    title: None,
                    text,
                    metadata: serde_json::Value::Object(metadata),
                })
            }
            DocumentKind::Html => {
                let text = strip_html_tags(&String::from_utf8_lossy(bytes));
                Ok(ParsedDocument {
                    paper_id: None,
                    title: None,
                    text,
                    metadata: serde_json::Value::Object(metadata),
                })
            }
            DocumentKind::Json => {
                let value: serde_json::Value = serde_json::from_slice(bytes)
                    .map_err(|e| FetchError::ParseFailed(format!("json: {}", e)))?;
                let paper_id = value
                    .get("paper_id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let title = value
                    .get("title")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let text = value
                    .get("text")
                    .or_else(|| value.get("abstract"))
                    .or_else(|| value.get("content"))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
                    .ok_or_else(|| {
                        FetchError::ParseFailed("json document carries no text field".to_string())
                    })?;
                Ok(ParsedDocument {
                    paper_id,
                    title,
                    text,
                    metadata: serde_json::Value::Object(metadata),
                })
            }
            DocumentKind::Pdf => Err(FetchError::ParseFailed(
                "pdf parsing requires an external DocumentParser".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_v4_ranges() {
        let private = [
            "10.0.0.1",
            "172.16.4.2",
            "192.168.1.1",
            "127.0.0.1",
            "169.254.1.1",
            "100.64.0.5",
            "100.127.255.1",
            "0.0.0.0",
        ];
        for ip in private {
            let addr: IpAddr = ip.parse().unwrap();
            assert!(is_private_addr(&addr), "{} should be private", ip);
        }
        for ip in ["8.8.8.8", "1.1.1.1", "100.63.0.1", "172.32.0.1"] {
            let addr: IpAddr = ip.parse().unwrap();
            assert!(!is_private_addr(&addr), "{} should be public", ip);
        }
    }

    #[test]
    fn test_private_v6_ranges() {
        let private = ["::1", "fe80::1", "fc00::1", "fd12::1", "::ffff:192.168.0.1", "::"];
        for ip in private {
            let addr: IpAddr = ip.parse().unwrap();
            assert!(is_private_addr(&addr), "{} should be private", ip);
        }
        let public: IpAddr = "2606:4700::1111".parse().unwrap();
        assert!(!is_private_addr(&public));
    }

    #[test]
    fn test_validate_url_schemes() {
        assert!(validate_url("https://example.com/paper.pdf").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        assert!(matches!(
            validate_url("ftp://example.com/x"),
            Err(FetchError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            validate_url("file:///etc/passwd"),
            Err(FetchError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_validate_url_blocks_local_names_and_literals() {
        assert!(matches!(
            validate_url("http://localhost/x"),
            Err(FetchError::PrivateAddress(_))
        ));
        assert!(matches!(
            validate_url("http://printer.local/x"),
            Err(FetchError::PrivateAddress(_))
        ));
        assert!(matches!(
            validate_url("http://192.168.0.10/x"),
            Err(FetchError::PrivateAddress(_))
        ));
        assert!(matches!(
            validate_url("http://[::1]/x"),
            Err(FetchError::PrivateAddress(_))
        ));
    }

    #[test]
    fn test_arxiv_rewrite() {
        assert_eq!(
            rewrite_arxiv_url("https://arxiv.org/abs/2101.00001"),
            "https://arxiv.org/pdf/2101.00001"
        );
        assert_eq!(
            rewrite_arxiv_url("https://arxiv.org/pdf/2101.00001"),
            "https://arxiv.org/pdf/2101.00001"
        );
        assert_eq!(
            rewrite_arxiv_url("https://example.com/abs/123"),
            "https://example.com/abs/123"
        );
    }

    #[test]
    fn test_dispatch_kind() {
        assert_eq!(
            dispatch_kind(Some("application/pdf"), "/x").unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            dispatch_kind(Some("text/html; charset=utf-8"), "/x").unwrap(),
            DocumentKind::Html
        );
        assert_eq!(
            dispatch_kind(Some("application/json"), "/x").unwrap(),
            DocumentKind::Json
        );
        assert_eq!(
            dispatch_kind(None, "/papers/report.pdf").unwrap(),
            DocumentKind::Pdf
        );
        assert_eq!(
            dispatch_kind(Some("text/plain"), "/x").unwrap(),
            DocumentKind::PlainText
        );
        assert!(matches!(
            dispatch_kind(Some("image/png"), "/x"),
            Err(FetchError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn test_kind_for_extension() {
        assert_eq!(kind_for_extension("paper.PDF").unwrap(), DocumentKind::Pdf);
        assert_eq!(kind_for_extension("notes.txt").unwrap(), DocumentKind::PlainText);
        assert!(kind_for_extension("slides.pptx").is_err());
    }

    #[test]
    fn test_strip_html() {
        let html = "<html><head><style>body{color:red}</style></head>\
                    <body><h1>Title</h1><script>alert(1)</script><p>Hello  world</p></body></html>";
        assert_eq!(strip_html_tags(html), "Title Hello world");
    }

    #[tokio::test]
    async fn test_basic_parser_json() {
        let parser = BasicDocumentParser;
        let doc = parser
            .parse(
                DocumentKind::Json,
                br#"{"paper_id": "p1", "title": "T", "text": "body"}"#,
                Some("https://example.com/p.json"),
            )
            .await
            .unwrap();
        assert_eq!(doc.paper_id.as_deref(), Some("p1"));
        assert_eq!(doc.title.as_deref(), Some("T"));
        assert_eq!(doc.text, "body");
        assert_eq!(doc.metadata["source_url"], "https://example.com/p.json");
    }

    #[tokio::test]
    async fn test_basic_parser_rejects_pdf() {
        let parser = BasicDocumentParser;
        assert!(parser.parse(DocumentKind::Pdf, b"%PDF", None).await.is_err());
    }
}
