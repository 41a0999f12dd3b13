use crate::error::{FetchError, Result};
use crate::result::{Batch, Query, Record};
use crate::source::PageSource;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Titles of this many characters or more do not fit the link table and are dropped.
pub const MAX_TITLE_LENGTH: usize = 256;

const USER_AGENT: &str = "wikinet/0.1 (https://github.com/trapdoorsec/wikinet)";

static WIKILINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[([^\[\]|]+)(?:\|[^\[\]]*)?\]\]").expect("wikilink pattern is valid")
});

/// MediaWiki Action API client speaking `format=json&formatversion=2`.
pub struct WikiApiClient {
    client: Client,
    endpoint: Url,
    page_size: usize,
}

impl WikiApiClient {
    /// Client for `https://{lang}.wikipedia.org/w/api.php`.
    pub fn new(lang: &str) -> Result<Self> {
        Self::with_timeout(lang, 10)
    }

    pub fn with_timeout(lang: &str, timeout_secs: u64) -> Result<Self> {
        let endpoint = format!("https://{}.wikipedia.org/w/api.php", lang);
        Self::with_endpoint(&endpoint, timeout_secs)
    }

    /// Client against an arbitrary `api.php` endpoint.
    pub fn with_endpoint(endpoint: &str, timeout_secs: u64) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| FetchError::InvalidUrl(format!("{}: {}", endpoint, e)))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(timeout_secs))
            .connect_timeout(Duration::from_secs(timeout_secs.div_ceil(2)))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .gzip(true)
            .build()?;

        Ok(Self {
            client,
            endpoint,
            page_size: crate::paginate::DEFAULT_PAGE_SIZE,
        })
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Build the request URL for one page of `query`.
    pub fn request_url(&self, query: &Query, cursor: Option<&str>) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("action", "query")
                .append_pair("format", "json")
                .append_pair("formatversion", "2");

            match query {
                Query::CategoryMembers { category } => {
                    pairs
                        .append_pair("list", "categorymembers")
                        .append_pair("cmtitle", &category_title(category))
                        .append_pair("cmnamespace", "0")
                        .append_pair("cmlimit", &self.page_size.to_string());
                    if let Some(c) = cursor {
                        pairs.append_pair("cmcontinue", c);
                    }
                }
                Query::UserContributions { user } => {
                    pairs
                        .append_pair("list", "usercontribs")
                        .append_pair("ucuser", &normalize_user(user))
                        .append_pair("ucnamespace", "0")
                        .append_pair("ucprop", "title")
                        .append_pair("uclimit", &self.page_size.to_string());
                    if let Some(c) = cursor {
                        pairs.append_pair("uccontinue", c);
                    }
                }
                Query::PageLinks { title, as_of } => {
                    pairs
                        .append_pair("prop", "revisions")
                        .append_pair("titles", title)
                        .append_pair("rvprop", "timestamp|content")
                        .append_pair("rvslots", "main")
                        .append_pair("rvlimit", "1")
                        .append_pair("rvdir", "older")
                        .append_pair("rvstart", &as_of.to_rfc3339_opts(SecondsFormat::Secs, true));
                }
                Query::FirstRevision { title } => {
                    pairs
                        .append_pair("prop", "revisions")
                        .append_pair("titles", title)
                        .append_pair("rvprop", "timestamp")
                        .append_pair("rvlimit", "1")
                        .append_pair("rvdir", "newer");
                }
                Query::TalkRevisions { page, user } => {
                    pairs
                        .append_pair("prop", "revisions")
                        .append_pair("titles", page)
                        .append_pair("rvuser", &normalize_user(user))
                        .append_pair("rvprop", "timestamp|user")
                        .append_pair("rvlimit", &self.page_size.to_string());
                    if let Some(c) = cursor {
                        pairs.append_pair("rvcontinue", c);
                    }
                }
            }
        }
        url
    }
}

#[async_trait]
impl PageSource for WikiApiClient {
    async fn fetch_page(&self, query: &Query, cursor: Option<&str>) -> Result<Batch> {
        let url = self.request_url(query, cursor);
        debug!("Requesting {}", url);

        let response = self.client.get(url).send().await?.error_for_status()?;
        let body = response.text().await?;
        decode(query, &body)
    }
}

/// Decode a raw API body for `query` into records and the next cursor.
pub fn decode(query: &Query, body: &str) -> Result<Batch> {
    match query {
        Query::CategoryMembers { .. } => decode_category_members(body),
        Query::UserContributions { .. } => decode_user_contributions(body),
        Query::PageLinks { as_of, .. } => decode_page_links(body, *as_of),
        Query::FirstRevision { .. } => decode_first_revision(body),
        Query::TalkRevisions { .. } => decode_talk_revisions(body),
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse<Q> {
    #[serde(default, rename = "continue")]
    continuation: Option<Map<String, Value>>,
    query: Option<Q>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    #[serde(default)]
    info: String,
}

impl<Q> ApiResponse<Q> {
    fn parse(body: &str) -> Result<Self>
    where
        Q: for<'de> Deserialize<'de>,
    {
        let response: ApiResponse<Q> = serde_json::from_str(body)?;
        if let Some(error) = &response.error {
            return Err(FetchError::MalformedResponse(format!(
                "API error {}: {}",
                error.code, error.info
            )));
        }
        Ok(response)
    }

    fn cursor(&self, key: &str) -> Option<String> {
        self.continuation
            .as_ref()
            .and_then(|c| c.get(key))
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct CategoryMembersQuery {
    #[serde(default)]
    categorymembers: Vec<CategoryMemberItem>,
}

#[derive(Debug, Deserialize)]
struct CategoryMemberItem {
    pageid: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct UserContribsQuery {
    #[serde(default)]
    usercontribs: Vec<UserContribItem>,
}

#[derive(Debug, Deserialize)]
struct UserContribItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct PagesQuery {
    #[serde(default)]
    pages: Vec<PageItem>,
}

#[derive(Debug, Deserialize)]
struct PageItem {
    #[serde(default)]
    pageid: Option<i64>,
    title: String,
    #[serde(default)]
    missing: bool,
    #[serde(default)]
    revisions: Vec<RevisionItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionItem {
    timestamp: DateTime<Utc>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    slots: Option<Slots>,
}

#[derive(Debug, Deserialize)]
struct Slots {
    main: Option<SlotContent>,
}

#[derive(Debug, Deserialize)]
struct SlotContent {
    #[serde(default)]
    content: String,
}

pub fn decode_category_members(body: &str) -> Result<Batch> {
    let response = ApiResponse::<CategoryMembersQuery>::parse(body)?;
    let cursor = response.cursor("cmcontinue");
    let query = response
        .query
        .ok_or_else(|| FetchError::MalformedResponse("categorymembers: no query".into()))?;

    let records = query
        .categorymembers
        .into_iter()
        .map(|m| Record::CategoryMember {
            page_id: m.pageid,
            title: m.title,
        })
        .collect();
    Ok(Batch::new(records, cursor))
}

pub fn decode_user_contributions(body: &str) -> Result<Batch> {
    let response = ApiResponse::<UserContribsQuery>::parse(body)?;
    let cursor = response.cursor("uccontinue");
    let query = response
        .query
        .ok_or_else(|| FetchError::MalformedResponse("usercontribs: no query".into()))?;

    let records = query
        .usercontribs
        .into_iter()
        .map(|c| Record::Contribution { title: c.title })
        .collect();
    Ok(Batch::new(records, cursor))
}

pub fn decode_page_links(body: &str, as_of: DateTime<Utc>) -> Result<Batch> {
    let response = ApiResponse::<PagesQuery>::parse(body)?;
    let query = response
        .query
        .ok_or_else(|| FetchError::MalformedResponse("revisions: no query".into()))?;

    let mut records = Vec::new();
    for page in query.pages.into_iter().filter(|p| !p.missing) {
        let Some(page_id) = page.pageid else { continue };
        // No revision before `as_of` means the page did not exist yet.
        let Some(revision) = page.revisions.into_iter().next() else {
            continue;
        };
        let content = revision
            .slots
            .and_then(|s| s.main)
            .map(|m| m.content)
            .unwrap_or_default();

        records.push(Record::LinkSnapshot {
            page_id,
            title: page.title,
            as_of,
            links: extract_links(&content),
        });
    }
    Ok(Batch::last(records))
}

pub fn decode_first_revision(body: &str) -> Result<Batch> {
    let response = ApiResponse::<PagesQuery>::parse(body)?;
    let query = response
        .query
        .ok_or_else(|| FetchError::MalformedResponse("revisions: no query".into()))?;

    let records = query
        .pages
        .into_iter()
        .filter(|p| !p.missing)
        .filter_map(|p| {
            let page_id = p.pageid?;
            let revision = p.revisions.into_iter().next()?;
            Some(Record::FirstRevision {
                page_id,
                title: p.title,
                timestamp: revision.timestamp,
            })
        })
        .collect();
    Ok(Batch::last(records))
}

pub fn decode_talk_revisions(body: &str) -> Result<Batch> {
    let response = ApiResponse::<PagesQuery>::parse(body)?;
    let cursor = response.cursor("rvcontinue");
    // A talk page that was never created comes back without revisions.
    let Some(query) = response.query else {
        return Ok(Batch::last(Vec::new()));
    };

    let records = query
        .pages
        .into_iter()
        .flat_map(|p| p.revisions)
        .map(|r| Record::Revision {
            user: r.user.unwrap_or_default(),
            timestamp: r.timestamp,
        })
        .collect();
    Ok(Batch::new(records, cursor))
}

/// Pull article link targets out of wikitext, in order of first appearance.
///
/// Namespaced targets (`File:`, `Category:`, interwiki prefixes) and section anchors are
/// dropped; underscores are normalized to spaces.
pub fn extract_links(wikitext: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for capture in WIKILINK.captures_iter(wikitext) {
        let raw = capture[1].split('#').next().unwrap_or_default();
        let target = raw.trim().replace('_', " ");
        let target = target.strip_prefix(':').unwrap_or(target.as_str()).trim();
        if target.is_empty()
            || is_outside_article_space(target)
            || target.chars().count() >= MAX_TITLE_LENGTH
        {
            continue;
        }
        let target = capitalize_first(target);
        if seen.insert(target.clone()) {
            links.push(target);
        }
    }
    links
}

/// Namespaces and interwiki prefixes whose links do not point at articles.
const NON_ARTICLE_PREFIXES: &[&str] = &[
    "user", "wikipedia", "wp", "project", "file", "image", "media", "mediawiki", "template",
    "help", "category", "portal", "draft", "timedtext", "module", "special", "book",
    "gadget", "wiktionary", "wikt", "commons", "meta", "m", "wikisource", "s", "wikiquote",
    "q", "wikibooks", "b", "wikinews", "n", "wikiversity", "v", "wikivoyage", "voy",
    "wikispecies", "species", "wikidata", "d", "mw", "w", "c", "simple",
];

/// True when the text before the first `:` names a namespace, talk namespace or
/// interwiki target. "Star Trek: The Next Generation" stays an article.
fn is_outside_article_space(target: &str) -> bool {
    let Some((prefix, _)) = target.split_once(':') else {
        return false;
    };
    if is_language_code(prefix.trim()) {
        return true;
    }
    let prefix = prefix.trim().to_lowercase();
    let base = prefix.strip_suffix(" talk").unwrap_or(&prefix);
    base == "talk" || NON_ARTICLE_PREFIXES.contains(&base)
}

/// Lowercase language interwiki codes such as `de`, `fr` or `zh-yue`.
fn is_language_code(prefix: &str) -> bool {
    let mut parts = prefix.split('-');
    let Some(lang) = parts.next() else {
        return false;
    };
    (2..=3).contains(&lang.len())
        && lang.chars().all(|c| c.is_ascii_lowercase())
        && parts.all(|p| !p.is_empty() && p.len() <= 8 && p.chars().all(|c| c.is_ascii_lowercase()))
}

fn capitalize_first(title: &str) -> String {
    let mut chars = title.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn category_title(category: &str) -> String {
    if category.starts_with("Category:") {
        category.to_string()
    } else {
        format!("Category:{}", category)
    }
}

fn normalize_user(user: &str) -> String {
    user.trim().replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paginate::{FetchLoop, Termination};
    use chrono::TimeZone;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path, query_param},
    };

    fn client_for(server: &MockServer) -> WikiApiClient {
        WikiApiClient::with_endpoint(&format!("{}/w/api.php", server.uri()), 5).unwrap()
    }

    #[test]
    fn test_extract_links_filters_namespaces_and_anchors() {
        let text = "See [[Berlin]], [[berlin|the city]], [[File:Map.png|thumb]], \
                    [[Category:Capitals]], [[Brandenburg_Gate#History|gate]] and [[ ]].";
        let links = extract_links(text);
        assert_eq!(links, vec!["Berlin".to_string(), "Brandenburg Gate".to_string()]);
    }

    #[test]
    fn test_extract_links_keeps_colon_titles() {
        let text = "[[Star Trek: The Next Generation]] and [[Mission: Impossible|film]], \
                    not [[de:Berlin]], [[User talk:Example]], [[wikt:colon]] or \
                    [[:Category:Films]], but [[:Berlin]].";
        let links = extract_links(text);
        assert_eq!(
            links,
            vec![
                "Star Trek: The Next Generation".to_string(),
                "Mission: Impossible".to_string(),
                "Berlin".to_string(),
            ]
        );
    }

    #[test]
    fn test_extract_links_measures_titles_in_characters() {
        let cjk = "東".repeat(100);
        let too_long = "東".repeat(MAX_TITLE_LENGTH);
        let text = format!("[[{}]] [[{}]]", cjk, too_long);
        assert_eq!(extract_links(&text), vec![cjk]);
    }

    #[test]
    fn test_request_url_for_category_members() {
        let client = WikiApiClient::with_endpoint("https://en.wikipedia.org/w/api.php", 5).unwrap();
        let url = client.request_url(
            &Query::CategoryMembers {
                category: "1980 births".to_string(),
            },
            Some("page|123"),
        );
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["list"], "categorymembers");
        assert_eq!(pairs["cmtitle"], "Category:1980 births");
        assert_eq!(pairs["cmcontinue"], "page|123");
        assert_eq!(pairs["cmlimit"], "500");
    }

    #[test]
    fn test_request_url_normalizes_user_names() {
        let client = WikiApiClient::with_endpoint("https://en.wikipedia.org/w/api.php", 5)
            .unwrap()
            .with_page_size(50);
        let url = client.request_url(
            &Query::UserContributions {
                user: "Some Editor".to_string(),
            },
            None,
        );
        let pairs: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["ucuser"], "Some_Editor");
        assert_eq!(pairs["uclimit"], "50");
        assert!(!pairs.contains_key("uccontinue"));
    }

    #[test]
    fn test_decode_api_error_is_malformed() {
        let body = r#"{"error":{"code":"badvalue","info":"Unrecognized value"}}"#;
        let result = decode_category_members(body);
        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));
    }

    #[test]
    fn test_decode_garbage_is_malformed() {
        let result = decode_user_contributions("<html>not json</html>");
        assert!(matches!(result, Err(FetchError::MalformedResponse(_))));
    }

    #[test]
    fn test_decode_page_links_skips_missing_pages() {
        let body = r#"{"query":{"pages":[{"title":"Nowhere","missing":true}]}}"#;
        let as_of = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();
        let batch = decode_page_links(body, as_of).unwrap();
        assert!(batch.records.is_empty());
        assert!(batch.is_last());
    }

    #[tokio::test]
    async fn test_category_members_pagination() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("list", "categorymembers"))
            .and(query_param("cmcontinue", "page|B"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"batchcomplete":true,"query":{"categorymembers":[
                    {"pageid":3,"ns":0,"title":"Carol"}]}}"#,
            ))
            .with_priority(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("list", "categorymembers"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"continue":{"cmcontinue":"page|B","continue":"-||"},
                    "query":{"categorymembers":[
                    {"pageid":1,"ns":0,"title":"Alice"},
                    {"pageid":2,"ns":0,"title":"Bob"}]}}"#,
            ))
            .with_priority(2)
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let outcome = FetchLoop::new(500)
            .run(
                &client,
                &Query::CategoryMembers {
                    category: "Category:Test".to_string(),
                },
            )
            .await;

        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.termination, Termination::Exhausted);
        assert_eq!(
            outcome.records,
            vec![
                Record::CategoryMember {
                    page_id: 1,
                    title: "Alice".into()
                },
                Record::CategoryMember {
                    page_id: 2,
                    title: "Bob".into()
                },
                Record::CategoryMember {
                    page_id: 3,
                    title: "Carol".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_first_revision_lookup() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("rvdir", "newer"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"query":{"pages":[{"pageid":42,"ns":0,"title":"Berlin",
                    "revisions":[{"timestamp":"2001-10-13T10:01:02Z"}]}]}}"#,
            ))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let batch = client
            .fetch_page(
                &Query::FirstRevision {
                    title: "Berlin".to_string(),
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            batch.records,
            vec![Record::FirstRevision {
                page_id: 42,
                title: "Berlin".into(),
                timestamp: Utc.with_ymd_and_hms(2001, 10, 13, 10, 1, 2).unwrap(),
            }]
        );
    }

    #[tokio::test]
    async fn test_page_links_at_date() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .and(query_param("rvstart", "2011-07-01T00:00:00Z"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"query":{"pages":[{"pageid":7,"ns":0,"title":"Potsdam",
                    "revisions":[{"timestamp":"2011-06-28T08:00:00Z",
                    "slots":{"main":{"contentmodel":"wikitext",
                    "content":"Near [[Berlin]] in [[Brandenburg]]."}}}]}]}}"#,
            ))
            .mount(&mock_server)
            .await;

        let as_of = Utc.with_ymd_and_hms(2011, 7, 1, 0, 0, 0).unwrap();
        let client = client_for(&mock_server);
        let batch = client
            .fetch_page(
                &Query::PageLinks {
                    title: "Potsdam".to_string(),
                    as_of,
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(
            batch.records,
            vec![Record::LinkSnapshot {
                page_id: 7,
                title: "Potsdam".into(),
                as_of,
                links: vec!["Berlin".into(), "Brandenburg".into()],
            }]
        );
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/w/api.php"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&mock_server)
            .await;

        let client = client_for(&mock_server);
        let result = client
            .fetch_page(
                &Query::UserContributions {
                    user: "Someone".to_string(),
                },
                None,
            )
            .await;

        assert!(matches!(result, Err(FetchError::Transport(_))));
    }
}
