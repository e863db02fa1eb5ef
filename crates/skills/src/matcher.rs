//! Decide which skills a query needs.
//!
//! With a provider configured the model is asked directly and trusted,
//! including when it answers `[]`. Answers are cached per query. Without a
//! provider, or when the call or its parsing fails, a keyword scorer runs
//! instead.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use aiq_core::error::ProviderError;
use aiq_core::{Message, Provider, ProviderRequest};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::skill::Metadata;

/// Skills returned per query unless overridden.
pub const DEFAULT_MAX_SKILLS: usize = 3;

const MATCH_TIMEOUT: Duration = Duration::from_secs(30);

const MATCHER_SYSTEM_PROMPT: &str = r#"You are a skill matcher for a database query assistant. Your task is to determine which skills (if any) would help answer the user's query.

IMPORTANT MATCHING PRINCIPLES:
1. A skill should only be matched if the user's query DIRECTLY requires what the skill provides
2. Skills describe specific capabilities or knowledge - match based on ACTUAL NEED, not keyword overlap
3. Most database queries (SELECT, analyze data, show tables, etc.) do NOT need additional skills
4. Only match skills when the query explicitly asks for something the skill uniquely provides

EXAMPLES OF CORRECT MATCHING:
- Query: "How to install MySQL on Mac?" → Match: skills about MySQL installation on Mac
- Query: "Show all tables" → Match: [] (standard SQL operation, no skill needed)
- Query: "Analyze sales data by region" → Match: [] (standard SQL analysis, no skill needed)
- Query: "How to configure replication?" → Match: skills about database replication setup

Return a JSON array of skill names. Return [] if no skills are needed.
Format: ["skill-name-1", "skill-name-2"] or []"#;

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did",
    "will", "would", "could", "should", "may", "might", "must", "can", "this", "that", "these",
    "those", "i", "you", "he", "she", "it", "we", "they", "what", "which", "who", "when", "where",
    "why", "how",
];

const PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':', '(', ')', '[', ']', '{', '}', '\'', '"'];

/// A keyword-scored candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub metadata: Metadata,
    pub score: f64,
}

#[derive(Debug, thiserror::Error)]
enum MatchError {
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("skill matching timed out after {0:?}")]
    Timeout(Duration),
    #[error("empty content in response")]
    EmptyContent,
    #[error("could not parse skill names from response: {0}")]
    Unparseable(String),
}

pub struct SkillsMatcher {
    provider: Option<Arc<dyn Provider>>,
    model: String,
    max_skills: usize,
    cache: RwLock<HashMap<String, Vec<String>>>,
}

impl SkillsMatcher {
    /// A matcher that only scores keywords.
    pub fn new() -> Self {
        Self {
            provider: None,
            model: String::new(),
            max_skills: DEFAULT_MAX_SKILLS,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Ask `provider` first, falling back to keywords on failure.
    pub fn with_provider(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.provider = Some(provider);
        self.model = model.into();
        self
    }

    pub fn with_max_skills(mut self, max_skills: usize) -> Self {
        self.max_skills = max_skills.max(1);
        self
    }

    pub fn max_skills(&self) -> usize {
        self.max_skills
    }

    /// Pick the skills `query` needs, in relevance order.
    pub async fn match_skills(&self, query: &str, candidates: &[Metadata]) -> Vec<Metadata> {
        if candidates.is_empty() {
            return Vec::new();
        }

        if let Some(provider) = &self.provider {
            match self.match_with_llm(provider.as_ref(), query, candidates).await {
                Ok(matched) => {
                    debug!(count = matched.len(), "LLM skill match");
                    return matched;
                }
                Err(e) => warn!(error = %e, "LLM skill matching failed, using keywords"),
            }
        }

        keyword_match(query, candidates, self.max_skills)
            .into_iter()
            .map(|r| r.metadata)
            .collect()
    }

    async fn match_with_llm(
        &self,
        provider: &dyn Provider,
        query: &str,
        candidates: &[Metadata],
    ) -> Result<Vec<Metadata>, MatchError> {
        let key = cache_key(query);
        let cached = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        if let Some(names) = cached {
            debug!("Skill match cache hit");
            return Ok(metadata_from_names(&names, candidates));
        }

        let request = ProviderRequest::new(
            self.model.clone(),
            vec![
                Message::system(MATCHER_SYSTEM_PROMPT),
                Message::user(build_matching_prompt(query, candidates)),
            ],
        );

        let response = tokio::time::timeout(MATCH_TIMEOUT, provider.complete(request))
            .await
            .map_err(|_| MatchError::Timeout(MATCH_TIMEOUT))??;

        let names = self.parse_skill_names(&response.message.content)?;
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, names.clone());

        Ok(metadata_from_names(&names, candidates))
    }

    /// Read a JSON array of names from a model reply, tolerating prose
    /// around it.
    fn parse_skill_names(&self, content: &str) -> Result<Vec<String>, MatchError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(MatchError::EmptyContent);
        }

        let mut names = match serde_json::from_str::<Vec<String>>(content) {
            Ok(names) => names,
            Err(_) => {
                let (Some(start), Some(end)) = (content.find('['), content.rfind(']')) else {
                    return Err(MatchError::Unparseable(content.to_string()));
                };
                if end <= start {
                    return Err(MatchError::Unparseable(content.to_string()));
                }
                serde_json::from_str::<Vec<String>>(&content[start..=end])
                    .map_err(|_| MatchError::Unparseable(content.to_string()))?
            }
        };
        names.truncate(self.max_skills);
        Ok(names)
    }
}

impl Default for SkillsMatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(query: &str) -> String {
    Sha256::digest(query.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn build_matching_prompt(query: &str, candidates: &[Metadata]) -> String {
    let mut prompt = format!("User Query: \"{query}\"\n\nAvailable Skills:\n");
    for (i, md) in candidates.iter().enumerate() {
        prompt.push_str(&format!("{}. {} - {}\n", i + 1, md.name, md.description));
    }
    prompt.push_str(
        "\nWhich skills (if any) does this query DIRECTLY require? \
         Return JSON array of skill names, or [] if none needed.",
    );
    prompt
}

/// Map names back to metadata, keeping the names' order and dropping
/// unknown ones.
fn metadata_from_names(names: &[String], candidates: &[Metadata]) -> Vec<Metadata> {
    names
        .iter()
        .filter_map(|name| candidates.iter().find(|m| &m.name == name))
        .cloned()
        .collect()
}

/// Lowercased query words minus punctuation, stop words and single letters.
pub fn extract_keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(PUNCTUATION))
        .filter(|w| w.chars().count() > 1 && !STOP_WORDS.contains(w))
        .map(str::to_string)
        .collect()
}

fn score_skill(keywords: &[String], metadata: &Metadata) -> f64 {
    let joined = keywords.join(" ");
    let name = metadata.name.to_lowercase();
    let description = metadata.description.to_lowercase();
    let mut score = 0.0;

    if joined == name {
        score += 100.0;
    }
    if !joined.is_empty() && (name.contains(&joined) || joined.contains(&name)) {
        score += 50.0;
    }
    for keyword in keywords {
        if name.contains(keyword.as_str()) {
            score += 30.0;
        }
        if description.contains(keyword.as_str()) {
            score += 10.0;
        }
    }
    score
}

/// Score every candidate against the query's keywords and keep the best
/// `max` with a positive score. Ties keep candidate order.
pub fn keyword_match(query: &str, candidates: &[Metadata], max: usize) -> Vec<MatchResult> {
    let keywords = extract_keywords(query);
    let mut results: Vec<MatchResult> = candidates
        .iter()
        .map(|md| MatchResult {
            metadata: md.clone(),
            score: score_skill(&keywords, md),
        })
        .filter(|r| r.score > 0.0)
        .collect();

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(max);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiq_core::ProviderResponse;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn md(name: &str, description: &str) -> Metadata {
        Metadata {
            name: name.into(),
            description: description.into(),
            location: PathBuf::from(format!("{name}/SKILL.md")),
        }
    }

    fn names(found: &[Metadata]) -> Vec<&str> {
        found.iter().map(|m| m.name.as_str()).collect()
    }

    /// Replies with canned contents in order, or fails once they run out.
    struct ScriptedProvider {
        replies: Mutex<Vec<Result<String, ProviderError>>>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(replies: Vec<Result<String, ProviderError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(request.messages[1].content.starts_with("User Query: \""));
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ProviderError::EmptyChoices);
            }
            let content = replies.remove(0)?;
            Ok(ProviderResponse {
                message: Message::assistant(content),
                usage: None,
                model: "scripted".into(),
                finish_reason: Some("stop".into()),
            })
        }
    }

    #[tokio::test]
    async fn exact_name_match() {
        let candidates = [md("seekdb", "Database operations"), md("data-analysis", "Data analysis tools")];
        let found = SkillsMatcher::new().match_skills("seekdb", &candidates).await;
        assert_eq!(names(&found), vec!["seekdb"]);
    }

    #[tokio::test]
    async fn partial_name_match() {
        let candidates = [md("seekdb-docs", "SeekDB documentation"), md("data-analysis", "Data analysis tools")];
        let found = SkillsMatcher::new().match_skills("seekdb", &candidates).await;
        assert_eq!(names(&found), vec!["seekdb-docs"]);
    }

    #[tokio::test]
    async fn description_keyword_match() {
        let candidates = [
            md("database-tool", "Database operations and SQL queries"),
            md("other-tool", "Something else"),
        ];
        let found = SkillsMatcher::new().match_skills("SQL queries", &candidates).await;
        assert_eq!(names(&found), vec!["database-tool"]);
    }

    #[tokio::test]
    async fn multiple_matches_ranked() {
        let candidates = [
            md("seekdb", "SeekDB database operations"),
            md("database-tool", "Database operations"),
            md("other-tool", "Something else"),
        ];
        let found = SkillsMatcher::new().match_skills("database", &candidates).await;
        assert_eq!(names(&found), vec!["database-tool", "seekdb"]);
    }

    #[tokio::test]
    async fn unrelated_query_matches_nothing() {
        let candidates = [md("seekdb", "Database operations"), md("data-analysis", "Data analysis tools")];
        let found = SkillsMatcher::new()
            .match_skills("completely unrelated query", &candidates)
            .await;
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn empty_candidates() {
        assert!(SkillsMatcher::new().match_skills("any query", &[]).await.is_empty());
    }

    #[tokio::test]
    async fn custom_max_skills() {
        let candidates = [
            md("skill1", "Database operations"),
            md("skill2", "Database queries"),
            md("skill3", "Database tools"),
        ];
        let found = SkillsMatcher::new()
            .with_max_skills(2)
            .match_skills("database", &candidates)
            .await;
        assert_eq!(names(&found), vec!["skill1", "skill2"]);
    }

    #[test]
    fn scoring_weights() {
        let kw = |s: &str| vec![s.to_string()];
        assert_eq!(score_skill(&kw("seekdb"), &md("seekdb", "Database operations")), 180.0);
        assert_eq!(score_skill(&kw("seekdb"), &md("seekdb-docs", "Database operations")), 80.0);
        assert_eq!(score_skill(&kw("database"), &md("other-tool", "Database operations")), 10.0);
        assert_eq!(score_skill(&[], &md("anything", "at all")), 0.0);
    }

    #[test]
    fn keywords_drop_stop_words_and_punctuation() {
        assert_eq!(extract_keywords("How do I query the database?"), vec!["query", "database"]);
        assert!(extract_keywords("").is_empty());
        assert!(extract_keywords("the and or").is_empty());
        assert_eq!(extract_keywords("(MySQL), x 'replication'!"), vec!["mysql", "replication"]);
    }

    #[tokio::test]
    async fn llm_answer_is_trusted_and_cached() {
        let provider = ScriptedProvider::new(vec![Ok(r#"["replication", "ghost"]"#.into())]);
        let matcher = SkillsMatcher::new().with_provider(provider.clone(), "gpt-4o-mini");
        let candidates = [md("mysql-install", "Install MySQL"), md("replication", "Configure replication")];

        let first = matcher.match_skills("How to configure replication?", &candidates).await;
        assert_eq!(names(&first), vec!["replication"]);

        let second = matcher.match_skills("How to configure replication?", &candidates).await;
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn llm_empty_array_means_no_skills() {
        let provider = ScriptedProvider::new(vec![Ok("[]".into())]);
        let matcher = SkillsMatcher::new().with_provider(provider, "m");
        // Keywords alone would match "tables" here
        let candidates = [md("tables", "Working with tables")];
        assert!(matcher.match_skills("Show all tables", &candidates).await.is_empty());
    }

    #[tokio::test]
    async fn llm_reply_wrapped_in_prose() {
        let provider = ScriptedProvider::new(vec![Ok(
            "Sure! The relevant skills are [\"a\", \"b\", \"c\", \"d\"] based on the query.".into(),
        )]);
        let matcher = SkillsMatcher::new().with_provider(provider, "m");
        let candidates = [md("a", "x"), md("b", "x"), md("c", "x"), md("d", "x")];
        let found = matcher.match_skills("anything", &candidates).await;
        assert_eq!(names(&found), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn provider_failure_falls_back_to_keywords() {
        let provider = ScriptedProvider::new(vec![Err(ProviderError::Network("refused".into()))]);
        let matcher = SkillsMatcher::new().with_provider(provider, "m");
        let candidates = [md("seekdb", "Database operations")];
        let found = matcher.match_skills("seekdb", &candidates).await;
        assert_eq!(names(&found), vec!["seekdb"]);
    }

    #[tokio::test]
    async fn unparseable_reply_falls_back_and_is_not_cached() {
        let provider = ScriptedProvider::new(vec![Ok("no idea".into()), Ok("[\"seekdb\"]".into())]);
        let matcher = SkillsMatcher::new().with_provider(provider.clone(), "m");
        let candidates = [md("seekdb", "Database operations"), md("other", "Database operations")];

        let found = matcher.match_skills("database", &candidates).await;
        assert_eq!(names(&found), vec!["seekdb", "other"]);

        let found = matcher.match_skills("database", &candidates).await;
        assert_eq!(names(&found), vec!["seekdb"]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn parse_rejects_empty_and_garbage() {
        let matcher = SkillsMatcher::new();
        assert!(matches!(matcher.parse_skill_names("  "), Err(MatchError::EmptyContent)));
        assert!(matches!(matcher.parse_skill_names("] nope ["), Err(MatchError::Unparseable(_))));
    }

    #[test]
    fn prompt_lists_candidates() {
        let prompt = build_matching_prompt("q", &[md("a", "first"), md("b", "second")]);
        assert!(prompt.starts_with("User Query: \"q\"\n\nAvailable Skills:\n1. a - first\n2. b - second\n"));
        assert!(prompt.ends_with("or [] if none needed."));
    }

    #[test]
    fn cache_key_is_sha256_hex() {
        assert_eq!(
            cache_key(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
