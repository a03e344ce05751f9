//! On-demand Wikipedia lookups.
//!
//! The item has no resources of its own. Each `resource_ids` call asks the
//! assistant which article titles the user's message is about, looks them
//! up, and saves every hit as a silent link resource. Those resources only
//! live as long as the item: [`WikipediaItem::cleanup`] deletes them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, Mutex};

use futures::future::join_all;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{dedup_preserving_order, lock};
use crate::services::{ContextServices, WikipediaPage};
use crate::{NewResourceLink, ResourceTag};

/// System prompt for turning a chat message into article lookups.
pub const TITLE_EXTRACTOR_PROMPT: &str = r#"You map a user's question to the Wikipedia articles that best answer it.
Respond with a JSON array and nothing else. Each element is an object with a
"title" (the exact article title) and a "lang" (the two-letter code of the
Wikipedia edition to search, matching the language of the question).
Return at most three articles, most relevant first.

Example: [{"title": "Rust (programming language)", "lang": "en"}]"#;

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("valid code fence regex")
});

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
struct TitleQuery {
    title: String,
    #[serde(default = "default_lang")]
    lang: String,
}

fn default_lang() -> String {
    "en".to_string()
}

impl TitleQuery {
    fn english(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            lang: default_lang(),
        }
    }
}

/// Titles to look up for `prompt`, given the assistant's answer. Without an
/// answer the prompt itself is the title; an answer that is not a JSON array
/// is used verbatim as a single title.
fn parse_title_queries(prompt: &str, completion: Option<&str>) -> Vec<TitleQuery> {
    let Some(completion) = completion.map(str::trim).filter(|c| !c.is_empty()) else {
        return vec![TitleQuery::english(prompt)];
    };
    let json = CODE_FENCE_RE
        .captures(completion)
        .and_then(|caps| caps.get(1))
        .map_or(completion, |m| m.as_str());
    match serde_json::from_str::<Vec<TitleQuery>>(json) {
        Ok(queries) => queries,
        Err(e) => {
            debug!("Title extractor did not return JSON ({e}), using it verbatim");
            vec![TitleQuery::english(completion)]
        }
    }
}

#[derive(Debug, Default)]
pub struct WikipediaItem {
    created: Mutex<Vec<String>>,
}

impl WikipediaItem {
    /// Resources created so far and not yet cleaned up.
    pub fn created_ids(&self) -> Vec<String> {
        lock(&self.created).clone()
    }

    pub(crate) async fn resource_ids(
        &self,
        services: &ContextServices,
        prompt: Option<&str>,
        destroyed: &AtomicBool,
    ) -> Vec<String> {
        let Some(prompt) = prompt.filter(|p| !p.trim().is_empty()) else {
            debug!("No prompt, skipping Wikipedia lookup");
            return Vec::new();
        };
        let Some(wikipedia) = services.wikipedia.as_ref() else {
            debug!("No Wikipedia source configured");
            return Vec::new();
        };

        let completion = match services.assistant.complete(prompt, TITLE_EXTRACTOR_PROMPT).await {
            Ok(text) => Some(text),
            Err(e) => {
                debug!("Title extraction failed, searching the prompt itself: {e}");
                None
            }
        };
        let queries = parse_title_queries(prompt, completion.as_deref());
        debug!(queries = queries.len(), "Searching Wikipedia");

        let found = join_all(
            queries
                .iter()
                .map(|q| wikipedia.first_page(&q.title, &q.lang)),
        )
        .await;
        let mut pages: Vec<WikipediaPage> = Vec::new();
        for page in found.into_iter().flatten() {
            if !pages.iter().any(|p| p.id == page.id) {
                pages.push(page);
            }
        }
        if pages.is_empty() {
            debug!("No Wikipedia pages found");
            return Vec::new();
        }

        let created = join_all(pages.into_iter().map(|page| {
            services.resources.create_resource_link(NewResourceLink {
                url: page.url,
                title: page.title,
                content_html: Some(page.content),
                tags: vec![ResourceTag::silent(), ResourceTag::created_for_chat()],
            })
        }))
        .await;
        let ids: Vec<String> = created
            .into_iter()
            .filter_map(|result| match result {
                Ok(resource) => Some(resource.id),
                Err(e) => {
                    warn!("Failed to save Wikipedia page: {e}");
                    None
                }
            })
            .collect();

        if destroyed.load(Ordering::SeqCst) {
            // Cleanup already ran; nothing else will delete these.
            debug!(count = ids.len(), "Wikipedia item destroyed during lookup, deleting results");
            if let Err(e) = services.resources.delete_resources(&ids).await {
                warn!("Failed to delete Wikipedia resources: {e}");
            }
            return Vec::new();
        }

        lock(&self.created).extend(ids.iter().cloned());
        dedup_preserving_order(ids)
    }

    /// Delete every resource this item created.
    pub(crate) async fn cleanup(&self, services: &ContextServices) {
        let ids = std::mem::take(&mut *lock(&self.created));
        if ids.is_empty() {
            return;
        }
        debug!(count = ids.len(), "Deleting Wikipedia resources");
        if let Err(e) = services.resources.delete_resources(&ids).await {
            warn!("Failed to delete Wikipedia resources: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::item::ContextItem;
    use crate::item::testing::Fixture;
    use crate::services::ResourceStore;
    use crate::services::memory::{MemoryWikipedia, ScriptedAssistant};
    use crate::tag_keys;

    fn page(id: u64, title: &str) -> WikipediaPage {
        WikipediaPage {
            id,
            title: title.to_string(),
            url: format!("https://en.wikipedia.org/wiki/{}", title.replace(' ', "_")),
            content: format!("<p>{title}</p>"),
        }
    }

    #[test]
    fn title_parsing_fallbacks() {
        assert_eq!(
            parse_title_queries("what is rust", None),
            vec![TitleQuery::english("what is rust")]
        );
        assert_eq!(
            parse_title_queries("q", Some("```json\n[{\"title\": \"Rust\", \"lang\": \"de\"}]\n```")),
            vec![TitleQuery {
                title: "Rust".into(),
                lang: "de".into()
            }]
        );
        assert_eq!(
            parse_title_queries("q", Some("[{\"title\": \"Ferris\"}]")),
            vec![TitleQuery::english("Ferris")]
        );
        assert_eq!(
            parse_title_queries("q", Some("Rust language")),
            vec![TitleQuery::english("Rust language")]
        );
    }

    fn wiki_fixture(completion: &str) -> (Fixture, Arc<MemoryWikipedia>) {
        let mut fx = Fixture::new();
        let wiki = Arc::new(MemoryWikipedia::new());
        wiki.insert("en", "Rust", page(1, "Rust"));
        wiki.insert("en", "Rust (programming language)", page(1, "Rust"));
        wiki.insert("en", "Cargo", page(2, "Cargo"));
        fx.services = fx
            .services
            .clone()
            .with_wikipedia(wiki.clone())
            .with_assistant(Arc::new(ScriptedAssistant::new().with_completion(completion)));
        (fx, wiki)
    }

    #[tokio::test]
    async fn creates_silent_links_for_distinct_pages() {
        let (fx, wiki) = wiki_fixture(
            r#"[{"title":"Rust"},{"title":"Rust (programming language)"},{"title":"Cargo"},{"title":"Missing"}]"#,
        );
        let item = ContextItem::wikipedia();

        let ids = item
            .resource_ids(&fx.services, Some("how does cargo build rust"))
            .await;
        assert_eq!(ids.len(), 2);
        assert_eq!(wiki.lookups(), 4);
        for id in &ids {
            assert!(fx.resources.contains(id));
        }
        item.on_destroy(&fx.services).await;
        item.on_destroy(&fx.services).await;
        assert_eq!(fx.resources.deleted_ids(), ids);
        assert!(!fx.resources.contains(&ids[0]));
    }

    #[tokio::test]
    async fn created_links_are_tagged_for_chat() {
        let (fx, _) = wiki_fixture(r#"[{"title":"Cargo"}]"#);
        let item = ContextItem::wikipedia();
        let ids = item.resource_ids(&fx.services, Some("cargo")).await;
        let resource = fx.resources.get_resource(&ids[0]).await.unwrap();
        assert!(resource.has_tag(tag_keys::SILENT));
        assert!(resource.has_tag(tag_keys::CREATED_FOR_CHAT));
        assert_eq!(resource.name.as_deref(), Some("Cargo"));
    }

    #[tokio::test]
    async fn no_prompt_or_no_source_yields_nothing() {
        let (fx, wiki) = wiki_fixture("[]");
        let item = ContextItem::wikipedia();
        assert!(item.resource_ids(&fx.services, None).await.is_empty());
        assert!(item.resource_ids(&fx.services, Some("  ")).await.is_empty());
        assert_eq!(wiki.lookups(), 0);

        let bare = Fixture::new();
        assert!(item.resource_ids(&bare.services, Some("rust")).await.is_empty());
    }

    #[tokio::test]
    async fn failed_completion_searches_the_prompt() {
        let mut fx = Fixture::new();
        let wiki = Arc::new(MemoryWikipedia::new());
        wiki.insert("en", "Cargo", page(2, "Cargo"));
        fx.services = fx.services.clone().with_wikipedia(wiki);
        let item = ContextItem::wikipedia();
        assert_eq!(item.resource_ids(&fx.services, Some("cargo")).await.len(), 1);
    }

    #[tokio::test]
    async fn lookup_after_destroy_cleans_up_immediately() {
        let (fx, _) = wiki_fixture(r#"[{"title":"Cargo"}]"#);
        let item = ContextItem::wikipedia();
        item.on_destroy(&fx.services).await;
        assert!(item.resource_ids(&fx.services, Some("cargo")).await.is_empty());
        assert_eq!(fx.resources.deleted_ids().len(), 1);
        assert!(fx.resources.is_empty());
    }
}
