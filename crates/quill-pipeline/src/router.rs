//! Topic router: classifies a new inbound text as "stay / resume / new"
//! using a small-model call over the recent topic list.
//!
//! Feature-flagged; only consulted for forum-capable chats. The classifier
//! answers strict JSON — anything else degrades to `Stay` (misrouting a
//! message is worse than not routing it).

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use quill_claude::{AnthropicClient, ChatRequest};
use quill_core::config::TopicRoutingConfig;
use quill_core::Result;
use quill_store::types::Thread;
use quill_store::{messages, threads, Store};

const ROUTER_SYSTEM_PROMPT: &str = "\
You route chat messages to conversation topics. Given the active topics with \
their recent messages and one new message, decide whether the new message \
continues the current topic (stay), belongs to another existing topic \
(resume), or starts a new subject (new). Reply with ONLY a JSON object: \
{\"action\":\"stay\"|\"resume\"|\"new\",\"topic\":\"<existing topic title or empty>\",\
\"title\":\"<short title for a new topic or empty>\"}";

/// Routing verdict for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    Stay,
    /// Attach to an existing topic thread.
    Resume { thread_id: i64, topic_id: i64, title: String },
    /// Create a new platform topic titled as given.
    New { title: String },
}

#[derive(Deserialize)]
struct RawVerdict {
    action: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    title: String,
}

pub struct TopicRouter {
    client: AnthropicClient,
    store: Arc<Store>,
    config: TopicRoutingConfig,
    topics_cache: quill_cache::TtlMap<String, Vec<(i64, i64, String, String)>>,
}

impl TopicRouter {
    pub fn new(client: AnthropicClient, store: Arc<Store>, config: TopicRoutingConfig) -> Self {
        Self {
            client,
            store,
            config,
            topics_cache: quill_cache::TtlMap::new(1024),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Route `text` arriving in `current` (the thread resolved from the raw
    /// event). Returns `Stay` whenever routing is unnecessary or unreliable.
    pub async fn route(&self, current: &Thread, text: &str) -> Result<RouteDecision> {
        if !self.config.enabled || text.is_empty() {
            return Ok(RouteDecision::Stay);
        }

        // Gap suppression: an actively-used topic is almost never the wrong
        // place for the next message.
        if current.topic_id != 0 && self.recently_active(current) {
            debug!(thread_id = current.id, "topic active within gap, skipping routing");
            return Ok(RouteDecision::Stay);
        }

        let topics = self.recent_topics(current.chat_id, current.user_id)?;
        if topics.is_empty() {
            return Ok(RouteDecision::Stay);
        }

        let prompt = self.build_prompt(current, &topics, text);
        let mut request = ChatRequest::new(
            self.config.model.clone(),
            ROUTER_SYSTEM_PROMPT,
            self.config.max_tokens,
        );
        request.push_user_text(&prompt);

        let response = match self.client.send(&request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "topic classification failed, staying");
                return Ok(RouteDecision::Stay);
            }
        };

        let decision = self.parse_verdict(&response.text, current, &topics);
        info!(
            chat_id = current.chat_id,
            user_id = current.user_id,
            ?decision,
            "topic routed"
        );
        Ok(decision)
    }

    fn recently_active(&self, thread: &Thread) -> bool {
        let Ok(updated) = chrono::DateTime::parse_from_rfc3339(&thread.updated_at) else {
            return false;
        };
        let gap = chrono::Utc::now() - updated.with_timezone(&chrono::Utc);
        gap < chrono::Duration::minutes(self.config.switch_min_gap_minutes)
    }

    /// (thread_id, topic_id, title, recent messages digest), cached 60 s.
    fn recent_topics(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<Vec<(i64, i64, String, String)>> {
        let key = quill_cache::recent_topics_key(chat_id, user_id);
        if let Some(cached) = self.topics_cache.get(&key) {
            return Ok(cached);
        }

        let limit = self.config.recent_topics;
        let recent_messages = self.config.recent_messages;
        let truncate = self.config.msg_truncate;

        let topics = self.store.with_conn(|conn| {
            let rows = threads::recent_topics(conn, chat_id, user_id, limit)?;
            let mut out = Vec::with_capacity(rows.len());
            for t in rows {
                let texts = messages::recent_user_texts(conn, t.id, recent_messages)?;
                let digest = texts
                    .iter()
                    .map(|m| truncate_chars(m, truncate))
                    .collect::<Vec<_>>()
                    .join(" | ");
                let title = t.title.unwrap_or_else(|| format!("topic {}", t.topic_id));
                out.push((t.id, t.topic_id, title, digest));
            }
            Ok(out)
        })?;

        self.topics_cache
            .insert(key, topics.clone(), quill_cache::RECENT_TOPICS_TTL);
        Ok(topics)
    }

    fn build_prompt(
        &self,
        current: &Thread,
        topics: &[(i64, i64, String, String)],
        text: &str,
    ) -> String {
        let mut prompt = String::from("Active topics:\n");
        for (_, _, title, digest) in topics {
            prompt.push_str(&format!("- \"{title}\": {digest}\n"));
        }
        let current_title = current
            .title
            .as_deref()
            .unwrap_or(if current.topic_id == 0 { "general" } else { "untitled" });
        prompt.push_str(&format!("\nCurrent topic: \"{current_title}\"\n"));
        prompt.push_str(&format!(
            "New message: {}\n",
            truncate_chars(text, self.config.msg_truncate)
        ));
        prompt
    }

    fn parse_verdict(
        &self,
        raw: &str,
        current: &Thread,
        topics: &[(i64, i64, String, String)],
    ) -> RouteDecision {
        // Models occasionally wrap JSON in a code fence; strip it.
        let cleaned = raw
            .trim()
            .trim_start_matches("```json")
            .trim_start_matches("```")
            .trim_end_matches("```")
            .trim();

        let Ok(verdict) = serde_json::from_str::<RawVerdict>(cleaned) else {
            warn!(raw, "unparseable router verdict, staying");
            return RouteDecision::Stay;
        };

        match verdict.action.as_str() {
            "resume" => {
                let target = topics
                    .iter()
                    .find(|(_, _, title, _)| title.eq_ignore_ascii_case(&verdict.topic));
                match target {
                    Some((thread_id, topic_id, title, _)) if *thread_id != current.id => {
                        RouteDecision::Resume {
                            thread_id: *thread_id,
                            topic_id: *topic_id,
                            title: title.clone(),
                        }
                    }
                    _ => RouteDecision::Stay,
                }
            }
            "new" => {
                let title = truncate_chars(verdict.title.trim(), self.config.temp_name_max_length);
                if title.is_empty() {
                    RouteDecision::Stay
                } else {
                    RouteDecision::New { title }
                }
            }
            _ => RouteDecision::Stay,
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect::<String>() + "…"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::retry::RetryPolicy;

    fn router(enabled: bool) -> TopicRouter {
        let config = TopicRoutingConfig {
            enabled,
            ..Default::default()
        };
        TopicRouter::new(
            AnthropicClient::new(
                "k".into(),
                Some("http://127.0.0.1:1".into()),
                RetryPolicy::new(1, 0.001, 0.002),
            ),
            Arc::new(Store::open_in_memory().unwrap()),
            config,
        )
    }

    fn thread(id: i64, topic_id: i64, updated_at: &str) -> Thread {
        Thread {
            id,
            chat_id: 1,
            user_id: 2,
            topic_id,
            title: Some("Rust".into()),
            files_context: None,
            created_at: updated_at.to_string(),
            updated_at: updated_at.to_string(),
        }
    }

    #[tokio::test]
    async fn disabled_router_always_stays() {
        let r = router(false);
        let t = thread(1, 0, &chrono::Utc::now().to_rfc3339());
        assert_eq!(r.route(&t, "new subject").await.unwrap(), RouteDecision::Stay);
    }

    #[tokio::test]
    async fn active_topic_suppresses_routing() {
        // LLM endpoint is unreachable, so reaching it would error; the gap
        // suppression must return Stay before any call is attempted.
        let r = router(true);
        let t = thread(1, 7, &chrono::Utc::now().to_rfc3339());
        assert_eq!(r.route(&t, "anything").await.unwrap(), RouteDecision::Stay);
    }

    #[test]
    fn verdict_parsing_resume_matches_title() {
        let r = router(true);
        let current = thread(1, 0, &chrono::Utc::now().to_rfc3339());
        let topics = vec![
            (10, 100, "Cooking".to_string(), "pasta | pizza".to_string()),
            (11, 101, "Rust".to_string(), "borrowck".to_string()),
        ];
        let decision = r.parse_verdict(
            r#"{"action":"resume","topic":"rust","title":""}"#,
            &current,
            &topics,
        );
        assert_eq!(
            decision,
            RouteDecision::Resume {
                thread_id: 11,
                topic_id: 101,
                title: "Rust".into()
            }
        );
    }

    #[test]
    fn verdict_parsing_new_with_fenced_json() {
        let r = router(true);
        let current = thread(1, 0, &chrono::Utc::now().to_rfc3339());
        let decision = r.parse_verdict(
            "```json\n{\"action\":\"new\",\"topic\":\"\",\"title\":\"Gardening\"}\n```",
            &current,
            &[],
        );
        assert_eq!(decision, RouteDecision::New { title: "Gardening".into() });
    }

    #[test]
    fn garbage_verdict_stays() {
        let r = router(true);
        let current = thread(1, 0, &chrono::Utc::now().to_rfc3339());
        assert_eq!(r.parse_verdict("sure thing!", &current, &[]), RouteDecision::Stay);
    }

    #[test]
    fn resume_to_current_thread_is_stay() {
        let r = router(true);
        let current = thread(11, 101, &chrono::Utc::now().to_rfc3339());
        let topics = vec![(11, 101, "Rust".to_string(), "".to_string())];
        let decision = r.parse_verdict(
            r#"{"action":"resume","topic":"Rust","title":""}"#,
            &current,
            &topics,
        );
        assert_eq!(decision, RouteDecision::Stay);
    }
}
