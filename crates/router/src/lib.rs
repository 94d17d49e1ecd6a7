//! Smart Router (§4.6): a token-indexed scorer that ranks agents by
//! keyword/capability/description/example weight, falling back to a
//! health-based pick when no posting scores.
//!
//! The index is append-only and rebuilt wholesale on agent-set change
//! (§9 design note) rather than mutated in place, so readers never see a
//! half-updated map: `rebuild_index` builds a fresh `HashMap` and swaps it
//! in behind the `RwLock` in one write.

use std::cmp::Reverse;
use std::collections::HashMap;

use parking_lot::RwLock;
use voice_agent_config::RouterWeights;

/// Metadata the router indexes for one agent.
#[derive(Debug, Clone, Default)]
pub struct AgentProfile {
    pub agent_id: String,
    pub keywords: Vec<String>,
    pub capabilities: Vec<String>,
    pub description: String,
    pub examples: Vec<String>,
}

impl AgentProfile {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            ..Default::default()
        }
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_capabilities(
        mut self,
        capabilities: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_examples(mut self, examples: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.examples = examples.into_iter().map(Into::into).collect();
        self
    }
}

/// Live health for one agent, set by an external collector. The router
/// never times agents itself.
#[derive(Debug, Clone, Copy)]
pub struct AgentHealth {
    pub healthy: bool,
    pub latency_ms: u32,
}

/// One (agent-id, weight) posting under a token.
type Posting = (String, u32);

#[derive(Default)]
struct Index {
    postings: HashMap<String, Vec<Posting>>,
}

/// Lowercases, splits on non-alphanumeric boundaries, and drops tokens
/// shorter than 2 characters.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(|t| t.to_string())
        .collect()
}

fn health_tier(health: Option<&AgentHealth>) -> u8 {
    match health {
        Some(h) if h.healthy => 0,
        None => 1,
        Some(_) => 2,
    }
}

fn health_latency(health: Option<&AgentHealth>) -> u32 {
    health.map(|h| h.latency_ms).unwrap_or(u32::MAX)
}

pub struct SmartRouter {
    weights: RouterWeights,
    index: RwLock<Index>,
    health: RwLock<HashMap<String, AgentHealth>>,
}

impl SmartRouter {
    pub fn new(weights: RouterWeights) -> Self {
        Self {
            weights,
            index: RwLock::new(Index::default()),
            health: RwLock::new(HashMap::new()),
        }
    }

    /// Rebuilds the inverted index from scratch for the given agent set.
    /// Called whenever the eligible-agent set changes for a session.
    pub fn rebuild_index(&self, agents: &[AgentProfile]) {
        let mut postings: HashMap<String, Vec<Posting>> = HashMap::new();
        for agent in agents {
            let mut weighted_tokens: HashMap<String, u32> = HashMap::new();
            for (field_tokens, weight) in [
                (&agent.keywords, self.weights.keyword),
                (&agent.capabilities, self.weights.capability),
                (&[agent.description.clone()][..], self.weights.description),
                (&agent.examples, self.weights.example),
            ] {
                for text in field_tokens {
                    for token in tokenize(text) {
                        *weighted_tokens.entry(token).or_insert(0) += weight;
                    }
                }
            }
            for (token, weight) in weighted_tokens {
                postings
                    .entry(token)
                    .or_default()
                    .push((agent.agent_id.clone(), weight));
            }
        }
        *self.index.write() = Index { postings };
    }

    pub fn set_health(&self, agent_id: impl Into<String>, health: AgentHealth) {
        self.health.write().insert(agent_id.into(), health);
    }

    fn select_best_by_health(&self, agent_ids: &[String]) -> Vec<String> {
        let health = self.health.read();
        let with_health: Vec<_> = agent_ids
            .iter()
            .filter_map(|id| health.get(id).map(|h| (id, h)))
            .collect();

        let healthy_best = with_health
            .iter()
            .filter(|(_, h)| h.healthy)
            .min_by_key(|(_, h)| h.latency_ms);

        let chosen = healthy_best.or_else(|| with_health.iter().min_by_key(|(_, h)| h.latency_ms));

        chosen.map(|(id, _)| vec![(*id).clone()]).unwrap_or_default()
    }

    /// Ranks `agent_ids` for `utterance`. Empty input returns empty;
    /// a singleton list returns that agent regardless of text (scoring is
    /// skipped entirely per §4.3/§4.6).
    pub fn route(&self, utterance: &str, agent_ids: &[String]) -> Vec<String> {
        if agent_ids.is_empty() {
            return Vec::new();
        }
        if agent_ids.len() == 1 {
            return vec![agent_ids[0].clone()];
        }

        let tokens = tokenize(utterance);
        let index = self.index.read();
        let mut scores: HashMap<&str, u32> = HashMap::new();
        for token in &tokens {
            if let Some(postings) = index.postings.get(token) {
                for (agent_id, weight) in postings {
                    if agent_ids.iter().any(|a| a == agent_id) {
                        *scores.entry(agent_id.as_str()).or_insert(0) += weight;
                    }
                }
            }
        }

        if scores.values().all(|&s| s == 0) {
            drop(index);
            return self.select_best_by_health(agent_ids);
        }

        let health = self.health.read();
        let mut ranked: Vec<&String> = agent_ids.iter().collect();
        ranked.sort_by_key(|id| {
            let score = scores.get(id.as_str()).copied().unwrap_or(0);
            let h = health.get(id.as_str());
            (Reverse(score), health_tier(h), health_latency(h))
        });
        ranked.into_iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights() -> RouterWeights {
        RouterWeights {
            keyword: 3,
            capability: 2,
            description: 1,
            example: 1,
        }
    }

    #[test]
    fn empty_agent_list_returns_empty() {
        let router = SmartRouter::new(weights());
        assert!(router.route("anything", &[]).is_empty());
    }

    #[test]
    fn single_agent_skips_scoring() {
        let router = SmartRouter::new(weights());
        let ids = vec!["only".to_string()];
        assert_eq!(router.route("irrelevant text", &ids), ids);
    }

    #[test]
    fn scenario_5_router_ranking_by_score_then_health_tiebreak() {
        let router = SmartRouter::new(weights());
        router.rebuild_index(&[
            AgentProfile::new("A").with_keywords(["weather"]),
            AgentProfile::new("B").with_capabilities(["weather-report"]),
            AgentProfile::new("C").with_description("a weather bot"),
        ]);
        let ids = vec!["A".to_string(), "B".to_string(), "C".to_string()];

        let ranked = router.route("weather now", &ids);
        assert_eq!(ranked, vec!["A", "B", "C"]);

        router.set_health("A", AgentHealth { healthy: false, latency_ms: 0 });
        router.set_health("B", AgentHealth { healthy: true, latency_ms: 50 });
        router.set_health("C", AgentHealth { healthy: true, latency_ms: 20 });

        // Scores dominate: order is unchanged even though a pure health
        // tiebreak would have preferred C over B.
        let ranked = router.route("weather now", &ids);
        assert_eq!(ranked, vec!["A", "B", "C"]);
    }

    #[test]
    fn no_token_overlap_falls_back_to_health() {
        let router = SmartRouter::new(weights());
        router.rebuild_index(&[
            AgentProfile::new("A").with_keywords(["billing"]),
            AgentProfile::new("B").with_keywords(["support"]),
        ]);
        let ids = vec!["A".to_string(), "B".to_string()];
        router.set_health("A", AgentHealth { healthy: true, latency_ms: 100 });
        router.set_health("B", AgentHealth { healthy: true, latency_ms: 10 });

        let ranked = router.route("completely unrelated words", &ids);
        assert_eq!(ranked, vec!["B".to_string()]);
    }

    #[test]
    fn fallback_with_no_health_entries_returns_empty() {
        let router = SmartRouter::new(weights());
        router.rebuild_index(&[AgentProfile::new("A").with_keywords(["billing"])]);
        let ids = vec!["A".to_string(), "B".to_string()];
        assert!(router.route("nothing matches here", &ids).is_empty());
    }

    #[test]
    fn tokenize_drops_short_tokens_and_lowercases() {
        assert_eq!(tokenize("A Cat, sat on MAT!"), vec!["cat", "sat", "on", "mat"]);
    }
}
