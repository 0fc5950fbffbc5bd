//! Conversation engine: personas answer in character.
//!
//! Replies come from a chain of backends. A generative backend (when
//! configured) is tried first under a hard timeout; any failure falls through
//! to the rule-based keyword templates, so chat always answers.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::llm_client::{LlmClient, Message};
use crate::pipeline::goal;
use crate::pipeline::persona::{Persona, TraitLevel};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Persona,
}

/// One entry in a conversation transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: TurnRole,
    pub content: String,
}

/// Which backend produced the reply; surfaced to callers so a degraded
/// generative setup is visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Generative,
    RuleBased,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatReply {
    pub text: String,
    pub source: ReplySource,
}

/// A backend that can answer as a persona. Implementations must be cheap to
/// call concurrently.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn reply(
        &self,
        persona: &Persona,
        goal: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String>;
}

/// OpenAI-compatible backend with a hard per-request timeout.
pub struct LlmBackend {
    client: LlmClient,
    timeout: Duration,
}

impl LlmBackend {
    pub fn new(client: LlmClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn build_messages(
        persona: &Persona,
        goal: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Vec<Message> {
        let system = format!(
            "You are {}, a simulated consumer persona. {} You care about {} and {}. \
             Your main hesitation: {}. You are being interviewed about this marketing \
             goal: \"{}\". Stay in character, answer in 2-4 sentences, first person.",
            persona.name,
            persona.personality,
            persona.cares_about[0],
            persona.cares_about[1],
            persona.barrier,
            goal
        );
        let mut messages = vec![Message::system(system)];
        for turn in history {
            messages.push(match turn.role {
                TurnRole::User => Message::user(turn.content.clone()),
                TurnRole::Persona => Message::assistant(turn.content.clone()),
            });
        }
        messages.push(Message::user(message.to_string()));
        messages
    }
}

#[async_trait]
impl GenerativeBackend for LlmBackend {
    async fn reply(
        &self,
        persona: &Persona,
        goal: &str,
        history: &[ChatTurn],
        message: &str,
    ) -> Result<String> {
        let messages = Self::build_messages(persona, goal, history, message);
        let reply = tokio::time::timeout(self.timeout, self.client.generate(messages))
            .await
            .map_err(|_| anyhow::anyhow!("LLM request timed out after {:?}", self.timeout))??;
        if reply.is_empty() {
            anyhow::bail!("LLM returned an empty reply");
        }
        Ok(reply)
    }
}

/// Ordered keyword families for the rule-based fallback. First family with a
/// hit wins; the chosen template depends on the relevant trait level.
/// Keywords are whole-word token sequences ("emi" does not fire inside
/// "premium", "ad" not inside "already"); inflected forms listed explicitly.
struct TopicRule {
    keywords: &'static [&'static str],
    level: fn(&Persona) -> TraitLevel,
    high: &'static str,
    medium: &'static str,
    low: &'static str,
}

const TOPIC_RULES: &[TopicRule] = &[
    TopicRule {
        keywords: &[
            "price", "prices", "pricing", "cost", "costs", "costly", "expensive",
            "cheap", "afford", "affordable", "discount", "discounts", "offer", "offers",
        ],
        level: |p| p.traits.price_sensitivity,
        high: "Honestly, price is the first thing I check. Unless it clearly beats what I \
               already use on cost, I will keep scrolling past it.",
        medium: "I do compare prices, but I am willing to pay a bit more if the quality is \
                 obviously better. Show me the difference and I will consider it.",
        low: "Price is not really my worry. If it is good, I will buy it; I would rather \
              pay more once than regret a cheap purchase.",
    },
    TopicRule {
        keywords: &[
            "quality", "durable", "durability", "reliable", "reliability",
            "warranty", "service", "services",
        ],
        level: |p| p.traits.brand_awareness,
        high: "I stick to brands I know because their service centers actually respond. A \
               new name needs serious reviews before I trust it.",
        medium: "Quality matters to me, but I judge it from reviews and from people I know \
                 rather than the brand name alone.",
        low: "I do not care much whose logo is on it. If it works and lasts, that is \
              quality enough for me.",
    },
    TopicRule {
        keywords: &["privacy", "data", "tracking", "permission", "permissions", "personal"],
        level: |p| p.traits.privacy_concern,
        high: "This matters a lot to me. The moment an app asks for contacts or location \
               without a reason, I uninstall it. Be upfront about what you collect.",
        medium: "I read the permissions once, and as long as nothing looks strange I go \
                 ahead. Just do not sell my number to telemarketers.",
        low: "I do not think about it much, honestly. Everyone has my data already; I care \
              more about whether the product is useful.",
    },
    TopicRule {
        keywords: &[
            "app", "apps", "feature", "features", "tech", "technology", "smart",
            "smartphone", "smartphones", "device", "devices", "online", "digital",
        ],
        level: |p| p.traits.tech_affinity,
        high: "I will try any new app the day it launches. If the experience is smooth I \
               end up recommending it to my whole circle.",
        medium: "I use the usual apps daily, but I need a clear reason to add another one. \
                 Make the first five minutes simple.",
        low: "I keep things basic. If it needs a long setup or constant updates, it is not \
              for me; my family helps me with most of these things.",
    },
    TopicRule {
        keywords: &[
            "emi", "installment", "installments", "instalment", "instalments",
            "loan", "loans", "pay later",
        ],
        level: |p| p.traits.price_sensitivity,
        high: "EMI is how I buy anything big. A no-cost EMI option genuinely changes my \
               decision; a lump sum usually ends it.",
        medium: "I have used EMI for bigger purchases. It helps, though I check the total \
                 cost carefully before agreeing.",
        low: "I usually just pay upfront. EMI feels like carrying a purchase around for a \
              year; I would rather wait and buy once.",
    },
    TopicRule {
        keywords: &[
            "ad", "ads", "advert", "adverts", "advertisement", "advertisements",
            "advertising", "instagram", "youtube", "social", "influencer",
            "influencers", "media",
        ],
        level: |p| p.traits.brand_awareness,
        high: "I notice ads from brands I follow, but an influencer pushing something \
               random does nothing for me. Authentic reviews work better.",
        medium: "I mostly skip ads, but a genuinely funny or useful one will make me look \
                 the product up later.",
        low: "Ads wash over me. I ask people around me before buying; that beats any \
              campaign.",
    },
];

fn rule_based_reply(persona: &Persona, message: &str) -> String {
    let tokens = goal::tokenize(message);
    for rule in TOPIC_RULES {
        if rule.keywords.iter().any(|kw| goal::keyword_matches(&tokens, kw)) {
            let template = match (rule.level)(persona) {
                TraitLevel::High => rule.high,
                TraitLevel::Medium => rule.medium,
                TraitLevel::Low => rule.low,
            };
            return template.to_string();
        }
    }
    format!(
        "That is an interesting question. Speaking as a {} from a {} city, what would \
         really convince me is something that fits my day-to-day. Could you tell me more \
         about what you have in mind?",
        persona.occupation, persona.city_tier
    )
}

/// Routes chat messages through the backend chain and maintains transcripts.
pub struct ConversationEngine {
    backend: Option<Box<dyn GenerativeBackend>>,
}

impl ConversationEngine {
    pub fn rule_based_only() -> Self {
        Self { backend: None }
    }

    pub fn with_backend(backend: Box<dyn GenerativeBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Produce a reply and append the (user, persona) pair to `history`.
    /// The transcript grows by exactly two turns per call.
    pub async fn respond(
        &self,
        persona: &Persona,
        goal: &str,
        history: &mut Vec<ChatTurn>,
        message: &str,
    ) -> ChatReply {
        let reply = match &self.backend {
            Some(backend) => match backend.reply(persona, goal, history, message).await {
                Ok(text) => ChatReply {
                    text,
                    source: ReplySource::Generative,
                },
                Err(e) => {
                    tracing::warn!(
                        "Generative backend failed for {} ({}); using rule-based reply",
                        persona.id,
                        e
                    );
                    ChatReply {
                        text: rule_based_reply(persona, message),
                        source: ReplySource::RuleBased,
                    }
                }
            },
            None => ChatReply {
                text: rule_based_reply(persona, message),
                source: ReplySource::RuleBased,
            },
        };

        history.push(ChatTurn {
            role: TurnRole::User,
            content: message.to_string(),
        });
        history.push(ChatTurn {
            role: TurnRole::Persona,
            content: reply.text.clone(),
        });
        reply
    }
}
