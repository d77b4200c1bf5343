//! AI responder with primary/fallback policy
//!
//! The responder sends one rendered prompt to the primary model and, if that
//! fails and a fallback is enabled, exactly once to the fallback model. It does
//! not know which use case produced the prompt.

use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use super::chat_models::ChatModel;

/// Errors from prompt rendering or the model calls
#[derive(Debug, Error)]
pub enum AiServiceError {
    /// A `{placeholder}` in the template had no value
    #[error("Missing prompt variable: {0}")]
    MissingVariable(String),

    /// Terminal failure after the primary (and fallback, if tried) failed
    #[error("{}", describe_failure(.primary_cause, .fallback_cause))]
    Failure {
        primary_cause: String,
        fallback_cause: Option<String>,
    },
}

fn describe_failure(primary_cause: &str, fallback_cause: &Option<String>) -> String {
    match fallback_cause {
        Some(fallback_cause) => format!(
            "Both primary and fallback AI models failed (primary: {}; fallback: {})",
            primary_cause, fallback_cause
        ),
        None => format!("AI model failed and no fallback configured: {}", primary_cause),
    }
}

/// Prompt text with `{name}` placeholders
///
/// Braces that do not enclose an identifier are copied through unchanged.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    text: &'static str,
}

impl PromptTemplate {
    pub const fn new(text: &'static str) -> Self {
        Self { text }
    }

    /// Substitute every placeholder; all of them must have a value
    pub fn render(&self, vars: &HashMap<&str, String>) -> Result<String, AiServiceError> {
        let mut out = String::with_capacity(self.text.len());
        let mut rest = self.text;

        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];

            match after.find('}') {
                Some(close) if is_placeholder_name(&after[..close]) => {
                    let name = &after[..close];
                    let value = vars
                        .get(name)
                        .ok_or_else(|| AiServiceError::MissingVariable(name.to_string()))?;
                    out.push_str(value);
                    rest = &after[close + 1..];
                }
                _ => {
                    out.push('{');
                    rest = after;
                }
            }
        }

        out.push_str(rest);
        Ok(out)
    }
}

fn is_placeholder_name(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

const CONVERSATION_TEMPLATE: PromptTemplate = PromptTemplate::new(
    "You are a patient language tutor.\n\
     \n\
     Lesson context: {context}\n\
     Language being learned: {language}\n\
     Learner's message: {message}\n\
     \n\
     Reply naturally in the language being learned, at the learner's level. \
     Correct mistakes where needed and encourage the learner.",
);

const VOICE_FEEDBACK_TEMPLATE: PromptTemplate = PromptTemplate::new(
    "Pronunciation review:\n\
     - Expected text: {expected_text}\n\
     - Transcribed text: {transcribed_text}\n\
     - Confidence score: {confidence_score}\n\
     \n\
     Give short, constructive feedback on the learner's pronunciation. \
     Be encouraging and give concrete advice.",
);

const LESSON_CONTENT_TEMPLATE: PromptTemplate = PromptTemplate::new(
    "Write the content of a language lesson.\n\
     \n\
     Topic: {topic}\n\
     Difficulty: {difficulty}\n\
     Target language: {language}\n\
     \n\
     Include:\n\
     1. A realistic situation\n\
     2. 5-8 vocabulary words with definitions\n\
     3. 3-5 practice exercises\n\
     4. A short dialogue using the vocabulary\n\
     \n\
     Answer as structured JSON.",
);

/// Primary model plus an optional single fallback
#[derive(Clone)]
pub struct AiResponder {
    primary: Arc<dyn ChatModel>,
    fallback: Option<Arc<dyn ChatModel>>,
    enable_fallback: bool,
}

impl AiResponder {
    pub fn new(
        primary: Arc<dyn ChatModel>,
        fallback: Option<Arc<dyn ChatModel>>,
        enable_fallback: bool,
    ) -> Self {
        Self {
            primary,
            fallback,
            enable_fallback,
        }
    }

    pub fn primary_name(&self) -> &str {
        self.primary.name()
    }

    /// Fallback model name, if one will actually be tried
    pub fn fallback_name(&self) -> Option<&str> {
        self.active_fallback().map(|m| m.name())
    }

    fn active_fallback(&self) -> Option<&Arc<dyn ChatModel>> {
        self.fallback.as_ref().filter(|_| self.enable_fallback)
    }

    /// Complete `prompt`, trying the fallback once if the primary fails
    ///
    /// Makes at most two model calls. The completion is returned unmodified.
    pub async fn respond(&self, prompt: &str) -> Result<String, AiServiceError> {
        tracing::debug!(model = self.primary.name(), "Calling primary AI model");

        let primary_err = match self.primary.complete(prompt).await {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };
        let primary_cause = format!("{}: {}", self.primary.name(), primary_err);
        tracing::warn!(cause = %primary_cause, "Primary AI model failed");

        let Some(fallback) = self.active_fallback() else {
            return Err(AiServiceError::Failure {
                primary_cause,
                fallback_cause: None,
            });
        };

        tracing::debug!(model = fallback.name(), "Calling fallback AI model");
        match fallback.complete(prompt).await {
            Ok(text) => Ok(text),
            Err(e) => {
                let fallback_cause = format!("{}: {}", fallback.name(), e);
                tracing::error!(cause = %fallback_cause, "Fallback AI model also failed");
                Err(AiServiceError::Failure {
                    primary_cause,
                    fallback_cause: Some(fallback_cause),
                })
            }
        }
    }

    async fn respond_with(
        &self,
        template: &PromptTemplate,
        vars: HashMap<&str, String>,
    ) -> Result<String, AiServiceError> {
        let prompt = template.render(&vars)?;
        self.respond(&prompt).await
    }

    /// Tutor reply to a learner's chat message
    pub async fn conversation_reply(
        &self,
        message: &str,
        context: &str,
        language: &str,
    ) -> Result<String, AiServiceError> {
        let vars = HashMap::from([
            ("message", message.to_string()),
            ("context", context.to_string()),
            ("language", language.to_string()),
        ]);
        self.respond_with(&CONVERSATION_TEMPLATE, vars).await
    }

    /// Pronunciation feedback for a scored voice session
    pub async fn voice_feedback(
        &self,
        transcribed_text: &str,
        expected_text: &str,
        confidence_score: f64,
    ) -> Result<String, AiServiceError> {
        let vars = HashMap::from([
            ("transcribed_text", transcribed_text.to_string()),
            ("expected_text", expected_text.to_string()),
            ("confidence_score", confidence_score.to_string()),
        ]);
        self.respond_with(&VOICE_FEEDBACK_TEMPLATE, vars).await
    }

    /// Generated lesson material
    pub async fn lesson_content(
        &self,
        topic: &str,
        difficulty: &str,
        language: &str,
    ) -> Result<String, AiServiceError> {
        let vars = HashMap::from([
            ("topic", topic.to_string()),
            ("difficulty", difficulty.to_string()),
            ("language", language.to_string()),
        ]);
        self.respond_with(&LESSON_CONTENT_TEMPLATE, vars).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::chat_models::ChatModelError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedModel {
        name: &'static str,
        reply: Option<&'static str>,
        calls: AtomicUsize,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedModel {
        fn ok(name: &'static str, reply: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: Some(reply),
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                reply: None,
                calls: AtomicUsize::new(0),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ChatModel for ScriptedModel {
        fn name(&self) -> &str {
            self.name
        }

        async fn complete(&self, prompt: &str) -> Result<String, ChatModelError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(prompt.to_string());
            match self.reply {
                Some(reply) => Ok(reply.to_string()),
                None => Err(ChatModelError::Network(format!("{} unreachable", self.name))),
            }
        }
    }

    #[test]
    fn test_render_substitutes_all_placeholders() {
        let template = PromptTemplate::new("Say {word} in {language}, {word}!");
        let vars = HashMap::from([("word", "hello".to_string()), ("language", "fr".to_string())]);
        assert_eq!(template.render(&vars).unwrap(), "Say hello in fr, hello!");
    }

    #[test]
    fn test_render_missing_variable_is_error() {
        let template = PromptTemplate::new("Expected {expected_text}");
        let err = template.render(&HashMap::new()).unwrap_err();
        assert!(matches!(err, AiServiceError::MissingVariable(name) if name == "expected_text"));
    }

    #[test]
    fn test_render_leaves_non_placeholder_braces() {
        let template = PromptTemplate::new(r#"Return {"ok": true} for {x} or { }"#);
        let vars = HashMap::from([("x", "1".to_string())]);
        assert_eq!(template.render(&vars).unwrap(), r#"Return {"ok": true} for 1 or { }"#);
    }

    #[tokio::test]
    async fn test_primary_success_skips_fallback() {
        let primary = ScriptedModel::ok("primary", "from primary");
        let fallback = ScriptedModel::ok("fallback", "from fallback");
        let responder = AiResponder::new(primary.clone(), Some(fallback.clone() as Arc<dyn ChatModel>), true);

        assert_eq!(responder.respond("hi").await.unwrap(), "from primary");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 0);
    }

    #[tokio::test]
    async fn test_fallback_used_once_after_primary_failure() {
        let primary = ScriptedModel::failing("primary");
        let fallback = ScriptedModel::ok("fallback", "  from fallback\n");
        let responder = AiResponder::new(primary.clone(), Some(fallback.clone() as Arc<dyn ChatModel>), true);

        // output is passed through untouched
        assert_eq!(responder.respond("hi").await.unwrap(), "  from fallback\n");
        assert_eq!(primary.calls(), 1);
        assert_eq!(fallback.calls(), 1);
        assert_eq!(fallback.prompts.lock().unwrap()[0], "hi");
    }

    #[tokio::test]
    async fn test_both_failing_names_both_causes() {
        let primary = ScriptedModel::failing("primary");
        let fallback = ScriptedModel::failing("fallback");
        let responder = AiResponder::new(primary.clone(), Some(fallback.clone() as Arc<dyn ChatModel>), true);

        let err = responder.respond("hi").await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("primary unreachable"));
        assert!(message.contains("fallback unreachable"));
        assert_eq!(primary.calls() + fallback.calls(), 2);
    }

    #[tokio::test]
    async fn test_disabled_fallback_is_never_called() {
        let primary = ScriptedModel::failing("primary");
        let fallback = ScriptedModel::ok("fallback", "unused");
        let responder = AiResponder::new(primary.clone(), Some(fallback.clone() as Arc<dyn ChatModel>), false);

        let err = responder.respond("hi").await.unwrap_err();
        match err {
            AiServiceError::Failure {
                primary_cause,
                fallback_cause,
            } => {
                assert!(primary_cause.contains("primary unreachable"));
                assert!(fallback_cause.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(fallback.calls(), 0);
        assert!(responder.fallback_name().is_none());
    }

    #[tokio::test]
    async fn test_no_fallback_configured() {
        let primary = ScriptedModel::failing("primary");
        let responder = AiResponder::new(primary.clone(), None, true);

        let err = responder.respond("hi").await.unwrap_err();
        assert!(err.to_string().contains("no fallback configured"));
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn test_use_cases_render_their_inputs() {
        let primary = ScriptedModel::ok("primary", "ok");
        let responder = AiResponder::new(primary.clone(), None, true);

        responder.voice_feedback("bonjur", "bonjour", 0.55).await.unwrap();
        responder.conversation_reply("Salut", "At the bakery", "fr").await.unwrap();
        responder.lesson_content("Travel", "beginner", "es").await.unwrap();

        let prompts = primary.prompts.lock().unwrap();
        assert!(prompts[0].contains("bonjur") && prompts[0].contains("0.55"));
        assert!(prompts[1].contains("At the bakery") && prompts[1].contains("Salut"));
        assert!(prompts[2].contains("Travel") && prompts[2].contains("beginner"));
        assert!(prompts.iter().all(|p| !p.contains('{')));
    }
}
