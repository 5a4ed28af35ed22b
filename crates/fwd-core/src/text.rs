use async_trait::async_trait;

use crate::{
    settings::{RewriteSettings, SubstitutionRule},
    Result,
};

/// Apply substitution rules in order. Later rules see the output of earlier ones.
pub fn apply_substitutions(text: &str, rules: &[SubstitutionRule]) -> String {
    rules
        .iter()
        .filter(|r| !r.from.is_empty())
        .fold(text.to_string(), |acc, r| acc.replace(&r.from, &r.to))
}

/// Text transforms applied to captions before they are re-sent.
#[async_trait]
pub trait TextProcessor: Send + Sync {
    /// Deterministic rule-based substitution. Total.
    fn substitute(&self, text: &str, rules: &[SubstitutionRule]) -> String {
        apply_substitutions(text, rules)
    }

    /// AI rewrite. Callers fall back to the input text on error.
    async fn rewrite(&self, text: &str, settings: &RewriteSettings) -> Result<String>;
}

/// Processor without an AI backend: rewriting is the identity.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubstitutionOnly;

#[async_trait]
impl TextProcessor for SubstitutionOnly {
    async fn rewrite(&self, text: &str, _settings: &RewriteSettings) -> Result<String> {
        Ok(text.to_string())
    }
}
