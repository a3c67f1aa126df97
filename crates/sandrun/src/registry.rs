//! Case-insensitive language lookup over a finalized [`Config`].

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{Config, LanguageSpec};
use crate::engine::EngineError;

/// Read-only map from language names and aliases to their specs
#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    languages: HashMap<String, Arc<LanguageSpec>>,
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    /// Build the registry from the languages of a configuration
    pub fn from_config(config: &Config) -> Self {
        let mut languages = HashMap::with_capacity(config.languages.len());
        let mut aliases = HashMap::new();

        for (id, spec) in &config.languages {
            let id = id.to_lowercase();
            for alias in &spec.aliases {
                aliases.insert(alias.to_lowercase(), id.clone());
            }
            languages.insert(id, Arc::new(spec.clone()));
        }

        Self { languages, aliases }
    }

    /// Resolve a language by id or alias, ignoring case and surrounding whitespace
    pub fn resolve(&self, name: &str) -> Result<Arc<LanguageSpec>, EngineError> {
        let key = name.trim().to_lowercase();
        let id = self.aliases.get(&key).unwrap_or(&key);
        self.languages
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::UnsupportedLanguage(name.trim().to_owned()))
    }

    /// Sorted list of language ids
    pub fn supported_languages(&self) -> Vec<String> {
        let mut ids: Vec<_> = self.languages.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Languages sorted by id
    pub fn iter(&self) -> impl Iterator<Item = &Arc<LanguageSpec>> {
        let mut specs: Vec<_> = self.languages.values().collect();
        specs.sort_by(|a, b| a.id.cmp(&b.id));
        specs.into_iter()
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }
}
