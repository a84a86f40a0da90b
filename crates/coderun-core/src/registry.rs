//! Static table of supported languages and how to run each one.
//!
//! The registry is built once at startup and only read afterwards, so it is
//! shared between requests as a plain `Arc<LanguageRegistry>` without locking.

use serde::Serialize;
use std::collections::HashMap;

use crate::config::LanguageConfig;

/// Placeholder in a command template replaced by the source file name.
pub const FILE_PLACEHOLDER: &str = "{file}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageInfo {
    pub name: String,
    pub image: String,
    pub extension: String,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageProfile {
    pub image: String,
    pub file_extension: String,
    pub command: Vec<String>,
}

impl LanguageProfile {
    pub fn new(image: &str, file_extension: &str, command: &[&str]) -> Self {
        Self {
            image: image.to_string(),
            file_extension: file_extension.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Render the command template for a source file inside the unit's
    /// working directory.
    pub fn command_for(&self, file_name: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|arg| arg.replace(FILE_PLACEHOLDER, file_name))
            .collect()
    }
}

impl From<&LanguageConfig> for LanguageProfile {
    fn from(config: &LanguageConfig) -> Self {
        Self {
            image: config.image.clone(),
            file_extension: config.extension.clone(),
            command: config.command.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: HashMap<String, LanguageProfile>,
    aliases: HashMap<String, String>,
}

impl LanguageRegistry {
    /// The languages supported out of the box.
    pub fn builtin() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(
            "javascript".to_string(),
            LanguageProfile::new("node:18-slim", "js", &["node", FILE_PLACEHOLDER]),
        );
        profiles.insert(
            "python".to_string(),
            LanguageProfile::new("python:3.9-slim", "py", &["python", FILE_PLACEHOLDER]),
        );
        Self {
            profiles,
            aliases: HashMap::new(),
        }
    }

    /// Build the registry from the `languages` config section, falling back to
    /// the built-in table when the section is absent.
    pub fn from_config(languages: Option<&HashMap<String, LanguageConfig>>) -> Self {
        let Some(languages) = languages else {
            return Self::builtin();
        };

        let mut profiles = HashMap::new();
        let mut aliases = HashMap::new();
        for (name, language) in languages {
            profiles.insert(name.clone(), LanguageProfile::from(language));
            for alias in &language.aliases {
                aliases.insert(alias.clone(), name.clone());
            }
        }
        Self { profiles, aliases }
    }

    pub fn lookup(&self, language: &str) -> Option<&LanguageProfile> {
        self.profiles.get(language).or_else(|| {
            self.aliases
                .get(language)
                .and_then(|canonical| self.profiles.get(canonical))
        })
    }

    /// Registered language keys, sorted.
    pub fn languages(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.profiles.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Aliases that resolve to `language`, sorted.
    pub fn aliases_of(&self, language: &str) -> Vec<&str> {
        let mut aliases: Vec<&str> = self
            .aliases
            .iter()
            .filter(|(_, canonical)| canonical.as_str() == language)
            .map(|(alias, _)| alias.as_str())
            .collect();
        aliases.sort_unstable();
        aliases
    }

    /// Public description of every registered language, sorted by name.
    pub fn describe(&self) -> Vec<LanguageInfo> {
        self.languages()
            .into_iter()
            .filter_map(|name| {
                let profile = self.profiles.get(name)?;
                Some(LanguageInfo {
                    name: name.to_string(),
                    image: profile.image.clone(),
                    extension: profile.file_extension.clone(),
                    aliases: self.aliases_of(name).into_iter().map(str::to_string).collect(),
                })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_languages() {
        let registry = LanguageRegistry::builtin();
        assert_eq!(registry.languages(), vec!["javascript", "python"]);

        let js = registry.lookup("javascript").unwrap();
        assert_eq!(js.image, "node:18-slim");
        assert_eq!(js.file_extension, "js");
        assert_eq!(js.command_for("code.js"), vec!["node", "code.js"]);

        let py = registry.lookup("python").unwrap();
        assert_eq!(py.image, "python:3.9-slim");
        assert_eq!(py.command_for("code.py"), vec!["python", "code.py"]);
    }

    #[test]
    fn unknown_language_is_not_found() {
        let registry = LanguageRegistry::builtin();
        assert!(registry.lookup("ruby").is_none());
        assert!(registry.lookup("").is_none());
        assert!(registry.lookup("Python").is_none());
    }

    #[test]
    fn placeholder_inside_argument() {
        let profile = LanguageProfile::new(
            "gcc:13",
            "c",
            &["sh", "-c", "gcc {file} -o main && ./main"],
        );
        assert_eq!(
            profile.command_for("code.c"),
            vec!["sh", "-c", "gcc code.c -o main && ./main"]
        );
    }

    #[test]
    fn config_table_replaces_builtin_and_resolves_aliases() {
        let mut languages = HashMap::new();
        languages.insert(
            "go".to_string(),
            LanguageConfig {
                image: "golang:1.22-alpine".to_string(),
                extension: "go".to_string(),
                command: vec!["go".to_string(), "run".to_string(), "{file}".to_string()],
                aliases: vec!["golang".to_string()],
            },
        );

        let registry = LanguageRegistry::from_config(Some(&languages));
        assert_eq!(registry.len(), 1);
        assert!(registry.lookup("python").is_none());
        assert_eq!(registry.lookup("golang"), registry.lookup("go"));
        assert_eq!(registry.aliases_of("go"), vec!["golang"]);
    }

    #[test]
    fn missing_config_section_uses_builtin() {
        let registry = LanguageRegistry::from_config(None);
        assert!(registry.lookup("javascript").is_some());
        assert!(registry.lookup("python").is_some());
    }

    #[test]
    fn describe_lists_languages_with_aliases() {
        let mut languages = HashMap::new();
        for (name, image, ext, aliases) in [
            ("python", "python:3.9-slim", "py", vec!["py", "python3"]),
            ("javascript", "node:18-slim", "js", vec![]),
        ] {
            languages.insert(
                name.to_string(),
                LanguageConfig {
                    image: image.to_string(),
                    extension: ext.to_string(),
                    command: vec![ext.to_string(), "{file}".to_string()],
                    aliases: aliases.into_iter().map(str::to_string).collect(),
                },
            );
        }

        let info = LanguageRegistry::from_config(Some(&languages)).describe();
        assert_eq!(info.len(), 2);
        assert_eq!(info[0].name, "javascript");
        assert!(info[0].aliases.is_empty());
        assert_eq!(info[1].name, "python");
        assert_eq!(info[1].aliases, vec!["py", "python3"]);
    }
}
