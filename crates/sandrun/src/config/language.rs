use serde::{Deserialize, Deserializer, Serialize, de};

use crate::config::ConfigError;
use crate::types::ResourceLimits;

const INVALID_FILE_EXT_CHARS: [char; 2] = ['/', '.'];

/// Binary name used by native toolchains when none is configured
pub const DEFAULT_BINARY_NAME: &str = "main";

/// Configuration for a programming language
#[derive(Debug, Clone, Deserialize)]
#[serde(try_from = "LanguageEntry")]
pub struct LanguageSpec {
    /// Lowercase registry key (e.g., "python", "cpp"), filled in when the
    /// configuration is finalized
    pub id: String,

    /// Human-readable name for the language (e.g., "C++ 17 (GCC)")
    pub name: String,

    /// Additional lowercase names resolving to this language
    pub aliases: Vec<String>,

    /// File extension
    pub extension: FileExtension,

    /// How the source is turned into a running program
    pub toolchain: Toolchain,

    /// Static screening rules
    pub policy: SecurityPolicy,

    /// Container image for the container backend
    pub image: Option<String>,

    /// Extra environment as `KEY=VALUE`; values may use `{workspace}` and `{memory_mb}`
    pub env: Vec<String>,

    /// Whether the memory ceiling is applied as an address space limit.
    ///
    /// Runtimes like V8 and the JVM reserve far more virtual memory than they
    /// use, so they receive the ceiling through `{memory_mb}` instead.
    pub address_space_limit: bool,

    /// Resource limits for execution (overrides defaults)
    pub run_limits: Option<ResourceLimits>,

    /// Resource limits for compilation (overrides execution limits)
    pub compile_limits: Option<ResourceLimits>,
}

impl LanguageSpec {
    /// Check if the language has a compile phase
    pub fn needs_compile(&self) -> bool {
        self.toolchain.needs_compile()
    }

    /// Compile command template, if the toolchain has one
    pub fn compile_command(&self) -> Option<&[String]> {
        match &self.toolchain {
            Toolchain::Interpreted { .. } => None,
            Toolchain::Native { compile, .. } | Toolchain::Jvm { compile, .. } => Some(compile),
        }
    }

    /// Run command template
    pub fn run_command(&self) -> &[String] {
        match &self.toolchain {
            Toolchain::Interpreted { run }
            | Toolchain::Native { run, .. }
            | Toolchain::Jvm { run, .. } => run,
        }
    }

    /// Expand placeholders in the given command
    pub fn expand_command(
        command: &[String],
        source: &str,
        binary: &str,
        memory_mb: u64,
    ) -> Vec<String> {
        let memory = memory_mb.to_string();
        command
            .iter()
            .map(|arg| {
                arg.replace("{source}", source)
                    .replace("{binary}", binary)
                    .replace("{memory_mb}", &memory)
            })
            .collect()
    }

    /// Expand the language environment for a workspace
    pub fn expand_env(&self, workspace: &str, memory_mb: u64) -> Vec<(String, String)> {
        let memory = memory_mb.to_string();
        self.env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .map(|(key, value)| {
                (
                    key.to_owned(),
                    value
                        .replace("{workspace}", workspace)
                        .replace("{memory_mb}", &memory),
                )
            })
            .collect()
    }

    /// Short description of the toolchain family
    pub fn kind(&self) -> &'static str {
        self.toolchain.kind()
    }
}

/// How source code becomes a running program
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Toolchain {
    /// The source file is handed to an interpreter
    Interpreted { run: Vec<String> },

    /// The source is compiled to a native binary, which is then executed
    Native {
        compile: Vec<String>,
        run: Vec<String>,
        #[serde(default = "default_binary_name")]
        binary: String,
    },

    /// The source is compiled to class files named after its public type
    Jvm {
        compile: Vec<String>,
        run: Vec<String>,
    },
}

impl Toolchain {
    pub fn needs_compile(&self) -> bool {
        match self {
            Toolchain::Interpreted { .. } => false,
            Toolchain::Native { .. } | Toolchain::Jvm { .. } => true,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Toolchain::Interpreted { .. } => "interpreted",
            Toolchain::Native { .. } => "native",
            Toolchain::Jvm { .. } => "jvm",
        }
    }
}

fn default_binary_name() -> String {
    DEFAULT_BINARY_NAME.to_owned()
}

/// Allow-list rule for a language's import syntax
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImportRule {
    /// Python style `import a` / `from a import b`, checked by root module
    Modules(Vec<String>),

    /// C style `#include <h>`, exact match
    Headers(Vec<String>),

    /// Java style `import a.b.C;`, allowed when equal to or inside a listed package
    Packages(Vec<String>),

    /// `require`/ES module specifiers, exact match
    Requires(Vec<String>),

    /// No import screening
    #[default]
    Unrestricted,
}

/// Deny-list rules applied regardless of imports
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DenyRule {
    /// Dangerous call substrings (e.g., "eval(")
    pub patterns: Vec<String>,

    /// Dangerous identifiers, matched as whole words
    pub globals: Vec<String>,
}

impl DenyRule {
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.globals.is_empty()
    }
}

/// Static screening rules for a language
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "PolicyEntry")]
pub struct SecurityPolicy {
    pub imports: ImportRule,
    pub deny: DenyRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ImportKind {
    Modules,
    Headers,
    Packages,
    Requires,
    #[default]
    Unrestricted,
}

/// Policy as written in configuration files
#[derive(Debug, Deserialize)]
struct PolicyEntry {
    #[serde(default)]
    imports: ImportKind,
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    deny_patterns: Vec<String>,
    #[serde(default)]
    deny_globals: Vec<String>,
}

impl TryFrom<PolicyEntry> for SecurityPolicy {
    type Error = ConfigError;

    fn try_from(entry: PolicyEntry) -> Result<Self, Self::Error> {
        if entry.deny_patterns.iter().any(|p| p.trim().is_empty())
            || entry.deny_globals.iter().any(|g| g.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "policy contains an empty deny entry".to_owned(),
            ));
        }

        let allow = entry.allow;
        let imports = match entry.imports {
            ImportKind::Modules => ImportRule::Modules(allow),
            ImportKind::Headers => ImportRule::Headers(allow),
            ImportKind::Packages => ImportRule::Packages(allow),
            ImportKind::Requires => ImportRule::Requires(allow),
            ImportKind::Unrestricted if allow.is_empty() => ImportRule::Unrestricted,
            ImportKind::Unrestricted => {
                return Err(ConfigError::Invalid(
                    "policy has an allow list but imports are unrestricted".to_owned(),
                ));
            }
        };

        Ok(Self {
            imports,
            deny: DenyRule {
                patterns: entry.deny_patterns,
                globals: entry.deny_globals,
            },
        })
    }
}

/// Language as written in configuration files
#[derive(Debug, Deserialize)]
struct LanguageEntry {
    name: String,
    #[serde(default)]
    aliases: Vec<String>,
    extension: FileExtension,
    toolchain: Toolchain,
    #[serde(default)]
    policy: SecurityPolicy,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    env: Vec<String>,
    #[serde(default = "default_address_space_limit")]
    address_space_limit: bool,
    #[serde(default)]
    run_limits: Option<ResourceLimits>,
    #[serde(default)]
    compile_limits: Option<ResourceLimits>,
}

fn default_address_space_limit() -> bool {
    true
}

impl TryFrom<LanguageEntry> for LanguageSpec {
    type Error = ConfigError;

    fn try_from(entry: LanguageEntry) -> Result<Self, Self::Error> {
        let name = entry.name;
        let invalid = |what: &str| ConfigError::Invalid(format!("language '{name}' {what}"));

        if name.trim().is_empty() {
            return Err(ConfigError::Invalid("language has empty name".to_owned()));
        }
        if entry.extension.is_empty() {
            return Err(invalid("has empty extension"));
        }

        match &entry.toolchain {
            Toolchain::Interpreted { run } => {
                if run.is_empty() {
                    return Err(invalid("has empty run command"));
                }
                if entry.compile_limits.is_some() {
                    return Err(invalid("sets compile limits but is not compiled"));
                }
            }
            Toolchain::Native {
                compile,
                run,
                binary,
            } => {
                if compile.is_empty() {
                    return Err(invalid("has empty compile command"));
                }
                if run.is_empty() {
                    return Err(invalid("has empty run command"));
                }
                if binary.is_empty() || binary.contains('/') {
                    return Err(invalid("has an invalid binary name"));
                }
            }
            Toolchain::Jvm { compile, run } => {
                if compile.is_empty() {
                    return Err(invalid("has empty compile command"));
                }
                if run.is_empty() {
                    return Err(invalid("has empty run command"));
                }
            }
        }

        for var in &entry.env {
            match var.split_once('=') {
                Some((key, _)) if !key.is_empty() => {}
                _ => return Err(invalid(&format!("has malformed env entry '{var}'"))),
            }
        }

        if entry.image.as_deref().is_some_and(|image| image.trim().is_empty()) {
            return Err(invalid("has empty image"));
        }

        let aliases = entry
            .aliases
            .iter()
            .map(|alias| alias.trim().to_lowercase())
            .collect::<Vec<_>>();
        if aliases.iter().any(String::is_empty) {
            return Err(invalid("has an empty alias"));
        }

        Ok(Self {
            id: String::new(),
            aliases,
            extension: entry.extension,
            toolchain: entry.toolchain,
            policy: entry.policy,
            image: entry.image,
            env: entry.env,
            address_space_limit: entry.address_space_limit,
            run_limits: entry.run_limits,
            compile_limits: entry.compile_limits,
            name,
        })
    }
}

/// File extension without dot (e.g., "cpp")
#[derive(Debug, Clone, Serialize)]
pub struct FileExtension(String);

impl FileExtension {
    pub fn new(extension: &str) -> Result<Self, ConfigError> {
        let contains_invalid = extension
            .chars()
            .any(|c| INVALID_FILE_EXT_CHARS.contains(&c));
        if contains_invalid {
            return Err(ConfigError::InvalidFileExtChars);
        }
        Ok(Self(extension.to_owned()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for FileExtension {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        FileExtension::new(&s).map_err(|_| {
            de::Error::invalid_value(
                de::Unexpected::Str(&s),
                &"a file extension without '/' or '.' characters",
            )
        })
    }
}

impl std::fmt::Display for FileExtension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[cfg(test)]
mod proptests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn file_extension_rejects_all_strings_with_slash(s in ".*/.*.") {
            prop_assert!(FileExtension::new(&s).is_err());
        }

        #[test]
        fn file_extension_rejects_all_strings_with_dot(s in ".*\\..*.") {
            prop_assert!(FileExtension::new(&s).is_err());
        }

        #[test]
        fn file_extension_accepts_alphanumeric(s in "[a-zA-Z0-9_-]+") {
            prop_assert!(FileExtension::new(&s).is_ok());
        }

        #[test]
        fn expand_command_preserves_args_without_placeholders(
            arg1 in "[a-z]+",
            arg2 in "[a-z]+",
            arg3 in "[a-z]+"
        ) {
            let cmd = vec![arg1.clone(), arg2.clone(), arg3.clone()];
            let result = LanguageSpec::expand_command(&cmd, "source.c", "binary", 64);
            prop_assert_eq!(result, cmd);
        }

        #[test]
        fn expand_command_length_preserved(cmd_len in 1usize..10) {
            let cmd: Vec<String> = (0..cmd_len).map(|i| format!("arg{i}")).collect();
            let result = LanguageSpec::expand_command(&cmd, "source", "binary", 64);
            prop_assert_eq!(result.len(), cmd_len);
        }
    }
}
