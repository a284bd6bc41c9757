// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Setup script configuration layout.
//!
//! Setup scripts are plain executable files written in whatever language
//! their author fancies. Dotctl learns how to run them from an optional
//! __manifest__: a TOML document embedded as front matter in comment lines,
//! fenced by a comment marker followed by `---`.
//!
//! ```text
//! #!/bin/sh
//! # ---
//! # name = "Brew cask packages"
//! # root = false
//! # [entry]
//! # returns = "none"
//! # ---
//! dotctl packages brew-cask cask.txt
//! ```
//!
//! The comment marker is one of `#`, `//`, `--`, or `;`, separated from the
//! fence by a single space. The opening fence, every manifest line, and the
//! closing fence share it. Only the leading comment header of a script is
//! searched, so fences further down, e.g., inside a heredoc, are plain code.
//!
//! # Entry Point Contract
//!
//! The entry point of a setup script is the script itself, invoked without
//! arguments, its result being nothing but an exit status. The `[entry]`
//! table describes the entry point, so dotctl can refuse scripts that expect
//! something else before running them. See [`EntryPoint::validate`].

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};

/// Fence line content following the comment marker.
pub const FENCE: &str = "---";

/// Line comment markers a manifest can be written with.
pub const COMMENT_MARKERS: [&str; 4] = ["#", "//", "--", ";"];

/// Setup script manifest layout.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct ScriptManifest {
    /// Banner title, file name of script by default.
    pub name: Option<String>,

    /// Keep root identity instead of demoting to invoker.
    pub root: bool,

    /// Print full error chain on failure.
    pub debug: bool,

    /// Contain failures as a controlled exit instead of propagating them.
    pub catch_errors: bool,

    /// Entry point description.
    pub entry: EntryPoint,
}

impl Default for ScriptManifest {
    fn default() -> Self {
        Self {
            name: None,
            root: false,
            debug: false,
            catch_errors: true,
            entry: EntryPoint::default(),
        }
    }
}

impl ScriptManifest {
    /// Extract manifest from front matter of script source.
    ///
    /// Scripts without front matter get the default manifest.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::MultipleManifests`] if source contains more
    ///   than one front matter block.
    /// - Return [`ConfigError::Unterminated`] if front matter never closes.
    /// - Return [`ConfigError::NotComment`] if a front matter line lacks the
    ///   comment marker of its fence.
    /// - Return [`ConfigError::Deserialize`] if front matter is not a valid
    ///   manifest.
    pub fn from_source(source: &str) -> Result<Self> {
        match front_matter(source)? {
            Some(manifest) => manifest.parse(),
            None => Ok(Self::default()),
        }
    }
}

impl FromStr for ScriptManifest {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

/// Entry point layout.
///
/// Describes parameters, suspension, and result of the entry point of a
/// setup script.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EntryPoint {
    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Param>,

    /// Entry point takes a variable number of arguments.
    #[serde(default)]
    pub variadic: bool,

    /// Parameters that can only be passed by name.
    #[serde(default)]
    pub keyword_only: Vec<Param>,

    /// Entry point suspends instead of running to completion.
    #[serde(default, rename = "async")]
    pub is_async: bool,

    /// Declared result, should be "none".
    pub returns: Option<String>,
}

impl Default for EntryPoint {
    /// Implied entry point of scripts without an `[entry]` table.
    fn default() -> Self {
        Self {
            params: Vec::new(),
            variadic: false,
            keyword_only: Vec::new(),
            is_async: false,
            returns: Some("none".into()),
        }
    }
}

impl EntryPoint {
    /// Check entry point against the contract of setup scripts.
    ///
    /// Return warnings for deviations that still allow running the script.
    ///
    /// # Errors
    ///
    /// - Return [`EntryError`] for the first deviation that makes the script
    ///   impossible to run without arguments.
    pub fn validate(&self) -> Result<Vec<EntryWarning>, EntryError> {
        if self.is_async {
            return Err(EntryError::Async);
        }

        if let Some(param) = self.params.iter().find(|param| param.default.is_none()) {
            return Err(EntryError::RequiredParam {
                name: param.name.clone(),
            });
        }

        if self.variadic {
            return Err(EntryError::Variadic);
        }

        if let Some(param) = self.keyword_only.first() {
            return Err(EntryError::KeywordOnly {
                name: param.name.clone(),
            });
        }

        let mut warnings = Vec::new();
        if !self.params.is_empty() {
            warnings.push(EntryWarning::OptionalParams {
                count: self.params.len(),
            });
        }

        match self.returns.as_deref().map(str::trim) {
            None => warnings.push(EntryWarning::NoReturns),
            Some("none" | "()") => {}
            Some(returns) => warnings.push(EntryWarning::Returns {
                returns: returns.to_owned(),
            }),
        }

        Ok(warnings)
    }
}

/// Entry point parameter layout.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Param {
    /// Parameter name.
    pub name: String,

    /// Default value, parameter is required without one.
    pub default: Option<String>,
}

/// Entry point deviations that still allow running the script.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum EntryWarning {
    /// Only optional parameters are declared.
    OptionalParams { count: usize },

    /// Result is not declared at all.
    NoReturns,

    /// Result is declared as something other than nothing.
    Returns { returns: String },
}

impl Display for EntryWarning {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::OptionalParams { count } => {
                write!(fmt, "entry point should not have arguments, found {count}")
            }
            Self::NoReturns => fmt.write_str("entry point has no return type defined"),
            Self::Returns { returns } => {
                write!(fmt, "entry point should return none, not {returns:?}")
            }
        }
    }
}

/// Entry point deviations that make a script impossible to run.
#[derive(Debug, PartialEq, Eq, Clone, thiserror::Error)]
pub enum EntryError {
    #[error("entry point requires argument {name:?}")]
    RequiredParam { name: String },

    #[error("entry point expects variable arguments")]
    Variadic,

    #[error("entry point expects keyword-only argument {name:?}")]
    KeywordOnly { name: String },

    #[error("async entry point is not allowed")]
    Async,
}

fn front_matter(source: &str) -> Result<Option<String>> {
    let mut blocks = Vec::new();
    let mut open: Option<(&str, String)> = None;

    for (index, line) in source.lines().enumerate() {
        let line = line.trim();
        match open.take() {
            None => {
                if let Some(marker) = fence_marker(line) {
                    open = Some((marker, String::new()));
                } else if !line.is_empty() && comment_marker(line).is_none() {
                    // INVARIANT: Manifest lives in leading comment header only.
                    break;
                }
            }
            Some((marker, body)) if fence_marker(line) == Some(marker) => blocks.push(body),
            Some((marker, mut body)) => {
                let content = line
                    .strip_prefix(marker)
                    .ok_or(ConfigError::NotComment { line: index + 1 })?;
                body.push_str(content.strip_prefix(' ').unwrap_or(content));
                body.push('\n');
                open = Some((marker, body));
            }
        }
    }

    if open.is_some() {
        return Err(ConfigError::Unterminated);
    }

    match blocks.len() {
        0 => Ok(None),
        1 => Ok(blocks.pop()),
        count => Err(ConfigError::MultipleManifests { count }),
    }
}

fn comment_marker(line: &str) -> Option<&'static str> {
    COMMENT_MARKERS
        .into_iter()
        .find(|marker| line.starts_with(marker))
}

fn fence_marker(line: &str) -> Option<&'static str> {
    let (marker, fence) = line.split_once(' ')?;
    COMMENT_MARKERS
        .into_iter()
        .find(|known| *known == marker && fence.trim() == FENCE)
}

/// Configuration error types.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize manifest.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Source contains more than one manifest.
    #[error("found {count} manifests, expected at most one")]
    MultipleManifests { count: usize },

    /// Manifest is never closed by a fence.
    #[error("manifest is missing its closing fence")]
    Unterminated,

    /// Manifest line is not commented out.
    #[error("manifest line {line} is not a comment")]
    NotComment { line: usize },

    /// Entry point violates contract.
    #[error(transparent)]
    Entry(#[from] EntryError),
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test]
    fn deserialize_manifest_from_front_matter() -> anyhow::Result<()> {
        let source = indoc! {r#"
            #!/bin/sh
            # ---
            # name = "Brew cask packages"
            # root = true
            # catch-errors = false
            # [entry]
            # params = [{ name = "verbose", default = "0" }]
            # returns = "()"
            # ---
            dotctl packages brew-cask cask.txt
        "#};

        let expect = ScriptManifest {
            name: Some("Brew cask packages".into()),
            root: true,
            debug: false,
            catch_errors: false,
            entry: EntryPoint {
                params: vec![Param {
                    name: "verbose".into(),
                    default: Some("0".into()),
                }],
                variadic: false,
                keyword_only: Vec::new(),
                is_async: false,
                returns: Some("()".into()),
            },
        };
        assert_eq!(ScriptManifest::from_source(source)?, expect);

        Ok(())
    }

    #[test]
    fn other_comment_markers() -> anyhow::Result<()> {
        let source = indoc! {r#"
            -- ---
            -- name = "Lua settings"
            -- ---
            print("hi")
        "#};
        let manifest = ScriptManifest::from_source(source)?;
        assert_eq!(manifest.name.as_deref(), Some("Lua settings"));
        assert!(manifest.catch_errors);

        Ok(())
    }

    #[test]
    fn missing_front_matter_uses_default() -> anyhow::Result<()> {
        let manifest = ScriptManifest::from_source("#!/bin/sh\necho ---\n")?;
        assert_eq!(manifest, ScriptManifest::default());
        assert_eq!(manifest.entry.validate()?, Vec::new());

        Ok(())
    }

    #[test_case("#!/bin/sh\n# setup\n#----------\necho hi\n"; "decorative separator")]
    #[test_case("#!/bin/sh\n----\necho hi\n"; "bare dashes")]
    #[test_case("#!/bin/sh\ncat <<EOF\n# ---\nEOF\n"; "fence in heredoc")]
    #[test_case("#!/bin/sh\necho hi\n# ---\n# root = true\n# ---\n"; "fence after code")]
    #[test]
    fn fence_lookalikes_use_default(source: &str) {
        pretty_assertions::assert_eq!(
            ScriptManifest::from_source(source).ok(),
            Some(ScriptManifest::default())
        );
    }

    #[test]
    fn manifest_after_header_comments() -> anyhow::Result<()> {
        let source = indoc! {r#"
            #!/bin/sh
            #----------
            # Install casks.

            # ---
            # root = true
            # ---
            brew bundle
        "#};
        assert!(ScriptManifest::from_source(source)?.root);

        Ok(())
    }

    #[test]
    fn reject_multiple_manifests() {
        let source = indoc! {"
            # ---
            # root = true
            # ---
            # ---
            # root = false
            # ---
        "};
        assert!(matches!(
            ScriptManifest::from_source(source),
            Err(ConfigError::MultipleManifests { count: 2 })
        ));
    }

    #[test]
    fn reject_unterminated_manifest() {
        let source = "# ---\n# root = true\n";
        assert!(matches!(
            ScriptManifest::from_source(source),
            Err(ConfigError::Unterminated)
        ));
    }

    #[test]
    fn reject_uncommented_manifest_line() {
        let source = "# ---\nroot = true\n# ---\n";
        assert!(matches!(
            ScriptManifest::from_source(source),
            Err(ConfigError::NotComment { line: 2 })
        ));
    }

    #[test]
    fn reject_unknown_fields() {
        assert!(matches!(
            "rooot = true".parse::<ScriptManifest>(),
            Err(ConfigError::Deserialize(_))
        ));
    }

    #[test]
    fn required_param_is_fatal() -> anyhow::Result<()> {
        let manifest: ScriptManifest = indoc! {r#"
            [entry]
            params = [{ name = "target" }]
            returns = "none"
        "#}
        .parse()?;
        assert_eq!(
            manifest.entry.validate(),
            Err(EntryError::RequiredParam {
                name: "target".into()
            })
        );

        Ok(())
    }

    #[test]
    fn variadic_keyword_only_and_async_are_fatal() -> anyhow::Result<()> {
        let variadic: ScriptManifest = "entry = { variadic = true }".parse()?;
        assert_eq!(variadic.entry.validate(), Err(EntryError::Variadic));

        let keyword: ScriptManifest =
            r#"entry = { keyword-only = [{ name = "force", default = "no" }] }"#.parse()?;
        assert_eq!(
            keyword.entry.validate(),
            Err(EntryError::KeywordOnly {
                name: "force".into()
            })
        );

        let suspending: ScriptManifest = "entry = { async = true }".parse()?;
        assert_eq!(suspending.entry.validate(), Err(EntryError::Async));

        Ok(())
    }

    #[test]
    fn optional_params_and_returns_only_warn() -> anyhow::Result<()> {
        let manifest: ScriptManifest = indoc! {r#"
            [entry]
            params = [{ name = "verbose", default = "0" }]
        "#}
        .parse()?;
        assert_eq!(
            manifest.entry.validate()?,
            vec![EntryWarning::OptionalParams { count: 1 }, EntryWarning::NoReturns]
        );

        let manifest: ScriptManifest = "entry = { returns = \"int\" }".parse()?;
        assert_eq!(
            manifest.entry.validate()?,
            vec![EntryWarning::Returns {
                returns: "int".into()
            }]
        );

        Ok(())
    }
}
