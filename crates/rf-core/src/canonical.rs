// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical identifiers for inputs, artifacts, and producers.
//!
//! Three kinds exist on the wire:
//!
//! - `Input:<Name>` or `Input:<Producer>.<Name>` — a root input, optionally
//!   scoped to one producer (config inputs, including the synthetic `.model`
//!   and `.provider` selectors).
//! - `Artifact:<Producer>.<Name>[dim=i][j]…` — one output instance; index
//!   selectors may be named (`[segment=2]`) or positional (`[2]`).
//! - `Producer:<Alias>[i][j]…` — one job instance; the same alias yields
//!   many jobs when dimensions expand.
//!
//! Nested producers embed their namespace path as extra dot-separated
//! segments (`Artifact:Act1.SceneProducer.Frame[scene=0]`).

use crate::ContractError;
use std::fmt;

/// Which family a canonical id belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    /// Root or producer-scoped input.
    Input,
    /// One artifact instance.
    Artifact,
    /// One job instance.
    Producer,
}

impl IdKind {
    fn prefix(self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::Artifact => "Artifact",
            Self::Producer => "Producer",
        }
    }
}

/// One `[…]` index selector on an artifact or producer id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IndexSelector {
    /// `[dim=i]` — index along a named dimension.
    Named {
        /// Dimension name.
        dim: String,
        /// Index along the dimension.
        index: usize,
    },
    /// `[i]` — positional ordinal.
    Positional {
        /// The ordinal.
        index: usize,
    },
}

impl IndexSelector {
    /// The numeric index regardless of form.
    #[must_use]
    pub fn index(&self) -> usize {
        match self {
            Self::Named { index, .. } | Self::Positional { index } => *index,
        }
    }
}

impl fmt::Display for IndexSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named { dim, index } => write!(f, "[{dim}={index}]"),
            Self::Positional { index } => write!(f, "[{index}]"),
        }
    }
}

/// A parsed canonical identifier.
///
/// # Examples
///
/// ```
/// use rf_core::{CanonicalId, IdKind};
///
/// let id = CanonicalId::parse("Artifact:AudioProducer.SegmentAudio[segment=1]").unwrap();
/// assert_eq!(id.kind(), IdKind::Artifact);
/// assert_eq!(id.name(), "SegmentAudio");
/// assert_eq!(id.scope(), ["AudioProducer"]);
/// assert_eq!(id.selectors()[0].index(), 1);
/// assert_eq!(id.to_string(), "Artifact:AudioProducer.SegmentAudio[segment=1]");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalId {
    kind: IdKind,
    segments: Vec<String>,
    selectors: Vec<IndexSelector>,
}

impl CanonicalId {
    /// A root input id: `Input:<name>`.
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            kind: IdKind::Input,
            segments: vec![name.into()],
            selectors: Vec::new(),
        }
    }

    /// A producer-scoped input id: `Input:<alias>.<name>`. Dotted alias
    /// paths split into namespace segments.
    pub fn scoped_input(alias: impl Into<String>, name: impl Into<String>) -> Self {
        let alias = alias.into();
        let mut segments: Vec<String> = alias.split('.').map(str::to_string).collect();
        segments.push(name.into());
        Self {
            kind: IdKind::Input,
            segments,
            selectors: Vec::new(),
        }
    }

    /// An artifact id from path segments and selectors.
    #[must_use]
    pub fn artifact(segments: Vec<String>, selectors: Vec<IndexSelector>) -> Self {
        Self {
            kind: IdKind::Artifact,
            segments,
            selectors,
        }
    }

    /// A producer (job) id from its alias path and positional indices.
    #[must_use]
    pub fn producer(segments: Vec<String>, indices: &[usize]) -> Self {
        Self {
            kind: IdKind::Producer,
            segments,
            selectors: indices
                .iter()
                .map(|&index| IndexSelector::Positional { index })
                .collect(),
        }
    }

    /// Parse a canonical id string.
    ///
    /// # Errors
    ///
    /// Returns [`ContractError::InvalidCanonicalId`] on an unknown prefix,
    /// empty path segments, or malformed index selectors.
    pub fn parse(value: &str) -> Result<Self, ContractError> {
        let invalid = |reason: &str| ContractError::InvalidCanonicalId {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (prefix, rest) = value.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
        let kind = match prefix {
            "Input" => IdKind::Input,
            "Artifact" => IdKind::Artifact,
            "Producer" => IdKind::Producer,
            _ => return Err(invalid("unknown prefix")),
        };

        let (path, selector_part) = match rest.find('[') {
            Some(pos) => (&rest[..pos], &rest[pos..]),
            None => (rest, ""),
        };

        if path.is_empty() {
            return Err(invalid("empty path"));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(invalid("empty path segment"));
        }

        let mut selectors = Vec::new();
        let mut remaining = selector_part;
        while !remaining.is_empty() {
            let Some(stripped) = remaining.strip_prefix('[') else {
                return Err(invalid("expected '['"));
            };
            let Some(end) = stripped.find(']') else {
                return Err(invalid("unterminated selector"));
            };
            let body = &stripped[..end];
            let selector = match body.split_once('=') {
                Some((dim, idx)) => {
                    if dim.is_empty() {
                        return Err(invalid("empty dimension name"));
                    }
                    let index = idx
                        .parse::<usize>()
                        .map_err(|_| invalid("non-numeric index"))?;
                    IndexSelector::Named {
                        dim: dim.to_string(),
                        index,
                    }
                }
                None => {
                    let index = body
                        .parse::<usize>()
                        .map_err(|_| invalid("non-numeric index"))?;
                    IndexSelector::Positional { index }
                }
            };
            selectors.push(selector);
            remaining = &stripped[end + 1..];
        }

        if kind == IdKind::Input && !selectors.is_empty() {
            return Err(invalid("inputs take no index selectors"));
        }

        Ok(Self {
            kind,
            segments,
            selectors,
        })
    }

    /// The id family.
    #[must_use]
    pub fn kind(&self) -> IdKind {
        self.kind
    }

    /// All dot-separated path segments.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// The final path segment (the input/artifact name, or the producer's
    /// innermost alias).
    #[must_use]
    pub fn name(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Path segments before the name (the producer/namespace scope).
    #[must_use]
    pub fn scope(&self) -> &[String] {
        &self.segments[..self.segments.len().saturating_sub(1)]
    }

    /// Index selectors, outermost first.
    #[must_use]
    pub fn selectors(&self) -> &[IndexSelector] {
        &self.selectors
    }

    /// For a scoped input (`Input:<Alias>.<field>`), the alias path the
    /// input is confined to. Root inputs return `None`.
    ///
    /// The planner uses this for config-input discipline: dirtiness from a
    /// scoped input reaches only the producer it names.
    #[must_use]
    pub fn config_scope(&self) -> Option<String> {
        if self.kind == IdKind::Input && self.segments.len() >= 2 {
            Some(self.scope().join("."))
        } else {
            None
        }
    }

    /// Replace the selectors, keeping kind and path.
    #[must_use]
    pub fn with_selectors(mut self, selectors: Vec<IndexSelector>) -> Self {
        self.selectors = selectors;
        self
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.prefix(), self.segments.join("."))?;
        for sel in &self.selectors {
            write!(f, "{sel}")?;
        }
        Ok(())
    }
}
