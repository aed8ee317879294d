// SPDX-License-Identifier: MIT OR Apache-2.0
//! The binding-expression grammar.
//!
//! ```text
//! expr     := source group? order?
//! source   := scope "." name selector?
//! scope    := "Inputs" | alias
//! selector := "[" (digits | "*") "]"
//! group    := "group by" dimension
//! order    := "order by" field
//! ```
//!
//! Examples: `Inputs.InquiryPrompt`, `ScriptProducer.Script`,
//! `CharacterImageProducer.GeneratedImage[0]`,
//! `ImageProducer.SegmentImage[*] group by segment order by image`.

use crate::BlueprintError;
use std::fmt;

/// Where a source expression points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceScope {
    /// The blueprint's root inputs.
    Inputs,
    /// A sibling producer's outputs.
    Producer(String),
}

/// Element selection on a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementSel {
    /// `[n]` — a single element.
    Index(usize),
    /// `[*]` — every expanded instance.
    All,
}

/// A parsed source expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceExpr {
    /// Root inputs or a producer's outputs.
    pub scope: SourceScope,
    /// Input or output name.
    pub name: String,
    /// Optional element selection.
    pub element: Option<ElementSel>,
    /// Fan-in grouping dimension (`group by segment`).
    pub group_by: Option<String>,
    /// Ordering field within a group (`order by image`).
    pub order_by: Option<String>,
}

impl SourceExpr {
    /// Parse a source expression.
    ///
    /// # Errors
    ///
    /// Returns [`BlueprintError::InvalidExpr`] on any grammar violation.
    ///
    /// # Examples
    ///
    /// ```
    /// use rf_blueprint::{SourceExpr, SourceScope, ElementSel};
    ///
    /// let e = SourceExpr::parse("ImageProducer.SegmentImage[*] group by segment").unwrap();
    /// assert_eq!(e.scope, SourceScope::Producer("ImageProducer".into()));
    /// assert_eq!(e.name, "SegmentImage");
    /// assert_eq!(e.element, Some(ElementSel::All));
    /// assert_eq!(e.group_by.as_deref(), Some("segment"));
    /// ```
    pub fn parse(expr: &str) -> Result<Self, BlueprintError> {
        let invalid = |reason: &str| BlueprintError::InvalidExpr {
            expr: expr.to_string(),
            reason: reason.to_string(),
        };

        let mut rest = expr.trim();

        let order_by = match rest.rsplit_once(" order by ") {
            Some((head, field)) => {
                let field = field.trim();
                if field.is_empty() || field.contains(' ') {
                    return Err(invalid("bad order-by field"));
                }
                rest = head.trim_end();
                Some(field.to_string())
            }
            None => None,
        };

        let group_by = match rest.rsplit_once(" group by ") {
            Some((head, dim)) => {
                let dim = dim.trim();
                if dim.is_empty() || dim.contains(' ') {
                    return Err(invalid("bad group-by dimension"));
                }
                rest = head.trim_end();
                Some(dim.to_string())
            }
            None => None,
        };

        let (source, element) = match rest.find('[') {
            Some(pos) => {
                let body = rest[pos..]
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .ok_or_else(|| invalid("unterminated selector"))?;
                let sel = if body == "*" {
                    ElementSel::All
                } else {
                    ElementSel::Index(
                        body.parse::<usize>()
                            .map_err(|_| invalid("non-numeric element index"))?,
                    )
                };
                (&rest[..pos], Some(sel))
            }
            None => (rest, None),
        };

        let (scope_str, name) = source
            .split_once('.')
            .ok_or_else(|| invalid("expected '<scope>.<name>'"))?;
        if scope_str.is_empty() || name.is_empty() || name.contains('.') {
            return Err(invalid("expected '<scope>.<name>'"));
        }
        if !is_ident(scope_str) || !is_ident(name) {
            return Err(invalid("bad identifier"));
        }

        let scope = if scope_str == "Inputs" {
            SourceScope::Inputs
        } else {
            SourceScope::Producer(scope_str.to_string())
        };

        if matches!(scope, SourceScope::Inputs) && group_by.is_some() {
            return Err(invalid("root inputs cannot be grouped"));
        }
        if group_by.is_none() && order_by.is_some() {
            return Err(invalid("order by requires group by"));
        }
        if group_by.is_some() && element != Some(ElementSel::All) {
            return Err(invalid("group by requires a [*] selector"));
        }

        Ok(Self {
            scope,
            name: name.to_string(),
            element,
            group_by,
            order_by,
        })
    }

    /// `true` when the expression selects every expanded instance.
    #[must_use]
    pub fn is_fan_in(&self) -> bool {
        self.element == Some(ElementSel::All)
    }
}

impl SourceExpr {
    fn parse_name(name: &str) -> Result<String, BlueprintError> {
        if is_ident(name) {
            Ok(name.to_string())
        } else {
            Err(BlueprintError::InvalidExpr {
                expr: name.to_string(),
                reason: "bad identifier".to_string(),
            })
        }
    }
}

impl fmt::Display for SourceExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            SourceScope::Inputs => write!(f, "Inputs.{}", self.name)?,
            SourceScope::Producer(alias) => write!(f, "{alias}.{}", self.name)?,
        }
        match self.element {
            Some(ElementSel::Index(i)) => write!(f, "[{i}]")?,
            Some(ElementSel::All) => write!(f, "[*]")?,
            None => {}
        }
        if let Some(dim) = &self.group_by {
            write!(f, " group by {dim}")?;
        }
        if let Some(field) = &self.order_by {
            write!(f, " order by {field}")?;
        }
        Ok(())
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Split a binding key into its base input name and optional element index
/// (`"ReferenceImages[0]"` → `("ReferenceImages", Some(0))`).
///
/// # Errors
///
/// Returns [`BlueprintError::InvalidExpr`] on a malformed selector.
pub fn parse_binding_key(key: &str) -> Result<(String, Option<usize>), BlueprintError> {
    match key.find('[') {
        None => Ok((SourceExpr::parse_name(key)?, None)),
        Some(pos) => {
            let body = key[pos..]
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| BlueprintError::InvalidExpr {
                    expr: key.to_string(),
                    reason: "unterminated element selector".to_string(),
                })?;
            let index = body
                .parse::<usize>()
                .map_err(|_| BlueprintError::InvalidExpr {
                    expr: key.to_string(),
                    reason: "non-numeric element selector".to_string(),
                })?;
            Ok((SourceExpr::parse_name(&key[..pos])?, Some(index)))
        }
    }
}
