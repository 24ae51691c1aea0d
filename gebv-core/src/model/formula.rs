//! Parsed model formula terms.
//!
//! The grammar is deliberately small: `response ~ term + term + ...`
//! where a bare name is a fixed effect ("1" is the intercept), a
//! parenthesized name `(block)` is a grouped random effect, and a
//! braced name `{g}` is a genetic term keyed to one of the supplied
//! GRM/genotype sources, optionally `{g:env}` for a GxE interaction.

use crate::error::{ModelError, Result};

/// A fixed-effect term. Classification into covariate vs factor
/// happens at design-build time, against the data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixedTerm {
    Intercept,
    Named(String),
}

/// A genetic random-effect term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneticTerm {
    /// Display name, e.g. "g" or "g:env".
    pub name: String,
    /// Key of the genetic source this term draws on.
    pub key: String,
    /// Environment covariate column for GxE terms.
    pub env: Option<String>,
}

/// A parsed formula.
#[derive(Debug, Clone)]
pub struct Formula {
    pub response: String,
    pub fixed: Vec<FixedTerm>,
    pub grouped: Vec<String>,
    pub genetic: Vec<GeneticTerm>,
}

impl Formula {
    /// Parse a formula string against the set of known genetic keys.
    pub fn parse(text: &str, genetic_keys: &[String]) -> Result<Self> {
        let (lhs, rhs) = text.split_once('~').ok_or_else(|| {
            ModelError::Value(format!(
                "formula '{}' is missing the '~' separating response and terms",
                text
            ))
        })?;

        let response = lhs.trim().to_string();
        if response.is_empty() {
            return Err(ModelError::Value(format!(
                "formula '{}' has an empty response",
                text
            )));
        }

        let mut fixed = Vec::new();
        let mut grouped = Vec::new();
        let mut genetic = Vec::new();

        for raw in rhs.split('+') {
            let term = raw.trim();
            if term.is_empty() {
                return Err(ModelError::Value(format!(
                    "formula '{}' contains an empty term",
                    text
                )));
            }

            if let Some(inner) = term.strip_prefix('{').and_then(|t| t.strip_suffix('}')) {
                let (key, env) = match inner.split_once(':') {
                    Some((k, e)) => (k.trim().to_string(), Some(e.trim().to_string())),
                    None => (inner.trim().to_string(), None),
                };
                if !genetic_keys.contains(&key) {
                    return Err(ModelError::Value(format!(
                        "genetic term '{{{}}}' does not match any supplied source; available: [{}]",
                        inner,
                        genetic_keys.join(", ")
                    )));
                }
                genetic.push(GeneticTerm {
                    name: inner.trim().to_string(),
                    key,
                    env,
                });
            } else if let Some(inner) = term.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
                grouped.push(inner.trim().to_string());
            } else if term == "1" {
                fixed.push(FixedTerm::Intercept);
            } else {
                fixed.push(FixedTerm::Named(term.to_string()));
            }
        }

        if genetic.is_empty() {
            return Err(ModelError::Value(format!(
                "formula '{}' declares no genetic term; nothing to predict breeding values from",
                text
            )));
        }

        Ok(Self {
            response,
            fixed,
            grouped,
            genetic,
        })
    }

    /// The fixed-effect part of the formula, reconstructed. "1" for an
    /// intercept-only model; used by the predictor to decide whether a
    /// covariate table is required.
    pub fn fixed_rhs(&self) -> String {
        if self.fixed.is_empty() {
            return "1".to_string();
        }
        self.fixed
            .iter()
            .map(|t| match t {
                FixedTerm::Intercept => "1".to_string(),
                FixedTerm::Named(n) => n.clone(),
            })
            .collect::<Vec<_>>()
            .join(" + ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_full_formula() {
        let f = Formula::parse("yield ~ 1 + age + (site) + {g} + {g:env}", &keys(&["g"])).unwrap();
        assert_eq!(f.response, "yield");
        assert_eq!(
            f.fixed,
            vec![FixedTerm::Intercept, FixedTerm::Named("age".into())]
        );
        assert_eq!(f.grouped, vec!["site"]);
        assert_eq!(f.genetic.len(), 2);
        assert_eq!(f.genetic[0].key, "g");
        assert_eq!(f.genetic[0].env, None);
        assert_eq!(f.genetic[1].env, Some("env".into()));
        assert_eq!(f.genetic[1].name, "g:env");
        assert_eq!(f.fixed_rhs(), "1 + age");
    }

    #[test]
    fn test_unknown_genetic_key_lists_available() {
        let err = Formula::parse("y ~ 1 + {h}", &keys(&["add", "dom"])).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'{h}'"));
        assert!(msg.contains("add"));
        assert!(msg.contains("dom"));
    }

    #[test]
    fn test_missing_tilde() {
        assert!(Formula::parse("y + {g}", &keys(&["g"])).is_err());
    }

    #[test]
    fn test_no_genetic_term() {
        assert!(Formula::parse("y ~ 1 + age", &keys(&["g"])).is_err());
    }

    #[test]
    fn test_intercept_only_rhs() {
        let f = Formula::parse("y ~ 1 + {g}", &keys(&["g"])).unwrap();
        assert_eq!(f.fixed_rhs(), "1");
    }
}
