//! Extractor lookup keyed by (tier, MIME type).

use crate::config::{ExtractorKind, ExtractorRule};
use crate::models::AccountTier;
use std::collections::HashMap;

/// Primary extractor plus an optional fallback tried once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractionPlan {
    pub primary: ExtractorKind,
    pub fallback: Option<ExtractorKind>,
}

/// Resolved extractor table. Exact MIME types win over `type/*` patterns.
#[derive(Debug, Clone, Default)]
pub struct ExtractionTable {
    plans: HashMap<(AccountTier, String), ExtractionPlan>,
}

impl ExtractionTable {
    pub fn from_rules(rules: &[ExtractorRule]) -> Self {
        let plans = rules
            .iter()
            .map(|rule| {
                (
                    (rule.tier, rule.mime.to_ascii_lowercase()),
                    ExtractionPlan {
                        primary: rule.primary,
                        fallback: rule.fallback.filter(|f| *f != rule.primary),
                    },
                )
            })
            .collect();
        Self { plans }
    }

    pub fn lookup(&self, tier: AccountTier, mime: &str) -> Option<ExtractionPlan> {
        let mime = mime.to_ascii_lowercase();
        let essence = mime.split(';').next().unwrap_or("").trim().to_string();
        if let Some(plan) = self.plans.get(&(tier, essence.clone())) {
            return Some(*plan);
        }
        let major = essence.split('/').next().unwrap_or("");
        self.plans.get(&(tier, format!("{}/*", major))).copied()
    }

    /// Every extractor kind the table can select.
    pub fn kinds(&self) -> impl Iterator<Item = ExtractorKind> + '_ {
        self.plans
            .values()
            .flat_map(|p| std::iter::once(p.primary).chain(p.fallback))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExtractionSettings;

    #[test]
    fn test_default_table() {
        let table = ExtractionTable::from_rules(&ExtractionSettings::default().rules);

        let free_pdf = table.lookup(AccountTier::Free, "application/pdf").unwrap();
        assert_eq!(free_pdf.primary, ExtractorKind::PdfText);
        assert_eq!(free_pdf.fallback, None);

        let paid_pdf = table.lookup(AccountTier::Premium, "application/pdf").unwrap();
        assert_eq!(paid_pdf.primary, ExtractorKind::Vision);
        assert_eq!(paid_pdf.fallback, Some(ExtractorKind::PdfText));
    }

    #[test]
    fn test_wildcard_and_parameters() {
        let table = ExtractionTable::from_rules(&ExtractionSettings::default().rules);
        let plan = table
            .lookup(AccountTier::Free, "text/markdown; charset=utf-8")
            .unwrap();
        assert_eq!(plan.primary, ExtractorKind::PlainText);
        assert!(table.lookup(AccountTier::Free, "image/png").is_none());
        assert!(table.lookup(AccountTier::Premium, "IMAGE/PNG").is_some());
    }
}
