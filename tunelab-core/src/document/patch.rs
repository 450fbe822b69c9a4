//! Typed patches between document generations.
//!
//! Merging an optimizer result into a working document is a patch over named
//! sections rather than a blind overwrite, and applying one yields a
//! [`PatchRecord`] saying what changed and where it came from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::schema::{BotSection, ConfigBody, SideParams};

/// Which top-level section a patch touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Backtest,
    Bot,
    Live,
    Optimize,
}

impl SectionKind {
    pub const ALL: [SectionKind; 4] = [
        SectionKind::Backtest,
        SectionKind::Bot,
        SectionKind::Live,
        SectionKind::Optimize,
    ];

    /// Sections whose content differs between `before` and `after`.
    pub fn changed_between(before: &ConfigBody, after: &ConfigBody) -> Vec<SectionKind> {
        Self::ALL
            .into_iter()
            .filter(|kind| match kind {
                SectionKind::Backtest => before.backtest != after.backtest,
                SectionKind::Bot => before.bot != after.bot,
                SectionKind::Live => before.live != after.live,
                SectionKind::Optimize => before.optimize != after.optimize,
            })
            .collect()
    }
}

/// Replacement content for one section.
#[derive(Debug, Clone, PartialEq)]
pub enum SectionPatch {
    /// Replaces `bot.long` and `bot.short`; other `bot` keys are kept.
    BotSides { long: SideParams, short: SideParams },
}

impl SectionPatch {
    pub fn kind(&self) -> SectionKind {
        match self {
            SectionPatch::BotSides { .. } => SectionKind::Bot,
        }
    }

    fn apply(self, body: &mut ConfigBody) {
        match self {
            SectionPatch::BotSides { long, short } => {
                let bot = body.bot.get_or_insert_with(BotSection::default);
                bot.long = long;
                bot.short = short;
            }
        }
    }
}

/// A set of section patches taken from one source document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentPatch {
    pub source: PathBuf,
    pub sections: Vec<SectionPatch>,
}

impl DocumentPatch {
    /// The realized-parameter patch carried by an optimizer result.
    ///
    /// `None` when the result has no `bot` section.
    pub fn realized_parameters(source: &Path, result: &ConfigBody) -> Option<Self> {
        let bot = result.bot.as_ref()?;
        Some(Self {
            source: source.to_path_buf(),
            sections: vec![SectionPatch::BotSides {
                long: bot.long.clone(),
                short: bot.short.clone(),
            }],
        })
    }

    pub(crate) fn apply_to(self, body: &mut ConfigBody) -> PatchRecord {
        let mut changed = Vec::with_capacity(self.sections.len());
        for section in self.sections {
            changed.push(section.kind());
            section.apply(body);
        }
        PatchRecord {
            source: self.source,
            changed,
        }
    }
}

/// What an applied patch changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchRecord {
    pub source: PathBuf,
    pub changed: Vec<SectionKind>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bot_patch_keeps_other_bot_keys_and_sections() {
        let mut body: ConfigBody = serde_json::from_value(json!({
            "bot": {"long": {"n_positions": 1.0}, "short": {}, "note": "keep"},
            "live": {"approved_coins": ["OP"]}
        }))
        .unwrap();
        let result: ConfigBody = serde_json::from_value(json!({
            "bot": {"long": {"n_positions": 4.0}, "short": {"n_positions": 2.0}},
            "live": {"approved_coins": ["BTC"]}
        }))
        .unwrap();

        let patch = DocumentPatch::realized_parameters(Path::new("ideal.json"), &result).unwrap();
        let record = patch.apply_to(&mut body);

        assert_eq!(record.changed, vec![SectionKind::Bot]);
        let bot = body.bot.as_ref().unwrap();
        assert_eq!(bot.long["n_positions"], 4.0);
        assert_eq!(bot.short["n_positions"], 2.0);
        assert_eq!(bot.extra["note"], json!("keep"));
        assert_eq!(
            body.live.unwrap().approved_coins.unwrap(),
            vec!["OP".to_string()]
        );
    }

    #[test]
    fn result_without_bot_yields_no_patch() {
        let result = ConfigBody::default();
        assert!(DocumentPatch::realized_parameters(Path::new("r.json"), &result).is_none());
    }

    #[test]
    fn changed_between_names_only_differing_sections() {
        let before: ConfigBody = serde_json::from_value(json!({
            "backtest": {"start_date": "2025-01-01"},
            "live": {"approved_coins": ["OP"]}
        }))
        .unwrap();
        let after: ConfigBody = serde_json::from_value(json!({
            "backtest": {"start_date": "2025-01-01"},
            "bot": {"long": {}, "short": {}}
        }))
        .unwrap();

        assert_eq!(
            SectionKind::changed_between(&before, &after),
            vec![SectionKind::Bot, SectionKind::Live]
        );
        assert!(SectionKind::changed_between(&after, &after).is_empty());
    }

    #[test]
    fn bot_patch_creates_missing_bot_section() {
        let mut body = ConfigBody::default();
        let patch = DocumentPatch {
            source: PathBuf::from("r.json"),
            sections: vec![SectionPatch::BotSides {
                long: SideParams::from([("n_positions".to_string(), 2.0)]),
                short: SideParams::new(),
            }],
        };
        patch.apply_to(&mut body);
        assert_eq!(body.bot.unwrap().long["n_positions"], 2.0);
    }
}
