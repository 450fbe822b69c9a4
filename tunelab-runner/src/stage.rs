//! Per-document stage machine.

use serde::{Deserialize, Serialize};

/// One step of a document's pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Derive,
    Optimize,
    Select,
    Apply,
    Persist,
    Backtest,
}

impl Stage {
    pub const FIRST: Stage = Stage::Derive;

    /// Stage following `self`, or `None` after the backtest. `Select` is
    /// skipped unless `select_ideal` is set.
    pub fn next(self, select_ideal: bool) -> Option<Stage> {
        match self {
            Stage::Derive => Some(Stage::Optimize),
            Stage::Optimize if select_ideal => Some(Stage::Select),
            Stage::Optimize | Stage::Select => Some(Stage::Apply),
            Stage::Apply => Some(Stage::Persist),
            Stage::Persist => Some(Stage::Backtest),
            Stage::Backtest => None,
        }
    }

    /// Stages a document passes through, in order.
    pub fn sequence(select_ideal: bool) -> Vec<Stage> {
        std::iter::successors(Some(Stage::FIRST), |s| s.next(select_ideal)).collect()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Derive => "derive",
            Stage::Optimize => "optimize",
            Stage::Select => "select",
            Stage::Apply => "apply",
            Stage::Persist => "persist",
            Stage::Backtest => "backtest",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_with_selection() {
        assert_eq!(
            Stage::sequence(true),
            vec![
                Stage::Derive,
                Stage::Optimize,
                Stage::Select,
                Stage::Apply,
                Stage::Persist,
                Stage::Backtest
            ]
        );
    }

    #[test]
    fn sequence_without_selection_skips_select() {
        let stages = Stage::sequence(false);
        assert!(!stages.contains(&Stage::Select));
        assert_eq!(stages.len(), 5);
        assert_eq!(stages.last(), Some(&Stage::Backtest));
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Stage::Backtest).unwrap(), "\"backtest\"");
    }
}
