use std::fmt;

/// Stages reported during a leave-one-out evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EvaluationStage {
    FullDesign,
    Folds,
    Summary,
}

impl EvaluationStage {
    pub fn describe(self) -> &'static str {
        match self {
            Self::FullDesign => "full pairwise design",
            Self::Folds => "leave-one-out folds",
            Self::Summary => "error summary",
        }
    }
}

impl fmt::Display for EvaluationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Observer for reporting progress while folds run.
///
/// Folds may finish on any worker thread and in any order, so the methods take
/// `&self` and implementations must be `Sync`.
pub trait FoldProgressObserver: Sync {
    fn on_stage_start(&self, stage: EvaluationStage, total: usize) {
        let _ = (stage, total);
    }
    fn on_fold_finished(&self, unit: usize, succeeded: bool) {
        let _ = (unit, succeeded);
    }
    fn on_stage_finish(&self, stage: EvaluationStage) {
        let _ = stage;
    }
}

#[derive(Default)]
pub struct NoopFoldProgress;

impl FoldProgressObserver for NoopFoldProgress {}
