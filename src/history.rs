use serde::{Deserialize, Serialize};

use crate::dataset::CeRecord;
use crate::grid::InitialConditions;

/// One step of an evolved binary's history as reported by the engine.
/// Fields the engine does not populate stay unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryRow {
    #[serde(default)]
    pub event: Option<String>,
    /// Evolutionary state of the primary (the CE donor) at this step.
    #[serde(default)]
    pub star_1_state: Option<String>,
    /// Envelope binding-energy parameter at this step.
    #[serde(default)]
    pub lambda_ce: Option<f64>,
}

/// Final state plus history of one evolved binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionOutcome {
    pub final_state: String,
    #[serde(default)]
    pub final_m1: Option<f64>,
    #[serde(default)]
    pub final_m2: Option<f64>,
    #[serde(default)]
    pub final_p: Option<f64>,
    #[serde(default)]
    pub history: Vec<HistoryRow>,
}

/// Final states that mean the binary did not survive the CE.
pub const NON_SURVIVAL_STATES: [&str; 3] = ["merged", "initial_RLOF", "disrupted"];

impl EvolutionOutcome {
    /// First history row whose event label mentions a CE.
    pub fn first_ce_row(&self) -> Option<&HistoryRow> {
        self.history
            .iter()
            .find(|row| row.event.as_deref().is_some_and(|e| e.contains("CE")))
    }
}

/// Flatten an evolved binary into the per-binary result record.
///
/// Lambda and the donor state are taken at the first CE event; survival
/// requires a CE event and a final state outside the merger/disruption set.
pub fn extract_record(
    ic: &InitialConditions,
    alpha_ce: f64,
    outcome: &EvolutionOutcome,
) -> CeRecord {
    let ce_row = outcome.first_ce_row();
    let ce_occurred = ce_row.is_some();
    let survived_ce = ce_occurred
        && !NON_SURVIVAL_STATES
            .iter()
            .any(|s| *s == outcome.final_state);

    CeRecord {
        m1_initial: ic.m1,
        m2_initial: ic.m2,
        p_initial: ic.p_orb,
        z: ic.z,
        q_initial: ic.q,
        alpha_ce,
        ce_occurred,
        lambda_ce: ce_row.and_then(|row| row.lambda_ce),
        donor_state: ce_row.and_then(|row| row.star_1_state.clone()),
        survived_ce,
        final_state: Some(outcome.final_state.clone()),
        final_m1: outcome.final_m1,
        final_m2: outcome.final_m2,
        final_p: outcome.final_p,
        error: None,
    }
}

/// Record for a binary whose evolution failed; initial conditions are kept
/// so the row still counts toward the grid.
pub fn error_record(ic: &InitialConditions, alpha_ce: f64, message: &str) -> CeRecord {
    CeRecord {
        m1_initial: ic.m1,
        m2_initial: ic.m2,
        p_initial: ic.p_orb,
        z: ic.z,
        q_initial: ic.q,
        alpha_ce,
        ce_occurred: false,
        lambda_ce: None,
        donor_state: None,
        survived_ce: false,
        final_state: None,
        final_m1: None,
        final_m2: None,
        final_p: None,
        error: Some(message.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ic() -> InitialConditions {
        InitialConditions {
            m1: 14.0,
            m2: 10.5,
            p_orb: 300.0,
            z: 0.006,
            q: 0.75,
        }
    }

    fn outcome(final_state: &str, history: Vec<HistoryRow>) -> EvolutionOutcome {
        EvolutionOutcome {
            final_state: final_state.to_string(),
            final_m1: Some(4.1),
            final_m2: Some(10.2),
            final_p: Some(2.4),
            history,
        }
    }

    #[test]
    fn no_ce_event_leaves_flags_unset() {
        let record = extract_record(&ic(), 1.0, &outcome("detached", vec![]));
        assert!(!record.ce_occurred);
        assert!(!record.survived_ce);
        assert!(record.lambda_ce.is_none());
        assert_eq!(record.final_state.as_deref(), Some("detached"));
    }

    #[test]
    fn first_ce_event_sets_lambda_and_donor_state() {
        let history = vec![
            HistoryRow {
                event: Some("oRLO1".to_string()),
                star_1_state: Some("H-rich_Core_H_burning".to_string()),
                lambda_ce: None,
            },
            HistoryRow {
                event: Some("oCE1".to_string()),
                star_1_state: Some("H-rich_Shell_H_burning".to_string()),
                lambda_ce: Some(0.11),
            },
            HistoryRow {
                event: Some("oCE2".to_string()),
                star_1_state: Some("stripped_He_Core_He_burning".to_string()),
                lambda_ce: Some(0.32),
            },
        ];
        let record = extract_record(&ic(), 1.0, &outcome("detached", history));
        assert!(record.ce_occurred);
        assert!(record.survived_ce);
        assert_eq!(record.lambda_ce, Some(0.11));
        assert_eq!(
            record.donor_state.as_deref(),
            Some("H-rich_Shell_H_burning")
        );
    }

    #[test]
    fn merged_final_state_fails_survival() {
        for state in NON_SURVIVAL_STATES {
            let history = vec![HistoryRow {
                event: Some("oCE1".to_string()),
                star_1_state: None,
                lambda_ce: Some(0.05),
            }];
            let record = extract_record(&ic(), 1.0, &outcome(state, history));
            assert!(record.ce_occurred);
            assert!(!record.survived_ce, "state {state} must not survive");
        }
    }

    #[test]
    fn error_record_keeps_initial_conditions() {
        let record = error_record(&ic(), 2.0, "engine timed out");
        assert_eq!(record.m1_initial, 14.0);
        assert_eq!(record.alpha_ce, 2.0);
        assert!(!record.ce_occurred);
        assert_eq!(record.error.as_deref(), Some("engine timed out"));
    }

    #[test]
    fn outcome_json_accepts_sparse_rows() {
        let raw = r#"{
            "final_state": "merged",
            "history": [
                {"event": "ZAMS"},
                {"event": "oCE1", "lambda_ce": 0.08}
            ]
        }"#;
        let outcome: EvolutionOutcome = serde_json::from_str(raw).unwrap();
        let row = outcome.first_ce_row().unwrap();
        assert_eq!(row.lambda_ce, Some(0.08));
        assert!(outcome.final_m1.is_none());
    }
}
