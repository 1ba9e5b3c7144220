use serde::{Deserialize, Serialize};

/// Outcome of comparing a declared (or external) balance against the balance
/// implied by the recorded movement history. A non-zero discrepancy is data,
/// never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub expected_balance: i64,
    pub declared_balance: i64,
    pub discrepancy: i64,
    pub is_balanced: bool,
}

/// Compare a declared cash count against the expected drawer balance.
///
/// `expected = opening + Σ(in movements) − Σ(out movements)`; remittances
/// sent are already recorded as out movements, so the formula needs no
/// extra term. Pure: never mutates anything, callers persist the report.
pub fn evaluate(
    opening_balance: i64,
    cash_in: i64,
    cash_out: i64,
    declared_balance: i64,
    tolerance: i64,
) -> ReconciliationReport {
    let expected_balance = opening_balance + cash_in - cash_out;
    let discrepancy = declared_balance - expected_balance;
    ReconciliationReport {
        expected_balance,
        declared_balance,
        discrepancy,
        is_balanced: discrepancy.abs() <= tolerance,
    }
}

/// Bank-statement variant: identical arithmetic, the external balance comes
/// from an imported statement instead of a physical cash count.
pub fn evaluate_statement(
    opening_balance: i64,
    cash_in: i64,
    cash_out: i64,
    statement_balance: i64,
    tolerance: i64,
) -> ReconciliationReport {
    evaluate(opening_balance, cash_in, cash_out, statement_balance, tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn matching_declared_balance_is_balanced() {
        let report = evaluate(10_000, 5_000, 0, 15_000, 0);
        assert_eq!(report.expected_balance, 15_000);
        assert_eq!(report.discrepancy, 0);
        assert!(report.is_balanced);
    }

    #[test]
    fn shortfall_is_reported_as_negative_discrepancy() {
        let report = evaluate(10_000, 5_000, 0, 14_500, 0);
        assert_eq!(report.discrepancy, -500);
        assert!(!report.is_balanced);
    }

    #[test]
    fn tolerance_absorbs_small_discrepancies() {
        let report = evaluate(10_000, 0, 0, 10_050, 100);
        assert_eq!(report.discrepancy, 50);
        assert!(report.is_balanced);

        let report = evaluate(10_000, 0, 0, 10_150, 100);
        assert!(!report.is_balanced);
    }

    #[test]
    fn statement_variant_uses_identical_arithmetic() {
        assert_eq!(
            evaluate(2_000, 700, 300, 2_400, 0),
            evaluate_statement(2_000, 700, 300, 2_400, 0)
        );
    }

    proptest! {
        /// `expected = opening + Σin − Σout` exactly, with no drift.
        #[test]
        fn expected_balance_is_exact(
            opening in 0i64..1_000_000,
            cash_in in 0i64..1_000_000,
            cash_out in 0i64..1_000_000,
            declared in 0i64..1_000_000,
        ) {
            let report = evaluate(opening, cash_in, cash_out, declared, 0);
            prop_assert_eq!(report.expected_balance, opening + cash_in - cash_out);
            prop_assert_eq!(report.discrepancy, declared - report.expected_balance);
            prop_assert_eq!(report.is_balanced, report.discrepancy == 0);
        }
    }
}
