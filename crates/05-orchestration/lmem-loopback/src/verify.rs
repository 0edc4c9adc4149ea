//! Element-wise comparison of device output against the reference.

use std::fmt;

/// One element where device and reference disagree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub index: usize,
    pub actual: i32,
    pub expected: i32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Output data @ {} = {} (expected {})",
            self.index, self.actual, self.expected
        )
    }
}

/// Outcome of comparing two arrays over `n` elements.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Verification {
    /// Elements actually compared.
    pub checked: usize,
    /// Every differing index, ascending.
    pub mismatches: Vec<Mismatch>,
    /// Elements of `[0, n)` absent from the shorter array.
    pub missing: usize,
}

impl Verification {
    pub fn failures(&self) -> usize {
        self.mismatches.len() + self.missing
    }

    pub fn passed(&self) -> bool {
        self.failures() == 0
    }

    /// Final report line.
    pub fn summary(&self) -> String {
        if self.passed() {
            "Test passed!".to_string()
        } else {
            format!("Test failed {} times!", self.failures())
        }
    }
}

/// Compares `actual` to `expected` over the first `n` elements.
///
/// Never short-circuits. Indices past the end of either array count as
/// missing.
pub fn verify(actual: &[i32], expected: &[i32], n: usize) -> Verification {
    let checked = n.min(actual.len()).min(expected.len());
    let mismatches = actual[..checked]
        .iter()
        .zip(&expected[..checked])
        .enumerate()
        .filter(|(_, (a, e))| a != e)
        .map(|(index, (a, e))| Mismatch {
            index,
            actual: *a,
            expected: *e,
        })
        .collect();
    Verification {
        checked,
        mismatches,
        missing: n - checked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn reports_each_differing_index() {
        let expected = vec![384; 384];
        let mut actual = expected.clone();
        actual[5] = 385;
        actual[200] = 0;

        let result = verify(&actual, &expected, 384);
        assert_eq!(
            result.mismatches,
            vec![
                Mismatch {
                    index: 5,
                    actual: 385,
                    expected: 384
                },
                Mismatch {
                    index: 200,
                    actual: 0,
                    expected: 384
                },
            ]
        );
        assert_eq!(result.summary(), "Test failed 2 times!");
        assert_eq!(
            result.mismatches[0].to_string(),
            "Output data @ 5 = 385 (expected 384)"
        );
    }

    #[test]
    fn short_output_counts_missing() {
        let result = verify(&[1, 2], &[1, 2, 3, 4], 4);
        assert_eq!(result.checked, 2);
        assert_eq!(result.missing, 2);
        assert!(result.mismatches.is_empty());
        assert!(!result.passed());
    }

    #[test]
    fn extra_elements_beyond_n_are_ignored() {
        let result = verify(&[7, 8, 9], &[7, 8, 0], 2);
        assert!(result.passed());
        assert_eq!(result.summary(), "Test passed!");
    }

    proptest! {
        #[test]
        fn identical_arrays_pass(data in proptest::collection::vec(any::<i32>(), 0..512)) {
            let result = verify(&data, &data, data.len());
            prop_assert!(result.passed());
            prop_assert_eq!(result.checked, data.len());
        }

        #[test]
        fn k_flips_give_k_mismatches(
            data in proptest::collection::vec(any::<i32>(), 1..256),
            picks in proptest::collection::btree_set(0usize..4096, 0..16),
        ) {
            let indices: std::collections::BTreeSet<usize> =
                picks.into_iter().map(|i| i % data.len()).collect();
            let mut corrupted = data.clone();
            for &i in &indices {
                corrupted[i] ^= 1;
            }
            let result = verify(&corrupted, &data, data.len());
            prop_assert_eq!(result.mismatches.len(), indices.len());
            for (mismatch, &i) in result.mismatches.iter().zip(&indices) {
                prop_assert_eq!(mismatch.index, i);
                prop_assert_eq!(mismatch.actual, data[i] ^ 1);
                prop_assert_eq!(mismatch.expected, data[i]);
            }
        }
    }
}
