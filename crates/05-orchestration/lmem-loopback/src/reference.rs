//! Host-side reference computation.

use crate::{LoopbackError, LoopbackResult};

/// Inputs of the loopback test: `a[i] = i`, `b[i] = n - i`.
///
/// Every element of the expected sum equals `n`, so `n` must fit an `i32`.
pub fn generate_inputs(n: usize) -> LoopbackResult<(Vec<i32>, Vec<i32>)> {
    let n32 = i32::try_from(n)
        .map_err(|_| LoopbackError::Config(format!("size {n} does not fit a 32-bit element")))?;
    let a = (0..n32).collect();
    let b = (0..n32).map(|i| n32 - i).collect();
    Ok((a, b))
}

/// Element-wise `a[i] + b[i]` over the first `n` elements, wrapping on overflow.
pub fn reference_sum(a: &[i32], b: &[i32], n: usize) -> LoopbackResult<Vec<i32>> {
    ensure_len("input A", a, n)?;
    ensure_len("input B", b, n)?;
    Ok(a[..n]
        .iter()
        .zip(&b[..n])
        .map(|(x, y)| x.wrapping_add(*y))
        .collect())
}

pub(crate) fn ensure_len(what: &'static str, data: &[i32], required: usize) -> LoopbackResult<()> {
    if data.len() < required {
        return Err(LoopbackError::OutOfRange {
            what,
            len: data.len(),
            required,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_inputs_sum_to_size() {
        let (a, b) = generate_inputs(384).expect("inputs");
        assert_eq!(a[0], 0);
        assert_eq!(b[0], 384);
        assert_eq!(b[383], 1);
        let sum = reference_sum(&a, &b, 384).expect("sum");
        assert!(sum.iter().all(|v| *v == 384));
    }

    #[test]
    fn short_input_is_out_of_range() {
        let err = reference_sum(&[1, 2], &[1, 2, 3], 3).unwrap_err();
        assert!(matches!(
            err,
            LoopbackError::OutOfRange {
                what: "input A",
                len: 2,
                required: 3
            }
        ));
    }

    #[test]
    fn sizes_beyond_i32_are_rejected() {
        let err = generate_inputs(i32::MAX as usize + 1).unwrap_err();
        assert!(matches!(err, LoopbackError::Config(_)), "{err:?}");
    }

    #[test]
    fn addition_wraps() {
        let sum = reference_sum(&[i32::MAX], &[1], 1).expect("sum");
        assert_eq!(sum, vec![i32::MIN]);
    }

    proptest! {
        #[test]
        fn sum_is_elementwise(pairs in proptest::collection::vec(any::<(i32, i32)>(), 0..256)) {
            let (a, b): (Vec<i32>, Vec<i32>) = pairs.iter().copied().unzip();
            let sum = reference_sum(&a, &b, a.len()).expect("sum");
            prop_assert_eq!(sum.len(), a.len());
            for i in 0..a.len() {
                prop_assert_eq!(sum[i], a[i].wrapping_add(b[i]));
            }
        }

        #[test]
        fn longer_inputs_are_truncated_to_n(extra in 0usize..8, n in 0usize..64) {
            let (a, b) = generate_inputs(n + extra).expect("inputs");
            let sum = reference_sum(&a, &b, n).expect("sum");
            prop_assert_eq!(sum.len(), n);
        }
    }
}
