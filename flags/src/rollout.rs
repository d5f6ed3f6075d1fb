use sha1::{Digest, Sha1};

/// Deterministic [0,100) bucket for a subject under one flag.
///
/// The flag key is part of the hash input, so the same subject lands in
/// independent buckets across flags. The assignment never changes for a
/// given (flag, subject) pair, which makes rollout growth monotonic:
/// raising the percentage only ever adds subjects.
pub fn bucket(flag_key: &str, subject_id: i64) -> u64 {
    let mut hasher = Sha1::new();
    hasher.update(format!("{}:{}", flag_key, subject_id).as_bytes());
    let digest = hasher.finalize();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix) % 100
}

/// Whether the subject falls inside the enabled percentage for this flag.
pub fn is_in_rollout(flag_key: &str, subject_id: i64, percentage: i16) -> bool {
    if percentage <= 0 {
        return false;
    }
    if percentage >= 100 {
        return true;
    }
    bucket(flag_key, subject_id) < percentage as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_is_deterministic() {
        for subject_id in 0..200 {
            assert_eq!(
                bucket("new_ui", subject_id),
                bucket("new_ui", subject_id),
            );
        }
    }

    #[test]
    fn test_rollout_is_monotonic() {
        // Once a subject is in at p, it stays in at every higher p.
        for subject_id in 0..200 {
            let mut included = false;
            for percentage in 0..=100 {
                let now_included = is_in_rollout("new_ui", subject_id, percentage);
                assert!(
                    now_included || !included,
                    "subject {} dropped out at {}%",
                    subject_id,
                    percentage
                );
                included = now_included;
            }
        }
    }

    #[test]
    fn test_rollout_boundaries() {
        for subject_id in 0..100 {
            assert!(!is_in_rollout("new_ui", subject_id, 0));
            assert!(is_in_rollout("new_ui", subject_id, 100));
        }
    }

    #[test]
    fn test_rollout_is_independent_across_flags() {
        let in_first: Vec<i64> = (0..1000)
            .filter(|id| is_in_rollout("flag_one", *id, 50))
            .collect();
        let in_second: Vec<i64> = (0..1000)
            .filter(|id| is_in_rollout("flag_two", *id, 50))
            .collect();
        assert_ne!(in_first, in_second);
    }

    #[test]
    fn test_half_rollout_is_close_to_half() {
        let included = (0..1000)
            .filter(|id| is_in_rollout("new_ui", *id, 50))
            .count();
        assert!(
            (430..=570).contains(&included),
            "expected roughly half of 1000 subjects, got {}",
            included
        );
    }
}
