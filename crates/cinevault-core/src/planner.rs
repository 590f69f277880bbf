//! Chunk planning: split a file into bounded, provider-legal part ranges.
//!
//! The planner picks the smallest part size >= the requested minimum such
//! that the part count stays within the provider's limit; the final part
//! absorbs the remainder and may legally be smaller than the minimum.

use thiserror::Error;

use crate::models::session::ByteRange;

/// Provider minimum part size (every part except the last), per the
/// S3 multipart contract.
pub const MIN_PART_SIZE: u64 = 5 * 1024 * 1024;

/// Provider maximum size of a single part.
pub const MAX_PART_SIZE: u64 = 5 * 1024 * 1024 * 1024;

/// Provider maximum number of parts in one multipart upload.
pub const MAX_PART_COUNT: u32 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("cannot plan an upload for an empty file")]
    EmptyFile,

    #[error("file of {total_bytes} bytes exceeds provider limits ({max_bytes} bytes)")]
    SizeExceedsProviderLimits { total_bytes: u64, max_bytes: u64 },

    #[error("invalid planner parameters: {0}")]
    InvalidParameters(String),
}

/// The computed part layout for one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    pub part_size: u64,
    pub ranges: Vec<ByteRange>,
}

impl PartPlan {
    pub fn part_count(&self) -> u32 {
        self.ranges.len() as u32
    }

    pub fn is_single_part(&self) -> bool {
        self.ranges.len() == 1
    }

    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.length).sum()
    }
}

pub struct ChunkPlanner;

impl ChunkPlanner {
    /// Computes part boundaries for a file of `total_bytes`.
    ///
    /// `min_part_size` is clamped up to the provider minimum; the chosen
    /// part size grows beyond it only when needed to respect
    /// `max_part_count`.
    pub fn plan(
        total_bytes: u64,
        min_part_size: u64,
        max_part_count: u32,
    ) -> Result<PartPlan, PlanError> {
        if total_bytes == 0 {
            return Err(PlanError::EmptyFile);
        }
        if max_part_count == 0 || max_part_count > MAX_PART_COUNT {
            return Err(PlanError::InvalidParameters(format!(
                "max_part_count must be in 1..={}, got {}",
                MAX_PART_COUNT, max_part_count
            )));
        }

        let max_bytes = MAX_PART_SIZE.saturating_mul(max_part_count as u64);
        if total_bytes > max_bytes {
            return Err(PlanError::SizeExceedsProviderLimits {
                total_bytes,
                max_bytes,
            });
        }

        let min_part_size = min_part_size.max(MIN_PART_SIZE);

        // Smallest legal part size: either the requested minimum, or whatever
        // is needed to fit within max_part_count.
        let needed = total_bytes.div_ceil(max_part_count as u64);
        let part_size = min_part_size.max(needed).min(MAX_PART_SIZE);

        let mut ranges = Vec::new();
        let mut offset = 0u64;
        while offset < total_bytes {
            let length = part_size.min(total_bytes - offset);
            ranges.push(ByteRange::new(offset, length));
            offset += length;
        }

        Ok(PartPlan { part_size, ranges })
    }

    /// Policy helper for the coordinator: a file at or below the part-size
    /// floor should use a single-shot put instead of a multipart upload.
    pub fn single_shot(total_bytes: u64, min_part_size: u64) -> bool {
        total_bytes <= min_part_size.max(MIN_PART_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    fn assert_plan_valid(plan: &PartPlan, total: u64, max_parts: u32) {
        assert!(plan.part_count() >= 1);
        assert!(plan.part_count() <= max_parts);
        assert_eq!(plan.total_bytes(), total);
        // Contiguous and non-overlapping.
        let mut expected_offset = 0u64;
        for range in &plan.ranges {
            assert_eq!(range.offset, expected_offset);
            assert!(range.length > 0);
            expected_offset = range.end();
        }
        assert_eq!(expected_offset, total);
        // All but the last part have exactly part_size bytes.
        for range in &plan.ranges[..plan.ranges.len() - 1] {
            assert_eq!(range.length, plan.part_size);
        }
    }

    #[test]
    fn empty_file_rejected() {
        assert_eq!(
            ChunkPlanner::plan(0, 5 * MIB, 10_000),
            Err(PlanError::EmptyFile)
        );
    }

    #[test]
    fn one_gib_at_100_mib_parts_is_ten_parts() {
        let plan = ChunkPlanner::plan(1024 * MIB, 100 * MIB, 10_000).unwrap();
        assert_eq!(plan.part_count(), 10);
        assert_eq!(plan.part_size, 100 * MIB);
        // Last part absorbs the remainder.
        assert_eq!(plan.ranges[9].length, 1024 * MIB - 9 * 100 * MIB);
        assert_plan_valid(&plan, 1024 * MIB, 10_000);
    }

    #[test]
    fn file_smaller_than_min_yields_single_part() {
        let plan = ChunkPlanner::plan(3 * MIB, 5 * MIB, 10_000).unwrap();
        assert!(plan.is_single_part());
        assert_eq!(plan.ranges[0], ByteRange::new(0, 3 * MIB));
    }

    #[test]
    fn exactly_min_part_size_is_single_part_and_single_shot() {
        let plan = ChunkPlanner::plan(5 * MIB, 5 * MIB, 10_000).unwrap();
        assert!(plan.is_single_part());
        assert!(ChunkPlanner::single_shot(5 * MIB, 5 * MIB));
        assert!(!ChunkPlanner::single_shot(5 * MIB + 1, 5 * MIB));
    }

    #[test]
    fn part_size_grows_to_respect_part_count() {
        // 100 MiB across at most 4 parts needs 25 MiB parts, above the 5 MiB minimum.
        let plan = ChunkPlanner::plan(100 * MIB, 5 * MIB, 4).unwrap();
        assert_eq!(plan.part_count(), 4);
        assert_eq!(plan.part_size, 25 * MIB);
        assert_plan_valid(&plan, 100 * MIB, 4);
    }

    #[test]
    fn min_part_size_clamped_to_provider_floor() {
        let plan = ChunkPlanner::plan(20 * MIB, 1, 10_000).unwrap();
        assert_eq!(plan.part_size, MIN_PART_SIZE);
        assert_eq!(plan.part_count(), 4);
    }

    #[test]
    fn oversized_file_rejected() {
        let err = ChunkPlanner::plan(MAX_PART_SIZE + 1, 5 * MIB, 1).unwrap_err();
        assert!(matches!(err, PlanError::SizeExceedsProviderLimits { .. }));
    }

    #[test]
    fn invalid_part_count_rejected() {
        assert!(matches!(
            ChunkPlanner::plan(MIB, 5 * MIB, 0),
            Err(PlanError::InvalidParameters(_))
        ));
        assert!(matches!(
            ChunkPlanner::plan(MIB, 5 * MIB, MAX_PART_COUNT + 1),
            Err(PlanError::InvalidParameters(_))
        ));
    }

    #[test]
    fn plan_correctness_across_sizes() {
        for total in [
            1,
            MIB - 1,
            5 * MIB,
            5 * MIB + 1,
            17 * MIB + 13,
            256 * MIB,
            1024 * MIB + 7,
        ] {
            let plan = ChunkPlanner::plan(total, 5 * MIB, 10_000).unwrap();
            assert_plan_valid(&plan, total, 10_000);
        }
    }
}
