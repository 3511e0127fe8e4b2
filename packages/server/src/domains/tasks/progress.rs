//! Weighted multi-phase progress estimation.
//!
//! Turns the raw group/post/comment counters of a task into one percentage:
//!
//! ```text
//! groups   (10%) ─┐
//! posts    (30%) ─┼─► Σ weight × fraction, clamped to [0, 100]
//! comments (60%) ─┘
//! ```
//!
//! While the real comment total is unknown the comment phase measures
//! against `posts_processed × estimated_comments_per_post`, so a running
//! fetch does not sit at 0% until it finishes.

use serde::{Deserialize, Serialize};

use super::models::TaskProgress;

pub const GROUPS_WEIGHT: f64 = 10.0;
pub const POSTS_WEIGHT: f64 = 30.0;
pub const COMMENTS_WEIGHT: f64 = 60.0;

/// Pre-run assumptions for [`estimate_total`].
pub const ASSUMED_POSTS_PER_GROUP: u64 = 50;
pub const ASSUMED_COMMENTS_PER_POST: u64 = 15;
pub const MIN_ESTIMATED_TOTAL: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Groups,
    Posts,
    Comments,
    /// Only reported for tasks the pipeline has finished
    Completed,
}

/// Fraction in `[0, 1]` of each phase.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PhaseProgress {
    pub groups: f64,
    pub posts: f64,
    pub comments: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub phase: ProgressPhase,
    pub percentage: f64,
    pub per_phase: PhaseProgress,
}

impl ProgressReport {
    /// Report for a task the pipeline has completed.
    pub fn completed() -> Self {
        Self {
            phase: ProgressPhase::Completed,
            percentage: 100.0,
            per_phase: PhaseProgress {
                groups: 1.0,
                posts: 1.0,
                comments: 1.0,
            },
        }
    }
}

/// Map raw counters to a phase label and a percentage in `[0, 100]`.
///
/// A phase with `total == 0` contributes nothing. The comment phase is never
/// reported as done from counters alone; the caller switches to
/// [`ProgressReport::completed`] once the task reaches `completed`.
///
/// While the comment total is unknown, each processed post also raises the
/// comment estimate, so the percentage can dip slightly until the comments
/// of that post arrive. With a known total every counter is monotone.
pub fn calculate_progress(metrics: &TaskProgress) -> ProgressReport {
    let groups = fraction(metrics.groups_processed, metrics.groups_total);
    let posts = fraction(metrics.posts_processed, metrics.posts_total);
    let comments = if metrics.comments_total > 0 {
        fraction(metrics.comments_processed, metrics.comments_total)
    } else {
        let estimated = metrics
            .posts_processed
            .max(0)
            .saturating_mul(metrics.estimated_comments_per_post.max(0));
        fraction(metrics.comments_processed, estimated)
    };

    let phase = if metrics.groups_processed < metrics.groups_total {
        ProgressPhase::Groups
    } else if metrics.posts_processed < metrics.posts_total {
        ProgressPhase::Posts
    } else {
        ProgressPhase::Comments
    };

    let percentage =
        GROUPS_WEIGHT * groups + POSTS_WEIGHT * posts + COMMENTS_WEIGHT * comments;

    ProgressReport {
        phase,
        percentage: percentage.clamp(0.0, 100.0),
        per_phase: PhaseProgress {
            groups,
            posts,
            comments,
        },
    }
}

fn fraction(processed: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    (processed.max(0) as f64 / total as f64).min(1.0)
}

/// Flag inconsistent counters. Never fails; the calculator clamps anyway.
pub fn validate_metrics(metrics: &TaskProgress) -> Vec<String> {
    let mut warnings = Vec::new();

    let counters = [
        ("groups", metrics.groups_processed, metrics.groups_total),
        ("posts", metrics.posts_processed, metrics.posts_total),
        ("comments", metrics.comments_processed, metrics.comments_total),
    ];

    for (name, processed, total) in counters {
        if processed < 0 || total < 0 {
            warnings.push(format!(
                "{} counters are negative (processed {}, total {})",
                name, processed, total
            ));
        } else if total > 0 && processed > total {
            warnings.push(format!(
                "{} processed ({}) exceeds total ({})",
                name, processed, total
            ));
        }
    }

    if metrics.estimated_comments_per_post < 0 {
        warnings.push(format!(
            "estimated comments per post is negative ({})",
            metrics.estimated_comments_per_post
        ));
    }

    warnings
}

/// Coarse pre-run estimate of how many comments a task will collect.
///
/// `group_count × 50 posts × 15 comments`, clipped to `max_comments` when
/// given, never below 100.
pub fn estimate_total(group_count: usize, max_comments: Option<u64>) -> u64 {
    let raw = (group_count as u64)
        .saturating_mul(ASSUMED_POSTS_PER_GROUP)
        .saturating_mul(ASSUMED_COMMENTS_PER_POST);
    let capped = match max_comments {
        Some(cap) => raw.min(cap),
        None => raw,
    };
    capped.max(MIN_ESTIMATED_TOTAL)
}
