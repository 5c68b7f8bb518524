//! Per-area status rollups, always recomputed in full from the store.

use std::collections::{BTreeMap, BTreeSet};

use core_types::{AreaId, ImageStatus};
use serde::Serialize;

use crate::store::Store;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub not_started: usize,
    pub partial: usize,
    pub completed: usize,
}

impl StatusCounts {
    pub fn add(&mut self, status: ImageStatus) {
        *self.slot(status) += 1;
    }

    pub fn get(&self, status: ImageStatus) -> usize {
        match status {
            ImageStatus::NotStarted => self.not_started,
            ImageStatus::Partial => self.partial,
            ImageStatus::Completed => self.completed,
        }
    }

    pub fn total(&self) -> usize {
        self.not_started + self.partial + self.completed
    }

    /// Most frequent status; ties go to the lowest [`ImageStatus::tie_rank`]. Empty is
    /// `NotStarted`.
    pub fn mode(&self) -> ImageStatus {
        if self.total() == 0 {
            return ImageStatus::NotStarted;
        }
        ImageStatus::ALL
            .into_iter()
            .max_by(|a, b| {
                self.get(*a)
                    .cmp(&self.get(*b))
                    .then_with(|| b.tie_rank().cmp(&a.tie_rank()))
            })
            .unwrap_or_default()
    }

    fn slot(&mut self, status: ImageStatus) -> &mut usize {
        match status {
            ImageStatus::NotStarted => &mut self.not_started,
            ImageStatus::Partial => &mut self.partial,
            ImageStatus::Completed => &mut self.completed,
        }
    }
}

impl FromIterator<ImageStatus> for StatusCounts {
    fn from_iter<I: IntoIterator<Item = ImageStatus>>(iter: I) -> Self {
        let mut counts = StatusCounts::default();
        for status in iter {
            counts.add(status);
        }
        counts
    }
}

pub fn aggregate_statuses<I: IntoIterator<Item = ImageStatus>>(statuses: I) -> ImageStatus {
    statuses.into_iter().collect::<StatusCounts>().mode()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AreaRollup {
    pub area_id: AreaId,
    pub status: ImageStatus,
    pub counts: StatusCounts,
    pub comment_digest: Vec<String>,
}

/// Rollup for every mapped area (members or not) and for any area id still referenced by a
/// record.
pub fn aggregate_areas(store: &Store) -> BTreeMap<AreaId, AreaRollup> {
    let mut groups: BTreeMap<AreaId, (StatusCounts, Vec<&str>)> = store
        .areas
        .keys()
        .map(|id| (id.clone(), Default::default()))
        .collect();

    for record in store.records.values().filter(|r| !r.is_excluded()) {
        let Some(area_id) = record.area_id() else {
            continue;
        };
        let (counts, comments) = groups.entry(area_id.clone()).or_default();
        counts.add(record.status);
        comments.push(&record.comment);
    }

    groups
        .into_iter()
        .map(|(area_id, (counts, comments))| {
            let rollup = AreaRollup {
                area_id: area_id.clone(),
                status: counts.mode(),
                counts,
                comment_digest: comment_digest(comments),
            };
            (area_id, rollup)
        })
        .collect()
}

/// Distinct, trimmed, non-empty comment lines, sorted.
pub fn comment_digest<'a, I: IntoIterator<Item = &'a str>>(comments: I) -> Vec<String> {
    comments
        .into_iter()
        .flat_map(str::lines)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
