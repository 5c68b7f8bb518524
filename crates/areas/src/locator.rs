use core_types::{AreaAssignment, Coordinates, UnresolvedReason};
use tracing::warn;

use crate::{AreaIndex, Resolution};

/// Turns optional photo positions into area assignments against one index.
#[derive(Debug, Clone, Copy)]
pub struct Locator<'a> {
    index: &'a AreaIndex,
}

impl<'a> Locator<'a> {
    pub fn new(index: &'a AreaIndex) -> Self {
        Self { index }
    }

    pub fn assign(&self, coordinates: Option<Coordinates>) -> AreaAssignment {
        self.resolve(coordinates).0
    }

    /// Like [`Locator::assign`], also returning the raw resolution when a lookup happened.
    pub fn resolve(&self, coordinates: Option<Coordinates>) -> (AreaAssignment, Option<Resolution>) {
        let Some(point) = coordinates else {
            return (
                AreaAssignment::Unresolved {
                    reason: UnresolvedReason::NoCoordinates,
                },
                None,
            );
        };

        let resolution = self.index.locate(point);
        if let Resolution::Ambiguous { chosen, others } = &resolution {
            warn!(
                %point,
                %chosen,
                others = ?others,
                "position falls inside overlapping areas"
            );
        }
        (resolution.assignment(), Some(resolution))
    }
}
