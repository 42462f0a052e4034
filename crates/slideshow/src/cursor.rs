#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Backward,
    Forward,
}

impl Direction {
    pub fn step(&self) -> isize {
        match self {
            Self::Backward => -1,
            Self::Forward => 1,
        }
    }
}

/// Per-user position into a catalog list.
///
/// The cursor never stores the catalog length: the catalog may grow or shrink between
/// accesses, so every read takes the current length and repairs a stale index first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RotationCursor {
    index: usize,
}

impl RotationCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(index: usize) -> Self {
        Self { index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Returns the valid index for a catalog of `length` items, resetting to the first item
    /// when the stored index fell out of bounds. `None` means there is nothing to show.
    pub fn resolve(&mut self, length: usize) -> Option<usize> {
        if length == 0 {
            return None;
        }
        if self.index >= length {
            self.index = 0;
        }
        Some(self.index)
    }

    /// Moves by `step` items with wrap-around in both directions.
    pub fn advance(&mut self, step: isize, length: usize) -> Option<usize> {
        let current = self.resolve(length)?;
        let length = length as i128;
        let next = (current as i128 + step as i128).rem_euclid(length);
        self.index = next as usize;
        Some(self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_step_wraps_to_first_item() {
        let mut cursor = RotationCursor::at(2);
        assert_eq!(cursor.advance(1, 3), Some(0));
    }

    #[test]
    fn backward_step_wraps_to_last_item() {
        let mut cursor = RotationCursor::new();
        assert_eq!(cursor.advance(-1, 3), Some(2));
        assert_eq!(cursor.advance(-1, 3), Some(1));
    }

    #[test]
    fn stale_index_resets_when_catalog_shrinks() {
        let mut cursor = RotationCursor::at(4);
        assert_eq!(cursor.resolve(2), Some(0));
        assert_eq!(cursor.advance(1, 2), Some(1));
    }

    #[test]
    fn empty_catalog_has_no_position() {
        let mut cursor = RotationCursor::at(1);
        assert_eq!(cursor.resolve(0), None);
        assert_eq!(cursor.advance(1, 0), None);
        assert_eq!(cursor.index(), 1);
    }

    #[test]
    fn large_steps_still_land_in_range() {
        let mut cursor = RotationCursor::new();
        assert_eq!(cursor.advance(-7, 3), Some(2));
        assert_eq!(cursor.advance(10, 3), Some(0));
    }
}
