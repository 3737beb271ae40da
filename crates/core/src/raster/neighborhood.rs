//! Moving-window neighborhoods

/// Cells considered around a center cell by focal operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neighborhood {
    /// 3x3 window (center + 8 neighbors)
    Queen3x3,
    /// Center + 4 cardinal neighbors
    Rook3x3,
}

impl Neighborhood {
    /// Relative (row, col) offsets, center included, in row-major order
    pub fn offsets(&self) -> Vec<(isize, isize)> {
        let mut offsets = Vec::with_capacity(9);
        for dr in -1..=1 {
            for dc in -1..=1 {
                let keep = match self {
                    Neighborhood::Rook3x3 => dr == 0 || dc == 0,
                    _ => true,
                };
                if keep {
                    offsets.push((dr, dc));
                }
            }
        }
        offsets
    }
}
