//! Uniform grid over axis-aligned boxes for adjacency candidate queries.
//!
//! Each box is registered in every cell it overlaps, so a query only has to
//! look at the cells its own box covers. Results are a conservative
//! over-approximation: callers still run the exact `Aabb::intersects` and
//! penetration tests.
//!
//! ## Cell Size Choice
//!
//! The cell size should be on the order of one fragment. [`SpatialGrid::for_boxes`]
//! uses the mean of the largest box extents, which keeps every box within a
//! handful of cells. A cell size far below the fragment size registers each
//! box in many cells; one far above degenerates into brute force.

use crate::physics::Aabb;
use bevy::math::Vec3;
use std::collections::HashMap;

type Cell = (i32, i32, i32);

/// Spatial hash of boxes keyed by integer cell coordinates.
#[derive(Debug, Clone)]
pub struct SpatialGrid<T> {
    cell_size: f32,
    /// Map from cell coordinates to the items overlapping that cell
    cells: HashMap<Cell, Vec<T>>,
}

impl<T: Copy + Ord> SpatialGrid<T> {
    pub fn new(cell_size: f32) -> Self {
        Self {
            cell_size: if cell_size > 0.0 { cell_size } else { 1.0 },
            cells: HashMap::new(),
        }
    }

    /// Grid sized for `boxes` and filled with them.
    pub fn for_boxes(boxes: &[(T, Aabb)]) -> Self {
        let largest: f32 = boxes
            .iter()
            .map(|(_, b)| (b.half_extents() * 2.0).max_element())
            .sum();
        let mean = if boxes.is_empty() { 1.0 } else { largest / boxes.len() as f32 };
        let mut grid = Self::new(mean);
        for (item, aabb) in boxes {
            grid.insert(*item, aabb);
        }
        grid
    }

    /// Compute grid cell coordinates for a world position
    fn world_to_cell(&self, pos: Vec3) -> Cell {
        let c = (pos / self.cell_size).floor();
        (c.x as i32, c.y as i32, c.z as i32)
    }

    fn cell_range(&self, aabb: &Aabb) -> impl Iterator<Item = Cell> {
        let lo = self.world_to_cell(aabb.min);
        let hi = self.world_to_cell(aabb.max);
        (lo.0..=hi.0).flat_map(move |x| {
            (lo.1..=hi.1).flat_map(move |y| (lo.2..=hi.2).map(move |z| (x, y, z)))
        })
    }

    /// Register `item` in every cell its box touches.
    pub fn insert(&mut self, item: T, aabb: &Aabb) {
        for cell in self.cell_range(aabb).collect::<Vec<_>>() {
            self.cells.entry(cell).or_default().push(item);
        }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Distinct items sharing at least one cell with `aabb`, excluding
    /// `item`, in ascending order.
    pub fn candidates_excluding(&self, item: T, aabb: &Aabb) -> Vec<T> {
        let mut found: Vec<T> = self
            .cell_range(aabb)
            .filter_map(|cell| self.cells.get(&cell))
            .flatten()
            .copied()
            .filter(|other| *other != item)
            .collect();
        found.sort_unstable();
        found.dedup();
        found
    }
}
