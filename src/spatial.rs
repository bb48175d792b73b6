use std::cmp::Ordering;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// Bounding box of a drawn item, relative to the scrolling container.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemPosition {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// id -> geometry map refreshed once per paint, answering directional
/// nearest-neighbour queries.
#[derive(Debug, Clone)]
pub struct SpatialIndex {
    positions: HashMap<String, ItemPosition>,
    column_threshold: f64,
    row_threshold: f64,
}

impl SpatialIndex {
    pub fn new(column_threshold: f64, row_threshold: f64) -> Self {
        SpatialIndex {
            positions: HashMap::new(),
            column_threshold,
            row_threshold,
        }
    }

    /// Drops every recorded position. Called before each paint records, so a
    /// removed item can never be a query result.
    pub fn begin_pass(&mut self) {
        self.positions.clear();
    }

    pub fn record(&mut self, position: ItemPosition) {
        self.positions.insert(position.id.clone(), position);
    }

    pub fn retain<'a, I>(&mut self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let keep: Vec<&str> = ids.into_iter().collect();
        self.positions.retain(|id, _| keep.contains(&id.as_str()));
    }

    pub fn position(&self, id: &str) -> Option<&ItemPosition> {
        self.positions.get(id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Closest item strictly on the `direction` side of `current`.
    ///
    /// Vertical moves only consider items whose left edge is within the
    /// column threshold; horizontal moves only those whose top edge is within
    /// the row threshold. There is no fallback outside those bands.
    pub fn query(&self, current: &str, direction: Direction) -> Option<String> {
        let origin = self.positions.get(current)?;
        self.positions
            .values()
            .filter(|candidate| candidate.id != origin.id)
            .filter_map(|candidate| {
                let dx = candidate.x - origin.x;
                let dy = candidate.y - origin.y;
                let (along, across, threshold) = match direction {
                    Direction::Up => (-dy, dx, self.column_threshold),
                    Direction::Down => (dy, dx, self.column_threshold),
                    Direction::Left => (-dx, dy, self.row_threshold),
                    Direction::Right => (dx, dy, self.row_threshold),
                };
                if along <= 0.0 || across.abs() > threshold {
                    return None;
                }
                Some((along, across.abs(), candidate.id.as_str()))
            })
            .min_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(Ordering::Equal)
                    .then(a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
                    .then_with(|| a.2.cmp(b.2))
            })
            .map(|(_, _, id)| id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn pos(id: &str, x: f64, y: f64) -> ItemPosition {
        ItemPosition {
            id: id.into(),
            x,
            y,
            width: 200.0,
            height: 120.0,
        }
    }

    /// Two columns, uneven card heights:
    ///
    /// ```text
    /// a (0,0)     b (240,0)
    /// c (0,140)   d (240,100)
    /// e (0,300)
    /// ```
    fn index() -> SpatialIndex {
        let mut index = SpatialIndex::new(50.0, 50.0);
        for p in [
            pos("a", 0.0, 0.0),
            pos("b", 240.0, 0.0),
            pos("c", 0.0, 140.0),
            pos("d", 240.0, 100.0),
            pos("e", 0.0, 300.0),
        ] {
            index.record(p);
        }
        index
    }

    #[test]
    fn vertical_moves_stay_in_column() {
        let index = index();
        assert_eq!(index.query("a", Direction::Down), Some("c".into()));
        assert_eq!(index.query("c", Direction::Down), Some("e".into()));
        assert_eq!(index.query("e", Direction::Up), Some("c".into()));
        assert_eq!(index.query("b", Direction::Down), Some("d".into()));
        // nothing below d in its column, and no fallback to column 0
        assert_eq!(index.query("d", Direction::Down), None);
        assert_eq!(index.query("a", Direction::Up), None);
    }

    #[test]
    fn horizontal_moves_need_row_alignment() {
        let index = index();
        assert_eq!(index.query("a", Direction::Right), Some("b".into()));
        assert_eq!(index.query("d", Direction::Left), Some("c".into()));
        // e is 200 below d: outside the row band
        assert_eq!(index.query("e", Direction::Right), None);
        assert_eq!(index.query("b", Direction::Right), None);
    }

    #[test]
    fn results_always_satisfy_direction() {
        let index = index();
        for id in ["a", "b", "c", "d", "e"] {
            let origin = index.position(id).unwrap().clone();
            for dir in [
                Direction::Up,
                Direction::Down,
                Direction::Left,
                Direction::Right,
            ] {
                if let Some(hit) = index.query(id, dir) {
                    let p = index.position(&hit).unwrap();
                    let ok = match dir {
                        Direction::Up => p.y < origin.y,
                        Direction::Down => p.y > origin.y,
                        Direction::Left => p.x < origin.x,
                        Direction::Right => p.x > origin.x,
                    };
                    assert!(ok, "{id} {dir:?} -> {hit}");
                }
            }
        }
    }

    #[test]
    fn stale_positions_are_purged_between_passes() {
        let mut index = index();
        index.begin_pass();
        assert_eq!(index.len(), 0);
        index.record(pos("a", 0.0, 0.0));
        index.record(pos("e", 0.0, 300.0));
        assert_eq!(index.query("a", Direction::Down), Some("e".into()));
        assert_eq!(index.query("c", Direction::Up), None);
    }

    #[test]
    fn retain_drops_unlisted_items() {
        let mut index = index();
        index.retain(["a", "c"]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.query("c", Direction::Down), None);
        assert_eq!(index.query("c", Direction::Up), Some("a".into()));
    }

    #[test]
    fn ties_break_on_offset_then_id() {
        let mut index = SpatialIndex::new(50.0, 50.0);
        index.record(pos("origin", 100.0, 0.0));
        index.record(pos("z", 100.0, 150.0));
        index.record(pos("y", 130.0, 150.0));
        index.record(pos("x", 70.0, 150.0));
        assert_eq!(index.query("origin", Direction::Down), Some("z".into()));
        index.record(pos("a", 100.0, 150.0));
        assert_eq!(index.query("origin", Direction::Down), Some("a".into()));
    }
}
