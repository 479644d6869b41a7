use crate::node::Bounds;

/// Largest-area rectangle; the first one wins ties.
pub fn largest_rectangle(rects: &[Bounds]) -> Option<Bounds> {
    let mut best: Option<Bounds> = None;
    for rect in rects {
        match best {
            Some(current) if current.area() >= rect.area() => {}
            _ => best = Some(*rect),
        }
    }
    best
}

/// True when `other` lies completely beyond one edge of `outer`, i.e. the
/// two do not overlap on at least one axis. Touching edges count as inside.
pub fn is_outside(outer: Bounds, other: Bounds) -> bool {
    other.x > outer.right()
        || other.y > outer.bottom()
        || other.right() < outer.x
        || other.bottom() < outer.y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn far_rectangle_is_outside() {
        let outer = Bounds::new(0, 0, 100, 100);
        assert!(is_outside(outer, Bounds::new(200, 200, 10, 10)));
        assert!(is_outside(outer, Bounds::new(-50, 10, 20, 10)));
    }

    #[test]
    fn overlapping_or_touching_is_inside() {
        let outer = Bounds::new(0, 0, 100, 100);
        assert!(!is_outside(outer, Bounds::new(90, 90, 50, 50)));
        assert!(!is_outside(outer, Bounds::new(100, 0, 10, 10)));
        assert!(!is_outside(outer, Bounds::new(10, 10, 5, 5)));
    }

    #[test]
    fn extreme_rectangles_do_not_overflow() {
        let huge = Bounds::new(i64::MAX - 1, i64::MAX - 1, i64::MAX, i64::MAX);
        assert!(is_outside(Bounds::new(0, 0, 100, 100), huge));
        assert_eq!(largest_rectangle(&[Bounds::new(0, 0, 1, 1), huge]), Some(huge));
    }

    #[test]
    fn picks_largest_area() {
        let rects = [
            Bounds::new(0, 0, 10, 10),
            Bounds::new(5, 5, 30, 20),
            Bounds::new(0, 0, 20, 30),
        ];
        assert_eq!(largest_rectangle(&rects), Some(Bounds::new(5, 5, 30, 20)));
        assert_eq!(largest_rectangle(&[]), None);
    }
}
