use crate::model::BoundingBox;

/// One-dimensional overlap of `[a0, a1]` and `[b0, b1]` divided by the shorter interval.
pub(crate) fn axis_overlap_ratio(a0: f32, a1: f32, b0: f32, b1: f32) -> f32 {
    let shorter = (a1 - a0).min(b1 - b0);
    if shorter <= 0.0 {
        return 0.0;
    }
    let overlap = (a1.min(b1) - a0.max(b0)).max(0.0);
    overlap / shorter
}

pub(crate) fn horizontal_overlap_ratio(a: &BoundingBox, b: &BoundingBox) -> f32 {
    axis_overlap_ratio(a.x0, a.x1, b.x0, b.x1)
}

pub(crate) fn vertical_overlap_ratio(a: &BoundingBox, b: &BoundingBox) -> f32 {
    axis_overlap_ratio(a.y0, a.y1, b.y0, b.y1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contained_interval_has_full_ratio() {
        assert_eq!(axis_overlap_ratio(50.0, 130.0, 67.0, 95.0), 1.0);
    }

    #[test]
    fn disjoint_intervals_have_zero_ratio() {
        assert_eq!(axis_overlap_ratio(0.0, 10.0, 20.0, 30.0), 0.0);
        assert_eq!(axis_overlap_ratio(0.0, 10.0, 10.0, 30.0), 0.0);
    }

    #[test]
    fn ratio_uses_shorter_interval() {
        // overlap 5 over the shorter length 10
        assert_eq!(axis_overlap_ratio(0.0, 10.0, 5.0, 100.0), 0.5);
    }

    #[test]
    fn zero_length_interval_never_overlaps() {
        assert_eq!(axis_overlap_ratio(5.0, 5.0, 0.0, 10.0), 0.0);
    }

    #[test]
    fn box_ratios_are_per_axis() {
        let a = BoundingBox::new(0.0, 0.0, 100.0, 10.0);
        let b = BoundingBox::new(0.0, 9.0, 100.0, 19.0);
        assert_eq!(horizontal_overlap_ratio(&a, &b), 1.0);
        assert!((vertical_overlap_ratio(&a, &b) - 0.1).abs() < 1e-6);
    }
}
