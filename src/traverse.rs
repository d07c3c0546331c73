//! Pyramid Traverser (C7): breadth-first quad-tree walk driven by a visitor,
//! plus the render-order selection formula used to decide how deep to
//! descend for a given viewport (§4.7). Grounded in the teacher's
//! `prefetch::PrefetchCalculator::level_for_scale` (level selection from a
//! target resolution) generalized to a full BFS with bounded queue depth,
//! which the teacher's flat-level model never needed.

use std::collections::VecDeque;

/// Queue capacity for `traverse` (§4.7): sized for the worst case of a few
/// levels of a fully-descending visitor before the caller notices overflow.
const QUEUE_CAPACITY: usize = 1024;

/// Hard ceiling on `desired_order`, independent of a survey's own
/// `order_max` (§4.7).
pub const HARD_ORDER_CEILING: i32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitResult {
    Skip,
    Stop,
    Descend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraverseOverflow;

/// Breadth-first walk starting from the 12 base pixels at order 0. `visit`
/// decides whether to enqueue a node's 4 children (`Descend`), leave them
/// unvisited (`Skip`), or halt the whole walk (`Stop`). Returns an error if
/// the fixed-capacity queue would overflow rather than silently dropping
/// work (§4.7, §7 `TRAVERSAL_OVERFLOW`).
pub fn traverse(mut visit: impl FnMut(i32, i32) -> VisitResult) -> Result<(), TraverseOverflow> {
    let mut queue: VecDeque<(i32, i32)> = VecDeque::with_capacity(QUEUE_CAPACITY);
    for pix in 0..12 {
        queue.push_back((0, pix));
    }

    while let Some((order, pix)) = queue.pop_front() {
        match visit(order, pix) {
            VisitResult::Skip => {}
            VisitResult::Stop => return Ok(()),
            VisitResult::Descend => {
                if queue.len() + 4 > QUEUE_CAPACITY {
                    return Err(TraverseOverflow);
                }
                let base = pix * 4;
                for i in 0..4 {
                    queue.push_back((order + 1, base + i));
                }
            }
        }
    }
    Ok(())
}

/// `desired_order` from painter pixel size and the angular radius of the
/// visible region (§4.7). `proj_scaling_x` is the projector's horizontal
/// scaling factor; `angle` and `fb_width` are in radians and pixels.
pub fn desired_order(fb_width: f64, proj_scaling_x: f64, angle: f64, tile_width: u32) -> i32 {
    let pix_per_rad = fb_width / proj_scaling_x.atan() / 2.0;
    let ratio = (pix_per_rad * angle) / (4.0 * std::f64::consts::SQRT_2 * tile_width as f64);
    ratio.log2().round() as i32
}

/// Clamps a raw `desired_order` to the survey's declared range and the hard
/// ceiling (§4.7).
pub fn render_order_for(desired: i32, order_min: i32, order_max: i32) -> i32 {
    let ceiling = order_max.min(HARD_ORDER_CEILING);
    desired.clamp(order_min, ceiling)
}

/// §4.7 "Fallback-on-low-zoom": at very coarse zoom, force the all-sky path
/// and use a coarser default split. Returns `(split_order_default,
/// force_use_allsky)`.
pub fn low_zoom_fallback(render_order: i32, allsky_available: bool) -> (i32, bool) {
    if render_order < -5 && allsky_available {
        (2, true)
    } else {
        (3, false)
    }
}

/// Thin wrapper over `traverse` implementing the rendering-specific visitor
/// contract (§4.7 "Rendering traversal"): clip, descend until `render_order`,
/// then hand the tile to `render` with a tessellation `split` factor.
pub fn render_traverse(
    render_order: i32,
    split_order: i32,
    mut is_clipped: impl FnMut(i32, i32) -> bool,
    mut render: impl FnMut(i32, i32, u32),
) -> Result<(), TraverseOverflow> {
    traverse(|order, pix| {
        if is_clipped(order, pix) {
            return VisitResult::Skip;
        }
        if order < render_order {
            return VisitResult::Descend;
        }
        let split = 1u32 << (split_order - render_order).max(0);
        render(order, pix, split);
        VisitResult::Skip
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bfs_visits_all_12_base_pixels_when_skipping() {
        let mut seen = Vec::new();
        traverse(|order, pix| {
            seen.push((order, pix));
            VisitResult::Skip
        })
        .unwrap();
        assert_eq!(seen.len(), 12);
        assert!(seen.iter().all(|&(o, _)| o == 0));
    }

    #[test]
    fn stop_halts_the_walk_immediately() {
        let mut count = 0;
        traverse(|_, _| {
            count += 1;
            VisitResult::Stop
        })
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn overflow_is_reported_once_the_queue_cannot_hold_the_next_generation() {
        // A visitor that always descends must eventually overflow the
        // 1024-slot queue (§8 scenario 6).
        let result = traverse(|_, _| VisitResult::Descend);
        assert_eq!(result, Err(TraverseOverflow));
    }

    #[test]
    fn desired_order_is_monotonic_in_pix_per_rad_times_angle() {
        let small = desired_order(1000.0, 1.0, 0.01, 256);
        let large = desired_order(1000.0, 1.0, 1.0, 256);
        assert!(large >= small);
    }

    #[test]
    fn render_order_clamps_to_hard_ceiling() {
        assert_eq!(render_order_for(50, 0, 20), HARD_ORDER_CEILING);
    }

    #[test]
    fn low_zoom_forces_allsky_only_when_available() {
        assert_eq!(low_zoom_fallback(-6, true), (2, true));
        assert_eq!(low_zoom_fallback(-6, false), (3, false));
        assert_eq!(low_zoom_fallback(-5, true), (3, false));
    }
}
