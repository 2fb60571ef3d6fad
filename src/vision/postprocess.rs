//! DB (differentiable binarization) post-processing
//!
//! Turns the detector's per-pixel text probability map into scored
//! quadrilaterals: threshold, trace outer contours, fit minimum-area
//! rectangles, score them against the map, then expand ("unclip") each box
//! because the model predicts shrunken text kernels.

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::min_area_rect;
use ndarray::ArrayView2;

/// Post-processing parameters
#[derive(Debug, Clone)]
pub struct DbParams {
    /// Pixel probability above which a pixel counts as text
    pub threshold: f32,
    /// Minimum mean probability inside a box
    pub box_threshold: f32,
    /// Expansion ratio applied to each box
    pub unclip_ratio: f32,
    /// Maximum number of contours examined
    pub max_candidates: usize,
    /// Boxes with a shorter side (in map pixels) are discarded
    pub min_size: f32,
}

impl Default for DbParams {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            box_threshold: 0.5,
            unclip_ratio: 1.6,
            max_candidates: 1000,
            min_size: 3.0,
        }
    }
}

/// A detected text box in destination image coordinates
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBox {
    /// top-left, top-right, bottom-right, bottom-left
    pub points: [[f32; 2]; 4],
    pub score: f32,
}

/// Extract text boxes from a probability map of shape (H, W)
///
/// `dest` is the (width, height) the boxes are scaled to.
pub fn boxes_from_probability_map(
    prob: ArrayView2<f32>,
    params: &DbParams,
    dest: (u32, u32),
) -> Vec<DetectedBox> {
    let (map_h, map_w) = prob.dim();
    if map_h == 0 || map_w == 0 {
        return Vec::new();
    }

    let bitmap = GrayImage::from_fn(map_w as u32, map_h as u32, |x, y| {
        if prob[[y as usize, x as usize]] > params.threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    });

    let scale_x = dest.0 as f32 / map_w as f32;
    let scale_y = dest.1 as f32 / map_h as f32;
    let max_x = dest.0 as f32;
    let max_y = dest.1 as f32;

    let mut boxes = Vec::new();
    let contours = find_contours::<i32>(&bitmap);

    for contour in contours
        .iter()
        .filter(|c| c.border_type == BorderType::Outer)
        .take(params.max_candidates)
    {
        if contour.points.len() < 4 {
            continue;
        }

        let rect = min_area_rect(&contour.points).map(|p| [p.x as f32, p.y as f32]);
        if shortest_side(&rect) < params.min_size {
            continue;
        }

        let score = box_score(&prob, &rect);
        if score < params.box_threshold {
            continue;
        }

        let expanded = unclip(&rect, params.unclip_ratio);
        if shortest_side(&expanded) < params.min_size + 2.0 {
            continue;
        }

        let points = order_points(expanded).map(|[x, y]| {
            [
                (x * scale_x).clamp(0.0, max_x),
                (y * scale_y).clamp(0.0, max_y),
            ]
        });

        boxes.push(DetectedBox { points, score });
    }

    sort_reading_order(&mut boxes);
    boxes
}

fn distance(a: [f32; 2], b: [f32; 2]) -> f32 {
    ((a[0] - b[0]).powi(2) + (a[1] - b[1]).powi(2)).sqrt()
}

/// Shorter side of a rectangle given as four consecutive corners
fn shortest_side(rect: &[[f32; 2]; 4]) -> f32 {
    distance(rect[0], rect[1]).min(distance(rect[1], rect[2]))
}

fn cross(o: [f32; 2], a: [f32; 2], b: [f32; 2]) -> f32 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// Point inside (or on the edge of) a convex quadrilateral
fn contains(quad: &[[f32; 2]; 4], point: [f32; 2]) -> bool {
    let signs: Vec<f32> = (0..4).map(|i| cross(quad[i], quad[(i + 1) % 4], point)).collect();
    signs.iter().all(|&s| s >= -1e-3) || signs.iter().all(|&s| s <= 1e-3)
}

/// Mean probability of the map pixels covered by the quadrilateral
fn box_score(prob: &ArrayView2<f32>, quad: &[[f32; 2]; 4]) -> f32 {
    let (map_h, map_w) = prob.dim();
    let min_x = quad.iter().map(|p| p[0]).fold(f32::INFINITY, f32::min).floor().max(0.0) as usize;
    let max_x = (quad.iter().map(|p| p[0]).fold(f32::NEG_INFINITY, f32::max).ceil() as usize)
        .min(map_w - 1);
    let min_y = quad.iter().map(|p| p[1]).fold(f32::INFINITY, f32::min).floor().max(0.0) as usize;
    let max_y = (quad.iter().map(|p| p[1]).fold(f32::NEG_INFINITY, f32::max).ceil() as usize)
        .min(map_h - 1);

    let mut sum = 0.0f32;
    let mut count = 0usize;
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            if contains(quad, [x as f32, y as f32]) {
                sum += prob[[y, x]];
                count += 1;
            }
        }
    }

    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Grow a rectangle outwards by `area * ratio / perimeter` on every side
fn unclip(rect: &[[f32; 2]; 4], ratio: f32) -> [[f32; 2]; 4] {
    let mut area = 0.0f32;
    let mut perimeter = 0.0f32;
    for i in 0..4 {
        let (a, b) = (rect[i], rect[(i + 1) % 4]);
        area += a[0] * b[1] - b[0] * a[1];
        perimeter += distance(a, b);
    }
    let area = (area * 0.5).abs();
    if area <= 0.0 || perimeter <= 0.0 {
        return *rect;
    }
    let offset = area * ratio / perimeter;

    let width = distance(rect[0], rect[1]);
    let height = distance(rect[0], rect[3]);
    let u = [(rect[1][0] - rect[0][0]) / width, (rect[1][1] - rect[0][1]) / width];
    let v = [(rect[3][0] - rect[0][0]) / height, (rect[3][1] - rect[0][1]) / height];
    let center = [
        rect.iter().map(|p| p[0]).sum::<f32>() / 4.0,
        rect.iter().map(|p| p[1]).sum::<f32>() / 4.0,
    ];

    let half_w = width / 2.0 + offset;
    let half_h = height / 2.0 + offset;
    let corner = |su: f32, sv: f32| {
        [
            center[0] + su * half_w * u[0] + sv * half_h * v[0],
            center[1] + su * half_w * u[1] + sv * half_h * v[1],
        ]
    };

    [
        corner(-1.0, -1.0),
        corner(1.0, -1.0),
        corner(1.0, 1.0),
        corner(-1.0, 1.0),
    ]
}

/// Order corners as top-left, top-right, bottom-right, bottom-left
fn order_points(mut points: [[f32; 2]; 4]) -> [[f32; 2]; 4] {
    points.sort_by(|a, b| a[0].total_cmp(&b[0]));
    let (mut left, mut right) = ([points[0], points[1]], [points[2], points[3]]);
    left.sort_by(|a, b| a[1].total_cmp(&b[1]));
    right.sort_by(|a, b| a[1].total_cmp(&b[1]));
    [left[0], right[0], right[1], left[1]]
}

/// Top-to-bottom, then left-to-right within a line
fn sort_reading_order(boxes: &mut [DetectedBox]) {
    const LINE_TOLERANCE: f32 = 10.0;

    boxes.sort_by(|a, b| {
        a.points[0][1]
            .total_cmp(&b.points[0][1])
            .then(a.points[0][0].total_cmp(&b.points[0][0]))
    });

    for i in 0..boxes.len().saturating_sub(1) {
        for j in (0..=i).rev() {
            let (upper, lower) = (&boxes[j], &boxes[j + 1]);
            if (lower.points[0][1] - upper.points[0][1]).abs() < LINE_TOLERANCE
                && lower.points[0][0] < upper.points[0][0]
            {
                boxes.swap(j, j + 1);
            } else {
                break;
            }
        }
    }
}
