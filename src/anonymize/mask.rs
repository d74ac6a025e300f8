//! Region masks: bounding rect + filled hull polygon raster.

use crate::anonymize::hull::{convex_hull, order_by_angle};
use crate::anonymize::points::{Point, PointCloud};
use crate::anonymize::RegionError;
use crate::frame::Rect;

/// Binary raster sized to a bounding rect. `true` = pixel belongs to the region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    /// All-clear mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Out-of-range coordinates read as clear.
    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width && y < self.height && self.bits[self.index(x, y)]
    }

    /// Out-of-range coordinates are ignored.
    pub fn set(&mut self, x: u32, y: u32) {
        if x < self.width && y < self.height {
            let i = self.index(x, y);
            self.bits[i] = true;
        }
    }

    /// Number of set pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }
}

/// Bounding rect and hull mask for a point cloud.
///
/// The hull corners are moved into rect-local coordinates and put in angular
/// order before rasterizing; an unordered vertex list would describe a
/// self-intersecting outline and leave holes in the mask.
pub fn mask(cloud: &PointCloud) -> Result<(Rect, Mask), RegionError> {
    let rect = cloud.bounding_rect();
    let mut outline: Vec<Point> = convex_hull(cloud.points())?
        .into_iter()
        .map(|p| Point::new(p.x - rect.x as i32, p.y - rect.y as i32))
        .collect();
    order_by_angle(&mut outline);

    let mut mask = Mask::new(rect.w, rect.h);
    fill_polygon(&mut mask, &outline);
    Ok((rect, mask))
}

/// Fill a simple polygon: even-odd scanline fill sampled at integer pixel
/// positions, then the outline itself so boundary pixels are always set.
pub(crate) fn fill_polygon(mask: &mut Mask, poly: &[Point]) {
    let n = poly.len();
    if n == 0 {
        return;
    }

    let mut crossings: Vec<f64> = Vec::with_capacity(n);
    for y in 0..mask.height() {
        let yf = y as f64;
        crossings.clear();
        for i in 0..n {
            let (a, b) = (poly[i], poly[(i + 1) % n]);
            let (ay, by) = (a.y as f64, b.y as f64);
            // Half-open on y so a vertex shared by two edges counts once.
            if (ay <= yf) != (by <= yf) {
                let t = (yf - ay) / (by - ay);
                crossings.push(a.x as f64 + t * (b.x as f64 - a.x as f64));
            }
        }
        crossings.sort_by(f64::total_cmp);
        for span in crossings.chunks_exact(2) {
            let start = span[0].ceil().max(0.0);
            let end = span[1].floor();
            if end < start {
                continue;
            }
            for x in start as u32..=end as u32 {
                mask.set(x, y);
            }
        }
    }

    for i in 0..n {
        draw_line(mask, poly[i], poly[(i + 1) % n]);
    }
}

/// Bresenham line, endpoints included.
fn draw_line(mask: &mut Mask, from: Point, to: Point) {
    let (mut x, mut y) = (from.x, from.y);
    let dx = (to.x - from.x).abs();
    let dy = -(to.y - from.y).abs();
    let sx = if from.x < to.x { 1 } else { -1 };
    let sy = if from.y < to.y { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        if x >= 0 && y >= 0 {
            mask.set(x as u32, y as u32);
        }
        if x == to.x && y == to.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}
