use crate::anonymize::RegionError;
use crate::frame::{Frame, CHANNELS};

/// Replace each cell of a `blocks` x `blocks` grid with the cell's mean color.
///
/// Grid lines sit at `floor(i * len / blocks)`, so when a dimension does not
/// divide evenly the cells differ by at most one pixel. Cells that come out
/// empty (more blocks than pixels) are skipped, so each axis uses at most one
/// block per pixel. Means are rounded to nearest.
///
/// The grid depends only on the buffer size, so running this twice with the
/// same `blocks` leaves the buffer unchanged the second time.
pub fn pixelate(buf: &mut Frame, blocks: u32) -> Result<(), RegionError> {
    if blocks == 0 {
        return Err(RegionError::InvalidBlocks);
    }
    let xs = grid_lines(buf.width, blocks);
    let ys = grid_lines(buf.height, blocks);

    for rows in ys.windows(2) {
        for cols in xs.windows(2) {
            let (y0, y1, x0, x1) = (rows[0], rows[1], cols[0], cols[1]);
            if x0 == x1 || y0 == y1 {
                continue;
            }
            let mean = cell_mean(buf, x0, x1, y0, y1);
            for y in y0..y1 {
                for x in x0..x1 {
                    buf.set_pixel(x, y, mean);
                }
            }
        }
    }
    Ok(())
}

fn grid_lines(len: u32, blocks: u32) -> Vec<u32> {
    let blocks = blocks.min(len.max(1));
    (0..=blocks as u64)
        .map(|i| (i * len as u64 / blocks as u64) as u32)
        .collect()
}

fn cell_mean(buf: &Frame, x0: u32, x1: u32, y0: u32, y1: u32) -> [u8; 3] {
    let mut sums = [0u64; CHANNELS];
    for y in y0..y1 {
        for x in x0..x1 {
            let px = buf.pixel(x, y);
            for (sum, v) in sums.iter_mut().zip(px) {
                *sum += v as u64;
            }
        }
    }
    let count = (x1 - x0) as u64 * (y1 - y0) as u64;
    sums.map(|sum| ((sum + count / 2) / count) as u8)
}
