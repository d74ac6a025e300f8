use crate::anonymize::mask::Mask;
use crate::frame::{Frame, Rect};

/// Write `patch` into `frame` at `rect` wherever `mask` is set.
///
/// Binary alpha: masked pixels take the patch value, every other pixel
/// (unmasked inside `rect`, or anywhere outside it) keeps its original bytes.
/// `rect` is clipped to the frame and to the patch/mask extents.
pub fn composite(frame: &mut Frame, rect: Rect, patch: &Frame, mask: &Mask) {
    let Some(rect) = rect.clip_to(frame.width, frame.height) else {
        return;
    };
    let w = rect.w.min(patch.width).min(mask.width());
    let h = rect.h.min(patch.height).min(mask.height());
    for ly in 0..h {
        for lx in 0..w {
            if mask.get(lx, ly) {
                frame.set_pixel(rect.x + lx, rect.y + ly, patch.pixel(lx, ly));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anonymize::mask::fill_polygon;
    use crate::anonymize::points::Point;
    use proptest::prelude::*;

    #[test]
    fn only_masked_pixels_change() {
        let original = Frame::from_fn(8, 8, |x, y| [x as u8, y as u8, 9]);
        let mut frame = Frame::new(original.as_bytes().to_vec(), 8, 8).unwrap();
        let rect = Rect::new(2, 3, 3, 2);
        let patch = Frame::filled(3, 2, [255, 255, 255]);
        let mut mask = Mask::new(3, 2);
        mask.set(0, 0);
        mask.set(2, 1);

        composite(&mut frame, rect, &patch, &mask);

        assert_eq!(frame.pixel(2, 3), [255, 255, 255]);
        assert_eq!(frame.pixel(4, 4), [255, 255, 255]);
        assert_eq!(frame.pixel(3, 3), original.pixel(3, 3));
        assert_eq!(frame.pixel(1, 3), original.pixel(1, 3));
        assert_eq!(frame.pixel(5, 4), original.pixel(5, 4));
    }

    #[test]
    fn rect_past_the_edge_is_clipped() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0]);
        let patch = Frame::filled(3, 3, [7, 7, 7]);
        let mut mask = Mask::new(3, 3);
        for y in 0..3 {
            for x in 0..3 {
                mask.set(x, y);
            }
        }
        composite(&mut frame, Rect::new(2, 2, 3, 3), &patch, &mask);
        assert_eq!(frame.pixel(3, 3), [7, 7, 7]);
        assert_eq!(frame.pixel(1, 1), [0, 0, 0]);
    }

    proptest! {
        #[test]
        fn untouched_outside_rect_and_mask(
            x in 0u32..30,
            y in 0u32..30,
            w in 3u32..20,
            h in 3u32..20,
            apex in 0i32..20,
        ) {
            let original = Frame::from_fn(40, 40, |px, py| [px as u8, py as u8, (px ^ py) as u8]);
            let mut frame = Frame::new(original.as_bytes().to_vec(), 40, 40).unwrap();
            let rect = Rect::new(x, y, w, h);
            let patch = Frame::filled(w, h, [1, 2, 3]);
            let mut mask = Mask::new(w, h);
            let apex = apex.min(w as i32 - 1);
            fill_polygon(&mut mask, &[
                Point::new(apex, 0),
                Point::new(w as i32 - 1, h as i32 - 1),
                Point::new(0, h as i32 - 1),
            ]);

            composite(&mut frame, rect, &patch, &mask);

            for py in 0..40 {
                for px in 0..40 {
                    let inside = rect.contains(px, py);
                    if !inside || !mask.get(px - x, py - y) {
                        prop_assert_eq!(frame.pixel(px, py), original.pixel(px, py));
                    } else {
                        prop_assert_eq!(frame.pixel(px, py), [1, 2, 3]);
                    }
                }
            }
        }
    }
}
