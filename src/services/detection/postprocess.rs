// Probability map → text boxes, and reading-order sorting

/// Axis-aligned text box in pixel coordinates (x1/y1 exclusive)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub score: f32,
}

impl TextBox {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    fn center_y(&self) -> f32 {
        (self.y0 + self.y1) as f32 / 2.0
    }
}

/// Thresholds for turning the detection model's output into boxes
#[derive(Debug, Clone, Copy)]
pub struct BoxParams {
    pub pixel_threshold: f32,
    pub box_threshold: f32,
    pub unclip_ratio: f32,
    pub min_size: u32,
}

impl Default for BoxParams {
    fn default() -> Self {
        Self {
            pixel_threshold: 0.3,
            box_threshold: 0.6,
            unclip_ratio: 1.5,
            min_size: 3,
        }
    }
}

/// Extract text boxes from a `width`×`height` probability map.
///
/// Pixels above `pixel_threshold` are grouped into 4-connected components;
/// each component becomes its bounding box, kept if the mean probability
/// inside the component reaches `box_threshold`. Kept boxes are grown by the
/// unclip distance `area * ratio / perimeter` and clamped to the map.
pub fn boxes_from_probability_map(
    prob: &[f32],
    width: usize,
    height: usize,
    params: &BoxParams,
) -> Vec<TextBox> {
    if prob.len() < width * height || width == 0 || height == 0 {
        return Vec::new();
    }

    let mut visited = vec![false; width * height];
    let mut stack = Vec::new();
    let mut boxes = Vec::new();

    for start in 0..width * height {
        if visited[start] || prob[start] <= params.pixel_threshold {
            continue;
        }

        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);
        let mut sum = 0.0f64;
        let mut count = 0usize;

        visited[start] = true;
        stack.push(start);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % width, idx / width);
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
            sum += prob[idx] as f64;
            count += 1;

            let mut visit = |n: usize| {
                if !visited[n] && prob[n] > params.pixel_threshold {
                    visited[n] = true;
                    stack.push(n);
                }
            };
            if x > 0 {
                visit(idx - 1);
            }
            if x + 1 < width {
                visit(idx + 1);
            }
            if y > 0 {
                visit(idx - width);
            }
            if y + 1 < height {
                visit(idx + width);
            }
        }

        let score = (sum / count as f64) as f32;
        let (w, h) = (max_x - min_x + 1, max_y - min_y + 1);
        if score < params.box_threshold
            || (w as u32) < params.min_size
            || (h as u32) < params.min_size
        {
            continue;
        }

        let distance = (w * h) as f32 * params.unclip_ratio / (2 * (w + h)) as f32;
        let grow = distance.round() as usize;

        boxes.push(TextBox {
            x0: min_x.saturating_sub(grow) as u32,
            y0: min_y.saturating_sub(grow) as u32,
            x1: (max_x + 1 + grow).min(width) as u32,
            y1: (max_y + 1 + grow).min(height) as u32,
            score,
        });
    }

    boxes
}

/// Map boxes from model-input coordinates back to the source image
pub fn scale_boxes(
    boxes: &mut [TextBox],
    from: (u32, u32),
    to: (u32, u32),
) {
    let sx = to.0 as f32 / from.0.max(1) as f32;
    let sy = to.1 as f32 / from.1.max(1) as f32;

    for b in boxes.iter_mut() {
        b.x0 = ((b.x0 as f32 * sx).floor() as u32).min(to.0);
        b.y0 = ((b.y0 as f32 * sy).floor() as u32).min(to.1);
        b.x1 = ((b.x1 as f32 * sx).ceil() as u32).min(to.0);
        b.y1 = ((b.y1 as f32 * sy).ceil() as u32).min(to.1);
    }
}

/// Sort boxes top-to-bottom, then left-to-right within a line.
///
/// Two boxes share a line when their vertical centres differ by less than half
/// the smaller box height.
pub fn sort_reading_order(boxes: &mut Vec<TextBox>) {
    boxes.sort_by(|a, b| a.y0.cmp(&b.y0).then(a.x0.cmp(&b.x0)));

    let mut lines: Vec<Vec<TextBox>> = Vec::new();
    for b in boxes.drain(..) {
        let joins_last = lines.last().is_some_and(|line| {
            let anchor = line[0];
            let tolerance = anchor.height().min(b.height()) as f32 / 2.0;
            (anchor.center_y() - b.center_y()).abs() < tolerance
        });

        match lines.last_mut() {
            Some(line) if joins_last => line.push(b),
            _ => lines.push(vec![b]),
        }
    }

    for mut line in lines {
        line.sort_by_key(|b| b.x0);
        boxes.extend(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_with(width: usize, height: usize, rects: &[(usize, usize, usize, usize, f32)]) -> Vec<f32> {
        let mut prob = vec![0.0; width * height];
        for &(x0, y0, x1, y1, v) in rects {
            for y in y0..y1 {
                for x in x0..x1 {
                    prob[y * width + x] = v;
                }
            }
        }
        prob
    }

    #[test]
    fn test_components_become_boxes() {
        let prob = map_with(40, 20, &[(2, 2, 12, 6, 0.9), (20, 10, 36, 16, 0.8)]);
        let params = BoxParams {
            unclip_ratio: 0.0,
            ..BoxParams::default()
        };
        let mut boxes = boxes_from_probability_map(&prob, 40, 20, &params);
        sort_reading_order(&mut boxes);

        assert_eq!(boxes.len(), 2);
        assert_eq!((boxes[0].x0, boxes[0].y0, boxes[0].x1, boxes[0].y1), (2, 2, 12, 6));
        assert_eq!((boxes[1].x0, boxes[1].y0, boxes[1].x1, boxes[1].y1), (20, 10, 36, 16));
        assert!((boxes[0].score - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_low_score_and_tiny_components_dropped() {
        // 0.4 passes the pixel threshold but not the box threshold
        let prob = map_with(30, 30, &[(1, 1, 20, 8, 0.4), (25, 25, 27, 27, 0.95)]);
        let boxes = boxes_from_probability_map(&prob, 30, 30, &BoxParams::default());
        assert!(boxes.is_empty());
    }

    #[test]
    fn test_unclip_grows_and_clamps() {
        // 10x4 box: distance = 40 * 1.5 / 28 = 2.14 -> 2
        let prob = map_with(20, 8, &[(1, 2, 11, 6, 0.9)]);
        let boxes = boxes_from_probability_map(&prob, 20, 8, &BoxParams::default());
        assert_eq!(boxes.len(), 1);
        assert_eq!((boxes[0].x0, boxes[0].y0, boxes[0].x1, boxes[0].y1), (0, 0, 13, 8));
    }

    #[test]
    fn test_reading_order_groups_lines() {
        let b = |x0, y0, x1, y1| TextBox { x0, y0, x1, y1, score: 1.0 };
        // Second line's left word sits slightly higher than its right word
        let mut boxes = vec![
            b(60, 42, 90, 60),
            b(50, 2, 80, 20),
            b(5, 40, 40, 58),
            b(5, 0, 40, 20),
        ];
        sort_reading_order(&mut boxes);
        let order: Vec<(u32, u32)> = boxes.iter().map(|b| (b.x0, b.y0)).collect();
        assert_eq!(order, vec![(5, 0), (50, 2), (5, 40), (60, 42)]);
    }

    #[test]
    fn test_scale_boxes_to_source() {
        let mut boxes = vec![TextBox { x0: 10, y0: 10, x1: 20, y1: 20, score: 1.0 }];
        scale_boxes(&mut boxes, (320, 320), (800, 400));
        assert_eq!((boxes[0].x0, boxes[0].y0, boxes[0].x1, boxes[0].y1), (25, 12, 50, 25));
    }
}
