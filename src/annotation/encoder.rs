use std::fmt;
use std::str::FromStr;

use super::{BoxAnnotation, NormalizedLabel};
use crate::error::Error;

/// Normalize a pixel box against the frame size.
pub fn encode(bbox: &BoxAnnotation, frame_width: u32, frame_height: u32) -> NormalizedLabel {
    let w = f64::from(frame_width);
    let h = f64::from(frame_height);
    let (x1, y1, x2, y2) = (
        f64::from(bbox.x1),
        f64::from(bbox.y1),
        f64::from(bbox.x2),
        f64::from(bbox.y2),
    );

    NormalizedLabel {
        class_id: bbox.class_id,
        x_center: ((x1 + x2) / 2.0) / w,
        y_center: ((y1 + y2) / 2.0) / h,
        width: (x2 - x1).abs() / w,
        height: (y2 - y1).abs() / h,
    }
}

/// One label per line, no trailing newline.
pub fn serialize(labels: &[NormalizedLabel]) -> String {
    labels
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parse a label file body. Blank lines are skipped.
pub fn parse(text: &str) -> Result<Vec<NormalizedLabel>, Error> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::parse)
        .collect()
}

impl NormalizedLabel {
    /// De-normalize back to pixel corners `(x1, y1, x2, y2)` with x1 <= x2, y1 <= y2.
    pub fn to_pixel_box(&self, frame_width: u32, frame_height: u32) -> (f64, f64, f64, f64) {
        let w = f64::from(frame_width);
        let h = f64::from(frame_height);
        let (cx, cy) = (self.x_center * w, self.y_center * h);
        let (half_w, half_h) = (self.width * w / 2.0, self.height * h / 2.0);
        (cx - half_w, cy - half_h, cx + half_w, cy + half_h)
    }
}

impl fmt::Display for NormalizedLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.6} {:.6} {:.6} {:.6}",
            self.class_id, self.x_center, self.y_center, self.width, self.height
        )
    }
}

impl FromStr for NormalizedLabel {
    type Err = Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [class_id, values @ ..] = fields.as_slice() else {
            return Err(Error::Input("empty label line".to_string()));
        };
        if values.len() != 4 {
            return Err(Error::Input(format!(
                "label line needs 5 fields, got {}: {line:?}",
                fields.len()
            )));
        }

        let class_id = class_id
            .parse::<usize>()
            .map_err(|e| Error::Input(format!("bad class id {class_id:?}: {e}")))?;
        let mut coords = [0.0f64; 4];
        for (slot, raw) in coords.iter_mut().zip(values) {
            *slot = raw
                .parse::<f64>()
                .map_err(|e| Error::Input(format!("bad coordinate {raw:?}: {e}")))?;
        }

        Ok(NormalizedLabel {
            class_id,
            x_center: coords[0],
            y_center: coords[1],
            width: coords[2],
            height: coords[3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_encode_matches_yolo_convention() {
        let label = encode(&BoxAnnotation::new(0, (100, 50), (300, 250)), 640, 480);
        assert_eq!(label.class_id, 0);
        assert_abs_diff_eq!(label.x_center, 200.0 / 640.0);
        assert_abs_diff_eq!(label.y_center, 150.0 / 480.0);
        assert_abs_diff_eq!(label.width, 200.0 / 640.0);
        assert_abs_diff_eq!(label.height, 200.0 / 480.0);
    }

    #[test]
    fn test_encode_is_corner_order_independent() {
        let a = encode(&BoxAnnotation::new(2, (10, 20), (110, 70)), 200, 100);
        let b = encode(&BoxAnnotation::new(2, (110, 70), (10, 20)), 200, 100);
        let c = encode(&BoxAnnotation::new(2, (10, 70), (110, 20)), 200, 100);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_fields_stay_in_unit_range_for_in_bounds_corners() {
        let (w, h) = (37u32, 23u32);
        for x1 in (0..=w as i32).step_by(6) {
            for y2 in (0..=h as i32).step_by(5) {
                let label = encode(&BoxAnnotation::new(0, (x1, 0), (w as i32 - x1 / 2, y2)), w, h);
                for v in [label.x_center, label.y_center, label.width, label.height] {
                    assert!((0.0..=1.0).contains(&v), "{v} out of range for {label:?}");
                }
            }
        }
    }

    #[test]
    fn test_pixel_round_trip() {
        let bbox = BoxAnnotation::new(0, (412, 19), (87, 300));
        let (x1, y1, x2, y2) = encode(&bbox, 640, 360).to_pixel_box(640, 360);
        assert_abs_diff_eq!(x1, 87.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y1, 19.0, epsilon = 1e-6);
        assert_abs_diff_eq!(x2, 412.0, epsilon = 1e-6);
        assert_abs_diff_eq!(y2, 300.0, epsilon = 1e-6);
    }

    #[test]
    fn test_round_trip_through_text_stays_within_rounding() {
        let (w, h) = (1920, 1080);
        let bbox = BoxAnnotation::new(1, (1001, 333), (1777, 1079));
        let text = serialize(&[encode(&bbox, w, h)]);
        let parsed = parse(&text).unwrap();
        let (x1, y1, x2, y2) = parsed[0].to_pixel_box(w, h);
        // 6 decimals leave at most 1e-6 of the frame size per field.
        let tol = 1e-6 * f64::from(w);
        assert_abs_diff_eq!(x1, 1001.0, epsilon = tol);
        assert_abs_diff_eq!(y1, 333.0, epsilon = tol);
        assert_abs_diff_eq!(x2, 1777.0, epsilon = tol);
        assert_abs_diff_eq!(y2, 1079.0, epsilon = tol);
    }

    #[test]
    fn test_serialize_format() {
        let labels = vec![
            encode(&BoxAnnotation::new(0, (0, 0), (100, 100)), 200, 200),
            encode(&BoxAnnotation::new(1, (50, 50), (50, 50)), 200, 200),
        ];
        assert_eq!(
            serialize(&labels),
            "0 0.250000 0.250000 0.500000 0.500000\n1 0.250000 0.250000 0.000000 0.000000"
        );
        assert_eq!(serialize(&[]), "");
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        assert!("0 0.5 0.5 0.1".parse::<NormalizedLabel>().is_err());
        assert!("x 0.5 0.5 0.1 0.1".parse::<NormalizedLabel>().is_err());
        assert!("0 0.5 nope 0.1 0.1".parse::<NormalizedLabel>().is_err());
        assert!(parse("\n0 0.5 0.5 0.1 0.1\n\n").unwrap().len() == 1);
    }
}
