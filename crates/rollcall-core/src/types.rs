use serde::{Deserialize, Serialize};

/// Axis-aligned face region in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    /// Number of raw detector windows merged into this region.
    pub neighbors: u32,
}

impl FaceRegion {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Clamp the region to a `frame_width` × `frame_height` frame.
    ///
    /// Returns `None` when nothing of the region lies inside the frame.
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Option<FaceRegion> {
        if self.x >= frame_width || self.y >= frame_height {
            return None;
        }
        let width = self.width.min(frame_width - self.x);
        let height = self.height.min(frame_height - self.y);
        if width == 0 || height == 0 {
            return None;
        }
        Some(FaceRegion {
            width,
            height,
            ..*self
        })
    }
}

/// Which detected region the sampler crops when a frame holds several.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceSelection {
    /// First region in detector output order.
    #[default]
    First,
    /// Region with the largest area; ties go to the earlier region.
    Largest,
}

impl FaceSelection {
    pub fn pick<'a>(&self, regions: &'a [FaceRegion]) -> Option<&'a FaceRegion> {
        match self {
            FaceSelection::First => regions.first(),
            FaceSelection::Largest => regions.iter().reduce(|best, r| {
                if r.area() > best.area() {
                    r
                } else {
                    best
                }
            }),
        }
    }
}

impl std::str::FromStr for FaceSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(FaceSelection::First),
            "largest" => Ok(FaceSelection::Largest),
            other => Err(format!("unknown face selection policy: {other}")),
        }
    }
}

/// Outcome of comparing a candidate template with a reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Mean absolute pixel difference in [0, 255]. Lower = more similar.
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(x: u32, y: u32, w: u32, h: u32) -> FaceRegion {
        FaceRegion { x, y, width: w, height: h, neighbors: 1 }
    }

    #[test]
    fn test_pick_first() {
        let regions = [region(0, 0, 10, 10), region(20, 20, 50, 50)];
        assert_eq!(FaceSelection::First.pick(&regions), Some(&regions[0]));
    }

    #[test]
    fn test_pick_largest() {
        let regions = [region(0, 0, 10, 10), region(20, 20, 50, 50), region(5, 5, 50, 50)];
        assert_eq!(FaceSelection::Largest.pick(&regions), Some(&regions[1]));
    }

    #[test]
    fn test_pick_empty() {
        assert!(FaceSelection::First.pick(&[]).is_none());
        assert!(FaceSelection::Largest.pick(&[]).is_none());
    }

    #[test]
    fn test_clamp_overhanging_region() {
        let r = region(90, 80, 40, 40).clamp_to(100, 100).unwrap();
        assert_eq!((r.x, r.y, r.width, r.height), (90, 80, 10, 20));
    }

    #[test]
    fn test_clamp_outside_frame() {
        assert!(region(100, 0, 10, 10).clamp_to(100, 100).is_none());
    }

    #[test]
    fn test_selection_from_str() {
        assert_eq!("Largest".parse::<FaceSelection>(), Ok(FaceSelection::Largest));
        assert_eq!("first".parse::<FaceSelection>(), Ok(FaceSelection::First));
        assert!("biggest".parse::<FaceSelection>().is_err());
    }
}
